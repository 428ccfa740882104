//! Exponential backoff with jitter and an elapsed-time ceiling.
//!
//! Every retry loop in the agent shares this policy type: journal reads
//! and cursor writes retry for up to 15 seconds, delivery for up to an
//! hour. The ceiling is on total elapsed time, not attempt count, so a
//! slow destination gets the same budget as a flapping one.

use std::time::{Duration, Instant};

use rand::Rng;

/// Backoff configuration for a retry loop.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Total elapsed time after which the loop gives up. `None` retries
    /// forever.
    pub max_elapsed: Option<Duration>,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            max_elapsed: None,
            jitter: Jitter::Equal,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_elapsed(mut self, ceiling: Duration) -> Self {
        self.max_elapsed = Some(ceiling);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Policy for local I/O (journal reads, cursor-file writes): give up
    /// after 15 seconds.
    pub fn local_io() -> Self {
        Self::default().with_max_elapsed(Duration::from_secs(15))
    }

    /// Policy for remote delivery: the 1 hour ceiling is the effective
    /// per-batch deadline.
    pub fn delivery() -> Self {
        Self::default().with_max_elapsed(Duration::from_secs(3600))
    }
}

/// Jitter applied to each delay, to keep a fleet of agents from retrying
/// in lockstep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    None,
    /// Random delay between zero and the computed backoff.
    Full,
    /// Half fixed plus half random.
    #[default]
    Equal,
}

fn apply_jitter(delay: Duration, mode: Jitter) -> Duration {
    let mut rng = rand::thread_rng();
    match mode {
        Jitter::None => delay,
        Jitter::Full => Duration::from_secs_f64(rng.gen::<f64>() * delay.as_secs_f64()),
        Jitter::Equal => {
            let half = delay.as_secs_f64() / 2.0;
            Duration::from_secs_f64(half + rng.gen::<f64>() * half)
        }
    }
}

/// Stateful retry clock.
///
/// Each call to [`Backoff::next_delay`] yields the next sleep, or `None`
/// once the elapsed ceiling has passed, at which point the caller treats
/// the last error as final.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
    deadline: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            current: policy.initial_interval,
            deadline: policy.max_elapsed.map(|ceiling| Instant::now() + ceiling),
            policy,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return None;
            }
        }
        let delay = apply_jitter(self.current, self.policy.jitter);
        let grown = self.current.as_secs_f64() * self.policy.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.policy.max_interval.as_secs_f64()));
        Some(delay)
    }
}
