//! # logship transformers
//!
//! The record-in / record-out enrichment steps applied by the pipeline's
//! transform chain, in the order the agent wires them: journald field
//! normalization, embedded-JSON unwrapping, Kibana timestamp formatting,
//! EC2 instance metadata stamping, and Kubernetes container metadata.
//!
//! Every transformer mutates the record in place and is infallible from
//! the pipeline's point of view: an error is logged by the transform
//! stage and the record moves on.

/// EC2 instance metadata stamping
pub mod aws;

/// Journald field normalization
pub mod journal;

/// Embedded-JSON unwrap
pub mod json;

/// Kubernetes container metadata enrichment
pub mod k8;

/// Kibana `@timestamp` formatting
pub mod kibana;
