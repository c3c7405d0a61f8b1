#![doc = include_str!("../README.md")]
#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results,
    variant_size_differences
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! `vertex-autoscaler-core` is the autoscaling control loop of a streaming
//! dataflow platform: it periodically re-evaluates each watched pipeline
//! vertex, fetches live per-partition metrics from that pipeline's daemon
//! service, computes a desired replica count from rate/pending/buffer
//! signals, applies back-pressure and cooldown gates, and patches the
//! cluster with the result.
//!
//! The cluster API, the per-pipeline daemon RPC service, and the inter-step
//! buffer/watermark subsystem are all external collaborators, specified
//! here only by the trait boundary this crate calls through
//! ([`cluster::ClusterClient`], [`daemon::DaemonClient`]/
//! [`daemon::DaemonClientFactory`]).
//!
//! [`scheduler::Scaler`] is the entry point: construct one with a
//! [`cluster::ClusterClient`] and a [`daemon::DaemonClientFactory`], call
//! `start_watching`/`stop_watching` as vertices come and go, and run
//! `start` on a long-lived Tokio runtime until cancelled.

pub use cluster;
pub use config;
pub use daemon;
pub use evaluator;
pub use metrics_cache;
pub use scaling;
pub use scheduler;
pub use task;
pub use watchset;
