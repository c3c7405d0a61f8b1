#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The pure scaling math (`spec.md` §4.4) and the back-pressure detector
//! (`spec.md` §4.5). Both are synchronous and free of I/O, kept separate
//! from the orchestration in the `evaluator` crate so they can be tested in
//! isolation and reasoned about without a runtime.

mod back_pressure;
mod formula;

pub use back_pressure::{has_back_pressure, DEFAULT_THRESHOLD};
pub use formula::{desired_replicas, ScaleInputs};
