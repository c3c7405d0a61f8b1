//! The back-pressure detector: `spec.md` §4.5.

use cluster::Pipeline;
use metrics_cache::{length_key, pending_key, MetricsCache};

/// Default back-pressure ratio threshold, matching `spec.md` §4.5.
pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Classifies downstream buffer pressure for `vertex_logical_name` within
/// `pipeline`, reading totals cached by sibling vertices' own evaluations.
///
/// Returns `(direct_pressure, downstream_pressure)`. A missing or stale
/// cache entry for an edge simply skips that edge — this is intentional
/// eventual consistency (`spec.md` §9), not an error.
pub fn has_back_pressure(
    pipeline: &Pipeline,
    vertex_logical_name: &str,
    cache: &MetricsCache,
    threshold: f64,
) -> (bool, bool) {
    let mut direct_pressure = false;
    let mut downstream_pressure = false;

    for edge in pipeline.reachable_downstream(vertex_logical_name) {
        let destination_key = pipeline.vertex_key(&edge.to).to_string();

        let (pending, pending_present) = cache.get(pending_key(&destination_key));
        let (length, length_present) = cache.get(length_key(&destination_key));
        if !pending_present || !length_present || length == 0 {
            continue;
        }

        let ratio = pending as f64 / length as f64;
        if ratio >= threshold {
            downstream_pressure = true;
            if edge.from == vertex_logical_name {
                direct_pressure = true;
                break;
            }
        }
    }

    (direct_pressure, downstream_pressure)
}
