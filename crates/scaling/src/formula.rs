//! The pure scaling formula: `spec.md` §4.4.

/// The vertex configuration inputs the formula needs, independent of any
/// per-partition metric.
#[derive(Debug, Clone, Copy)]
pub struct ScaleInputs {
    /// Whether this vertex is a source (time-to-drain formula) or a UDF/sink
    /// (buffer-headroom formula).
    pub is_source: bool,
    /// Observed (status) replica count — never the spec replica count, per
    /// `spec.md` §9.
    pub current_replicas: u32,
    /// Target seconds for a source to drain its current backlog.
    pub target_processing_seconds: i64,
    /// Maximum per-cycle replica change.
    pub replicas_per_scale: u32,
}

/// Computes the desired replica count from per-partition rate/pending/buffer
/// arrays, aligned by partition index. `buf_lens`/`buf_avail` are ignored
/// for sources (and may be empty).
///
/// Every array element is assumed to already be a "real" signal (no
/// missing/negative/sentinel values) — that filtering happens one layer up,
/// in the evaluator, which skips the whole cycle rather than individual
/// partitions when a signal is absent.
pub fn desired_replicas(inputs: &ScaleInputs, rates: &[f64], pendings: &[i64], buf_lens: &[i64], buf_avail: &[i64]) -> u32 {
    let mut max_desired: i64 = 1;

    for (i, (&rate, &pending)) in rates.iter().zip(pendings.iter()).enumerate() {
        if pending == 0 || rate == 0.0 {
            continue;
        }

        let mut desired = if inputs.is_source {
            let seconds_to_drain = (pending as f64 / rate) / inputs.target_processing_seconds as f64;
            (seconds_to_drain * inputs.current_replicas as f64).round() as i64
        } else {
            let buf_len = buf_lens[i];
            if pending >= buf_len {
                inputs.current_replicas as i64 + inputs.replicas_per_scale as i64
            } else {
                let contribution = (buf_len - pending) as f64 / inputs.current_replicas as f64;
                (buf_avail[i] as f64 / contribution).round() as i64
            }
        };

        if desired == 0 {
            desired = 1;
        }
        if desired > pending {
            desired = pending;
        }

        max_desired = max_desired.max(desired);
    }

    max_desired.max(1) as u32
}
