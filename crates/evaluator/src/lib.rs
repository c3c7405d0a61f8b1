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

//! `VertexEvaluator`, the per-vertex evaluation described by `spec.md` §4.6:
//! a sequence of gates, most of which short-circuit with success (no patch)
//! rather than an error, followed by the scaling decision itself.
//!
//! Grounded on the teacher's `engine::create_pipelines` orchestration style:
//! a sequential, fallible, heavily-`tracing`-instrumented function whose
//! early returns are expected outcomes, not failures.

use std::sync::Arc;

use chrono::Utc;
use cluster::{ClusterClient, Pipeline, Vertex, VertexKey};
use daemon::{BufferInfo, DaemonClientFactory, DaemonClientPool, PartitionMetrics};
use metrics_cache::{length_key, pending_key, MetricsCache};
use scaling::{desired_replicas, has_back_pressure, ScaleInputs};
use watchset::WatchSet;

/// All the ways an evaluation can fail outright (as opposed to skip, which
/// is represented by [`Outcome::Skipped`] and is not an error).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// `key` was not `"namespace/name"`.
    #[error("malformed vertex key: {0}")]
    MalformedKey(#[from] cluster::Error),

    /// A daemon RPC failed.
    #[error("daemon error evaluating '{key}': {source}")]
    Daemon {
        /// The vertex key being evaluated.
        key: String,
        /// The underlying daemon error.
        #[source]
        source: daemon::Error,
    },

    /// A cluster API call (other than a tolerated not-found) failed.
    #[error("cluster error evaluating '{key}': {source}")]
    Cluster {
        /// The vertex key being evaluated.
        key: String,
        /// The underlying cluster error.
        #[source]
        source: cluster::Error,
    },
}

/// Why an evaluation produced no patch. None of these are errors; several
/// (`VertexNotFound`, `VertexBeingDeleted`, `NotScalable`, `PipelineNotFound`,
/// `PipelineBeingDeleted`) also stop the vertex being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SkipReason {
    /// Gate 2: vertex no longer exists.
    VertexNotFound,
    /// Gate 3: vertex's deletion timestamp is set.
    VertexBeingDeleted,
    /// Gate 4: vertex has autoscaling disabled.
    NotScalable,
    /// Gate 5: within `cooldownSeconds` of the last scale.
    Cooldown,
    /// Gate 6: vertex phase isn't `Running`.
    NotRunning,
    /// Gate 7: parent pipeline no longer exists.
    PipelineNotFound,
    /// Gate 7: parent pipeline's deletion timestamp is set.
    PipelineBeingDeleted,
    /// Gate 8: pipeline's desired phase isn't `Running`.
    PipelineNotRunning,
    /// Gate 9: a prior patch is still being applied.
    ReplicaCountDrifting,
    /// Gate 10: zero replicas, still within `zeroReplicaSleepSeconds`.
    ZeroReplicaSleeping,
    /// Gate 12: a partition reported no rate or pending signal this cycle.
    NoMetricSignal,
    /// Gate 19: direct back pressure and already at the floor of 1.
    BackPressureAtFloor,
    /// Gate 19: downstream (non-direct) back pressure.
    BackPressureDownstream,
    /// Gate 20: the formula agrees with the current replica count.
    AlreadyDesired,
    /// A patch attempt raced a concurrent delete; tolerated, not reported.
    ConcurrentDelete,
}

/// What an evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No patch was issued.
    Skipped(SkipReason),
    /// `spec.replicas` was patched to this value.
    Patched(u32),
}

/// Evaluates one vertex per `spec.md` §4.6, given the outbound collaborators
/// it needs: the cluster API, a daemon client factory/pool, the shared
/// metrics cache, and the watch set it may remove itself from.
pub struct VertexEvaluator {
    cluster: Arc<dyn ClusterClient>,
    daemon_factory: Arc<dyn DaemonClientFactory>,
    daemon_pool: Arc<DaemonClientPool>,
    metrics_cache: Arc<MetricsCache>,
    watch_set: Arc<WatchSet>,
    back_pressure_threshold: f64,
}

impl VertexEvaluator {
    /// Creates an evaluator over the given outbound collaborators.
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        daemon_factory: Arc<dyn DaemonClientFactory>,
        daemon_pool: Arc<DaemonClientPool>,
        metrics_cache: Arc<MetricsCache>,
        watch_set: Arc<WatchSet>,
        back_pressure_threshold: f64,
    ) -> Self {
        Self {
            cluster,
            daemon_factory,
            daemon_pool,
            metrics_cache,
            watch_set,
            back_pressure_threshold,
        }
    }

    /// Runs the full gate sequence for `key` (`"namespace/name"`).
    pub async fn evaluate(&self, key: &str) -> Result<Outcome, Error> {
        // Gate 1.
        let vertex_key: VertexKey = key.parse()?;

        // Gate 2/3/4.
        let vertex = match self.cluster.get_vertex(&vertex_key).await {
            Ok(vertex) => vertex,
            Err(err) if err.is_not_found() => {
                self.watch_set.stop_watching(key);
                tracing::debug!(%key, "vertex not found, no longer watching");
                return Ok(Outcome::Skipped(SkipReason::VertexNotFound));
            }
            Err(source) => return Err(Error::Cluster { key: key.to_string(), source }),
        };
        if vertex.is_being_deleted() {
            self.watch_set.stop_watching(key);
            return Ok(Outcome::Skipped(SkipReason::VertexBeingDeleted));
        }
        if !vertex.scalable {
            self.watch_set.stop_watching(key);
            return Ok(Outcome::Skipped(SkipReason::NotScalable));
        }

        // Gate 5.
        let now = Utc::now();
        if elapsed_seconds(vertex.status.last_scaled_at, now) < vertex.scale.cooldown_seconds {
            return Ok(Outcome::Skipped(SkipReason::Cooldown));
        }

        // Gate 6.
        if vertex.status.phase != cluster::Phase::Running {
            return Ok(Outcome::Skipped(SkipReason::NotRunning));
        }

        // Gate 7/8.
        let pipeline = match self.cluster.get_pipeline(&vertex.namespace, &vertex.pipeline_name).await {
            Ok(pipeline) => pipeline,
            Err(err) if err.is_not_found() => {
                self.watch_set.stop_watching(key);
                return Ok(Outcome::Skipped(SkipReason::PipelineNotFound));
            }
            Err(source) => return Err(Error::Cluster { key: key.to_string(), source }),
        };
        if pipeline.is_being_deleted() {
            self.watch_set.stop_watching(key);
            return Ok(Outcome::Skipped(SkipReason::PipelineBeingDeleted));
        }
        if pipeline.desired_phase != cluster::Phase::Running {
            return Ok(Outcome::Skipped(SkipReason::PipelineNotRunning));
        }

        // Gate 9.
        if vertex.status.replicas != vertex.spec.replicas {
            return Ok(Outcome::Skipped(SkipReason::ReplicaCountDrifting));
        }

        // Gate 10.
        if vertex.status.replicas == 0 {
            if elapsed_seconds(vertex.status.last_scaled_at, now) >= vertex.scale.zero_replica_sleep_seconds {
                return self.patch(key, &vertex_key, 1).await;
            }
            return Ok(Outcome::Skipped(SkipReason::ZeroReplicaSleeping));
        }

        // Gate 11.
        let daemon_client = match self.daemon_pool.get(&pipeline.daemon_service_url) {
            Some(client) => client,
            None => {
                let client = self.daemon_factory.new_daemon_client(&pipeline.daemon_service_url);
                self.daemon_pool.add(pipeline.daemon_service_url.clone(), client.clone());
                client
            }
        };

        // Gate 12/13.
        let mut partitions = daemon_client
            .get_vertex_metrics(&pipeline.name, &vertex.logical_name)
            .await
            .map_err(|source| Error::Daemon { key: key.to_string(), source })?;
        partitions.sort_by_key(|p| p.partition);

        let mut rates = Vec::with_capacity(partitions.len());
        let mut pendings = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            let (Some(rate), Some(pending)) = (partition.rate(), partition.pending()) else {
                return Ok(Outcome::Skipped(SkipReason::NoMetricSignal));
            };
            rates.push(rate);
            pendings.push(pending);
        }

        let total_rate: f64 = rates.iter().sum();
        let total_pending: i64 = pendings.iter().sum();
        self.metrics_cache.set(pending_key(key), total_pending);

        // Gate 14.
        let (buf_lens, buf_avail) = if vertex.is_a_source() {
            (vec![], vec![])
        } else {
            let mut buf_lens = Vec::with_capacity(vertex.owned_buffers.len());
            let mut buf_avail = Vec::with_capacity(vertex.owned_buffers.len());
            let mut total_length: i64 = 0;
            for buffer_name in &vertex.owned_buffers {
                let info: BufferInfo = daemon_client
                    .get_pipeline_buffer(&pipeline.name, buffer_name)
                    .await
                    .map_err(|source| Error::Daemon { key: key.to_string(), source })?;
                let effective_length = info.effective_length().ok_or_else(|| Error::Daemon {
                    key: key.to_string(),
                    source: daemon::Error::ContractViolation {
                        buffer: buffer_name.clone(),
                    },
                })?;
                let headroom = info
                    .target_free_headroom(vertex.scale.target_buffer_availability_percent)
                    .ok_or_else(|| Error::Daemon {
                        key: key.to_string(),
                        source: daemon::Error::ContractViolation {
                            buffer: buffer_name.clone(),
                        },
                    })?;
                total_length += effective_length;
                buf_lens.push(effective_length);
                buf_avail.push(headroom);
            }
            self.metrics_cache.set(length_key(key), total_length);
            (buf_lens, buf_avail)
        };

        // `ScalingFormula` indexes `buf_lens`/`buf_avail` by the same index
        // it walks `rates`/`pendings` with, so the two pairs of arrays must
        // be the same length. `spec.md` §3 documents partition count and
        // owned-buffer count as independent fields, so a vertex whose
        // daemon reports a different partition count than its owned-buffer
        // count is a contract violation (§7), not a scaling decision — left
        // unchecked it would index out of bounds on every cycle.
        if !vertex.is_a_source() && buf_lens.len() != rates.len() {
            return Err(Error::Daemon {
                key: key.to_string(),
                source: daemon::Error::ContractViolation {
                    buffer: format!("vertex reports {} partitions but owns {} buffers", rates.len(), buf_lens.len()),
                },
            });
        }

        // Gate 15.
        let is_zero_scale = total_pending == 0 && total_rate == 0.0;
        let desired = if is_zero_scale {
            0
        } else {
            let inputs = ScaleInputs {
                is_source: vertex.is_a_source(),
                current_replicas: vertex.status.replicas,
                target_processing_seconds: vertex.scale.target_processing_seconds,
                replicas_per_scale: vertex.scale.replicas_per_scale,
            };
            desired_replicas(&inputs, &rates, &pendings, &buf_lens, &buf_avail)
        };

        let current = vertex.status.replicas;

        // Scale-to-zero is patched directly and bypasses the [min, max]
        // clamp and the step limit entirely, per `spec.md` §8 property 6:
        // clamping or step-limiting it would make scale-to-zero unreachable
        // whenever `min >= 1` or `replicasPerScale < current` (the common
        // case), and property 6 demands the *next* patch be exactly 0.
        // Gate 10 already returned for `current == 0`, so `current > 0` here.
        if is_zero_scale {
            return self.patch(key, &vertex_key, 0).await;
        }

        // Gate 16.
        let clamped_desired = desired.clamp(vertex.scale.min, vertex.scale.max);

        // Gate 17.
        if vertex.spec.replicas < vertex.scale.min || vertex.spec.replicas > vertex.scale.max {
            return self.patch(key, &vertex_key, clamped_desired).await;
        }

        // Gate 18.
        if clamped_desired < current {
            let step = vertex.scale.replicas_per_scale;
            let new_replicas = current - (current - clamped_desired).min(step);
            return self.patch(key, &vertex_key, new_replicas).await;
        }

        // Gate 19.
        if clamped_desired > current {
            let (direct_pressure, downstream_pressure) =
                has_back_pressure(&pipeline, &vertex.logical_name, &self.metrics_cache, self.back_pressure_threshold);
            if direct_pressure {
                if current > 1 {
                    return self.patch(key, &vertex_key, current - 1).await;
                }
                return Ok(Outcome::Skipped(SkipReason::BackPressureAtFloor));
            }
            if downstream_pressure {
                return Ok(Outcome::Skipped(SkipReason::BackPressureDownstream));
            }
            let step = vertex.scale.replicas_per_scale;
            let new_replicas = current + (clamped_desired - current).min(step);
            return self.patch(key, &vertex_key, new_replicas).await;
        }

        // Gate 20.
        Ok(Outcome::Skipped(SkipReason::AlreadyDesired))
    }

    async fn patch(&self, key: &str, vertex_key: &VertexKey, replicas: u32) -> Result<Outcome, Error> {
        match self.cluster.patch_replicas(vertex_key, replicas).await {
            Ok(()) => {
                tracing::info!(%key, replicas, "patched vertex replica count");
                Ok(Outcome::Patched(replicas))
            }
            Err(err) if err.is_not_found() => Ok(Outcome::Skipped(SkipReason::ConcurrentDelete)),
            Err(source) => Err(Error::Cluster { key: key.to_string(), source }),
        }
    }
}

fn elapsed_seconds(last_scaled_at: Option<chrono::DateTime<Utc>>, now: chrono::DateTime<Utc>) -> i64 {
    match last_scaled_at {
        Some(last) => (now - last).num_seconds(),
        None => i64::MAX,
    }
}
