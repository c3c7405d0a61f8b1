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

//! The dispatcher/worker-pool scheduler (`spec.md` §4.7) and the public
//! `Scaler` facade (`spec.md` §6).
//!
//! Grounded on the teacher's `engine::create_pipelines` task-spawning style
//! and its use of `task::TaskManager` to track and join long-lived tasks on
//! shutdown. Cancellation uses `tokio_util::sync::CancellationToken` rather
//! than the teacher's own `Signal::Stop`-over-channel, which is specific to
//! beaubourg's data plane (a `Signal<Msg>` multiplexing a stop signal with
//! message batches) that has no counterpart here.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use cluster::{ClusterClient, Vertex};
use config::ScalerOptions;
use daemon::{DaemonClientFactory, DaemonClientPool};
use evaluator::VertexEvaluator;
use futures::FutureExt;
use metrics_cache::MetricsCache;
use task::{
    labels::{ProcessLabels, TaskLabels},
    TaskCleaner, TaskManager,
};
use tokio_util::sync::CancellationToken;
use watchset::WatchSet;

/// All the errors this crate can surface. Per-evaluation errors never reach
/// here — they are logged and the worker moves on (`spec.md` §7).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The [`ScalerOptions`] supplied to [`Scaler::new`] failed validation.
    #[error(transparent)]
    Config(#[from] config::Error),
}

/// The public facade: the inbound API a hosting reconciler calls
/// (`spec.md` §6).
pub struct Scaler {
    watch_set: Arc<WatchSet>,
    evaluator: Arc<VertexEvaluator>,
    daemon_pool: Arc<DaemonClientPool>,
    options: ScalerOptions,
}

impl Scaler {
    /// Creates a scaler over the given cluster client and daemon client
    /// factory, validating `options` first.
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        daemon_factory: Arc<dyn DaemonClientFactory>,
        options: ScalerOptions,
    ) -> Result<Self, Error> {
        options.validate_options()?;

        let watch_set = Arc::new(WatchSet::new());
        let metrics_cache = Arc::new(MetricsCache::new());
        let daemon_pool = Arc::new(DaemonClientPool::with_capacity(options.clients_cache_size));
        let evaluator = Arc::new(VertexEvaluator::new(
            cluster,
            daemon_factory,
            daemon_pool.clone(),
            metrics_cache,
            watch_set.clone(),
            options.back_pressure_threshold,
        ));

        Ok(Self {
            watch_set,
            evaluator,
            daemon_pool,
            options,
        })
    }

    /// Starts watching `key` (idempotent).
    pub fn start_watching(&self, key: impl AsRef<str>) {
        self.watch_set.start_watching(key);
    }

    /// Stops watching `key` (idempotent). Returns whether it was watched.
    pub fn stop_watching(&self, key: impl AsRef<str>) -> bool {
        self.watch_set.stop_watching(key)
    }

    /// Returns whether `key` is currently watched.
    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.watch_set.contains(key)
    }

    /// Returns the number of currently-watched keys.
    pub fn length(&self) -> usize {
        self.watch_set.length()
    }

    /// The canonical watch key of a vertex: `"<namespace>/<name>"`.
    pub fn key_of_vertex(vertex: &Vertex) -> String {
        vertex.key().to_string()
    }

    /// Runs the dispatcher and `options.workers` worker tasks until
    /// `cancel` is triggered. On return, every [`daemon::DaemonClient`]
    /// ever added to the pool has had `close` invoked and awaited
    /// (`spec.md` §8 property 8) — this method does not return until the
    /// purge itself has completed, not merely been scheduled.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), Error> {
        // A capacity-0 (rendezvous) handoff channel: the dispatcher's send
        // blocks until a worker is ready to receive, which is the
        // backpressure mechanism for the autoscaler itself (`spec.md` §4.7,
        // §9 — "do not spawn one task per evaluation").
        let (key_sender, key_receiver) = flume::bounded::<String>(0);

        let mut task_manager = TaskManager::with_process_labels(ProcessLabels::new("vertex-autoscaler"));
        for worker_id in 0..self.options.workers {
            let task_labels = TaskLabels::new("scheduler-worker", &worker_id.to_string(), "scheduler");
            let join_handle = tokio::spawn(worker_loop(
                worker_id,
                key_receiver.clone(),
                self.evaluator.clone(),
                cancel.clone(),
            ));
            task_manager.register(join_handle, &task_labels);
        }
        // Drop our own receiver so the channel closes once every worker's
        // clone is also dropped, rather than keeping it alive forever.
        drop(key_receiver);

        dispatch_loop(self.watch_set.clone(), key_sender, self.options.task_interval_ms, cancel.clone()).await;

        task_manager.join().await;
        self.daemon_pool.purge().await;

        Ok(())
    }
}

/// The dispatcher: rotates the watch set and hands keys to workers at an
/// adaptive interval (`spec.md` §4.7).
async fn dispatch_loop(watch_set: Arc<WatchSet>, key_sender: flume::Sender<String>, task_interval_ms: u64, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Some(key) = watch_set.rotate_front() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                send_result = key_sender.send_async(key) => {
                    if send_result.is_err() {
                        tracing::debug!("dispatcher stopping: no workers left to receive");
                        break;
                    }
                }
            }
        }

        let revisit_population = watch_set.length().max(1) as u64;
        let interval_ms = (task_interval_ms / revisit_population).max(1);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }
    }
}

/// One long-lived worker: pulls keys off the handoff channel and evaluates
/// them, recovering from panics so a single bad evaluation can't take the
/// worker down (`spec.md` §7).
async fn worker_loop(
    worker_id: u32,
    key_receiver: flume::Receiver<String>,
    evaluator: Arc<VertexEvaluator>,
    cancel: CancellationToken,
) -> Box<dyn TaskCleaner> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = key_receiver.recv_async() => {
                match received {
                    Ok(key) => evaluate_one(worker_id, &evaluator, &key).await,
                    Err(_) => break,
                }
            }
        }
    }

    TaskManager::no_task_cleaner(
        ProcessLabels::new("vertex-autoscaler"),
        TaskLabels::new("scheduler-worker", &worker_id.to_string(), "scheduler"),
    )
}

async fn evaluate_one(worker_id: u32, evaluator: &Arc<VertexEvaluator>, key: &str) {
    let evaluation = AssertUnwindSafe(evaluator.evaluate(key)).catch_unwind().await;
    match evaluation {
        Ok(Ok(outcome)) => tracing::debug!(worker_id, %key, ?outcome, "evaluation completed"),
        Ok(Err(error)) => tracing::warn!(worker_id, %key, %error, "evaluation failed, will retry next rotation"),
        Err(panic) => tracing::error!(worker_id, %key, panic = ?panic, "evaluation panicked, worker continuing"),
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use cluster::{Error as ClusterError, Phase, Role, ScaleConfig, VertexKey, VertexSpec, VertexStatus};
    use daemon::{BufferInfo, DaemonClient, Error as DaemonError, PartitionMetrics};

    use super::*;

    struct FakeCluster {
        vertices: StdMutex<std::collections::HashMap<String, Vertex>>,
        patch_calls: StdMutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn get_vertex(&self, key: &VertexKey) -> Result<Vertex, ClusterError> {
            self.vertices
                .lock()
                .expect("lock")
                .get(&key.to_string())
                .cloned()
                .ok_or_else(|| ClusterError::NotFound {
                    namespace: key.namespace.clone(),
                    name: key.name.clone(),
                })
        }

        async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<cluster::Pipeline, ClusterError> {
            Ok(cluster::Pipeline {
                namespace: namespace.to_string(),
                name: name.to_string(),
                deletion_timestamp: None,
                desired_phase: Phase::Running,
                daemon_service_url: "http://daemon".into(),
                edges: vec![],
            })
        }

        async fn patch_replicas(&self, key: &VertexKey, replicas: u32) -> Result<(), ClusterError> {
            self.patch_calls.lock().expect("lock").push((key.to_string(), replicas));
            let mut vertices = self.vertices.lock().expect("lock");
            if let Some(vertex) = vertices.get_mut(&key.to_string()) {
                vertex.spec.replicas = replicas;
                vertex.status.replicas = replicas;
                vertex.status.last_scaled_at = Some(Utc::now());
            }
            Ok(())
        }
    }

    struct NoSignalDaemonClient;

    #[async_trait]
    impl DaemonClient for NoSignalDaemonClient {
        async fn get_vertex_metrics(&self, _pipeline: &str, _vertex: &str) -> Result<Vec<PartitionMetrics>, DaemonError> {
            Ok(vec![])
        }

        async fn get_pipeline_buffer(&self, _pipeline: &str, _buffer_name: &str) -> Result<BufferInfo, DaemonError> {
            Ok(BufferInfo::default())
        }

        async fn close(&self) {}
    }

    struct NoSignalDaemonFactory;

    impl DaemonClientFactory for NoSignalDaemonFactory {
        fn new_daemon_client(&self, _url: &str) -> Arc<dyn DaemonClient> {
            Arc::new(NoSignalDaemonClient)
        }
    }

    fn running_source(namespace: &str, name: &str) -> Vertex {
        Vertex {
            namespace: namespace.into(),
            name: name.into(),
            pipeline_name: "p".into(),
            logical_name: name.into(),
            role: Role::Source,
            is_reduce_udf: false,
            partition_count: 1,
            owned_buffers: vec![],
            scalable: true,
            deletion_timestamp: None,
            scale: ScaleConfig::default(),
            spec: VertexSpec { replicas: 1 },
            status: VertexStatus {
                phase: Phase::Running,
                replicas: 1,
                last_scaled_at: None,
            },
        }
    }

    #[tokio::test]
    async fn key_of_vertex_is_namespace_slash_name() {
        let vertex = running_source("ns", "p-src");
        assert_eq!(Scaler::key_of_vertex(&vertex), "ns/p-src");
    }

    #[tokio::test]
    async fn rejects_invalid_options() {
        let cluster = Arc::new(FakeCluster {
            vertices: StdMutex::new(Default::default()),
            patch_calls: StdMutex::new(vec![]),
        });
        let factory = Arc::new(NoSignalDaemonFactory);
        let bad_options = ScalerOptions {
            workers: 0,
            ..ScalerOptions::default()
        };

        assert!(Scaler::new(cluster, factory, bad_options).is_err());
    }

    #[tokio::test]
    async fn start_visits_every_watched_key_and_stops_on_cancel() {
        let mut vertices = std::collections::HashMap::new();
        let _ = vertices.insert("ns/a".to_string(), running_source("ns", "a"));
        let _ = vertices.insert("ns/b".to_string(), running_source("ns", "b"));
        let cluster = Arc::new(FakeCluster {
            vertices: StdMutex::new(vertices),
            patch_calls: StdMutex::new(vec![]),
        });
        let factory = Arc::new(NoSignalDaemonFactory);
        let options = ScalerOptions {
            workers: 2,
            task_interval_ms: 20,
            ..ScalerOptions::default()
        };
        let scaler = Scaler::new(cluster, factory, options).expect("valid options");
        scaler.start_watching("ns/a");
        scaler.start_watching("ns/b");
        assert_eq!(scaler.length(), 2);

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });

        scaler.start(cancel).await.expect("scheduler run completes");
        // Every evaluation short-circuits at gate 12 (no partitions reported);
        // the assertion here is just that start() returns once cancelled.
    }

    #[tokio::test]
    async fn stop_watching_removes_a_key() {
        let cluster = Arc::new(FakeCluster {
            vertices: StdMutex::new(Default::default()),
            patch_calls: StdMutex::new(vec![]),
        });
        let factory = Arc::new(NoSignalDaemonFactory);
        let scaler = Scaler::new(cluster, factory, ScalerOptions::default()).expect("valid options");
        scaler.start_watching("ns/a");
        assert!(scaler.contains("ns/a"));
        assert!(scaler.stop_watching("ns/a"));
        assert!(!scaler.contains("ns/a"));
    }
}
