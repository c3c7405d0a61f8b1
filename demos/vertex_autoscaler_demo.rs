//! Runs the `Scaler` against in-memory fakes of `ClusterClient` and
//! `DaemonClient`, to see the scheduler actually dispatch and evaluate a
//! watched vertex.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use cluster::{ClusterClient, Edge, Error as ClusterError, Phase, Pipeline, Role, ScaleConfig, Vertex, VertexKey, VertexSpec, VertexStatus};
use color_eyre::eyre::Result;
use config::ScalerOptions;
use daemon::{BufferInfo, DaemonClient, DaemonClientFactory, Error as DaemonError, PartitionMetrics, DEFAULT_LABEL};
use scheduler::Scaler;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

struct InMemoryCluster {
    vertices: Mutex<HashMap<String, Vertex>>,
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_vertex(&self, key: &VertexKey) -> Result<Vertex, ClusterError> {
        self.vertices
            .lock()
            .await
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
            })
    }

    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<Pipeline, ClusterError> {
        Ok(Pipeline {
            namespace: namespace.to_string(),
            name: name.to_string(),
            deletion_timestamp: None,
            desired_phase: Phase::Running,
            daemon_service_url: "http://demo-daemon".into(),
            edges: vec![Edge {
                from: "in".into(),
                to: "out".into(),
            }],
        })
    }

    async fn patch_replicas(&self, key: &VertexKey, replicas: u32) -> Result<(), ClusterError> {
        let mut vertices = self.vertices.lock().await;
        if let Some(vertex) = vertices.get_mut(&key.to_string()) {
            tracing::info!(%key, %replicas, "cluster: patching spec.replicas");
            vertex.spec.replicas = replicas;
            vertex.status.replicas = replicas;
            vertex.status.last_scaled_at = Some(Utc::now());
        }
        Ok(())
    }
}

struct BusySourceDaemonClient;

#[async_trait]
impl DaemonClient for BusySourceDaemonClient {
    async fn get_vertex_metrics(&self, _pipeline: &str, _vertex: &str) -> Result<Vec<PartitionMetrics>, DaemonError> {
        let mut rates = HashMap::new();
        let _ = rates.insert(DEFAULT_LABEL.to_string(), 100.0);
        let mut pendings = HashMap::new();
        let _ = pendings.insert(DEFAULT_LABEL.to_string(), 4000);
        Ok(vec![PartitionMetrics {
            partition: 0,
            processing_rates: rates,
            pendings,
        }])
    }

    async fn get_pipeline_buffer(&self, _pipeline: &str, _buffer_name: &str) -> Result<BufferInfo, DaemonError> {
        Ok(BufferInfo::default())
    }

    async fn close(&self) {
        tracing::info!("daemon client closed");
    }
}

struct BusySourceDaemonFactory;

impl DaemonClientFactory for BusySourceDaemonFactory {
    fn new_daemon_client(&self, url: &str) -> Arc<dyn DaemonClient> {
        tracing::info!(%url, "connecting to daemon");
        Arc::new(BusySourceDaemonClient)
    }
}

fn source_vertex() -> Vertex {
    Vertex {
        namespace: "demo".into(),
        name: "p-in".into(),
        pipeline_name: "p".into(),
        logical_name: "in".into(),
        role: Role::Source,
        is_reduce_udf: false,
        partition_count: 1,
        owned_buffers: vec![],
        scalable: true,
        deletion_timestamp: None,
        scale: ScaleConfig {
            min: 1,
            max: 10,
            replicas_per_scale: 2,
            cooldown_seconds: 0,
            zero_replica_sleep_seconds: 120,
            target_processing_seconds: 20,
            target_buffer_availability_percent: 25.0,
        },
        spec: VertexSpec { replicas: 1 },
        status: VertexStatus {
            phase: Phase::Running,
            replicas: 1,
            last_scaled_at: None,
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init()?;

    let mut vertices = HashMap::new();
    let _ = vertices.insert("demo/p-in".to_string(), source_vertex());
    let cluster: Arc<dyn ClusterClient> = Arc::new(InMemoryCluster {
        vertices: Mutex::new(vertices),
    });
    let daemon_factory: Arc<dyn DaemonClientFactory> = Arc::new(BusySourceDaemonFactory);

    let options = ScalerOptions {
        workers: 2,
        task_interval_ms: 200,
        ..ScalerOptions::default()
    };
    let scaler = Scaler::new(cluster, daemon_factory, options)?;
    scaler.start_watching("demo/p-in");

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let _ = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        stop.cancel();
    });

    scaler.start(cancel).await?;
    tracing::info!("scheduler stopped, every daemon client has been closed");

    Ok(())
}

fn init() -> Result<()> {
    color_eyre::install()?;
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    Ok(())
}
