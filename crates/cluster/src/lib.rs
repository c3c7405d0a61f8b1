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

//! Cluster-facing data model and the `ClusterClient` trait the autoscaler
//! core depends on but never implements itself.
//!
//! Vertex/Pipeline objects are read-only snapshots handed to the core by the
//! hosting controller; `ClusterClient::patch` is the only mutation this
//! crate's boundary allows, and it is always a `spec.replicas` merge patch.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// All the errors that can occur crossing the cluster-client boundary.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A `namespace/name` key could not be parsed.
    #[error("malformed vertex key `{key}`")]
    MalformedKey {
        /// The offending key.
        key: String,
    },

    /// The requested object does not exist (or was already deleted).
    #[error("not found (namespace: {namespace}, name: {name})")]
    NotFound {
        /// The object's namespace.
        namespace: String,
        /// The object's name.
        name: String,
    },

    /// Any other cluster API error (connectivity, auth, conflict, ...).
    #[error("cluster API error (reason: {reason})")]
    Api {
        /// The error message.
        reason: String,
    },
}

impl Error {
    /// Returns whether this error is a not-found error, the one kind that
    /// several `VertexEvaluator` gates treat as "stop watching" rather than
    /// "report and retry."
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Canonical identifier of a vertex: `"<namespace>/<name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexKey {
    /// The vertex's namespace.
    pub namespace: String,
    /// The vertex's name.
    pub name: String,
}

impl VertexKey {
    /// Creates a key from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for VertexKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(Error::MalformedKey { key: s.to_string() });
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(Error::MalformedKey { key: s.to_string() });
        }
        Ok(VertexKey::new(namespace, name))
    }
}

/// The role a vertex plays in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Role {
    /// Produces messages; owns no input buffers.
    Source,
    /// Consumes from and produces to inter-step buffers.
    Udf,
    /// Consumes from inter-step buffers; produces nowhere the pipeline tracks.
    Sink,
}

/// Lifecycle phase shared by vertices and pipelines. `spec.md` leaves this
/// open-ended ("Pending, Running, Failed, Succeeded, ...") so an `Other`
/// catch-all carries anything the core doesn't special-case.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Phase {
    /// Not yet running.
    Pending,
    /// Running normally; the only phase the evaluator proceeds past gate 6 for.
    Running,
    /// Failed; no scaling decisions are made.
    Failed,
    /// Completed; no scaling decisions are made.
    Succeeded,
    /// Any phase value not enumerated above.
    Other(String),
}

/// Per-vertex scaling configuration. Every field has a numaflow-style
/// default so a vertex whose CRD omitted a field still has a sane value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleConfig {
    /// Minimum replica count ever set by the autoscaler.
    pub min: u32,
    /// Maximum replica count ever set by the autoscaler.
    pub max: u32,
    /// Maximum per-cycle replica change (`replicasPerScale`).
    pub replicas_per_scale: u32,
    /// Minimum wall-clock gap between two scale actions.
    pub cooldown_seconds: i64,
    /// How long a 0-replica vertex sleeps before being peeked back to 1.
    pub zero_replica_sleep_seconds: i64,
    /// Target time (seconds) for a source to drain its backlog.
    pub target_processing_seconds: i64,
    /// Target percentage of buffer length the autoscaler tries to keep free.
    pub target_buffer_availability_percent: f64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 1,
            replicas_per_scale: 2,
            cooldown_seconds: 90,
            zero_replica_sleep_seconds: 120,
            target_processing_seconds: 20,
            target_buffer_availability_percent: 50.0,
        }
    }
}

/// The desired part of a vertex's state, as last written by a (possibly
/// human) editor of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexSpec {
    /// Desired replica count.
    pub replicas: u32,
}

/// The observed part of a vertex's state, as last reported by the
/// controller owning the vertex's pods.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexStatus {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Observed (running) replica count — may lag `spec.replicas` while a
    /// prior patch is being applied.
    pub replicas: u32,
    /// Timestamp of the last scale action, if any.
    pub last_scaled_at: Option<DateTime<Utc>>,
}

/// A read-only snapshot of a single processing stage of a pipeline.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// The vertex's namespace.
    pub namespace: String,
    /// The vertex's name.
    pub name: String,
    /// The name of the pipeline this vertex belongs to.
    pub pipeline_name: String,
    /// The vertex's logical name within its pipeline's DAG.
    pub logical_name: String,
    /// Source, UDF, or Sink.
    pub role: Role,
    /// Whether this vertex runs a reduce UDF.
    pub is_reduce_udf: bool,
    /// Number of partitions this vertex runs (>= 1).
    pub partition_count: u32,
    /// Names of the input buffers this vertex owns (empty for sources).
    pub owned_buffers: Vec<String>,
    /// Whether autoscaling applies to this vertex at all.
    pub scalable: bool,
    /// Non-`None` when the vertex is being terminated.
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Scaling configuration.
    pub scale: ScaleConfig,
    /// Desired state.
    pub spec: VertexSpec,
    /// Observed state.
    pub status: VertexStatus,
}

impl Vertex {
    /// Returns this vertex's canonical key.
    pub fn key(&self) -> VertexKey {
        VertexKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether this vertex is a source (owns no input buffers).
    pub fn is_a_source(&self) -> bool {
        matches!(self.role, Role::Source)
    }

    /// Whether this vertex's deletion timestamp has been set.
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// A directed edge between two vertices, named by their logical (in-pipeline)
/// names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The logical name of the upstream vertex.
    pub from: String,
    /// The logical name of the downstream vertex.
    pub to: String,
}

/// A read-only snapshot of a pipeline: its static DAG of edges and the
/// metadata needed to reach its daemon service.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// The pipeline's namespace.
    pub namespace: String,
    /// The pipeline's name.
    pub name: String,
    /// Non-`None` when the pipeline is being terminated.
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Desired pipeline-wide phase (e.g. Running vs Paused).
    pub desired_phase: Phase,
    /// URL of this pipeline's per-pipeline daemon service.
    pub daemon_service_url: String,
    /// All directed edges of the pipeline's DAG, by logical vertex name.
    pub edges: Vec<Edge>,
}

impl Pipeline {
    /// Whether this pipeline's deletion timestamp has been set.
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// All edges of the pipeline's DAG.
    pub fn list_all_edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The edges whose source is `logical_name` (one hop downstream).
    pub fn downstream_edges(&self, logical_name: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.from == logical_name)
    }

    /// Derives the cluster-wide [`VertexKey`] for a vertex identified only
    /// by its logical (in-pipeline) name, following the naming convention
    /// used throughout the rest of the data model: a vertex's cluster name
    /// is `"<pipeline-name>-<logical-name>"`.
    pub fn vertex_key(&self, logical_name: &str) -> VertexKey {
        VertexKey::new(self.namespace.clone(), format!("{}-{}", self.name, logical_name))
    }

    /// All logical vertex names reachable by following zero or more
    /// downstream edges from `logical_name`, each visited at most once
    /// (the DAG has no cycles, but this guards against a malformed graph
    /// anyway). Used by the back-pressure detector, which must inspect the
    /// whole downstream subgraph, not just the immediate neighbors.
    pub fn reachable_downstream<'a>(&'a self, logical_name: &'a str) -> Vec<&'a Edge> {
        let mut visited = std::collections::HashSet::new();
        let mut frontier = vec![logical_name];
        let mut reachable = vec![];

        while let Some(current) = frontier.pop() {
            for edge in self.downstream_edges(current) {
                reachable.push(edge);
                if visited.insert(edge.to.as_str()) {
                    frontier.push(edge.to.as_str());
                }
            }
        }

        reachable
    }
}

/// The outbound trait the autoscaler core uses to read and patch cluster
/// objects. Implemented by the hosting controller, never by this crate.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetches a vertex by key. Returns [`Error::NotFound`] if absent.
    async fn get_vertex(&self, key: &VertexKey) -> Result<Vertex, Error>;

    /// Fetches a vertex's parent pipeline. Returns [`Error::NotFound`] if
    /// absent.
    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<Pipeline, Error>;

    /// Applies a `spec.replicas` merge patch to the named vertex. A
    /// not-found error here is tolerated by callers (treated as a
    /// concurrent delete); any other error is reported.
    async fn patch_replicas(&self, key: &VertexKey, replicas: u32) -> Result<(), Error>;
}
