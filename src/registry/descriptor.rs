use serde::{Deserialize, Serialize};

/// External dependencies the platform needs before any workload can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Database,
    Kafka,
    Opensearch,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 3] = [
        DependencyKind::Database,
        DependencyKind::Kafka,
        DependencyKind::Opensearch,
    ];

    /// Relation name as reported in operator-facing status reasons.
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyKind::Database => "db",
            DependencyKind::Kafka => "kafka",
            DependencyKind::Opensearch => "opensearch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "db" | "database" => Some(DependencyKind::Database),
            "kafka" => Some(DependencyKind::Kafka),
            "opensearch" => Some(DependencyKind::Opensearch),
            _ => None,
        }
    }
}

/// Durable tri-state completion marker.
///
/// `Pending` (attempted, not confirmed) and `Unknown` (never attempted) are
/// distinct on purpose: idempotence gates check `is_done()`, readiness gates
/// for the setup jobs check `is_attempted()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    #[default]
    Unknown,
    Pending,
    Done,
}

impl Flag {
    pub fn is_done(self) -> bool {
        matches!(self, Flag::Done)
    }

    /// True once the marker exists at all, whether or not it is confirmed.
    pub fn is_attempted(self) -> bool {
        !matches!(self, Flag::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Unknown => "unknown",
            Flag::Pending => "pending",
            Flag::Done => "done",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub initialized: Flag,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaDescriptor {
    pub bootstrap_server: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub initialized: Flag,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpensearchDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls_ca: String,
    #[serde(default)]
    pub initialized: Flag,
}

/// Per-workload durable completion flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableFlags {
    #[serde(default)]
    pub ran_upgrade: Flag,
    #[serde(default)]
    pub upgrade_truststore_initialized: Flag,
    #[serde(default)]
    pub gms_truststore_initialized: Flag,
    #[serde(default)]
    pub frontend_truststore_initialized: Flag,
}

/// The full persisted registry: one optional descriptor per dependency plus
/// the durable flag set. Read and written as a whole object; callers must
/// never mutate a descriptor in place without assigning the snapshot back to
/// the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub database: Option<DatabaseDescriptor>,
    #[serde(default)]
    pub kafka: Option<KafkaDescriptor>,
    #[serde(default)]
    pub opensearch: Option<OpensearchDescriptor>,
    #[serde(default)]
    pub flags: DurableFlags,
}

impl StateSnapshot {
    /// Dependency kinds with no descriptor yet, in reporting order.
    pub fn missing_relations(&self) -> Vec<DependencyKind> {
        let mut missing = Vec::new();
        if self.database.is_none() {
            missing.push(DependencyKind::Database);
        }
        if self.kafka.is_none() {
            missing.push(DependencyKind::Kafka);
        }
        if self.opensearch.is_none() {
            missing.push(DependencyKind::Opensearch);
        }
        missing
    }

    /// Initialization sub-flag for a dependency; `Unknown` while the
    /// descriptor is absent.
    pub fn dependency_initialized(&self, kind: DependencyKind) -> Flag {
        match kind {
            DependencyKind::Database => self
                .database
                .as_ref()
                .map(|conn| conn.initialized)
                .unwrap_or_default(),
            DependencyKind::Kafka => self
                .kafka
                .as_ref()
                .map(|conn| conn.initialized)
                .unwrap_or_default(),
            DependencyKind::Opensearch => self
                .opensearch
                .as_ref()
                .map(|conn| conn.initialized)
                .unwrap_or_default(),
        }
    }

    pub fn all_dependencies_initialized(&self) -> bool {
        DependencyKind::ALL
            .iter()
            .all(|kind| self.dependency_initialized(*kind).is_done())
    }
}
