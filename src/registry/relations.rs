use crate::registry::descriptor::{
    DatabaseDescriptor, DependencyKind, Flag, KafkaDescriptor, OpensearchDescriptor, StateSnapshot,
};
use serde::Deserialize;
use thiserror::Error;

/// Database name the platform schema is provisioned under.
const DB_NAME: &str = "datahub_db";

#[derive(Debug, Error)]
pub enum RelationError {
    #[error("relation `{relation}` reported no endpoints")]
    MissingEndpoint { relation: &'static str },
    #[error("relation `{relation}` endpoint `{endpoint}` is not host:port")]
    MalformedEndpoint {
        relation: &'static str,
        endpoint: String,
    },
}

/// A change pushed by a dependency relation provider. Removal is signalled
/// distinctly from change.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelationEvent {
    DatabaseChanged {
        endpoints: String,
        username: String,
        password: String,
    },
    KafkaChanged {
        bootstrap_servers: String,
        username: String,
        password: String,
    },
    OpensearchChanged {
        endpoints: String,
        username: String,
        password: String,
        tls_ca: String,
    },
    Removed {
        kind: DependencyKind,
    },
}

impl RelationEvent {
    pub fn kind(&self) -> DependencyKind {
        match self {
            RelationEvent::DatabaseChanged { .. } => DependencyKind::Database,
            RelationEvent::KafkaChanged { .. } => DependencyKind::Kafka,
            RelationEvent::OpensearchChanged { .. } => DependencyKind::Opensearch,
            RelationEvent::Removed { kind } => *kind,
        }
    }
}

/// Applies a relation event to the snapshot, replacing the descriptor as a
/// whole. The `initialized` sub-flag is seeded `Pending` when the descriptor
/// first appears and preserved across subsequent replaces; removal deletes
/// the descriptor and cascade-clears every durable flag that depended on it.
pub fn apply_relation_event(
    snapshot: &mut StateSnapshot,
    event: RelationEvent,
) -> Result<(), RelationError> {
    match event {
        RelationEvent::DatabaseChanged {
            endpoints,
            username,
            password,
        } => {
            let (host, port) = first_endpoint(&endpoints, "db")?;
            let initialized = carry_initialized(snapshot.database.as_ref().map(|c| c.initialized));
            snapshot.database = Some(DatabaseDescriptor {
                host,
                port,
                dbname: DB_NAME.to_string(),
                username,
                password,
                initialized,
            });
        }
        RelationEvent::KafkaChanged {
            bootstrap_servers,
            username,
            password,
        } => {
            let bootstrap_server = first_entry(&bootstrap_servers, "kafka")?;
            let initialized = carry_initialized(snapshot.kafka.as_ref().map(|c| c.initialized));
            snapshot.kafka = Some(KafkaDescriptor {
                bootstrap_server,
                username,
                password,
                initialized,
            });
        }
        RelationEvent::OpensearchChanged {
            endpoints,
            username,
            password,
            tls_ca,
        } => {
            let (host, port) = first_endpoint(&endpoints, "opensearch")?;
            let initialized =
                carry_initialized(snapshot.opensearch.as_ref().map(|c| c.initialized));
            snapshot.opensearch = Some(OpensearchDescriptor {
                host,
                port,
                username,
                password,
                tls_ca,
                initialized,
            });
        }
        RelationEvent::Removed { kind } => remove_relation(snapshot, kind),
    }

    Ok(())
}

fn remove_relation(snapshot: &mut StateSnapshot, kind: DependencyKind) {
    match kind {
        DependencyKind::Database => {
            snapshot.database = None;
            snapshot.flags.ran_upgrade = Flag::Unknown;
        }
        DependencyKind::Kafka => {
            snapshot.kafka = None;
            snapshot.flags.ran_upgrade = Flag::Unknown;
        }
        DependencyKind::Opensearch => {
            // Trust material and the migration both derived from this
            // dependency; all of it must be re-established.
            snapshot.opensearch = None;
            snapshot.flags.ran_upgrade = Flag::Unknown;
            snapshot.flags.upgrade_truststore_initialized = Flag::Unknown;
            snapshot.flags.gms_truststore_initialized = Flag::Unknown;
            snapshot.flags.frontend_truststore_initialized = Flag::Unknown;
        }
    }
}

fn carry_initialized(previous: Option<Flag>) -> Flag {
    match previous {
        Some(flag) if flag.is_attempted() => flag,
        _ => Flag::Pending,
    }
}

/// First entry of a comma-separated endpoint list, split into host and port.
fn first_endpoint(endpoints: &str, relation: &'static str) -> Result<(String, u16), RelationError> {
    let first = first_entry(endpoints, relation)?;
    let (host, port) = first
        .rsplit_once(':')
        .ok_or_else(|| RelationError::MalformedEndpoint {
            relation,
            endpoint: first.clone(),
        })?;
    let port = port
        .parse::<u16>()
        .map_err(|_| RelationError::MalformedEndpoint {
            relation,
            endpoint: first.clone(),
        })?;
    Ok((host.to_string(), port))
}

fn first_entry(list: &str, relation: &'static str) -> Result<String, RelationError> {
    list.split(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .map(str::to_string)
        .ok_or(RelationError::MissingEndpoint { relation })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database_event() -> RelationEvent {
        RelationEvent::DatabaseChanged {
            endpoints: "pg-0.local:5432,pg-1.local:5432".to_string(),
            username: "operator".to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn database_change_takes_first_endpoint_and_seeds_pending() {
        let mut snapshot = StateSnapshot::default();
        apply_relation_event(&mut snapshot, database_event()).unwrap();

        let conn = snapshot.database.as_ref().unwrap();
        assert_eq!(conn.host, "pg-0.local");
        assert_eq!(conn.port, 5432);
        assert_eq!(conn.dbname, DB_NAME);
        assert_eq!(conn.initialized, Flag::Pending);
    }

    #[test]
    fn replace_preserves_initialized_flag() {
        let mut snapshot = StateSnapshot::default();
        apply_relation_event(&mut snapshot, database_event()).unwrap();
        snapshot.database.as_mut().unwrap().initialized = Flag::Done;

        apply_relation_event(
            &mut snapshot,
            RelationEvent::DatabaseChanged {
                endpoints: "pg-2.local:6432".to_string(),
                username: "operator".to_string(),
                password: "rotated".to_string(),
            },
        )
        .unwrap();

        let conn = snapshot.database.as_ref().unwrap();
        assert_eq!(conn.host, "pg-2.local");
        assert_eq!(conn.port, 6432);
        assert_eq!(conn.initialized, Flag::Done);
    }

    #[test]
    fn opensearch_removal_cascades_trust_flags() {
        let mut snapshot = StateSnapshot::default();
        apply_relation_event(
            &mut snapshot,
            RelationEvent::OpensearchChanged {
                endpoints: "os.local:9200".to_string(),
                username: "admin".to_string(),
                password: "pw".to_string(),
                tls_ca: "ca".to_string(),
            },
        )
        .unwrap();
        snapshot.flags.ran_upgrade = Flag::Done;
        snapshot.flags.gms_truststore_initialized = Flag::Done;
        snapshot.flags.frontend_truststore_initialized = Flag::Done;
        snapshot.flags.upgrade_truststore_initialized = Flag::Done;

        apply_relation_event(
            &mut snapshot,
            RelationEvent::Removed {
                kind: DependencyKind::Opensearch,
            },
        )
        .unwrap();

        assert!(snapshot.opensearch.is_none());
        assert_eq!(snapshot.flags.ran_upgrade, Flag::Unknown);
        assert_eq!(snapshot.flags.gms_truststore_initialized, Flag::Unknown);
        assert_eq!(snapshot.flags.frontend_truststore_initialized, Flag::Unknown);
        assert_eq!(snapshot.flags.upgrade_truststore_initialized, Flag::Unknown);
    }

    #[test]
    fn kafka_removal_clears_upgrade_but_not_trust_material() {
        let mut snapshot = StateSnapshot::default();
        apply_relation_event(
            &mut snapshot,
            RelationEvent::KafkaChanged {
                bootstrap_servers: "broker-0:9092,broker-1:9092".to_string(),
                username: "client".to_string(),
                password: "pw".to_string(),
            },
        )
        .unwrap();
        snapshot.flags.ran_upgrade = Flag::Done;
        snapshot.flags.gms_truststore_initialized = Flag::Done;

        apply_relation_event(
            &mut snapshot,
            RelationEvent::Removed {
                kind: DependencyKind::Kafka,
            },
        )
        .unwrap();

        assert!(snapshot.kafka.is_none());
        assert_eq!(snapshot.flags.ran_upgrade, Flag::Unknown);
        assert_eq!(snapshot.flags.gms_truststore_initialized, Flag::Done);
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let mut snapshot = StateSnapshot::default();
        let result = apply_relation_event(
            &mut snapshot,
            RelationEvent::DatabaseChanged {
                endpoints: "pg-0.local".to_string(),
                username: "operator".to_string(),
                password: "pw".to_string(),
            },
        );
        assert!(matches!(
            result,
            Err(RelationError::MalformedEndpoint { relation: "db", .. })
        ));
        assert!(snapshot.database.is_none());
    }
}
