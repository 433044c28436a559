mod common;

use common::*;
use std::time::Duration;
use steward::config::{OperatorConfig, ProxyConfig};
use steward::registry::{Flag, StateSnapshot};
use steward::workload::{InitContext, WorkloadKind};

struct Harness {
    operator: OperatorConfig,
    proxy: ProxyConfig,
    secrets: MemorySecretStore,
    supervisor: MockSupervisor,
    store: MemoryStateStore,
}

impl Harness {
    fn new(snapshot: StateSnapshot) -> Self {
        Self {
            operator: operator_config(),
            proxy: ProxyConfig::default(),
            secrets: MemorySecretStore::with_encryption_keys(),
            supervisor: MockSupervisor::new(),
            store: MemoryStateStore::new(snapshot),
        }
    }

    async fn run(&self, kind: WorkloadKind) -> Result<bool, String> {
        let mut snapshot = self.store.current();
        let mut ctx = InitContext {
            snapshot: &mut snapshot,
            operator: &self.operator,
            proxy: &self.proxy,
            secrets: &self.secrets,
            supervisor: &self.supervisor,
            staging: &self.supervisor,
            store: &self.store,
        };
        kind.run_initialization(&mut ctx)
            .await
            .map_err(|err| err.to_string())
    }
}

#[tokio::test]
async fn database_bootstrap_runs_at_most_once() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));

    let ran = harness.run(WorkloadKind::PostgresqlSetup).await.unwrap();
    assert!(ran);
    assert_eq!(
        harness
            .store
            .current()
            .database
            .as_ref()
            .unwrap()
            .initialized,
        Flag::Done
    );
    assert_eq!(
        harness
            .supervisor
            .exec_calls_for("datahub-postgresql-setup")
            .len(),
        1
    );

    // Second call is a no-op: the durable flag gates the action.
    let ran = harness.run(WorkloadKind::PostgresqlSetup).await.unwrap();
    assert!(!ran);
    assert_eq!(
        harness
            .supervisor
            .exec_calls_for("datahub-postgresql-setup")
            .len(),
        1
    );
}

#[tokio::test]
async fn unready_workload_initialization_is_a_noop() {
    let harness = Harness::new(StateSnapshot::default());

    let ran = harness.run(WorkloadKind::PostgresqlSetup).await.unwrap();
    assert!(!ran);
    assert!(harness.supervisor.exec_calls().is_empty());
    assert_eq!(harness.store.replace_count(), 0);
}

#[tokio::test]
async fn failed_bootstrap_sets_no_flag_and_retries_cleanly() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));
    harness.supervisor.fail_exec_for("datahub-kafka-setup");

    let err = harness.run(WorkloadKind::KafkaSetup).await.unwrap_err();
    assert!(err.contains("datahub-kafka-setup"));
    assert_eq!(
        harness.store.current().kafka.as_ref().unwrap().initialized,
        Flag::Pending,
        "failure must leave the gate open"
    );

    // Next pass retries from scratch and succeeds.
    harness.supervisor.clear_exec_failures();
    let ran = harness.run(WorkloadKind::KafkaSetup).await.unwrap();
    assert!(ran);
    assert_eq!(
        harness.store.current().kafka.as_ref().unwrap().initialized,
        Flag::Done
    );
}

#[tokio::test]
async fn kafka_bootstrap_runs_in_its_working_directory() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));

    harness.run(WorkloadKind::KafkaSetup).await.unwrap();
    let calls = harness.supervisor.exec_calls_for("datahub-kafka-setup");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].working_dir.as_deref(), Some("/opt/kafka"));
    assert_eq!(calls[0].timeout, Some(Duration::from_secs(600)));
    assert!(calls[0].command[0].ends_with("runner.sh"));
}

#[tokio::test]
async fn opensearch_bootstrap_stages_certificates_and_sets_curl_bundle() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));

    harness.run(WorkloadKind::OpensearchSetup).await.unwrap();

    let staged = harness
        .supervisor
        .staged_files_for("datahub-opensearch-setup");
    assert!(staged
        .iter()
        .any(|file| file.dest_path.ends_with("opensearch_certificates.pem")
            && file.contents == tls_ca_bundle()));

    let calls = harness
        .supervisor
        .exec_calls_for("datahub-opensearch-setup");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].environment.contains_key("CURL_CA_BUNDLE"));
}

#[tokio::test]
async fn migration_stages_truststore_then_runs_behind_its_gates() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Done));

    let ran = harness.run(WorkloadKind::Upgrade).await.unwrap();
    assert!(ran);

    let snapshot = harness.store.current();
    assert_eq!(snapshot.flags.upgrade_truststore_initialized, Flag::Done);
    assert_eq!(snapshot.flags.ran_upgrade, Flag::Done);

    // Only the root certificate (second bundle entry) goes into the
    // truststore staging.
    let staged = harness.supervisor.staged_files_for("datahub-upgrade");
    assert!(staged
        .iter()
        .any(|file| file.dest_path.ends_with("opensearch_root_ca_cert.pem")
            && file.contents == ROOT_CERT));

    let calls = harness.supervisor.exec_calls_for("datahub-upgrade");
    assert_eq!(calls.len(), 2, "truststore script then migration");
    assert!(calls[1].command.iter().any(|arg| arg == "SystemUpdate"));
    assert_eq!(calls[1].timeout, Some(Duration::from_secs(180)));

    // Re-running is a no-op once the migration flag is durable.
    let ran = harness.run(WorkloadKind::Upgrade).await.unwrap();
    assert!(!ran);
    assert_eq!(harness.supervisor.exec_calls_for("datahub-upgrade").len(), 2);
}

#[tokio::test]
async fn migration_does_not_run_before_bootstraps_confirm() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));

    let ran = harness.run(WorkloadKind::Upgrade).await.unwrap();
    assert!(!ran);
    assert!(harness.supervisor.exec_calls_for("datahub-upgrade").is_empty());
    assert_eq!(harness.store.current().flags.ran_upgrade, Flag::Unknown);
}

#[tokio::test]
async fn failed_migration_leaves_the_upgrade_flag_open() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Done));
    harness.supervisor.fail_exec_for("datahub-upgrade");

    let err = harness.run(WorkloadKind::Upgrade).await.unwrap_err();
    assert!(err.contains("datahub-upgrade"));

    let snapshot = harness.store.current();
    assert_eq!(snapshot.flags.ran_upgrade, Flag::Unknown);
    // Truststore staging failed inside the same action, so its flag is
    // still open as well.
    assert_eq!(snapshot.flags.upgrade_truststore_initialized, Flag::Unknown);
}

#[tokio::test]
async fn gms_truststore_initialization_is_idempotent() {
    let mut snapshot = snapshot_with_descriptors(Flag::Done);
    snapshot.flags.ran_upgrade = Flag::Done;
    let harness = Harness::new(snapshot);

    let ran = harness.run(WorkloadKind::Gms).await.unwrap();
    assert!(ran);
    assert_eq!(
        harness.store.current().flags.gms_truststore_initialized,
        Flag::Done
    );
    assert_eq!(harness.supervisor.exec_calls_for("datahub-gms").len(), 1);

    let ran = harness.run(WorkloadKind::Gms).await.unwrap();
    assert!(!ran);
    assert_eq!(harness.supervisor.exec_calls_for("datahub-gms").len(), 1);
}

#[tokio::test]
async fn actions_worker_has_no_initialization() {
    let harness = Harness::new(converged_snapshot());
    let ran = harness.run(WorkloadKind::Actions).await.unwrap();
    assert!(!ran);
    assert!(harness.supervisor.exec_calls().is_empty());
}
