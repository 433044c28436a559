mod common;

use common::*;
use steward::config::StewardConfig;
use steward::reconcile::{run_pass, PassContext, PassOutcome, Status};
use steward::registry::{Flag, StateSnapshot};
use steward::workload::WORKLOAD_ORDER;

struct Harness {
    config: StewardConfig,
    store: MemoryStateStore,
    secrets: MemorySecretStore,
    supervisor: MockSupervisor,
}

impl Harness {
    fn new(snapshot: StateSnapshot) -> Self {
        Self {
            config: steward_config(),
            store: MemoryStateStore::new(snapshot),
            secrets: MemorySecretStore::with_encryption_keys(),
            supervisor: MockSupervisor::new(),
        }
    }

    async fn run(&self) -> steward::error::Result<PassOutcome> {
        let ctx = PassContext {
            config: &self.config,
            store: &self.store,
            secrets: &self.secrets,
            supervisor: &self.supervisor,
            staging: &self.supervisor,
        };
        run_pass(&ctx).await
    }
}

#[tokio::test]
async fn missing_relations_block_with_an_aggregate_reason() {
    let snapshot = StateSnapshot {
        database: Some(database_descriptor(Flag::Pending)),
        ..StateSnapshot::default()
    };
    let harness = Harness::new(snapshot);

    let outcome = harness.run().await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Completed(Status::Blocked(
            "missing relation(s): kafka, opensearch".to_string()
        ))
    );
    // Blocked before any supervisor interaction.
    assert_eq!(harness.supervisor.submitted_count(), 0);
}

#[tokio::test]
async fn missing_encryption_config_blocks() {
    let mut harness = Harness::new(converged_snapshot());
    harness.config.operator.encryption_keys_secret_id = None;

    let outcome = harness.run().await.unwrap();
    match outcome {
        PassOutcome::Completed(Status::Blocked(reason)) => {
            assert!(reason.contains("encryption_keys_secret_id"));
        }
        other => panic!("expected blocked outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_encryption_secret_blocks() {
    let harness = Harness::new(converged_snapshot());
    harness
        .secrets
        .insert("encryption-keys", &[("gms-key", "x"), ("frontend-key", "")]);

    let outcome = harness.run().await.unwrap();
    match outcome {
        PassOutcome::Completed(Status::Blocked(reason)) => {
            assert!(reason.contains("frontend-key"), "reason: {reason}");
        }
        other => panic!("expected blocked outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_supervisor_defers_without_touching_state() {
    let snapshot = snapshot_with_descriptors(Flag::Pending);
    let harness = Harness::new(snapshot.clone());
    harness.supervisor.set_unreachable("datahub-kafka-setup");

    let outcome = harness.run().await.unwrap();
    match outcome {
        PassOutcome::Deferred { reason } => {
            assert!(reason.contains("datahub-kafka-setup"), "reason: {reason}");
        }
        other => panic!("expected deferred outcome, got {other:?}"),
    }

    // The preflight deferral happens before the initialization sweep, so
    // registry and flags are exactly as they were.
    assert_eq!(harness.store.current(), snapshot);
    assert!(harness.supervisor.exec_calls().is_empty());
    assert_eq!(harness.supervisor.submitted_count(), 0);
}

#[tokio::test]
async fn full_pass_converges_from_pending_descriptors() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));

    let outcome = harness.run().await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Completed(Status::Maintenance("replanning".to_string()))
    );

    // Initialization ran in priority order and confirmed every gate.
    let state = harness.store.current();
    assert!(state.all_dependencies_initialized());
    assert_eq!(state.flags.ran_upgrade, Flag::Done);
    assert_eq!(state.flags.gms_truststore_initialized, Flag::Done);
    assert_eq!(state.flags.frontend_truststore_initialized, Flag::Done);

    // Every workload received a plan; the long-running ones are enabled
    // with a full environment.
    assert_eq!(harness.supervisor.submitted_count(), WORKLOAD_ORDER.len());
    for name in ["datahub-gms", "datahub-frontend", "datahub-actions"] {
        let plan = harness.supervisor.actual(name).unwrap();
        assert!(plan.enabled, "{name} should be enabled");
        assert!(plan.environment.is_some(), "{name} should carry environment");
    }
    let gms = harness.supervisor.actual("datahub-gms").unwrap();
    assert_eq!(gms.healthcheck.as_ref().unwrap().endpoint, "/health");
    assert_eq!(gms.healthcheck.as_ref().unwrap().port, 8080);
}

#[tokio::test]
async fn initialization_failure_aborts_the_pass_before_application() {
    let harness = Harness::new(snapshot_with_descriptors(Flag::Pending));
    harness.supervisor.fail_exec_for("datahub-opensearch-setup");

    let result = harness.run().await;
    assert!(result.is_err());

    // Earlier initializations in the priority order were confirmed and
    // stay durable; nothing was applied to the supervisor.
    let state = harness.store.current();
    assert_eq!(state.database.as_ref().unwrap().initialized, Flag::Done);
    assert_eq!(state.kafka.as_ref().unwrap().initialized, Flag::Done);
    assert_eq!(state.opensearch.as_ref().unwrap().initialized, Flag::Pending);
    assert_eq!(harness.supervisor.submitted_count(), 0);

    // The next pass retries only the open gate and completes.
    harness.supervisor.clear_exec_failures();
    let outcome = harness.run().await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Completed(Status::Maintenance("replanning".to_string()))
    );
    assert_eq!(
        harness
            .supervisor
            .exec_calls_for("datahub-postgresql-setup")
            .len(),
        1,
        "confirmed bootstraps must not re-run"
    );
}

#[tokio::test]
async fn converged_state_submits_enabled_plans_without_rerunning_setup() {
    let harness = Harness::new(converged_snapshot());

    let outcome = harness.run().await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Completed(Status::Maintenance("replanning".to_string()))
    );
    assert!(harness.supervisor.exec_calls().is_empty());
    assert_eq!(harness.supervisor.submitted_count(), WORKLOAD_ORDER.len());
}

#[test]
fn unready_workloads_plan_disabled_with_no_environment() {
    let config = steward_config();
    let secrets = MemorySecretStore::with_encryption_keys();
    let snapshot = StateSnapshot {
        database: Some(database_descriptor(Flag::Pending)),
        ..StateSnapshot::default()
    };

    let eval = steward::workload::EvalContext {
        snapshot: &snapshot,
        operator: &config.operator,
        proxy: &config.proxy,
        secrets: &secrets,
    };
    let desired = steward::reconcile::build_desired_plan(&eval).unwrap();

    assert_eq!(desired.enabled_count(), 1, "only the db setup job is ready");
    for (kind, plan) in desired.iter() {
        if kind.name() == "datahub-postgresql-setup" {
            continue;
        }
        assert!(!plan.enabled, "{} must be disabled", kind.name());
        assert!(
            plan.environment.is_none(),
            "{} must not leak environment while disabled",
            kind.name()
        );
    }
}
