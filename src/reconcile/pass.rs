use crate::config::StewardConfig;
use crate::error::Result;
use crate::metrics::metrics;
use crate::reconcile::plan::build_desired_plan;
use crate::reconcile::Status;
use crate::registry::store::StateStore;
use crate::secrets::SecretStore;
use crate::supervisor::{FileStaging, Supervisor, SupervisorError};
use crate::workload::{EvalContext, InitContext, WORKLOAD_ORDER};
use crate::workload_event;

/// Collaborators threaded through one reconciliation pass.
pub struct PassContext<'a> {
    pub config: &'a StewardConfig,
    pub store: &'a dyn StateStore,
    pub secrets: &'a dyn SecretStore,
    pub supervisor: &'a dyn Supervisor,
    pub staging: &'a dyn FileStaging,
}

/// Terminal result of a pass. A deferred pass retained no partial progress;
/// the caller is responsible for re-invoking it on the next trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(Status),
    Deferred { reason: String },
}

/// Required keys of the encryption secret.
const ENCRYPTION_SECRET_KEYS: [&str; 2] = ["gms-key", "frontend-key"];

/// One complete reconciliation pass: precondition check, supervisor
/// preflight, initialization sweep, plan construction, plan application.
///
/// Initialization failures propagate as errors and abort the pass; the
/// durable-flag gates make the retried pass skip whatever already
/// completed. Transient supervisor unavailability defers the whole pass.
pub async fn run_pass(ctx: &PassContext<'_>) -> Result<PassOutcome> {
    let mut snapshot = ctx.store.load()?;

    // Step 1: configuration and secret preconditions.
    let Some(encryption_secret_id) = ctx.config.operator.encryption_keys_secret_id.as_deref()
    else {
        return Ok(blocked("missing required config: encryption_keys_secret_id"));
    };

    match ctx.secrets.get_secret(encryption_secret_id) {
        Ok(secret) => {
            for key in ENCRYPTION_SECRET_KEYS {
                if let Err(err) = secret.require(key) {
                    return Ok(blocked(err.to_string()));
                }
            }
        }
        Err(err) => return Ok(blocked(err.to_string())),
    }

    let missing = snapshot.missing_relations();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|kind| kind.as_str()).collect();
        return Ok(blocked(format!("missing relation(s): {}", names.join(", "))));
    }

    // Step 2: supervisor preflight. Deferring before the initialization
    // sweep keeps registry and flags untouched for a retried pass.
    for kind in WORKLOAD_ORDER {
        if !ctx.supervisor.can_connect(kind.name()).await {
            return Ok(deferred(kind.name()));
        }
    }

    // Step 3: initialization sweep, in priority order. Errors propagate;
    // the pass is never partially applied after an initialization failure.
    let mut init_ctx = InitContext {
        snapshot: &mut snapshot,
        operator: &ctx.config.operator,
        proxy: &ctx.config.proxy,
        secrets: ctx.secrets,
        supervisor: ctx.supervisor,
        staging: ctx.staging,
        store: ctx.store,
    };
    for kind in WORKLOAD_ORDER {
        metrics().record_initialization_attempt(kind.name());
        match kind.run_initialization(&mut init_ctx).await {
            Ok(_) => {}
            Err(err) => {
                metrics().record_initialization_failure(kind.name());
                workload_event!(
                    warn,
                    "initialization_failed",
                    workload = kind.name(),
                    error = err
                );
                return Err(err.into());
            }
        }
    }

    // Step 4: plan construction. Malformed secrets or configuration fail
    // closed here and block until corrected externally.
    let eval = EvalContext {
        snapshot: &snapshot,
        operator: &ctx.config.operator,
        proxy: &ctx.config.proxy,
        secrets: ctx.secrets,
    };
    let desired = match build_desired_plan(&eval) {
        Ok(desired) => desired,
        Err(err) => return Ok(blocked(err.to_string())),
    };

    // Step 5: plan application. Unreachable mid-pass defers the rest; the
    // desired plan is deterministic, so the retried pass resubmits the
    // same layers.
    for (kind, plan) in desired.iter() {
        if !ctx.supervisor.can_connect(kind.name()).await {
            return Ok(deferred(kind.name()));
        }
        match ctx.supervisor.submit_plan(kind.name(), plan).await {
            Ok(()) => {
                workload_event!(
                    debug,
                    "plan_submitted",
                    workload = kind.name(),
                    enabled = plan.enabled
                );
            }
            Err(SupervisorError::Unreachable { .. }) => {
                return Ok(deferred(kind.name()));
            }
            Err(err) => return Err(err.into()),
        }
    }

    tracing::info!(
        enabled = desired.enabled_count(),
        total = WORKLOAD_ORDER.len(),
        "desired plan submitted; supervisor replanning"
    );
    Ok(PassOutcome::Completed(Status::Maintenance(
        "replanning".to_string(),
    )))
}

fn blocked(reason: impl Into<String>) -> PassOutcome {
    PassOutcome::Completed(Status::Blocked(reason.into()))
}

fn deferred(workload: &str) -> PassOutcome {
    PassOutcome::Deferred {
        reason: format!("supervisor unreachable for {workload}"),
    }
}
