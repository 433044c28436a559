use crate::error::Result;
use crate::metrics::metrics;
use crate::reconcile::pass::PassContext;
use crate::reconcile::plan::build_desired_plan;
use crate::supervisor::{HealthStatus, SupervisorError};
use crate::workload::{EvalContext, WorkloadKind, WORKLOAD_ORDER};
use crate::workload_event;

/// Per-workload drift classification. `priority` orders aggregation:
/// `Invalid > NotReady > Down > Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditClass {
    Active,
    Down,
    NotReady,
    Invalid,
}

impl AuditClass {
    fn priority(self) -> u8 {
        match self {
            AuditClass::Active => 0,
            AuditClass::Down => 1,
            AuditClass::NotReady => 2,
            AuditClass::Invalid => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditClass::Active => "ACTIVE",
            AuditClass::Down => "DOWN",
            AuditClass::NotReady => "NOT_READY",
            AuditClass::Invalid => "INVALID",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditFinding {
    pub workload: WorkloadKind,
    pub class: AuditClass,
    pub detail: String,
}

#[derive(Clone, Debug)]
pub struct AuditReport {
    pub classification: AuditClass,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    fn push(&mut self, workload: WorkloadKind, class: AuditClass, detail: impl Into<String>) {
        if class.priority() > self.classification.priority() {
            self.classification = class;
        }
        self.findings.push(AuditFinding {
            workload,
            class,
            detail: detail.into(),
        });
    }
}

/// Periodic drift and health audit over every workload with a health
/// check, in priority order. Any structural mismatch between the actual
/// supervised plan and a freshly recomputed desired plan short-circuits as
/// `Invalid`; the caller reacts by re-running the full reconciliation pass.
pub async fn run_audit(ctx: &PassContext<'_>) -> Result<AuditReport> {
    let snapshot = ctx.store.load()?;
    let eval = EvalContext {
        snapshot: &snapshot,
        operator: &ctx.config.operator,
        proxy: &ctx.config.proxy,
        secrets: ctx.secrets,
    };

    let mut report = AuditReport {
        classification: AuditClass::Active,
        findings: Vec::new(),
    };

    let desired = match build_desired_plan(&eval) {
        Ok(desired) => desired,
        Err(err) => {
            // The inputs no longer compile into a plan at all; the full
            // pass owns reporting the blockage.
            report.push(WorkloadKind::Gms, AuditClass::Invalid, err.to_string());
            metrics().record_audit(report.classification.as_str());
            return Ok(report);
        }
    };

    for kind in WORKLOAD_ORDER {
        let spec = kind.spec();
        if spec.healthcheck.is_none() {
            continue;
        }
        let name = spec.name;

        if !ctx.supervisor.can_connect(name).await {
            report.push(kind, AuditClass::NotReady, "supervisor unreachable");
            continue;
        }

        let actual = match ctx.supervisor.actual_plan(name).await {
            Ok(actual) => actual,
            Err(SupervisorError::Unreachable { .. }) => {
                report.push(kind, AuditClass::NotReady, "supervisor unreachable");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let expected = desired.get(kind);
        if actual.as_ref() != expected {
            workload_event!(
                warn,
                "plan_drift_detected",
                workload = name,
                has_actual = actual.is_some()
            );
            report.push(kind, AuditClass::Invalid, "supervised plan drifted");
            metrics().record_audit(report.classification.as_str());
            // Self-healing takes over; no point auditing the rest.
            return Ok(report);
        }

        let enabled = expected.map(|plan| plan.enabled).unwrap_or(false);
        if !enabled {
            continue;
        }

        match ctx.supervisor.health(name).await {
            Ok(HealthStatus::Up) => {
                report.push(kind, AuditClass::Active, "healthy");
            }
            Ok(HealthStatus::Down) => {
                workload_event!(warn, "healthcheck_down", workload = name);
                report.push(kind, AuditClass::Down, "health check DOWN");
            }
            Err(SupervisorError::Unreachable { .. }) => {
                report.push(kind, AuditClass::NotReady, "supervisor unreachable");
            }
            Err(err) => return Err(err.into()),
        }
    }

    metrics().record_audit(report.classification.as_str());
    Ok(report)
}
