use crate::workload::{
    EnvironmentError, EvalContext, HealthcheckSpec, WorkloadKind, WORKLOAD_ORDER,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanHealthcheck {
    pub endpoint: String,
    pub port: u16,
}

impl From<HealthcheckSpec> for PlanHealthcheck {
    fn from(spec: HealthcheckSpec) -> Self {
        Self {
            endpoint: spec.endpoint.to_string(),
            port: spec.port,
        }
    }
}

/// Target configuration for one workload. A deterministic function of
/// registry + flags + configuration, with structural equality, so comparing
/// desired against actual plans is meaningful.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPlan {
    pub enabled: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<PlanHealthcheck>,
}

/// Desired plans for every workload, in priority order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredPlan {
    entries: Vec<(WorkloadKind, WorkloadPlan)>,
}

impl DesiredPlan {
    pub fn get(&self, kind: WorkloadKind) -> Option<&WorkloadPlan> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == kind)
            .map(|(_, plan)| plan)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkloadKind, &WorkloadPlan)> {
        self.entries.iter().map(|(kind, plan)| (*kind, plan))
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|(_, plan)| plan.enabled).count()
    }
}

/// Computes the desired plan for every workload. A workload with unmet
/// readiness comes out `enabled: false` with no environment; a typed error
/// aborts the whole computation rather than emitting a partial plan.
pub fn build_desired_plan(ctx: &EvalContext<'_>) -> Result<DesiredPlan, EnvironmentError> {
    let mut entries = Vec::with_capacity(WORKLOAD_ORDER.len());

    for kind in WORKLOAD_ORDER {
        let spec = kind.spec();
        let enabled = kind.is_enabled(ctx);
        let environment = kind.compile_environment(ctx)?;

        entries.push((
            kind,
            WorkloadPlan {
                enabled,
                command: spec.command.to_string(),
                environment,
                healthcheck: spec.healthcheck.map(PlanHealthcheck::from),
            },
        ));
    }

    Ok(DesiredPlan { entries })
}
