use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// Global runtime counters for the reconciler and audit loops.
#[derive(Default)]
pub struct MetricsCollector {
    passes_completed: AtomicU64,
    passes_deferred: AtomicU64,
    passes_failed: AtomicU64,
    audits: Mutex<BTreeMap<String, u64>>,
    initialization_attempts: Mutex<BTreeMap<String, u64>>,
    initialization_failures: Mutex<BTreeMap<String, u64>>,
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::default)
}

impl MetricsCollector {
    pub fn record_pass_completed(&self) {
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_deferred(&self) {
        self.passes_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_failed(&self) {
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit(&self, classification: &str) {
        if let Ok(mut guard) = self.audits.lock() {
            *guard.entry(classification.to_string()).or_default() += 1;
        }
    }

    pub fn record_initialization_attempt(&self, workload: &str) {
        if let Ok(mut guard) = self.initialization_attempts.lock() {
            *guard.entry(workload.to_string()).or_default() += 1;
        }
    }

    pub fn record_initialization_failure(&self, workload: &str) {
        if let Ok(mut guard) = self.initialization_failures.lock() {
            *guard.entry(workload.to_string()).or_default() += 1;
        }
    }

    /// Renders the Prometheus text exposition consumed by `/metrics`.
    pub fn render(&self, output: &mut String) {
        output.push_str(
            "# HELP steward_reconcile_passes_total Reconciliation passes by outcome\n",
        );
        output.push_str("# TYPE steward_reconcile_passes_total counter\n");
        output.push_str(&format!(
            "steward_reconcile_passes_total{{outcome=\"completed\"}} {}\n",
            self.passes_completed.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "steward_reconcile_passes_total{{outcome=\"deferred\"}} {}\n",
            self.passes_deferred.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "steward_reconcile_passes_total{{outcome=\"failed\"}} {}\n",
            self.passes_failed.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP steward_audits_total Drift audits by aggregate classification\n");
        output.push_str("# TYPE steward_audits_total counter\n");
        if let Ok(guard) = self.audits.lock() {
            for (classification, count) in guard.iter() {
                output.push_str(&format!(
                    "steward_audits_total{{class=\"{classification}\"}} {count}\n"
                ));
            }
        }

        output.push_str(
            "# HELP steward_initialization_attempts_total Initialization attempts by workload\n",
        );
        output.push_str("# TYPE steward_initialization_attempts_total counter\n");
        if let Ok(guard) = self.initialization_attempts.lock() {
            for (workload, count) in guard.iter() {
                output.push_str(&format!(
                    "steward_initialization_attempts_total{{workload=\"{workload}\"}} {count}\n"
                ));
            }
        }

        output.push_str(
            "# HELP steward_initialization_failures_total Initialization failures by workload\n",
        );
        output.push_str("# TYPE steward_initialization_failures_total counter\n");
        if let Ok(guard) = self.initialization_failures.lock() {
            for (workload, count) in guard.iter() {
                output.push_str(&format!(
                    "steward_initialization_failures_total{{workload=\"{workload}\"}} {count}\n"
                ));
            }
        }
    }
}
