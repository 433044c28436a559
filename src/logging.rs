//! Helper macro enforcing consistent steward log fields.
//!
//! Keeps the `workload` field present on every log emitted from the
//! reconciliation and initialization layers so downstream parsing can rely
//! on it.

/// Log an event for a workload plus any extra fields.
#[macro_export]
macro_rules! workload_event {
    ($level:ident, $event:expr, workload = $workload:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            workload = $workload,
            $($field = %$value,)*
        )
    };
    ($level:ident, $event:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            $($field = %$value,)*
        )
    };
}
