#![allow(clippy::result_large_err)]

pub mod app;
pub mod app_state;
pub mod config;
pub mod error;
pub mod logging;
pub mod management;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod secrets;
pub mod supervisor;
pub mod telemetry;
pub mod workload;
