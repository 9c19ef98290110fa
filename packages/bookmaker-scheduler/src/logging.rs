//! Per-entity log sinks.
//!
//! The scheduler writes a handful of lines per job ("started", "finished in N
//! minutes", "encountered an error") through one logger per entity. The
//! environment decides where those lines go by supplying a [`LoggerProvider`];
//! the default routes them into `tracing` with an `entity` field.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub trait EntityLogger: Send + Sync {
    fn entity(&self) -> &str;
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

pub trait LoggerProvider: Send + Sync {
    /// Returns the sink for `entity`. Repeated calls may return the same sink.
    fn logger(&self, entity: &str) -> Arc<dyn EntityLogger>;
}

struct TracingEntityLogger {
    entity: String,
}

impl EntityLogger for TracingEntityLogger {
    fn entity(&self) -> &str {
        &self.entity
    }

    fn info(&self, message: &str) {
        tracing::info!(entity = %self.entity, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(entity = %self.entity, "{}", message);
    }
}

/// Default provider: one cached `tracing`-backed sink per entity.
#[derive(Default)]
pub struct TracingLoggers {
    sinks: DashMap<String, Arc<TracingEntityLogger>>,
}

impl TracingLoggers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoggerProvider for TracingLoggers {
    fn logger(&self, entity: &str) -> Arc<dyn EntityLogger> {
        let sink = self
            .sinks
            .entry(entity.to_string())
            .or_insert_with(|| {
                Arc::new(TracingEntityLogger {
                    entity: entity.to_string(),
                })
            })
            .clone();
        sink
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Minutes with two decimals, the unit every timing line uses.
pub(crate) fn minutes(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64() / 60.0)
}
