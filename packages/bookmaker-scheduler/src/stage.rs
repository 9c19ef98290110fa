use crate::error::Result;
use crate::job::JobArgs;
use crate::logging::EntityLogger;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Context handed to a stage factory when an instance is first needed.
#[derive(Clone)]
pub struct StageContext {
    pub entity: String,
    pub logger: Arc<dyn EntityLogger>,
}

/// One completed unit of work (e.g. a page) and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub unit: u64,
    pub exec_time: Duration,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Operation name -> completed units, in registration order.
    operations: Vec<(String, Vec<Completion>)>,
    finished: bool,
}

impl Ledger {
    fn operation_mut(&mut self, name: &str) -> &mut Vec<Completion> {
        let idx = match self.operations.iter().position(|(op, _)| op == name) {
            Some(idx) => idx,
            None => {
                self.operations.push((name.to_string(), Vec::new()));
                self.operations.len() - 1
            }
        };
        &mut self.operations[idx].1
    }
}

/// Per-operation summary used by progress reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub name: String,
    pub completed: usize,
    pub average_exec_time: Option<Duration>,
}

/// Point-in-time copy of a stage instance's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookkeepingSnapshot {
    pub finished: bool,
    pub aborted: bool,
    pub thread_count: usize,
    pub operations: Vec<OperationSummary>,
}

/// Bookkeeping owned by every stage instance.
///
/// The completed-unit ledger is append-only: units are never removed, so
/// progress derived from it can only move forward. `thread_count` is
/// maintained by the scheduler around every dispatch of one of the stage's
/// methods.
#[derive(Debug, Default)]
pub struct Bookkeeping {
    ledger: Mutex<Ledger>,
    thread_count: AtomicUsize,
    aborted: AtomicBool,
}

impl Bookkeeping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the tracked operations. Idempotent; names already present
    /// keep their completed units.
    pub fn init(&self, operations: &[&str]) {
        let mut ledger = self.ledger.lock();
        for op in operations {
            ledger.operation_mut(op);
        }
    }

    /// Records a completed unit. Returns false (and records nothing) once
    /// the instance has been aborted.
    pub fn complete_unit(&self, operation: &str, unit: u64, exec_time: Duration) -> bool {
        if self.is_aborted() {
            return false;
        }
        self.ledger
            .lock()
            .operation_mut(operation)
            .push(Completion { unit, exec_time });
        true
    }

    pub fn mark_finished(&self) {
        self.ledger.lock().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.ledger.lock().finished
    }

    pub fn completed_units(&self, operation: &str) -> usize {
        self.ledger
            .lock()
            .operations
            .iter()
            .find(|(op, _)| op == operation)
            .map_or(0, |(_, units)| units.len())
    }

    pub fn average_exec_time(&self, operation: &str) -> Option<Duration> {
        let ledger = self.ledger.lock();
        let (_, units) = ledger.operations.iter().find(|(op, _)| op == operation)?;
        average(units)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    pub(crate) fn enter(&self) {
        self.thread_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn exit(&self) {
        let _ = self
            .thread_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BookkeepingSnapshot {
        let ledger = self.ledger.lock();
        BookkeepingSnapshot {
            finished: ledger.finished,
            aborted: self.is_aborted(),
            thread_count: self.thread_count(),
            operations: ledger
                .operations
                .iter()
                .map(|(name, units)| OperationSummary {
                    name: name.clone(),
                    completed: units.len(),
                    average_exec_time: average(units),
                })
                .collect(),
        }
    }
}

fn average(units: &[Completion]) -> Option<Duration> {
    if units.is_empty() {
        return None;
    }
    let total: Duration = units.iter().map(|c| c.exec_time).sum();
    Some(total / units.len() as u32)
}

/// Stage class contract (pluggable stages).
///
/// One instance exists per (entity, stage class) pair. Every job naming the
/// pair is dispatched to [`Stage::invoke`] on that shared instance, so
/// implementations must not assume per-call isolation of their state.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage class name, as used in job identifiers.
    fn name(&self) -> &str;

    /// Methods jobs may name. Checked when a job is queued.
    fn methods(&self) -> &[&'static str];

    fn bookkeeping(&self) -> &Bookkeeping;

    /// Establishes the completed-unit ledger. Must be idempotent.
    fn init_bookkeeping(&self) {
        self.bookkeeping().init(self.methods());
    }

    /// Cooperative abort: stop accepting new units.
    fn abort(&self) {
        self.bookkeeping().abort();
    }

    /// Run one method with the job's arguments.
    async fn invoke(&self, method: &str, args: &JobArgs) -> Result<()>;
}
