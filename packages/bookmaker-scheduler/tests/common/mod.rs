//! Shared fixtures: an instrumented stage class and a recording log sink.
#![allow(dead_code)]

use async_trait::async_trait;
use bookmaker_scheduler::{
    Bookkeeping, EntityLogger, JobArgs, LoggerProvider, Result, Scheduler, SchedulerConfig,
    SchedulerError, Stage, StageRegistry,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const STEP: Duration = Duration::from_millis(15);

/// Tracks how many stage methods run at once, per (entity, stage) and overall.
#[derive(Default)]
pub struct CallTracker {
    inner: Mutex<CallTrackerState>,
}

#[derive(Default)]
struct CallTrackerState {
    pair_running: HashMap<(String, String), usize>,
    pair_peak: HashMap<(String, String), usize>,
    running: usize,
    peak: usize,
    calls: HashMap<String, usize>,
}

impl CallTracker {
    fn enter(self: &Arc<Self>, entity: &str, stage: &str, method: &str) -> CallTrackerGuard {
        let pair = (entity.to_string(), stage.to_string());
        let mut state = self.inner.lock();
        let running = {
            let n = state.pair_running.entry(pair.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let peak = state.pair_peak.entry(pair.clone()).or_insert(0);
        *peak = (*peak).max(running);
        state.running += 1;
        state.peak = state.peak.max(state.running);
        *state
            .calls
            .entry(format!("{}.{}.{}", entity, stage, method))
            .or_insert(0) += 1;
        CallTrackerGuard {
            tracker: self.clone(),
            pair,
        }
    }

    pub fn pair_peak(&self, entity: &str, stage: &str) -> usize {
        self.inner
            .lock()
            .pair_peak
            .get(&(entity.to_string(), stage.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }

    pub fn calls(&self, signature: &str) -> usize {
        self.inner.lock().calls.get(signature).copied().unwrap_or(0)
    }
}

struct CallTrackerGuard {
    tracker: Arc<CallTracker>,
    pair: (String, String),
}

impl Drop for CallTrackerGuard {
    fn drop(&mut self) {
        let mut state = self.tracker.inner.lock();
        if let Some(n) = state.pair_running.get_mut(&self.pair) {
            *n -= 1;
        }
        state.running -= 1;
    }
}

/// Stage whose methods sleep, fail, abort, or complete pages on request.
pub struct MockStage {
    entity: String,
    stage: &'static str,
    bookkeeping: Bookkeeping,
    tracker: Arc<CallTracker>,
    flaked: AtomicBool,
}

pub const METHODS: &[&str] = &[
    "a1", "b1", "b2", "run", "slow", "fail", "flaky", "abort_self", "pages", "panic",
];

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        self.stage
    }

    fn methods(&self) -> &[&'static str] {
        METHODS
    }

    fn bookkeeping(&self) -> &Bookkeeping {
        &self.bookkeeping
    }

    fn init_bookkeeping(&self) {
        self.bookkeeping.init(&["pages"]);
    }

    async fn invoke(&self, method: &str, args: &JobArgs) -> Result<()> {
        let _guard = self.tracker.enter(&self.entity, self.stage, method);
        match method {
            "slow" => tokio::time::sleep(STEP * 10).await,
            "fail" => {
                tokio::time::sleep(STEP).await;
                return Err(anyhow::anyhow!("{} could not read its input", self.stage).into());
            }
            "flaky" => {
                tokio::time::sleep(STEP).await;
                if !self.flaked.swap(true, Ordering::SeqCst) {
                    return Err(anyhow::anyhow!("transient failure").into());
                }
            }
            "abort_self" => return Err(SchedulerError::aborted(self.entity.clone())),
            "pages" => {
                let pages = args.get_u64("pages").unwrap_or(3);
                for page in 0..pages {
                    tokio::time::sleep(STEP).await;
                    self.bookkeeping.complete_unit("pages", page, STEP);
                }
                self.bookkeeping.mark_finished();
            }
            "panic" => panic!("stage blew up"),
            _ => tokio::time::sleep(STEP).await,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub entity: String,
    pub level: &'static str,
    pub message: String,
}

struct RecordingLogger {
    entity: String,
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl EntityLogger for RecordingLogger {
    fn entity(&self) -> &str {
        &self.entity
    }

    fn info(&self, message: &str) {
        self.push("info", message);
    }

    fn error(&self, message: &str) {
        self.push("error", message);
    }
}

impl RecordingLogger {
    fn push(&self, level: &'static str, message: &str) {
        self.lines.lock().push(LogLine {
            entity: self.entity.clone(),
            level,
            message: message.to_string(),
        });
    }
}

#[derive(Default, Clone)]
pub struct RecordingLoggers {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl RecordingLoggers {
    pub fn lines(&self, entity: &str) -> Vec<LogLine> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.entity == entity)
            .cloned()
            .collect()
    }

    pub fn messages(&self, entity: &str) -> Vec<String> {
        self.lines(entity).into_iter().map(|l| l.message).collect()
    }
}

impl LoggerProvider for RecordingLoggers {
    fn logger(&self, entity: &str) -> Arc<dyn EntityLogger> {
        Arc::new(RecordingLogger {
            entity: entity.to_string(),
            lines: self.lines.clone(),
        })
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub tracker: Arc<CallTracker>,
    pub logs: RecordingLoggers,
}

pub fn config(max_workers: usize, cores: usize) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_max_workers(max_workers)
        .with_cores(cores)
        .with_poll_interval(Duration::from_millis(5))
}

/// Scheduler with `StageA` and `StageB` registered as [`MockStage`]s.
pub fn harness(config: SchedulerConfig) -> Harness {
    let tracker = Arc::new(CallTracker::default());
    let logs = RecordingLoggers::default();

    let mut stages = StageRegistry::new();
    for name in ["StageA", "StageB"] {
        let tracker = tracker.clone();
        stages
            .register(name, move |ctx| {
                Ok(Arc::new(MockStage {
                    entity: ctx.entity.clone(),
                    stage: name,
                    bookkeeping: Bookkeeping::new(),
                    tracker: tracker.clone(),
                    flaked: AtomicBool::new(false),
                }) as Arc<dyn Stage>)
            })
            .unwrap();
    }

    let scheduler = Scheduler::with_loggers(config, stages, Arc::new(logs.clone())).unwrap();
    Harness {
        scheduler,
        tracker,
        logs,
    }
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
