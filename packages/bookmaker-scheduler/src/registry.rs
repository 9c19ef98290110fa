use crate::error::{Result, SchedulerError};
use crate::job::validate_component;
use crate::logging::{EntityLogger, LoggerProvider};
use crate::stage::{Stage, StageContext};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub type StageFactory = Arc<dyn Fn(&StageContext) -> Result<Arc<dyn Stage>> + Send + Sync>;

/// Closed set of stage classes, keyed by name.
///
/// Names are validated when registered, so a job naming an unknown class
/// fails with [`SchedulerError::UnknownStage`] at the point it is queued.
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&StageContext) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        validate_component(name)?;
        if self.factories.contains_key(name) {
            return Err(SchedulerError::DuplicateStage(name.to_string()));
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Builder form of [`StageRegistry::register`].
    pub fn with<F>(mut self, name: &str, factory: F) -> Result<Self>
    where
        F: Fn(&StageContext) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        self.register(name, factory)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn build(&self, name: &str, ctx: &StageContext) -> Result<Arc<dyn Stage>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownStage(name.to_string()))?;
        factory(ctx)
    }
}

struct EntityOperations {
    started_at: Instant,
    stages: HashMap<String, Arc<dyn Stage>>,
}

/// Owns one long-lived stage instance per (entity, stage class).
pub struct OperationRegistry {
    stages: StageRegistry,
    loggers: Arc<dyn LoggerProvider>,
    entities: DashMap<String, EntityOperations>,
}

impl OperationRegistry {
    pub fn new(stages: StageRegistry, loggers: Arc<dyn LoggerProvider>) -> Self {
        Self {
            stages,
            loggers,
            entities: DashMap::new(),
        }
    }

    /// Returns the instance for (entity, stage), constructing it on first
    /// reference. Bookkeeping is (re)initialised on every resolve.
    pub fn resolve(&self, entity: &str, stage: &str) -> Result<Arc<dyn Stage>> {
        validate_component(entity)?;
        if !self.stages.contains(stage) {
            return Err(SchedulerError::UnknownStage(stage.to_string()));
        }

        let instance = {
            let mut ops = self
                .entities
                .entry(entity.to_string())
                .or_insert_with(|| EntityOperations {
                    started_at: Instant::now(),
                    stages: HashMap::new(),
                });
            match ops.stages.get(stage) {
                Some(existing) => existing.clone(),
                None => {
                    let ctx = StageContext {
                        entity: entity.to_string(),
                        logger: self.loggers.logger(entity),
                    };
                    let created = self.stages.build(stage, &ctx)?;
                    ops.stages.insert(stage.to_string(), created.clone());
                    created
                }
            }
        };

        instance.init_bookkeeping();
        Ok(instance)
    }

    pub fn get(&self, entity: &str, stage: &str) -> Option<Arc<dyn Stage>> {
        self.entities
            .get(entity)
            .and_then(|ops| ops.stages.get(stage).cloned())
    }

    pub fn instances(&self, entity: &str) -> Vec<Arc<dyn Stage>> {
        self.entities
            .get(entity)
            .map(|ops| ops.stages.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_entity(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn entities(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.key().clone()).collect()
    }

    /// When the entity was first referenced.
    pub fn started_at(&self, entity: &str) -> Option<Instant> {
        self.entities.get(entity).map(|ops| ops.started_at)
    }

    pub fn remove(&self, entity: &str) -> bool {
        self.entities.remove(entity).is_some()
    }

    pub fn logger(&self, entity: &str) -> Arc<dyn EntityLogger> {
        self.loggers.logger(entity)
    }
}
