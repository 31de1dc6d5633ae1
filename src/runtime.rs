//! Runtime facade wiring the collaborators together.
//!
//! One `Runtime` owns the scheduler, the chunk pool, the notification
//! registry, and the object topology, all built from a single `CoreConfig`.

use crate::memory::FixedChunkPool;
use crate::notification::NotificationRegistry;
use crate::object::OBJECT_CHUNK_SIZE;
use crate::scheduler::Scheduler;
use crate::topology::Topology;
use crate::types::CoreConfig;
use std::sync::Arc;
use tracing::info;

/// The assembled object-execution core.
#[derive(Debug)]
pub struct Runtime {
    config: CoreConfig,
    scheduler: Arc<Scheduler>,
    memory: Arc<FixedChunkPool>,
    notifier: Arc<NotificationRegistry>,
    topology: Topology,
}

impl Runtime {
    pub fn new(config: CoreConfig) -> Self {
        let scheduler = Arc::new(Scheduler::new(config.scheduler.tick_interval));
        let memory = Arc::new(FixedChunkPool::new(
            OBJECT_CHUNK_SIZE,
            config.memory.chunk_count,
        ));
        let notifier = Arc::new(NotificationRegistry::new());
        let topology = Topology::new(
            memory.clone(),
            notifier.clone(),
            scheduler.clone(),
            config.destroy.clone(),
        );
        Self {
            config,
            scheduler,
            memory,
            notifier,
            topology,
        }
    }

    /// Start the background dispatch loop.
    pub fn start(&self) {
        info!(
            tick_ms = self.config.scheduler.tick_interval.as_millis() as u64,
            chunks = self.memory.capacity(),
            "runtime starting"
        );
        self.scheduler.start();
    }

    /// Stop the dispatch loop. Objects stay registered; a subsequent `start`
    /// resumes them.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        info!("runtime stopped");
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn memory(&self) -> &Arc<FixedChunkPool> {
        &self.memory
    }

    pub fn notifier(&self) -> &Arc<NotificationRegistry> {
        &self.notifier
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}
