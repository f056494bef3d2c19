//! In-process flow service
//!
//! The surface an HTTP layer (or CLI) would consume: create flows, start and
//! pause their executors, route approval calls to the right live executor,
//! and resume every `InProgress` flow on process startup.

use std::sync::Arc;

use outreach_flow_sdk::{
    Flow, FlowError, FlowId, FlowResult, FlowStatus, FlowStore, GateKind, PathId, StageOperations,
};
use serde_json::Value;
use tracing::{error, info};

use crate::executor::FlowExecutor;
use crate::registry::ExecutorRegistry;
use crate::scheduler::SchedulerConfig;

/// Entry point tying the store, the stage collaborators and the executor
/// registry together.
pub struct FlowService {
    store: Arc<dyn FlowStore>,
    stages: Arc<dyn StageOperations>,
    registry: ExecutorRegistry,
    scheduler_config: SchedulerConfig,
}

impl FlowService {
    pub fn new(
        store: Arc<dyn FlowStore>,
        stages: Arc<dyn StageOperations>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            stages,
            registry: ExecutorRegistry::new(),
            scheduler_config,
        }
    }

    /// The registry is shared by reference with the transport layer.
    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Persist a new flow. Paths are populated separately by the import
    /// collaborator before `start_flow` is called.
    pub async fn create_flow(
        &self,
        name: &str,
        filters: Value,
        outreach_template: &str,
    ) -> FlowResult<Flow> {
        let flow = self
            .store
            .create_flow(name, filters, outreach_template)
            .await?;
        info!(flow = flow.id, name = %flow.name, "flow created");
        Ok(flow)
    }

    /// Load and start an executor for the flow, registering it for approval
    /// routing. Reuses (and resumes) the registered executor if one exists.
    pub async fn start_flow(&self, flow_id: FlowId) -> FlowResult<()> {
        if let Some(executor) = self.registry.lookup(flow_id) {
            executor.start().await?;
        } else {
            let executor = FlowExecutor::new(
                Arc::clone(&self.store),
                Arc::clone(&self.stages),
                self.scheduler_config.clone(),
            );
            executor.load(flow_id).await?;
            executor.start().await?;
            self.registry.register(flow_id, executor);
        }
        self.set_flow_status(flow_id, FlowStatus::InProgress).await
    }

    /// Pause the flow's executor; in-flight path processing completes first.
    pub async fn pause_flow(&self, flow_id: FlowId) -> FlowResult<()> {
        let executor = self
            .registry
            .lookup(flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        executor.pause().await;
        self.set_flow_status(flow_id, FlowStatus::Paused).await
    }

    /// Route an approval to the executor owning the path's flow. Resolves
    /// once the transition is persisted; the continuation is only enqueued.
    pub async fn approve_path(&self, path_id: PathId, gate: GateKind) -> FlowResult<()> {
        let path = self
            .store
            .find_path_by_id(path_id)
            .await?
            .ok_or(FlowError::PathNotFound(path_id))?;
        let executor = self
            .registry
            .lookup(path.flow_id)
            .ok_or(FlowError::FlowNotFound(path.flow_id))?;
        executor.approve(path_id, gate).await
    }

    /// Startup hook: restart an executor for every flow persisted as
    /// `InProgress`. Paths are re-enqueued per the executor's start rule; no
    /// other recovery is attempted. Individual failures are logged and
    /// skipped so one broken flow cannot block the rest.
    pub async fn resume_in_progress_flows(&self) -> FlowResult<usize> {
        let flows = self
            .store
            .list_flows_by_status(FlowStatus::InProgress)
            .await?;
        let mut resumed = 0;
        for flow in flows {
            match self.start_flow(flow.id).await {
                Ok(()) => resumed += 1,
                Err(err) => {
                    error!(flow = flow.id, error = %err, "failed to resume flow");
                }
            }
        }
        info!(resumed, "resumed in-progress flows");
        Ok(resumed)
    }

    /// Explicit retirement: drain the executor, drop it from the registry and
    /// mark the flow `Done`.
    pub async fn retire_flow(&self, flow_id: FlowId) -> FlowResult<()> {
        if let Some(executor) = self.registry.unregister(flow_id) {
            executor.pause().await;
        }
        self.set_flow_status(flow_id, FlowStatus::Done).await
    }

    async fn set_flow_status(&self, flow_id: FlowId, status: FlowStatus) -> FlowResult<()> {
        let mut flow = self
            .store
            .find_flow(flow_id)
            .await?
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        if flow.status != status {
            flow.status = status;
            self.store.save_flow(&flow).await?;
        }
        Ok(())
    }
}
