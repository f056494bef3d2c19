//! Per-flow executor driving each path through the outreach state machine
//!
//! One executor per active flow. `load` pulls the flow's paths from the
//! persistence collaborator, `start` enqueues one task per non-terminal path
//! into the flow's scheduler, and `approve` unblocks a path waiting at one of
//! the two human-approval gates.
//!
//! Each task execution drives exactly one automatic transition (persist the
//! working status, run the stage operation, persist the completed status);
//! multi-step progression is driven by the scheduler's normal dequeue loop,
//! never by recursion inside a callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Local;
use outreach_flow_sdk::{
    automatic_step, FlowError, FlowId, FlowResult, FlowStore, GateKind, Path, PathId, PathStatus,
    Stage, StageOperations,
};
use tracing::{debug, error, info};

use crate::scheduler::{SchedulerConfig, Task, TaskAction, TaskScheduler};

/// Priority for paths that have not started yet.
const PRIORITY_INITIAL: i64 = 1;
/// Priority for paths resuming after a gate approval.
const PRIORITY_RESUMED: i64 = 2;
/// Default priority for everything else.
const PRIORITY_BASE: i64 = 5;

/// Priority policy: fresh and freshly-approved work is serviced ahead of
/// steady-state continuations, subject to aging.
pub(crate) fn compute_priority(status: PathStatus) -> i64 {
    match status {
        PathStatus::Pending => PRIORITY_INITIAL,
        PathStatus::ReportApproved | PathStatus::OutreachApproved => PRIORITY_RESUMED,
        _ => PRIORITY_BASE,
    }
}

enum StageOutcome {
    Report(String),
    Draft(String),
    Receipt(String),
}

/// Drives all paths of one flow. The per-path mutex plus the rule that tasks
/// are enqueued only at transition points guarantees at most one task per
/// path is pending or in flight at any time.
pub struct FlowExecutor {
    store: Arc<dyn FlowStore>,
    stages: Arc<dyn StageOperations>,
    scheduler: TaskScheduler,
    flow_id: Mutex<Option<FlowId>>,
    paths: Mutex<HashMap<PathId, Arc<tokio::sync::Mutex<Path>>>>,
    loaded: AtomicBool,
    paused: AtomicBool,
    /// Handle to ourselves so task actions can re-enter the executor.
    self_ref: Weak<FlowExecutor>,
}

impl FlowExecutor {
    pub fn new(
        store: Arc<dyn FlowStore>,
        stages: Arc<dyn StageOperations>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            stages,
            scheduler: TaskScheduler::new(config),
            flow_id: Mutex::new(None),
            paths: Mutex::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            self_ref: weak.clone(),
        })
    }

    pub fn flow_id(&self) -> Option<FlowId> {
        *self.flow_id.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Fetch the flow and all its paths from the store.
    pub async fn load(&self, flow_id: FlowId) -> FlowResult<()> {
        let flow = self
            .store
            .find_flow(flow_id)
            .await?
            .ok_or(FlowError::FlowNotFound(flow_id))?;

        let paths = self.store.find_paths_by_flow(flow_id).await?;
        let count = paths.len();

        let map: HashMap<_, _> = paths
            .into_iter()
            .map(|path| (path.id, Arc::new(tokio::sync::Mutex::new(path))))
            .collect();

        *self.flow_id.lock().unwrap() = Some(flow_id);
        *self.paths.lock().unwrap() = map;
        self.loaded.store(true, Ordering::SeqCst);

        info!(flow = flow_id, name = %flow.name, paths = count, "flow loaded");
        Ok(())
    }

    /// Enqueue one task per non-terminal path and start the scheduler.
    /// Resumes the scheduler instead if the executor was paused.
    pub async fn start(&self) -> FlowResult<()> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(FlowError::NotLoaded);
        }

        if self.paused.swap(false, Ordering::SeqCst) {
            self.scheduler.start();
            info!(flow = ?self.flow_id(), "flow execution resumed");
            return Ok(());
        }

        if self.scheduler.is_running() {
            debug!(flow = ?self.flow_id(), "scheduler already running");
            return Ok(());
        }

        let entries: Vec<_> = self
            .paths
            .lock()
            .unwrap()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();
        for (path_id, slot) in entries {
            let status = slot.lock().await.status;
            if status.is_terminal() {
                continue;
            }
            self.enqueue_path(path_id, compute_priority(status));
        }

        self.scheduler.start();
        info!(flow = ?self.flow_id(), "flow execution started");
        Ok(())
    }

    /// Stop pulling new tasks; in-flight path processing completes first.
    pub async fn pause(&self) {
        if !self.scheduler.is_running() {
            debug!(flow = ?self.flow_id(), "no active scheduler to pause");
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.scheduler.pause().await;
        info!(flow = ?self.flow_id(), "flow execution paused");
    }

    /// Approve the report or outreach gate for one path.
    ///
    /// Validates that the path is actually waiting at the named gate, flips
    /// and persists the status, then enqueues a continuation task. Resolves
    /// once the transition is persisted; the continuation is only enqueued.
    pub async fn approve(&self, path_id: PathId, gate: GateKind) -> FlowResult<()> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(FlowError::NotLoaded);
        }

        let slot = self
            .paths
            .lock()
            .unwrap()
            .get(&path_id)
            .cloned()
            .ok_or(FlowError::PathNotFound(path_id))?;

        let priority = {
            let mut path = slot.lock().await;
            if path.status != gate.expected_status() {
                return Err(FlowError::InvalidState {
                    path: path_id,
                    gate,
                    status: path.status,
                });
            }

            let previous = path.status;
            path.status = gate.approved_status();
            match gate {
                GateKind::Report => path.report_approved = true,
                GateKind::Outreach => path.outreach_approved = true,
            }
            if let Err(err) = self.store.save_path(&path).await {
                path.status = previous;
                match gate {
                    GateKind::Report => path.report_approved = false,
                    GateKind::Outreach => path.outreach_approved = false,
                }
                return Err(FlowError::Persistence(err));
            }

            info!(path = path_id, %gate, status = %path.status, "path approved");
            compute_priority(path.status)
        };

        self.enqueue_path(path_id, priority);
        if !self.paused.load(Ordering::SeqCst) && !self.scheduler.is_running() {
            self.scheduler.start();
        }
        Ok(())
    }

    /// Wrap one path into a task whose action runs [`FlowExecutor::process_path`].
    fn enqueue_path(&self, path_id: PathId, priority: i64) {
        let Some(executor) = self.self_ref.upgrade() else {
            return;
        };
        let action: TaskAction = Box::pin(async move {
            executor
                .process_path(path_id)
                .await
                .map_err(anyhow::Error::from)
        });
        self.scheduler.enqueue(Task::new(path_id, priority, action));
    }

    /// Execute exactly one automatic transition for the path's current status.
    ///
    /// Gated, in-progress and terminal statuses are a no-op: the task ends
    /// without re-enqueue. A stage failure moves the path to `Failed` and is
    /// reported to the worker boundary; it never escapes the scheduler.
    async fn process_path(&self, path_id: PathId) -> FlowResult<()> {
        let slot = self
            .paths
            .lock()
            .unwrap()
            .get(&path_id)
            .cloned()
            .ok_or(FlowError::PathNotFound(path_id))?;
        let mut path = slot.lock().await;

        let Some(step) = automatic_step(path.status) else {
            debug!(path = path_id, status = %path.status, "no automatic step, task ends");
            return Ok(());
        };

        self.persist_status(&mut path, step.working).await?;

        let outcome = match step.stage {
            Stage::Explore => self.stages.explore(&path).await.map(StageOutcome::Report),
            Stage::DraftOutreach => self
                .stages
                .draft_outreach(&path)
                .await
                .map(StageOutcome::Draft),
            Stage::Send => self.stages.send(&path).await.map(StageOutcome::Receipt),
        };

        match outcome {
            Ok(StageOutcome::Report(report)) => path.report = Some(report),
            Ok(StageOutcome::Draft(draft)) => path.outreach_draft = Some(draft),
            Ok(StageOutcome::Receipt(receipt)) => {
                path.last_contacted_at = Some(Local::now());
                debug!(path = path_id, %receipt, "outreach sent");
            }
            Err(err) => {
                error!(path = path_id, stage = ?step.stage, error = %err, "stage operation failed");
                self.persist_status(&mut path, PathStatus::Failed).await?;
                return Err(FlowError::Stage {
                    stage: step.stage,
                    message: err.to_string(),
                });
            }
        }

        self.persist_status(&mut path, step.completed).await?;

        let next_priority = compute_priority(path.status);
        let continues = automatic_step(path.status).is_some();
        drop(path);
        if continues {
            self.enqueue_path(path_id, next_priority);
        }
        Ok(())
    }

    /// Persist a status change before the step is considered complete. On a
    /// save failure the in-memory record is put back to its last persisted
    /// status so a manual retry or restart can resume from it.
    async fn persist_status(&self, path: &mut Path, next: PathStatus) -> FlowResult<()> {
        let previous = path.status;
        path.status = next;
        if let Err(err) = self.store.save_path(path).await {
            path.status = previous;
            return Err(FlowError::Persistence(err));
        }
        debug!(path = path.id, status = %path.status, "path status persisted");
        Ok(())
    }
}
