//! Registry of live flow executors
//!
//! External approval calls arrive with a path id and must reach the executor
//! that owns the path's flow. The registry is an injected service with an
//! explicit lifecycle (register on start, unregister on retirement), shared
//! by reference between the service layer and whatever transport sits above.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use outreach_flow_sdk::FlowId;

use crate::executor::FlowExecutor;

/// Process-wide map from flow id to its live executor.
pub struct ExecutorRegistry {
    executors: Arc<Mutex<HashMap<FlowId, Arc<FlowExecutor>>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register the live executor for a flow, replacing any previous entry.
    pub fn register(&self, flow_id: FlowId, executor: Arc<FlowExecutor>) {
        self.executors.lock().unwrap().insert(flow_id, executor);
    }

    pub fn lookup(&self, flow_id: FlowId) -> Option<Arc<FlowExecutor>> {
        self.executors.lock().unwrap().get(&flow_id).cloned()
    }

    /// Remove a flow's executor, returning it so the caller can drain it.
    pub fn unregister(&self, flow_id: FlowId) -> Option<Arc<FlowExecutor>> {
        self.executors.lock().unwrap().remove(&flow_id)
    }

    pub fn len(&self) -> usize {
        self.executors.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.lock().unwrap().is_empty()
    }
}

impl Clone for ExecutorRegistry {
    fn clone(&self) -> Self {
        Self {
            executors: Arc::clone(&self.executors),
        }
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
