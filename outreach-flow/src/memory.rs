//! In-memory flow store
//!
//! Hash-map backed [`FlowStore`] used by tests and demos; the SQLite store in
//! [`crate::database`] is the persistent counterpart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Local;
use outreach_flow_sdk::{
    async_trait, BusinessId, Flow, FlowId, FlowStatus, FlowStore, Path, PathId,
};
use serde_json::Value;

struct MemoryInner {
    flows: HashMap<FlowId, Flow>,
    paths: HashMap<PathId, Path>,
    next_flow_id: FlowId,
    next_path_id: PathId,
}

impl Default for MemoryInner {
    fn default() -> Self {
        Self {
            flows: HashMap::new(),
            paths: HashMap::new(),
            next_flow_id: 1,
            next_path_id: 1,
        }
    }
}

/// Shared-by-reference in-memory store.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Insert an `InProgress` flow with empty filters and a canned template.
    pub fn add_flow(&self, name: &str) -> Flow {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_flow_id;
        inner.next_flow_id += 1;
        let flow = Flow {
            id,
            name: name.to_string(),
            status: FlowStatus::InProgress,
            filters: Value::Null,
            outreach_template: "Hello {business}!".to_string(),
            created_at: Local::now(),
        };
        inner.flows.insert(id, flow.clone());
        flow
    }

    /// Insert a fresh `Pending` path for a business in a flow.
    pub fn add_path(&self, flow_id: FlowId, business_id: BusinessId) -> Path {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_path_id;
        inner.next_path_id += 1;
        let path = Path::new(id, business_id, flow_id);
        inner.paths.insert(id, path.clone());
        path
    }

    pub fn path(&self, id: PathId) -> Option<Path> {
        self.inner.lock().unwrap().paths.get(&id).cloned()
    }

    pub fn flow(&self, id: FlowId) -> Option<Flow> {
        self.inner.lock().unwrap().flows.get(&id).cloned()
    }

    pub fn paths_by_flow(&self, flow_id: FlowId) -> Vec<Path> {
        self.inner
            .lock()
            .unwrap()
            .paths
            .values()
            .filter(|p| p.flow_id == flow_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn find_flow(&self, id: FlowId) -> anyhow::Result<Option<Flow>> {
        Ok(self.flow(id))
    }

    async fn find_paths_by_flow(&self, flow_id: FlowId) -> anyhow::Result<Vec<Path>> {
        Ok(self.paths_by_flow(flow_id))
    }

    async fn find_path_by_id(&self, id: PathId) -> anyhow::Result<Option<Path>> {
        Ok(self.path(id))
    }

    async fn save_path(&self, path: &Path) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .paths
            .insert(path.id, path.clone());
        Ok(())
    }

    async fn create_flow(
        &self,
        name: &str,
        filters: Value,
        outreach_template: &str,
    ) -> anyhow::Result<Flow> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_flow_id;
        inner.next_flow_id += 1;
        let flow = Flow {
            id,
            name: name.to_string(),
            status: FlowStatus::InProgress,
            filters,
            outreach_template: outreach_template.to_string(),
            created_at: Local::now(),
        };
        inner.flows.insert(id, flow.clone());
        Ok(flow)
    }

    async fn save_flow(&self, flow: &Flow) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .flows
            .insert(flow.id, flow.clone());
        Ok(())
    }

    async fn list_flows_by_status(&self, status: FlowStatus) -> anyhow::Result<Vec<Flow>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .flows
            .values()
            .filter(|f| f.status == status)
            .cloned()
            .collect())
    }
}
