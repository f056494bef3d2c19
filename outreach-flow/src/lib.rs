//! Orchestration engine for multi-stage business outreach flows
//!
//! Each flow owns a set of prospect paths moving through an explicit state
//! machine: explore/profile, report approval, outreach drafting, outreach
//! approval, send. A dynamic-priority scheduler with a fixed worker pool
//! drives the automatic transitions; the two approval gates are unblocked by
//! external calls routed through the executor registry.

// Task scheduler with aging-based priorities
pub mod scheduler;

// Per-flow executor driving the path state machine
pub mod executor;

// Registry of live executors for approval routing
pub mod registry;

// In-process service surface (create/start/pause/approve/resume)
pub mod service;

// Stubbed stage collaborators (exploration, drafting, sending)
pub mod stages;

// SQLite-backed flow store
pub mod database;

// In-memory flow store for tests and demos
pub mod memory;

pub use executor::FlowExecutor;
pub use registry::ExecutorRegistry;
pub use scheduler::{SchedulerConfig, Task, TaskScheduler};
pub use service::FlowService;
