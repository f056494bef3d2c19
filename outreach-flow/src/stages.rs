//! Stubbed stage operations
//!
//! Placeholder for the real exploration, drafting and sending collaborators.
//! Each stage sleeps for a configurable duration and returns canned content,
//! which is enough to exercise the scheduler and executor end to end.

use std::time::Duration;

use outreach_flow_sdk::{async_trait, Path, StageError, StageOperations};
use tokio::time::sleep;
use uuid::Uuid;

/// Per-stage simulated latencies.
#[derive(Debug, Clone)]
pub struct StubStageConfig {
    pub explore_delay: Duration,
    pub draft_delay: Duration,
    pub send_delay: Duration,
}

impl Default for StubStageConfig {
    fn default() -> Self {
        Self {
            explore_delay: Duration::from_secs(3),
            draft_delay: Duration::from_secs(3),
            send_delay: Duration::from_millis(500),
        }
    }
}

/// Delay-based [`StageOperations`] implementation.
pub struct StubStages {
    config: StubStageConfig,
}

impl StubStages {
    pub fn new(config: StubStageConfig) -> Self {
        Self { config }
    }

    /// Zero-delay variant for tests.
    pub fn instant() -> Self {
        Self::new(StubStageConfig {
            explore_delay: Duration::ZERO,
            draft_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
        })
    }
}

impl Default for StubStages {
    fn default() -> Self {
        Self::new(StubStageConfig::default())
    }
}

#[async_trait]
impl StageOperations for StubStages {
    async fn explore(&self, path: &Path) -> Result<String, StageError> {
        sleep(self.config.explore_delay).await;
        Ok(format!(
            "Prospect report for business {} (flow {})",
            path.business_id, path.flow_id
        ))
    }

    async fn draft_outreach(&self, path: &Path) -> Result<String, StageError> {
        sleep(self.config.draft_delay).await;
        Ok(format!(
            "Hello! We reviewed business {} and would love to get in touch.",
            path.business_id
        ))
    }

    async fn send(&self, _path: &Path) -> Result<String, StageError> {
        sleep(self.config.send_delay).await;
        Ok(format!("stub-receipt-{}", Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_stages_produce_non_empty_artifacts() {
        let stages = StubStages::instant();
        let path = Path::new(1, 7, 3);

        let report = stages.explore(&path).await.unwrap();
        assert!(report.contains("business 7"));

        let draft = stages.draft_outreach(&path).await.unwrap();
        assert!(!draft.is_empty());

        let receipt = stages.send(&path).await.unwrap();
        assert!(receipt.starts_with("stub-receipt-"));
    }
}
