//! Application state wiring the coordinator to its collaborators.
//!
//! `AppState` pins the coordinator's repository generic to either the SQLite
//! repository (default) or the in-memory one (`--ephemeral`). The command
//! executor is always the built-in handler registry.

use std::path::Path;
use std::sync::Arc;

use stepweave_core::repository::{InMemoryWorkflowRunRepository, WorkflowRunRepository};
use stepweave_core::workflow::Coordinator;
use stepweave_infra::config::resolve_database_url;
use stepweave_infra::handler::default_registry;
use stepweave_infra::sqlite::{DatabasePool, SqliteWorkflowRunRepository};
use stepweave_types::config::OrchestratorConfig;

/// Shared state for one CLI invocation.
pub struct AppState<R: WorkflowRunRepository> {
    pub coordinator: Arc<Coordinator<R>>,
    pub config: OrchestratorConfig,
}

impl<R: WorkflowRunRepository> AppState<R> {
    fn with_repo(repo: R, config: OrchestratorConfig) -> Self {
        let coordinator = Coordinator::new(Arc::new(default_registry()), repo, config.clone());
        Self {
            coordinator: Arc::new(coordinator),
            config,
        }
    }

    /// The run repository behind the coordinator.
    pub fn repo(&self) -> &R {
        self.coordinator.checkpoint().repo()
    }
}

impl AppState<SqliteWorkflowRunRepository> {
    /// Open the run database (creating the data directory when needed).
    pub async fn init(config: OrchestratorConfig, data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db_url = resolve_database_url(&config, data_dir);
        let pool = DatabasePool::new(&db_url).await?;
        tracing::debug!(db_url = db_url.as_str(), "run database ready");

        Ok(Self::with_repo(SqliteWorkflowRunRepository::new(pool), config))
    }
}

impl AppState<InMemoryWorkflowRunRepository> {
    /// State whose checkpoints and history vanish with the process.
    pub fn ephemeral(config: OrchestratorConfig) -> Self {
        Self::with_repo(InMemoryWorkflowRunRepository::new(), config)
    }
}
