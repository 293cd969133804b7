use crate::error::Result;
use crate::pipeline::{PipelineRunner, RunReport};
use crate::pivot::PivotConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Sync cycle state
///
/// ```text
/// Provisioning → RunningFilmWork → RunningPerson → RunningGenre → Sleeping
///                      ↑                                              │
///                      └──────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    Provisioning,
    RunningFilmWork,
    RunningPerson,
    RunningGenre,
    Sleeping,
}

impl SyncState {
    pub fn state_name(&self) -> &'static str {
        match self {
            SyncState::Provisioning => "provisioning",
            SyncState::RunningFilmWork => "running_film_work",
            SyncState::RunningPerson => "running_person",
            SyncState::RunningGenre => "running_genre",
            SyncState::Sleeping => "sleeping",
        }
    }

    /// Successor in the cycle; there is no terminal state
    pub fn next(&self) -> SyncState {
        match self {
            SyncState::Provisioning => SyncState::RunningFilmWork,
            SyncState::RunningFilmWork => SyncState::RunningPerson,
            SyncState::RunningPerson => SyncState::RunningGenre,
            SyncState::RunningGenre => SyncState::Sleeping,
            SyncState::Sleeping => SyncState::RunningFilmWork,
        }
    }

    /// Pivot driven in this state, if any
    pub fn pivot(&self) -> Option<PivotConfig> {
        match self {
            SyncState::RunningFilmWork => Some(PivotConfig::FILM_WORK),
            SyncState::RunningPerson => Some(PivotConfig::PERSON),
            SyncState::RunningGenre => Some(PivotConfig::GENRE),
            SyncState::Provisioning | SyncState::Sleeping => None,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Drives the three pivots in sequence, forever
///
/// Any error leaving a state is fatal: provisioning and pivot runs retry
/// internally, so what reaches here is already exhausted or permanent.
pub struct SyncOrchestrator {
    runner: Arc<PipelineRunner>,
    schema: serde_json::Value,
    interval: Duration,
    state: SyncState,
    cycles: u64,
    last_report: Option<RunReport>,
}

impl SyncOrchestrator {
    pub fn new(runner: Arc<PipelineRunner>, schema: serde_json::Value, interval: Duration) -> Self {
        Self {
            runner,
            schema,
            interval,
            state: SyncState::Provisioning,
            cycles: 0,
            last_report: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Completed cycles over all pivots
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Perform the current state's action and move to the next state
    ///
    /// On error the state is left unchanged.
    pub async fn step(&mut self) -> Result<SyncState> {
        match self.state {
            SyncState::Provisioning => self.provision().await?,
            SyncState::Sleeping => {
                self.cycles += 1;
                info!(
                    "Cycle {} done, sleeping {:?}",
                    self.cycles, self.interval
                );
                tokio::time::sleep(self.interval).await;
            }
            running => {
                if let Some(pivot) = running.pivot() {
                    let report = self.runner.run(&pivot).await?;
                    self.last_report = Some(report);
                }
            }
        }

        self.state = self.state.next();
        Ok(self.state)
    }

    /// Loop `step` until a fatal error
    pub async fn run_forever(&mut self) -> Result<()> {
        loop {
            if let Err(e) = self.step().await {
                error!("Sync stopped in state {}: {}", self.state, e);
                return Err(e);
            }
        }
    }

    /// Recreate the index from the schema document
    async fn provision(&self) -> Result<()> {
        info!("Provisioning index");
        let index = Arc::clone(self.runner.index());
        let schema = &self.schema;
        self.runner
            .retry_policy()
            .run("provision", |_| {
                let index = Arc::clone(&index);
                async move { index.recreate(schema).await }
            })
            .await
    }
}
