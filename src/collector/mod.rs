//! Background collection tasks.
//!
//! Each collector is spawned per task with `tokio::spawn`, drives the task
//! through the [`TaskStore`] lifecycle and mirrors every status change to the
//! `tasks` table.

pub mod apps;
pub mod trends;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::repo;
use crate::error::{AppError, Result};
use crate::state::{TaskStatus, TaskStore};
use crate::types::{FetchedApp, TrendPoint};

pub use apps::AppScrapeCollector;
pub use trends::TrendCollector;

/// Interest-over-time provider for one (keyword, platform) pair.
pub trait TrendSource: Send + Sync + 'static {
    fn fetch(
        &self,
        keyword: &str,
        platform: &str,
        timeframe: &str,
    ) -> impl Future<Output = Result<Vec<TrendPoint>>> + Send;
}

/// App catalogue search.
pub trait AppSource: Send + Sync + 'static {
    fn search(&self, term: &str, limit: usize) -> impl Future<Output = Result<Vec<FetchedApp>>> + Send;
}

/// Handles every collector needs besides its source.
#[derive(Clone)]
pub struct CollectorContext {
    pub pool: sqlx::SqlitePool,
    pub tasks: Arc<TaskStore>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    /// Pause between consecutive upstream requests.
    pub delay: Duration,
}

impl CollectorContext {
    /// Write the task's current snapshot to the database. Failures are logged only.
    pub async fn persist(&self, task_id: &str) {
        let Some(task) = self.tasks.get(task_id) else {
            return;
        };
        if let Err(e) = repo::save_task(&self.pool, &task).await {
            warn!(task_id, "failed to persist task snapshot: {e}");
        }
    }

    /// Move a pending task to running. `Ok(false)` means it was stopped first.
    fn start(&self, task_id: &str) -> Result<bool> {
        match self.tasks.transition(task_id, TaskStatus::Running) {
            Ok(_) => Ok(true),
            Err(AppError::InvalidTransition { from: TaskStatus::Stopped, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Record how a collection run ended. `Ok(None)` is a run that observed a stop request.
    async fn finish(&self, task_id: &str, outcome: Result<Option<serde_json::Value>>) {
        match outcome {
            Ok(Some(results)) => match self.tasks.complete(task_id, results) {
                Ok(_) => info!(task_id, "collection task completed"),
                Err(AppError::InvalidTransition { from, .. }) => {
                    info!(task_id, status = %from, "task ended before completion could be recorded");
                }
                Err(e) => warn!(task_id, "failed to complete task: {e}"),
            },
            Ok(None) => info!(task_id, "collection task stopped"),
            Err(e) => {
                error!(task_id, "collection task failed: {e}");
                if let Err(transition) = self.tasks.fail(task_id, e.to_string()) {
                    warn!(task_id, "could not record failure: {transition}");
                }
            }
        }
        self.health.mark_collection_finished();
        self.persist(task_id).await;
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Canned trend source keyed by keyword. Unknown keywords error.
    pub struct FakeTrends {
        pub series: HashMap<String, Vec<TrendPoint>>,
        pub calls: Mutex<Vec<(String, String)>>,
        /// Task to stop as soon as the first fetch happens.
        pub stop_after_first: Mutex<Option<(Arc<TaskStore>, String)>>,
    }

    impl FakeTrends {
        pub fn new(series: &[(&str, &[f64])]) -> Self {
            Self {
                series: series
                    .iter()
                    .map(|(kw, values)| {
                        let points = values
                            .iter()
                            .enumerate()
                            .map(|(i, v)| TrendPoint {
                                date: format!("2024-01-{:02}", i + 1),
                                value: *v,
                            })
                            .collect();
                        (kw.to_string(), points)
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
                stop_after_first: Mutex::new(None),
            }
        }
    }

    impl TrendSource for FakeTrends {
        async fn fetch(&self, keyword: &str, platform: &str, _timeframe: &str) -> Result<Vec<TrendPoint>> {
            self.calls
                .lock()
                .unwrap()
                .push((keyword.to_string(), platform.to_string()));
            if let Some((tasks, id)) = self.stop_after_first.lock().unwrap().take() {
                tasks.request_stop(&id).unwrap();
            }
            self.series
                .get(keyword)
                .cloned()
                .ok_or_else(|| AppError::Upstream(format!("no canned data for {keyword}")))
        }
    }

    pub struct FakeApps {
        pub by_term: HashMap<String, Vec<FetchedApp>>,
    }

    impl AppSource for FakeApps {
        async fn search(&self, term: &str, _limit: usize) -> Result<Vec<FetchedApp>> {
            Ok(self.by_term.get(term).cloned().unwrap_or_default())
        }
    }

    pub async fn context() -> CollectorContext {
        CollectorContext {
            pool: crate::db::memory_pool().await,
            tasks: TaskStore::new(),
            latency: Arc::new(LatencyStats::new()),
            health: Arc::new(HealthState::new()),
            delay: Duration::ZERO,
        }
    }
}
