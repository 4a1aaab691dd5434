use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::collector::{AppSource, CollectorContext};
use crate::config::ScoringConfig;
use crate::db::repo;
use crate::error::Result;
use crate::scorer::analyze_opportunities;
use crate::types::{AppRecord, FetchedApp};

pub const DEFAULT_LIMIT_PER_KEYWORD: usize = 20;

/// `source` column value for raw rows written by this collector.
pub const RAW_SOURCE: &str = "itunes_search";

/// Searches the catalogue for each keyword, then scores and stores the
/// combined, de-duplicated result set.
pub struct AppScrapeCollector<A> {
    source: Arc<A>,
    scoring: Arc<RwLock<ScoringConfig>>,
    ctx: CollectorContext,
}

impl<A: AppSource> AppScrapeCollector<A> {
    pub fn new(source: Arc<A>, scoring: Arc<RwLock<ScoringConfig>>, ctx: CollectorContext) -> Self {
        Self { source, scoring, ctx }
    }

    pub async fn run(self, task_id: String) {
        let outcome = self.collect(&task_id).await;
        self.ctx.finish(&task_id, outcome).await;
    }

    async fn collect(&self, task_id: &str) -> Result<Option<serde_json::Value>> {
        if !self.ctx.start(task_id)? {
            return Ok(None);
        }
        self.ctx.persist(task_id).await;

        let Some(task) = self.ctx.tasks.get(task_id) else {
            return Ok(None);
        };
        let keywords = task.params.keywords;
        let limit = task
            .params
            .limit_per_keyword
            .unwrap_or(DEFAULT_LIMIT_PER_KEYWORD);

        let total = keywords.len();
        self.ctx.tasks.update_progress(task_id, |p| {
            p.total = total;
            p.completed = 0;
        })?;
        info!(task_id, keywords = total, limit, "app scrape started");

        let mut seen: HashSet<String> = HashSet::new();
        let mut apps: Vec<FetchedApp> = Vec::new();
        for (i, keyword) in keywords.iter().enumerate() {
            if self.ctx.tasks.is_stopped(task_id) {
                info!(task_id, completed = i, total, "stop requested, leaving app scrape");
                return Ok(None);
            }
            self.ctx
                .tasks
                .update_progress(task_id, |p| p.current_keyword = keyword.clone())?;

            let started = Instant::now();
            match self.source.search(keyword, limit).await {
                Ok(found) => {
                    self.ctx.latency.record(started.elapsed());
                    let before = apps.len();
                    apps.extend(
                        found
                            .into_iter()
                            .filter(|a| !a.record.app_id.is_empty())
                            .filter(|a| seen.insert(a.record.app_id.clone())),
                    );
                    debug!(task_id, keyword = %keyword, new = apps.len() - before, "apps fetched");
                }
                Err(e) => {
                    self.ctx.health.inc_fetch_errors();
                    warn!(task_id, keyword = %keyword, "app search failed, skipping: {e}");
                }
            }

            self.ctx
                .tasks
                .update_progress(task_id, |p| p.completed = i + 1)?;
            if i + 1 < total {
                self.ctx.pause().await;
            }
        }

        if self.ctx.tasks.is_stopped(task_id) {
            return Ok(None);
        }

        repo::save_raw_apps(&self.ctx.pool, &apps, RAW_SOURCE).await?;

        let scoring = *self.scoring.read().await;
        let records: Vec<AppRecord> = apps.iter().map(|a| a.record.clone()).collect();
        let opportunities = analyze_opportunities(&records, &scoring.weights, &scoring.thresholds, Utc::now());
        repo::save_opportunities(&self.ctx.pool, &opportunities).await?;
        self.ctx.health.add_apps_scored(records.len() as u64);

        info!(
            task_id,
            apps = apps.len(),
            opportunities = opportunities.len(),
            "app scrape scored"
        );

        Ok(Some(serde_json::json!({
            "apps_collected": apps.len(),
            "opportunities_found": opportunities.len(),
        })))
    }
}
