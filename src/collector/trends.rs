use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::collector::{CollectorContext, TrendSource};
use crate::config::DEFAULT_TIMEFRAME;
use crate::db::repo;
use crate::error::Result;
use crate::types::TrendPoint;

/// Collects interest-over-time for every keyword × platform pair of a task.
pub struct TrendCollector<S> {
    source: Arc<S>,
    ctx: CollectorContext,
}

impl<S: TrendSource> TrendCollector<S> {
    pub fn new(source: Arc<S>, ctx: CollectorContext) -> Self {
        Self { source, ctx }
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
        let platforms = task.params.platforms;
        let timeframe = task
            .params
            .timeframe
            .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());
        let metadata = serde_json::json!({ "timeframe": timeframe });

        let total = keywords.len() * platforms.len();
        self.ctx.tasks.update_progress(task_id, |p| {
            p.total = total;
            p.completed = 0;
            p.current_keyword = keywords.first().cloned().unwrap_or_default();
            p.current_platform = platforms.first().cloned().unwrap_or_default();
        })?;
        info!(task_id, keywords = keywords.len(), platforms = platforms.len(), %timeframe, "trend collection started");

        let mut saved = 0usize;
        let mut completed = 0usize;
        for keyword in &keywords {
            for platform in &platforms {
                if self.ctx.tasks.is_stopped(task_id) {
                    info!(task_id, completed, total, "stop requested, leaving trend collection");
                    return Ok(None);
                }
                self.ctx.tasks.update_progress(task_id, |p| {
                    p.current_keyword = keyword.clone();
                    p.current_platform = platform.clone();
                })?;

                let started = Instant::now();
                match self.source.fetch(keyword, platform, &timeframe).await {
                    Ok(points) => {
                        self.ctx.latency.record(started.elapsed());
                        let points = positive_points(points);
                        if !points.is_empty() {
                            repo::save_trend_batch(&self.ctx.pool, keyword, platform, &points, &metadata).await?;
                            saved += points.len();
                            self.ctx.health.add_trend_points(points.len() as u64);
                        }
                        debug!(task_id, keyword = %keyword, platform = %platform, points = points.len(), "trend points saved");
                    }
                    Err(e) => {
                        self.ctx.health.inc_fetch_errors();
                        warn!(task_id, keyword = %keyword, platform = %platform, "trend fetch failed, skipping: {e}");
                    }
                }

                completed += 1;
                self.ctx.tasks.update_progress(task_id, |p| p.completed = completed)?;
                if completed < total {
                    self.ctx.pause().await;
                }
            }
        }

        Ok(Some(serde_json::json!({
            "keywords_collected": keywords.len(),
            "trends_saved": saved,
            "platforms": platforms,
        })))
    }
}

/// Keep finite, strictly positive readings only.
fn positive_points(points: Vec<TrendPoint>) -> Vec<TrendPoint> {
    points
        .into_iter()
        .filter(|p| p.value.is_finite() && p.value > 0.0)
        .collect()
}
