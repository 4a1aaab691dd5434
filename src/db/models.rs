/// Database row types matching `migrations/0001_init.sql`.
/// Used by sqlx for typed queries.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::state::{TaskKind, TaskRecord, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct OpportunityRow {
    pub id: i64,
    pub app_id: String,
    pub name: String,
    pub category: String,
    pub rating: f64,
    pub review_count: i64,
    pub price: f64,
    pub opportunity_score: f64,
    pub url: String,
    /// Unix seconds of the scoring pass that last wrote the row.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrendRow {
    pub id: i64,
    pub keyword: String,
    pub platform: String,
    pub date: String,
    pub value: f64,
    pub metadata: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

/// Task snapshot with JSON-encoded params/progress/results and
/// millisecond timestamps.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub task_id: String,
    pub kind: String,
    pub status: String,
    pub params: String,
    pub progress: String,
    pub results: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskRow {
    pub fn from_record(t: &TaskRecord) -> Result<Self> {
        Ok(Self {
            task_id: t.task_id.clone(),
            kind: t.kind.to_string(),
            status: t.status.to_string(),
            params: serde_json::to_string(&t.params)?,
            progress: serde_json::to_string(&t.progress)?,
            results: t.results.as_ref().map(serde_json::to_string).transpose()?,
            error: t.error.clone(),
            created_at: t.created_at.timestamp_millis(),
            updated_at: t.updated_at.timestamp_millis(),
        })
    }

    pub fn into_record(self) -> Result<TaskRecord> {
        let kind = TaskKind::parse(&self.kind)
            .ok_or_else(|| AppError::Storage(format!("unknown task kind in database: {}", self.kind)))?;
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| AppError::Storage(format!("unknown task status in database: {}", self.status)))?;
        Ok(TaskRecord {
            task_id: self.task_id,
            kind,
            status,
            params: serde_json::from_str(&self.params)?,
            progress: serde_json::from_str(&self.progress)?,
            results: self.results.as_deref().map(serde_json::from_str).transpose()?,
            error: self.error,
            created_at: millis_to_utc(self.created_at),
            updated_at: millis_to_utc(self.updated_at),
        })
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
