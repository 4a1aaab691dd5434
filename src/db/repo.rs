use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{CategoryCount, OpportunityRow, TaskRow, TrendRow};
use crate::error::Result;
use crate::state::TaskRecord;
use crate::types::{FetchedApp, Opportunity, TrendPoint, TrendSeries};

const OPPORTUNITY_COLUMNS: &str =
    "SELECT id, app_id, name, category, rating, review_count, price, opportunity_score, url, created_at FROM opportunities";

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct OpportunityFilter {
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub category: Option<String>,
    /// Case-insensitive substring of the app name.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    OpportunityScore,
    Rating,
    ReviewCount,
    Price,
    Name,
    CreatedAt,
}

impl SortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opportunity_score" => Some(SortField::OpportunityScore),
            "rating" => Some(SortField::Rating),
            "review_count" => Some(SortField::ReviewCount),
            "price" => Some(SortField::Price),
            "name" => Some(SortField::Name),
            "created_at" => Some(SortField::CreatedAt),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            SortField::OpportunityScore => "opportunity_score",
            SortField::Rating => "rating",
            SortField::ReviewCount => "review_count",
            SortField::Price => "price",
            SortField::Name => "name",
            SortField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "desc" => Some(SortOrder::Desc),
            "asc" => Some(SortOrder::Asc),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        }
    }
}

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    fn offset(self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

/// Insert or replace scored opportunities keyed by `app_id`.
pub async fn save_opportunities(pool: &SqlitePool, opportunities: &[Opportunity]) -> Result<u64> {
    let created_at = now_secs();
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for o in opportunities {
        let res = sqlx::query(
            r#"
            INSERT INTO opportunities
                (app_id, name, category, rating, review_count, price, opportunity_score, url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(app_id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                rating = excluded.rating,
                review_count = excluded.review_count,
                price = excluded.price,
                opportunity_score = excluded.opportunity_score,
                url = excluded.url,
                created_at = excluded.created_at
            "#,
        )
        .bind(&o.app_id)
        .bind(&o.name)
        .bind(&o.category)
        .bind(o.rating)
        .bind(o.review_count as i64)
        .bind(o.price)
        .bind(o.opportunity_score)
        .bind(&o.url)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        written += res.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

fn push_opportunity_filters(qb: &mut QueryBuilder<'_, Sqlite>, f: &OpportunityFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(min) = f.min_score {
        qb.push(" AND opportunity_score >= ").push_bind(min);
    }
    if let Some(max) = f.max_score {
        qb.push(" AND opportunity_score <= ").push_bind(max);
    }
    if let Some(category) = &f.category {
        qb.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(search) = &f.search {
        qb.push(" AND name LIKE ").push_bind(format!("%{search}%"));
    }
}

/// Filtered, sorted opportunities. `page: None` returns every match.
pub async fn list_opportunities(
    pool: &SqlitePool,
    filter: &OpportunityFilter,
    sort: SortField,
    order: SortOrder,
    page: Option<Page>,
) -> Result<Vec<OpportunityRow>> {
    let mut qb = QueryBuilder::<Sqlite>::new(OPPORTUNITY_COLUMNS);
    push_opportunity_filters(&mut qb, filter);
    qb.push(format!(" ORDER BY {} {}, id ASC", sort.column(), order.sql()));
    if let Some(p) = page {
        qb.push(" LIMIT ")
            .push_bind(i64::from(p.per_page))
            .push(" OFFSET ")
            .push_bind(p.offset());
    }
    Ok(qb.build_query_as::<OpportunityRow>().fetch_all(pool).await?)
}

pub async fn count_opportunities(pool: &SqlitePool, filter: &OpportunityFilter) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM opportunities");
    push_opportunity_filters(&mut qb, filter);
    Ok(qb.build_query_scalar::<i64>().fetch_one(pool).await?)
}

pub async fn get_opportunity(pool: &SqlitePool, app_id: &str) -> Result<Option<OpportunityRow>> {
    let row = sqlx::query_as::<_, OpportunityRow>(&format!("{OPPORTUNITY_COLUMNS} WHERE app_id = ?"))
        .bind(app_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Most common categories among stored opportunities.
pub async fn category_counts(pool: &SqlitePool, limit: i64) -> Result<Vec<CategoryCount>> {
    let rows = sqlx::query_as::<_, CategoryCount>(
        r#"
        SELECT category, COUNT(*) AS count
        FROM opportunities
        GROUP BY category
        ORDER BY count DESC, category ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Raw app records
// ---------------------------------------------------------------------------

pub async fn save_raw_apps(pool: &SqlitePool, apps: &[FetchedApp], source: &str) -> Result<u64> {
    let created_at = now_secs();
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for app in apps {
        let data = serde_json::to_string(&app.raw)?;
        let res = sqlx::query(
            "INSERT INTO raw_apps (app_id, data, source, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&app.record.app_id)
        .bind(data)
        .bind(source)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        written += res.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// The most recently stored upstream JSON for `app_id`.
pub async fn latest_raw_app(pool: &SqlitePool, app_id: &str) -> Result<Option<serde_json::Value>> {
    let data: Option<String> = sqlx::query_scalar(
        "SELECT data FROM raw_apps WHERE app_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(app_id)
    .fetch_optional(pool)
    .await?;
    Ok(data.as_deref().map(serde_json::from_str).transpose()?)
}

pub async fn count_raw_apps(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM raw_apps")
        .fetch_one(pool)
        .await?)
}

// ---------------------------------------------------------------------------
// Search trends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TrendFilter {
    pub keyword: Option<String>,
    pub platform: Option<String>,
    /// Inclusive lower bound on the stored date text.
    pub start_date: Option<String>,
    /// Inclusive upper bound on the stored date text.
    pub end_date: Option<String>,
}

/// Upsert one keyword's points; a repeated (keyword, platform, date) keeps the latest value.
pub async fn save_trend_batch(
    pool: &SqlitePool,
    keyword: &str,
    platform: &str,
    points: &[TrendPoint],
    metadata: &serde_json::Value,
) -> Result<u64> {
    let created_at = now_secs();
    let metadata = serde_json::to_string(metadata)?;
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for p in points {
        let res = sqlx::query(
            r#"
            INSERT INTO search_trends (keyword, platform, date, value, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(keyword, platform, date) DO UPDATE SET
                value = excluded.value,
                metadata = excluded.metadata,
                created_at = excluded.created_at
            "#,
        )
        .bind(keyword)
        .bind(platform)
        .bind(&p.date)
        .bind(p.value)
        .bind(&metadata)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        written += res.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Stored points matching `filter`, date ascending.
pub async fn trend_points(pool: &SqlitePool, filter: &TrendFilter) -> Result<Vec<TrendRow>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, keyword, platform, date, value, metadata, created_at FROM search_trends WHERE 1 = 1",
    );
    if let Some(keyword) = &filter.keyword {
        qb.push(" AND keyword = ").push_bind(keyword.clone());
    }
    if let Some(platform) = &filter.platform {
        qb.push(" AND platform = ").push_bind(platform.clone());
    }
    if let Some(start) = &filter.start_date {
        qb.push(" AND date >= ").push_bind(start.clone());
    }
    if let Some(end) = &filter.end_date {
        qb.push(" AND date <= ").push_bind(end.clone());
    }
    qb.push(" ORDER BY date ASC, id ASC");
    Ok(qb.build_query_as::<TrendRow>().fetch_all(pool).await?)
}

/// Series for one (keyword, platform) pair; empty when nothing is stored.
pub async fn load_series(pool: &SqlitePool, keyword: &str, platform: &str) -> Result<TrendSeries> {
    let rows = trend_points(
        pool,
        &TrendFilter {
            keyword: Some(keyword.to_string()),
            platform: Some(platform.to_string()),
            ..Default::default()
        },
    )
    .await?;
    Ok(TrendSeries {
        keyword: keyword.to_string(),
        platform: platform.to_string(),
        points: rows
            .into_iter()
            .map(|r| TrendPoint { date: r.date, value: r.value })
            .collect(),
    })
}

/// Every keyword with stored points, alphabetical.
pub async fn trend_keywords(pool: &SqlitePool) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar("SELECT DISTINCT keyword FROM search_trends ORDER BY keyword")
        .fetch_all(pool)
        .await?)
}

pub async fn count_trend_points(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM search_trends")
        .fetch_one(pool)
        .await?)
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub async fn save_task(pool: &SqlitePool, task: &TaskRecord) -> Result<()> {
    let row = TaskRow::from_record(task)?;
    sqlx::query(
        r#"
        INSERT INTO tasks (task_id, kind, status, params, progress, results, error, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(task_id) DO UPDATE SET
            status = excluded.status,
            params = excluded.params,
            progress = excluded.progress,
            results = excluded.results,
            error = excluded.error,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(row.task_id)
    .bind(row.kind)
    .bind(row.status)
    .bind(row.params)
    .bind(row.progress)
    .bind(row.results)
    .bind(row.error)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_task(pool: &SqlitePool, task_id: &str) -> Result<Option<TaskRecord>> {
    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT task_id, kind, status, params, progress, results, error, created_at, updated_at
        FROM tasks WHERE task_id = ?
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;
    row.map(TaskRow::into_record).transpose()
}

/// Tasks left pending or running by a previous process can never finish;
/// record them as failed. Returns how many were updated.
pub async fn fail_interrupted_tasks(pool: &SqlitePool) -> Result<u64> {
    let res = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'error', error = 'interrupted by restart', updated_at = ?
        WHERE status IN ('pending', 'running')
        "#,
    )
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}
