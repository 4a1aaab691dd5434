use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::analyzer::{self, recommend, with_score};
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::collector::{AppScrapeCollector, AppSource, CollectorContext, TrendCollector, TrendSource};
use crate::config::{
    RecommendationThresholds, ScoringConfig, DEFAULT_TIMEFRAME, ITUNES_MAX_LIMIT, PLATFORM_GOOGLE_TRENDS,
};
use crate::db::models::{CategoryCount, OpportunityRow, TrendRow};
use crate::db::repo::{self, OpportunityFilter, Page, SortField, SortOrder, TrendFilter};
use crate::error::AppError;
use crate::fetcher::{parse_itunes_app, AppDetails};
use crate::scorer;
use crate::state::{TaskKind, TaskParams, TaskRecord, TaskStore};
use crate::types::{OpportunityScore, Recommendation, ScoredTrend, TrendAnalysis, TrendSeries, TrendSummary};

const DEFAULT_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;
const DEFAULT_HOT_GROWTH_RATE: f64 = 20.0;
const TOP_CATEGORIES: i64 = 5;

pub struct ApiState<A, T> {
    pub pool: sqlx::SqlitePool,
    pub tasks: Arc<TaskStore>,
    /// Weights and thresholds, editable at runtime through `/config`.
    pub scoring: Arc<RwLock<ScoringConfig>>,
    pub apps: Arc<A>,
    pub trends: Arc<T>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub request_delay: Duration,
}

impl<A, T> Clone for ApiState<A, T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            tasks: Arc::clone(&self.tasks),
            scoring: Arc::clone(&self.scoring),
            apps: Arc::clone(&self.apps),
            trends: Arc::clone(&self.trends),
            health: Arc::clone(&self.health),
            latency: Arc::clone(&self.latency),
            request_delay: self.request_delay,
        }
    }
}

impl<A, T> ApiState<A, T> {
    fn collector_context(&self) -> CollectorContext {
        CollectorContext {
            pool: self.pool.clone(),
            tasks: Arc::clone(&self.tasks),
            latency: Arc::clone(&self.latency),
            health: Arc::clone(&self.health),
            delay: self.request_delay,
        }
    }
}

pub fn router<A: AppSource, T: TrendSource>(state: ApiState<A, T>) -> Router {
    Router::new()
        .route("/health", get(get_health::<A, T>))
        .route("/stats", get(get_stats::<A, T>))
        .route("/stats/latency", get(get_stats_latency::<A, T>))
        .route("/config", get(get_config::<A, T>).post(update_config::<A, T>))
        .route("/tasks", get(get_tasks::<A, T>))
        .route("/scrape/start", post(start_scrape::<A, T>))
        .route("/scrape/status/:task_id", get(get_scrape_status::<A, T>))
        .route("/scrape/stop/:task_id", post(stop_scrape::<A, T>))
        .route("/opportunities", get(get_opportunities::<A, T>))
        .route("/opportunities/export", get(export_opportunities::<A, T>))
        .route("/opportunities/:app_id", get(get_opportunity_detail::<A, T>))
        .route("/trends", get(get_trends::<A, T>))
        .route("/trends/start", post(start_trends::<A, T>))
        .route("/trends/status/:task_id", get(get_trend_status::<A, T>))
        .route("/trends/stop/:task_id", post(stop_trends::<A, T>))
        .route("/trends/keywords", get(get_trend_keywords::<A, T>))
        .route("/trends/analyze/:keyword", get(analyze_keyword::<A, T>))
        .route("/trends/compare", post(compare_trends::<A, T>))
        .route("/trends/hot", get(get_hot_keywords::<A, T>))
        .route("/trends/recommendations", get(get_recommendations::<A, T>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct Envelope<D> {
    pub status: &'static str,
    pub data: D,
}

fn success<D: Serialize>(data: D) -> Json<Envelope<D>> {
    Json(Envelope { status: "success", data })
}

type ApiResult<D> = Result<Json<Envelope<D>>, AppError>;

// ---------------------------------------------------------------------------
// Query / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct OpportunitiesQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub app_id: Option<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct ScrapeStartBody {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub limit_per_keyword: Option<usize>,
}

#[derive(Deserialize)]
pub struct TrendStartBody {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub platforms: Option<Vec<String>>,
    pub timeframe: Option<String>,
}

#[derive(Deserialize)]
pub struct TrendsQuery {
    pub keyword: Option<String>,
    pub platform: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Deserialize)]
pub struct PlatformQuery {
    pub platform: Option<String>,
}

#[derive(Deserialize)]
pub struct CompareBody {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub platform: Option<String>,
}

#[derive(Deserialize)]
pub struct HotQuery {
    pub platform: Option<String>,
    pub min_growth_rate: Option<f64>,
}

#[derive(Deserialize)]
pub struct RecommendationsQuery {
    pub platform: Option<String>,
    pub min_trend_score: Option<f64>,
    pub min_growth_rate: Option<f64>,
    pub min_avg_value: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct ConfigUpdate {
    pub scoring: Option<ScoringConfig>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ConfigView {
    pub scoring: ScoringConfig,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub uptime_secs: u64,
    pub active_tasks: usize,
    pub last_collection_at: Option<u64>,
    pub fetch_errors: u64,
    pub apps_scored: u64,
    pub trend_points_saved: u64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_opportunities: i64,
    pub total_raw_apps: i64,
    pub total_trend_points: i64,
    pub tracked_keywords: usize,
    pub active_tasks: usize,
    pub top_categories: Vec<CategoryCount>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct TaskStarted {
    pub task_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
    pub active: usize,
}

#[derive(Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub pages: i64,
}

#[derive(Serialize)]
pub struct OpportunityPage {
    pub opportunities: Vec<OpportunityRow>,
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct OpportunityDetail {
    #[serde(flatten)]
    pub opportunity: OpportunityRow,
    #[serde(flatten)]
    pub details: Option<AppDetails>,
    /// Sub-scores recomputed from the latest stored listing with the current weights.
    pub scoring_details: Option<OpportunityScore>,
}

#[derive(Serialize)]
pub struct TrendPointView {
    pub id: i64,
    pub keyword: String,
    pub platform: String,
    pub date: String,
    pub value: f64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

impl From<TrendRow> for TrendPointView {
    fn from(r: TrendRow) -> Self {
        let metadata = r.metadata.as_deref().and_then(|m| serde_json::from_str(m).ok());
        Self {
            id: r.id,
            keyword: r.keyword,
            platform: r.platform,
            date: r.date,
            value: r.value,
            metadata,
            created_at: r.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct TrendList {
    pub trends: Vec<TrendPointView>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct KeywordList {
    pub keywords: Vec<String>,
}

#[derive(Serialize)]
pub struct KeywordAnalysis {
    pub analysis: ScoredTrend,
    pub summary: TrendSummary,
    pub data_points: usize,
}

#[derive(Serialize)]
pub struct Comparison {
    pub comparison: Vec<ScoredTrend>,
    pub keywords: Vec<String>,
    pub platform: String,
}

#[derive(Serialize)]
pub struct HotKeywords {
    pub hot_keywords: Vec<TrendAnalysis>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct Recommendations {
    pub recommendations: Vec<Recommendation>,
    pub total: usize,
    pub thresholds: RecommendationThresholds,
}

// ---------------------------------------------------------------------------
// Health, stats, config
// ---------------------------------------------------------------------------

async fn get_health<A, T>(State(state): State<ApiState<A, T>>) -> Json<Envelope<HealthResponse>> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let last = state.health.last_collection_at();
    success(HealthResponse {
        status: if db_ok { "healthy" } else { "degraded" },
        database: if db_ok { "ok" } else { "unreachable" },
        uptime_secs: state.health.uptime_secs(),
        active_tasks: state.tasks.active_count(),
        last_collection_at: (last > 0).then_some(last),
        fetch_errors: state.health.fetch_errors(),
        apps_scored: state.health.apps_scored(),
        trend_points_saved: state.health.trend_points_saved(),
    })
}

async fn get_stats<A, T>(State(state): State<ApiState<A, T>>) -> ApiResult<StatsResponse> {
    Ok(success(StatsResponse {
        total_opportunities: repo::count_opportunities(&state.pool, &OpportunityFilter::default()).await?,
        total_raw_apps: repo::count_raw_apps(&state.pool).await?,
        total_trend_points: repo::count_trend_points(&state.pool).await?,
        tracked_keywords: repo::trend_keywords(&state.pool).await?.len(),
        active_tasks: state.tasks.active_count(),
        top_categories: repo::category_counts(&state.pool, TOP_CATEGORIES).await?,
    }))
}

async fn get_stats_latency<A, T>(State(state): State<ApiState<A, T>>) -> Json<Envelope<LatencyResponse>> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    success(LatencyResponse {
        samples: state.latency.len(),
        p50_ms,
        p95_ms,
        p99_ms,
    })
}

async fn get_config<A, T>(State(state): State<ApiState<A, T>>) -> Json<Envelope<ConfigView>> {
    let scoring = *state.scoring.read().await;
    success(ConfigView { scoring })
}

async fn update_config<A, T>(
    State(state): State<ApiState<A, T>>,
    Json(body): Json<ConfigUpdate>,
) -> ApiResult<ConfigView> {
    let scoring = body
        .scoring
        .ok_or_else(|| AppError::InvalidParameter("request body must contain a scoring section".to_string()))?;
    validate_scoring(&scoring)?;

    *state.scoring.write().await = scoring;
    info!(?scoring, "scoring configuration replaced");
    Ok(success(ConfigView { scoring }))
}

fn validate_scoring(s: &ScoringConfig) -> Result<(), AppError> {
    let w = &s.weights;
    let values = [
        w.market_size,
        w.competition,
        w.user_satisfaction,
        w.growth_trend,
        w.monetization,
        s.thresholds.min_score,
        s.recommendations.min_trend_score,
        s.recommendations.min_avg_value,
    ];
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) || !s.recommendations.min_growth_rate.is_finite() {
        return Err(AppError::InvalidParameter(
            "weights and thresholds must be finite and non-negative".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Trimmed, non-empty keywords in request order.
fn clean_keywords(raw: Vec<String>) -> Result<Vec<String>, AppError> {
    let keywords: Vec<String> = raw
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(AppError::InvalidParameter("keywords must not be empty".to_string()));
    }
    Ok(keywords)
}

/// Look a task up in memory, falling back to the last persisted snapshot.
async fn find_task<A, T>(state: &ApiState<A, T>, task_id: &str, kind: TaskKind) -> Result<TaskRecord, AppError> {
    let task = match state.tasks.get(task_id) {
        Some(t) => Some(t),
        None => repo::load_task(&state.pool, task_id)
            .await?
            .map(|t| state.tasks.restore(t)),
    };
    task.filter(|t| t.kind == kind)
        .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
}

async fn stop_task<A, T>(state: &ApiState<A, T>, task_id: &str, kind: TaskKind) -> Result<TaskRecord, AppError> {
    find_task(state, task_id, kind).await?;
    let stopped = state.tasks.request_stop(task_id)?;
    repo::save_task(&state.pool, &stopped).await?;
    info!(task_id, "stop requested");
    Ok(stopped)
}

/// Tasks known to this process, newest first.
async fn get_tasks<A, T>(State(state): State<ApiState<A, T>>) -> Json<Envelope<TaskList>> {
    let tasks = state.tasks.list();
    success(TaskList {
        total: tasks.len(),
        active: state.tasks.active_count(),
        tasks,
    })
}

async fn start_scrape<A: AppSource, T>(
    State(state): State<ApiState<A, T>>,
    Json(body): Json<ScrapeStartBody>,
) -> ApiResult<TaskStarted> {
    let keywords = clean_keywords(body.keywords)?;
    let limit = body
        .limit_per_keyword
        .unwrap_or(crate::collector::apps::DEFAULT_LIMIT_PER_KEYWORD);
    if !(1..=ITUNES_MAX_LIMIT).contains(&limit) {
        return Err(AppError::InvalidParameter(format!(
            "limit_per_keyword must be between 1 and {ITUNES_MAX_LIMIT}"
        )));
    }

    let task = state.tasks.create(
        TaskKind::AppScrape,
        TaskParams {
            keywords,
            limit_per_keyword: Some(limit),
            ..Default::default()
        },
    );
    repo::save_task(&state.pool, &task).await?;

    let collector = AppScrapeCollector::new(
        Arc::clone(&state.apps),
        Arc::clone(&state.scoring),
        state.collector_context(),
    );
    let task_id = task.task_id.clone();
    tokio::spawn(async move { collector.run(task_id).await });

    info!(task_id = %task.task_id, keywords = task.params.keywords.len(), "app scrape queued");
    Ok(success(TaskStarted {
        task_id: task.task_id,
        status: task.status.to_string(),
    }))
}

async fn get_scrape_status<A, T>(
    State(state): State<ApiState<A, T>>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskRecord> {
    Ok(success(find_task(&state, &task_id, TaskKind::AppScrape).await?))
}

async fn stop_scrape<A, T>(
    State(state): State<ApiState<A, T>>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskRecord> {
    Ok(success(stop_task(&state, &task_id, TaskKind::AppScrape).await?))
}

async fn start_trends<A, T: TrendSource>(
    State(state): State<ApiState<A, T>>,
    Json(body): Json<TrendStartBody>,
) -> ApiResult<TaskStarted> {
    let keywords = clean_keywords(body.keywords)?;
    let platforms = body
        .platforms
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| vec![PLATFORM_GOOGLE_TRENDS.to_string()]);
    let timeframe = body
        .timeframe
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());

    let task = state.tasks.create(
        TaskKind::TrendCollection,
        TaskParams {
            keywords,
            platforms,
            timeframe: Some(timeframe),
            limit_per_keyword: None,
        },
    );
    repo::save_task(&state.pool, &task).await?;

    let collector = TrendCollector::new(Arc::clone(&state.trends), state.collector_context());
    let task_id = task.task_id.clone();
    tokio::spawn(async move { collector.run(task_id).await });

    info!(task_id = %task.task_id, keywords = task.params.keywords.len(), "trend collection queued");
    Ok(success(TaskStarted {
        task_id: task.task_id,
        status: task.status.to_string(),
    }))
}

async fn get_trend_status<A, T>(
    State(state): State<ApiState<A, T>>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskRecord> {
    Ok(success(find_task(&state, &task_id, TaskKind::TrendCollection).await?))
}

async fn stop_trends<A, T>(
    State(state): State<ApiState<A, T>>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskRecord> {
    Ok(success(stop_task(&state, &task_id, TaskKind::TrendCollection).await?))
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

async fn get_opportunities<A, T>(
    State(state): State<ApiState<A, T>>,
    Query(params): Query<OpportunitiesQuery>,
) -> ApiResult<OpportunityPage> {
    let sort = match params.sort_by.as_deref() {
        None => SortField::default(),
        Some(s) => SortField::parse(s)
            .ok_or_else(|| AppError::InvalidParameter(format!("unsupported sort_by: {s}")))?,
    };
    let order = match params.order.as_deref() {
        None => SortOrder::default(),
        Some(s) => SortOrder::parse(s)
            .ok_or_else(|| AppError::InvalidParameter(format!("order must be asc or desc, got {s}")))?,
    };
    let page = Page {
        page: params.page.unwrap_or(1).max(1),
        per_page: params.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
    };
    let filter = OpportunityFilter {
        min_score: params.min_score,
        max_score: params.max_score,
        category: params.category.filter(|c| !c.is_empty()),
        search: params.search.filter(|s| !s.is_empty()),
    };

    let total = repo::count_opportunities(&state.pool, &filter).await?;
    let opportunities = repo::list_opportunities(&state.pool, &filter, sort, order, Some(page)).await?;
    let per_page = i64::from(page.per_page);

    Ok(success(OpportunityPage {
        opportunities,
        pagination: Pagination {
            page: page.page,
            per_page: page.per_page,
            total,
            pages: (total + per_page - 1) / per_page,
        },
    }))
}

async fn get_opportunity_detail<A, T>(
    State(state): State<ApiState<A, T>>,
    Path(app_id): Path<String>,
) -> ApiResult<OpportunityDetail> {
    let opportunity = repo::get_opportunity(&state.pool, &app_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("opportunity {app_id}")))?;

    let raw = repo::latest_raw_app(&state.pool, &app_id).await?;
    let weights = state.scoring.read().await.weights;
    let scoring_details = raw
        .as_ref()
        .map(|r| scorer::score(&parse_itunes_app(r), &weights, Utc::now()));

    Ok(success(OpportunityDetail {
        opportunity,
        details: raw.as_ref().map(AppDetails::from_itunes),
        scoring_details,
    }))
}

async fn export_opportunities<A, T>(
    State(state): State<ApiState<A, T>>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let rows = match &params.app_id {
        Some(app_id) => vec![repo::get_opportunity(&state.pool, app_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("opportunity {app_id}")))?],
        None => {
            let filter = OpportunityFilter {
                min_score: params.min_score,
                max_score: params.max_score,
                category: params.category.filter(|c| !c.is_empty()),
                search: params.search.filter(|s| !s.is_empty()),
            };
            repo::list_opportunities(&state.pool, &filter, SortField::OpportunityScore, SortOrder::Desc, None)
                .await?
        }
    };

    match params.format.as_deref().unwrap_or("csv") {
        "csv" => {
            if rows.is_empty() {
                return Err(AppError::InvalidParameter("no opportunities to export".to_string()));
            }
            let body = opportunities_csv(&rows)?;
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=opportunities.csv"),
                ],
                body,
            )
                .into_response())
        }
        "json" => Ok(success(rows).into_response()),
        other => Err(AppError::InvalidParameter(format!("unsupported export format: {other}"))),
    }
}

/// UTF-8 CSV with a byte-order mark so spreadsheet tools detect the encoding.
fn opportunities_csv(rows: &[OpportunityRow]) -> Result<Vec<u8>, AppError> {
    let mut out = "\u{feff}".as_bytes().to_vec();
    {
        let mut w = csv::Writer::from_writer(&mut out);
        for row in rows {
            w.serialize(row)?;
        }
        w.flush()?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

async fn get_trends<A, T>(
    State(state): State<ApiState<A, T>>,
    Query(params): Query<TrendsQuery>,
) -> ApiResult<TrendList> {
    let filter = TrendFilter {
        keyword: params.keyword,
        platform: params.platform,
        start_date: params.start_date,
        end_date: params.end_date,
    };
    let trends: Vec<TrendPointView> = repo::trend_points(&state.pool, &filter)
        .await?
        .into_iter()
        .map(TrendPointView::from)
        .collect();
    let total = trends.len();
    Ok(success(TrendList { trends, total }))
}

async fn get_trend_keywords<A, T>(State(state): State<ApiState<A, T>>) -> ApiResult<KeywordList> {
    Ok(success(KeywordList {
        keywords: repo::trend_keywords(&state.pool).await?,
    }))
}

async fn analyze_keyword<A, T>(
    State(state): State<ApiState<A, T>>,
    Path(keyword): Path<String>,
    Query(params): Query<PlatformQuery>,
) -> ApiResult<KeywordAnalysis> {
    let platform = platform_or_default(params.platform);
    let series = repo::load_series(&state.pool, &keyword, &platform).await?;
    if series.points.is_empty() {
        return Err(AppError::NoData(format!(
            "no data for keyword \"{keyword}\" on platform \"{platform}\""
        )));
    }

    let data_points = series.points.len();
    Ok(success(KeywordAnalysis {
        analysis: with_score(analyzer::analyze_trend_growth(&series)),
        summary: analyzer::trend_summary(&series),
        data_points,
    }))
}

async fn compare_trends<A, T>(
    State(state): State<ApiState<A, T>>,
    Json(body): Json<CompareBody>,
) -> ApiResult<Comparison> {
    let platform = platform_or_default(body.platform);
    let mut available: Vec<TrendSeries> = Vec::new();
    if body.keywords.len() >= 2 {
        for keyword in &body.keywords {
            let series = repo::load_series(&state.pool, keyword, &platform).await?;
            if !series.points.is_empty() {
                available.push(series);
            }
        }
    }

    let comparison = analyzer::compare_keywords(&body.keywords, &available)?
        .into_iter()
        .map(with_score)
        .collect();
    Ok(success(Comparison {
        comparison,
        keywords: body.keywords,
        platform,
    }))
}

async fn get_hot_keywords<A, T>(
    State(state): State<ApiState<A, T>>,
    Query(params): Query<HotQuery>,
) -> ApiResult<HotKeywords> {
    let platform = platform_or_default(params.platform);
    let min_growth_rate = params.min_growth_rate.unwrap_or(DEFAULT_HOT_GROWTH_RATE);
    let analyses = analyze_all(&state, &platform).await?;
    let hot_keywords = analyzer::identify_hot_keywords(&analyses, min_growth_rate);
    let total = hot_keywords.len();
    Ok(success(HotKeywords { hot_keywords, total }))
}

async fn get_recommendations<A, T>(
    State(state): State<ApiState<A, T>>,
    Query(params): Query<RecommendationsQuery>,
) -> ApiResult<Recommendations> {
    let platform = platform_or_default(params.platform);
    let defaults = state.scoring.read().await.recommendations;
    let thresholds = RecommendationThresholds {
        min_trend_score: params.min_trend_score.unwrap_or(defaults.min_trend_score),
        min_growth_rate: params.min_growth_rate.unwrap_or(defaults.min_growth_rate),
        min_avg_value: params.min_avg_value.unwrap_or(defaults.min_avg_value),
    };

    let candidates: Vec<ScoredTrend> = analyze_all(&state, &platform)
        .await?
        .into_iter()
        .map(with_score)
        .collect();
    let mut recommendations = recommend(&candidates, &thresholds);
    if let Some(limit) = params.limit {
        recommendations.truncate(limit);
    }
    let total = recommendations.len();
    Ok(success(Recommendations {
        recommendations,
        total,
        thresholds,
    }))
}

/// Analyse every stored keyword that has points on `platform`.
async fn analyze_all<A, T>(state: &ApiState<A, T>, platform: &str) -> Result<Vec<TrendAnalysis>, AppError> {
    let mut analyses = Vec::new();
    for keyword in repo::trend_keywords(&state.pool).await? {
        let series = repo::load_series(&state.pool, &keyword, platform).await?;
        if !series.points.is_empty() {
            analyses.push(analyzer::analyze_trend_growth(&series));
        }
    }
    Ok(analyses)
}

fn platform_or_default(platform: Option<String>) -> String {
    platform
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| PLATFORM_GOOGLE_TRENDS.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::collector::testing::{FakeApps, FakeTrends};
    use crate::state::TaskStatus;
    use crate::types::{Opportunity, TrendPoint};

    async fn state() -> ApiState<FakeApps, FakeTrends> {
        ApiState {
            pool: crate::db::memory_pool().await,
            tasks: TaskStore::new(),
            scoring: Arc::new(RwLock::new(ScoringConfig::default())),
            apps: Arc::new(FakeApps { by_term: HashMap::new() }),
            trends: Arc::new(FakeTrends::new(&[("budget", &[10.0, 20.0, 30.0])])),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            request_delay: Duration::ZERO,
        }
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call_json(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let (status, bytes) = call(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn opp(app_id: &str, name: &str, category: &str, score: f64) -> Opportunity {
        Opportunity {
            app_id: app_id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            rating: 3.1,
            review_count: 25_000,
            price: 0.0,
            opportunity_score: score,
            url: String::new(),
        }
    }

    /// `n` daily points from 2024-01-01 produced by `f(i)`.
    fn daily(n: usize, f: impl Fn(usize) -> f64) -> Vec<TrendPoint> {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| TrendPoint {
                date: (start + chrono::Duration::days(i as i64)).format("%Y-%m-%d").to_string(),
                value: f(i),
            })
            .collect()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router(state().await);
        let (status, body) = call_json(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["database"], "ok");
        assert_eq!(body["data"]["active_tasks"], 0);
    }

    #[tokio::test]
    async fn stats_counts_and_top_categories() {
        let s = state().await;
        repo::save_opportunities(
            &s.pool,
            &[opp("1", "a", "Finance", 0.7), opp("2", "b", "Finance", 0.8), opp("3", "c", "Games", 0.9)],
        )
        .await
        .unwrap();
        let (status, body) = call_json(router(s), "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_opportunities"], 3);
        assert_eq!(body["data"]["top_categories"][0]["category"], "Finance");
        assert_eq!(body["data"]["top_categories"][0]["count"], 2);
    }

    #[tokio::test]
    async fn opportunities_paginate_and_validate_sort() {
        let s = state().await;
        let rows: Vec<Opportunity> = (0..5)
            .map(|i| opp(&i.to_string(), &format!("App {i}"), "Utilities", 0.6 + i as f64 * 0.05))
            .collect();
        repo::save_opportunities(&s.pool, &rows).await.unwrap();
        let app = router(s);

        let (status, body) = call_json(app.clone(), "GET", "/opportunities?page=2&per_page=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["pagination"]["total"], 5);
        assert_eq!(body["data"]["pagination"]["pages"], 3);
        assert_eq!(body["data"]["opportunities"][0]["app_id"], "2");

        let (status, body) = call_json(app, "GET", "/opportunities?sort_by=drop_table", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_PARAMETER");
    }

    #[tokio::test]
    async fn opportunity_detail_recomputes_scoring() {
        let s = state().await;
        repo::save_opportunities(&s.pool, &[opp("77", "Planner", "Productivity", 0.7)])
            .await
            .unwrap();
        let raw = serde_json::json!({
            "trackId": 77,
            "trackName": "Planner",
            "averageUserRating": 3.1,
            "userRatingCount": 25_000,
            "price": 0.0,
            "version": "2.0",
            "bundleId": "com.example.planner"
        });
        let fetched = crate::types::FetchedApp { record: parse_itunes_app(&raw), raw };
        repo::save_raw_apps(&s.pool, &[fetched], "itunes_search").await.unwrap();
        let app = router(s);

        let (status, body) = call_json(app.clone(), "GET", "/opportunities/77", None).await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["name"], "Planner");
        assert_eq!(data["current_version"], "2.0");
        assert_eq!(data["bundle_id"], "com.example.planner");
        assert_eq!(data["scoring_details"]["app_id"], "77");
        assert_eq!(data["scoring_details"]["monetization"], 0.5);

        let (status, body) = call_json(app, "GET", "/opportunities/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn export_csv_has_bom_and_header() {
        let s = state().await;
        let app = router(s.clone());
        let (status, _) = call(app.clone(), "GET", "/opportunities/export?format=csv", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        repo::save_opportunities(&s.pool, &[opp("1", "Budget, Pro", "Finance", 0.8)])
            .await
            .unwrap();
        let (status, bytes) = call(app.clone(), "GET", "/opportunities/export", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with('\u{feff}'));
        let mut lines = text.trim_start_matches('\u{feff}').lines();
        assert!(lines.next().unwrap().starts_with("id,app_id,name,category"));
        assert!(lines.next().unwrap().contains("\"Budget, Pro\""));

        let (status, body) = call_json(app, "GET", "/opportunities/export?format=json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["app_id"], "1");
    }

    #[tokio::test]
    async fn config_round_trip_and_validation() {
        let s = state().await;
        let app = router(s.clone());
        let update = serde_json::json!({"scoring": {"thresholds": {"min_score": 0.75, "min_reviews": 50}}});
        let (status, _) = call_json(app.clone(), "POST", "/config", Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(s.scoring.read().await.thresholds.min_reviews, 50);

        let (_, body) = call_json(app.clone(), "GET", "/config", None).await;
        assert_eq!(body["data"]["scoring"]["thresholds"]["min_score"], 0.75);

        let bad = serde_json::json!({"scoring": {"weights": {"market_size": -1.0}}});
        let (status, _) = call_json(app, "POST", "/config", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trend_task_lifecycle_over_http() {
        let s = state().await;
        let app = router(s.clone());

        let (status, body) = call_json(app.clone(), "POST", "/trends/start", Some(serde_json::json!({"keywords": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_PARAMETER");

        let (status, body) = call_json(
            app.clone(),
            "POST",
            "/trends/start",
            Some(serde_json::json!({"keywords": ["budget"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let task_id = body["data"]["task_id"].as_str().unwrap().to_string();
        assert!(task_id.starts_with("trend_"));

        for _ in 0..100 {
            if s.tasks.get(&task_id).is_some_and(|t| t.status.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (status, body) = call_json(app.clone(), "GET", &format!("/trends/status/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["results"]["trends_saved"], 3);

        let (status, body) = call_json(app.clone(), "POST", &format!("/trends/stop/{task_id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "INVALID_STATE");

        let (status, body) = call_json(app.clone(), "GET", &format!("/scrape/status/{task_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "TASK_NOT_FOUND");

        let (status, _) = call_json(app, "GET", "/trends/status/trend_nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn task_list_newest_first() {
        let s = state().await;
        let first = s.tasks.create(TaskKind::AppScrape, TaskParams::default());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = s.tasks.create(TaskKind::TrendCollection, TaskParams::default());
        s.tasks.request_stop(&first.task_id).unwrap();

        let (status, body) = call_json(router(s), "GET", "/tasks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["active"], 1);
        assert_eq!(body["data"]["tasks"][0]["task_id"], second.task_id.as_str());
        assert_eq!(body["data"]["tasks"][1]["status"], "stopped");
    }

    #[tokio::test]
    async fn status_falls_back_to_database() {
        let s = state().await;
        let other_process = TaskStore::new();
        let task = other_process.create(TaskKind::AppScrape, TaskParams::default());
        other_process.transition(&task.task_id, TaskStatus::Running).unwrap();
        let done = other_process
            .complete(&task.task_id, serde_json::json!({"apps_collected": 4}))
            .unwrap();
        repo::save_task(&s.pool, &done).await.unwrap();

        let (status, body) = call_json(router(s.clone()), "GET", &format!("/scrape/status/{}", task.task_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["results"]["apps_collected"], 4);
        assert!(s.tasks.get(&task.task_id).is_some());
    }

    #[tokio::test]
    async fn stop_pending_scrape() {
        let s = state().await;
        let task = s.tasks.create(TaskKind::AppScrape, TaskParams::default());
        let (status, body) = call_json(router(s.clone()), "POST", &format!("/scrape/stop/{}", task.task_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "stopped");
        let persisted = repo::load_task(&s.pool, &task.task_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, TaskStatus::Stopped);
    }

    #[tokio::test]
    async fn analyze_compare_hot_and_recommend() {
        let s = state().await;
        let meta = serde_json::json!({});
        // 30 points at 40 then 30 at 60: +50% growth, moderate volatility.
        let rising = daily(60, |i| if i < 30 { 40.0 } else { 60.0 });
        let flat = daily(60, |_| 50.0);
        repo::save_trend_batch(&s.pool, "budget app", "google_trends", &rising, &meta).await.unwrap();
        repo::save_trend_batch(&s.pool, "notes", "google_trends", &flat, &meta).await.unwrap();
        let app = router(s);

        let (status, body) = call_json(app.clone(), "GET", "/trends/analyze/budget%20app", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["data_points"], 60);
        assert_eq!(body["data"]["analysis"]["trend"], "rising");
        assert_eq!(body["data"]["summary"]["period"]["start"], "2024-01-01T00:00:00");

        let (status, body) = call_json(app.clone(), "GET", "/trends/analyze/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NO_DATA");

        let (status, _) = call_json(
            app.clone(),
            "POST",
            "/trends/compare",
            Some(serde_json::json!({"keywords": ["budget app"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call_json(
            app.clone(),
            "POST",
            "/trends/compare",
            Some(serde_json::json!({"keywords": ["notes", "missing", "budget app"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["comparison"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["comparison"][0]["keyword"], "notes");

        let (status, body) = call_json(
            app.clone(),
            "POST",
            "/trends/compare",
            Some(serde_json::json!({"keywords": ["x", "y"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NO_DATA");

        let (_, body) = call_json(app.clone(), "GET", "/trends/hot", None).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["hot_keywords"][0]["keyword"], "budget app");

        let (_, body) = call_json(app.clone(), "GET", "/trends/keywords", None).await;
        assert_eq!(body["data"]["keywords"], serde_json::json!(["budget app", "notes"]));

        let (_, body) = call_json(app.clone(), "GET", "/trends?keyword=notes", None).await;
        assert_eq!(body["data"]["total"], 60);

        let (status, body) = call_json(app, "GET", "/trends/recommendations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["recommendations"][0]["keyword"], "budget app");
        assert_eq!(body["data"]["thresholds"]["min_growth_rate"], 15.0);
    }
}
