//! REST 路由層 (協作層，非核心)。
//!
//! 錯誤轉換：NotFound → 404、MalformedPackage/Parse → 502 (上游資料無效)、
//! 重試後仍失敗的 TransientFetch → 503，其餘 → 500。

use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    crawler::mops::dividend::QueryType,
    declare::{Market, Quarter, ReportType, RevenueScope},
    error::Error,
    service::Mops,
};

pub fn router(service: Arc<Mops>) -> Router {
    Router::new()
        .route(
            "/financial_statement/{report_type}/{stock_id}",
            get(financial_statement),
        )
        .route("/revenue", get(monthly_revenue))
        .route("/share_pledging/{stock_id}", get(share_pledging))
        .route("/dividend/{stock_id}", get(dividend))
        .route("/disclosure/{stock_id}", get(disclosure))
        .route("/xbrl/{stock_id}", get(xbrl_zip))
        .with_state(service)
}

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn status_of(why: &Error) -> StatusCode {
    match why {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::MalformedPackage(_) | Error::Parse(_) => StatusCode::BAD_GATEWAY,
        Error::TransientFetch(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Shared(inner) => status_of(inner),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct StatementQuery {
    year: i32,
    quarter: u32,
    #[serde(default)]
    force_refresh: bool,
}

async fn financial_statement(
    State(service): State<Arc<Mops>>,
    Path((report_type, stock_id)): Path<(String, String)>,
    Query(query): Query<StatementQuery>,
) -> Response {
    let report_type = match ReportType::from_str(&report_type) {
        Ok(report_type) => report_type,
        Err(_) => return bad_request("unknown report_type"),
    };
    let quarter = match Quarter::from_serial(query.quarter) {
        Some(quarter) => quarter,
        None => return bad_request("quarter must be 1..4"),
    };

    match service
        .get_financial_statement(&stock_id, query.year, quarter, report_type, query.force_refresh)
        .await
    {
        Ok(statement) => Json(statement).into_response(),
        Err(why) => ApiError(why).into_response(),
    }
}

#[derive(Deserialize)]
struct RevenueQuery {
    stock_id: Option<String>,
    market: Option<Market>,
    year: i32,
    month: u32,
    #[serde(default)]
    force_refresh: bool,
}

async fn monthly_revenue(
    State(service): State<Arc<Mops>>,
    Query(query): Query<RevenueQuery>,
) -> Response {
    let scope = match (&query.stock_id, query.market) {
        (Some(stock_id), _) => RevenueScope::Stock(stock_id.clone()),
        (None, Some(market)) => RevenueScope::Market(market),
        (None, None) => {
            return bad_request("either stock_id or market is required")
        }
    };

    match service
        .get_monthly_revenue(scope, query.year, query.month, query.force_refresh)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(why) => ApiError(why).into_response(),
    }
}

#[derive(Deserialize)]
struct MonthQuery {
    year: i32,
    month: u32,
    #[serde(default = "default_market")]
    market: Market,
    #[serde(default)]
    force_refresh: bool,
}

fn default_market() -> Market {
    Market::Sii
}

async fn share_pledging(
    State(service): State<Arc<Mops>>,
    Path(stock_id): Path<String>,
    Query(query): Query<MonthQuery>,
) -> Response {
    match service
        .get_share_pledging(&stock_id, query.year, query.month, query.market, query.force_refresh)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(why) => ApiError(why).into_response(),
    }
}

#[derive(Deserialize)]
struct DividendQuery {
    year_start: i32,
    year_end: i32,
    #[serde(default = "default_query_type")]
    query_type: u32,
    #[serde(default)]
    force_refresh: bool,
}

fn default_query_type() -> u32 {
    1
}

async fn dividend(
    State(service): State<Arc<Mops>>,
    Path(stock_id): Path<String>,
    Query(query): Query<DividendQuery>,
) -> Response {
    let query_type = match QueryType::from_serial(query.query_type) {
        Some(query_type) => query_type,
        None => return bad_request("query_type must be 1 or 2"),
    };

    match service
        .get_dividend(
            &stock_id,
            query.year_start,
            query.year_end,
            query_type,
            query.force_refresh,
        )
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(why) => ApiError(why).into_response(),
    }
}

async fn disclosure(
    State(service): State<Arc<Mops>>,
    Path(stock_id): Path<String>,
    Query(query): Query<MonthQuery>,
) -> Response {
    match service
        .get_disclosure(&stock_id, query.year, query.month, query.market, query.force_refresh)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(why) => ApiError(why).into_response(),
    }
}

#[derive(Deserialize)]
struct ZipQuery {
    year: i32,
    quarter: u32,
}

async fn xbrl_zip(
    State(service): State<Arc<Mops>>,
    Path(stock_id): Path<String>,
    Query(query): Query<ZipQuery>,
) -> Response {
    let quarter = match Quarter::from_serial(query.quarter) {
        Some(quarter) => quarter,
        None => return bad_request("quarter must be 1..4"),
    };

    match service.download_xbrl_zip(&stock_id, query.year, quarter).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/zip")],
            bytes,
        )
            .into_response(),
        Err(why) => ApiError(why).into_response(),
    }
}
