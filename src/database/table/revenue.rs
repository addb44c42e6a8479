use std::str::FromStr;

use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::{
    crawler::mops::revenue::Revenue,
    declare::{Market, RevenueScope},
    error::{Error, Result},
};

pub async fn fetch(
    pool: &PgPool,
    scope: &RevenueScope,
    year: i32,
    month: u32,
) -> Result<Vec<Revenue>> {
    let sql_by_market = r#"
SELECT
    stock_id, company_name, "year", "month", market, revenue,
    revenue_last_month, revenue_last_year, mom_change, yoy_change,
    accumulated_revenue, accumulated_last_year, accumulated_yoy_change, comment
FROM
    monthly_revenue
WHERE
    market = $1 AND "year" = $2 AND "month" = $3
ORDER BY stock_id;
"#;
    let sql_by_stock = r#"
SELECT
    stock_id, company_name, "year", "month", market, revenue,
    revenue_last_month, revenue_last_year, mom_change, yoy_change,
    accumulated_revenue, accumulated_last_year, accumulated_yoy_change, comment
FROM
    monthly_revenue
WHERE
    stock_id = $1 AND "year" = $2 AND "month" = $3
ORDER BY market;
"#;

    let query = match scope {
        RevenueScope::Market(market) => sqlx::query(sql_by_market).bind(market.to_string()),
        RevenueScope::Stock(stock_id) => sqlx::query(sql_by_stock).bind(stock_id.clone()),
    };

    query
        .bind(year)
        .bind(month as i32)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

fn from_row(row: PgRow) -> Result<Revenue> {
    let market: String = row.try_get("market")?;
    let month: i32 = row.try_get("month")?;

    Ok(Revenue {
        stock_id: row.try_get("stock_id")?,
        company_name: row.try_get("company_name")?,
        year: row.try_get("year")?,
        month: month as u32,
        market: Market::from_str(&market)
            .map_err(|_| Error::Other(format!("bad market in store: {}", market)))?,
        revenue: row.try_get("revenue")?,
        revenue_last_month: row.try_get("revenue_last_month")?,
        revenue_last_year: row.try_get("revenue_last_year")?,
        mom_change: row.try_get("mom_change")?,
        yoy_change: row.try_get("yoy_change")?,
        accumulated_revenue: row.try_get("accumulated_revenue")?,
        accumulated_last_year: row.try_get("accumulated_last_year")?,
        accumulated_yoy_change: row.try_get("accumulated_yoy_change")?,
        comment: row.try_get("comment")?,
    })
}

pub async fn upsert(tx: &mut Transaction<'_, Postgres>, row: &Revenue) -> Result<()> {
    let sql = r#"
INSERT INTO monthly_revenue (
    stock_id, company_name, "year", "month", market, revenue,
    revenue_last_month, revenue_last_year, mom_change, yoy_change,
    accumulated_revenue, accumulated_last_year, accumulated_yoy_change,
    comment, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
ON CONFLICT (stock_id, "year", "month", market) DO UPDATE SET
    company_name = EXCLUDED.company_name,
    revenue = EXCLUDED.revenue,
    revenue_last_month = EXCLUDED.revenue_last_month,
    revenue_last_year = EXCLUDED.revenue_last_year,
    mom_change = EXCLUDED.mom_change,
    yoy_change = EXCLUDED.yoy_change,
    accumulated_revenue = EXCLUDED.accumulated_revenue,
    accumulated_last_year = EXCLUDED.accumulated_last_year,
    accumulated_yoy_change = EXCLUDED.accumulated_yoy_change,
    comment = EXCLUDED.comment,
    fetched_at = now();
"#;

    sqlx::query(sql)
        .bind(&row.stock_id)
        .bind(&row.company_name)
        .bind(row.year)
        .bind(row.month as i32)
        .bind(row.market.to_string())
        .bind(row.revenue)
        .bind(row.revenue_last_month)
        .bind(row.revenue_last_year)
        .bind(row.mom_change)
        .bind(row.yoy_change)
        .bind(row.accumulated_revenue)
        .bind(row.accumulated_last_year)
        .bind(row.accumulated_yoy_change)
        .bind(&row.comment)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
