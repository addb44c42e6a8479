use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::{
    crawler::mops::disclosure::{DisclosureCategory, DisclosureReport, DisclosureRow},
    error::{Error, Result},
};

pub async fn fetch(
    pool: &PgPool,
    stock_id: &str,
    year: i32,
    month: u32,
) -> Result<Option<DisclosureReport>> {
    let sql = r#"
SELECT
    stock_id, "year", "month", category, entity, has_balance,
    current_month, previous_month, max_limit, accumulated_balance
FROM
    disclosure
WHERE
    stock_id = $1 AND "year" = $2 AND "month" = $3
ORDER BY category, entity;
"#;

    let rows: Vec<DisclosureRow> = sqlx::query(sql)
        .bind(stock_id)
        .bind(year)
        .bind(month as i32)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(from_row)
        .collect::<Result<_>>()?;

    if rows.is_empty() {
        return Ok(None);
    }

    let cross_company = fetch_cross_company(pool, stock_id, year, month).await?;

    Ok(Some(DisclosureReport {
        rows,
        cross_company,
    }))
}

async fn fetch_cross_company(
    pool: &PgPool,
    stock_id: &str,
    year: i32,
    month: u32,
) -> Result<Option<Decimal>> {
    let sql = r#"
SELECT cross_company
FROM disclosure_summary
WHERE stock_id = $1 AND "year" = $2 AND "month" = $3;
"#;

    let row = sqlx::query(sql)
        .bind(stock_id)
        .bind(year)
        .bind(month as i32)
        .fetch_optional(pool)
        .await?;

    Ok(row
        .map(|r| r.try_get::<Option<Decimal>, _>("cross_company"))
        .transpose()?
        .flatten())
}

fn from_row(row: PgRow) -> Result<DisclosureRow> {
    let month: i32 = row.try_get("month")?;
    let category: String = row.try_get("category")?;

    Ok(DisclosureRow {
        stock_id: row.try_get("stock_id")?,
        year: row.try_get("year")?,
        month: month as u32,
        category: DisclosureCategory::from_str(&category)
            .map_err(|_| Error::Other(format!("bad category in store: {}", category)))?,
        entity: row.try_get("entity")?,
        has_balance: row.try_get("has_balance")?,
        current_month: row.try_get("current_month")?,
        previous_month: row.try_get("previous_month")?,
        max_limit: row.try_get("max_limit")?,
        accumulated_balance: row.try_get("accumulated_balance")?,
    })
}

pub async fn upsert_row(tx: &mut Transaction<'_, Postgres>, row: &DisclosureRow) -> Result<()> {
    let sql = r#"
INSERT INTO disclosure (
    stock_id, "year", "month", category, entity, has_balance,
    current_month, previous_month, max_limit, accumulated_balance, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
ON CONFLICT (stock_id, "year", "month", category, entity) DO UPDATE SET
    has_balance = EXCLUDED.has_balance,
    current_month = EXCLUDED.current_month,
    previous_month = EXCLUDED.previous_month,
    max_limit = EXCLUDED.max_limit,
    accumulated_balance = EXCLUDED.accumulated_balance,
    fetched_at = now();
"#;

    sqlx::query(sql)
        .bind(&row.stock_id)
        .bind(row.year)
        .bind(row.month as i32)
        .bind(row.category.to_string())
        .bind(&row.entity)
        .bind(row.has_balance)
        .bind(row.current_month)
        .bind(row.previous_month)
        .bind(row.max_limit)
        .bind(row.accumulated_balance)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn upsert_summary(
    tx: &mut Transaction<'_, Postgres>,
    stock_id: &str,
    year: i32,
    month: u32,
    cross_company: Option<Decimal>,
) -> Result<()> {
    let sql = r#"
INSERT INTO disclosure_summary (stock_id, "year", "month", cross_company, fetched_at)
VALUES ($1, $2, $3, $4, now())
ON CONFLICT (stock_id, "year", "month") DO UPDATE SET
    cross_company = EXCLUDED.cross_company,
    fetched_at = now();
"#;

    sqlx::query(sql)
        .bind(stock_id)
        .bind(year)
        .bind(month as i32)
        .bind(cross_company)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
