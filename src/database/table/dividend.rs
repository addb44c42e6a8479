use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::{crawler::mops::dividend::Dividend, error::Result};

pub async fn fetch(
    pool: &PgPool,
    stock_id: &str,
    year_start: i32,
    year_end: i32,
) -> Result<Vec<Dividend>> {
    let sql = r#"
SELECT
    stock_id, "year", quarter, cash_dividend, stock_dividend, board_resolution_date
FROM
    dividend
WHERE
    stock_id = $1 AND "year" BETWEEN $2 AND $3
ORDER BY "year", quarter NULLS FIRST;
"#;

    sqlx::query(sql)
        .bind(stock_id)
        .bind(year_start)
        .bind(year_end)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

fn from_row(row: PgRow) -> Result<Dividend> {
    let quarter: Option<i32> = row.try_get("quarter")?;

    Ok(Dividend {
        stock_id: row.try_get("stock_id")?,
        year: row.try_get("year")?,
        quarter: quarter.map(|q| q as u32),
        cash_dividend: row.try_get("cash_dividend")?,
        stock_dividend: row.try_get("stock_dividend")?,
        board_resolution_date: row.try_get("board_resolution_date")?,
    })
}

pub async fn upsert(tx: &mut Transaction<'_, Postgres>, row: &Dividend) -> Result<()> {
    // quarter 以 0 代表全年度，避免 NULL 鍵使唯一約束失效
    let sql = r#"
INSERT INTO dividend (
    stock_id, "year", quarter, quarter_key, cash_dividend, stock_dividend,
    board_resolution_date, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, now())
ON CONFLICT (stock_id, "year", quarter_key) DO UPDATE SET
    cash_dividend = EXCLUDED.cash_dividend,
    stock_dividend = EXCLUDED.stock_dividend,
    board_resolution_date = EXCLUDED.board_resolution_date,
    fetched_at = now();
"#;

    sqlx::query(sql)
        .bind(&row.stock_id)
        .bind(row.year)
        .bind(row.quarter.map(|q| q as i32))
        .bind(row.quarter.unwrap_or(0) as i32)
        .bind(row.cash_dividend)
        .bind(row.stock_dividend)
        .bind(row.board_resolution_date)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
