use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::{
    declare::{Quarter, ReportType, StockPeriod},
    error::{Error, Result},
    xbrl::statement::{FinancialStatement, StatementItem},
};

/// 以主鍵取回報表，items 欄以 JSONB 還原為樹。
pub async fn fetch(pool: &PgPool, key: &StockPeriod) -> Result<Option<FinancialStatement>> {
    let sql = r#"
SELECT
    stock_id, "year", quarter, report_type, currency, unit_scale,
    report_date, is_empty, items
FROM
    financial_statement
WHERE
    stock_id = $1 AND "year" = $2 AND quarter = $3 AND report_type = $4;
"#;

    let row = sqlx::query(sql)
        .bind(&key.stock_id)
        .bind(key.year)
        .bind(key.quarter.serial() as i32)
        .bind(key.report_type.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(from_row).transpose()
}

fn from_row(row: PgRow) -> Result<FinancialStatement> {
    let quarter: i32 = row.try_get("quarter")?;
    let report_type: String = row.try_get("report_type")?;
    let items: serde_json::Value = row.try_get("items")?;

    Ok(FinancialStatement {
        stock_id: row.try_get("stock_id")?,
        year: row.try_get("year")?,
        quarter: Quarter::from_serial(quarter as u32)
            .ok_or_else(|| Error::Other(format!("bad quarter in store: {}", quarter)))?,
        report_type: report_type
            .parse::<ReportType>()
            .map_err(|_| Error::Other(format!("bad report_type in store: {}", report_type)))?,
        currency: row.try_get("currency")?,
        unit_scale: row.try_get("unit_scale")?,
        report_date: row.try_get("report_date")?,
        empty: row.try_get("is_empty")?,
        items: serde_json::from_value::<Vec<StatementItem>>(items)
            .map_err(|why| Error::Other(format!("bad items in store: {}", why)))?,
    })
}

/// 以主鍵整筆覆寫，fetched_at 一律刷新。
pub async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    statement: &FinancialStatement,
) -> Result<()> {
    let sql = r#"
INSERT INTO financial_statement (
    stock_id, "year", quarter, report_type, currency, unit_scale,
    report_date, is_empty, items, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
ON CONFLICT (stock_id, "year", quarter, report_type) DO UPDATE SET
    currency = EXCLUDED.currency,
    unit_scale = EXCLUDED.unit_scale,
    report_date = EXCLUDED.report_date,
    is_empty = EXCLUDED.is_empty,
    items = EXCLUDED.items,
    fetched_at = now();
"#;

    let items = serde_json::to_value(&statement.items)
        .map_err(|why| Error::Other(format!("Failed to serialize items: {}", why)))?;

    sqlx::query(sql)
        .bind(&statement.stock_id)
        .bind(statement.year)
        .bind(statement.quarter.serial() as i32)
        .bind(statement.report_type.to_string())
        .bind(&statement.currency)
        .bind(statement.unit_scale)
        .bind(statement.report_date)
        .bind(statement.empty)
        .bind(items)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
