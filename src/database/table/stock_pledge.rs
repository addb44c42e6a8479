use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::{crawler::mops::pledge::Pledge, error::Result};

pub async fn fetch(pool: &PgPool, stock_id: &str, year: i32, month: u32) -> Result<Vec<Pledge>> {
    let sql = r#"
SELECT
    stock_id, company_name, "year", "month", title, "name",
    current_shares, pledged_shares, pledge_ratio
FROM
    stock_pledge
WHERE
    stock_id = $1 AND "year" = $2 AND "month" = $3
ORDER BY title, "name";
"#;

    sqlx::query(sql)
        .bind(stock_id)
        .bind(year)
        .bind(month as i32)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

fn from_row(row: PgRow) -> Result<Pledge> {
    let month: i32 = row.try_get("month")?;

    Ok(Pledge {
        stock_id: row.try_get("stock_id")?,
        company_name: row.try_get("company_name")?,
        year: row.try_get("year")?,
        month: month as u32,
        title: row.try_get("title")?,
        name: row.try_get("name")?,
        current_shares: row.try_get("current_shares")?,
        pledged_shares: row.try_get("pledged_shares")?,
        pledge_ratio: row.try_get("pledge_ratio")?,
    })
}

pub async fn upsert(tx: &mut Transaction<'_, Postgres>, row: &Pledge) -> Result<()> {
    let sql = r#"
INSERT INTO stock_pledge (
    stock_id, company_name, "year", "month", title, "name",
    current_shares, pledged_shares, pledge_ratio, fetched_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
ON CONFLICT (stock_id, "year", "month", title, "name") DO UPDATE SET
    company_name = EXCLUDED.company_name,
    current_shares = EXCLUDED.current_shares,
    pledged_shares = EXCLUDED.pledged_shares,
    pledge_ratio = EXCLUDED.pledge_ratio,
    fetched_at = now();
"#;

    sqlx::query(sql)
        .bind(&row.stock_id)
        .bind(&row.company_name)
        .bind(row.year)
        .bind(row.month as i32)
        .bind(&row.title)
        .bind(&row.name)
        .bind(row.current_shares)
        .bind(row.pledged_shares)
        .bind(row.pledge_ratio)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
