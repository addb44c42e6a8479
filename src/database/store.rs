use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use rust_decimal::Decimal;

use crate::{
    crawler::mops::{
        disclosure::{DisclosureReport, DisclosureRow},
        dividend::Dividend,
        pledge::Pledge,
        revenue::Revenue,
    },
    database::{table, PostgresSQL},
    declare::{RevenueScope, StockPeriod},
    error::Result,
    util::map::Keyable,
    xbrl::statement::FinancialStatement,
};

/// 報表與採集資料的存取介面 (C9)。
///
/// 每次寫入為一個交易，同鍵覆寫採後寫為準，fetched_at 一律更新。
/// 測試以 [`MemoryStore`] 代換。
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_report(&self, key: &StockPeriod) -> Result<Option<FinancialStatement>>;

    async fn save_report(&self, statement: &FinancialStatement) -> Result<()>;

    async fn get_revenue(
        &self,
        scope: &RevenueScope,
        year: i32,
        month: u32,
    ) -> Result<Vec<Revenue>>;

    async fn save_revenue(&self, rows: &[Revenue]) -> Result<()>;

    async fn get_pledges(&self, stock_id: &str, year: i32, month: u32) -> Result<Vec<Pledge>>;

    async fn save_pledges(&self, rows: &[Pledge]) -> Result<()>;

    async fn get_dividends(
        &self,
        stock_id: &str,
        year_start: i32,
        year_end: i32,
    ) -> Result<Vec<Dividend>>;

    async fn save_dividends(&self, rows: &[Dividend]) -> Result<()>;

    async fn get_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<DisclosureReport>>;

    async fn save_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
        report: &DisclosureReport,
    ) -> Result<()>;
}

/// PostgreSQL 實作。
pub struct PostgresStore {
    db: PostgresSQL,
}

impl PostgresStore {
    pub fn new(db: PostgresSQL) -> Self {
        PostgresStore { db }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_report(&self, key: &StockPeriod) -> Result<Option<FinancialStatement>> {
        table::financial_statement::fetch(self.db.pool(), key).await
    }

    async fn save_report(&self, statement: &FinancialStatement) -> Result<()> {
        let mut tx = self.db.tx().await?;
        table::financial_statement::upsert(&mut tx, statement).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_revenue(
        &self,
        scope: &RevenueScope,
        year: i32,
        month: u32,
    ) -> Result<Vec<Revenue>> {
        table::revenue::fetch(self.db.pool(), scope, year, month).await
    }

    async fn save_revenue(&self, rows: &[Revenue]) -> Result<()> {
        let mut tx = self.db.tx().await?;
        for row in rows {
            table::revenue::upsert(&mut tx, row).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_pledges(&self, stock_id: &str, year: i32, month: u32) -> Result<Vec<Pledge>> {
        table::stock_pledge::fetch(self.db.pool(), stock_id, year, month).await
    }

    async fn save_pledges(&self, rows: &[Pledge]) -> Result<()> {
        let mut tx = self.db.tx().await?;
        for row in rows {
            table::stock_pledge::upsert(&mut tx, row).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_dividends(
        &self,
        stock_id: &str,
        year_start: i32,
        year_end: i32,
    ) -> Result<Vec<Dividend>> {
        table::dividend::fetch(self.db.pool(), stock_id, year_start, year_end).await
    }

    async fn save_dividends(&self, rows: &[Dividend]) -> Result<()> {
        let mut tx = self.db.tx().await?;
        for row in rows {
            table::dividend::upsert(&mut tx, row).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<DisclosureReport>> {
        table::disclosure::fetch(self.db.pool(), stock_id, year, month).await
    }

    async fn save_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
        report: &DisclosureReport,
    ) -> Result<()> {
        let mut tx = self.db.tx().await?;
        for row in &report.rows {
            table::disclosure::upsert_row(&mut tx, row).await?;
        }
        table::disclosure::upsert_summary(&mut tx, stock_id, year, month, report.cross_company)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// 記憶體實作，測試與情境驗證用。
#[derive(Default)]
pub struct MemoryStore {
    reports: Mutex<HashMap<String, (FinancialStatement, DateTime<Local>)>>,
    revenues: Mutex<HashMap<String, Revenue>>,
    pledges: Mutex<HashMap<String, Pledge>>,
    dividends: Mutex<HashMap<String, Dividend>>,
    disclosure_rows: Mutex<HashMap<String, DisclosureRow>>,
    disclosure_summaries: Mutex<HashMap<String, Option<Decimal>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 測試檢視：報表的 fetched_at
    pub fn report_fetched_at(&self, key: &StockPeriod) -> Option<DateTime<Local>> {
        self.reports
            .lock()
            .unwrap()
            .get(&key.key())
            .map(|(_, fetched_at)| *fetched_at)
    }

    fn disclosure_scope_key(stock_id: &str, year: i32, month: u32) -> String {
        format!("{}-{}-{}", stock_id, year, month)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_report(&self, key: &StockPeriod) -> Result<Option<FinancialStatement>> {
        Ok(self
            .reports
            .lock()
            .unwrap()
            .get(&key.key())
            .map(|(statement, _)| statement.clone()))
    }

    async fn save_report(&self, statement: &FinancialStatement) -> Result<()> {
        let key = StockPeriod::new(
            &statement.stock_id,
            statement.year,
            statement.quarter,
            statement.report_type,
        );
        self.reports
            .lock()
            .unwrap()
            .insert(key.key(), (statement.clone(), Local::now()));
        Ok(())
    }

    async fn get_revenue(
        &self,
        scope: &RevenueScope,
        year: i32,
        month: u32,
    ) -> Result<Vec<Revenue>> {
        let revenues = self.revenues.lock().unwrap();
        let mut rows: Vec<Revenue> = revenues
            .values()
            .filter(|r| {
                r.year == year
                    && r.month == month
                    && match scope {
                        RevenueScope::Stock(stock_id) => r.stock_id == *stock_id,
                        RevenueScope::Market(market) => r.market == *market,
                    }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
        Ok(rows)
    }

    async fn save_revenue(&self, rows: &[Revenue]) -> Result<()> {
        let mut revenues = self.revenues.lock().unwrap();
        for row in rows {
            revenues.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn get_pledges(&self, stock_id: &str, year: i32, month: u32) -> Result<Vec<Pledge>> {
        let pledges = self.pledges.lock().unwrap();
        let mut rows: Vec<Pledge> = pledges
            .values()
            .filter(|p| p.stock_id == stock_id && p.year == year && p.month == month)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn save_pledges(&self, rows: &[Pledge]) -> Result<()> {
        let mut pledges = self.pledges.lock().unwrap();
        for row in rows {
            pledges.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn get_dividends(
        &self,
        stock_id: &str,
        year_start: i32,
        year_end: i32,
    ) -> Result<Vec<Dividend>> {
        let dividends = self.dividends.lock().unwrap();
        let mut rows: Vec<Dividend> = dividends
            .values()
            .filter(|d| d.stock_id == stock_id && d.year >= year_start && d.year <= year_end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn save_dividends(&self, rows: &[Dividend]) -> Result<()> {
        let mut dividends = self.dividends.lock().unwrap();
        for row in rows {
            dividends.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn get_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<DisclosureReport>> {
        let disclosure_rows = self.disclosure_rows.lock().unwrap();
        let mut rows: Vec<DisclosureRow> = disclosure_rows
            .values()
            .filter(|r| r.stock_id == stock_id && r.year == year && r.month == month)
            .cloned()
            .collect();

        if rows.is_empty() {
            return Ok(None);
        }
        rows.sort_by(|a, b| a.key().cmp(&b.key()));

        let cross_company = self
            .disclosure_summaries
            .lock()
            .unwrap()
            .get(&Self::disclosure_scope_key(stock_id, year, month))
            .copied()
            .flatten();

        Ok(Some(DisclosureReport {
            rows,
            cross_company,
        }))
    }

    async fn save_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
        report: &DisclosureReport,
    ) -> Result<()> {
        let mut disclosure_rows = self.disclosure_rows.lock().unwrap();
        for row in &report.rows {
            disclosure_rows.insert(row.key(), row.clone());
        }
        drop(disclosure_rows);

        self.disclosure_summaries.lock().unwrap().insert(
            Self::disclosure_scope_key(stock_id, year, month),
            report.cross_company,
        );
        Ok(())
    }
}
