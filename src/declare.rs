use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::util::map::Keyable;

/// 財務報表種類
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// 資產負債表
    BalanceSheet,
    /// 綜合損益表
    IncomeStatement,
    /// 現金流量表
    CashFlow,
    /// 權益變動表
    EquityStatement,
}

impl ReportType {
    /// 報表對應的 XBRL role 名稱 (role URI 的結尾段)
    pub fn role_name(&self) -> &'static str {
        match self {
            ReportType::BalanceSheet => "StatementOfFinancialPosition",
            ReportType::IncomeStatement => "StatementOfComprehensiveIncome",
            ReportType::CashFlow => "StatementOfCashFlows",
            ReportType::EquityStatement => "StatementOfChangesInEquity",
        }
    }

    /// 資產負債表取時點 (instant) 的 context，其餘報表取累計期間 (duration)
    pub fn is_instant(&self) -> bool {
        matches!(self, ReportType::BalanceSheet)
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        [
            Self::BalanceSheet,
            Self::IncomeStatement,
            Self::CashFlow,
            Self::EquityStatement,
        ]
        .iter()
        .copied()
    }
}

/// 市場別 (MOPS 的 TYPEK 參數值)
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// 上市
    Sii,
    /// 上櫃
    Otc,
}

impl Market {
    pub fn typek(&self) -> &'static str {
        match self {
            Market::Sii => "sii",
            Market::Otc => "otc",
        }
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        [Self::Sii, Self::Otc].iter().copied()
    }
}

/// 季度
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1 = 1,
    Q2 = 2,
    Q3 = 3,
    Q4 = 4,
}

impl Quarter {
    pub fn serial(&self) -> u32 {
        *self as u32
    }

    pub fn from_serial(serial: u32) -> Option<Quarter> {
        match serial {
            1 => Some(Quarter::Q1),
            2 => Some(Quarter::Q2),
            3 => Some(Quarter::Q3),
            4 => Some(Quarter::Q4),
            _ => None,
        }
    }

    /// 該季財報的結帳月份與日
    pub fn end_month_day(&self) -> (u32, u32) {
        match self {
            Quarter::Q1 => (3, 31),
            Quarter::Q2 => (6, 30),
            Quarter::Q3 => (9, 30),
            Quarter::Q4 => (12, 31),
        }
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        [Self::Q1, Self::Q2, Self::Q3, Self::Q4].iter().copied()
    }
}

/// 月營收查詢範圍：單一公司或整個市場
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevenueScope {
    Stock(String),
    Market(Market),
}

impl std::fmt::Display for RevenueScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevenueScope::Stock(stock_id) => write!(f, "stock:{}", stock_id),
            RevenueScope::Market(market) => write!(f, "market:{}", market),
        }
    }
}

/// 報表主鍵 (股號、民國年度、季度、報表種類)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockPeriod {
    pub stock_id: String,
    /// 民國年
    pub year: i32,
    pub quarter: Quarter,
    pub report_type: ReportType,
}

impl StockPeriod {
    pub fn new(stock_id: &str, year: i32, quarter: Quarter, report_type: ReportType) -> Self {
        StockPeriod {
            stock_id: stock_id.to_string(),
            year,
            quarter,
            report_type,
        }
    }
}

impl Keyable for StockPeriod {
    fn key(&self) -> String {
        format!(
            "{}-{}-Q{}-{}",
            self.stock_id,
            self.year,
            self.quarter.serial(),
            self.report_type
        )
    }

    fn key_with_prefix(&self) -> String {
        format!("FinancialStatement:{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_report_type_round_trip() {
        for rt in ReportType::iterator() {
            let wire = rt.to_string();
            assert_eq!(ReportType::from_str(&wire).unwrap(), rt);
        }
        assert_eq!(
            ReportType::from_str("balance_sheet").unwrap(),
            ReportType::BalanceSheet
        );
    }

    #[test]
    fn test_quarter_end_month_day() {
        assert_eq!(Quarter::Q1.end_month_day(), (3, 31));
        assert_eq!(Quarter::Q2.end_month_day(), (6, 30));
        assert_eq!(Quarter::Q3.end_month_day(), (9, 30));
        assert_eq!(Quarter::Q4.end_month_day(), (12, 31));
    }

    #[test]
    fn test_market_typek() {
        assert_eq!(Market::Sii.typek(), "sii");
        assert_eq!(Market::from_str("otc").unwrap(), Market::Otc);
    }
}
