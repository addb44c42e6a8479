use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    crawler::mops::{base_ajax_params, RowCounter},
    error::{Error, Result},
    util::{
        datetime,
        http::WebFetcher,
        map::Keyable,
        text::{self, TextEncoding},
    },
};

lazy_static! {
    /// 股利所屬期間，例 112年第1季、112年年度
    static ref PERIOD_RE: Regex = Regex::new(r"(\d+)\s*年\s*(?:第\s*([1-4])\s*季|年度)").unwrap();
}

/// 股利分派查詢種類
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// 依除權息年度
    ByExDate = 1,
    /// 依股利所屬期間
    ByPeriod = 2,
}

impl QueryType {
    pub fn serial(&self) -> u32 {
        *self as u32
    }

    pub fn from_serial(serial: u32) -> Option<QueryType> {
        match serial {
            1 => Some(QueryType::ByExDate),
            2 => Some(QueryType::ByPeriod),
            _ => None,
        }
    }
}

/// 單期股利分派
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub stock_id: String,
    /// 股利所屬民國年度
    pub year: i32,
    /// 發放季度，全年配發時為空
    pub quarter: Option<u32>,
    /// 現金股利 (元/股)
    pub cash_dividend: Decimal,
    /// 股票股利 (元/股)
    pub stock_dividend: Decimal,
    /// 董事會決議日
    pub board_resolution_date: Option<NaiveDate>,
}

impl Keyable for Dividend {
    fn key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.stock_id,
            self.year,
            self.quarter.map(|q| q.to_string()).unwrap_or_default()
        )
    }

    fn key_with_prefix(&self) -> String {
        format!("Dividend:{}", self.key())
    }
}

/// 查詢股利分派情形 (ajax_t05st09_2)。
pub async fn fetch(
    fetcher: &dyn WebFetcher,
    base_url: &str,
    stock_id: &str,
    year_start: i32,
    year_end: i32,
    query_type: QueryType,
) -> Result<Vec<Dividend>> {
    let url = format!("{}/mops/web/ajax_t05st09_2", base_url);
    let date1 = year_start.to_string();
    let date2 = year_end.to_string();
    let qry_type = query_type.serial().to_string();

    let mut params = base_ajax_params();
    params.push(("isnew", "false".to_string()));
    params.push(("co_id", stock_id.to_string()));
    params.push(("date1", date1));
    params.push(("date2", date2));
    params.push(("qryType", qry_type));

    let borrowed: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .collect();
    let body = fetcher.post_form(&url, &borrowed, TextEncoding::Utf8).await?;

    parse(&body.text, stock_id)
}

/// 解析股利分派表。純函數，輸入已解碼的 HTML。
///
/// 欄位順序：股利所屬期間、董事會決議日期、現金股利、股票股利。
pub fn parse(html: &str, stock_id: &str) -> Result<Vec<Dividend>> {
    let tr_selector = Selector::parse("tr")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse tr: {:?}", why)))?;
    let td_selector = Selector::parse("td")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse td: {:?}", why)))?;

    let document = Html::parse_document(html);
    let mut rows = Vec::with_capacity(16);
    let mut counter = RowCounter::new("dividend");

    for node in document.select(&tr_selector) {
        let tds: Vec<String> = node
            .select(&td_selector)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();

        if tds.len() < 4 {
            continue;
        }

        let captures = match PERIOD_RE.captures(&tds[0]) {
            Some(captures) => captures,
            None => continue,
        };

        counter.discovered();

        let year: i32 = match captures[1].parse() {
            Ok(year) => year,
            Err(_) => {
                counter.skip(format!("bad period year: '{}'", tds[0]));
                continue;
            }
        };
        let quarter = captures
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok());

        let cash_dividend = match text::parse_required_decimal(&tds[2]) {
            Ok(value) => value,
            Err(why) => {
                counter.skip(format!("{} ({})", why, tds[0]));
                continue;
            }
        };
        let stock_dividend = text::parse_decimal(Some(&tds[3])).unwrap_or(Decimal::ZERO);

        rows.push(Dividend {
            stock_id: stock_id.to_string(),
            year,
            quarter,
            cash_dividend,
            stock_dividend,
            board_resolution_date: datetime::parse_taiwan_date(&tds[1]),
        });
    }

    counter.finish()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const PAGE: &str = r#"<html><body>
<table>
<tr><th>股利所屬期間</th><th>董事會決議日期</th><th>現金股利</th><th>股票股利</th></tr>
<tr><td>112年第1季</td><td>112/05/09</td><td>3.0000</td><td>0</td></tr>
<tr><td>112年第2季</td><td>112/08/08</td><td>3.0000</td><td>0</td></tr>
<tr><td>112年第3季</td><td>112/11/14</td><td>3.5000</td><td>0</td></tr>
<tr><td>112年第4季</td><td>113/02/15</td><td>3.5000</td><td>0</td></tr>
</table>
</body></html>"#;

    #[test]
    fn test_parse_quarterly_dividends() {
        let rows = parse(PAGE, "2330").unwrap();
        assert_eq!(rows.len(), 4);

        let quarters: Vec<u32> = rows.iter().filter_map(|r| r.quarter).collect();
        assert_eq!(quarters, vec![1, 2, 3, 4]);

        let cash_sum: Decimal = rows.iter().map(|r| r.cash_dividend).sum();
        assert!((cash_sum - dec!(13.0)).abs() < dec!(0.0005));

        assert_eq!(
            rows[0].board_resolution_date,
            NaiveDate::from_ymd_opt(2023, 5, 9)
        );
        assert!(rows.iter().all(|r| r.year == 112));
    }

    #[test]
    fn test_parse_annual_dividend() {
        let html = r#"<table>
<tr><td>110年年度</td><td>111/06/08</td><td>11.0000</td><td>0.5000</td></tr>
</table>"#;

        let rows = parse(html, "2412").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quarter, None);
        assert_eq!(rows[0].cash_dividend, dec!(11.0));
        assert_eq!(rows[0].stock_dividend, dec!(0.5));
        assert_eq!(rows[0].year, 110);
    }

    #[test]
    fn test_keyable() {
        let rows = parse(PAGE, "2330").unwrap();
        assert_eq!(rows[0].key(), "2330-112-1");

        let annual = Dividend {
            stock_id: "2412".to_string(),
            year: 110,
            quarter: None,
            cash_dividend: dec!(11),
            stock_dividend: Decimal::ZERO,
            board_resolution_date: None,
        };
        assert_eq!(annual.key(), "2412-110-");
    }
}
