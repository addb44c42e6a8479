use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    crawler::mops::{base_ajax_params, RowCounter},
    declare::Market,
    error::{Error, Result},
    util::{
        http::WebFetcher,
        map::Keyable,
        text::{self, TextEncoding},
    },
};

/// 揭露表的種類：資金貸與或背書保證
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisclosureCategory {
    FundsLending,
    EndorsementGuarantee,
}

/// 資金貸與或背書保證的單一揭露列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisclosureRow {
    pub stock_id: String,
    /// 民國年
    pub year: i32,
    pub month: u32,
    pub category: DisclosureCategory,
    /// 本公司或子公司
    pub entity: String,
    pub has_balance: bool,
    /// 本月底餘額 (千元)
    pub current_month: Option<Decimal>,
    /// 上月底餘額
    pub previous_month: Option<Decimal>,
    /// 限額
    pub max_limit: Option<Decimal>,
    /// 迄今累計餘額
    pub accumulated_balance: Option<Decimal>,
}

impl Keyable for DisclosureRow {
    fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.stock_id, self.year, self.month, self.category, self.entity
        )
    }

    fn key_with_prefix(&self) -> String {
        format!("Disclosure:{}", self.key())
    }
}

/// 整頁揭露結果：兩類列資料加上母子公司間合計
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisclosureReport {
    pub rows: Vec<DisclosureRow>,
    /// 母子公司間背書保證合計 (千元)
    pub cross_company: Option<Decimal>,
}

/// 查詢資金貸與及背書保證揭露 (ajax_t05st11)。
pub async fn fetch(
    fetcher: &dyn WebFetcher,
    base_url: &str,
    stock_id: &str,
    market: Market,
    year: i32,
    month: u32,
) -> Result<DisclosureReport> {
    let url = format!("{}/mops/web/ajax_t05st11", base_url);
    let year_value = year.to_string();
    let month_value = format!("{:02}", month);

    let mut params = base_ajax_params();
    params.push(("TYPEK", market.typek().to_string()));
    params.push(("co_id", stock_id.to_string()));
    params.push(("year", year_value));
    params.push(("month", month_value));

    let borrowed: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .collect();
    let body = fetcher.post_form(&url, &borrowed, TextEncoding::Utf8).await?;

    parse(&body.text, stock_id, year, month)
}

/// 解析揭露頁。純函數，輸入已解碼的 HTML。
///
/// 頁面內兩張表以標題文字區分，每張表的資料列第一欄為本公司或子公司，
/// 欄位順序：對象、有無餘額、本月底餘額、上月底餘額、限額、迄今累計。
pub fn parse(html: &str, stock_id: &str, year: i32, month: u32) -> Result<DisclosureReport> {
    let table_selector = Selector::parse("table")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse table: {:?}", why)))?;
    let tr_selector = Selector::parse("tr")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse tr: {:?}", why)))?;
    let td_selector = Selector::parse("td")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse td: {:?}", why)))?;

    let document = Html::parse_document(html);
    let mut report = DisclosureReport::default();
    let mut counter = RowCounter::new("disclosure");

    for table in document.select(&table_selector) {
        let table_text = table.text().collect::<String>();
        let category = if table_text.contains("資金貸與") {
            DisclosureCategory::FundsLending
        } else if table_text.contains("背書保證") {
            DisclosureCategory::EndorsementGuarantee
        } else {
            continue;
        };

        for node in table.select(&tr_selector) {
            let tds: Vec<String> = node
                .select(&td_selector)
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect();

            if tds.is_empty() {
                continue;
            }

            // 母子公司間合計列只有一個數字
            if tds[0].contains("母子公司間") {
                report.cross_company = tds
                    .iter()
                    .skip(1)
                    .find_map(|cell| text::parse_decimal(Some(cell)));
                continue;
            }

            if tds.len() < 6 || !matches!(tds[0].as_str(), "本公司" | "子公司") {
                continue;
            }

            counter.discovered();

            let has_balance = matches!(tds[1].as_str(), "有" | "Y" | "是");
            let current_month = text::parse_decimal(Some(&tds[2]));

            if has_balance && current_month.is_none() {
                counter.skip(format!(
                    "balance flagged but amount unreadable: '{}' ({} {:?})",
                    tds[2], tds[0], category
                ));
                continue;
            }

            report.rows.push(DisclosureRow {
                stock_id: stock_id.to_string(),
                year,
                month,
                category,
                entity: tds[0].clone(),
                has_balance,
                current_month,
                previous_month: text::parse_decimal(Some(&tds[3])),
                max_limit: text::parse_decimal(Some(&tds[4])),
                accumulated_balance: text::parse_decimal(Some(&tds[5])),
            });
        }
    }

    counter.finish()?;

    Ok(report)
}
