use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    crawler::mops::RowCounter,
    declare::Market,
    error::{Error, Result},
    util::{
        http::WebFetcher,
        map::Keyable,
        text::{self, TextEncoding},
    },
};

/// 單一公司的單月營收
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revenue {
    pub stock_id: String,
    pub company_name: String,
    /// 民國年
    pub year: i32,
    pub month: u32,
    pub market: Market,
    /// 當月營收 (千元)
    pub revenue: Decimal,
    /// 上月營收
    pub revenue_last_month: Option<Decimal>,
    /// 去年當月營收
    pub revenue_last_year: Option<Decimal>,
    /// 上月比較增減 (%)
    pub mom_change: Option<Decimal>,
    /// 去年同月增減 (%)
    pub yoy_change: Option<Decimal>,
    /// 當月累計營收
    pub accumulated_revenue: Option<Decimal>,
    /// 去年累計營收
    pub accumulated_last_year: Option<Decimal>,
    /// 前期比較增減 (%)
    pub accumulated_yoy_change: Option<Decimal>,
    pub comment: String,
}

impl Keyable for Revenue {
    fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.stock_id, self.year, self.month, self.market
        )
    }

    fn key_with_prefix(&self) -> String {
        format!("Revenue:{}", self.key())
    }
}

/// 下載並解析指定市場某年月的月營收彙總表。
///
/// 每個年月有兩種頁面 (0 國內公司、1 KY 公司)，一併抓取。
pub async fn fetch(
    fetcher: &dyn WebFetcher,
    base_url: &str,
    market: Market,
    year: i32,
    month: u32,
) -> Result<Vec<Revenue>> {
    let mut rows = Vec::with_capacity(1024);
    let mut last_error: Option<Error> = None;

    for page_type in 0..2 {
        let url = format!(
            "{}/nas/t21/{}/t21sc03_{}_{}_{}.html",
            base_url,
            market.typek(),
            year,
            month,
            page_type
        );

        match fetcher.get(&url, TextEncoding::Big5).await {
            Ok(body) => rows.extend(parse(&body.text, market, year, month)?),
            Err(why) if why.is_not_found() => continue,
            Err(why) => last_error = Some(why),
        }
    }

    if rows.is_empty() {
        if let Some(why) = last_error {
            return Err(why);
        }
    }

    Ok(rows)
}

/// 解析月營收彙總頁。純函數，輸入已解碼的 HTML。
pub fn parse(html: &str, market: Market, year: i32, month: u32) -> Result<Vec<Revenue>> {
    let tr_selector = Selector::parse("tr")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse tr: {:?}", why)))?;
    let td_selector = Selector::parse("td")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse td: {:?}", why)))?;

    let document = Html::parse_document(html);
    let mut rows = Vec::with_capacity(1024);
    let mut counter = RowCounter::new("revenue");

    for node in document.select(&tr_selector) {
        let mut cell_nodes = node.select(&td_selector);

        // 第一欄必須像股票代號，否則整列是表頭、說明或合計列
        let first_cell_text = match cell_nodes.next() {
            Some(td) => td.text().collect::<String>(),
            None => continue,
        };
        let code = first_cell_text.trim();
        if !looks_like_stock_id(code) {
            continue;
        }

        let mut tds = Vec::with_capacity(11);
        tds.push(code.to_owned());
        tds.extend(cell_nodes.map(|td| td.text().collect::<String>().trim().to_owned()));

        // 0代號 1名稱 2當月營收 3上月營收 4去年當月營收 5上月增減 6去年同月增減
        // 7當月累計 8去年累計 9前期增減 10備註
        if tds.len() < 10 {
            continue;
        }

        counter.discovered();

        let revenue = match text::parse_required_decimal(&tds[2]) {
            Ok(value) => value,
            Err(why) => {
                counter.skip(format!("{} ({})", why, code));
                continue;
            }
        };

        rows.push(Revenue {
            stock_id: tds[0].clone(),
            company_name: tds[1].clone(),
            year,
            month,
            market,
            revenue,
            revenue_last_month: text::parse_decimal(Some(&tds[3])),
            revenue_last_year: text::parse_decimal(Some(&tds[4])),
            mom_change: text::parse_decimal(Some(&tds[5])),
            yoy_change: text::parse_decimal(Some(&tds[6])),
            accumulated_revenue: text::parse_decimal(Some(&tds[7])),
            accumulated_last_year: text::parse_decimal(Some(&tds[8])),
            accumulated_yoy_change: text::parse_decimal(Some(&tds[9])),
            comment: tds.get(10).cloned().unwrap_or_default(),
        });
    }

    counter.finish()?;

    Ok(rows)
}

/// 股票代號為 4 到 6 位英數字且以數字開頭
fn looks_like_stock_id(code: &str) -> bool {
    (4..=6).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_alphanumeric())
        && code.chars().next().is_some_and(|c| c.is_ascii_digit())
}
