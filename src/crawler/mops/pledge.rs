use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

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

/// 董監事股權設質明細
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pledge {
    pub stock_id: String,
    pub company_name: String,
    /// 民國年
    pub year: i32,
    pub month: u32,
    /// 職稱
    pub title: String,
    /// 姓名
    pub name: String,
    /// 目前持股
    pub current_shares: Option<Decimal>,
    /// 設質股數
    pub pledged_shares: Decimal,
    /// 設質比率 (%)
    pub pledge_ratio: Decimal,
}

impl Keyable for Pledge {
    fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.stock_id, self.year, self.month, self.title, self.name
        )
    }

    fn key_with_prefix(&self) -> String {
        format!("Pledge:{}", self.key())
    }
}

/// 查詢董監事設質資料 (ajax_stapap1)。
pub async fn fetch(
    fetcher: &dyn WebFetcher,
    base_url: &str,
    market: Market,
    year: i32,
    month: u32,
    co_id: Option<&str>,
) -> Result<Vec<Pledge>> {
    let url = format!("{}/mops/web/ajax_stapap1", base_url);
    let year_value = year.to_string();
    let month_value = format!("{:02}", month);

    let mut params = base_ajax_params();
    params.push(("TYPEK", market.typek().to_string()));
    params.push(("year", year_value));
    params.push(("month", month_value));
    if let Some(co_id) = co_id {
        params.push(("co_id", co_id.to_string()));
    }

    let borrowed: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .collect();
    let body = fetcher.post_form(&url, &borrowed, TextEncoding::Utf8).await?;

    parse(&body.text, year, month)
}

/// 解析設質表格。純函數，輸入已解碼的 HTML。
///
/// 欄位順序：公司代號、公司名稱、職稱、姓名、目前持股、設質股數、設質比率。
pub fn parse(html: &str, year: i32, month: u32) -> Result<Vec<Pledge>> {
    let tr_selector = Selector::parse("tr")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse tr: {:?}", why)))?;
    let td_selector = Selector::parse("td")
        .map_err(|why| Error::Parse(format!("Failed to Selector::parse td: {:?}", why)))?;

    let document = Html::parse_document(html);
    let mut rows = Vec::with_capacity(256);
    let mut counter = RowCounter::new("pledge");

    for node in document.select(&tr_selector) {
        let tds: Vec<String> = node
            .select(&td_selector)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();

        if tds.len() < 7 {
            continue;
        }

        let code = tds[0].as_str();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            continue;
        }
        if !code.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }

        counter.discovered();

        let pledged_shares = match text::parse_required_decimal(&tds[5]) {
            Ok(value) => value,
            Err(why) => {
                counter.skip(format!("{} ({} {})", why, code, tds[3]));
                continue;
            }
        };
        let pledge_ratio = match text::parse_required_decimal(&tds[6].replace('%', "")) {
            Ok(value) => value,
            Err(why) => {
                counter.skip(format!("{} ({} {})", why, code, tds[3]));
                continue;
            }
        };

        rows.push(Pledge {
            stock_id: tds[0].clone(),
            company_name: tds[1].clone(),
            year,
            month,
            title: tds[2].clone(),
            name: tds[3].clone(),
            current_shares: text::parse_decimal(Some(&tds[4])),
            pledged_shares,
            pledge_ratio,
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
<tr><th>公司代號</th><th>公司名稱</th><th>職稱</th><th>姓名</th><th>目前持股</th><th>設質股數</th><th>設質比率</th></tr>
<tr><td>2330</td><td>台積電</td><td>董事長</td><td>魏哲家</td><td>6,393,963</td><td>1,600,000</td><td>25.02%</td></tr>
<tr><td>2330</td><td>台積電</td><td>董事</td><td>曾繁城</td><td>12,118,310</td><td>—</td><td>—</td></tr>
<tr><td>2317</td><td>鴻海</td><td>董事長</td><td>劉揚偉</td><td>3,200,000</td><td>0</td><td>0.00%</td></tr>
<tr><td>2317</td><td>鴻海</td><td>董事</td><td>黃秋蓮</td><td>2,000,000</td><td>500,000</td><td>25.00%</td></tr>
</table>
</body></html>"#;

    #[test]
    fn test_parse_pledge_page() {
        let rows = parse(PAGE, 113, 12).unwrap();
        assert_eq!(rows.len(), 3);

        let chairman = rows
            .iter()
            .find(|r| r.name == "魏哲家")
            .unwrap();
        assert!(chairman.title.contains("董事長"));
        assert_eq!(chairman.pledged_shares, dec!(1600000));
        assert!((chairman.pledge_ratio - dec!(25.02)).abs() < dec!(0.005));
        assert_eq!(chairman.current_shares, Some(dec!(6393963)));

        // 破折號代表未設質，該列設質股數無法解析而略過
        assert!(!rows.iter().any(|r| r.name == "曾繁城"));
    }

    #[test]
    fn test_keyable() {
        let rows = parse(PAGE, 113, 12).unwrap();
        let chairman = rows.iter().find(|r| r.name == "魏哲家").unwrap();
        assert_eq!(chairman.key(), "2330-113-12-董事長-魏哲家");
    }
}
