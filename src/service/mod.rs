//! 快取優先的服務門面 (read-through cache)。
//!
//! 每個查詢先查儲存層，未命中時抓取上游、解析、寫回後回傳。
//! 同鍵並行請求以 [`single_flight::SingleFlight`] 合流；暫時性錯誤
//! 重試兩次 (間隔 1 秒與 4 秒)；寫回失敗僅記錄，不影響回傳剛解析
//! 完成的結果。取消以丟棄 future 表達，合流的領頭工作獨立執行，
//! 不受等待者取消影響。

use std::{sync::Arc, time::Duration};

use futures::Future;
use tokio_retry::RetryIf;

use crate::{
    crawler::mops::{
        disclosure::{self, DisclosureReport},
        dividend::{self, Dividend, QueryType},
        pledge::{self, Pledge},
        revenue::{self, Revenue},
        xbrl_zip,
    },
    database::store::Store,
    declare::{Market, Quarter, ReportType, RevenueScope, StockPeriod},
    error::{Error, Result},
    logging,
    util::{http::WebFetcher, map::Keyable},
    xbrl::{
        instance::{self, Parser},
        package::ReportPackage,
        statement::{self, FinancialStatement},
        taxonomy::TaxonomyResolver,
    },
};

pub mod single_flight;

use single_flight::SingleFlight;

/// 暫時性錯誤的重試間隔
fn retry_schedule() -> std::vec::IntoIter<Duration> {
    vec![Duration::from_secs(1), Duration::from_secs(4)].into_iter()
}

async fn fetch_with_retry<T, F, Fut>(action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryIf::spawn(retry_schedule(), action, |why: &Error| why.is_transient()).await
}

/// MOPS 資料服務。
///
/// 由組裝根建立一次，元件以握把傳入；限速、合流等狀態都屬於
/// 元件實例，不存在模組層級單例。
pub struct Mops {
    base_url: String,
    fetcher: Arc<dyn WebFetcher>,
    store: Arc<dyn Store>,
    taxonomy: Arc<TaxonomyResolver>,
    parser: Arc<Parser>,
    statements: SingleFlight<FinancialStatement>,
    revenues: SingleFlight<Vec<Revenue>>,
    pledges: SingleFlight<Vec<Pledge>>,
    dividends: SingleFlight<Vec<Dividend>>,
    disclosures: SingleFlight<DisclosureReport>,
}

impl Mops {
    pub fn new(
        base_url: String,
        fetcher: Arc<dyn WebFetcher>,
        store: Arc<dyn Store>,
        taxonomy: Arc<TaxonomyResolver>,
    ) -> Self {
        Mops {
            base_url,
            fetcher,
            store,
            taxonomy,
            parser: Arc::new(Parser::new()),
            statements: SingleFlight::new(),
            revenues: SingleFlight::new(),
            pledges: SingleFlight::new(),
            dividends: SingleFlight::new(),
            disclosures: SingleFlight::new(),
        }
    }

    /// 取得財務報表。未命中時下載 XBRL 封裝檔並組樹。
    pub async fn get_financial_statement(
        &self,
        stock_id: &str,
        year: i32,
        quarter: Quarter,
        report_type: ReportType,
        force_refresh: bool,
    ) -> Result<FinancialStatement> {
        let key = StockPeriod::new(stock_id, year, quarter, report_type);

        if !force_refresh {
            match self.store.get_report(&key).await {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => {}
                Err(why) => logging::error_file_async(format!(
                    "Failed to get_report({}) because {:?}",
                    key.key(),
                    why
                )),
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let taxonomy = Arc::clone(&self.taxonomy);
        let parser = Arc::clone(&self.parser);
        let base_url = self.base_url.clone();
        let stock_id = stock_id.to_string();

        self.statements
            .run(&key.key(), move || async move {
                let bytes = fetch_with_retry(|| {
                    xbrl_zip::fetch(fetcher.as_ref(), &base_url, &stock_id, year, quarter)
                })
                .await?;

                // 解壓與事實抽取是純 CPU 工作，移到阻塞執行緒池
                let (package, facts, contexts) = tokio::task::spawn_blocking(move || {
                    let package = ReportPackage::from_bytes(&bytes)?;
                    let facts = parser.extract_facts(package.instance())?;
                    let contexts = parser.extract_contexts(package.instance())?;
                    Ok::<_, Error>((package, facts, contexts))
                })
                .await
                .map_err(|why| Error::Other(format!("parser worker failed: {}", why)))??;

                let facts = instance::discard_orphan_facts(facts, &contexts);
                let linkbases = taxonomy.assemble_linkbases(&package).await;
                let built = statement::build(
                    &stock_id, year, quarter, report_type, &facts, &contexts, &linkbases,
                )?;

                if let Err(why) = store.save_report(&built).await {
                    logging::error_file_async(format!(
                        "Failed to save_report({}) because {:?}",
                        built.stock_id, why
                    ));
                }

                Ok(built)
            })
            .await
    }

    /// 取得月營收。市場範圍回傳整月彙總，個股範圍回傳該公司各市場的列。
    pub async fn get_monthly_revenue(
        &self,
        scope: RevenueScope,
        year: i32,
        month: u32,
        force_refresh: bool,
    ) -> Result<Vec<Revenue>> {
        if !force_refresh {
            match self.store.get_revenue(&scope, year, month).await {
                Ok(rows) if !rows.is_empty() => return Ok(rows),
                Ok(_) => {}
                Err(why) => logging::error_file_async(format!(
                    "Failed to get_revenue({}) because {:?}",
                    scope, why
                )),
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let base_url = self.base_url.clone();
        let flight_key = format!("revenue:{}:{}:{}", scope, year, month);
        let scope_for_filter = scope.clone();

        self.revenues
            .run(&flight_key, move || async move {
                let mut fetched = Vec::new();
                match &scope {
                    RevenueScope::Market(market) => {
                        fetched.extend(
                            fetch_with_retry(|| {
                                revenue::fetch(fetcher.as_ref(), &base_url, *market, year, month)
                            })
                            .await?,
                        );
                    }
                    RevenueScope::Stock(_) => {
                        // 靜態頁按市場彙總，兩個市場都抓，順便溫整月的快取
                        for market in Market::iterator() {
                            match fetch_with_retry(|| {
                                revenue::fetch(fetcher.as_ref(), &base_url, market, year, month)
                            })
                            .await
                            {
                                Ok(rows) => fetched.extend(rows),
                                Err(why) if why.is_not_found() => continue,
                                Err(why) => return Err(why),
                            }
                        }
                    }
                }

                if let Err(why) = store.save_revenue(&fetched).await {
                    logging::error_file_async(format!(
                        "Failed to save_revenue because {:?}",
                        why
                    ));
                }

                let rows = match &scope {
                    RevenueScope::Market(_) => fetched,
                    RevenueScope::Stock(stock_id) => fetched
                        .into_iter()
                        .filter(|r| r.stock_id == *stock_id)
                        .collect(),
                };
                Ok(rows)
            })
            .await
            .map(|rows| filter_revenue_scope(rows, &scope_for_filter))
    }

    /// 取得董監事股權設質。
    pub async fn get_share_pledging(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
        market: Market,
        force_refresh: bool,
    ) -> Result<Vec<Pledge>> {
        if !force_refresh {
            match self.store.get_pledges(stock_id, year, month).await {
                Ok(rows) if !rows.is_empty() => return Ok(rows),
                Ok(_) => {}
                Err(why) => logging::error_file_async(format!(
                    "Failed to get_pledges({}) because {:?}",
                    stock_id, why
                )),
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let base_url = self.base_url.clone();
        let stock_id = stock_id.to_string();
        let flight_key = format!("pledge:{}:{}:{}", stock_id, year, month);

        self.pledges
            .run(&flight_key, move || async move {
                let fetched = fetch_with_retry(|| {
                    pledge::fetch(
                        fetcher.as_ref(),
                        &base_url,
                        market,
                        year,
                        month,
                        Some(&stock_id),
                    )
                })
                .await?;

                if let Err(why) = store.save_pledges(&fetched).await {
                    logging::error_file_async(format!(
                        "Failed to save_pledges because {:?}",
                        why
                    ));
                }

                Ok(fetched
                    .into_iter()
                    .filter(|r| r.stock_id == stock_id)
                    .collect())
            })
            .await
    }

    /// 取得股利分派。
    pub async fn get_dividend(
        &self,
        stock_id: &str,
        year_start: i32,
        year_end: i32,
        query_type: QueryType,
        force_refresh: bool,
    ) -> Result<Vec<Dividend>> {
        if !force_refresh {
            match self.store.get_dividends(stock_id, year_start, year_end).await {
                Ok(rows) if !rows.is_empty() => return Ok(rows),
                Ok(_) => {}
                Err(why) => logging::error_file_async(format!(
                    "Failed to get_dividends({}) because {:?}",
                    stock_id, why
                )),
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let base_url = self.base_url.clone();
        let stock_id = stock_id.to_string();
        let flight_key = format!(
            "dividend:{}:{}:{}:{}",
            stock_id,
            year_start,
            year_end,
            query_type.serial()
        );

        self.dividends
            .run(&flight_key, move || async move {
                let fetched = fetch_with_retry(|| {
                    dividend::fetch(
                        fetcher.as_ref(),
                        &base_url,
                        &stock_id,
                        year_start,
                        year_end,
                        query_type,
                    )
                })
                .await?;

                if let Err(why) = store.save_dividends(&fetched).await {
                    logging::error_file_async(format!(
                        "Failed to save_dividends because {:?}",
                        why
                    ));
                }

                Ok(fetched
                    .into_iter()
                    .filter(|r| r.year >= year_start && r.year <= year_end)
                    .collect())
            })
            .await
    }

    /// 取得資金貸與及背書保證揭露。
    pub async fn get_disclosure(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
        market: Market,
        force_refresh: bool,
    ) -> Result<DisclosureReport> {
        if !force_refresh {
            match self.store.get_disclosure(stock_id, year, month).await {
                Ok(Some(report)) => return Ok(report),
                Ok(None) => {}
                Err(why) => logging::error_file_async(format!(
                    "Failed to get_disclosure({}) because {:?}",
                    stock_id, why
                )),
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let base_url = self.base_url.clone();
        let stock_id = stock_id.to_string();
        let flight_key = format!("disclosure:{}:{}:{}", stock_id, year, month);

        self.disclosures
            .run(&flight_key, move || async move {
                let report = fetch_with_retry(|| {
                    disclosure::fetch(fetcher.as_ref(), &base_url, &stock_id, market, year, month)
                })
                .await?;

                if let Err(why) = store
                    .save_disclosure(&stock_id, year, month, &report)
                    .await
                {
                    logging::error_file_async(format!(
                        "Failed to save_disclosure because {:?}",
                        why
                    ));
                }

                Ok(report)
            })
            .await
    }

    /// 直接回傳 XBRL 封裝檔原始位元組，不經快取，共用限速。
    pub async fn download_xbrl_zip(
        &self,
        stock_id: &str,
        year: i32,
        quarter: Quarter,
    ) -> Result<Vec<u8>> {
        fetch_with_retry(|| {
            xbrl_zip::fetch(self.fetcher.as_ref(), &self.base_url, stock_id, year, quarter)
        })
        .await
    }
}

fn filter_revenue_scope(rows: Vec<Revenue>, scope: &RevenueScope) -> Vec<Revenue> {
    match scope {
        RevenueScope::Market(market) => rows
            .into_iter()
            .filter(|r| r.market == *market)
            .collect(),
        RevenueScope::Stock(stock_id) => rows
            .into_iter()
            .filter(|r| r.stock_id == *stock_id)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use zip::write::SimpleFileOptions;

    use crate::{
        config,
        database::store::MemoryStore,
        util::{
            http::FetchedBody,
            text::{self, TextEncoding},
        },
    };

    use super::*;

    const INSTANCE: &str = r#"<!DOCTYPE html>
<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL" xmlns:xbrli="http://www.xbrl.org/2003/instance">
<body>
  <div style="display:none">
    <xbrli:context id="ytd">
      <xbrli:entity><xbrli:identifier scheme="http://www.twse.com.tw">2330</xbrli:identifier></xbrli:entity>
      <xbrli:period><xbrli:startDate>2024-01-01</xbrli:startDate><xbrli:endDate>2024-09-30</xbrli:endDate></xbrli:period>
    </xbrli:context>
  </div>
  <ix:nonFraction name="ifrs-full:Revenue" contextRef="ytd" unitRef="TWD" scale="3">2,025,846</ix:nonFraction>
  <ix:nonFraction name="ifrs-full:CostOfSales" contextRef="ytd" unitRef="TWD" scale="3">887,672</ix:nonFraction>
  <ix:nonFraction name="ifrs-full:GrossProfit" contextRef="ytd" unitRef="TWD" scale="3">1,138,174</ix:nonFraction>
</body>
</html>"#;

    const PRESENTATION: &str = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:presentationLink xlink:role="http://www.xbrl.org/tw/role/StatementOfComprehensiveIncome">
    <link:loc xlink:href="t.xsd#ifrs-full_GrossProfit" xlink:label="GrossProfit"/>
    <link:loc xlink:href="t.xsd#ifrs-full_Revenue" xlink:label="Revenue"/>
    <link:loc xlink:href="t.xsd#ifrs-full_CostOfSales" xlink:label="CostOfSales"/>
    <link:presentationArc xlink:from="GrossProfit" xlink:to="Revenue" order="1"/>
    <link:presentationArc xlink:from="GrossProfit" xlink:to="CostOfSales" order="2"/>
  </link:presentationLink>
</link:linkbase>"#;

    const CALCULATION: &str = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:calculationLink xlink:role="http://www.xbrl.org/tw/role/StatementOfComprehensiveIncome">
    <link:loc xlink:href="t.xsd#ifrs-full_GrossProfit" xlink:label="GrossProfit"/>
    <link:loc xlink:href="t.xsd#ifrs-full_Revenue" xlink:label="Revenue"/>
    <link:loc xlink:href="t.xsd#ifrs-full_CostOfSales" xlink:label="CostOfSales"/>
    <link:calculationArc xlink:from="GrossProfit" xlink:to="Revenue" weight="1" order="1"/>
    <link:calculationArc xlink:from="GrossProfit" xlink:to="CostOfSales" weight="-1" order="2"/>
  </link:calculationLink>
</link:linkbase>"#;

    const REVENUE_PAGE: &str = r#"<table>
<tr><td>2330</td><td>台積電</td><td>278,163,107</td><td>276,058,422</td><td>176,299,866</td><td>0.76</td><td>57.77</td><td>2,894,307,699</td><td>2,161,736,841</td><td>33.88</td><td>-</td></tr>
<tr><td>2317</td><td>鴻海</td><td>654,834,436</td><td>672,705,197</td><td>461,310,586</td><td>-2.65</td><td>41.87</td><td>6,859,640,375</td><td>6,162,221,746</td><td>11.31</td><td>-</td></tr>
</table>"#;

    const PLEDGE_PAGE: &str = r#"<table>
<tr><td>2330</td><td>台積電</td><td>董事長</td><td>魏哲家</td><td>6,393,963</td><td>1,600,000</td><td>25.02%</td></tr>
</table>"#;

    const DIVIDEND_PAGE: &str = r#"<table>
<tr><td>112年第1季</td><td>112/05/09</td><td>3.0000</td><td>0</td></tr>
<tr><td>112年第2季</td><td>112/08/08</td><td>3.0000</td><td>0</td></tr>
<tr><td>112年第3季</td><td>112/11/14</td><td>3.5000</td><td>0</td></tr>
<tr><td>112年第4季</td><td>113/02/15</td><td>3.5000</td><td>0</td></tr>
</table>"#;

    fn fixture_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let entries: [(&str, &str); 4] = [
            ("tifrs-fr1-m1-ci-cr-2330-2024Q3.html", INSTANCE),
            ("tifrs-ci-cr-2024-09-30_pre.xml", PRESENTATION),
            ("tifrs-ci-cr-2024-09-30_cal.xml", CALCULATION),
            (
                "tifrs-ci-cr-2024-09-30_lab.xml",
                r#"<?xml version="1.0"?><link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"/>"#,
            ),
        ];
        for (name, content) in entries {
            writer
                .start_file(name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// 固定回應的假請求端，統計上游呼叫次數
    struct FakeFetcher {
        calls: AtomicUsize,
        transient_failures: AtomicUsize,
    }

    impl FakeFetcher {
        fn new() -> Self {
            FakeFetcher {
                calls: AtomicUsize::new(0),
                transient_failures: AtomicUsize::new(0),
            }
        }

        fn failing_first(failures: usize) -> Self {
            FakeFetcher {
                calls: AtomicUsize::new(0),
                transient_failures: AtomicUsize::new(failures),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn body(text: &str) -> FetchedBody {
            FetchedBody {
                bytes: text.as_bytes().to_vec(),
                text: text.to_string(),
                status: 200,
            }
        }

        fn respond(&self, url: &str) -> Result<FetchedBody> {
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::TransientFetch(format!("{}: HTTP 503", url)));
            }

            if url.contains("FileDownLoad") {
                let bytes = fixture_zip();
                return Ok(FetchedBody {
                    text: text::decode_with_fallback(&bytes, TextEncoding::Utf8),
                    bytes,
                    status: 200,
                });
            }
            if url.contains("t21sc03") {
                if url.ends_with("_0.html") {
                    return Ok(Self::body(REVENUE_PAGE));
                }
                return Err(Error::NotFound(url.to_string()));
            }
            if url.contains("ajax_stapap1") {
                return Ok(Self::body(PLEDGE_PAGE));
            }
            if url.contains("ajax_t05st09_2") {
                return Ok(Self::body(DIVIDEND_PAGE));
            }

            Err(Error::NotFound(url.to_string()))
        }
    }

    #[async_trait]
    impl WebFetcher for FakeFetcher {
        async fn get(&self, url: &str, _encoding: TextEncoding) -> Result<FetchedBody> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.respond(url)
        }

        async fn post_form(
            &self,
            url: &str,
            _params: &[(&str, &str)],
            _encoding: TextEncoding,
        ) -> Result<FetchedBody> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.respond(url)
        }
    }

    fn temp_taxonomy_dir(tag: &str) -> config::Taxonomy {
        let dir = std::env::temp_dir().join(format!("mops_api_test_{}_{}", std::process::id(), tag));
        config::Taxonomy {
            cache_dir: dir.to_string_lossy().to_string(),
        }
    }

    fn build_service(fetcher: Arc<FakeFetcher>, tag: &str) -> (Arc<Mops>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let fetcher_handle: Arc<dyn WebFetcher> = fetcher;
        let store_handle: Arc<dyn Store> = store.clone();
        let taxonomy = Arc::new(
            TaxonomyResolver::new(&temp_taxonomy_dir(tag), Arc::clone(&fetcher_handle)).unwrap(),
        );
        let service = Arc::new(Mops::new(
            "https://mops.twse.com.tw".to_string(),
            fetcher_handle,
            store_handle,
            taxonomy,
        ));
        (service, store)
    }

    #[tokio::test]
    async fn test_statement_read_through() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, _store) = build_service(fetcher.clone(), "read_through");

        let statement = service
            .get_financial_statement("2330", 113, Quarter::Q3, ReportType::IncomeStatement, false)
            .await
            .unwrap();

        assert!(!statement.empty);
        assert_eq!(statement.items.len(), 1);
        let gross = &statement.items[0];
        assert_eq!(gross.value, Some(dec!(1138174000)));
        let revenue_node = &gross.children[0];
        assert!(revenue_node.value.unwrap() > Decimal::ZERO);
        assert!(statement::calculation_violations(&statement).is_empty());
        assert_eq!(fetcher.calls(), 1);

        // 第二次由快取供應，不再打上游
        let again = service
            .get_financial_statement("2330", 113, Quarter::Q3, ReportType::IncomeStatement, false)
            .await
            .unwrap();
        assert_eq!(again, statement);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, _store) = build_service(fetcher.clone(), "coalesce");

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service
                    .get_financial_statement(
                        "2330",
                        113,
                        Quarter::Q3,
                        ReportType::IncomeStatement,
                        false,
                    )
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        // 上游只被打一次，所有呼叫者拿到同一棵樹
        assert_eq!(fetcher.calls(), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn test_force_refresh_fetches_again_and_advances_fetched_at() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, store) = build_service(fetcher.clone(), "force");
        let key = StockPeriod::new("2330", 113, Quarter::Q3, ReportType::IncomeStatement);

        service
            .get_financial_statement("2330", 113, Quarter::Q3, ReportType::IncomeStatement, false)
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), 1);
        let first_fetched_at = store.report_fetched_at(&key).unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        service
            .get_financial_statement("2330", 113, Quarter::Q3, ReportType::IncomeStatement, true)
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), 2);
        let second_fetched_at = store.report_fetched_at(&key).unwrap();

        assert!(second_fetched_at > first_fetched_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried() {
        let fetcher = Arc::new(FakeFetcher::failing_first(1));
        let (service, _store) = build_service(fetcher.clone(), "retry");

        let statement = service
            .get_financial_statement("2330", 113, Quarter::Q3, ReportType::IncomeStatement, false)
            .await
            .unwrap();

        assert!(!statement.empty);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_bubbles_after_retries() {
        let fetcher = Arc::new(FakeFetcher::failing_first(10));
        let (service, _store) = build_service(fetcher.clone(), "retry_exhausted");

        let result = service
            .get_financial_statement("2330", 113, Quarter::Q3, ReportType::IncomeStatement, false)
            .await;

        assert!(result.unwrap_err().is_transient());
        // 原始請求加兩次重試
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_revenue_read_through_by_market() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, _store) = build_service(fetcher.clone(), "revenue");

        let rows = service
            .get_monthly_revenue(RevenueScope::Market(Market::Sii), 113, 12, false)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        let tsmc = rows.iter().find(|r| r.stock_id == "2330").unwrap();
        assert_eq!(tsmc.revenue, dec!(278163107));
        let first_calls = fetcher.calls();

        let cached = service
            .get_monthly_revenue(RevenueScope::Market(Market::Sii), 113, 12, false)
            .await
            .unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(fetcher.calls(), first_calls);
    }

    #[tokio::test]
    async fn test_pledge_flow() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, _store) = build_service(fetcher.clone(), "pledge");

        let rows = service
            .get_share_pledging("2330", 113, 12, Market::Sii, false)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!(rows[0].title.contains("董事長"));
        assert_eq!(rows[0].name, "魏哲家");
        assert_eq!(rows[0].pledged_shares, dec!(1600000));
        assert!((rows[0].pledge_ratio - dec!(25.02)).abs() < dec!(0.005));
    }

    #[tokio::test]
    async fn test_dividend_flow() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, _store) = build_service(fetcher.clone(), "dividend");

        let rows = service
            .get_dividend("2330", 112, 112, QueryType::ByExDate, false)
            .await
            .unwrap();

        assert_eq!(rows.len(), 4);
        let quarters: Vec<u32> = rows.iter().filter_map(|r| r.quarter).collect();
        assert_eq!(quarters, vec![1, 2, 3, 4]);
        let cash_sum: Decimal = rows.iter().map(|r| r.cash_dividend).sum();
        assert!((cash_sum - dec!(13.0)).abs() < dec!(0.0005));
    }

    #[tokio::test]
    async fn test_not_found_is_typed() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (service, _store) = build_service(fetcher.clone(), "not_found");

        let result = service
            .get_disclosure("9999", 113, 1, Market::Sii, false)
            .await;

        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_monthly_revenue() {
        dotenv::dotenv().ok();
        let cfg = config::App::default();
        let fetcher: Arc<dyn WebFetcher> =
            Arc::new(crate::util::http::HttpClient::new(&cfg.mops).unwrap());
        let store = Arc::new(MemoryStore::new());
        let taxonomy =
            Arc::new(TaxonomyResolver::new(&cfg.taxonomy, Arc::clone(&fetcher)).unwrap());
        let service = Mops::new(cfg.mops.base_url.clone(), fetcher, store, taxonomy);

        match service
            .get_monthly_revenue(RevenueScope::Market(Market::Sii), 113, 12, false)
            .await
        {
            Ok(rows) => {
                logging::debug_file_async(format!("rows: {}", rows.len()));
                assert!(rows.len() >= 900);
                assert!(rows.iter().any(|r| r.stock_id == "2330"));
            }
            Err(why) => {
                logging::error_file_async(format!("Failed to get_monthly_revenue because {:?}", why));
            }
        }
    }
}
