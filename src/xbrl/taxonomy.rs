use std::{collections::HashMap, fs, path::PathBuf, sync::Arc};

use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::sync::Mutex;

use crate::{
    config,
    error::{Error, Result},
    logging,
    util::{http::WebFetcher, text::TextEncoding},
    xbrl::{
        linkbase,
        model::{CalculationArc, LabelSet, PresentationArc, RoleLinks},
        package::ReportPackage,
    },
};

/// 一份報表可用的全部連結庫
#[derive(Debug, Default)]
pub struct LinkbaseSet {
    pub calculation: RoleLinks<CalculationArc>,
    pub presentation: RoleLinks<PresentationArc>,
    pub labels: LabelSet,
}

/// IFRS taxonomy 的本機快取。
///
/// instance 參照的遠端 taxonomy 檔改寫為本機副本；未快取時經 C2 下載一次
/// 後存檔。同一 URL 的並行請求共用一次下載。解析失敗僅記錄警告，
/// 回傳盡力而為的連結庫集。
pub struct TaxonomyResolver {
    cache_dir: PathBuf,
    fetcher: Arc<dyn WebFetcher>,
    /// 每個遠端 URL 一把鎖，鎖內先查磁碟再下載
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaxonomyResolver {
    pub fn new(cfg: &config::Taxonomy, fetcher: Arc<dyn WebFetcher>) -> Result<TaxonomyResolver> {
        let cache_dir = PathBuf::from(&cfg.cache_dir);
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        Ok(TaxonomyResolver {
            cache_dir,
            fetcher,
            flights: Mutex::new(HashMap::new()),
        })
    }

    /// 取回遠端 taxonomy 檔，優先使用本機副本。
    pub async fn resolve(&self, url: &str) -> Result<Vec<u8>> {
        let local = self.local_path(url);
        if local.exists() {
            return Ok(fs::read(&local)?);
        }

        let flight = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        // 等待期間可能已由前一位下載完成
        if local.exists() {
            return Ok(fs::read(&local)?);
        }

        let body = self
            .fetcher
            .get(url, TextEncoding::Utf8)
            .await
            .map_err(|why| Error::TaxonomyResolution(format!("{}: {}", url, why)))?;

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&local, &body.bytes)?;

        Ok(body.bytes)
    }

    /// 組出一份報表的連結庫：封裝內的 _cal/_pre/_lab 檔為主，
    /// instance 參照的遠端 taxonomy 為輔，任何一步失敗都只降級為警告。
    pub async fn assemble_linkbases(&self, package: &ReportPackage) -> LinkbaseSet {
        let mut set = LinkbaseSet::default();

        for bytes in package.calculation_linkbases() {
            match linkbase::parse_calculation(bytes) {
                Ok(links) => set.calculation.merge(links),
                Err(why) => logging::warn_file_async(format!(
                    "calculation linkbase in package skipped: {}",
                    why
                )),
            }
        }
        for bytes in package.presentation_linkbases() {
            match linkbase::parse_presentation(bytes) {
                Ok(links) => set.presentation.merge(links),
                Err(why) => logging::warn_file_async(format!(
                    "presentation linkbase in package skipped: {}",
                    why
                )),
            }
        }
        for bytes in package.label_linkbases() {
            match linkbase::parse_labels(bytes) {
                Ok(labels) => set.labels.merge(labels),
                Err(why) => {
                    logging::warn_file_async(format!("label linkbase in package skipped: {}", why))
                }
            }
        }

        for schema_url in discover_schema_refs(package.instance()) {
            if let Err(why) = self.merge_remote(&schema_url, &mut set).await {
                logging::warn_file_async(format!(
                    "taxonomy {} unavailable, continuing best-effort: {}",
                    schema_url, why
                ));
            }
        }

        set
    }

    /// 下載 schema 檔並跟進其 linkbaseRef 一層。
    async fn merge_remote(&self, schema_url: &str, set: &mut LinkbaseSet) -> Result<()> {
        let schema = self.resolve(schema_url).await?;

        for href in discover_linkbase_refs(&schema) {
            let url = join_url(schema_url, &href);
            let bytes = match self.resolve(&url).await {
                Ok(bytes) => bytes,
                Err(why) => {
                    logging::warn_file_async(format!("linkbase {} unavailable: {}", url, why));
                    continue;
                }
            };

            if href.ends_with("_cal.xml") {
                match linkbase::parse_calculation(&bytes) {
                    Ok(links) => set.calculation.merge(links),
                    Err(why) => logging::warn_file_async(format!("{}: {}", url, why)),
                }
            } else if href.ends_with("_pre.xml") {
                match linkbase::parse_presentation(&bytes) {
                    Ok(links) => set.presentation.merge(links),
                    Err(why) => logging::warn_file_async(format!("{}: {}", url, why)),
                }
            } else if href.ends_with("_lab.xml") {
                match linkbase::parse_labels(&bytes) {
                    Ok(labels) => set.labels.merge(labels),
                    Err(why) => logging::warn_file_async(format!("{}: {}", url, why)),
                }
            }
        }

        Ok(())
    }

    /// URL 對應的本機快取路徑 (以 host/路徑 分層)
    fn local_path(&self, url: &str) -> PathBuf {
        let stripped = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let mut path = self.cache_dir.clone();
        for segment in stripped.split('/') {
            let safe: String = segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            if !safe.is_empty() {
                path.push(safe);
            }
        }
        path
    }
}

/// 從 instance 找出指向遠端 taxonomy 的 schemaRef 與 xsi:schemaLocation。
pub fn discover_schema_refs(instance: &[u8]) -> Vec<String> {
    let mut reader = Reader::from_reader(instance);
    reader.config_mut().check_end_names = false;

    let mut buf = Vec::new();
    let mut refs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let local = name.local_name();
                if local.as_ref() == b"schemaRef" {
                    for attribute in e.attributes().flatten() {
                        if attribute.key.local_name().as_ref() == b"href" {
                            if let Ok(href) = std::str::from_utf8(&attribute.value) {
                                if href.starts_with("http") {
                                    refs.push(href.to_string());
                                }
                            }
                        }
                    }
                } else {
                    for attribute in e.attributes().flatten() {
                        if attribute.key.local_name().as_ref() == b"schemaLocation" {
                            if let Ok(value) = std::str::from_utf8(&attribute.value) {
                                refs.extend(
                                    value
                                        .split_whitespace()
                                        .filter(|part| {
                                            part.starts_with("http") && part.ends_with(".xsd")
                                        })
                                        .map(String::from),
                                );
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // instance 可能是 HTML，容錯掃描到哪算到哪
            Err(_) => break,
        }
        buf.clear();
    }

    refs.sort();
    refs.dedup();
    refs
}

/// 掃出 schema 檔內 linkbaseRef 的 href。
fn discover_linkbase_refs(schema: &[u8]) -> Vec<String> {
    let mut reader = Reader::from_reader(schema);
    let mut buf = Vec::new();
    let mut refs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                if name.local_name().as_ref() == b"linkbaseRef" {
                    for attribute in e.attributes().flatten() {
                        if attribute.key.local_name().as_ref() == b"href" {
                            if let Ok(href) = std::str::from_utf8(&attribute.value) {
                                refs.push(href.to_string());
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        buf.clear();
    }

    refs
}

fn join_url(base: &str, href: &str) -> String {
    if href.starts_with("http") {
        return href.to_string();
    }
    match base.rfind('/') {
        Some(pos) => format!("{}/{}", &base[..pos], href),
        None => href.to_string(),
    }
}

impl std::fmt::Debug for TaxonomyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxonomyResolver")
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_schema_refs() {
        let instance = br#"<?xml version="1.0"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance" xmlns:link="http://www.xbrl.org/2003/linkbase">
  <link:schemaRef xlink:type="simple" xlink:href="https://mops.twse.com.tw/ifrs/2023/tifrs-ci-cr-2023-03-31.xsd"/>
  <other xsi:schemaLocation="http://www.xbrl.org/2003/instance https://mops.twse.com.tw/ifrs/xbrl-instance-2003-12-31.xsd"/>
</xbrli:xbrl>"#;

        let refs = discover_schema_refs(instance);
        assert_eq!(refs.len(), 2);
        assert!(refs
            .iter()
            .any(|r| r.ends_with("tifrs-ci-cr-2023-03-31.xsd")));
    }

    #[test]
    fn test_discover_linkbase_refs() {
        let schema = br#"<?xml version="1.0"?>
<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:link="http://www.xbrl.org/2003/linkbase">
  <xsd:annotation><xsd:appinfo>
    <link:linkbaseRef xlink:href="tifrs-ci-cr-2023-03-31_pre.xml"/>
    <link:linkbaseRef xlink:href="tifrs-ci-cr-2023-03-31_lab.xml"/>
  </xsd:appinfo></xsd:annotation>
</xsd:schema>"#;

        let refs = discover_linkbase_refs(schema);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url(
                "https://mops.twse.com.tw/ifrs/2023/t.xsd",
                "t_pre.xml"
            ),
            "https://mops.twse.com.tw/ifrs/2023/t_pre.xml"
        );
        assert_eq!(
            join_url("https://a/b.xsd", "https://c/d.xml"),
            "https://c/d.xml"
        );
    }
}
