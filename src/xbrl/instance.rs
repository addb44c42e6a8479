use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html};

use crate::{
    error::{Error, Result},
    logging,
    util::text,
    xbrl::model::{Context, Fact, FactValue, Period},
};

/// XBRL instance 解析後端。
///
/// 兩種實作：`DomBackend` 處理內嵌於 HTML 的 iXBRL，`EventBackend`
/// 處理原生 `<xbrli:xbrl>` 文件。由 [`Parser`] 依內容挑選，失敗時逐操作
/// 換用另一個後端。
pub trait XbrlBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// 此後端是否能處理該文件
    fn check_available(&self, bytes: &[u8]) -> bool;

    /// 依文件順序取出所有事實
    fn extract_facts(&self, bytes: &[u8]) -> Result<Vec<Fact>>;

    /// 取出所有 context
    fn extract_contexts(&self, bytes: &[u8]) -> Result<Vec<Context>>;
}

/// 以 scraper 走訪 DOM 的 iXBRL 後端
pub struct DomBackend;

/// 以 quick-xml 事件流處理原生 XBRL 的後端
pub struct EventBackend;

/// 解析入口：組合兩個後端，內容探測選主後端，逐操作備援。
pub struct Parser {
    backends: Vec<Box<dyn XbrlBackend>>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            backends: vec![Box::new(DomBackend), Box::new(EventBackend)],
        }
    }

    pub fn extract_facts(&self, bytes: &[u8]) -> Result<Vec<Fact>> {
        self.run(bytes, |backend| backend.extract_facts(bytes))
    }

    pub fn extract_contexts(&self, bytes: &[u8]) -> Result<Vec<Context>> {
        self.run(bytes, |backend| backend.extract_contexts(bytes))
    }

    fn run<T>(
        &self,
        bytes: &[u8],
        op: impl Fn(&dyn XbrlBackend) -> Result<T>,
    ) -> Result<T> {
        let mut ordered: Vec<&dyn XbrlBackend> = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            if backend.check_available(bytes) {
                ordered.insert(0, backend.as_ref());
            } else {
                ordered.push(backend.as_ref());
            }
        }

        let mut last_error = Error::Parse("no backend available".to_string());
        for backend in ordered {
            match op(backend) {
                Ok(result) => return Ok(result),
                Err(why) => {
                    logging::warn_file_async(format!(
                        "xbrl backend {} failed: {}",
                        backend.name(),
                        why
                    ));
                    last_error = why;
                }
            }
        }

        Err(last_error)
    }
}

/// 丟棄 context 無法對應的事實。
pub fn discard_orphan_facts(facts: Vec<Fact>, contexts: &[Context]) -> Vec<Fact> {
    let known: HashSet<&str> = contexts.iter().map(|c| c.id.as_str()).collect();
    let (kept, orphaned): (Vec<Fact>, Vec<Fact>) = facts
        .into_iter()
        .partition(|f| known.contains(f.context_ref.as_str()));

    for fact in &orphaned {
        logging::warn_file_async(format!(
            "fact {} discarded: unknown context {}",
            fact.concept, fact.context_ref
        ));
    }

    kept
}

/// iXBRL 的 sign 與 scale 轉換：value × (sign == "-" ? -1 : 1) × 10^scale
fn apply_transforms(parsed: Decimal, sign: Option<&str>, scale: Option<i32>) -> Decimal {
    let mut value = parsed;

    if let Some(scale) = scale {
        let magnitude = scale.unsigned_abs().min(18);
        let multiplier = Decimal::from(10_i64.pow(magnitude));
        match scale.cmp(&0) {
            Ordering::Greater => value *= multiplier,
            Ordering::Less => value /= multiplier,
            Ordering::Equal => {}
        }
    }

    if sign == Some("-") {
        value = -value;
    }

    value
}

fn build_value(
    raw: &str,
    unit_ref: Option<&str>,
    sign: Option<&str>,
    scale: Option<i32>,
) -> FactValue {
    if unit_ref.is_some() {
        if let Some(parsed) = text::parse_decimal(Some(raw)) {
            return FactValue::Number(apply_transforms(parsed, sign, scale));
        }
    }

    FactValue::Text(raw.trim().to_string())
}

impl XbrlBackend for DomBackend {
    fn name(&self) -> &'static str {
        "dom"
    }

    fn check_available(&self, bytes: &[u8]) -> bool {
        let head_len = bytes.len().min(2048);
        let head = String::from_utf8_lossy(&bytes[..head_len]).to_ascii_lowercase();
        head.contains("<html")
    }

    fn extract_facts(&self, bytes: &[u8]) -> Result<Vec<Fact>> {
        let document = Html::parse_document(&String::from_utf8_lossy(bytes));
        let mut facts = Vec::new();

        for element in dom_elements(&document) {
            let value = element.value();
            let concept = match attr_ci(value, "name") {
                Some(name) => name,
                None => continue,
            };
            let context_ref = match attr_ci(value, "contextref") {
                Some(context_ref) => context_ref,
                None => continue,
            };

            let unit_ref = attr_ci(value, "unitref");
            let decimals = attr_ci(value, "decimals").and_then(|d| d.parse::<i32>().ok());
            let scale = attr_ci(value, "scale").and_then(|s| s.parse::<i32>().ok());
            let sign = attr_ci(value, "sign");
            let raw = element.text().collect::<String>();

            facts.push(Fact {
                value: build_value(&raw, unit_ref.as_deref(), sign.as_deref(), scale),
                concept,
                context_ref,
                unit_ref,
                decimals,
                scale,
            });
        }

        if facts.is_empty() && !self.check_available(bytes) {
            return Err(Error::Parse("document is not inline XBRL".to_string()));
        }

        Ok(facts)
    }

    fn extract_contexts(&self, bytes: &[u8]) -> Result<Vec<Context>> {
        let document = Html::parse_document(&String::from_utf8_lossy(bytes));
        let mut contexts = Vec::new();

        for element in dom_elements(&document) {
            if local_tag(element.value().name()) != "context" {
                continue;
            }
            let id = match attr_ci(element.value(), "id") {
                Some(id) => id,
                None => continue,
            };

            let entity_identifier = descendant_text(&element, "identifier").unwrap_or_default();
            let period = match dom_period(&element) {
                Some(period) => period,
                None => continue,
            };
            let scenario = descendant_text(&element, "scenario")
                .or_else(|| descendant_text(&element, "segment"));

            contexts.push(Context {
                id,
                entity_identifier,
                period,
                scenario,
            });
        }

        Ok(contexts)
    }
}

fn dom_elements(document: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    document.root_element().descendants().filter_map(ElementRef::wrap)
}

/// html5ever 會將屬性名稱轉為小寫，仍以不分大小寫比對求穩
fn attr_ci(element: &scraper::node::Element, name: &str) -> Option<String> {
    element
        .attrs()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.to_string())
}

fn local_tag(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn descendant_text(element: &ElementRef<'_>, local: &str) -> Option<String> {
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| local_tag(e.value().name()) == local)
        .map(|e| e.text().collect::<String>().trim().to_string())
}

fn dom_period(element: &ElementRef<'_>) -> Option<Period> {
    if let Some(instant) = descendant_text(element, "instant") {
        return parse_date(&instant).map(Period::Instant);
    }

    let start = parse_date(&descendant_text(element, "startdate")?)?;
    let end = parse_date(&descendant_text(element, "enddate")?)?;
    Some(Period::Duration { start, end })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

impl XbrlBackend for EventBackend {
    fn name(&self) -> &'static str {
        "event"
    }

    fn check_available(&self, bytes: &[u8]) -> bool {
        let head_len = bytes.len().min(2048);
        let head = String::from_utf8_lossy(&bytes[..head_len]);
        head.contains("<xbrli:xbrl") || head.contains("<xbrl ") || head.contains("<xbrl>")
    }

    fn extract_facts(&self, bytes: &[u8]) -> Result<Vec<Fact>> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut facts = Vec::new();
        let mut depth = 0usize;
        // (元素名稱, contextRef, unitRef, decimals, scale, sign, 文字)
        let mut pending: Option<(String, String, Option<String>, Option<i32>, Option<i32>, Option<String>, String)> =
            None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    depth += 1;
                    if pending.is_none() && depth >= 2 {
                        let mut context_ref = None;
                        let mut unit_ref = None;
                        let mut decimals = None;
                        let mut scale = None;
                        let mut sign = None;

                        for attribute in e.attributes().flatten() {
                            match attribute.key.local_name().as_ref() {
                                b"contextRef" => {
                                    context_ref = std::str::from_utf8(&attribute.value)
                                        .ok()
                                        .map(String::from)
                                }
                                b"unitRef" => {
                                    unit_ref = std::str::from_utf8(&attribute.value)
                                        .ok()
                                        .map(String::from)
                                }
                                b"decimals" => {
                                    decimals = std::str::from_utf8(&attribute.value)
                                        .ok()
                                        .and_then(|v| v.parse().ok())
                                }
                                b"scale" => {
                                    scale = std::str::from_utf8(&attribute.value)
                                        .ok()
                                        .and_then(|v| v.parse().ok())
                                }
                                b"sign" => {
                                    sign = std::str::from_utf8(&attribute.value)
                                        .ok()
                                        .map(String::from)
                                }
                                _ => {}
                            }
                        }

                        if let Some(context_ref) = context_ref {
                            let concept = String::from_utf8_lossy(e.name().as_ref()).to_string();
                            pending = Some((
                                concept,
                                context_ref,
                                unit_ref,
                                decimals,
                                scale,
                                sign,
                                String::new(),
                            ));
                        }
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    // 自閉合的空值事實
                    if pending.is_none() && depth >= 1 {
                        let has_context_ref = e
                            .attributes()
                            .flatten()
                            .any(|a| a.key.local_name().as_ref() == b"contextRef");
                        if has_context_ref {
                            let concept = String::from_utf8_lossy(e.name().as_ref()).to_string();
                            let context_ref = e
                                .attributes()
                                .flatten()
                                .find(|a| a.key.local_name().as_ref() == b"contextRef")
                                .and_then(|a| std::str::from_utf8(&a.value).ok().map(String::from))
                                .unwrap_or_default();
                            facts.push(Fact {
                                concept,
                                context_ref,
                                unit_ref: None,
                                value: FactValue::Text(String::new()),
                                decimals: None,
                                scale: None,
                            });
                        }
                    }
                }
                Ok(Event::Text(ref t)) => {
                    if let Some(fact) = pending.as_mut() {
                        fact.6.push_str(&t.unescape().unwrap_or_default());
                    }
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                    if let Some((concept, context_ref, unit_ref, decimals, scale, sign, raw)) =
                        pending.take()
                    {
                        facts.push(Fact {
                            value: build_value(
                                &raw,
                                unit_ref.as_deref(),
                                sign.as_deref(),
                                scale,
                            ),
                            concept,
                            context_ref,
                            unit_ref,
                            decimals,
                            scale,
                        });
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(why) => return Err(Error::Parse(format!("instance facts: {}", why))),
            }
            buf.clear();
        }

        Ok(facts)
    }

    fn extract_contexts(&self, bytes: &[u8]) -> Result<Vec<Context>> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut contexts = Vec::new();

        let mut current: Option<ContextBuilder> = None;
        let mut text_target: Option<&'static str> = None;
        let mut scenario_depth = 0usize;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = e.name();
                    let local = name.local_name();
                    match local.as_ref() {
                        b"context" => {
                            let mut builder = ContextBuilder::default();
                            for attribute in e.attributes().flatten() {
                                if attribute.key.local_name().as_ref() == b"id" {
                                    builder.id = std::str::from_utf8(&attribute.value)
                                        .unwrap_or_default()
                                        .to_string();
                                }
                            }
                            current = Some(builder);
                        }
                        b"identifier" if scenario_depth == 0 => text_target = Some("identifier"),
                        b"instant" if scenario_depth == 0 => text_target = Some("instant"),
                        b"startDate" if scenario_depth == 0 => text_target = Some("start"),
                        b"endDate" if scenario_depth == 0 => text_target = Some("end"),
                        b"scenario" | b"segment" => {
                            scenario_depth += 1;
                            if let Some(builder) = current.as_mut() {
                                builder.scenario.get_or_insert_with(String::new);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(ref t)) => {
                    let content = t.unescape().unwrap_or_default().to_string();
                    if let Some(builder) = current.as_mut() {
                        if scenario_depth > 0 {
                            if let Some(scenario) = builder.scenario.as_mut() {
                                scenario.push_str(&content);
                            }
                        } else if let Some(target) = text_target {
                            builder.set(target, &content);
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    let name = e.name();
                    let local = name.local_name();
                    match local.as_ref() {
                        b"context" => {
                            if let Some(builder) = current.take() {
                                match builder.build() {
                                    Some(context) => contexts.push(context),
                                    None => logging::warn_file_async(
                                        "context without a valid period skipped".to_string(),
                                    ),
                                }
                            }
                        }
                        b"scenario" | b"segment" => scenario_depth = scenario_depth.saturating_sub(1),
                        _ => text_target = None,
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(why) => return Err(Error::Parse(format!("instance contexts: {}", why))),
            }
            buf.clear();
        }

        Ok(contexts)
    }
}

#[derive(Default)]
struct ContextBuilder {
    id: String,
    identifier: String,
    instant: Option<String>,
    start: Option<String>,
    end: Option<String>,
    scenario: Option<String>,
}

impl ContextBuilder {
    fn set(&mut self, target: &str, content: &str) {
        match target {
            "identifier" => self.identifier.push_str(content),
            "instant" => *self.instant.get_or_insert_with(String::new) = content.to_string(),
            "start" => *self.start.get_or_insert_with(String::new) = content.to_string(),
            "end" => *self.end.get_or_insert_with(String::new) = content.to_string(),
            _ => {}
        }
    }

    fn build(self) -> Option<Context> {
        let period = if let Some(instant) = self.instant {
            Period::Instant(parse_date(&instant)?)
        } else {
            Period::Duration {
                start: parse_date(&self.start?)?,
                end: parse_date(&self.end?)?,
            }
        };

        Some(Context {
            id: self.id,
            entity_identifier: self.identifier.trim().to_string(),
            period,
            scenario: self.scenario,
        })
    }
}
