use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rust_decimal::Decimal;

use crate::{
    error::{Error, Result},
    logging,
    xbrl::model::{ArcMap, CalculationArc, Label, LabelSet, Lang, PresentationArc, RoleLinks},
};

/// 解析計算連結庫。
///
/// 依 role 分組，每組內以 from 概念為鍵，弧依 order 遞增排序，
/// 同 order 依 to 概念字典序。成環的弧視為無效，丟棄閉環弧並記錄警告。
pub fn parse_calculation(bytes: &[u8]) -> Result<RoleLinks<CalculationArc>> {
    let raw = parse_arcs(bytes, "calculationLink", "calculationArc")?;
    let mut links = RoleLinks::default();

    for (role, arcs) in raw {
        let mut map: ArcMap<CalculationArc> = HashMap::new();
        for arc in arcs {
            let weight = arc
                .attributes
                .get("weight")
                .and_then(|w| Decimal::from_str(w).ok())
                .unwrap_or(Decimal::ONE);
            map.entry(arc.from.clone()).or_default().push(CalculationArc {
                from: arc.from,
                to: arc.to,
                weight,
                order: arc.order,
            });
        }

        drop_cycles(&mut map, &role);

        for list in map.values_mut() {
            list.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.to.cmp(&b.to)));
        }
        links.roles.insert(role, map);
    }

    Ok(links)
}

/// 解析表達連結庫，分組與排序規則同計算連結庫。
pub fn parse_presentation(bytes: &[u8]) -> Result<RoleLinks<PresentationArc>> {
    let raw = parse_arcs(bytes, "presentationLink", "presentationArc")?;
    let mut links = RoleLinks::default();

    for (role, arcs) in raw {
        let mut map: ArcMap<PresentationArc> = HashMap::new();
        for arc in arcs {
            let preferred_label = arc.attributes.get("preferredLabel").cloned();
            map.entry(arc.from.clone()).or_default().push(PresentationArc {
                from: arc.from,
                to: arc.to,
                order: arc.order,
                preferred_label,
            });
        }

        for list in map.values_mut() {
            list.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.to.cmp(&b.to)));
        }
        links.roles.insert(role, map);
    }

    Ok(links)
}

/// 解析標籤連結庫，回傳概念對中英文標籤的對照。
pub fn parse_labels(bytes: &[u8]) -> Result<LabelSet> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut set = LabelSet::default();

    // 單一 labelLink 內：locator 標號對概念、label 元素標號對標籤、labelArc 接起兩者
    let mut locs: HashMap<String, String> = HashMap::new();
    let mut labels: HashMap<String, Vec<Label>> = HashMap::new();
    let mut arcs: Vec<(String, String)> = Vec::new();
    let mut pending_label: Option<(String, Lang, String)> = None;
    let mut pending_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let local = name.local_name();
                match local.as_ref() {
                    b"loc" => {
                        if let (Some(label), Some(href)) =
                            (attr(e, "label"), attr(e, "href"))
                        {
                            locs.insert(label, concept_from_href(&href));
                        }
                    }
                    b"labelArc" => {
                        if let (Some(from), Some(to)) = (attr(e, "from"), attr(e, "to")) {
                            arcs.push((from, to));
                        }
                    }
                    b"label" => {
                        let label_id = attr(e, "label").unwrap_or_default();
                        let role = attr(e, "role")
                            .map(|r| tail_of(&r).to_string())
                            .unwrap_or_else(|| "label".to_string());
                        let lang = attr(e, "lang").and_then(lang_of);

                        if let Some(lang) = lang {
                            pending_label = Some((label_id, lang, role));
                            pending_text.clear();
                        }
                    }
                    _ => {}
                }
            }
            // 自閉合元素：locator 與弧會以此形式出現，空標籤則略過
            Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let local = name.local_name();
                match local.as_ref() {
                    b"loc" => {
                        if let (Some(label), Some(href)) =
                            (attr(e, "label"), attr(e, "href"))
                        {
                            locs.insert(label, concept_from_href(&href));
                        }
                    }
                    b"labelArc" => {
                        if let (Some(from), Some(to)) = (attr(e, "from"), attr(e, "to")) {
                            arcs.push((from, to));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                if pending_label.is_some() {
                    pending_text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                match name.local_name().as_ref() {
                    b"label" => {
                        if let Some((label_id, lang, role)) = pending_label.take() {
                            labels.entry(label_id).or_default().push(Label {
                                lang,
                                role,
                                text: pending_text.clone(),
                            });
                        }
                    }
                    b"labelLink" => {
                        flush_label_link(&mut set, &locs, &labels, &arcs);
                        locs.clear();
                        labels.clear();
                        arcs.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(why) => return Err(Error::Parse(format!("label linkbase: {}", why))),
        }
        buf.clear();
    }

    Ok(set)
}

fn flush_label_link(
    set: &mut LabelSet,
    locs: &HashMap<String, String>,
    labels: &HashMap<String, Vec<Label>>,
    arcs: &[(String, String)],
) {
    for (from, to) in arcs {
        let concept = match locs.get(from) {
            Some(c) => c,
            None => continue,
        };
        if let Some(list) = labels.get(to) {
            for label in list {
                set.insert(concept.clone(), label.clone());
            }
        }
    }
}

/// 弧的中介表示：locator 標號已換回概念名稱
struct RawArc {
    from: String,
    to: String,
    order: Decimal,
    attributes: HashMap<String, String>,
}

/// 讀出指定延伸連結內的所有弧，locator 標號解析為概念名稱。
fn parse_arcs(
    bytes: &[u8],
    link_element: &str,
    arc_element: &str,
) -> Result<HashMap<String, Vec<RawArc>>> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut result: HashMap<String, Vec<RawArc>> = HashMap::new();

    let mut current_role: Option<String> = None;
    let mut locs: HashMap<String, String> = HashMap::new();
    // (from 標號, to 標號, 其餘屬性)
    let mut arcs: Vec<(String, String, HashMap<String, String>)> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let local = name.local_name();
                if local.as_ref() == link_element.as_bytes() {
                    current_role = attr(e, "role");
                } else if local.as_ref() == b"loc" {
                    if let (Some(label), Some(href)) = (attr(e, "label"), attr(e, "href")) {
                        locs.insert(label, concept_from_href(&href));
                    }
                } else if local.as_ref() == arc_element.as_bytes() {
                    if let (Some(from), Some(to)) = (attr(e, "from"), attr(e, "to")) {
                        arcs.push((from, to, all_attrs(e)));
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if name.local_name().as_ref() == link_element.as_bytes() {
                    let role = current_role.take().unwrap_or_default();
                    let resolved = result.entry(role).or_default();

                    for (from, to, attributes) in arcs.drain(..) {
                        let from_concept = locs.get(&from).cloned().unwrap_or(from);
                        let to_concept = locs.get(&to).cloned().unwrap_or(to);
                        let order = attributes
                            .get("order")
                            .and_then(|o| Decimal::from_str(o).ok())
                            .unwrap_or(Decimal::ONE);
                        resolved.push(RawArc {
                            from: from_concept,
                            to: to_concept,
                            order,
                            attributes,
                        });
                    }
                    locs.clear();
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(why) => return Err(Error::Parse(format!("{}: {}", link_element, why))),
        }
        buf.clear();
    }

    Ok(result)
}

/// 深度優先走訪偵測計算弧的環，丟棄閉環弧。
fn drop_cycles(map: &mut ArcMap<CalculationArc>, role: &str) {
    let mut visited: HashSet<String> = HashSet::new();
    let mut dropped: Vec<(String, String)> = Vec::new();

    let mut roots: Vec<String> = map.keys().cloned().collect();
    roots.sort();

    for root in roots {
        if visited.contains(&root) {
            continue;
        }

        let mut stack: Vec<(String, Vec<String>)> = vec![(root.clone(), vec![root.clone()])];
        while let Some((node, path)) = stack.pop() {
            visited.insert(node.clone());

            let children: Vec<String> = map
                .get(&node)
                .map(|arcs| arcs.iter().map(|a| a.to.clone()).collect())
                .unwrap_or_default();

            for child in children {
                if path.contains(&child) {
                    dropped.push((node.clone(), child.clone()));
                    continue;
                }
                // 環上的節點必為 map 的鍵，之後會輪到它當根，已走過的子樹不需重走
                if visited.contains(&child) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(child.clone());
                stack.push((child, next_path));
            }
        }
    }

    for (from, to) in dropped {
        if let Some(arcs) = map.get_mut(&from) {
            arcs.retain(|a| a.to != to);
            if arcs.is_empty() {
                map.remove(&from);
            }
        }
        logging::warn_file_async(format!(
            "calculation cycle dropped: {} -> {} (role {})",
            from, to, role
        ));
    }
}

/// 取屬性值，以本地名稱比對 (忽略 xlink/xml 前綴)。
fn attr(e: &BytesStart<'_>, local: &str) -> Option<String> {
    for attribute in e.attributes().flatten() {
        if attribute.key.local_name().as_ref() == local.as_bytes() {
            return std::str::from_utf8(&attribute.value)
                .ok()
                .map(|v| v.to_string());
        }
    }
    None
}

fn all_attrs(e: &BytesStart<'_>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for attribute in e.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attribute.key.local_name().as_ref()),
            std::str::from_utf8(&attribute.value),
        ) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// 由 locator 的 href 片段取出概念名稱。
///
/// href 片段形如 `tifrs.xsd#ifrs-full_Assets`，片段內第一個底線分隔
/// namespace 前綴與本地名稱，轉回 `ifrs-full:Assets` 的限定名稱形式。
fn concept_from_href(href: &str) -> String {
    let fragment = href.rsplit('#').next().unwrap_or(href);
    match fragment.find('_') {
        Some(pos) => format!("{}:{}", &fragment[..pos], &fragment[pos + 1..]),
        None => fragment.to_string(),
    }
}

fn tail_of(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

fn lang_of(lang: String) -> Option<Lang> {
    let lowered = lang.to_ascii_lowercase();
    if lowered == "zh" || lowered.starts_with("zh-") {
        Some(Lang::Zh)
    } else if lowered == "en" || lowered.starts_with("en-") {
        Some(Lang::En)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const CALCULATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:calculationLink xlink:type="extended" xlink:role="http://www.xbrl.org/tw/role/StatementOfComprehensiveIncome">
    <link:loc xlink:type="locator" xlink:href="tifrs.xsd#ifrs-full_GrossProfit" xlink:label="GrossProfit"/>
    <link:loc xlink:type="locator" xlink:href="tifrs.xsd#ifrs-full_Revenue" xlink:label="Revenue"/>
    <link:loc xlink:type="locator" xlink:href="tifrs.xsd#ifrs-full_CostOfSales" xlink:label="CostOfSales"/>
    <link:calculationArc xlink:type="arc" xlink:from="GrossProfit" xlink:to="CostOfSales" weight="-1" order="2"/>
    <link:calculationArc xlink:type="arc" xlink:from="GrossProfit" xlink:to="Revenue" order="1"/>
  </link:calculationLink>
</link:linkbase>"#;

    #[test]
    fn test_parse_calculation() {
        let links = parse_calculation(CALCULATION.as_bytes()).unwrap();
        let arcs = links
            .role_ending_with("StatementOfComprehensiveIncome")
            .unwrap();
        let children = &arcs["ifrs-full:GrossProfit"];

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].to, "ifrs-full:Revenue");
        assert_eq!(children[0].weight, Decimal::ONE);
        assert_eq!(children[1].to, "ifrs-full:CostOfSales");
        assert_eq!(children[1].weight, dec!(-1));
    }

    #[test]
    fn test_calculation_cycle_dropped() {
        let xml = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:calculationLink xlink:role="http://example.com/role/Loop">
    <link:loc xlink:href="t.xsd#ns_A" xlink:label="A"/>
    <link:loc xlink:href="t.xsd#ns_B" xlink:label="B"/>
    <link:calculationArc xlink:from="A" xlink:to="B" order="1"/>
    <link:calculationArc xlink:from="B" xlink:to="A" order="1"/>
  </link:calculationLink>
</link:linkbase>"#;

        let links = parse_calculation(xml.as_bytes()).unwrap();
        let arcs = links.role_ending_with("Loop").unwrap();
        let total: usize = arcs.values().map(|v| v.len()).sum();

        // 閉環弧被丟棄，留下非環的那一條
        assert_eq!(total, 1);
    }

    #[test]
    fn test_parse_presentation() {
        let xml = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:presentationLink xlink:role="http://www.xbrl.org/tw/role/StatementOfFinancialPosition">
    <link:loc xlink:href="t.xsd#ifrs-full_Assets" xlink:label="Assets"/>
    <link:loc xlink:href="t.xsd#ifrs-full_CurrentAssets" xlink:label="CurrentAssets"/>
    <link:loc xlink:href="t.xsd#ifrs-full_NoncurrentAssets" xlink:label="NoncurrentAssets"/>
    <link:presentationArc xlink:from="Assets" xlink:to="NoncurrentAssets" order="2.0"/>
    <link:presentationArc xlink:from="Assets" xlink:to="CurrentAssets" order="1.0" preferredLabel="http://www.xbrl.org/2003/role/terseLabel"/>
  </link:presentationLink>
</link:linkbase>"#;

        let links = parse_presentation(xml.as_bytes()).unwrap();
        let arcs = links
            .role_ending_with("StatementOfFinancialPosition")
            .unwrap();
        let children = &arcs["ifrs-full:Assets"];

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].to, "ifrs-full:CurrentAssets");
        assert!(children[0]
            .preferred_label
            .as_deref()
            .unwrap()
            .ends_with("terseLabel"));
        assert_eq!(children[1].to, "ifrs-full:NoncurrentAssets");
    }

    #[test]
    fn test_parse_labels() {
        let xml = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:xml="http://www.w3.org/XML/1998/namespace">
  <link:labelLink xlink:role="http://www.xbrl.org/2003/role/link">
    <link:loc xlink:href="t.xsd#ifrs-full_Revenue" xlink:label="Revenue"/>
    <link:label xlink:label="Revenue_zh" xlink:role="http://www.xbrl.org/2003/role/label" xml:lang="zh">營業收入</link:label>
    <link:label xlink:label="Revenue_en" xlink:role="http://www.xbrl.org/2003/role/label" xml:lang="en">Operating revenue</link:label>
    <link:labelArc xlink:from="Revenue" xlink:to="Revenue_zh"/>
    <link:labelArc xlink:from="Revenue" xlink:to="Revenue_en"/>
  </link:labelLink>
</link:linkbase>"#;

        let set = parse_labels(xml.as_bytes()).unwrap();
        assert_eq!(
            set.get("ifrs-full:Revenue", Lang::Zh, None),
            Some("營業收入")
        );
        assert_eq!(
            set.get("ifrs-full:Revenue", Lang::En, None),
            Some("Operating revenue")
        );
    }

    #[test]
    fn test_empty_linkbase() {
        let xml = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"/>"#;

        let links = parse_calculation(xml.as_bytes()).unwrap();
        assert!(links.roles.is_empty());

        let labels = parse_labels(xml.as_bytes()).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn test_invalid_xml_is_parse_error() {
        // 起訖標籤不對稱，解析器必須回報錯誤而非回傳部分結果
        let broken = br#"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase">
  <link:calculationLink xlink:role="http://example.com/role/Broken">
    <link:loc xlink:href="t.xsd#ns_A" xlink:label="A"/>
  </link:wrongClose>
</link:linkbase>"#;

        assert!(matches!(parse_calculation(broken), Err(Error::Parse(_))));
        assert!(matches!(parse_presentation(broken), Err(Error::Parse(_))));
    }
}
