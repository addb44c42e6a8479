use std::collections::HashSet;

use chrono::NaiveDate;
use hashbrown::HashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    declare::{Quarter, ReportType},
    error::{Error, Result},
    logging,
    util::datetime,
    xbrl::{
        model::{local_name_of, ArcMap, CalculationArc, Context, Fact, Lang, Period, PresentationArc},
        taxonomy::LinkbaseSet,
    },
};

/// 報表樹的單一節點
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementItem {
    pub concept: String,
    pub label_zh: String,
    pub label_en: String,
    /// 申報值，無對應事實時為空
    pub value: Option<Decimal>,
    /// 對父節點的計算權重，無計算弧時為 +1
    pub weight: Decimal,
    pub depth: u32,
    pub children: Vec<StatementItem>,
}

/// 組裝完成的財務報表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub stock_id: String,
    /// 民國年
    pub year: i32,
    pub quarter: Quarter,
    pub report_type: ReportType,
    pub currency: String,
    /// 申報端使用的十冪倍數 (台灣申報慣例為 1000)
    pub unit_scale: i64,
    pub report_date: NaiveDate,
    /// 表達連結庫查無該報表 role 時為 true 且 items 為空
    pub empty: bool,
    pub items: Vec<StatementItem>,
}

/// 由事實、context 與連結庫組出指定報表的階層樹。
pub fn build(
    stock_id: &str,
    year: i32,
    quarter: Quarter,
    report_type: ReportType,
    facts: &[Fact],
    contexts: &[Context],
    linkbases: &LinkbaseSet,
) -> Result<FinancialStatement> {
    let report_date = datetime::quarter_end_date(year, quarter)
        .ok_or_else(|| Error::Other(format!("invalid period {}Q{}", year, quarter.serial())))?;

    let selected = select_context(stock_id, year, report_date, report_type, contexts);

    let bound = match &selected {
        Some(context) => bind_facts(facts, &context.id),
        None => {
            logging::warn_file_async(format!(
                "no context for {} {}Q{} {:?}, returning empty statement",
                stock_id,
                year,
                quarter.serial(),
                report_type
            ));
            return Ok(empty_statement(stock_id, year, quarter, report_type, report_date));
        }
    };

    let (currency, unit_scale) = monetary_metadata(&bound);

    // 表達連結庫整份缺漏時退回平面事實清單
    if linkbases.presentation.roles.is_empty() {
        let items = flat_items(&bound, linkbases);
        return Ok(FinancialStatement {
            stock_id: stock_id.to_string(),
            year,
            quarter,
            report_type,
            currency,
            unit_scale,
            report_date,
            empty: false,
            items,
        });
    }

    let role_arcs = match linkbases.presentation.role_ending_with(report_type.role_name()) {
        Some(arcs) => arcs,
        None => {
            return Ok(empty_statement(stock_id, year, quarter, report_type, report_date));
        }
    };

    let calc_arcs = linkbases
        .calculation
        .role_ending_with(report_type.role_name())
        .cloned()
        .unwrap_or_else(|| linkbases.calculation.flattened());

    let mut visited: HashSet<String> = HashSet::new();
    let mut items = Vec::new();

    for root in tree_roots(role_arcs) {
        if visited.contains(&root) {
            continue;
        }
        items.push(build_node(
            &root,
            None,
            Decimal::ONE,
            0,
            role_arcs,
            &calc_arcs,
            &bound,
            linkbases,
            &mut visited,
        ));
    }

    Ok(FinancialStatement {
        stock_id: stock_id.to_string(),
        year,
        quarter,
        report_type,
        currency,
        unit_scale,
        report_date,
        empty: false,
        items,
    })
}

fn empty_statement(
    stock_id: &str,
    year: i32,
    quarter: Quarter,
    report_type: ReportType,
    report_date: NaiveDate,
) -> FinancialStatement {
    FinancialStatement {
        stock_id: stock_id.to_string(),
        year,
        quarter,
        report_type,
        currency: "TWD".to_string(),
        unit_scale: DEFAULT_UNIT_SCALE,
        report_date,
        empty: true,
        items: Vec::new(),
    }
}

/// 台灣申報以千元為單位
const DEFAULT_UNIT_SCALE: i64 = 1_000;

/// 依報表種類挑出申報期間的 context。
///
/// 資產負債表取結帳日的時點；其餘取會計年度起始日到結帳日的區間。
/// 同條件多個時優先 entity 與股號一致者，再優先無 scenario/segment 者。
fn select_context<'a>(
    stock_id: &str,
    year: i32,
    report_date: NaiveDate,
    report_type: ReportType,
    contexts: &'a [Context],
) -> Option<&'a Context> {
    let year_start = datetime::fiscal_year_start(year)?;

    let mut candidates: Vec<&Context> = contexts
        .iter()
        .filter(|c| match (&c.period, report_type.is_instant()) {
            (Period::Instant(date), true) => *date == report_date,
            (Period::Duration { start, end }, false) => {
                *end == report_date && *start == year_start
            }
            _ => false,
        })
        .collect();

    candidates.sort_by_key(|c| {
        (
            c.entity_identifier != stock_id,
            c.has_scenario(),
        )
    });

    candidates.first().copied()
}

/// (概念限定名稱或本地名稱) 對數值的索引
struct BoundFacts {
    by_concept: HashMap<String, Option<Decimal>>,
    by_local: HashMap<String, Option<Decimal>>,
    unit_refs: Vec<String>,
    scales: Vec<i32>,
}

fn bind_facts(facts: &[Fact], context_id: &str) -> BoundFacts {
    let mut by_concept = HashMap::new();
    let mut by_local = HashMap::new();
    let mut unit_refs = Vec::new();
    let mut scales = Vec::new();

    for fact in facts.iter().filter(|f| f.context_ref == context_id) {
        let value = fact.value.as_number();
        by_concept.entry(fact.concept.clone()).or_insert(value);
        by_local
            .entry(fact.local_name().to_string())
            .or_insert(value);

        if value.is_some() {
            if let Some(unit_ref) = &fact.unit_ref {
                unit_refs.push(unit_ref.clone());
            }
            if let Some(scale) = fact.scale {
                scales.push(scale);
            }
        }
    }

    BoundFacts {
        by_concept,
        by_local,
        unit_refs,
        scales,
    }
}

impl BoundFacts {
    fn value_of(&self, concept: &str) -> Option<Decimal> {
        if let Some(value) = self.by_concept.get(concept) {
            return *value;
        }
        self.by_local
            .get(local_name_of(concept))
            .copied()
            .flatten()
    }
}

/// 幣別與申報倍數：unit 參照推出幣別，scale 屬性眾數推出倍數。
fn monetary_metadata(bound: &BoundFacts) -> (String, i64) {
    let currency = bound
        .unit_refs
        .iter()
        .find_map(|unit| {
            let tail: String = unit
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_uppercase();
            if tail.len() == 3 {
                Some(tail)
            } else {
                None
            }
        })
        .unwrap_or_else(|| "TWD".to_string());

    let unit_scale = mode(&bound.scales)
        .map(|scale| 10_i64.pow(scale.clamp(0, 18) as u32))
        .unwrap_or(DEFAULT_UNIT_SCALE);

    (currency, unit_scale)
}

fn mode(values: &[i32]) -> Option<i32> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for v in values {
        *counts.entry(*v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(value, count)| (count, -value))
        .map(|(value, _)| value)
}

/// role 內不曾作為 to 端的概念即為樹根
fn tree_roots(arcs: &ArcMap<PresentationArc>) -> Vec<String> {
    let targets: HashSet<&str> = arcs
        .values()
        .flatten()
        .map(|arc| arc.to.as_str())
        .collect();

    let mut roots: Vec<String> = arcs
        .keys()
        .filter(|from| !targets.contains(from.as_str()))
        .cloned()
        .collect();
    roots.sort();
    roots
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    concept: &str,
    preferred_label: Option<&str>,
    weight: Decimal,
    depth: u32,
    presentation: &ArcMap<PresentationArc>,
    calculation: &ArcMap<CalculationArc>,
    bound: &BoundFacts,
    linkbases: &LinkbaseSet,
    visited: &mut HashSet<String>,
) -> StatementItem {
    visited.insert(concept.to_string());

    let local = local_name_of(concept);
    let label_zh = linkbases
        .labels
        .get(concept, Lang::Zh, preferred_label)
        .unwrap_or(local)
        .to_string();
    let label_en = linkbases
        .labels
        .get(concept, Lang::En, preferred_label)
        .unwrap_or(local)
        .to_string();

    let calc_children: HashMap<&str, Decimal> = calculation
        .get(concept)
        .map(|arcs| {
            arcs.iter()
                .map(|arc| (arc.to.as_str(), arc.weight))
                .collect()
        })
        .unwrap_or_default();

    let mut children = Vec::new();
    if let Some(arcs) = presentation.get(concept) {
        for arc in arcs {
            // 每個概念在樹中只出現一次
            if visited.contains(&arc.to) {
                continue;
            }
            let child_weight = calc_children
                .get(arc.to.as_str())
                .copied()
                .unwrap_or(Decimal::ONE);
            children.push(build_node(
                &arc.to,
                arc.preferred_label.as_deref(),
                child_weight,
                depth + 1,
                presentation,
                calculation,
                bound,
                linkbases,
                visited,
            ));
        }
    }

    StatementItem {
        concept: concept.to_string(),
        label_zh,
        label_en,
        value: bound.value_of(concept),
        weight,
        depth,
        children,
    }
}

/// 表達連結庫缺漏時的退路：選定 context 下所有數值事實的平面清單。
fn flat_items(bound: &BoundFacts, linkbases: &LinkbaseSet) -> Vec<StatementItem> {
    let mut concepts: Vec<&String> = bound.by_concept.keys().collect();
    concepts.sort();

    concepts
        .into_iter()
        .filter_map(|concept| {
            let value = bound.value_of(concept)?;
            let local = local_name_of(concept);
            Some(StatementItem {
                concept: concept.clone(),
                label_zh: linkbases
                    .labels
                    .get(concept, Lang::Zh, None)
                    .unwrap_or(local)
                    .to_string(),
                label_en: linkbases
                    .labels
                    .get(concept, Lang::En, None)
                    .unwrap_or(local)
                    .to_string(),
                value: Some(value),
                weight: Decimal::ONE,
                depth: 0,
                children: Vec::new(),
            })
        })
        .collect()
}

/// 檢核計算恆等式：父節點與全數有值子節點的加權和差距須落在
/// max(1, |parent| × 1e-6) 內。回傳違反的概念清單，測試用。
pub fn calculation_violations(statement: &FinancialStatement) -> Vec<String> {
    let mut violations = Vec::new();
    for item in &statement.items {
        collect_violations(item, &mut violations);
    }
    violations
}

fn collect_violations(item: &StatementItem, violations: &mut Vec<String>) {
    if !item.children.is_empty()
        && item.children.iter().all(|c| c.value.is_some())
        && item.value.is_some()
    {
        let parent = item.value.unwrap();
        let sum: Decimal = item
            .children
            .iter()
            .map(|c| c.weight * c.value.unwrap())
            .sum();
        let tolerance = Decimal::ONE.max(parent.abs() * Decimal::new(1, 6));

        if (parent - sum).abs() > tolerance {
            violations.push(item.concept.clone());
        }
    }

    for child in &item.children {
        collect_violations(child, violations);
    }
}

/// 走訪整棵樹收集概念名稱，測試重複檢查用。
pub fn collect_concepts(statement: &FinancialStatement) -> Vec<String> {
    fn walk(item: &StatementItem, out: &mut Vec<String>) {
        out.push(item.concept.clone());
        for child in &item.children {
            walk(child, out);
        }
    }

    let mut out = Vec::new();
    for item in &statement.items {
        walk(item, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::xbrl::{
        linkbase,
        model::{FactValue, Label, RoleLinks},
    };

    use super::*;

    fn context(id: &str, entity: &str, period: Period, scenario: Option<&str>) -> Context {
        Context {
            id: id.to_string(),
            entity_identifier: entity.to_string(),
            period,
            scenario: scenario.map(String::from),
        }
    }

    fn number_fact(concept: &str, context_ref: &str, value: Decimal) -> Fact {
        Fact {
            concept: concept.to_string(),
            context_ref: context_ref.to_string(),
            unit_ref: Some("TWD".to_string()),
            value: FactValue::Number(value),
            decimals: Some(-3),
            scale: Some(3),
        }
    }

    fn duration(start: (i32, u32, u32), end: (i32, u32, u32)) -> Period {
        Period::Duration {
            start: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
        }
    }

    fn income_linkbases() -> LinkbaseSet {
        let presentation_xml = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:presentationLink xlink:role="http://www.xbrl.org/tw/role/StatementOfComprehensiveIncome">
    <link:loc xlink:href="t.xsd#ifrs-full_GrossProfit" xlink:label="GrossProfit"/>
    <link:loc xlink:href="t.xsd#ifrs-full_Revenue" xlink:label="Revenue"/>
    <link:loc xlink:href="t.xsd#ifrs-full_CostOfSales" xlink:label="CostOfSales"/>
    <link:presentationArc xlink:from="GrossProfit" xlink:to="Revenue" order="1"/>
    <link:presentationArc xlink:from="GrossProfit" xlink:to="CostOfSales" order="2"/>
  </link:presentationLink>
</link:linkbase>"#;
        let calculation_xml = r#"<?xml version="1.0"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:calculationLink xlink:role="http://www.xbrl.org/tw/role/StatementOfComprehensiveIncome">
    <link:loc xlink:href="t.xsd#ifrs-full_GrossProfit" xlink:label="GrossProfit"/>
    <link:loc xlink:href="t.xsd#ifrs-full_Revenue" xlink:label="Revenue"/>
    <link:loc xlink:href="t.xsd#ifrs-full_CostOfSales" xlink:label="CostOfSales"/>
    <link:calculationArc xlink:from="GrossProfit" xlink:to="Revenue" weight="1" order="1"/>
    <link:calculationArc xlink:from="GrossProfit" xlink:to="CostOfSales" weight="-1" order="2"/>
  </link:calculationLink>
</link:linkbase>"#;

        let mut labels = crate::xbrl::model::LabelSet::default();
        labels.insert(
            "ifrs-full:Revenue".to_string(),
            Label {
                lang: Lang::Zh,
                role: "label".to_string(),
                text: "營業收入".to_string(),
            },
        );
        labels.insert(
            "ifrs-full:Revenue".to_string(),
            Label {
                lang: Lang::En,
                role: "label".to_string(),
                text: "Operating revenue".to_string(),
            },
        );

        LinkbaseSet {
            calculation: linkbase::parse_calculation(calculation_xml.as_bytes()).unwrap(),
            presentation: linkbase::parse_presentation(presentation_xml.as_bytes()).unwrap(),
            labels,
        }
    }

    fn income_inputs() -> (Vec<Fact>, Vec<Context>) {
        let contexts = vec![
            context(
                "ytd",
                "2330",
                duration((2024, 1, 1), (2024, 9, 30)),
                None,
            ),
            context(
                "q3only",
                "2330",
                duration((2024, 7, 1), (2024, 9, 30)),
                None,
            ),
        ];
        let facts = vec![
            number_fact("ifrs-full:Revenue", "ytd", dec!(2025846000)),
            number_fact("ifrs-full:CostOfSales", "ytd", dec!(887672000)),
            number_fact("ifrs-full:GrossProfit", "ytd", dec!(1138174000)),
            number_fact("ifrs-full:Revenue", "q3only", dec!(759692000)),
        ];
        (facts, contexts)
    }

    #[test]
    fn test_build_income_statement() {
        let linkbases = income_linkbases();
        let (facts, contexts) = income_inputs();

        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::IncomeStatement,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        assert!(!statement.empty);
        assert_eq!(
            statement.report_date,
            NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
        );
        assert_eq!(statement.currency, "TWD");
        assert_eq!(statement.unit_scale, 1_000);
        assert_eq!(statement.items.len(), 1);

        let gross = &statement.items[0];
        assert_eq!(gross.concept, "ifrs-full:GrossProfit");
        assert_eq!(gross.value, Some(dec!(1138174000)));
        assert_eq!(gross.depth, 0);
        assert_eq!(gross.children.len(), 2);

        let revenue = &gross.children[0];
        assert_eq!(revenue.concept, "ifrs-full:Revenue");
        // YTD context 的值，而非單季 context
        assert_eq!(revenue.value, Some(dec!(2025846000)));
        assert_eq!(revenue.label_zh, "營業收入");
        assert_eq!(revenue.label_en, "Operating revenue");
        assert_eq!(revenue.weight, Decimal::ONE);
        assert_eq!(revenue.depth, 1);

        let cost = &gross.children[1];
        assert_eq!(cost.weight, dec!(-1));
        // 標籤缺漏時退回概念本地名稱
        assert_eq!(cost.label_zh, "CostOfSales");
    }

    #[test]
    fn test_accounting_identity_holds() {
        let linkbases = income_linkbases();
        let (facts, contexts) = income_inputs();
        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::IncomeStatement,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        assert!(calculation_violations(&statement).is_empty());
    }

    #[test]
    fn test_accounting_identity_violation_detected() {
        let linkbases = income_linkbases();
        let (mut facts, contexts) = income_inputs();
        // 破壞恆等式
        facts[2] = number_fact("ifrs-full:GrossProfit", "ytd", dec!(999));

        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::IncomeStatement,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        assert_eq!(
            calculation_violations(&statement),
            vec!["ifrs-full:GrossProfit".to_string()]
        );
    }

    #[test]
    fn test_no_duplicate_concepts() {
        let linkbases = income_linkbases();
        let (facts, contexts) = income_inputs();
        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::IncomeStatement,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        let concepts = collect_concepts(&statement);
        let unique: HashSet<&String> = concepts.iter().collect();
        assert_eq!(concepts.len(), unique.len());
    }

    #[test]
    fn test_balance_sheet_selects_instant() {
        let contexts = vec![
            context(
                "asof",
                "2330",
                Period::Instant(NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()),
                None,
            ),
            context(
                "ytd",
                "2330",
                duration((2024, 1, 1), (2024, 9, 30)),
                None,
            ),
        ];

        let selected = select_context(
            "2330",
            113,
            NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
            ReportType::BalanceSheet,
            &contexts,
        )
        .unwrap();
        assert_eq!(selected.id, "asof");

        let selected = select_context(
            "2330",
            113,
            NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
            ReportType::CashFlow,
            &contexts,
        )
        .unwrap();
        assert_eq!(selected.id, "ytd");
    }

    #[test]
    fn test_context_tie_breaks() {
        let period = Period::Instant(NaiveDate::from_ymd_opt(2024, 9, 30).unwrap());
        let contexts = vec![
            context("scenario", "2330", period, Some("<seg/>")),
            context("other_entity", "9999", period, None),
            context("clean", "2330", period, None),
        ];

        let selected = select_context(
            "2330",
            113,
            NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
            ReportType::BalanceSheet,
            &contexts,
        )
        .unwrap();
        assert_eq!(selected.id, "clean");
    }

    #[test]
    fn test_missing_role_returns_empty() {
        let linkbases = income_linkbases();
        let (facts, contexts) = income_inputs();

        // 現金流量表的 role 不存在於連結庫
        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::CashFlow,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        assert!(statement.empty);
        assert!(statement.items.is_empty());
    }

    #[test]
    fn test_missing_presentation_falls_back_to_flat() {
        let mut linkbases = income_linkbases();
        linkbases.presentation = RoleLinks::default();
        let (facts, contexts) = income_inputs();

        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::IncomeStatement,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        assert!(!statement.empty);
        assert_eq!(statement.items.len(), 3);
        assert!(statement.items.iter().all(|i| i.children.is_empty()));
    }

    #[test]
    fn test_json_round_trip() {
        let linkbases = income_linkbases();
        let (facts, contexts) = income_inputs();
        let statement = build(
            "2330",
            113,
            Quarter::Q3,
            ReportType::IncomeStatement,
            &facts,
            &contexts,
            &linkbases,
        )
        .unwrap();

        let json = serde_json::to_string(&statement).unwrap();
        let back: FinancialStatement = serde_json::from_str(&json).unwrap();
        assert_eq!(statement, back);
    }
}
