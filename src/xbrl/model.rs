use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 一筆事實的值：帶 unitRef 的數值型或未帶單位的文字型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FactValue {
    Number(Decimal),
    Text(String),
}

impl FactValue {
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FactValue::Number(n) => Some(*n),
            FactValue::Text(_) => None,
        }
    }
}

/// XBRL 事實
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// 限定名稱，例 ifrs-full:Revenue
    pub concept: String,
    pub context_ref: String,
    pub unit_ref: Option<String>,
    pub value: FactValue,
    pub decimals: Option<i32>,
    pub scale: Option<i32>,
}

impl Fact {
    /// 概念的本地名稱 (去除 namespace 前綴)
    pub fn local_name(&self) -> &str {
        local_name_of(&self.concept)
    }
}

pub fn local_name_of(concept: &str) -> &str {
    concept.rsplit([':', '_']).next().unwrap_or(concept)
}

/// 報導期間：時點或起訖區間
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Instant(NaiveDate),
    Duration { start: NaiveDate, end: NaiveDate },
}

impl Period {
    pub fn end(&self) -> NaiveDate {
        match self {
            Period::Instant(d) => *d,
            Period::Duration { end, .. } => *end,
        }
    }
}

/// XBRL context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub entity_identifier: String,
    pub period: Period,
    /// scenario/segment 原文，保留不解讀
    pub scenario: Option<String>,
}

impl Context {
    pub fn has_scenario(&self) -> bool {
        self.scenario.is_some()
    }
}

/// 計算連結的弧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationArc {
    pub from: String,
    pub to: String,
    pub weight: Decimal,
    pub order: Decimal,
}

/// 表達連結的弧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationArc {
    pub from: String,
    pub to: String,
    pub order: Decimal,
    pub preferred_label: Option<String>,
}

/// 單一 role 下 from 概念對弧的對照
pub type ArcMap<T> = HashMap<String, Vec<T>>;

/// 依 role URI 分組的連結庫
#[derive(Debug, Clone)]
pub struct RoleLinks<T> {
    pub roles: HashMap<String, ArcMap<T>>,
}

impl<T> Default for RoleLinks<T> {
    fn default() -> Self {
        RoleLinks {
            roles: HashMap::new(),
        }
    }
}

impl<T: Clone> RoleLinks<T> {
    /// 找出 role URI 以指定名稱結尾的弧集
    pub fn role_ending_with(&self, role_name: &str) -> Option<&ArcMap<T>> {
        self.roles
            .iter()
            .find(|(uri, _)| uri.ends_with(role_name))
            .map(|(_, arcs)| arcs)
    }

    /// 併入另一份連結庫 (同 role 同 from 的弧串接)
    pub fn merge(&mut self, other: RoleLinks<T>) {
        for (role, arcs) in other.roles {
            let target = self.roles.entry(role).or_default();
            for (from, list) in arcs {
                target.entry(from).or_default().extend(list);
            }
        }
    }

    /// 不分 role 的攤平視圖
    pub fn flattened(&self) -> ArcMap<T> {
        let mut merged: ArcMap<T> = HashMap::new();
        for arcs in self.roles.values() {
            for (from, list) in arcs {
                merged
                    .entry(from.clone())
                    .or_default()
                    .extend(list.iter().cloned());
            }
        }
        merged
    }
}

/// 單一標籤：語言、role 與顯示文字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub lang: Lang,
    /// xlink:role 的結尾段，例 label、terseLabel、verboseLabel
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lang {
    Zh,
    En,
}

/// 概念對多語標籤的對照
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    labels: HashMap<String, Vec<Label>>,
}

impl LabelSet {
    pub fn insert(&mut self, concept: String, label: Label) {
        self.labels.entry(concept).or_default().push(label);
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn merge(&mut self, other: LabelSet) {
        for (concept, labels) in other.labels {
            self.labels.entry(concept).or_default().extend(labels);
        }
    }

    /// 取出概念的顯示標籤。
    ///
    /// 有 preferred_label 時取該 role；否則 terseLabel 優先於 label，
    /// 再優先於 verboseLabel，最後任一同語言標籤。
    pub fn get(&self, concept: &str, lang: Lang, preferred_role: Option<&str>) -> Option<&str> {
        let candidates = self.labels.get(concept)?;
        let of_lang = || candidates.iter().filter(|l| l.lang == lang);

        if let Some(preferred) = preferred_role {
            if let Some(label) = of_lang().find(|l| preferred.ends_with(&l.role)) {
                return Some(&label.text);
            }
        }

        for role in ["terseLabel", "label", "verboseLabel"] {
            if let Some(label) = of_lang().find(|l| l.role == role) {
                return Some(&label.text);
            }
        }

        of_lang().next().map(|l| l.text.as_str())
    }
}
