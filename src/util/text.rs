use std::{collections::HashSet, str::FromStr};

use rust_decimal::Decimal;

const NUMBER_ESCAPE_CHAR: &[char] = &['元', '%', ',', ' ', '"', '\n'];

/// MOPS 以半形或全形破折號表示空值
const NULL_MARKERS: &[&str] = &["-", "—", "–"];

/// 解析 MOPS 頁面與 XBRL 內的數字字串。
///
/// 規則依序為：輸入不存在時回傳 `None`、去除前後空白、移除千分位逗號、
/// 空字串或破折號視為空值、定點數解析失敗回傳 `None`。不會 panic，
/// 呼叫端一律以 `None` 當作缺值處理。
pub fn parse_decimal(input: Option<&str>) -> Option<Decimal> {
    let trimmed = input?.trim();
    let cleaned = trimmed.replace(',', "");

    if cleaned.is_empty() || NULL_MARKERS.contains(&cleaned.as_str()) {
        return None;
    }

    Decimal::from_str(&cleaned).ok()
}

/// 必填欄位版本：解析失敗回傳 Err 供呼叫端計入略過列數。
pub fn parse_required_decimal(input: &str) -> Result<Decimal, String> {
    parse_decimal(Some(input)).ok_or_else(|| format!("not a number: '{}'", input))
}

pub fn parse_i64(s: &str, escape_chars: Option<Vec<char>>) -> Option<i64> {
    let cleaned = clean_escape_chars(s, escape_chars);
    i64::from_str(&cleaned).ok()
}

/// 移除字串中的千分位符號與單位字元。
pub fn clean_escape_chars(s: &str, escape_chars: Option<Vec<char>>) -> String {
    let mut combined: Vec<char> = NUMBER_ESCAPE_CHAR.to_vec();
    if let Some(ec) = escape_chars {
        combined.extend(ec);
    }

    let filters = combined.iter().collect::<HashSet<_>>();
    s.chars().filter(|c| !filters.contains(c)).collect()
}

/// 文件編碼
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextEncoding {
    Big5,
    Utf8,
}

impl TextEncoding {
    fn decode(&self, data: &[u8]) -> String {
        match self {
            TextEncoding::Big5 => encoding_rs::BIG5.decode(data).0.into_owned(),
            TextEncoding::Utf8 => encoding_rs::UTF_8.decode(data).0.into_owned(),
        }
    }

    fn other(&self) -> TextEncoding {
        match self {
            TextEncoding::Big5 => TextEncoding::Utf8,
            TextEncoding::Utf8 => TextEncoding::Big5,
        }
    }
}

/// 以 Big5 解碼 (月營收靜態頁)。
pub fn big5_2_utf8(data: &[u8]) -> String {
    decode_with_fallback(data, TextEncoding::Big5)
}

/// 依提示編碼解碼，替換字元 (U+FFFD) 超過位元組數 1% 時改用另一種編碼，
/// 取替換字元較少者。
pub fn decode_with_fallback(data: &[u8], hint: TextEncoding) -> String {
    let primary = hint.decode(data);
    let primary_bad = replacement_count(&primary);

    if data.is_empty() || primary_bad * 100 < data.len() {
        return primary;
    }

    let fallback = hint.other().decode(data);
    if replacement_count(&fallback) < primary_bad {
        fallback
    } else {
        primary
    }
}

fn replacement_count(text: &str) -> usize {
    text.chars().filter(|c| *c == '\u{FFFD}').count()
}
