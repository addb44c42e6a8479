use chrono::NaiveDate;

use crate::declare::Quarter;

/// 民國年轉西元年
pub fn roc_year_to_gregorian_year(year: i32) -> i32 {
    year + 1911
}

/// 西元年轉民國年
pub fn gregorian_year_to_roc_year(year: i32) -> i32 {
    year - 1911
}

/// 該民國年度與季度的報表結帳日 (西元)
pub fn quarter_end_date(roc_year: i32, quarter: Quarter) -> Option<NaiveDate> {
    let (month, day) = quarter.end_month_day();
    NaiveDate::from_ymd_opt(roc_year_to_gregorian_year(roc_year), month, day)
}

/// 該民國年度的會計年度起始日 (西元 1 月 1 日)
pub fn fiscal_year_start(roc_year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(roc_year_to_gregorian_year(roc_year), 1, 1)
}

/// 解析民國日期字串 (例 112/05/30 或 112-05-30) 為西元日期
pub fn parse_taiwan_date(date_str: &str) -> Option<NaiveDate> {
    let split_date: Vec<&str> = date_str.trim().split(['/', '-']).collect();
    if split_date.len() != 3 {
        return None;
    }

    let year = roc_year_to_gregorian_year(split_date[0].trim().parse::<i32>().ok()?);
    let month = split_date[1].trim().parse::<u32>().ok()?;
    let day = split_date[2].trim().parse::<u32>().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roc_conversion() {
        assert_eq!(roc_year_to_gregorian_year(113), 2024);
        assert_eq!(gregorian_year_to_roc_year(2024), 113);
    }

    #[test]
    fn test_quarter_end_date() {
        assert_eq!(
            quarter_end_date(113, Quarter::Q3),
            NaiveDate::from_ymd_opt(2024, 9, 30)
        );
        assert_eq!(
            quarter_end_date(112, Quarter::Q1),
            NaiveDate::from_ymd_opt(2023, 3, 31)
        );
        assert_eq!(
            quarter_end_date(113, Quarter::Q4),
            NaiveDate::from_ymd_opt(2024, 12, 31)
        );
    }

    #[test]
    fn test_fiscal_year_start() {
        assert_eq!(
            fiscal_year_start(113),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
    }

    #[test]
    fn test_parse_taiwan_date() {
        assert_eq!(
            parse_taiwan_date("112/05/30"),
            NaiveDate::from_ymd_opt(2023, 5, 30)
        );
        assert_eq!(
            parse_taiwan_date("113-12-01"),
            NaiveDate::from_ymd_opt(2024, 12, 1)
        );
        assert_eq!(parse_taiwan_date("not a date"), None);
        assert_eq!(parse_taiwan_date("112/13/40"), None);
    }
}
