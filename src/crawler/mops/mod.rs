use crate::{
    error::{Error, Result},
    logging,
};

/// 資金貸與及背書保證
pub mod disclosure;
/// 股利分派
pub mod dividend;
/// 董監事股權設質
pub mod pledge;
/// 月營收
pub mod revenue;
/// XBRL 財報封裝檔下載
pub mod xbrl_zip;

/// MOPS ajax 端點共用的表單參數
pub(crate) fn base_ajax_params() -> Vec<(&'static str, String)> {
    vec![
        ("encodeURIComponent", "1".to_string()),
        ("step", "1".to_string()),
        ("firstin", "1".to_string()),
        ("off", "1".to_string()),
    ]
}

/// 逐列解析的成敗統計。
///
/// MOPS 頁面常夾雜表頭、合計列與格式飄移，單列失敗先略過並記錄，
/// 略過比例超過四分之一視為頁面系統性劣化，整批失敗。
pub(crate) struct RowCounter {
    endpoint: &'static str,
    discovered: usize,
    skipped: usize,
}

impl RowCounter {
    pub(crate) fn new(endpoint: &'static str) -> Self {
        RowCounter {
            endpoint,
            discovered: 0,
            skipped: 0,
        }
    }

    pub(crate) fn discovered(&mut self) {
        self.discovered += 1;
    }

    pub(crate) fn skip(&mut self, reason: String) {
        self.skipped += 1;
        logging::warn_file_async(format!("{} row skipped: {}", self.endpoint, reason));
    }

    /// 略過列數超過已發現列數 25% 時回傳 RowParse 錯誤。
    pub(crate) fn finish(self) -> Result<()> {
        if self.discovered > 0 && self.skipped * 4 > self.discovered {
            return Err(Error::RowParse {
                skipped: self.skipped,
                total: self.discovered,
            });
        }
        Ok(())
    }
}
