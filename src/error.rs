use std::sync::Arc;

use thiserror::Error;

/// 系統內部統一的錯誤類別。
///
/// 每個變體對應一種傳播策略：可重試的暫時性錯誤、不可重試的用戶端錯誤、
/// 每次請求即告失敗的解析錯誤，以及僅記錄不中斷的儲存錯誤。
#[derive(Error, Debug)]
pub enum Error {
    /// 網路錯誤或上游 5xx，呼叫端可重試
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// 上游回應 404
    #[error("not found: {0}")]
    NotFound(String),

    /// 上游回應 4xx (404 除外)，不可重試
    #[error("client error (status {status}): {url}")]
    Client { status: u16, url: String },

    /// XBRL 壓縮檔內找不到 instance 或檔案毀損
    #[error("malformed package: {0}")]
    MalformedPackage(String),

    /// XML/HTML 內容無法解析
    #[error("parse failure: {0}")]
    Parse(String),

    /// taxonomy 取得失敗，降級為警告後仍可能由上層回報
    #[error("taxonomy resolution failure: {0}")]
    TaxonomyResolution(String),

    /// 表格列解析失敗比例超過門檻
    #[error("row parsing failed: {skipped} of {total} rows skipped")]
    RowParse { skipped: usize, total: usize },

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("operation cancelled")]
    Cancelled,

    /// single-flight 跟隨者收到領頭請求的錯誤
    #[error(transparent)]
    Shared(Arc<Error>),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// 是否屬於可重試的暫時性錯誤。
    ///
    /// single-flight 轉發的錯誤沿用領頭請求錯誤的判定。
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientFetch(_) => true,
            Error::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// 是否為「查無資料」。
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(shared: Arc<Error>) -> Self {
        Error::Shared(shared)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(why: quick_xml::Error) -> Self {
        Error::Parse(why.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(why: zip::result::ZipError) -> Self {
        Error::MalformedPackage(why.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
