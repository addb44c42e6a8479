//! XBRL 申報檔的解析與報表組裝。
//!
//! 流程：ZIP 解包 ([`package`]) → instance 事實與 context 抽取 ([`instance`])
//! → 連結庫解讀 ([`linkbase`]、[`taxonomy`]) → 報表樹組裝 ([`statement`])。

/// instance 解析後端 (iXBRL DOM 與原生 XML 事件流)
pub mod instance;
/// 計算、表達與標籤連結庫
pub mod linkbase;
/// 事實、context、弧與標籤的資料型別
pub mod model;
/// 申報 ZIP 檔解包
pub mod package;
/// 報表樹組裝
pub mod statement;
/// taxonomy 本機快取
pub mod taxonomy;
