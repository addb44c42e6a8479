//! 台灣上市櫃公司財務資料的快取式 API。
//!
//! 從公開資訊觀測站 (MOPS) 取得 XBRL 財報封裝檔與各式申報頁面，
//! 解析為結構化資料後存入 PostgreSQL，之後同一查詢由儲存層直接供應。

pub mod config;
pub mod crawler;
pub mod database;
pub mod declare;
pub mod error;
pub mod logging;
pub mod rest;
pub mod service;
pub mod util;
pub mod xbrl;
