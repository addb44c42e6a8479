//! 公開資訊觀測站 (MOPS) 的資料採集模組。
//!
//! 每個端點一個子模組，各自提供 `fetch` (經由限速請求端取頁) 與純函數的
//! `parse` (HTML 轉列資料)，查詢情境 (年月、市場別) 由呼叫端傳入。

pub mod mops;
