/// 資金貸與及背書保證
pub mod disclosure;
/// 股利分派
pub mod dividend;
/// 財務報表 (items 以 JSONB 儲存)
pub mod financial_statement;
/// 月營收
pub mod revenue;
/// 董監事股權設質
pub mod stock_pledge;
