use crate::{
    declare::Quarter,
    error::Result,
    util::{
        datetime,
        http::WebFetcher,
        text::TextEncoding,
    },
};

/// XBRL 封裝檔的下載網址。
///
/// 檔名慣例 tifrs-fr1-m1-ci-cr-{股號}-{西元年}Q{季}.zip，
/// 存放於年度目錄下。
pub fn download_url(base_url: &str, stock_id: &str, year: i32, quarter: Quarter) -> String {
    let west_year = datetime::roc_year_to_gregorian_year(year);
    let file_path = urlencoding::encode(&format!("/home/html/nas/ifrs/{}/", west_year)).into_owned();
    format!(
        "{}/server-java/FileDownLoad?step=9&fileName=tifrs-fr1-m1-ci-cr-{}-{}Q{}.zip&filePath={}",
        base_url,
        stock_id,
        west_year,
        quarter.serial(),
        file_path
    )
}

/// 下載指定公司某季的 XBRL 申報 ZIP。
pub async fn fetch(
    fetcher: &dyn WebFetcher,
    base_url: &str,
    stock_id: &str,
    year: i32,
    quarter: Quarter,
) -> Result<Vec<u8>> {
    let url = download_url(base_url, stock_id, year, quarter);
    let body = fetcher.get(&url, TextEncoding::Utf8).await?;
    Ok(body.bytes)
}
