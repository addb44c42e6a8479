use std::{collections::HashMap, fs::File, io::BufReader, time::Duration};

use async_trait::async_trait;
use reqwest::{header, Certificate, Client, Method, Url};
use tokio::{
    sync::{Mutex, Semaphore},
    time::Instant,
};

use crate::{
    config,
    error::{Error, Result},
    logging,
    util::text::{self, TextEncoding},
};

pub mod user_agent;

/// 單一文件的大小上限，超過即拒絕解析
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// 取回的回應內容
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub text: String,
    pub status: u16,
}

/// 對外請求的介面，測試以假實作替換
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn get(&self, url: &str, encoding: TextEncoding) -> Result<FetchedBody>;

    async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
        encoding: TextEncoding,
    ) -> Result<FetchedBody>;
}

/// 對同一主機限速的請求排程器。
///
/// 每個主機保存一個單調遞增的時間戳，取得鎖後先預約下一個可發送時點再釋放鎖，
/// 等待期間不持有鎖，並行呼叫因此依預約順序對同一主機序列化。
pub struct RateLimiter {
    min_interval: Duration,
    hosts: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// 等到輪到自己對該主機發送為止。
    pub async fn acquire(&self, host: &str) {
        let wait = {
            let mut hosts = self.hosts.lock().await;
            let now = Instant::now();
            let slot = match hosts.get(host) {
                Some(last) => {
                    let next = *last + self.min_interval;
                    if next > now {
                        next
                    } else {
                        now
                    }
                }
                None => now,
            };
            hosts.insert(host.to_string(), slot);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// MOPS 的 HTTP 請求端。
///
/// 不在內部重試，重試策略由服務層決定。
pub struct HttpClient {
    client: Client,
    limiter: RateLimiter,
    semaphore: Semaphore,
}

impl HttpClient {
    pub fn new(cfg: &config::Mops) -> Result<HttpClient> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            user_agent::gen_random_ua()
                .parse()
                .map_err(|_| Error::Other("invalid user agent".to_string()))?,
        );
        headers.insert(
            header::REFERER,
            cfg.base_url
                .parse()
                .map_err(|_| Error::Other(format!("invalid referer: {}", cfg.base_url)))?,
        );

        let mut builder = Client::builder()
            .brotli(true)
            .gzip(true)
            .zstd(true)
            .cookie_store(true)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(3))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(cfg.timeout_secs));

        if let Some(ca_bundle) = &cfg.ca_bundle {
            for cert in load_ca_bundle(ca_bundle)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|why| Error::Other(format!("Failed to create reqwest client: {:?}", why)))?;

        Ok(HttpClient {
            client,
            limiter: RateLimiter::new(Duration::from_millis(cfg.min_interval_ms)),
            semaphore: Semaphore::new(num_cpus::get() * 8),
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: Option<&[(&str, &str)]>,
        encoding: TextEncoding,
    ) -> Result<FetchedBody> {
        let parsed = Url::parse(url).map_err(|why| Error::Other(format!("bad url {}: {}", url, why)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Other(format!("url without host: {}", url)))?
            .to_string();

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        self.limiter.acquire(&host).await;

        let mut rb = self.client.request(method, parsed);
        if let Some(p) = params {
            rb = rb.form(p);
        }

        let start = Instant::now();
        let response = rb.send().await.map_err(|why| {
            logging::error_file_async(format!(
                "Failed to send request to {} because {:?}. {} ms",
                url,
                why,
                start.elapsed().as_millis()
            ));
            Error::TransientFetch(format!("{}: {}", url, why))
        })?;
        drop(permit);

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(Error::NotFound(url.to_string()));
        }
        if status.is_client_error() {
            return Err(Error::Client {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if status.is_server_error() {
            return Err(Error::TransientFetch(format!("{}: HTTP {}", url, status)));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_BODY_BYTES {
                return Err(Error::Parse(format!(
                    "{}: document of {} bytes exceeds the 50 MB limit",
                    url, len
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|why| Error::TransientFetch(format!("{}: {}", url, why)))?
            .to_vec();

        if bytes.len() > MAX_BODY_BYTES {
            return Err(Error::Parse(format!(
                "{}: document of {} bytes exceeds the 50 MB limit",
                url,
                bytes.len()
            )));
        }

        let text = text::decode_with_fallback(&bytes, encoding);

        Ok(FetchedBody {
            bytes,
            text,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl WebFetcher for HttpClient {
    async fn get(&self, url: &str, encoding: TextEncoding) -> Result<FetchedBody> {
        self.send(Method::GET, url, None, encoding).await
    }

    async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
        encoding: TextEncoding,
    ) -> Result<FetchedBody> {
        self.send(Method::POST, url, Some(params), encoding).await
    }
}

/// 讀取 PEM 格式的私有 CA 憑證串。
fn load_ca_bundle(path: &str) -> Result<Vec<Certificate>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut certs = Vec::new();

    for der in rustls_pemfile::certs(&mut reader) {
        let der = der.map_err(|why| Error::Other(format!("bad CA bundle {}: {}", path, why)))?;
        let cert = Certificate::from_der(der.as_ref())
            .map_err(|why| Error::Other(format!("bad certificate in {}: {}", path, why)))?;
        certs.push(cert);
    }

    if certs.is_empty() {
        return Err(Error::Other(format!("no certificates found in {}", path)));
    }

    Ok(certs)
}
