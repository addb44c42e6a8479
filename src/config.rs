use std::{env, path::PathBuf, str::FromStr};

use config::{Config as config_config, File as config_file};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::logging;

const CONFIG_PATH: &str = "app.json";

const POSTGRESQL_HOST: &str = "POSTGRESQL_HOST";
const POSTGRESQL_PORT: &str = "POSTGRESQL_PORT";
const POSTGRESQL_USER: &str = "POSTGRESQL_USER";
const POSTGRESQL_PASSWORD: &str = "POSTGRESQL_PASSWORD";
const POSTGRESQL_DB: &str = "POSTGRESQL_DB";
const MOPS_BASE_URL: &str = "MOPS_BASE_URL";
const MOPS_MIN_INTERVAL_MS: &str = "MOPS_MIN_INTERVAL_MS";
const MOPS_TIMEOUT_SECS: &str = "MOPS_TIMEOUT_SECS";
const MOPS_CA_BUNDLE: &str = "MOPS_CA_BUNDLE";
const TAXONOMY_CACHE_DIR: &str = "TAXONOMY_CACHE_DIR";
const SYSTEM_BIND: &str = "SYSTEM_BIND";

pub static SETTINGS: Lazy<App> = Lazy::new(App::get);

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct App {
    #[serde(default)]
    pub postgresql: PostgreSQL,
    #[serde(default)]
    pub mops: Mops,
    #[serde(default)]
    pub taxonomy: Taxonomy,
    #[serde(default)]
    pub system: System,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostgreSQL {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_postgresql_port")]
    pub port: i32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: String,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Mops {
    /// MOPS 網站位址
    #[serde(default = "default_mops_base_url")]
    pub base_url: String,
    /// 對同一主機兩次請求之間的最小間隔 (毫秒)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// 單一請求逾時秒數
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 自訂 CA 憑證檔路徑 (PEM)，供站方使用私有憑證時指定，憑證驗證不關閉
    #[serde(default)]
    pub ca_bundle: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Taxonomy {
    /// taxonomy 檔案的本機快取目錄
    #[serde(default = "default_taxonomy_cache_dir")]
    pub cache_dir: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct System {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_postgresql_port() -> i32 {
    5432
}

fn default_pool_max() -> u32 {
    10
}

fn default_mops_base_url() -> String {
    "https://mops.twse.com.tw".to_string()
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_taxonomy_cache_dir() -> String {
    "taxonomy_cache".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:9001".to_string()
}

impl Default for PostgreSQL {
    fn default() -> Self {
        PostgreSQL {
            host: String::new(),
            port: default_postgresql_port(),
            user: String::new(),
            password: String::new(),
            db: String::new(),
            pool_max: default_pool_max(),
        }
    }
}

impl Default for Mops {
    fn default() -> Self {
        Mops {
            base_url: default_mops_base_url(),
            min_interval_ms: default_min_interval_ms(),
            timeout_secs: default_timeout_secs(),
            ca_bundle: None,
        }
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Taxonomy {
            cache_dir: default_taxonomy_cache_dir(),
        }
    }
}

impl Default for System {
    fn default() -> Self {
        System {
            bind: default_bind(),
        }
    }
}

impl App {
    /// 讀取設定檔，設定檔不存在時以環境變數與預設值建立
    pub fn get() -> Self {
        let config_path = config_path();
        if config_path.exists() {
            let loaded = config_config::builder()
                .add_source(config_file::from(config_path))
                .build()
                .and_then(|c| c.try_deserialize::<App>());
            return match loaded {
                Ok(app) => app.override_with_env(),
                Err(why) => {
                    logging::error_file_async(format!(
                        "I can't read the config context because {:?}",
                        why
                    ));
                    App::default().override_with_env()
                }
            };
        }

        App::default().override_with_env()
    }

    /// 將來自 env 的設定值覆蓋掉 json 上的設定值
    fn override_with_env(mut self) -> Self {
        if let Ok(host) = env::var(POSTGRESQL_HOST) {
            self.postgresql.host = host;
        }

        if let Ok(port) = env::var(POSTGRESQL_PORT) {
            self.postgresql.port = i32::from_str(&port).unwrap_or(default_postgresql_port());
        }

        if let Ok(user) = env::var(POSTGRESQL_USER) {
            self.postgresql.user = user;
        }

        if let Ok(password) = env::var(POSTGRESQL_PASSWORD) {
            self.postgresql.password = password;
        }

        if let Ok(db) = env::var(POSTGRESQL_DB) {
            self.postgresql.db = db;
        }

        if let Ok(base_url) = env::var(MOPS_BASE_URL) {
            self.mops.base_url = base_url;
        }

        if let Ok(interval) = env::var(MOPS_MIN_INTERVAL_MS) {
            self.mops.min_interval_ms = u64::from_str(&interval).unwrap_or(default_min_interval_ms());
        }

        if let Ok(timeout) = env::var(MOPS_TIMEOUT_SECS) {
            self.mops.timeout_secs = u64::from_str(&timeout).unwrap_or(default_timeout_secs());
        }

        if let Ok(ca_bundle) = env::var(MOPS_CA_BUNDLE) {
            self.mops.ca_bundle = Some(ca_bundle);
        }

        if let Ok(cache_dir) = env::var(TAXONOMY_CACHE_DIR) {
            self.taxonomy.cache_dir = cache_dir;
        }

        if let Ok(bind) = env::var(SYSTEM_BIND) {
            self.system.bind = bind;
        }

        self
    }
}

/// 回傳設定檔的路徑
fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let app = App::default();
        assert_eq!(app.mops.base_url, "https://mops.twse.com.tw");
        assert_eq!(app.mops.min_interval_ms, 1_000);
        assert_eq!(app.mops.timeout_secs, 30);
        assert_eq!(app.postgresql.pool_max, 10);
        assert_eq!(app.taxonomy.cache_dir, "taxonomy_cache");
        assert!(app.mops.ca_bundle.is_none());
    }
}
