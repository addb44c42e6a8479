use std::sync::Arc;

use mops_api::{
    config,
    database::{store::PostgresStore, store::Store, PostgresSQL},
    logging,
    rest,
    service::Mops,
    util::http::{HttpClient, WebFetcher},
    xbrl::taxonomy::TaxonomyResolver,
};

#[cfg(all(target_os = "linux", target_env = "musl"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 組裝根：每個元件建立一次後以握把傳遞。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // reqwest 的 rustls-no-provider 需要行程層級的加密供應者
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let cfg = config::App::get();
    logging::info_file_async(format!(
        "mops_api starting, upstream {} bind {}",
        cfg.mops.base_url, cfg.system.bind
    ));

    let fetcher: Arc<dyn WebFetcher> = Arc::new(HttpClient::new(&cfg.mops)?);
    let taxonomy = Arc::new(TaxonomyResolver::new(&cfg.taxonomy, Arc::clone(&fetcher))?);
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(PostgresSQL::new(&cfg.postgresql)));
    let service = Arc::new(Mops::new(
        cfg.mops.base_url.clone(),
        fetcher,
        store,
        taxonomy,
    ));

    let app = rest::router(service);
    let listener = tokio::net::TcpListener::bind(&cfg.system.bind).await?;
    logging::info_console(format!("listening on {}", cfg.system.bind));
    axum::serve(listener, app).await?;

    Ok(())
}
