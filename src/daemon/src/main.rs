use std::env;
use std::sync::Arc;

use chatvault_core::{
    build_router, BackupService, Destination, HttpSiteApi, R2Destination, SiteApi,
    SiteDescriptor, SqliteStore, SyncRunner, VaultConfig, WebDavDestination,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let mut config = match VaultConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("failed to load config, using defaults: {e}");
            VaultConfig::default()
        }
    };
    env_override("CHATVAULT_SITE", &mut config.site.id);
    env_override("CHATVAULT_COOKIE", &mut config.site.cookie);
    env_override("CHATVAULT_BIND", &mut config.server.bind);
    if let Ok(path) = env::var("CHATVAULT_DB_PATH") {
        if !path.is_empty() {
            config.paths.db_path = Some(path);
        }
    }

    let site = SiteDescriptor::by_id(&config.site.id)
        .ok_or_else(|| format!("unknown site id: {}", config.site.id))?;

    let db_path = config.db_path()?;
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let api: Arc<dyn SiteApi> = Arc::new(HttpSiteApi::new(site, &config.site.cookie)?);

    let user_id = if config.site.user_id != 0 {
        config.site.user_id
    } else {
        api.resolve_user_id().await.map_err(|e| {
            format!("resolve current user id: {e}; fix the cookie or set [site] user_id")
        })?
    };
    tracing::info!(site = site.id, user_id, "identity resolved");

    let mut destinations: Vec<Arc<dyn Destination>> = Vec::new();
    if config.webdav.enabled {
        destinations.push(Arc::new(WebDavDestination::new(
            config.webdav.clone(),
            &config.site.id,
            user_id,
        )?));
    }
    if config.r2.enabled {
        destinations.push(Arc::new(R2Destination::new(
            config.r2.clone(),
            &config.site.id,
            user_id,
        )?));
    }
    if destinations.is_empty() {
        tracing::warn!("no backup destination enabled; snapshots stay local");
    }

    let bind = config.server.bind.clone();
    let sync_settings = config.sync.clone();
    let backups = Arc::new(BackupService::new(
        store.clone(),
        destinations,
        config,
        site.id,
        user_id,
    ));

    let sync = Arc::new(SyncRunner::new(
        store.clone(),
        api,
        backups.clone(),
        user_id,
        sync_settings,
    ));
    sync.clone().spawn();

    let app = build_router(store, backups, sync);

    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn env_override(key: &str, slot: &mut String) {
    if let Ok(value) = env::var(key) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("CHATVAULT_LOG")
        .or_else(|_| env::var("RUST_LOG"))
        .ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("CHATVAULT_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
