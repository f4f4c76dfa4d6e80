use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    handle::DEFAULT_HANDLE_LEN,
    handlers::{create_secret, get_secret, health},
    store::{SecretStore, MAX_SECRET_BYTES},
    AppState,
};

/// Largest accepted request body. Percent-encoding can triple a secret's
/// size; the rest covers the other form fields.
pub const MAX_BODY_BYTES: usize = 3 * MAX_SECRET_BYTES + 1024;

#[derive(Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    /// Keep secrets in process memory only (`BURNBOX_IN_MEMORY=true`).
    pub in_memory: bool,
    /// Length of generated secret handles (`BURNBOX_HANDLE_LEN`).
    pub handle_len: usize,
}

impl ServerConfig {
    /// Build a config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: lookup("BURNBOX_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: lookup("BURNBOX_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: lookup("BURNBOX_DATA_DIR").map(PathBuf::from),
            sweep_interval: Duration::from_secs(
                lookup("BURNBOX_SWEEP_SECS")
                    .and_then(|v| v.parse().ok())
                    .filter(|&secs| secs > 0)
                    .unwrap_or(300),
            ),
            cors_origins: lookup("BURNBOX_CORS_ORIGINS"),
            in_memory: lookup("BURNBOX_IN_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            handle_len: lookup("BURNBOX_HANDLE_LEN")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HANDLE_LEN),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

/// Resolve the data directory, creating it if needed. Without an explicit
/// directory this is the platform app data dir (`~/.local/share/burnbox/`, etc.).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "burnbox")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path).context("create data dir")?;
    Ok(path)
}

/// Build the HTTP routes over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/secret", post(create_secret))
        .route("/v1/secret/{hash}", get(get_secret))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = if cfg.in_memory {
        info!("using in-memory store; secrets will not survive a restart");
        SecretStore::in_memory(cfg.handle_len)
    } else {
        let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
        info!(data_dir = %data_dir.display(), "using data directory");
        SecretStore::open(&data_dir.join("burnbox.db"), cfg.handle_len).context("open store")?
    };

    store.clone().spawn_sweep(cfg.sweep_interval);

    let cors = build_cors(cfg.cors_origins.as_deref());
    let app = router(AppState { store })
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, handle_len = cfg.handle_len, "burnbox server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert!(cfg.data_dir.is_none());
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert!(cfg.cors_origins.is_none());
        assert!(!cfg.in_memory);
        assert_eq!(cfg.handle_len, DEFAULT_HANDLE_LEN);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config_from(&[
            ("BURNBOX_HOST", "127.0.0.1"),
            ("BURNBOX_PORT", "9000"),
            ("BURNBOX_DATA_DIR", "/var/lib/burnbox"),
            ("BURNBOX_SWEEP_SECS", "60"),
            ("BURNBOX_CORS_ORIGINS", "https://a.example,https://b.example"),
            ("BURNBOX_IN_MEMORY", "true"),
            ("BURNBOX_HANDLE_LEN", "48"),
        ]);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/var/lib/burnbox")));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(
            cfg.cors_origins.as_deref(),
            Some("https://a.example,https://b.example")
        );
        assert!(cfg.in_memory);
        assert_eq!(cfg.handle_len, 48);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config_from(&[
            ("BURNBOX_PORT", "not-a-port"),
            ("BURNBOX_SWEEP_SECS", "0"),
            ("BURNBOX_HANDLE_LEN", "-1"),
        ]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert_eq!(cfg.handle_len, DEFAULT_HANDLE_LEN);
    }

    #[test]
    fn in_memory_flag_values() {
        for (value, expected) in [("1", true), ("true", true), ("false", false), ("yes", false)] {
            let cfg = config_from(&[("BURNBOX_IN_MEMORY", value)]);
            assert_eq!(cfg.in_memory, expected, "BURNBOX_IN_MEMORY={value}");
        }
    }

    #[test]
    fn explicit_data_dir_is_created() {
        let dir = tempdir().unwrap();
        let wanted = dir.path().join("nested").join("data");
        let resolved = resolve_data_dir(Some(&wanted)).unwrap();
        assert_eq!(resolved, wanted);
        assert!(wanted.is_dir());
    }
}
