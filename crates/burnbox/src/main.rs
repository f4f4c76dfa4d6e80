use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "burnbox", about = "burnbox: self-destructing secrets", version)]
struct Cli {
    /// burnbox server URL (default: http://localhost:8080 or $BURNBOX_SERVER)
    #[arg(long, env = "BURNBOX_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the burnbox HTTP server
    Serve {
        /// Port to listen on (default: $BURNBOX_PORT or 8080)
        #[arg(long, env = "BURNBOX_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $BURNBOX_HOST or 0.0.0.0)
        #[arg(long, env = "BURNBOX_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Keep secrets in memory only; nothing is written to disk
        #[arg(long)]
        in_memory: bool,
    },
    /// Store a secret and print its one-time URL
    Create {
        /// The secret text
        secret: String,
        /// Number of reads before the secret disappears
        #[arg(long, default_value = "1")]
        views: u32,
        /// Lifetime e.g. 30m, 2h, 7d (rounded up to whole minutes; default: never)
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Read a secret by hash (spends one view)
    Get {
        /// Secret hash
        hash: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BURNBOX_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            in_memory,
        } => cmd_serve(host, port, in_memory).await,
        Commands::Create { secret, views, ttl } => {
            cmd_create(&cli.server, &secret, views, ttl.as_deref()).await
        }
        Commands::Get { hash } => cmd_get(&cli.server, &hash).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, in_memory: bool) -> Result<()> {
    let defaults = burnbox_server::ServerConfig::default();
    let cfg = burnbox_server::ServerConfig {
        host,
        port,
        in_memory: in_memory || defaults.in_memory,
        ..defaults
    };
    burnbox_server::run(cfg).await
}

/// Response fields the client cares about.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretBody {
    hash: String,
    secret_text: String,
    expires_at: Option<String>,
    remaining_views: u32,
}

async fn cmd_create(server: &str, secret: &str, views: u32, ttl: Option<&str>) -> Result<()> {
    let ttl_minutes = ttl.map(parse_minutes).transpose()?.unwrap_or(0);
    let url = secret_url(server, None);
    debug!(%url, views, ttl_minutes, "creating secret");

    let resp = Client::new()
        .post(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("secret", secret.to_owned()),
            ("expireAfterViews", views.to_string()),
            ("expireAfter", ttl_minutes.to_string()),
        ])
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    debug!(%status, "create response");
    if !status.is_success() {
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }

    let body: SecretBody = resp.json().await.context("parse response")?;
    println!("{}", secret_url(server, Some(&body.hash)));
    let expiry = body.expires_at.as_deref().unwrap_or("never");
    eprintln!("views: {}, expires: {expiry}", body.remaining_views);
    Ok(())
}

async fn cmd_get(server: &str, hash: &str) -> Result<()> {
    let url = secret_url(server, Some(hash));
    debug!(%url, "reading secret");

    let resp = Client::new()
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    debug!(%status, "get response");
    if !status.is_success() {
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!("{}", json["error"].as_str().unwrap_or("unknown error"));
    }

    let body: SecretBody = resp.json().await.context("parse response")?;
    println!("{}", body.secret_text);
    eprintln!("views left: {}", body.remaining_views);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn secret_url(server: &str, hash: Option<&str>) -> String {
    let base = server.trim_end_matches('/');
    match hash {
        Some(hash) => format!("{base}/v1/secret/{hash}"),
        None => format!("{base}/v1/secret"),
    }
}

/// Parse human duration strings like "90s", "30m", "7d" into whole minutes,
/// rounding up so a secret never expires earlier than asked.
fn parse_minutes(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs().div_ceil(60))
}
