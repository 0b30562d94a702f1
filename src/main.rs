// src/main.rs
use anyhow::{Context, Result};
use std::{env, path::PathBuf};
use tarifarios::{
    config::{self, Settings},
    snapshot::write_snapshot,
    Pipeline, SnapshotStore,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const CONFIG_ENV: &str = "TARIFARIOS_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) load settings ────────────────────────────────────────────
    let settings = match config_path() {
        Some(path) => config::load_settings(&path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => {
            info!("no config file given; using defaults");
            Settings::default()
        }
    };
    let interval_every = settings.refresh_interval();
    let timeout = settings.refresh_timeout();
    let run_once = settings.run_once;
    let output = settings.output_path.clone().map(PathBuf::from);
    let installation_id = settings.installation_id.clone();

    let pipeline = Pipeline::new(settings).context("building pipeline")?;
    let store = SnapshotStore::new();

    // ─── 3) run once ─────────────────────────────────────────────────
    if run_once {
        let snapshot = pipeline
            .refresh_into(&store, timeout)
            .await
            .context("refresh failed")?;
        if let Some(path) = &output {
            write_snapshot(path, &snapshot, &installation_id)?;
        } else {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot.entities(&installation_id))?
            );
        }
        return Ok(());
    }

    // ─── 4) refresh on start, then every interval, until Ctrl-C ──────
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    pipeline
        .run_until(&store, interval_every, timeout, shutdown, |snapshot| {
            if let Some(path) = &output {
                if let Err(e) = write_snapshot(path, snapshot, &installation_id) {
                    error!("writing snapshot failed: {:#}", e);
                }
            }
        })
        .await;
    Ok(())
}

fn config_path() -> Option<PathBuf> {
    env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_ENV).ok())
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}
