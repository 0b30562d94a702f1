// src/snapshot.rs
use crate::process::OfferRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, io::Write, path::Path, sync::Arc};
use tokio::sync::watch;
use tracing::info;

/// Icon hint handed to the host for every offer entity.
pub const OFFER_ICON: &str = "mdi:flash";

/// Everything one successful refresh produced. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub refreshed_at: DateTime<Utc>,
    /// Where the documents came from.
    pub source: String,
    pub offers: Vec<OfferRecord>,
}

/// An offer the way the host's entity registry consumes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEntity {
    /// `"{installation_id}_{offer_code}"`.
    pub unique_id: String,
    pub name: String,
    /// Refresh time, RFC 3339.
    pub state: String,
    pub icon: &'static str,
    pub attributes: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn entities(&self, installation_id: &str) -> Vec<PublishedEntity> {
        self.offers
            .iter()
            .map(|o| PublishedEntity {
                unique_id: format!("{}_{}", installation_id, o.code),
                name: o.name.clone(),
                state: o.refreshed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                icon: OFFER_ICON,
                attributes: o.attributes.clone(),
            })
            .collect()
    }
}

/// Holds the currently published snapshot.
///
/// Publishing swaps the whole `Arc`; readers see either the previous snapshot or the new
/// one, never a mix.
#[derive(Debug)]
pub struct SnapshotStore {
    tx: watch::Sender<Option<Arc<Snapshot>>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Some(snapshot.clone()));
        info!(offers = snapshot.offers.len(), at = %snapshot.refreshed_at, "published snapshot");
        snapshot
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.tx.subscribe()
    }
}

/// Atomically replaces `path` with the snapshot's entities as JSON.
pub fn write_snapshot(path: impl AsRef<Path>, snapshot: &Snapshot, installation_id: &str) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let body = serde_json::json!({
        "refreshed_at": snapshot.refreshed_at,
        "source": snapshot.source,
        "entities": snapshot.entities(installation_id),
    });
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, &body).context("serializing snapshot")?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    info!(path = %path.display(), "wrote snapshot");
    Ok(())
}
