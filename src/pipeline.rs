// src/pipeline.rs
use crate::config::{Settings, SourceSettings};
use crate::errors::{TariffError, TariffResult};
use crate::fetch::{self, mirror, urls::SourceLocator, zips, RawDocument};
use crate::process::{aggregate_offers, parse_table, reconcile, Filters, Table};
use crate::schema::{ColumnRoles, FieldDictionary};
use crate::snapshot::{Snapshot, SnapshotStore};
use chrono::Utc;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{error, info, instrument, warn};

/// One refresh cycle end to end: locate, download, parse, normalize, reconcile, aggregate.
pub struct Pipeline {
    client: Client,
    settings: Settings,
    filters: Filters,
    locator: Option<SourceLocator>,
}

impl Pipeline {
    pub fn new(settings: Settings) -> TariffResult<Self> {
        Self::with_client(fetch::build_client()?, settings)
    }

    pub fn with_client(client: Client, settings: Settings) -> TariffResult<Self> {
        let locator = match &settings.source {
            SourceSettings::Bundle(bundle) => Some(SourceLocator::new(client.clone(), bundle)?),
            SourceSettings::Mirror(_) => None,
        };
        let filters = Filters::from_settings(&settings.filters);
        Ok(Self {
            client,
            settings,
            filters,
            locator,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs one refresh and returns the snapshot it produced. Nothing is published.
    #[instrument(level = "info", skip(self))]
    pub async fn refresh(&self) -> TariffResult<Snapshot> {
        let (source, (conditions, prices)) = self.fetch_documents().await?;

        // parse both documents in parallel on the blocking pool
        let (conditions, prices) = tokio::try_join!(
            parse_blocking(conditions),
            parse_blocking(prices),
        )?;

        let dictionary = FieldDictionary::standard();
        let conditions = dictionary.normalize(&conditions);
        let prices = dictionary.normalize(&prices);

        let merged = reconcile(&conditions, &prices, &self.filters);
        let roles = ColumnRoles::resolve(&merged).ok_or_else(|| TariffError::SchemaColumnMissing {
            field: "offer code".to_string(),
            columns: merged.headers.clone(),
        })?;

        let refreshed_at = Utc::now();
        let offers = aggregate_offers(
            &merged,
            &roles,
            self.settings.aggregation.non_cycle_policy,
            refreshed_at,
        );
        info!(offers = offers.len(), %source, "refresh complete");
        Ok(Snapshot {
            refreshed_at,
            source,
            offers: offers.into_values().collect(),
        })
    }

    /// Refreshes within `timeout` and publishes on success.
    ///
    /// On any failure the store keeps whatever it held before.
    pub async fn refresh_into(&self, store: &SnapshotStore, timeout: Duration) -> TariffResult<Arc<Snapshot>> {
        let outcome = match tokio::time::timeout(timeout, self.refresh()).await {
            Ok(result) => result,
            Err(_) => Err(TariffError::TimedOut(timeout)),
        };
        match outcome {
            Ok(snapshot) => Ok(store.publish(snapshot)),
            Err(e) => {
                match store.current() {
                    Some(prev) => warn!(error = %e, kept = %prev.refreshed_at, "refresh failed; keeping previous snapshot"),
                    None => error!(error = %e, "refresh failed; nothing published yet"),
                }
                Err(e)
            }
        }
    }

    /// Refreshes on start and then every `every` until `shutdown` resolves.
    ///
    /// Shutdown also drops a refresh still in flight. `on_publish` sees every snapshot
    /// that was published.
    pub async fn run_until<F, P>(
        &self,
        store: &SnapshotStore,
        every: Duration,
        timeout: Duration,
        shutdown: F,
        mut on_publish: P,
    ) where
        F: Future<Output = ()>,
        P: FnMut(&Snapshot),
    {
        info!(?every, ?timeout, "scheduling refreshes");
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(ticker);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {}
                _ = &mut shutdown => break,
            }
            tokio::select! {
                outcome = self.refresh_into(store, timeout) => match outcome {
                    Ok(snapshot) => on_publish(&snapshot),
                    Err(e) => warn!(error = %e, "refresh skipped; next attempt at the next interval"),
                },
                _ = &mut shutdown => break,
            }
        }
        info!("shutdown");
    }

    async fn fetch_documents(&self) -> TariffResult<(String, (RawDocument, RawDocument))> {
        match (&self.settings.source, &self.locator) {
            (SourceSettings::Bundle(bundle), Some(locator)) => {
                let url = locator.locate().await;
                let docs = zips::download_bundle(&self.client, &url, bundle).await?;
                Ok((url, docs))
            }
            (SourceSettings::Mirror(m), _) => {
                let docs = mirror::fetch_documents(&self.client, m).await?;
                Ok((m.conditions_url.clone(), docs))
            }
            (SourceSettings::Bundle(_), None) => Err(TariffError::DiscoveryFailed),
        }
    }
}

async fn parse_blocking(doc: RawDocument) -> TariffResult<Table> {
    Ok(tokio::task::spawn_blocking(move || parse_table(&doc.text, doc.name)).await?)
}
