// src/fetch/urls.rs
use super::get_text;
use crate::config::BundleSettings;
use crate::errors::{TariffError, TariffResult};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

/// At most this many time-of-day codes are tried per day when guessing file names.
const MAX_CODES_PER_DAY: usize = 10;

/// Anchor classes or texts that suggest a link to the CSV bundle.
const LINK_KEYWORDS: &[&str] = &["csv", "download", "descarregar", "ficheiro", "dados", "zip"];

/// Finds the download URL of the current data bundle.
///
/// Tries, in order: links found on the landing page, file names synthesized for the last
/// few days, and finally a fixed URL known to have worked before. The fixed URL makes
/// [`SourceLocator::locate`] infallible.
pub struct SourceLocator {
    client: Client,
    landing_url: Url,
    /// Scheme + host (+ port) of the bundle directory.
    origin: String,
    /// Bundle directory URL without trailing slash.
    csv_base: String,
    fallback_url: String,
    page_timeout: Duration,
    probe_timeout: Duration,
    lookback_days: u32,
    time_codes: Vec<String>,
    patterns: Patterns,
}

struct Patterns {
    paths: Regex,
    full_urls: Regex,
    dated_names: Regex,
    script_literals: Regex,
    updated_label: Regex,
    anchors: Selector,
    scripts: Selector,
}

impl SourceLocator {
    pub fn new(client: Client, settings: &BundleSettings) -> TariffResult<Self> {
        let landing_url = Url::parse(&settings.landing_url)
            .map_err(|e| TariffError::Config(format!("landing_url: {}", e)))?;
        let base = Url::parse(&settings.csv_base_url)
            .map_err(|e| TariffError::Config(format!("csv_base_url: {}", e)))?;
        let origin = base.origin().ascii_serialization();
        let dir = base.path().trim_end_matches('/').to_string();
        let csv_base = format!("{}{}", origin, dir);

        Ok(Self {
            client,
            landing_url,
            patterns: Patterns::new(&origin, &dir)?,
            origin,
            csv_base,
            fallback_url: settings.fallback_url.clone(),
            page_timeout: Duration::from_secs(settings.page_timeout_secs),
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs),
            lookback_days: settings.lookback_days,
            time_codes: settings.time_codes.clone(),
        })
    }

    /// URL of the current bundle. Never fails: when nothing else works the fallback is returned.
    #[instrument(level = "info", skip(self), fields(landing = %self.landing_url))]
    pub async fn locate(&self) -> String {
        let today = Local::now().date_naive();
        let strategies: Vec<(&'static str, BoxFuture<'_, Option<String>>)> = vec![
            ("landing page", self.from_landing_page().boxed()),
            ("recent dates", self.from_recent_dates(today).boxed()),
        ];

        match first_success(strategies).await {
            Some((strategy, url)) => {
                info!(strategy, url = %url, "found bundle URL");
                url
            }
            None => {
                warn!(url = %self.fallback_url, "all discovery strategies failed; using fallback URL");
                self.fallback_url.clone()
            }
        }
    }

    async fn from_landing_page(&self) -> Option<String> {
        let html = match get_text(&self.client, self.landing_url.as_str(), self.page_timeout).await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "landing page unavailable");
                return None;
            }
        };
        let candidates = self.extract_candidates(&html);
        debug!(count = candidates.len(), "candidate URLs on landing page");
        self.probe_first(&candidates).await
    }

    async fn from_recent_dates(&self, today: NaiveDate) -> Option<String> {
        let candidates = dated_candidates(&self.csv_base, today, self.lookback_days, &self.time_codes);
        debug!(count = candidates.len(), "synthesized dated URLs");
        self.probe_first(&candidates).await
    }

    /// First URL, in order, that answers a HEAD request with a 2xx status.
    async fn probe_first(&self, urls: &[String]) -> Option<String> {
        for url in urls {
            if self.probe(url).await {
                return Some(url.clone());
            }
        }
        None
    }

    async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).timeout(self.probe_timeout).send().await {
            Ok(resp) => {
                trace!(url, status = %resp.status(), "probe");
                resp.status().is_success()
            }
            Err(e) => {
                trace!(url, error = %e, "probe failed");
                false
            }
        }
    }

    /// Every candidate URL the landing page hints at, de-duplicated, in extractor order.
    pub fn extract_candidates(&self, html: &str) -> Vec<String> {
        let p = &self.patterns;
        let mut found = Vec::new();

        // a) bare directory paths
        for m in p.paths.find_iter(html) {
            found.push(format!("{}{}", self.origin, m.as_str()));
        }

        // b) fully qualified URLs
        found.extend(p.full_urls.find_iter(html).map(|m| m.as_str().to_string()));

        // c) date coded file names, separator normalized to %20
        for caps in p.dated_names.captures_iter(html) {
            found.push(format!("{}/{}%20{}%20CSV.zip", self.csv_base, &caps[1], &caps[2]));
        }

        let doc = Html::parse_document(html);

        // d) string literals inside scripts
        for script in doc.select(&p.scripts) {
            let code: String = script.text().collect();
            for caps in p.script_literals.captures_iter(&code) {
                let lit = &caps[1];
                let url = if lit.starts_with("http") {
                    lit.to_string()
                } else if lit.starts_with('/') {
                    format!("{}{}", self.origin, lit)
                } else {
                    format!("{}/{}", self.origin, lit)
                };
                found.push(url);
            }
        }

        // e) "updated on" label
        if let Some(date) = updated_on(&p.updated_label, html) {
            debug!(%date, "landing page update date");
            found.extend(dated_candidates(&self.csv_base, date, 1, &self.time_codes));
        }

        // f) anchors that look like CSV downloads
        for a in doc.select(&p.anchors) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let class = a.value().attr("class").unwrap_or_default().to_lowercase();
            let text = a.text().collect::<String>().to_lowercase();
            let href_lower = href.to_lowercase();
            let keyword = LINK_KEYWORDS
                .iter()
                .any(|k| class.contains(k) || text.contains(k));
            if keyword && (href_lower.contains(".zip") || href_lower.contains("csv")) {
                if let Ok(full) = self.landing_url.join(href) {
                    found.push(full.to_string());
                }
            }
        }

        dedupe(found)
    }
}

impl Patterns {
    fn new(origin: &str, dir: &str) -> TariffResult<Self> {
        let regex = |s: &str| Regex::new(s).map_err(|e| TariffError::Config(e.to_string()));
        let selector =
            |s: &str| Selector::parse(s).map_err(|e| TariffError::Config(format!("{:?}", e)));
        let dir_fragment = dir.trim_start_matches('/');

        Ok(Self {
            paths: regex(&format!(r#"{}/[^"'>\s]*\.zip"#, regex::escape(dir)))?,
            full_urls: regex(&format!(
                r#"{}{}/[^"'>\s]*\.zip"#,
                regex::escape(origin),
                regex::escape(dir)
            ))?,
            dated_names: regex(r"(\d{8})(?:%20|[\s_+])(\d{6})(?:%20|[\s_+])CSV\.zip")?,
            script_literals: regex(&format!(
                r#"["']([^"']*{}/[^"']*\.zip)["']"#,
                regex::escape(dir_fragment)
            ))?,
            updated_label: regex(
                r"(?i)(?:atualizado em|atualizado a|última atualização|ultima atualizacao|data de atualização)\s*:?\s*(\d{1,4})[/.\-](\d{1,2})[/.\-](\d{1,4})",
            )?,
            anchors: selector("a[href]")?,
            scripts: selector("script")?,
        })
    }
}

/// Parses the date next to an "updated on" label, day-first or year-first.
fn updated_on(label: &Regex, html: &str) -> Option<NaiveDate> {
    let caps = label.captures(html)?;
    let (a, b, c) = (&caps[1], &caps[2], &caps[3]);
    let month: u32 = b.parse().ok()?;
    if a.len() == 4 {
        NaiveDate::from_ymd_opt(a.parse().ok()?, month, c.parse().ok()?)
    } else if c.len() == 4 {
        NaiveDate::from_ymd_opt(c.parse().ok()?, month, a.parse().ok()?)
    } else {
        None
    }
}

/// Bundle URLs for `days` calendar days ending at `today`, crossed with `time_codes`.
pub fn dated_candidates(
    csv_base: &str,
    today: NaiveDate,
    days: u32,
    time_codes: &[String],
) -> Vec<String> {
    let mut out = Vec::new();
    for back in 0..days {
        let date = today - ChronoDuration::days(i64::from(back));
        for code in time_codes.iter().take(MAX_CODES_PER_DAY) {
            out.push(format!("{}/{}%20{}%20CSV.zip", csv_base, date.format("%Y%m%d"), code));
        }
    }
    out
}

/// Awaits each strategy in turn and returns the first that yields a URL.
pub async fn first_success<'a>(
    strategies: Vec<(&'static str, BoxFuture<'a, Option<String>>)>,
) -> Option<(&'static str, String)> {
    for (name, strategy) in strategies {
        debug!(strategy = name, "trying discovery strategy");
        if let Some(url) = strategy.await {
            return Some((name, url));
        }
    }
    None
}

fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn settings(landing: &str) -> BundleSettings {
        BundleSettings {
            landing_url: landing.to_string(),
            csv_base_url: format!("{}/Admin/csvs", landing),
            fallback_url: format!("{}/Admin/csvs/fallback.zip", landing),
            probe_timeout_secs: 2,
            page_timeout_secs: 2,
            lookback_days: 2,
            ..Default::default()
        }
    }

    fn locator(landing: &str) -> SourceLocator {
        SourceLocator::new(Client::new(), &settings(landing)).unwrap()
    }

    #[test]
    fn extractors_run_in_order_and_dedupe() {
        let loc = locator("https://simuladorprecos.erse.pt");
        let html = r#"
<html><body>
  <a href="/Admin/csvs/a.zip">A</a>
  <p>https://simuladorprecos.erse.pt/Admin/csvs/b.zip</p>
  <p>ficheiro 20250919 100313 CSV.zip</p>
  <script>var csvPath = 'Admin/csvs/c.zip';</script>
  <span>Atualizado em: 18/09/2025</span>
  <a class="btn-csv" href="/files/precos.zip">Descarregar</a>
  <a href="/sobre">Sobre</a>
</body></html>"#;
        let found = loc.extract_candidates(html);
        let base = "https://simuladorprecos.erse.pt/Admin/csvs";

        assert_eq!(found[0], format!("{}/a.zip", base));
        assert_eq!(found[1], format!("{}/b.zip", base));
        assert_eq!(found[2], format!("{}/20250919%20100313%20CSV.zip", base));
        assert_eq!(found[3], format!("{}/c.zip", base));
        assert_eq!(found[4], format!("{}/20250918%20100313%20CSV.zip", base));
        assert_eq!(found.last().unwrap(), "https://simuladorprecos.erse.pt/files/precos.zip");
        assert!(!found.iter().any(|u| u.contains("sobre")));
        let unique: HashSet<_> = found.iter().collect();
        assert_eq!(unique.len(), found.len());
    }

    #[test]
    fn updated_label_accepts_either_order() {
        let re = &locator("https://x.pt").patterns.updated_label;
        assert_eq!(
            updated_on(re, "Última atualização: 2025-09-18"),
            NaiveDate::from_ymd_opt(2025, 9, 18)
        );
        assert_eq!(
            updated_on(re, "atualizado em 18.09.2025"),
            NaiveDate::from_ymd_opt(2025, 9, 18)
        );
        assert_eq!(updated_on(re, "atualizado em 99/99/2025"), None);
    }

    #[test]
    fn dated_candidates_cover_days_and_codes() {
        let codes: Vec<String> = (0..12).map(|i| format!("{:06}", i)).collect();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let urls = dated_candidates("https://h/Admin/csvs", today, 10, &codes);
        assert_eq!(urls.len(), 100);
        assert_eq!(urls[0], "https://h/Admin/csvs/20250301%20000000%20CSV.zip");
        assert_eq!(urls[10], "https://h/Admin/csvs/20250228%20000000%20CSV.zip");
    }

    #[tokio::test]
    async fn first_success_stops_at_first_hit() {
        let strategies: Vec<(&'static str, BoxFuture<'_, Option<String>>)> = vec![
            ("none", async { None::<String> }.boxed()),
            ("hit", async { Some("u1".to_string()) }.boxed()),
            ("later", async { Some("u2".to_string()) }.boxed()),
        ];
        assert_eq!(first_success(strategies).await, Some(("hit", "u1".to_string())));
    }

    #[tokio::test]
    async fn probes_page_candidates_in_order() {
        let mut server = Server::new_async().await;
        let page = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(r#"<a href="/Admin/csvs/old.zip">x</a><a href="/Admin/csvs/new.zip">y</a>"#)
            .create_async()
            .await;
        let old = server
            .mock("HEAD", "/Admin/csvs/old.zip")
            .with_status(404)
            .create_async()
            .await;
        let new = server
            .mock("HEAD", "/Admin/csvs/new.zip")
            .with_status(200)
            .create_async()
            .await;

        let url = locator(&server.url()).locate().await;
        assert_eq!(url, format!("{}/Admin/csvs/new.zip", server.url()));
        page.assert_async().await;
        old.assert_async().await;
        new.assert_async().await;
    }

    #[tokio::test]
    async fn dated_urls_are_tried_when_the_page_is_down() {
        let mut server = Server::new_async().await;
        let _page = server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;
        let today = Local::now().date_naive().format("%Y%m%d").to_string();
        // either encoding of the separator, depending on how the path reaches the server
        let hit = server
            .mock(
                "HEAD",
                mockito::Matcher::Regex(format!(r"^/Admin/csvs/{}(%20| )100313(%20| )CSV\.zip$", today)),
            )
            .with_status(200)
            .create_async()
            .await;

        let mut settings = settings(&server.url());
        settings.time_codes = vec!["000000".to_string(), "100313".to_string()];
        let url = SourceLocator::new(Client::new(), &settings)
            .unwrap()
            .locate()
            .await;

        assert_eq!(
            url,
            format!("{}/Admin/csvs/{}%20100313%20CSV.zip", server.url(), today)
        );
        hit.assert_async().await;
    }

    #[tokio::test]
    async fn falls_back_when_everything_fails() {
        let mut server = Server::new_async().await;
        let _page = server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        let url = locator(&server.url()).locate().await;
        assert_eq!(url, format!("{}/Admin/csvs/fallback.zip", server.url()));
    }
}
