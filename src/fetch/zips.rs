// src/fetch/zips.rs
use super::{decode_text, get_bytes, RawDocument, CONDITIONS, PRICES};
use crate::config::BundleSettings;
use crate::errors::{TariffError, TariffResult};
use reqwest::Client;
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{debug, info, instrument};
use zip::ZipArchive;

/// Leading bytes of every zip local file header.
const ZIP_MAGIC: &[u8] = b"PK";

/// Upper bound on the buffer reserved up front from a member's declared size.
const MAX_PREALLOC: u64 = 64 << 20;

/// Downloads the bundle at `url` and returns the conditions and prices documents.
#[instrument(level = "info", skip(client, settings))]
pub async fn download_bundle(
    client: &Client,
    url: &str,
    settings: &BundleSettings,
) -> TariffResult<(RawDocument, RawDocument)> {
    let bytes = get_bytes(client, url, Duration::from_secs(settings.download_timeout_secs)).await?;
    ensure_archive(url, &bytes)?;

    let conditions_member = settings.conditions_member.clone();
    let prices_member = settings.prices_member.clone();
    let bytes = std::sync::Arc::new(bytes);

    // extraction is CPU bound; both members come out of the same buffer in parallel
    let (conditions, prices) = tokio::try_join!(
        extract_blocking(bytes.clone(), conditions_member, CONDITIONS),
        extract_blocking(bytes, prices_member, PRICES),
    )?;

    info!(
        conditions_chars = conditions.text.len(),
        prices_chars = prices.text.len(),
        "extracted documents"
    );
    Ok((conditions, prices))
}

async fn extract_blocking(
    bytes: std::sync::Arc<Vec<u8>>,
    member: String,
    name: &'static str,
) -> TariffResult<RawDocument> {
    tokio::task::spawn_blocking(move || {
        extract_member(&bytes, &member).map(|text| RawDocument { name, text })
    })
    .await?
}

/// Fails with `NotAnArchive` unless `bytes` starts with the zip magic.
pub fn ensure_archive(url: &str, bytes: &[u8]) -> TariffResult<()> {
    if bytes.starts_with(ZIP_MAGIC) {
        Ok(())
    } else {
        Err(TariffError::NotAnArchive {
            url: url.to_string(),
        })
    }
}

/// Reads one member of the archive as text.
///
/// A member whose name ends with `requested` wins; otherwise the first member with a path
/// component containing `requested` is used.
pub fn extract_member(bytes: &[u8], requested: &str) -> TariffResult<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    debug!(members = ?names, "archive contents");

    let target = names
        .iter()
        .find(|n| n.ends_with(requested))
        .or_else(|| {
            names
                .iter()
                .find(|n| n.split('/').any(|part| part.contains(requested)))
        })
        .cloned()
        .ok_or_else(|| TariffError::MissingArchiveMember {
            requested: requested.to_string(),
            available: names.clone(),
        })?;

    let mut entry = archive.by_name(&target)?;
    let mut buf = Vec::with_capacity(prealloc_len(entry.size()));
    entry
        .read_to_end(&mut buf)
        .map_err(|e| TariffError::Archive(e.into()))?;
    debug!(member = %target, bytes = buf.len(), "extracted member");
    Ok(decode_text(&buf))
}

/// Declared sizes come from the archive header and are not trusted beyond `MAX_PREALLOC`.
fn prealloc_len(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    fn bundle(members: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, body) in members {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn rejects_non_zip_bytes_before_extracting() {
        let err = ensure_archive("http://x/y.zip", "<html>not found</html>".as_bytes()).unwrap_err();
        assert!(matches!(err, TariffError::NotAnArchive { url } if url == "http://x/y.zip"));
        assert!(ensure_archive("u", &bundle(&[("a.csv", "x")])).is_ok());
    }

    #[test]
    fn suffix_match_wins_over_substring_match() {
        let zip = bundle(&[
            ("old/CondComerciais.csv.bak", "wrong"),
            ("csv/CondComerciais.csv", "\u{FEFF}COM;COD_Proposta\n"),
        ]);
        assert_eq!(extract_member(&zip, "CondComerciais.csv").unwrap(), "COM;COD_Proposta\n");
    }

    #[test]
    fn falls_back_to_path_component_match() {
        let zip = bundle(&[("2025/Precos_ELEGN.csv.txt", "TF;TV\n")]);
        assert_eq!(extract_member(&zip, "Precos_ELEGN.csv").unwrap(), "TF;TV\n");
    }

    #[test]
    fn missing_member_lists_what_is_there() {
        let zip = bundle(&[("a.csv", "x"), ("b.csv", "y")]);
        match extract_member(&zip, "Precos_ELEGN.csv").unwrap_err() {
            TariffError::MissingArchiveMember { requested, available } => {
                assert_eq!(requested, "Precos_ELEGN.csv");
                assert_eq!(available, vec!["a.csv", "b.csv"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn declared_member_size_is_capped() {
        assert_eq!(prealloc_len(1024), 1024);
        assert_eq!(prealloc_len(u64::MAX), MAX_PREALLOC as usize);
    }

    #[tokio::test]
    async fn downloads_and_extracts_both_documents() {
        let mut server = Server::new_async().await;
        let body = bundle(&[
            ("CondComerciais.csv", "COM;COD_Proposta\nG9;ABC1\n"),
            ("Precos_ELEGN.csv", "COD_Proposta;TF\nABC1;0,3\n"),
        ]);
        let _m = server
            .mock("GET", "/bundle.zip")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let url = format!("{}/bundle.zip", server.url());
        let (cond, prices) = download_bundle(&Client::new(), &url, &BundleSettings::default())
            .await
            .unwrap();
        assert_eq!(cond.name, CONDITIONS);
        assert!(cond.text.starts_with("COM;COD_Proposta"));
        assert_eq!(prices.name, PRICES);
        assert!(prices.text.contains("ABC1;0,3"));
    }

    #[tokio::test]
    async fn html_error_page_is_not_an_archive() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/bundle.zip")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let url = format!("{}/bundle.zip", server.url());
        let err = download_bundle(&Client::new(), &url, &BundleSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TariffError::NotAnArchive { .. }));
    }
}
