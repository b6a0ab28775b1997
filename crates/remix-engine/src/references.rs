use std::thread;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use remix_contracts::channel::EncodedImage;
use remix_contracts::events::{payload, EventLevel, EventWriter};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;

use crate::config::RemixConfig;
use crate::error::RemixError;
use crate::proxy::Proxy;
use crate::{error_chain_text, mime_for_url};

const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedImage>;
}

pub struct HttpImageFetcher {
    proxy: Proxy,
    http: HttpClient,
}

impl HttpImageFetcher {
    pub fn new(config: &RemixConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build image HTTP client")?;
        Ok(Self {
            proxy: Proxy::new(config.proxy_prefix.clone()),
            http,
        })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let response = self
            .http
            .get(self.proxy.rewrite(url))
            .send()
            .with_context(|| format!("Failed to fetch image: {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "Failed to fetch image: {}",
                status.canonical_reason().unwrap_or(status.as_str())
            );
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read image body: {url}"))?;
        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Downloads one reference and encodes it as base64 alongside its MIME type.
pub fn encode_reference(fetcher: &dyn ImageFetcher, url: &str) -> Result<EncodedImage> {
    let fetched = fetcher.fetch(url)?;
    if fetched.bytes.is_empty() {
        bail!("Image body was empty: {url}");
    }
    let mime_type = fetched
        .content_type
        .as_deref()
        .and_then(|raw| raw.split(';').next())
        .map(str::trim)
        .filter(|mime| mime.starts_with("image/"))
        .map(str::to_string)
        .or_else(|| mime_for_url(url).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_MIME.to_string());
    Ok(EncodedImage {
        data: BASE64.encode(&fetched.bytes),
        mime_type,
    })
}

/// Encodes `(id, url)` references concurrently, one thread per image.
///
/// A failing image is dropped from the batch; the batch only fails when no
/// image could be encoded. Successful payloads keep the input order.
pub fn encode_references(
    fetcher: &dyn ImageFetcher,
    references: &[(u64, String)],
    events: &EventWriter,
) -> Result<Vec<(u64, EncodedImage)>> {
    let outcomes: Vec<(u64, Result<EncodedImage>)> = thread::scope(|scope| {
        let handles: Vec<_> = references
            .iter()
            .map(|(id, url)| {
                let handle = scope.spawn(move || encode_reference(fetcher, url));
                (*id, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(id, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("reference worker panicked")));
                (id, result)
            })
            .collect()
    });

    let mut encoded = Vec::new();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(image) => encoded.push((id, image)),
            Err(err) => events.emit_quiet(
                EventLevel::Warn,
                "reference_encode_failed",
                payload(json!({ "image_id": id, "error": error_chain_text(&err, 300) })),
            ),
        }
    }

    events.emit_quiet(
        EventLevel::Info,
        "references_encoded",
        payload(json!({ "requested": references.len(), "encoded": encoded.len() })),
    );
    if encoded.is_empty() {
        return Err(RemixError::ReferencesUnavailable.into());
    }
    Ok(encoded)
}
