use anyhow::{Context, Result};
use remix_contracts::channel::{parse_blocks_page, BlocksPage, Channel, PAGE_SIZE};
use remix_contracts::events::{payload, EventLevel, EventWriter};
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::RemixConfig;
use crate::error::RemixError;
use crate::proxy::Proxy;

/// Read access to a channel on the content platform.
pub trait ChannelSource: Send + Sync {
    fn fetch_metadata(&self, slug: &str) -> Result<Channel>;
    fn fetch_blocks(&self, slug: &str, page: u32) -> Result<BlocksPage>;
}

pub struct ArenaClient {
    api_base: String,
    proxy: Proxy,
    http: HttpClient,
    events: EventWriter,
}

impl ArenaClient {
    pub fn new(config: &RemixConfig, events: EventWriter) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build Are.na HTTP client")?;
        Ok(Self {
            api_base: config.arena_api_base.clone(),
            proxy: Proxy::new(config.proxy_prefix.clone()),
            http,
            events,
        })
    }

    fn metadata_url(&self, slug: &str) -> String {
        format!("{}/channels/{slug}", self.api_base)
    }

    fn contents_url(&self, slug: &str, page: u32) -> String {
        format!(
            "{}/channels/{slug}/contents?page={page}&per_page={PAGE_SIZE}&direction=desc&sort=position",
            self.api_base
        )
    }

    fn get_json(&self, target: &str, failure: &str) -> Result<(StatusCode, Option<Value>)> {
        let response = self
            .http
            .get(self.proxy.rewrite(target))
            .send()
            .with_context(|| RemixError::FetchFailed(failure.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Ok((status, None));
        }
        let body: Value = response
            .json()
            .with_context(|| RemixError::FetchFailed(failure.to_string()))?;
        Ok((status, Some(body)))
    }
}

impl ChannelSource for ArenaClient {
    fn fetch_metadata(&self, slug: &str) -> Result<Channel> {
        let failure = "Failed to fetch channel metadata.";
        let (status, body) = self.get_json(&self.metadata_url(slug), failure)?;
        let Some(body) = body else {
            return Err(match status {
                StatusCode::NOT_FOUND => RemixError::ChannelNotFound,
                StatusCode::UNAUTHORIZED => RemixError::PrivateChannel,
                _ => RemixError::FetchFailed(failure.to_string()),
            }
            .into());
        };
        let channel = Channel::from_metadata(&body);
        self.events.emit_quiet(
            EventLevel::Info,
            "channel_metadata_fetched",
            payload(json!({
                "slug": slug,
                "channel_id": channel.id,
                "length": channel.total_length,
            })),
        );
        Ok(channel)
    }

    fn fetch_blocks(&self, slug: &str, page: u32) -> Result<BlocksPage> {
        let failure = "Failed to fetch channel contents.";
        let (_, body) = self.get_json(&self.contents_url(slug, page), failure)?;
        let Some(body) = body else {
            return Err(RemixError::FetchFailed(failure.to_string()).into());
        };
        let parsed = parse_blocks_page(&body);
        match &parsed {
            Ok(blocks) => self.events.emit_quiet(
                EventLevel::Info,
                "channel_page_fetched",
                payload(json!({
                    "slug": slug,
                    "page": page,
                    "images": blocks.images.len(),
                    "has_more": blocks.has_more,
                })),
            ),
            Err(err) => self.events.emit_quiet(
                EventLevel::Warn,
                "channel_page_invalid",
                payload(json!({ "slug": slug, "page": page, "error": err.to_string() })),
            ),
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::{serve, CannedResponse};

    fn client_for(base: &str) -> anyhow::Result<ArenaClient> {
        let config = RemixConfig {
            arena_api_base: format!("{base}/v2"),
            ..RemixConfig::default()
        };
        ArenaClient::new(&config, EventWriter::disabled())
    }

    fn block(id: u64, class: &str) -> Value {
        let image = if class == "Image" {
            json!({
                "display": {"url": format!("https://images.example/{id}.jpg")},
                "thumb": {"url": ""},
                "original": {"url": ""},
            })
        } else {
            Value::Null
        };
        json!({ "id": id, "class": class, "image": image })
    }

    #[test]
    fn metadata_status_codes_map_to_distinct_errors() -> anyhow::Result<()> {
        let (base, server) = serve(vec![
            CannedResponse::json(404, "{}"),
            CannedResponse::json(401, "{}"),
            CannedResponse::json(500, "{}"),
        ]);
        let client = client_for(&base)?;

        let not_found = client.fetch_metadata("gone").err();
        let private = client.fetch_metadata("secret").err();
        let other = client.fetch_metadata("broken").err();
        server.join().ok();

        let class = |err: Option<anyhow::Error>| {
            err.and_then(|err| err.downcast_ref::<RemixError>().cloned())
        };
        assert_eq!(class(not_found), Some(RemixError::ChannelNotFound));
        assert_eq!(class(private), Some(RemixError::PrivateChannel));
        assert_eq!(
            class(other),
            Some(RemixError::FetchFailed("Failed to fetch channel metadata.".to_string()))
        );
        Ok(())
    }

    #[test]
    fn metadata_success_reads_channel_fields() -> anyhow::Result<()> {
        let (base, server) = serve(vec![CannedResponse::json(
            200,
            json!({
                "id": 7,
                "title": "Moodboard",
                "slug": "moodboard",
                "length": 41,
                "metadata": {"description": "colour studies"},
            })
            .to_string(),
        )]);
        let channel = client_for(&base)?.fetch_metadata("moodboard")?;
        let requests = server.join().unwrap_or_default();

        assert_eq!(channel.title, "Moodboard");
        assert_eq!(channel.total_length, Some(41));
        assert_eq!(requests[0].line, "GET /v2/channels/moodboard HTTP/1.1");
        Ok(())
    }

    #[test]
    fn blocks_request_pages_and_infers_has_more_from_raw_length() -> anyhow::Result<()> {
        let full_page: Vec<Value> = (0..20).map(|id| block(id, "Text")).collect();
        let (base, server) = serve(vec![
            CannedResponse::json(200, json!({ "contents": full_page }).to_string()),
            CannedResponse::json(200, json!([block(30, "Image"), block(31, "Link")]).to_string()),
        ]);
        let client = client_for(&base)?;

        let first = client.fetch_blocks("moodboard", 1)?;
        let second = client.fetch_blocks("moodboard", 2)?;
        let requests = server.join().unwrap_or_default();

        assert!(first.images.is_empty());
        assert!(first.has_more);
        assert_eq!(second.images.len(), 1);
        assert!(!second.has_more);
        assert_eq!(
            requests[1].line,
            "GET /v2/channels/moodboard/contents?page=2&per_page=20&direction=desc&sort=position HTTP/1.1"
        );
        Ok(())
    }

    #[test]
    fn blocks_reject_non_success_and_unknown_shapes() -> anyhow::Result<()> {
        let (base, server) = serve(vec![
            CannedResponse::json(502, "bad gateway"),
            CannedResponse::json(200, json!({"data": []}).to_string()),
        ]);
        let client = client_for(&base)?;

        let failed = client.fetch_blocks("moodboard", 1).err().map(|err| err.to_string());
        let invalid = client.fetch_blocks("moodboard", 1).err().map(|err| err.to_string());
        server.join().ok();

        assert_eq!(failed.as_deref(), Some("Failed to fetch channel contents."));
        assert_eq!(invalid.as_deref(), Some("Invalid response format from Are.na."));
        Ok(())
    }
}
