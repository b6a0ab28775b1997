use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use remix_contracts::channel::EncodedImage;
use remix_contracts::events::{payload, EventLevel, EventWriter};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::config::RemixConfig;
use crate::error::{is_transient_message, RemixError};
use crate::{error_chain_text, truncate_text};

pub const SYSTEM_INSTRUCTION: &str = "You are a world-class visual synthesizer.
Extract the color theory, composition, lighting, and textures from the provided reference images.
Generate a SINGLE high-quality image of the user subject strictly following that style.
Output ONLY the image data. No collage, no text in the image.";

pub const ASPECT_RATIO: &str = "1:1";
pub const IMAGE_SIZE: &str = "1K";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub image_data_url: String,
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
}

/// Synthesizes one image in the style of the given references.
pub trait StyleGenerator: Send + Sync {
    fn has_credentials(&self) -> bool;
    /// Re-reads credentials from their source; returns whether any are present.
    fn refresh_credentials(&self) -> bool {
        self.has_credentials()
    }
    fn generate(&self, prompt: &str, references: &[EncodedImage]) -> Result<GenerationResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Runs `attempt` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are spent. Only transient failures are retried.
pub fn run_with_retries<T>(
    policy: &RetryPolicy,
    sleep: &dyn Fn(Duration),
    events: &EventWriter,
    mut attempt: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_no = 1;
    loop {
        match attempt(attempt_no) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = error_chain_text(&err, 600);
                if !is_transient_message(&message) || attempt_no >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_retry(attempt_no);
                events.emit_quiet(
                    EventLevel::Warn,
                    "generation_retry",
                    payload(json!({
                        "attempt": attempt_no,
                        "max_attempts": max_attempts,
                        "delay_ms": delay.as_millis() as u64,
                        "error": truncate_text(&message, 300),
                    })),
                );
                sleep(delay);
                attempt_no += 1;
            }
        }
    }
}

pub struct GeminiClient {
    api_base: String,
    model: String,
    api_key: RwLock<Option<String>>,
    http: HttpClient,
    retry: RetryPolicy,
    sleeper: Sleeper,
    events: EventWriter,
}

impl GeminiClient {
    pub fn new(config: &RemixConfig, events: EventWriter) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.gemini_api_base.clone(),
            model: config.image_model.clone(),
            api_key: RwLock::new(config.gemini_api_key.clone()),
            http,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(thread::sleep),
            events,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Sleeper) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    fn current_key(&self) -> Option<String> {
        self.api_key.read().ok().and_then(|key| key.clone())
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post_once(&self, endpoint: &str, api_key: &str, body: &Value) -> Result<GenerationResult> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error(response)?;
        let result = extract_generation_result(&response_payload);
        if result.is_err() {
            let finish_reason = response_payload
                .pointer("/candidates/0/finishReason")
                .cloned()
                .unwrap_or(Value::Null);
            self.events.emit_quiet(
                EventLevel::Warn,
                "generation_no_image",
                payload(json!({ "finish_reason": finish_reason })),
            );
        }
        result
    }
}

impl StyleGenerator for GeminiClient {
    fn has_credentials(&self) -> bool {
        self.current_key().is_some()
    }

    fn refresh_credentials(&self) -> bool {
        let fresh = RemixConfig::from_env().gemini_api_key;
        let present = fresh.is_some();
        if let Ok(mut key) = self.api_key.write() {
            if present {
                *key = fresh;
            }
            return key.is_some();
        }
        present
    }

    fn generate(&self, prompt: &str, references: &[EncodedImage]) -> Result<GenerationResult> {
        let Some(api_key) = self.current_key() else {
            return Err(RemixError::MissingApiKey.into());
        };
        let endpoint = self.endpoint();
        let body = build_request_body(prompt, references);
        let result = run_with_retries(&self.retry, self.sleeper.as_ref(), &self.events, |_| {
            self.post_once(&endpoint, &api_key, &body)
        })?;
        self.events.emit_quiet(
            EventLevel::Info,
            "generation_usage",
            payload(json!({
                "model": self.model,
                "prompt_tokens": result.prompt_tokens,
                "candidate_tokens": result.candidate_tokens,
            })),
        );
        Ok(result)
    }
}

/// One inline part per reference, in order, then the subject text.
pub fn build_request_body(prompt: &str, references: &[EncodedImage]) -> Value {
    let mut parts: Vec<Value> = references
        .iter()
        .map(|image| {
            json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data,
                }
            })
        })
        .collect();
    parts.push(json!({ "text": format!("Subject: {prompt}") }));

    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "systemInstruction": {
            "parts": [{ "text": SYSTEM_INSTRUCTION }],
        },
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": {
                "aspectRatio": ASPECT_RATIO,
                "imageSize": IMAGE_SIZE,
            },
        },
    })
}

/// Takes the first inline image of the first candidate.
pub fn extract_generation_result(response_payload: &Value) -> Result<GenerationResult> {
    let usage = response_payload.get("usageMetadata");
    let usage_count = |key: &str| {
        usage
            .and_then(|usage| usage.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    let parts = response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let data = parts.iter().find_map(|part| {
        part.get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty())
    });

    match data {
        Some(data) => Ok(GenerationResult {
            image_data_url: format!("data:image/png;base64,{data}"),
            prompt_tokens: usage_count("promptTokenCount"),
            candidate_tokens: usage_count("candidatesTokenCount"),
        }),
        None => Err(RemixError::NoImageReturned.into()),
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        return Err(RemixError::Service {
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value =
        serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
    Ok(parsed)
}
