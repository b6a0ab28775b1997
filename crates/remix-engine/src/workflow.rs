use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use remix_contracts::access::AccessGate;
use remix_contracts::channel::{
    selection_limit_message, toggle_selection, Channel, EncodedImage, SelectableImage,
    ToggleOutcome,
};
use remix_contracts::events::{payload, EventLevel, EventWriter};
use remix_contracts::quota::{JsonFileStore, KvStore, QuotaSnapshot, RateLimiter};
use remix_contracts::slug::extract_channel_slug;
use remix_contracts::workflow::WorkflowState;
use serde_json::json;
use uuid::Uuid;

use crate::arena::{ArenaClient, ChannelSource};
use crate::config::RemixConfig;
use crate::error::{is_permission_message, is_transient_message, RemixError};
use crate::gemini::{GeminiClient, StyleGenerator};
use crate::references::{encode_references, HttpImageFetcher, ImageFetcher};
use crate::{error_chain_text, timestamp_millis};

pub const INVALID_ACCESS_CODE_MESSAGE: &str = "Invalid access code.";
pub const INVALID_SLUG_MESSAGE: &str = "Invalid Are.na URL format";
pub const LOAD_MORE_FAILED_MESSAGE: &str = "Failed to load more images.";
pub const PERMISSION_DENIED_MESSAGE: &str = "Permission denied. Select a valid API key.";
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "Service unavailable. Please try again later.";
pub const EMPTY_PROMPT_MESSAGE: &str = "Describe a subject to generate.";
pub const EMPTY_SELECTION_MESSAGE: &str = "Select at least one reference image.";

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub data_url: String,
    pub prompt: String,
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
}

impl GeneratedImage {
    pub fn decode_png(&self) -> Result<Vec<u8>> {
        let Some((_, data)) = self.data_url.split_once(',') else {
            bail!("generated image is not a data URL");
        };
        BASE64
            .decode(data)
            .context("generated image payload is not valid base64")
    }
}

/// Everything the user can see about one workflow session.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: WorkflowState,
    pub channel: Option<Channel>,
    pub slug: Option<String>,
    pub images: Vec<SelectableImage>,
    pub page: u32,
    pub has_more: bool,
    pub loading_more: bool,
    pub error: Option<String>,
    pub generation_error: Option<String>,
    pub credentials_valid: bool,
    pub last_prompt: Option<String>,
    pub result: Option<GeneratedImage>,
    pub quota: QuotaSnapshot,
    last_references: Vec<(u64, EncodedImage)>,
    submission_id: Option<String>,
    epoch: u64,
}

impl Session {
    fn new(state: WorkflowState, credentials_valid: bool, quota: QuotaSnapshot) -> Self {
        Self {
            state,
            channel: None,
            slug: None,
            images: Vec::new(),
            page: 0,
            has_more: false,
            loading_more: false,
            error: None,
            generation_error: None,
            credentials_valid,
            last_prompt: None,
            result: None,
            quota,
            last_references: Vec::new(),
            submission_id: None,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn selected(&self) -> impl Iterator<Item = &SelectableImage> {
        self.images.iter().filter(|image| image.selected)
    }

    pub fn selected_count(&self) -> usize {
        self.selected().count()
    }

    /// Usage-ledger id of the current submission. Retries keep it, so one
    /// submission is charged at most once.
    pub fn submission_id(&self) -> Option<&str> {
        self.submission_id.as_deref()
    }

    /// Number of encoded references kept for a manual retry.
    pub fn cached_reference_count(&self) -> usize {
        self.last_references.len()
    }

    fn selected_references(&self) -> Vec<(u64, String)> {
        self.selected()
            .map(|image| (image.id, image.url.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Refused by policy or input validation; the state did not move.
    Rejected(String),
    Failed(String),
    /// The session was reset while the action was in flight.
    Stale,
    /// Not applicable in the current state.
    Ignored,
}

enum ReferenceSource {
    Encode(Vec<(u64, String)>),
    Cached(Vec<(u64, EncodedImage)>),
}

/// Drives one channel-to-image session.
///
/// Session state sits behind a mutex that is released around every network
/// call. Actions capture the session epoch first; a result that comes back
/// after a reset is dropped instead of applied.
pub struct WorkflowController {
    session: Mutex<Session>,
    channels: Arc<dyn ChannelSource>,
    fetcher: Arc<dyn ImageFetcher>,
    generator: Arc<dyn StyleGenerator>,
    limiter: RateLimiter,
    gate: AccessGate,
    events: EventWriter,
}

impl WorkflowController {
    pub fn new(
        channels: Arc<dyn ChannelSource>,
        fetcher: Arc<dyn ImageFetcher>,
        generator: Arc<dyn StyleGenerator>,
        limiter: RateLimiter,
        gate: AccessGate,
        events: EventWriter,
    ) -> Self {
        let state = if gate.has_grant() {
            WorkflowState::Idle
        } else {
            WorkflowState::GateLocked
        };
        let session = Session::new(state, generator.has_credentials(), limiter.snapshot());
        events.emit_quiet(
            EventLevel::Info,
            "workflow_started",
            payload(json!({
                "state": state.as_str(),
                "credentials": session.credentials_valid,
            })),
        );
        Self {
            session: Mutex::new(session),
            channels,
            fetcher,
            generator,
            limiter,
            gate,
            events,
        }
    }

    /// Wires the HTTP clients and a `state.json` store under `state_dir`.
    pub fn from_config(config: &RemixConfig, state_dir: &Path, events: EventWriter) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
        let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::new(state_dir.join(STATE_FILE_NAME)));
        let channels = Arc::new(ArenaClient::new(config, events.clone())?);
        let fetcher = Arc::new(HttpImageFetcher::new(config)?);
        let generator = Arc::new(GeminiClient::new(config, events.clone())?);
        Ok(Self::new(
            channels,
            fetcher,
            generator,
            RateLimiter::new(store.clone(), events.clone()),
            AccessGate::new(store, config.access_code.clone()),
            events,
        ))
    }

    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn state(&self) -> WorkflowState {
        self.lock().state
    }

    pub fn unlock(&self, code: &str) -> ActionOutcome {
        let mut session = self.lock();
        if session.state != WorkflowState::GateLocked {
            return ActionOutcome::Ignored;
        }
        match self.gate.unlock(code) {
            Ok(true) => {
                session.error = None;
                self.transition(&mut session, WorkflowState::Idle);
                ActionOutcome::Applied
            }
            Ok(false) => {
                self.events.emit_quiet(EventLevel::Warn, "access_denied", payload(json!({})));
                session.error = Some(INVALID_ACCESS_CODE_MESSAGE.to_string());
                ActionOutcome::Rejected(INVALID_ACCESS_CODE_MESSAGE.to_string())
            }
            Err(err) => {
                let message = format!("{err:#}");
                session.error = Some(message.clone());
                ActionOutcome::Failed(message)
            }
        }
    }

    pub fn load_channel(&self, input: &str) -> ActionOutcome {
        let (slug, epoch) = {
            let mut session = self.lock();
            if session.state != WorkflowState::Idle {
                return ActionOutcome::Ignored;
            }
            let Some(slug) = extract_channel_slug(input) else {
                session.error = Some(INVALID_SLUG_MESSAGE.to_string());
                return ActionOutcome::Rejected(INVALID_SLUG_MESSAGE.to_string());
            };
            session.error = None;
            self.transition(&mut session, WorkflowState::LoadingChannel);
            (slug, session.epoch)
        };

        let loaded = self
            .channels
            .fetch_metadata(&slug)
            .and_then(|channel| Ok((channel, self.channels.fetch_blocks(&slug, 1)?)));

        let mut session = self.lock();
        if session.epoch != epoch {
            return self.drop_stale("load_channel", epoch);
        }
        match loaded {
            Ok((channel, first_page)) => {
                session.images = first_page
                    .images
                    .into_iter()
                    .map(SelectableImage::from)
                    .collect();
                session.page = 1;
                session.has_more = first_page.has_more;
                session.channel = Some(channel);
                session.slug = Some(slug);
                self.transition(&mut session, WorkflowState::Selecting);
                ActionOutcome::Applied
            }
            Err(err) => {
                let message = err.to_string();
                self.events.emit_quiet(
                    EventLevel::Warn,
                    "channel_load_failed",
                    payload(json!({ "slug": slug, "error": error_chain_text(&err, 400) })),
                );
                session.error = Some(message.clone());
                self.transition(&mut session, WorkflowState::Idle);
                ActionOutcome::Failed(message)
            }
        }
    }

    pub fn load_more(&self) -> ActionOutcome {
        let (slug, next_page, epoch) = {
            let mut session = self.lock();
            if session.state != WorkflowState::Selecting
                || !session.has_more
                || session.loading_more
            {
                return ActionOutcome::Ignored;
            }
            let Some(slug) = session.slug.clone() else {
                return ActionOutcome::Ignored;
            };
            session.loading_more = true;
            (slug, session.page + 1, session.epoch)
        };

        let fetched = self.channels.fetch_blocks(&slug, next_page);

        let mut session = self.lock();
        if session.epoch != epoch {
            return self.drop_stale("load_more", epoch);
        }
        session.loading_more = false;
        match fetched {
            Ok(blocks) => {
                for block in blocks.images {
                    if session.images.iter().all(|image| image.id != block.id) {
                        session.images.push(SelectableImage::from(block));
                    }
                }
                session.page = next_page;
                session.has_more = blocks.has_more;
                session.error = None;
                ActionOutcome::Applied
            }
            Err(err) => {
                self.events.emit_quiet(
                    EventLevel::Warn,
                    "load_more_failed",
                    payload(json!({
                        "slug": slug,
                        "page": next_page,
                        "error": error_chain_text(&err, 400),
                    })),
                );
                session.error = Some(LOAD_MORE_FAILED_MESSAGE.to_string());
                ActionOutcome::Failed(LOAD_MORE_FAILED_MESSAGE.to_string())
            }
        }
    }

    pub fn toggle_select(&self, id: u64) -> ActionOutcome {
        let mut session = self.lock();
        if session.state != WorkflowState::Selecting {
            return ActionOutcome::Ignored;
        }
        match toggle_selection(&mut session.images, id) {
            ToggleOutcome::Selected | ToggleOutcome::Deselected => {
                session.error = None;
                ActionOutcome::Applied
            }
            ToggleOutcome::LimitReached => {
                let message = selection_limit_message();
                session.error = Some(message.clone());
                ActionOutcome::Rejected(message)
            }
            ToggleOutcome::NotFound => ActionOutcome::Rejected(format!("No image with id {id}.")),
        }
    }

    pub fn clear_selection(&self) -> ActionOutcome {
        let mut session = self.lock();
        if session.state != WorkflowState::Selecting {
            return ActionOutcome::Ignored;
        }
        for image in session.images.iter_mut() {
            image.selected = false;
        }
        session.error = None;
        ActionOutcome::Applied
    }

    pub fn generate(&self, prompt: &str) -> ActionOutcome {
        let prompt = prompt.trim().to_string();
        let (references, submission, epoch) = {
            let mut session = self.lock();
            if session.state != WorkflowState::Selecting {
                return ActionOutcome::Ignored;
            }
            if prompt.is_empty() {
                return ActionOutcome::Rejected(EMPTY_PROMPT_MESSAGE.to_string());
            }
            let references = session.selected_references();
            if references.is_empty() {
                return ActionOutcome::Rejected(EMPTY_SELECTION_MESSAGE.to_string());
            }
            if let Err(reason) = self.admit(&mut session) {
                return ActionOutcome::Rejected(reason);
            }
            session.last_prompt = Some(prompt.clone());
            session.last_references.clear();
            session.result = None;
            let submission = Uuid::new_v4().to_string();
            session.submission_id = Some(submission.clone());
            self.transition(&mut session, WorkflowState::ProcessingReferences);
            (references, submission, session.epoch)
        };
        self.run_generation(epoch, &submission, prompt, ReferenceSource::Encode(references))
    }

    /// Resubmits the previous prompt after a failed generation, reusing the
    /// references that were already encoded.
    pub fn retry(&self) -> ActionOutcome {
        let (prompt, source, submission, epoch) = {
            let mut session = self.lock();
            if session.state != WorkflowState::Selecting || session.generation_error.is_none() {
                return ActionOutcome::Ignored;
            }
            let Some(prompt) = session.last_prompt.clone() else {
                return ActionOutcome::Ignored;
            };
            let source = if session.last_references.is_empty() {
                let references = session.selected_references();
                if references.is_empty() {
                    return ActionOutcome::Rejected(EMPTY_SELECTION_MESSAGE.to_string());
                }
                ReferenceSource::Encode(references)
            } else {
                ReferenceSource::Cached(session.last_references.clone())
            };
            if let Err(reason) = self.admit(&mut session) {
                return ActionOutcome::Rejected(reason);
            }
            let submission = session
                .submission_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            self.transition(&mut session, WorkflowState::ProcessingReferences);
            (prompt, source, submission, session.epoch)
        };
        self.run_generation(epoch, &submission, prompt, source)
    }

    /// Closes a finished result, or acknowledges a pending generation error.
    pub fn dismiss(&self) -> ActionOutcome {
        let mut session = self.lock();
        match session.state {
            WorkflowState::Complete => {
                session.result = None;
                self.transition(&mut session, WorkflowState::Selecting);
                ActionOutcome::Applied
            }
            WorkflowState::Selecting if session.generation_error.is_some() => {
                session.generation_error = None;
                ActionOutcome::Applied
            }
            _ => ActionOutcome::Ignored,
        }
    }

    pub fn reset(&self) -> ActionOutcome {
        let mut session = self.lock();
        if session.state == WorkflowState::GateLocked {
            return ActionOutcome::Ignored;
        }
        session.epoch += 1;
        session.channel = None;
        session.slug = None;
        session.images.clear();
        session.page = 0;
        session.has_more = false;
        session.loading_more = false;
        session.error = None;
        session.generation_error = None;
        session.last_prompt = None;
        session.last_references.clear();
        session.submission_id = None;
        session.result = None;
        self.events.emit_quiet(
            EventLevel::Info,
            "session_reset",
            payload(json!({
                "epoch": session.epoch,
                "from": session.state.as_str(),
                "interrupted": session.state.is_busy(),
            })),
        );
        if session.state != WorkflowState::Idle {
            self.transition(&mut session, WorkflowState::Idle);
        }
        ActionOutcome::Applied
    }

    /// Writes the current result as `arena-remix-{millis}.png` under `dir`.
    pub fn save_result(&self, dir: &Path) -> Result<PathBuf> {
        let Some(result) = self.lock().result.clone() else {
            bail!("No generated image to save.");
        };
        let bytes = result.decode_png()?;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        let path = dir.join(format!("arena-remix-{}.png", timestamp_millis()));
        fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.events.emit_quiet(
            EventLevel::Info,
            "result_saved",
            payload(json!({ "path": path.to_string_lossy(), "bytes": bytes.len() })),
        );
        Ok(path)
    }

    pub fn reconnect_credentials(&self) -> bool {
        let valid = self.generator.refresh_credentials();
        self.lock().credentials_valid = valid;
        self.events.emit_quiet(
            EventLevel::Info,
            "credentials_refreshed",
            payload(json!({ "valid": valid })),
        );
        valid
    }

    pub fn quota(&self) -> QuotaSnapshot {
        let quota = self.limiter.snapshot();
        self.lock().quota = quota;
        quota
    }

    fn run_generation(
        &self,
        epoch: u64,
        submission: &str,
        prompt: String,
        source: ReferenceSource,
    ) -> ActionOutcome {
        let batch = match source {
            ReferenceSource::Cached(batch) => Ok(batch),
            ReferenceSource::Encode(references) => {
                encode_references(self.fetcher.as_ref(), &references, &self.events)
            }
        };

        let references: Vec<EncodedImage> = {
            let mut session = self.lock();
            if session.epoch != epoch {
                return self.drop_stale("encode_references", epoch);
            }
            match batch {
                Ok(batch) => {
                    for (id, encoded) in &batch {
                        if let Some(image) = session.images.iter_mut().find(|image| image.id == *id) {
                            image.encoded = Some(encoded.clone());
                        }
                    }
                    session.last_references = batch.clone();
                    self.transition(&mut session, WorkflowState::Generating);
                    batch.into_iter().map(|(_, encoded)| encoded).collect()
                }
                Err(err) => {
                    let message = err.to_string();
                    session.error = Some(message.clone());
                    self.transition(&mut session, WorkflowState::Selecting);
                    return ActionOutcome::Failed(message);
                }
            }
        };

        let generated = self.generator.generate(&prompt, &references);
        if let Ok(result) = &generated {
            self.limiter.record_usage_for(submission, result.prompt_tokens);
        }
        let quota = self.limiter.snapshot();

        let mut session = self.lock();
        if session.epoch != epoch {
            return self.drop_stale("generate", epoch);
        }
        session.quota = quota;
        match generated {
            Ok(result) => {
                self.events.emit_quiet(
                    EventLevel::Info,
                    "generation_complete",
                    payload(json!({
                        "attempt": submission,
                        "references": references.len(),
                        "prompt_tokens": result.prompt_tokens,
                        "candidate_tokens": result.candidate_tokens,
                    })),
                );
                session.result = Some(GeneratedImage {
                    data_url: result.image_data_url,
                    prompt,
                    prompt_tokens: result.prompt_tokens,
                    candidate_tokens: result.candidate_tokens,
                });
                session.generation_error = None;
                session.error = None;
                self.transition(&mut session, WorkflowState::Complete);
                ActionOutcome::Applied
            }
            Err(err) => {
                let chain = error_chain_text(&err, 600);
                let missing_key =
                    err.downcast_ref::<RemixError>() == Some(&RemixError::MissingApiKey);
                let message = if is_permission_message(&chain) {
                    session.credentials_valid = false;
                    PERMISSION_DENIED_MESSAGE.to_string()
                } else if is_transient_message(&chain) {
                    SERVICE_UNAVAILABLE_MESSAGE.to_string()
                } else {
                    if missing_key {
                        session.credentials_valid = false;
                    }
                    err.to_string()
                };
                self.events.emit_quiet(
                    EventLevel::Warn,
                    "generation_failed",
                    payload(json!({ "attempt": submission, "error": chain })),
                );
                session.generation_error = Some(message.clone());
                self.transition(&mut session, WorkflowState::Selecting);
                ActionOutcome::Failed(message)
            }
        }
    }

    fn admit(&self, session: &mut Session) -> Result<(), String> {
        if !self.generator.has_credentials() {
            session.credentials_valid = false;
            return Err(RemixError::MissingApiKey.to_string());
        }
        let check = self.limiter.check_limit();
        session.quota = check.snapshot();
        if check.allowed {
            return Ok(());
        }
        let reason = check.reason.unwrap_or_else(|| "Daily quota reached.".to_string());
        session.error = Some(reason.clone());
        self.events.emit_quiet(
            EventLevel::Warn,
            "quota_denied",
            payload(json!({
                "reason": reason,
                "remaining_requests": check.remaining_requests,
                "remaining_tokens": check.remaining_tokens,
            })),
        );
        Err(reason)
    }

    fn transition(&self, session: &mut Session, next: WorkflowState) -> bool {
        let from = session.state;
        if !from.can_transition_to(next) {
            self.events.emit_quiet(
                EventLevel::Warn,
                "illegal_transition",
                payload(json!({ "from": from.as_str(), "to": next.as_str() })),
            );
            return false;
        }
        session.state = next;
        self.events.emit_quiet(
            EventLevel::Info,
            "state_changed",
            payload(json!({ "from": from.as_str(), "to": next.as_str(), "epoch": session.epoch })),
        );
        true
    }

    fn drop_stale(&self, stage: &str, epoch: u64) -> ActionOutcome {
        self.events.emit_quiet(
            EventLevel::Info,
            "stale_result_dropped",
            payload(json!({ "stage": stage, "epoch": epoch })),
        );
        ActionOutcome::Stale
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
