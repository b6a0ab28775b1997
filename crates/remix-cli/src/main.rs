use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remix_contracts::access::AccessGate;
use remix_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use remix_contracts::events::{payload, EventLevel, EventWriter};
use remix_contracts::quota::{JsonFileStore, KvStore, QuotaSnapshot, RateLimiter};
use remix_contracts::slug::extract_channel_slug;
use remix_contracts::workflow::WorkflowState;
use remix_engine::workflow::STATE_FILE_NAME;
use remix_engine::{ActionOutcome, RemixConfig, Session, WorkflowController};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "remix", version, about = "Restyle a subject after an Are.na channel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: unlock, load a channel, pick references, generate.
    Chat(ChatArgs),
    /// Print the remaining daily quota.
    Quota(StateArgs),
    /// Print the channel slug extracted from a URL or bare slug.
    Slug(SlugArgs),
    /// Persist the access grant without starting a session.
    Unlock(UnlockArgs),
    /// Forget the stored access grant.
    Lock(StateArgs),
}

#[derive(Debug, Parser)]
struct StateArgs {
    #[arg(long, default_value = ".remix")]
    state_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = ".remix")]
    state_dir: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Directory for `/save` when no path is given.
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct SlugArgs {
    input: String,
}

#[derive(Debug, Parser)]
struct UnlockArgs {
    code: String,
    #[arg(long, default_value = ".remix")]
    state_dir: PathBuf,
}

const LIST_PREVIEW_LIMIT: usize = 60;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("remix error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Quota(args) => run_quota(args),
        Command::Slug(args) => Ok(run_slug(args)),
        Command::Unlock(args) => run_unlock(args),
        Command::Lock(args) => run_lock(args),
    }
}

fn state_store(state_dir: &Path) -> Arc<dyn KvStore> {
    Arc::new(JsonFileStore::new(state_dir.join(STATE_FILE_NAME)))
}

fn run_quota(args: StateArgs) -> Result<i32> {
    let limiter = RateLimiter::new(state_store(&args.state_dir), EventWriter::disabled());
    let check = limiter.check_limit();
    println!("{}", format_quota(&check.snapshot()));
    if let Some(reason) = check.reason {
        println!("{reason}");
    }
    Ok(0)
}

fn run_slug(args: SlugArgs) -> i32 {
    match extract_channel_slug(&args.input) {
        Some(slug) => {
            println!("{slug}");
            0
        }
        None => {
            eprintln!("Invalid Are.na URL format");
            2
        }
    }
}

fn run_unlock(args: UnlockArgs) -> Result<i32> {
    let config = RemixConfig::from_env();
    let gate = AccessGate::new(state_store(&args.state_dir), config.access_code);
    if gate.unlock(&args.code)? {
        println!("Unlocked.");
        Ok(0)
    } else {
        eprintln!("Invalid access code.");
        Ok(2)
    }
}

fn run_lock(args: StateArgs) -> Result<i32> {
    let config = RemixConfig::from_env();
    AccessGate::new(state_store(&args.state_dir), config.access_code).revoke()?;
    println!("Locked.");
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = RemixConfig::from_env();
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.state_dir.join("events.jsonl"));
    let events = EventWriter::new(&events_path, uuid::Uuid::new_v4().to_string());
    let controller = WorkflowController::from_config(&config, &args.state_dir, events.clone())
        .context("failed to start remix session")?;

    let stdin = io::stdin();
    let mut line = String::new();

    events.emit(
        "chat_started",
        payload(json!({
            "state_dir": args.state_dir.to_string_lossy(),
            "state": controller.state().as_str(),
        })),
    )?;
    println!(
        "Remix chat started (session {}). Type /help for commands.",
        events.session_id()
    );
    print_status(&controller.snapshot());

    loop {
        print!("{}> ", controller.state());
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }
        events.emit_quiet(
            EventLevel::Info,
            "chat_intent",
            payload(json!({ "action": intent.action })),
        );

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Plain text generates with the current selection.");
            }
            "unlock" => {
                let code = intent.arg_str("code").unwrap_or_default();
                report(controller.unlock(code), "Unlocked.");
            }
            "load_channel" => {
                let Some(input) = intent.arg_str("input") else {
                    println!("/channel requires an Are.na URL or slug");
                    continue;
                };
                if matches!(
                    controller.state(),
                    WorkflowState::Selecting | WorkflowState::Complete
                ) {
                    controller.reset();
                }
                println!("Loading channel...");
                if report(controller.load_channel(input), "Channel loaded.") {
                    print_channel(&controller.snapshot());
                }
            }
            "load_more" => {
                if report(controller.load_more(), "Loaded more images.") {
                    let session = controller.snapshot();
                    println!(
                        "{} images (page {}){}",
                        session.images.len(),
                        session.page,
                        if session.has_more { ", more available" } else { "" }
                    );
                }
            }
            "list" => print_images(&controller.snapshot()),
            "toggle_select" => run_select(&controller, &intent),
            "clear_selection" => {
                report(controller.clear_selection(), "Selection cleared.");
            }
            "generate" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                println!("Generating...");
                if report(controller.generate(&prompt), "Generated.") {
                    print_result(&controller.snapshot());
                }
            }
            "retry" => {
                println!("Retrying...");
                if report(controller.retry(), "Generated.") {
                    print_result(&controller.snapshot());
                }
            }
            "dismiss" => {
                report(controller.dismiss(), "Dismissed.");
            }
            "save_result" => {
                let dir = intent
                    .arg_str("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.out.clone());
                match controller.save_result(&dir) {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(err) => {
                        events.warn(
                            "result_save_failed",
                            payload(json!({
                                "dir": dir.to_string_lossy(),
                                "error": format!("{err:#}"),
                            })),
                        )?;
                        println!("Save failed: {err:#}");
                    }
                }
            }
            "reset" => {
                report(controller.reset(), "Session reset.");
            }
            "quota" => println!("{}", format_quota(&controller.quota())),
            "reconnect" => {
                if controller.reconnect_credentials() {
                    println!("API key found.");
                } else {
                    println!("API key not found. Set GEMINI_API_KEY and run /reconnect.");
                }
            }
            "status" => print_status(&controller.snapshot()),
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    Ok(())
}

fn run_select(controller: &WorkflowController, intent: &Intent) {
    if let Some(rejected) = intent.command_args.get("rejected") {
        println!("Ignoring non-numeric ids: {rejected}");
    }
    let ids = intent.arg_ids("ids");
    if ids.is_empty() {
        println!("/select requires one or more image ids (see /list)");
        return;
    }
    for id in ids {
        match controller.toggle_select(id) {
            ActionOutcome::Applied => {}
            ActionOutcome::Ignored => {
                println!("Nothing to select yet. Load a channel first.");
                return;
            }
            outcome => {
                report(outcome, "");
            }
        }
    }
    let session = controller.snapshot();
    println!("{} selected", session.selected_count());
}

/// Prints the outcome line; returns true when the action was applied.
fn report(outcome: ActionOutcome, applied: &str) -> bool {
    match outcome {
        ActionOutcome::Applied => {
            if !applied.is_empty() {
                println!("{applied}");
            }
            true
        }
        ActionOutcome::Rejected(message) | ActionOutcome::Failed(message) => {
            println!("{message}");
            false
        }
        ActionOutcome::Stale => {
            println!("Session was reset; result discarded.");
            false
        }
        ActionOutcome::Ignored => {
            println!("Not available right now. Type /status.");
            false
        }
    }
}

fn format_quota(quota: &QuotaSnapshot) -> String {
    format!(
        "Quota: {} requests, {} tokens left today",
        quota.remaining_requests.max(0),
        quota.remaining_tokens.max(0)
    )
}

fn print_status(session: &Session) {
    println!("State: {}", session.state);
    if session.state == WorkflowState::GateLocked {
        println!("Enter the access code with /unlock <code>.");
    }
    if let Some(channel) = &session.channel {
        println!(
            "Channel: {} ({} images loaded, {} selected)",
            channel.title,
            session.images.len(),
            session.selected_count()
        );
    }
    if !session.credentials_valid {
        println!("API key: missing or rejected (/reconnect after fixing)");
    }
    if let Some(error) = &session.error {
        println!("Error: {error}");
    }
    if let Some(error) = &session.generation_error {
        println!("Generation failed: {error} (/retry or /dismiss)");
    }
    println!("{}", format_quota(&session.quota));
}

fn print_channel(session: &Session) {
    if let Some(channel) = &session.channel {
        println!("{} /{}", channel.title, channel.slug);
        if let Some(description) = channel.description.as_deref() {
            if !description.trim().is_empty() {
                println!("{}", description.trim());
            }
        }
    }
    print_images(session);
}

fn print_images(session: &Session) {
    if session.images.is_empty() {
        println!("No images loaded.");
        return;
    }
    for image in &session.images {
        let mark = if image.selected { "x" } else { " " };
        println!("[{mark}] {:>10}  {}", image.id, preview(&image.url));
    }
    if session.has_more {
        println!("More images available (/more).");
    }
}

fn print_result(session: &Session) {
    if let Some(result) = &session.result {
        println!(
            "Result for \"{}\" ({} prompt tokens). /save to write it, /dismiss to close.",
            result.prompt, result.prompt_tokens
        );
    }
    println!("{}", format_quota(&session.quota));
}

fn preview(url: &str) -> String {
    if url.chars().count() <= LIST_PREVIEW_LIMIT {
        return url.to_string();
    }
    url.chars().take(LIST_PREVIEW_LIMIT).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_chat_defaults() {
        let cli = Cli::parse_from(["remix", "chat"]);
        match cli.command {
            Command::Chat(args) => {
                assert_eq!(args.state_dir, PathBuf::from(".remix"));
                assert_eq!(args.out, PathBuf::from("."));
                assert!(args.events.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn slug_command_exit_codes() {
        assert_eq!(
            run_slug(SlugArgs {
                input: "https://www.are.na/alice/moodboard".to_string()
            }),
            0
        );
        assert_eq!(run_slug(SlugArgs { input: "  ".to_string() }), 2);
    }

    #[test]
    fn quota_clamps_negative_remaining() {
        let line = format_quota(&QuotaSnapshot {
            remaining_requests: -2,
            remaining_tokens: 1200,
        });
        assert_eq!(line, "Quota: 0 requests, 1200 tokens left today");
    }

    #[test]
    fn unlock_then_lock_round_trips_grant() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let code = RemixConfig::from_env().access_code;
        let status = run_unlock(UnlockArgs {
            code,
            state_dir: temp.path().to_path_buf(),
        })?;
        assert_eq!(status, 0);
        assert!(temp.path().join(STATE_FILE_NAME).exists());

        let store = state_store(temp.path());
        assert!(store.get(remix_contracts::access::ACCESS_GRANT_KEY)?.is_some());
        run_lock(StateArgs {
            state_dir: temp.path().to_path_buf(),
        })?;
        assert_eq!(store.get(remix_contracts::access::ACCESS_GRANT_KEY)?, None);
        Ok(())
    }

    #[test]
    fn preview_truncates_long_urls() {
        let long = format!("https://images.example/{}", "a".repeat(80));
        assert_eq!(preview(&long).chars().count(), LIST_PREVIEW_LIMIT + 1);
        assert_eq!(preview("https://x/y.jpg"), "https://x/y.jpg");
    }
}
