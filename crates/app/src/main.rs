mod demo;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use assess_core::model::{ConceptId, FocusContext, KnowledgeAreaId, OptionLetter};
use services::{
    ClientConfig, Clock, EndReason, FocusedVariantResolver, HttpSessionService,
    InMemorySessionService, LaunchOptions, RemoteSessionService, SessionController,
    SessionSettings, SessionSnapshot, SessionStatus, SessionTimer, SubmitOutcome,
};
use storage::repository::Storage;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidTimeLimit { raw: String },
    InvalidLimit { raw: String },
    EmptyConcepts,
    ConflictingFocus,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidTimeLimit { raw } => write!(f, "invalid --time-limit value: {raw}"),
            ArgsError::InvalidLimit { raw } => write!(f, "invalid --limit value: {raw}"),
            ArgsError::EmptyConcepts => write!(f, "--concepts needs at least one concept id"),
            ArgsError::ConflictingFocus => write!(f, "--area and --concepts are mutually exclusive"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  assess run     [--db <sqlite_url>] [--base-url <url>] [--token <token>]");
    eprintln!("                 [--area <id> | --concepts <id,id,...>] [--time-limit <secs>]");
    eprintln!("                 [--offline] [--verbose]");
    eprintln!("  assess history [--db <sqlite_url>] [--limit <n>] [--verbose]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:assess.sqlite3");
    eprintln!("  --limit 20");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  ASSESS_DB_URL, ASSESS_API_BASE_URL, ASSESS_API_TOKEN, ASSESS_HTTP_TIMEOUT_SECS,");
    eprintln!("  ASSESS_SESSION_TIME_LIMIT_SECS, ASSESS_SESSION_TYPE, ASSESS_STRATEGY, RUST_LOG");
    eprintln!();
    eprintln!("While answering: a letter submits it, Enter continues after feedback,");
    eprintln!("p pauses, r resumes, q ends the session.");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    History,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "history" => Some(Self::History),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    db_url: String,
    base_url: Option<String>,
    token: Option<String>,
    focus: Option<FocusContext>,
    time_limit: Option<Duration>,
    offline: bool,
    verbose: bool,
    limit: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("ASSESS_DB_URL")
                .ok()
                .map_or_else(|| normalize_sqlite_url("sqlite:assess.sqlite3".into()), normalize_sqlite_url),
            base_url: None,
            token: None,
            focus: None,
            time_limit: None,
            offline: false,
            verbose: false,
            limit: 20,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--base-url" => parsed.base_url = Some(require_value(args, "--base-url")?),
                "--token" => parsed.token = Some(require_value(args, "--token")?),
                "--area" => {
                    let value = require_value(args, "--area")?;
                    parsed.set_focus(FocusContext::KnowledgeArea(KnowledgeAreaId::new(value)))?;
                }
                "--concepts" => {
                    let value = require_value(args, "--concepts")?;
                    let ids: Vec<ConceptId> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ConceptId::new)
                        .collect();
                    if ids.is_empty() {
                        return Err(ArgsError::EmptyConcepts);
                    }
                    parsed.set_focus(FocusContext::Concepts(ids))?;
                }
                "--time-limit" => {
                    let value = require_value(args, "--time-limit")?;
                    let secs: u64 = value
                        .parse()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or_else(|| ArgsError::InvalidTimeLimit { raw: value.clone() })?;
                    parsed.time_limit = Some(Duration::from_secs(secs));
                }
                "--limit" => {
                    let value = require_value(args, "--limit")?;
                    parsed.limit = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidLimit { raw: value.clone() })?;
                }
                "--offline" => parsed.offline = true,
                "--verbose" | "-v" => parsed.verbose = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn set_focus(&mut self, focus: FocusContext) -> Result<(), ArgsError> {
        if self.focus.is_some() {
            return Err(ArgsError::ConflictingFocus);
        }
        self.focus = Some(focus);
        Ok(())
    }

    fn client_config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.base_url {
            Some(url) => {
                let mut config = ClientConfig::new(url.trim_end_matches('/'));
                config.api_token = std::env::var("ASSESS_API_TOKEN").ok();
                config
            }
            None => ClientConfig::from_env()?,
        };
        if let Some(token) = &self.token {
            config = config.with_token(token.clone());
        }
        Ok(config)
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_storage(db_url: &str) -> Result<Storage, Box<dyn std::error::Error>> {
    prepare_sqlite_file(db_url)?;
    Ok(Storage::sqlite(db_url).await?)
}

// ─── run ───

async fn run_session(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&args.db_url).await?;
    let mut settings = SessionSettings::from_env()?;
    if let Some(limit) = args.time_limit {
        settings.time_limit = limit;
    }

    let clock = Clock::default_clock();
    let remote: Arc<dyn RemoteSessionService> = if args.offline {
        info!("using the built-in offline question bank");
        Arc::new(InMemorySessionService::new(clock, demo::bank()?))
    } else {
        Arc::new(HttpSessionService::new(&args.client_config()?))
    };

    let controller = Arc::new(
        SessionController::new(remote, clock)
            .with_history(storage.history.clone())
            .with_settings(&settings),
    );
    let resolver = FocusedVariantResolver::new(controller.clone());
    let options = LaunchOptions {
        skip_auto_start: false,
        focus: args.focus.clone(),
    };
    resolver.launch(&options).await?;

    let timer = SessionTimer::start(controller.clone(), settings.time_limit);
    drive(&controller, &timer).await?;
    timer.cancel();

    let snapshot = controller.snapshot();
    print_summary(&snapshot);
    if let Some(progress) = resolver.target_progress() {
        println!(
            "Focus progress: {:+.1}% mastery over {} question(s)",
            progress.mastery_delta * 100.0,
            progress.questions_in_focus
        );
    }
    if !controller.history_recorded() {
        if let Err(err) = controller.finalize_history().await {
            warn!(error = %err, "session history was not saved");
        }
    }
    Ok(())
}

/// Interactive question loop. Returns once the session has ended.
async fn drive(
    controller: &SessionController,
    timer: &SessionTimer,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = controller.subscribe();

    report(controller.fetch_next().await);
    loop {
        let snapshot = controller.snapshot();
        if snapshot.status == SessionStatus::Ended {
            return Ok(());
        }
        render(&snapshot, timer.remaining());

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = snapshots.wait_for(|s| s.status == SessionStatus::Ended) => {
                println!("Time is up.");
                return Ok(());
            }
        };
        let Some(line) = line else {
            // stdin closed
            report(controller.end().await);
            return Ok(());
        };

        match line.trim() {
            "q" => report(controller.end().await),
            "p" => report(controller.pause().await),
            "r" => {
                report(controller.resume().await);
                report(controller.fetch_next().await);
            }
            "" if snapshot.flow.feedback().is_some() => report(controller.proceed_to_next().await),
            "" if snapshot.flow.question().is_none() => report(controller.fetch_next().await),
            input => match input.to_uppercase().parse::<OptionLetter>() {
                Ok(letter) => answer(controller, letter).await,
                Err(_) => eprintln!("unrecognized input: {input}"),
            },
        }
    }
}

async fn answer(controller: &SessionController, letter: OptionLetter) {
    if let Err(err) = controller.select_answer(letter) {
        eprintln!("{err}");
        return;
    }
    match controller.submit_answer().await {
        Ok(SubmitOutcome::Feedback(result)) => {
            if result.is_correct {
                println!("Correct.");
            } else {
                println!("Incorrect. The answer is {}.", result.correct_answer);
            }
            if let Some(explanation) = &result.explanation {
                println!("{explanation}");
            }
            println!(
                "Score: {}/{}  (Enter to continue)",
                result.stats.correct_count, result.stats.total_answered
            );
        }
        Ok(SubmitOutcome::Completed(_)) => println!("Session complete."),
        Ok(_) => {}
        Err(err) => eprintln!("{err}"),
    }
}

fn report<T>(result: Result<T, services::SessionError>) {
    if let Err(err) = result {
        eprintln!("{err}");
        if err.is_conflict() {
            eprintln!("The session changed on the server; try again.");
        }
    }
}

fn render(snapshot: &SessionSnapshot, remaining: Duration) {
    let clock = format!("{:02}:{:02}", remaining.as_secs() / 60, remaining.as_secs() % 60);
    match snapshot.status {
        SessionStatus::Paused => println!("[paused, {clock} left] r to resume, q to end"),
        SessionStatus::Active if snapshot.flow.feedback().is_some() => {}
        SessionStatus::Active => {
            let Some(question) = snapshot.flow.question() else {
                println!("[{clock} left] no question loaded; Enter to retry, q to end");
                return;
            };
            println!();
            println!("[{} | {clock} left] {}", question.knowledge_area_name(), question.prompt());
            for option in question.options() {
                println!("  {}) {}", option.letter, option.text);
            }
        }
        other => println!("[{other}]"),
    }
}

fn print_summary(snapshot: &SessionSnapshot) {
    let Some(summary) = snapshot
        .session
        .as_ref()
        .and_then(|s| s.final_summary())
    else {
        println!("Session ended without a summary.");
        return;
    };
    println!();
    println!(
        "Session ended ({}): {}/{} correct, {:.0}% accuracy",
        snapshot.end_reason.map_or("unknown", EndReason::as_str),
        summary.correct_answers(),
        summary.total_questions(),
        summary.accuracy() * 100.0
    );
    if summary.source() == assess_core::model::SummarySource::LocalFallback {
        println!("(totals computed locally; the server did not confirm the end)");
    }
}

// ─── history ───

async fn show_history(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&args.db_url).await?;
    let rows = storage.history.list_recent(args.limit).await?;
    if rows.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }
    for row in rows {
        let entry = &row.entry;
        let focus = entry
            .focus
            .as_ref()
            .map(|f| format!(" {}={}", f.focus_type().as_str(), f.focus_target_id()))
            .unwrap_or_default();
        println!(
            "{}  {:<22} {:>3}/{:<3} {:>5.1}%  {}{}",
            entry.summary.ended_at().format("%Y-%m-%d %H:%M"),
            entry.session_type.as_str(),
            entry.summary.correct_answers(),
            entry.summary.total_questions(),
            entry.summary.accuracy() * 100.0,
            entry.session_id,
            focus
        );
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Default behavior: run a session when no subcommand is provided.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if argv
        .first()
        .is_some_and(|first| Command::from_arg(first).is_some())
    {
        argv.remove(0);
    }

    let args = Args::parse(&mut argv.into_iter())?;
    init_tracing(args.verbose);

    match cmd {
        Command::Run => run_session(args).await,
        Command::History => show_history(args).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
