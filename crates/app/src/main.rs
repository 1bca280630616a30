use std::fmt;

use exam_core::model::SessionId;
use services::{AppServices, Clock, EngineConfig, RemoteSyncConfig, ResumeSummary};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingSessionId,
    UnknownArg(String),
    InvalidSessionId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingSessionId => write!(f, "abandon requires a session id"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidSessionId { raw } => write!(f, "invalid session id: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
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
    eprintln!("  cargo run -p app -- status  [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- abandon <session-id> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://exam.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_SYNC_BASE_URL, EXAM_SYNC_TOKEN, RUST_LOG");
    eprintln!("  EXAM_DEBOUNCE_MS, EXAM_INSTRUCTION_SECS, EXAM_LIVENESS_SECS,");
    eprintln!("  EXAM_INACTIVITY_SECS, EXAM_SYNC_RETRY_MAX_SECS");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Abandon,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "status" => Some(Self::Status),
            "abandon" => Some(Self::Abandon),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    db_url: String,
    session_id: Option<SessionId>,
}

impl Args {
    fn parse(
        command: Command,
        args: &mut impl Iterator<Item = String>,
    ) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("EXAM_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://exam.sqlite3".into(), normalize_sqlite_url);
        let mut session_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                raw if command == Command::Abandon
                    && session_id.is_none()
                    && !raw.starts_with("--") =>
                {
                    let parsed = raw
                        .parse::<SessionId>()
                        .map_err(|_| ArgsError::InvalidSessionId { raw: arg.clone() })?;
                    session_id = Some(parsed);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        if command == Command::Abandon && session_id.is_none() {
            return Err(ArgsError::MissingSessionId);
        }
        Ok(Self { db_url, session_id })
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

fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

fn print_summary(summary: &ResumeSummary) {
    let paper = match &summary.paper_variant {
        Some(variant) => format!("{} ({variant})", summary.paper_name),
        None => summary.paper_name.clone(),
    };
    println!("session   {}", summary.session_id);
    println!("paper     {paper}");
    if let Some(section) = &summary.section_name {
        println!("section   {} ({section})", summary.section_index + 1);
    }
    println!(
        "question  {}/{} ({} answered)",
        summary.question_position, summary.total_questions, summary.answered
    );
    if let Some(remaining) = summary.remaining_seconds {
        println!("remaining {}", format_clock(remaining));
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Status,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(cmd, &mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&parsed.db_url)?;
    let remote = RemoteSyncConfig::from_env();
    tracing::info!(db = %parsed.db_url, remote = remote.is_some(), "opening session store");
    let services = AppServices::new_sqlite(
        &parsed.db_url,
        Clock::default_clock(),
        EngineConfig::from_env(),
        remote,
    )
    .await?;
    let mut controller = services.controller();

    match cmd {
        Command::Status => match controller.resumable_session().await? {
            Some(summary) => print_summary(&summary),
            None => println!("no unfinished session"),
        },
        Command::Abandon => {
            let Some(session_id) = parsed.session_id else {
                return Err(ArgsError::MissingSessionId.into());
            };
            controller.recover(session_id).await?;
            controller.quit()?;
            println!("abandoned {session_id}");
        }
    }

    services.shutdown().await;
    let status = services.persistence().status();
    if status.remote_pending > 0 {
        tracing::warn!(pending = status.remote_pending, "remote sync did not complete");
    }
    Ok(())
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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
