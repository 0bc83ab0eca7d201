use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use megapost_contracts::categories::{prompt_for_category, Category};
use megapost_contracts::events::EventWriter;
use megapost_contracts::runs::summary::{write_summary, CategoryFailure, RunSummary};
use megapost_engine::client::{client_for_provider, GeminiConfig};
use megapost_engine::export::{download_all, download_one};
use megapost_engine::{ingest, new_session_id, CategoryState, CategoryUpdate, Orchestrator};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

const EXIT_MISSING_CREDENTIAL: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "megapost",
    version,
    about = "Generate marketing image variants from one product photo"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate all seven categories.
    Generate(GenerateArgs),
    /// Generate a single category again.
    Regenerate(RegenerateArgs),
    /// List categories, their titles and prompts.
    Categories,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Local image file (png, jpg, jpeg, webp, gif).
    #[arg(long)]
    image: Option<PathBuf>,
    /// Image URL to fetch.
    #[arg(long)]
    url: Option<String>,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct RegenerateArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    category: Category,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("megapost error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Regenerate(args) => run_regenerate(args),
        Command::Categories => {
            print_categories();
            Ok(0)
        }
    }
}

struct Session {
    orchestrator: Orchestrator,
    session_id: String,
    started_at: String,
}

fn open_session(args: &SessionArgs) -> Result<Option<Session>> {
    let config = GeminiConfig::from_env();
    if args.provider.trim().eq_ignore_ascii_case("gemini") {
        if let Some(notice) = config.credential_notice() {
            eprintln!("{notice}");
            return Ok(None);
        }
    }
    let client = client_for_provider(&args.provider, &config)?;
    let session_id = new_session_id();
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut orchestrator = Orchestrator::new(client, EventWriter::to_file(events_path, &session_id));
    orchestrator.set_observer(print_update);
    Ok(Some(Session {
        orchestrator,
        session_id,
        started_at: now_utc_iso(),
    }))
}

fn load_source(args: &SourceArgs) -> Result<megapost_engine::SourceImage> {
    let source = match (&args.image, &args.url) {
        (Some(path), _) => ingest::from_path(path)?,
        (None, Some(url)) => {
            let http = HttpClient::new();
            ingest::from_url(&http, url).with_context(|| format!("could not load {url}"))?
        }
        (None, None) => bail!("either --image or --url is required"),
    };
    if source.media_type().is_none() {
        bail!(
            "unsupported image type: {} (expected png, jpg, jpeg, webp or gif)",
            source.file_name()
        );
    }
    Ok(source)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let Some(session) = open_session(&args.session)? else {
        return Ok(EXIT_MISSING_CREDENTIAL);
    };
    let source = load_source(&args.source)?;
    println!(
        "Generating {} variants of {} with {}...",
        Category::COUNT,
        source.file_name(),
        session.orchestrator.provider_name()
    );
    session.orchestrator.select_source(Some(source));
    let report = session.orchestrator.generate_all()?;

    let images = session.orchestrator.generated_images();
    let written = download_all(&args.session.out, &images)?;
    for path in &written {
        println!("Saved {}", path.display());
    }
    for (category, message) in &report.failed {
        println!(
            "{} failed: {message} (retry with `megapost regenerate --category {}`)",
            category.title(),
            category.tag()
        );
    }
    finish_session(&session, &args.session.out, &written, None)?;
    Ok(if session.orchestrator.has_generated_images() {
        0
    } else {
        1
    })
}

fn run_regenerate(args: RegenerateArgs) -> Result<i32> {
    let Some(session) = open_session(&args.session)? else {
        return Ok(EXIT_MISSING_CREDENTIAL);
    };
    let source = load_source(&args.source)?;
    session.orchestrator.select_source(Some(source));
    session.orchestrator.regenerate(args.category)?;

    let mut written = Vec::new();
    match session.orchestrator.state(args.category) {
        CategoryState::Succeeded(uri) => {
            let path = download_one(&args.session.out, args.category, &uri)?;
            println!("Saved {}", path.display());
            written.push(path);
        }
        CategoryState::Failed(message) => {
            println!("{} failed: {message}", args.category.title());
        }
        CategoryState::Absent | CategoryState::InProgress => {}
    }
    let mut extra = Map::new();
    extra.insert("regenerated".to_string(), json!(args.category));
    finish_session(&session, &args.session.out, &written, Some(&extra))?;
    Ok(if written.is_empty() { 1 } else { 0 })
}

fn finish_session(
    session: &Session,
    out: &Path,
    written: &[PathBuf],
    extra: Option<&Map<String, Value>>,
) -> Result<()> {
    let source = session.orchestrator.source();
    let states = session.orchestrator.states();
    let summary = RunSummary {
        session_id: session.session_id.clone(),
        provider: session.orchestrator.provider_name().to_string(),
        source_file: source
            .as_ref()
            .map(|source| source.file_name().to_string())
            .unwrap_or_default(),
        source_sha256: source
            .as_ref()
            .map(|source| source.sha256().to_string())
            .unwrap_or_default(),
        started_at: session.started_at.clone(),
        finished_at: now_utc_iso(),
        total_categories: Category::COUNT as u64,
        succeeded: states
            .iter()
            .filter(|(_, state)| state.image().is_some())
            .map(|(category, _)| category)
            .collect(),
        failed: states
            .iter()
            .filter_map(|(category, state)| {
                state.error().map(|error| CategoryFailure {
                    category,
                    error: error.to_string(),
                })
            })
            .collect(),
        downloads: written
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect(),
    };
    write_summary(&out.join("summary.json"), &summary, extra)
}

fn print_update(update: &CategoryUpdate) {
    let outcome = match &update.state {
        CategoryState::Succeeded(_) => "done".to_string(),
        CategoryState::Failed(message) => format!("failed: {message}"),
        CategoryState::Absent | CategoryState::InProgress => return,
    };
    if update.bulk {
        let status = if update.progress.completed < update.progress.total {
            "Generating..."
        } else {
            "Done!"
        };
        println!(
            "[{:>3}%] {status} {} {outcome}",
            update.progress.percent(),
            update.category.title()
        );
    } else {
        println!("{} {outcome}", update.category.title());
    }
}

fn print_categories() {
    for category in Category::ALL {
        println!("{} ({})", category.tag(), category.title());
        println!("  {}", prompt_for_category(category));
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
