use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod client;
mod config;
mod db;
mod error;
mod ingest;
mod models;
mod paginate;
mod report;

use aggregate::StageFilter;
use client::{ApiClient, Loaded, Snapshot, SnapshotKind, ViewLoader};
use config::{Config, ConfigArgs};
use error::FetchError;
use ingest::Ingested;
use models::{CourseRecord, OngoingCourse};
use paginate::{LabelFilter, TableState};

#[derive(Parser)]
#[command(name = "course-quality-monitor")]
#[command(about = "Course quality dashboard views over backend predictions", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quality label distribution for one snapshot
    Stats {
        #[arg(long = "type", value_enum, default_value_t = SnapshotKind::Ongoing)]
        kind: SnapshotKind,
        /// Show the backend's own summary instead of computing it locally
        #[arg(long, conflicts_with = "csv")]
        remote: bool,
        /// Read historical courses from a CSV export instead of the backend
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Historical distribution, enrollment breakdown and course table
    Historical {
        #[arg(long, value_enum, default_value_t = LabelFilter::All)]
        label: LabelFilter,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Stage progression and critical courses for ongoing courses
    Ongoing {
        #[arg(long, value_enum, default_value_t = StageFilter::All)]
        stage: StageFilter,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Stage history and coverage for one ongoing course
    Detail {
        #[arg(long)]
        id: String,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Refresh one view periodically
    Watch {
        #[arg(long, value_enum, default_value_t = SnapshotKind::Ongoing)]
        view: SnapshotKind,
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Create or upgrade the snapshot archive schema
    InitDb,
    /// Archive the current distributions
    Record {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// List archived distributions
    History {
        #[arg(long = "type", value_enum)]
        kind: Option<SnapshotKind>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_args(&cli.config)?;
    let client = Arc::new(ApiClient::new(&config));

    match cli.command {
        Commands::Stats {
            kind,
            remote,
            csv,
            json,
        } => {
            check_stats_source(kind, csv.as_deref())?;
            if remote {
                let stats = fetch(&client, move |client| client.fetch_stats(kind)).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    println!(
                        "{} courses: Needs Improvement {} ({:.1}%), Acceptable {} ({:.1}%), Excellent {} ({:.1}%)",
                        stats.total,
                        stats.critical,
                        stats.critical_percentage,
                        stats.acceptable,
                        stats.acceptable_percentage,
                        stats.excellent,
                        stats.excellent_percentage
                    );
                }
                return Ok(());
            }

            let summary = match kind {
                SnapshotKind::Historical => {
                    let historical = load_historical(&client, csv.as_deref()).await?;
                    aggregate::summarize_distribution(&historical.records)
                }
                SnapshotKind::Ongoing => {
                    let ongoing = fetch(&client, |client| client.fetch_ongoing()).await?;
                    aggregate::summarize_ongoing_distribution(&ongoing.records)
                }
            };

            if json {
                let stats = aggregate::as_api_stats(&summary);
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let mut output = String::new();
                report::render_distribution(&mut output, &summary);
                print!("{output}");
            }
        }
        Commands::Historical { label, page, csv } => {
            let historical = load_historical(&client, csv.as_deref()).await?;
            let mut table = TableState::default();
            table.set_filter(label);
            table.set_page(page);

            let mut output = String::new();
            output.push_str("## Quality Distribution\n");
            report::render_distribution(
                &mut output,
                &aggregate::summarize_distribution(&historical.records),
            );
            output.push_str("\n## Quality by Enrollment Size\n");
            report::render_segmentation(
                &mut output,
                &aggregate::segment_by_enrollment(&historical.records),
            );
            match table.filter().label() {
                Some(label) => output.push_str(&format!("\n## Courses ({label})\n")),
                None => output.push_str("\n## Courses\n"),
            }
            report::render_course_table(&mut output, &table.view(&historical.records));
            print!("{output}");
            print_rejections(&historical.rejected);
        }
        Commands::Ongoing { stage, limit } => {
            let ongoing = fetch(&client, |client| client.fetch_ongoing()).await?;
            let critical = aggregate::critical_courses(&ongoing.records, stage);
            let total_critical =
                aggregate::critical_courses(&ongoing.records, StageFilter::All).len();

            let mut output = String::new();
            output.push_str("## Stage Progression\n");
            report::render_stage_progression(
                &mut output,
                &aggregate::stage_progression(&ongoing.records),
            );
            output.push_str("\n## Courses by Urgency\n");
            report::render_ranked_courses(
                &mut output,
                &aggregate::rank_by_severity(&ongoing.records),
                limit,
            );
            output.push_str(&format!(
                "\n## Critical Courses ({} of {})\n",
                critical.len(),
                total_critical
            ));
            report::render_ranked_courses(&mut output, &critical, limit);
            print!("{output}");
            print_rejections(&ongoing.rejected);
        }
        Commands::Detail { id } => {
            let ongoing = fetch(&client, |client| client.fetch_ongoing()).await?;
            let course = ongoing
                .records
                .iter()
                .find(|course| course.id == id)
                .with_context(|| format!("no ongoing course with id {id}"))?;

            let mut output = String::new();
            report::render_detail(&mut output, &aggregate::course_detail(course));
            print!("{output}");
        }
        Commands::Report { out, csv } => {
            let (historical, ongoing) = load_both(&client, csv.as_deref()).await?;
            let source = csv
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| config.api_url.clone());
            let report = report::build_report(&source, chrono::Utc::now(), &historical, &ongoing);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Watch {
            view,
            interval_secs,
        } => {
            let loader = ViewLoader::new(ApiClient::new(&config));
            watch(loader, view, Duration::from_secs(interval_secs.max(1))).await?;
        }
        Commands::InitDb => {
            let pool = db::connect(config.require_database_url()?).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Record { csv } => {
            let pool = db::connect(config.require_database_url()?).await?;
            let (historical, ongoing) = load_both(&client, csv.as_deref()).await?;

            let historical_id = db::record_snapshot(
                &pool,
                SnapshotKind::Historical,
                &aggregate::summarize_distribution(&historical.records),
                historical.rejected.len(),
            )
            .await?;
            let ongoing_id = db::record_snapshot(
                &pool,
                SnapshotKind::Ongoing,
                &aggregate::summarize_ongoing_distribution(&ongoing.records),
                ongoing.rejected.len(),
            )
            .await?;
            println!("Archived snapshots {historical_id} (historical) and {ongoing_id} (ongoing).");
        }
        Commands::History { kind, limit } => {
            let pool = db::connect(config.require_database_url()?).await?;
            let history = db::fetch_history(&pool, kind, limit).await?;

            let mut output = String::new();
            report::render_history(&mut output, &history);
            print!("{output}");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Runs a blocking backend call off the async runtime.
async fn fetch<T, F>(client: &Arc<ApiClient>, call: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ApiClient) -> Result<T, FetchError> + Send + 'static,
{
    let client = Arc::clone(client);
    let result = tokio::task::spawn_blocking(move || call(&client))
        .await
        .context("fetch task panicked")?;
    Ok(result?)
}

async fn load_historical(
    client: &Arc<ApiClient>,
    csv: Option<&Path>,
) -> anyhow::Result<Ingested<CourseRecord>> {
    match csv {
        Some(path) => ingest::load_historical_csv(path),
        None => fetch(client, |client| client.fetch_historical()).await,
    }
}

async fn load_both(
    client: &Arc<ApiClient>,
    csv: Option<&Path>,
) -> anyhow::Result<(Ingested<CourseRecord>, Ingested<OngoingCourse>)> {
    tokio::try_join!(
        load_historical(client, csv),
        fetch(client, |client| client.fetch_ongoing())
    )
}

/// CSV exports only carry historical courses.
fn check_stats_source(kind: SnapshotKind, csv: Option<&Path>) -> anyhow::Result<()> {
    if let (SnapshotKind::Ongoing, Some(path)) = (kind, csv) {
        anyhow::bail!(
            "--csv {} only applies to --type historical; ongoing courses come from the backend",
            path.display()
        );
    }
    Ok(())
}

fn print_rejections(rejected: &[ingest::Rejection]) {
    if rejected.is_empty() {
        return;
    }
    let mut output = format!("\n{} malformed records were excluded:\n", rejected.len());
    report::render_rejections(&mut output, rejected);
    print!("{output}");
}

async fn watch(
    loader: ViewLoader<ApiClient>,
    view: SnapshotKind,
    interval: Duration,
) -> anyhow::Result<()> {
    let (sender, mut receiver) = mpsc::channel(8);
    let mut ticker = tokio::time::interval(interval);
    info!(view = view.as_str(), ?interval, "watching view");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let loader = loader.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    let _ = sender.send(loader.load(view).await).await;
                });
            }
            Some(result) = receiver.recv() => match result {
                Ok(Loaded::Current(snapshot)) => print_snapshot(&snapshot),
                Ok(Loaded::Superseded) => {}
                Err(error) => warn!(%error, retryable = error.is_retryable(), "refresh failed"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("stopping watch");
                break;
            }
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    let mut output = format!(
        "\n== {} ==\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    match snapshot {
        Snapshot::Historical(historical) => {
            report::render_distribution(
                &mut output,
                &aggregate::summarize_distribution(&historical.records),
            );
        }
        Snapshot::Ongoing(ongoing) => {
            report::render_distribution(
                &mut output,
                &aggregate::summarize_ongoing_distribution(&ongoing.records),
            );
            report::render_stage_progression(
                &mut output,
                &aggregate::stage_progression(&ongoing.records),
            );
        }
    }
    print!("{output}");
}
