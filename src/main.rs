use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use stackrs::config::Settings;
use stackrs::core::asset::LocalAsset;
use stackrs::core::date_range::DateRange;
use stackrs::core::index::AssetIndex;
use stackrs::core::pipeline::GroupPipeline;
use stackrs::services::catalog::{CatalogClient, MemoryCatalog};
use stackrs::services::confirm::{AssumeYes, Confirm, TerminalConfirm};
use stackrs::services::journal::{EventJournal, FileEvent, Journal};
use stackrs::services::scanner::{ScanOptions, ScannerService};
use stackrs::services::stacking::StackWorkflow;
use stackrs::services::upload::UploadRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "stackrs", version, about = "Group, upload and stack photos")]
struct Cli {
    /// Settings file (default: `<config dir>/stackrs/config.toml`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Append every file event to this JSON-lines file
    #[arg(long, global = true, value_name = "FILE")]
    journal: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the bursts and pairs found in a directory
    Groups {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Tell what an upload would do with each file
    Advise {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Catalog document
        #[arg(short, long, value_name = "FILE")]
        catalog: PathBuf,
    },

    /// Upload a directory into the catalog
    Upload {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Catalog document
        #[arg(short, long, value_name = "FILE")]
        catalog: PathBuf,
        /// Run against the catalog without writing it back
        #[arg(long)]
        dry_run: bool,
    },

    /// Stack bursts and pairs already in the catalog
    Stack {
        /// Catalog document
        #[arg(short, long, value_name = "FILE")]
        catalog: PathBuf,
        /// YYYY, YYYY-MM, YYYY-MM-DD or FROM,TO
        #[arg(long, value_name = "RANGE")]
        date_range: Option<DateRange>,
        /// Stack without asking
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings =
        Settings::load_or_default(cli.config.as_deref()).context("Failed to load settings")?;
    let journal = Arc::new(match &cli.journal {
        Some(path) => EventJournal::with_file(path)
            .with_context(|| format!("Failed to open journal {:?}", path))?,
        None => EventJournal::new(),
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Interrupted, stopping…");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Groups { path } => {
            println!("▶ Grouping photos in: {}", path.display());
            let assets = scan_all(&settings, &path, journal.as_ref(), cancel.clone()).await?;
            let pipeline = GroupPipeline::standard(&settings.grouping);
            let (ungrouped, groups) = benchmark("grouping", pipeline.group_all(cancel, assets))
                .await
                .context("Grouping failed")?;

            if groups.is_empty() {
                println!("No groups found.");
            } else {
                println!("Found {} group(s):", groups.len());
                for (i, group) in groups.iter().enumerate() {
                    println!("\n✨ Group {} ({}):", i + 1, group.kind());
                    for (j, asset) in group.assets().iter().enumerate() {
                        let marker = if j == group.cover_index() { "🏆" } else { "▶" };
                        println!("   {} {}", marker, asset.path.display());
                    }
                }
            }
            println!("\n{} file(s) left ungrouped.", ungrouped.len());
        }

        Commands::Advise { path, catalog } => {
            let catalog = load_catalog(&catalog)?;
            let recognizer = settings.recognizer()?;
            let remote = catalog
                .all_assets()
                .await?
                .into_iter()
                .map(|a| a.recognized(&recognizer))
                .collect();
            let index = AssetIndex::new(remote, settings.upload.capture_tolerance());

            println!("▶ Comparing {} with {} catalog assets", path.display(), index.len());
            let assets = scan_all(&settings, &path, journal.as_ref(), cancel).await?;
            for asset in &assets {
                match index.should_upload(asset) {
                    Ok(advice) => println!(
                        "   ▶ {}: {} ({})",
                        asset.file_name, advice.advice, advice.message
                    ),
                    Err(e) => eprintln!("⚠️  {}: {}", asset.file_name, e),
                }
            }
        }

        Commands::Upload {
            path,
            catalog: catalog_path,
            dry_run,
        } => {
            let catalog = Arc::new(load_catalog(&catalog_path)?);
            let runner = UploadRunner::connect(catalog.clone(), &settings, journal.clone())
                .await
                .context("Failed to read the catalog")?;

            println!("▶ Uploading {} into {}", path.display(), catalog_path.display());
            let rx = scan(&settings, &path, journal.clone(), cancel.clone())?;
            let report = benchmark("upload", runner.run(cancel, rx)).await;

            // Whatever was uploaded before a failure is kept.
            if dry_run {
                println!("\n⚠️  Dry-run only; the catalog was not changed.");
            } else {
                catalog
                    .save_json(&catalog_path)
                    .with_context(|| format!("Failed to write catalog {:?}", catalog_path))?;
                println!("\n✅ Catalog written to {}", catalog_path.display());
            }

            let report = report.context("Upload failed")?;
            println!(
                "▶ {} file(s): {} group(s), {} single(s)",
                report.assets, report.groups, report.singles
            );
            for error in &report.errors {
                eprintln!("⚠️  {}", error);
            }
        }

        Commands::Stack {
            catalog: catalog_path,
            date_range,
            yes,
        } => {
            let catalog = Arc::new(load_catalog(&catalog_path)?);
            let confirm: Box<dyn Confirm> = if yes {
                Box::new(AssumeYes)
            } else {
                Box::new(TerminalConfirm)
            };
            let workflow = StackWorkflow::new(
                catalog.clone(),
                settings.recognizer()?,
                confirm,
                journal.clone(),
            )
            .with_range(date_range.unwrap_or_default());

            let report = workflow.run(&cancel).await;
            catalog
                .save_json(&catalog_path)
                .with_context(|| format!("Failed to write catalog {:?}", catalog_path))?;

            let report = report.context("Stacking failed")?;
            println!(
                "\n✅ {} of {} stack(s) created ({} declined, {} failed) from {} assets",
                report.stacked, report.proposed, report.declined, report.failed, report.received
            );
        }
    }

    let summary = journal.summary();
    if !summary.is_empty() {
        println!("\n🗂️  Summary:\n{}", summary);
    }
    Ok(())
}

fn load_catalog(path: &Path) -> Result<MemoryCatalog> {
    MemoryCatalog::from_json(path).with_context(|| format!("Failed to read catalog {:?}", path))
}

/// Stream the files under `path`. Unreadable entries are journaled and
/// skipped.
fn scan(
    settings: &Settings,
    path: &Path,
    journal: Arc<EventJournal>,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<LocalAsset>> {
    let scanner = ScannerService::new(settings.recognizer()?)
        .with_capacity(settings.grouping.channel_capacity);
    let mut found = scanner
        .scan(path, &ScanOptions::from(&settings.scan), cancel)
        .with_context(|| format!("Failed to scan {:?}", path))?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for photos…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let (tx, rx) = mpsc::channel(settings.grouping.channel_capacity.max(1));
    tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(item) = found.recv().await {
            match item {
                Ok(asset) => {
                    count += 1;
                    spinner.set_message(format!("{} files found", count));
                    journal.record(
                        FileEvent::DiscoveredFile,
                        &asset.path.to_string_lossy(),
                        &[],
                    );
                    if tx.send(asset).await.is_err() {
                        break;
                    }
                }
                Err(e) => journal.record(FileEvent::Error, "scan", &[("error", &e.to_string())]),
            }
        }
        spinner.finish_with_message(format!("Scan complete, {} files", count));
    });
    Ok(rx)
}

async fn scan_all(
    settings: &Settings,
    path: &Path,
    journal: &EventJournal,
    cancel: CancellationToken,
) -> Result<Vec<LocalAsset>> {
    let scanner = ScannerService::new(settings.recognizer()?);
    let mut found = scanner
        .scan(path, &ScanOptions::from(&settings.scan), cancel)
        .with_context(|| format!("Failed to scan {:?}", path))?;

    let mut assets = Vec::new();
    while let Some(item) = found.recv().await {
        match item {
            Ok(asset) => assets.push(asset),
            Err(e) => journal.record(FileEvent::Error, "scan", &[("error", &e.to_string())]),
        }
    }
    println!("▶ {} file(s) found", assets.len());
    Ok(assets)
}

/// Await `f`, print how long it took (with `label`), and return its result.
async fn benchmark<T>(label: &str, f: impl std::future::Future<Output = T>) -> T {
    let start = Instant::now();
    let result = f.await;
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
