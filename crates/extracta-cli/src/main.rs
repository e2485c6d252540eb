use std::path::PathBuf;

use clap::Parser;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use extracta_core::api::ExtractionApi;
use extracta_core::{
    BatchCoordinator, Config, CoordinatorEvent, DocumentStatus, RunPhase,
};
use extracta_dataset::{Dataset, matcher, template_by_label};

mod util;

use util::{format_bytes, format_duration};

/// Extracta: batch structured-data extraction from PDFs via an AI extraction
/// service.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// PDF files to extract
    pdf_paths: Vec<PathBuf>,

    /// JSON configuration dataset used to auto-configure documents
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Built-in template label applied to documents the dataset did not match
    #[arg(long)]
    template: Option<String>,

    /// Base URL of the extraction service
    #[arg(long)]
    endpoint: Option<String>,

    /// Batch run deadline in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Probe the service's health endpoint and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let args = Args::parse();

    // Resolve config from CLI flags > env vars > defaults
    let base_url = args
        .endpoint
        .or_else(|| std::env::var("EXTRACTA_API_URL").ok())
        .unwrap_or_else(|| Config::default().base_url);
    let batch_timeout_secs = args
        .timeout_secs
        .or_else(|| {
            std::env::var("EXTRACTA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or_else(|| Config::default().batch_timeout_secs);
    let config = Config {
        base_url,
        batch_timeout_secs,
    };

    if args.health {
        return check_health(&config).await;
    }

    if args.pdf_paths.is_empty() {
        anyhow::bail!("no PDF files given; see --help");
    }
    for path in &args.pdf_paths {
        if !path.exists() {
            anyhow::bail!("PDF file not found: {}", path.display());
        }
    }

    let dataset = match &args.dataset {
        Some(path) => Some(Dataset::load(path).map_err(|err| {
            anyhow::anyhow!("dataset rejected, nothing was loaded: {err}")
        })?),
        None => None,
    };

    let (mut coordinator, mut events) = BatchCoordinator::new(config);

    for path in &args.pdf_paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let contents = std::fs::read(path)?;
        println!(
            "{} {} ({})",
            "added".dimmed(),
            file_name,
            format_bytes(contents.len() as u64)
        );
        coordinator.add_document(file_name, contents);
    }

    if let Some(dataset) = &dataset {
        let configured = coordinator.auto_configure(dataset);
        let names: Vec<String> = coordinator
            .documents()
            .iter()
            .map(|d| d.file_name.clone())
            .collect();
        let unmatched = matcher::unmatched(dataset, names.iter().map(String::as_str));
        println!(
            "dataset: {} entries, {} auto-configured",
            dataset.len(),
            configured.to_string().green()
        );
        for name in unmatched {
            println!("  {} no dataset entry for {name}", "warn:".yellow());
        }
    }

    if let Some(label) = &args.template {
        let template = template_by_label(label)
            .ok_or_else(|| anyhow::anyhow!("unknown template label: {label}"))?;
        let unconfigured: Vec<_> = coordinator
            .documents()
            .iter()
            .filter(|d| !d.is_configured())
            .map(|d| d.id)
            .collect();
        for id in unconfigured {
            coordinator.configure_document(id, template.label.clone(), template.schema.clone());
        }
    }

    let skipped: Vec<String> = coordinator
        .documents()
        .iter()
        .filter(|d| !d.is_configured())
        .map(|d| d.file_name.clone())
        .collect();
    for name in &skipped {
        println!(
            "  {} {name} has no label/schema and will be skipped",
            "warn:".yellow()
        );
    }

    // Ctrl+C aborts the run; documents still processing are failed cleanly.
    let cancel: CancellationToken = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    // Print per-document transitions as the coordinator republishes them.
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let outcome = coordinator.submit().await;
    let completed = count_status(&coordinator, DocumentStatus::Completed);
    let failed = count_status(&coordinator, DocumentStatus::Error);
    let total = coordinator.documents().len();
    drop(coordinator);
    let _ = printer.await;

    let submit_failed = match outcome {
        Ok(RunPhase::TimedOut) => {
            println!("{}", "run timed out".red());
            false
        }
        Ok(_) => false,
        Err(err) => {
            println!("{} {err}", "submit failed:".red());
            true
        }
    };
    println!(
        "{total} documents: {} completed, {} failed",
        completed.to_string().green(),
        failed.to_string().red()
    );
    std::process::exit(if failed > 0 || submit_failed { 1 } else { 0 });
}

fn count_status(coordinator: &BatchCoordinator, status: DocumentStatus) -> usize {
    coordinator
        .documents()
        .iter()
        .filter(|d| d.status == status)
        .count()
}

fn print_event(event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::DocumentUpdated { document } => match document.status {
            DocumentStatus::Pending => {}
            DocumentStatus::Processing => {
                println!("{} {}", "processing".cyan(), document.file_name);
            }
            DocumentStatus::Completed => {
                let timing = document
                    .result
                    .as_ref()
                    .map(|r| {
                        format!(" [{} in {}]", r.metadata.method, format_duration(r.metadata.time))
                    })
                    .unwrap_or_default();
                println!(
                    "{} {}{}",
                    "completed".green(),
                    document.file_name,
                    timing.dimmed()
                );
                if let Some(result) = &document.result {
                    for (field, value) in &result.data {
                        println!("    {field}: {value}");
                    }
                }
            }
            DocumentStatus::Error => {
                println!(
                    "{} {}: {}",
                    "error".red(),
                    document.file_name,
                    document.error.as_deref().unwrap_or("unknown error")
                );
            }
        },
        CoordinatorEvent::PhaseChanged { phase } => {
            log::info!("run phase: {phase:?}");
        }
        CoordinatorEvent::RunComplete { summary } => {
            println!("{} {summary}", "complete".green().bold());
        }
    }
}

async fn check_health(config: &Config) -> anyhow::Result<()> {
    let api = ExtractionApi::new(config);
    let health = api.health().await?;
    println!(
        "{} {} v{} (up {})",
        "ok".green(),
        health.status,
        health.version,
        format_duration(health.uptime_seconds)
    );
    for (component, state) in &health.components {
        println!("  {component}: {state}");
    }
    Ok(())
}
