//! castscope - Casting Defect Inspection
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP API
//! castscope serve --addr 0.0.0.0:8080
//!
//! # Inspect one image, write the overlay and an HTML report
//! castscope inspect part.jpg --overlay part_cam.png --analyze --report part.html
//!
//! # Statistics and history over the last 7 days
//! castscope stats --days 7
//! castscope history --days 7 --csv history.csv
//!
//! # Write an untrained, seeded checkpoint (tooling and smoke tests)
//! castscope init-model --output models/casting_classifier.json
//! ```
//!
//! # Environment Variables
//!
//! - `CASTSCOPE_CONFIG`: Path to the TOML config (default: ./castscope.toml)
//! - `ANTHROPIC_API_KEY`: API key for the Claude analyst
//! - `CASTSCOPE_CORS_ORIGINS`: Comma-separated allowed CORS origins
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use castscope::analysis::simple_recommendation;
use castscope::api::{create_app, ApiState};
use castscope::config::{InspectionConfig, LlmProvider};
use castscope::imaging::decode_rgb;
use castscope::model::{ModelArchitecture, ModelCheckpoint};
use castscope::{HistoryStore, InspectionOrchestrator};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "castscope")]
#[command(about = "Casting defect inspection with visual explanations")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides $CASTSCOPE_CONFIG and ./castscope.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Serve the HTTP API
    Serve {
        /// Override the server address (default from config: "0.0.0.0:8080")
        #[arg(short, long, value_name = "HOST:PORT")]
        addr: Option<String>,
    },

    /// Inspect a single image
    Inspect {
        /// Image file (PNG, JPEG, BMP)
        image: PathBuf,
        /// Write the Grad-CAM overlay to this PNG file
        #[arg(long, value_name = "PNG")]
        overlay: Option<PathBuf>,
        /// Request a narrative analysis
        #[arg(long)]
        analyze: bool,
        /// Write an HTML report (implies --analyze)
        #[arg(long, value_name = "HTML")]
        report: Option<PathBuf>,
    },

    /// Print inspection statistics
    Stats {
        #[arg(long)]
        days: Option<i64>,
    },

    /// Print or export inspection history
    History {
        #[arg(long)]
        days: Option<i64>,
        /// Export as CSV instead of printing
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
    },

    /// Write a seeded, untrained checkpoint
    InitModel {
        /// Output path (default from config)
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<InspectionConfig> {
    match path {
        Some(p) => InspectionConfig::load_from_file(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(InspectionConfig::load()),
    }
}

/// History only; needs neither model weights nor an analyst.
fn open_history(config: &InspectionConfig) -> Result<HistoryStore> {
    HistoryStore::open(&config.history.db_path, config.history.flush_on_append)
        .with_context(|| format!("opening history {}", config.history.db_path.display()))
}

fn window(config: &InspectionConfig, days: Option<i64>) -> Result<Duration> {
    let days = days.unwrap_or(config.history.default_window_days);
    if days <= 0 {
        anyhow::bail!("--days must be positive (got {})", days);
    }
    Duration::try_days(days).with_context(|| format!("--days {} is out of range", days))
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_server(config: InspectionConfig, addr: Option<String>) -> Result<()> {
    let server_addr = addr.unwrap_or_else(|| config.server.addr.clone());
    let orchestrator = Arc::new(InspectionOrchestrator::open(&config)?);

    let state = ApiState::new(
        Arc::clone(&orchestrator),
        config.server.session_capacity,
        config.server.max_upload_bytes,
    );
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("binding {}", server_addr))?;
    info!("🌐 API listening on http://{}/api/v1", server_addr);

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("[HttpServer] Received shutdown signal");
        })
        .await;

    if let Err(e) = result {
        error!("[HttpServer] Server error: {}", e);
    }

    match Arc::try_unwrap(orchestrator) {
        Ok(orchestrator) => orchestrator.shutdown()?,
        Err(_) => warn!("Orchestrator still referenced at shutdown, skipping explicit flush"),
    }
    info!("Shutdown complete");
    Ok(())
}

async fn run_inspect(
    config: InspectionConfig,
    image: PathBuf,
    overlay: Option<PathBuf>,
    analyze: bool,
    report: Option<PathBuf>,
) -> Result<()> {
    let mut config = config;
    let analyze = analyze || report.is_some();
    if !analyze {
        // The analyst is never called, so do not require its credentials
        config.llm.provider = LlmProvider::Rules;
    }
    let orchestrator = InspectionOrchestrator::open(&config)?;

    let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
    let original = decode_rgb(&bytes).with_context(|| format!("decoding {}", image.display()))?;
    let result = orchestrator.inspect_rgb(&original)?;

    println!("Inspection:  {}", result.id);
    println!("Verdict:     {}", orchestrator.labels().label(result.predicted_class));
    println!("Confidence:  {:.2}%", result.confidence * 100.0);
    for (class, p) in result.class_probabilities.iter() {
        println!("  {:<14} {:.2}%", orchestrator.labels().label(class), p * 100.0);
    }
    println!("Advice:      {}", simple_recommendation(result.predicted_class, result.confidence));
    if !result.history_persisted {
        println!("Warning:     inspection was not recorded in history");
    }

    if let Some(path) = overlay {
        result
            .overlay
            .save(&path)
            .with_context(|| format!("writing overlay {}", path.display()))?;
        println!("Overlay:     {}", path.display());
    }

    if analyze {
        let narrative = orchestrator.analyze(&result).await?;
        println!();
        println!("{}", narrative.to_markdown());

        if let Some(path) = report {
            let doc = orchestrator.render_report(&result, &narrative, &original)?;
            std::fs::write(&path, doc).with_context(|| format!("writing report {}", path.display()))?;
            println!("Report:      {}", path.display());
        }
    }

    orchestrator.shutdown()?;
    Ok(())
}

fn run_stats(config: InspectionConfig, days: Option<i64>) -> Result<()> {
    let window = window(&config, days)?;
    let history = open_history(&config)?;
    let stats = history.statistics(window)?;

    println!("Window:          last {} day(s)", window.num_days());
    println!("Total:           {}", stats.total);
    println!("{:<16} {} ({:.1}%)", format!("{}:", config.classes.normal), stats.normal, stats.normal_rate);
    println!("{:<16} {} ({:.1}%)", format!("{}:", config.classes.defective), stats.defect, stats.defect_rate);
    println!("Avg confidence:  {:.1}%", stats.avg_confidence);

    let hourly = history.hourly_breakdown(window)?;
    if !hourly.is_empty() {
        println!();
        println!("Hour  Normal  Defect");
        for bucket in hourly {
            println!("{:02}:00 {:>6}  {:>6}", bucket.hour, bucket.normal, bucket.defect);
        }
    }
    Ok(())
}

fn run_history(config: InspectionConfig, days: Option<i64>, csv: Option<PathBuf>) -> Result<()> {
    let window = window(&config, days)?;
    let history = open_history(&config)?;

    match csv {
        Some(path) => {
            let file = std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            let mut out = std::io::BufWriter::new(file);
            let n = history.export_csv(window, &config.classes, &mut out)?;
            out.flush()?;
            println!("Exported {} record(s) to {}", n, path.display());
        }
        None => {
            for r in history.query(window)? {
                println!(
                    "{}  {:<16} {:>6.2}%  {}",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    config.classes.label(r.predicted_class),
                    r.confidence * 100.0,
                    r.id
                );
            }
        }
    }
    Ok(())
}

fn run_init_model(config: &InspectionConfig, output: Option<PathBuf>, seed: u64, force: bool) -> Result<()> {
    let path = output.unwrap_or_else(|| config.model.checkpoint_path.clone());
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let checkpoint = ModelCheckpoint::seeded(&ModelArchitecture::default(), seed);
    checkpoint
        .save(&path)
        .with_context(|| format!("writing checkpoint {}", path.display()))?;
    warn!("Checkpoint is untrained; verdicts are not meaningful until real weights are installed");
    println!("Wrote seeded checkpoint to {}", path.display());
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        SubCommand::Serve { addr } => run_server(config, addr).await,
        SubCommand::Inspect {
            image,
            overlay,
            analyze,
            report,
        } => run_inspect(config, image, overlay, analyze, report).await,
        SubCommand::Stats { days } => run_stats(config, days),
        SubCommand::History { days, csv } => run_history(config, days, csv),
        SubCommand::InitModel { output, seed, force } => run_init_model(&config, output, seed, force),
    }
}
