use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use homefix::analysis::{create_fallback_response, parse_model_response};
use homefix::config::{AppConfig, ConfigOverrides};
use homefix::core::{AnalyzeRequest, ImageUpload};
use homefix::llm::mime_type_for_path;
use homefix::HomeFixService;

#[derive(Parser)]
#[command(name = "homefix-cli")]
#[command(about = "HomeFix Assist Command Line Interface")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repair problem and print the plan as JSON
    Analyze {
        #[arg(help = "Description of the problem")]
        description: String,

        #[arg(short, long, help = "Photo of the problem")]
        image: Option<PathBuf>,

        #[arg(long, help = "Skip store and video lookups")]
        no_enrich: bool,
    },

    /// Parse and validate a saved model response
    Parse {
        #[arg(help = "File containing the raw model reply")]
        file: PathBuf,
    },

    /// List recent tickets
    Tickets {
        #[arg(short, long, help = "Number of tickets to show")]
        limit: Option<i64>,
    },

    /// Generate follow-up questions for a description
    Questions {
        #[arg(help = "Description of the problem")]
        description: String,
    },

    /// Print the fallback repair plan
    Fallback,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("homefix={}", log_level))),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("HomeFix CLI v{}", env!("CARGO_PKG_VERSION"));

    // Commands that need neither config nor network
    match &cli.command {
        Commands::Parse { file } => return parse_file(file).await,
        Commands::Fallback => {
            println!("{}", serde_json::to_string_pretty(&create_fallback_response())?);
            return Ok(());
        }
        _ => {}
    }

    let mut config = if let Some(config_path) = cli.config {
        AppConfig::load_from_file(&config_path).await?
    } else {
        AppConfig::load().await?
    };
    ConfigOverrides::apply(&mut config);
    config.validate()?;
    config.ensure_directories().await?;

    let app = HomeFixService::new(config).await?;

    match cli.command {
        Commands::Analyze { description, image, no_enrich } => {
            analyze(&app, description, image, no_enrich).await?;
        }
        Commands::Tickets { limit } => {
            list_tickets(&app, limit).await?;
        }
        Commands::Questions { description } => {
            let questions = app.generate_questions(&description).await?;
            println!("{}", serde_json::to_string_pretty(&questions)?);
        }
        Commands::Parse { .. } | Commands::Fallback => {}
    }

    Ok(())
}

async fn analyze(app: &HomeFixService, description: String, image: Option<PathBuf>, no_enrich: bool) -> Result<()> {
    info!("Analyzing: {}", description);

    let image = match image {
        Some(path) => {
            let metadata = tokio::fs::metadata(&path).await?;
            Some(ImageUpload {
                original_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string()),
                mime: mime_type_for_path(&path).to_string(),
                size_bytes: metadata.len(),
                path,
            })
        }
        None => None,
    };

    let outcome = app
        .analyze(AnalyzeRequest {
            description: Some(description),
            email: None,
            image,
            skip_lookups: no_enrich,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome.response)?);

    // Let the background write finish before the runtime shuts down
    if let Err(e) = outcome.persistence.await {
        error!("Failed to persist analysis: {}", e);
    }
    Ok(())
}

async fn parse_file(file: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(file).await?;

    match parse_model_response(&text) {
        Ok(analysis) => {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        Err(e) => {
            error!("Model response rejected ({}): {}", e.kind(), e);
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn list_tickets(app: &HomeFixService, limit: Option<i64>) -> Result<()> {
    let tickets = app.list_tickets(limit.or(Some(20))).await?;

    println!("{:<8} {:<10} {:<20} {:<8} {}", "ID", "Status", "Created", "Steps", "Description");
    println!("{}", "-".repeat(90));

    for entry in tickets {
        let steps = entry.latest_analysis.as_ref().map_or(0, |a| a.steps.len());
        println!(
            "{:<8} {:<10} {:<20} {:<8} {}",
            entry.ticket.id,
            entry.ticket.status.to_string(),
            entry.ticket.created_at.format("%Y-%m-%d %H:%M:%S"),
            steps,
            entry.ticket.description.chars().take(40).collect::<String>()
        );
    }

    Ok(())
}
