use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codeatlas::config::ConfigLoader;
use codeatlas::llm::LlmCache;
use codeatlas::{Config, LlmClient, Pipeline, RunOptions};

#[derive(Parser)]
#[command(name = "codeatlas")]
#[command(
    version,
    about = "AI-driven knowledge document generator for Git repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Configuration file (defaults to the layered chain)")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and generate its knowledge documents
    Generate {
        #[arg(help = "Repository URL or local path")]
        repo: String,
        #[arg(long, short, help = "Output directory for the documentation tree")]
        output: Option<PathBuf>,
        #[arg(long, short, help = "Language for generated prose (ISO short code)")]
        language: Option<String>,
        #[arg(long, help = "Run every stage on the sequential scheduler")]
        sequential: bool,
        #[arg(long, help = "Bypass the repository clone cache")]
        force_clone: bool,
        #[arg(long, help = "Model override (provider/model)")]
        model: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Clean up cached data
    Clean {
        #[arg(long, help = "Clear the LLM response cache")]
        cache: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration (merged from all sources)
    Show {
        #[arg(long, help = "Print as JSON instead of TOML")]
        json: bool,
    },
    /// Show configuration file paths
    Path,
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mCodeAtlas encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Commands::Generate {
            repo,
            output,
            language,
            sequential,
            force_clone,
            model,
        } => {
            if let Some(output) = output {
                config.general.output_dir = output;
            }
            if let Some(language) = language {
                config.general.target_language = language;
            }
            if let Some(model) = model {
                config.llm.model = model;
            }
            if sequential {
                config.general.parallel_enabled = false;
            }
            if force_clone {
                config.repo.force_clone = true;
            }

            run_generate(config, repo)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { json } => ConfigLoader::show_config(json)?,
            ConfigAction::Path => ConfigLoader::show_paths(),
        },
        Commands::Clean { cache } => {
            if cache {
                let rt = Runtime::new()?;
                let store = LlmCache::new(
                    &config.llm.cache_dir,
                    config.llm.cache_ttl_secs,
                    true,
                );
                let removed = rt.block_on(store.clear())?;
                println!("Removed {} cached LLM responses", removed);
            } else {
                println!("Nothing selected; pass --cache to clear the LLM cache");
            }
        }
    }

    Ok(())
}

fn run_generate(config: Config, repo: String) -> anyhow::Result<()> {
    let options = RunOptions {
        repo_source: repo,
        target_language: config.general.target_language.clone(),
        output_dir: config.general.output_dir.clone(),
    };

    let config = Arc::new(config);
    let client = Arc::new(LlmClient::new(Arc::clone(&config)));
    let pipeline = Pipeline::new(Arc::clone(&config), client);

    let rt = Runtime::new()?;
    let outcome = rt.block_on(pipeline.run(options))?;

    println!(
        "Generated {} files under {}",
        outcome.files_written,
        config.general.output_dir.display()
    );
    if !outcome.report.errors.is_empty() {
        println!(
            "{} issues recorded; see report.json for details",
            outcome.report.errors.len()
        );
    }
    println!(
        "Token usage: {} in / {} out (~${:.4})",
        outcome.report.token_usage.input_tokens,
        outcome.report.token_usage.output_tokens,
        outcome.report.estimated_cost_usd
    );

    Ok(())
}
