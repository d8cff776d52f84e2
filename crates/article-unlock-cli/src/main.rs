//! article-unlock: retrieve articles through a chain of fallback methods.

use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use article_unlock::{AttemptOptions, MethodRegistry, Orchestrator, UnlockError};
use article_unlock_cli::{load_config, register_builtin, HttpFetcher};

#[derive(Parser)]
#[command(
    name = "article-unlock",
    about = "Retrieve articles through health-checked fallback methods",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve one or more URLs.
    Fetch {
        /// URLs to retrieve.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Run the method chain even for domains not known to be paywalled.
        #[arg(long)]
        force: bool,

        /// Print results as JSON instead of raw content.
        #[arg(long)]
        json: bool,

        /// Per-method timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Check every method and print a health report.
    Health,

    /// List registered methods with their config, health and metrics.
    Methods,

    /// Print the effective configuration as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   article-unlock completions bash > ~/.local/share/bash-completion/completions/article-unlock
    ///   article-unlock completions zsh > ~/.zfunc/_article-unlock
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "article-unlock", &mut std::io::stdout());
        }

        Commands::Config => {
            let (path, config) = load_config(cli.config.as_deref())?;
            tracing::info!("config: {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Fetch {
            urls,
            force,
            json,
            timeout,
        } => {
            let orchestrator = build_orchestrator(cli.config.as_deref())?;
            let options = AttemptOptions {
                force,
                timeout: timeout.map(Duration::from_secs),
                ..AttemptOptions::default()
            };

            let mut failures = 0usize;
            for url in &urls {
                match orchestrator.bypass(url, &options).await {
                    Ok(result) => {
                        if json {
                            println!("{}", serde_json::to_string(&result)?);
                        } else {
                            eprintln!(
                                "{} via {} in {}ms",
                                result.url, result.method, result.response_time_ms
                            );
                            println!("{}", result.content.unwrap_or_default());
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        if json {
                            let err = serde_json::json!({ "url": url, "error": e.to_string() });
                            println!("{err}");
                        } else {
                            eprintln!("{url}: {e}{}", hint(&e));
                        }
                    }
                }
            }

            orchestrator.cleanup().await;
            if failures > 0 {
                std::process::exit(1);
            }
        }

        Commands::Health => {
            let orchestrator = build_orchestrator(cli.config.as_deref())?;
            let report = orchestrator.check_health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            orchestrator.cleanup().await;
        }

        Commands::Methods => {
            let orchestrator = build_orchestrator(cli.config.as_deref())?;
            let methods: Vec<_> = orchestrator
                .registry()
                .get_methods_by_priority(false)
                .iter()
                .map(|m| m.get_metrics())
                .collect();
            println!("{}", serde_json::to_string_pretty(&methods)?);
            orchestrator.cleanup().await;
        }
    }

    Ok(())
}

fn build_orchestrator(config: Option<&str>) -> anyhow::Result<Orchestrator> {
    let (path, config) = load_config(config)?;
    tracing::debug!("config: {}", path.display());

    let registry = Arc::new(MethodRegistry::new());
    register_builtin(&registry, &HttpFetcher::new())?;

    let orchestrator = Orchestrator::new(registry, config);
    orchestrator.initialize()?;
    Ok(orchestrator)
}

fn hint(err: &UnlockError) -> &'static str {
    match err {
        UnlockError::NotApplicable => " (domain not known to be paywalled; retry with --force)",
        UnlockError::RateLimited => " (try again in a minute)",
        _ => "",
    }
}
