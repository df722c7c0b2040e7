use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use triage_llm::telemetry::init_tracing;
use triage_llm::{Router, RouterConfig};

#[derive(Parser, Debug)]
#[command(name = "triage-llm", about = "Route prompts across local and hosted LLM providers")]
struct Cli {
    /// TOML config file; `TRIAGE_LLM_*` variables still override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt and print the answer.
    Ask {
        /// Prompt text, or `-` to read it from stdin.
        #[arg(default_value = "-")]
        prompt: String,

        /// Per-attempt timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Parse the answer as JSON (one correction round-trip at most).
        #[arg(long)]
        json: bool,

        /// Print provider stats to stderr afterwards.
        #[arg(long)]
        stats: bool,
    },
    /// Show configured providers, availability and breaker state.
    Providers {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RouterConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RouterConfig::from_env().context("reading configuration from environment")?,
    };
    let router = Router::from_config(&config).context("building router")?;

    match cli.command {
        Command::Ask {
            prompt,
            timeout,
            json,
            stats,
        } => {
            let prompt = read_prompt(prompt)?;
            let timeout = timeout.map(Duration::from_secs).unwrap_or(router.options().timeout);

            let answer = router.call_with_timeout(&prompt, timeout).await;
            if stats {
                print_stats(&router)?;
            }
            let answer = answer.context("no provider produced an answer")?;
            info!(provider = ?router.sticky_provider(), "answer received");

            if json {
                let value = router
                    .safe_json_parse(&answer)
                    .await
                    .context("answer was not valid JSON")?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{answer}");
            }
        }
        Command::Providers { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&router.get_provider_stats())?);
            } else {
                println!("{:<12} {:<40} {:<10} {:<10}", "PROVIDER", "MODEL", "AVAILABLE", "CIRCUIT");
                for s in router.get_provider_stats() {
                    println!(
                        "{:<12} {:<40} {:<10} {:<10}",
                        s.name,
                        s.model,
                        if s.available { "yes" } else { "no" },
                        s.circuit_state.to_string()
                    );
                }
                if !router.has_available_provider() {
                    bail!("no provider is available; set an API key or install Ollama");
                }
            }
        }
    }
    Ok(())
}

fn read_prompt(arg: String) -> Result<String> {
    let prompt = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading prompt from stdin")?;
        buf
    } else {
        arg
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }
    Ok(prompt)
}

fn print_stats(router: &Router) -> Result<()> {
    let stats = router.get_provider_stats();
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
