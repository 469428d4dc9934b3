use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bullbear::tools::StaticMarketData;
use bullbear::Engine;
use bullbear_models::{DebateRequest, EngineConfig, TradingConfig};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bullbear", about = "Multi-agent bull/bear trading debate engine")]
struct Cli {
    /// Path to engine configuration file (optional)
    #[arg(short, long, global = true, default_value = "config/bullbear.toml")]
    config: String,

    /// Model provider: openai, groq, openrouter, ollama, anthropic, google
    #[arg(long, global = true, default_value = "groq")]
    provider: String,

    /// Model for risk assessment and the final decision
    #[arg(long, global = true)]
    deep_model: Option<String>,

    /// Model for researchers and agent runs
    #[arg(long, global = true)]
    quick_model: Option<String>,

    /// Sampling temperature, 0.0 to 1.0
    #[arg(long, global = true)]
    temperature: Option<f64>,

    /// Override the provider endpoint
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// JSON market data fixture backing the market tools
    #[arg(long, global = true)]
    market_data: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tool-calling agent on a prompt and print its answer
    Agent {
        /// Prompt text; read from stdin when omitted
        #[arg(short, long)]
        prompt: Option<String>,
    },
    /// Run a bull/bear debate and print the decision record as JSON
    Debate {
        /// Ticker symbol, e.g. TSLA
        #[arg(short, long)]
        symbol: String,

        /// Analysis date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Number of bull/bear rounds
        #[arg(short, long)]
        rounds: Option<u32>,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
}

impl Cli {
    /// Per-run model settings. Keys come from `<PROVIDER>_API_KEY`.
    fn trading_config(&self) -> TradingConfig {
        let mut config = TradingConfig::for_provider(&self.provider);
        if let Some(model) = &self.deep_model {
            config.deep_think_model = model.clone();
        }
        if let Some(model) = &self.quick_model {
            config.quick_think_model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        config.base_url_override = self.base_url.clone();
        config
    }

    fn engine(&self, config: EngineConfig) -> Result<Engine> {
        match &self.market_data {
            Some(path) => {
                let data = StaticMarketData::load(Path::new(path))
                    .with_context(|| format!("Failed to load market data: {path}"))?;
                Engine::with_market_data(config, Arc::new(data))
                    .context("Failed to register market tools")
            }
            None => Ok(Engine::new(config)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = bullbear::load_config(Path::new(&cli.config))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
    }

    let engine = cli.engine(config)?.with_cancellation(cancel);
    let trading = cli.trading_config();

    match &cli.command {
        Command::Agent { prompt } => {
            let prompt = match prompt {
                Some(prompt) => prompt.clone(),
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read from stdin")?;
                    buf
                }
            };

            let outcome = engine
                .run_agent(trading, prompt.trim())
                .await
                .map_err(|e| anyhow::anyhow!("Agent run failed: {e}"))?;

            if !outcome.is_done() && !outcome.best_effort().is_empty() {
                warn!(partial = %outcome.best_effort(), "Agent stopped before a final answer");
            }
            println!("{}", outcome.text());
            Ok(if outcome.is_done() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Debate {
            symbol,
            date,
            rounds,
            pretty,
        } => {
            let mut request = DebateRequest::new(symbol.clone());
            request.date = date.clone();
            request.max_debate_rounds = *rounds;

            let record = engine.run_debate(trading, request).await;

            // Output record as JSON to stdout
            let output = if *pretty {
                serde_json::to_string_pretty(&record)?
            } else {
                serde_json::to_string(&record)?
            };
            println!("{output}");

            Ok(if record.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
