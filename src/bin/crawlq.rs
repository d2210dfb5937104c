//! crawlq CLI: run a seeded crawl until it goes quiet.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use crawlq::config::{Config, RunConfig, parse_duration, secrets};
use crawlq::engine::HookExecutor;
use crawlq::ledger::Ledger;
use crawlq::model::ExitReason;
use crawlq::runner::{RunSettings, Runner};
use crawlq::seed::{SeedGenerator, open_input};
use crawlq::telemetry::{TelemetryConfig, init_telemetry};
use crawlq::writer::JsonLinesWriter;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Exit status for a run that ended on the inactivity timeout.
const EXIT_STALLED: u8 = 2;
/// Exit status for a run cut short by a signal.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "crawlq", about = "Seeded crawl runner with quiescence-based termination")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a crawl until every derived work item has finished
    Run(RunArgs),
    /// Print the seed items the input would produce, without running
    Seeds(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML file with run parameters; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seed queries, one per line ("stdin" reads standard input)
    #[arg(long)]
    input: Option<String>,
    /// Result destination ("stdout" writes standard output)
    #[arg(long)]
    results: Option<String>,
    /// Language code
    #[arg(long)]
    lang: Option<String>,
    /// Maximum spawn depth below the seeds
    #[arg(long)]
    depth: Option<u32>,
    /// Geo coordinates as "lat,lon"
    #[arg(long)]
    geo: Option<String>,
    /// Zoom level (1-21)
    #[arg(long)]
    zoom: Option<u8>,
    /// Search radius in meters
    #[arg(long)]
    radius: Option<f64>,
    /// Extract emails
    #[arg(long)]
    email: bool,
    /// Collect extra reviews
    #[arg(long)]
    extra_reviews: bool,
    /// Fast mode (requires --geo)
    #[arg(long)]
    fast_mode: bool,
    /// Maximum concurrently executing work items
    #[arg(long, short = 'c')]
    concurrency: Option<usize>,
    /// Stop when no work item reports for this long (e.g. 90s, 3m)
    #[arg(long, value_parser = parse_inactivity)]
    exit_on_inactivity: Option<Duration>,
    /// Collapse repeated seed queries into one seed, ignoring case and repeated whitespace
    #[arg(long)]
    dedup_queries: bool,
    /// Executable run once per work item
    #[arg(long)]
    hook: Option<PathBuf>,
    /// Comma-separated proxy list (overrides CRAWLQ_PROXIES)
    #[arg(long)]
    proxies: Option<String>,
}

impl RunArgs {
    fn into_run_config(self, env: Config) -> anyhow::Result<RunConfig> {
        let mut config = match self.config {
            Some(ref path) => RunConfig::from_toml_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(results) = self.results {
            config.results = results;
        }
        if let Some(lang) = self.lang {
            config.lang = lang;
        }
        if let Some(depth) = self.depth {
            config.max_depth = depth;
        }
        if let Some(geo) = self.geo {
            config.geo = Some(geo);
        }
        if let Some(zoom) = self.zoom {
            config.zoom = zoom;
        }
        if let Some(radius) = self.radius {
            config.radius = radius;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(inactivity) = self.exit_on_inactivity {
            config.exit_on_inactivity = inactivity;
        }
        if let Some(hook) = self.hook {
            config.hook = Some(hook);
        }
        config.email |= self.email;
        config.extra_reviews |= self.extra_reviews;
        config.fast_mode |= self.fast_mode;
        config.dedup_queries |= self.dedup_queries;

        config.proxies = match self.proxies {
            Some(raw) => secrets::parse_proxy_list(&raw),
            None => env.proxies,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_inactivity(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Seeds(args) => cmd_seeds(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let env = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: env.otel_endpoint.clone(),
        service_name: "crawlq".to_string(),
        default_filter: env.log_level.clone(),
    })?;

    let mut config = args.into_run_config(env)?;
    let Some(hook) = config.hook.clone() else {
        anyhow::bail!("no executor configured: pass --hook or set `hook` in the run config");
    };
    let executor = HookExecutor::new(&hook, std::mem::take(&mut config.proxies))?;
    let settings = RunSettings::from_config(&config)?;

    let input = open_input(&config.input).await?;
    let writer = JsonLinesWriter::open(&config.results).await?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let runner = Runner::new(settings, Arc::new(executor), Arc::new(writer));
    let report = runner.run(input, shutdown).await?;

    let code = match report.exit {
        ExitReason::Quiescent => ExitCode::SUCCESS,
        ExitReason::Stalled => ExitCode::from(EXIT_STALLED),
        ExitReason::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
    };
    Ok(code)
}

async fn cmd_seeds(args: RunArgs) -> anyhow::Result<ExitCode> {
    let env = Config::from_env()?;
    let config = args.into_run_config(env)?;

    let input = open_input(&config.input).await?;
    let mut generator = SeedGenerator::new(config.params()?);
    if config.dedup_queries {
        generator = generator.with_query_dedup(Arc::new(Ledger::new()));
    }
    let seeds = generator.read_seeds(input, &CancellationToken::new()).await?;

    if seeds.is_empty() {
        println!("No seeds found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<8}  {:<12}  QUERY", "ID", "INPUT_ID");
    println!("{}", "-".repeat(60));
    for seed in &seeds {
        println!(
            "{:<8}  {:<12}  {}",
            seed.id.to_string(),
            seed.input_id.as_deref().unwrap_or("-"),
            seed.target
        );
    }
    println!("\n{} seed(s)", seeds.len());

    Ok(ExitCode::SUCCESS)
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();

        info!("received signal, shutting down");
        shutdown.cancel();
    });
}
