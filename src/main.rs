mod api;
mod cli;
mod core;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "llmwatch",
    about = "Health and quota watchdog for LLM inference providers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output format (text|json)
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and probe providers on an interval (default)
    Serve {
        /// Address to bind, e.g. 127.0.0.1:3457
        #[arg(long)]
        bind: Option<String>,

        /// Seconds between probe batches
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Probe providers once and show status, quota and ranking
    Check {
        /// Probe only this provider
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Probe providers once and print the best pick
    Best,
    /// Show persisted quota counters without probing
    Quota,
    /// Zero all persisted quota counters
    Reset,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate default config file
    Init,
    /// Validate config file
    Check,
    /// Print config and state file locations
    Path,
    /// Enable a provider
    Enable {
        /// Provider ID to enable
        provider: String,
    },
    /// Disable a provider
    Disable {
        /// Provider ID to disable
        provider: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_opts = cli::output::OutputOptions {
        format: cli::output::OutputFormat::from_flags(cli.json, cli.format.as_deref()),
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
    };

    match cli.command {
        None => cli::serve_cmd::run(None, None).await?,
        Some(Commands::Serve { bind, interval }) => cli::serve_cmd::run(bind, interval).await?,
        Some(Commands::Check { provider }) => cli::check_cmd::run(provider, &output_opts).await?,
        Some(Commands::Best) => cli::check_cmd::best(&output_opts).await?,
        Some(Commands::Quota) => cli::quota_cmd::show(&output_opts)?,
        Some(Commands::Reset) => cli::quota_cmd::reset(&output_opts)?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&output_opts)?,
            ConfigAction::Path => cli::config_cmd::path(&output_opts)?,
            ConfigAction::Enable { provider } => cli::config_cmd::set_enabled(&provider, true)?,
            ConfigAction::Disable { provider } => cli::config_cmd::set_enabled(&provider, false)?,
        },
    }

    Ok(())
}
