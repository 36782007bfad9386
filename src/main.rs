use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parakeet")]
#[command(about = "Discord bot relaying messages to an LLM chat API", long_about = None)]
#[command(version)]
struct Args {
    /// Verbose output (-v warn, -vv info, -vvv debug, -vvvv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (default: ~/.parakeet/config.toml)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Print the effective settings (secrets masked) and exit
    #[arg(long = "print-config")]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set verbosity level (0-4)
    let verbosity = args.verbose.min(4);

    // Initialize tracing (structured logging) using config module
    use parakeet::config::{BotConfig, Config};
    Config::ensure_log_directory().ok(); // Create log directory if needed
    parakeet::init_tracing(verbosity, Some(Config::log_file_path()));
    tracing::info!(
        "parakeet {} by {} (built {})",
        Config::version(),
        Config::authors(),
        Config::build_date()
    );

    if args.print_config {
        let config =
            BotConfig::load_unvalidated(args.config.as_deref()).context("Failed to load configuration")?;
        let text = toml::to_string_pretty(&config.redacted()).context("Failed to render configuration")?;
        println!("{}", text);
        return Ok(());
    }

    let config = BotConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    ctrlc::set_handler(|| {
        tracing::info!("parakeet: interrupt received, shutting down");
        if !parakeet::discord::disconnect_discord() {
            std::process::exit(130);
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(parakeet::run(config))
}
