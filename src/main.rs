mod commands;
mod config;
mod entry;
mod feed;
mod feed_source;
mod filters;
mod html;
mod http;
mod message;
mod webcache;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::Config;
use filters::FilterRegistry;

/// Delivers RSS, Atom and web page updates into maildirs
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Configuration file [default: $FEEDMAIL_CONFIG or <config dir>/feedmail/feedmail.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More output; repeat for debug logs
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Number of feeds fetched at once, overriding `workers`
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Exit with an error if any feed failed
    #[arg(long, global = true)]
    fail_fast: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every feed and deliver new entries (the default)
    Pull,
    /// List configured feeds
    Feeds,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let path = args.config.unwrap_or_else(config::default_config_path);
    let config = Config::load(&path, &FilterRegistry::builtin())?;

    match args.command.unwrap_or(Command::Pull) {
        Command::Feeds => commands::feeds::cmd_feeds(&config),
        Command::Pull => {
            let workers = args.jobs.unwrap_or(config.workers);
            let summary = commands::pull::cmd_pull(&config, workers)?;
            println!("{}", summary);
            if args.fail_fast
                && let Some((name, reason)) = summary.first_failure()
            {
                anyhow::bail!("{}: {}", name, reason);
            }
            Ok(())
        }
    }
}
