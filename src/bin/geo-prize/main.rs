//! Geo Prize CLI
//!
//! Command-line interface for the Geo Prize service.

mod commands;
mod style;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use geo_prize::config::Config;
use geo_prize::server::DISTRIBUTE_ROUTE;
use style::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "geo-prize")]
#[command(version)]
#[command(about = "Geo Prize - admin authorization and prize distribution", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (embedded defaults when missing)
    #[arg(short, long, env = "GEO_PRIZE_CONFIG", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    #[command(visible_alias = "s")]
    Server,

    /// Show the payout table for a ranking and pool
    #[command(visible_alias = "p")]
    Preview {
        /// Prize pool in the smallest currency unit
        #[arg(long)]
        pool: u128,

        /// File with one participant address per line, best first
        #[arg(long, conflicts_with = "participants")]
        ranking: Option<PathBuf>,

        /// JSON file with prize tiers (configured tiers otherwise)
        #[arg(long)]
        tiers: Option<PathBuf>,

        /// Participant addresses, best first
        participants: Vec<String>,
    },

    /// Print the admin message to sign for a distribution
    #[command(visible_alias = "m")]
    Message {
        /// Resource the action applies to, e.g. a competition id
        target: String,

        /// Registry name or registered address of the contract
        #[arg(long)]
        contract: String,

        /// Prize pool the signature authorizes
        #[arg(long)]
        pool: u128,

        /// File with one participant address per line, best first
        #[arg(long, conflicts_with = "participants")]
        ranking: Option<PathBuf>,

        /// JSON file with prize tiers (configured tiers otherwise)
        #[arg(long)]
        tiers: Option<PathBuf>,

        #[arg(long, default_value = DISTRIBUTE_ROUTE)]
        route: String,

        /// Unix timestamp (now when omitted)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Participant addresses, best first
        participants: Vec<String>,
    },

    /// Recover the signer of a message
    #[command(visible_alias = "r")]
    Recover {
        #[arg(long)]
        message: String,

        /// 65-byte hex signature
        #[arg(long)]
        signature: String,

        /// Fail unless the signature belongs to this address
        #[arg(long)]
        signer: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match Config::load_from(&cli.config) {
        Ok(config) => match cli.command {
            Commands::Server => {
                print_banner();
                commands::server::run(&config).await
            }
            Commands::Preview {
                pool,
                ranking,
                tiers,
                participants,
            } => commands::preview::run(
                &config,
                pool,
                &participants,
                ranking.as_deref(),
                tiers.as_deref(),
            ),
            Commands::Message {
                target,
                contract,
                pool,
                ranking,
                tiers,
                route,
                timestamp,
                participants,
            } => commands::message::run(
                &config,
                commands::message::MessageArgs {
                    route: &route,
                    contract: &contract,
                    target: &target,
                    pool,
                    participants: &participants,
                    ranking_file: ranking.as_deref(),
                    tiers_file: tiers.as_deref(),
                    timestamp,
                },
            ),
            Commands::Recover {
                message,
                signature,
                signer,
            } => commands::recover::run(&message, &signature, signer.as_deref()),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

pub fn print_banner() {
    println!();
    println!("  {}", style_bold(&style_cyan("GEO PRIZE")));
    println!("  {}", style_dim(&format!("v{}", VERSION)));
    println!();
}
