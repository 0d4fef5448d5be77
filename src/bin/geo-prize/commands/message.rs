//! Message command - print the text an admin must sign

use std::path::Path;

use anyhow::{Context, Result};
use geo_prize::auth::AdminMessage;
use geo_prize::config::Config;
use geo_prize::distributor::distribution_digest;

use super::preview::{load_ranking, load_tiers};
use crate::style::*;

pub struct MessageArgs<'a> {
    pub route: &'a str,
    pub contract: &'a str,
    pub target: &'a str,
    pub pool: u128,
    pub participants: &'a [String],
    pub ranking_file: Option<&'a Path>,
    pub tiers_file: Option<&'a Path>,
    pub timestamp: Option<i64>,
}

pub fn run(config: &Config, args: MessageArgs<'_>) -> Result<()> {
    let contract = config
        .contract_registry()
        .resolve(args.contract)
        .with_context(|| format!("Unknown contract: {}", args.contract))?;
    let ranking = load_ranking(args.participants, args.ranking_file)?;
    let tiers = load_tiers(config, args.tiers_file)?;
    let payload = distribution_digest(&ranking, args.pool, &tiers);

    let timestamp = args
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let message = AdminMessage::new(args.route, contract, args.target, payload, timestamp)?;

    print_header("Admin Message");
    println!("Route:      {}", style_cyan(&message.route));
    println!("Contract:   {}", style_cyan(&message.contract.to_string()));
    println!("Target:     {}", style_cyan(&message.target));
    println!("Payload:    {}", style_dim(&message.payload));
    println!("Timestamp:  {}", message.timestamp);
    println!();
    println!("{}", style_bold(&message.to_string()));
    println!();
    println!(
        "{}",
        style_dim("Sign this exact text with personal_sign from the contract owner's wallet.")
    );
    if args.tiers_file.is_none() {
        print_warning("Payload covers the configured tiers; send no tiers in the request.");
    }

    Ok(())
}
