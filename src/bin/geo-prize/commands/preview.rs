//! Preview command - show how a pool would be split

use std::path::Path;

use anyhow::{Context, Result};
use geo_prize::config::Config;
use geo_prize::model::Address;
use geo_prize::prize::PrizeTier;

use crate::style::*;

const RANK_WIDTH: usize = 6;
const PARTICIPANT_WIDTH: usize = 14;
const TIER_WIDTH: usize = 10;
const AMOUNT_WIDTH: usize = 24;

pub fn run(
    config: &Config,
    pool: u128,
    participants: &[String],
    ranking_file: Option<&Path>,
    tiers_file: Option<&Path>,
) -> Result<()> {
    let ranking = load_ranking(participants, ranking_file)?;
    let tiers = load_tiers(config, tiers_file)?;

    let table = config.calculator().compute_payouts(&ranking, pool, &tiers)?;

    print_header("Payout Preview");
    println!("Pool:        {}", style_bold(&pool.to_string()));
    println!("Ranked:      {}", ranking.len());
    println!("Tiers:       {}", tiers.len());
    println!();
    println!(
        "  {} {} {} {}",
        style_dim(&pad_right("RANK", RANK_WIDTH)),
        style_dim(&pad_right("PARTICIPANT", PARTICIPANT_WIDTH)),
        style_dim(&pad_right("TIER", TIER_WIDTH)),
        style_dim(&pad_left("AMOUNT", AMOUNT_WIDTH))
    );

    for payout in &table.payouts {
        let amount = pad_left(&payout.amount.to_string(), AMOUNT_WIDTH);
        println!(
            "  {} {} {} {}",
            pad_right(&payout.rank.to_string(), RANK_WIDTH),
            pad_right(
                &truncate_address(&payout.participant.to_string()),
                PARTICIPANT_WIDTH
            ),
            pad_right(payout.tier_id.as_deref().unwrap_or("-"), TIER_WIDTH),
            if payout.amount > 0 {
                style_green(&amount)
            } else {
                style_dim(&amount)
            }
        );
    }

    println!();
    print_success(&format!("Total paid: {}", table.total()));
    Ok(())
}

/// Ranking from a file when given, otherwise from positional addresses.
pub fn load_ranking(participants: &[String], ranking_file: Option<&Path>) -> Result<Vec<Address>> {
    match ranking_file {
        Some(path) => read_ranking(path),
        None => participants
            .iter()
            .map(|p| p.parse::<Address>().with_context(|| format!("Invalid address: {}", p)))
            .collect(),
    }
}

/// Tiers from a JSON file when given, otherwise the configured defaults.
pub fn load_tiers(config: &Config, tiers_file: Option<&Path>) -> Result<Vec<PrizeTier>> {
    match tiers_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content).context("Failed to parse tiers file")
        }
        None => Ok(config.prizes.tiers.clone()),
    }
}

/// One address per line; blank lines and `#` comments are skipped.
fn read_ranking(path: &Path) -> Result<Vec<Address>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.parse::<Address>()
                .with_context(|| format!("Invalid address in ranking: {}", line))
        })
        .collect()
}

// Pad before styling: escape codes would otherwise count toward the width.
fn pad_right(text: &str, width: usize) -> String {
    format!("{:<width$}", text, width = width)
}

fn pad_left(text: &str, width: usize) -> String {
    format!("{:>width$}", text, width = width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            match (in_escape, c) {
                (false, '\x1b') => in_escape = true,
                (true, 'm') => in_escape = false,
                (true, _) => {}
                (false, c) => out.push(c),
            }
        }
        out
    }

    #[test]
    fn test_styled_cells_keep_their_width() {
        colored::control::set_override(true);

        let header = style_dim(&pad_right("RANK", RANK_WIDTH));
        let amount = style_green(&pad_left("500", AMOUNT_WIDTH));
        assert!(header.contains('\x1b'));
        assert_eq!(strip_ansi(&header), "RANK  ");
        assert_eq!(strip_ansi(&amount).chars().count(), AMOUNT_WIDTH);
        assert!(strip_ansi(&amount).ends_with("500"));

        colored::control::unset_override();
    }

    #[test]
    fn test_positional_ranking_is_parsed_in_order() {
        let ranking = load_ranking(
            &[
                "0x0202020202020202020202020202020202020202".to_string(),
                "0x0101010101010101010101010101010101010101".to_string(),
            ],
            None,
        )
        .unwrap();
        assert_eq!(ranking[0], Address::from_bytes([2; 20]));
        assert!(load_ranking(&["nope".to_string()], None).is_err());
    }
}
