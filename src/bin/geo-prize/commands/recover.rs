//! Recover command - show who signed a message

use anyhow::{Context, Result};
use geo_prize::auth::{AdminMessage, SignatureVerifier};
use geo_prize::model::Address;

use crate::style::*;

pub fn run(message: &str, signature: &str, signer: Option<&str>) -> Result<()> {
    print_header("Signature Recovery");

    match AdminMessage::parse(message) {
        Ok(parsed) => println!(
            "Message:    route={} contract={} target={} timestamp={}",
            parsed.route, parsed.contract, parsed.target, parsed.timestamp
        ),
        Err(e) => print_warning(&format!("Not an admin message ({})", e)),
    }

    let verifier = SignatureVerifier::new();
    let recovered = verifier
        .recover(message.as_bytes(), signature)
        .context("Signature is not valid")?;
    println!("Recovered:  {}", style_cyan(&recovered.to_string()));

    if let Some(claimed) = signer {
        let claimed: Address = claimed.parse().context("Invalid signer address")?;
        if claimed == recovered {
            print_success("Signature matches the claimed signer");
        } else {
            anyhow::bail!("signed by {}, not {}", recovered, claimed);
        }
    }

    Ok(())
}
