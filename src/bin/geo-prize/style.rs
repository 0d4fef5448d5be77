//! Terminal styling utilities

use colored::Colorize;

pub fn style_cyan(s: &str) -> String {
    s.cyan().to_string()
}

pub fn style_green(s: &str) -> String {
    s.green().to_string()
}

pub fn style_red(s: &str) -> String {
    s.red().to_string()
}

pub fn style_yellow(s: &str) -> String {
    s.yellow().to_string()
}

pub fn style_dim(s: &str) -> String {
    s.dimmed().to_string()
}

pub fn style_bold(s: &str) -> String {
    s.bold().to_string()
}

pub fn print_success(msg: &str) {
    println!("{} {}", style_green("✓"), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", style_red("✗"), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", style_yellow("⚠"), msg);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", style_bold(title));
    println!("{}", "─".repeat(title.chars().count()));
}

/// Shorten an address for tables, keeping the first 6 and last 4 hex digits.
pub fn truncate_address(address: &str) -> String {
    if address.len() >= 14 {
        format!("{}…{}", &address[..8], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}
