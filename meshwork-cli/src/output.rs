//! Terminal output formatting.

use colored::Colorize;
use meshwork_p2p::{Envelope, PeerAddress};

/// Print a success message.
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg.red());
}

/// Print an info message.
pub fn info(msg: &str) {
    println!("{} {}", "→".cyan(), msg);
}

/// Print a warning message.
pub fn warn(msg: &str) {
    println!("{} {}", "!".yellow().bold(), msg.yellow());
}

/// Print a header.
pub fn header(msg: &str) {
    println!("\n{}", msg.white().bold());
    println!("{}", "─".repeat(msg.chars().count()).dimmed());
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("  {} {}", format!("{}:", key).dimmed(), value);
}

/// Print a list of peer addresses.
pub fn peer_list(peers: &[PeerAddress]) {
    if peers.is_empty() {
        println!("  {}", "(none)".dimmed());
        return;
    }
    for peer in peers {
        println!("  - {}", peer.to_string().cyan());
    }
}

/// Print a delivered message.
pub fn delivery(envelope: &Envelope) {
    let origin = envelope
        .origin
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    let body = match envelope.payload.as_text() {
        Some(text) => text.to_string(),
        None => format!("<{} bytes of {}>", envelope.payload.data.len(), envelope.payload.kind),
    };

    println!(
        "{} {} {} {}",
        "✉".yellow().bold(),
        envelope.id().to_string().dimmed(),
        format!("[{}]", origin).cyan(),
        body
    );
}

/// Print a helpful hint.
pub fn hint(msg: &str) {
    println!("{} {}", "💡".dimmed(), msg.dimmed());
}
