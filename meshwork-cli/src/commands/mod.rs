//! CLI command implementations.

pub mod broadcast;
pub mod neighbors;
pub mod run;

use meshwork_p2p::PeerAddress;

/// Parse a `host:port` argument, reporting failures on the terminal.
pub(crate) fn parse_address(flag: &str, input: &str) -> Option<PeerAddress> {
    match input.parse() {
        Ok(address) => Some(address),
        Err(e) => {
            crate::output::error(&format!("Invalid --{} address: {}", flag, e));
            None
        }
    }
}
