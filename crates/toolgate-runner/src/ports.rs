//! Free-port selection for spawned providers

use std::collections::HashSet;
use std::net::TcpListener;
use tracing::debug;

/// Scan `[start, end]` and return the first bindable port that is not
/// in `reserved`.
pub fn find_available_port(start: u16, end: u16, reserved: &HashSet<u16>) -> Option<u16> {
    for port in start..=end {
        if reserved.contains(&port) {
            continue;
        }
        if TcpListener::bind(("0.0.0.0", port)).is_ok() {
            debug!(port, "Selected free port");
            return Some(port);
        }
    }
    None
}
