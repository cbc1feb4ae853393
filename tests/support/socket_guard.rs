//! Skips socket-dependent tests in sandboxes that forbid binding loopback ports.

use std::net::TcpListener;

use wiremock::MockServer;

fn loopback_available() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Starts a wiremock server, or returns `None` (after logging) when loopback
/// sockets are unavailable.
#[allow(dead_code)]
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if !loopback_available() {
        eprintln!("skipping: loopback sockets unavailable");
        return None;
    }
    Some(MockServer::start().await)
}

/// Binds a loopback listener on an ephemeral port, or returns `None` when
/// loopback sockets are unavailable.
#[allow(dead_code)]
pub fn bind_loopback_or_skip() -> Option<TcpListener> {
    match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => Some(listener),
        Err(e) => {
            eprintln!("skipping: cannot bind loopback listener: {e}");
            None
        }
    }
}
