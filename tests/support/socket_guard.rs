//! Mock provider servers need a localhost socket; some sandboxes forbid it.
//!
//! Tests that talk to wiremock start it through [`start_mock_server_or_skip`]
//! and return early on `None`. Setting `FULLTEXT_REQUIRE_SOCKET_TESTS=1`
//! (CI) turns the skip into a failure so provider tests cannot silently vanish.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "FULLTEXT_REQUIRE_SOCKET_TESTS";

/// What to do when no localhost port can be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unbindable {
    Skip,
    Fail,
}

impl Unbindable {
    pub fn from_env() -> Self {
        match std::env::var(REQUIRE_ENV) {
            Ok(v) if matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") => {
                Self::Fail
            }
            _ => Self::Skip,
        }
    }
}

fn localhost_bindable() -> bool {
    TcpListener::bind(("127.0.0.1", 0)).is_ok()
}

/// `true` when the calling test should return without contacting providers.
#[track_caller]
pub fn skip_provider_test() -> bool {
    if localhost_bindable() {
        return false;
    }
    let caller = Location::caller();
    match Unbindable::from_env() {
        Unbindable::Fail => panic!(
            "{}:{}: mock provider server needs a localhost socket ({REQUIRE_ENV} is set)",
            caller.file(),
            caller.line()
        ),
        Unbindable::Skip => {
            eprintln!(
                "{}:{}: skipped, no localhost socket for the mock provider server \
                 (set {REQUIRE_ENV}=1 to fail instead)",
                caller.file(),
                caller.line()
            );
            true
        }
    }
}

/// A fresh wiremock server standing in for the provider APIs, or `None`
/// when sockets are unavailable and skipping is allowed.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if skip_provider_test() {
        return None;
    }
    Some(MockServer::start().await)
}
