//! Shared test fixtures.

use crate::config::ServerConfig;
use crate::state::AppState;

/// A fully wired state over defaults and the in-memory store. No
/// background loops are started.
pub fn test_app_state() -> AppState {
    let config = ServerConfig::default();
    AppState::build(&config, "test-instance".to_string()).expect("test state builds")
}
