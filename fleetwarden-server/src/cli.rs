//! Command-line interface.

use clap::Parser;

/// Fleetwarden - reliability layer daemon for messaging-account fleets
#[derive(Debug, Parser)]
#[command(name = "fleetwarden-server", version, about)]
pub struct Cli {
    /// Address to bind the operator API on
    #[arg(long, env = "FLEETWARDEN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the operator API
    #[arg(short, long, env = "FLEETWARDEN_PORT", default_value_t = 8760)]
    pub port: u16,

    /// Path to the JSON configuration file
    #[arg(short, long, env = "FLEETWARDEN_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Instance id for distributed coordination (defaults to hostname-pid)
    #[arg(long, env = "FLEETWARDEN_INSTANCE_ID")]
    pub instance_id: Option<String>,
}

/// Instance id used for lease ownership: explicit flag, else
/// `hostname-pid`.
pub fn resolve_instance_id(cli: &Cli) -> String {
    if let Some(ref id) = cli.instance_id {
        return id.clone();
    }
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "local".to_string());
    format!("{host}-{}", std::process::id())
}
