//! # casino
//!
//! Command-line client for the casino server, built on `casino-client`.

#![deny(unsafe_code)]

mod commands;

use std::time::Duration;

use anyhow::{Context, Result};
use casino_client::CasinoClient;
use clap::{Parser, Subcommand};

/// Casino command-line client.
#[derive(Parser, Debug)]
#[command(name = "casino", about = "Talk to a casino server", version)]
struct Cli {
    /// Server URL (overrides settings and `CASINO_WS_URL`).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Directory holding the session token (overrides settings).
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Give up on a request after this many milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log filter (overrides settings, `RUST_LOG` still wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and report connection and session state.
    Status,
    /// Sign in and remember the session token.
    Login {
        /// Login name.
        username: String,
        /// Password.
        #[arg(long, env = "CASINO_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in.
    Register {
        /// Login name.
        username: String,
        /// Password.
        #[arg(long, env = "CASINO_PASSWORD", hide_env_values = true)]
        password: String,
        /// Name shown to other players. Defaults to the username.
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Forget the stored session token.
    Logout,
    /// Print the authenticated user's profile.
    Whoami,
    /// Check whether a username is registered.
    UserExists {
        /// Name to look up.
        username: String,
    },
    /// Run a table operation.
    Db {
        #[command(subcommand)]
        op: DbCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Fetch one row.
    Get {
        /// Table name.
        table: String,
        /// Row id.
        id: u64,
    },
    /// Fetch a page of rows.
    List {
        /// Table name.
        table: String,
        /// Page size.
        #[arg(long, default_value_t = casino_client::data::DEFAULT_PAGE_SIZE)]
        limit: u32,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Insert a row from JSON.
    Create {
        /// Table name.
        table: String,
        /// Row as a JSON object.
        data: String,
    },
    /// Patch a row with JSON.
    Update {
        /// Table name.
        table: String,
        /// Row id.
        id: u64,
        /// Fields as a JSON object.
        data: String,
    },
    /// Remove a row.
    Delete {
        /// Table name.
        table: String,
        /// Row id.
        id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = casino_settings::load_settings().context("Failed to load settings")?;
    if let Some(url) = cli.url {
        settings.connection.url = url;
    }
    if let Some(dir) = cli.data_dir {
        settings.storage.data_dir = dir;
    }
    if let Some(ms) = cli.timeout_ms {
        settings.connection.request_timeout_ms = Some(ms);
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    // one-shot commands should not sit through the full retry budget
    settings.connection.max_reconnect_attempts = settings.connection.max_reconnect_attempts.min(3);
    casino_settings::validate(&settings).context("Invalid settings")?;

    if settings.logging.json {
        casino_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        casino_core::logging::init_subscriber(&settings.logging.level);
    }

    let client = CasinoClient::with_websocket(settings);
    let output = commands::run(&client, cli.command).await;
    client.disconnect();
    // give the socket a moment to send its close frame
    tokio::time::sleep(Duration::from_millis(20)).await;

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_login() {
        let cli = Cli::try_parse_from(["casino", "login", "bob", "--password", "pw"]).unwrap();
        assert_matches!(
            cli.command,
            Command::Login { ref username, ref password } if username == "bob" && password == "pw"
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "casino",
            "status",
            "--url",
            "ws://localhost:8080/ws",
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("ws://localhost:8080/ws"));
        assert_eq!(cli.timeout_ms, Some(500));
        assert_matches!(cli.command, Command::Status);
    }

    #[test]
    fn db_list_defaults() {
        let cli = Cli::try_parse_from(["casino", "db", "list", "users"]).unwrap();
        assert_matches!(
            cli.command,
            Command::Db { op: DbCommand::List { ref table, limit: 10, offset: 0 } } if table == "users"
        );
    }

    #[test]
    fn db_update_takes_json() {
        let cli =
            Cli::try_parse_from(["casino", "db", "update", "users", "7", r#"{"DisplayName":"R"}"#])
                .unwrap();
        assert_matches!(cli.command, Command::Db { op: DbCommand::Update { id: 7, .. } });
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["casino", "spin"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
