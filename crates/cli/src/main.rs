//! Conductor CLI
//!
//! Command line client for Conductor session servers.

mod prompt;
mod terminal;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use client::{
    ClientContext, ClientError, Config, DirectorySnapshot, Endpoint, SessionTarget, Supervisor,
    WebSocketConnector,
};
use serde_json::json;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::prompt::ConsolePrompter;
use crate::terminal::TerminalRenderers;

/// Log file used while a session owns the terminal.
const LOG_FILE: &str = "conductor.log";

/// Conductor - remote terminal sessions across endpoints.
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Log in to the local endpoint
    Login,

    /// Manage endpoints
    #[command(subcommand)]
    Endpoints(EndpointsCommands),

    /// Manage sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),

    /// Attach the terminal to a session (Ctrl-] detaches)
    Attach {
        /// Endpoint ID hosting the session
        endpoint: String,

        /// Session ID
        session: String,
    },
}

/// Subcommands for endpoint management.
#[derive(Subcommand, Debug, Clone)]
pub enum EndpointsCommands {
    /// List registered endpoints
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Register a new endpoint (prompts for its password)
    Add {
        /// Display name
        name: String,

        /// Base address, e.g. https://host:8080
        url: String,
    },

    /// Remove an endpoint
    Remove {
        /// Endpoint ID to remove
        endpoint_id: String,
    },

    /// Log in to an endpoint again
    Reauth {
        /// Endpoint ID to re-authenticate
        endpoint_id: String,
    },
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List sessions on all endpoints
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Create a session
    Create {
        /// Attach to the new session right away
        #[arg(long, short)]
        attach: bool,
    },

    /// Rename a session
    Rename {
        /// Endpoint ID hosting the session
        endpoint: String,

        /// Session ID
        session: String,

        /// New name (prompted for when omitted)
        name: Option<String>,
    },

    /// Delete a session
    Delete {
        /// Endpoint ID hosting the session
        endpoint: String,

        /// Session ID
        session: String,
    },
}

impl Commands {
    /// True if the command hands the terminal to a session.
    fn is_interactive(&self) -> bool {
        matches!(
            self,
            Commands::Attach { .. } | Commands::Sessions(SessionsCommands::Create { attach: true })
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let _log_guard = init_logging(&cli, &config)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    let ctx = ClientContext::open(config)?;
    match run(cli.command, ctx).await {
        Err(e) if matches!(e.downcast_ref::<ClientError>(), Some(ClientError::Cancelled)) => {
            eprintln!("Cancelled.");
            Ok(())
        }
        other => other,
    }
}

/// Initializes tracing. Interactive commands log to a file so log lines
/// never land on the session screen.
fn init_logging(cli: &Cli, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else {
        config.client.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cli.command.is_interactive() {
        std::fs::create_dir_all(&config.client.data_dir)?;
        let appender = tracing_appender::rolling::never(&config.client.data_dir, LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
        Ok(None)
    }
}

async fn run(command: Commands, ctx: Arc<ClientContext>) -> anyhow::Result<()> {
    let mut supervisor = Supervisor::new(
        Arc::clone(&ctx),
        Arc::new(WebSocketConnector::new()),
        Arc::new(TerminalRenderers),
        Arc::new(ConsolePrompter),
    );

    match command {
        Commands::Login => {
            supervisor.login().await?;
            println!("Logged in to {}", ctx.config().local.url);
        }
        Commands::Endpoints(cmd) => match cmd {
            EndpointsCommands::List { json } => {
                let endpoints = ctx.endpoints();
                if json {
                    let value = endpoints_json(&endpoints, &ctx.config().local.url);
                    println!("{}", serde_json::to_string_pretty(&value)?);
                } else {
                    print_endpoints_table(&endpoints, &ctx.config().local.url);
                }
            }
            EndpointsCommands::Add { name, url } => {
                let endpoint = supervisor.add_endpoint(&name, &url).await?;
                println!("Added endpoint {} ({})", endpoint.name, endpoint.id);
            }
            EndpointsCommands::Remove { endpoint_id } => {
                supervisor.remove_endpoint(&endpoint_id).await?;
                println!("Removed endpoint {}", endpoint_id);
            }
            EndpointsCommands::Reauth { endpoint_id } => {
                supervisor.reauthenticate(&endpoint_id).await?;
                println!("Re-authenticated endpoint {}", endpoint_id);
            }
        },
        Commands::Sessions(cmd) => match cmd {
            SessionsCommands::List { json } => {
                let snapshot = supervisor.refresh().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&snapshot_json(snapshot))?);
                } else {
                    print_sessions_table(snapshot, Utc::now());
                }
            }
            SessionsCommands::Create { attach } => {
                supervisor.refresh().await?;
                let target = supervisor.create_session().await?;
                if attach {
                    terminal::attach(&mut supervisor, target).await?;
                } else {
                    supervisor.clear();
                    println!("Created session {}", target);
                }
            }
            SessionsCommands::Rename {
                endpoint,
                session,
                name,
            } => {
                supervisor.refresh().await?;
                let target = SessionTarget::new(endpoint, session);
                let renamed = match name {
                    Some(name) => supervisor.rename_session_to(&target, &name).await?,
                    None => supervisor.rename_session(&target).await?,
                };
                if renamed {
                    println!("Renamed session {}", target);
                } else {
                    println!("Session {} left unchanged", target);
                }
            }
            SessionsCommands::Delete { endpoint, session } => {
                supervisor.refresh().await?;
                let target = SessionTarget::new(endpoint, session);
                supervisor.delete_session(&target).await?;
                println!("Deleted session {}", target);
            }
        },
        Commands::Attach { endpoint, session } => {
            let target = SessionTarget::new(endpoint, session);
            let snapshot = supervisor.refresh().await?;
            if snapshot.find(&target).is_none() {
                anyhow::bail!("Session {} not found", target);
            }
            terminal::attach(&mut supervisor, target).await?;
        }
    }

    Ok(())
}

/// Print endpoints in a formatted ASCII table.
fn print_endpoints_table(endpoints: &[Endpoint], local_url: &str) {
    let id_width = column_width(endpoints.iter().map(|e| e.id.len()), 2);
    let name_width = column_width(endpoints.iter().map(|e| e.name.len()), 4);

    println!(
        "{:<id_width$}  {:<name_width$}  {:<11}  URL",
        "ID",
        "NAME",
        "STATUS",
        id_width = id_width,
        name_width = name_width
    );
    println!("{}", "-".repeat(id_width + name_width + 20));

    for endpoint in endpoints {
        let url = if endpoint.is_local {
            local_url
        } else {
            endpoint.url.as_str()
        };
        println!(
            "{:<id_width$}  {:<name_width$}  {:<11}  {}",
            endpoint.id,
            endpoint.name,
            status_label(endpoint),
            url,
            id_width = id_width,
            name_width = name_width
        );
    }
}

fn status_label(endpoint: &Endpoint) -> &'static str {
    if endpoint.connected {
        "connected"
    } else {
        "unreachable"
    }
}

/// Print sessions grouped by endpoint.
fn print_sessions_table(snapshot: &DirectorySnapshot, now: DateTime<Utc>) {
    let id_width = column_width(snapshot.sessions().map(|s| s.id.len()), 2).min(36);
    let name_width = column_width(snapshot.sessions().map(|s| s.display_name().len()), 4).min(32);

    for group in &snapshot.groups {
        println!(
            "{} ({}) - {}",
            group.endpoint.name,
            group.endpoint.id,
            status_label(&group.endpoint)
        );
        if group.sessions.is_empty() {
            println!("  No sessions.");
            println!();
            continue;
        }
        println!(
            "  {:<id_width$}  {:<name_width$}  {:>10}",
            "ID",
            "NAME",
            "CREATED",
            id_width = id_width,
            name_width = name_width
        );
        for session in &group.sessions {
            println!(
                "  {:<id_width$}  {:<name_width$}  {:>10}",
                truncate_str(&session.id, id_width),
                truncate_str(session.display_name(), name_width),
                format_relative_time(session.created_at, now),
                id_width = id_width,
                name_width = name_width
            );
        }
        println!();
    }

    println!("Total: {} session(s)", snapshot.sessions().count());
}

/// Endpoint listing without credentials.
fn endpoints_json(endpoints: &[Endpoint], local_url: &str) -> serde_json::Value {
    let entries: Vec<_> = endpoints
        .iter()
        .map(|e| {
            let url = if e.is_local { local_url } else { e.url.as_str() };
            json!({
                "id": e.id,
                "name": e.name,
                "url": url,
                "isLocal": e.is_local,
                "connected": e.connected,
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

fn snapshot_json(snapshot: &DirectorySnapshot) -> serde_json::Value {
    let groups: Vec<_> = snapshot
        .groups
        .iter()
        .map(|group| {
            let sessions: Vec<_> = group
                .sessions
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id,
                        "name": s.display_name(),
                        "createdAt": s.created_at.map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            json!({
                "endpoint": {
                    "id": group.endpoint.id,
                    "name": group.endpoint.name,
                    "connected": group.endpoint.connected,
                },
                "sessions": sessions,
            })
        })
        .collect();
    serde_json::Value::Array(groups)
}

fn column_width(lengths: impl Iterator<Item = usize>, min: usize) -> usize {
    lengths.max().unwrap_or(min).max(min)
}

/// Format a timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };
    let elapsed = now.signed_duration_since(timestamp).num_seconds().max(0);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum number of characters, adding "..." if
/// truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_login_command() {
        let cli = Cli::try_parse_from(["conductor", "login"]).unwrap();
        assert!(matches!(cli.command, Commands::Login));
    }

    #[test]
    fn test_endpoints_list() {
        let cli = Cli::try_parse_from(["conductor", "endpoints", "list"]).unwrap();
        match cli.command {
            Commands::Endpoints(EndpointsCommands::List { json }) => assert!(!json),
            _ => panic!("Expected Endpoints List command"),
        }
    }

    #[test]
    fn test_endpoints_add() {
        let cli =
            Cli::try_parse_from(["conductor", "endpoints", "add", "lab", "https://lab:8080"])
                .unwrap();
        match cli.command {
            Commands::Endpoints(EndpointsCommands::Add { name, url }) => {
                assert_eq!(name, "lab");
                assert_eq!(url, "https://lab:8080");
            }
            _ => panic!("Expected Endpoints Add command"),
        }
    }

    #[test]
    fn test_endpoints_add_requires_url() {
        let result = Cli::try_parse_from(["conductor", "endpoints", "add", "lab"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoints_remove_and_reauth() {
        let cli = Cli::try_parse_from(["conductor", "endpoints", "remove", "ab12cd34"]).unwrap();
        match cli.command {
            Commands::Endpoints(EndpointsCommands::Remove { endpoint_id }) => {
                assert_eq!(endpoint_id, "ab12cd34")
            }
            _ => panic!("Expected Endpoints Remove command"),
        }

        let cli = Cli::try_parse_from(["conductor", "endpoints", "reauth", "ab12cd34"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Endpoints(EndpointsCommands::Reauth { .. })
        ));
    }

    #[test]
    fn test_sessions_list_json() {
        let cli = Cli::try_parse_from(["conductor", "sessions", "list", "--json"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::List { json }) => assert!(json),
            _ => panic!("Expected Sessions List command"),
        }
    }

    #[test]
    fn test_sessions_create_attach() {
        let cli = Cli::try_parse_from(["conductor", "sessions", "create", "-a"]).unwrap();
        assert!(cli.command.is_interactive());

        let cli = Cli::try_parse_from(["conductor", "sessions", "create"]).unwrap();
        assert!(!cli.command.is_interactive());
    }

    #[test]
    fn test_sessions_rename_name_is_optional() {
        let cli = Cli::try_parse_from(["conductor", "sessions", "rename", "local", "s1"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Rename { name, .. }) => assert!(name.is_none()),
            _ => panic!("Expected Sessions Rename command"),
        }

        let cli =
            Cli::try_parse_from(["conductor", "sessions", "rename", "local", "s1", "deploy"])
                .unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Rename {
                endpoint,
                session,
                name,
            }) => {
                assert_eq!(endpoint, "local");
                assert_eq!(session, "s1");
                assert_eq!(name.as_deref(), Some("deploy"));
            }
            _ => panic!("Expected Sessions Rename command"),
        }
    }

    #[test]
    fn test_sessions_delete_requires_ids() {
        assert!(Cli::try_parse_from(["conductor", "sessions", "delete", "local"]).is_err());
        assert!(Cli::try_parse_from(["conductor", "sessions", "delete", "local", "s1"]).is_ok());
    }

    #[test]
    fn test_attach_command() {
        let cli = Cli::try_parse_from(["conductor", "attach", "local", "s1"]).unwrap();
        assert!(cli.command.is_interactive());
        match cli.command {
            Commands::Attach { endpoint, session } => {
                assert_eq!(endpoint, "local");
                assert_eq!(session, "s1");
            }
            _ => panic!("Expected Attach command"),
        }
    }

    #[test]
    fn test_global_flags_after_command() {
        let cli = Cli::try_parse_from([
            "conductor",
            "sessions",
            "list",
            "--verbose",
            "--config",
            "/tmp/conductor.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/conductor.toml")));
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["conductor"]).is_err());
        assert!(Cli::try_parse_from(["conductor", "sessions"]).is_err());
    }

    #[test]
    fn test_format_relative_time() {
        let now = DateTime::parse_from_rfc3339("2024-05-02T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let at = |s: &str| Some(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc));

        assert_eq!(format_relative_time(None, now), "-");
        assert_eq!(format_relative_time(at("2024-05-02T11:59:30Z"), now), "30s ago");
        assert_eq!(format_relative_time(at("2024-05-02T11:15:00Z"), now), "45m ago");
        assert_eq!(format_relative_time(at("2024-05-02T07:00:00Z"), now), "5h ago");
        assert_eq!(format_relative_time(at("2024-04-29T12:00:00Z"), now), "3d ago");
        // Clock skew never yields negative ages.
        assert_eq!(format_relative_time(at("2024-05-02T12:05:00Z"), now), "0s ago");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("a-very-long-name", 8), "a-ver...");
        assert_eq!(truncate_str("ééééé", 4), "é...");
    }

    #[test]
    fn test_endpoints_json_omits_tokens() {
        let mut lab = Endpoint::remote("lab", "https://lab:8080");
        lab.token = Some("secret".to_string());
        let value = endpoints_json(&[Endpoint::local(), lab], "http://127.0.0.1:8080");

        assert_eq!(value[0]["url"], "http://127.0.0.1:8080");
        assert_eq!(value[1]["url"], "https://lab:8080");
        assert!(!value.to_string().contains("secret"));
    }

    #[test]
    fn test_snapshot_json_shape() {
        use client::{EndpointSessions, SessionDescriptor};

        let snapshot = DirectorySnapshot {
            groups: vec![EndpointSessions {
                endpoint: Endpoint::local(),
                sessions: vec![SessionDescriptor {
                    id: "s1".to_string(),
                    name: String::new(),
                    created_at: None,
                    endpoint_id: "local".to_string(),
                }],
            }],
            requires_login: false,
        };

        let value = snapshot_json(&snapshot);
        assert_eq!(value[0]["endpoint"]["id"], "local");
        assert_eq!(value[0]["endpoint"]["connected"], true);
        assert_eq!(value[0]["sessions"][0]["name"], "s1");
        assert!(value[0]["sessions"][0]["createdAt"].is_null());
    }
}
