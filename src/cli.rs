//! CLI argument parsing and command handlers

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::dataset::Criteria;
use crate::output;
use crate::record::RecordType;
use crate::store::DataStore;
use crate::watcher::FileWatcher;

/// pwdsvc: read-only query service over passwd and group files
#[derive(Parser, Debug)]
#[command(
    name = "pwdsvc",
    version,
    about = "Query passwd and group files over HTTP or from the command line",
    long_about = "pwdsvc loads an account file (passwd layout) and a group file (group layout), \
                  indexes every field, and answers exact-match and compound queries. \
                  While serving, both files are watched and reloaded when they change."
)]
pub struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Options locating the source files, shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Account file (overrides config and PWDSVC_PASSWORD_FILE_PATH)
    #[arg(long, value_name = "PATH")]
    pub passwd: Option<PathBuf>,

    /// Group file (overrides config and PWDSVC_GROUP_FILE_PATH)
    #[arg(long, value_name = "PATH")]
    pub group: Option<PathBuf>,
}

impl SourceArgs {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        config.apply_overrides(self.passwd.clone(), self.group.clone());
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API server
    ///
    /// Both source files are watched and reloaded on change unless
    /// --no-watch is given.
    Serve {
        #[command(flatten)]
        sources: SourceArgs,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not watch the source files for changes
        #[arg(long)]
        no_watch: bool,
    },

    /// List records of a type, optionally filtered by one field
    ///
    /// Examples:
    ///   pwdsvc lookup account                 # all accounts
    ///   pwdsvc lookup group gid 999           # groups with gid 999
    ///   pwdsvc lookup group members alice     # groups listing alice
    Lookup {
        #[command(flatten)]
        sources: SourceArgs,

        /// Record type: account (passwd, user) or group
        record_type: RecordType,

        /// Field to match
        #[arg(requires = "value")]
        field: Option<String>,

        /// Value the field must equal
        value: Option<String>,

        /// Output format as JSON
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output (only with --json)
        #[arg(long)]
        pretty: bool,
    },

    /// Find records matching every given key=value parameter
    ///
    /// Repeat `-p member=<name>` to require several group members.
    ///
    /// Examples:
    ///   pwdsvc query group -p gid=999 -p member=alice -p member=bob
    ///   pwdsvc query account -p shell=/bin/bash -p gid=100
    Query {
        #[command(flatten)]
        sources: SourceArgs,

        /// Record type: account (passwd, user) or group
        record_type: RecordType,

        /// Criteria as key=value, repeatable
        #[arg(
            short = 'p',
            long = "param",
            value_name = "KEY=VALUE",
            value_parser = parse_param,
            required = true
        )]
        params: Vec<(String, String)>,

        /// Output format as JSON
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output (only with --json)
        #[arg(long)]
        pretty: bool,
    },

    /// Load both source files and report their status
    Check {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

/// Parse a `key=value` criteria argument
fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // Setup logging based on verbosity
        let log_level = match self.verbose {
            0 => "warn",   // Default: only warnings and errors
            1 => "info",   // -v: show info messages
            2 => "debug",  // -vv: show debug messages
            _ => "trace",  // -vvv: show trace messages
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
            .init();

        match self.command {
            Command::Serve { sources, host, port, no_watch } => {
                handle_serve(&sources, host, port, no_watch)
            }
            Command::Lookup { sources, record_type, field, value, json, pretty } => {
                handle_lookup(&sources, record_type, field, value, json, pretty)
            }
            Command::Query { sources, record_type, params, json, pretty } => {
                handle_query(&sources, record_type, params, json, pretty)
            }
            Command::Check { sources } => handle_check(&sources),
        }
    }
}

/// Handle the `serve` subcommand
fn handle_serve(
    sources: &SourceArgs,
    host: Option<String>,
    port: Option<u16>,
    no_watch: bool,
) -> Result<()> {
    let mut config = sources.load_config()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if no_watch {
        config.watch.enabled = false;
    }

    log::info!(
        "Starting HTTP server on {}:{}",
        config.server.host,
        config.server.port
    );

    let store = Arc::new(DataStore::open(&config.files));
    for status in store.status() {
        if let Some(err) = &status.error {
            output::warn(&format!("Serving without {} records: {}", status.record_type, err));
        }
    }

    // Keep the watcher alive for as long as the server runs
    let _watcher = if config.watch.enabled {
        match FileWatcher::spawn(store.clone(), &config.watch) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                output::warn(&format!("File watching disabled: {:#}", e));
                None
            }
        }
    } else {
        log::info!("File watching disabled");
        None
    };

    println!("Starting pwdsvc HTTP server...");
    println!("  Address: http://{}:{}", config.server.host, config.server.port);
    println!("  Accounts: {}", config.files.passwd.display());
    println!("  Groups:   {}", config.files.group.display());
    println!("\nEndpoints:");
    println!("  GET  /users");
    println!("  GET  /users/query?name=&uid=&gid=&comment=&home=&shell=");
    println!("  GET  /users/<uid>");
    println!("  GET  /users/<uid>/groups");
    println!("  GET  /groups");
    println!("  GET  /groups/query?name=&gid=&member=[&member=...]");
    println!("  GET  /groups/<gid>");
    println!("  GET  /health");
    println!("  POST /reload");
    println!("\nPress Ctrl+C to stop.");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        crate::server::serve(store, &config.server.host, config.server.port).await
    })
}

/// Handle the `lookup` subcommand
fn handle_lookup(
    sources: &SourceArgs,
    record_type: RecordType,
    field: Option<String>,
    value: Option<String>,
    as_json: bool,
    pretty_json: bool,
) -> Result<()> {
    let config = sources.load_config()?;
    let store = DataStore::open(&config.files);

    let filter = match (field.as_deref(), value.as_deref()) {
        (Some(field), Some(value)) => Some((field, value)),
        _ => None,
    };
    let records = store
        .lookup(record_type, filter)
        .with_context(|| format!("Lookup of {} records failed", record_type))?;

    output::print_records(&records, as_json, pretty_json)
}

/// Handle the `query` subcommand
fn handle_query(
    sources: &SourceArgs,
    record_type: RecordType,
    params: Vec<(String, String)>,
    as_json: bool,
    pretty_json: bool,
) -> Result<()> {
    let config = sources.load_config()?;
    let store = DataStore::open(&config.files);

    let criteria: Criteria = params.into_iter().collect();
    let records = store
        .query(record_type, &criteria)
        .with_context(|| format!("Query of {} records failed", record_type))?;

    output::print_records(&records, as_json, pretty_json)
}

/// Handle the `check` subcommand
fn handle_check(sources: &SourceArgs) -> Result<()> {
    let config = sources.load_config()?;
    let store = DataStore::open(&config.files);
    let status = store.status();

    output::print_status(&status);

    let unavailable = status.iter().filter(|s| !s.available).count();
    if unavailable > 0 {
        anyhow::bail!("{} of {} source file(s) could not be read", unavailable, status.len());
    }
    Ok(())
}
