use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use callsink::api;
use callsink::client::EslClient;
use callsink::config::Config;
use callsink::esl::EslConnector;
use callsink::store::{CallStore, SqliteCallStore};

mod cli;

use cli::Cli;
use cli::commands::{CallsCommands, Commands};
use cli::render;

fn setup_logging(to_stderr: bool) -> Result<()> {
    // Let everything through env_logger and gate on log's max level, so the
    // configured level can still apply once the config has been read
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"));

    if to_stderr {
        builder.target(env_logger::Target::Stderr).init();
    } else {
        // Create log directory
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callsink")
            .join("logs");

        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

        let log_file = log_dir.join("callsink.log");

        let target = Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .context("Failed to open log file")?,
        );

        builder.target(env_logger::Target::Pipe(target)).init();
    }

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
    info!("Logging initialized, writing to {}", if to_stderr { "stderr" } else { "log file" });
    Ok(())
}

/// Apply the configured level unless RUST_LOG already decided it.
fn apply_log_level(config: &Config) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match config.log_filter() {
        Ok(level) => log::set_max_level(level),
        Err(e) => warn!("{}, keeping info", e),
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Run) => run_service(cli, config).await,
        Some(Commands::Calls { command }) => handle_calls_command(command, config).await,
    }
}

fn open_store(config: &Config) -> Result<SqliteCallStore> {
    let path = &config.storage.database_path;
    SqliteCallStore::open(path).context(format!("Failed to open call database {}", path.display()))
}

async fn run_service(cli: &Cli, config: &Config) -> Result<()> {
    let store = Arc::new(open_store(config)?);

    let api_addr = config.api.addr();
    let listener = TcpListener::bind(&api_addr)
        .await
        .context(format!("Failed to bind API on {}", api_addr))?;

    let token = CancellationToken::new();
    let connector = EslConnector::new(config.esl.connector());
    let running = EslClient::new(connector, Arc::clone(&store), config.esl.client()).start(token.clone());

    let router = api::router(Arc::clone(&store) as Arc<dyn CallStore>);
    let api_task = tokio::spawn(api::serve(listener, router, token.clone()));

    println!(
        "{} recording calls from {} (API on {})",
        "Running:".green(),
        config.esl.addr.cyan(),
        api_addr.cyan()
    );

    shutdown_signal().await;
    println!("{}", "Shutting down...".yellow());
    token.cancel();

    let report = running.close().await;
    info!(
        "Client stopped: {} events, {} read failures, {} connect attempts, drained={}",
        report.events.events, report.events.read_failures, report.reconnect.attempts, report.drained
    );
    if cli.is_verbose() {
        println!(
            "  {} events handled, {} connect attempts",
            report.events.events, report.reconnect.attempts
        );
    }
    if !report.drained {
        println!("{}", "Some events were still in flight at shutdown".red());
    }

    api_task
        .await
        .context("API task panicked")?
        .context("API server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn handle_calls_command(command: &CallsCommands, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    match command {
        CallsCommands::List { limit, offset } => {
            info!("Listing calls - limit: {}, offset: {}", limit, offset);
            let calls = store.list_calls(*limit, *offset).await.context("Failed to list calls")?;
            if calls.is_empty() {
                println!("{}", "No calls recorded".yellow());
                return Ok(());
            }
            println!("{}", render::header().bold());
            for call in &calls {
                let row = render::call_row(call);
                if call.is_ended() {
                    println!("{}", row);
                } else {
                    println!("{}", row.green());
                }
            }
        }
        CallsCommands::Show { uuid } => {
            info!("Showing call: {}", uuid);
            match store.get_call(uuid).await.context("Failed to load call")? {
                Some(call) => {
                    for (label, value) in render::call_detail(&call) {
                        println!("{:>10}: {}", label.cyan(), value);
                    }
                }
                None => {
                    println!("{} {}", "Call not found:".red(), uuid);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before anything else can log
    setup_logging(cli.stderr).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&config);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
