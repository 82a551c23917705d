use clap::{Parser, Subcommand};
use sandbox_exec::config::{Config, ConfigLoader};
use sandbox_exec::error::SandboxExecError;
use sandbox_exec::sandbox::CreateOptions;
use sandbox_exec::server::{ApiServer, AppState};
use sandbox_exec::tool::RunCommandInput;
use std::path::PathBuf;
use tracing::{debug, error, trace};

/// Run shell commands in sandboxes and follow their output
#[derive(Parser)]
#[command(name = "sandbox-exec")]
#[command(about = "Run commands in execution sandboxes and stream their logs", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind (default from config: 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (default from config: 3000)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a command in a sandbox and print its output
    Run {
        /// Reuse an existing sandbox instead of creating one
        #[arg(long)]
        sandbox_id: Option<String>,

        /// Return as soon as the command has started
        #[arg(long)]
        background: bool,

        /// Run the command with sudo
        #[arg(long)]
        sudo: bool,

        /// Base command (e.g. "ls")
        command: String,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", describe(&e));
            std::process::exit(exit_code_for(&e));
        }
    };

    let log_level = match cli.verbose {
        0 => config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        2 => "trace".to_string(),
        _ => "trace,hyper=debug,tower=debug".to_string(), // -vvv shows everything including dependencies
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .with_writer(std::io::stderr)
        .init();

    debug!("sandbox-exec started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Serve { host, port } => run_serve(config, host, port).await,
        Commands::Run {
            sandbox_id,
            background,
            sudo,
            command,
            args,
        } => run_command(config, sandbox_id, background, sudo, command, args).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {}", e);
            eprintln!("Error: {}", describe(&e));
            std::process::exit(exit_code_for(&e));
        }
    }
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let loader = ConfigLoader::new().await?;
    loader.load_with_explicit_path(path).await?;
    Ok(loader.get_config())
}

fn describe(e: &anyhow::Error) -> String {
    e.downcast_ref::<SandboxExecError>()
        .map(SandboxExecError::user_message)
        .unwrap_or_else(|| e.to_string())
}

fn exit_code_for(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<SandboxExecError>()
        .map(SandboxExecError::exit_code)
        .unwrap_or(1)
}

async fn run_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<i32> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = AppState::from_config(&config);
    ApiServer::new(state, config.bind_address()).start().await?;
    Ok(0)
}

async fn run_command(
    config: Config,
    sandbox_id: Option<String>,
    background: bool,
    sudo: bool,
    command: String,
    args: Vec<String>,
) -> anyhow::Result<i32> {
    let state = AppState::from_config(&config);

    let sandbox_id = match sandbox_id {
        Some(id) => id,
        None => {
            let sandbox = state
                .provider()
                .create(CreateOptions {
                    timeout: Some(config.sandbox.default_timeout),
                    ports: Vec::new(),
                })
                .await?;
            debug!(sandbox_id = %sandbox.sandbox_id(), "Created sandbox for run");
            sandbox.sandbox_id().to_string()
        }
    };

    let input = RunCommandInput {
        sandbox_id,
        command,
        args,
        sudo,
        wait: !background,
    };
    let report = state.tool().execute("cli", &input, None).await;

    for line in &report.result.logs {
        println!("{line}");
    }
    println!("{}", report.message);

    // A run that did not complete exits 1; otherwise mirror the command's own status
    if report.is_failure() {
        return Ok(1);
    }
    Ok(report.result.exit_code.unwrap_or(0))
}
