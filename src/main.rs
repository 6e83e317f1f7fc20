use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use remote_exec::client::{self, Client, ClientError};
use remote_exec::config::{ClientConfig, ServerConfig};
use remote_exec::protocol::encode_request;
use remote_exec::server;
use remote_exec::utils::logging;

#[derive(Parser)]
#[command(name = "remote-exec", version, about = "Run batches of shell commands on a remote host")]
struct AppCli {
    /// Config file path (JSON)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the command server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Per-command timeout in seconds
        #[arg(long)]
        command_timeout: Option<u64>,
        /// Seconds a connection may stay silent before it is dropped
        #[arg(long)]
        idle_timeout: Option<u64>,
        /// Run in daemon mode (background)
        #[arg(long)]
        daemon: bool,
    },
    /// Send a batch of commands to a server
    Send {
        /// File with one command per line; prompts for commands when omitted
        file: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Pretty-print the decoded response
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

#[cfg(unix)]
fn run_daemon() -> Result<()> {
    use daemonize::Daemonize;
    let daemonize = Daemonize::new()
        .pid_file("remote-exec.pid")
        .working_directory(".")
        .umask(0o027);

    daemonize.start().map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

#[cfg(not(unix))]
fn run_daemon() -> Result<()> {
    anyhow::bail!("daemon mode is only supported on unix")
}

fn main() -> Result<()> {
    let args = AppCli::parse();

    // Fork before the runtime starts any threads
    if let Commands::Serve { daemon: true, .. } = args.command {
        run_daemon()?;
    }

    logging::init("info");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: AppCli) -> Result<()> {
    match args.command {
        Commands::Serve {
            host,
            port,
            command_timeout,
            idle_timeout,
            ..
        } => {
            let mut config = ServerConfig::load(args.config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(secs) = command_timeout {
                config.command_timeout_secs = secs;
            }
            if let Some(secs) = idle_timeout {
                config.idle_timeout_secs = secs;
            }
            info!(
                version = remote_exec::VERSION,
                command_timeout_secs = config.command_timeout_secs,
                idle_timeout_secs = config.idle_timeout_secs,
                "Starting command server on {}",
                config.bind_addr()
            );

            tokio::select! {
                res = server::serve(config) => res,
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received, stopping server");
                    Ok(())
                }
            }
        }
        Commands::Send {
            file,
            host,
            port,
            pretty,
        } => {
            let mut config = ClientConfig::load(args.config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let client = Client::new(config);

            if file.is_some() {
                let commands = read_commands(file).await?;
                return send_batch(&client, commands, pretty).await;
            }

            // Interactive: one command per batch until end of input
            loop {
                let commands = match read_commands(None).await {
                    Ok(commands) => commands,
                    Err(ClientError::NoInput) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                if let Err(e) = send_batch(&client, commands, pretty).await {
                    error!("{:#}", e);
                }
            }
        }
    }
}

async fn read_commands(file: Option<PathBuf>) -> Result<Vec<String>, ClientError> {
    tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        client::collect_commands(file.as_deref(), &mut input, &mut output)
    })
    .await
    .map_err(|e| ClientError::Io(io::Error::other(e)))?
}

async fn send_batch(client: &Client, commands: Vec<String>, pretty: bool) -> Result<()> {
    let request = client::build_request(commands)?;

    if pretty {
        let response = client.send(&request).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        let raw = client.send_raw(&encode_request(&request)?).await?;
        println!("Response from server >> {}", raw.trim_end());
    }
    Ok(())
}
