//! CLI command implementations.

use std::path::PathBuf;

use tokio::net::TcpStream;

use crate::engine::{format_number, ComputationServer};
use crate::protocol::{Frame, FrameTransport};
use crate::proxy::ConnectionDispatcher;
use crate::types::config::{Config, DEFAULT_CONFIG_FILE};
use crate::types::errors::CalcacheError;
use crate::types::requests::Request;
use crate::types::responses::Response;
use crate::CalcacheResult;

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Writes a default configuration file into `path` (default: current directory).
pub async fn init(path: Option<PathBuf>) -> CalcacheResult<()> {
    let target_dir = path.unwrap_or_else(|| PathBuf::from("."));

    if target_dir.is_file() {
        return Err(CalcacheError::config(format!(
            "{} is a file, expected a directory",
            target_dir.display()
        )));
    }
    if !target_dir.exists() {
        std::fs::create_dir_all(&target_dir)?;
        tracing::info!("Directory created: {}", target_dir.display());
    }

    let config_path = target_dir.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        println!("Configuration already exists at: {}", config_path.display());
        return Ok(());
    }

    Config::default().save(&config_path)?;

    println!("Configuration created at: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Start the computation server: calcache server");
    println!("  2. Start the proxy:              calcache proxy");
    println!("  3. Ask something:                calcache query \"(1+2)*4\"");

    Ok(())
}

/// Runs the computation server until Ctrl-C.
pub async fn server(host: Option<String>, port: Option<u16>, config: &Config) -> CalcacheResult<()> {
    let mut config = config.clone();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let server = ComputationServer::bind(&config).await?;
    server.run_until(ctrl_c()).await
}

/// Runs the caching proxy until Ctrl-C.
pub async fn proxy(
    host: Option<String>,
    port: Option<u16>,
    server_host: Option<String>,
    server_port: Option<u16>,
    config: &Config,
) -> CalcacheResult<()> {
    let mut config = config.clone();
    if let Some(host) = host {
        config.proxy.host = host;
    }
    if let Some(port) = port {
        config.proxy.port = port;
    }
    if let Some(host) = server_host {
        config.upstream.host = host;
    }
    if let Some(port) = server_port {
        config.upstream.port = port;
    }

    let dispatcher = ConnectionDispatcher::bind(&config).await?;
    dispatcher.run_until(ctrl_c()).await
}

/// Options for [`query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub no_steps: bool,
    pub max_age: Option<u64>,
    pub no_store: bool,
}

/// Sends one expression and prints the answer.
pub async fn query(expression: &str, options: QueryOptions, config: &Config) -> CalcacheResult<()> {
    let host = options.host.unwrap_or_else(|| config.proxy.host.clone());
    let port = options.port.unwrap_or(config.proxy.port);
    let address = format!("{}:{}", host, port);

    tracing::debug!(address = %address, "Connecting");
    let stream = TcpStream::connect(&address)
        .await
        .map_err(|e| CalcacheError::other(format!("Could not connect to {}: {}", address, e)))?;
    let mut transport = FrameTransport::new(stream);

    let mut request = Request::new(1, expression).with_steps(!options.no_steps);
    if let Some(secs) = options.max_age {
        request = request.with_max_age(secs);
    }
    if options.no_store {
        request = request.without_store();
    }
    transport.write_frame(&Frame::Request(request)).await?;

    let reply = transport
        .read_frame()
        .await?
        .ok_or_else(|| CalcacheError::other("Connection closed before an answer arrived"))?;

    // Best effort; the answer is already in hand.
    let _ = transport.write_frame(&Frame::Exit { id: 2 }).await;

    match reply.into_response()? {
        Response::Result(result) => {
            println!("{}", format_number(result.value));
            if !result.steps.is_empty() {
                println!();
                println!("Steps:");
                for (i, step) in result.steps.iter().enumerate() {
                    println!("  {}. {}", i + 1, step);
                }
            }
            println!();
            println!("Served from: {}", result.served_from);
            Ok(())
        }
        Response::Error(error) => Err(CalcacheError::other(format!(
            "{}: {}",
            error.kind, error.message
        ))),
    }
}

/// Prints version.
pub fn version() {
    println!("calcache {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Caching proxy for arithmetic evaluation");
}
