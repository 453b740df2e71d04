use calcache::cli::commands::{self, QueryOptions};
use calcache::cli::{Cli, Commands};
use calcache::types::config::Config;
use calcache::{CalcacheError, CalcacheResult};
use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> CalcacheResult<()> {
    let cli = Cli::parse();

    // Load configuration first (no logging yet). A broken file is an error,
    // a missing one means defaults.
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    // CLI flags take precedence over config
    let log_level = if cli.quiet {
        "error".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };

    let directive: Directive = format!("calcache={}", log_level)
        .parse()
        .or_else(|_| "calcache=info".parse())
        .map_err(|e| CalcacheError::config(format!("invalid log directive: {}", e)))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let json = config.general.log_format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .init();

    tracing::debug!("Configuration loaded from: {}", cli.config.display());

    match cli.command {
        Commands::Init { path } => {
            commands::init(path).await?;
        }
        Commands::Server { host, port } => {
            commands::server(host, port, &config).await?;
        }
        Commands::Proxy {
            host,
            port,
            server_host,
            server_port,
        } => {
            commands::proxy(host, port, server_host, server_port, &config).await?;
        }
        Commands::Query {
            expression,
            host,
            port,
            no_steps,
            max_age,
            no_store,
        } => {
            let options = QueryOptions {
                host,
                port,
                no_steps,
                max_age,
                no_store,
            };
            commands::query(&expression, options, &config).await?;
        }
        Commands::Version => {
            commands::version();
        }
    }

    Ok(())
}
