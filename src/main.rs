//! PipeLink - typed commands between a backend and its UI process
//!
//! `serve` runs a demo backend, `send` plays the UI side.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pipelink::config::{self, Config};
use pipelink::network::transport::{current_user, derive_channel_name};
use pipelink::network::{
    AcceptedStream, ChannelEndpoint, ChannelListener, ClientDispatcher, HandlerResult,
    RequestHandler, ServerDispatcher,
};
use pipelink::protocol::{DeleteElements, Request, Response};

/// PipeLink - typed IPC between a backend and its UI
#[derive(Parser)]
#[command(name = "pipelink")]
#[command(author = "PipeLink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Exchange typed commands between a backend and a UI process", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How to name the channel; both peers must agree
#[derive(clap::Args)]
struct ChannelArgs {
    /// Explicit channel name
    #[arg(long)]
    channel: Option<String>,

    /// Document path to derive the channel name from
    #[arg(long)]
    path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo backend
    Serve {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Number of elements initially selected
        #[arg(long)]
        selection: Option<i32>,
    },

    /// Send a request as the UI client
    Send {
        #[command(flatten)]
        channel: ChannelArgs,

        /// How many times to send the request on one channel
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Print responses as JSON
        #[arg(long)]
        json: bool,

        #[command(subcommand)]
        request: RequestKind,
    },

    /// Print the channel name derived for a document
    Channel {
        /// Document path
        #[arg(long)]
        path: String,

        /// User name (current user if omitted)
        #[arg(long)]
        user: Option<String>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum RequestKind {
    /// Delete the selected elements
    Delete,
}

impl RequestKind {
    fn to_request(self) -> Request {
        match self {
            RequestKind::Delete => Request::DeleteElements(DeleteElements),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { channel, selection } => {
            let selection = selection.unwrap_or(config.demo.selection_size);
            run_server(&config, resolve_endpoint(&config, channel), selection).await?;
        }
        Commands::Send {
            channel,
            count,
            json,
            request,
        } => {
            let endpoint = resolve_endpoint(&config, channel);
            run_client(&config, endpoint, request.to_request(), count, json).await?;
        }
        Commands::Channel { path, user } => {
            let user = user.unwrap_or_else(current_user);
            println!("{}", derive_channel_name(&user, &path));
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn resolve_endpoint(config: &Config, args: ChannelArgs) -> ChannelEndpoint {
    if let Some(name) = args.channel {
        return ChannelEndpoint::new(name, config.channel.socket_dir.as_deref());
    }
    let derived = args
        .path
        .map(|path| derive_channel_name(&current_user(), &path));
    config.endpoint(derived)
}

/// Demo backend holding a simulated selection
struct SelectionBackend {
    selected: Mutex<i32>,
}

#[async_trait]
impl RequestHandler for SelectionBackend {
    async fn handle(&self, request: Request) -> HandlerResult {
        match request {
            Request::DeleteElements(_) => {
                let mut selected = self
                    .selected
                    .lock()
                    .map_err(|_| anyhow!("selection state poisoned"))?;
                if *selected <= 0 {
                    bail!("no selection");
                }

                let deleted = std::mem::take(&mut *selected);
                tracing::info!("Deleted {} elements", deleted);
                Ok(Response::success(deleted))
            }
        }
    }
}

/// Run the backend until Ctrl+C, one task per client session
async fn run_server(config: &Config, endpoint: ChannelEndpoint, selection: i32) -> anyhow::Result<()> {
    let net_config = config.network_config();
    let backend = Arc::new(SelectionBackend {
        selected: Mutex::new(selection),
    });

    let mut listener = ChannelListener::bind(&endpoint).await?;

    println!("\n========================================");
    println!("  PipeLink Backend Running");
    println!("========================================");
    println!("  Channel: {}", endpoint.name());
    println!("  Address: {}", endpoint.address().display());
    println!("  Selection: {} elements", selection);
    println!("========================================");
    println!("\nWaiting for clients to connect...");
    println!("Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let backend = backend.clone();
                        let net_config = net_config.clone();

                        tokio::spawn(async move {
                            let mut session =
                                ServerDispatcher::new(AcceptedStream::new(stream), &net_config);
                            if let Err(e) = session.accept_and_serve(backend).await {
                                tracing::error!("Session error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    tracing::info!("Backend stopped");
    Ok(())
}

/// Send `request` `count` times over one channel
async fn run_client(
    config: &Config,
    endpoint: ChannelEndpoint,
    request: Request,
    count: u32,
    json: bool,
) -> anyhow::Result<()> {
    let mut client = ClientDispatcher::new(&config.network_config());
    client.connect(&endpoint)?;

    for _ in 0..count {
        let response = client.call(&request).await?;
        if json {
            println!("{}", serde_json::to_string(&response)?);
        } else {
            println!("{}", response);
        }
    }

    client.close().await;
    Ok(())
}
