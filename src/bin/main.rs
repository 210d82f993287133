use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use cluster_mcp::{McpServer, ServerSettings, TransportMode, create_app, tools};

// rmcp imports for MCP stdio server mode
use rmcp::service::ServiceExt;
use rmcp::transport::stdio;

#[derive(Parser)]
#[command(name = "cluster-mcp")]
#[command(about = "MCP server exposing Kubernetes, Argo CD, Helm, Prometheus and Istio tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for use in mcp.json)
    McpStdio {
        #[command(flatten)]
        settings: ServerSettings,
    },
    /// Run as an MCP HTTP server
    McpHttp {
        /// Bind address, e.g. 0.0.0.0:3942
        #[arg(long, default_value = "127.0.0.1:3942")]
        bind: String,
        #[command(flatten)]
        settings: ServerSettings,
    },
    /// Print the composed tool surface and exit
    Tools {
        /// Show the surface exposed over HTTP instead of stdio
        #[arg(long, default_value_t = false)]
        http: bool,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
        #[command(flatten)]
        settings: ServerSettings,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the stdio transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cluster_mcp=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::McpStdio { settings } => {
            info!("Starting MCP stdio server (rmcp)");

            let app = create_app(&settings, TransportMode::Stdio).await?;
            let cancel = CancellationToken::new();
            let watcher = app.watcher.clone().spawn(cancel.clone());

            let server = McpServer::connect(app.ctx)?;
            let service = server
                .serve(stdio())
                .await
                .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

            // Block until the MCP session ends.
            service.waiting().await?;
            cancel.cancel();
            watcher.await?;
            info!("MCP stdio server session ended");
        }
        Commands::McpHttp { bind, settings } => {
            info!("Starting MCP HTTP server (rmcp) on {}", bind);

            let app = create_app(&settings, TransportMode::Http).await?;
            let cancel = CancellationToken::new();
            let watcher = app.watcher.clone().spawn(cancel.clone());

            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutdown requested");
                    }
                    cancel.cancel();
                });
            }

            cluster_mcp::start_mcp_http(app.ctx, &bind, cancel.clone()).await?;
            cancel.cancel();
            watcher.await?;
        }
        Commands::Tools { http, json, settings } => {
            let transport = if http { TransportMode::Http } else { TransportMode::Stdio };
            let table = tools::compose(&settings.areas()?, &settings.compose_options(transport))?;
            let summaries = table.summaries();

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(());
            }

            println!("{:<32} {:<14} {:<10} TITLE", "TOOL", "AREA", "FLAGS");
            println!("{}", "-".repeat(80));
            for tool in &summaries {
                let mut flags = Vec::new();
                if tool.mutating {
                    flags.push("write");
                }
                if tool.local_only {
                    flags.push("local");
                }
                println!(
                    "{:<32} {:<14} {:<10} {}",
                    tool.name,
                    tool.area,
                    flags.join(","),
                    tool.title.as_deref().unwrap_or("-")
                );
            }
            println!();
            println!("{} tools", summaries.len());
        }
    }

    Ok(())
}
