use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vrm_mcp_runtime::{McpCommands, VrmArgs, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "vrm-mcp",
    version,
    about = "VRM MCP server: read-only Victron VRM monitoring tools over stdio"
)]
struct Cli {
    #[command(flatten)]
    vrm: VrmArgs,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vrm_mcp=info,vrm_mcp_runtime=info".into()),
        )
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let code = run_mcp(cli.vrm, cli.command).await;
    std::process::exit(code);
}
