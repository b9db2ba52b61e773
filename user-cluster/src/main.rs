use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::warn;

use user_cluster::{
    cli::{Cli, Command},
    primary::{ClusterConfig, Primary},
    worker,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout belongs to the replication protocol in worker mode.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let addr = args.listen.addr();
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            worker::serve_standalone(listener, ctrl_c()).await?;
        }
        Command::Cluster(args) => {
            let primary = Primary::launch(ClusterConfig::from_args(&args)?).await?;
            if let Err(err) = primary.run_until_ctrl_c().await {
                warn!("primary exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Worker(args) => worker::run(args).await?,
    }

    Ok(())
}
