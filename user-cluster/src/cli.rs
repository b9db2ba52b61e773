use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroUsize,
};

use clap::{Args, Parser, Subcommand};

/// Port used when neither `--port` nor `PORT` is given.
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the users API from a single process.
    Serve(ServeArgs),
    /// Run the primary: spawn a worker pool and balance requests across it.
    Cluster(ClusterArgs),
    /// One worker of a cluster, driven by the primary over stdin/stdout.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Address to bind the public listener to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Public port. Workers use the ports directly above it.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl ListenArgs {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub listen: ListenArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    #[command(flatten)]
    pub listen: ListenArgs,

    /// Number of worker processes. Defaults to the number of logical CPUs.
    #[arg(long, env = "WORKERS")]
    pub workers: Option<NonZeroUsize>,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Loopback port this worker serves on.
    #[arg(long)]
    pub port: u16,

    /// Position of this worker in the pool, starting at 1.
    #[arg(long)]
    pub index: usize,
}
