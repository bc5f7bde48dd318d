use std::path::PathBuf;

use tokio::runtime::Runtime;

pub mod seed;
pub mod serve;
pub mod setup;

#[derive(clap::Args, Debug)]
pub struct ShardHubArgs {
    #[clap(subcommand)]
    pub cmd: Cmd,
}

#[derive(Debug, clap::Subcommand)]
pub enum Cmd {
    /// Runs the control plane server.
    Serve(serve::Args),
    /// Creates the database and runs migrations.
    Setup(setup::Args),
    /// Seeds the database with data useful for local development.
    Seed(seed::Args),
}

pub fn run(args: ShardHubArgs) -> anyhow::Result<()> {
    match args.cmd {
        Cmd::Serve(args) => serve::run(args),
        Cmd::Setup(args) => setup::run(args),
        Cmd::Seed(args) => seed::run(args),
    }
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Load application configuration from this directory instead of `./config`.
    #[clap(short, long = "config")]
    pub config_path: Option<PathBuf>,
}

pub fn async_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}
