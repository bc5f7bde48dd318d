use clap::Parser;
use cli_common::LogArgs;

#[derive(Debug, Parser)]
#[clap(author, name = "shardhub", version = env!("CARGO_PKG_VERSION"), about)]
struct Cli {
    #[clap(flatten)]
    log_args: LogArgs,
    #[clap(flatten)]
    shardhub: shardhub::cmd::ShardHubArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli_common::init_logging(&cli.log_args);

    shardhub::cmd::run(cli.shardhub)
}
