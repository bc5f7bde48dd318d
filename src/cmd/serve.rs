use std::net::TcpListener;
use std::time::Duration;

use crate::cache::Cache;
use crate::cmd::{async_runtime, ConfigArgs};
use crate::config;
use crate::context::AppContext;
use crate::{sd, startup};

#[derive(clap::Args, Debug)]
pub struct Args {
    #[clap(flatten)]
    config: ConfigArgs,
}

/// Runs the control plane server.
pub fn run(args: Args) -> anyhow::Result<()> {
    let settings = config::load_settings(args.config.config_path)?;
    let runtime = async_runtime()?;
    let listener = TcpListener::bind(settings.application.address())?;

    runtime.block_on(serve(listener))
}

async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    let settings = config::settings();
    let db = startup::connect_to_postgres(&settings.database).await;
    let cache = Cache::connect(&settings.cache).await;
    let ctx = AppContext::new(db, cache);

    spawn_stale_shard_reclaim(ctx.clone());

    startup::run(listener, ctx).await
}

/// Periodic counterpart to the opportunistic reclaim that piggybacks on
/// task creation (§4.2, §9): catches stale shards from tasks that aren't
/// receiving new dispatch triggers.
fn spawn_stale_shard_reclaim(ctx: AppContext) {
    let interval = Duration::from_secs(config::settings().dispatch.reclaim_interval_seconds);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sd::reclaim_stale(&ctx).await;
        }
    });
}
