//! Seed some data into the development database. Useful for getting started
//! quickly after cloning or after a database reset.
use sqlx::PgPool;

use crate::cmd::{async_runtime, ConfigArgs};
use crate::config;
use crate::models::id::Id;
use crate::models::rates::Rates;
use crate::repo;
use crate::startup;

#[derive(clap::Args, Debug)]
pub struct Args {
    #[clap(flatten)]
    config: ConfigArgs,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let settings = config::load_settings(args.config.config_path)?;
    let runtime = async_runtime()?;

    runtime.block_on(async move {
        let db = startup::connect_to_postgres(&settings.database).await;
        seed(&db).await
    })
}

async fn seed(db: &PgPool) -> anyhow::Result<()> {
    repo::rates::set_global_rates(
        db,
        Rates {
            price_success: 0.01,
            price_failure: 0.0,
        },
    )
    .await?;

    let demo_user: Id = "demo-user".into();
    repo::users::ensure_user(db, &demo_user).await?;

    let demo_server: Id = "demo-server".into();
    repo::servers::upsert_registration(db, &demo_server, "Demo Worker", None).await?;

    tracing::info!("seeded global rates, demo user, and demo server");
    Ok(())
}
