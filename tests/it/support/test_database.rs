use sqlx::migrate::MigrateDatabase;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use sqlx::PgConnection;
use sqlx::PgPool;
use sqlx::Postgres;

use shardhub::config::{self, DatabaseSettings};
use shardhub::startup;

static TEMPLATE_DATABASE: &str = "shardhub_test";

/// Creates a copy of the test database for this specific test. This provides
/// an isolated test database shared by the test code and the server under
/// test.
///
/// **Important**: This should only be invoked at the beginning of a test,
/// from the top level. Invoking it from elsewhere will generate a test
/// database with an unexpected name.
pub async fn test_db_pool(test_db_name: &str) -> anyhow::Result<PgPool> {
    let test_db_settings = create_test_db(&config::settings().database, test_db_name).await?;
    let test_db = startup::connect_to_postgres(&test_db_settings).await;

    Ok(test_db)
}

/// Creates a sandboxed test database for this specific test by cloning the
/// "shardhub_test" template database. Returns new `DatabaseSettings`
/// configured to connect to it.
async fn create_test_db(
    db_settings: &DatabaseSettings,
    new_test_db: &str,
) -> anyhow::Result<DatabaseSettings> {
    // Sanitize the name: the full module path of the test name includes `:`.
    let new_test_db = new_test_db.replace("::", "__").to_lowercase();

    let mut conn = maintenance_connection(db_settings).await?;

    sqlx::query(&format!("DROP DATABASE IF EXISTS {new_test_db}"))
        .execute(&mut conn)
        .await?;

    sqlx::query(&format!(
        "CREATE DATABASE {} WITH TEMPLATE {} OWNER {}",
        new_test_db, TEMPLATE_DATABASE, &db_settings.username
    ))
    .execute(&mut conn)
    .await?;

    Ok(DatabaseSettings {
        db_name: new_test_db,
        ..db_settings.clone()
    })
}

/// One-time setup/teardown of the "shardhub_test" template database, driven
/// by the `#[ctor]` hook in `main.rs`. Every per-test database is cloned from
/// this template, so individual tests never pay migration cost.
pub struct TestDatabase {
    settings: DatabaseSettings,
}

impl TestDatabase {
    pub fn new() -> Self {
        let settings = config::load_settings(None)
            .expect("to load test config")
            .database
            .clone();
        Self {
            settings: DatabaseSettings {
                db_name: TEMPLATE_DATABASE.to_owned(),
                ..settings
            },
        }
    }

    pub fn drop(&self) -> anyhow::Result<()> {
        block_on(async {
            let url = self.settings.url();
            if Postgres::database_exists(&url).await? {
                Postgres::drop_database(&url).await?;
            }
            Ok(())
        })
    }

    /// Creates a blank "shardhub_test" database and runs all migrations.
    pub fn setup(&self) -> anyhow::Result<()> {
        block_on(reset(&self.settings))
    }
}

async fn reset(db_settings: &DatabaseSettings) -> anyhow::Result<()> {
    // A workspace package's tests always run from the package root, so this
    // finds the migrations alongside it.
    let root_dir = std::env::current_dir()?;
    let url = db_settings.url();

    if Postgres::database_exists(&url).await? {
        Postgres::drop_database(&url).await?;
    }
    Postgres::create_database(&url).await?;

    let mut conn = maintenance_connection(db_settings).await?;
    Migrator::new(root_dir.join("./migrations"))
        .await?
        .run(&mut conn)
        .await?;

    Ok(())
}

/// Connects to Postgres outside of a pool.
async fn maintenance_connection(
    db_settings: &DatabaseSettings,
) -> Result<PgConnection, sqlx::Error> {
    PgConnectOptions::new()
        .host(&db_settings.host)
        .port(db_settings.port)
        .username(&db_settings.username)
        .password(&db_settings.password)
        .database(&db_settings.db_name)
        .connect()
        .await
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .expect("to build a single-threaded test runtime")
        .block_on(fut)
}
