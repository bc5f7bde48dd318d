use shardhub::config::app_env::{self, AppEnv};

#[macro_use]
extern crate ctor;

mod billing;
mod health_check;
mod inbox;
mod support;
mod tasks;
mod users;

/// Setup runs exactly once before any tests run. This allows the test suite to
/// perform any one-time setup.
#[ctor]
fn setup() {
    app_env::force_env(AppEnv::Test);

    let test_db = support::test_database::TestDatabase::new();

    // Dropping the database may not be possible, as it may not yet exist, but this is okay.
    let _ = test_db.drop();

    // Setup will create the database and run all migrations.
    test_db.setup().expect("To setup the database");
}
