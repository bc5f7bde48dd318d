/// Prints the database url gathered from the config settings files.
///
/// Useful for:
/// - export DATABASE_URL=$(cargo run --bin db_url)
///   or
/// - sqlx database setup --database-url $(cargo run --bin db_url)
fn main() {
    let settings = shardhub::config::load_settings(None).expect("to load config");
    print!("{}", settings.database.url());
}
