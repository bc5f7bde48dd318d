use std::net::TcpListener;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::DatabaseSettings;
use crate::context::AppContext;
use crate::cors::cors_layer;
use crate::routes::routes;
use crate::shutdown;

/// Assembles the full router with its middleware stack bound to `ctx`. Used
/// by `run` below and by the integration test harness, which drives it
/// directly with `tower::ServiceExt::oneshot` instead of binding a socket.
pub fn app(ctx: AppContext) -> Router {
    routes().with_state(ctx).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(ConcurrencyLimitLayer::new(256))
            .layer(cors_layer()),
    )
}

pub async fn run(listener: TcpListener, ctx: AppContext) -> anyhow::Result<()> {
    let app = app(ctx);

    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    Ok(())
}

pub async fn connect_to_postgres(db_settings: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .min_connections(1)
        .connect(&db_settings.url())
        .await
        .expect("failed to connect to postgres")
}
