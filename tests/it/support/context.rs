use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use serde::Serialize;
use sqlx::PgPool;
use tower::util::ServiceExt;

use shardhub::cache::Cache;
use shardhub::config;
use shardhub::context::AppContext;
use shardhub::startup;

use crate::support::test_database;

/// Creates a `TestContext` with the appropriate test name prefilled.
macro_rules! test_context {
    () => {
        crate::support::context::TestContext::new(
            crate::support::test_introspection::function_name!(),
        )
        .await
    };
}

pub(crate) use test_context;

pub struct TestContext {
    pub db: PgPool,
    pub app: Router,
}

impl TestContext {
    pub async fn new(test_name: &'static str) -> Self {
        let db = test_database::test_db_pool(test_name)
            .await
            .expect("Failed to acquire a database connection");
        let cache = Cache::memory_only(&config::settings().cache);
        let ctx = AppContext::new(db.clone(), cache);
        let app = startup::app(ctx);

        Self { db, app }
    }

    pub async fn get(&self, path: &str) -> Response {
        let req = Request::builder()
            .method(axum::http::Method::GET)
            .uri(path)
            .body(Body::empty())
            .expect("to build GET request");

        self.app
            .clone()
            .oneshot(req)
            .await
            .expect("axum to always respond")
    }

    pub async fn post<P>(&self, path: &str, payload: &P) -> Response
    where
        P: Serialize + ?Sized,
    {
        let req = Request::builder()
            .method(axum::http::Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .body(Body::from(
                serde_json::to_vec(payload).expect("to serialize request body"),
            ))
            .expect("to build POST request");

        self.app
            .clone()
            .oneshot(req)
            .await
            .expect("axum to always respond")
    }

    pub fn db(&self) -> &PgPool {
        &self.db
    }
}
