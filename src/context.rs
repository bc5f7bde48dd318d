use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::Cache;
use crate::sh::Sh;
use crate::wch::WorkerRegistry;

struct Inner {
    db: PgPool,
    cache: Cache,
    wch: WorkerRegistry,
    sh: Sh,
}

/// Shared application state handed to every request/channel handler.
/// Cheap to clone (an `Arc` around the actual state) so each worker and
/// observer connection task can hold its own copy.
#[derive(Clone)]
pub struct AppContext(Arc<Inner>);

impl AppContext {
    pub fn new(db: PgPool, cache: Cache) -> Self {
        Self(Arc::new(Inner {
            db,
            cache,
            wch: WorkerRegistry::new(),
            sh: Sh::new(),
        }))
    }

    pub fn db(&self) -> &PgPool {
        &self.0.db
    }

    pub fn cache(&self) -> &Cache {
        &self.0.cache
    }

    pub fn wch(&self) -> &WorkerRegistry {
        &self.0.wch
    }

    pub fn sh(&self) -> &Sh {
        &self.0.sh
    }
}
