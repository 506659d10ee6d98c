//! Shared application context
//!
//! Holds the store pool and the external collaborators every collateral
//! phase may need. Cheap to clone; handed to axum as state.

use std::sync::Arc;

use sqlx::PgPool;

use crate::external::container::ContainerBackend;
use crate::external::{RunCleanup, TaskDispatcher};

#[derive(Clone)]
pub struct AppContext {
    pub db: PgPool,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub run_cleanup: Arc<dyn RunCleanup>,
    pub builder: Arc<dyn ContainerBackend>,
}
