//! Shelfshare engine
//!
//! Book lending marketplace core: commands write to PostgreSQL and publish
//! domain events; listeners keep a denormalized Redis read model and the
//! query-result cache in step; queries read the projection first and fall
//! back to the durable store.

use std::sync::Arc;

pub mod config;
pub mod cqrs;
pub mod error;
pub mod events;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared with whatever front end drives the engine
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
