//! Bus listeners: projection sync, cache invalidation, notifications,
//! email, cascade cleanup and the active-borrow responder

pub mod borrowing;
pub mod cache_invalidation;
pub mod cascade;
pub mod email;
pub mod notifications;
pub mod read_model_sync;

pub use borrowing::BorrowingResponder;
pub use cache_invalidation::CacheInvalidationListener;
pub use cascade::CascadeCleanupListener;
pub use email::EmailListener;
pub use notifications::NotificationListener;
pub use read_model_sync::ReadModelSyncListener;

use std::sync::Arc;

use super::{EventBus, EventHandler, Topic};

/// Subscribe one handler to several topics
pub(crate) fn subscribe(bus: &EventBus, handler: Arc<dyn EventHandler>, topics: &[Topic]) {
    for topic in topics {
        bus.on(*topic, handler.clone());
    }
}
