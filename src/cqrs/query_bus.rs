//! Single dispatch point for reads

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{Query, QueryHandler, QueryKind, QueryOutcome};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Registry {
    handlers: HashMap<QueryKind, Arc<dyn QueryHandler>>,
    executions: HashMap<QueryKind, Arc<AtomicU64>>,
}

#[derive(Clone, Default)]
pub struct QueryBus {
    registry: Arc<RwLock<Registry>>,
}

impl QueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler per kind; registering again replaces the previous one
    pub fn register(&self, kind: QueryKind, handler: Arc<dyn QueryHandler>) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.handlers.insert(kind, handler).is_some() {
            tracing::debug!("Replaced query handler for {}", kind.as_str());
        }
        registry.executions.entry(kind).or_default();
    }

    pub fn has_handler(&self, kind: QueryKind) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .contains_key(&kind)
    }

    /// Fail unless every query kind has a handler
    pub fn verify(&self) -> AppResult<()> {
        let missing: Vec<&str> = QueryKind::ALL
            .iter()
            .filter(|k| !self.has_handler(**k))
            .map(|k| k.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Configuration(format!(
                "No handler registered for queries: {}",
                missing.join(", ")
            )))
        }
    }

    pub async fn execute(&self, query: impl Into<Query>) -> AppResult<QueryOutcome> {
        let query = query.into();
        let kind = query.kind();

        let (handler, counter) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let handler = registry.handlers.get(&kind).cloned().ok_or_else(|| {
                AppError::Configuration(format!("No handler registered for query {}", kind.as_str()))
            })?;
            (handler, registry.executions.get(&kind).cloned())
        };

        tracing::debug!("Executing query {}", kind.as_str());
        let result = handler.handle(query).await;

        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("cqrs_query_executed_total", "query" => kind.as_str(), "outcome" => outcome)
            .increment(1);

        if let Err(ref e) = result {
            if e.is_infrastructure() {
                tracing::error!("Query {} failed: {}", kind.as_str(), e);
            } else {
                tracing::debug!("Query {} rejected: {}", kind.as_str(), e);
            }
        }
        result
    }

    /// Times a kind has been executed in this process
    pub fn executions(&self, kind: QueryKind) -> u64 {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .executions
            .get(&kind)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}
