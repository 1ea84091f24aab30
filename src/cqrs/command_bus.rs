//! Single dispatch point for writes

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{Command, CommandHandler, CommandKind, CommandOutcome};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Registry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
    executions: HashMap<CommandKind, Arc<AtomicU64>>,
}

#[derive(Clone, Default)]
pub struct CommandBus {
    registry: Arc<RwLock<Registry>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler per kind; registering again replaces the previous one
    pub fn register(&self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.handlers.insert(kind, handler).is_some() {
            tracing::debug!("Replaced command handler for {}", kind.as_str());
        }
        registry.executions.entry(kind).or_default();
    }

    pub fn has_handler(&self, kind: CommandKind) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .contains_key(&kind)
    }

    /// Fail unless every command kind has a handler
    pub fn verify(&self) -> AppResult<()> {
        let missing: Vec<&str> = CommandKind::ALL
            .iter()
            .filter(|k| !self.has_handler(**k))
            .map(|k| k.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Configuration(format!(
                "No handler registered for commands: {}",
                missing.join(", ")
            )))
        }
    }

    pub async fn execute(&self, command: impl Into<Command>) -> AppResult<CommandOutcome> {
        let command = command.into();
        let kind = command.kind();

        let (handler, counter) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let handler = registry.handlers.get(&kind).cloned().ok_or_else(|| {
                AppError::Configuration(format!("No handler registered for command {}", kind.as_str()))
            })?;
            (handler, registry.executions.get(&kind).cloned())
        };

        tracing::debug!("Executing command {}", kind.as_str());
        let result = handler.handle(command).await;

        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("cqrs_command_executed_total", "command" => kind.as_str(), "outcome" => outcome)
            .increment(1);

        if let Err(ref e) = result {
            if e.is_infrastructure() {
                tracing::error!("Command {} failed: {}", kind.as_str(), e);
            } else {
                tracing::debug!("Command {} rejected: {}", kind.as_str(), e);
            }
        }
        result
    }

    /// Times a kind has been executed in this process
    pub fn executions(&self, kind: CommandKind) -> u64 {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .executions
            .get(&kind)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}
