//! Book write handlers: create, update, delete

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;
use validator::Validate;

use super::{CreateBook, DeleteBook, UpdateBook};
use crate::{
    config::DeleteValidationPolicy,
    cqrs::{misrouted, Command, CommandHandler, CommandOutcome},
    error::{AppError, AppResult},
    events::{DomainEvent, EventBus, Topic},
    models::{BookView, NewBook},
    repository::Repository,
    services::{assets::AssetStore, cache::QueryCache},
};

pub struct BookCommandHandler {
    repository: Repository,
    bus: EventBus,
    cache: QueryCache,
    assets: Arc<dyn AssetStore>,
    validation_timeout: Duration,
    delete_validation: DeleteValidationPolicy,
}

impl BookCommandHandler {
    pub fn new(
        repository: Repository,
        bus: EventBus,
        cache: QueryCache,
        assets: Arc<dyn AssetStore>,
        validation_timeout: Duration,
        delete_validation: DeleteValidationPolicy,
    ) -> Self {
        Self {
            repository,
            bus,
            cache,
            assets,
            validation_timeout,
            delete_validation,
        }
    }

    async fn create(&self, command: CreateBook) -> AppResult<BookView> {
        let command = command.normalized();
        command.validate()?;

        let owner = self
            .repository
            .users
            .find_by_id(command.actor_id)
            .await?
            .ok_or_else(|| AppError::Validation(format!("Owner {} does not exist", command.actor_id)))?;

        let book = self
            .repository
            .books
            .create(NewBook {
                title: command.title,
                authors: command.authors,
                description: command.description,
                thumbnail: command.thumbnail,
                owner_id: owner.id,
                available: true,
                categories: command.categories,
                google_book_id: command.google_book_id,
            })
            .await?;

        let view = BookView::from_parts(book, Some(owner));
        tracing::info!("Book created: {} ({})", view.title, view.id);

        self.bus.emit(DomainEvent::BookCreated { book: view.clone() }).await;
        self.cache.invalidate_book(None).await;
        Ok(view)
    }

    async fn update(&self, command: UpdateBook) -> AppResult<BookView> {
        let command = command.normalized();
        command.validate()?;

        let patch = command.patch();
        if patch.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }

        let book = self
            .repository
            .books
            .find_by_id(command.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", command.book_id)))?;

        // Availability alone may be flipped by anyone (borrow lifecycle); content is owner-only
        if patch.touches_content() && book.owner_id != command.actor_id {
            return Err(AppError::Authorization("Only the owner can edit this book".to_string()));
        }

        let updated = self
            .repository
            .books
            .update(book.id, &patch)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book.id)))?;

        let view = match self.repository.books.find_view(book.id).await? {
            Some(view) => view,
            None => BookView::from_parts(updated, None),
        };
        tracing::info!("Book updated: {} ({})", view.title, view.id);

        self.bus
            .emit(DomainEvent::BookUpdated {
                book: view.clone(),
                content_changed: patch.touches_content(),
            })
            .await;
        self.cache.invalidate_book(Some(book.id)).await;
        Ok(view)
    }

    async fn delete(&self, command: DeleteBook) -> AppResult<Uuid> {
        command.validate()?;

        let book = self
            .repository
            .books
            .find_by_id(command.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", command.book_id)))?;

        if book.owner_id != command.actor_id {
            return Err(AppError::Authorization("Only the owner can delete this book".to_string()));
        }

        self.ensure_no_active_borrows(book.id).await?;

        if !book.thumbnail.is_empty() {
            if let Err(e) = self.assets.delete(&book.thumbnail).await {
                tracing::warn!("Failed to delete thumbnail of book {}: {}", book.id, e);
            }
        }

        if !self.repository.books.delete(book.id).await? {
            return Err(AppError::NotFound(format!("Book {} not found", book.id)));
        }
        tracing::info!("Book deleted: {} ({})", book.title, book.id);

        self.bus
            .emit(DomainEvent::BookDeleted {
                book_id: book.id,
                owner_id: book.owner_id,
                title: book.title,
            })
            .await;
        self.cache.invalidate_book(Some(book.id)).await;
        Ok(book.id)
    }

    /// Ask the borrowing side over the bus whether the book has pending or
    /// accepted borrows. No answer in time falls back to the configured policy.
    async fn ensure_no_active_borrows(&self, book_id: Uuid) -> AppResult<()> {
        let request = DomainEvent::CheckActiveRequest {
            correlation_id: Uuid::new_v4(),
            book_id,
        };
        let response = self
            .bus
            .request(request, Topic::BorrowCheckActiveResponse, self.validation_timeout)
            .await;

        match response {
            Some(DomainEvent::CheckActiveResponse { error: Some(error), .. }) => Err(AppError::Internal(
                format!("Active borrow check failed for book {}: {}", book_id, error),
            )),
            Some(DomainEvent::CheckActiveResponse { active, .. }) if active > 0 => Err(AppError::Conflict(
                format!("Book {} has {} active borrow(s)", book_id, active),
            )),
            Some(_) => Ok(()),
            None => match self.delete_validation {
                DeleteValidationPolicy::FailOpen => {
                    tracing::warn!(
                        "Active borrow check for book {} timed out, deleting anyway",
                        book_id
                    );
                    Ok(())
                }
                DeleteValidationPolicy::FailClosed => Err(AppError::Internal(format!(
                    "Active borrow check for book {} timed out",
                    book_id
                ))),
            },
        }
    }
}

#[async_trait]
impl CommandHandler for BookCommandHandler {
    async fn handle(&self, command: Command) -> AppResult<CommandOutcome> {
        match command {
            Command::CreateBook(c) => self.create(c).await.map(CommandOutcome::Book),
            Command::UpdateBook(c) => self.update(c).await.map(CommandOutcome::Book),
            Command::DeleteBook(c) => self.delete(c).await.map(CommandOutcome::Deleted),
            other => Err(misrouted("BookCommandHandler", other.kind().as_str())),
        }
    }
}
