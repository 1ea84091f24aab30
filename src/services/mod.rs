//! Infrastructure services and the wiring that connects them

pub mod assets;
pub mod cache;
pub mod email;
pub mod fast_store;
pub mod read_model;
pub mod redis;
pub mod reminders;

use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::{
    config::AppConfig,
    cqrs::{
        commands::{BookCommandHandler, BorrowCommandHandler},
        queries::{BookQueryHandler, BorrowQueryHandler},
        CommandBus, CommandHandler, CommandKind, QueryBus, QueryHandler, QueryKind,
    },
    error::AppResult,
    events::{
        listeners::{
            BorrowingResponder, CacheInvalidationListener, CascadeCleanupListener, EmailListener,
            NotificationListener, ReadModelSyncListener,
        },
        EventBus,
    },
    repository::Repository,
};

use assets::{AssetStore, CloudinaryAssets, NoAssets};
use cache::QueryCache;
use email::{EmailService, Mailer};
use fast_store::FastStore;
use read_model::BookReadModel;
use reminders::ReminderService;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub repository: Repository,
    pub fast_store: Arc<dyn FastStore>,
    pub cache: QueryCache,
    pub read_model: BookReadModel,
    pub events: EventBus,
    pub commands: CommandBus,
    pub queries: QueryBus,
    pub reminders: ReminderService,
}

impl Services {
    /// Wire every service against the given stores. `mailer` is `None` when
    /// outbound email is disabled.
    pub fn new(
        config: &AppConfig,
        repository: Repository,
        fast_store: Arc<dyn FastStore>,
        mailer: Option<Arc<dyn Mailer>>,
        assets: Arc<dyn AssetStore>,
    ) -> AppResult<Self> {
        let cache = QueryCache::new(fast_store.clone(), config.cache.enabled);
        let read_model = BookReadModel::new(
            fast_store.clone(),
            config.cache.read_model_ttl_secs,
            config.cache.read_model_search_ttl_secs,
        );
        let events = EventBus::new(config.events.await_listeners);

        // Projection sync first so later listeners observe a fresh read model
        Arc::new(ReadModelSyncListener::new(read_model.clone(), repository.books.clone())).subscribe(&events);
        Arc::new(CacheInvalidationListener::new(cache.clone())).subscribe(&events);
        Arc::new(NotificationListener::new(
            repository.notifications.clone(),
            repository.users.clone(),
        ))
        .subscribe(&events);
        Arc::new(CascadeCleanupListener::new(
            repository.borrows.clone(),
            repository.notifications.clone(),
        ))
        .subscribe(&events);
        Arc::new(BorrowingResponder::new(repository.borrows.clone(), events.clone())).subscribe(&events);
        match mailer {
            Some(mailer) => {
                Arc::new(EmailListener::new(mailer, repository.users.clone())).subscribe(&events);
            }
            None => tracing::info!("Email disabled, borrow emails will not be sent"),
        }

        let commands = CommandBus::new();
        let books: Arc<dyn CommandHandler> = Arc::new(BookCommandHandler::new(
            repository.clone(),
            events.clone(),
            cache.clone(),
            assets,
            config.events.validation_timeout(),
            config.events.delete_validation,
        ));
        let borrows: Arc<dyn CommandHandler> =
            Arc::new(BorrowCommandHandler::new(repository.clone(), events.clone(), cache.clone()));
        for kind in CommandKind::ALL {
            let handler = match kind {
                CommandKind::CreateBook | CommandKind::UpdateBook | CommandKind::DeleteBook => books.clone(),
                CommandKind::RequestBorrow
                | CommandKind::AcceptBorrow
                | CommandKind::RejectBorrow
                | CommandKind::ReturnBorrow
                | CommandKind::CancelBorrow => borrows.clone(),
            };
            commands.register(kind, handler);
        }
        commands.verify()?;

        let queries = QueryBus::new();
        let book_reads: Arc<dyn QueryHandler> = Arc::new(BookQueryHandler::new(
            repository.clone(),
            read_model.clone(),
            cache.clone(),
            config.cache.clone(),
        ));
        let borrow_reads: Arc<dyn QueryHandler> = Arc::new(BorrowQueryHandler::new(
            repository.clone(),
            cache.clone(),
            config.cache.clone(),
        ));
        for kind in QueryKind::ALL {
            let handler = match kind {
                QueryKind::GetAllBooks | QueryKind::GetBookById | QueryKind::GetMyBooks | QueryKind::SearchBooks => {
                    book_reads.clone()
                }
                QueryKind::GetBorrowById
                | QueryKind::GetBorrowerRequests
                | QueryKind::GetActiveBorrows
                | QueryKind::GetPendingRequests => borrow_reads.clone(),
            };
            queries.register(kind, handler);
        }
        queries.verify()?;

        let reminders = ReminderService::new(repository.clone(), config.reminders.due_soon_days);

        Ok(Self {
            repository,
            fast_store,
            cache,
            read_model,
            events,
            commands,
            queries,
            reminders,
        })
    }

    /// Production wiring: PostgreSQL, Redis, SMTP and Cloudinary from config
    pub async fn connect(config: &AppConfig, pool: Pool<Postgres>) -> AppResult<Self> {
        let redis = redis::RedisService::new(&config.redis.url).await?;
        tracing::info!("Connected to Redis");

        let email = EmailService::new(config.email.clone());
        let mailer: Option<Arc<dyn Mailer>> = if email.is_enabled() {
            Some(Arc::new(email))
        } else {
            None
        };

        let assets: Arc<dyn AssetStore> = match CloudinaryAssets::from_config(&config.assets) {
            Some(cloudinary) => Arc::new(cloudinary),
            None => {
                tracing::info!("No asset store configured, thumbnails will not be deleted");
                Arc::new(NoAssets)
            }
        };

        Self::new(config, Repository::postgres(pool), Arc::new(redis), mailer, assets)
    }

    /// Populate the projection from the durable store. Returns the number of
    /// books projected.
    pub async fn initial_sync(&self) -> AppResult<usize> {
        let count = self.read_model.rebuild_from_store(self.repository.books.as_ref()).await?;
        tracing::info!("Initial read model sync: {} books", count);
        Ok(count)
    }
}
