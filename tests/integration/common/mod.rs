//! Shared fixtures: in-memory stores wired through the real `Services`

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use shelfshare_server::{
    config::AppConfig,
    cqrs::{AcceptBorrow, CreateBook, RequestBorrow, ReturnBorrow},
    error::AppResult,
    models::{BookView, Borrow, UserShort},
    repository::{MemoryStore, Repository},
    services::{
        assets::{AssetStore, NoAssets},
        email::Mailer,
        fast_store::MemoryFastStore,
        Services,
    },
};

/// Mailer that keeps every message instead of sending it
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> AppResult<()> {
        self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

impl RecordingMailer {
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub fast: MemoryFastStore,
    pub mailer: Arc<RecordingMailer>,
    pub services: Services,
}

impl Harness {
    /// Listeners are awaited so every test observes settled state
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.events.await_listeners = true;
        Self::with_config(config)
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::with_assets(config, Arc::new(NoAssets))
    }

    pub fn with_assets(config: AppConfig, assets: Arc<dyn AssetStore>) -> Self {
        let store = MemoryStore::new();
        let fast = MemoryFastStore::new();
        let mailer = Arc::new(RecordingMailer::default());
        let services = Services::new(
            &config,
            Repository::in_memory(store.clone()),
            Arc::new(fast.clone()),
            Some(mailer.clone() as Arc<dyn Mailer>),
            assets,
        )
        .expect("services wire up");
        Self {
            store,
            fast,
            mailer,
            services,
        }
    }

    pub async fn user(&self, name: &str) -> UserShort {
        let email = format!("{}@example.com", name.to_lowercase());
        self.store.insert_user(name, &email).await
    }

    pub async fn create_book(&self, owner: Uuid, title: &str) -> BookView {
        self.services
            .commands
            .execute(CreateBook {
                actor_id: owner,
                title: title.to_string(),
                authors: vec!["N. K. Jemisin".to_string()],
                description: "A novel".to_string(),
                thumbnail: String::new(),
                categories: vec!["Fantasy".to_string()],
                google_book_id: None,
            })
            .await
            .expect("create book")
            .into_book()
            .unwrap()
    }

    pub async fn request(&self, borrower: Uuid, book: Uuid, loan_days: u32) -> AppResult<Borrow> {
        let command = RequestBorrow {
            loan_days,
            ..RequestBorrow::new(borrower, book)
        };
        self.services.commands.execute(command).await?.into_borrow()
    }

    pub async fn accept(&self, owner: Uuid, borrow: Uuid) -> AppResult<Borrow> {
        self.services
            .commands
            .execute(AcceptBorrow {
                actor_id: owner,
                borrow_id: borrow,
            })
            .await?
            .into_borrow()
    }

    pub async fn return_borrow(&self, borrower: Uuid, borrow: Uuid) -> AppResult<Borrow> {
        self.services
            .commands
            .execute(ReturnBorrow {
                actor_id: borrower,
                borrow_id: borrow,
            })
            .await?
            .into_borrow()
    }

    pub async fn durable_book(&self, id: Uuid) -> Option<shelfshare_server::models::Book> {
        self.store.all_books().await.into_iter().find(|b| b.id == id)
    }
}
