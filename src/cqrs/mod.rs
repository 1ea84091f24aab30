//! Command/query dispatch
//!
//! Writes go through the [`CommandBus`] against the durable store and publish
//! events; reads go through the [`QueryBus`] and are served from the read
//! model first. Both sets are closed enums so `verify()` can prove at startup
//! that every kind has a handler.

pub mod command_bus;
pub mod commands;
pub mod queries;
pub mod query_bus;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{BookView, Borrow, Page},
};

pub use command_bus::CommandBus;
pub use commands::{
    AcceptBorrow, CancelBorrow, CreateBook, DeleteBook, RejectBorrow, RequestBorrow, ReturnBorrow,
    UpdateBook,
};
pub use queries::{
    GetActiveBorrows, GetAllBooks, GetBookById, GetBorrowById, GetBorrowerRequests, GetMyBooks,
    GetPendingRequests, SearchBooks,
};
pub use query_bus::QueryBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateBook,
    UpdateBook,
    DeleteBook,
    RequestBorrow,
    AcceptBorrow,
    RejectBorrow,
    ReturnBorrow,
    CancelBorrow,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::CreateBook,
        CommandKind::UpdateBook,
        CommandKind::DeleteBook,
        CommandKind::RequestBorrow,
        CommandKind::AcceptBorrow,
        CommandKind::RejectBorrow,
        CommandKind::ReturnBorrow,
        CommandKind::CancelBorrow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CreateBook => "CreateBook",
            CommandKind::UpdateBook => "UpdateBook",
            CommandKind::DeleteBook => "DeleteBook",
            CommandKind::RequestBorrow => "RequestBorrow",
            CommandKind::AcceptBorrow => "AcceptBorrow",
            CommandKind::RejectBorrow => "RejectBorrow",
            CommandKind::ReturnBorrow => "ReturnBorrow",
            CommandKind::CancelBorrow => "CancelBorrow",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    CreateBook(CreateBook),
    UpdateBook(UpdateBook),
    DeleteBook(DeleteBook),
    RequestBorrow(RequestBorrow),
    AcceptBorrow(AcceptBorrow),
    RejectBorrow(RejectBorrow),
    ReturnBorrow(ReturnBorrow),
    CancelBorrow(CancelBorrow),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CreateBook(_) => CommandKind::CreateBook,
            Command::UpdateBook(_) => CommandKind::UpdateBook,
            Command::DeleteBook(_) => CommandKind::DeleteBook,
            Command::RequestBorrow(_) => CommandKind::RequestBorrow,
            Command::AcceptBorrow(_) => CommandKind::AcceptBorrow,
            Command::RejectBorrow(_) => CommandKind::RejectBorrow,
            Command::ReturnBorrow(_) => CommandKind::ReturnBorrow,
            Command::CancelBorrow(_) => CommandKind::CancelBorrow,
        }
    }
}

macro_rules! command_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Command {
                fn from(command: $variant) -> Self {
                    Command::$variant(command)
                }
            }
        )*
    };
}

command_from!(
    CreateBook,
    UpdateBook,
    DeleteBook,
    RequestBorrow,
    AcceptBorrow,
    RejectBorrow,
    ReturnBorrow,
    CancelBorrow,
);

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Book(BookView),
    Borrow(Borrow),
    Deleted(Uuid),
}

impl CommandOutcome {
    pub fn into_book(self) -> AppResult<BookView> {
        match self {
            CommandOutcome::Book(book) => Ok(book),
            other => Err(unexpected("book", &other)),
        }
    }

    pub fn into_borrow(self) -> AppResult<Borrow> {
        match self {
            CommandOutcome::Borrow(borrow) => Ok(borrow),
            other => Err(unexpected("borrow", &other)),
        }
    }

    pub fn into_deleted(self) -> AppResult<Uuid> {
        match self {
            CommandOutcome::Deleted(id) => Ok(id),
            other => Err(unexpected("deletion", &other)),
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> AppResult<CommandOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    GetAllBooks,
    GetBookById,
    GetMyBooks,
    SearchBooks,
    GetBorrowById,
    GetBorrowerRequests,
    GetActiveBorrows,
    GetPendingRequests,
}

impl QueryKind {
    pub const ALL: [QueryKind; 8] = [
        QueryKind::GetAllBooks,
        QueryKind::GetBookById,
        QueryKind::GetMyBooks,
        QueryKind::SearchBooks,
        QueryKind::GetBorrowById,
        QueryKind::GetBorrowerRequests,
        QueryKind::GetActiveBorrows,
        QueryKind::GetPendingRequests,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::GetAllBooks => "GetAllBooks",
            QueryKind::GetBookById => "GetBookById",
            QueryKind::GetMyBooks => "GetMyBooks",
            QueryKind::SearchBooks => "SearchBooks",
            QueryKind::GetBorrowById => "GetBorrowById",
            QueryKind::GetBorrowerRequests => "GetBorrowerRequests",
            QueryKind::GetActiveBorrows => "GetActiveBorrows",
            QueryKind::GetPendingRequests => "GetPendingRequests",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Query {
    GetAllBooks(GetAllBooks),
    GetBookById(GetBookById),
    GetMyBooks(GetMyBooks),
    SearchBooks(SearchBooks),
    GetBorrowById(GetBorrowById),
    GetBorrowerRequests(GetBorrowerRequests),
    GetActiveBorrows(GetActiveBorrows),
    GetPendingRequests(GetPendingRequests),
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::GetAllBooks(_) => QueryKind::GetAllBooks,
            Query::GetBookById(_) => QueryKind::GetBookById,
            Query::GetMyBooks(_) => QueryKind::GetMyBooks,
            Query::SearchBooks(_) => QueryKind::SearchBooks,
            Query::GetBorrowById(_) => QueryKind::GetBorrowById,
            Query::GetBorrowerRequests(_) => QueryKind::GetBorrowerRequests,
            Query::GetActiveBorrows(_) => QueryKind::GetActiveBorrows,
            Query::GetPendingRequests(_) => QueryKind::GetPendingRequests,
        }
    }
}

macro_rules! query_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Query {
                fn from(query: $variant) -> Self {
                    Query::$variant(query)
                }
            }
        )*
    };
}

query_from!(
    GetAllBooks,
    GetBookById,
    GetMyBooks,
    SearchBooks,
    GetBorrowById,
    GetBorrowerRequests,
    GetActiveBorrows,
    GetPendingRequests,
);

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Book(BookView),
    Books(Page<BookView>),
    Borrow(Borrow),
    Borrows(Vec<Borrow>),
}

impl QueryOutcome {
    pub fn into_book(self) -> AppResult<BookView> {
        match self {
            QueryOutcome::Book(book) => Ok(book),
            other => Err(unexpected("book", &other)),
        }
    }

    pub fn into_books(self) -> AppResult<Page<BookView>> {
        match self {
            QueryOutcome::Books(page) => Ok(page),
            other => Err(unexpected("book page", &other)),
        }
    }

    pub fn into_borrow(self) -> AppResult<Borrow> {
        match self {
            QueryOutcome::Borrow(borrow) => Ok(borrow),
            other => Err(unexpected("borrow", &other)),
        }
    }

    pub fn into_borrows(self) -> AppResult<Vec<Borrow>> {
        match self {
            QueryOutcome::Borrows(borrows) => Ok(borrows),
            other => Err(unexpected("borrow list", &other)),
        }
    }
}

#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, query: Query) -> AppResult<QueryOutcome>;
}

fn unexpected(expected: &str, got: &dyn std::fmt::Debug) -> AppError {
    AppError::Internal(format!("Expected {} outcome, got {:?}", expected, got))
}

/// Error for a handler that received a kind it was not registered for
pub(crate) fn misrouted(handler: &str, kind: &str) -> AppError {
    AppError::Configuration(format!("{} cannot handle {}", handler, kind))
}
