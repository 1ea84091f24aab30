//! Engine integration tests over in-memory stores

mod books;
mod borrowing;
mod common;
mod resilience;
