//! `db` crate: the domain-record store.
//!
//! Provides a connection pool, typed row structs, repository functions for the
//! single `domain_records` table and the [`DomainStore`] trait with Postgres
//! and in-memory implementations. No business logic lives here.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use models::{DomainRecord, RecordKind, RecordStatus, TaskAttachment};
pub use pool::{create_pool, run_migrations, DbPool};
pub use store::{DomainStore, MemoryStore, PgStore};
