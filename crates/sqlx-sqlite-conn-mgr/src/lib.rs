//! # sqlx-sqlite-conn-mgr
//!
//! A minimal wrapper around SQLx that opens each SQLite database once and hands
//! out pooled read-write connections.
//!
//! ## Core Types
//!
//! - **[`SqliteDatabase`]**: Main database type owning a pool of read-write connections
//! - **[`SqliteDatabaseConfig`]**: Configuration for connection pool settings
//! - **[`ConnectionGuard`]**: RAII guard around a pooled connection
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **Connection pooling**: One pool of read-write connections. Several connections may be
//!   checked out at once, so an outer transaction can stay open while an independent one runs
//! - **WAL mode**: File databases are opened in Write-Ahead Logging mode so readers never block
//!   the writer
//! - **Busy timeout**: Writers wait for the SQLite write lock instead of failing immediately
//! - **In-memory databases**: `:memory:` opens a private shared-cache database that lives as
//!   long as the pool keeps a connection open
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_sqlite_conn_mgr::SqliteDatabase;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_conn_mgr::Result<()> {
//!     // Connect returns Arc<SqliteDatabase>
//!     let db = SqliteDatabase::connect("example.db", None).await?;
//!
//!     // Multiple connects to the same path return the same instance
//!     let db2 = SqliteDatabase::connect("example.db", None).await?;
//!     assert!(Arc::ptr_eq(&db, &db2));
//!
//!     let mut conn = db.acquire().await?;
//!     sqlx::query("INSERT INTO users (name) VALUES (?)")
//!         .bind("Alice")
//!         .execute(&mut *conn)
//!         .await?;
//!     drop(conn);
//!
//!     // Close when done
//!     db.close().await?;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod connection_guard;
mod database;
mod error;
mod registry;

// Re-export public types
pub use config::SqliteDatabaseConfig;
pub use connection_guard::ConnectionGuard;
pub use database::SqliteDatabase;
pub use error::Error;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
