//! Convenience layer over SQLx for SQLite: query helpers, reflective row mapping,
//! type conversions and transaction propagation.
//!
//! This crate sits between the connection manager (`sqlx-sqlite-conn-mgr`) and
//! application code. It provides:
//!
//! - [`Database`]: main entry point for running queries and transactions
//! - [`SqlQuery`] and [`QueryBuilder`] for positional and `:named` parameters
//! - Reflective instantiation of result rows into Rust types described by [`TypeInfo`],
//!   selecting constructors by column names and types
//! - A per-database [`TypeConversionRegistry`] of conversions between database values
//!   and Rust types
//! - Transaction propagation ([`Propagation`]) with savepoints, suspension and retries
//! - [`Dialect`]s capturing database specific behavior
//!
//! # Example
//!
//! ```no_run
//! use sqlx_sqlite_mapper::{Database, SqlQuery, SqlTarget, TypeInfo, param};
//!
//! struct User {
//!    id: i64,
//!    name: String,
//! }
//!
//! impl SqlTarget for User {
//!    fn type_info() -> TypeInfo<Self> {
//!       TypeInfo::new().constructor(vec![param::<i64>("id"), param::<String>("name")], |args| {
//!          Ok(User {
//!             id: args.next()?,
//!             name: args.next()?,
//!          })
//!       })
//!    }
//! }
//!
//! # async fn example() -> sqlx_sqlite_mapper::Result<()> {
//! let db = Database::connect("mydb.db", None).await?;
//!
//! // Write
//! db.update(SqlQuery::new("INSERT INTO users (name) VALUES (?)").bind("Alice")).await?;
//!
//! // Read
//! let users: Vec<User> = db.find_all("SELECT id, name FROM users").await?;
//!
//! // Transaction
//! db.with_transaction(|_ctx| {
//!    let db = db.clone();
//!    async move {
//!       db.update(SqlQuery::new("INSERT INTO users (name) VALUES (?)").bind("Bob")).await?;
//!       db.update(SqlQuery::new("INSERT INTO users (name) VALUES (?)").bind("Charlie")).await?;
//!       Ok(())
//!    }
//! })
//! .await?;
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod argument;
mod builders;
mod conversion;
mod database;
mod decode;
mod dialect;
mod error;
mod instantiation;
mod query;
mod result;
mod transactions;
mod value;

pub use argument::{Argument, Confidential, SqlArray, ToArgument};
pub use builders::TransactionBuilder;
pub use conversion::{
   Boxed, EnumMode, SqlEnum, SqlTarget, TargetType, TypeConversion, TypeConversionRegistry,
};
pub use database::{Database, DatabaseSettings, UpdateResult};
pub use dialect::{Dialect, GenericDialect, SqliteDialect};
pub use error::{Error, Result};
pub use instantiation::{Arguments, Parameter, TypeInfo, param};
pub use query::{FnResolver, QueryBuilder, SqlQuery, VariableResolver, resolver_fn};
pub use result::{ColumnMetadata, ResultRow, ResultTable, RowMapper};
pub use transactions::{
   Isolation, Propagation, TransactionConnection, TransactionContext, TransactionSettings,
};
pub use value::{Value, ValueKind};

// Re-export commonly used types from dependencies
pub use sqlx_sqlite_conn_mgr::{SqliteDatabase, SqliteDatabaseConfig};
