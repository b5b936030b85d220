//! Transaction settings and propagation management
//!
//! A transaction started by [`Database::with_transaction`](crate::Database::with_transaction)
//! is bound to the task running its callback. Queries issued from that task, including
//! those from nested `with_transaction` calls, find the binding and run on the
//! transaction's connection. How a nested call relates to an active transaction is
//! decided by its [`Propagation`].

mod context;
mod manager;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use context::{TransactionConnection, TransactionContext};
pub(crate) use manager::{Access, TransactionManager, connection_op};

/// How a transactional callback relates to a transaction that is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
   /// Use the database's default propagation.
   #[default]
   Default,
   /// Join the active transaction, or start a new one.
   Required,
   /// Join the active transaction, failing if there is none.
   Mandatory,
   /// Suspend the active transaction and run in a new one.
   RequiresNew,
   /// Run in a savepoint of the active transaction, or in a new transaction.
   Nested,
   /// Join the active transaction, or run without one.
   Supports,
   /// Suspend the active transaction and run without one.
   NotSupported,
   /// Run without a transaction, failing if one is active.
   Never,
}

impl Propagation {
   /// Replace `Default` with `default`, and with `Required` if that is `Default` as well.
   pub fn normalize(self, default: Propagation) -> Propagation {
      match (self, default) {
         (Propagation::Default, Propagation::Default) => Propagation::Required,
         (Propagation::Default, default) => default,
         (propagation, _) => propagation,
      }
   }
}

impl fmt::Display for Propagation {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         Propagation::Default => "DEFAULT",
         Propagation::Required => "REQUIRED",
         Propagation::Mandatory => "MANDATORY",
         Propagation::RequiresNew => "REQUIRES_NEW",
         Propagation::Nested => "NESTED",
         Propagation::Supports => "SUPPORTS",
         Propagation::NotSupported => "NOT_SUPPORTED",
         Propagation::Never => "NEVER",
      };
      f.write_str(name)
   }
}

/// Isolation level requested for a new transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Isolation {
   /// Use the database's default isolation, or whatever the database does by itself.
   #[default]
   Default,
   ReadUncommitted,
   ReadCommitted,
   RepeatableRead,
   Serializable,
}

impl Isolation {
   /// Replace `Default` with `default`.
   pub fn normalize(self, default: Isolation) -> Isolation {
      match self {
         Isolation::Default => default,
         isolation => isolation,
      }
   }

   /// The SQL name of the level, `None` for `Default`.
   pub fn sql_name(self) -> Option<&'static str> {
      match self {
         Isolation::Default => None,
         Isolation::ReadUncommitted => Some("READ UNCOMMITTED"),
         Isolation::ReadCommitted => Some("READ COMMITTED"),
         Isolation::RepeatableRead => Some("REPEATABLE READ"),
         Isolation::Serializable => Some("SERIALIZABLE"),
      }
   }
}

/// Settings of a single `with_transaction` call.
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_mapper::{Isolation, Propagation, TransactionSettings};
///
/// let settings = TransactionSettings {
///    propagation: Propagation::RequiresNew,
///    isolation: Isolation::Serializable,
///    retries: 3,
/// };
/// assert_eq!(
///    settings.to_string(),
///    "[propagation=REQUIRES_NEW, isolation=SERIALIZABLE, retries=3]"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
   pub propagation: Propagation,
   pub isolation: Isolation,
   /// How many times a new transaction is retried after a serialization failure.
   ///
   /// Default: 0
   pub retries: u32,
}

impl fmt::Display for TransactionSettings {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let isolation = match self.isolation.sql_name() {
         Some(name) => name.replace(' ', "_"),
         None => "DEFAULT".to_string(),
      };
      write!(
         f,
         "[propagation={}, isolation={}, retries={}]",
         self.propagation, isolation, self.retries
      )
   }
}
