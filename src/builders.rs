//! Builder for transactional callbacks

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use crate::Result;
use crate::database::Database;
use crate::transactions::{Isolation, Propagation, TransactionContext, TransactionSettings};

/// Builder returned by [`Database::with_transaction`].
///
/// Awaiting the builder runs the callback with the chosen settings; anything not set
/// falls back to the database's defaults.
#[must_use = "the callback only runs when the builder is awaited"]
pub struct TransactionBuilder<'a, F> {
   db: &'a Database,
   settings: TransactionSettings,
   callback: F,
}

impl<'a, F> TransactionBuilder<'a, F> {
   pub(crate) fn new(db: &'a Database, callback: F) -> Self {
      Self {
         db,
         settings: TransactionSettings::default(),
         callback,
      }
   }

   pub fn propagation(mut self, propagation: Propagation) -> Self {
      self.settings.propagation = propagation;
      self
   }

   /// Isolation of the transaction. Ignored when joining an active transaction.
   pub fn isolation(mut self, isolation: Isolation) -> Self {
      self.settings.isolation = isolation;
      self
   }

   /// Retry the callback up to `retries` times when the transaction fails with a
   /// serialization failure, such as SQLite reporting the database as busy.
   pub fn retries(mut self, retries: u32) -> Self {
      self.settings.retries = retries;
      self
   }

   /// Replace all settings at once.
   pub fn settings(mut self, settings: TransactionSettings) -> Self {
      self.settings = settings;
      self
   }

   /// Run the callback.
   pub async fn execute<Fut, T>(self) -> Result<T>
   where
      F: FnMut(TransactionContext) -> Fut + Send,
      Fut: Future<Output = Result<T>> + Send,
      T: Send,
   {
      self.db.run_transaction(self.settings, self.callback).await
   }
}

impl<'a, F, Fut, T> IntoFuture for TransactionBuilder<'a, F>
where
   F: FnMut(TransactionContext) -> Fut + Send + 'a,
   Fut: Future<Output = Result<T>> + Send + 'a,
   T: Send + 'a,
{
   type Output = Result<T>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 'a>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}
