//! Process-wide cache of open databases keyed by path

use crate::Result;
use crate::database::SqliteDatabase;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Mutex;

type Registry = Mutex<HashMap<PathBuf, Weak<SqliteDatabase>>>;

fn registry() -> &'static Registry {
   static REGISTRY: OnceLock<Registry> = OnceLock::new();
   REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns true for paths naming a SQLite in-memory database
pub(crate) fn is_memory_database(path: &Path) -> bool {
   let path = path.to_string_lossy();
   path == ":memory:" || path == "sqlite::memory:"
}

/// Return the cached database for `path`, or open it with `open` and cache it
///
/// In-memory databases are never cached: every call opens a new, independent one.
/// The registry holds weak references, so a database is reopened once all of its
/// `Arc`s have been dropped.
pub(crate) async fn get_or_open_database<F, Fut>(path: &Path, open: F) -> Result<Arc<SqliteDatabase>>
where
   F: FnOnce() -> Fut,
   Fut: Future<Output = Result<SqliteDatabase>>,
{
   if is_memory_database(path) {
      return Ok(Arc::new(open().await?));
   }

   // Holding the lock while opening keeps two callers from opening the same file twice
   let mut databases = registry().lock().await;

   if let Some(db) = databases.get(path).and_then(Weak::upgrade) {
      return Ok(db);
   }

   let db = Arc::new(open().await?);
   databases.insert(path.to_path_buf(), Arc::downgrade(&db));
   databases.retain(|_, weak| weak.strong_count() > 0);

   Ok(db)
}

/// Forget the cached database for `path`
pub(crate) async fn uncache_database(path: &Path) -> Result<()> {
   if is_memory_database(path) {
      return Ok(());
   }

   registry().lock().await.remove(path);
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_is_memory_database() {
      assert!(is_memory_database(Path::new(":memory:")));
      assert!(is_memory_database(Path::new("sqlite::memory:")));
      assert!(!is_memory_database(Path::new("memory.db")));
      assert!(!is_memory_database(Path::new("/tmp/:memory:/x.db")));
   }
}
