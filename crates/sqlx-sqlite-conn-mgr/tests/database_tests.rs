use sqlx_sqlite_conn_mgr::{SqliteDatabase, SqliteDatabaseConfig};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_wal_mode_enabled_for_file_databases() {
   let temp_dir = TempDir::new().unwrap();
   let db = SqliteDatabase::connect(temp_dir.path().join("test_wal_mode.db"), None)
      .await
      .unwrap();

   let mut conn = db.acquire().await.unwrap();

   let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
      .fetch_one(&mut *conn)
      .await
      .unwrap();

   assert_eq!(mode.to_lowercase(), "wal", "Journal mode should be WAL");

   let (sync,): (i32,) = sqlx::query_as("PRAGMA synchronous")
      .fetch_one(&mut *conn)
      .await
      .unwrap();

   assert_eq!(sync, 1, "Sync mode should be NORMAL");

   drop(conn);
   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_busy_timeout_applied() {
   let temp_dir = TempDir::new().unwrap();
   let config = SqliteDatabaseConfig {
      busy_timeout_ms: 1234,
      ..Default::default()
   };
   let db = SqliteDatabase::connect(temp_dir.path().join("busy.db"), Some(config))
      .await
      .unwrap();

   let (timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
      .fetch_one(db.pool().unwrap())
      .await
      .unwrap();

   assert_eq!(timeout, 1234);

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_db_instance_caching() {
   let temp_dir = TempDir::new().unwrap();
   let test_path = temp_dir.path().join("test_caching.db");

   let db1 = SqliteDatabase::connect(&test_path, None).await.unwrap();
   let db2 = SqliteDatabase::connect(&test_path, None).await.unwrap();

   assert!(
      Arc::ptr_eq(&db1, &db2),
      "Same path should return cached instance"
   );

   drop(db1);
   db2.remove().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_after_close_opens_new_instance() {
   let temp_dir = TempDir::new().unwrap();
   let test_path = temp_dir.path().join("test_reopen.db");

   let db1 = SqliteDatabase::connect(&test_path, None).await.unwrap();
   let db1_ref = Arc::clone(&db1);
   db1.close().await.unwrap();

   let db2 = SqliteDatabase::connect(&test_path, None).await.unwrap();
   assert!(!Arc::ptr_eq(&db1_ref, &db2));
   assert!(db2.pool().is_ok());

   db2.remove().await.unwrap();
}

#[tokio::test]
async fn test_empty_path_rejected() {
   let result = SqliteDatabase::connect("", None).await;
   assert!(matches!(
      result.unwrap_err(),
      sqlx_sqlite_conn_mgr::Error::Io(_)
   ));
}

#[tokio::test]
async fn test_two_connections_checked_out_at_once() {
   let temp_dir = TempDir::new().unwrap();
   let config = SqliteDatabaseConfig {
      max_connections: 1,
      ..Default::default()
   };
   let db = SqliteDatabase::connect(temp_dir.path().join("pair.db"), Some(config))
      .await
      .unwrap();

   // max_connections is raised to 2, so the second acquire must not wait forever
   let mut first = db.acquire().await.unwrap();
   let second = tokio::time::timeout(std::time::Duration::from_secs(2), db.acquire())
      .await
      .expect("second connection should be available")
      .unwrap();

   sqlx::query("CREATE TABLE t (id INTEGER)")
      .execute(&mut *first)
      .await
      .unwrap();

   drop(first);
   drop(second);
   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_uncommitted_writes_invisible_to_other_connections() {
   let temp_dir = TempDir::new().unwrap();
   let db = SqliteDatabase::connect(temp_dir.path().join("isolation.db"), None)
      .await
      .unwrap();

   sqlx::query("CREATE TABLE data (id INTEGER PRIMARY KEY)")
      .execute(db.pool().unwrap())
      .await
      .unwrap();

   let mut writer = db.acquire().await.unwrap();
   sqlx::query("BEGIN IMMEDIATE")
      .execute(&mut *writer)
      .await
      .unwrap();
   sqlx::query("INSERT INTO data (id) VALUES (1)")
      .execute(&mut *writer)
      .await
      .unwrap();

   let mut reader = db.acquire().await.unwrap();
   let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM data")
      .fetch_one(&mut *reader)
      .await
      .unwrap();
   assert_eq!(count, 0, "WAL readers should not see uncommitted rows");

   sqlx::query("COMMIT").execute(&mut *writer).await.unwrap();

   let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM data")
      .fetch_one(&mut *reader)
      .await
      .unwrap();
   assert_eq!(count, 1);

   drop(reader);
   drop(writer);
   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_wal_checkpoint_on_close() {
   let temp_dir = TempDir::new().unwrap();
   let test_path = temp_dir.path().join("test_wal_checkpoint.db");

   let db = SqliteDatabase::connect(&test_path, None).await.unwrap();

   let mut conn = db.acquire().await.unwrap();
   sqlx::query("CREATE TABLE test (id INTEGER, value TEXT)")
      .execute(&mut *conn)
      .await
      .unwrap();
   sqlx::query("INSERT INTO test (id, value) VALUES (1, 'test')")
      .execute(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   let mut wal_path = test_path.clone().into_os_string();
   wal_path.push("-wal");
   let wal_path = std::path::PathBuf::from(wal_path);
   assert!(wal_path.exists(), "WAL file should exist after write");

   db.close().await.unwrap();

   // WAL file should be either 0 bytes or not exist
   if wal_path.exists() {
      let wal_size = std::fs::metadata(&wal_path).unwrap().len();
      assert_eq!(wal_size, 0, "WAL file should be 0 bytes after checkpoint");
   }
}

#[tokio::test]
async fn test_remove() {
   let temp_dir = TempDir::new().unwrap();
   let test_path = temp_dir.path().join("test_close_remove.db");

   let db = SqliteDatabase::connect(&test_path, None).await.unwrap();

   let mut conn = db.acquire().await.unwrap();
   sqlx::query("CREATE TABLE test (id INTEGER)")
      .execute(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   assert!(test_path.exists(), "Database file should exist");

   db.remove().await.unwrap();

   let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
   assert!(entries.is_empty(), "Database, WAL and SHM files should be removed");
}
