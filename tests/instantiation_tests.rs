use sqlx_sqlite_mapper::{Database, Error, SqlQuery, SqlTarget, TypeInfo, param, sql_record};
use tempfile::TempDir;

async fn create_test_db() -> (Database, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db_path = temp_dir.path().join("test.db");
   let db = Database::connect(&db_path, None)
      .await
      .expect("Failed to connect to test database");

   db.update(
      "CREATE TABLE employees (
         id INTEGER PRIMARY KEY,
         first_name TEXT NOT NULL,
         street TEXT,
         city TEXT,
         manager_id INTEGER,
         salary REAL
      )",
   )
   .await
   .unwrap();
   for (name, street, manager) in [("Alice", "Main St 1", None), ("Bob", "Side St 2", Some(1))] {
      db.update(
         SqlQuery::new("INSERT INTO employees (first_name, street, manager_id, salary) VALUES (?, ?, ?, 1000.5)")
            .bind(name)
            .bind(street)
            .bind(manager),
      )
      .await
      .unwrap();
   }
   (db, temp_dir)
}

#[derive(Debug, PartialEq)]
struct Employee {
   id: i64,
   first_name: String,
   manager_id: Option<i64>,
}

sql_record!(Employee {
   id: i64,
   first_name: String,
   manager_id: Option<i64>,
});

#[derive(Debug, Default, PartialEq)]
struct Address {
   street: String,
   city: Option<String>,
}

impl SqlTarget for Address {
   fn type_info() -> TypeInfo<Self> {
      TypeInfo::new()
         .default_constructor()
         .property("street", |a: &mut Address, v: String| a.street = v)
         .property("city", |a: &mut Address, v: Option<String>| a.city = v)
   }
}

#[derive(Debug, Default, PartialEq)]
struct Profile {
   id: i64,
   first_name: String,
   salary: f64,
   address: Address,
}

impl SqlTarget for Profile {
   fn type_info() -> TypeInfo<Self> {
      TypeInfo::new()
         .constructor(vec![param::<i64>("id")], |args| {
            Ok(Profile {
               id: args.next()?,
               ..Profile::default()
            })
         })
         .property("firstName", |p: &mut Profile, v: String| p.first_name = v)
         .property("salary", |p: &mut Profile, v: f64| p.salary = v)
         .nested("address", |p: &mut Profile| &mut p.address)
   }
}

#[tokio::test]
async fn test_constructor_binds_columns_by_name() {
   let (db, _temp) = create_test_db().await;

   // Column order differs from the parameter order
   let employees: Vec<Employee> = db
      .find_all("SELECT manager_id, first_name, id FROM employees ORDER BY id")
      .await
      .unwrap();
   assert_eq!(
      employees,
      vec![
         Employee {
            id: 1,
            first_name: "Alice".into(),
            manager_id: None,
         },
         Employee {
            id: 2,
            first_name: "Bob".into(),
            manager_id: Some(1),
         },
      ]
   );

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_constructor_binds_columns_by_position() {
   let (db, _temp) = create_test_db().await;

   let employee: Employee = db
      .find_unique("SELECT id AS a, first_name AS b, manager_id AS c FROM employees WHERE id = 2")
      .await
      .unwrap();
   assert_eq!(employee.first_name, "Bob");
   assert_eq!(employee.manager_id, Some(1));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_properties_and_nested_paths() {
   let (db, _temp) = create_test_db().await;

   let profile: Profile = db
      .find_unique(
         r#"SELECT id, first_name, salary, street AS "address.street", city AS "address.city"
            FROM employees WHERE id = 1"#,
      )
      .await
      .unwrap();
   assert_eq!(
      profile,
      Profile {
         id: 1,
         first_name: "Alice".into(),
         salary: 1000.5,
         address: Address {
            street: "Main St 1".into(),
            city: None,
         },
      }
   );

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_default_constructor_with_properties() {
   let (db, _temp) = create_test_db().await;

   let addresses: Vec<Address> = db
      .find_all("SELECT street, city FROM employees ORDER BY id")
      .await
      .unwrap();
   assert_eq!(addresses[1].street, "Side St 2");
   assert_eq!(addresses[1].city, None);

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_column_is_reported() {
   let (db, _temp) = create_test_db().await;

   let err = db
      .find_all::<Profile>("SELECT id, first_name, 'x' AS department FROM employees")
      .await
      .unwrap_err();
   assert!(matches!(err, Error::Instantiation(_)));
   let message = err.to_string();
   assert!(message.contains("could not find a way to instantiate Profile"), "{message}");
   assert!(message.contains("no parameter or property matches column 'department'"), "{message}");

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_too_few_columns_is_reported() {
   let (db, _temp) = create_test_db().await;

   let err = db
      .find_all::<Employee>("SELECT id, first_name FROM employees")
      .await
      .unwrap_err();
   let message = err.to_string();
   assert!(message.contains("needs 3 parameters but the result has 2 columns"), "{message}");

   db.remove().await.unwrap();
}

#[derive(Debug)]
struct Pair {
   left: String,
}

impl SqlTarget for Pair {
   fn type_info() -> TypeInfo<Self> {
      TypeInfo::new()
         .constructor(vec![param::<i64>("x"), param::<String>("y")], |args| {
            let _: i64 = args.next()?;
            Ok(Pair { left: args.next()? })
         })
         .constructor(vec![param::<i64>("p"), param::<String>("q")], |args| {
            let _: i64 = args.next()?;
            Ok(Pair { left: args.next()? })
         })
   }
}

#[tokio::test]
async fn test_equally_good_constructors_are_ambiguous() {
   let (db, _temp) = create_test_db().await;

   let err = db
      .find_all::<Pair>("SELECT id, first_name FROM employees")
      .await
      .unwrap_err();
   assert!(err.to_string().contains("ambiguous constructors for Pair"), "{err}");

   // A name match breaks the tie
   let pairs: Vec<Pair> = db
      .find_all("SELECT id AS p, first_name AS q FROM employees ORDER BY id")
      .await
      .unwrap();
   assert_eq!(pairs[0].left, "Alice");

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_no_rows_needs_no_instantiator() {
   let (db, _temp) = create_test_db().await;

   // Would be ambiguous, but there is nothing to instantiate
   let pairs: Vec<Pair> = db
      .find_all("SELECT id, first_name FROM employees WHERE id < 0")
      .await
      .unwrap();
   assert!(pairs.is_empty());

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_optional_and_list_targets() {
   let (db, _temp) = create_test_db().await;

   let managers: Vec<Option<i64>> = db
      .find_all("SELECT manager_id FROM employees ORDER BY id")
      .await
      .unwrap();
   assert_eq!(managers, vec![None, Some(1)]);

   let numbers: Vec<i64> = db.find_unique("SELECT '[1, 2, 3]' AS numbers").await.unwrap();
   assert_eq!(numbers, vec![1, 2, 3]);

   db.remove().await.unwrap();
}

#[tokio::test]
async fn test_null_into_required_value_fails() {
   let (db, _temp) = create_test_db().await;

   let err = db
      .find_unique::<i64>("SELECT manager_id FROM employees WHERE id = 1")
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CONVERSION_FAILED");

   db.remove().await.unwrap();
}
