use pretty_assertions::assert_eq;
use rstest::rstest;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use rds_migrator::handler::execute;
use rds_migrator::{
    DatabaseConfig, DatabaseConnection, Error, MigrateAction, MigrationsConfig, Migrator,
};

async fn open(url: &str) -> DatabaseConnection {
    DatabaseConnection::connect(&DatabaseConfig {
        url: url.to_string(),
        pool_size: Some(1),
        timeout_seconds: Some(10),
    })
    .await
    .unwrap()
}

async fn memory_db() -> DatabaseConnection {
    open("sqlite::memory:").await
}

async fn count(db: &DatabaseConnection, table: &str) -> i64 {
    match db {
        DatabaseConnection::Sqlite(pool) => {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(pool)
                .await
                .unwrap()
        }
        DatabaseConnection::Postgres(_) => unreachable!(),
    }
}

fn write(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).unwrap();
}

fn config(dir: &Path) -> MigrationsConfig {
    MigrationsConfig {
        directory: dir.to_path_buf(),
        ..MigrationsConfig::default()
    }
}

async fn tables(db: &DatabaseConnection) -> Vec<String> {
    match db {
        DatabaseConnection::Sqlite(pool) => sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '%!_lock' ESCAPE '!' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap(),
        DatabaseConnection::Postgres(_) => unreachable!(),
    }
}

async fn recorded(db: &DatabaseConnection) -> Vec<(String, i64)> {
    match db {
        DatabaseConnection::Sqlite(pool) => {
            sqlx::query_as::<_, (String, i64)>("SELECT name, batch FROM schema_migrations ORDER BY id")
                .fetch_all(pool)
                .await
                .unwrap()
        }
        DatabaseConnection::Postgres(_) => unreachable!(),
    }
}

#[tokio::test]
async fn test_latest_applies_all_in_order() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "002_posts.sql", "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));");
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    let report = migrator.latest().await.unwrap();
    assert_eq!(report.batch, Some(1));
    assert_eq!(report.applied, vec!["001_users.sql", "002_posts.sql"]);
    assert_eq!(
        recorded(&db).await,
        vec![
            ("001_users.sql".to_string(), 1),
            ("002_posts.sql".to_string(), 1)
        ]
    );
    assert_eq!(tables(&db).await, vec!["posts", "schema_migrations", "users"]);
}

#[tokio::test]
async fn test_latest_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    migrator.latest().await.unwrap();
    let second = migrator.latest().await.unwrap();

    assert_eq!(second.batch, None);
    assert!(second.applied.is_empty());
    assert_eq!(recorded(&db).await.len(), 1);
}

#[tokio::test]
async fn test_new_files_run_in_next_batch() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();
    migrator.latest().await.unwrap();

    // A file sorting before an applied one still runs, and nothing re-runs
    write(dir.path(), "000_audit.sql", "CREATE TABLE audit (id INTEGER PRIMARY KEY);");
    write(dir.path(), "003_tags.sql", "CREATE TABLE tags (id INTEGER PRIMARY KEY);");

    let report = migrator.latest().await.unwrap();
    assert_eq!(report.batch, Some(2));
    assert_eq!(report.applied, vec!["000_audit.sql", "003_tags.sql"]);
    assert_eq!(
        recorded(&db).await,
        vec![
            ("001_users.sql".to_string(), 1),
            ("000_audit.sql".to_string(), 2),
            ("003_tags.sql".to_string(), 2)
        ]
    );
}

#[tokio::test]
async fn test_failed_migration_rolls_back() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");
    write(
        dir.path(),
        "002_broken.sql",
        "CREATE TABLE half_done (id INTEGER PRIMARY KEY); INSERT INTO missing_table VALUES (1);",
    );
    write(dir.path(), "003_never.sql", "CREATE TABLE never (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    let err = migrator.latest().await.unwrap_err();
    match &err {
        Error::MigrationFailed { name, .. } => assert_eq!(name, "002_broken.sql"),
        other => panic!("unexpected error: {}", other),
    }

    // The earlier migration stays applied, the failing one leaves no trace
    assert_eq!(recorded(&db).await, vec![("001_users.sql".to_string(), 1)]);
    assert_eq!(tables(&db).await, vec!["schema_migrations", "users"]);

    let status = migrator.list().await.unwrap();
    assert_eq!(status.pending, vec!["002_broken.sql", "003_never.sql"]);
}

#[tokio::test]
async fn test_up_applies_one() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");
    write(dir.path(), "002_b.sql", "CREATE TABLE b (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    let first = migrator.up().await.unwrap();
    assert_eq!(first.applied, vec!["001_a.sql"]);
    assert_eq!(first.batch, Some(1));

    let second = migrator.up().await.unwrap();
    assert_eq!(second.applied, vec!["002_b.sql"]);
    assert_eq!(second.batch, Some(2));

    assert_eq!(migrator.up().await.unwrap().batch, None);
}

#[tokio::test]
async fn test_corrupt_directory() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();
    migrator.latest().await.unwrap();

    fs::remove_file(dir.path().join("001_a.sql")).unwrap();
    write(dir.path(), "002_b.sql", "CREATE TABLE b (id INTEGER PRIMARY KEY);");

    let err = migrator.latest().await.unwrap_err();
    assert!(matches!(err, Error::CorruptMigrationDirectory(ref missing) if missing == &["001_a.sql"]));
    assert_eq!(tables(&db).await, vec!["a", "schema_migrations"]);
}

#[tokio::test]
async fn test_empty_directory() {
    let dir = TempDir::new().unwrap();
    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    let report = migrator.latest().await.unwrap();
    assert_eq!(report.batch, None);
    assert_eq!(tables(&db).await, vec!["schema_migrations"]);
}

#[tokio::test]
async fn test_custom_table_name() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrations = MigrationsConfig {
        table_name: "knex_migrations".to_string(),
        ..config(dir.path())
    };
    Migrator::new(&db, &migrations).unwrap().latest().await.unwrap();

    assert_eq!(tables(&db).await, vec!["a", "knex_migrations"]);
}

#[tokio::test]
async fn test_invalid_table_name() {
    let dir = TempDir::new().unwrap();
    let db = memory_db().await;
    let migrations = MigrationsConfig {
        table_name: "users; --".to_string(),
        ..config(dir.path())
    };
    assert!(Migrator::new(&db, &migrations).is_err());
}

#[rstest]
#[case(MigrateAction::Latest, Some(1), vec!["001_a.sql", "002_b.sql"], vec![])]
#[case(MigrateAction::Up, Some(1), vec!["001_a.sql"], vec!["002_b.sql"])]
#[case(MigrateAction::List, None, vec![], vec!["001_a.sql", "002_b.sql"])]
#[tokio::test]
async fn test_execute_actions(
    #[case] action: MigrateAction,
    #[case] batch: Option<i64>,
    #[case] applied: Vec<&str>,
    #[case] pending: Vec<&str>,
) {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");
    write(dir.path(), "002_b.sql", "CREATE TABLE b (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    let response = execute(&migrator, action).await.unwrap();
    assert_eq!(response.action, action);
    assert_eq!(response.batch, batch);
    assert_eq!(response.applied, applied);
    assert_eq!(response.pending, pending);
}

#[tokio::test]
async fn test_bundled_migrations_directory_is_valid() {
    // The directory shipped with the function may be empty but must exist
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(&bundled)).unwrap();
    assert!(migrator.list().await.is_ok());
}

#[tokio::test]
async fn test_locked_table_blocks_a_run() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();
    migrator.list().await.unwrap();
    db.execute("UPDATE schema_migrations_lock SET is_locked = 1").await.unwrap();

    let err = migrator.latest().await.unwrap_err();
    assert!(matches!(err, Error::MigrationLocked(ref table) if table == "schema_migrations"));
    assert_eq!(count(&db, "schema_migrations").await, 0);

    // Listing does not need the lock
    assert_eq!(migrator.list().await.unwrap().pending, vec!["001_a.sql"]);

    migrator.force_unlock().await.unwrap();
    assert_eq!(migrator.latest().await.unwrap().applied, vec!["001_a.sql"]);
}

#[tokio::test]
async fn test_lock_released_after_failure() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_broken.sql", "INSERT INTO missing_table VALUES (1);");

    let db = memory_db().await;
    let migrator = Migrator::new(&db, &config(dir.path())).unwrap();

    assert!(matches!(migrator.latest().await, Err(Error::MigrationFailed { .. })));
    // The next run fails on the script again, not on the lock
    assert!(matches!(migrator.up().await, Err(Error::MigrationFailed { .. })));
    assert_eq!(count(&db, "schema_migrations_lock").await, 1);
}

#[tokio::test]
async fn test_tracking_names_are_unique() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");

    let db = memory_db().await;
    Migrator::new(&db, &config(dir.path())).unwrap().latest().await.unwrap();

    let duplicate = db
        .execute("INSERT INTO schema_migrations (name, batch) VALUES ('001_a.sql', 2)")
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_overlapping_runs_apply_each_script_once() {
    for round in 0..10 {
        let dir = TempDir::new().unwrap();
        let scripts = dir.path().join("migrations");
        fs::create_dir(&scripts).unwrap();
        write(&scripts, "001_seed.sql", "INSERT INTO counter VALUES (1);");
        write(&scripts, "002_more.sql", "INSERT INTO counter VALUES (2);");

        let url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());
        let first = open(&url).await;
        let second = open(&url).await;
        first.execute("CREATE TABLE counter (value INTEGER NOT NULL)").await.unwrap();

        let a = Migrator::new(&first, &config(&scripts)).unwrap();
        let b = Migrator::new(&second, &config(&scripts)).unwrap();
        let (ra, rb) = tokio::join!(a.latest(), b.latest());

        let mut applied = Vec::new();
        for result in [ra, rb] {
            match result {
                Ok(report) => applied.extend(report.applied),
                Err(Error::MigrationLocked(_)) => {}
                Err(other) => panic!("round {}: unexpected error: {}", round, other),
            }
        }

        assert_eq!(applied, vec!["001_seed.sql", "002_more.sql"], "round {}", round);
        assert_eq!(count(&first, "counter").await, 2, "round {}", round);
        assert_eq!(count(&first, "schema_migrations").await, 2, "round {}", round);

        first.close().await;
        second.close().await;
    }
}
