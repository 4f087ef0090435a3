//! Packaging the migration function and wiring the archive into synthesis

use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs::{self, File};
use std::path::Path;
use tempfile::{tempdir, TempDir};
use zip::ZipArchive;

use rds_stack::package::{DEFAULT_MIGRATIONS_SOURCE, MIGRATIONS_ENTRY};
use rds_stack::{package_function, synthesize_with_package, Environments, Error};

fn function_sources() -> TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("bootstrap"), b"\x7fELF fake executable").unwrap();

    let migrations = dir.path().join("migrations");
    fs::create_dir(&migrations).unwrap();
    fs::write(migrations.join("002_posts.sql"), "CREATE TABLE posts (id SERIAL);").unwrap();
    fs::write(migrations.join("001_users.sql"), "CREATE TABLE users (id SERIAL);").unwrap();
    fs::write(migrations.join(".gitkeep"), "").unwrap();
    dir
}

fn entries(path: &Path) -> Vec<(String, Option<u32>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let entry = archive.by_index(i).unwrap();
            (entry.name().to_string(), entry.unix_mode().map(|mode| mode & 0o777))
        })
        .collect()
}

#[test]
fn test_archive_layout() {
    let sources = function_sources();
    let out = tempdir().unwrap();

    let package = package_function(
        &sources.path().join("bootstrap"),
        &sources.path().join("migrations"),
        out.path(),
    )
    .unwrap();

    assert!(package.path.starts_with(out.path().join("assets")));
    assert_eq!(package.file, format!("assets/migrator.{}.zip", package.sha256));
    assert_eq!(package.s3_key, format!("migrator/{}.zip", package.sha256));
    assert_eq!(package.migrations, vec!["001_users.sql", "002_posts.sql"]);

    assert_eq!(
        entries(&package.path),
        vec![
            ("bootstrap".to_string(), Some(0o755)),
            (format!("{}/", MIGRATIONS_ENTRY), Some(0o755)),
            ("migrations/001_users.sql".to_string(), Some(0o644)),
            ("migrations/002_posts.sql".to_string(), Some(0o644)),
        ]
    );
}

#[test]
fn test_same_inputs_give_same_key() {
    let sources = function_sources();
    let bootstrap = sources.path().join("bootstrap");
    let migrations = sources.path().join("migrations");

    let first = package_function(&bootstrap, &migrations, tempdir().unwrap().path()).unwrap();
    let second = package_function(&bootstrap, &migrations, tempdir().unwrap().path()).unwrap();
    assert_eq!(first.s3_key, second.s3_key);

    fs::write(migrations.join("003_tags.sql"), "CREATE TABLE tags (id SERIAL);").unwrap();
    let changed = package_function(&bootstrap, &migrations, tempdir().unwrap().path()).unwrap();
    assert_ne!(first.s3_key, changed.s3_key);
}

#[test]
fn test_empty_migrations_directory_is_kept() {
    let sources = tempdir().unwrap();
    fs::write(sources.path().join("bootstrap"), b"bin").unwrap();
    fs::create_dir(sources.path().join("migrations")).unwrap();
    let out = tempdir().unwrap();

    let package = package_function(
        &sources.path().join("bootstrap"),
        &sources.path().join("migrations"),
        out.path(),
    )
    .unwrap();

    let names: Vec<String> = entries(&package.path).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["bootstrap", "migrations/"]);
}

#[test]
fn test_missing_inputs() {
    let sources = function_sources();
    let out = tempdir().unwrap();

    let result = package_function(
        &sources.path().join("target/bootstrap"),
        &sources.path().join("migrations"),
        out.path(),
    );
    assert!(matches!(result, Err(Error::PackageError(_))));

    let result = package_function(
        &sources.path().join("bootstrap"),
        &sources.path().join("missing"),
        out.path(),
    );
    assert!(matches!(result, Err(Error::PackageError(_))));
    assert!(!out.path().join("assets").exists());
}

#[test]
fn test_bundled_migrations_directory_exists() {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();
    assert!(workspace.join(DEFAULT_MIGRATIONS_SOURCE).is_dir());
}

#[test]
fn test_synthesize_with_package() {
    let sources = function_sources();
    let out = tempdir().unwrap();
    let package = package_function(
        &sources.path().join("bootstrap"),
        &sources.path().join("migrations"),
        out.path(),
    )
    .unwrap();

    let environments = Environments::builtin().unwrap();
    let stacks =
        synthesize_with_package(&environments, &["staging".to_string()], out.path(), Some(&package))
            .unwrap();

    let template: Value =
        serde_json::from_str(&fs::read_to_string(&stacks[0].template_path).unwrap()).unwrap();
    assert_eq!(
        template["Parameters"]["MigratorCodeS3Key"]["Default"],
        package.s3_key.as_str()
    );
    assert!(template["Parameters"]["MigratorCodeS3Bucket"]
        .get("Default")
        .is_none());
    assert_eq!(
        template["Resources"]["MigratorFunction"]["Metadata"]["aws:asset:path"],
        package.file.as_str()
    );

    let manifest: Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("manifest.json")).unwrap())
            .unwrap();
    let code = &manifest["rds-database-staging"]["migrator_code"];
    assert_eq!(code["s3_key"], package.s3_key.as_str());
    assert_eq!(code["file"], package.file.as_str());
    assert!(out.path().join(code["file"].as_str().unwrap()).is_file());
}
