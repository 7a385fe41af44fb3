//! `migrate_schemas` against the in-memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tenant_schemas_cli::commands::{verdict, MigrateSchemasCommand, MigrateSchemasOptions, MigrationBackend};
use tenant_schemas_cli::{CommandRegistry, StaticTenantResolver};
use tenant_schemas_core::{DatabaseSettings, ErrorKind, SchemaName, Settings, TenantError};
use tenant_schemas_db::InMemoryPool;
use tenant_schemas_migrations::{ExecutionOutcome, GraphMigrationFramework, Migration, OutcomeKind, SkipReason};

fn migrations() -> Vec<Migration> {
    vec![
        Migration::new("shop", "0001_initial")
            .initial()
            .forwards("CREATE TABLE shop_order (id int)")
            .creates_table("shop_order"),
        Migration::new("shop", "0002_item")
            .depends_on("shop", "0001_initial")
            .forwards("CREATE TABLE shop_item (id int)"),
    ]
}

fn pool() -> InMemoryPool {
    InMemoryPool::with_schemas(["public", "acme", "globex"])
}

fn backend(pool: &InMemoryPool) -> MigrationBackend {
    MigrationBackend {
        pool: Arc::new(pool.clone()),
        framework: Arc::new(GraphMigrationFramework::new(migrations()).unwrap()),
        resolver: Arc::new(StaticTenantResolver::new(
            ["globex", "acme"].map(|s| SchemaName::parse(s).unwrap()),
        )),
    }
}

fn command(pool: &InMemoryPool) -> MigrateSchemasCommand {
    MigrateSchemasCommand::with_backend(backend(pool))
}

fn schemas(report: &tenant_schemas_migrations::ExecutionReport) -> Vec<String> {
    report.kinds().into_iter().map(|(schema, _)| schema).collect()
}

#[tokio::test]
async fn test_public_then_tenants() {
    let pool = pool();
    let report = command(&pool)
        .run(&MigrateSchemasOptions::default(), &Settings::default())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(schemas(&report), vec!["public", "acme", "globex"]);
    for schema in ["public", "acme", "globex"] {
        assert_eq!(pool.applied_in(schema).len(), 2, "{schema}");
    }
    assert!(verdict(&report, false).is_ok());
}

#[tokio::test]
async fn test_shared_only_migrates_public() {
    let pool = pool();
    let options = MigrateSchemasOptions {
        shared: true,
        ..MigrateSchemasOptions::default()
    };
    let report = command(&pool).run(&options, &Settings::default()).await.unwrap();

    assert_eq!(schemas(&report), vec!["public"]);
    assert!(pool.applied_in("acme").is_empty());
}

#[tokio::test]
async fn test_tenant_only_leaves_public_alone() {
    let pool = pool();
    let options = MigrateSchemasOptions {
        tenant: true,
        executor: Some("parallel".to_string()),
        parallelism: Some(2),
        ..MigrateSchemasOptions::default()
    };
    let report = command(&pool).run(&options, &Settings::default()).await.unwrap();

    assert_eq!(report.executor, "parallel");
    assert_eq!(schemas(&report), vec!["acme", "globex"]);
    assert!(pool.applied_in("public").is_empty());
}

#[tokio::test]
async fn test_single_schema() {
    let pool = pool();
    let options = MigrateSchemasOptions {
        tenant: true,
        schema_name: Some("globex".to_string()),
        ..MigrateSchemasOptions::default()
    };
    let report = command(&pool).run(&options, &Settings::default()).await.unwrap();

    assert_eq!(schemas(&report), vec!["globex"]);
    assert!(pool.applied_in("acme").is_empty());
}

#[tokio::test]
async fn test_missing_schema_fails_before_any_work() {
    let pool = pool();
    let options = MigrateSchemasOptions {
        tenant: true,
        schema_name: Some("ghost".to_string()),
        ..MigrateSchemasOptions::default()
    };
    let err = command(&pool).run(&options, &Settings::default()).await.unwrap_err();

    assert!(matches!(err, TenantError::SchemaNotFound(ref s) if s == "ghost"));
    assert_eq!(err.kind(), ErrorKind::SchemaNotFound);
    assert_eq!(pool.acquisitions(), 0);
}

#[tokio::test]
async fn test_unknown_executor_touches_nothing() {
    let pool = pool();
    let options = MigrateSchemasOptions {
        executor: Some("threads".to_string()),
        ..MigrateSchemasOptions::default()
    };
    let err = command(&pool).run(&options, &Settings::default()).await.unwrap_err();

    assert!(matches!(err, TenantError::UnknownExecutor { .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(pool.acquisitions(), 0);
}

#[tokio::test]
async fn test_executor_from_settings() {
    let pool = pool();
    let settings = Settings {
        migration_executor: "multiprocessing".to_string(),
        ..Settings::default()
    };
    let report = command(&pool)
        .run(&MigrateSchemasOptions::default(), &settings)
        .await
        .unwrap();
    assert_eq!(report.executor, "parallel");
}

#[tokio::test]
async fn test_check_reports_pending_without_applying() {
    let pool = pool();
    let options = MigrateSchemasOptions {
        check: true,
        ..MigrateSchemasOptions::default()
    };
    let report = command(&pool).run(&options, &Settings::default()).await.unwrap();

    assert!(report
        .entries()
        .iter()
        .all(|e| matches!(&e.outcome, ExecutionOutcome::Skipped(SkipReason::Plan(p)) if p.pending == 2)));
    assert!(pool.applied_in("public").is_empty());
    let err = verdict(&report, true).unwrap_err();
    assert!(matches!(err, TenantError::UnappliedMigrations(3)));
    assert_eq!(err.exit_code(), 1);

    command(&pool)
        .run(&MigrateSchemasOptions::default(), &Settings::default())
        .await
        .unwrap();
    let report = command(&pool).run(&options, &Settings::default()).await.unwrap();
    assert!(verdict(&report, true).is_ok());
}

#[tokio::test]
async fn test_fail_fast_public_failure_skips_tenants() {
    let pool = pool();
    pool.fail_activation_for("public");
    let options = MigrateSchemasOptions {
        fail_fast: true,
        ..MigrateSchemasOptions::default()
    };
    let report = command(&pool).run(&options, &Settings::default()).await.unwrap();

    assert_eq!(
        report.kinds(),
        vec![
            ("public".to_string(), OutcomeKind::Failure),
            ("acme".to_string(), OutcomeKind::Skipped),
            ("globex".to_string(), OutcomeKind::Skipped),
        ]
    );
    assert!(pool.applied_in("acme").is_empty());
    let err = verdict(&report, false).unwrap_err();
    assert!(matches!(err, TenantError::MigrationsFailed { failed: 1, total: 3 }));
}

#[tokio::test]
async fn test_interactive_decline() {
    let pool = pool();
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&asked);
    let command = command(&pool).with_confirm(Arc::new(move |question: &str| {
        assert!(question.contains("3 schema(s)"));
        counter.fetch_add(1, Ordering::SeqCst);
        false
    }));
    let options = MigrateSchemasOptions {
        interactive: true,
        ..MigrateSchemasOptions::default()
    };
    let report = command.run(&options, &Settings::default()).await.unwrap();

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert!(report.is_empty());
    assert_eq!(pool.acquisitions(), 0);
}

#[tokio::test]
async fn test_interactive_skips_prompt_without_targets() {
    let pool = InMemoryPool::new();
    let command = MigrateSchemasCommand::with_backend(MigrationBackend {
        pool: Arc::new(pool.clone()),
        framework: Arc::new(GraphMigrationFramework::new(migrations()).unwrap()),
        resolver: Arc::new(StaticTenantResolver::default()),
    })
    .with_confirm(Arc::new(|question: &str| panic!("unexpected prompt: {question}")));
    let options = MigrateSchemasOptions {
        tenant: true,
        interactive: true,
        ..MigrateSchemasOptions::default()
    };
    let report = command.run(&options, &Settings::default()).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(pool.acquisitions(), 0);
}

#[tokio::test]
async fn test_interactive_accept() {
    let pool = pool();
    let command = command(&pool).with_confirm(Arc::new(|_: &str| true));
    let options = MigrateSchemasOptions {
        interactive: true,
        ..MigrateSchemasOptions::default()
    };
    let report = command.run(&options, &Settings::default()).await.unwrap();
    assert_eq!(report.counts().success, 3);
}

#[tokio::test]
async fn test_backend_from_settings() {
    let dir = tempfile::tempdir().unwrap();
    let app = dir.path().join("shop");
    std::fs::create_dir_all(&app).unwrap();
    std::fs::write(
        app.join("0001_initial.json"),
        r#"{"initial": true, "forwards": ["CREATE TABLE shop_order (id int)"]}"#,
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.databases.insert(
        "default".to_string(),
        DatabaseSettings {
            engine: "memory".to_string(),
            pool_size: 2,
            ..DatabaseSettings::default()
        },
    );
    let options = MigrateSchemasOptions {
        shared: true,
        migrations_dir: dir.path().display().to_string(),
        ..MigrateSchemasOptions::default()
    };
    let report = MigrateSchemasCommand::new().run(&options, &settings).await.unwrap();

    assert!(report.is_success());
    assert_eq!(schemas(&report), vec!["public"]);
}

#[tokio::test]
async fn test_unknown_database_alias() {
    let options = MigrateSchemasOptions {
        database: "replica".to_string(),
        ..MigrateSchemasOptions::default()
    };
    let err = MigrateSchemasCommand::new()
        .run(&options, &Settings::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_dispatch_through_registry() {
    let pool = pool();
    pool.fail_activation_for("acme");
    let mut registry = CommandRegistry::new();
    registry.register(Box::new(command(&pool)));

    let matches = registry
        .build_cli()
        .try_get_matches_from(["tenant-schemas", "migrate_schemas", "--tenant", "--format", "json"])
        .unwrap();
    let err = registry.execute(&matches, &Settings::default()).await.unwrap_err();

    assert!(matches!(err, TenantError::MigrationsFailed { failed: 1, total: 2 }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(pool.applied_in("globex").len(), 2);
}
