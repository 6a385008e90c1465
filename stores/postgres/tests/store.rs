use chrono::{Duration, Utc};
use optlock::clock::Manual;
use optlock::store::{
    CreateError, Creator, DeleteError, Deleter, FindError, Finder, Lister, UpdateError, Updater,
};
use optlock::{version, Pagination};
use optlock_postgres::{Filter, Store};
use serde_json::json;

mod setup;

use setup::{Execution, Status};

async fn executions_store() -> Store<i64, Execution> {
    let pool = setup::connect_to_database().await;

    Store::new(pool, setup::unique_record_type("executions"))
        .await
        .expect("store should be created")
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn created_record_can_be_found() {
    let store = executions_store().await;

    let created = store
        .create(1, Execution::pending(10, 1))
        .await
        .expect("record should be created");

    assert_eq!(version::INITIAL, created.version);
    assert_eq!(created.created_at, created.updated_at);

    let found = store.find(&1).await.expect("record should be found");
    assert_eq!(created, found);

    let result = store.find(&2).await;
    assert!(matches!(result, Err(FindError::NotFound)));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn creating_an_existing_record_fails() {
    let store = executions_store().await;

    store.create(1, Execution::pending(10, 1)).await.unwrap();

    let result = store.create(1, Execution::pending(10, 2)).await;
    assert!(matches!(result, Err(CreateError::AlreadyExists)));

    // The original record is left untouched.
    assert_eq!(1, store.find(&1).await.unwrap().payload.number);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn update_increments_the_version_and_mirrors_it_back() {
    let store = executions_store().await;

    let mut record = store.create(1, Execution::pending(10, 1)).await.unwrap();
    record.payload.status = Status::Running;

    store.update(&mut record).await.expect("update should succeed");

    assert_eq!(version::INITIAL + 1, record.version);
    assert!(record.updated_at >= record.created_at);
    assert_eq!(record, store.find(&1).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn stale_update_conflicts_and_leaves_the_record_untouched() {
    let store = executions_store().await;

    let mut first = store.create(1, Execution::pending(10, 1)).await.unwrap();
    let mut second = first.clone();

    first.payload.status = Status::Running;
    store.update(&mut first).await.unwrap();

    second.payload.status = Status::Failure;
    let stale = second.clone();

    let err = store
        .update(&mut second)
        .await
        .expect_err("stale update should conflict");

    match err {
        UpdateError::Conflict(conflict) => {
            assert_eq!(version::INITIAL, conflict.expected);
            assert_eq!(Some(first.version), conflict.actual);
        },
        err => panic!("unexpected error: {err}"),
    }

    assert_eq!(stale, second);
    assert_eq!(first, store.find(&1).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn updating_a_deleted_record_conflicts() {
    let store = executions_store().await;

    let mut record = store.create(1, Execution::pending(10, 1)).await.unwrap();
    store.delete(&1, version::Check::Any).await.unwrap();

    let err = store.update(&mut record).await.expect_err("should conflict");

    assert!(matches!(
        err,
        UpdateError::Conflict(version::ConflictError { actual: None, .. })
    ));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn update_time_never_moves_backwards() {
    let store = executions_store().await;

    let clock = Manual::starting_at(Utc::now());
    let store = store.with_clock(clock.clone());

    let mut record = store.create(1, Execution::pending(10, 1)).await.unwrap();

    clock.advance(-Duration::hours(1));
    record.payload.status = Status::Running;
    store.update(&mut record).await.unwrap();

    assert_eq!(record.created_at, record.updated_at);

    clock.advance(Duration::hours(2));
    record.payload.status = Status::Success;
    store.update(&mut record).await.unwrap();

    assert!(record.updated_at > record.created_at);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn delete_checks_the_expected_version() {
    let store = executions_store().await;

    let mut record = store.create(1, Execution::pending(10, 1)).await.unwrap();
    store.update(&mut record).await.unwrap();

    let err = store
        .delete(&1, version::Check::MustBe(version::INITIAL))
        .await
        .expect_err("stale delete should conflict");

    match err {
        DeleteError::Conflict(conflict) => {
            assert_eq!(version::INITIAL, conflict.expected);
            assert_eq!(Some(record.version), conflict.actual);
        },
        err => panic!("unexpected error: {err}"),
    }

    store
        .delete(&1, version::Check::MustBe(record.version))
        .await
        .expect("delete with the current version should succeed");

    assert!(matches!(store.find(&1).await, Err(FindError::NotFound)));
    assert!(matches!(
        store.delete(&1, version::Check::Any).await,
        Err(DeleteError::NotFound)
    ));
    assert!(matches!(
        store.delete(&1, version::Check::MustBe(record.version)).await,
        Err(DeleteError::NotFound)
    ));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn list_and_count_honor_filter_and_pagination() {
    let store = executions_store().await;

    for number in 1..=25 {
        store
            .create(number, Execution::pending(7, number))
            .await
            .unwrap();
    }

    for number in 26..=30 {
        store
            .create(number, Execution::pending(8, number))
            .await
            .unwrap();
    }

    let filter = Filter::containing(json!({ "pipeline_id": 7 }));

    assert_eq!(25, store.count(&filter).await.unwrap());
    assert_eq!(30, store.count(&Filter::all()).await.unwrap());

    let listed: Vec<_> = store
        .list(&filter, Pagination::new(2, 10))
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();

    assert_eq!((11..=20).collect::<Vec<_>>(), listed);

    let page = store.page(&filter, Pagination::new(3, 10)).await.unwrap();

    assert_eq!(25, page.total);
    assert_eq!(3, page.total_pages());
    assert!(!page.has_next());
    assert_eq!(
        (21..=25).collect::<Vec<_>>(),
        page.items.iter().map(|record| record.id).collect::<Vec<_>>()
    );

    let beyond = store.list(&filter, Pagination::new(4, 10)).await.unwrap();
    assert!(beyond.is_empty());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn filters_can_be_built_from_serializable_values() {
    let store = executions_store().await;

    let mut running = store.create(1, Execution::pending(7, 1)).await.unwrap();
    store.create(2, Execution::pending(7, 2)).await.unwrap();

    running.payload.status = Status::Running;
    store.update(&mut running).await.unwrap();

    #[derive(serde::Serialize)]
    struct ByStatus {
        status: Status,
    }

    let filter = Filter::containing_serialized(&ByStatus {
        status: Status::Running,
    })
    .unwrap();

    let listed = store.list(&filter, Pagination::default()).await.unwrap();
    assert_eq!(vec![running], listed);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn record_types_are_isolated_from_each_other() {
    let pool = setup::connect_to_database().await;

    let executions: Store<i64, Execution> =
        Store::new(pool.clone(), setup::unique_record_type("executions"))
            .await
            .unwrap();

    let labels: Store<i64, String> = Store::new(pool, setup::unique_record_type("labels"))
        .await
        .unwrap();

    executions
        .create(1, Execution::pending(7, 1))
        .await
        .unwrap();
    labels.create(1, "nightly".to_owned()).await.unwrap();

    assert_eq!(1, executions.count(&Filter::all()).await.unwrap());
    assert_eq!(1, labels.count(&Filter::all()).await.unwrap());
    assert_eq!("nightly", labels.find(&1).await.unwrap().payload);
}
