use optlock::store::{Creator, Deleter, FindError, Finder, Lister};
use optlock::{version, Mutator, Pagination, RetryPolicy};
use optlock_postgres::{Filter, ScopeError, Store, TransactionError};
use serde::{Deserialize, Serialize};

mod setup;

use setup::{Execution, Status};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Space {
    parent_id: Option<i64>,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Path {
    space_id: i64,
    value: String,
}

#[derive(Debug, thiserror::Error)]
#[error("path is already taken")]
struct PathTaken;

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn changes_are_visible_only_after_commit() {
    let pool = setup::connect_to_database().await;

    let store: Store<i64, Execution> = Store::new(pool, setup::unique_record_type("executions"))
        .await
        .unwrap();

    let tx = store.begin().await.expect("transaction should begin");
    tx.create(1, Execution::pending(7, 1)).await.unwrap();

    assert!(tx.find(&1).await.is_ok());
    assert!(matches!(store.find(&1).await, Err(FindError::NotFound)));

    tx.commit().await.expect("transaction should commit");

    assert!(store.find(&1).await.is_ok());
    assert!(matches!(tx.commit().await, Err(TransactionError::Closed)));
    assert!(tx.find(&1).await.is_err());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn rolled_back_changes_are_discarded() {
    let pool = setup::connect_to_database().await;

    let store: Store<i64, Execution> = Store::new(pool, setup::unique_record_type("executions"))
        .await
        .unwrap();

    store.create(1, Execution::pending(7, 1)).await.unwrap();

    let tx = store.begin().await.unwrap();
    tx.delete(&1, version::Check::MustBe(version::INITIAL))
        .await
        .unwrap();
    tx.create(2, Execution::pending(7, 2)).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(store.find(&1).await.is_ok());
    assert!(matches!(store.find(&2).await, Err(FindError::NotFound)));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn multiple_record_types_are_changed_atomically() {
    let pool = setup::connect_to_database().await;

    let spaces: Store<i64, Space> = Store::new(pool.clone(), setup::unique_record_type("spaces"))
        .await
        .unwrap();
    let paths: Store<String, Path> = Store::new(pool, setup::unique_record_type("paths"))
        .await
        .unwrap();

    let paths_type = paths.record_type().to_owned();

    let space = spaces
        .with_transaction(|tx| {
            let paths_type = paths_type.clone();

            async move {
                let space = tx
                    .create(
                        1,
                        Space {
                            parent_id: None,
                            name: "acme".to_owned(),
                        },
                    )
                    .await?;

                tx.for_record_type::<String, Path>(paths_type)
                    .create(
                        "acme".to_owned(),
                        Path {
                            space_id: space.id,
                            value: "acme".to_owned(),
                        },
                    )
                    .await?;

                Ok::<_, anyhow::Error>(space)
            }
        })
        .await
        .expect("transaction should commit");

    assert_eq!(space, spaces.find(&1).await.unwrap());
    assert_eq!(1, paths.find(&"acme".to_owned()).await.unwrap().payload.space_id);

    // Moving the space under a path that already exists fails, and nothing is changed.
    paths
        .create(
            "acme/moved".to_owned(),
            Path {
                space_id: 2,
                value: "acme/moved".to_owned(),
            },
        )
        .await
        .unwrap();

    let result = spaces
        .with_transaction(|tx| {
            let paths_type = paths_type.clone();
            let space = space.clone();

            async move {
                let moved = Mutator::new(tx.clone())
                    .with_policy(RetryPolicy::unbounded())
                    .apply(space, |space| {
                        space.parent_id = Some(2);
                        Ok::<_, PathTaken>(())
                    })
                    .await
                    .map_err(anyhow::Error::from)?;

                tx.for_record_type::<String, Path>(paths_type)
                    .create(
                        "acme/moved".to_owned(),
                        Path {
                            space_id: moved.id,
                            value: "acme/moved".to_owned(),
                        },
                    )
                    .await
                    .map_err(|_| PathTaken)?;

                Ok::<_, anyhow::Error>(moved)
            }
        })
        .await;

    match result {
        Err(ScopeError::Aborted(err)) => assert!(err.is::<PathTaken>()),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(space, spaces.find(&1).await.unwrap());
    assert_eq!(2, paths.count(&Filter::all()).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn mutations_can_run_inside_a_transaction() {
    let pool = setup::connect_to_database().await;

    let store: Store<i64, Execution> = Store::new(pool, setup::unique_record_type("executions"))
        .await
        .unwrap();

    for number in 1..=3 {
        store
            .create(number, Execution::pending(7, number))
            .await
            .unwrap();
    }

    let tx = store.begin().await.unwrap();
    tx.execute("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .await
        .expect("isolation level should be set");

    let mutator = Mutator::new(tx.clone());

    let pending = tx
        .page(&Filter::all(), Pagination::default())
        .await
        .unwrap();

    assert_eq!(3, pending.total);

    for record in pending.items {
        mutator
            .apply(record, |execution| {
                execution.status = Status::Running;
                Ok::<(), std::convert::Infallible>(())
            })
            .await
            .unwrap();
    }

    tx.commit().await.unwrap();

    let running = store
        .count(&Filter::containing(serde_json::json!({ "status": "running" })))
        .await
        .unwrap();

    assert_eq!(3, running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a PostgreSQL database, run with --ignored"]
async fn page_total_agrees_with_items_while_records_are_inserted() {
    const EXISTING: i64 = 5;
    const INSERTED: i64 = 50;

    let pool = setup::connect_to_database().await;

    let store: Store<i64, Execution> = Store::new(pool, setup::unique_record_type("executions"))
        .await
        .unwrap();

    for number in 1..=EXISTING {
        store
            .create(number, Execution::pending(7, number))
            .await
            .unwrap();
    }

    // READ COMMITTED: every statement in the transaction sees the inserts
    // committed so far by the writer.
    let tx = store.begin().await.unwrap();

    let writer = {
        let store = store.clone();

        tokio::spawn(async move {
            for number in EXISTING + 1..=EXISTING + INSERTED {
                store
                    .create(number, Execution::pending(7, number))
                    .await
                    .unwrap();
            }
        })
    };

    let everything = Pagination::new(1, 100);
    let mut previous = 0;

    loop {
        let finished = writer.is_finished();
        let page = tx.page(&Filter::all(), everything).await.unwrap();

        assert_eq!(page.items.len() as u64, page.total);
        assert!(page.total >= previous);
        previous = page.total;

        if finished {
            break;
        }
    }

    writer.await.expect("writer task should not panic");
    assert_eq!((EXISTING + INSERTED) as u64, previous);

    let beyond = tx
        .page(&Filter::all(), Pagination::new(2, 100))
        .await
        .unwrap();

    assert!(beyond.items.is_empty());
    assert_eq!(previous, beyond.total);

    tx.rollback().await.unwrap();
}
