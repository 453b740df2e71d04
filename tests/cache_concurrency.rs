//! Concurrency behaviour of the cache store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use calcache::cache::{CacheKey, CacheStore, LookupOptions};
use calcache::types::errors::EvalError;
use calcache::types::responses::{Evaluation, ServedFrom};

fn twelve() -> Evaluation {
    Evaluation::new(12.0, vec!["1+2 = 3".to_string(), "3*4 = 12".to_string()])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_compute_once() {
    let store = Arc::new(CacheStore::new(Duration::from_secs(60), None));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        let calls = Arc::clone(&calls);
        tasks.push(tokio::spawn(async move {
            store
                .get_or_compute(&CacheKey::new("(1+2)*4"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, EvalError>(twelve())
                })
                .await
        }));
    }

    let mut computed = 0;
    for task in tasks {
        let lookup = task.await.unwrap().unwrap();
        assert_eq!(lookup.evaluation.value, 12.0);
        if lookup.served_from == ServedFrom::Computed {
            computed += 1;
        } else {
            assert_eq!(lookup.served_from, ServedFrom::FreshCache);
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(computed, 1);
    assert_eq!(store.stats().computations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_keys_do_not_block_each_other() {
    let store = Arc::new(CacheStore::new(Duration::from_secs(60), None));
    let (release_a, blocked) = oneshot::channel::<()>();

    let slow = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .get_or_compute(&CacheKey::new("1+1"), move || async move {
                    let _ = blocked.await;
                    Ok::<_, EvalError>(Evaluation::new(2.0, vec!["1+1 = 2".to_string()]))
                })
                .await
        })
    };

    // Give the slow computation time to take its slot.
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Several readers of another key finish while A is still in flight.
    let mut others = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        others.spawn(async move {
            store
                .get_or_compute(&CacheKey::new("(1+2)*4"), || async { Ok::<_, EvalError>(twelve()) })
                .await
        });
    }

    let finished = tokio::time::timeout(Duration::from_secs(1), async {
        let mut served = Vec::new();
        while let Some(joined) = others.join_next().await {
            served.push(joined.unwrap().unwrap().served_from);
        }
        served
    })
    .await
    .expect("unrelated key must not wait for the slow computation");

    assert_eq!(finished.len(), 4);
    assert_eq!(
        finished.iter().filter(|s| **s == ServedFrom::Computed).count(),
        1
    );
    assert!(!slow.is_finished());

    release_a.send(()).unwrap();
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.evaluation.value, 2.0);
    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_revalidations_fall_back_to_stale() {
    let store = Arc::new(CacheStore::new(Duration::from_secs(60), None));
    let key = CacheKey::new("(1+2)*4");
    store.insert(key.clone(), twelve()).await;

    // max-age 0 makes the entry stale for every caller; the server is "down".
    let options = LookupOptions {
        max_age: Some(Duration::ZERO),
        no_store: false,
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            store
                .get_or_compute_with(&key, options, || async {
                    Err::<Evaluation, _>(EvalError::ServerUnavailable("connection refused".into()))
                })
                .await
        }));
    }

    for task in tasks {
        let lookup = task.await.unwrap().unwrap();
        assert_eq!(lookup.served_from, ServedFrom::StaleCache);
        assert_eq!(lookup.evaluation.value, 12.0);
    }
    assert_eq!(store.stats().stale_hits, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_callers_share_a_failed_computation() {
    let store = Arc::new(CacheStore::new(Duration::from_secs(60), None));
    let calls = Arc::new(AtomicUsize::new(0));
    let started = std::time::Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let calls = Arc::clone(&calls);
        tasks.push(tokio::spawn(async move {
            store
                .get_or_compute(&CacheKey::new("9*9"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Err::<Evaluation, _>(EvalError::Timeout(Duration::from_millis(200)))
                })
                .await
        }));
    }

    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, EvalError::Timeout(_)));
    }

    // One upstream attempt, not one per queued caller.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(store.stats().computations, 1);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_store_never_evicts_an_in_flight_key() {
    let store = Arc::new(CacheStore::new(Duration::from_secs(60), Some(1)));
    let calls = Arc::new(AtomicUsize::new(0));
    let (release_a, blocked) = oneshot::channel::<()>();

    let first = {
        let store = Arc::clone(&store);
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            store
                .get_or_compute(&CacheKey::new("1+1"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = blocked.await;
                    Ok::<_, EvalError>(Evaluation::new(2.0, vec!["1+1 = 2".to_string()]))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Pushes the store past its bound while "1+1" is still computing.
    store.insert(CacheKey::new("(1+2)*4"), twelve()).await;
    assert_eq!(store.len(), 2);
    assert_eq!(store.stats().evictions, 0);

    let second = {
        let store = Arc::clone(&store);
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            store
                .get_or_compute(&CacheKey::new("1+1"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, EvalError>(Evaluation::new(2.0, vec![]))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    release_a.send(()).unwrap();
    assert_eq!(first.await.unwrap().unwrap().served_from, ServedFrom::Computed);
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.served_from, ServedFrom::FreshCache);
    assert_eq!(second.evaluation.steps, vec!["1+1 = 2"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Once idle, the next insert brings the store back within its bound.
    store.insert(CacheKey::new("3"), Evaluation::new(3.0, vec![])).await;
    let stats = store.stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.evictions, 2);
}
