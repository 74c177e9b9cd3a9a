//! Concurrency tests for the query coalescer.

use super::TestError;
use coalescer::{CoalesceConfig, Coalescer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn coalescer_with_window(window: Duration) -> Arc<Coalescer<TestError>> {
    Arc::new(Coalescer::new(Arc::new(
        CoalesceConfig::builder().window_duration(window).build(),
    )))
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let coalescer = coalescer_with_window(Duration::from_millis(20));
    let call_count = Arc::new(AtomicUsize::new(0));

    // Spawn multiple concurrent requests on the same namespace.
    let mut handles = vec![];
    for i in 0..10u64 {
        let coalescer = Arc::clone(&coalescer);
        let cc = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            coalescer
                .coalesce("db.same-key", 1000 + i, || async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TestError>(vec![b"response: same-key".to_vec()])
                })
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(*result.unwrap(), vec![b"response: same-key".to_vec()]);
    }

    // But only one actual call was made
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_different_namespaces_execute_separately() {
    let coalescer = coalescer_with_window(Duration::from_millis(20));
    let call_count = Arc::new(AtomicUsize::new(0));

    // Spawn requests with different namespaces.
    let mut handles = vec![];
    for i in 0..5u64 {
        let coalescer = Arc::clone(&coalescer);
        let cc = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            coalescer
                .coalesce(&format!("db.key-{i}"), 1, || async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TestError>(vec![format!("response: key-{i}").into_bytes()])
                })
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(*result, vec![format!("response: key-{i}").into_bytes()]);
    }

    // Each unique namespace caused a separate call
    assert_eq!(call_count.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_error_propagates_to_all_waiters() {
    let coalescer = coalescer_with_window(Duration::from_millis(20));
    let call_count = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..5 {
        let coalescer = Arc::clone(&coalescer);
        let cc = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            coalescer
                .coalesce("db.same-key", 1, || async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<Vec<Vec<u8>>, _>(TestError::new("shared error"))
                })
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("shared error"));
    }

    // But only one call was made
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mixed_namespaces_concurrent() {
    let coalescer = coalescer_with_window(Duration::from_millis(20));
    let call_count = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];

    // 3 requests for "key-a"
    for _ in 0..3 {
        let coalescer = Arc::clone(&coalescer);
        let cc = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            coalescer
                .coalesce("db.key-a", 1, || async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TestError>(vec![b"a".to_vec()])
                })
                .await
        }));
    }

    // 2 requests for "key-b"
    for _ in 0..2 {
        let coalescer = Arc::clone(&coalescer);
        let cc = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            coalescer
                .coalesce("db.key-b", 1, || async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TestError>(vec![b"b".to_vec()])
                })
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    // Only 2 calls (one per unique namespace)
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_high_concurrency() {
    let coalescer = coalescer_with_window(Duration::from_millis(10));
    let call_count = Arc::new(AtomicUsize::new(0));

    // Spawn 100 concurrent requests for the same namespace.
    let mut handles = vec![];
    for i in 0..100u64 {
        let coalescer = Arc::clone(&coalescer);
        let cc = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            coalescer
                .coalesce("db.hot-key", i, || async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, TestError>(vec![b"response: hot-key".to_vec()])
                })
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(*result.unwrap(), vec![b"response: hot-key".to_vec()]);
    }

    // Heavy coalescing despite 100 concurrent requests, all within the gap cap.
    assert!(
        call_count.load(Ordering::SeqCst) <= 3,
        "expected heavy coalescing, got {} calls",
        call_count.load(Ordering::SeqCst)
    );

    let stats = coalescer.get_stats();
    assert_eq!(stats.total_requests, 100);
    assert_eq!(stats.actual_queries + stats.coalesced_requests, 100);
}
