use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use botgate::Error;
use botgate::worker::WorkerPool;

#[test]
fn test_jobs_run() {
    let pool = WorkerPool::new(2, 4, 64).unwrap();
    let (tx, rx) = mpsc::channel();

    for i in 0..10 {
        let tx = tx.clone();
        pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
    }

    let mut seen: Vec<i32> = (0..10).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());

    pool.shutdown();
}

#[test]
fn test_single_worker_preserves_fifo() {
    let pool = WorkerPool::new(1, 4, 64).unwrap();
    let (tx, rx) = mpsc::channel();

    for i in 0..20 {
        let tx = tx.clone();
        pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
    }

    let seen: Vec<i32> = (0..20).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());

    pool.shutdown();
}

#[test]
fn test_concurrency_never_exceeds_thread_count() {
    const THREADS: usize = 3;
    let pool = WorkerPool::new(THREADS, 4, 256).unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    for _ in 0..30 {
        let running = running.clone();
        let peak = peak.clone();
        let tx = tx.clone();
        pool.submit(Box::new(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            running.fetch_sub(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }))
        .unwrap();
    }

    for _ in 0..30 {
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= THREADS);
    pool.shutdown();
}

#[test]
fn test_queue_full_is_surfaced() {
    // One worker stuck on a long job; queue bounded at 2.
    let pool = WorkerPool::new(1, 2, 2).unwrap();
    let (block_tx, block_rx) = mpsc::channel::<()>();

    pool.submit(Box::new(move || {
        let _ = block_rx.recv_timeout(Duration::from_secs(5));
    }))
    .unwrap();

    // Give the worker a moment to take the blocking job off the queue.
    std::thread::sleep(Duration::from_millis(50));

    pool.submit(Box::new(|| {})).unwrap();
    pool.submit(Box::new(|| {})).unwrap();

    match pool.submit(Box::new(|| {})) {
        Err(Error::QueueFull) => {}
        other => panic!("expected QueueFull, got {other:?}"),
    }

    block_tx.send(()).unwrap();
    pool.shutdown();
}

#[test]
fn test_shutdown_drains_pending_jobs() {
    let pool = WorkerPool::new(2, 4, 256).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let counter = counter.clone();
        pool.submit(Box::new(move || {
            std::thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }

    pool.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), 50);
}

#[test]
fn test_submit_after_shutdown_fails() {
    let pool = WorkerPool::new(1, 2, 8).unwrap();
    pool.shutdown();

    match pool.submit(Box::new(|| {})) {
        Err(Error::PoolClosed) => {}
        other => panic!("expected PoolClosed, got {other:?}"),
    }
}

#[test]
fn test_invalid_sizes_rejected() {
    assert!(WorkerPool::new(0, 2, 8).is_err());
    assert!(WorkerPool::new(2, 8, 2).is_err());
    assert!(WorkerPool::new(2, 0, 0).is_err());
}
