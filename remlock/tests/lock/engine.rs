use futures::future::join_all;
use rand::Rng;
use remlock::{signal, CancellationToken, Engine, LockKind, Options, QueueStatus, Registry};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{events, Trace, ORDERED_TRACE};

#[tokio::test]
async fn execute_write() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    trace.lock(&lock, LockKind::Write, Duration::ZERO, None).await.unwrap();

    assert_eq!(trace.events(), events(&["write 1 waiting", "write 1 start", "write 1 complete"]));
    assert!(lock.queue().unwrap().is_idle());
}

#[tokio::test]
async fn execute_read() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    trace.lock(&lock, LockKind::Read, Duration::ZERO, None).await.unwrap();

    assert_eq!(trace.events(), events(&["read 1 waiting", "read 1 start", "read 1 complete"]));
    assert!(lock.queue().unwrap().is_idle());
}

#[tokio::test(start_paused = true)]
async fn execute_in_order() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    crate::run_ordered(&lock, &trace).await;

    assert_eq!(trace.events(), events(ORDERED_TRACE));
}

#[tokio::test(start_paused = true)]
async fn read_then_write() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    let read = trace.lock(&lock, LockKind::Read, Duration::from_millis(500), None);
    let write = trace.lock(&lock, LockKind::Write, Duration::ZERO, None);
    let (read, write) = tokio::join!(read, write);
    read.unwrap();
    write.unwrap();

    assert_eq!(
        trace.events(),
        events(&[
            "read 1 waiting",
            "write 1 waiting",
            "read 1 start",
            "read 1 complete",
            "write 1 start",
            "write 1 complete",
        ])
    );
}

#[tokio::test(start_paused = true)]
async fn readers_of_batch_run_together() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();
    let hold = Duration::from_millis(100);

    let requests = vec![
        trace.lock(&lock, LockKind::Write, hold, None),
        trace.lock(&lock, LockKind::Read, hold, None),
        trace.lock(&lock, LockKind::Read, hold, None),
        trace.lock(&lock, LockKind::Write, hold, None),
        trace.lock(&lock, LockKind::Read, hold, None),
    ];
    for res in join_all(requests).await {
        res.unwrap();
    }

    let successful: Vec<_> = trace.events().into_iter().filter(|e| !e.ends_with("waiting")).collect();
    assert_eq!(
        successful,
        events(&[
            "write 1 start",
            "write 1 complete",
            "read 1 start",
            "read 2 start",
            "read 1 complete",
            "read 2 complete",
            "write 2 start",
            "write 2 complete",
            "read 3 start",
            "read 3 complete",
        ])
    );
}

#[tokio::test]
async fn continue_after_error() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    let read = lock.read_lock(None);
    let write = trace.lock(&lock, LockKind::Write, Duration::ZERO, None);
    let failing = async {
        let _release = read.await?;
        trace.push("read failing");
        Err::<(), _>(remlock::LockError::Relay(remlock::ErrorInfo::new("TestError", "failed inside critical section")))
    };

    let (failed, write) = tokio::join!(failing, write);
    assert!(failed.is_err());
    write.unwrap();

    assert_eq!(trace.events(), events(&["write 1 waiting", "read failing", "write 1 start", "write 1 complete"]));
    assert!(lock.queue().unwrap().is_idle());
}

#[tokio::test]
async fn continue_after_panic() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());

    let holder = lock.clone();
    let res = tokio::spawn(async move {
        let _release = holder.write_lock(None).await.unwrap();
        panic!("panicking inside critical section");
    })
    .await;
    assert!(res.unwrap_err().is_panic());

    let mut release = lock.write_lock(None).await.unwrap();
    release.release();
}

#[tokio::test(start_paused = true)]
async fn read_timeout() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    let mut write = lock.write_lock(None).await.unwrap();

    let timeout = signal::timeout(Duration::from_millis(100));
    let err = trace.lock(&lock, LockKind::Read, Duration::ZERO, Some(&timeout)).await.unwrap_err();
    println!("read lock error: {}", &err);
    assert!(err.is_cancelled());
    assert_eq!(trace.events(), events(&["read 1 waiting", "read 1 error"]));

    write.release();
    assert!(lock.queue().unwrap().is_idle());
}

#[tokio::test(start_paused = true)]
async fn write_timeout() {
    crate::init();
    let lock = Registry::authority().acquire(&Options::default());
    let trace = Trace::default();

    let read = lock.read_lock(None).await.unwrap();

    let timeout = signal::timeout(Duration::from_millis(100));
    let err = trace.lock(&lock, LockKind::Write, Duration::ZERO, Some(&timeout)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(trace.events(), events(&["write 1 waiting", "write 1 error"]));

    drop(read);
    assert!(lock.queue().unwrap().is_idle());
}

#[tokio::test]
async fn cancelled_before_request() {
    crate::init();
    let engine = Engine::new(None);

    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(engine.read_lock(Some(&cancel)).await.unwrap_err().is_cancelled());
    assert!(engine.write_lock(Some(&cancel)).await.unwrap_err().is_cancelled());
    assert!(engine.status().is_idle());
}

#[tokio::test]
async fn cancelled_while_queued() {
    crate::init();
    let engine = Engine::new(None);

    let w1 = engine.write_lock(None).await.unwrap();

    let cancel = CancellationToken::new();
    let w2 = engine.write_lock(Some(&cancel));
    let w3 = engine.write_lock(None);
    assert_eq!(engine.status(), QueueStatus { size: 2, pending: 1, readers: 0, writer: true });

    cancel.cancel();
    assert_eq!(engine.status().size, 1);

    drop(w1);
    assert!(w2.await.unwrap_err().is_cancelled());

    let mut w3 = w3.await.unwrap();
    assert_eq!(engine.status(), QueueStatus { size: 0, pending: 1, readers: 0, writer: true });
    w3.release();
    assert!(engine.status().is_idle());
}

#[tokio::test(start_paused = true)]
async fn cancel_after_grant() {
    crate::init();
    let engine = Engine::new(None);

    let cancel = CancellationToken::new();
    let mut w1 = engine.write_lock(Some(&cancel)).await.unwrap();
    cancel.cancel();

    let w2 = engine.write_lock(None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!w1.is_released());
    assert_eq!(engine.status(), QueueStatus { size: 1, pending: 1, readers: 0, writer: true });

    w1.release();
    let mut w2 = w2.await.unwrap();
    w2.release();
}

#[tokio::test]
async fn dropped_request() {
    crate::init();
    let engine = Engine::new(None);

    let mut w1 = engine.write_lock(None).await.unwrap();
    let r1 = engine.read_lock(None);
    let w2 = engine.write_lock(None);
    assert_eq!(engine.status().size, 2);

    drop(w2);
    assert_eq!(engine.status().size, 1);

    w1.release();
    let r1 = r1.await.unwrap();
    assert_eq!(engine.status(), QueueStatus { size: 0, pending: 1, readers: 1, writer: false });

    drop(r1);
    assert!(engine.status().is_idle());
}

#[tokio::test]
async fn release_is_idempotent() {
    crate::init();
    let engine = Engine::new(None);

    let mut r1 = engine.read_lock(None).await.unwrap();
    let r2 = engine.read_lock(None).await.unwrap();
    let w1 = engine.write_lock(None);

    r1.release();
    r1.release();
    assert!(r1.is_released());
    drop(r1);

    // r2 still holds the batch.
    assert_eq!(engine.status(), QueueStatus { size: 1, pending: 1, readers: 1, writer: false });

    drop(r2);
    let mut w1 = w1.await.unwrap();
    w1.release();
    w1.release();
    assert!(engine.status().is_idle());
}

#[tokio::test(start_paused = true)]
async fn read_concurrency() {
    crate::init();
    let engine = Engine::new(Some(2));
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    let mut requests = Vec::new();
    for _ in 0..6 {
        let acquire = engine.read_lock(None);
        let active = active.clone();
        let max_active = max_active.clone();
        requests.push(async move {
            let _release = acquire.await.unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    // The writer is queued behind the whole batch.
    let write = engine.write_lock(None);
    assert_eq!(engine.status(), QueueStatus { size: 1, pending: 1, readers: 2, writer: false });

    join_all(requests).await;
    assert_eq!(max_active.load(Ordering::SeqCst), 2);

    let mut write = write.await.unwrap();
    write.release();
}

#[test]
#[should_panic]
fn zero_concurrency() {
    Engine::new(Some(0));
}

#[tokio::test(start_paused = true)]
async fn idle() {
    crate::init();
    let engine = Engine::new(None);
    engine.idle().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let listener_calls = calls.clone();
    engine.on_idle(move || {
        listener_calls.fetch_add(1, Ordering::SeqCst);
    });

    let write = engine.write_lock(None).await.unwrap();
    let read = engine.read_lock(None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let waiter = engine.clone();
    let idle = tokio::spawn(async move { waiter.idle().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!idle.is_finished());

    drop(write);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(read.await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    idle.await.unwrap();

    // Listeners are called only once.
    drop(engine.write_lock(None).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_mutual_exclusion() {
    crate::init();
    const CONCURRENCY: usize = 3;

    #[derive(Default)]
    struct Holders {
        readers: usize,
        writer: bool,
    }

    let engine = Engine::new(Some(CONCURRENCY));
    let holders = Arc::new(Mutex::new(Holders::default()));
    let mut rng = rand::thread_rng();

    let mut tasks = Vec::new();
    for i in 0..100 {
        let kind = if rng.gen_bool(0.3) { LockKind::Write } else { LockKind::Read };
        let hold = Duration::from_micros(rng.gen_range(0..2000));
        let start = Duration::from_micros(rng.gen_range(0..5000));
        let engine = engine.clone();
        let holders = holders.clone();

        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(start).await;
            let mut release = engine.lock(kind, None).await.unwrap();

            {
                let mut holders = holders.lock().unwrap();
                assert!(!holders.writer, "request {} granted while writer holds lock", i);
                match kind {
                    LockKind::Read => {
                        holders.readers += 1;
                        assert!(holders.readers <= CONCURRENCY);
                    }
                    LockKind::Write => {
                        assert_eq!(holders.readers, 0, "write request {} granted while readers hold lock", i);
                        holders.writer = true;
                    }
                }
            }

            tokio::time::sleep(hold).await;

            {
                let mut holders = holders.lock().unwrap();
                match kind {
                    LockKind::Read => holders.readers -= 1,
                    LockKind::Write => holders.writer = false,
                }
            }
            release.release();
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    engine.idle().await;
    assert!(engine.status().is_idle());
}
