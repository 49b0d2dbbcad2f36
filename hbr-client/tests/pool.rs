use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use hbr_client::{BatchOptions, ConnectionPool, HbrError, InstanceSource, PoolConfig};
use hbr_engine::{MemoryCluster, MemoryInstance};

fn cluster() -> MemoryCluster {
    let instance = Arc::new(MemoryInstance::new("inst-1"));
    instance.create_table("events", &["cf"]);
    instance.create_table("app_events", &["cf"]);
    MemoryCluster::new(vec![instance])
}

fn config(size: usize) -> PoolConfig {
    PoolConfig {
        size,
        ..Default::default()
    }
}

#[test]
fn pool_discovers_instance_once() {
    let cluster = cluster();
    let pool = ConnectionPool::new(config(5), InstanceSource::Discover(&cluster)).expect("pool");
    assert_eq!(cluster.list_calls(), 1);
    assert_eq!(pool.available(), 5);

    let lease = pool.lease(None).expect("lease");
    assert_eq!(lease.instance().id(), "inst-1");
    assert!(lease.is_open());
}

#[test]
fn discovery_failures_surface() {
    let empty = MemoryCluster::new(Vec::new());
    assert!(matches!(
        ConnectionPool::new(config(2), InstanceSource::Discover(&empty)),
        Err(HbrError::Discovery(_))
    ));

    let degraded = cluster().with_failed_location("us-east1-b");
    assert!(matches!(
        ConnectionPool::new(config(2), InstanceSource::Discover(&degraded)),
        Err(HbrError::Discovery(_))
    ));

    let crowded = MemoryCluster::new(vec![
        Arc::new(MemoryInstance::new("a")),
        Arc::new(MemoryInstance::new("b")),
    ]);
    assert!(matches!(
        ConnectionPool::new(config(2), InstanceSource::Discover(&crowded)),
        Err(HbrError::Discovery(_))
    ));
}

#[test]
fn contended_pool_never_oversubscribes() {
    let cluster = cluster();
    let pool = ConnectionPool::new(config(3), InstanceSource::Discover(&cluster)).expect("pool");
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..50 {
                    let lease = pool.lease(Some(Duration::from_secs(5))).expect("lease");
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert_eq!(pool.current().map(|conn| conn.id()), Some(lease.id()));
                    thread::yield_now();
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker");
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.on_loan(), 0);
}

#[test]
fn waiter_wakes_when_connection_returns() {
    let pool = ConnectionPool::new(config(1), InstanceSource::Discover(&cluster())).expect("pool");
    let lease = pool.lease(None).expect("lease");
    let held_id = lease.id();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let lease = pool.lease(Some(Duration::from_secs(5))).expect("lease after wait");
            lease.id()
        })
    };

    thread::sleep(Duration::from_millis(50));
    drop(lease);
    assert_eq!(waiter.join().expect("waiter"), held_id);
    assert_eq!(pool.available(), 1);
}

#[test]
fn zero_timeout_fails_fast_when_exhausted() {
    let pool = ConnectionPool::new(config(1), InstanceSource::Discover(&cluster())).expect("pool");
    let _lease = pool.lease(None).expect("lease");

    let pool_b = pool.clone();
    let err = thread::spawn(move || pool_b.acquire(Some(Duration::ZERO)).map(|_| ()))
        .join()
        .expect("thread")
        .unwrap_err();
    assert_eq!(
        err,
        HbrError::NoConnectionsAvailable {
            timeout: Some(Duration::ZERO)
        }
    );
    assert!(err.is_retryable());
}

#[test]
fn nested_lease_inside_batch_scope() {
    let instance = Arc::new(MemoryInstance::new("inst"));
    let events = instance.create_table("app_events", &["cf"]);
    let mut pool_config = config(1);
    pool_config.connection.table_prefix = Some("app".to_string());
    let pool = ConnectionPool::new(pool_config, InstanceSource::Instance(instance)).expect("pool");

    let outer = pool.connection().expect("outer");
    let table = outer.table("events", true).expect("table");
    table
        .batch_scope(BatchOptions::default(), |batch| {
            let inner = pool.connection()?;
            inner.table("events", true)?.put(
                b"r1",
                [("cf:direct", "1")],
                Default::default(),
            )?;
            batch.put(b"r2", [("cf:batched", "2")])
        })
        .expect("scope");
    drop(outer);

    assert_eq!(pool.available(), 1);
    assert_eq!(events.read_cell(b"r1", "cf", b"direct").as_deref(), Some(&b"1"[..]));
    assert_eq!(events.read_cell(b"r2", "cf", b"batched").as_deref(), Some(&b"2"[..]));
}

#[test]
fn lease_released_when_scope_panics() {
    let pool = ConnectionPool::new(config(1), InstanceSource::Discover(&cluster())).expect("pool");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _lease = pool.lease(None).expect("lease");
        panic!("boom");
    }));
    assert!(result.is_err());
    assert_eq!(pool.available(), 1);
    assert!(pool.current().is_none());
}

#[test]
fn config_loaded_from_json() {
    let config = PoolConfig::from_json(
        r#"{"size": 2, "connection": {"table_prefix": "app", "table_prefix_separator": "_"}}"#,
    )
    .expect("config");
    let pool = ConnectionPool::new(config, InstanceSource::Discover(&cluster())).expect("pool");
    let lease = pool.connection().expect("lease");
    assert_eq!(lease.table("events", true).expect("table").name(), "app_events");
    assert_eq!(lease.table("events", false).expect("table").name(), "events");
}
