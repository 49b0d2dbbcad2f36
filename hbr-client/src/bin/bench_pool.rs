//! # Pool Benchmark Harness
//!
//! Purpose: Drive the connection pool and batch path from many threads against
//! the in-memory backend, so lease contention and flush cost can be compared
//! over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Fixed PRNG seeds per thread.
//! 2. **Allocation Control**: Row keys and values are pre-built per thread.
//! 3. **Nested Leases**: Each write leases twice to exercise thread affinity.
//!
//! Usage: `bench_pool [threads] [ops_per_thread] [pool_size] [batch_size]`

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hbr_client::{BatchOptions, ConnectionPool, InstanceSource, PoolConfig};
use hbr_engine::{MemoryCluster, MemoryInstance, StorageTable};

const DEFAULT_THREADS: usize = 8;
const DEFAULT_OPS_PER_THREAD: usize = 100_000;
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_BATCH_SIZE: usize = 256;
const KEY_SPACE: usize = 1 << 12;
const TABLE: &str = "bench";

struct BenchConfig {
    threads: usize,
    ops_per_thread: usize,
    pool_size: usize,
    batch_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            threads: parse_usize(args.next(), DEFAULT_THREADS).max(1),
            ops_per_thread: parse_usize(args.next(), DEFAULT_OPS_PER_THREAD),
            pool_size: parse_usize(args.next(), DEFAULT_POOL_SIZE),
            batch_size: parse_usize(args.next(), DEFAULT_BATCH_SIZE),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Tiny deterministic PRNG; XorShift is plenty for picking row keys.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)");
}

fn worker(pool: ConnectionPool, seed: u64, ops: usize, batch_size: usize) -> Result<()> {
    let keys: Vec<Vec<u8>> = (0..KEY_SPACE)
        .map(|idx| format!("row-{seed:x}-{idx:05}").into_bytes())
        .collect();
    let value = vec![0xA5u8; 64];
    let mut rng = XorShift64::new(seed);

    let outer = pool.lease(Some(Duration::from_secs(5)))?;
    let table = outer.table(TABLE, true)?;
    let options = BatchOptions {
        batch_size: Some(batch_size),
        ..Default::default()
    };
    table.batch_scope(options, |batch| {
        for _ in 0..ops {
            // Same thread, so this must hand back the outer connection.
            let inner = pool.lease(Some(Duration::ZERO))?;
            if inner.id() != outer.id() {
                bail!("nested lease returned a different connection");
            }
            let key = &keys[rng.next_index(KEY_SPACE - 1)];
            batch.put(key, [(&b"cf:payload"[..], &value[..])])?;
        }
        Ok(())
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("bench_pool failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let instance = Arc::new(MemoryInstance::new("bench"));
    let table = instance.create_table(TABLE, &["cf"]);
    let cluster = MemoryCluster::new(vec![instance]);

    let pool_config = PoolConfig {
        size: config.pool_size,
        ..Default::default()
    };
    let pool = ConnectionPool::new(pool_config, InstanceSource::Discover(&cluster))
        .context("building connection pool")?;

    info!(
        threads = config.threads,
        ops_per_thread = config.ops_per_thread,
        pool_size = config.pool_size,
        batch_size = config.batch_size,
        "starting pool benchmark"
    );

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|idx| {
            let pool = pool.clone();
            let ops = config.ops_per_thread;
            let batch_size = config.batch_size;
            thread::spawn(move || worker(pool, 0x1234_5678 ^ idx as u64, ops, batch_size))
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("benchmark worker panicked"),
        }
    }
    report("PUT", config.threads * config.ops_per_thread, start.elapsed());

    println!(
        "pool: size={}, available={}; table: rows={}, commits={}",
        pool.size(),
        pool.available(),
        table.row_count(),
        table.commit_count()
    );
    info!(table = table.name(), "benchmark finished");
    Ok(())
}
