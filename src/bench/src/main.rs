use replication::{BackfillStorer, Mode, SequencerConfig};
use storage::{BackfillAtom, Castime, OrderToken, ReplTimestamp, SarcMutation, SetPolicy, Storage};
use logger::logger;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const NUM_KEYS: usize = 200_000;
const VALUE_SIZE: usize = 100;
const REALTIME_OPS: usize = 50_000;

fn generate_value(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen_range(b'a'..=b'z')).collect()
}

fn atom(key: String, value: Vec<u8>) -> BackfillAtom {
    BackfillAtom {
        key,
        value,
        flags: 0,
        exptime: 0,
        recency: ReplTimestamp(1),
        cas_or_zero: 0,
    }
}

fn set(key: String, value: Vec<u8>) -> SarcMutation {
    SarcMutation {
        key,
        value,
        flags: 0,
        exptime: 0,
        policy: SetPolicy::Set,
    }
}

/// Poll until `expected` operations have been applied and the storer is back in realtime mode
async fn wait_drained(storer: &BackfillStorer<Storage>, expected: usize) {
    loop {
        let snapshot = storer.metrics();
        if snapshot.backfill_applied + snapshot.realtime_applied >= expected && snapshot.mode == Mode::Realtime {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn benchmark_realtime_only(workers: usize) {
    println!("\n=== Realtime Writes ({} workers) ===", workers);

    let storer = BackfillStorer::new(
        Arc::new(Storage::new()),
        SequencerConfig::default().with_workers(workers),
    );
    let value = generate_value(VALUE_SIZE);
    let start = Instant::now();

    for i in 0..NUM_KEYS {
        let castime = Castime::new(i as u64 + 1, ReplTimestamp(1));
        storer
            .realtime_sarc(set(format!("key:{}", i), value.clone()), castime, OrderToken(i as u64))
            .await
            .expect("realtime write");
    }
    wait_drained(&storer, NUM_KEYS).await;

    let elapsed = start.elapsed();
    let ops_per_sec = NUM_KEYS as f64 / elapsed.as_secs_f64();

    println!("  {} writes in {:?}", NUM_KEYS, elapsed);
    println!("  {:.0} ops/sec", ops_per_sec);

    storer.shutdown().await.expect("shutdown");
}

async fn benchmark_backfill_only() {
    println!("\n=== Backfill ===");

    let storer = BackfillStorer::new(Arc::new(Storage::new()), SequencerConfig::default());
    let value = generate_value(VALUE_SIZE);
    let start = Instant::now();

    storer.backfill_delete_everything(OrderToken(0)).await.expect("delete everything");
    for i in 0..NUM_KEYS {
        storer
            .backfill_set(atom(format!("key:{}", i), value.clone()), OrderToken(i as u64 + 1))
            .await
            .expect("backfill set");
    }
    storer
        .backfill_done(ReplTimestamp(2), OrderToken(NUM_KEYS as u64 + 1))
        .await
        .expect("backfill done");
    wait_drained(&storer, NUM_KEYS + 2).await;

    let elapsed = start.elapsed();
    let ops_per_sec = NUM_KEYS as f64 / elapsed.as_secs_f64();

    println!("  {} atoms in {:?}", NUM_KEYS, elapsed);
    println!("  {:.0} ops/sec", ops_per_sec);
    println!("  {} keys stored", storer.store().keys_count().await);

    storer.shutdown().await.expect("shutdown");
}

async fn benchmark_backfill_with_realtime(num_tasks: usize) {
    println!("\n=== Backfill + Realtime ({} realtime tasks) ===", num_tasks);

    let storer = Arc::new(BackfillStorer::new(
        Arc::new(Storage::new()),
        SequencerConfig::default(),
    ));
    let ops_per_task = REALTIME_OPS / num_tasks;
    let value = generate_value(VALUE_SIZE);
    let barrier = Arc::new(Barrier::new(num_tasks + 2));

    let mut handles = Vec::new();

    {
        let storer = Arc::clone(&storer);
        let barrier = Arc::clone(&barrier);
        let value = value.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..NUM_KEYS {
                storer
                    .backfill_set(atom(format!("key:{}", i), value.clone()), OrderToken(i as u64))
                    .await
                    .expect("backfill set");
            }
            storer
                .backfill_done(ReplTimestamp(2), OrderToken(NUM_KEYS as u64))
                .await
                .expect("backfill done");
        }));
    }

    for task_id in 0..num_tasks {
        let storer = Arc::clone(&storer);
        let barrier = Arc::clone(&barrier);
        let value = value.clone();
        handles.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(task_id as u64);
            barrier.wait().await;
            for i in 0..ops_per_task {
                let key = format!("key:{}", rng.gen_range(0..NUM_KEYS));
                let token = OrderToken((NUM_KEYS + 1 + task_id * ops_per_task + i) as u64);
                let castime = Castime::new(token.value(), ReplTimestamp(3));
                storer
                    .realtime_sarc(set(key, value.clone()), castime, token)
                    .await
                    .expect("realtime write");
            }
        }));
    }

    barrier.wait().await;
    let start = Instant::now();

    for handle in handles {
        handle.await.expect("producer task");
    }
    let total = NUM_KEYS + 1 + ops_per_task * num_tasks;
    wait_drained(&storer, total).await;

    let elapsed = start.elapsed();
    let ops_per_sec = total as f64 / elapsed.as_secs_f64();

    println!("  {} operations in {:?}", total, elapsed);
    println!("  {:.0} ops/sec", ops_per_sec);
    match serde_json::to_string(&storer.metrics()) {
        Ok(json) => println!("  metrics: {}", json),
        Err(e) => log::warn!("Failed to serialize metrics: {}", e),
    }

    match Arc::try_unwrap(storer) {
        Ok(storer) => storer.shutdown().await.expect("shutdown"),
        Err(_) => log::warn!("Storer still shared, skipping shutdown"),
    }
}

#[tokio::main]
async fn main() {
    logger::setup_logging();

    println!("╔════════════════════════════════════════════╗");
    println!("║      Replication Sequencer Benchmark       ║");
    println!("╚════════════════════════════════════════════╝");
    println!("\nConfiguration:");
    println!("  Keys: {}", NUM_KEYS);
    println!("  Value size: {} bytes", VALUE_SIZE);
    println!("  Realtime operations: {}", REALTIME_OPS);

    benchmark_realtime_only(1).await;
    benchmark_realtime_only(4).await;
    benchmark_backfill_only().await;
    benchmark_backfill_with_realtime(1).await;
    benchmark_backfill_with_realtime(8).await;

    println!("\n=== Benchmark Complete ===");
}
