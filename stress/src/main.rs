use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use ratecache::{LoaderMode, RateCacheOptions, RateLimitedCache, RefreshPolicy};

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Workload {
    /// Plain per-key admission checks.
    Admit,
    /// `get_or_update` with a loader that sleeps for `--loader-ms`.
    GetOrUpdate,
    /// Both at once: half the threads admit, half refresh.
    Mixed,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Gate {
    Hold,
    Release,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyDist {
    Hot,
    Uniform,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ratecache-stress", about = "Load test harness for ratecache")]
struct Args {
    #[arg(long, value_enum, default_value_t = Workload::Admit)]
    workload: Workload,

    #[arg(long, value_enum, default_value_t = Gate::Hold)]
    gate: Gate,

    #[arg(long, value_enum, default_value_t = KeyDist::Hot)]
    key_dist: KeyDist,

    #[arg(long, default_value_t = 8)]
    threads: usize,

    #[arg(long, default_value_t = 10)]
    duration_s: u64,

    #[arg(long, default_value_t = 10)]
    window_s: u64,

    #[arg(long, default_value_t = 1000)]
    max_count: u64,

    #[arg(long, default_value_t = 1)]
    cooldown_s: u64,

    /// Simulated loader latency.
    #[arg(long, default_value_t = 5)]
    loader_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    key_space: usize,

    #[arg(long, default_value_t = 100)]
    sample_every: u64,
}

#[derive(Default)]
struct Counts {
    admitted: AtomicU64,
    rejected: AtomicU64,
    served: AtomicU64,
    empty: AtomicU64,
}

fn build_keys(args: &Args) -> Vec<String> {
    let n = match args.key_dist {
        KeyDist::Hot => 1,
        KeyDist::Uniform => args.key_space.max(1),
    };
    (0..n).map(|i| format!("user_{i}")).collect()
}

/// Non-zero xorshift seed for worker `t`.
fn thread_seed(t: usize) -> u64 {
    (t as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    if sample_every <= 1 {
        return true;
    }

    iter.is_multiple_of(sample_every)
}

fn print_results(
    args: &Args,
    elapsed: Duration,
    ops: u64,
    hist: &Histogram<u64>,
    counts: &Counts,
) {
    println!(
        "workload={:?} gate={:?} key_dist={:?} threads={}",
        args.workload, args.gate, args.key_dist, args.threads
    );
    println!(
        "window_s={} max_count={} cooldown_s={} loader_ms={} key_space={}",
        args.window_s, args.max_count, args.cooldown_s, args.loader_ms, args.key_space
    );
    println!(
        "elapsed_s={:.3} ops={} ops_per_s={:.0}",
        elapsed.as_secs_f64(),
        ops,
        ops as f64 / elapsed.as_secs_f64()
    );
    println!(
        "admitted={} rejected={} served={} empty={}",
        counts.admitted.load(Ordering::Relaxed),
        counts.rejected.load(Ordering::Relaxed),
        counts.served.load(Ordering::Relaxed),
        counts.empty.load(Ordering::Relaxed),
    );
    if hist.is_empty() {
        println!("no latency samples collected");
        return;
    }
    println!(
        "lat_us p50={} p95={} p99={} p999={} max={}",
        hist.value_at_quantile(0.50),
        hist.value_at_quantile(0.95),
        hist.value_at_quantile(0.99),
        hist.value_at_quantile(0.999),
        hist.max()
    );
    println!("sample_every={} samples={}", args.sample_every, hist.len());
}

fn run(args: &Args) {
    let loader_mode = match args.gate {
        Gate::Hold => LoaderMode::HoldGate,
        Gate::Release => LoaderMode::ReleaseGate,
    };
    let cache = Arc::new(RateLimitedCache::new(
        RateCacheOptions::default().with_loader_mode(loader_mode),
    ));
    let policy = RefreshPolicy::new(args.cooldown_s, u64::MAX, 1);
    let keys = build_keys(args);

    let stop = Arc::new(AtomicBool::new(false));
    let counts = Arc::new(Counts::default());
    let total_ops = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.threads);
    for t in 0..args.threads {
        let cache = Arc::clone(&cache);
        let keys = keys.clone();
        let stop = Arc::clone(&stop);
        let counts = Arc::clone(&counts);
        let total_ops = Arc::clone(&total_ops);
        let args = args.clone();
        let refreshes = match args.workload {
            Workload::Admit => false,
            Workload::GetOrUpdate => true,
            Workload::Mixed => t % 2 == 1,
        };

        handles.push(std::thread::spawn(move || {
            let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
            let mut i = 0_u64;
            let mut seed = thread_seed(t);

            let mut rng_u64 = || {
                // xorshift64*
                seed ^= seed >> 12;
                seed ^= seed << 25;
                seed ^= seed >> 27;
                seed = seed.wrapping_mul(0x2545_F491_4F6C_DD1D);
                seed
            };

            while !stop.load(Ordering::Relaxed) {
                i = i.wrapping_add(1);
                let k = &keys[(rng_u64() as usize) % keys.len()];
                let t0 = should_sample(i, args.sample_every).then(Instant::now);

                if refreshes {
                    let loader_ms = args.loader_ms;
                    let fresh = cache.get_or_update_with(
                        k,
                        move || {
                            std::thread::sleep(Duration::from_millis(loader_ms));
                            Ok::<_, Infallible>(Some(loader_ms))
                        },
                        policy,
                    );
                    let counter = if fresh.is_some() {
                        &counts.served
                    } else {
                        &counts.empty
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                } else if cache.admit(k, args.max_count, args.window_s) {
                    counts.admitted.fetch_add(1, Ordering::Relaxed);
                } else {
                    counts.rejected.fetch_add(1, Ordering::Relaxed);
                }

                if let Some(t0) = t0 {
                    let us = t0.elapsed().as_micros() as u64;
                    let _ = hist.record(us.max(1));
                }
                total_ops.fetch_add(1, Ordering::Relaxed);
            }

            hist
        }));
    }

    std::thread::sleep(Duration::from_secs(args.duration_s));
    stop.store(true, Ordering::Relaxed);

    let mut merged = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
    for h in handles {
        let hist = h.join().unwrap();
        merged.add(&hist).unwrap();
    }

    let elapsed = started.elapsed();
    print_results(
        args,
        elapsed,
        total_ops.load(Ordering::Relaxed),
        &merged,
        &counts,
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    run(&args);
}
