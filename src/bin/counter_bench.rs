// src/bin/counter_bench.rs

use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{cell, row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use kv_atomic::config::{CounterConfig, InMemoryConfig, RedisConfig, RetryConfig};
use kv_atomic::storage::{MemoryStorage, RedisStorage, StorageBackend};
use kv_atomic::{AtomicCounter, Initialization};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "counter_bench",
    about = "A benchmarking tool for atomic counter operations under contention"
)]
struct Opt {
    /// Operation to benchmark
    #[structopt(short, long, possible_values = &["incr", "get-and-add", "cas-loop", "all"], default_value = "all")]
    mode: String,

    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage), defaults to REDIS_URL
    #[structopt(long)]
    redis_url: Option<String>,

    /// Number of concurrent workers hitting the same counter
    #[structopt(short, long, default_value = "10")]
    workers: usize,

    /// Operations per worker
    #[structopt(short = "n", long, default_value = "100")]
    ops_per_worker: usize,

    /// Maximum number of operations in flight
    #[structopt(short, long, default_value = "100")]
    concurrency: usize,

    /// Attempts before get-and-add gives up on a contended key
    #[structopt(long, default_value = "64")]
    max_attempts: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Outcome of one benchmark run
struct BenchResult {
    name: String,
    completed: usize,
    failed: usize,
    cas_misses: usize,
    elapsed: Duration,
    expected: i64,
    actual: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "counter_bench=error,kv_atomic=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!("counter_bench={},kv_atomic={}", log_level, log_level)
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let modes = if opt.mode == "all" {
        vec!["incr", "get-and-add", "cas-loop"]
    } else {
        vec![opt.mode.as_str()]
    };

    let mut results = Vec::with_capacity(modes.len());
    match opt.storage.as_str() {
        "memory" => {
            let storage = MemoryStorage::new(InMemoryConfig {
                max_entries: 100_000,
                use_background_task: true,
                cleanup_interval: Duration::from_secs(60),
            });
            for mode in modes {
                results.push(run_benchmark(storage.clone(), mode, &opt).await?);
            }
        }
        "redis" => {
            let mut config = RedisConfig::from_env()?;
            if let Some(url) = &opt.redis_url {
                config.url = url.clone();
            }
            let storage = match RedisStorage::new(config).await {
                Ok(storage) => storage,
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(e.into());
                }
            };
            for mode in modes {
                results.push(run_benchmark(storage.clone(), mode, &opt).await?);
            }
        }
        other => return Err(format!("Unknown storage backend: {}", other).into()),
    }

    print_results(&opt.storage, &results);

    if results.iter().any(|r| r.expected != r.actual) {
        return Err("final counter value does not match the committed operations".into());
    }
    Ok(())
}

async fn run_benchmark<S>(
    storage: S,
    mode: &str,
    opt: &Opt,
) -> Result<BenchResult, Box<dyn std::error::Error>>
where
    S: StorageBackend + Clone + 'static,
{
    let key = format!("counter_bench:{}:{}", mode, Uuid::new_v4());
    let config = CounterConfig {
        retry: RetryConfig {
            max_attempts: opt.max_attempts,
            ..RetryConfig::default()
        },
    };
    let counter = Arc::new(
        AtomicCounter::with_config(key.as_str(), storage.clone(), config, Initialization::Value(0))
            .await?,
    );

    if !opt.disable_logs {
        info!(
            mode,
            key = %key,
            workers = opt.workers,
            ops_per_worker = opt.ops_per_worker,
            "Starting benchmark"
        );
    }

    let total = (opt.workers * opt.ops_per_worker) as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:>12} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );
    progress.set_message(mode.to_string());

    let barrier = Arc::new(Barrier::new(opt.workers));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
    let start_time = Instant::now();

    let mut handles = Vec::with_capacity(opt.workers);
    for _ in 0..opt.workers {
        let counter = Arc::clone(&counter);
        let barrier = Arc::clone(&barrier);
        let semaphore = Arc::clone(&semaphore);
        let progress = progress.clone();
        let mode = mode.to_string();
        let ops = opt.ops_per_worker;
        let disable_logs = opt.disable_logs;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;

            let mut completed = 0;
            let mut failed = 0;
            let mut cas_misses = 0;

            for _ in 0..ops {
                let Ok(_permit) = semaphore.acquire().await else {
                    break;
                };

                let outcome = match mode.as_str() {
                    "incr" => counter.increment_and_get().await.map(|_| ()),
                    "get-and-add" => counter.get_and_add(1).await.map(|_| ()),
                    _ => loop {
                        let current = match counter.get().await {
                            Ok(current) => current,
                            Err(e) => break Err(e),
                        };
                        match counter.compare_and_set(current, current + 1).await {
                            Ok(true) => break Ok(()),
                            Ok(false) => cas_misses += 1,
                            Err(e) => break Err(e),
                        }
                    },
                };

                match outcome {
                    Ok(()) => completed += 1,
                    Err(e) => {
                        failed += 1;
                        if !disable_logs {
                            warn!("Counter operation failed: {}", e);
                        }
                    }
                }
                progress.inc(1);
            }

            (completed, failed, cas_misses)
        }));
    }

    let mut completed = 0;
    let mut failed = 0;
    let mut cas_misses = 0;
    for result in futures::future::join_all(handles).await {
        let (c, f, m) = result?;
        completed += c;
        failed += f;
        cas_misses += m;
    }
    let elapsed = start_time.elapsed();
    progress.finish_and_clear();

    let actual = counter.get().await?;
    storage.delete(&key).await?;

    Ok(BenchResult {
        name: mode.to_string(),
        completed,
        failed,
        cas_misses,
        elapsed,
        expected: completed as i64,
        actual,
    })
}

fn print_results(storage: &str, results: &[BenchResult]) {
    let mut table = Table::new();
    table.add_row(row![
        "Mode",
        "Storage",
        "Completed",
        "Failed",
        "CAS misses",
        "Elapsed",
        "Ops/sec",
        "Final value"
    ]);

    for result in results {
        let ops_per_sec = result.completed as f64 / result.elapsed.as_secs_f64().max(f64::EPSILON);
        let verdict = if result.expected == result.actual {
            format!("{} (ok)", result.actual)
        } else {
            format!("{} (expected {})", result.actual, result.expected)
        };
        table.add_row(row![
            result.name,
            storage,
            result.completed,
            result.failed,
            result.cas_misses,
            format!("{:?}", result.elapsed),
            format!("{:.2}", ops_per_sec),
            verdict
        ]);
    }

    println!();
    table.printstd();
}
