//! Walks a pool through allocation, aligned allocation, reference counting,
//! compaction and teardown, logging the pool state after each step.

use anyhow::Result;
use clap::Parser;
use poolalloc::{PoolAllocator, PoolConfig, DEFAULT_BASE_ALIGNMENT, DEFAULT_POOL_SIZE};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pool-demo", version, about = "Exercise a fixed-capacity pool allocator")]
struct Cli {
    /// Pool capacity in bytes
    #[arg(short, long, default_value_t = DEFAULT_POOL_SIZE)]
    capacity: usize,

    /// Alignment of the pool's backing buffer
    #[arg(long, default_value_t = DEFAULT_BASE_ALIGNMENT)]
    base_alignment: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Release every block before teardown instead of reporting leaks
    #[arg(long)]
    clean: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = PoolConfig {
        capacity: cli.capacity,
        base_alignment: cli.base_alignment,
        enable_stats: true,
    };
    let pool = config.create_pool()?;
    info!(capacity = pool.capacity(), "pool ready");

    let first = pool.allocate(10)?;
    log_state("After allocating 10 bytes", &pool);

    let second = pool.allocate(20)?;
    log_state("After allocating 20 bytes", &pool);

    pool.deallocate(first)?;
    log_state("After deallocating the first block", &pool);

    let third = pool.allocate_aligned(16, 8)?;
    log_state("After aligned allocation", &pool);

    pool.retain(third)?;
    info!(ref_count = pool.get_reference_count(third), "third block retained");

    pool.deallocate(third)?;
    info!(ref_count = pool.get_reference_count(third), "third block deallocated once");

    if let Err(e) = pool.deallocate(first) {
        warn!("expected failure: {}", e);
    }

    let report = pool.defragment()?;
    for relocation in report.moved_blocks() {
        info!(from = %relocation.from, to = %relocation.to, size = relocation.size, "block moved");
    }
    log_state("After defragmentation", &pool);

    info!("{}", pool.utilization()?.format_summary());

    if cli.clean {
        for handle in [third, second] {
            if let Some(current) = report.resolve(handle) {
                while pool.deallocate(current)? > 0 {}
            }
        }
    }

    let leaks = pool.shutdown();
    info!("{}", leaks);
    Ok(())
}

fn log_state(step: &str, pool: &PoolAllocator) {
    info!("{}", step);
    for line in pool.display_memory_state().lines() {
        info!("{}", line);
    }
}
