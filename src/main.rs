/*!
 * Heap Inspector
 *
 * Runs a short allocation workload against a fresh heap and prints the
 * resulting block layout as JSON.
 *
 * Usage: `heap-inspect [config.json]`
 */

use miette::{IntoDiagnostic, Result, WrapErr};
use shared_heap::{init_tracing, HeapAllocator32, HeapConfig, Segment};
use tracing::info;

/// Starting segment size for the workload (64KB)
const SEGMENT_SIZE: usize = 64 * 1024;

/// Address space reserved for in-place growth (16MB)
const RESERVED_SIZE: usize = 16 * 1024 * 1024;

fn load_config() -> Result<HeapConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(HeapConfig::growable().with_grow_size(SEGMENT_SIZE));
    };

    let json = std::fs::read_to_string(&path)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading config {path}"))?;
    HeapConfig::from_json(&json)
        .into_diagnostic()
        .wrap_err_with(|| format!("parsing config {path}"))
}

fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    info!(?config, "Starting heap workload");

    let mut heap = HeapAllocator32::new(Segment::reserved(SEGMENT_SIZE, RESERVED_SIZE)?, config)?;

    let mut live = Vec::new();
    for size in [24, 200, 64, 4096, 16, 1000, 333] {
        live.push(heap.allocate(size)?);
    }

    // punch holes, then fill one of them back in
    heap.deallocate(live[1]);
    heap.deallocate(live[3]);
    heap.deallocate(live[4]);
    let aligned = heap.aligned_allocate(256, 100)?;
    let zeroed = heap.zero_allocate(16, 8)?;
    let moved = heap.resize(live[0], 512)?;

    info!(aligned, zeroed, moved, "Workload finished");

    heap.check_integrity()?;
    let report = heap.inspect()?;
    info!(
        total = report.total,
        used = report.used,
        free_blocks = report.free_blocks(),
        used_blocks = report.used_blocks(),
        "Heap summary"
    );

    println!("{}", report.to_json().into_diagnostic()?);
    Ok(())
}
