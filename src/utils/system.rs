// src/utils/system.rs: System functions

use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use anyhow::{anyhow, Result};
use log::{debug, warn};

use crate::config::defs::{FASTQ_RECORD_BYTES, MAX_PENDING_RECORDS, MIN_PENDING_RECORDS};


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<u64, u64> total ram, available ram
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Computes how many unmatched records one lane may hold before the merge
/// gives up.
///
/// # Arguments
///
/// * `available_ram` - Amount of usable RAM.
/// * `total_ram` - All physical RAM on the system.
///
/// # Returns
///
/// Record count across both pending buffers.
pub fn compute_pending_limit(available_ram: u64, total_ram: u64) -> usize {
    let ram_fraction = if cfg!(target_os = "linux") { 0.5 } else { 0.3 };

    // macOS under-reports available memory; fall back to total if <20%
    let effective_ram = if cfg!(target_os = "macos") && available_ram < total_ram / 5 {
        warn!(
            "Low available RAM ({} GiB) vs total ({} GiB); using total RAM",
            available_ram / 1_073_741_824,
            total_ram / 1_073_741_824
        );
        total_ram
    } else {
        available_ram
    };

    let budget_bytes = (effective_ram as f64 * ram_fraction) as usize;
    let limit = (budget_bytes / FASTQ_RECORD_BYTES).clamp(MIN_PENDING_RECORDS, MAX_PENDING_RECORDS);

    debug!(
        "Pending-record limit: {} records (~{} MB)",
        limit,
        (limit * FASTQ_RECORD_BYTES) / 1_048_576
    );
    limit
}

/// Pending limit from the current machine, or the minimum when RAM cannot be read.
pub fn default_pending_limit() -> usize {
    match detect_ram() {
        Ok((total_ram, available_ram)) => compute_pending_limit(available_ram, total_ram),
        Err(e) => {
            warn!("{}; using minimal pending-record limit {}", e, MIN_PENDING_RECORDS);
            MIN_PENDING_RECORDS
        }
    }
}
