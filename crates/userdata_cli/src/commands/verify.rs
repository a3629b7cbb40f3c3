//! Verify command implementation.

use std::path::Path;
use userdata_core::journal::{Journal, VerifyReport};
use userdata_core::JOURNAL_FILE;
use userdata_storage::{FileBackend, StorageBackend};

/// Runs the verify command.
///
/// Reads the journal without replaying or repairing it, so a torn tail is
/// reported rather than truncated.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let journal_path = path.join(JOURNAL_FILE);
    if !journal_path.exists() {
        return Err(format!("Journal not found at {:?}", journal_path).into());
    }

    println!("Verifying journal at {:?}", journal_path);
    println!();

    let backend = FileBackend::open(&journal_path)?;
    let size = backend.size()?;
    let report = Journal::verify(&backend)?;
    print_report(size, &report);

    println!();
    if report.is_clean() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

fn print_report(size: u64, report: &VerifyReport) {
    println!("  File size:       {} bytes", size);
    println!("  Commits:         {}", report.commits);
    println!("  Snapshots:       {}", report.snapshots);
    println!("  Valid prefix:    {} bytes", report.valid_len);
    if report.torn_bytes > 0 {
        println!(
            "  Torn tail:       {} bytes (dropped on next open)",
            report.torn_bytes
        );
    }
    if let Some(error) = &report.error {
        println!("  Error:           {}", error);
    }
}
