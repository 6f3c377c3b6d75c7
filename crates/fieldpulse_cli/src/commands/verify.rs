//! Verify command implementation.

use fieldpulse_core::JournalReport;
use fieldpulse_storage::FileBackend;
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Summary of an undamaged journal.
    pub report: Option<JournalReport>,
    /// Problems found.
    pub errors: Vec<String>,
    /// Findings that open will repair.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying journal at {:?}", path);
    println!();

    let result = verify(path)?;

    if let Some(report) = &result.report {
        println!("  Records:  {}", report.records);
        println!("  Pending:  {}", report.pending);
        println!("  Next id:  {}", report.next_id);
    }
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
    for error in &result.errors {
        println!("  Error: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every record of a journal.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No journal found at {:?}", path).into());
    }

    let backend = FileBackend::open(path)?;
    let mut result = VerifyResult {
        report: None,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    match JournalReport::from_backend(&backend) {
        Ok(report) => {
            if report.torn_bytes > 0 {
                result.warnings.push(format!(
                    "{} bytes of an incomplete final record",
                    report.torn_bytes
                ));
            }
            result.report = Some(report);
        }
        Err(e) => result.errors.push(e.to_string()),
    }

    Ok(result)
}
