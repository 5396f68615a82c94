//! Human-readable rendering of progress snapshots and results.

use std::fmt::Write;

use casmig_core::verify::StorageListing;
use casmig_core::{MigrationProgress, MigrationResult, MigrationStatus};

/// Failures printed before the remainder is summarised.
pub const MAX_LISTED_FAILURES: usize = 10;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Whole units, truncated: `1536` is "1 KB".
pub fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b < KB => format!("{b} B"),
        b if b < MB => format!("{} KB", b / KB),
        b if b < GB => format!("{} MB", b / MB),
        b => format!("{} GB", b / GB),
    }
}

pub fn format_rate(bytes_per_second: f64) -> String {
    let (kb, mb, gb) = (KB as f64, MB as f64, GB as f64);
    if bytes_per_second < kb {
        format!("{bytes_per_second:.1} B/s")
    } else if bytes_per_second < mb {
        format!("{:.1} KB/s", bytes_per_second / kb)
    } else if bytes_per_second < gb {
        format!("{:.1} MB/s", bytes_per_second / mb)
    } else {
        format!("{:.1} GB/s", bytes_per_second / gb)
    }
}

pub fn format_duration(millis: u64) -> String {
    let seconds = millis / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{hours}h {}m {}s", minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

pub fn format_eta(millis: Option<u64>) -> String {
    match millis {
        Some(ms) if ms > 0 => format_duration(ms),
        _ => "Unknown".to_string(),
    }
}

/// Two-line rendering of a streamed snapshot.
pub fn progress_lines(progress: &MigrationProgress) -> String {
    format!(
        "Progress: {:.1}% ({}/{}) - {} - ETA: {}\nCurrent: {}",
        progress.percentage,
        progress.processed_files,
        progress.total_files,
        format_rate(progress.transfer_rate),
        format_eta(progress.estimated_time_remaining_ms),
        progress.current_file.as_deref().unwrap_or("N/A"),
    )
}

pub fn status_report(progress: &MigrationProgress) -> String {
    format!(
        "Migration Status: {}\nProgress: {:.1}%\nFiles: {}/{}\nSize: {}/{}\nTransfer Rate: {}\nETA: {}\nMessage: {}",
        progress.status,
        progress.percentage,
        progress.processed_files,
        progress.total_files,
        format_bytes(progress.processed_size_bytes),
        format_bytes(progress.total_size_bytes),
        format_rate(progress.transfer_rate),
        format_eta(progress.estimated_time_remaining_ms),
        progress.message,
    )
}

/// Short form used by `status` once a run has a result.
pub fn completed_report(result: &MigrationResult) -> String {
    let headline = match result.status {
        MigrationStatus::Completed => "Migration completed.",
        MigrationStatus::Failed => "Migration failed.",
        MigrationStatus::Cancelled => "Migration cancelled.",
        _ => "Migration finished.",
    };
    format!(
        "{headline}\nFinal Status: {}\nFiles: {}/{} successful\nDuration: {}\nMessage: {}",
        result.status,
        result.successful_files,
        result.total_files,
        format_duration(result.duration_ms),
        result.message,
    )
}

/// One line per listed file, tab-separated size when requested, and a
/// trailer when the listing was cut at its limit.
pub fn storage_listing(listing: &StorageListing) -> String {
    let mut lines: Vec<String> = listing
        .files
        .iter()
        .map(|entry| match entry.size {
            Some(bytes) => format!("{}\t{}", entry.path, format_bytes(bytes)),
            None => entry.path.clone(),
        })
        .collect();
    if listing.total_files > listing.shown {
        lines.push(format!("... {} of {} files shown", listing.shown, listing.total_files));
    }
    lines.join("\n")
}

/// Final report with at most [`MAX_LISTED_FAILURES`] failure lines.
pub fn result_report(result: &MigrationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Migration Result ===");
    let _ = writeln!(out, "Status: {}", result.status);
    let _ = writeln!(out, "Total Files: {}", result.total_files);
    let _ = writeln!(out, "Successful: {}", result.successful_files);
    let _ = writeln!(out, "Failed: {}", result.failed_files);
    let _ = writeln!(out, "Duration: {}", format_duration(result.duration_ms));
    let _ = writeln!(
        out,
        "Size Transferred: {}",
        format_bytes(result.transferred_size_bytes)
    );
    let _ = write!(out, "Message: {}", result.message);

    let failures = &result.failed_file_details;
    if !failures.is_empty() {
        let _ = write!(out, "\n\nFailed Files:");
        for failure in failures.iter().take(MAX_LISTED_FAILURES) {
            let _ = write!(out, "\n  {}: {}", failure.file_path, failure.error);
        }
        if failures.len() > MAX_LISTED_FAILURES {
            let _ = write!(
                out,
                "\n  ... and {} more",
                failures.len() - MAX_LISTED_FAILURES
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use casmig_core::verify::StorageFileEntry;
    use casmig_core::MigrationFailure;
    use chrono::Utc;

    #[test]
    fn test_format_bytes_truncates() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1 KB");
        assert_eq!(format_bytes(5 * MB + 1), "5 MB");
        assert_eq!(format_bytes(3 * GB), "3 GB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0.0 B/s");
        assert_eq!(format_rate(1536.0), "1.5 KB/s");
        assert_eq!(format_rate(2.5 * MB as f64), "2.5 MB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(999), "0s");
        assert_eq!(format_duration(61_000), "1m 1s");
        assert_eq!(format_duration(3_723_000), "1h 2m 3s");
    }

    #[test]
    fn test_eta_unknown_without_rate() {
        assert_eq!(format_eta(None), "Unknown");
        assert_eq!(format_eta(Some(0)), "Unknown");
        assert_eq!(format_eta(Some(90_000)), "1m 30s");
    }

    #[test]
    fn test_progress_lines() {
        let mut progress = MigrationProgress::not_started(Utc::now());
        progress.status = MigrationStatus::InProgress;
        progress.processed_files = 1;
        progress.total_files = 4;
        progress.percentage = 25.0;
        progress.current_file = Some("ab/cd/abcd".to_string());
        let text = progress_lines(&progress);
        assert_eq!(
            text,
            "Progress: 25.0% (1/4) - 0.0 B/s - ETA: Unknown\nCurrent: ab/cd/abcd"
        );
    }

    #[test]
    fn test_result_report_caps_failures() {
        let now = Utc::now();
        let failures: Vec<_> = (0..13)
            .map(|i| MigrationFailure {
                file_path: format!("file-{i}"),
                error: "boom".to_string(),
                timestamp: now,
                retry_count: 3,
            })
            .collect();
        let result = MigrationResult {
            status: MigrationStatus::Failed,
            total_files: 20,
            successful_files: 7,
            failed_files: 13,
            failed_file_details: failures,
            total_size_bytes: 2048,
            transferred_size_bytes: 1024,
            duration_ms: 5_000,
            start_time: now,
            end_time: Some(now),
            message: "Migration completed with 13 failures".to_string(),
        };

        let report = result_report(&result);
        assert!(report.contains("Status: FAILED"));
        assert!(report.contains("Size Transferred: 1 KB"));
        assert!(report.contains("  file-9: boom"));
        assert!(!report.contains("file-10:"));
        assert!(report.ends_with("  ... and 3 more"));
    }

    #[test]
    fn test_completed_report_headline_follows_status() {
        let mut result = MigrationResult::orchestration_failure(Utc::now(), "listing failed");
        let report = completed_report(&result);
        assert!(report.starts_with("Migration failed.\nFinal Status: FAILED"));

        result.status = MigrationStatus::Cancelled;
        assert!(completed_report(&result).starts_with("Migration cancelled."));

        result.status = MigrationStatus::Completed;
        assert!(completed_report(&result).starts_with("Migration completed."));
    }

    #[test]
    fn test_storage_listing_marks_truncation() {
        let listing = StorageListing {
            files: vec![
                StorageFileEntry {
                    path: "ab/cd/abcd".to_string(),
                    size: Some(2048),
                },
                StorageFileEntry {
                    path: "ab/ef/abef".to_string(),
                    size: Some(10),
                },
            ],
            total_files: 5,
            shown: 2,
            limit: 2,
        };
        assert_eq!(
            storage_listing(&listing),
            "ab/cd/abcd\t2 KB\nab/ef/abef\t10 B\n... 2 of 5 files shown"
        );

        let r#unsized = StorageListing {
            files: vec![StorageFileEntry {
                path: "x".to_string(),
                size: None,
            }],
            total_files: 1,
            shown: 1,
            limit: 10,
        };
        assert_eq!(storage_listing(&r#unsized), "x");
    }
}
