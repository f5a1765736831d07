//! Prometheus metrics for backup, restore and retention activity.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Backups finished, by terminal status
    pub static ref BACKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "platform_backup_backups_total",
        "Total number of backups by final status",
        &["type", "status"]
    ).unwrap();

    /// Component exports that failed and were recorded as not backed up
    pub static ref COMPONENT_EXPORT_FAILURES: IntCounterVec = register_int_counter_vec!(
        "platform_backup_component_export_failures_total",
        "Total number of component export failures during backup",
        &["component"]
    ).unwrap();

    /// Backup duration
    pub static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "platform_backup_backup_duration_seconds",
        "Backup creation duration in seconds",
        &["type"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    ).unwrap();

    /// Restore calls by mode and outcome (error code or "ok")
    pub static ref RESTORE_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "platform_backup_restore_attempts_total",
        "Total number of restore calls by mode and outcome",
        &["mode", "outcome"]
    ).unwrap();

    /// Restore duration
    pub static ref RESTORE_DURATION: HistogramVec = register_histogram_vec!(
        "platform_backup_restore_duration_seconds",
        "Restore duration in seconds",
        &["mode"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    ).unwrap();

    /// Integrity verifications by result
    pub static ref INTEGRITY_CHECKS: IntCounterVec = register_int_counter_vec!(
        "platform_backup_integrity_checks_total",
        "Total number of integrity verifications",
        &["result"]
    ).unwrap();

    /// Backups deleted by retention, by the rule that marked them
    pub static ref RETENTION_DELETIONS: IntCounterVec = register_int_counter_vec!(
        "platform_backup_retention_deletions_total",
        "Total number of backups removed by retention",
        &["rule"]
    ).unwrap();

    /// Restore token operations
    pub static ref TOKEN_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "platform_backup_token_operations_total",
        "Total number of restore token operations",
        &["operation", "status"]
    ).unwrap();
}

/// Metrics recorder
pub struct BackupMetrics;

impl BackupMetrics {
    pub fn record_backup(backup_type: &str, status: &str, seconds: f64) {
        BACKUPS_TOTAL.with_label_values(&[backup_type, status]).inc();
        BACKUP_DURATION.with_label_values(&[backup_type]).observe(seconds);
    }

    pub fn record_export_failure(component: &str) {
        COMPONENT_EXPORT_FAILURES.with_label_values(&[component]).inc();
    }

    pub fn record_restore(mode: &str, outcome: &str, seconds: f64) {
        RESTORE_ATTEMPTS.with_label_values(&[mode, outcome]).inc();
        RESTORE_DURATION.with_label_values(&[mode]).observe(seconds);
    }

    pub fn record_integrity_check(passed: bool) {
        let result = if passed { "passed" } else { "failed" };
        INTEGRITY_CHECKS.with_label_values(&[result]).inc();
    }

    pub fn record_retention_deletion(rule: &str) {
        RETENTION_DELETIONS.with_label_values(&[rule]).inc();
    }

    pub fn record_token_operation(operation: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        TOKEN_OPERATIONS.with_label_values(&[operation, status]).inc();
    }

    /// All registered metrics in Prometheus text format
    pub fn export_metrics() -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
    }
}
