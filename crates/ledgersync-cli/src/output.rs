use std::fmt::Display;

use ledgersync_sync::SyncError;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Trait for formatting CLI output
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    /// A labelled value on its own line
    fn field(&self, label: &str, value: &dyn Display);
    fn print_json(&self, value: &serde_json::Value);
}

/// Human-readable output formatter with checkmarks and indentation
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn field(&self, label: &str, value: &dyn Display) {
        println!("  {:<14} {}", format!("{label}:"), value);
    }
    fn print_json(&self, _value: &serde_json::Value) {}
}

/// JSON output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!(
            "{}",
            serde_json::json!({"success": true, "message": message})
        );
    }
    fn error(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"success": false, "error": message})
        );
    }
    fn warn(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"level": "warning", "message": message})
        );
    }
    fn info(&self, _message: &str) {}
    fn field(&self, _label: &str, _value: &dyn Display) {}
    fn print_json(&self, value: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

/// Stable identifier of a sync error kind for JSON output
pub fn error_kind(error: &SyncError) -> &'static str {
    match error {
        SyncError::Transient(_) => "transient",
        SyncError::ResolutionRequired(_) => "resolution_required",
        SyncError::LockContention { .. } => "lock_contention",
        SyncError::LockNotHeld { .. } => "lock_not_held",
        SyncError::BackoffActive { .. } => "backoff_active",
        SyncError::NotConnected => "not_connected",
        SyncError::NotBound => "not_bound",
        SyncError::LedgerNotFound(_) => "ledger_not_found",
        SyncError::AlreadyExists(_) => "already_exists",
        SyncError::Domain(_) => "domain",
        SyncError::State(_) => "state",
    }
}

/// Reports a sync error the way the selected format wants it
pub fn report_sync_error(format: OutputFormat, formatter: &dyn OutputFormatter, error: &SyncError) {
    if format == OutputFormat::Json {
        formatter.print_json(&serde_json::json!({
            "success": false,
            "kind": error_kind(error),
            "retryable": error.is_retryable(),
            "error": error.to_string(),
        }));
        return;
    }
    formatter.error(&error.to_string());
    if let SyncError::ResolutionRequired(resolution) = error {
        if let Some(action) = &resolution.action {
            formatter.info(&format!("To continue: {action}"));
        }
    } else if error.is_retryable() {
        formatter.info("This is temporary; try again later.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(error_kind(&SyncError::NotBound), "not_bound");
        assert_eq!(
            error_kind(&SyncError::BackoffActive { wait_ms: 10 }),
            "backoff_active"
        );
        assert_eq!(
            error_kind(&SyncError::Transient("reset".into())),
            "transient"
        );
    }
}
