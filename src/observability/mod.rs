pub mod usage;

pub use usage::{estimate_request_tokens, estimate_tokens, UsageReport};

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let filter = EnvFilter::try_new(tracing_level(&level)).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_level(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

/// Emit the usage record of a completed generation at INFO level.
pub fn log_generation_complete(report: &UsageReport) {
    tracing::info!(
        session_id = report.session_id,
        model = %report.model,
        mode = ?report.mode,
        output_chars = report.output_chars,
        input_tokens = report.estimated_input_tokens,
        output_tokens = report.estimated_output_tokens,
        duration_ms = report.duration_ms,
        "generation completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level_aliases() {
        assert_eq!(tracing_level("WARNING"), "WARN");
        assert_eq!(tracing_level("CRITICAL"), "ERROR");
        assert_eq!(tracing_level("DEBUG"), "DEBUG");
    }
}
