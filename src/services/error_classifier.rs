use tracing::warn;

use crate::models::ErrorCategory;

/// Retryable: rate limits, timeouts, connectivity, 5xx gateway conditions.
const TRANSIENT_INDICATORS: [&str; 21] = [
    "rate limit",
    "429",
    "too many requests",
    "timeout",
    "timed out",
    "408",
    "connection",
    "network",
    "econnrefused",
    "econnreset",
    "temporary",
    "retry",
    "503",
    "service unavailable",
    "502",
    "bad gateway",
    "504",
    "gateway timeout",
    "socket",
    "ssl",
    "certificate",
];

/// Not retryable: validation and configuration problems.
const PERMANENT_INDICATORS: [&str; 17] = [
    "validation",
    "invalid",
    "400",
    "bad request",
    "not found",
    "404",
    "unauthorized",
    "401",
    "forbidden",
    "403",
    "conflict",
    "409",
    "symbol",
    "asset",
    "format",
    "malformed",
    "unsupported",
];

/// Infrastructure problems: reported but never retried.
const SYSTEM_INDICATORS: [&str; 10] = [
    "database",
    "postgres",
    "sql",
    "connection pool",
    "memory",
    "disk",
    "ioerror",
    "oserror",
    "internal server error",
    "500",
];

/// Classify an error into a retry category plus a recovery suggestion.
///
/// Case-insensitive substring matching over `message` (or the error's
/// Display text when no message is supplied). Precedence is transient >
/// permanent > system: a message naming both a rate limit and an invalid
/// symbol classifies as transient. Unknown errors default to transient,
/// since retrying is the safer failure mode.
pub fn classify_error(
    error: &dyn std::fmt::Display,
    message: Option<&str>,
) -> (ErrorCategory, &'static str) {
    let text = message
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    classify_message(&text)
}

pub fn classify_message(message: &str) -> (ErrorCategory, &'static str) {
    let lowered = message.to_lowercase();

    if TRANSIENT_INDICATORS.iter().any(|i| lowered.contains(i)) {
        return (ErrorCategory::Transient, transient_suggestion(&lowered));
    }

    if PERMANENT_INDICATORS.iter().any(|i| lowered.contains(i)) {
        return (ErrorCategory::Permanent, permanent_suggestion(&lowered));
    }

    if SYSTEM_INDICATORS.iter().any(|i| lowered.contains(i)) {
        return (ErrorCategory::System, system_suggestion(&lowered));
    }

    warn!("Unknown error type, treating as transient: {}", message);
    (
        ErrorCategory::Transient,
        "An unexpected error occurred. The system will retry automatically.",
    )
}

fn transient_suggestion(text: &str) -> &'static str {
    if text.contains("rate limit") || text.contains("429") {
        "Rate limit exceeded. The system will retry with exponential backoff."
    } else if text.contains("timeout") || text.contains("timed out") || text.contains("408") || text.contains("504") {
        "Request timed out. The system will retry automatically."
    } else if text.contains("connection") || text.contains("network") {
        "Network connection issue. The system will retry automatically."
    } else if text.contains("503") || text.contains("service unavailable") {
        "Service temporarily unavailable. The system will retry automatically."
    } else {
        "Temporary error occurred. The system will retry automatically."
    }
}

fn permanent_suggestion(text: &str) -> &'static str {
    if text.contains("validation") || text.contains("invalid") || text.contains("400") {
        "Invalid request parameters. Please check your job configuration."
    } else if text.contains("not found") || text.contains("404") {
        "Resource not found. Please verify the asset symbol or identifier."
    } else if text.contains("unauthorized") || text.contains("401") {
        "Authentication failed. Please check your API credentials."
    } else if text.contains("forbidden") || text.contains("403") {
        "Access denied. Please check your permissions."
    } else if text.contains("symbol") || text.contains("asset") {
        "Invalid asset symbol or identifier. Please verify and try again."
    } else {
        "Configuration error. Please review your job settings."
    }
}

fn system_suggestion(text: &str) -> &'static str {
    if text.contains("database") || text.contains("postgres") || text.contains("sql") {
        "Database error. Please contact system administrator."
    } else if text.contains("memory") {
        "Insufficient memory. Please contact system administrator."
    } else if text.contains("disk") {
        "Disk space issue. Please contact system administrator."
    } else {
        "System error. Please contact system administrator if the issue persists."
    }
}
