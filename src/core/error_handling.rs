//! Reporting errors at the process boundary
//!
//! Library code returns `BrokerError` values. The binary decides how much of
//! an error to show: user-actionable errors (bad config, bad arguments) are
//! printed as-is, system errors get a generic line plus debug detail.

/// Errors that know whether the user can act on them
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some(message)`; otherwise it returns `None`.
pub trait ContextualError: std::error::Error {
    fn is_user_actionable(&self) -> bool;

    fn user_message(&self) -> Option<String>;
}

/// Log an error with a level of detail matching its kind
///
/// # Examples
/// ```rust,no_run
/// # use routemq::core::error_handling::log_error_with_context;
/// # use routemq::broker::BrokerError;
/// let err = BrokerError::QueueNotFound { name: "orders".to_string() };
/// log_error_with_context(&err, "Publishing message");
/// // Logs: "FATAL: queue not found: orders"
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => log::error!("FATAL: {}", user_msg),
        _ => log::error!("FATAL: {}", operation_context),
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}

/// Process exit code for an error: 2 for user errors, 1 for everything else
pub fn exit_code<E: ContextualError>(error: &E) -> i32 {
    if error.is_user_actionable() {
        2
    } else {
        1
    }
}
