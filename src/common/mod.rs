//! 通用工具：重试、字符串清洗、致命错误退出

pub mod retry;
pub mod text;

pub use retry::{is_retryable_message, retry_async, RetryError, RetryParams};
pub use text::{clean_string, truncate_chars};

/// Logs `err` and terminates the process.
///
/// Used where continuing would break the committed-in-order guarantee
/// (store or bus failures, corrupt cache records).
pub fn fatal(context: &str, err: &dyn std::fmt::Display) -> ! {
    log::error!("fatal: {context}: {err}");
    log::logger().flush();
    std::process::exit(1)
}
