//! Retry for SQLite lock contention
//!
//! Writes from concurrent requests can hit `database is locked`. Those are
//! retried with exponential backoff (10ms doubling, capped at 1000ms) until
//! `max_wait_ms` has elapsed. Every other error returns immediately.

use courier_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Default lock wait for storage writes
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

fn is_lock_error(err: &Error) -> bool {
    matches!(err, Error::Database(db_err) if db_err.to_string().contains("database is locked"))
}

/// Run `operation`, retrying while SQLite reports the database as locked
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_lock_error(&err) {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if elapsed >= max_duration {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Database still locked, giving up"
            );
            return Err(Error::Unavailable(format!(
                "{}: database locked after {} attempts",
                operation_name, attempt
            )));
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, retrying"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
