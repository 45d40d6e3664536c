use std::time::Duration;

/// Upper bound for a single backoff sleep.
const MAX_DELAY_MS: u64 = 5_000;

/// Retry a blocking function with exponential backoff.
///
/// The first attempt runs immediately; at least one attempt is always made.
///
/// # Arguments
/// * `f` - The function to retry
/// * `max_attempts` - Maximum number of attempts (values below 1 are treated as 1)
/// * `base_delay_ms` - Initial delay in milliseconds (doubles each retry, capped at 5s)
/// * `operation_name` - Human-readable name for logging
pub fn retry_with_backoff<F, T, E>(
    mut f: F,
    max_attempts: u32,
    base_delay_ms: u64,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < max_attempts => {
                let delay_ms = backoff_delay_ms(base_delay_ms, attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    e,
                    delay_ms
                );
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    "{} failed after {} attempts: {}",
                    operation_name,
                    max_attempts,
                    e
                );
                return Err(e);
            }
        }
    }
}

fn backoff_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    base_delay_ms
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(MAX_DELAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_on_first_attempt_without_sleeping() {
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(
            || {
                calls += 1;
                Ok(7)
            },
            5,
            1,
            "noop",
        );

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result: Result<&str, String> = retry_with_backoff(
            || {
                calls += 1;
                if calls < 3 {
                    Err(format!("busy #{calls}"))
                } else {
                    Ok("open")
                }
            },
            5,
            1,
            "device open",
        );

        assert_eq!(result, Ok("open"));
        assert_eq!(calls, 3, "Should stop retrying once the call succeeds");
    }

    #[test]
    fn returns_last_error_after_exhausting_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_backoff(
            || {
                calls += 1;
                Err(format!("failure {calls}"))
            },
            3,
            1,
            "always failing",
        );

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = retry_with_backoff(
            || {
                calls += 1;
                Err("nope")
            },
            0,
            1,
            "zero",
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(200, 0), 200);
        assert_eq!(backoff_delay_ms(200, 1), 400);
        assert_eq!(backoff_delay_ms(200, 3), 1600);
        assert_eq!(backoff_delay_ms(200, 10), MAX_DELAY_MS);
        assert_eq!(backoff_delay_ms(200, 200), MAX_DELAY_MS);
    }
}
