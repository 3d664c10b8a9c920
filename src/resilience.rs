//! Retry wrappers that sit between the orchestrator and the chaos layer.
//!
//! `resilient_llm_call` only retries chaos-induced network failures — a real
//! provider error is assumed to be non-transient and is left to propagate.
//! `resilient_tool_call` is more permissive: it retries tool chaos, network
//! chaos, and any other error the wrapped call produces, since tool calls in
//! this system are all local/mock and any failure there is expected to be
//! incidental.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::chaos::{apply_network_chaos, apply_tool_chaos};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    pub retries: u32,
    pub last_error: Option<String>,
    #[serde(default)]
    pub hard_failure: bool,
}

impl RetryOutcome {
    fn ok(retries: u32, last_error: Option<String>) -> Self {
        Self {
            retries,
            last_error,
            hard_failure: false,
        }
    }

    fn failed(retries: u32, last_error: String) -> Self {
        Self {
            retries,
            last_error: Some(last_error),
            hard_failure: true,
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = 2u64.checked_pow(attempt).unwrap_or(u64::MAX) as f64;
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.5);
    Duration::from_secs_f64(base + jitter)
}

/// Retry an LLM invocation against chaos-induced network failures only.
/// `call` is re-invoked from scratch on every attempt.
pub async fn resilient_llm_call<F, Fut, T, E>(mut call: F) -> (Option<T>, RetryOutcome)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if let Err(chaos_err) = apply_network_chaos().await {
            last_error = Some(chaos_err.to_string());
            if retries == MAX_RETRIES {
                return (None, RetryOutcome::failed(retries, last_error.unwrap()));
            }
            tokio::time::sleep(backoff_delay(retries)).await;
            retries += 1;
            continue;
        }

        match call().await {
            Ok(result) => return (Some(result), RetryOutcome::ok(retries, last_error)),
            Err(e) => {
                // A real provider error is not chaos-retryable; surface it immediately.
                return (None, RetryOutcome::failed(retries, e.to_string()));
            }
        }
    }
}

/// Retry a tool invocation against tool chaos, network chaos, and any error
/// the call itself returns.
pub async fn resilient_tool_call<F, Fut, T, E>(mut call: F) -> (Option<T>, RetryOutcome)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if let Err(chaos_err) = apply_tool_chaos() {
            last_error = Some(chaos_err.to_string());
            if retries == MAX_RETRIES {
                return (None, RetryOutcome::failed(retries, last_error.unwrap()));
            }
            tokio::time::sleep(backoff_delay(retries)).await;
            retries += 1;
            continue;
        }
        if let Err(chaos_err) = apply_network_chaos().await {
            last_error = Some(chaos_err.to_string());
            if retries == MAX_RETRIES {
                return (None, RetryOutcome::failed(retries, last_error.unwrap()));
            }
            tokio::time::sleep(backoff_delay(retries)).await;
            retries += 1;
            continue;
        }

        match call().await {
            Ok(result) => return (Some(result), RetryOutcome::ok(retries, last_error)),
            Err(e) => {
                last_error = Some(e.to_string());
                if retries == MAX_RETRIES {
                    return (None, RetryOutcome::failed(retries, last_error.unwrap()));
                }
                tokio::time::sleep(backoff_delay(retries)).await;
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn llm_call_succeeds_without_chaos() {
        unsafe { std::env::set_var("CHAOS_MODE", "0") };
        crate::chaos::refresh_config();
        let (result, outcome) =
            resilient_llm_call::<_, _, _, anyhow::Error>(|| async { Ok::<_, anyhow::Error>(42) })
                .await;
        assert_eq!(result, Some(42));
        assert_eq!(outcome.retries, 0);
        assert!(!outcome.hard_failure);
    }

    #[tokio::test]
    async fn tool_call_retries_transient_errors_then_succeeds() {
        unsafe { std::env::set_var("CHAOS_MODE", "0") };
        crate::chaos::refresh_config();
        let attempts = AtomicU32::new(0);
        let (result, outcome) = resilient_tool_call::<_, _, _, anyhow::Error>(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(outcome.retries, 2);
    }
}
