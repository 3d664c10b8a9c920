//! Chaos injection at the network and tool boundaries.
//!
//! Disabled by default. When enabled via `CHAOS_MODE=1`, every call that
//! passes through [`apply_network_chaos`] or [`apply_tool_chaos`] pays a
//! random jitter delay and has an independent chance of failing outright.
//! [`maybe_corrupt_llm_output`] additionally lets a run exercise the
//! orchestrator's JSON-fallback and shared-memory paths against garbled
//! model output without needing a flaky real provider.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChaosError {
    #[error("chaos: simulated network failure")]
    Network,
    #[error("chaos: simulated tool failure")]
    Tool,
}

/// Tunable chaos parameters, read once from the environment per process
/// (or explicitly refreshed between parallel-harness invocations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    pub enabled: bool,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub network_fail_prob: f64,
    pub tool_fail_prob: f64,
    pub llm_bad_output_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jitter_min_ms: 200,
            jitter_max_ms: 1000,
            network_fail_prob: 0.0,
            tool_fail_prob: 0.0,
            llm_bad_output_prob: 0.0,
        }
    }
}

impl ChaosConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("CHAOS_MODE").as_deref() == Ok("1"),
            jitter_min_ms: env_u64("CHAOS_JITTER_MIN_MS", 200),
            jitter_max_ms: env_u64("CHAOS_JITTER_MAX_MS", 1000),
            network_fail_prob: env_f64("CHAOS_NET_FAIL_PROB", 0.0),
            tool_fail_prob: env_f64("CHAOS_TOOL_FAIL_PROB", 0.0),
            llm_bad_output_prob: env_f64("CHAOS_LLM_BAD_OUTPUT_PROB", 0.0),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

static CHAOS_CONFIG: once_cell::sync::Lazy<RwLock<ChaosConfig>> =
    once_cell::sync::Lazy::new(|| RwLock::new(ChaosConfig::from_env()));

/// Re-read chaos configuration from the environment. Used by the parallel
/// harness between scenarios so each scenario can set its own env vars.
pub fn refresh_config() {
    let mut guard = CHAOS_CONFIG.write().expect("chaos config lock poisoned");
    *guard = ChaosConfig::from_env();
}

pub fn current_config() -> ChaosConfig {
    CHAOS_CONFIG.read().expect("chaos config lock poisoned").clone()
}

/// Sleep the configured jitter window, then roll for a network failure.
pub async fn apply_network_chaos() -> Result<(), ChaosError> {
    let cfg = current_config();
    if !cfg.enabled {
        return Ok(());
    }
    if cfg.jitter_max_ms > 0 {
        let delay_ms = sample_jitter_ms(&cfg);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    if roll(cfg.network_fail_prob) {
        return Err(ChaosError::Network);
    }
    Ok(())
}

/// Roll for a tool failure. Does not apply jitter (network chaos already
/// does, and tool wrappers call both in sequence).
pub fn apply_tool_chaos() -> Result<(), ChaosError> {
    let cfg = current_config();
    if !cfg.enabled {
        return Ok(());
    }
    if roll(cfg.tool_fail_prob) {
        return Err(ChaosError::Tool);
    }
    Ok(())
}

fn sample_jitter_ms(cfg: &ChaosConfig) -> u64 {
    if cfg.jitter_min_ms >= cfg.jitter_max_ms {
        return cfg.jitter_max_ms;
    }
    rand::thread_rng().gen_range(cfg.jitter_min_ms..=cfg.jitter_max_ms)
}

fn roll(prob: f64) -> bool {
    if prob <= 0.0 {
        return false;
    }
    rand::thread_rng().gen_bool(prob.min(1.0))
}

/// One of three ways a chaos run can garble model output.
enum Corruption {
    Empty,
    Garbage,
    Truncated,
}

/// With `llm_bad_output_prob` probability, replace `text` with an empty
/// string, a malformed JSON fragment, or a half-length truncation. Otherwise
/// return it unchanged.
pub fn maybe_corrupt_llm_output(text: String) -> String {
    let cfg = current_config();
    if !cfg.enabled || cfg.llm_bad_output_prob <= 0.0 {
        return text;
    }
    if !roll(cfg.llm_bad_output_prob) {
        return text;
    }
    let choice = match rand::thread_rng().gen_range(0..3) {
        0 => Corruption::Empty,
        1 => Corruption::Garbage,
        _ => Corruption::Truncated,
    };
    match choice {
        Corruption::Empty => String::new(),
        Corruption::Garbage => "{ not: valid json".to_string(),
        Corruption::Truncated => text.chars().take(text.chars().count() / 2).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test_helper::with_chaos_env;

    mod serial_test_helper {
        use std::sync::Mutex;
        static ENV_LOCK: Mutex<()> = Mutex::new(());

        /// Chaos config is process-global; serialize tests that touch env vars.
        pub fn with_chaos_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
            let _guard = ENV_LOCK.lock().unwrap();
            for (k, v) in vars {
                unsafe { std::env::set_var(k, v) };
            }
            super::super::refresh_config();
            f();
            for (k, _) in vars {
                unsafe { std::env::remove_var(k) };
            }
            super::super::refresh_config();
        }
    }

    #[tokio::test]
    async fn disabled_is_noop() {
        with_chaos_env(&[("CHAOS_MODE", "0")], || {});
        assert!(apply_network_chaos().await.is_ok());
        assert!(apply_tool_chaos().is_ok());
        assert_eq!(maybe_corrupt_llm_output("hello".into()), "hello");
    }

    #[test]
    fn tool_chaos_always_fails_at_prob_one() {
        with_chaos_env(
            &[("CHAOS_MODE", "1"), ("CHAOS_TOOL_FAIL_PROB", "1.0")],
            || {
                assert!(apply_tool_chaos().is_err());
            },
        );
    }

    #[test]
    fn tool_chaos_never_fails_at_prob_zero() {
        with_chaos_env(
            &[("CHAOS_MODE", "1"), ("CHAOS_TOOL_FAIL_PROB", "0.0")],
            || {
                assert!(apply_tool_chaos().is_ok());
            },
        );
    }

    #[test]
    fn corruption_empty_at_prob_one_is_one_of_three_shapes() {
        with_chaos_env(
            &[("CHAOS_MODE", "1"), ("CHAOS_LLM_BAD_OUTPUT_PROB", "1.0")],
            || {
                let out = maybe_corrupt_llm_output("some fairly long sentence of text".into());
                assert!(
                    out.is_empty() || out == "{ not: valid json" || out.len() < 34,
                    "unexpected corruption shape: {out:?}"
                );
            },
        );
    }
}
