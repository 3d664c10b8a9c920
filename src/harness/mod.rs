//! The parallel benchmark harness (C10): fan out N conversations at bounded
//! concurrency C, aggregate latency/success/consistency, and return a
//! summary the caller can serialize to a report file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::RunConfig;
use crate::llm::LlmClient;
use crate::models::{ClinicResource, UserProfile};
use crate::orchestrator::run_conversation;
use crate::plan::canonical_plan_hash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub plan_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSummary {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub plan_consistency_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub summary: HarnessSummary,
    pub runs: Vec<RunRecord>,
}

/// Run `num_runs` independent phased conversations (one per `users[i %
/// users.len()]`) at bounded concurrency, each writing its own isolated
/// output directory, slot pool, shared memory, and telemetry buffer.
pub async fn run_parallel(
    users: &[UserProfile],
    clinic: ClinicResource,
    llm_factory: impl Fn() -> Arc<dyn LlmClient>,
    config: RunConfig,
    output_dir: &Path,
    num_runs: usize,
    concurrency: usize,
) -> HarnessReport {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let clinic = Arc::new(clinic);
    let config = Arc::new(config);
    let output_dir = Arc::new(output_dir.to_path_buf());

    let mut join_set: JoinSet<RunRecord> = JoinSet::new();

    for i in 0..num_runs {
        let user = users[i % users.len()].clone();
        let clinic = clinic.clone();
        let config = config.clone();
        let output_dir = output_dir.clone();
        let semaphore = semaphore.clone();
        let llm = llm_factory();
        let run_id = format!("run_{i}");

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return RunRecord {
                        run_id,
                        success: false,
                        latency_ms: 0,
                        errors: vec!["semaphore closed".to_string()],
                        plan_hash: None,
                    };
                }
            };

            let started = Instant::now();
            let run_dir_name = format!("{run_id}_{}", crate::plan::run_dir_name());
            let result =
                run_conversation(&user, &clinic, llm, &config, &output_dir, &run_dir_name).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(outcome) => RunRecord {
                    run_id,
                    success: outcome.succeeded(),
                    latency_ms,
                    errors: outcome.hard_error.into_iter().collect(),
                    plan_hash: outcome.plan.as_ref().map(canonical_plan_hash),
                },
                Err(e) => RunRecord {
                    run_id,
                    success: false,
                    latency_ms,
                    errors: vec![e.to_string()],
                    plan_hash: None,
                },
            }
        });
    }

    let mut runs = Vec::with_capacity(num_runs);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(record) => runs.push(record),
            Err(e) => {
                warn!(error = %e, "a harness task panicked");
                runs.push(RunRecord {
                    run_id: "unknown".to_string(),
                    success: false,
                    latency_ms: 0,
                    errors: vec![e.to_string()],
                    plan_hash: None,
                });
            }
        }
    }
    runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));

    let summary = summarize(&runs);
    HarnessReport { summary, runs }
}

fn percentile(sorted_latencies: &[u64], p: f64) -> u64 {
    if sorted_latencies.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted_latencies.len() - 1) as f64).round() as usize;
    sorted_latencies[idx.min(sorted_latencies.len() - 1)]
}

fn summarize(runs: &[RunRecord]) -> HarnessSummary {
    let total = runs.len();
    let success_count = runs.iter().filter(|r| r.success).count();
    let failure_count = total - success_count;

    let mut latencies: Vec<u64> = runs.iter().map(|r| r.latency_ms).collect();
    latencies.sort_unstable();
    let avg_latency_ms = if total > 0 {
        latencies.iter().sum::<u64>() as f64 / total as f64
    } else {
        0.0
    };

    // Count hash occurrences in insertion order so a tie favors whichever
    // hash was seen first, matching SPEC_FULL.md §4.10's tie-break rule.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for run in runs {
        if let Some(hash) = run.plan_hash.as_deref() {
            if !counts.contains_key(hash) {
                order.push(hash);
            }
            *counts.entry(hash).or_insert(0) += 1;
        }
    }
    let modal_count = order
        .iter()
        .map(|h| counts[h])
        .max()
        .unwrap_or(0);
    let plan_consistency_score = if total > 0 {
        modal_count as f64 / total as f64
    } else {
        0.0
    };

    HarnessSummary {
        total,
        success_count,
        failure_count,
        success_rate: if total > 0 {
            success_count as f64 / total as f64
        } else {
            0.0
        },
        avg_latency_ms,
        p50_latency_ms: percentile(&latencies, 50.0),
        p95_latency_ms: percentile(&latencies, 95.0),
        plan_consistency_score,
    }
}

/// Where the harness writes its JSON report, per SPEC_FULL.md §4.10.
pub fn chaos_report_path(output_dir: &Path, scenario: &str, ts: &str) -> PathBuf {
    output_dir.join("tests").join(format!("chaos_{scenario}_{ts}.json"))
}

pub fn parallel_report_path(output_dir: &Path, mode: &str, ts: &str) -> PathBuf {
    output_dir.join("tests").join(format!("parallel_test_{mode}_{ts}.json"))
}

pub fn write_report(path: &Path, report: &HarnessReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedClient;
    use crate::llm::AgentResponse;

    fn user() -> UserProfile {
        UserProfile {
            user_id: "u1".into(),
            name: "Ada".into(),
            age: 40,
            goals: vec!["sleep".into()],
            constraints: vec![],
            budget_min: Some(500.0),
            budget_max: Some(1500.0),
            availability: vec![],
            blackout_dates: vec![],
        }
    }

    #[tokio::test]
    async fn success_and_failure_counts_sum_to_total() {
        unsafe { std::env::set_var("CHAOS_MODE", "0") };
        crate::chaos::refresh_config();

        let clinic = ClinicResource {
            text: "Clinic resources.".into(),
        };
        let config = RunConfig {
            turn_limit: 9,
            ..RunConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();

        let report = run_parallel(
            &[user()],
            clinic,
            || Arc::new(ScriptedClient::new(vec![AgentResponse::text("chat"); 10])),
            config,
            dir.path(),
            6,
            3,
        )
        .await;

        assert_eq!(report.summary.total, 6);
        assert_eq!(
            report.summary.success_count + report.summary.failure_count,
            6
        );
    }

    #[test]
    fn consistency_score_is_one_when_all_hashes_match() {
        let runs: Vec<RunRecord> = (0..5)
            .map(|i| RunRecord {
                run_id: format!("r{i}"),
                success: true,
                latency_ms: 10,
                errors: vec![],
                plan_hash: Some("same-hash".to_string()),
            })
            .collect();
        let summary = summarize(&runs);
        assert_eq!(summary.plan_consistency_score, 1.0);
    }

    #[test]
    fn percentile_picks_expected_index() {
        let latencies = vec![10, 20, 30, 40, 50];
        assert_eq!(percentile(&latencies, 50.0), 30);
        assert_eq!(percentile(&latencies, 95.0), 50);
    }
}
