//! The phased dual-agent orchestrator (C8): turn-taking across the fixed
//! phase list, tool-call mediation, shared-memory bookkeeping, and
//! structured final-plan capture.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::chaos::maybe_corrupt_llm_output;
use crate::config::RunConfig;
use crate::llm::{LlmClient, Message, ToolCall};
use crate::models::{
    Appointment, ClaimValidation, ClinicResource, FinalPlan, Phase, ServiceType, SharedMemory,
    Speaker, TelemetryRecord, UserProfile,
};
use crate::plan;
use crate::resilience::resilient_llm_call;
use crate::tools::{self, SchedulerToolConfig, ValidatorToolConfig};
use crate::{agents, validator};

const MAX_TOOL_ROUNDS: u32 = 4;

/// Everything the conversation produced, whether or not a structured plan
/// was ever captured.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub plan: Option<FinalPlan>,
    pub used_fallback: bool,
    pub hard_error: Option<String>,
    pub transcript: Vec<(Speaker, String)>,
    pub validations: Vec<ClaimValidation>,
    pub telemetry: Vec<TelemetryRecord>,
    pub appointments: Vec<Appointment>,
    pub run_dir: PathBuf,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.plan.is_some()
    }
}

fn opening_message(user: &UserProfile) -> String {
    format!(
        "I represent {} (age {}). Goals: {}. Budget: {}. Availability: {}. Let's draft a 6-month plan together.",
        user.name,
        user.age,
        user.goals.join(", "),
        user.budget_display(),
        user.availability.join(", "),
    )
}

/// Run one complete phased conversation for `user`, writing artifacts under
/// `output_dir/{run_dir_name}/`. `run_dir_name` is accepted explicitly so
/// the parallel harness can assign a unique, collision-free directory per
/// concurrent run.
#[instrument(skip(llm, config), fields(user = %user.name))]
pub async fn run_conversation(
    user: &UserProfile,
    clinic: &ClinicResource,
    llm: Arc<dyn LlmClient>,
    config: &RunConfig,
    output_dir: &Path,
    run_dir_name: &str,
) -> anyhow::Result<RunOutcome> {
    let run_dir = output_dir.join(run_dir_name);
    std::fs::create_dir_all(&run_dir)?;
    let bookings_path = run_dir.join("bookings.json");

    let advocate_prompt = agents::build_advocate_prompt(user);
    let planner_prompt = agents::build_planner_prompt(clinic);

    let mut memory = SharedMemory::new();
    let mut telemetry = Vec::new();
    let opening = opening_message(user);
    let mut transcript = vec![(Speaker::Advocate, opening.clone())];
    let mut last_text = opening;

    let validator_cfg = ValidatorToolConfig {
        default_url: config.validator_url.clone(),
        timeout: std::time::Duration::from_secs(config.validator_timeout_secs),
        max_retries: config.validator_retries,
        turn_index: 0,
    };
    let scheduler_cfg = SchedulerToolConfig {
        seed: config.seed,
        blackout_dates: user.blackout_dates.clone(),
        persist_path: Some(bookings_path.clone()),
    };

    let mut captured_plan: Option<FinalPlan> = None;
    let mut hard_error: Option<String> = None;

    for (turn_index, phase) in Phase::ORDER.iter().enumerate() {
        if *phase == Phase::Start {
            continue;
        }
        if turn_index as u32 >= config.turn_limit {
            break;
        }

        let speaker = phase.speaker();
        let system_prompt = match speaker {
            Speaker::Advocate => &advocate_prompt,
            Speaker::Planner => &planner_prompt,
        };

        let mut validator_cfg = validator_cfg.clone();
        validator_cfg.turn_index = turn_index as u32;

        let hint = format!("[phase] {phase} | [shared_memory] {}", memory.render_brief());
        let mut messages = vec![Message::user(last_text.clone()), Message::user(hint)];

        let turn_started = Instant::now();
        let mut response = match invoke_llm(&llm, system_prompt, &messages).await {
            Ok(resp) => resp,
            Err(err) => {
                hard_error = Some(err);
                break;
            }
        };

        let mut rounds = 0;
        while !response.is_final() && rounds < MAX_TOOL_ROUNDS {
            for call in &response.tool_calls {
                run_tool_call(
                    call,
                    speaker,
                    &validator_cfg,
                    &scheduler_cfg,
                    &mut messages,
                    &mut memory,
                    &mut telemetry,
                )
                .await;
            }
            response = match invoke_llm(&llm, system_prompt, &messages).await {
                Ok(resp) => resp,
                Err(err) => {
                    hard_error = Some(err);
                    break;
                }
            };
            rounds += 1;
        }
        if hard_error.is_some() {
            break;
        }

        let final_text = maybe_corrupt_llm_output(response.text.clone());
        let latency_s = turn_started.elapsed().as_secs_f64();
        telemetry.push(TelemetryRecord::Turn {
            phase: phase.to_string(),
            speaker,
            latency_s,
        });
        info!(%phase, %speaker, latency_s, "turn complete");

        let claims = validator::extract_claims(&final_text, turn_index as u32, speaker);
        let claims_added = claims.len();
        memory.add_claims(claims);
        telemetry.push(TelemetryRecord::MemoryUpdate {
            phase: phase.to_string(),
            claims_added,
        });

        transcript.push((speaker, final_text.clone()));
        last_text = final_text.clone();

        if phase.expects_final_plan() {
            match plan::try_extract_final_plan(response.structured_output.as_ref(), &final_text) {
                Some(mut captured) => {
                    captured.recompute_total_cost();
                    captured_plan = Some(captured);
                    break;
                }
                None => debug!(%phase, "no structured plan captured this turn, continuing"),
            }
        }
    }

    let used_fallback = captured_plan.is_none() && hard_error.is_none();
    let plan = if let Some(plan) = captured_plan {
        Some(plan)
    } else if hard_error.is_none() {
        Some(plan::synthesize_fallback_plan(
            user,
            &memory,
            config.seed,
            Some(&bookings_path),
        ))
    } else {
        warn!(error = ?hard_error, "run ended in a hard failure, no plan produced");
        None
    };

    if let Some(plan) = &plan {
        let artifacts = plan::RunArtifacts {
            run_dir: run_dir.clone(),
            plan: plan.clone(),
            transcript: transcript.clone(),
            validations: memory.validations.clone(),
            telemetry: telemetry.clone(),
            bookings: memory.appointments.clone(),
        };
        match plan::write_run_artifacts(output_dir, run_dir_name, &artifacts) {
            Ok(_) => {
                if let Err(e) = plan::append_run_index(
                    output_dir,
                    plan::RunIndexEntry {
                        id: run_dir_name.to_string(),
                        run_id: run_dir_name.to_string(),
                        timestamp: chrono::Utc::now().to_rfc3339(),
                        user: user.name.clone(),
                        status: if used_fallback { "fallback".to_string() } else { "complete".to_string() },
                        plan_score: plan.total_cost,
                        outputs_dir: run_dir.display().to_string(),
                    },
                ) {
                    warn!(error = %e, "failed to update run index");
                }
            }
            Err(e) => warn!(error = %e, "failed to persist run artifacts"),
        }
    }

    let outcome = RunOutcome {
        plan,
        used_fallback,
        hard_error,
        transcript,
        validations: memory.validations.clone(),
        telemetry,
        appointments: memory.appointments.clone(),
        run_dir,
    };
    Ok(outcome)
}

async fn invoke_llm(
    llm: &Arc<dyn LlmClient>,
    system_prompt: &str,
    messages: &[Message],
) -> Result<crate::llm::AgentResponse, String> {
    let (response, outcome) = resilient_llm_call::<_, _, _, anyhow::Error>(|| {
        let llm = llm.clone();
        let system_prompt = system_prompt.to_string();
        let messages = messages.to_vec();
        async move { llm.complete(&system_prompt, &messages).await }
    })
    .await;

    match response {
        Some(resp) => Ok(resp),
        None => Err(outcome.last_error.unwrap_or_else(|| "unknown LLM failure".to_string())),
    }
}

async fn run_tool_call(
    call: &ToolCall,
    speaker: Speaker,
    validator_cfg: &ValidatorToolConfig,
    scheduler_cfg: &SchedulerToolConfig,
    messages: &mut Vec<Message>,
    memory: &mut SharedMemory,
    telemetry: &mut Vec<TelemetryRecord>,
) {
    match tools::dispatch(call, speaker, validator_cfg, scheduler_cfg).await {
        Ok((result, record)) => {
            absorb_tool_result(call, &result, memory);
            telemetry.push(record);
            messages.push(Message::tool_result(result.to_string()));
        }
        Err(err) => {
            warn!(tool = %call.name, error = %err, "tool dispatch failed");
            messages.push(Message::tool_result(format!("{{\"error\": \"{err}\"}}")));
        }
    }
}

fn absorb_tool_result(call: &ToolCall, result: &Value, memory: &mut SharedMemory) {
    match call.name.as_str() {
        "schedule_services" => {
            if let Some(appts) = result.get("appointments")
                && let Ok(parsed) = serde_json::from_value::<Vec<Appointment>>(appts.clone())
            {
                if !parsed.is_empty() {
                    let services: Vec<ServiceType> = parsed.iter().map(|a| a.service_type).collect();
                    memory.record_decision(format!(
                        "booked {} service(s): {}",
                        parsed.len(),
                        services.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ));
                }
                memory.add_appointments(parsed);
            }
        }
        "validate_claims" => {
            if let Some(raw) = result.get("raw")
                && let Ok(parsed) = serde_json::from_value::<Vec<ClaimValidation>>(raw.clone())
            {
                memory.add_validations(parsed);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedClient;
    use crate::llm::AgentResponse;
    use serde_json::json;

    fn user() -> UserProfile {
        UserProfile {
            user_id: "u1".into(),
            name: "Ada".into(),
            age: 40,
            goals: vec!["sleep".into()],
            constraints: vec![],
            budget_min: Some(500.0),
            budget_max: Some(1500.0),
            availability: vec!["weekday-morning".into()],
            blackout_dates: vec![],
        }
    }

    fn clinic() -> ClinicResource {
        ClinicResource {
            text: "Offers baseline bloodwork, VO2 testing, and lifestyle coaching.".into(),
        }
    }

    fn valid_plan_json() -> Value {
        json!({
            "user_name": "Ada",
            "focus_area": "sleep",
            "total_cost": 0.0,
            "items": [
                { "month": 1, "label": "baseline_bloodwork", "rationale": "r" },
                { "month": 2, "label": "vo2_test", "rationale": "r" },
                { "month": 3, "label": "lifestyle_coaching", "rationale": "r" }
            ],
            "warnings": [],
            "disclaimers": FinalPlan::default_disclaimers()
        })
    }

    #[tokio::test]
    async fn happy_path_captures_plan_from_final_phase() {
        unsafe { std::env::set_var("CHAOS_MODE", "0") };
        crate::chaos::refresh_config();

        let mut responses = vec![AgentResponse::text("ok"); 10];
        let final_plan_turn = Phase::ORDER.iter().position(|p| *p == Phase::FinalPlan).unwrap();
        responses[final_plan_turn - 1] = AgentResponse::text(valid_plan_json().to_string());
        let llm = Arc::new(ScriptedClient::new(responses));

        let config = RunConfig {
            turn_limit: 9,
            ..RunConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_conversation(&user(), &clinic(), llm, &config, dir.path(), "run_1")
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert!(!outcome.used_fallback);
        assert!(outcome.transcript.len() >= 7);
        assert!(dir.path().join("run_1").exists());
    }

    #[tokio::test]
    async fn no_structured_plan_falls_back() {
        unsafe { std::env::set_var("CHAOS_MODE", "0") };
        crate::chaos::refresh_config();

        let llm = Arc::new(ScriptedClient::new(vec![AgentResponse::text("just chatting"); 10]));
        let config = RunConfig {
            turn_limit: 9,
            ..RunConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_conversation(&user(), &clinic(), llm, &config, dir.path(), "run_2")
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert!(outcome.used_fallback);
        assert_eq!(outcome.plan.unwrap().items.len(), 3);
    }

    #[tokio::test]
    async fn telemetry_turn_records_never_exceed_turn_limit() {
        unsafe { std::env::set_var("CHAOS_MODE", "0") };
        crate::chaos::refresh_config();

        let llm = Arc::new(ScriptedClient::new(vec![AgentResponse::text("hi"); 10]));
        let config = RunConfig {
            turn_limit: 4,
            ..RunConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_conversation(&user(), &clinic(), llm, &config, dir.path(), "run_3")
            .await
            .unwrap();

        let turn_records = outcome
            .telemetry
            .iter()
            .filter(|t| matches!(t, TelemetryRecord::Turn { .. }))
            .count();
        assert!(turn_records <= 4);
    }
}
