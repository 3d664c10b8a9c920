//! The two tools an agent may invoke mid-turn: `validate_claims` and
//! `schedule_services`. Each call is routed through the resilience wrapper
//! (chaos-then-retry) and produces a telemetry record tagged with the
//! caller (speaker) that triggered it.
//!
//! The caller tag is an explicit per-invocation argument, not a process-wide
//! mutable global — this is the resolved form of the caller-tag design note
//! (SPEC_FULL.md §9), load-bearing once multiple runs execute concurrently
//! under the parallel harness.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::ToolCall;
use crate::models::{Appointment, ClaimValidation, ServiceType, Speaker, TelemetryRecord};
use crate::resilience::resilient_tool_call;
use crate::scheduler;
use crate::validator;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for tool {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parameters the validator tool needs beyond what the agent supplies.
#[derive(Debug, Clone)]
pub struct ValidatorToolConfig {
    pub default_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub turn_index: u32,
}

/// Parameters the scheduling tool needs beyond what the agent supplies.
#[derive(Debug, Clone)]
pub struct SchedulerToolConfig {
    pub seed: u64,
    pub blackout_dates: Vec<String>,
    pub persist_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ValidateClaimsArgs {
    claims: Vec<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleServicesArgs {
    services: Vec<String>,
    user_id: String,
}

#[derive(Debug, Serialize)]
struct ValidateClaimsResultItem {
    claim: String,
    validity: &'static str,
    confidence: f64,
    evidence: Option<String>,
    server_unavailable: bool,
}

/// The JSON Schema for each tool's input, handed to whatever LLM-tool-call
/// plumbing the caller's provider SDK uses.
pub fn tool_schemas() -> serde_json::Value {
    json!([
        {
            "name": "validate_claims",
            "description": "Validate one or more scientific claims against the external claim-validation service.",
            "parameters": {
                "type": "object",
                "properties": {
                    "claims": { "type": "array", "items": { "type": "string" } },
                    "context": { "type": "string" },
                    "url": { "type": "string" }
                },
                "required": ["claims"]
            }
        },
        {
            "name": "schedule_services",
            "description": "Book appointments for the requested services against the clinic's deterministic slot pool.",
            "parameters": {
                "type": "object",
                "properties": {
                    "services": { "type": "array", "items": { "type": "string" } },
                    "user_id": { "type": "string" }
                },
                "required": ["services", "user_id"]
            }
        }
    ])
}

/// Dispatch one tool call, returning its JSON result and the telemetry
/// record to append to the run's buffer.
pub async fn dispatch(
    call: &ToolCall,
    caller: Speaker,
    validator_cfg: &ValidatorToolConfig,
    scheduler_cfg: &SchedulerToolConfig,
) -> Result<(serde_json::Value, TelemetryRecord), ToolError> {
    match call.name.as_str() {
        "validate_claims" => {
            let args: ValidateClaimsArgs =
                serde_json::from_value(call.arguments.clone()).map_err(|source| {
                    ToolError::InvalidArguments {
                        tool: call.name.clone(),
                        source,
                    }
                })?;
            Ok(validate_claims_tool(args, caller, validator_cfg).await)
        }
        "schedule_services" => {
            let args: ScheduleServicesArgs =
                serde_json::from_value(call.arguments.clone()).map_err(|source| {
                    ToolError::InvalidArguments {
                        tool: call.name.clone(),
                        source,
                    }
                })?;
            Ok(schedule_services_tool(args, caller, scheduler_cfg).await)
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

async fn validate_claims_tool(
    args: ValidateClaimsArgs,
    caller: Speaker,
    cfg: &ValidatorToolConfig,
) -> (serde_json::Value, TelemetryRecord) {
    let started = Instant::now();
    let url = args.url.clone().unwrap_or_else(|| cfg.default_url.clone());

    let claims: Vec<_> = args
        .claims
        .iter()
        .flat_map(|text| {
            // The agent already curated this list as "things to validate";
            // run them through the same sentence/keyword heuristic used on
            // raw transcript text, and fall back to treating the whole
            // string as one claim when it doesn't match any marker.
            let extracted = validator::extract_claims(text, cfg.turn_index, caller);
            if extracted.is_empty() {
                vec![crate::models::Claim {
                    text: text.clone(),
                    turn_index: cfg.turn_index,
                    speaker: caller,
                    context_before: args.context.clone(),
                    context_after: None,
                }]
            } else {
                extracted
            }
        })
        .collect();

    let (validations, outcome) = resilient_tool_call::<_, _, Vec<ClaimValidation>, anyhow::Error>(
        || {
            let claims = claims.clone();
            let url = url.clone();
            async move {
                Ok(validator::concurrency_limited_validate_claims(
                    &claims,
                    &url,
                    cfg.timeout,
                    cfg.max_retries,
                )
                .await)
            }
        },
    )
    .await;

    let latency_s = started.elapsed().as_secs_f64();
    let validations = validations.unwrap_or_default();

    if outcome.hard_failure {
        warn!(tool = "validate_claims", error = ?outcome.last_error, "tool call hard-failed");
    } else {
        info!(tool = "validate_claims", count = validations.len(), %caller, "validated claims");
    }

    let result_items: Vec<ValidateClaimsResultItem> = validations
        .iter()
        .map(|v| ValidateClaimsResultItem {
            claim: v.claim.text.clone(),
            validity: match v.validity {
                crate::models::Validity::True => "true",
                crate::models::Validity::False => "false",
                crate::models::Validity::Unknown => "unknown",
            },
            confidence: v.confidence,
            evidence: v.evidence.clone(),
            server_unavailable: v.server_unavailable,
        })
        .collect();

    let record = TelemetryRecord::Tool {
        name: "validate_claims".to_string(),
        caller,
        count: Some(validations.len()),
        requested: None,
        booked: None,
        latency_s,
    };

    (
        json!({ "validations": result_items, "raw": validations }),
        record,
    )
}

async fn schedule_services_tool(
    args: ScheduleServicesArgs,
    caller: Speaker,
    cfg: &SchedulerToolConfig,
) -> (serde_json::Value, TelemetryRecord) {
    let started = Instant::now();
    let mut pool = scheduler::generate_slots(cfg.seed);
    let mut booked = Vec::new();

    for service_name in &args.services {
        let Some(service) = ServiceType::from_str_loose(service_name) else {
            warn!(service = %service_name, "schedule_services: unknown service, skipping");
            continue;
        };

        let (appointment, _) = resilient_tool_call::<_, _, Option<Appointment>, anyhow::Error>(
            || {
                let persist = cfg.persist_path.clone();
                async move {
                    Ok(scheduler::book_slot_avoiding_blackout(
                        &mut pool,
                        service,
                        &args.user_id,
                        &cfg.blackout_dates,
                        persist.as_deref(),
                    ))
                }
            },
        )
        .await;

        if let Some(Some(appointment)) = appointment {
            booked.push(appointment);
        }
    }

    let latency_s = started.elapsed().as_secs_f64();
    info!(
        tool = "schedule_services",
        requested = args.services.len(),
        booked = booked.len(),
        %caller,
        "scheduling attempt complete"
    );

    let record = TelemetryRecord::Tool {
        name: "schedule_services".to_string(),
        caller,
        count: None,
        requested: Some(args.services.clone()),
        booked: Some(booked.len()),
        latency_s,
    };

    (json!({ "appointments": booked }), record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scheduler_cfg() -> SchedulerToolConfig {
        SchedulerToolConfig {
            seed: 42,
            blackout_dates: vec![],
            persist_path: None,
        }
    }

    fn validator_cfg() -> ValidatorToolConfig {
        ValidatorToolConfig {
            default_url: "http://127.0.0.1:1/unreachable".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 0,
            turn_index: 0,
        }
    }

    #[tokio::test]
    async fn schedule_services_books_requested_services() {
        let call = ToolCall {
            name: "schedule_services".to_string(),
            arguments: json!({ "services": ["vo2_test", "scan"], "user_id": "u1" }),
        };
        let (result, record) = dispatch(&call, Speaker::Planner, &validator_cfg(), &scheduler_cfg())
            .await
            .unwrap();
        let appointments = result["appointments"].as_array().unwrap();
        assert_eq!(appointments.len(), 2);
        match record {
            TelemetryRecord::Tool { booked, caller, .. } => {
                assert_eq!(booked, Some(2));
                assert_eq!(caller, Speaker::Planner);
            }
            _ => panic!("expected a tool telemetry record"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_name_is_rejected() {
        let call = ToolCall {
            name: "delete_everything".to_string(),
            arguments: json!({}),
        };
        let err = dispatch(&call, Speaker::Advocate, &validator_cfg(), &scheduler_cfg())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn validate_claims_degrades_gracefully_when_server_unreachable() {
        let call = ToolCall {
            name: "validate_claims".to_string(),
            arguments: json!({
                "claims": ["Daily strength training reduces fall risk and improves biomarker profiles in older adults overall."]
            }),
        };
        let (result, _) = dispatch(&call, Speaker::Planner, &validator_cfg(), &scheduler_cfg())
            .await
            .unwrap();
        let validations = result["validations"].as_array().unwrap();
        assert_eq!(validations.len(), 1);
        assert_eq!(validations[0]["validity"], "unknown");
        assert_eq!(validations[0]["server_unavailable"], true);
    }
}
