//! Plan schema validation, the deterministic fallback plan, and per-run
//! artifact persistence (C9). Structured output from the agent is validated
//! both by `serde`'s typed deserialize and, for defense-in-depth against a
//! model that produces shapes `serde` would silently coerce, a compiled
//! JSON Schema applied to the raw value first — mirroring this codebase's
//! existing habit of hard-checking LLM-shaped output before trusting it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::models::{
    Appointment, ClaimValidation, EvidenceFlag, FinalPlan, PlanItem, ServiceType, SharedMemory,
    Speaker, TelemetryRecord, UserProfile, Validity,
};
use crate::scheduler;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("structured output failed schema validation: {0}")]
    SchemaValidation(String),
    #[error("structured output was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn plan_json_schema() -> Value {
    json!({
        "type": "object",
        "required": ["user_name", "focus_area", "total_cost", "items", "disclaimers"],
        "properties": {
            "user_name": { "type": "string" },
            "focus_area": { "type": "string" },
            "total_cost": { "type": "number", "minimum": 0 },
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["month", "label", "rationale"],
                    "properties": {
                        "month": { "type": "integer", "minimum": 1, "maximum": 6 },
                        "label": { "type": "string" },
                        "rationale": { "type": "string" }
                    }
                }
            },
            "warnings": { "type": "array", "items": { "type": "string" } },
            "disclaimers": { "type": "array", "items": { "type": "string" } }
        }
    })
}

static SCHEMA_VALIDATOR: Lazy<jsonschema::Validator> =
    Lazy::new(|| jsonschema::validator_for(&plan_json_schema()).expect("plan schema is valid"));

/// Validate `value` against the `FinalPlan` schema and deserialize it.
/// Any failure — schema mismatch or a shape `serde` can't deserialize — is
/// reported as [`PlanError`]; the orchestrator treats all of them
/// identically (SPEC_FULL.md §9: no special-casing by failure origin).
pub fn validate_plan_value(value: &Value) -> Result<FinalPlan, PlanError> {
    if let Err(first_error) = SCHEMA_VALIDATOR.validate(value) {
        return Err(PlanError::SchemaValidation(first_error.to_string()));
    }
    let plan: FinalPlan = serde_json::from_value(value.clone())?;
    Ok(plan)
}

/// Attempt to capture a structured `FinalPlan` from one turn's output,
/// preferring an attached structured-output artifact over the raw text.
/// Both paths funnel through the same schema check; any failure degrades to
/// `None` uniformly rather than branching on which path produced it.
pub fn try_extract_final_plan(structured_output: Option<&Value>, text: &str) -> Option<FinalPlan> {
    if let Some(value) = structured_output {
        match validate_plan_value(value) {
            Ok(plan) => return Some(plan),
            Err(e) => debug!(error = %e, "structured-output artifact failed plan validation"),
        }
    }

    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value) => match validate_plan_value(&value) {
            Ok(plan) => Some(plan),
            Err(e) => {
                debug!(error = %e, "plan JSON parsed from text failed schema validation");
                None
            }
        },
        Err(e) => {
            debug!(error = %e, "turn text was not valid JSON, no plan captured");
            None
        }
    }
}

const FALLBACK_SERVICES: [ServiceType; 3] = [
    ServiceType::BaselineBloodwork,
    ServiceType::Vo2Test,
    ServiceType::LifestyleCoaching,
];

/// The deterministic plan C9 synthesizes when the agent conversation never
/// yields a structured `FinalPlan`. Books each canonical service against a
/// fresh slot pool generated with `seed`, deriving each item's evidence flag
/// from whatever the conversation already validated about it.
pub fn synthesize_fallback_plan(
    user: &UserProfile,
    memory: &SharedMemory,
    seed: u64,
    persist_path: Option<&Path>,
) -> FinalPlan {
    let mut pool = scheduler::generate_slots(seed);
    let mut items = Vec::new();

    for (index, service) in FALLBACK_SERVICES.into_iter().enumerate() {
        let appointment = scheduler::book_slot_avoiding_blackout(
            &mut pool,
            service,
            &user.user_id,
            &user.blackout_dates,
            persist_path,
        );
        let evidence_flag = evidence_flag_for_service(service, &memory.validations);
        items.push(PlanItem {
            month: (index as u32 + 1).min(6),
            label: service.as_str().to_string(),
            rationale: format!("Supports user goals via {service}"),
            appointment,
            evidence_flag: Some(evidence_flag),
        });
    }

    let flagged: Vec<String> = items
        .iter()
        .filter(|item| matches!(item.evidence_flag, Some(EvidenceFlag::Low | EvidenceFlag::Unknown)))
        .map(|item| item.label.clone())
        .collect();
    let warnings = if flagged.is_empty() {
        Vec::new()
    } else {
        vec![format!("low/unknown evidence for: {}", flagged.join(", "))]
    };

    let mut plan = FinalPlan {
        user_name: user.name.clone(),
        focus_area: user
            .goals
            .first()
            .cloned()
            .unwrap_or_else(|| "general longevity".to_string()),
        total_cost: 0.0,
        items,
        warnings,
        disclaimers: FinalPlan::default_disclaimers(),
    };
    plan.recompute_total_cost();
    plan
}

fn evidence_flag_for_service(service: ServiceType, validations: &[ClaimValidation]) -> EvidenceFlag {
    let label = service.label_with_spaces();
    let matching: Vec<&ClaimValidation> = validations
        .iter()
        .filter(|v| v.claim.text.to_lowercase().contains(&label))
        .collect();

    let true_confidences: Vec<f64> = matching
        .iter()
        .filter(|v| v.validity == Validity::True)
        .map(|v| v.confidence)
        .collect();

    if let Some(&max_conf) = true_confidences
        .iter()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        if max_conf >= 0.6 {
            return EvidenceFlag::Ok;
        }
        return EvidenceFlag::Low;
    }

    EvidenceFlag::Unknown
}

/// SHA-256 hex of the canonical (keys-sorted) JSON serialization of `plan`,
/// used by the parallel harness to measure plan-consistency.
pub fn canonical_plan_hash(plan: &FinalPlan) -> String {
    let value = serde_json::to_value(plan).expect("FinalPlan always serializes");
    let canonical = canonicalize(&value);
    let bytes = serde_json::to_vec(&canonical).expect("canonicalized value always serializes");
    let digest = Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Everything written for one completed (or partially completed) run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub plan: FinalPlan,
    pub transcript: Vec<(Speaker, String)>,
    pub validations: Vec<ClaimValidation>,
    pub telemetry: Vec<TelemetryRecord>,
    pub bookings: Vec<Appointment>,
}

fn render_plan_text(plan: &FinalPlan) -> String {
    let mut out = format!(
        "Longevity Plan for {}\nFocus area: {}\nTotal cost: ${:.2}\n\n",
        plan.user_name, plan.focus_area, plan.total_cost
    );
    for item in &plan.items {
        out.push_str(&format!(
            "Month {}: {} — {}\n",
            item.month, item.label, item.rationale
        ));
        if let Some(a) = &item.appointment {
            out.push_str(&format!(
                "  booked: {} on {} (${:.2}, id {})\n",
                a.service_type, a.start_iso, a.price, a.booking_id
            ));
        }
    }
    if !plan.warnings.is_empty() {
        out.push_str(&format!("\nWarnings: {}\n", plan.warnings.join(", ")));
    }
    out.push_str("\nDisclaimers:\n");
    for d in &plan.disclaimers {
        out.push_str(&format!("- {d}\n"));
    }
    out
}

/// Write every per-run artifact file into `output_dir/{run_dir_name}/`.
/// Each file write is best-effort: a failure is logged and skipped rather
/// than aborting the run (SPEC_FULL.md §7, `PersistenceError`).
pub fn write_run_artifacts(
    output_dir: &Path,
    run_dir_name: &str,
    artifacts: &RunArtifacts,
) -> anyhow::Result<PathBuf> {
    let run_dir = output_dir.join(run_dir_name);
    std::fs::create_dir_all(&run_dir)?;

    write_best_effort(&run_dir.join("conversation_history.txt"), || {
        artifacts
            .transcript
            .iter()
            .map(|(speaker, text)| format!("{speaker}: {text}"))
            .collect::<Vec<_>>()
            .join("\n")
    });

    write_best_effort(&run_dir.join("final_plan.json"), || {
        serde_json::to_string_pretty(&artifacts.plan).unwrap_or_default()
    });
    write_best_effort(&run_dir.join("longevity_plan_summary.json"), || {
        serde_json::to_string_pretty(&artifacts.plan).unwrap_or_default()
    });
    write_best_effort(&run_dir.join("longevity_plan_summary.txt"), || {
        render_plan_text(&artifacts.plan)
    });
    write_best_effort(&run_dir.join("scientific_validity_checks.json"), || {
        serde_json::to_string_pretty(&artifacts.validations).unwrap_or_default()
    });
    write_best_effort(&run_dir.join("telemetry.json"), || {
        serde_json::to_string_pretty(&artifacts.telemetry).unwrap_or_default()
    });
    write_best_effort(&run_dir.join("bookings.json"), || {
        serde_json::to_string_pretty(&artifacts.bookings).unwrap_or_default()
    });

    let manifest = json!({
        "summary": artifacts.plan,
        "telemetry": artifacts.telemetry,
        "validations": artifacts.validations,
        "transcript": artifacts
            .transcript
            .iter()
            .map(|(speaker, text)| format!("{speaker}: {text}"))
            .collect::<Vec<_>>()
            .join("\n"),
        "bookings": artifacts.bookings,
    });
    write_best_effort(&run_dir.join("manifest.json"), || {
        serde_json::to_string_pretty(&manifest).unwrap_or_default()
    });

    Ok(run_dir)
}

fn write_best_effort(path: &Path, render: impl FnOnce() -> String) {
    if let Err(e) = std::fs::write(path, render()) {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist run artifact");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub id: String,
    pub run_id: String,
    pub timestamp: String,
    pub user: String,
    pub status: String,
    pub plan_score: f64,
    pub outputs_dir: String,
}

const RUN_INDEX_CAP: usize = 200;

/// Prepend `entry` to `{data_root}/run_index.json`, deduping by
/// `outputs_dir`, capping at 200 entries, and writing atomically
/// (write-to-`.tmp`-then-rename).
pub fn append_run_index(data_root: &Path, entry: RunIndexEntry) -> anyhow::Result<()> {
    let index_path = data_root.join("run_index.json");
    let mut entries: Vec<RunIndexEntry> = std::fs::read_to_string(&index_path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    entries.retain(|e| e.outputs_dir != entry.outputs_dir);
    entries.insert(0, entry);
    entries.truncate(RUN_INDEX_CAP);

    let tmp_path = data_root.join("run_index.json.tmp");
    std::fs::write(&tmp_path, serde_json::to_string_pretty(&entries)?)?;
    std::fs::rename(&tmp_path, &index_path)?;
    Ok(())
}

pub fn run_dir_name() -> String {
    format!("longevity_plan_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Claim, Speaker};

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

    #[test]
    fn valid_plan_json_round_trips_through_schema_validation() {
        let value = json!({
            "user_name": "Ada",
            "focus_area": "sleep",
            "total_cost": 120.0,
            "items": [
                { "month": 1, "label": "baseline_bloodwork", "rationale": "baseline" }
            ],
            "warnings": [],
            "disclaimers": ["edu", "not medical advice"]
        });
        let plan = validate_plan_value(&value).expect("valid plan");
        assert_eq!(plan.user_name, "Ada");
        assert_eq!(plan.items.len(), 1);
    }

    #[test]
    fn missing_required_field_fails_schema_validation() {
        let value = json!({ "user_name": "Ada" });
        assert!(validate_plan_value(&value).is_err());
    }

    #[test]
    fn malformed_text_yields_no_plan() {
        assert!(try_extract_final_plan(None, "{ not: valid json").is_none());
    }

    #[test]
    fn fallback_plan_books_three_canonical_services_and_sums_cost() {
        let memory = SharedMemory::new();
        let plan = synthesize_fallback_plan(&user(), &memory, 42, None);
        assert_eq!(plan.items.len(), 3);
        let expected_total: f64 = plan
            .items
            .iter()
            .filter_map(|i| i.appointment.as_ref())
            .map(|a| a.price)
            .sum();
        assert!((plan.total_cost - expected_total).abs() < 1e-9);
        assert_eq!(plan.disclaimers.len(), 2);
    }

    #[test]
    fn fallback_plan_flags_unvalidated_services_as_unknown_and_warns() {
        let memory = SharedMemory::new();
        let plan = synthesize_fallback_plan(&user(), &memory, 42, None);
        assert!(plan.items.iter().all(|i| i.evidence_flag == Some(EvidenceFlag::Unknown)));
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("baseline_bloodwork"));
        assert!(plan.warnings[0].contains("vo2_test"));
        assert!(plan.warnings[0].contains("lifestyle_coaching"));
    }

    #[test]
    fn fallback_plan_flags_validated_high_confidence_service_as_ok() {
        let mut memory = SharedMemory::new();
        memory.add_validations([ClaimValidation {
            claim: Claim {
                text: "VO2 test results show improved vo2 test outcomes over six months.".into(),
                turn_index: 1,
                speaker: Speaker::Planner,
                context_before: None,
                context_after: None,
            },
            validity: Validity::True,
            confidence: 0.9,
            evidence: None,
            server_unavailable: false,
            raw_response: None,
        }]);
        let plan = synthesize_fallback_plan(&user(), &memory, 42, None);
        let vo2_item = plan.items.iter().find(|i| i.label == "vo2_test").unwrap();
        assert_eq!(vo2_item.evidence_flag, Some(EvidenceFlag::Ok));
    }

    #[test]
    fn canonical_hash_is_stable_across_field_order() {
        let plan_a = synthesize_fallback_plan(&user(), &SharedMemory::new(), 42, None);
        let plan_b = synthesize_fallback_plan(&user(), &SharedMemory::new(), 42, None);
        assert_eq!(canonical_plan_hash(&plan_a), canonical_plan_hash(&plan_b));
    }

    #[test]
    fn run_index_dedupes_and_caps_at_200() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..205 {
            append_run_index(
                dir.path(),
                RunIndexEntry {
                    id: i.to_string(),
                    run_id: i.to_string(),
                    timestamp: "2025-01-01T00:00:00Z".into(),
                    user: "Ada".into(),
                    status: "success".into(),
                    plan_score: 1.0,
                    outputs_dir: format!("run_{i}"),
                },
            )
            .unwrap();
        }
        let contents = std::fs::read_to_string(dir.path().join("run_index.json")).unwrap();
        let entries: Vec<RunIndexEntry> = serde_json::from_str(&contents).unwrap();
        assert_eq!(entries.len(), 200);
        assert_eq!(entries[0].run_id, "204");
    }

    #[test]
    fn run_index_tolerates_corrupted_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run_index.json"), "{ not valid").unwrap();
        append_run_index(
            dir.path(),
            RunIndexEntry {
                id: "1".into(),
                run_id: "1".into(),
                timestamp: "2025-01-01T00:00:00Z".into(),
                user: "Ada".into(),
                status: "success".into(),
                plan_score: 1.0,
                outputs_dir: "run_1".into(),
            },
        )
        .unwrap();
        let contents = std::fs::read_to_string(dir.path().join("run_index.json")).unwrap();
        let entries: Vec<RunIndexEntry> = serde_json::from_str(&contents).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
