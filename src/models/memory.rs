//! Append-only shared memory the orchestrator carries across turns. Nothing
//! is ever removed from it; [`SharedMemory::render_brief`] is the only way
//! its contents re-enter the conversation, as a single hint line folded
//! into the next speaker's prompt.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::plan::{Appointment, Claim, ClaimValidation, Validity};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedMemory {
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub validations: Vec<ClaimValidation>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    #[serde(default)]
    pub decisions: Vec<String>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.facts.insert(key.into(), value.into());
    }

    pub fn add_claims(&mut self, claims: impl IntoIterator<Item = Claim>) {
        self.claims.extend(claims);
    }

    pub fn add_validations(&mut self, validations: impl IntoIterator<Item = ClaimValidation>) {
        self.validations.extend(validations);
    }

    pub fn add_appointments(&mut self, appointments: impl IntoIterator<Item = Appointment>) {
        self.appointments.extend(appointments);
    }

    pub fn record_decision(&mut self, decision: impl Into<String>) {
        self.decisions.push(decision.into());
    }

    /// A single-line summary of everything accumulated so far, suitable for
    /// folding into a prompt hint. Sections with nothing to say are omitted;
    /// if every section is empty the whole brief collapses to `"(empty)"`.
    pub fn render_brief(&self) -> String {
        let mut sections = Vec::new();

        if !self.facts.is_empty() {
            let facts = self
                .facts
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!("facts: [{facts}]"));
        }

        if !self.appointments.is_empty() {
            let recent = self
                .appointments
                .iter()
                .rev()
                .take(3)
                .map(|a| a.service_type.as_str().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!("recent_appointments: [{recent}]"));
        }

        if !self.claims.is_empty() {
            sections.push(format!("claims_collected: {}", self.claims.len()));
        }

        if !self.validations.is_empty() {
            let validated_true = self
                .validations
                .iter()
                .filter(|v| v.validity == Validity::True)
                .count();
            sections.push(format!(
                "validated_true: {validated_true}/{}",
                self.validations.len()
            ));
        }

        if !self.decisions.is_empty() {
            sections.push(format!("decisions: [{}]", self.decisions.join("; ")));
        }

        if sections.is_empty() {
            "(empty)".to_string()
        } else {
            sections.join(" | ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{ServiceType, Speaker};

    #[test]
    fn empty_memory_renders_empty_marker() {
        assert_eq!(SharedMemory::new().render_brief(), "(empty)");
    }

    #[test]
    fn brief_only_includes_nonempty_sections() {
        let mut mem = SharedMemory::new();
        mem.set_fact("name", "Ada");
        let brief = mem.render_brief();
        assert_eq!(brief, "facts: [name=Ada]");
    }

    #[test]
    fn brief_reports_claim_and_validation_counts() {
        let mut mem = SharedMemory::new();
        mem.add_claims([Claim {
            text: "x".into(),
            turn_index: 0,
            speaker: Speaker::Planner,
            context_before: None,
            context_after: None,
        }]);
        mem.add_validations([ClaimValidation {
            claim: Claim {
                text: "x".into(),
                turn_index: 0,
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
        let brief = mem.render_brief();
        assert!(brief.contains("claims_collected: 1"));
        assert!(brief.contains("validated_true: 1/1"));
    }

    #[test]
    fn brief_lists_only_the_most_recent_appointments() {
        let mut mem = SharedMemory::new();
        for svc in [
            ServiceType::BaselineBloodwork,
            ServiceType::Vo2Test,
            ServiceType::Scan,
            ServiceType::LifestyleCoaching,
        ] {
            mem.add_appointments([Appointment {
                service_type: svc,
                start_iso: "2025-01-01T09:00:00Z".into(),
                end_iso: "2025-01-01T10:00:00Z".into(),
                staff_role: "coach".into(),
                location: "Main Clinic".into(),
                price: 1.0,
                booking_id: "abc".into(),
            }]);
        }
        let brief = mem.render_brief();
        assert!(brief.contains("recent_appointments:"));
        assert!(!brief.contains("baseline_bloodwork"));
    }
}
