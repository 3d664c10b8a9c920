//! Typed entities shared across the orchestrator: user/clinic inputs, the
//! scheduling domain, claim validation, and the final plan artifact.

use serde::{Deserialize, Serialize};

/// The patient-side input the Advocate speaks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub age: u32,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub budget_min: Option<f64>,
    #[serde(default)]
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub availability: Vec<String>,
    #[serde(default)]
    pub blackout_dates: Vec<String>,
}

impl UserProfile {
    pub fn budget_display(&self) -> String {
        match (self.budget_min, self.budget_max) {
            (Some(min), Some(max)) => format!("${min:.0}-{max:.0}"),
            (None, Some(max)) => format!("up to ${max:.0}"),
            (Some(min), None) => format!("at least ${min:.0}"),
            (None, None) => "unspecified".to_string(),
        }
    }
}

/// Opaque clinic resource text embedded verbatim in the Planner's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicResource {
    pub text: String,
}

/// The two speakers in the phased dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Advocate,
    Planner,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::Advocate => "Health Advocate",
            Speaker::Planner => "Service Planner",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sentence extracted from a turn that looks like a scientific claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub turn_index: u32,
    pub speaker: Speaker,
    #[serde(default)]
    pub context_before: Option<String>,
    #[serde(default)]
    pub context_after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    True,
    False,
    Unknown,
}

impl Validity {
    pub fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "true" => Validity::True,
            "false" => Validity::False,
            _ => Validity::Unknown,
        }
    }
}

/// The validator's verdict on one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimValidation {
    pub claim: Claim,
    pub validity: Validity,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub server_unavailable: bool,
    #[serde(default)]
    pub raw_response: Option<serde_json::Value>,
}

/// The closed set of services the clinic offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    BaselineBloodwork,
    Vo2Test,
    Scan,
    LifestyleCoaching,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        ServiceType::BaselineBloodwork,
        ServiceType::Vo2Test,
        ServiceType::Scan,
        ServiceType::LifestyleCoaching,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::BaselineBloodwork => "baseline_bloodwork",
            ServiceType::Vo2Test => "vo2_test",
            ServiceType::Scan => "scan",
            ServiceType::LifestyleCoaching => "lifestyle_coaching",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|svc| svc.as_str() == s)
    }

    /// `(staff_role, price)` for this service, fixed by the clinic's rate card.
    pub fn staff_and_price(self) -> (&'static str, f64) {
        match self {
            ServiceType::BaselineBloodwork => ("lab tech", 120.0),
            ServiceType::Vo2Test => ("coach", 150.0),
            ServiceType::Scan => ("nurse", 300.0),
            ServiceType::LifestyleCoaching => ("coach", 80.0),
        }
    }

    /// The service label with underscores replaced by spaces, used when
    /// matching claim text against a service (evidence-flag derivation).
    pub fn label_with_spaces(self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pre-generated time window for one service, initially unbooked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub service_type: ServiceType,
    pub start_iso: String,
    pub end_iso: String,
    pub staff_role: String,
    pub location: String,
    pub price: f64,
    #[serde(default)]
    pub booked: bool,
}

/// A booked slot with a stable, content-addressed booking id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub service_type: ServiceType,
    pub start_iso: String,
    pub end_iso: String,
    pub staff_role: String,
    pub location: String,
    pub price: f64,
    pub booking_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceFlag {
    Ok,
    Low,
    Unknown,
}

/// One line item in the final plan. `label` may hold either a plan-level
/// category (e.g. "sleep") or a service name (e.g. "vo2_test") — the two
/// source schemas this system descends from used each shape in different
/// places, and both are legitimate here (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub month: u32,
    pub label: String,
    pub rationale: String,
    #[serde(default)]
    pub appointment: Option<Appointment>,
    #[serde(default)]
    pub evidence_flag: Option<EvidenceFlag>,
}

/// The structured artifact the orchestrator tries to capture from the
/// FinalPlan/FinalSummary phases, falling back to a synthesized plan when it
/// can't.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalPlan {
    pub user_name: String,
    pub focus_area: String,
    pub total_cost: f64,
    pub items: Vec<PlanItem>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub disclaimers: Vec<String>,
}

impl FinalPlan {
    pub fn default_disclaimers() -> Vec<String> {
        vec![
            "This plan is educational and not medical advice.".to_string(),
            "Discuss all interventions with a licensed clinician.".to_string(),
        ]
    }

    /// Recompute `total_cost` from the appointments actually attached to
    /// `items`, matching invariant 2 in SPEC_FULL.md §8.
    pub fn recompute_total_cost(&mut self) {
        self.total_cost = self
            .items
            .iter()
            .filter_map(|item| item.appointment.as_ref())
            .map(|a| a.price)
            .sum();
    }
}
