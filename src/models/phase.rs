//! The fixed ordered conversation state machine. Each phase has exactly one
//! responsible speaker; the orchestrator walks the list in order and never
//! revisits an earlier phase.

use serde::{Deserialize, Serialize};

use super::plan::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Intake,
    PlanDraft,
    PlanReview,
    Audit,
    Revision,
    FinalPlan,
    Scheduling,
    FinalSummary,
}

impl Phase {
    /// The ordered phase list, `Start` first.
    pub const ORDER: [Phase; 9] = [
        Phase::Start,
        Phase::Intake,
        Phase::PlanDraft,
        Phase::PlanReview,
        Phase::Audit,
        Phase::Revision,
        Phase::FinalPlan,
        Phase::Scheduling,
        Phase::FinalSummary,
    ];

    /// The agent responsible for speaking in this phase.
    pub fn speaker(self) -> Speaker {
        match self {
            Phase::Start => Speaker::Advocate,
            Phase::Intake => Speaker::Planner,
            Phase::PlanDraft => Speaker::Planner,
            Phase::PlanReview => Speaker::Advocate,
            Phase::Audit => Speaker::Planner,
            Phase::Revision => Speaker::Advocate,
            Phase::FinalPlan => Speaker::Planner,
            Phase::Scheduling => Speaker::Planner,
            Phase::FinalSummary => Speaker::Advocate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "Start",
            Phase::Intake => "Intake",
            Phase::PlanDraft => "PlanDraft",
            Phase::PlanReview => "PlanReview",
            Phase::Audit => "Audit",
            Phase::Revision => "Revision",
            Phase::FinalPlan => "FinalPlan",
            Phase::Scheduling => "Scheduling",
            Phase::FinalSummary => "FinalSummary",
        }
    }

    /// Whether the orchestrator should attempt to capture a structured
    /// `FinalPlan` artifact after this phase's turn.
    pub fn expects_final_plan(self) -> bool {
        matches!(self, Phase::FinalPlan | Phase::FinalSummary)
    }

    /// Whether the planner is expected to call `schedule_services` during
    /// this phase (informational only — nothing enforces it).
    pub fn expects_scheduling(self) -> bool {
        matches!(self, Phase::Scheduling | Phase::FinalPlan)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
