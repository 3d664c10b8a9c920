pub mod agents;
pub mod chaos;
pub mod config;
pub mod harness;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod plan;
pub mod resilience;
pub mod scheduler;
pub mod tools;
pub mod validator;

pub use chaos::{ChaosConfig, ChaosError};
pub use config::{check_provider_readiness, ConfigError, RunConfig};
pub use harness::{run_parallel, HarnessReport, HarnessSummary, RunRecord};
pub use llm::{AgentResponse, LlmClient, Message, Role, ToolCall};
pub use models::{
    Appointment, Claim, ClaimValidation, ClinicResource, EvidenceFlag, FinalPlan, Phase, PlanItem,
    ServiceType, SharedMemory, Slot, Speaker, UserProfile, Validity,
};
pub use orchestrator::{run_conversation, RunOutcome};
pub use plan::{synthesize_fallback_plan, validate_plan_value, PlanError};
pub use resilience::{resilient_llm_call, resilient_tool_call, RetryOutcome};
