pub mod memory;
pub mod phase;
pub mod plan;
pub mod telemetry;

pub use memory::SharedMemory;
pub use phase::Phase;
pub use plan::{
    Appointment, Claim, ClaimValidation, ClinicResource, EvidenceFlag, FinalPlan, PlanItem,
    ServiceType, Slot, Speaker, UserProfile, Validity,
};
pub use telemetry::TelemetryRecord;
