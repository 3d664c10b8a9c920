//! System-prompt construction for the two agents. Both prompts are built
//! from one parameterized template primitive ([`build_agent_prompt`]) rather
//! than two hand-duplicated builders, per SPEC_FULL.md §9's resolution of
//! the duplicated-agent-declaration design note.

use minijinja::{context, Environment};
use once_cell::sync::Lazy;

use crate::models::{ClinicResource, UserProfile};

const AGENT_TEMPLATE: &str = "\
You are the {{ role }}, speaking opposite the {{ counterpart_role }} in a \
structured longevity-planning conversation.

{{ instructions }}

Context:
{% for key, value in context %}- {{ key }}: {{ value }}
{% endfor %}";

static ENV: Lazy<Environment<'static>> = Lazy::new(Environment::new);

/// Render one agent's system prompt. `context` is rendered as a flat list of
/// `key: value` lines; callers build it per-role.
pub fn build_agent_prompt(
    role: &str,
    counterpart_role: &str,
    instructions: &str,
    context: &[(String, String)],
) -> String {
    ENV.render_str(
        AGENT_TEMPLATE,
        context! {
            role => role,
            counterpart_role => counterpart_role,
            instructions => instructions,
            context => context,
        },
    )
    .unwrap_or_else(|e| {
        // Template rendering failure is a programmer error (static template,
        // static inputs); degrade to something still usable rather than panic.
        format!("You are the {role}. {instructions} (template render failed: {e})")
    })
}

const ADVOCATE_INSTRUCTIONS: &str = "\
You represent the user's interests and goals. You are not a clinician and \
must never diagnose a condition or prescribe treatment. Keep every message \
to at most four sentences or bullets. When the clinic's planner makes a \
claim that sounds like a scientific fact (a specific health benefit, risk \
reduction, or biomarker effect), encourage them to validate it rather than \
taking it on faith.";

const PLANNER_INSTRUCTIONS: &str = "\
You speak for the clinic, drawing only on the clinic resource listing below. \
Recommend services, never medications or dosages. Stay within the clinic's \
offered services. When you state a claim with a specific health benefit, \
consider validating it with the claims tool, and use the scheduling tool to \
book services the plan settles on.";

pub fn build_advocate_prompt(user: &UserProfile) -> String {
    let context = vec![
        ("user_name".to_string(), user.name.clone()),
        ("age".to_string(), user.age.to_string()),
        ("goals".to_string(), user.goals.join(", ")),
        ("constraints".to_string(), user.constraints.join(", ")),
        ("budget".to_string(), user.budget_display()),
        ("availability".to_string(), user.availability.join(", ")),
    ];
    build_agent_prompt(
        "Health Advocate",
        "Service Planner",
        ADVOCATE_INSTRUCTIONS,
        &context,
    )
}

pub fn build_planner_prompt(clinic: &ClinicResource) -> String {
    let context = vec![("clinic_resources".to_string(), clinic.text.clone())];
    build_agent_prompt(
        "Service Planner",
        "Health Advocate",
        PLANNER_INSTRUCTIONS,
        &context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> UserProfile {
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

    #[test]
    fn advocate_prompt_embeds_user_fields() {
        let prompt = build_advocate_prompt(&sample_user());
        assert!(prompt.contains("Ada"));
        assert!(prompt.contains("sleep"));
        assert!(prompt.contains("Health Advocate"));
        assert!(prompt.contains("not a clinician"));
    }

    #[test]
    fn planner_prompt_embeds_clinic_text_verbatim() {
        let clinic = ClinicResource {
            text: "VO2 max testing available Tue/Thu.".into(),
        };
        let prompt = build_planner_prompt(&clinic);
        assert!(prompt.contains("VO2 max testing available Tue/Thu."));
        assert!(prompt.contains("Service Planner"));
    }

    #[test]
    fn both_prompts_share_the_same_template_primitive() {
        let a = build_advocate_prompt(&sample_user());
        let p = build_planner_prompt(&ClinicResource {
            text: "x".into(),
        });
        assert!(a.starts_with("You are the"));
        assert!(p.starts_with("You are the"));
    }
}
