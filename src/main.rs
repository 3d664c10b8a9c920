use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use longevity_plan::{
    check_provider_readiness, harness, run_conversation, run_parallel, AgentResponse,
    ClinicResource, ConfigError, LlmClient, Message, RunConfig, Role, UserProfile,
};

/// Longevity planning orchestrator: run a single phased conversation, or
/// drive the parallel benchmark harness under a chaos scenario.
#[derive(Parser, Debug)]
#[command(name = "longevity-plan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a YAML config file (defaults applied, then LONGEVITY_* env
    /// overrides layered on top).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single phased conversation for one user profile.
    Run {
        /// Path to a JSON file describing the user profile.
        #[arg(short, long)]
        user: PathBuf,

        /// Path to a text file describing the clinic's service catalog.
        #[arg(long)]
        clinic: PathBuf,

        /// Output directory for run artifacts.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a named chaos scenario through the parallel harness.
    ChaosBench {
        /// Path to a JSON file describing the user profiles to cycle through.
        #[arg(short, long)]
        users: PathBuf,

        /// Path to a text file describing the clinic's service catalog.
        #[arg(long)]
        clinic: PathBuf,

        /// Chaos scenario name: one of "calm", "flaky-network", "flaky-tools",
        /// "bad-llm-output", "severe".
        #[arg(short, long, default_value = "calm")]
        scenario: String,

        /// Number of conversations to run.
        #[arg(short, long, default_value_t = 10)]
        num_runs: usize,

        /// Maximum concurrent conversations.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Output directory for run artifacts and the report file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run N conversations at bounded concurrency C with no chaos overrides.
    ParallelBench {
        /// Path to a JSON file describing the user profiles to cycle through.
        #[arg(short, long)]
        users: PathBuf,

        /// Path to a text file describing the clinic's service catalog.
        #[arg(long)]
        clinic: PathBuf,

        /// Number of conversations to run.
        #[arg(short, long, default_value_t = 10)]
        num_runs: usize,

        /// Maximum concurrent conversations.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Output directory for run artifacts and the report file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Scenario name -> `CHAOS_*` env overrides, per SPEC_FULL.md's named
/// chaos-bench scenarios.
fn apply_scenario_env(scenario: &str) -> Result<()> {
    let vars: &[(&str, &str)] = match scenario {
        "calm" => &[("CHAOS_MODE", "0")],
        "flaky-network" => &[
            ("CHAOS_MODE", "1"),
            ("CHAOS_NET_FAIL_PROB", "0.3"),
            ("CHAOS_TOOL_FAIL_PROB", "0.0"),
            ("CHAOS_LLM_BAD_OUTPUT_PROB", "0.0"),
        ],
        "flaky-tools" => &[
            ("CHAOS_MODE", "1"),
            ("CHAOS_NET_FAIL_PROB", "0.0"),
            ("CHAOS_TOOL_FAIL_PROB", "0.3"),
            ("CHAOS_LLM_BAD_OUTPUT_PROB", "0.0"),
        ],
        "bad-llm-output" => &[
            ("CHAOS_MODE", "1"),
            ("CHAOS_NET_FAIL_PROB", "0.0"),
            ("CHAOS_TOOL_FAIL_PROB", "0.0"),
            ("CHAOS_LLM_BAD_OUTPUT_PROB", "0.4"),
        ],
        "severe" => &[
            ("CHAOS_MODE", "1"),
            ("CHAOS_NET_FAIL_PROB", "0.3"),
            ("CHAOS_TOOL_FAIL_PROB", "0.3"),
            ("CHAOS_LLM_BAD_OUTPUT_PROB", "0.3"),
        ],
        other => anyhow::bail!(
            "unknown chaos scenario '{other}'; expected one of: calm, flaky-network, flaky-tools, bad-llm-output, severe"
        ),
    };
    for (key, value) in vars {
        // SAFETY: called once at startup before any chaos-config readers spawn.
        unsafe { std::env::set_var(key, value) };
    }
    longevity_plan::chaos::refresh_config();
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_users(path: &PathBuf) -> Result<Vec<UserProfile>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading user profile file {path:?}"))?;
    let users: Vec<UserProfile> = serde_json::from_str(&content)
        .or_else(|_| serde_json::from_str::<UserProfile>(&content).map(|u| vec![u]))
        .with_context(|| format!("parsing user profile(s) from {path:?}"))?;
    Ok(users)
}

fn load_clinic(path: &PathBuf) -> Result<ClinicResource> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading clinic resource file {path:?}"))?;
    Ok(ClinicResource { text })
}

/// A minimal `LlmClient` backed by an OpenAI-compatible chat-completions
/// endpoint. Tool-call translation is intentionally not implemented here:
/// the orchestrator treats a plain text response with no tool calls as a
/// valid (if less capable) turn, and real function-calling wiring is the
/// kind of provider-specific integration work the core crate is agnostic to.
struct OpenAiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    fn new(model: String) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set to use the OpenAI-backed client")?;
        Ok(Self {
            http: reqwest::Client::new(),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
    ) -> anyhow::Result<AgentResponse> {
        let mut payload_messages = vec![json!({"role": "system", "content": system_prompt})];
        for m in messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "user",
            };
            payload_messages.push(json!({"role": role, "content": m.content}));
        }

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": payload_messages,
            }))
            .send()
            .await
            .context("calling OpenAI chat completions endpoint")?
            .error_for_status()
            .context("OpenAI chat completions returned an error status")?;

        let body: serde_json::Value = response.json().await.context("parsing OpenAI response")?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(AgentResponse::text(text))
    }
}

fn llm_factory_for(model: String) -> Result<Arc<dyn LlmClient>> {
    Ok(Arc::new(OpenAiClient::new(model)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = RunConfig::load_with_env(cli.config.as_ref())
        .context("loading run configuration")?;

    if let Err(e) = check_provider_readiness(&config.model) {
        error!(model = %config.model, error = %e, "provider not ready");
        if matches!(e, ConfigError::MissingOpenAiKey { .. } | ConfigError::MissingManagedCredentials { .. }) {
            std::process::exit(1);
        }
    }

    match cli.command {
        Command::Run {
            user,
            clinic,
            output,
        } => {
            let users = load_users(&user)?;
            let user_profile = users
                .into_iter()
                .next()
                .context("user profile file contained no entries")?;
            let clinic = load_clinic(&clinic)?;
            let output_dir = output.unwrap_or_else(|| config.output_dir.clone());
            let llm = llm_factory_for(config.model.clone())?;

            let run_dir_name = longevity_plan::plan::run_dir_name();
            let outcome = run_conversation(
                &user_profile,
                &clinic,
                llm,
                &config,
                &output_dir,
                &run_dir_name,
            )
            .await
            .context("running phased conversation")?;

            if outcome.succeeded() {
                info!(run_dir = %outcome.run_dir.display(), "conversation produced a plan");
                println!("Plan written to {:?}", outcome.run_dir);
                Ok(())
            } else if let Some(err) = &outcome.hard_error {
                error!(error = %err, "conversation ended without a plan");
                anyhow::bail!("run failed: {err}");
            } else {
                warn!("conversation ended without a plan (no hard error recorded)");
                Ok(())
            }
        }

        Command::ChaosBench {
            users,
            clinic,
            scenario,
            num_runs,
            concurrency,
            output,
        } => {
            apply_scenario_env(&scenario)?;
            let users = load_users(&users)?;
            let clinic = load_clinic(&clinic)?;
            let output_dir = output.unwrap_or_else(|| config.output_dir.clone());
            let model = config.model.clone();

            let report = run_parallel(
                &users,
                clinic,
                move || llm_factory_for(model.clone()).expect("llm client"),
                config,
                &output_dir,
                num_runs,
                concurrency,
            )
            .await;

            info!(
                success_rate = report.summary.success_rate,
                consistency = report.summary.plan_consistency_score,
                "chaos-bench complete"
            );
            let ts = longevity_plan::plan::run_dir_name();
            let path = harness::chaos_report_path(&output_dir, &scenario, &ts);
            harness::write_report(&path, &report)?;
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
            println!("Report written to {path:?}");
            Ok(())
        }

        Command::ParallelBench {
            users,
            clinic,
            num_runs,
            concurrency,
            output,
        } => {
            let users = load_users(&users)?;
            let clinic = load_clinic(&clinic)?;
            let output_dir = output.unwrap_or_else(|| config.output_dir.clone());
            let model = config.model.clone();

            let report = run_parallel(
                &users,
                clinic,
                move || llm_factory_for(model.clone()).expect("llm client"),
                config,
                &output_dir,
                num_runs,
                concurrency,
            )
            .await;

            info!(
                success_rate = report.summary.success_rate,
                consistency = report.summary.plan_consistency_score,
                "parallel-bench complete"
            );
            let ts = longevity_plan::plan::run_dir_name();
            let path = harness::parallel_report_path(&output_dir, "default", &ts);
            harness::write_report(&path, &report)?;
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
            println!("Report written to {path:?}");
            Ok(())
        }
    }
}
