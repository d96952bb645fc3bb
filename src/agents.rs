//! Multi-agent workflow.
//!
//! Agents are named prompt roles over the configured chat model. The
//! [`Coordinator`] runs them in a fixed order:
//!
//! ```text
//!            ┌──────────┐
//!  query ──▶ │ research │  (retrieves from the knowledge base)
//!            └────┬─────┘
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!  ┌──────────┐      ┌───────────┐
//!  │ analysis │      │ synthesis │   (concurrent)
//!  └────┬─────┘      └─────┬─────┘
//!       └────────┬─────────┘
//!                ▼
//!         ┌─────────────┐
//!         │ coordinator │  (final formatting)
//!         └─────────────┘
//! ```
//!
//! A failed research step stops the workflow: analysis and synthesis are
//! reported as skipped and the coordinator is not called. The workflow
//! status is `completed` only when research, analysis and synthesis all
//! succeed.
//!
//! Roles are discoverable through [`AgentRegistry`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::Instrument;

use crate::config::{Config, LlmConfig};
use crate::llm::{create_chat_model, ChatModel, ChatRequest};
use crate::prompt;
use crate::rag::RagEngine;

pub const RESEARCH: &str = "research";
pub const ANALYSIS: &str = "analysis";
pub const SYNTHESIS: &str = "synthesis";
pub const COORDINATOR: &str = "coordinator";

const RESEARCH_INSTRUCTIONS: &str = "You are a healthcare research specialist. Your responsibilities include:

- Find relevant medical information in the provided knowledge base excerpts
- Provide accurate, evidence-based medical information
- Focus on reliable sources and cite them as [Document N]
- Say clearly when the excerpts do not cover the question

Be thorough and use specific medical terms.";

const ANALYSIS_INSTRUCTIONS: &str = "You are a healthcare data analysis specialist. Your responsibilities include:

- Analyze healthcare research findings
- Interpret medical trends and patterns
- Generate insights from research data
- Create structured tables and comparisons

Focus on making complex medical data understandable through clear analysis.";

const SYNTHESIS_INSTRUCTIONS: &str = "You are a healthcare synthesis specialist. Your responsibilities include:

- Synthesize research findings into clear summaries
- Generate patient-friendly explanations of complex medical information
- Provide actionable healthcare recommendations
- Format information in clear, structured ways

Focus on making medical information accessible and actionable for patients.";

const COORDINATOR_INSTRUCTIONS: &str = "You are the coordinator of a team of healthcare specialists. \
Combine the specialists' contributions into one well-structured final answer. Remove repetition, \
keep the patient-friendly tone, and end with a clear medical disclaimer encouraging consultation \
with a healthcare professional.";

/// A named step in the workflow.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// System prompt the role runs under.
    fn instructions(&self) -> &str;

    async fn run(&self, input: &str) -> Result<String>;
}

/// Generation settings shared by all roles.
#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_context_chars: usize,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.agents.temperature,
            max_tokens: config.agents.max_tokens,
            max_context_chars: config.retrieval.max_context_chars,
        }
    }
}

/// `[llm]` with the model swapped for `[agents].model` when set.
pub fn agent_llm_config(config: &Config) -> LlmConfig {
    LlmConfig {
        model: config.agent_model().to_string(),
        ..config.llm.clone()
    }
}

/// The healthcare roles wired to the models named in `config`.
pub fn registry_from_config(config: &Config, engine: Arc<RagEngine>) -> Result<AgentRegistry> {
    let llm = create_chat_model(&agent_llm_config(config))?;
    Ok(AgentRegistry::healthcare(
        engine,
        llm,
        AgentSettings::from_config(config),
    ))
}

async fn complete(
    llm: &dyn ChatModel,
    settings: &AgentSettings,
    system: &str,
    prompt: String,
) -> Result<String> {
    let completion = llm
        .generate(&ChatRequest {
            system: system.to_string(),
            prompt,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
        .await?;
    let text = completion.text.trim().to_string();
    if text.is_empty() {
        bail!("model returned an empty response");
    }
    Ok(text)
}

// ============ Roles ============

/// Retrieves knowledge-base context for the question, then summarizes it.
pub struct ResearchAgent {
    engine: Arc<RagEngine>,
    llm: Arc<dyn ChatModel>,
    settings: AgentSettings,
}

impl ResearchAgent {
    pub fn new(engine: Arc<RagEngine>, llm: Arc<dyn ChatModel>, settings: AgentSettings) -> Self {
        Self {
            engine,
            llm,
            settings,
        }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn name(&self) -> &str {
        RESEARCH
    }

    fn description(&self) -> &str {
        "Retrieves relevant documents from the knowledge base and summarizes the findings with citations"
    }

    fn instructions(&self) -> &str {
        RESEARCH_INSTRUCTIONS
    }

    async fn run(&self, input: &str) -> Result<String> {
        let hits = self.engine.retrieve(input).await?;
        let context = prompt::format_context(&hits, self.settings.max_context_chars);
        let prompt = format!(
            "Research the following healthcare question.\n\n\
Question: {input}\n\n\
Knowledge base excerpts:\n{context}\n\n\
Summarize the relevant findings and cite the excerpts you used."
        );
        complete(self.llm.as_ref(), &self.settings, RESEARCH_INSTRUCTIONS, prompt).await
    }
}

/// A role that sends its input straight to the model under fixed instructions.
pub struct PromptAgent {
    name: String,
    description: String,
    instructions: String,
    llm: Arc<dyn ChatModel>,
    settings: AgentSettings,
}

impl PromptAgent {
    pub fn new(
        name: &str,
        description: &str,
        instructions: &str,
        llm: Arc<dyn ChatModel>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
            llm,
            settings,
        }
    }
}

#[async_trait]
impl Agent for PromptAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    async fn run(&self, input: &str) -> Result<String> {
        complete(
            self.llm.as_ref(),
            &self.settings,
            &self.instructions,
            input.to_string(),
        )
        .await
    }
}

// ============ Registry ============

/// Discovery information for one role.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    /// The four healthcare roles, in workflow order.
    pub fn healthcare(
        engine: Arc<RagEngine>,
        llm: Arc<dyn ChatModel>,
        settings: AgentSettings,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ResearchAgent::new(engine, llm.clone(), settings)));
        registry.register(Arc::new(PromptAgent::new(
            ANALYSIS,
            "Analyzes research findings for insights, patterns and comparisons",
            ANALYSIS_INSTRUCTIONS,
            llm.clone(),
            settings,
        )));
        registry.register(Arc::new(PromptAgent::new(
            SYNTHESIS,
            "Turns research findings into a patient-friendly answer",
            SYNTHESIS_INSTRUCTIONS,
            llm.clone(),
            settings,
        )));
        registry.register(Arc::new(PromptAgent::new(
            COORDINATOR,
            "Combines analysis and synthesis into the final answer with a disclaimer",
            COORDINATOR_INSTRUCTIONS,
            llm,
            settings,
        )));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.push(agent);
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    pub fn list(&self) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .map(|a| AgentInfo {
                name: a.name().to_string(),
                description: a.description().to_string(),
                instructions: a.instructions().to_string(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Workflow ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub agent: String,
    pub status: AgentStatus,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl AgentOutcome {
    fn skipped(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            status: AgentStatus::Skipped,
            content: String::new(),
            error: None,
            duration_ms: 0.0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub query: String,
    pub successful_agents: usize,
    pub total_agents: usize,
    pub workflow_status: WorkflowStatus,
    pub execution_time_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub research: AgentOutcome,
    pub analysis: AgentOutcome,
    pub synthesis: AgentOutcome,
    pub final_response: String,
    pub summary: WorkflowSummary,
}

/// Running totals across workflow executions.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct PerformanceMetrics {
    pub total_queries: u64,
    pub average_response_time_secs: f64,
}

/// Receives human-readable progress lines.
pub type ProgressFn = dyn Fn(&str) + Send + Sync;

pub struct Coordinator {
    research: Arc<dyn Agent>,
    analysis: Arc<dyn Agent>,
    synthesis: Arc<dyn Agent>,
    coordinator: Arc<dyn Agent>,
    metrics: Mutex<PerformanceMetrics>,
}

fn report(progress: Option<&ProgressFn>, line: &str) {
    tracing::debug!(target: "hrag::agents", "{}", line);
    if let Some(p) = progress {
        p(line);
    }
}

async fn run_agent(agent: &dyn Agent, input: &str, progress: Option<&ProgressFn>) -> AgentOutcome {
    let label = agent.name().to_string();
    report(progress, &format!("{} agent started", label));
    let started = Instant::now();
    let span = tracing::info_span!("agent", name = %label);
    let result = agent.run(input).instrument(span).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(content) => {
            report(
                progress,
                &format!("{} agent completed ({} characters)", label, content.chars().count()),
            );
            AgentOutcome {
                agent: label,
                status: AgentStatus::Completed,
                content,
                error: None,
                duration_ms,
            }
        }
        Err(e) => {
            let msg = format!("{:#}", e);
            tracing::error!(agent = %label, error = %msg, "agent failed");
            report(progress, &format!("{} agent failed: {}", label, msg));
            AgentOutcome {
                agent: label,
                status: AgentStatus::Failed,
                content: String::new(),
                error: Some(msg),
                duration_ms,
            }
        }
    }
}

/// Concatenate the successful specialist outputs.
pub fn combine_outputs(analysis: &AgentOutcome, synthesis: &AgentOutcome) -> String {
    let mut parts = Vec::new();
    if analysis.succeeded() {
        parts.push(format!("## Analysis\n\n{}", analysis.content));
    }
    if synthesis.succeeded() {
        parts.push(format!("## Patient-Friendly Summary\n\n{}", synthesis.content));
    }
    parts.join("\n\n")
}

impl Coordinator {
    /// Pick the four roles out of `registry`.
    pub fn new(registry: &AgentRegistry) -> Result<Self> {
        let role = |name: &str| {
            registry
                .find(name)
                .ok_or_else(|| anyhow!("agent '{}' is not registered", name))
        };
        Ok(Self {
            research: role(RESEARCH)?,
            analysis: role(ANALYSIS)?,
            synthesis: role(SYNTHESIS)?,
            coordinator: role(COORDINATOR)?,
            metrics: Mutex::new(PerformanceMetrics::default()),
        })
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.lock().map(|m| *m).unwrap_or_default()
    }

    fn record(&self, duration_secs: f64) -> PerformanceMetrics {
        match self.metrics.lock() {
            Ok(mut m) => {
                m.total_queries += 1;
                let n = m.total_queries as f64;
                m.average_response_time_secs =
                    (m.average_response_time_secs * (n - 1.0) + duration_secs) / n;
                *m
            }
            Err(_) => PerformanceMetrics::default(),
        }
    }

    /// Run the workflow for `query`.
    ///
    /// Only an empty query is an error; agent failures are reported in the
    /// result.
    pub async fn run(&self, query: &str, progress: Option<&ProgressFn>) -> Result<WorkflowResult> {
        if query.trim().is_empty() {
            bail!("question must not be empty");
        }
        let span = tracing::info_span!("agent_workflow", query_len = query.len());
        Ok(self.run_inner(query, progress).instrument(span).await)
    }

    async fn run_inner(&self, query: &str, progress: Option<&ProgressFn>) -> WorkflowResult {
        let started = Instant::now();
        report(progress, "Starting multi-agent workflow");

        report(progress, "Step 1: research agent - knowledge base retrieval");
        let research = run_agent(self.research.as_ref(), query, progress).await;

        if !research.succeeded() {
            report(progress, "Research failed - stopping workflow");
            let execution_time_secs = started.elapsed().as_secs_f64();
            return WorkflowResult {
                final_response: prompt::error_response(
                    research.error.as_deref().unwrap_or("research agent failed"),
                ),
                research,
                analysis: AgentOutcome::skipped(ANALYSIS),
                synthesis: AgentOutcome::skipped(SYNTHESIS),
                summary: WorkflowSummary {
                    query: query.to_string(),
                    successful_agents: 0,
                    total_agents: 3,
                    workflow_status: WorkflowStatus::Failed,
                    execution_time_secs,
                },
            };
        }

        report(
            progress,
            "Step 2: analysis and synthesis agents running in parallel",
        );
        let analysis_input = format!(
            "Analyze this healthcare research and provide insights:\n\n{}",
            research.content
        );
        let synthesis_input = format!(
            "Synthesize this healthcare research into a patient-friendly response:\n\n{}",
            research.content
        );
        let (analysis, synthesis) = tokio::join!(
            run_agent(self.analysis.as_ref(), &analysis_input, progress),
            run_agent(self.synthesis.as_ref(), &synthesis_input, progress),
        );

        let combined = combine_outputs(&analysis, &synthesis);
        let final_response = if combined.is_empty() {
            research.content.clone()
        } else {
            report(progress, "Step 3: coordinator - final answer");
            let coordinator_input = format!(
                "Question: {}\n\nCombine the following specialist contributions into one final answer:\n\n{}",
                query, combined
            );
            let formatted =
                run_agent(self.coordinator.as_ref(), &coordinator_input, progress).await;
            if formatted.succeeded() {
                formatted.content
            } else {
                combined
            }
        };

        let successful_agents = [&research, &analysis, &synthesis]
            .iter()
            .filter(|o| o.succeeded())
            .count();
        let workflow_status = if successful_agents == 3 {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Partial
        };

        let execution_time_secs = started.elapsed().as_secs_f64();
        let totals = self.record(execution_time_secs);

        report(
            progress,
            &format!(
                "Workflow {}: {}/3 agents succeeded",
                match workflow_status {
                    WorkflowStatus::Completed => "completed",
                    WorkflowStatus::Partial => "partial",
                    WorkflowStatus::Failed => "failed",
                },
                successful_agents
            ),
        );
        report(
            progress,
            &format!("Total execution time: {:.2} seconds", execution_time_secs),
        );
        report(
            progress,
            &format!(
                "Average response time: {:.2} seconds",
                totals.average_response_time_secs
            ),
        );

        WorkflowResult {
            research,
            analysis,
            synthesis,
            final_response,
            summary: WorkflowSummary {
                query: query.to_string(),
                successful_agents,
                total_agents: 3,
                workflow_status,
                execution_time_secs,
            },
        }
    }
}
