//! Question-answering commands: `hrag ask` and `hrag agents`.

use anyhow::{bail, Result};
use futures::StreamExt;
use std::io::Write;

use crate::agents::{AgentRegistry, Coordinator, ProgressFn, WorkflowResult, WorkflowStatus};
use crate::models::{AnswerContext, QueryMetrics};
use crate::prompt;
use crate::rag::RagEngine;

#[derive(Debug, Clone, Copy, Default)]
pub struct AskOptions {
    /// Print tokens as they arrive.
    pub stream: bool,
    /// Print the retrieved sources after the answer.
    pub show_context: bool,
    /// Emit the full answer as JSON (ignores `stream`).
    pub json: bool,
}

fn print_context(context: &AnswerContext) {
    println!();
    println!("Context: {}", context.context_summary);
    for (i, hit) in context.retrieved_documents.iter().enumerate() {
        let source = if hit.chunk.source.is_empty() {
            "Unknown"
        } else {
            &hit.chunk.source
        };
        println!(
            "  {}. [{:.3}] {} ({})",
            i + 1,
            hit.score,
            hit.chunk.title,
            source
        );
    }
}

fn print_metrics(metrics: &QueryMetrics) {
    eprintln!(
        "[{} documents, avg score {}, embed {:.0} ms, search {:.0} ms, generate {:.0} ms, total {:.0} ms]",
        metrics.documents_retrieved,
        metrics.average_similarity_score,
        metrics.embedding_time_ms,
        metrics.search_time_ms,
        metrics.generation_time_ms,
        metrics.total_time_ms
    );
}

/// Answer one question through the RAG pipeline.
///
/// A pipeline failure still prints the apology answer; the command then
/// exits with the error.
pub async fn run_ask(engine: &RagEngine, question: &str, options: AskOptions) -> Result<()> {
    if options.stream && !options.json {
        return stream_answer(engine, question, options.show_context).await;
    }

    let answer = engine.query(question).await;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.response);
        if options.show_context {
            print_context(&answer.context);
        }
        if !answer.is_error() {
            print_metrics(&answer.metrics);
        }
    }

    if let Some(err) = answer.error {
        bail!(err);
    }
    Ok(())
}

async fn stream_answer(engine: &RagEngine, question: &str, show_context: bool) -> Result<()> {
    let mut answer = match engine.query_stream(question).await {
        Ok(a) => a,
        Err(e) => {
            let msg = format!("{:#}", e);
            println!("{}", prompt::error_response(&msg));
            bail!(msg);
        }
    };

    let mut stdout = std::io::stdout();
    while let Some(piece) = answer.tokens.next().await {
        let text = piece?;
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    }
    println!();

    if show_context {
        print_context(&answer.context);
    }
    print_metrics(&answer.finish_metrics());
    Ok(())
}

pub fn list_agents(registry: &AgentRegistry) {
    println!("{:<14} DESCRIPTION", "AGENT");
    for info in registry.list() {
        println!("{:<14} {}", info.name, info.description);
    }
    if registry.is_empty() {
        println!("No agents registered.");
    }
}

/// Run the multi-agent workflow, reporting progress on stderr.
pub async fn run_agents(
    coordinator: &Coordinator,
    question: &str,
    json: bool,
) -> Result<WorkflowResult> {
    let progress = |line: &str| eprintln!("  > {}", line);
    let result = coordinator
        .run(question, Some(&progress as &ProgressFn))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.final_response);
        println!();
        let s = &result.summary;
        println!(
            "Workflow: {:?} ({}/{} agents, {:.2}s)",
            s.workflow_status, s.successful_agents, s.total_agents, s.execution_time_secs
        );
        for outcome in [&result.research, &result.analysis, &result.synthesis] {
            if let Some(err) = &outcome.error {
                println!("  {} failed: {}", outcome.agent, err);
            }
        }
    }

    if result.summary.workflow_status == WorkflowStatus::Failed {
        bail!("agent workflow failed");
    }
    Ok(result)
}
