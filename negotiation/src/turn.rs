//! Turn executor — prompt assembly, completion invocation, artifact parsing.
//!
//! One call produces one fully-populated [`DebateTurn`]. There is no retry
//! at this layer; completion failures propagate and retry policy lives in
//! the engine and the gate-retry loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::contracts::{CompletionProvider, CompletionRequest};
use crate::persona::Role;
use crate::session::{Artifact, DebateTurn, DomainContext, TurnType};

const ARTIFACT_OPEN: &str = "[ARTIFACT:";
const ARTIFACT_CLOSE: &str = "[/ARTIFACT]";
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Turn execution failure.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("no completion provider registered for role {0}")]
    NoProvider(Role),
    #[error("completion call failed for role {role}")]
    Completion {
        role: Role,
        #[source]
        source: anyhow::Error,
    },
}

/// Everything needed to produce one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest<'a> {
    pub role: Role,
    pub turn_type: TurnType,
    /// Number the resulting turn will carry, assigned by the engine.
    pub number: u32,
    pub topic: &'a str,
    pub context: &'a DomainContext,
    /// Full prior-turn history, oldest first.
    pub history: &'a [DebateTurn],
}

/// Executes single turns against per-role completion providers.
pub struct TurnExecutor {
    providers: BTreeMap<Role, Arc<dyn CompletionProvider>>,
}

impl TurnExecutor {
    pub fn new(providers: BTreeMap<Role, Arc<dyn CompletionProvider>>) -> Self {
        Self { providers }
    }

    /// Produce one turn: resolve the persona, assemble prompts, call the
    /// role's provider, and parse artifact blocks out of the reply.
    pub async fn execute_turn(&self, req: TurnRequest<'_>) -> Result<DebateTurn, TurnError> {
        let provider = self
            .providers
            .get(&req.role)
            .ok_or(TurnError::NoProvider(req.role))?;
        let persona = req.role.persona();

        let system_prompt = build_system_prompt(req.role, req.context);
        let prompt = build_turn_prompt(&req);
        let request = CompletionRequest {
            system_prompt,
            max_tokens: persona.max_turn_tokens,
            temperature: DEFAULT_TEMPERATURE,
        };

        debug!(role = %req.role, turn = req.number, turn_type = %req.turn_type, "executing turn");
        let started = Instant::now();
        let response = provider
            .complete(&prompt, &request)
            .await
            .map_err(|source| TurnError::Completion {
                role: req.role,
                source,
            })?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let artifacts = parse_artifacts(&response.text);
        Ok(DebateTurn {
            number: req.number,
            role: req.role,
            turn_type: req.turn_type,
            content: response.text,
            artifacts,
            tokens: response.tokens,
            model: response.model,
            duration_ms,
            timestamp: Utc::now(),
        })
    }
}

/// Persona identity, domain facts, and the standing negotiation rules.
fn build_system_prompt(role: Role, context: &DomainContext) -> String {
    let persona = role.persona();
    let mut out = String::new();
    out.push_str(&format!(
        "You are {} ({}), the {} in an engineering decision negotiation.\n",
        persona.codename, role, role
    ));
    out.push_str(&format!("Decision framework: {}\n", persona.framework));
    out.push_str(&format!(
        "Argue in your own vocabulary: {}.\n\n",
        persona.vocabulary.join(", ")
    ));

    out.push_str("## Domain context\n");
    out.push_str(&format!("Environment: {}\n", context.environment));
    out.push_str(&format!("Ticket: {}\n", context.ticket_id));
    out.push_str(&format!("Summary: {}\n", context.summary));
    if let Some(notes) = &context.design_notes {
        out.push_str(&format!("Design notes: {}\n", notes));
    }
    if let Some(refs) = &context.code_refs {
        out.push_str(&format!("Code references: {}\n", refs));
    }
    if let Some(prior) = &context.prior_decisions {
        out.push_str(&format!("Prior decisions: {}\n", prior));
    }

    out.push_str(
        "\n## Negotiation rules\n\
         - Stay in role; argue from your decision framework only.\n\
         - State your stance explicitly: agree, partially agree, or disagree.\n\
         - Every objection must name a concrete alternative.\n\
         - Keep your contribution within your token ceiling; be specific, not exhaustive.\n\
         - Emit structured outputs as artifact blocks:\n\
           [ARTIFACT:<type>:<title>] ... [/ARTIFACT]\n",
    );
    out
}

/// Topic, prior history, and the phase-specific instruction.
fn build_turn_prompt(req: &TurnRequest<'_>) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Topic\n{}\n\n", req.topic));

    if !req.history.is_empty() {
        out.push_str("# Prior turns\n");
        for turn in req.history {
            out.push_str(&format!(
                "## Turn {} — {} ({})\n{}\n\n",
                turn.number, turn.role, turn.turn_type, turn.content
            ));
        }
    }

    out.push_str("# Your task\n");
    out.push_str(phase_instruction(req.turn_type));
    out
}

fn phase_instruction(turn_type: TurnType) -> &'static str {
    match turn_type {
        TurnType::Proposal => {
            "State your initial position on the topic. Name the option you \
             support, the trade-offs you accept, and the risks you see."
        }
        TurnType::Counter => {
            "You disagreed with the current direction. Write a reasoned \
             counter-argument naming the concrete failure mode you expect, and \
             you MUST propose a specific alternative. An objection without an \
             alternative is invalid."
        }
        TurnType::Supplement => {
            "You broadly support the current direction. Strengthen it: add \
             missing considerations, tighten the plan, or confirm the parts you \
             have verified from your own perspective."
        }
        TurnType::Consensus => {
            "As moderator, the participants have converged. Write the consensus \
             summary: the agreed decision, the commitments each role made, and a \
             section titled 'Review checkpoints' listing the named checkpoints \
             at which this decision will be re-validated."
        }
        TurnType::Decision => {
            "As moderator, the debate has stalled. Make the final decision. \
             Address each dissenting position explicitly: what was argued, why \
             you are overriding it, and what mitigation you are committing to."
        }
    }
}

/// Extract artifact blocks from free text.
///
/// Blocks are line-delimited: a header `[ARTIFACT:<type>:<title>]` with an
/// optional `:<format>` suffix, body lines, then `[/ARTIFACT]`. Titles may
/// not contain colons. An unterminated block runs to end-of-text rather
/// than being dropped.
pub fn parse_artifacts(text: &str) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    let mut open: Option<(String, String, Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(header) = parse_artifact_header(trimmed) {
            // A new header implicitly closes any unterminated block.
            if let Some((kind, title, format, body)) = open.take() {
                artifacts.push(make_artifact(kind, title, format, &body));
            }
            open = Some((header.0, header.1, header.2, Vec::new()));
        } else if trimmed == ARTIFACT_CLOSE {
            if let Some((kind, title, format, body)) = open.take() {
                artifacts.push(make_artifact(kind, title, format, &body));
            }
        } else if let Some((_, _, _, body)) = open.as_mut() {
            body.push(line);
        }
    }

    if let Some((kind, title, format, body)) = open.take() {
        artifacts.push(make_artifact(kind, title, format, &body));
    }
    artifacts
}

fn parse_artifact_header(line: &str) -> Option<(String, String, Option<String>)> {
    let inner = line.strip_prefix(ARTIFACT_OPEN)?.strip_suffix(']')?;
    let mut parts = inner.splitn(3, ':');
    let kind = parts.next()?.trim();
    let title = parts.next()?.trim();
    if kind.is_empty() || title.is_empty() {
        return None;
    }
    let format = parts
        .next()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from);
    Some((kind.to_string(), title.to_string(), format))
}

fn make_artifact(kind: String, title: String, format: Option<String>, body: &[&str]) -> Artifact {
    Artifact {
        kind,
        title,
        content: body.join("\n"),
        format,
    }
}
