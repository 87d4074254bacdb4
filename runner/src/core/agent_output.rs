//! Parsing of the agent CLI's structured (`--output-format json`) result.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Raw JSON document printed by the agent CLI. Every field is optional
/// except `result`.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawAgentOutput {
    result: Option<serde_json::Value>,
    total_cost_usd: Option<f64>,
    #[serde(default)]
    usage: Usage,
    #[serde(default, rename = "modelUsage")]
    model_usage: BTreeMap<String, Usage>,
    duration_ms: Option<u64>,
    duration_api_ms: Option<u64>,
    num_turns: Option<u64>,
    session_id: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

/// Structured result from one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    pub result: String,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub model: String,
    pub session_id: Option<String>,
    pub duration_ms: Option<u64>,
    /// Line appended to the cost log, minus its timestamp.
    pub cost: CostRecord,
}

/// One JSONL line in `logs/cost-log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: String,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub model: String,
    pub session_id: Option<String>,
    pub stop_reason: Option<String>,
}

/// Parse the agent's stdout. Fails on non-JSON output or a missing `result`.
pub fn parse_agent_output(stdout: &str) -> Result<AgentResult> {
    let raw: RawAgentOutput = serde_json::from_str(stdout.trim()).with_context(|| {
        format!(
            "agent did not return valid JSON (first 200 chars: {})",
            preview(stdout)
        )
    })?;
    let Some(result) = raw.result.as_ref() else {
        bail!("agent JSON has no result field (first 200 chars: {})", preview(stdout));
    };
    let result = match result {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };

    let model = dominant_model(&raw.model_usage);
    let cost = CostRecord {
        timestamp: String::new(),
        cost_usd: raw.total_cost_usd,
        input_tokens: raw.usage.input_tokens,
        output_tokens: raw.usage.output_tokens,
        cache_creation_tokens: raw.usage.cache_creation_input_tokens,
        cache_read_tokens: raw.usage.cache_read_input_tokens,
        duration_ms: raw.duration_ms,
        duration_api_ms: raw.duration_api_ms,
        num_turns: raw.num_turns,
        model: model.clone(),
        session_id: raw.session_id.clone(),
        stop_reason: raw.stop_reason.clone(),
    };

    Ok(AgentResult {
        result,
        cost_usd: raw.total_cost_usd,
        input_tokens: raw.usage.input_tokens,
        output_tokens: raw.usage.output_tokens,
        model,
        session_id: raw.session_id,
        duration_ms: raw.duration_ms,
        cost,
    })
}

/// Model with the highest input+output token total, or `"unknown"`.
fn dominant_model(usage: &BTreeMap<String, Usage>) -> String {
    let mut best: Option<(&str, u64)> = None;
    for (name, counts) in usage {
        let total = counts.input_tokens.unwrap_or(0) + counts.output_tokens.unwrap_or(0);
        if best.is_none_or(|(_, current)| total > current) {
            best = Some((name, total));
        }
    }
    best.map_or_else(|| "unknown".to_string(), |(name, _)| name.to_string())
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
