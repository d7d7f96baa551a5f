//! Task decomposition: turn one engineering request into a validated
//! relay-phase plan via an external planning model.
//!
//! The planning backend sits behind [`PlanningModel`] so tests can script
//! responses; production talks to a Gemini-style `generateContent` REST API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::PlannerConfig;
use crate::errors::{RetryCategory, SwarmError};
use crate::plan::{AgentRole, Phase, PlannedTask, SwarmPlan};
use crate::prompts::{planner_user_prompt, PLANNER_PREAMBLE};

/// One completion call against a named planning model.
#[async_trait]
pub trait PlanningModel: Send + Sync {
    async fn complete(&self, model: &str, system: &str, user: &str)
        -> Result<String, SwarmError>;
}

/// Gemini-style REST planning backend.
pub struct GeminiPlanner {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl GeminiPlanner {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Result<Self, SwarmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            SwarmError::PlannerNotConfigured("no planner API key in environment".into())
        })?;
        Ok(Self::new(config.api_base.clone(), api_key))
    }
}

#[async_trait]
impl PlanningModel for GeminiPlanner {
    async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String, SwarmError> {
        let body = json!({
            "contents": [ { "role": "user", "parts": [ { "text": user } ] } ],
            "systemInstruction": { "parts": [ { "text": system } ] },
            "generationConfig": {
                "temperature": 0.3,
                "topP": 0.8,
                "maxOutputTokens": 4096,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .http
            .post(format!(
                "{}/models/{model}:generateContent?key={}",
                self.api_base, self.api_key
            ))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let doc: Value = response.json().await?;

        if let Some(api_error) = doc.get("error") {
            let message = api_error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown API error");
            return Err(classify_api_error(status, message));
        }

        doc.pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                SwarmError::PlanningFailed(format!("model {model} returned an empty response"))
            })
    }
}

/// Map a planning API error onto the retry taxonomy: rate limits and
/// missing models advance the fallback chain, everything else aborts.
fn classify_api_error(status: StatusCode, message: &str) -> SwarmError {
    let lower = message.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("rate")
        || lower.contains("limit")
        || message.contains("RESOURCE_EXHAUSTED")
    {
        SwarmError::RateLimited(message.to_string())
    } else if status == StatusCode::NOT_FOUND
        || lower.contains("not found")
        || lower.contains("not supported")
    {
        SwarmError::ModelUnavailable(message.to_string())
    } else {
        SwarmError::PlanningFailed(message.to_string())
    }
}

/// Remove incidental markdown fencing around the model's JSON.
fn strip_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// The decomposer: fallback chain over a planning backend plus strict
/// plan parsing and validation.
pub struct TaskDecomposer {
    backend: Arc<dyn PlanningModel>,
    model_chain: Vec<String>,
}

impl TaskDecomposer {
    pub fn new(backend: Arc<dyn PlanningModel>, model_chain: Vec<String>) -> Self {
        Self {
            backend,
            model_chain,
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Result<Self, SwarmError> {
        Ok(Self::new(
            Arc::new(GeminiPlanner::from_config(config)?),
            config.model_chain.clone(),
        ))
    }

    /// Decompose a request into a validated plan, or fail — never a
    /// partially valid plan.
    pub async fn decompose(
        &self,
        description: &str,
        max_agents: u32,
    ) -> Result<SwarmPlan, SwarmError> {
        let max_agents = max_agents.max(1);
        info!(
            max_agents,
            request = %description.chars().take(80).collect::<String>(),
            "decomposing request"
        );

        let raw = self.call_with_fallback(description, max_agents).await?;
        let cleaned = strip_fences(&raw);
        let doc: Value =
            serde_json::from_str(&cleaned).map_err(|e| SwarmError::InvalidJson(e.to_string()))?;
        let plan = plan_from_value(&doc)?;
        plan.validate()?;

        info!(
            total_agents = plan.total_agents,
            phases = plan.phases.len(),
            tasks = plan.task_count(),
            "decomposition complete"
        );
        Ok(plan)
    }

    async fn call_with_fallback(
        &self,
        description: &str,
        max_agents: u32,
    ) -> Result<String, SwarmError> {
        let user = planner_user_prompt(description, max_agents);
        let mut last: Option<SwarmError> = None;

        for model in &self.model_chain {
            info!(model, "trying planning model");
            match self.backend.complete(model, PLANNER_PREAMBLE, &user).await {
                Ok(text) => {
                    info!(model, "planning model succeeded");
                    return Ok(text);
                }
                Err(e) if e.retry_category() == RetryCategory::ChainAdvance => {
                    warn!(model, error = %e, "planning model failed, advancing chain");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SwarmError::AllModelsExhausted(
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "empty model chain".into()),
        ))
    }
}

/// Strict conversion from the model's JSON document to the typed plan.
/// Every shape problem is a `SchemaViolation` naming the offending field.
fn plan_from_value(doc: &Value) -> Result<SwarmPlan, SwarmError> {
    let total_agents = doc
        .get("total_agents")
        .and_then(Value::as_u64)
        .filter(|&n| n >= 1)
        .ok_or_else(|| SwarmError::schema("total_agents", "must be a positive integer"))?;

    let phases_raw = doc
        .get("phases")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| SwarmError::schema("phases", "must be a non-empty array"))?;

    let mut phases = Vec::with_capacity(phases_raw.len());
    for (i, phase) in phases_raw.iter().enumerate() {
        let order = phase
            .get("order")
            .and_then(Value::as_u64)
            .ok_or_else(|| SwarmError::schema(format!("phases[{i}].order"), "must be an integer"))?
            as u32;
        let role_str = phase
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| SwarmError::schema(format!("phases[{i}].role"), "must be a string"))?;
        let role = AgentRole::parse(role_str).ok_or_else(|| {
            SwarmError::schema(format!("phases[{i}].role"), format!("unknown role: {role_str}"))
        })?;
        let account = phase
            .get("account")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SwarmError::schema(format!("phases[{i}].account"), "must be set"))?;

        let tasks_raw = phase
            .get("tasks")
            .and_then(Value::as_array)
            .ok_or_else(|| SwarmError::schema(format!("phases[{i}].tasks"), "must be an array"))?;
        let mut tasks = Vec::with_capacity(tasks_raw.len());
        for (j, task) in tasks_raw.iter().enumerate() {
            let field = |name: &str| format!("phases[{i}].tasks[{j}].{name}");
            let required = |name: &str| -> Result<String, SwarmError> {
                task.get(name)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .ok_or_else(|| SwarmError::schema(field(name), "must be a non-empty string"))
            };
            let depends_on = match task.get("depends_on") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(deps)) => deps
                    .iter()
                    .map(|d| {
                        d.as_str().map(String::from).ok_or_else(|| {
                            SwarmError::schema(field("depends_on"), "entries must be strings")
                        })
                    })
                    .collect::<Result<_, _>>()?,
                Some(_) => {
                    return Err(SwarmError::schema(field("depends_on"), "must be an array"))
                }
            };
            tasks.push(PlannedTask {
                id: required("id")?,
                title: required("title")?,
                prompt: required("prompt")?,
                depends_on,
                requires_approval: task
                    .get("requires_approval")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }

        phases.push(Phase {
            order,
            role,
            account: account.to_string(),
            tasks,
        });
    }

    Ok(SwarmPlan {
        total_agents: total_agents as u32,
        phases,
    })
}
