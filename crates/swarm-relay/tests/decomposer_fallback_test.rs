//! Model fallback chain behavior: rate limits advance the chain, other
//! errors abort, exhaustion surfaces as `AllModelsExhausted`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use swarm_relay::decomposer::{PlanningModel, TaskDecomposer};
use swarm_relay::errors::SwarmError;
use swarm_relay::plan::AgentRole;

const PLAN_JSON: &str = r#"{
    "total_agents": 2,
    "phases": [
        {
            "order": 1,
            "role": "Lead Architect",
            "account": "arch@example.com",
            "tasks": [
                { "id": "arch-1", "title": "Design", "prompt": "Design it", "depends_on": [] }
            ]
        },
        {
            "order": 2,
            "role": "UI Engine",
            "account": "ui@example.com",
            "tasks": [
                { "id": "ui-1", "title": "Build UI", "prompt": "Build it", "depends_on": ["arch-1"] }
            ]
        }
    ]
}"#;

/// Scripted backend: each model name maps to a canned outcome.
struct ScriptedPlanner {
    calls: Mutex<Vec<String>>,
    script: fn(&str) -> Result<String, SwarmError>,
}

impl ScriptedPlanner {
    fn new(script: fn(&str) -> Result<String, SwarmError>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script,
        })
    }
}

#[async_trait]
impl PlanningModel for ScriptedPlanner {
    async fn complete(
        &self,
        model: &str,
        _system: &str,
        _user: &str,
    ) -> Result<String, SwarmError> {
        self.calls.lock().unwrap().push(model.to_string());
        (self.script)(model)
    }
}

fn chain() -> Vec<String> {
    vec!["m1".into(), "m2".into(), "m3".into()]
}

#[tokio::test]
async fn rate_limited_models_fall_through_to_a_healthy_one() {
    let backend = ScriptedPlanner::new(|model| match model {
        "m1" => Err(SwarmError::RateLimited("quota".into())),
        "m2" => Err(SwarmError::ModelUnavailable("m2 is not found".into())),
        _ => Ok(format!("```json\n{PLAN_JSON}\n```")),
    });
    let decomposer = TaskDecomposer::new(backend.clone(), chain());

    let plan = decomposer.decompose("build the thing", 4).await.unwrap();
    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[1].role, AgentRole::UiEngine);
    assert_eq!(*backend.calls.lock().unwrap(), vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn non_transient_errors_abort_the_chain_immediately() {
    let backend = ScriptedPlanner::new(|_| {
        Err(SwarmError::PlanningFailed("invalid argument".into()))
    });
    let decomposer = TaskDecomposer::new(backend.clone(), chain());

    let err = decomposer.decompose("build", 2).await.unwrap_err();
    assert!(matches!(err, SwarmError::PlanningFailed(_)));
    assert_eq!(backend.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_chain_reports_all_models_exhausted() {
    let backend = ScriptedPlanner::new(|_| Err(SwarmError::RateLimited("quota".into())));
    let decomposer = TaskDecomposer::new(backend.clone(), chain());

    let err = decomposer.decompose("build", 2).await.unwrap_err();
    assert!(matches!(err, SwarmError::AllModelsExhausted(_)));
    assert_eq!(backend.calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn unparseable_output_is_invalid_json_not_a_chain_retry() {
    let backend = ScriptedPlanner::new(|_| Ok("here is your plan: {not json".into()));
    let decomposer = TaskDecomposer::new(backend.clone(), chain());

    let err = decomposer.decompose("build", 2).await.unwrap_err();
    assert!(matches!(err, SwarmError::InvalidJson(_)));
    // Parsing happens after the call succeeds; the chain must not advance.
    assert_eq!(backend.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_plans_never_reach_the_caller() {
    // Same task id twice: valid JSON, invalid plan.
    let backend = ScriptedPlanner::new(|_| {
        Ok(r#"{
            "total_agents": 1,
            "phases": [
                {
                    "order": 1,
                    "role": "Lead Architect",
                    "account": "arch@example.com",
                    "tasks": [
                        { "id": "t", "title": "a", "prompt": "p", "depends_on": [] },
                        { "id": "t", "title": "b", "prompt": "p", "depends_on": [] }
                    ]
                }
            ]
        }"#
        .into())
    });
    let decomposer = TaskDecomposer::new(backend, chain());

    let err = decomposer.decompose("build", 2).await.unwrap_err();
    assert!(matches!(err, SwarmError::SchemaViolation { .. }));
    assert!(err.to_string().contains("duplicate task id"));
}
