//! End-to-end pipeline scenarios against scripted providers.

use aurarouter_abstraction::{GenerateOutput, Locality, ProviderError, TokenUsage};
use aurarouter_core::{ConfigStore, ModelEntry, ProviderKind, SystemConfig};
use aurarouter_models::MockProvider;
use aurarouter_orchestrator::{
    AttemptOutcome, Classification, Fabric, FabricError, NodeStatus,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn model_entry(kind: ProviderKind) -> ModelEntry {
    let mut entry = ModelEntry::new(kind);
    match kind {
        ProviderKind::Google => {
            entry.model_name = Some("gemini-2.0-flash".into());
            entry.api_key = Some("test-key".into());
        }
        _ => {
            entry.endpoint = Some("http://localhost:11434".into());
            entry.model_name = Some("qwen".into());
        }
    }
    entry
}

/// Builds a validated store: every referenced model gets a config entry, the
/// three required roles always exist.
fn store(models: &[(&str, ProviderKind)], chains: &[(&str, &[&str])]) -> Arc<ConfigStore> {
    let mut config = SystemConfig::default();
    for (id, kind) in models {
        config.models.insert(id.to_string(), model_entry(*kind));
    }
    for (role, ids) in chains {
        config
            .roles
            .insert(role.to_string(), ids.iter().map(|s| s.to_string()).collect());
    }
    let first = models[0].0.to_string();
    for required in ["router", "reasoning", "coding"] {
        config.roles.entry(required.to_string()).or_insert_with(|| vec![first.clone()]);
    }
    Arc::new(ConfigStore::from_config(config).unwrap())
}

fn output(text: &str) -> Result<GenerateOutput, ProviderError> {
    Ok(GenerateOutput {
        text: text.to_string(),
        usage: Some(TokenUsage { input_tokens: 10, output_tokens: 5 }),
    })
}

#[tokio::test]
async fn s1_direct_local_success() {
    let store = store(
        &[("r", ProviderKind::Ollama), ("l", ProviderKind::Ollama)],
        &[("router", &["r"]), ("coding", &["l"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "direct")));
    fabric.registry().register("l", Arc::new(MockProvider::always("l", "4")));

    let result = fabric
        .execute("coding", "sum 2+2", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.classification, Classification::Direct);
    assert_eq!(result.final_output, "4");
    assert_eq!(result.dag.root.as_deref(), Some("classify"));

    let classify = result.dag.node("classify").unwrap();
    assert_eq!(classify.status, NodeStatus::Success);
    assert_eq!(classify.attempts.len(), 1);
    assert_eq!(classify.attempts[0].model_id, "r");
    assert_eq!(classify.attempts[0].outcome, AttemptOutcome::Ok);
    assert_eq!(classify.children, vec!["execute"]);

    let execute = result.dag.node("execute").unwrap();
    assert_eq!(execute.status, NodeStatus::Success);
    assert_eq!(execute.attempts[0].model_id, "l");
    assert_eq!(execute.role, "coding");
}

#[tokio::test]
async fn s2_cascade_failure() {
    let store = store(
        &[
            ("r", ProviderKind::Ollama),
            ("a", ProviderKind::Ollama),
            ("b", ProviderKind::Ollama),
            ("c", ProviderKind::Ollama),
        ],
        &[("router", &["r"]), ("coding", &["a", "b", "c"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "direct")));
    fabric.registry().register(
        "a",
        Arc::new(MockProvider::failing(
            "a",
            ProviderError::HttpStatus { model_id: "a".into(), code: 500 },
        )),
    );
    fabric.registry().register(
        "b",
        Arc::new(MockProvider::failing("b", ProviderError::Timeout { model_id: "b".into() })),
    );
    fabric.registry().register("c", Arc::new(MockProvider::always("c", "hi")));

    let result =
        fabric.execute("coding", "task", None, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.final_output, "hi");
    let execute = result.dag.node("execute").unwrap();
    let kinds: Vec<_> = execute
        .attempts
        .iter()
        .map(|a| (a.model_id.as_str(), a.outcome, a.error_kind.as_deref()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("a", AttemptOutcome::Error, Some("http_status")),
            ("b", AttemptOutcome::Error, Some("timeout")),
            ("c", AttemptOutcome::Ok, None),
        ]
    );
}

#[tokio::test]
async fn s3_multi_step_plan_and_steps() {
    let store = store(
        &[
            ("r", ProviderKind::Ollama),
            ("p", ProviderKind::Ollama),
            ("w", ProviderKind::Ollama),
        ],
        &[("router", &["r"]), ("reasoning", &["p"]), ("coding", &["w"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "multi_step")));
    fabric
        .registry()
        .register("p", Arc::new(MockProvider::always("p", r#"["step1","step2"]"#)));
    let worker = Arc::new(MockProvider::scripted_texts("w", &["out1", "out2"]));
    fabric.registry().register("w", worker.clone());

    let result =
        fabric.execute("coding", "build it", None, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.classification, Classification::MultiStep);
    assert_eq!(result.plan.as_deref(), Some(&["step1".to_string(), "step2".to_string()][..]));

    let classify = result.dag.node("classify").unwrap();
    assert_eq!(classify.children, vec!["plan"]);
    let plan = result.dag.node("plan").unwrap();
    assert_eq!(plan.status, NodeStatus::Success);
    assert_eq!(plan.children, vec!["step-1", "step-2"]);
    assert_eq!(result.dag.node("step-1").unwrap().status, NodeStatus::Success);
    assert_eq!(result.dag.node("step-2").unwrap().status, NodeStatus::Success);

    // step 2 saw step 1's output in its prompt
    let prompts = worker.prompts();
    assert!(prompts[1].contains("out1"));
    assert!(result.final_output.contains("Step 1: step1"));
    assert!(result.final_output.contains("out2"));
}

#[tokio::test]
async fn s4_pii_skips_untagged_cloud_models() {
    let store = store(
        &[
            ("r", ProviderKind::Ollama),
            ("cloud_gem", ProviderKind::Google),
            ("local_q", ProviderKind::Ollama),
        ],
        &[("router", &["r"]), ("coding", &["cloud_gem", "local_q"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "direct")));
    fabric.registry().register(
        "cloud_gem",
        Arc::new(MockProvider::always("cloud_gem", "leak").with_locality(Locality::Cloud)),
    );
    fabric.registry().register("local_q", Arc::new(MockProvider::always("local_q", "safe")));

    let result = fabric
        .execute("coding", "email john@example.com about the launch", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.final_output, "safe");
    let execute = result.dag.node("execute").unwrap();
    assert_eq!(execute.attempts[0].model_id, "cloud_gem");
    assert_eq!(execute.attempts[0].outcome, AttemptOutcome::SkippedPrivacy);
    assert_eq!(execute.attempts[1].model_id, "local_q");
    assert_eq!(execute.attempts[1].outcome, AttemptOutcome::Ok);
}

#[tokio::test]
async fn s5_plan_parse_failure_degrades_to_direct() {
    let store = store(
        &[
            ("r", ProviderKind::Ollama),
            ("p", ProviderKind::Ollama),
            ("w", ProviderKind::Ollama),
        ],
        &[("router", &["r"]), ("reasoning", &["p"]), ("coding", &["w"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "multi_step")));
    fabric
        .registry()
        .register("p", Arc::new(MockProvider::always("p", "I suggest step 1...")));
    fabric.registry().register("w", Arc::new(MockProvider::always("w", "direct result")));

    let result =
        fabric.execute("coding", "build it", None, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.plan, None);
    assert_eq!(result.final_output, "direct result");

    let plan = result.dag.node("plan").unwrap();
    assert_eq!(plan.status, NodeStatus::Failed);
    let annotation = plan.attempts.last().unwrap();
    assert_eq!(annotation.error_kind.as_deref(), Some("plan_parse_failed"));

    // a single Execute node follows
    let execute = result.dag.node("execute").unwrap();
    assert_eq!(execute.status, NodeStatus::Success);
    assert!(result.dag.node("step-1").is_none());
}

#[tokio::test]
async fn s6_role_synonym_resolves_to_canonical_chain() {
    let store = {
        let mut config = SystemConfig::default();
        for id in ["r", "l"] {
            config.models.insert(id.to_string(), model_entry(ProviderKind::Ollama));
        }
        config.roles.insert("router".into(), vec!["r".into()]);
        config.roles.insert("reasoning".into(), vec!["r".into()]);
        config.roles.insert("coding".into(), vec!["l".into()]);
        config.semantic_verbs.insert("coding".into(), vec!["programming".into()]);
        Arc::new(ConfigStore::from_config(config).unwrap())
    };
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "direct")));
    fabric.registry().register("l", Arc::new(MockProvider::always("l", "4")));

    let result = fabric
        .execute("programming", "sum 2+2", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.final_output, "4");
    assert_eq!(result.dag.node("execute").unwrap().role, "coding");
}

#[tokio::test]
async fn unknown_role_fails_before_any_stage() {
    let store = store(&[("m", ProviderKind::Ollama)], &[]);
    let fabric = Fabric::new(store);

    let failure = fabric
        .execute("poetry", "ode to routing", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, FabricError::RoleUnknown(_)));
    assert!(failure.dag.nodes.is_empty());
}

#[tokio::test]
async fn failed_step_terminates_with_partial_dag() {
    let store = store(
        &[
            ("r", ProviderKind::Ollama),
            ("p", ProviderKind::Ollama),
            ("w", ProviderKind::Ollama),
        ],
        &[("router", &["r"]), ("reasoning", &["p"]), ("coding", &["w"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "multi_step")));
    fabric
        .registry()
        .register("p", Arc::new(MockProvider::always("p", r#"["step1","step2"]"#)));
    fabric.registry().register(
        "w",
        Arc::new(MockProvider::scripted("w", vec![
            output("out1"),
            Err(ProviderError::Network { model_id: "w".into(), cause: "gone".into() }),
        ])),
    );

    let failure =
        fabric.execute("coding", "build it", None, &CancellationToken::new()).await.unwrap_err();

    let FabricError::AllFailed { stage, attempts } = &failure.error else {
        panic!("expected all_failed, got {:?}", failure.error);
    };
    assert_eq!(stage, "step-2");
    assert_eq!(attempts.len(), 1);

    // The partial DAG still shows the successful step.
    assert_eq!(failure.dag.node("step-1").unwrap().status, NodeStatus::Success);
    assert_eq!(failure.dag.node("step-2").unwrap().status, NodeStatus::Failed);
}

#[tokio::test]
async fn execute_local_filters_cloud_models_out() {
    let store = store(
        &[
            ("r", ProviderKind::Ollama),
            ("cloud_gem", ProviderKind::Google),
            ("local_q", ProviderKind::Ollama),
        ],
        &[("router", &["r"]), ("coding", &["cloud_gem", "local_q"])],
    );
    let fabric = Fabric::new(store);
    let cloud = Arc::new(MockProvider::always("cloud_gem", "cloudy").with_locality(Locality::Cloud));
    fabric.registry().register("cloud_gem", cloud.clone());
    fabric.registry().register("local_q", Arc::new(MockProvider::always("local_q", "local")));

    let result =
        fabric.execute_local("coding", "clean prompt", &CancellationToken::new()).await.unwrap();

    assert_eq!(result.final_output, "local");
    assert!(cloud.prompts().is_empty());
    let execute = result.dag.node("execute").unwrap();
    assert_eq!(execute.attempts.len(), 1);
}

#[tokio::test]
async fn execute_all_collects_every_result() {
    let store = store(
        &[("r", ProviderKind::Ollama), ("a", ProviderKind::Ollama), ("b", ProviderKind::Ollama)],
        &[("router", &["r"]), ("coding", &["a", "b"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("a", Arc::new(MockProvider::always("a", "alpha")));
    fabric.registry().register(
        "b",
        Arc::new(MockProvider::failing("b", ProviderError::Timeout { model_id: "b".into() })),
    );

    let reports = fabric
        .execute_all("coding", "compare this", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports[0].success);
    assert_eq!(reports[0].text, "alpha");
    assert!(!reports[1].success);
    assert_eq!(reports[1].error_kind.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn reload_is_linearizable_for_future_requests() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("auraconfig.yaml");

    let mut config = SystemConfig::default();
    for id in ["r", "old", "new"] {
        config.models.insert(id.to_string(), model_entry(ProviderKind::Ollama));
    }
    config.roles.insert("router".into(), vec!["r".into()]);
    config.roles.insert("reasoning".into(), vec!["r".into()]);
    config.roles.insert("coding".into(), vec!["old".into()]);
    let store = Arc::new(ConfigStore::from_config(config).unwrap().with_path(&path));

    let fabric = Fabric::new(store.clone());
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "direct")));
    fabric.registry().register("old", Arc::new(MockProvider::always("old", "from old")));
    fabric.registry().register("new", Arc::new(MockProvider::always("new", "from new")));

    let before =
        fabric.execute("coding", "task", None, &CancellationToken::new()).await.unwrap();
    assert_eq!(before.final_output, "from old");

    store.set_role_chain("coding", vec!["new".into()]);
    store.save().unwrap();

    let after = fabric.execute("coding", "task", None, &CancellationToken::new()).await.unwrap();
    assert_eq!(after.final_output, "from new");
}

#[tokio::test]
async fn attempt_structure_is_idempotent_across_runs() {
    let store = store(
        &[("r", ProviderKind::Ollama), ("a", ProviderKind::Ollama), ("b", ProviderKind::Ollama)],
        &[("router", &["r"]), ("coding", &["a", "b"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "direct")));
    fabric.registry().register(
        "a",
        Arc::new(MockProvider::failing(
            "a",
            ProviderError::HttpStatus { model_id: "a".into(), code: 503 },
        )),
    );
    fabric.registry().register("b", Arc::new(MockProvider::always("b", "stable")));

    let shape = |dag: &aurarouter_orchestrator::ExecutionDag| {
        dag.nodes
            .iter()
            .map(|n| {
                (
                    n.id.clone(),
                    n.attempts
                        .iter()
                        .map(|a| (a.model_id.clone(), a.outcome, a.error_kind.clone()))
                        .collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>()
    };

    let first =
        fabric.execute("coding", "task", None, &CancellationToken::new()).await.unwrap();
    let second =
        fabric.execute("coding", "task", None, &CancellationToken::new()).await.unwrap();
    assert_eq!(shape(&first.dag), shape(&second.dag));
}

#[tokio::test]
async fn health_reports_cover_all_models() {
    let store = store(
        &[("r", ProviderKind::Ollama), ("l", ProviderKind::Ollama)],
        &[("router", &["r"]), ("coding", &["l"])],
    );
    let fabric = Fabric::new(store);
    fabric.registry().register("r", Arc::new(MockProvider::always("r", "x")));
    fabric.registry().register("l", Arc::new(MockProvider::always("l", "x")));

    let reports = fabric.health().await;
    assert!(reports.contains_key("r"));
    assert!(reports.contains_key("l"));
}
