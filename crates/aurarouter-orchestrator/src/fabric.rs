//! The composed runtime handle.
//!
//! A [`Fabric`] owns a configuration handle, the provider registry, the
//! privacy auditor, and the health prober, and services the public
//! operations: classify-and-execute, direct execution, compare-across-chain,
//! local-only execution, health, and asset registration.
//!
//! No ambient state: every fabric is an explicit handle and tests
//! instantiate independent ones.

use crate::dag::{
    preview, Attempt, Classification, DagNode, ExecutionDag, ExecutionResult, NodeStatus,
};
use crate::error::{FabricError, FabricFailure};
use crate::executor::{run_chain, BudgetHook, SkipPolicy, StageOutcome};
use crate::health::{HealthProber, HealthReport, ServiceStateFn};
use crate::pipeline;
use aurarouter_abstraction::{GenerateParams, Locality};
use aurarouter_core::{
    AssetEntry, ConfigError, ConfigStore, PrivacyAuditor, RoleResolver, SystemConfig,
};
use aurarouter_models::{LookupError, ProviderRegistry, RegistryView};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-model result of a compare run (`execute_all`).
#[derive(Debug, Clone)]
pub struct ModelRunReport {
    pub model_id: String,
    pub success: bool,
    pub text: String,
    pub error_kind: Option<String>,
    pub elapsed: Duration,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

/// The composed routing runtime.
pub struct Fabric {
    config: Arc<ConfigStore>,
    registry: Arc<ProviderRegistry>,
    prober: HealthProber,
    budget: BudgetHook,
    /// Privacy auditor rebuilt when the config generation changes.
    auditor: Mutex<(u64, Arc<PrivacyAuditor>)>,
}

impl Fabric {
    /// Builds a fabric over a configuration handle.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let auditor = build_auditor(&config.snapshot());
        Self {
            config,
            registry: Arc::new(ProviderRegistry::new()),
            prober: HealthProber::new(),
            budget: Arc::new(|_, _| None),
            auditor: Mutex::new((0, auditor)),
        }
    }

    /// Installs a budget hook consulted per attempt (after the privacy and
    /// health predicates). The default allows everything.
    #[must_use]
    pub fn with_budget_hook(mut self, hook: BudgetHook) -> Self {
        self.budget = hook;
        self
    }

    /// Installs the owning service's state accessor for state-aware health
    /// probing.
    #[must_use]
    pub fn with_service_state(mut self, state_fn: ServiceStateFn) -> Self {
        self.prober = self.prober.with_service_state(state_fn);
        self
    }

    /// The configuration handle this fabric routes with.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// The provider registry, for dynamic registrations.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn view(&self) -> RegistryView {
        self.registry.view(self.config.snapshot(), self.config.generation())
    }

    fn auditor_for(&self, generation: u64, config: &SystemConfig) -> Arc<PrivacyAuditor> {
        let mut cached = self.auditor.lock().expect("auditor cache poisoned");
        if cached.0 != generation {
            *cached = (generation, build_auditor(config));
        }
        cached.1.clone()
    }

    fn call_params(config: &SystemConfig, json_mode: bool) -> GenerateParams {
        GenerateParams {
            json_mode,
            timeout: Duration::from_secs(config.system.default_timeout_seconds),
            ..GenerateParams::default()
        }
    }

    /// Classifies `task` and runs it to completion: one Execute stage for
    /// direct tasks, Plan + sequential Step stages for multi-step ones.
    ///
    /// # Errors
    /// A [`FabricFailure`] carrying the partial DAG, so callers can see
    /// where the pipeline stopped.
    pub async fn execute(
        &self,
        role: &str,
        task: &str,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FabricFailure> {
        let snapshot = self.config.snapshot();
        let generation = self.config.generation();
        let view = self.registry.view(snapshot.clone(), generation);
        let mut dag = ExecutionDag::default();

        let resolver = RoleResolver::new(&snapshot.semantic_verbs, snapshot.roles.keys());
        let exec_role = match resolver.resolve(role) {
            Ok(role) => role,
            Err(e) => return Err(FabricFailure::new(e, dag)),
        };
        let router_chain = match required_chain(&snapshot, "router") {
            Ok(chain) => chain,
            Err(e) => return Err(FabricFailure::new(e, dag)),
        };
        let exec_chain = match required_chain(&snapshot, &exec_role) {
            Ok(chain) => chain,
            Err(e) => return Err(FabricFailure::new(e, dag)),
        };

        let audit = {
            let auditor = self.auditor_for(generation, &snapshot);
            let mut audited = task.to_string();
            if let Some(context) = context {
                audited.push('\n');
                audited.push_str(context);
            }
            auditor.audit(&audited)
        };
        if audit.pii {
            warn!(reasons = ?audit.reasons, "prompt flagged by privacy audit");
        }
        let policy =
            SkipPolicy { pii: audit.pii, health: self.prober.gate(), budget: self.budget.clone() };

        // Classify
        let classifier_output = self
            .run_stage(
                &mut dag,
                &view,
                StageSpec {
                    node_id: "classify",
                    label: "Classify",
                    role: "router",
                    parent: None,
                },
                router_chain,
                &pipeline::classifier_prompt(task),
                &Self::call_params(&snapshot, false),
                &policy,
                cancel,
            )
            .await?;
        let classification = pipeline::parse_classification(&classifier_output);
        info!(?classification, role = %exec_role, "task classified");

        if classification == Classification::Direct {
            let output = self
                .run_stage(
                    &mut dag,
                    &view,
                    StageSpec {
                        node_id: "execute",
                        label: "Execute",
                        role: &exec_role,
                        parent: Some("classify"),
                    },
                    exec_chain,
                    &pipeline::direct_prompt(task, context),
                    &Self::call_params(&snapshot, false),
                    &policy,
                    cancel,
                )
                .await?;
            return Ok(ExecutionResult {
                classification,
                plan: None,
                final_output: output,
                dag,
            });
        }

        // Plan
        let reasoning_chain = match required_chain(&snapshot, "reasoning") {
            Ok(chain) => chain,
            Err(e) => return Err(FabricFailure::new(e, dag)),
        };
        let max_steps = snapshot.system.max_plan_steps;
        let planner_output = self
            .run_stage(
                &mut dag,
                &view,
                StageSpec { node_id: "plan", label: "Plan", role: "reasoning", parent: Some("classify") },
                reasoning_chain,
                &pipeline::planner_prompt(task, context.unwrap_or(""), max_steps),
                &Self::call_params(&snapshot, true),
                &policy,
                cancel,
            )
            .await?;

        let Some(steps) = pipeline::parse_plan(&planner_output, max_steps) else {
            // Planner answered but not with a usable step array: annotate the
            // Plan node and degrade to direct execution.
            warn!("planner output unparseable, degrading to direct execution");
            if let Some(node) = dag.node_mut("plan") {
                let model_id = node
                    .attempts
                    .iter()
                    .rev()
                    .find(|a| a.outcome == crate::dag::AttemptOutcome::Ok)
                    .map(|a| a.model_id.clone())
                    .unwrap_or_default();
                node.attempts.push(Attempt::annotation(
                    &model_id,
                    "plan_parse_failed",
                    preview(&planner_output),
                ));
                node.status = NodeStatus::Failed;
            }
            let output = self
                .run_stage(
                    &mut dag,
                    &view,
                    StageSpec {
                        node_id: "execute",
                        label: "Execute",
                        role: &exec_role,
                        parent: Some("plan"),
                    },
                    exec_chain,
                    &pipeline::direct_prompt(task, context),
                    &Self::call_params(&snapshot, false),
                    &policy,
                    cancel,
                )
                .await?;
            return Ok(ExecutionResult {
                classification,
                plan: None,
                final_output: output,
                dag,
            });
        };

        // Execute steps sequentially; each step sees the output of earlier
        // steps.
        info!(steps = steps.len(), "executing plan");
        let mut outputs: Vec<String> = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            let node_id = format!("step-{}", index + 1);
            let label = format!("Step {}", index + 1);
            let output = self
                .run_stage(
                    &mut dag,
                    &view,
                    StageSpec {
                        node_id: &node_id,
                        label: &label,
                        role: &exec_role,
                        parent: Some("plan"),
                    },
                    exec_chain,
                    &pipeline::step_prompt(step, context, &outputs),
                    &Self::call_params(&snapshot, false),
                    &policy,
                    cancel,
                )
                .await?;
            outputs.push(output);
        }

        let final_output = pipeline::join_step_outputs(&steps, &outputs);
        Ok(ExecutionResult { classification, plan: Some(steps), final_output, dag })
    }

    /// Runs one stage: records the node, walks the chain, and converts
    /// non-success outcomes to a [`FabricFailure`] carrying the DAG.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        dag: &mut ExecutionDag,
        view: &RegistryView,
        spec: StageSpec<'_>,
        chain: &[String],
        prompt: &str,
        params: &GenerateParams,
        policy: &SkipPolicy,
        cancel: &CancellationToken,
    ) -> Result<String, FabricFailure> {
        let mut node = DagNode::new(spec.node_id, spec.label, spec.role);
        node.status = NodeStatus::Running;
        dag.push(node);
        if let Some(parent) = spec.parent {
            dag.add_child(parent, spec.node_id);
        }

        let run = run_chain(view, spec.node_id, chain, prompt, params, policy, cancel).await;

        let node = dag.node_mut(spec.node_id).expect("node just pushed");
        node.attempts = run.attempts;
        match run.outcome {
            StageOutcome::Success { output, .. } => {
                node.status = NodeStatus::Success;
                node.result_preview = Some(preview(&output.text));
                Ok(output.text)
            }
            StageOutcome::AllFailed => {
                node.status = NodeStatus::Failed;
                let attempts = node.attempts.clone();
                Err(FabricFailure::new(
                    FabricError::AllFailed { stage: spec.node_id.to_string(), attempts },
                    std::mem::take(dag),
                ))
            }
            StageOutcome::PiiNoViableModel => {
                node.status = NodeStatus::Failed;
                Err(FabricFailure::new(
                    FabricError::PiiNoViableModel(spec.node_id.to_string()),
                    std::mem::take(dag),
                ))
            }
            StageOutcome::Cancelled => {
                node.status = NodeStatus::Skipped;
                Err(FabricFailure::new(
                    FabricError::Cancelled(spec.node_id.to_string()),
                    std::mem::take(dag),
                ))
            }
        }
    }

    /// Runs a single Execute stage against `role`'s chain, without
    /// classification or planning.
    pub async fn execute_direct(
        &self,
        role: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FabricFailure> {
        self.execute_with_chain(role, prompt, cancel, |chain| chain.to_vec()).await
    }

    /// Like [`Fabric::execute_direct`], but restricted to models whose
    /// locality is `local`. Cloud-only chains fail with `all_failed` and an
    /// empty attempt log.
    pub async fn execute_local(
        &self,
        role: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FabricFailure> {
        let snapshot = self.config.snapshot();
        self.execute_with_chain(role, prompt, cancel, move |chain| {
            chain
                .iter()
                .filter(|id| {
                    snapshot
                        .models
                        .get(*id)
                        .map(|entry| entry.locality() == Locality::Local)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        })
        .await
    }

    async fn execute_with_chain(
        &self,
        role: &str,
        prompt: &str,
        cancel: &CancellationToken,
        filter: impl FnOnce(&[String]) -> Vec<String>,
    ) -> Result<ExecutionResult, FabricFailure> {
        let snapshot = self.config.snapshot();
        let generation = self.config.generation();
        let view = self.registry.view(snapshot.clone(), generation);
        let mut dag = ExecutionDag::default();

        let resolver = RoleResolver::new(&snapshot.semantic_verbs, snapshot.roles.keys());
        let exec_role = match resolver.resolve(role) {
            Ok(role) => role,
            Err(e) => return Err(FabricFailure::new(e, dag)),
        };
        let chain = match required_chain(&snapshot, &exec_role) {
            Ok(chain) => filter(chain),
            Err(e) => return Err(FabricFailure::new(e, dag)),
        };

        let audit = self.auditor_for(generation, &snapshot).audit(prompt);
        let policy =
            SkipPolicy { pii: audit.pii, health: self.prober.gate(), budget: self.budget.clone() };

        let output = self
            .run_stage(
                &mut dag,
                &view,
                StageSpec { node_id: "execute", label: "Execute", role: &exec_role, parent: None },
                &chain,
                prompt,
                &Self::call_params(&snapshot, false),
                &policy,
                cancel,
            )
            .await?;

        Ok(ExecutionResult {
            classification: Classification::Direct,
            plan: None,
            final_output: output,
            dag,
        })
    }

    /// Runs `prompt` against every model in the chain (or the explicit id
    /// list), collecting every result instead of stopping at the first
    /// success. Skip predicates do not apply; this is a comparison tool.
    pub async fn execute_all(
        &self,
        role: &str,
        prompt: &str,
        model_ids: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ModelRunReport>, FabricError> {
        let snapshot = self.config.snapshot();
        let view = self.registry.view(snapshot.clone(), self.config.generation());

        let resolver = RoleResolver::new(&snapshot.semantic_verbs, snapshot.roles.keys());
        let exec_role = resolver.resolve(role)?;
        let chain: Vec<String> = match model_ids {
            Some(ids) => ids.to_vec(),
            None => required_chain(&snapshot, &exec_role)?.to_vec(),
        };

        let params = Self::call_params(&snapshot, false);
        let mut reports = Vec::new();
        for model_id in &chain {
            if cancel.is_cancelled() {
                break;
            }
            let started = std::time::Instant::now();
            let result = match view.provider(model_id) {
                Ok(provider) => provider.generate(prompt, &params).await,
                Err(LookupError::Unknown(id)) => {
                    warn!(model_id = %id, "compare run: model not configured");
                    continue;
                }
                Err(LookupError::Build(error)) => Err(error),
            };
            let elapsed = started.elapsed();
            reports.push(match result {
                Ok(output) => ModelRunReport {
                    model_id: model_id.clone(),
                    success: true,
                    text: output.text,
                    error_kind: None,
                    elapsed,
                    tokens_in: output.usage.map(|u| u.input_tokens),
                    tokens_out: output.usage.map(|u| u.output_tokens),
                },
                Err(error) => ModelRunReport {
                    model_id: model_id.clone(),
                    success: false,
                    text: error.to_string(),
                    error_kind: Some(error.kind().to_string()),
                    elapsed,
                    tokens_in: None,
                    tokens_out: None,
                },
            });
        }
        Ok(reports)
    }

    /// Probes every configured model and returns per-model health.
    pub async fn health(&self) -> HashMap<String, HealthReport> {
        self.prober.probe_all(&self.view()).await
    }

    /// Registers a local GGUF asset and mirrors it into the configuration
    /// draft as an `llamacpp-embedded` model entry.
    ///
    /// The asset lands in the registry file immediately; persisting the
    /// config entry still requires `config().save()`.
    pub fn register_asset(
        &self,
        path: &Path,
        repo: &str,
        tags: Vec<String>,
        id: Option<&str>,
    ) -> Result<AssetEntry, FabricError> {
        let snapshot = self.config.snapshot();
        let models_dir = match &snapshot.system.models_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .map(|home| home.join(".auracore").join("models"))
                .ok_or_else(|| {
                    ConfigError::Invalid {
                        path: "system.models_dir".to_string(),
                        reason: "not set and no home directory available".to_string(),
                    }
                })?,
        };
        let registry = aurarouter_core::AssetRegistry::open(models_dir)?;
        Ok(registry.register(&self.config, path, repo, tags, id)?)
    }
}

struct StageSpec<'a> {
    node_id: &'a str,
    label: &'a str,
    role: &'a str,
    parent: Option<&'a str>,
}

fn required_chain<'a>(
    config: &'a SystemConfig,
    role: &str,
) -> Result<&'a Vec<String>, FabricError> {
    match config.roles.get(role) {
        Some(chain) if !chain.is_empty() => Ok(chain),
        _ => Err(FabricError::RoleMissing(role.to_string())),
    }
}

fn build_auditor(config: &SystemConfig) -> Arc<PrivacyAuditor> {
    match PrivacyAuditor::from_config(&config.privacy) {
        Ok(auditor) => Arc::new(auditor),
        Err(error) => {
            // Unreachable for validated configs; never audit with nothing.
            warn!(%error, "custom privacy patterns rejected, using built-ins");
            Arc::new(PrivacyAuditor::new())
        }
    }
}
