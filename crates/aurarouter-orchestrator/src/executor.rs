//! Fallback chain execution.
//!
//! Walks a role's chain in configured order, applying the skip predicates
//! (privacy -> health cache -> budget, in that fixed order) before each
//! invocation. Chain order is authoritative here: re-ordering concerns are
//! expressed through predicates by the orchestrator, never by reshuffling.

use crate::dag::{Attempt, AttemptOutcome};
use aurarouter_abstraction::{GenerateOutput, GenerateParams, Locality, ProviderError};
use aurarouter_models::{LookupError, RegistryView};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pluggable budget gate: `Some(reason)` denies the model.
///
/// Budget accounting itself lives outside the core; the default hook allows
/// everything.
pub type BudgetHook = Arc<dyn Fn(&str, Locality) -> Option<String> + Send + Sync>;

/// Health gate backed by the prober's cache: `Some(reason)` when the model
/// is known-down. Cache misses return `None`; the executor then relies on
/// the actual call to surface failures rather than probing inline.
pub type HealthGate = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// The skip predicates one stage runs under.
#[derive(Clone)]
pub struct SkipPolicy {
    /// Whether the stage input was flagged by the privacy auditor.
    pub pii: bool,
    pub health: HealthGate,
    pub budget: BudgetHook,
}

impl SkipPolicy {
    /// A policy that skips nothing.
    pub fn permissive() -> Self {
        Self { pii: false, health: Arc::new(|_| None), budget: Arc::new(|_, _| None) }
    }
}

/// How a stage run ended.
#[derive(Debug)]
pub enum StageOutcome {
    Success { model_id: String, output: GenerateOutput },
    AllFailed,
    PiiNoViableModel,
    Cancelled,
}

/// A completed stage run: the full attempt log plus the outcome.
#[derive(Debug)]
pub struct StageRun {
    pub attempts: Vec<Attempt>,
    pub outcome: StageOutcome,
}

impl StageRun {
    fn finish(attempts: Vec<Attempt>, stage: &str) -> Self {
        let all_privacy = !attempts.is_empty()
            && attempts.iter().all(|a| a.outcome == AttemptOutcome::SkippedPrivacy);
        let outcome = if all_privacy {
            warn!(stage, "privacy skipping eliminated the whole chain");
            StageOutcome::PiiNoViableModel
        } else {
            warn!(stage, attempts = attempts.len(), "fallback chain exhausted");
            StageOutcome::AllFailed
        };
        Self { attempts, outcome }
    }
}

/// Runs `prompt` down `chain`, returning on the first non-empty success.
pub async fn run_chain(
    view: &RegistryView,
    stage: &str,
    chain: &[String],
    prompt: &str,
    params: &GenerateParams,
    policy: &SkipPolicy,
    cancel: &CancellationToken,
) -> StageRun {
    let mut attempts: Vec<Attempt> = Vec::new();

    for model_id in chain {
        if cancel.is_cancelled() {
            return StageRun { attempts, outcome: StageOutcome::Cancelled };
        }

        let provider = match view.provider(model_id) {
            Ok(provider) => provider,
            Err(LookupError::Unknown(_)) => {
                attempts.push(Attempt::skipped(
                    model_id,
                    AttemptOutcome::SkippedUnhealthy,
                    "no_adapter",
                ));
                continue;
            }
            Err(LookupError::Build(error)) => {
                warn!(stage, model_id = %model_id, error = %error, "adapter build failed");
                attempts.push(Attempt::error(model_id, Utc::now(), &error));
                continue;
            }
        };

        // Predicate order is fixed: privacy, then health cache, then budget.
        if policy.pii && provider.locality() == Locality::Cloud && !provider.is_private() {
            warn!(stage, model_id = %model_id, "skipping cloud model: prompt carries PII");
            attempts.push(Attempt::skipped(
                model_id,
                AttemptOutcome::SkippedPrivacy,
                "PII detected and model is cloud without 'private' tag",
            ));
            continue;
        }
        if let Some(reason) = (policy.health)(model_id) {
            attempts.push(Attempt::skipped(model_id, AttemptOutcome::SkippedUnhealthy, reason));
            continue;
        }
        if let Some(reason) = (policy.budget)(model_id, provider.locality()) {
            warn!(stage, model_id = %model_id, %reason, "budget hook denied model");
            attempts.push(Attempt::skipped(model_id, AttemptOutcome::SkippedBudget, reason));
            continue;
        }

        info!(stage, model_id = %model_id, "routing to model");
        let started_at = Utc::now();
        let result = tokio::select! {
            result = provider.generate(prompt, params) => result,
            () = cancel.cancelled() => {
                Err(ProviderError::Cancelled { model_id: model_id.clone() })
            }
        };

        match result {
            Ok(output) => {
                info!(stage, model_id = %model_id, "success");
                attempts.push(Attempt::ok(model_id, started_at, &output));
                return StageRun {
                    attempts,
                    outcome: StageOutcome::Success { model_id: model_id.clone(), output },
                };
            }
            Err(error @ ProviderError::Cancelled { .. }) => {
                attempts.push(Attempt::error(model_id, started_at, &error));
                return StageRun { attempts, outcome: StageOutcome::Cancelled };
            }
            Err(error) => {
                warn!(stage, model_id = %model_id, kind = error.kind(), error = %error, "model failed");
                attempts.push(Attempt::error(model_id, started_at, &error));
            }
        }
    }

    StageRun::finish(attempts, stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurarouter_core::SystemConfig;
    use aurarouter_models::{MockProvider, ProviderRegistry};
    use std::time::Duration;

    fn view(registry: &Arc<ProviderRegistry>) -> RegistryView {
        registry.view(Arc::new(SystemConfig::default()), 0)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn cascade_returns_first_success_with_full_log() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            "a",
            Arc::new(MockProvider::failing(
                "a",
                ProviderError::HttpStatus { model_id: "a".into(), code: 500 },
            )),
        );
        registry.register(
            "b",
            Arc::new(MockProvider::failing("b", ProviderError::Timeout { model_id: "b".into() })),
        );
        registry.register("c", Arc::new(MockProvider::always("c", "hi")));

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["a", "b", "c"]),
            "prompt",
            &GenerateParams::default(),
            &SkipPolicy::permissive(),
            &CancellationToken::new(),
        )
        .await;

        let StageOutcome::Success { model_id, output } = &run.outcome else {
            panic!("expected success, got {:?}", run.outcome);
        };
        assert_eq!(model_id, "c");
        assert_eq!(output.text, "hi");
        assert_eq!(run.attempts.len(), 3);
        assert_eq!(run.attempts[0].error_kind.as_deref(), Some("http_status"));
        assert_eq!(run.attempts[1].error_kind.as_deref(), Some("timeout"));
        assert_eq!(run.attempts[2].outcome, AttemptOutcome::Ok);
    }

    #[tokio::test]
    async fn privacy_predicate_is_evaluated_before_budget() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            "cloud",
            Arc::new(
                MockProvider::always("cloud", "x")
                    .with_locality(aurarouter_abstraction::Locality::Cloud),
            ),
        );
        registry.register("local", Arc::new(MockProvider::always("local", "ok")));

        // The budget hook would also deny the cloud model; privacy must win.
        let policy = SkipPolicy {
            pii: true,
            health: Arc::new(|_| None),
            budget: Arc::new(|id, _| (id == "cloud").then(|| "over budget".to_string())),
        };

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["cloud", "local"]),
            "john@example.com",
            &GenerateParams::default(),
            &policy,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(run.attempts[0].outcome, AttemptOutcome::SkippedPrivacy);
        assert!(matches!(run.outcome, StageOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn private_tag_exempts_cloud_models_from_privacy_skip() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            "cloud_private",
            Arc::new(
                MockProvider::always("cloud_private", "ok")
                    .with_locality(aurarouter_abstraction::Locality::Cloud)
                    .with_tags(&["private"]),
            ),
        );

        let policy = SkipPolicy { pii: true, ..SkipPolicy::permissive() };
        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["cloud_private"]),
            "ssn 078-05-1120",
            &GenerateParams::default(),
            &policy,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(run.outcome, StageOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn all_privacy_skips_report_pii_no_viable_model() {
        let registry = Arc::new(ProviderRegistry::new());
        for id in ["c1", "c2"] {
            registry.register(
                id,
                Arc::new(
                    MockProvider::always(id, "x")
                        .with_locality(aurarouter_abstraction::Locality::Cloud),
                ),
            );
        }

        let policy = SkipPolicy { pii: true, ..SkipPolicy::permissive() };
        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["c1", "c2"]),
            "card 4111 1111 1111 1111",
            &GenerateParams::default(),
            &policy,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(run.outcome, StageOutcome::PiiNoViableModel));
        assert_eq!(run.attempts.len(), 2);
    }

    #[tokio::test]
    async fn health_gate_skips_known_down_models() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("down", Arc::new(MockProvider::always("down", "never reached")));
        registry.register("up", Arc::new(MockProvider::always("up", "ok")));

        let policy = SkipPolicy {
            pii: false,
            health: Arc::new(|id| (id == "down").then(|| "probe: connection refused".to_string())),
            budget: Arc::new(|_, _| None),
        };

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["down", "up"]),
            "p",
            &GenerateParams::default(),
            &policy,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(run.attempts[0].outcome, AttemptOutcome::SkippedUnhealthy);
        let StageOutcome::Success { model_id, .. } = &run.outcome else {
            panic!("expected success");
        };
        assert_eq!(model_id, "up");
    }

    #[tokio::test]
    async fn missing_adapter_records_no_adapter_skip() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("real", Arc::new(MockProvider::always("real", "ok")));

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["ghost", "real"]),
            "p",
            &GenerateParams::default(),
            &SkipPolicy::permissive(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(run.attempts[0].outcome, AttemptOutcome::SkippedUnhealthy);
        assert_eq!(run.attempts[0].detail.as_deref(), Some("no_adapter"));
        assert!(matches!(run.outcome, StageOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn empty_response_falls_through_to_next_model() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            "empty",
            Arc::new(MockProvider::failing(
                "empty",
                ProviderError::EmptyResponse { model_id: "empty".into() },
            )),
        );
        registry.register("full", Arc::new(MockProvider::always("full", "content")));

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["empty", "full"]),
            "p",
            &GenerateParams::default(),
            &SkipPolicy::permissive(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(run.attempts[0].error_kind.as_deref(), Some("empty_response"));
        assert!(matches!(run.outcome, StageOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn exhausted_chain_is_all_failed() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            "a",
            Arc::new(MockProvider::failing(
                "a",
                ProviderError::Network { model_id: "a".into(), cause: "refused".into() },
            )),
        );

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["a"]),
            "p",
            &GenerateParams::default(),
            &SkipPolicy::permissive(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(run.outcome, StageOutcome::AllFailed));
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_any_attempt() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("a", Arc::new(MockProvider::always("a", "never")));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["a"]),
            "p",
            &GenerateParams::default(),
            &SkipPolicy::permissive(),
            &cancel,
        )
        .await;
        assert!(matches!(run.outcome, StageOutcome::Cancelled));
        assert!(run.attempts.is_empty());
    }

    #[tokio::test]
    async fn in_flight_cancellation_is_observed_promptly() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            "slow",
            Arc::new(MockProvider::always("slow", "late").with_delay(Duration::from_secs(30))),
        );

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let run = run_chain(
            &view(&registry),
            "execute",
            &ids(&["slow"]),
            "p",
            &GenerateParams::default(),
            &SkipPolicy::permissive(),
            &cancel,
        )
        .await;

        assert!(matches!(run.outcome, StageOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(run.attempts[0].error_kind.as_deref(), Some("cancelled"));
    }
}
