//! Incident-to-fix pipeline.
//!
//! INTAKE → DIAGNOSE → FUSE → PLAN → SANDBOX → DECIDE → APPLY | PR.
//! Each stage's inputs and outputs are written to the audit log before the
//! next stage starts, and a patch only reaches the executor after a passing
//! sandbox run.

pub mod prompt;
pub mod state;

pub use state::{Decision, DecisionPolicy, FixResult, FixStatus, Stage};

use crate::audit::{AuditEntry, AuditEvent, AuditLogger};
use crate::config::AgentConfig;
use crate::errors::RemediationError;
use crate::executor::{ApplyOptions, ChangeExecutor, Executor, PrOptions};
use crate::models::Incident;
use crate::planner::{Plan, Planner};
use crate::providers::{
    AiProviderAdapter, ConsensusFusion, MultiProviderAdapter, QueryOptions, ResponseFusion,
};
use crate::sandbox::{SandboxRunner, ShellRunner, TestSandbox};
use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::Instrument;
use uuid::Uuid;

/// Largest test output copied into an audit record.
const AUDIT_OUTPUT_LIMIT: usize = 16 * 1024;

/// Per-run bookkeeping shared between the pipeline and its failure handler.
struct RunContext {
    run_id: Uuid,
    incident_id: String,
    stage: Mutex<Stage>,
}

impl RunContext {
    fn enter(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
        tracing::debug!(stage = %stage, "entering stage");
    }

    fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Orchestrator {
    providers: Arc<dyn AiProviderAdapter>,
    fusion: Arc<dyn ResponseFusion>,
    planner: Planner,
    sandbox: Arc<dyn TestSandbox>,
    executor: Arc<dyn ChangeExecutor>,
    audit: Arc<AuditLogger>,
    policy: DecisionPolicy,
    temperature: f64,
}

impl Orchestrator {
    pub fn new(
        providers: Arc<dyn AiProviderAdapter>,
        fusion: Arc<dyn ResponseFusion>,
        sandbox: Arc<dyn TestSandbox>,
        executor: Arc<dyn ChangeExecutor>,
        audit: Arc<AuditLogger>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            providers,
            fusion,
            planner: Planner::new(&config.planner),
            sandbox,
            executor,
            audit,
            policy: DecisionPolicy {
                auto_apply: config.agent.auto_apply,
                max_risk: config.agent.max_risk,
                min_confidence: config.agent.min_confidence,
            },
            temperature: config.agent.temperature,
        }
    }

    /// Wire the reference collaborators for the repository at `project_dir`.
    pub fn for_project(project_dir: &Path, config: &AgentConfig) -> Self {
        let sandbox = SandboxRunner::new(Arc::new(ShellRunner::new()), &config.sandbox)
            .isolated(project_dir, config.repository.trunk.as_str());
        Self::new(
            Arc::new(MultiProviderAdapter::from_config(&config.providers)),
            Arc::new(ConsensusFusion::new()),
            Arc::new(sandbox),
            Arc::new(Executor::for_repo(project_dir, config)),
            Arc::new(AuditLogger::new(config.audit_path(project_dir))),
            config,
        )
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn policy(&self) -> DecisionPolicy {
        self.policy
    }

    /// Run one incident through the pipeline. Never fails: errors and panics
    /// become a `rejected` result.
    pub async fn handle_incident(&self, incident: &Incident) -> FixResult {
        let run = RunContext {
            run_id: Uuid::new_v4(),
            incident_id: incident.id.clone(),
            stage: Mutex::new(Stage::Intake),
        };
        let span = tracing::info_span!(
            "remediation",
            incident_id = %incident.id,
            run_id = %run.run_id
        );

        async {
            tracing::info!(kind = %incident.kind, "handling incident");
            let outcome = AssertUnwindSafe(self.run_pipeline(incident, &run))
                .catch_unwind()
                .await;

            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => self.pipeline_failed(&run, e).await,
                Err(payload) => {
                    self.pipeline_failed(
                        &run,
                        RemediationError::Panicked {
                            stage: run.stage().to_string(),
                            message: panic_message(payload.as_ref()),
                        },
                    )
                    .await
                }
            };

            self.record(
                &run,
                AuditEvent::OutcomeLogged {
                    status: result.status,
                    message: result.message.clone(),
                },
            ).await;
            tracing::info!(status = %result.status, "{}", result.message);
            result
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(
        &self,
        incident: &Incident,
        run: &RunContext,
    ) -> Result<FixResult, RemediationError> {
        if incident.id.trim().is_empty() {
            return Err(RemediationError::InvalidIncident(
                "incident id must not be empty".into(),
            ));
        }
        self.record(
            run,
            AuditEvent::IncidentReceived {
                kind: incident.kind,
                failing_tests: incident.failing_tests.clone(),
                affected_files: incident.affected_files.clone(),
            },
        ).await;

        run.enter(Stage::Diagnose);
        let prompt = prompt::diagnosis_prompt(incident);
        let responses = self
            .providers
            .call_all(
                &prompt,
                QueryOptions {
                    temperature: self.temperature,
                },
            )
            .await;
        self.record(
            run,
            AuditEvent::DiagnosisCollected {
                providers: responses.iter().map(|r| r.provider.clone()).collect(),
                responses: responses.len(),
            },
        ).await;

        run.enter(Stage::Fuse);
        let fusion = self.fusion.fuse(&responses);
        self.record(
            run,
            AuditEvent::FusionLogged {
                confidence: fusion.confidence,
                risk_score: fusion.risk_score,
                providers: fusion.providers.clone(),
                candidate_patches: fusion.candidate_patches.len(),
            },
        ).await;

        run.enter(Stage::Plan);
        let plan = self.planner.create_plan(&fusion, incident);
        self.record(run, plan_event(&plan)).await;

        if !plan.is_actionable() {
            tracing::warn!(responses = responses.len(), "no actionable patch");
            let message = if responses.is_empty() {
                "No actionable patch: no provider returned a diagnosis".to_string()
            } else {
                format!(
                    "No actionable patch: none of {} provider responses contained a patch",
                    responses.len()
                )
            };
            return Ok(FixResult::rejected(run.run_id, &run.incident_id, message));
        }

        run.enter(Stage::Sandbox);
        let test_result = self.sandbox.run_tests(&plan).await;
        self.record(
            run,
            AuditEvent::TestResultLogged {
                result: test_result.truncated(AUDIT_OUTPUT_LIMIT),
            },
        ).await;

        let mut result = FixResult::new(run.run_id, &run.incident_id, FixStatus::Rejected, "");
        result.patch = Some(plan.patch.clone());

        if !test_result.passed {
            result.status = FixStatus::TestsFailed;
            result.message = format!(
                "Sandbox tests failed ({} of {} failed); no changes were made",
                test_result.failed, test_result.total
            );
            result.test_result = Some(test_result);
            return Ok(result);
        }
        result.test_result = Some(test_result);

        run.enter(Stage::Decide);
        let decision = self.policy.decide(fusion.confidence, fusion.risk_score);
        self.record(
            run,
            AuditEvent::DecisionLogged {
                decision,
                confidence: fusion.confidence,
                risk_score: fusion.risk_score,
                auto_apply: self.policy.auto_apply,
            },
        ).await;

        match decision {
            Decision::Apply => {
                run.enter(Stage::Apply);
                let apply = self
                    .executor
                    .apply_patch(
                        &plan.patch,
                        &ApplyOptions {
                            create_branch: true,
                            auto_merge: true,
                            message: plan.title.clone(),
                        },
                    )
                    .await;
                self.record(run, AuditEvent::ApplyLogged { result: apply.clone() }).await;

                if apply.success {
                    result.status = FixStatus::Applied;
                    result.message = format!("Applied fix from branch {} to trunk", apply.branch);
                } else {
                    result.message = format!(
                        "Failed to apply fix: {}",
                        apply.error.as_deref().unwrap_or("unknown error")
                    );
                }
                result.apply = Some(apply);
            }
            Decision::CreatePr => {
                run.enter(Stage::PullRequest);
                let pr = self
                    .executor
                    .create_pull_request(
                        &plan.patch,
                        &PrOptions {
                            title: plan.title.clone(),
                            description: plan.description.clone(),
                        },
                    )
                    .await;
                self.record(run, AuditEvent::PrLogged { result: pr.clone() }).await;

                if pr.success {
                    result.status = FixStatus::PrCreated;
                    result.message = format!("Pushed branch {} for review", pr.branch);
                } else {
                    result.message = format!(
                        "Failed to open pull request: {}",
                        pr.error.as_deref().unwrap_or("unknown error")
                    );
                }
                result.pull_request = Some(pr);
            }
        }

        Ok(result)
    }

    async fn record(&self, run: &RunContext, event: AuditEvent) {
        self.audit
            .record(AuditEntry::for_incident(&run.incident_id, run.run_id, event))
            .await;
    }

    async fn pipeline_failed(&self, run: &RunContext, error: RemediationError) -> FixResult {
        let stage = run.stage();
        tracing::error!(stage = %stage, "pipeline failed: {:#}", error);
        self.record(
            run,
            AuditEvent::PipelineFailed {
                stage: stage.to_string(),
                error: error.to_string(),
            },
        ).await;
        FixResult::rejected(run.run_id, &run.incident_id, format!("Pipeline error: {}", error))
    }
}

fn plan_event(plan: &Plan) -> AuditEvent {
    AuditEvent::PlanLogged {
        title: plan.title.clone(),
        risk_score: plan.risk_score,
        test_commands: plan.test_commands.clone(),
        patch_sha256: format!("{:x}", Sha256::digest(plan.patch.as_bytes())),
        patch: plan.patch.clone(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
