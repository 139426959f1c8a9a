//! Drives one test case from recipe to verdict.
//!
//! ```text
//! Init -> GateCheck -> Skipped ----------------------------------> TornDown
//!                   \-> Applying -> Waiting -> Validating -> Passed -> TornDown
//!                          \___________\___________\_____-> Failed -> TornDown
//! ```
//!
//! Every object that was applied successfully is deleted again, in reverse
//! order, whatever happens in between: errors, timeouts, panics inside a
//! stage, or the case future being dropped.

use std::{any::Any, mem, path::PathBuf, sync::Arc, time::Duration};

use futures::{FutureExt, future::join_all};
use serde_json::{Value, json};
use snafu::{ResultExt, Snafu, ensure};
use tokio::{
    runtime::Handle,
    time::{Instant, sleep_until, timeout_at},
};

use crate::{
    backend::{BackendError, ElasticsearchBackend, TelemetryBackend},
    builder::{Builder, Customization, customization, generate_suffix},
    cluster::{Cluster, ClusterError, KubectlCluster},
    context::Context,
    evaluate::{ValidationFailure, evaluate_all},
    gate::{self, Decision, GatePolicy, SkipReason},
    internal_events::{
        CaseFailed, CasePassed, CaseSkipped, CaseStageTransition, ObjectApplyError,
        ObjectDeleteError, ReadinessTimedOut, TeardownGuardTriggered, error_stage,
    },
    recipe::{self, LoadError},
    resource::{Object, ObjectKey},
    version::VersionError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    GateCheck,
    Skipped,
    Applying,
    Waiting,
    Validating,
    Passed,
    Failed,
    TornDown,
}

impl Stage {
    const fn error_stage(self) -> &'static str {
        match self {
            Self::Init | Self::GateCheck => error_stage::LOADING,
            Self::Applying => error_stage::APPLYING,
            Self::Waiting => error_stage::WAITING,
            Self::Validating => error_stage::VALIDATING,
            Self::Skipped | Self::Passed | Self::Failed | Self::TornDown => error_stage::TEARDOWN,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum CaseError {
    #[snafu(display("Could not load recipe: {}", source))]
    Load { source: LoadError },
    #[snafu(display("Invalid version: {}", source))]
    Version { source: VersionError },
    #[snafu(display("Could not render primary resource: {}", source))]
    Plan { source: serde_json::Error },
    #[snafu(display("Could not apply {}: {}", object, source))]
    Apply {
        object: ObjectKey,
        source: ClusterError,
    },
    #[snafu(display(
        "{} was not ready after {:?}, last status: {}",
        object,
        timeout,
        last_status.as_deref().unwrap_or("none")
    ))]
    ReadinessTimeout {
        object: ObjectKey,
        timeout: Duration,
        last_status: Option<String>,
    },
    #[snafu(display(
        "{} of the expectations failed: {}",
        failures.len(),
        failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    ))]
    Validation { failures: Vec<ValidationFailure> },
    #[snafu(display("Case exceeded {:?} during {:?}", timeout, stage))]
    CaseTimeout { stage: Stage, timeout: Duration },
    #[snafu(display("Panicked during {:?}: {}", stage, message))]
    Panicked { stage: Stage, message: String },
}

#[derive(Debug, Snafu)]
pub enum TeardownError {
    #[snafu(display("Could not delete {}: {}", object, source))]
    Delete {
        object: ObjectKey,
        source: ClusterError,
    },
    #[snafu(display("Ran out of time before deleting {}", object))]
    TimedOut { object: ObjectKey },
}

#[derive(Debug)]
pub enum Verdict {
    Passed,
    Skipped(SkipReason),
    Failed(CaseError),
}

#[derive(Debug)]
pub struct CaseReport {
    pub name: String,
    pub suffix: String,
    pub verdict: Verdict,
    /// Every stage the case went through, starting with [`Stage::Init`].
    pub transitions: Vec<Stage>,
    /// Objects applied successfully, in apply order.
    pub applied: Vec<ObjectKey>,
    /// Reported separately; a failed teardown never changes the verdict.
    pub teardown_errors: Vec<TeardownError>,
    pub elapsed: Duration,
}

impl CaseReport {
    pub const fn is_passed(&self) -> bool {
        matches!(self.verdict, Verdict::Passed)
    }

    pub const fn is_skipped(&self) -> bool {
        matches!(self.verdict, Verdict::Skipped(_))
    }

    pub const fn error(&self) -> Option<&CaseError> {
        match &self.verdict {
            Verdict::Failed(error) => Some(error),
            Verdict::Passed | Verdict::Skipped(_) => None,
        }
    }
}

/// A recipe plus everything the test author wants done to it.
pub struct TestCase {
    pub name: String,
    pub recipe: PathBuf,
    pub policy: GatePolicy,
    customizations: Vec<Customization>,
    additional_objects: Vec<Object>,
}

impl TestCase {
    /// `recipe` is resolved against [`Context::recipes_dir`] unless absolute.
    pub fn new(name: impl Into<String>, recipe: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            policy: GatePolicy::new(name.clone()),
            name,
            recipe: recipe.into(),
            customizations: Vec::new(),
            additional_objects: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn customize<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Builder) -> Builder + Send + 'static,
    {
        self.customizations.push(customization(f));
        self
    }

    #[must_use]
    pub fn with_additional_objects(mut self, objects: impl IntoIterator<Item = Object>) -> Self {
        self.additional_objects.extend(objects);
        self
    }
}

/// When the primary resource counts as ready: `field`, a dotted path inside
/// its `status`, equals `expected`.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadinessCheck {
    pub field: String,
    pub expected: Value,
}

impl Default for ReadinessCheck {
    fn default() -> Self {
        Self {
            field: "health".to_owned(),
            expected: json!("green"),
        }
    }
}

impl ReadinessCheck {
    pub fn is_ready(&self, status: &Value) -> bool {
        self.field
            .split('.')
            .try_fold(status, |value, segment| value.get(segment))
            == Some(&self.expected)
    }
}

struct Progress<'a> {
    case: &'a str,
    current: Stage,
    transitions: Vec<Stage>,
}

impl<'a> Progress<'a> {
    fn new(case: &'a str) -> Self {
        Self {
            case,
            current: Stage::Init,
            transitions: vec![Stage::Init],
        }
    }

    fn to(&mut self, stage: Stage) {
        emit!(CaseStageTransition {
            case: self.case,
            from: self.current,
            to: stage,
        });
        self.current = stage;
        self.transitions.push(stage);
    }
}

/// Deletes whatever is left in `applied` if it is dropped while armed, which
/// only happens when the case future itself is dropped.
struct TeardownGuard {
    case: String,
    cluster: Arc<dyn Cluster>,
    applied: Vec<ObjectKey>,
    timeout: Duration,
    armed: bool,
}

impl TeardownGuard {
    fn disarm(&mut self) -> Vec<ObjectKey> {
        self.armed = false;
        mem::take(&mut self.applied)
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed || self.applied.is_empty() {
            return;
        }

        emit!(TeardownGuardTriggered {
            case: &self.case,
            objects: self.applied.len(),
        });
        if let Ok(handle) = Handle::try_current() {
            let cluster = Arc::clone(&self.cluster);
            let applied = mem::take(&mut self.applied);
            let timeout = self.timeout;
            handle.spawn(async move {
                teardown(cluster.as_ref(), &applied, timeout).await;
            });
        }
    }
}

/// Deletes `applied` in reverse order. Every object is attempted even if an
/// earlier one fails; deleting an object twice is harmless.
pub async fn teardown(
    cluster: &dyn Cluster,
    applied: &[ObjectKey],
    timeout: Duration,
) -> Vec<TeardownError> {
    let deadline = Instant::now() + timeout;
    let mut errors = Vec::new();
    for key in applied.iter().rev() {
        let error = match timeout_at(deadline, cluster.delete(key)).await {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => TeardownError::Delete {
                object: key.clone(),
                source,
            },
            Err(_) => TeardownError::TimedOut {
                object: key.clone(),
            },
        };
        emit!(ObjectDeleteError {
            object: &key.to_string(),
            error: &error,
        });
        errors.push(error);
    }
    errors
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

/// Runs test cases against one environment. Cheap to clone.
#[derive(Clone)]
pub struct Runner {
    context: Arc<Context>,
    cluster: Arc<dyn Cluster>,
    backend: Arc<dyn TelemetryBackend>,
    readiness: ReadinessCheck,
}

impl Runner {
    pub fn new(
        context: Context,
        cluster: Arc<dyn Cluster>,
        backend: Arc<dyn TelemetryBackend>,
    ) -> Self {
        Self {
            context: Arc::new(context),
            cluster,
            backend,
            readiness: ReadinessCheck::default(),
        }
    }

    /// A runner talking to a real cluster through `kubectl` and to the
    /// Elasticsearch cluster described by `context`.
    pub fn from_context(context: Context) -> Result<Self, BackendError> {
        let cluster = Arc::new(KubectlCluster::from_context(&context));
        let backend = Arc::new(ElasticsearchBackend::new(&context.elasticsearch)?);
        Ok(Self::new(context, cluster, backend))
    }

    #[must_use]
    pub fn with_readiness(mut self, readiness: ReadinessCheck) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Runs `case` to completion. Never panics and never returns early: the
    /// outcome, including any failure, is in the report.
    pub async fn run(&self, case: TestCase) -> CaseReport {
        let TestCase {
            name,
            recipe,
            policy,
            customizations,
            additional_objects,
        } = case;
        let started = Instant::now();
        let deadline = started + self.context.timeouts.case();
        let suffix = generate_suffix();

        let mut guard = TeardownGuard {
            case: name.clone(),
            cluster: Arc::clone(&self.cluster),
            applied: Vec::new(),
            timeout: self.context.timeouts.teardown(),
            armed: true,
        };
        let mut progress = Progress::new(&name);

        let body = Body {
            recipe,
            policy,
            customizations,
            additional_objects,
        };
        let outcome = timeout_at(
            deadline,
            std::panic::AssertUnwindSafe(self.execute(
                &mut progress,
                &mut guard.applied,
                &suffix,
                body,
            ))
            .catch_unwind(),
        )
        .await;

        let verdict = match outcome {
            Ok(Ok(Ok(None))) => Verdict::Passed,
            Ok(Ok(Ok(Some(reason)))) => Verdict::Skipped(reason),
            Ok(Ok(Err(error))) => Verdict::Failed(error),
            Ok(Err(payload)) => Verdict::Failed(CaseError::Panicked {
                stage: progress.current,
                message: panic_message(&*payload),
            }),
            Err(_) => Verdict::Failed(CaseError::CaseTimeout {
                stage: progress.current,
                timeout: self.context.timeouts.case(),
            }),
        };

        match &verdict {
            Verdict::Passed => {
                progress.to(Stage::Passed);
                emit!(CasePassed {
                    case: &name,
                    elapsed: started.elapsed(),
                });
            }
            Verdict::Skipped(reason) => {
                progress.to(Stage::Skipped);
                emit!(CaseSkipped {
                    case: &name,
                    reason,
                });
            }
            Verdict::Failed(error) => {
                let stage = progress.current.error_stage();
                progress.to(Stage::Failed);
                emit!(CaseFailed {
                    case: &name,
                    error,
                    stage,
                });
            }
        }

        // Still armed: if this future is dropped mid-teardown the guard
        // starts over in the background.
        let teardown_errors = teardown(
            self.cluster.as_ref(),
            &guard.applied,
            self.context.timeouts.teardown(),
        )
        .await;
        let applied = guard.disarm();
        progress.to(Stage::TornDown);

        let transitions = mem::take(&mut progress.transitions);
        CaseReport {
            name,
            suffix,
            verdict,
            transitions,
            applied,
            teardown_errors,
            elapsed: started.elapsed(),
        }
    }

    /// Runs every case as its own task.
    pub async fn run_all(&self, cases: Vec<TestCase>) -> Vec<CaseReport> {
        let handles = cases.into_iter().map(|case| {
            let runner = self.clone();
            let name = case.name.clone();
            let handle = tokio::spawn(async move { runner.run(case).await });
            async move {
                handle.await.unwrap_or_else(|error| CaseReport {
                    name,
                    suffix: String::new(),
                    verdict: Verdict::Failed(CaseError::Panicked {
                        stage: Stage::Init,
                        message: error.to_string(),
                    }),
                    transitions: vec![Stage::Init, Stage::Failed],
                    applied: Vec::new(),
                    teardown_errors: Vec::new(),
                    elapsed: Duration::ZERO,
                })
            }
        });
        join_all(handles).await
    }

    async fn execute(
        &self,
        progress: &mut Progress<'_>,
        applied: &mut Vec<ObjectKey>,
        suffix: &str,
        body: Body,
    ) -> Result<Option<SkipReason>, CaseError> {
        let path = self.context.recipe_path(&body.recipe);
        let builder = recipe::load(&path, &self.context.namespace, suffix).context(LoadSnafu)?;

        progress.to(Stage::GateCheck);
        let decision = gate::check(&builder.beat().spec.version, &body.policy, &self.context)
            .context(VersionSnafu)?;
        if let Decision::Skip(reason) = decision {
            return Ok(Some(reason));
        }

        let plan = builder
            .with_additional_objects(body.additional_objects)
            .apply_all(body.customizations)
            .into_plan()
            .context(PlanSnafu)?;

        progress.to(Stage::Applying);
        for object in plan.objects() {
            // Recorded before the call: if the case deadline drops this future
            // mid-apply, the object may exist and must still be torn down.
            applied.push(object.key());
            if let Err(source) = self.cluster.apply(object).await {
                let key = applied.pop().unwrap_or_else(|| object.key());
                emit!(ObjectApplyError {
                    object: &key.to_string(),
                    error: &source,
                });
                return Err(CaseError::Apply {
                    object: key,
                    source,
                });
            }
        }

        progress.to(Stage::Waiting);
        self.wait_ready(progress.case, &plan.primary.key()).await?;

        progress.to(Stage::Validating);
        let window = Instant::now() + self.context.timeouts.validation();
        let failures = evaluate_all(
            &plan.predicates,
            self.backend.as_ref(),
            window,
            self.context.timeouts.poll_interval(),
        )
        .await;
        ensure!(failures.is_empty(), ValidationSnafu { failures });

        Ok(None)
    }

    async fn wait_ready(&self, case: &str, key: &ObjectKey) -> Result<(), CaseError> {
        let timeout = self.context.timeouts.readiness();
        let deadline = Instant::now() + timeout;
        let interval = self.context.timeouts.poll_interval();
        let mut last_status = None;

        loop {
            match timeout_at(deadline, self.cluster.get_status(key)).await {
                Ok(Ok(Some(status))) if self.readiness.is_ready(&status) => return Ok(()),
                Ok(Ok(Some(status))) => last_status = Some(status.to_string()),
                Ok(Ok(None)) => {}
                Ok(Err(error)) => {
                    debug!(message = "Could not read status.", object = %key, %error);
                }
                Err(_) => {
                    debug!(message = "Status read still pending at the deadline.", object = %key);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                emit!(ReadinessTimedOut {
                    case,
                    object: &key.to_string(),
                    last_status: last_status.as_deref(),
                });
                return Err(CaseError::ReadinessTimeout {
                    object: key.clone(),
                    timeout,
                    last_status,
                });
            }
            sleep_until((now + interval).min(deadline)).await;
        }
    }
}

struct Body {
    recipe: PathBuf,
    policy: GatePolicy,
    customizations: Vec<Customization>,
    additional_objects: Vec<Object>,
}
