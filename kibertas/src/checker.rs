//! Common skeleton of every add-on check.
//!
//! A check creates its resources, waits for the add-on to converge and always cleans up,
//! no matter how it ended. [CheckRunner] drives a [Checker] through those phases.
pub mod run_context;
pub mod state;
pub mod watcher;

use crate::config::ConfigError;
use crate::k8s::error::K8sError;
use crate::lifecycle::ResourceLifecycle;
use crate::lifecycle::error::{AggregatedError, LifecycleError};
use crate::poller::PollError;
use run_context::RunContext;
use state::{CheckState, InvalidTransition, StateMachine};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{error, info_span, warn};
use watcher::CancellationWatcher;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("{context}: {err}")]
    Wait {
        context: String,
        #[source]
        err: PollError,
    },
    #[error("{context}: {err}")]
    K8s {
        context: String,
        #[source]
        err: K8sError,
    },
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    State(#[from] InvalidTransition),
}

impl CheckError {
    pub fn wait(context: impl Into<String>, err: PollError) -> Self {
        CheckError::Wait {
            context: context.into(),
            err,
        }
    }

    pub fn k8s(context: impl Into<String>, err: K8sError) -> Self {
        CheckError::K8s {
            context: context.into(),
            err,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            CheckError::Wait { err, .. } => err.is_cancelled(),
            CheckError::Lifecycle(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

/// Add-on specific part of a check.
pub trait Checker {
    fn name(&self) -> &str;

    /// Creates the objects the check needs, registering them in the lifecycle.
    fn create_resources(
        &mut self,
        _ctx: &RunContext,
        _lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        Ok(())
    }

    /// Waits until the add-on shows the expected behavior.
    fn converge(&mut self, ctx: &RunContext, lifecycle: &ResourceLifecycle)
    -> Result<(), CheckError>;
}

/// Outcome of a check run.
#[derive(Debug)]
pub struct CheckReport {
    pub history: Vec<CheckState>,
    pub result: Result<(), CheckError>,
    /// Teardown failures, they are reported but do not change the result.
    pub cleanup_error: Option<AggregatedError>,
}

impl CheckReport {
    pub fn state(&self) -> CheckState {
        self.history
            .last()
            .copied()
            .unwrap_or(CheckState::Initialized)
    }

    pub fn into_result(self) -> Result<(), CheckError> {
        self.result
    }
}

/// Deletes the registered resources when dropped, unless [CleanupGuard::finish] already did.
struct CleanupGuard<'a> {
    lifecycle: Option<&'a ResourceLifecycle>,
}

impl<'a> CleanupGuard<'a> {
    fn new(lifecycle: &'a ResourceLifecycle) -> Self {
        Self {
            lifecycle: Some(lifecycle),
        }
    }

    fn finish(mut self) -> Result<(), AggregatedError> {
        self.lifecycle
            .take()
            .map_or(Ok(()), ResourceLifecycle::delete_all)
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.take() {
            warn!("Check stopped unexpectedly, cleaning up resources");
            if let Err(err) = lifecycle.delete_all() {
                error!("Error Delete Resources: {err}");
            }
        }
    }
}

pub struct CheckRunner {
    ctx: RunContext,
    lifecycle: Arc<ResourceLifecycle>,
    watcher: Option<JoinHandle<()>>,
}

impl CheckRunner {
    pub fn new(ctx: RunContext, lifecycle: Arc<ResourceLifecycle>) -> Self {
        Self {
            ctx,
            lifecycle,
            watcher: None,
        }
    }

    /// Tears the workspace down as soon as the run is cancelled, then calls `on_exit`.
    pub fn with_cancellation_watcher<E>(self, on_exit: E) -> Self
    where
        E: FnOnce() + Send + 'static,
    {
        let watcher = CancellationWatcher::spawn(
            self.ctx.cancellation().clone(),
            self.lifecycle.clone(),
            self.ctx.notifications().clone(),
            on_exit,
        )
        // Without the watcher an interrupt is still cleaned up by the run itself.
        .inspect_err(|err| warn!("Could not start the cancellation watcher: {err}"))
        .ok();
        Self { watcher, ..self }
    }

    /// Runs the check through all its phases. Resources are cleaned up exactly once and the
    /// notifications are flushed at the end.
    pub fn run(self, checker: &mut dyn Checker) -> CheckReport {
        let name = checker.name().to_string();
        let span = info_span!("check", checker = %name, namespace = %self.ctx.workspace());
        let _enter = span.enter();

        let mut machine = StateMachine::default();
        self.ctx.notify(format!("{name} check start"));

        let guard = CleanupGuard::new(&self.lifecycle);
        let result = self.execute(checker, &mut machine);

        Self::advance(&mut machine, CheckState::CleaningUp);
        let cleanup_error = match guard.finish() {
            Ok(()) => {
                if self.ctx.debug() && !self.lifecycle.is_empty() {
                    self.ctx.notify("Skip Delete Resources");
                }
                None
            }
            Err(err) => {
                self.ctx.notify(format!("Error Delete Resources: {err}"));
                Some(err)
            }
        };

        match &result {
            Ok(()) => {
                Self::advance(&mut machine, CheckState::Succeeded);
                self.ctx.notify(format!("{name} check finished"));
            }
            Err(err) => {
                Self::advance(&mut machine, CheckState::Failed);
                error!("{name} check failed: {err}");
                self.ctx
                    .notifications()
                    .add_message(format!("{name} check failed: {err}"));
            }
        }

        match self.watcher {
            // The watcher owns the flush of an interrupted run.
            Some(watcher) if self.ctx.cancellation().is_cancelled() => {
                if watcher.join().is_err() {
                    error!("cancellation watcher panicked");
                }
            }
            _ => self.ctx.notifications().send(),
        }

        CheckReport {
            history: machine.history().to_vec(),
            result,
            cleanup_error,
        }
    }

    fn execute(
        &self,
        checker: &mut dyn Checker,
        machine: &mut StateMachine,
    ) -> Result<(), CheckError> {
        machine.transition(CheckState::ResourcesCreating)?;
        checker.create_resources(&self.ctx, &self.lifecycle)?;
        machine.transition(CheckState::Converging)?;
        checker.converge(&self.ctx, &self.lifecycle)
    }

    fn advance(machine: &mut StateMachine, next: CheckState) {
        if let Err(err) = machine.transition(next) {
            error!("{err}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RunSettings;
    use crate::event::cancellation::CancellationToken;
    use crate::k8s::client::{CreateOutcome, DeleteOutcome, MockSyncK8sClient};
    use crate::k8s::objects::{dynamic_object, service_type_meta};
    use crate::lifecycle::resource::ResourceSpec;
    use crate::lifecycle::tests::api_error;
    use crate::notify::{MockNotificationTransport, NotificationBuffer};
    use assert_matches::assert_matches;
    use mockall::predicate;
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) fn run_context(debug: bool, notifications: NotificationBuffer) -> RunContext {
        RunContext::new(
            "test-20240101-abcde".to_string(),
            RunSettings {
                debug,
                timeout: Duration::from_secs(60),
                cluster_name: "cwtest".to_string(),
            },
            CancellationToken::new(),
            Arc::new(notifications),
        )
    }

    /// Transport that records every sent message.
    pub(crate) fn recording_transport() -> (MockNotificationTransport, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut transport = MockNotificationTransport::new();
        let recorded = sent.clone();
        transport.expect_send().returning(move |message| {
            recorded.lock().unwrap().push(message.to_string());
            Ok(())
        });
        (transport, sent)
    }

    enum Behavior {
        Succeed,
        FailCreation,
        FailConvergence,
        Panic,
    }

    struct FakeChecker {
        behavior: Behavior,
        resources: Vec<&'static str>,
    }

    impl Checker for FakeChecker {
        fn name(&self) -> &str {
            "fake"
        }

        fn create_resources(
            &mut self,
            ctx: &RunContext,
            lifecycle: &ResourceLifecycle,
        ) -> Result<(), CheckError> {
            lifecycle.create_namespace(ctx.cancellation())?;
            for name in &self.resources {
                lifecycle.create(
                    ResourceSpec::new(dynamic_object(
                        service_type_meta(),
                        name,
                        ctx.workspace(),
                        serde_json::json!({}),
                    )),
                    ctx.cancellation(),
                )?;
            }
            match self.behavior {
                Behavior::FailCreation => Err(CheckError::Failed("creation failed".to_string())),
                _ => Ok(()),
            }
        }

        fn converge(
            &mut self,
            _ctx: &RunContext,
            _lifecycle: &ResourceLifecycle,
        ) -> Result<(), CheckError> {
            match self.behavior {
                Behavior::FailConvergence => Err(CheckError::wait(
                    "error waiting for the add-on",
                    PollError::Timeout(Duration::from_secs(1)),
                )),
                Behavior::Panic => panic!("unexpected"),
                _ => Ok(()),
            }
        }
    }

    fn lifecycle(client: MockSyncK8sClient, ctx: &RunContext) -> Arc<ResourceLifecycle> {
        Arc::new(ResourceLifecycle::new(
            Arc::new(client),
            ctx.workspace().to_string(),
            ctx.debug(),
        ))
    }

    fn client_expecting_deletes(deletes: usize) -> MockSyncK8sClient {
        let mut client = MockSyncK8sClient::new();
        client
            .expect_create_dynamic_object()
            .returning(|_| Ok(CreateOutcome::Created));
        client
            .expect_delete_dynamic_object()
            .times(deletes)
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));
        client
    }

    #[test]
    fn test_successful_check() {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let lifecycle = lifecycle(client_expecting_deletes(3), &ctx);

        let mut checker = FakeChecker {
            behavior: Behavior::Succeed,
            resources: vec!["a", "b"],
        };
        let report = CheckRunner::new(ctx, lifecycle.clone()).run(&mut checker);

        assert_eq!(
            report.history,
            vec![
                CheckState::Initialized,
                CheckState::ResourcesCreating,
                CheckState::Converging,
                CheckState::CleaningUp,
                CheckState::Succeeded
            ]
        );
        assert!(report.cleanup_error.is_none());
        assert!(lifecycle.is_empty());

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("fake check start"));
        assert!(sent[0].contains("fake check finished"));
    }

    #[test]
    fn test_failed_creation_skips_convergence_and_cleans_up() {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let lifecycle = lifecycle(client_expecting_deletes(2), &ctx);

        let mut checker = FakeChecker {
            behavior: Behavior::FailCreation,
            resources: vec!["a"],
        };
        let report = CheckRunner::new(ctx, lifecycle).run(&mut checker);

        assert_eq!(report.state(), CheckState::Failed);
        assert!(!report.history.contains(&CheckState::Converging));
        assert_matches!(report.into_result(), Err(CheckError::Failed(_)));
        assert!(sent.lock().unwrap()[0].contains("fake check failed: creation failed"));
    }

    #[test]
    fn test_failed_convergence() {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let lifecycle = lifecycle(client_expecting_deletes(2), &ctx);

        let mut checker = FakeChecker {
            behavior: Behavior::FailConvergence,
            resources: vec!["a"],
        };
        let report = CheckRunner::new(ctx, lifecycle).run(&mut checker);

        assert_eq!(report.state(), CheckState::Failed);
        assert!(report.history.contains(&CheckState::Converging));
        let err = report.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "error waiting for the add-on: timed out after 1s"
        );
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_errors_are_reported() {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let mut client = MockSyncK8sClient::new();
        client
            .expect_create_dynamic_object()
            .returning(|_| Ok(CreateOutcome::Created));
        client
            .expect_delete_dynamic_object()
            .with(
                predicate::always(),
                predicate::eq("a"),
                predicate::always(),
            )
            .returning(|_, _, _| Err(api_error(500)));
        client
            .expect_delete_dynamic_object()
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));
        let lifecycle = lifecycle(client, &ctx);

        let mut checker = FakeChecker {
            behavior: Behavior::Succeed,
            resources: vec!["a"],
        };
        let report = CheckRunner::new(ctx, lifecycle).run(&mut checker);

        assert_eq!(report.state(), CheckState::Succeeded);
        assert_eq!(report.cleanup_error.unwrap().len(), 1);
        assert!(sent.lock().unwrap()[0].contains("Error Delete Resources: 1 error(s) occurred"));
    }

    #[test]
    fn test_debug_mode_keeps_resources() {
        let (transport, sent) = recording_transport();
        let ctx = run_context(true, NotificationBuffer::new(Box::new(transport)));
        let lifecycle = lifecycle(client_expecting_deletes(0), &ctx);

        let mut checker = FakeChecker {
            behavior: Behavior::Succeed,
            resources: vec!["a", "b"],
        };
        let report = CheckRunner::new(ctx, lifecycle.clone()).run(&mut checker);

        assert_eq!(report.state(), CheckState::Succeeded);
        assert_eq!(lifecycle.managed().len(), 2);
        assert!(sent.lock().unwrap()[0].contains("Skip Delete Resources"));
    }

    #[test]
    fn test_cleanup_runs_when_the_check_panics() {
        let ctx = run_context(false, NotificationBuffer::log_only());
        let lifecycle = lifecycle(client_expecting_deletes(2), &ctx);

        let runner_lifecycle = lifecycle.clone();
        let result = std::thread::spawn(move || {
            let mut checker = FakeChecker {
                behavior: Behavior::Panic,
                resources: vec!["a"],
            };
            CheckRunner::new(ctx, runner_lifecycle).run(&mut checker)
        })
        .join();

        assert!(result.is_err());
        assert!(lifecycle.is_empty());
    }

    #[test]
    fn test_cancelled_run_is_flushed_once_by_the_watcher() {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let lifecycle = lifecycle(client_expecting_deletes(2), &ctx);

        struct CancelledChecker;
        impl Checker for CancelledChecker {
            fn name(&self) -> &str {
                "cancelled"
            }
            fn create_resources(
                &mut self,
                ctx: &RunContext,
                lifecycle: &ResourceLifecycle,
            ) -> Result<(), CheckError> {
                lifecycle.create_namespace(ctx.cancellation())?;
                lifecycle.create(
                    ResourceSpec::new(dynamic_object(
                        service_type_meta(),
                        "a",
                        ctx.workspace(),
                        serde_json::json!({}),
                    )),
                    ctx.cancellation(),
                )?;
                Ok(())
            }
            fn converge(
                &mut self,
                ctx: &RunContext,
                _lifecycle: &ResourceLifecycle,
            ) -> Result<(), CheckError> {
                ctx.cancellation().cancel();
                Err(CheckError::wait("error waiting", PollError::Cancelled))
            }
        }

        let exited = Arc::new(Mutex::new(false));
        let exit_flag = exited.clone();
        let report = CheckRunner::new(ctx, lifecycle.clone())
            .with_cancellation_watcher(move || *exit_flag.lock().unwrap() = true)
            .run(&mut CancelledChecker);

        assert!(report.result.as_ref().unwrap_err().is_cancelled());
        assert!(*exited.lock().unwrap());
        assert!(lifecycle.is_empty());
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Interrupted, cleaning up resources"));
    }
}
