use crate::event::cancellation::CancellationToken;
use crate::lifecycle::ResourceLifecycle;
use crate::notify::NotificationBuffer;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

/// Exit code of a run stopped by an interrupt signal.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Tears down a check workspace when the run is cancelled.
///
/// The watcher does not wait for the check to reach a safe point: it deletes whatever is
/// registered, flushes the notifications and runs the exit hook.
pub struct CancellationWatcher;

const WATCHER_THREAD_NAME: &str = "cancellation-watcher";

impl CancellationWatcher {
    pub fn spawn<E>(
        token: CancellationToken,
        lifecycle: Arc<ResourceLifecycle>,
        notifications: Arc<NotificationBuffer>,
        on_exit: E,
    ) -> std::io::Result<JoinHandle<()>>
    where
        E: FnOnce() + Send + 'static,
    {
        thread::Builder::new().name(WATCHER_THREAD_NAME.to_string()).spawn(move || {
            token.wait();
            warn!("Interrupted, cleaning up resources");
            notifications.add_message("Interrupted, cleaning up resources");
            if let Err(err) = lifecycle.delete_all() {
                error!("Error Delete Resources: {err}");
                notifications.add_message(format!("Error Delete Resources: {err}"));
            }
            notifications.send();
            on_exit();
        })
    }
}

/// Exit hook used by the binary.
pub fn exit_interrupted() {
    std::process::exit(INTERRUPTED_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::client::{CreateOutcome, DeleteOutcome, MockSyncK8sClient};
    use crate::k8s::objects::{dynamic_object, service_type_meta};
    use crate::lifecycle::resource::ResourceSpec;
    use crate::notify::MockNotificationTransport;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_cancellation_cleans_up_and_notifies() {
        let mut client = MockSyncK8sClient::new();
        client
            .expect_create_dynamic_object()
            .returning(|_| Ok(CreateOutcome::Created));
        client
            .expect_delete_dynamic_object()
            .times(2)
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));
        let lifecycle = Arc::new(ResourceLifecycle::new(
            Arc::new(client),
            "ingress-test".to_string(),
            false,
        ));
        lifecycle.create_namespace(&CancellationToken::new()).unwrap();
        lifecycle
            .create(
                ResourceSpec::new(dynamic_object(
                    service_type_meta(),
                    "sample",
                    "ingress-test",
                    serde_json::json!({}),
                )),
                &CancellationToken::new(),
            )
            .unwrap();

        let mut transport = MockNotificationTransport::new();
        transport
            .expect_send()
            .withf(|message| message.contains("Interrupted, cleaning up resources"))
            .once()
            .returning(|_| Ok(()));
        let notifications = Arc::new(NotificationBuffer::new(Box::new(transport)));

        let exited = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let handle = {
            let exited = exited.clone();
            CancellationWatcher::spawn(token.clone(), lifecycle.clone(), notifications, move || {
                exited.store(true, Ordering::SeqCst)
            })
            .unwrap()
        };

        assert!(!exited.load(Ordering::SeqCst));
        token.cancel();
        handle.join().unwrap();

        assert!(exited.load(Ordering::SeqCst));
        assert!(lifecycle.is_empty());
    }
}
