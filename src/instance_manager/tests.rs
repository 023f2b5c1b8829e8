// ============================================================================
// File: src/instance_manager/tests.rs
// ----------------------------------------------------------------------------
// Instance manager tests against a scripted in-memory driver.
// ============================================================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backends::InstanceDriver;
use crate::error::{LifecycleError, LifecycleResult};
use crate::status::{AccessAddress, Phase, Status};
use crate::template::{BackendKind, Template};

use super::InstanceManager;

/// In-memory driver enforcing the lifecycle state machine.
#[derive(Debug, Default)]
struct ScriptedDriver {
    state: Arc<Mutex<ScriptedState>>,
}

#[derive(Debug)]
struct ScriptedState {
    bound: Option<String>,
    id: Option<String>,
    phase: Phase,
    created_count: u32,
    injected: Option<String>,

    /// Force the next start to fail with a backend error.
    fail_start: bool,

    /// Status polls that report Transitional after a start before the
    /// instance settles into Running.
    settle_polls: u32,
}

impl Default for ScriptedState {
    fn default() -> Self {
        Self {
            bound: None,
            id: None,
            phase: Phase::Absent,
            created_count: 0,
            injected: None,
            fail_start: false,
            settle_polls: 0,
        }
    }
}

impl ScriptedDriver {
    fn new() -> Self {
        Self::default()
    }

    fn with_state(state: Arc<Mutex<ScriptedState>>) -> Self {
        Self { state }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptedState> {
        self.state.lock().expect("scripted state poisoned")
    }

    fn instance_name(state: &ScriptedState) -> String {
        state.bound.clone().unwrap_or_default()
    }
}

#[async_trait]
impl InstanceDriver for ScriptedDriver {
    fn bind(&mut self, template: &Template) -> LifecycleResult<()> {
        self.lock().bound = Some(template.name.clone());
        Ok(())
    }

    async fn status(&self) -> LifecycleResult<Status> {
        let mut state = self.lock();
        match &state.id {
            None => Ok(Status::absent()),
            Some(id) => {
                let id = id.clone();
                if state.phase == Phase::Running && state.settle_polls > 0 {
                    state.settle_polls -= 1;
                    return Ok(Status::existing(Phase::Transitional, id));
                }
                Ok(Status::existing(state.phase, id))
            }
        }
    }

    async fn create(&self) -> LifecycleResult<()> {
        let mut state = self.lock();
        state.created_count += 1;
        state.id = Some(format!("scripted-{}", state.created_count));
        state.phase = Phase::Stopped;
        Ok(())
    }

    async fn start(&self) -> LifecycleResult<()> {
        let mut state = self.lock();
        if state.fail_start {
            return Err(LifecycleError::backend_unavailable(
                "scripted",
                "start scripted to fail",
            ));
        }
        if state.id.is_none() || state.phase != Phase::Stopped {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                instance: Self::instance_name(&state),
                phase: if state.id.is_none() {
                    Phase::Absent
                } else {
                    state.phase
                },
            });
        }
        state.phase = Phase::Running;
        Ok(())
    }

    async fn stop(&self) -> LifecycleResult<()> {
        let mut state = self.lock();
        if state.id.is_none() || state.phase != Phase::Running {
            return Err(LifecycleError::InvalidState {
                operation: "stop",
                instance: Self::instance_name(&state),
                phase: if state.id.is_none() {
                    Phase::Absent
                } else {
                    state.phase
                },
            });
        }
        state.phase = Phase::Stopped;
        Ok(())
    }

    async fn reboot(&self) -> LifecycleResult<()> {
        let mut state = self.lock();
        if state.id.is_none() {
            return Err(LifecycleError::InvalidIdentity {
                operation: "reboot",
                instance: Self::instance_name(&state),
            });
        }
        state.phase = Phase::Running;
        Ok(())
    }

    async fn destroy(&self) -> LifecycleResult<()> {
        let mut state = self.lock();
        if state.id.is_none() {
            return Err(LifecycleError::InvalidIdentity {
                operation: "destroy",
                instance: Self::instance_name(&state),
            });
        }
        state.id = None;
        state.phase = Phase::Absent;
        Ok(())
    }

    async fn inject_access_credential(&self, credential: &str) -> LifecycleResult<()> {
        let mut state = self.lock();
        if state.phase != Phase::Running {
            return Err(LifecycleError::InvalidState {
                operation: "inject credential into",
                instance: Self::instance_name(&state),
                phase: if state.id.is_none() {
                    Phase::Absent
                } else {
                    state.phase
                },
            });
        }
        state.injected = Some(credential.to_string());
        Ok(())
    }

    fn access_address(&self) -> LifecycleResult<AccessAddress> {
        Ok(AccessAddress {
            host: "127.0.0.1".to_string(),
            port: 32022,
        })
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Container
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn template() -> Template {
    Template::new("node-1", "alpine:3.18", BackendKind::Container)
}

fn manager_with_state() -> (InstanceManager, Arc<Mutex<ScriptedState>>) {
    init_logging();
    let state = Arc::new(Mutex::new(ScriptedState::default()));
    let driver = Box::new(ScriptedDriver::with_state(Arc::clone(&state)));
    let manager = InstanceManager::bind(template(), driver)
        .expect("bind should succeed")
        .with_readiness(Duration::from_millis(5), Duration::from_millis(200));
    (manager, state)
}

#[tokio::test]
async fn full_lifecycle_round_trip() {
    let (manager, _) = manager_with_state();

    assert_eq!(manager.status().await.expect("status").phase, Phase::Absent);

    manager.create().await.expect("create");
    let created = manager.status().await.expect("status after create");
    assert_eq!(created.phase, Phase::Stopped);
    assert!(created.exists());

    manager.start().await.expect("start");
    assert!(manager.status().await.expect("status").is_running());

    manager.stop().await.expect("stop");
    assert_eq!(
        manager.status().await.expect("status").phase,
        Phase::Stopped
    );

    manager.destroy().await.expect("destroy");
    let gone = manager.status().await.expect("status after destroy");
    assert_eq!(gone.phase, Phase::Absent);
    assert!(!gone.exists());
}

#[tokio::test]
async fn rejects_template_that_fails_validation() {
    let bad = Template::new("node 1", "alpine:3.18", BackendKind::Container);
    let result = InstanceManager::bind(bad, Box::new(ScriptedDriver::new()));
    assert!(result.is_err());
}

#[tokio::test]
async fn start_before_create_is_invalid_state() {
    let (manager, _) = manager_with_state();

    let result = manager.start().await;
    assert!(matches!(
        result,
        Err(LifecycleError::InvalidState {
            phase: Phase::Absent,
            ..
        })
    ));
}

#[tokio::test]
async fn double_stop_is_invalid_state() {
    let (manager, _) = manager_with_state();
    manager.provision().await.expect("provision");

    manager.stop().await.expect("first stop");
    let result = manager.stop().await;
    assert!(matches!(
        result,
        Err(LifecycleError::InvalidState {
            phase: Phase::Stopped,
            ..
        })
    ));
}

#[tokio::test]
async fn create_replaces_existing_instance() {
    let (manager, state) = manager_with_state();

    manager.create().await.expect("first create");
    let first = manager.status().await.expect("status").id;

    manager.create().await.expect("second create");
    let second = manager.status().await.expect("status").id;

    assert_ne!(first, second);
    assert_eq!(state.lock().expect("state").created_count, 2);
}

#[tokio::test]
async fn provision_leaves_instance_created_when_start_fails() {
    let (manager, state) = manager_with_state();
    state.lock().expect("state").fail_start = true;

    let result = manager.provision().await;
    assert!(matches!(
        result,
        Err(LifecycleError::BackendUnavailable { .. })
    ));

    // The created instance is not rolled back.
    let status = manager.status().await.expect("status");
    assert_eq!(status.phase, Phase::Stopped);
    assert!(status.exists());
}

#[tokio::test]
async fn provision_and_grant_access_waits_for_running() {
    let (manager, state) = manager_with_state();
    state.lock().expect("state").settle_polls = 3;

    manager
        .provision_and_grant_access("ssh-ed25519 AAA test")
        .await
        .expect("provisioning should succeed");

    let state = state.lock().expect("state");
    assert_eq!(state.phase, Phase::Running);
    assert_eq!(state.injected.as_deref(), Some("ssh-ed25519 AAA test"));
}

#[tokio::test]
async fn wait_until_running_times_out() {
    let (manager, state) = manager_with_state();
    manager.provision().await.expect("provision");
    state.lock().expect("state").settle_polls = u32::MAX;

    let result = manager.wait_until_running().await;
    assert!(matches!(
        result,
        Err(LifecycleError::ProvisioningTimeout { .. })
    ));
}

#[tokio::test]
async fn inject_requires_running_instance() {
    let (manager, _) = manager_with_state();
    manager.create().await.expect("create");

    let result = manager.inject_access_credential("ssh-ed25519 AAA test").await;
    assert!(matches!(
        result,
        Err(LifecycleError::InvalidState {
            phase: Phase::Stopped,
            ..
        })
    ));
}

#[tokio::test]
async fn reboot_and_destroy_require_identity() {
    let (manager, _) = manager_with_state();

    assert!(matches!(
        manager.reboot().await,
        Err(LifecycleError::InvalidIdentity { .. })
    ));
    assert!(matches!(
        manager.destroy().await,
        Err(LifecycleError::InvalidIdentity { .. })
    ));
}

#[tokio::test]
async fn reboot_preserves_identity() {
    let (manager, _) = manager_with_state();
    manager.provision().await.expect("provision");
    let before = manager.status().await.expect("status").id;

    manager.reboot().await.expect("reboot");
    let after = manager.status().await.expect("status");

    assert_eq!(after.id, before);
    assert!(after.is_running());
}

#[tokio::test]
async fn queries_expose_template_and_address() {
    let (manager, _) = manager_with_state();

    assert_eq!(manager.template().name, "node-1");
    assert_eq!(manager.backend_kind(), BackendKind::Container);

    let address = manager.access_address().expect("address");
    assert_eq!(address.to_string(), "127.0.0.1:32022");
}
