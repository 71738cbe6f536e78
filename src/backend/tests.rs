//! Tests for the deployment strategies and the factory.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstest::{fixture, rstest};

use super::*;
use crate::catalog::VariantConfig;
use crate::console::ConsoleSettings;
use crate::domain::VariantName;
use crate::probe::ReadinessSettings;
use crate::test_support::{
    FixedCredentials, RecordingStatus, ScriptedConsole, sample_catalog, status_reply,
};

const PUBLIC_IP: &str = "198.51.100.7";
const INSTANCE_REGION: &str = "fr-par-1";
const SERVICE_REGION: &str = "us-east-1-bue-1a";

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().push(entry.into());
}

struct FakeFirewall {
    journal: Journal,
    missing: bool,
}

impl FirewallService for FakeFirewall {
    fn create<'a>(
        &'a self,
        server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(&self.journal, "firewall.create");
            Ok(format!("fw-{server_id}"))
        })
    }

    fn delete<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            record(&self.journal, "firewall.delete");
            if self.missing {
                return Err(BackendError::not_found("firewall group"));
            }
            Ok(())
        })
    }
}

struct FakeInstances {
    journal: Journal,
    snapshots: Mutex<VecDeque<InstanceSnapshot>>,
    deleted: Mutex<bool>,
    missing: bool,
    fail_delete: bool,
}

impl FakeInstances {
    fn new(journal: Journal, snapshots: Vec<InstanceSnapshot>) -> Self {
        Self {
            journal,
            snapshots: Mutex::new(snapshots.into()),
            deleted: Mutex::new(false),
            missing: false,
            fail_delete: false,
        }
    }
}

fn snapshot(state: InstanceState, attachment: Option<&str>) -> InstanceSnapshot {
    InstanceSnapshot {
        id: String::from("inst-1"),
        state,
        attachment: attachment.map(str::to_owned),
    }
}

impl InstanceService for FakeInstances {
    fn launch<'a>(&'a self, launch: &'a InstanceLaunch) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(&self.journal, format!("instances.launch {}", launch.firewall_group));
            Ok(String::from("inst-1"))
        })
    }

    fn describe<'a>(
        &'a self,
        _instance_id: &'a str,
        _region: &'a Region,
    ) -> BoxFuture<'a, InstanceSnapshot, BackendError> {
        Box::pin(async move {
            if *self.deleted.lock() {
                return Err(BackendError::not_found("instance inst-1"));
            }
            let next = self.snapshots.lock().pop_front();
            Ok(next.unwrap_or_else(|| snapshot(InstanceState::Active, Some("vnic-1"))))
        })
    }

    fn public_ip<'a>(
        &'a self,
        attachment: &'a str,
        _region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(&self.journal, format!("instances.public_ip {attachment}"));
            Ok(String::from(PUBLIC_IP))
        })
    }

    fn find<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(&self.journal, "instances.find");
            if self.missing || *self.deleted.lock() {
                return Err(BackendError::not_found("container instance"));
            }
            Ok(String::from("inst-1"))
        })
    }

    fn delete<'a>(
        &'a self,
        _instance_id: &'a str,
        _region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            record(&self.journal, "instances.delete");
            if self.fail_delete {
                return Err(BackendError::Provider {
                    message: String::from("quota service unavailable"),
                });
            }
            *self.deleted.lock() = true;
            Ok(())
        })
    }
}

struct FakeServiceStack {
    journal: Journal,
    stable_after: Mutex<u32>,
}

impl WorkloadDefinitionService for FakeServiceStack {
    fn register<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
        variant: &'a VariantConfig,
        environment: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(
                &self.journal,
                format!(
                    "definitions.register {} rcon={}",
                    variant.image,
                    environment.get("RCON_PASSWORD").map_or("", String::as_str)
                ),
            );
            Ok(String::from("def-1"))
        })
    }

    fn deregister<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            record(&self.journal, "definitions.deregister");
            Ok(())
        })
    }
}

impl ComputeService for FakeServiceStack {
    fn launch<'a>(&'a self, launch: &'a ComputeLaunch) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(&self.journal, format!("compute.launch {}", launch.shape));
            Ok(String::from("i-123"))
        })
    }

    fn public_ip<'a>(
        &'a self,
        _instance_id: &'a str,
        _region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move { Ok(String::from(PUBLIC_IP)) })
    }

    fn terminate<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            record(&self.journal, "compute.terminate");
            Err(BackendError::not_found("compute host"))
        })
    }
}

impl WorkloadServiceManager for FakeServiceStack {
    fn create<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
        definition: &'a str,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            record(&self.journal, format!("services.create {definition}"));
            Ok(String::from("svc-1"))
        })
    }

    fn is_stable<'a>(
        &'a self,
        _service: &'a str,
        _region: &'a Region,
    ) -> BoxFuture<'a, bool, BackendError> {
        Box::pin(async move {
            let mut remaining = self.stable_after.lock();
            if *remaining == 0 {
                return Ok(true);
            }
            *remaining -= 1;
            Ok(false)
        })
    }

    fn delete<'a>(
        &'a self,
        _server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            record(&self.journal, "services.delete");
            Ok(())
        })
    }
}

struct Harness {
    toolkit: DeploymentToolkit,
    console: Arc<ScriptedConsole>,
    journal: Journal,
}

#[fixture]
fn harness() -> Harness {
    let console = Arc::new(ScriptedConsole::new());
    console.set_reply(PUBLIC_IP, Ok(status_reply(0, true)));
    let probe = HealthProbe::new(
        Arc::clone(&console) as Arc<dyn crate::console::RemoteConsole>,
        ConsoleSettings::default(),
        ReadinessSettings {
            timeout: Duration::from_secs(2),
            interval: Duration::from_millis(5),
        },
    );
    let toolkit = DeploymentToolkit {
        catalog: Arc::new(sample_catalog()),
        credentials: Arc::new(FixedCredentials::sample()),
        probe,
        registry: Arc::new(CancellationRegistry::new()),
        timings: StepTimings::uniform(Duration::from_millis(5), Duration::from_secs(2)),
    };
    Harness {
        toolkit,
        console,
        journal: Arc::new(Mutex::new(Vec::new())),
    }
}

fn context(region: &str, status: &RecordingStatus) -> DeploymentContext {
    DeploymentContext::new(
        ServerId::from("5f1e2d3c-aaaa-4bbb-8ccc-000000000001"),
        Region::from(region),
        VariantName::from("standard-competitive"),
        status.updater(),
    )
}

fn instance_backend(harness: &Harness, instances: FakeInstances) -> ContainerInstanceBackend {
    ContainerInstanceBackend::new(
        harness.toolkit.clone(),
        Arc::new(FakeFirewall {
            journal: Arc::clone(&harness.journal),
            missing: false,
        }),
        Arc::new(instances),
    )
}

fn service_backend(harness: &Harness, stable_after: u32) -> ContainerServiceBackend {
    let stack = Arc::new(FakeServiceStack {
        journal: Arc::clone(&harness.journal),
        stable_after: Mutex::new(stable_after),
    });
    ContainerServiceBackend::new(
        harness.toolkit.clone(),
        ContainerServiceClients {
            firewall: Arc::new(FakeFirewall {
                journal: Arc::clone(&harness.journal),
                missing: true,
            }),
            definitions: Arc::clone(&stack) as Arc<dyn WorkloadDefinitionService>,
            compute: Arc::clone(&stack) as Arc<dyn ComputeService>,
            services: stack,
        },
    )
}

#[rstest]
#[tokio::test]
async fn container_instance_deploys_through_five_steps(harness: Harness) {
    let instances = FakeInstances::new(
        Arc::clone(&harness.journal),
        vec![
            snapshot(InstanceState::Provisioning, None),
            snapshot(InstanceState::Provisioning, Some("vnic-1")),
            snapshot(InstanceState::Provisioning, Some("vnic-1")),
        ],
    );
    let backend = instance_backend(&harness, instances);
    let status = RecordingStatus::new();

    let deployed = backend
        .deploy(context(INSTANCE_REGION, &status))
        .await
        .expect("deployment succeeds");

    let steps: Vec<String> = status
        .messages()
        .iter()
        .filter_map(|message| message.get(..5).map(str::to_owned))
        .collect();
    assert_eq!(steps, ["[1/5]", "[2/5]", "[3/5]", "[4/5]", "[5/5]"]);
    assert_eq!(deployed.connection.host_ip, "203.0.113.10");
    assert_eq!(deployed.connection.host_port, 27_015);
    assert_eq!(deployed.connection.rcon_address, PUBLIC_IP);
    assert_eq!(deployed.connection.tv_ip, PUBLIC_IP);
    assert_eq!(deployed.connection.tv_port, DEFAULT_TV_PORT);
    assert_eq!(deployed.connection.credentials, FixedCredentials::sample().0);
    assert!(harness.toolkit.registry.is_empty());
    assert_eq!(
        harness.journal.lock().clone(),
        [
            "firewall.create",
            "instances.launch fw-5f1e2d3c-aaaa-4bbb-8ccc-000000000001",
            "instances.public_ip vnic-1",
        ]
    );
    assert!(!harness.console.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn cancelled_deployment_stops_at_first_poll(harness: Harness) {
    let instances = FakeInstances::new(Arc::clone(&harness.journal), Vec::new());
    let backend = instance_backend(&harness, instances);
    let status = RecordingStatus::new();
    let ctx = context(INSTANCE_REGION, &status);
    harness.toolkit.registry.get_or_create(ctx.server_id()).cancel();

    let err = backend.deploy(ctx).await.expect_err("deployment is cancelled");

    assert!(matches!(err, BackendError::Cancelled));
    assert_eq!(
        harness.journal.lock().clone(),
        [
            "firewall.create",
            "instances.launch fw-5f1e2d3c-aaaa-4bbb-8ccc-000000000001",
        ]
    );
    assert!(harness.console.calls().is_empty());
}

/// Status updater that cancels the deployment once `trigger` is reported.
fn cancel_on(
    shared: &Arc<CancellationRegistry>,
    target: &ServerId,
    trigger: &'static str,
) -> crate::domain::StatusUpdater {
    let registry = Arc::clone(shared);
    let server_id = target.clone();
    Arc::new(move |message: String| -> crate::future::UnitFuture<'static> {
        if message.starts_with(trigger) {
            assert!(registry.cancel(&server_id), "token should be registered");
        }
        Box::pin(async {})
    })
}

#[rstest]
#[tokio::test]
async fn cancellation_between_instance_steps_stops_the_deployment(harness: Harness) {
    let instances = FakeInstances::new(Arc::clone(&harness.journal), Vec::new());
    let backend = instance_backend(&harness, instances);
    let server_id = ServerId::from("5f1e2d3c-aaaa-4bbb-8ccc-000000000002");
    let ctx = DeploymentContext::new(
        server_id.clone(),
        Region::from(INSTANCE_REGION),
        VariantName::from("standard-competitive"),
        cancel_on(&harness.toolkit.registry, &server_id, "[2/5]"),
    );

    let err = backend.deploy(ctx).await.expect_err("deploy honours the cancellation");

    assert!(matches!(err, BackendError::Cancelled));
    assert!(harness.toolkit.registry.is_empty());
    assert!(harness.console.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn cancellation_between_service_steps_stops_the_deployment(harness: Harness) {
    let backend = service_backend(&harness, 0);
    let server_id = ServerId::from("5f1e2d3c-aaaa-4bbb-8ccc-000000000003");
    let ctx = DeploymentContext::new(
        server_id.clone(),
        Region::from(SERVICE_REGION),
        VariantName::from("standard-competitive"),
        cancel_on(&harness.toolkit.registry, &server_id, "[3/7]"),
    );

    let err = backend.deploy(ctx).await.expect_err("deploy honours the cancellation");

    assert!(matches!(err, BackendError::Cancelled));
    assert!(harness.console.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn unknown_variant_is_a_configuration_error(harness: Harness) {
    let instances = FakeInstances::new(Arc::clone(&harness.journal), Vec::new());
    let backend = instance_backend(&harness, instances);
    let status = RecordingStatus::new();
    let ctx = DeploymentContext::new(
        ServerId::generate(),
        Region::from(INSTANCE_REGION),
        VariantName::from("does-not-exist"),
        status.updater(),
    );

    let err = backend.deploy(ctx).await.expect_err("variant is unknown");
    assert!(matches!(err, BackendError::Configuration { .. }));
    assert!(harness.journal.lock().is_empty());
}

#[rstest]
#[tokio::test]
async fn container_instance_delete_is_idempotent(harness: Harness) {
    let instances = FakeInstances::new(Arc::clone(&harness.journal), Vec::new());
    let backend = instance_backend(&harness, instances);
    let id = ServerId::from("srv-1");
    let region = Region::from(INSTANCE_REGION);

    backend.delete(&id, &region).await.expect("first delete");
    backend.delete(&id, &region).await.expect("second delete");

    assert_eq!(
        harness.journal.lock().clone(),
        [
            "instances.find",
            "instances.delete",
            "firewall.delete",
            "instances.find",
            "firewall.delete",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn container_instance_delete_propagates_provider_errors(harness: Harness) {
    let mut instances = FakeInstances::new(Arc::clone(&harness.journal), Vec::new());
    instances.fail_delete = true;
    let backend = instance_backend(&harness, instances);

    let err = backend
        .delete(&ServerId::from("srv-1"), &Region::from(INSTANCE_REGION))
        .await
        .expect_err("provider failure propagates");

    assert!(matches!(err, BackendError::Provider { .. }));
    assert!(!harness.journal.lock().contains(&String::from("firewall.delete")));
}

#[rstest]
#[tokio::test]
async fn container_service_deploys_through_seven_steps(harness: Harness) {
    let backend = service_backend(&harness, 2);
    let status = RecordingStatus::new();

    let deployed = backend
        .deploy(context(SERVICE_REGION, &status))
        .await
        .expect("deployment succeeds");

    let messages = status.messages();
    assert_eq!(messages.len(), 7);
    for (index, message) in messages.iter().enumerate() {
        assert!(
            message.starts_with(&format!("[{}/7]", index + 1)),
            "unexpected step message {message}"
        );
    }
    assert_eq!(deployed.region, Region::from(SERVICE_REGION));
    assert_eq!(
        harness.journal.lock().clone(),
        [
            "firewall.create",
            "definitions.register registry.example/quickserver:latest rcon=rcon-secret",
            "compute.launch DEV1-M",
            "services.create def-1",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn deployment_uses_the_guild_variant_override(mut harness: Harness) {
    harness.toolkit.catalog = Arc::new(sample_catalog().with_guild_variant(
        "guild-7",
        "standard-competitive",
        crate::catalog::GuildVariant {
            image: Some(String::from("registry.example/guild-7:stable")),
            ..Default::default()
        },
    ));
    let backend = service_backend(&harness, 0);
    let status = RecordingStatus::new();
    let ctx = context(SERVICE_REGION, &status).with_guild_id(Some(String::from("guild-7")));

    backend.deploy(ctx).await.expect("deployment succeeds");

    assert_eq!(
        harness.journal.lock().get(1).map(String::as_str),
        Some("definitions.register registry.example/guild-7:stable rcon=rcon-secret")
    );
}

#[rstest]
#[tokio::test]
async fn container_service_deletes_in_reverse_dependency_order(harness: Harness) {
    let backend = service_backend(&harness, 0);

    backend
        .delete(&ServerId::from("srv-1"), &Region::from(SERVICE_REGION))
        .await
        .expect("missing resources count as deleted");

    assert_eq!(
        harness.journal.lock().clone(),
        [
            "services.delete",
            "compute.terminate",
            "definitions.deregister",
            "firewall.delete",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn factory_dispatches_by_region_backend(harness: Harness) {
    let instances = FakeInstances::new(Arc::clone(&harness.journal), Vec::new());
    let factory = OrchestratorFactory::new(Arc::clone(&harness.toolkit.catalog)).with_strategy(
        BackendKind::ContainerInstance,
        Arc::new(instance_backend(&harness, instances)),
    );

    factory
        .delete(&ServerId::from("srv-1"), &Region::from(INSTANCE_REGION))
        .await
        .expect("dispatches to the instance strategy");
    assert_eq!(
        harness.journal.lock().first().map(String::as_str),
        Some("instances.find")
    );

    let unregistered = factory
        .for_region(&Region::from(SERVICE_REGION))
        .err()
        .expect("no strategy for container-service");
    assert!(matches!(unregistered, BackendError::Configuration { .. }));

    let unknown = factory
        .for_region(&Region::from("mars-1"))
        .err()
        .expect("unknown region");
    assert!(matches!(unknown, BackendError::Configuration { .. }));
}
