//! Test support utilities shared across unit and integration tests.
//!
//! Every collaborator the fleet engine consumes through a trait has an
//! in-memory double here. Doubles record what they were asked to do and can
//! be scripted to fail, so tests assert on observable effects instead of
//! mocking call sequences.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::backend::{BackendError, DeploymentOrchestrator};
use crate::cancel::CancellationRegistry;
use crate::catalog::{BackendKind, Catalog, RegionConfig, VariantConfig};
use crate::console::{Broadcaster, ConsoleError, ConsoleSettings, RemoteConsole};
use crate::domain::{
    CredentialGenerator, DeployedServer, DeploymentContext, PlayerIdentity, Region, Server,
    ServerActivity, ServerConnection, ServerCredentials, ServerId, ServerStatus, StatusUpdater,
    VariantName,
};
use crate::future::{BoxFuture, UnitFuture};
use crate::lifecycle::{LifecycleDeps, ServerLifecycle};
use crate::policy::PolicyDeps;
use crate::probe::{HealthProbe, ReadinessSettings};
use crate::queue::{BackgroundTaskQueue, DELETE_SERVER_TASK, DeleteServerProcessor};
use crate::repository::{
    AuditEvent, AuditLog, BanRepository, BanStatus, CreditsRepository, FleetStore,
    NotificationError, Notifier, RepositoryError, ServerStatusMetric,
    ServerStatusMetricsRepository, StoreTransaction, TenantRepository, UserRepository,
};

/// Address every [`FakeOrchestrator`] deployment reports.
pub const FAKE_PUBLIC_IP: &str = "203.0.113.10";

/// Builds a status reply in the shape game servers print.
#[must_use]
pub fn status_reply(players: u32, with_tv: bool) -> String {
    let mut reply = String::from(
        "hostname: QuickServer\n\
         version : 9543365/24 9543365 secure\n\
         udp/ip  : 203.0.113.10:27015  (local: 0.0.0.0:27015)\n\
         map     : cp_process_final at: 0 x, 0 y, 0 z\n",
    );
    if with_tv {
        reply.push_str("sourcetv:  203.0.113.10:27020, delay 30.0s  (local: 0.0.0.0:27020)\n");
    }
    reply.push_str(&format!(
        "players : {players} humans, 0 bots (24 max)\nedicts  : 426 used of 2048 max\n"
    ));
    reply
}

/// Catalog with one variant and one region per backend kind.
#[must_use]
pub fn sample_catalog() -> Catalog {
    Catalog::new()
        .with_variant(
            "standard-competitive",
            VariantConfig {
                image: String::from("registry.example/quickserver:latest"),
                shape: String::from("DEV1-M"),
                ocpu: 2,
                memory_gb: 4,
                max_players: 24,
                map: String::from("cp_process_final"),
                hostname: Some(String::from("QuickServer | {region}")),
                admins: vec![String::from("U:1:1000")],
                empty_minutes_terminate: Some(10),
                default_cfgs: BTreeMap::from([(
                    String::from("5cp"),
                    String::from("rgl_6s_5cp_scrim"),
                )]),
                environment: BTreeMap::new(),
            },
        )
        .with_region(
            "fr-par-1",
            RegionConfig {
                display_name: String::from("Paris"),
                srcds_hostname: String::from("QuickServer | Paris"),
                tv_hostname: String::from("QuickServer TV"),
                backend: BackendKind::ContainerInstance,
            },
        )
        .with_region(
            "us-east-1-bue-1a",
            RegionConfig {
                display_name: String::from("Buenos Aires"),
                srcds_hostname: String::from("QuickServer | Buenos Aires"),
                tv_hostname: String::from("QuickServer TV"),
                backend: BackendKind::ContainerService,
            },
        )
}

/// One query received by [`ScriptedConsole`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsoleCall {
    /// Host that was queried.
    pub host: String,
    /// Port that was queried.
    pub port: u16,
    /// Password supplied.
    pub password: String,
    /// Command sent.
    pub command: String,
}

#[derive(Default)]
struct HostScript {
    queued: VecDeque<Result<String, String>>,
    sticky: Option<Result<String, String>>,
}

/// Remote console answering from per-host scripts.
///
/// Queued one-shot replies are served first, then the sticky reply. Hosts
/// without a script answer with an empty string. `Err` replies surface as
/// [`ConsoleError::Protocol`].
#[derive(Default)]
pub struct ScriptedConsole {
    scripts: Mutex<HashMap<String, HostScript>>,
    calls: Mutex<Vec<ConsoleCall>>,
}

impl ScriptedConsole {
    /// Creates a console with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reply returned for `host` once its queue is drained.
    pub fn set_reply(&self, host: &str, reply: Result<String, String>) {
        self.scripts.lock().entry(host.to_owned()).or_default().sticky = Some(reply);
    }

    /// Queues a reply served exactly once for `host`.
    pub fn push_reply(&self, host: &str, reply: Result<String, String>) {
        self.scripts
            .lock()
            .entry(host.to_owned())
            .or_default()
            .queued
            .push_back(reply);
    }

    /// Every query received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ConsoleCall> {
        self.calls.lock().clone()
    }

    /// Commands sent to `host`, in order.
    #[must_use]
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.host == host)
            .map(|call| call.command.clone())
            .collect()
    }

    fn next_reply(&self, host: &str) -> Result<String, String> {
        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(host) else {
            return Ok(String::new());
        };
        script
            .queued
            .pop_front()
            .or_else(|| script.sticky.clone())
            .unwrap_or_else(|| Ok(String::new()))
    }
}

impl RemoteConsole for ScriptedConsole {
    fn query<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        password: &'a str,
        command: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, String, ConsoleError> {
        Box::pin(async move {
            self.calls.lock().push(ConsoleCall {
                host: host.to_owned(),
                port,
                password: password.to_owned(),
                command: command.to_owned(),
            });
            self.next_reply(host)
                .map_err(|message| ConsoleError::Protocol { message })
        })
    }
}

/// Credential generator returning the same credentials every time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixedCredentials(pub ServerCredentials);

impl FixedCredentials {
    /// Well-known credentials used throughout the tests.
    #[must_use]
    pub fn sample() -> Self {
        Self(ServerCredentials {
            server_password: String::from("join-secret"),
            rcon_password: String::from("rcon-secret"),
            tv_password: String::from("tv-secret"),
            log_secret: 424_242,
        })
    }
}

impl CredentialGenerator for FixedCredentials {
    fn generate(&self) -> ServerCredentials {
        self.0.clone()
    }
}

/// Status updater double collecting every progress message.
#[derive(Clone, Debug, Default)]
pub struct RecordingStatus {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingStatus {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a [`StatusUpdater`] feeding this recorder.
    #[must_use]
    pub fn updater(&self) -> StatusUpdater {
        let messages = Arc::clone(&self.messages);
        Arc::new(move |message: String| -> UnitFuture<'static> {
            messages.lock().push(message);
            Box::pin(async {})
        })
    }

    /// Messages received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

/// Connection returned by [`FakeOrchestrator`] deployments.
#[must_use]
pub fn sample_connection() -> ServerConnection {
    ServerConnection {
        host_ip: String::from(FAKE_PUBLIC_IP),
        host_port: 27_015,
        tv_ip: String::from(FAKE_PUBLIC_IP),
        tv_port: 27_020,
        rcon_address: String::from(FAKE_PUBLIC_IP),
        credentials: FixedCredentials::sample().0,
    }
}

type DeployHook = Arc<dyn Fn(&ServerId) + Send + Sync>;

/// Orchestrator double with scripted failures.
///
/// Deployments succeed with [`sample_connection`] unless a failure was
/// queued. Deletions succeed unless a failure was queued for that server.
#[derive(Default)]
pub struct FakeOrchestrator {
    deploy_failures: Mutex<VecDeque<BackendError>>,
    delete_failures: Mutex<HashMap<ServerId, VecDeque<BackendError>>>,
    deployments: Mutex<Vec<DeploymentContext>>,
    deletions: Mutex<Vec<ServerId>>,
    on_deploy: Mutex<Option<DeployHook>>,
}

impl FakeOrchestrator {
    /// Creates an orchestrator where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next deployment fail with `error`.
    pub fn fail_next_deploy(&self, error: BackendError) {
        self.deploy_failures.lock().push_back(error);
    }

    /// Makes the next deletion of `server_id` fail with `error`.
    pub fn fail_delete(&self, server_id: &ServerId, error: BackendError) {
        self.delete_failures
            .lock()
            .entry(server_id.clone())
            .or_default()
            .push_back(error);
    }

    /// Runs `hook` while a deployment is in flight.
    pub fn on_deploy(&self, hook: impl Fn(&ServerId) + Send + Sync + 'static) {
        *self.on_deploy.lock() = Some(Arc::new(hook));
    }

    /// Contexts of every deployment attempted.
    #[must_use]
    pub fn deployments(&self) -> Vec<DeploymentContext> {
        self.deployments.lock().clone()
    }

    /// Servers passed to every deletion attempted, in order.
    #[must_use]
    pub fn deletions(&self) -> Vec<ServerId> {
        self.deletions.lock().clone()
    }
}

impl DeploymentOrchestrator for FakeOrchestrator {
    fn deploy(&self, context: DeploymentContext) -> BoxFuture<'_, DeployedServer, BackendError> {
        Box::pin(async move {
            self.deployments.lock().push(context.clone());
            context.report("[1/1] Deploying fake server...").await;
            let hook = self.on_deploy.lock().clone();
            if let Some(run) = hook {
                run(context.server_id());
            }
            if let Some(error) = self.deploy_failures.lock().pop_front() {
                return Err(error);
            }
            Ok(DeployedServer {
                server_id: context.server_id().clone(),
                region: context.region().clone(),
                variant: context.variant().clone(),
                connection: sample_connection(),
            })
        })
    }

    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        _region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            self.deletions.lock().push(server_id.clone());
            let failure = self
                .delete_failures
                .lock()
                .get_mut(server_id)
                .and_then(VecDeque::pop_front);
            failure.map_or(Ok(()), Err)
        })
    }
}

impl std::fmt::Debug for FakeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeOrchestrator")
            .field("deletions", &self.deletions.lock().len())
            .finish_non_exhaustive()
    }
}

/// Builds a row for tests, created `age_minutes` before `now`.
#[must_use]
pub fn server_row(
    server_id: &str,
    owner: &str,
    status: ServerStatus,
    age_minutes: i64,
    now: DateTime<Utc>,
) -> Server {
    let created_at = now - chrono::Duration::minutes(age_minutes);
    let base = Server::pending(
        ServerId::from(server_id),
        Region::from("fr-par-1"),
        VariantName::from("standard-competitive"),
        owner,
        Some(String::from("guild-1")),
        created_at,
    );
    let connection = (status != ServerStatus::Pending).then(sample_connection);
    Server {
        status,
        connection,
        ..base
    }
}

#[derive(Clone, Debug, Default)]
struct Tables {
    servers: BTreeMap<ServerId, Server>,
    activities: BTreeMap<ServerId, ServerActivity>,
}

#[derive(Debug, Default)]
struct StoreFaults {
    begin: bool,
    activity_writes: HashSet<ServerId>,
}

/// Serialisable in-memory [`FleetStore`].
///
/// Transactions run one at a time on a private copy of the tables, which is
/// published on commit. Synchronous helpers read and seed the committed
/// state directly.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    writer: Arc<AsyncMutex<()>>,
    faults: Arc<Mutex<StoreFaults>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a committed server row.
    pub fn insert_server(&self, server: Server) {
        self.tables
            .lock()
            .servers
            .insert(server.server_id.clone(), server);
    }

    /// Seeds a committed activity row.
    pub fn insert_activity(&self, activity: ServerActivity) {
        self.tables
            .lock()
            .activities
            .insert(activity.server_id.clone(), activity);
    }

    /// Removes a committed server row outside any transaction.
    pub fn remove_server(&self, server_id: &ServerId) {
        self.tables.lock().servers.remove(server_id);
    }

    /// Committed server row, if any.
    #[must_use]
    pub fn server(&self, server_id: &ServerId) -> Option<Server> {
        self.tables.lock().servers.get(server_id).cloned()
    }

    /// Every committed server row.
    #[must_use]
    pub fn all_servers(&self) -> Vec<Server> {
        self.tables.lock().servers.values().cloned().collect()
    }

    /// Committed activity row, if any.
    #[must_use]
    pub fn activity(&self, server_id: &ServerId) -> Option<ServerActivity> {
        self.tables.lock().activities.get(server_id).cloned()
    }

    /// Makes every subsequent [`FleetStore::begin`] fail.
    pub fn fail_begin(&self, failing: bool) {
        self.faults.lock().begin = failing;
    }

    /// Makes activity writes for `server_id` fail.
    pub fn fail_activity_writes(&self, server_id: &ServerId) {
        self.faults.lock().activity_writes.insert(server_id.clone());
    }
}

impl FleetStore for MemoryStore {
    fn begin(&self) -> BoxFuture<'_, Box<dyn StoreTransaction>, RepositoryError> {
        Box::pin(async move {
            if self.faults.lock().begin {
                return Err(RepositoryError::unavailable("store offline"));
            }
            let guard = Arc::clone(&self.writer).lock_owned().await;
            let working = self.tables.lock().clone();
            Ok(Box::new(MemoryTransaction {
                _guard: guard,
                working,
                committed: Arc::clone(&self.tables),
                faults: Arc::clone(&self.faults),
            }) as Box<dyn StoreTransaction>)
        })
    }
}

struct MemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    working: Tables,
    committed: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<StoreFaults>>,
}

impl StoreTransaction for MemoryTransaction {
    fn find_server<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Option<Server>, RepositoryError> {
        Box::pin(async move { Ok(self.working.servers.get(server_id).cloned()) })
    }

    fn servers_by_owner<'a>(
        &'a mut self,
        owner: &'a str,
    ) -> BoxFuture<'a, Vec<Server>, RepositoryError> {
        Box::pin(async move {
            Ok(self
                .working
                .servers
                .values()
                .filter(|server| server.created_by == owner)
                .cloned()
                .collect())
        })
    }

    fn servers(
        &mut self,
        status: Option<ServerStatus>,
    ) -> BoxFuture<'_, Vec<Server>, RepositoryError> {
        Box::pin(async move {
            Ok(self
                .working
                .servers
                .values()
                .filter(|server| status.is_none_or(|wanted| server.status == wanted))
                .cloned()
                .collect())
        })
    }

    fn upsert_server<'a>(&'a mut self, server: &'a Server) -> BoxFuture<'a, (), RepositoryError> {
        Box::pin(async move {
            self.working
                .servers
                .insert(server.server_id.clone(), server.clone());
            Ok(())
        })
    }

    fn delete_server<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, (), RepositoryError> {
        Box::pin(async move {
            self.working.servers.remove(server_id);
            Ok(())
        })
    }

    fn activities(&mut self) -> BoxFuture<'_, Vec<ServerActivity>, RepositoryError> {
        Box::pin(async move { Ok(self.working.activities.values().cloned().collect()) })
    }

    fn find_activity<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Option<ServerActivity>, RepositoryError> {
        Box::pin(async move { Ok(self.working.activities.get(server_id).cloned()) })
    }

    fn upsert_activity<'a>(
        &'a mut self,
        activity: &'a ServerActivity,
    ) -> BoxFuture<'a, (), RepositoryError> {
        Box::pin(async move {
            if self
                .faults
                .lock()
                .activity_writes
                .contains(&activity.server_id)
            {
                return Err(RepositoryError::unavailable(format!(
                    "activity write for {} rejected",
                    activity.server_id
                )));
            }
            self.working
                .activities
                .insert(activity.server_id.clone(), activity.clone());
            Ok(())
        })
    }

    fn delete_activity<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, (), RepositoryError> {
        Box::pin(async move {
            self.working.activities.remove(server_id);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, (), RepositoryError> {
        Box::pin(async move {
            let Self {
                _guard: guard,
                working,
                committed,
                ..
            } = *self;
            *committed.lock() = working;
            drop(guard);
            Ok(())
        })
    }
}

/// In-memory credit balances.
#[derive(Debug, Default)]
pub struct MemoryCredits {
    balances: Mutex<HashMap<String, i64>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryCredits {
    /// Creates a repository where nobody holds credits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the balance of `owner`.
    pub fn set_balance(&self, owner: &str, balance: i64) {
        self.balances.lock().insert(owner.to_owned(), balance);
    }

    /// Current balance of `owner`.
    #[must_use]
    pub fn balance_of(&self, owner: &str) -> Option<i64> {
        self.balances.lock().get(owner).copied()
    }

    /// Makes every operation for `owner` fail.
    pub fn fail_for(&self, owner: &str) {
        self.failing.lock().insert(owner.to_owned());
    }

    fn check(&self, owner: &str) -> Result<(), RepositoryError> {
        if self.failing.lock().contains(owner) {
            return Err(RepositoryError::unavailable(format!(
                "credits for {owner} unavailable"
            )));
        }
        Ok(())
    }
}

impl CreditsRepository for MemoryCredits {
    fn balance<'a>(&'a self, owner: &'a str) -> BoxFuture<'a, Option<i64>, RepositoryError> {
        Box::pin(async move {
            self.check(owner)?;
            Ok(self.balance_of(owner))
        })
    }

    fn subtract<'a>(&'a self, owner: &'a str, amount: i64) -> BoxFuture<'a, i64, RepositoryError> {
        Box::pin(async move {
            self.check(owner)?;
            let mut balances = self.balances.lock();
            let balance = balances.entry(owner.to_owned()).or_insert(0);
            *balance -= amount;
            Ok(*balance)
        })
    }
}

/// In-memory ban list keyed by canonical identity or user id.
#[derive(Debug, Default)]
pub struct MemoryBans {
    bans: Mutex<HashMap<String, Option<String>>>,
}

impl MemoryBans {
    /// Creates an empty ban list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bans `key`, either a canonical identity or a user id.
    pub fn ban(&self, key: &str, reason: Option<&str>) {
        self.bans
            .lock()
            .insert(key.to_owned(), reason.map(str::to_owned));
    }
}

impl BanRepository for MemoryBans {
    fn lookup<'a>(
        &'a self,
        identity: &'a PlayerIdentity,
        user_id: &'a str,
    ) -> BoxFuture<'a, BanStatus, RepositoryError> {
        Box::pin(async move {
            let bans = self.bans.lock();
            let hit = bans
                .get(&identity.to_string())
                .or_else(|| bans.get(user_id));
            Ok(hit.map_or(BanStatus::Clear, |reason| BanStatus::Banned {
                reason: reason.clone(),
            }))
        })
    }
}

/// In-memory user profiles.
#[derive(Debug, Default)]
pub struct MemoryUsers {
    accounts: Mutex<HashMap<String, String>>,
}

impl MemoryUsers {
    /// Creates an empty profile table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the game-account id of `user_id`.
    pub fn set_account(&self, user_id: &str, account_id: &str) {
        self.accounts
            .lock()
            .insert(user_id.to_owned(), account_id.to_owned());
    }
}

impl UserRepository for MemoryUsers {
    fn account_id<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Option<String>, RepositoryError> {
        Box::pin(async move { Ok(self.accounts.lock().get(user_id).cloned()) })
    }
}

/// In-memory tenant parameters.
#[derive(Debug, Default)]
pub struct MemoryTenants {
    environments: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryTenants {
    /// Creates a table with no tenant overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one environment override for `guild_id`.
    pub fn set_env(&self, guild_id: &str, key: &str, value: &str) {
        self.environments
            .lock()
            .entry(guild_id.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_owned());
    }
}

impl TenantRepository for MemoryTenants {
    fn extra_environment<'a>(
        &'a self,
        guild_id: &'a str,
    ) -> BoxFuture<'a, BTreeMap<String, String>, RepositoryError> {
        Box::pin(async move {
            Ok(self
                .environments
                .lock()
                .get(guild_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}

/// Audit log double.
#[derive(Debug, Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
    failing: Mutex<bool>,
}

impl RecordingAudit {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail.
    pub fn fail_writes(&self) {
        *self.failing.lock() = true;
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Messages of the events recorded so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.message.clone())
            .collect()
    }
}

impl AuditLog for RecordingAudit {
    fn record(&self, event: AuditEvent) -> BoxFuture<'_, (), RepositoryError> {
        Box::pin(async move {
            if *self.failing.lock() {
                return Err(RepositoryError::unavailable("audit log offline"));
            }
            self.events.lock().push(event);
            Ok(())
        })
    }
}

/// Status-sample store double.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    samples: Mutex<Vec<ServerStatusMetric>>,
    failing: Mutex<HashSet<ServerId>>,
}

impl MemoryMetrics {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes writes for `server_id` fail.
    pub fn fail_for(&self, server_id: &ServerId) {
        self.failing.lock().insert(server_id.clone());
    }

    /// Samples stored so far.
    #[must_use]
    pub fn samples(&self) -> Vec<ServerStatusMetric> {
        self.samples.lock().clone()
    }
}

impl ServerStatusMetricsRepository for MemoryMetrics {
    fn save(&self, metric: ServerStatusMetric) -> BoxFuture<'_, (), RepositoryError> {
        Box::pin(async move {
            if self.failing.lock().contains(&metric.server_id) {
                return Err(RepositoryError::unavailable("metrics store offline"));
            }
            self.samples.lock().push(metric);
            Ok(())
        })
    }
}

/// Direct-message double.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    /// Creates a notifier that delivers everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent delivery fail.
    pub fn fail_deliveries(&self) {
        *self.failing.lock() = true;
    }

    /// `(recipient, message)` pairs delivered so far.
    #[must_use]
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn direct_message<'a>(
        &'a self,
        user_id: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, (), NotificationError> {
        Box::pin(async move {
            if *self.failing.lock() {
                return Err(NotificationError {
                    user_id: user_id.to_owned(),
                    message: String::from("recipient unreachable"),
                });
            }
            self.messages
                .lock()
                .push((user_id.to_owned(), message.to_owned()));
            Ok(())
        })
    }
}

/// Every double wired into a lifecycle and the reaper collaborators.
///
/// The queue has a [`DeleteServerProcessor`] registered against the same
/// doubles, so queued deletions are observable through [`Self::store`] and
/// [`Self::orchestrator`].
pub struct TestFleet {
    /// Fleet rows.
    pub store: MemoryStore,
    /// Cloud backend double.
    pub orchestrator: Arc<FakeOrchestrator>,
    /// Deployment cancellation tokens.
    pub registry: Arc<CancellationRegistry>,
    /// Audit trail.
    pub audit: Arc<RecordingAudit>,
    /// Credit balances.
    pub credits: Arc<MemoryCredits>,
    /// Ban list.
    pub bans: Arc<MemoryBans>,
    /// Stored game-account ids.
    pub users: Arc<MemoryUsers>,
    /// Per-tenant environment.
    pub tenants: Arc<MemoryTenants>,
    /// Remote console shared by the probe and the broadcaster.
    pub console: Arc<ScriptedConsole>,
    /// Direct messages.
    pub notifier: Arc<RecordingNotifier>,
    /// Status samples.
    pub metrics: Arc<MemoryMetrics>,
    /// Deferred deletions.
    pub queue: BackgroundTaskQueue,
}

impl TestFleet {
    /// Wires fresh doubles together.
    #[must_use]
    pub fn new() -> Self {
        let fleet = Self {
            store: MemoryStore::new(),
            orchestrator: Arc::new(FakeOrchestrator::new()),
            registry: Arc::new(CancellationRegistry::new()),
            audit: Arc::new(RecordingAudit::new()),
            credits: Arc::new(MemoryCredits::new()),
            bans: Arc::new(MemoryBans::new()),
            users: Arc::new(MemoryUsers::new()),
            tenants: Arc::new(MemoryTenants::new()),
            console: Arc::new(ScriptedConsole::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            metrics: Arc::new(MemoryMetrics::new()),
            queue: BackgroundTaskQueue::new(),
        };
        fleet.queue.register(
            DELETE_SERVER_TASK,
            Arc::new(DeleteServerProcessor::new(fleet.lifecycle(false))),
        );
        fleet
    }

    /// Lifecycle over the doubles.
    #[must_use]
    pub fn lifecycle(&self, credits_enabled: bool) -> ServerLifecycle {
        ServerLifecycle::new(
            LifecycleDeps {
                store: Arc::new(self.store.clone()),
                orchestrator: Arc::clone(&self.orchestrator) as Arc<dyn DeploymentOrchestrator>,
                registry: Arc::clone(&self.registry),
                audit: Arc::clone(&self.audit) as Arc<dyn AuditLog>,
                credits: Arc::clone(&self.credits) as Arc<dyn CreditsRepository>,
                bans: Arc::clone(&self.bans) as Arc<dyn BanRepository>,
                users: Arc::clone(&self.users) as Arc<dyn UserRepository>,
                tenants: Arc::clone(&self.tenants) as Arc<dyn TenantRepository>,
            },
            credits_enabled,
        )
    }

    /// Reaper collaborators over the doubles, with [`sample_catalog`].
    #[must_use]
    pub fn policy_deps(&self) -> PolicyDeps {
        let console = Arc::clone(&self.console) as Arc<dyn RemoteConsole>;
        let readiness = ReadinessSettings {
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(10),
        };
        PolicyDeps {
            lifecycle: self.lifecycle(true),
            catalog: Arc::new(sample_catalog()),
            probe: HealthProbe::new(Arc::clone(&console), ConsoleSettings::default(), readiness),
            broadcaster: Broadcaster::new(console, ConsoleSettings::default()),
            notifier: Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            metrics: Arc::clone(&self.metrics) as Arc<dyn ServerStatusMetricsRepository>,
            queue: self.queue.clone(),
        }
    }
}

impl Default for TestFleet {
    fn default() -> Self {
        Self::new()
    }
}

/// Points the console address of `server` at `host`, so each server can be
/// scripted separately through [`ScriptedConsole`].
#[must_use]
pub fn at_console(server: Server, host: &str) -> Server {
    let connection = server.connection.map(|connection| ServerConnection {
        rcon_address: host.to_owned(),
        ..connection
    });
    Server {
        connection,
        ..server
    }
}
