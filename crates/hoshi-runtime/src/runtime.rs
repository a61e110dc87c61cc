//! Runtime orchestration.
//!
//! [`HoshiRuntime`] wires the pieces of the host together: it opens the
//! service store, creates the [`ServiceRegistry`] with the built-in service
//! manager, and an [`EventDispatcher`] carrying the [`ServiceTracer`] hook.
//! Adapters report bots through [`connect_bot`](HoshiRuntime::connect_bot)
//! and feed events through [`dispatch`](HoshiRuntime::dispatch) or
//! [`spawn_dispatch`](HoshiRuntime::spawn_dispatch).
//!
//! ```rust,ignore
//! use hoshi_runtime::HoshiRuntime;
//!
//! let runtime = HoshiRuntime::builder()
//!     .config_file("hoshi.toml")
//!     .build()?;
//!
//! let sv = runtime.registry().register(ServiceOptions::new("echo"))?;
//! sv.on_command("echo", (), MatchOptions::default())
//!     .handle(|CommandArg(arg): CommandArg| async move { arg });
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use hoshi_core::{BotManager, BoxedBot, BoxedEvent, Message};
use hoshi_framework::{
    DispatchSettings, DispatchSummary, EventDispatcher, JsonFileStore, ServiceRegistry,
    ServiceStore, ServiceTracer, register_service_manager,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, HoshiConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The hoshi host runtime.
pub struct HoshiRuntime {
    config: HoshiConfig,
    bots: Arc<BotManager>,
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<EventDispatcher>,
}

impl HoshiRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime backed by a [`JsonFileStore`] under
    /// `config.storage`, initializing logging first.
    pub fn from_config(config: &HoshiConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let store = JsonFileStore::new(&config.storage.service_dir, &config.storage.config_dir)?;
        info!(
            service_dir = %config.storage.service_dir.display(),
            config_dir = %config.storage.config_dir.display(),
            "Opened service store"
        );
        Self::with_store(config, Arc::new(store))
    }

    /// Creates a runtime on an arbitrary service store.
    ///
    /// Logging is left untouched.
    pub fn with_store(config: &HoshiConfig, store: Arc<dyn ServiceStore>) -> RuntimeResult<Self> {
        let bots = Arc::new(BotManager::new());
        let registry = Arc::new(ServiceRegistry::new(store, Arc::clone(&bots)));
        register_service_manager(&registry)?;

        let dispatcher = EventDispatcher::new(
            Arc::clone(registry.matcher_table()),
            DispatchSettings {
                superusers: config.bot.superusers.iter().copied().collect(),
                command_start: config.bot.command_start.clone(),
                session_expire: config.bot.session_expire(),
            },
        );
        dispatcher.add_hook(Arc::new(ServiceTracer::new(Arc::clone(
            registry.matcher_table(),
        ))));

        info!(
            superusers = config.bot.superusers.len(),
            command_start = ?config.bot.command_start,
            session_expire_secs = config.bot.session_expire_timeout_secs,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: config.clone(),
            bots,
            registry,
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn config(&self) -> &HoshiConfig {
        &self.config
    }

    /// The registry plugins register their services on.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn bots(&self) -> &Arc<BotManager> {
        &self.bots
    }

    /// Registers a connected bot and sends the online notice to every
    /// superuser.
    ///
    /// Delivery failures are logged and do not affect the connection.
    pub async fn connect_bot(&self, bot: BoxedBot) {
        let bot_id = bot.id().to_string();
        if self.bots.register(Arc::clone(&bot)).is_some() {
            warn!(bot_id = %bot_id, "Bot reconnected, replacing previous connection");
        }
        info!(bot_id = %bot_id, "Bot connected");

        let Some(notice) = &self.config.bot.online_notice else {
            return;
        };
        let message = Message::from(notice.as_str());
        let sends = self.config.bot.superusers.iter().map(|&user_id| {
            let bot = Arc::clone(&bot);
            let message = &message;
            async move { (user_id, bot.send_private_msg(user_id, message).await) }
        });
        for (user_id, result) in join_all(sends).await {
            match result {
                Ok(_) => debug!(bot_id = %bot_id, user_id, "Online notice sent"),
                Err(e) => {
                    error!(bot_id = %bot_id, user_id, error = %e, "Failed to send online notice")
                }
            }
        }
    }

    /// Removes a bot, returning it if it was connected.
    pub fn disconnect_bot(&self, bot_id: &str) -> Option<BoxedBot> {
        let bot = self.bots.unregister(bot_id);
        if bot.is_some() {
            info!(bot_id, "Bot disconnected");
        } else {
            warn!(bot_id, "Disconnect requested for unknown bot");
        }
        bot
    }

    /// Dispatches one event and waits for every matched chain to finish.
    pub async fn dispatch(&self, event: BoxedEvent, bot: BoxedBot) -> DispatchSummary {
        self.dispatcher.dispatch_event(event, bot).await
    }

    /// Dispatches one event on its own task.
    ///
    /// Events dispatched this way are processed concurrently.
    pub fn spawn_dispatch(&self, event: BoxedEvent, bot: BoxedBot) -> JoinHandle<DispatchSummary> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move { dispatcher.dispatch_event(event, bot).await })
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start();
        info!("hoshi is now running. Press Ctrl+C to stop.");

        wait_for_shutdown().await?;

        self.stop();
        Ok(())
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.stop();
        Ok(())
    }

    fn start(&self) {
        let services = self.registry.list_all();
        info!(
            services = services.len(),
            matchers = self.registry.matcher_table().len(),
            "Starting runtime"
        );
        for matcher in self.registry.loaded_matchers() {
            debug!("Loaded {matcher}");
        }
    }

    fn stop(&self) {
        for bot in self.bots.list() {
            self.bots.unregister(bot.id());
        }
        let dropped = self.dispatcher.sessions().clear();
        if dropped > 0 {
            debug!(dropped, "Dropped suspended sessions");
        }
        info!("Runtime stopped");
    }
}

impl std::fmt::Debug for HoshiRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoshiRuntime")
            .field("bots", &self.bots)
            .field("services", &self.registry.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(RuntimeError::Signal)?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(RuntimeError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads configuration and builds a [`HoshiRuntime`].
///
/// ```rust,ignore
/// let runtime = HoshiRuntime::builder()
///     .config_file("deploy/hoshi.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    store: Option<Arc<dyn ServiceStore>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            store: None,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers a programmatic configuration under files and env.
    pub fn merge(mut self, config: HoshiConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `store` instead of the JSON files under `storage`.
    pub fn store(mut self, store: Arc<dyn ServiceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> RuntimeResult<HoshiRuntime> {
        let config = self.config_loader.load()?;
        match self.store {
            Some(store) => {
                logging::init_from_config(&config.logging);
                HoshiRuntime::with_store(&config, store)
            }
            None => HoshiRuntime::from_config(&config),
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use hoshi_core::{ApiError, ApiResult, Bot, ChatEvent};
    use hoshi_framework::{
        CommandArg, MANAGER_SERVICE, MatchOptions, MemoryStore, ServiceOptions,
    };
    use parking_lot::Mutex;

    use super::*;

    struct RecordingBot {
        id: String,
        unreachable: BTreeSet<i64>,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingBot {
        fn new(id: &str) -> Arc<Self> {
            Self::unreachable(id, &[])
        }

        fn unreachable(id: &str, users: &[i64]) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                unreachable: users.iter().copied().collect(),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Bot for RecordingBot {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send_group_msg(&self, group_id: i64, message: &Message) -> ApiResult<i64> {
            self.sent.lock().push(format!("group:{group_id}:{message}"));
            Ok(1)
        }

        async fn send_private_msg(&self, user_id: i64, message: &Message) -> ApiResult<i64> {
            if self.unreachable.contains(&user_id) {
                return Err(ApiError::Failed {
                    retcode: 100,
                    message: "user not reachable".into(),
                });
            }
            self.sent.lock().push(format!("private:{user_id}:{message}"));
            Ok(2)
        }

        async fn get_group_list(&self) -> ApiResult<Vec<i64>> {
            Ok(vec![10])
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn config() -> HoshiConfig {
        let mut config = HoshiConfig::default();
        config.bot.superusers = BTreeSet::from([1, 2, 3]);
        config.bot.online_notice = Some("hoshi online".into());
        config
    }

    fn runtime() -> HoshiRuntime {
        HoshiRuntime::with_store(&config(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_online_notice_reaches_reachable_superusers() {
        let runtime = runtime();
        let bot = RecordingBot::unreachable("bot", &[2]);

        runtime.connect_bot(bot.clone()).await;

        assert_eq!(
            bot.sent(),
            vec!["private:1:hoshi online", "private:3:hoshi online"]
        );
        assert!(runtime.bots().get("bot").is_some());

        assert!(runtime.disconnect_bot("bot").is_some());
        assert!(runtime.disconnect_bot("bot").is_none());
        assert!(runtime.bots().is_empty());
    }

    #[tokio::test]
    async fn test_no_notice_without_config() {
        let runtime =
            HoshiRuntime::with_store(&HoshiConfig::default(), Arc::new(MemoryStore::new()))
                .unwrap();
        let bot = RecordingBot::new("bot");
        runtime.connect_bot(bot.clone()).await;
        assert!(bot.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_reaches_registered_services() {
        let runtime = runtime();
        assert!(runtime.registry().get(MANAGER_SERVICE).is_some());

        let sv = runtime
            .registry()
            .register(ServiceOptions::new("echo"))
            .unwrap();
        sv.on_command("echo", (), MatchOptions::default())
            .handle(|CommandArg(arg): CommandArg| async move { arg });

        let bot = RecordingBot::new("bot");
        let summary = runtime
            .dispatch(ChatEvent::group_message(10, 5, "/echo hi").into(), bot.clone())
            .await;
        assert_eq!(summary.handled.len(), 1);

        let summary = runtime
            .spawn_dispatch(ChatEvent::group_message(10, 5, "echo there").into(), bot.clone())
            .await
            .unwrap();
        assert_eq!(summary.handled.len(), 1);

        assert_eq!(bot.sent(), vec!["group:10:hi", "group:10:there"]);
    }

    #[tokio::test]
    async fn test_superusers_and_command_start_reach_dispatcher() {
        let mut config = config();
        config.bot.command_start = vec!["!".into()];
        let runtime = HoshiRuntime::with_store(&config, Arc::new(MemoryStore::new())).unwrap();
        assert!(runtime.dispatcher().superusers().contains(&3));

        let sv = runtime.registry().register(ServiceOptions::new("echo")).unwrap();
        sv.on_command("echo", (), MatchOptions::default())
            .handle(|CommandArg(arg): CommandArg| async move { arg });

        let bot = RecordingBot::new("bot");
        runtime
            .dispatch(ChatEvent::group_message(10, 5, "echo bare").into(), bot.clone())
            .await;
        runtime
            .dispatch(ChatEvent::group_message(10, 5, "!echo bang").into(), bot.clone())
            .await;
        assert_eq!(bot.sent(), vec!["group:10:bang"]);
    }

    #[tokio::test]
    async fn test_file_store_persists_under_storage_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.storage.service_dir = dir.path().join("service");
        config.storage.config_dir = dir.path().join("service_config");

        let runtime = HoshiRuntime::from_config(&config).unwrap();
        let sv = runtime
            .registry()
            .register(ServiceOptions::new("demo").enable_on_default(false))
            .unwrap();
        sv.set_enable(100).unwrap();
        assert!(dir.path().join("service/demo.json").exists());
        assert!(dir.path().join("service_config").is_dir());

        let restarted = HoshiRuntime::from_config(&config).unwrap();
        let sv = restarted
            .registry()
            .register(ServiceOptions::new("demo").enable_on_default(false))
            .unwrap();
        assert!(sv.check_enabled(100));
        assert!(!sv.check_enabled(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_disconnects_bots() {
        let runtime = runtime();
        runtime.connect_bot(RecordingBot::new("bot")).await;

        runtime
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(runtime.bots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_suspended_sessions() {
        let runtime = runtime();
        let sv = runtime
            .registry()
            .register(ServiceOptions::new("survey"))
            .unwrap();
        sv.on_command("survey", (), MatchOptions::default())
            .receive(|| async { "thanks".to_string() });

        let bot = RecordingBot::new("bot");
        runtime
            .dispatch(ChatEvent::group_message(10, 5, "/survey").into(), bot.clone())
            .await;
        assert_eq!(runtime.dispatcher().sessions().len(), 1);

        runtime
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(runtime.dispatcher().sessions().is_empty());

        let summary = runtime
            .dispatch(ChatEvent::group_message(10, 5, "blue").into(), bot.clone())
            .await;
        assert!(!summary.resumed);
        assert!(bot.sent().is_empty());
    }
}
