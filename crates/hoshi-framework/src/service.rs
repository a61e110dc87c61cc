//! Services and the service registry.
//!
//! A [`Service`] is a named unit of functionality that can be switched on and
//! off per group. Services are created through a [`ServiceRegistry`], which
//! guarantees unique names, loads the persisted group sets and shares one
//! [`MatcherTable`] between all services.
//!
//! ```rust,ignore
//! let registry = ServiceRegistry::new(store, bots);
//! let sv = registry.register(ServiceOptions::new("weather").enable_on_default(false))?;
//!
//! sv.on_command("天气", ["weather"], MatchOptions::default())
//!     .handle(|CommandArg(city): CommandArg| async move { format!("{city}: sunny") });
//!
//! sv.set_enable(123456)?;
//! assert!(sv.check_enabled(123456));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info, warn};

use hoshi_core::{BotManager, BoxedBot, Message};

use crate::error::{ServiceError, StoreError};
use crate::matcher::{MatcherDescriptor, MatcherTable};
use crate::permission::Permission;
use crate::store::{ServiceConfig, ServiceRecord, ServiceStore};

/// Pause before each broadcast send.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(500);

/// Characters a service name may not contain.
pub const ILLEGAL_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '.', '!', '！'];

fn validate_name(name: &str) -> Result<(), ServiceError> {
    let purely_numeric = name.chars().all(char::is_numeric);
    if name.is_empty() || purely_numeric || name.contains(ILLEGAL_NAME_CHARS) {
        return Err(ServiceError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ============================================================================
// ServiceOptions
// ============================================================================

/// Parameters of [`ServiceRegistry::register`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub name: String,
    /// Level needed to toggle the service; one of ADMIN, OWNER, SUPERUSER.
    pub manage_perm: Permission,
    pub enable_on_default: bool,
    /// Whether the service shows up in listings for non-superusers.
    pub visible: bool,
}

impl ServiceOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manage_perm: Permission::ADMIN,
            enable_on_default: true,
            visible: true,
        }
    }

    pub fn manage_perm(mut self, perm: Permission) -> Self {
        self.manage_perm = perm;
        self
    }

    pub fn enable_on_default(mut self, enable: bool) -> Self {
        self.enable_on_default = enable;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }
}

// ============================================================================
// Broadcast
// ============================================================================

/// Outcome counts of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// One message or a sequence of messages.
pub trait IntoMessages {
    fn into_messages(self) -> Vec<Message>;
}

impl IntoMessages for Message {
    fn into_messages(self) -> Vec<Message> {
        vec![self]
    }
}

impl IntoMessages for &str {
    fn into_messages(self) -> Vec<Message> {
        vec![Message::from(self)]
    }
}

impl IntoMessages for String {
    fn into_messages(self) -> Vec<Message> {
        vec![Message::from(self)]
    }
}

impl<T: Into<Message>> IntoMessages for Vec<T> {
    fn into_messages(self) -> Vec<Message> {
        self.into_iter().map(Into::into).collect()
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Default)]
struct GroupSets {
    enable: BTreeSet<i64>,
    disable: BTreeSet<i64>,
}

/// A named, per-group switchable unit owning a set of matchers.
pub struct Service {
    pub(crate) this: Weak<Service>,
    name: String,
    manage_perm: Permission,
    enable_on_default: bool,
    visible: bool,
    groups: Mutex<GroupSets>,
    pub(crate) matchers: RwLock<Vec<Arc<MatcherDescriptor>>>,
    pub(crate) table: Arc<MatcherTable>,
    store: Arc<dyn ServiceStore>,
    bots: Arc<BotManager>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manage_perm(&self) -> Permission {
        self.manage_perm
    }

    pub fn enable_on_default(&self) -> bool {
        self.enable_on_default
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Enables the service in `group_id` and persists the change.
    ///
    /// The in-memory state is left untouched when the record cannot be saved.
    pub fn set_enable(&self, group_id: i64) -> Result<(), StoreError> {
        self.update_groups(group_id, true)?;
        info!(service = %self.name, group_id, "Service enabled");
        Ok(())
    }

    /// Disables the service in `group_id` and persists the change.
    ///
    /// The in-memory state is left untouched when the record cannot be saved.
    pub fn set_disable(&self, group_id: i64) -> Result<(), StoreError> {
        self.update_groups(group_id, false)?;
        info!(service = %self.name, group_id, "Service disabled");
        Ok(())
    }

    fn update_groups(&self, group_id: i64, enable: bool) -> Result<(), StoreError> {
        let mut groups = self.groups.lock();
        let mut enabled = groups.enable.clone();
        let mut disabled = groups.disable.clone();
        if enable {
            enabled.insert(group_id);
            disabled.remove(&group_id);
        } else {
            disabled.insert(group_id);
            enabled.remove(&group_id);
        }

        let record = ServiceRecord {
            name: self.name.clone(),
            enable_group: enabled,
            disable_group: disabled,
        };
        self.store.save(&record)?;

        groups.enable = record.enable_group;
        groups.disable = record.disable_group;
        Ok(())
    }

    pub fn check_enabled(&self, group_id: i64) -> bool {
        let groups = self.groups.lock();
        groups.enable.contains(&group_id)
            || (self.enable_on_default && !groups.disable.contains(&group_id))
    }

    pub fn enabled_groups(&self) -> BTreeSet<i64> {
        self.groups.lock().enable.clone()
    }

    pub fn disabled_groups(&self) -> BTreeSet<i64> {
        self.groups.lock().disable.clone()
    }

    /// Descriptors of the matchers registered by this service.
    pub fn matchers(&self) -> Vec<Arc<MatcherDescriptor>> {
        self.matchers.read().clone()
    }

    /// The service's configuration mapping; empty if it cannot be read.
    pub fn config(&self) -> ServiceConfig {
        match self.store.load_config(&self.name) {
            Ok(config) => config,
            Err(e) => {
                error!(service = %self.name, error = %e, "Failed to load service config");
                ServiceConfig::new()
            }
        }
    }

    /// The configuration deserialized into `T`, or `T::default()`.
    pub fn config_as<T: DeserializeOwned + Default>(&self) -> T {
        serde_json::from_value(Value::Object(self.config())).unwrap_or_else(|e| {
            error!(service = %self.name, error = %e, "Invalid service config, using defaults");
            T::default()
        })
    }

    /// Maps every group where the service is enabled to the connected bots
    /// in it. Bots whose group list cannot be fetched are skipped.
    pub async fn get_enable_groups(&self) -> BTreeMap<i64, Vec<BoxedBot>> {
        let mut groups: BTreeMap<i64, Vec<BoxedBot>> = BTreeMap::new();
        for bot in self.bots.list() {
            match bot.get_group_list().await {
                Ok(list) => {
                    for group_id in list.into_iter().filter(|g| self.check_enabled(*g)) {
                        groups.entry(group_id).or_default().push(Arc::clone(&bot));
                    }
                }
                Err(e) => {
                    warn!(service = %self.name, bot = bot.id(), error = %e, "Failed to fetch group list");
                }
            }
        }
        groups
    }

    /// Sends `messages` to every enabled group, pausing
    /// [`DEFAULT_BROADCAST_INTERVAL`] before each send.
    pub async fn broadcast(&self, messages: impl IntoMessages, tag: &str) -> BroadcastReport {
        self.broadcast_with_interval(messages, tag, DEFAULT_BROADCAST_INTERVAL)
            .await
    }

    pub async fn broadcast_with_interval(
        &self,
        messages: impl IntoMessages,
        tag: &str,
        interval: Duration,
    ) -> BroadcastReport {
        let messages = messages.into_messages();
        let mut report = BroadcastReport::default();

        for (group_id, bots) in self.get_enable_groups().await {
            for bot in bots {
                for message in &messages {
                    tokio::time::sleep(interval).await;
                    match bot.send_group_msg(group_id, message).await {
                        Ok(_) => {
                            report.delivered += 1;
                            info!(service = %self.name, tag, group_id, bot = bot.id(), "Broadcast delivered");
                        }
                        Err(e) => {
                            report.failed += 1;
                            error!(service = %self.name, tag, group_id, bot = bot.id(), error = %e, "Failed to deliver broadcast");
                        }
                    }
                }
            }
        }

        report
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("manage_perm", &self.manage_perm)
            .field("enable_on_default", &self.enable_on_default)
            .field("visible", &self.visible)
            .field("groups", &*self.groups.lock())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ServiceRegistry
// ============================================================================

/// Owns every service of a process, keyed by name.
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<Service>>>,
    table: Arc<MatcherTable>,
    store: Arc<dyn ServiceStore>,
    bots: Arc<BotManager>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn ServiceStore>, bots: Arc<BotManager>) -> Self {
        Self::with_table(store, bots, Arc::new(MatcherTable::new()))
    }

    pub fn with_table(
        store: Arc<dyn ServiceStore>,
        bots: Arc<BotManager>,
        table: Arc<MatcherTable>,
    ) -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            table,
            store,
            bots,
        }
    }

    /// Creates a service. Fails on an invalid or taken name, an illegal
    /// `manage_perm`, or unreadable persisted state; a failed registration
    /// leaves the registry unchanged.
    pub fn register(&self, options: ServiceOptions) -> Result<Arc<Service>, ServiceError> {
        let ServiceOptions {
            name,
            manage_perm,
            enable_on_default,
            visible,
        } = options;

        validate_name(&name)?;
        if !manage_perm.is_manage_level() {
            return Err(ServiceError::IllegalPermission {
                name,
                perm: manage_perm.to_string(),
            });
        }

        let mut services = self.services.write();
        if services.contains_key(&name) {
            return Err(ServiceError::Duplicate(name));
        }

        let record = self.store.load(&name).map_err(|source| ServiceError::Store {
            name: name.clone(),
            source,
        })?;

        let service = Arc::new_cyclic(|this| Service {
            this: this.clone(),
            name: name.clone(),
            manage_perm,
            enable_on_default,
            visible,
            groups: Mutex::new(GroupSets {
                enable: record.enable_group,
                disable: record.disable_group,
            }),
            matchers: RwLock::new(Vec::new()),
            table: Arc::clone(&self.table),
            store: Arc::clone(&self.store),
            bots: Arc::clone(&self.bots),
        });
        services.insert(name.clone(), Arc::clone(&service));

        info!(service = %name, %manage_perm, enable_on_default, visible, "Service registered");
        Ok(service)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().get(name).cloned()
    }

    /// All services, sorted by name.
    pub fn list_all(&self) -> Vec<Arc<Service>> {
        self.services.read().values().cloned().collect()
    }

    /// Rendered descriptors of every service-registered matcher.
    pub fn loaded_matchers(&self) -> Vec<String> {
        self.table
            .descriptors()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn matcher_table(&self) -> &Arc<MatcherTable> {
        &self.table
    }

    pub fn bots(&self) -> &Arc<BotManager> {
        &self.bots
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.read().keys().collect::<Vec<_>>())
            .field("matchers", &self.table.len())
            .finish_non_exhaustive()
    }
}
