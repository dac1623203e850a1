//! Typed settings stored in etcd, with live reload
//!
//! Every setting is declared once in [`SettingsTable`] with its etcd key, a
//! parser and a default. Loading walks the table, and each watched setting
//! gets a background task that re-applies the value when its key changes.
//! Consumers hold a `watch::Receiver` per setting and read the current value
//! whenever they need it.

use crate::client::{EtcdConnection, DIAL_TIMEOUT};
use crate::error::ConfigError;
use async_trait::async_trait;
use etcd_client::{Client, Event, EventType, WatchOptions};
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

pub const ETCD_TIMEOUT_KEY: &str = "/configs/service-discovery/etcd_timeout";
pub const DOCKER_TIMEOUT_KEY: &str = "/configs/service-discovery/docker_timeout";
pub const LOG_LEVEL_KEY: &str =
    "/configs/service-discovery/{{SERVICE_DISCOVERY_INSTANCE}}/log_level";

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Log level accepted by the `log_level` setting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevel(pub LevelFilter);

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel(LevelFilter::DEBUG)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let level = match normalized.as_str() {
            "panic" | "fatal" => LevelFilter::ERROR,
            "warning" => LevelFilter::WARN,
            other => other
                .parse::<LevelFilter>()
                .map_err(|_| format!("unknown log level {:?}", s))?,
        };
        Ok(LogLevel(level))
    }
}

/// Current values of all settings. Each field is an independent subscription.
#[derive(Clone)]
pub struct Settings {
    /// Timeout for each registry put/delete
    pub etcd_timeout: watch::Receiver<Duration>,
    /// Timeout for each container inspection
    pub docker_timeout: watch::Receiver<Duration>,
    pub log_level: watch::Receiver<LogLevel>,
}

/// A stored value and the store revision it was read at
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Option<String>,
    /// Zero when the source has no notion of revisions
    pub revision: i64,
}

/// Where stored setting values come from
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<StoredValue, ConfigError>;
}

#[async_trait]
impl SettingsSource for EtcdConnection {
    async fn fetch(&self, key: &str) -> Result<StoredValue, ConfigError> {
        let mut client = self.clone_client();
        fetch_stored(&mut client, key).await
    }
}

#[async_trait]
impl SettingsSource for HashMap<String, String> {
    async fn fetch(&self, key: &str) -> Result<StoredValue, ConfigError> {
        Ok(StoredValue {
            value: self.get(key).cloned(),
            revision: 0,
        })
    }
}

/// Read one key, bounded by the dial timeout.
async fn fetch_stored(client: &mut Client, key: &str) -> Result<StoredValue, ConfigError> {
    let response = with_deadline(key, DIAL_TIMEOUT, async {
        client
            .get(key, None)
            .await
            .map_err(|source| ConfigError::Fetch {
                key: key.to_string(),
                source,
            })
    })
    .await?;

    let revision = response.header().map(|h| h.revision()).unwrap_or(0);
    let value = match response.kvs().first() {
        Some(kv) => Some(
            kv.value_str()
                .map(str::to_string)
                .map_err(|e| ConfigError::Invalid {
                    key: key.to_string(),
                    value: String::from_utf8_lossy(kv.value()).into_owned(),
                    reason: e.to_string(),
                })?,
        ),
        None => None,
    };

    Ok(StoredValue { value, revision })
}

async fn with_deadline<T, F>(key: &str, limit: Duration, request: F) -> Result<T, ConfigError>
where
    F: Future<Output = Result<T, ConfigError>>,
{
    tokio::time::timeout(limit, request)
        .await
        .map_err(|_| ConfigError::Timeout {
            key: key.to_string(),
            timeout: limit,
        })?
}

/// Store revision a watcher has caught up to. A re-established watch starts
/// right after it so changes made while disconnected are replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct WatchCursor {
    seen: i64,
}

impl WatchCursor {
    fn after(revision: i64) -> Self {
        WatchCursor { seen: revision }
    }

    fn observe(&mut self, revision: i64) {
        self.seen = self.seen.max(revision);
    }

    /// `None` means watch from the current revision
    fn start_revision(&self) -> Option<i64> {
        (self.seen > 0).then_some(self.seen + 1)
    }

    fn options(&self) -> Option<WatchOptions> {
        self.start_revision()
            .map(|revision| WatchOptions::new().with_start_revision(revision))
    }
}

/// A change observed on a watched key
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingChange {
    Put(String),
    Delete,
}

/// Type-erased view of one table entry
trait SettingSlot: Send + Sync {
    fn name(&self) -> &'static str;
    fn key(&self) -> &str;
    fn watched(&self) -> bool;
    /// Parse and publish `raw`, or the default when `raw` is `None`.
    fn apply(&self, raw: Option<&str>) -> Result<(), ConfigError>;
}

struct Setting<T> {
    name: &'static str,
    key: String,
    default: Option<&'static str>,
    parse: fn(&str) -> Result<T, String>,
    watched: bool,
    tx: watch::Sender<T>,
}

impl<T> Setting<T>
where
    T: Default + PartialEq + Send + Sync + 'static,
{
    fn new(
        name: &'static str,
        key: String,
        default: Option<&'static str>,
        parse: fn(&str) -> Result<T, String>,
        watched: bool,
    ) -> (Arc<Self>, watch::Receiver<T>) {
        let (tx, rx) = watch::channel(T::default());
        let setting = Setting {
            name,
            key,
            default,
            parse,
            watched,
            tx,
        };
        (Arc::new(setting), rx)
    }
}

impl<T> SettingSlot for Setting<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn watched(&self) -> bool {
        self.watched
    }

    fn apply(&self, raw: Option<&str>) -> Result<(), ConfigError> {
        let value = raw.or(self.default).ok_or_else(|| ConfigError::Required {
            key: self.key.clone(),
        })?;
        let parsed = (self.parse)(value).map_err(|reason| ConfigError::Invalid {
            key: self.key.clone(),
            value: value.to_string(),
            reason,
        })?;

        self.tx.send_if_modified(|current| {
            if *current == parsed {
                return false;
            }
            *current = parsed;
            true
        });
        Ok(())
    }
}

/// The fixed set of settings this service reads from etcd.
pub struct SettingsTable {
    slots: Vec<Arc<dyn SettingSlot>>,
    settings: Settings,
    /// Highest store revision seen by `load`
    revision: AtomicI64,
}

impl SettingsTable {
    /// Build the table, expanding `{{VAR}}` placeholders from the environment.
    pub fn from_env() -> Self {
        Self::new(|name| std::env::var(name).ok())
    }

    pub fn new(env: impl Fn(&str) -> Option<String>) -> Self {
        let (etcd_timeout, etcd_timeout_rx) = Setting::new(
            "etcd_timeout",
            expand_key(ETCD_TIMEOUT_KEY, &env),
            Some("10"),
            parse_seconds,
            true,
        );
        let (docker_timeout, docker_timeout_rx) = Setting::new(
            "docker_timeout",
            expand_key(DOCKER_TIMEOUT_KEY, &env),
            Some("10"),
            parse_seconds,
            true,
        );
        let (log_level, log_level_rx) = Setting::new(
            "log_level",
            expand_key(LOG_LEVEL_KEY, &env),
            Some("debug"),
            LogLevel::from_str,
            true,
        );

        let slots: Vec<Arc<dyn SettingSlot>> = vec![
            etcd_timeout as Arc<dyn SettingSlot>,
            docker_timeout as Arc<dyn SettingSlot>,
            log_level as Arc<dyn SettingSlot>,
        ];

        Self {
            slots,
            settings: Settings {
                etcd_timeout: etcd_timeout_rx,
                docker_timeout: docker_timeout_rx,
                log_level: log_level_rx,
            },
            revision: AtomicI64::new(0),
        }
    }

    /// Load every setting from `source`, falling back to defaults.
    ///
    /// Receivers are only handed out once every setting holds a loaded value.
    pub async fn load(&self, source: &dyn SettingsSource) -> Result<Settings, ConfigError> {
        for slot in &self.slots {
            let stored = source.fetch(slot.key()).await?;
            let from_store = stored.value.is_some();
            slot.apply(stored.value.as_deref())?;
            self.revision.fetch_max(stored.revision, Ordering::Relaxed);
            debug!(
                setting = slot.name(),
                key = slot.key(),
                from_store,
                revision = stored.revision,
                "Loaded setting"
            );
        }
        Ok(self.settings.clone())
    }

    /// Spawn one watcher per watched setting; they stop when `cancel` fires.
    ///
    /// Watchers start after the revision `load` read at, so nothing written
    /// in between is missed.
    pub fn watch(&self, client: Client, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let cursor = WatchCursor::after(self.loaded_revision());
        self.slots
            .iter()
            .filter(|slot| slot.watched())
            .map(|slot| {
                tokio::spawn(watch_setting(
                    client.clone(),
                    Arc::clone(slot),
                    cursor,
                    cancel.clone(),
                ))
            })
            .collect()
    }

    pub fn loaded_revision(&self) -> i64 {
        self.revision.load(Ordering::Relaxed)
    }

    /// Expanded etcd keys, in table order
    pub fn keys(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.key()).collect()
    }
}

async fn watch_setting(
    mut client: Client,
    slot: Arc<dyn SettingSlot>,
    mut cursor: WatchCursor,
    cancel: CancellationToken,
) {
    info!(
        setting = slot.name(),
        key = slot.key(),
        start_revision = ?cursor.start_revision(),
        "Add watcher"
    );

    loop {
        let watch = tokio::select! {
            _ = cancel.cancelled() => return,
            watch = client.watch(slot.key(), cursor.options()) => watch,
        };

        match watch {
            Ok((_watcher, mut stream)) => loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => return,
                    message = stream.message() => message,
                };
                match message {
                    Ok(Some(response)) => {
                        if response.compact_revision() > 0 {
                            warn!(
                                key = slot.key(),
                                compact_revision = response.compact_revision(),
                                "Watch revision compacted, re-reading config key"
                            );
                            resync(&mut client, &*slot, &mut cursor).await;
                            break;
                        }
                        if response.canceled() {
                            warn!(key = slot.key(), "Config watch cancelled by server");
                            break;
                        }
                        for event in response.events() {
                            let (change, revision) = event_change(event);
                            replay(&*slot, &mut cursor, change, revision);
                        }
                    }
                    Ok(None) => {
                        warn!(key = slot.key(), "Config watch stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(key = slot.key(), "Config watch error: {}", e);
                        break;
                    }
                }
            },
            Err(e) => warn!(key = slot.key(), "Failed to watch config key: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
        }
    }
}

fn event_change(event: &Event) -> (SettingChange, i64) {
    let revision = event.kv().map(|kv| kv.mod_revision()).unwrap_or(0);
    let change = match event.event_type() {
        EventType::Put => SettingChange::Put(
            event
                .kv()
                .map(|kv| String::from_utf8_lossy(kv.value()).into_owned())
                .unwrap_or_default(),
        ),
        EventType::Delete => SettingChange::Delete,
    };
    (change, revision)
}

/// Apply a change observed at `revision` and move the cursor past it.
fn replay(slot: &dyn SettingSlot, cursor: &mut WatchCursor, change: SettingChange, revision: i64) {
    cursor.observe(revision);
    apply_change(slot, change);
}

/// Re-read a key whose watch history was compacted away.
async fn resync(client: &mut Client, slot: &dyn SettingSlot, cursor: &mut WatchCursor) {
    match fetch_stored(client, slot.key()).await {
        Ok(stored) => {
            let change = match stored.value {
                Some(value) => SettingChange::Put(value),
                None => SettingChange::Delete,
            };
            replay(slot, cursor, change, stored.revision);
        }
        Err(e) => warn!(key = slot.key(), "Failed to re-read config key: {}", e),
    }
}

/// Apply a watched change; an invalid value keeps the previous one.
fn apply_change(slot: &dyn SettingSlot, change: SettingChange) {
    let result = match &change {
        SettingChange::Put(value) => slot.apply(Some(value)),
        SettingChange::Delete => slot.apply(None),
    };

    match result {
        Ok(()) => info!(setting = slot.name(), change = ?change, "Watched config value changed"),
        Err(e) => warn!(setting = slot.name(), "Ignoring config change: {}", e),
    }
}

/// Replace every `{{NAME}}` in `template` with the environment variable
/// `NAME`, or nothing if it is unset.
pub fn expand_key(template: &str, env: impl Fn(&str) -> Option<String>) -> String {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        expanded.push_str(&rest[..start]);
        expanded.push_str(&env(name).unwrap_or_default());
        rest = &rest[start + 2 + len + 2..];
    }

    expanded.push_str(rest);
    expanded
}

/// Whole seconds, greater than zero
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| "expected a whole number of seconds".to_string())?;
    if secs == 0 {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}
