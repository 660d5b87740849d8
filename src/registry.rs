//! Live session registry with per-session idle supervision.
//!
//! Every registered session gets one supervisor task that wakes on a fixed
//! interval. A session that has not been touched for longer than the idle
//! timeout is removed from the registry and closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RegistrySettings;
use crate::security_log;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub check_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from(&RegistrySettings::default())
    }
}

impl From<&RegistrySettings> for RegistryConfig {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.check_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
        }
    }
}

struct Entry {
    session: Arc<dyn Session>,
    last_activity: Instant,
    cancel: CancellationToken,
    generation: u64,
}

struct Inner {
    config: RegistryConfig,
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

/// Shared handle to the registry; clones see the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.inner.config)
            .field("sessions", &self.len())
            .finish()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.inner.config
    }

    /// Track `session` under `id` and start its idle supervisor.
    ///
    /// Must be called inside a Tokio runtime. If `id` was already taken, the
    /// previous supervisor is stopped and the displaced session is returned
    /// unclosed.
    pub fn register(
        &self,
        id: impl Into<String>,
        session: Arc<dyn Session>,
    ) -> Option<Arc<dyn Session>> {
        let id = id.into();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let displaced = {
            let mut entries = self.inner.entries.lock();
            let previous = entries.insert(
                id.clone(),
                Entry {
                    session,
                    last_activity: Instant::now(),
                    cancel: cancel.clone(),
                    generation,
                },
            );
            previous.map(|old| {
                old.cancel.cancel();
                old.session
            })
        };

        if displaced.is_some() {
            tracing::debug!("Session {} re-registered; previous supervisor stopped", id);
        } else {
            tracing::debug!("Session {} registered", id);
        }

        tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            id,
            generation,
            cancel,
        ));
        displaced
    }

    /// Record activity on `id`. Returns `false` for unknown ids.
    pub fn touch(&self, id: &str) -> bool {
        match self.inner.entries.lock().get_mut(id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Stop tracking `id` without closing its session.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Session>> {
        let entry = self.inner.entries.lock().remove(id)?;
        entry.cancel.cancel();
        tracing::debug!("Session {} unregistered", id);
        Some(entry.session)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister and close every session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, Entry)> = self.inner.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.cancel.cancel();
            if let Err(e) = entry.session.close().await {
                tracing::warn!("Failed to close session {}: {}", id, e);
            }
        }
        if count > 0 {
            tracing::info!("Closed {} registered sessions", count);
        }
        count
    }
}

/// Idle watchdog for one registry entry.
async fn supervise(inner: Weak<Inner>, id: String, generation: u64, cancel: CancellationToken) {
    let interval = match inner.upgrade() {
        Some(inner) => inner.config.check_interval,
        None => return,
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };

        let evicted = {
            let mut entries = inner.entries.lock();
            let idle = match entries.get(&id) {
                Some(entry) if entry.generation == generation => entry.last_activity.elapsed(),
                _ => return,
            };
            if idle > inner.config.idle_timeout {
                entries.remove(&id).map(|entry| (entry.session, idle))
            } else {
                None
            }
        };

        if let Some((session, idle)) = evicted {
            security_log::log_session_evicted(&id, idle.as_secs());
            if let Err(e) = session.close().await {
                tracing::warn!("Failed to close idle session {}: {}", id, e);
            }
            return;
        }
    }
}
