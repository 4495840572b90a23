use std::sync::{Arc, Weak};
use std::time::Duration;

use atelier_common::{Error, Result};
use atelier_config::DashboardConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// A transient message shown to operators and admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Caller-supplied part of a notification; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }
}

/// Bounded, self-expiring list of notifications, newest first.
///
/// Every mutation swaps the whole list under the channel lock, so timer
/// expiry and user actions interleave without partial updates. Cloning
/// the store yields another handle to the same list.
#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<Inner>,
}

struct Inner {
    list: watch::Sender<Vec<Notification>>,
    ttl: Duration,
    capacity: usize,
    /// Runtime for expiry timers. `None` uses the caller's runtime.
    runtime: Option<Handle>,
}

impl Inner {
    fn remove(&self, id: Uuid) -> bool {
        self.list.send_if_modified(|list| {
            let before = list.len();
            list.retain(|n| n.id != id);
            list.len() != before
        })
    }
}

impl NotificationStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::build(ttl, capacity, None)
    }

    /// Store whose expiry timers run on `runtime`, so notifications can be
    /// added from threads outside it.
    pub fn with_runtime(ttl: Duration, capacity: usize, runtime: Handle) -> Self {
        Self::build(ttl, capacity, Some(runtime))
    }

    fn build(ttl: Duration, capacity: usize, runtime: Option<Handle>) -> Self {
        let (list, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                list,
                ttl,
                capacity: capacity.max(1),
                runtime,
            }),
        }
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(
            Duration::from_millis(config.notification_ttl_ms),
            config.notification_capacity,
        )
    }

    /// Stamp, prepend and schedule expiry of a notification. Entries past
    /// capacity are dropped immediately, oldest first.
    ///
    /// Fails without touching the list when no runtime is available to run
    /// the expiry timer.
    pub fn add_notification(&self, new: NewNotification) -> Result<Uuid> {
        let runtime = match &self.inner.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| {
                Error::Other(format!("notification expiry needs a tokio runtime: {e}"))
            })?,
        };

        let notification = Notification {
            id: Uuid::new_v4(),
            kind: new.kind,
            title: new.title,
            message: new.message,
            timestamp: Utc::now(),
            read: false,
        };
        let id = notification.id;
        let capacity = self.inner.capacity;

        self.inner.list.send_modify(|list| {
            list.insert(0, notification);
            list.truncate(capacity);
        });

        let deadline = Instant::now() + self.inner.ttl;
        let store: Weak<Inner> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = store.upgrade()
                && inner.remove(id)
            {
                debug!("notification expired: id={id}");
            }
        });

        Ok(id)
    }

    /// Remove a notification before its display window ends.
    pub fn dismiss(&self, id: Uuid) -> bool {
        self.inner.remove(id)
    }

    pub fn mark_read(&self, id: Uuid) -> bool {
        self.inner.list.send_if_modified(|list| {
            match list.iter_mut().find(|n| n.id == id && !n.read) {
                Some(n) => {
                    n.read = true;
                    true
                }
                None => false,
            }
        })
    }

    pub fn mark_all_read(&self) {
        self.inner.list.send_if_modified(|list| {
            let mut changed = false;
            for n in list.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed = true;
            }
            changed
        });
    }

    pub fn clear(&self) {
        self.inner.list.send_if_modified(|list| {
            let changed = !list.is_empty();
            list.clear();
            changed
        });
    }

    /// Snapshot of the current list, newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.inner.list.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.list.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.inner.list.borrow().iter().filter(|n| !n.read).count()
    }

    /// Receiver that observes every list replacement.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.inner.list.subscribe()
    }
}
