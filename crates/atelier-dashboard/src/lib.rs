pub mod context;
pub mod notifications;
pub mod stats;

pub use context::AdminDashboard;
pub use notifications::{NewNotification, Notification, NotificationKind, NotificationStore};
pub use stats::{HttpStatsSource, StatsSource};
