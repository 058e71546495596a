// src/engine/core.rs

//! Pure routing of service notifications.
//!
//! Given the tracker and one notification, decide whether the views need a
//! refresh and whether (and how) the file listeners must be re-registered.
//! No channels, no timers, no IO: the runtime executes the decision.

use crate::engine::ServiceNotification;
use crate::present::RefreshScope;
use crate::server::ServerModeTracker;

/// Decision for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationStep {
    pub refresh: Option<RefreshScope>,
    /// `Some(debounce)` when listeners must be re-registered.
    pub rebind: Option<bool>,
}

/// Route `notification`, updating `tracker` for mode changes.
///
/// - classpath update: debounced rebind
/// - project import: debounced rebind
/// - mode change: record the mode; if it actually changed, refresh
///   everything, then rebind immediately
pub fn route_notification(
    tracker: &ServerModeTracker,
    notification: ServiceNotification,
) -> NotificationStep {
    match notification {
        ServiceNotification::ClasspathUpdated | ServiceNotification::ProjectsImported => {
            NotificationStep {
                refresh: None,
                rebind: Some(true),
            }
        }
        ServiceNotification::ServerModeChanged(mode) => {
            if tracker.set(mode) {
                NotificationStep {
                    refresh: Some(RefreshScope::All),
                    rebind: Some(false),
                }
            } else {
                NotificationStep::default()
            }
        }
    }
}
