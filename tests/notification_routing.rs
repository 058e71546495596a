use testrelay::engine::{route_notification, NotificationStep, ServiceNotification};
use testrelay::present::RefreshScope;
use testrelay::server::ServerModeTracker;
use testrelay::types::ServerMode;

#[test]
fn classpath_and_imports_request_debounced_rebind() {
    let tracker = ServerModeTracker::new(ServerMode::Standard);

    for notification in [
        ServiceNotification::ClasspathUpdated,
        ServiceNotification::ProjectsImported,
    ] {
        let step = route_notification(&tracker, notification);
        assert_eq!(step.rebind, Some(true));
        assert_eq!(step.refresh, None);
    }
    assert_eq!(tracker.get(), ServerMode::Standard);
}

#[test]
fn mode_change_updates_tracker_then_refreshes_and_rebinds() {
    let tracker = ServerModeTracker::new(ServerMode::LightWeight);
    assert!(tracker.is_light_weight());

    let step = route_notification(
        &tracker,
        ServiceNotification::ServerModeChanged(ServerMode::Standard),
    );
    assert_eq!(
        step,
        NotificationStep {
            refresh: Some(RefreshScope::All),
            rebind: Some(false),
        }
    );
    assert!(tracker.is_standard_ready());
}

#[test]
fn repeated_mode_is_ignored() {
    let tracker = ServerModeTracker::new(ServerMode::Hybrid);

    let step = route_notification(
        &tracker,
        ServiceNotification::ServerModeChanged(ServerMode::Hybrid),
    );
    assert_eq!(step, NotificationStep::default());
    assert!(tracker.is_hybrid());
    assert!(!tracker.is_standard_ready());
}

#[test]
fn tracker_reports_whether_mode_changed() {
    let tracker = ServerModeTracker::default();
    assert_eq!(tracker.get(), ServerMode::Unknown);
    assert!(tracker.is_standard_ready(), "unknown mode predates mode reporting");

    assert!(tracker.set(ServerMode::LightWeight));
    assert!(!tracker.set(ServerMode::LightWeight));
    assert!(tracker.set(ServerMode::Standard));
    assert_eq!(tracker.get(), ServerMode::Standard);
}
