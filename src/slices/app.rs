//! App slice: UI preferences, navigation flags, page metadata, notifications
//! and the modal registry.

use crate::config::{AppConfig, ConfigPatch};
use crate::state::RootState;
use crate::store::Store;
use crate::types::{Language, ModalEntry, NewNotification, Notification, NotificationId, NotificationKind, Theme};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Title shown until a page sets its own.
pub const DEFAULT_PAGE_TITLE: &str = "Jayce Yang's Portfolio";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub theme: Theme,
    pub language: Language,
    pub sidebar_open: bool,
    pub mobile_menu_open: bool,
    pub page_loading: bool,
    pub page_title: String,
    /// In insertion order.
    pub notifications: Vec<Notification>,
    /// Entries are created on first open and never removed.
    pub modals: BTreeMap<String, ModalEntry>,
    pub config: AppConfig,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            theme: Theme::default(),
            language: Language::default(),
            sidebar_open: false,
            mobile_menu_open: false,
            page_loading: false,
            page_title: DEFAULT_PAGE_TITLE.to_string(),
            notifications: Vec::new(),
            modals: BTreeMap::new(),
            config,
        }
    }

    pub fn modal(&self, id: &str) -> Option<&ModalEntry> {
        self.modals.get(id)
    }

    pub fn is_modal_open(&self, id: &str) -> bool {
        self.modals.get(id).is_some_and(|m| m.open)
    }
}

/// App actions over a store.
///
/// Holds the store's `Arc` so expiry timers can keep a weak reference to it.
pub struct AppSlice<'a> {
    store: &'a Arc<Store<RootState>>,
    /// Restored by [`AppSlice::reset`].
    defaults: &'a AppState,
}

impl<'a> AppSlice<'a> {
    pub fn new(store: &'a Arc<Store<RootState>>) -> Self {
        Self {
            defaults: &store.defaults().app,
            store,
        }
    }

    // --- Preferences ---

    pub fn set_theme(&self, theme: Theme) {
        self.store.mutate("app/set-theme", |s| s.app.theme = theme);
    }

    /// Advance light, dark, system, light, ...
    pub fn toggle_theme(&self) {
        self.store
            .mutate("app/toggle-theme", |s| s.app.theme = s.app.theme.cycle());
    }

    pub fn set_language(&self, language: Language) {
        self.store
            .mutate("app/set-language", |s| s.app.language = language);
    }

    // --- Navigation ---

    pub fn set_sidebar_open(&self, open: bool) {
        self.store
            .mutate("app/set-sidebar-open", |s| s.app.sidebar_open = open);
    }

    pub fn toggle_sidebar(&self) {
        self.store
            .mutate("app/toggle-sidebar", |s| s.app.sidebar_open = !s.app.sidebar_open);
    }

    pub fn set_mobile_menu_open(&self, open: bool) {
        self.store
            .mutate("app/set-mobile-menu-open", |s| s.app.mobile_menu_open = open);
    }

    pub fn toggle_mobile_menu(&self) {
        self.store.mutate("app/toggle-mobile-menu", |s| {
            s.app.mobile_menu_open = !s.app.mobile_menu_open
        });
    }

    /// Close both the sidebar and the mobile menu in one commit.
    pub fn close_navigation(&self) {
        self.store.mutate("app/close-navigation", |s| {
            s.app.sidebar_open = false;
            s.app.mobile_menu_open = false;
        });
    }

    // --- Page ---

    pub fn set_page_loading(&self, loading: bool) {
        self.store
            .mutate("app/set-page-loading", |s| s.app.page_loading = loading);
    }

    pub fn set_page_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.store
            .mutate("app/set-page-title", |s| s.app.page_title = title);
    }

    // --- Notifications ---

    /// Append a notification and, unless its duration is zero, schedule its removal.
    ///
    /// Expiry needs a tokio runtime. Without one the notification stays until
    /// removed explicitly.
    pub fn add_notification(&self, notification: NewNotification) -> NotificationId {
        let notification = notification.into_notification();
        let id = notification.id.clone();
        let duration_ms = notification.duration_ms;

        self.store
            .mutate("app/add-notification", |s| s.app.notifications.push(notification));

        if duration_ms > 0 {
            schedule_expiry(Arc::downgrade(self.store), id.clone(), Duration::from_millis(duration_ms));
        }
        id
    }

    pub fn notify_success(&self, title: impl Into<String>, message: Option<String>) -> NotificationId {
        self.notify(NotificationKind::Success, title.into(), message)
    }

    pub fn notify_error(&self, title: impl Into<String>, message: Option<String>) -> NotificationId {
        self.notify(NotificationKind::Error, title.into(), message)
    }

    pub fn notify_warning(&self, title: impl Into<String>, message: Option<String>) -> NotificationId {
        self.notify(NotificationKind::Warning, title.into(), message)
    }

    pub fn notify_info(&self, title: impl Into<String>, message: Option<String>) -> NotificationId {
        self.notify(NotificationKind::Info, title.into(), message)
    }

    fn notify(&self, kind: NotificationKind, title: String, message: Option<String>) -> NotificationId {
        let mut notification = NewNotification::new(kind, title);
        notification.message = message;
        self.add_notification(notification)
    }

    /// Remove one notification. Unknown ids are ignored.
    pub fn remove_notification(&self, id: &NotificationId) {
        remove_notification(self.store, id);
    }

    /// Drop every notification. Pending expiry timers still fire, harmlessly.
    pub fn clear_notifications(&self) {
        self.store
            .mutate("app/clear-notifications", |s| s.app.notifications.clear());
    }

    // --- Modals ---

    /// Open a modal, creating its entry or overwriting its data.
    pub fn open_modal(&self, id: impl Into<String>, data: Option<serde_json::Value>) {
        let id = id.into();
        self.store.mutate("app/open-modal", |s| {
            s.app.modals.insert(id, ModalEntry { open: true, data });
        });
    }

    /// Close a modal and clear its data. The entry itself is kept, and an id
    /// that was never opened gets no entry.
    pub fn close_modal(&self, id: &str) {
        self.store.mutate("app/close-modal", |s| {
            if let Some(entry) = s.app.modals.get_mut(id) {
                entry.open = false;
                entry.data = None;
            }
        });
    }

    pub fn close_all_modals(&self) {
        self.store.mutate("app/close-all-modals", |s| {
            for entry in s.app.modals.values_mut() {
                entry.open = false;
                entry.data = None;
            }
        });
    }

    // --- Config ---

    pub fn update_config(&self, patch: ConfigPatch) {
        self.store
            .mutate("app/update-config", |s| patch.apply(&mut s.app.config));
    }

    /// Restore the app slice to its startup defaults.
    pub fn reset(&self) {
        let defaults = self.defaults.clone();
        self.store.mutate("app/reset", |s| s.app = defaults);
    }
}

fn remove_notification(store: &Store<RootState>, id: &NotificationId) {
    store.mutate("app/remove-notification", |s| {
        s.app.notifications.retain(|n| &n.id != id)
    });
}

fn schedule_expiry(store: Weak<Store<RootState>>, id: NotificationId, after: Duration) {
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            warn!(id = %id, "no tokio runtime, notification will not expire");
            return;
        }
    };

    runtime.spawn(async move {
        tokio::time::sleep(after).await;
        match store.upgrade() {
            Some(store) => remove_notification(&store, &id),
            None => debug!(id = %id, "store dropped before notification expired"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Arc<Store<RootState>> {
        Arc::new(Store::builder("test", RootState::default()).build())
    }

    #[test]
    fn test_toggle_theme_cycles() {
        let store = store();
        let app = AppSlice::new(&store);
        app.set_theme(Theme::Light);

        let mut seen = Vec::new();
        for _ in 0..4 {
            app.toggle_theme();
            seen.push(store.snapshot().app.theme);
        }
        assert_eq!(seen, vec![Theme::Dark, Theme::System, Theme::Light, Theme::Dark]);
    }

    #[test]
    fn test_close_navigation() {
        let store = store();
        let app = AppSlice::new(&store);
        app.toggle_sidebar();
        app.set_mobile_menu_open(true);

        app.close_navigation();
        let snapshot = store.snapshot();
        assert!(!snapshot.app.sidebar_open);
        assert!(!snapshot.app.mobile_menu_open);
    }

    #[test]
    fn test_modal_lifecycle_keeps_key() {
        let store = store();
        let app = AppSlice::new(&store);

        app.open_modal("login", Some(json!({"from": "nav"})));
        assert!(store.snapshot().app.is_modal_open("login"));

        app.close_modal("login");
        let snapshot = store.snapshot();
        let entry = snapshot.app.modal("login").unwrap();
        assert!(!entry.open);
        assert_eq!(entry.data, None);
    }

    #[test]
    fn test_close_unknown_modal_creates_nothing() {
        let store = store();
        let app = AppSlice::new(&store);
        app.close_modal("m");
        assert!(store.snapshot().app.modal("m").is_none());
        assert!(!store.snapshot().app.is_modal_open("m"));
    }

    #[test]
    fn test_close_all_modals() {
        let store = store();
        let app = AppSlice::new(&store);
        app.open_modal("a", Some(json!(1)));
        app.open_modal("b", None);

        app.close_all_modals();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.app.modals.len(), 2);
        assert!(snapshot.app.modals.values().all(|m| !m.open && m.data.is_none()));
    }

    #[test]
    fn test_sticky_notification_without_runtime() {
        let store = store();
        let app = AppSlice::new(&store);
        let id = app.add_notification(NewNotification::new(NotificationKind::Info, "hi").sticky());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.app.notifications.len(), 1);
        assert_eq!(snapshot.app.notifications[0].id, id);
        assert_eq!(snapshot.app.notifications[0].duration_ms, 0);
    }

    #[test]
    fn test_remove_notification_is_idempotent() {
        let store = store();
        let app = AppSlice::new(&store);
        let keep = app.notify_info("keep", None);
        let gone = app.notify_error("gone", Some("details".into()));

        app.remove_notification(&gone);
        app.remove_notification(&gone);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.app.notifications.len(), 1);
        assert_eq!(snapshot.app.notifications[0].id, keep);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_expires() {
        let store = store();
        let app = AppSlice::new(&store);
        app.add_notification(NewNotification::new(NotificationKind::Success, "x").with_duration_ms(100));
        app.add_notification(NewNotification::new(NotificationKind::Success, "y").sticky());

        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.app.notifications.len(), 1);
        assert_eq!(snapshot.app.notifications[0].title, "y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_notification_timer_is_harmless() {
        let store = store();
        let app = AppSlice::new(&store);
        app.add_notification(NewNotification::new(NotificationKind::Success, "x").with_duration_ms(50));
        app.clear_notifications();
        app.add_notification(NewNotification::new(NotificationKind::Warning, "later").sticky());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.snapshot().app.notifications.len(), 1);
    }

    #[test]
    fn test_update_config_and_reset() {
        let store = store();
        let app = AppSlice::new(&store);
        app.set_page_title("Projects");
        app.update_config(ConfigPatch {
            api_base_url: Some("https://api.example.com".into()),
            ..Default::default()
        });
        assert_eq!(store.snapshot().app.config.api_base_url, "https://api.example.com");

        app.reset();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.app.page_title, DEFAULT_PAGE_TITLE);
        assert_eq!(snapshot.app.config, AppConfig::default());
    }
}
