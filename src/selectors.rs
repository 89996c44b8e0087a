//! Narrow, memoized read views over [`RootState`].
//!
//! Each view projects the fields one concern needs. A [`Selector`] caches the
//! last projection and hands back the same `Arc` while the projected value is
//! unchanged, so consumers can compare by pointer to skip work. Reading the
//! same snapshot version twice does not project again.

use crate::config::AppConfig;
use crate::state::RootState;
use crate::store::Snapshot;
use crate::types::{Language, ModalEntry, Notification, Theme, User, UserPreferences, Version};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthView {
    pub current_user: Option<User>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PreferencesView {
    /// `None` when signed out.
    pub preferences: Option<UserPreferences>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ThemeView {
    pub theme: Theme,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LanguageView {
    pub language: Language,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarView {
    pub sidebar_open: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileMenuView {
    pub mobile_menu_open: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationView {
    pub sidebar_open: bool,
    pub mobile_menu_open: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub page_loading: bool,
    pub page_title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationsView {
    pub notifications: Vec<Notification>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModalsView {
    pub modals: BTreeMap<String, ModalEntry>,
}

/// One modal. An id that was never opened reads as closed with no data.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalView {
    pub is_open: bool,
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigView {
    pub config: AppConfig,
}

/// The auth slice's loading/error envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AsyncStateView {
    pub loading: bool,
    pub error: Option<String>,
}

pub fn auth(state: &RootState) -> AuthView {
    AuthView {
        current_user: state.auth.current_user().cloned(),
        is_authenticated: state.auth.is_authenticated(),
        loading: state.auth.loading,
        error: state.auth.error.clone(),
    }
}

pub fn preferences(state: &RootState) -> PreferencesView {
    PreferencesView {
        preferences: state.auth.current_user().map(|u| u.preferences.clone()),
    }
}

pub fn theme(state: &RootState) -> ThemeView {
    ThemeView {
        theme: state.app.theme,
    }
}

pub fn language(state: &RootState) -> LanguageView {
    LanguageView {
        language: state.app.language,
    }
}

pub fn sidebar(state: &RootState) -> SidebarView {
    SidebarView {
        sidebar_open: state.app.sidebar_open,
    }
}

pub fn mobile_menu(state: &RootState) -> MobileMenuView {
    MobileMenuView {
        mobile_menu_open: state.app.mobile_menu_open,
    }
}

pub fn navigation(state: &RootState) -> NavigationView {
    NavigationView {
        sidebar_open: state.app.sidebar_open,
        mobile_menu_open: state.app.mobile_menu_open,
    }
}

pub fn page(state: &RootState) -> PageView {
    PageView {
        page_loading: state.app.page_loading,
        page_title: state.app.page_title.clone(),
    }
}

pub fn notifications(state: &RootState) -> NotificationsView {
    NotificationsView {
        notifications: state.app.notifications.clone(),
    }
}

pub fn modals(state: &RootState) -> ModalsView {
    ModalsView {
        modals: state.app.modals.clone(),
    }
}

pub fn modal(state: &RootState, id: &str) -> ModalView {
    match state.app.modal(id) {
        Some(entry) => ModalView {
            is_open: entry.open,
            data: entry.data.clone(),
        },
        None => ModalView {
            is_open: false,
            data: None,
        },
    }
}

pub fn config(state: &RootState) -> ConfigView {
    ConfigView {
        config: state.app.config.clone(),
    }
}

pub fn async_state(state: &RootState) -> AsyncStateView {
    AsyncStateView {
        loading: state.auth.loading,
        error: state.auth.error.clone(),
    }
}

type Projection<V> = Box<dyn Fn(&RootState) -> V + Send + Sync>;

/// Memoizing wrapper around a projection.
///
/// Versions are only comparable within one store, so a selector must not be
/// shared between stores.
pub struct Selector<V> {
    project: Projection<V>,
    cached: Mutex<Option<(Version, Arc<V>)>>,
}

impl<V: PartialEq> Selector<V> {
    pub fn new<F>(project: F) -> Self
    where
        F: Fn(&RootState) -> V + Send + Sync + 'static,
    {
        Self {
            project: Box::new(project),
            cached: Mutex::new(None),
        }
    }

    /// Project `snapshot`, reusing the cached value when nothing it covers changed.
    pub fn select(&self, snapshot: &Snapshot<RootState>) -> Arc<V> {
        let mut cached = self.cached.lock();
        if let Some((version, prev)) = cached.as_ref() {
            if *version == snapshot.version {
                return Arc::clone(prev);
            }
        }

        let next = (self.project)(snapshot.state());
        let value = match cached.take() {
            Some((_, prev)) if *prev == next => prev,
            _ => Arc::new(next),
        };
        *cached = Some((snapshot.version, Arc::clone(&value)));
        value
    }
}

impl<V> fmt::Debug for Selector<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("cached", &self.cached.lock().is_some())
            .finish()
    }
}

/// One memoized selector per view.
pub struct Selectors {
    auth: Selector<AuthView>,
    preferences: Selector<PreferencesView>,
    theme: Selector<ThemeView>,
    language: Selector<LanguageView>,
    sidebar: Selector<SidebarView>,
    mobile_menu: Selector<MobileMenuView>,
    navigation: Selector<NavigationView>,
    page: Selector<PageView>,
    notifications: Selector<NotificationsView>,
    modals: Selector<ModalsView>,
    /// Only ids present in the registry get a selector.
    modal: Mutex<HashMap<String, Arc<Selector<ModalView>>>>,
    /// Shared view for ids that were never opened.
    closed_modal: Arc<ModalView>,
    config: Selector<ConfigView>,
    async_state: Selector<AsyncStateView>,
}

impl Default for Selectors {
    fn default() -> Self {
        Self::new()
    }
}

impl Selectors {
    pub fn new() -> Self {
        Self {
            auth: Selector::new(auth),
            preferences: Selector::new(preferences),
            theme: Selector::new(theme),
            language: Selector::new(language),
            sidebar: Selector::new(sidebar),
            mobile_menu: Selector::new(mobile_menu),
            navigation: Selector::new(navigation),
            page: Selector::new(page),
            notifications: Selector::new(notifications),
            modals: Selector::new(modals),
            modal: Mutex::new(HashMap::new()),
            closed_modal: Arc::new(ModalView {
                is_open: false,
                data: None,
            }),
            config: Selector::new(config),
            async_state: Selector::new(async_state),
        }
    }

    pub fn auth(&self, snapshot: &Snapshot<RootState>) -> Arc<AuthView> {
        self.auth.select(snapshot)
    }

    pub fn preferences(&self, snapshot: &Snapshot<RootState>) -> Arc<PreferencesView> {
        self.preferences.select(snapshot)
    }

    pub fn theme(&self, snapshot: &Snapshot<RootState>) -> Arc<ThemeView> {
        self.theme.select(snapshot)
    }

    pub fn language(&self, snapshot: &Snapshot<RootState>) -> Arc<LanguageView> {
        self.language.select(snapshot)
    }

    pub fn sidebar(&self, snapshot: &Snapshot<RootState>) -> Arc<SidebarView> {
        self.sidebar.select(snapshot)
    }

    pub fn mobile_menu(&self, snapshot: &Snapshot<RootState>) -> Arc<MobileMenuView> {
        self.mobile_menu.select(snapshot)
    }

    pub fn navigation(&self, snapshot: &Snapshot<RootState>) -> Arc<NavigationView> {
        self.navigation.select(snapshot)
    }

    pub fn page(&self, snapshot: &Snapshot<RootState>) -> Arc<PageView> {
        self.page.select(snapshot)
    }

    pub fn notifications(&self, snapshot: &Snapshot<RootState>) -> Arc<NotificationsView> {
        self.notifications.select(snapshot)
    }

    pub fn modals(&self, snapshot: &Snapshot<RootState>) -> Arc<ModalsView> {
        self.modals.select(snapshot)
    }

    /// View of a single modal; its selector is created once the id is in the
    /// registry.
    pub fn modal(&self, snapshot: &Snapshot<RootState>, id: &str) -> Arc<ModalView> {
        if snapshot.app.modal(id).is_none() {
            return Arc::clone(&self.closed_modal);
        }
        let selector = {
            let mut by_id = self.modal.lock();
            if !by_id.contains_key(id) {
                // Drop selectors for ids a reset removed.
                by_id.retain(|known, _| snapshot.app.modals.contains_key(known));
            }
            let selector = by_id.entry(id.to_string()).or_insert_with(|| {
                let id = id.to_string();
                Arc::new(Selector::new(move |state| modal(state, &id)))
            });
            Arc::clone(selector)
        };
        selector.select(snapshot)
    }

    pub fn config(&self, snapshot: &Snapshot<RootState>) -> Arc<ConfigView> {
        self.config.select(snapshot)
    }

    pub fn async_state(&self, snapshot: &Snapshot<RootState>) -> Arc<AsyncStateView> {
        self.async_state.select(snapshot)
    }
}

impl fmt::Debug for Selectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selectors")
            .field("modal_selectors", &self.modal.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::{Role, UserPreferences};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Store<RootState> {
        Store::builder("selectors", RootState::default()).build()
    }

    #[test]
    fn test_selector_keeps_identity_while_unchanged() {
        let selectors = Selectors::new();
        let store = store();

        let first = selectors.theme(&store.snapshot());
        store.mutate("title", |s| s.app.page_title = "Other".into());
        let second = selectors.theme(&store.snapshot());
        assert!(Arc::ptr_eq(&first, &second));

        store.mutate("theme", |s| s.app.theme = Theme::Dark);
        let third = selectors.theme(&store.snapshot());
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(third.theme, Theme::Dark);
    }

    #[test]
    fn test_selector_projects_once_per_version() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let selector = Selector::new(move |state: &RootState| {
            counted.fetch_add(1, Ordering::SeqCst);
            state.app.page_title.clone()
        });
        let store = store();

        let snapshot = store.snapshot();
        let first = selector.select(&snapshot);
        let again = selector.select(&snapshot);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.mutate("sidebar", |s| s.app.sidebar_open = !s.app.sidebar_open);
        let unchanged = selector.select(&store.snapshot());
        assert!(Arc::ptr_eq(&first, &unchanged));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        selector.select(&store.snapshot());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_auth_view_tracks_user() {
        let selectors = Selectors::new();
        let store = store();
        assert!(!selectors.auth(&store.snapshot()).is_authenticated);
        assert_eq!(selectors.preferences(&store.snapshot()).preferences, None);

        store.mutate("login", |s| {
            s.auth.set_current_user(Some(User {
                id: "u1".into(),
                name: "Ada".into(),
                email: "ada@example.com".into(),
                avatar: None,
                role: Role::User,
                preferences: UserPreferences::default(),
            }))
        });
        let view = selectors.auth(&store.snapshot());
        assert!(view.is_authenticated);
        assert_eq!(view.current_user.as_ref().map(|u| u.id.as_str()), Some("u1"));
        assert!(selectors.preferences(&store.snapshot()).preferences.is_some());
    }

    #[test]
    fn test_modal_view_for_unknown_id() {
        let selectors = Selectors::new();
        let snapshot = store().snapshot();
        let view = selectors.modal(&snapshot, "missing");
        assert!(!view.is_open);
        assert!(view.data.is_none());
        assert!(Arc::ptr_eq(&view, &selectors.modal(&snapshot, "missing")));
    }

    #[test]
    fn test_unknown_modal_ids_do_not_grow_the_cache() {
        let selectors = Selectors::new();
        let store = store();
        let snapshot = store.snapshot();
        for i in 0..100 {
            selectors.modal(&snapshot, &format!("never-opened-{i}"));
        }
        assert_eq!(selectors.modal.lock().len(), 0);

        store.mutate("open", |s| {
            s.app.modals.insert(
                "confirm".into(),
                ModalEntry {
                    open: true,
                    data: None,
                },
            );
        });
        assert!(selectors.modal(&store.snapshot(), "confirm").is_open);
        assert_eq!(selectors.modal.lock().len(), 1);

        store.reset();
        store.mutate("open", |s| {
            s.app.modals.insert(
                "share".into(),
                ModalEntry {
                    open: true,
                    data: None,
                },
            );
        });
        assert!(!selectors.modal(&store.snapshot(), "confirm").is_open);
        assert!(selectors.modal(&store.snapshot(), "share").is_open);
        let by_id = selectors.modal.lock();
        assert_eq!(by_id.len(), 1);
        assert!(by_id.contains_key("share"));
    }

    #[test]
    fn test_navigation_view_combines_flags() {
        let mut state = RootState::default();
        state.app.mobile_menu_open = true;
        let view = navigation(&state);
        assert!(!view.sidebar_open);
        assert!(view.mobile_menu_open);
    }
}
