//! Root state and its persisted projection.

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::persist::{Migrations, Partialize};
use crate::slices::app::AppState;
use crate::slices::auth::AuthState;
use crate::types::{Language, Role, Theme, User, UserPreferences};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current persisted schema version.
///
/// - v0: unversioned; locales stored as short codes (`"zh"`, `"en"`).
/// - v1: full locale tags; user preferences use `notifications`, user `role` stored.
/// - v2: `notificationsEnabled`; `role` no longer persisted.
pub const PERSIST_VERSION: u32 = 2;

/// Bookkeeping that belongs to the store rather than a slice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMeta {
    /// Set once startup rehydration has run, whether or not it restored anything.
    pub has_hydrated: bool,
}

/// All slices at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RootState {
    pub auth: AuthState,
    pub app: AppState,
    pub meta: StoreMeta,
}

impl RootState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            auth: AuthState::default(),
            app: AppState::new(config),
            meta: StoreMeta::default(),
        }
    }
}

/// The persisted subset of a [`User`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub preferences: UserPreferences,
}

/// What of [`RootState`] may reach durable storage. Loading flags, errors,
/// notifications, modals and page state are deliberately absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedView {
    #[serde(default)]
    pub current_user: Option<PersistedUser>,
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub sidebar_open: Option<bool>,
}

impl Partialize for RootState {
    type View = PersistedView;

    fn partialize(&self) -> PersistedView {
        PersistedView {
            current_user: self.auth.current_user().map(|user| PersistedUser {
                id: user.id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
                avatar: user.avatar.clone(),
                preferences: user.preferences.clone(),
            }),
            theme: Some(self.app.theme),
            language: Some(self.app.language),
            sidebar_open: Some(self.app.sidebar_open),
        }
    }

    fn merge(&mut self, view: PersistedView) {
        if let Some(user) = view.current_user {
            // Roles are not read from local storage. A restored session gets
            // the same role a fresh provider sign-in maps to.
            self.auth.set_current_user(Some(User {
                id: user.id,
                name: user.name,
                email: user.email,
                avatar: user.avatar,
                role: Role::User,
                preferences: user.preferences,
            }));
        }
        if let Some(theme) = view.theme {
            self.app.theme = theme;
        }
        if let Some(language) = view.language {
            self.app.language = language;
        }
        if let Some(open) = view.sidebar_open {
            self.app.sidebar_open = open;
        }
    }
}

/// Migration chain up to [`PERSIST_VERSION`].
pub fn migrations() -> Migrations {
    Migrations::new()
        .step(0, "expand short locale codes", |mut view| {
            let root = as_object(&mut view, 0)?;
            expand_locale(root.get_mut("language"));
            if let Some(prefs) = user_preferences(root) {
                expand_locale(prefs.get_mut("language"));
            }
            Ok(view)
        })
        .step(1, "rename notifications flag, drop persisted role", |mut view| {
            let root = as_object(&mut view, 1)?;
            if let Some(Value::Object(user)) = root.get_mut("currentUser") {
                user.remove("role");
            }
            if let Some(prefs) = user_preferences(root) {
                if let Some(flag) = prefs.remove("notifications") {
                    prefs.entry("notificationsEnabled").or_insert(flag);
                }
            }
            Ok(view)
        })
}

fn as_object(view: &mut Value, from: u32) -> Result<&mut Map<String, Value>, StoreError> {
    view.as_object_mut().ok_or_else(|| StoreError::Migration {
        from,
        reason: "persisted view is not an object".into(),
    })
}

fn user_preferences(root: &mut Map<String, Value>) -> Option<&mut Map<String, Value>> {
    match root.get_mut("currentUser") {
        Some(Value::Object(user)) => match user.get_mut("preferences") {
            Some(Value::Object(prefs)) => Some(prefs),
            _ => None,
        },
        _ => None,
    }
}

fn expand_locale(value: Option<&mut Value>) {
    if let Some(value) = value {
        let expanded = match value.as_str() {
            Some("zh") => "zh-CN",
            Some("en") => "en-US",
            _ => return,
        };
        *value = Value::String(expanded.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ada() -> User {
        User {
            id: "u1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            avatar: None,
            role: Role::Admin,
            preferences: UserPreferences::default(),
        }
    }

    #[test]
    fn test_partialize_excludes_ephemeral_state() {
        let mut state = RootState::default();
        state.auth.set_current_user(Some(ada()));
        state.auth.loading = true;
        state.auth.error = Some("boom".into());
        state.app.page_title = "Projects".into();

        let value = serde_json::to_value(state.partialize()).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["currentUser", "language", "sidebarOpen", "theme"]);
        assert!(value["currentUser"].get("role").is_none());
        assert!(!value.to_string().contains("boom"));
    }

    #[test]
    fn test_merge_restores_user_with_default_role() {
        let mut source = RootState::default();
        source.auth.set_current_user(Some(ada()));
        source.app.theme = Theme::Dark;

        let mut restored = RootState::default();
        restored.merge(source.partialize());

        let user = restored.auth.current_user().unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, Role::User);
        assert!(restored.auth.is_authenticated());
        assert_eq!(restored.app.theme, Theme::Dark);
        assert!(!restored.auth.loading);
    }

    #[test]
    fn test_v1_record_migrates_without_loss() {
        let v1 = json!({
            "currentUser": {
                "id": "u1",
                "name": "Ada",
                "email": "ada@example.com",
                "avatar": "a.png",
                "role": "admin",
                "preferences": {"theme": "dark", "language": "en-US", "notifications": false}
            },
            "theme": "light",
            "language": "en-US",
            "sidebarOpen": true
        });

        let migrated = migrations().run(v1, 1, PERSIST_VERSION).unwrap();
        let view: PersistedView = serde_json::from_value(migrated).unwrap();

        let user = view.current_user.unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.avatar.as_deref(), Some("a.png"));
        assert_eq!(user.preferences.theme, Theme::Dark);
        assert_eq!(user.preferences.language, Language::EnUs);
        assert!(!user.preferences.notifications_enabled);
        assert_eq!(view.theme, Some(Theme::Light));
        assert_eq!(view.sidebar_open, Some(true));
    }

    #[test]
    fn test_v0_record_migrates_through_chain() {
        let v0 = json!({
            "currentUser": null,
            "theme": "dark",
            "language": "en",
            "sidebarOpen": false
        });

        let migrated = migrations().run(v0, 0, PERSIST_VERSION).unwrap();
        let view: PersistedView = serde_json::from_value(migrated).unwrap();
        assert_eq!(view.language, Some(Language::EnUs));
        assert_eq!(view.theme, Some(Theme::Dark));
        assert!(view.current_user.is_none());
    }

    #[test]
    fn test_non_object_view_fails_migration() {
        let err = migrations().run(json!([1, 2]), 0, PERSIST_VERSION).unwrap_err();
        assert!(matches!(err, StoreError::Migration { from: 0, .. }));
    }
}
