//! Composition root: wires the store, its pipeline, the slices and the
//! identity provider together.
//!
//! Lifecycle: [`RootStore::init`] builds the store and rehydrates persisted
//! state, [`RootStore::start`] begins folding provider events, and
//! [`RootStore::reset`] returns every slice to its defaults.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::middleware::{DevtoolsInspector, InspectorHandle, Middleware};
use crate::persist::{DurableStorage, PersistAdapter};
use crate::provider::IdentityProvider;
use crate::selectors::{
    AsyncStateView, AuthView, ConfigView, LanguageView, MobileMenuView, ModalView, ModalsView, NavigationView,
    NotificationsView, PageView, PreferencesView, Selectors, SidebarView, ThemeView,
};
use crate::slices::auth::spawn_auth_listener;
use crate::slices::{AppSlice, AuthListener, AuthSlice};
use crate::state::{migrations, RootState, PERSIST_VERSION};
use crate::store::{Snapshot, Store};
use crate::subscriptions::SubscriptionId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The application store with everything attached.
pub struct RootStore {
    store: Arc<Store<RootState>>,
    provider: Arc<dyn IdentityProvider>,
    config: StoreConfig,
    persist: Option<Arc<PersistAdapter<RootState>>>,
    inspector: Option<InspectorHandle>,
    selectors: Selectors,
    started: AtomicBool,
}

impl RootStore {
    /// Build the store on the medium named by `config.storage`.
    pub fn init(config: StoreConfig, provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        let storage = config.storage.open();
        Self::init_with_storage(config, provider, storage)
    }

    /// Build the store on an explicit medium.
    ///
    /// A persisted record that cannot be read or migrated is logged and
    /// ignored; the store then starts from defaults.
    pub fn init_with_storage(
        config: StoreConfig,
        provider: Arc<dyn IdentityProvider>,
        storage: Arc<dyn DurableStorage>,
    ) -> Result<Self> {
        let mut defaults = RootState::new(config.app.clone());
        defaults.meta.has_hydrated = true;
        let mut initial = defaults.clone();

        let persist = if config.persist {
            let adapter = PersistAdapter::new(
                config.name.clone(),
                PERSIST_VERSION,
                storage,
                migrations(),
                config.persist_mode,
            )?;
            match adapter.rehydrate_into(&mut initial) {
                Ok(true) => info!(store = %config.name, "restored persisted state"),
                Ok(false) => debug!(store = %config.name, "starting from defaults"),
                Err(e) => warn!(store = %config.name, error = %e, "discarding unreadable persisted state"),
            }
            Some(Arc::new(adapter))
        } else {
            None
        };

        let mut builder = Store::builder(config.name.clone(), defaults)
            .start_from(initial)
            .broadcast(config.broadcast);

        if let Some(adapter) = &persist {
            builder = builder.persist(Arc::clone(adapter) as Arc<dyn Middleware<RootState>>);
        }

        let inspector = if config.devtools {
            let (stage, handle) = DevtoolsInspector::new(config.devtools_buffer);
            builder = builder.devtools(Arc::new(stage));
            Some(handle)
        } else {
            None
        };

        let store = Arc::new(builder.build());
        debug!(store = %config.name, stages = ?store.pipeline().stage_names(), "store initialized");

        Ok(Self {
            store,
            provider,
            config,
            persist,
            inspector,
            selectors: Selectors::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Begin folding provider events into the auth slice.
    ///
    /// Must run inside a tokio runtime. Only the first call succeeds; dropping
    /// the returned listener stops the folding.
    pub fn start(&self) -> Result<AuthListener> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyStarted);
        }

        let events = self.provider.on_auth_state_change();
        match spawn_auth_listener(Arc::downgrade(&self.store), events) {
            Ok(listener) => {
                info!(store = %self.config.name, "auth listener started");
                Ok(listener)
            }
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Restore every slice to its defaults in one commit.
    pub fn reset(&self) {
        self.store.reset();
    }

    // --- Access ---

    pub fn store(&self) -> &Arc<Store<RootState>> {
        &self.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<Snapshot<RootState>> {
        self.store.snapshot()
    }

    pub fn auth(&self) -> AuthSlice<'_> {
        AuthSlice::new(&self.store, self.provider.as_ref(), &self.config.auth)
    }

    pub fn app(&self) -> AppSlice<'_> {
        AppSlice::new(&self.store)
    }

    /// Transition feed, when devtools are enabled.
    pub fn inspector(&self) -> Option<&InspectorHandle> {
        self.inspector.as_ref()
    }

    pub fn has_hydrated(&self) -> bool {
        self.store.snapshot().meta.has_hydrated
    }

    // --- Subscriptions ---

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot<RootState>) + Send + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn subscribe_with_selector<T, Sel, F>(&self, selector: Sel, listener: F) -> SubscriptionId
    where
        T: PartialEq + Send + 'static,
        Sel: Fn(&RootState) -> T + Send + 'static,
        F: FnMut(&T, &T) + Send + 'static,
    {
        self.store.subscribe_with_selector(selector, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    // --- Persistence ---

    /// Block until pending debounced writes reach storage.
    pub fn flush(&self) {
        if let Some(adapter) = &self.persist {
            adapter.flush();
        }
    }

    /// Remove the persisted record. In-memory state is untouched.
    pub fn clear_persisted(&self) -> Result<()> {
        match &self.persist {
            Some(adapter) => adapter.clear(),
            None => Ok(()),
        }
    }

    // --- Views ---

    pub fn auth_view(&self) -> Arc<AuthView> {
        self.selectors.auth(&self.snapshot())
    }

    pub fn preferences_view(&self) -> Arc<PreferencesView> {
        self.selectors.preferences(&self.snapshot())
    }

    pub fn theme_view(&self) -> Arc<ThemeView> {
        self.selectors.theme(&self.snapshot())
    }

    pub fn language_view(&self) -> Arc<LanguageView> {
        self.selectors.language(&self.snapshot())
    }

    pub fn sidebar_view(&self) -> Arc<SidebarView> {
        self.selectors.sidebar(&self.snapshot())
    }

    pub fn mobile_menu_view(&self) -> Arc<MobileMenuView> {
        self.selectors.mobile_menu(&self.snapshot())
    }

    pub fn navigation_view(&self) -> Arc<NavigationView> {
        self.selectors.navigation(&self.snapshot())
    }

    pub fn page_view(&self) -> Arc<PageView> {
        self.selectors.page(&self.snapshot())
    }

    pub fn notifications_view(&self) -> Arc<NotificationsView> {
        self.selectors.notifications(&self.snapshot())
    }

    pub fn modals_view(&self) -> Arc<ModalsView> {
        self.selectors.modals(&self.snapshot())
    }

    pub fn modal_view(&self, id: &str) -> Arc<ModalView> {
        self.selectors.modal(&self.snapshot(), id)
    }

    pub fn config_view(&self) -> Arc<ConfigView> {
        self.selectors.config(&self.snapshot())
    }

    pub fn async_state_view(&self) -> Arc<AsyncStateView> {
        self.selectors.async_state(&self.snapshot())
    }
}

impl fmt::Debug for RootStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootStore")
            .field("name", &self.config.name)
            .field("version", &self.store.version())
            .field("persist", &self.persist.is_some())
            .field("devtools", &self.inspector.is_some())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}
