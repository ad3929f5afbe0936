//! Application state shared by the arena tasks and the binary

use std::sync::Arc;

use crate::config::Config;
use crate::game::{spawn_arena, Host, MatchHandle, MatchRegistry, WeaponCatalog};
use crate::game::weapons::CatalogError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<WeaponCatalog>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    /// Build the catalog for the configured weapon set. A malformed catalog is fatal.
    pub fn new(config: Config) -> Result<Self, CatalogError> {
        let catalog = Arc::new(WeaponCatalog::builtin(config.weapon_set)?);

        Ok(Self {
            config: Arc::new(config),
            catalog,
            match_registry: Arc::new(MatchRegistry::new()),
        })
    }

    /// Start every configured arena, each with its own host from `make_host`
    pub fn start_arenas<H, F>(&self, mut make_host: F) -> Vec<MatchHandle>
    where
        H: Host + 'static,
        F: FnMut() -> H,
    {
        self.config
            .arenas
            .iter()
            .map(|arena| {
                spawn_arena(
                    &self.match_registry,
                    arena.clone(),
                    self.catalog.clone(),
                    make_host(),
                )
            })
            .collect()
    }
}
