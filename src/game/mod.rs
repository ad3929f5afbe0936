//! Arena gameplay core: weapons, combat, round lifecycle

pub mod combat;
pub mod host;
pub mod r#match;
pub mod movement;
pub mod protocol;
pub mod schedule;
pub mod spawn;
pub mod weapons;

pub use host::{Host, HostError, Presence, RaycastHit};
pub use r#match::{
    spawn_arena, ArenaMatch, GameMatch, MatchHandle, MatchRegistry, MatchRoundState, PlayState,
};
pub use weapons::{WeaponCatalog, WeaponDefinition, WeaponSet};

use serde::{Deserialize, Serialize};

/// Button state for one simulation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputState {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub run: bool,
    pub fire: bool,
    pub reload: bool,
}
