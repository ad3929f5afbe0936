//! Weapon definitions, damage falloff and the kill-count progression table

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Broad weapon family, drives falloff shape and area-effect handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponClass {
    /// Pistols and rifles
    Standard,
    /// Early, steep falloff
    Shotgun,
    /// Long flat range
    Sniper,
    /// Area damage around the impact point
    Explosive,
    /// Contact range, no falloff
    Melee,
}

/// Shape of the attenuation curve past the falloff start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FalloffCurve {
    Linear,
    Squared,
}

/// Distance falloff parameters for a weapon class
#[derive(Debug, Clone, Copy)]
pub struct FalloffProfile {
    /// Fraction of range where attenuation begins
    pub start_fraction: f32,
    /// Lowest fraction of base damage a hit can deal
    pub floor_fraction: f32,
    pub curve: FalloffCurve,
}

impl FalloffProfile {
    pub fn for_class(class: WeaponClass) -> Self {
        match class {
            WeaponClass::Standard => Self {
                start_fraction: 0.5,
                floor_fraction: 0.5,
                curve: FalloffCurve::Linear,
            },
            WeaponClass::Shotgun => Self {
                start_fraction: 0.25,
                floor_fraction: 0.2,
                curve: FalloffCurve::Squared,
            },
            WeaponClass::Sniper => Self {
                start_fraction: 0.8,
                floor_fraction: 0.75,
                curve: FalloffCurve::Linear,
            },
            WeaponClass::Explosive | WeaponClass::Melee => Self {
                start_fraction: 1.0,
                floor_fraction: 1.0,
                curve: FalloffCurve::Linear,
            },
        }
    }
}

/// Model, audio and animation references replayed through the host on use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponAssets {
    pub model_uri: String,
    pub fire_audio: String,
    pub reload_audio: String,
    pub idle_animation: String,
    pub walk_animation: String,
    pub fire_animation: String,
    pub reload_animation: String,
}

impl WeaponAssets {
    fn named(name: &str, reload_audio: &str) -> Self {
        Self {
            model_uri: format!("models/{name}.gltf"),
            fire_audio: format!("audio/{name}-fire.mp3"),
            reload_audio: reload_audio.to_string(),
            idle_animation: format!("idle_{name}"),
            walk_animation: format!("walk_{name}"),
            fire_animation: format!("fire_{name}"),
            reload_animation: format!("recharge_{name}"),
        }
    }
}

/// Immutable weapon definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponDefinition {
    pub name: String,
    pub class: WeaponClass,
    /// Flat damage, used by area-effect weapons
    pub damage: f32,
    pub fire_rate_ms: u64,
    pub range: f32,
    pub max_ammo: u32,
    pub reload_time_ms: u64,
    pub spread: f32,
    pub spread_recovery_ms: u64,
    pub head_damage: f32,
    pub body_damage: f32,
    pub limb_damage: f32,
    /// Kill count at which progression hands out this weapon
    pub required_kills: u32,
    /// A kill made with this weapon wins the match
    pub is_victory_weapon: bool,
    pub zoom_level: u8,
    pub assets: WeaponAssets,
}

impl WeaponDefinition {
    pub fn falloff(&self) -> FalloffProfile {
        FalloffProfile::for_class(self.class)
    }

    /// Distance past which damage starts to attenuate
    pub fn falloff_start(&self) -> f32 {
        self.range * self.falloff().start_fraction
    }

    pub fn is_area_effect(&self) -> bool {
        self.class == WeaponClass::Explosive
    }

    /// Scale `base_damage` for a hit at `distance`.
    ///
    /// Full damage up to [`falloff_start`](Self::falloff_start), then attenuated
    /// towards the class floor, which is reached at `range` and never undercut.
    pub fn damage_at_distance(&self, base_damage: f32, distance: f32) -> f32 {
        let profile = self.falloff();
        let start = self.falloff_start();
        let span = self.range - start;

        if distance <= start || span <= f32::EPSILON {
            return base_damage;
        }

        let t = ((distance - start) / span).clamp(0.0, 1.0);
        let floor = profile.floor_fraction;
        let factor = match profile.curve {
            FalloffCurve::Linear => 1.0 - (1.0 - floor) * t,
            FalloffCurve::Squared => floor + (1.0 - floor) * (1.0 - t) * (1.0 - t),
        };

        base_damage * factor.max(floor)
    }
}

/// Named built-in weapon tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponSet {
    /// Six-tier gun game ending on the baguette
    Standard,
    /// Pistol straight into the melee baguette
    Duel,
}

impl FromStr for WeaponSet {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "duel" => Ok(Self::Duel),
            _ => Err(()),
        }
    }
}

/// Catalog validation failures. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Weapon catalog is empty")]
    Empty,

    #[error("No starting weapon (required_kills = 0) in catalog")]
    NoStartingWeapon,

    #[error("Multiple starting weapons in catalog: {0} and {1}")]
    MultipleStartingWeapons(String, String),

    #[error("Duplicate weapon name in catalog: {0}")]
    DuplicateName(String),

    #[error("Weapon {0} has a non-positive range")]
    InvalidRange(String),
}

/// Immutable, validated table of weapon definitions
#[derive(Debug, Clone)]
pub struct WeaponCatalog {
    weapons: Vec<Arc<WeaponDefinition>>,
    starting: usize,
}

impl WeaponCatalog {
    /// Validate and build a catalog. Declaration order is kept for tie-breaks.
    pub fn new(weapons: Vec<WeaponDefinition>) -> Result<Self, CatalogError> {
        if weapons.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut names = HashSet::new();
        for weapon in &weapons {
            if !names.insert(weapon.name.as_str()) {
                return Err(CatalogError::DuplicateName(weapon.name.clone()));
            }
            if weapon.range <= 0.0 {
                return Err(CatalogError::InvalidRange(weapon.name.clone()));
            }
        }

        let mut starting: Option<usize> = None;
        for (idx, weapon) in weapons.iter().enumerate() {
            if weapon.required_kills != 0 {
                continue;
            }
            if let Some(first) = starting {
                return Err(CatalogError::MultipleStartingWeapons(
                    weapons[first].name.clone(),
                    weapon.name.clone(),
                ));
            }
            starting = Some(idx);
        }
        let starting = starting.ok_or(CatalogError::NoStartingWeapon)?;

        let victory: Vec<&str> = weapons
            .iter()
            .filter(|w| w.is_victory_weapon)
            .map(|w| w.name.as_str())
            .collect();
        if victory.len() > 1 {
            warn!(weapons = ?victory, "Catalog declares more than one victory weapon");
        }

        Ok(Self {
            weapons: weapons.into_iter().map(Arc::new).collect(),
            starting,
        })
    }

    pub fn builtin(set: WeaponSet) -> Result<Self, CatalogError> {
        match set {
            WeaponSet::Standard => Self::new(standard_weapons()),
            WeaponSet::Duel => Self::new(duel_weapons()),
        }
    }

    /// The unique weapon every combatant starts with
    pub fn starting_weapon(&self) -> Arc<WeaponDefinition> {
        self.weapons[self.starting].clone()
    }

    /// Weapon with the greatest `required_kills` not above `kills`.
    /// Equal thresholds resolve to the first declared.
    pub fn by_kill_count(&self, kills: u32) -> Arc<WeaponDefinition> {
        let mut best = &self.weapons[self.starting];
        for weapon in &self.weapons {
            if weapon.required_kills <= kills && weapon.required_kills > best.required_kills {
                best = weapon;
            }
        }
        best.clone()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<WeaponDefinition>> {
        self.weapons.iter().find(|w| w.name == name).cloned()
    }

    pub fn weapons(&self) -> impl Iterator<Item = &WeaponDefinition> {
        self.weapons.iter().map(|w| w.as_ref())
    }

    pub fn len(&self) -> usize {
        self.weapons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weapons.is_empty()
    }
}

fn gun(
    name: &str,
    class: WeaponClass,
    required_kills: u32,
    is_victory_weapon: bool,
) -> WeaponDefinition {
    WeaponDefinition {
        name: name.to_string(),
        class,
        damage: 15.0,
        fire_rate_ms: 100,
        range: 70.0,
        max_ammo: 30,
        reload_time_ms: 2500,
        spread: 0.055,
        spread_recovery_ms: 300,
        head_damage: 14.0,
        body_damage: 7.0,
        limb_damage: 3.0,
        required_kills,
        is_victory_weapon,
        zoom_level: 0,
        assets: WeaponAssets::named(name, &format!("audio/{name}-reload.mp3")),
    }
}

/// Gun-game progression: one new weapon per kill
pub fn standard_weapons() -> Vec<WeaponDefinition> {
    let pistol = WeaponDefinition {
        name: "pistol".to_string(),
        class: WeaponClass::Standard,
        damage: 20.0,
        fire_rate_ms: 500,
        range: 50.0,
        max_ammo: 20,
        reload_time_ms: 2200,
        spread: 0.06,
        spread_recovery_ms: 100,
        head_damage: 10.0,
        body_damage: 5.0,
        limb_damage: 3.0,
        required_kills: 0,
        is_victory_weapon: false,
        zoom_level: 0,
        assets: WeaponAssets::named("pistol", "audio/pistol-reload.mp3"),
    };

    let mut ak47 = gun("ak47", WeaponClass::Standard, 1, false);
    ak47.assets.idle_animation = "idle_ak".to_string();
    ak47.assets.walk_animation = "walk_ak".to_string();
    ak47.assets.fire_animation = "fire_ak".to_string();
    ak47.assets.reload_animation = "recharge_ak".to_string();
    ak47.assets.fire_audio = "audio/ak-fire.mp3".to_string();
    ak47.assets.reload_audio = "audio/ak-reload.mp3".to_string();

    let mut awp = gun("awp", WeaponClass::Sniper, 3, false);
    awp.zoom_level = 2;

    let mut baguette = gun("baguette", WeaponClass::Melee, 5, true);
    baguette.assets.reload_audio = "audio/pistol-reload.mp3".to_string();

    vec![
        pistol,
        ak47,
        gun("shotgun", WeaponClass::Shotgun, 2, false),
        awp,
        gun("rpg", WeaponClass::Explosive, 4, false),
        baguette,
    ]
}

/// Short match: a pistol kill hands out the one-hit baguette
pub fn duel_weapons() -> Vec<WeaponDefinition> {
    vec![
        WeaponDefinition {
            name: "pistol".to_string(),
            class: WeaponClass::Standard,
            damage: 15.0,
            fire_rate_ms: 500,
            range: 25.0,
            max_ammo: 6,
            reload_time_ms: 1800,
            spread: 0.03,
            spread_recovery_ms: 200,
            head_damage: 35.0,
            body_damage: 20.0,
            limb_damage: 15.0,
            required_kills: 0,
            is_victory_weapon: false,
            zoom_level: 0,
            assets: WeaponAssets::named("pistol", "audio/pistol-reload.mp3"),
        },
        WeaponDefinition {
            name: "baguette".to_string(),
            class: WeaponClass::Melee,
            damage: 100.0,
            fire_rate_ms: 2000,
            range: 2.0,
            // Melee never runs dry
            max_ammo: u32::MAX,
            reload_time_ms: 0,
            spread: 0.0,
            spread_recovery_ms: 0,
            head_damage: 100.0,
            body_damage: 100.0,
            limb_damage: 100.0,
            required_kills: 1,
            is_victory_weapon: true,
            zoom_level: 0,
            assets: WeaponAssets::named("baguette", "audio/pistol-reload.mp3"),
        },
    ]
}
