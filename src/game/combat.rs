//! Combat system - per-combatant weapon state, hit location, damage

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::weapons::WeaponDefinition;

/// Full health of a fresh or respawned combatant
pub const MAX_HEALTH: f32 = 100.0;

/// Radius around an explosive impact point that takes damage
pub const EXPLOSION_RADIUS: f32 = 4.0;

/// Vertical offset above the target reference point that counts as a head hit
pub const HEAD_OFFSET: f32 = 0.3;

/// Region of the body a hit-scan landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitLocation {
    Head,
    Body,
    Limbs,
}

impl HitLocation {
    /// Classify the impact height relative to the target's reference position
    pub fn from_offset(offset: f32) -> Self {
        if offset > HEAD_OFFSET {
            Self::Head
        } else if offset > 0.0 {
            Self::Body
        } else {
            Self::Limbs
        }
    }

    pub fn base_damage(self, weapon: &WeaponDefinition) -> f32 {
        match self {
            Self::Head => weapon.head_damage,
            Self::Body => weapon.body_damage,
            Self::Limbs => weapon.limb_damage,
        }
    }
}

/// Result of a fire request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FireOutcome {
    /// Shot went out. `spread` is the jitter to apply (zero on a burst's first shot).
    Fired { spread: f32 },
    /// Magazine empty
    Empty,
    Reloading,
    Dead,
    /// Fire-rate window has not elapsed
    Cooling,
}

/// Result of a reload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Started { duration_ms: u64 },
    AlreadyReloading,
    MagazineFull,
    Dead,
}

/// Result of applying damage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageOutcome {
    /// Target was already dead
    Ignored,
    Wounded { health: f32 },
    Killed,
}

/// Authoritative per-player combat state
#[derive(Debug, Clone)]
pub struct CombatantState {
    pub user_id: Uuid,
    pub username: String,

    pub health: f32,
    pub is_dead: bool,
    pub current_weapon: Arc<WeaponDefinition>,
    pub current_ammo: u32,
    pub kills: u32,
    pub last_fire_time: Option<u64>,
    pub last_shot_time: Option<u64>,
    pub current_spread: f32,
    pub is_frozen: bool,
    pub last_weapon_before_death: Arc<WeaponDefinition>,

    /// Fire button state on the previous input tick
    pub trigger_held: bool,

    /// Token of the in-flight reload, if any
    reload_token: Option<u64>,
    /// Changes on every death; respawn timers carry the value they were armed with
    life_token: u64,

    // Stats
    pub deaths: u32,
    pub shots_fired: u32,
    pub shots_hit: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
}

impl CombatantState {
    pub fn new(
        user_id: Uuid,
        username: String,
        starting_weapon: Arc<WeaponDefinition>,
        life_token: u64,
    ) -> Self {
        Self {
            user_id,
            username,
            health: MAX_HEALTH,
            is_dead: false,
            current_ammo: starting_weapon.max_ammo,
            current_weapon: starting_weapon.clone(),
            kills: 0,
            last_fire_time: None,
            last_shot_time: None,
            current_spread: 0.0,
            is_frozen: false,
            last_weapon_before_death: starting_weapon,
            trigger_held: false,
            reload_token: None,
            life_token,
            deaths: 0,
            shots_fired: 0,
            shots_hit: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
        }
    }

    pub fn is_reloading(&self) -> bool {
        self.reload_token.is_some()
    }

    pub fn life_token(&self) -> u64 {
        self.life_token
    }

    /// Equip `weapon` with a full magazine, dropping any reload in progress
    pub fn switch_weapon(&mut self, weapon: Arc<WeaponDefinition>) {
        self.current_ammo = weapon.max_ammo;
        self.current_weapon = weapon;
        self.reload_token = None;
        self.current_spread = 0.0;
    }

    /// Returns true when the frozen flag actually changed
    pub fn set_frozen(&mut self, frozen: bool) -> bool {
        let changed = self.is_frozen != frozen;
        self.is_frozen = frozen;
        changed
    }

    pub fn begin_reload(&mut self, token: u64) -> ReloadOutcome {
        if self.is_dead {
            return ReloadOutcome::Dead;
        }
        if self.is_reloading() {
            return ReloadOutcome::AlreadyReloading;
        }
        if self.current_ammo >= self.current_weapon.max_ammo {
            return ReloadOutcome::MagazineFull;
        }

        self.reload_token = Some(token);
        ReloadOutcome::Started {
            duration_ms: self.current_weapon.reload_time_ms,
        }
    }

    /// Finish the reload armed with `token`. Stale tokens and dead combatants are ignored.
    pub fn complete_reload(&mut self, token: u64) -> bool {
        if self.is_dead || self.reload_token != Some(token) {
            return false;
        }
        self.current_ammo = self.current_weapon.max_ammo;
        self.reload_token = None;
        true
    }

    /// Spread decays linearly to zero over the weapon's recovery window
    pub fn update_spread(&mut self, now: u64) {
        let recovery = self.current_weapon.spread_recovery_ms;
        self.current_spread = match self.last_shot_time {
            Some(last) if recovery > 0 && now.saturating_sub(last) < recovery => {
                let progress = now.saturating_sub(last) as f32 / recovery as f32;
                self.current_weapon.spread * (1.0 - progress)
            }
            _ => 0.0,
        };
    }

    pub fn try_fire(&mut self, now: u64) -> FireOutcome {
        if self.is_dead {
            return FireOutcome::Dead;
        }
        if self.is_reloading() {
            return FireOutcome::Reloading;
        }
        if self.current_ammo == 0 {
            return FireOutcome::Empty;
        }
        let weapon = &self.current_weapon;
        if let Some(last) = self.last_fire_time {
            if now.saturating_sub(last) < weapon.fire_rate_ms {
                return FireOutcome::Cooling;
            }
        }

        let first_shot = self
            .last_shot_time
            .map_or(true, |last| now.saturating_sub(last) > weapon.spread_recovery_ms);
        let spread = if first_shot { 0.0 } else { self.current_spread };

        self.current_ammo -= 1;
        self.last_fire_time = Some(now);
        self.last_shot_time = Some(now);
        // Recoil
        self.current_spread = weapon.spread;
        self.shots_fired += 1;

        FireOutcome::Fired { spread }
    }

    pub fn apply_damage(&mut self, damage: f32) -> DamageOutcome {
        if self.is_dead {
            return DamageOutcome::Ignored;
        }

        let (health, killed) = CombatSystem::apply_damage(self.health, damage);
        self.damage_taken += self.health - health;
        self.health = health;

        if killed {
            self.is_dead = true;
            DamageOutcome::Killed
        } else {
            DamageOutcome::Wounded { health }
        }
    }

    /// Record death: remember the weapon for respawn and drop any reload
    pub fn on_death(&mut self, life_token: u64) {
        self.health = 0.0;
        self.is_dead = true;
        self.last_weapon_before_death = self.current_weapon.clone();
        self.reload_token = None;
        self.current_spread = 0.0;
        self.life_token = life_token;
        self.deaths += 1;
    }

    /// Bring a dead combatant back with full health and the weapon it died with
    pub fn respawn(&mut self) {
        self.health = MAX_HEALTH;
        self.is_dead = false;
        self.switch_weapon(self.last_weapon_before_death.clone());
        self.last_fire_time = None;
        self.last_shot_time = None;
    }
}

/// Stateless combat math
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead).
    /// Health is clamped at zero and kept to one decimal.
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let raw = (current_health - damage.max(0.0)).max(0.0);
        let new_health = (raw * 10.0).round() / 10.0;
        (new_health, new_health <= 0.0)
    }

    /// Location- and distance-scaled damage for a single-target hit
    pub fn calculate_damage(
        weapon: &WeaponDefinition,
        location: HitLocation,
        distance: f32,
    ) -> f32 {
        weapon.damage_at_distance(location.base_damage(weapon), distance)
    }

    /// Perturb `direction` by up to ±spread/2 per axis and renormalise
    pub fn apply_spread(direction: Vec3, spread: f32, jitter: [f32; 3]) -> Vec3 {
        if spread <= 0.0 {
            return direction;
        }
        let perturbed = direction
            + Vec3::new(
                (jitter[0] - 0.5) * spread,
                (jitter[1] - 0.5) * spread,
                (jitter[2] - 0.5) * spread,
            );
        perturbed.try_normalize().unwrap_or(direction)
    }

    pub fn in_blast(impact: Vec3, position: Vec3) -> bool {
        impact.distance_squared(position) <= EXPLOSION_RADIUS * EXPLOSION_RADIUS
    }
}

/// Hit registered by a single shot
#[derive(Debug, Clone)]
pub struct HitResult {
    pub shooter_id: Uuid,
    pub target_id: Uuid,
    pub damage: f32,
    /// None for area-effect damage
    pub location: Option<HitLocation>,
    pub point: Vec3,
}
