//! Arena round state machine and authoritative run loop

use dashmap::DashMap;
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ArenaConfig;
use crate::util::time::{seconds_remaining, tick_delta_ms, unix_millis, ROUND_TICK_MS, TIMER_PUMP_MS};

use super::combat::{
    CombatSystem, CombatantState, DamageOutcome, FireOutcome, HitLocation, HitResult,
    ReloadOutcome,
};
use super::host::Host;
use super::movement::{MovementStats, MovementSystem};
use super::protocol::{ArenaCommand, Cue, KillReport, ScoreLine, ServerMsg, VictoryOutcome};
use super::schedule::{Scheduler, TimerKind};
use super::spawn::SpawnAllocator;
use super::weapons::{WeaponCatalog, WeaponDefinition};
use super::InputState;

pub const PLAYER_MODEL_URI: &str = "models/players/PlayerModel.gltf";

/// Where dead combatants wait out their respawn
const OFF_MAP_POSITION: Vec3 = Vec3::new(0.0, -100.0, 0.0);

/// Hit-scan origin above the presence reference point
const MUZZLE_HEIGHT: f32 = 0.7;

const DRY_FIRE_AUDIO: &str = "audio/dry-fire.mp3";

/// Round phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    /// Waiting for enough players
    Waiting,
    /// Countdown before the round, everyone frozen
    Starting,
    /// Round in progress
    Active,
    /// Time ran out, showing results
    Ending,
}

/// Per-arena round bookkeeping
#[derive(Debug, Clone)]
pub struct MatchRoundState {
    pub play_state: PlayState,
    pub start_time: u64,
    pub round_start_time: Option<u64>,
    pub round_end_time: Option<u64>,
    pub round_number: u32,
    pub round_duration_ms: u64,
    pub scores: HashMap<Uuid, u32>,
    /// Joined players in join order
    pub players: Vec<Uuid>,
}

impl MatchRoundState {
    pub fn new(now: u64, round_duration_ms: u64) -> Self {
        Self {
            play_state: PlayState::Waiting,
            start_time: now,
            round_start_time: None,
            round_end_time: None,
            round_number: 0,
            round_duration_ms,
            scores: HashMap::new(),
            players: Vec::new(),
        }
    }

    pub fn score(&self, user_id: Uuid) -> u32 {
        self.scores.get(&user_id).copied().unwrap_or(0)
    }

    fn increment_score(&mut self, user_id: Uuid) {
        if let Some(score) = self.scores.get_mut(&user_id) {
            *score += 1;
        }
    }

    /// Scores sorted descending; ties keep join order
    pub fn standings(&self, username: impl Fn(Uuid) -> String) -> Vec<ScoreLine> {
        let mut rows: Vec<(Uuid, u32)> = self
            .players
            .iter()
            .map(|id| (*id, self.score(*id)))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));

        rows.into_iter()
            .enumerate()
            .map(|(i, (user_id, score))| ScoreLine {
                rank: (i + 1) as u32,
                user_id,
                username: username(user_id),
                score,
            })
            .collect()
    }
}

/// One arena: round lifecycle, combatants and their timers.
///
/// Every mutation runs on the caller's thread; timers only fire from
/// [`advance`](Self::advance), so nothing races the tick.
pub struct ArenaMatch<H: Host> {
    config: ArenaConfig,
    catalog: Arc<WeaponCatalog>,
    round: MatchRoundState,
    combatants: HashMap<Uuid, CombatantState>,
    spawns: SpawnAllocator,
    scheduler: Scheduler,
    rng: ChaCha8Rng,
    movement: MovementStats,
    host: H,
    next_token: u64,
    last_countdown: Option<i64>,
    last_round_warning: Option<i64>,
    /// Winner of a victory-weapon kill, while the reset countdown runs
    win_pending: Option<Uuid>,
    kill_reports: Vec<KillReport>,
}

impl<H: Host> ArenaMatch<H> {
    pub fn new(config: ArenaConfig, catalog: Arc<WeaponCatalog>, host: H, now: u64) -> Self {
        let round = MatchRoundState::new(now, config.timings.round_duration_ms);
        Self {
            spawns: SpawnAllocator::with_default_points(config.seed),
            rng: ChaCha8Rng::seed_from_u64(config.seed.rotate_left(17)),
            config,
            catalog,
            round,
            combatants: HashMap::new(),
            scheduler: Scheduler::new(),
            movement: MovementStats::default(),
            host,
            next_token: 0,
            last_countdown: None,
            last_round_warning: None,
            win_pending: None,
            kill_reports: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn play_state(&self) -> PlayState {
        self.round.play_state
    }

    pub fn round(&self) -> &MatchRoundState {
        &self.round
    }

    pub fn combatant(&self, user_id: Uuid) -> Option<&CombatantState> {
        self.combatants.get(&user_id)
    }

    pub fn player_count(&self) -> usize {
        self.round.players.len()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn win_pending(&self) -> Option<Uuid> {
        self.win_pending
    }

    pub fn drain_kill_reports(&mut self) -> Vec<KillReport> {
        std::mem::take(&mut self.kill_reports)
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn username(&self, user_id: Uuid) -> String {
        self.combatants
            .get(&user_id)
            .map(|c| c.username.clone())
            .unwrap_or_else(|| format!("Player_{}", &user_id.to_string()[..8]))
    }

    /// Seat a player: presence at a fresh spawn point, starting weapon, zero score
    pub fn on_join(&mut self, user_id: Uuid, username: String, _now: u64) {
        if self.combatants.contains_key(&user_id) {
            warn!(arena_id = self.config.id, user_id = %user_id, "Player already in arena");
            return;
        }

        if self.round.players.len() >= self.config.max_players {
            self.send(
                user_id,
                ServerMsg::Error {
                    code: "arena_full".to_string(),
                    message: format!("{} is full", self.config.name),
                },
            );
            return;
        }

        let life = self.next_token();
        let starting = self.catalog.starting_weapon();
        let mut combatant = CombatantState::new(user_id, username.clone(), starting.clone(), life);
        combatant.set_frozen(self.round.play_state != PlayState::Active);

        let spawn = self.spawns.allocate();
        if let Err(e) = self.host.spawn_presence(user_id, spawn, PLAYER_MODEL_URI) {
            warn!(arena_id = self.config.id, user_id = %user_id, error = %e, "Failed to spawn presence");
        }
        self.host.reset_velocities(user_id);
        self.host.play_cue(
            user_id,
            Cue::EquipModel {
                model_uri: starting.assets.model_uri.clone(),
            },
        );

        self.combatants.insert(user_id, combatant);
        self.round.players.push(user_id);
        self.round.scores.insert(user_id, 0);

        self.send_stats(user_id);
        self.broadcast_player_count();

        info!(
            arena_id = self.config.id,
            user_id = %user_id,
            username = %username,
            player_count = self.round.players.len(),
            "Player joined arena"
        );
    }

    pub fn on_leave(&mut self, user_id: Uuid, _now: u64) {
        if self.combatants.remove(&user_id).is_none() {
            return;
        }

        self.round.players.retain(|id| *id != user_id);
        self.round.scores.remove(&user_id);
        self.host.despawn_presence(user_id);
        self.broadcast_player_count();

        info!(
            arena_id = self.config.id,
            user_id = %user_id,
            player_count = self.round.players.len(),
            "Player left arena"
        );
    }

    fn broadcast_player_count(&mut self) {
        let message = format!(
            "Players: {}/{} needed to start",
            self.round.players.len(),
            self.config.min_players
        );
        self.broadcast_message(message);
    }

    /// Freeze or release a combatant. Velocities are reset every time.
    pub fn set_frozen(&mut self, user_id: Uuid, frozen: bool) {
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };
        if combatant.set_frozen(frozen) {
            debug!(
                arena_id = self.config.id,
                user_id = %user_id,
                frozen,
                "Freeze state changed"
            );
        }
        self.host.reset_velocities(user_id);
    }

    fn freeze_all(&mut self, frozen: bool) {
        let ids: Vec<Uuid> = self.round.players.clone();
        info!(
            arena_id = self.config.id,
            count = ids.len(),
            frozen,
            "Updating freeze state for all players"
        );
        for id in ids {
            self.set_frozen(id, frozen);
        }
    }

    /// Round state machine step, driven once per second
    pub fn tick(&mut self, now: u64) {
        if self.round.players.is_empty() && self.round.play_state != PlayState::Waiting {
            info!(arena_id = self.config.id, "All players left, resetting arena");
            self.teardown(now);
            return;
        }

        match self.round.play_state {
            PlayState::Waiting => self.handle_waiting(now),
            PlayState::Starting => self.handle_starting(now),
            PlayState::Active => self.handle_active(now),
            PlayState::Ending => self.handle_ending(now),
        }
    }

    fn handle_waiting(&mut self, now: u64) {
        if self.round.players.len() < self.config.min_players {
            return;
        }

        info!(
            arena_id = self.config.id,
            player_count = self.round.players.len(),
            "Player threshold reached, starting countdown"
        );
        self.round.play_state = PlayState::Starting;
        self.round.start_time = now;
        self.last_countdown = None;
        self.freeze_all(true);

        let seconds = seconds_remaining(now + self.config.timings.start_countdown_ms, now);
        self.broadcast_message(format!("Game starting in {seconds} seconds! Get ready!"));
    }

    fn handle_starting(&mut self, now: u64) {
        let deadline = self.round.start_time + self.config.timings.start_countdown_ms;
        let remaining = seconds_remaining(deadline, now);

        if remaining <= 0 {
            self.begin_round(now);
            return;
        }

        if self.last_countdown != Some(remaining) {
            self.last_countdown = Some(remaining);
            debug!(arena_id = self.config.id, remaining, "Starting countdown");
            self.broadcast_message(format!("Game starting in {remaining}..."));
        }
    }

    fn begin_round(&mut self, now: u64) {
        self.round.play_state = PlayState::Active;
        self.round.round_start_time = Some(now);
        self.round.round_number += 1;
        self.last_round_warning = None;
        self.freeze_all(false);

        info!(
            arena_id = self.config.id,
            round_number = self.round.round_number,
            "Round started"
        );
        self.broadcast_message("Round Started! Fight!".to_string());
    }

    fn handle_active(&mut self, now: u64) {
        // Victory countdown owns the arena until reset
        if self.win_pending.is_some() {
            return;
        }
        let Some(round_start) = self.round.round_start_time else {
            return;
        };

        let elapsed = now.saturating_sub(round_start);
        if elapsed >= self.round.round_duration_ms {
            self.end_round(now);
            return;
        }

        let remaining_ms = self.round.round_duration_ms - elapsed;
        if remaining_ms <= self.config.timings.round_warning_ms {
            let seconds = seconds_remaining(round_start + self.round.round_duration_ms, now);
            if self.last_round_warning != Some(seconds) {
                self.last_round_warning = Some(seconds);
                self.broadcast_message(format!("Round ending in {seconds}..."));
            }
        }
    }

    fn end_round(&mut self, now: u64) {
        self.round.play_state = PlayState::Ending;
        self.round.round_end_time = Some(now);
        self.freeze_all(true);

        let scores = self.round.standings(|id| self.username(id));
        info!(
            arena_id = self.config.id,
            round_number = self.round.round_number,
            leader = scores.first().map(|s| s.username.as_str()).unwrap_or("-"),
            "Round over"
        );

        self.broadcast_message("Round Over!".to_string());
        self.broadcast(ServerMsg::RoundResults {
            scores,
            round_number: self.round.round_number,
            is_game_over: true,
        });
    }

    fn handle_ending(&mut self, now: u64) {
        let Some(round_end) = self.round.round_end_time else {
            return;
        };
        if now.saturating_sub(round_end) >= self.config.timings.end_screen_ms {
            self.teardown(now);
        }
    }

    /// Evict everyone to the lobby and return to WAITING defaults
    fn teardown(&mut self, now: u64) {
        let players = std::mem::take(&mut self.round.players);
        for user_id in &players {
            self.host.despawn_presence(*user_id);
            if let Err(e) = self.host.move_to_lobby(*user_id) {
                warn!(arena_id = self.config.id, user_id = %user_id, error = %e, "Failed to move player to lobby");
            }
        }

        self.combatants.clear();
        self.scheduler.clear();
        self.spawns.reset();
        self.win_pending = None;
        self.last_countdown = None;
        self.last_round_warning = None;
        self.round = MatchRoundState::new(now, self.config.timings.round_duration_ms);

        info!(
            arena_id = self.config.id,
            evicted = players.len(),
            "Arena reset to waiting"
        );
    }

    /// Fire every scheduled event due at or before `now`
    pub fn advance(&mut self, now: u64) {
        while let Some(event) = self.scheduler.pop_due(now) {
            match event.kind {
                TimerKind::ReloadComplete { user_id, token } => {
                    self.finish_reload(user_id, token);
                }
                TimerKind::Respawn {
                    user_id,
                    life,
                    seconds_left,
                } => {
                    self.respawn_step(user_id, life, seconds_left, event.fire_at);
                }
                TimerKind::WinCountdown {
                    winner,
                    seconds_left,
                } => {
                    self.win_countdown_step(winner, seconds_left, event.fire_at);
                }
            }
        }
    }

    /// One simulation step of a player's input: camera, reload, movement, fire
    pub fn on_input(
        &mut self,
        user_id: Uuid,
        input: InputState,
        camera_yaw: f32,
        camera_pitch: f32,
        dt_ms: f32,
        now: u64,
    ) {
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };

        let trigger_pressed = input.fire && !combatant.trigger_held;
        combatant.trigger_held = input.fire;
        let blocked = combatant.is_dead || combatant.is_frozen;

        // Camera stays live while frozen
        self.host.set_camera(user_id, camera_yaw, camera_pitch);
        if blocked {
            return;
        }

        if input.reload {
            self.start_reload(user_id, now);
        }

        let target = MovementSystem::target_velocity(&input, camera_yaw, &self.movement);
        self.host.apply_movement(user_id, target, dt_ms);

        if let Some(combatant) = self.combatants.get_mut(&user_id) {
            combatant.update_spread(now);
        }

        if input.fire {
            self.fire(user_id, trigger_pressed, now);
        }
    }

    fn start_reload(&mut self, user_id: Uuid, now: u64) {
        let token = self.next_token();
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };

        match combatant.begin_reload(token) {
            ReloadOutcome::Started { duration_ms } => {
                let assets = combatant.current_weapon.assets.clone();
                debug!(
                    arena_id = self.config.id,
                    user_id = %user_id,
                    weapon = %combatant.current_weapon.name,
                    duration_ms,
                    "Reload started"
                );
                self.host.play_cue(
                    user_id,
                    Cue::Animation {
                        name: assets.reload_animation,
                    },
                );
                self.host.play_cue(
                    user_id,
                    Cue::Audio {
                        uri: assets.reload_audio,
                        volume: 0.8,
                    },
                );
                self.scheduler
                    .schedule(now + duration_ms, TimerKind::ReloadComplete { user_id, token });
            }
            ReloadOutcome::MagazineFull => {
                debug!(arena_id = self.config.id, user_id = %user_id, "Magazine is full");
            }
            ReloadOutcome::AlreadyReloading | ReloadOutcome::Dead => {}
        }
    }

    fn finish_reload(&mut self, user_id: Uuid, token: u64) {
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };
        if combatant.complete_reload(token) {
            debug!(
                arena_id = self.config.id,
                user_id = %user_id,
                ammo = combatant.current_ammo,
                "Reload complete"
            );
            self.send_stats(user_id);
        }
    }

    fn fire(&mut self, user_id: Uuid, trigger_pressed: bool, now: u64) {
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };
        let weapon = combatant.current_weapon.clone();

        let spread = match combatant.try_fire(now) {
            FireOutcome::Fired { spread } => spread,
            FireOutcome::Empty => {
                if trigger_pressed {
                    self.host.play_cue(
                        user_id,
                        Cue::Audio {
                            uri: DRY_FIRE_AUDIO.to_string(),
                            volume: 0.6,
                        },
                    );
                }
                return;
            }
            FireOutcome::Reloading | FireOutcome::Dead | FireOutcome::Cooling => return,
        };

        self.host.play_cue(
            user_id,
            Cue::Audio {
                uri: weapon.assets.fire_audio.clone(),
                volume: 0.6,
            },
        );
        self.host.play_cue(
            user_id,
            Cue::Animation {
                name: weapon.assets.fire_animation.clone(),
            },
        );
        self.send_stats(user_id);

        let Some(presence) = self.host.presence(user_id) else {
            warn!(arena_id = self.config.id, user_id = %user_id, "Shooter has no presence");
            return;
        };
        let origin = presence.position + Vec3::Y * MUZZLE_HEIGHT;
        let jitter: [f32; 3] = [self.rng.gen(), self.rng.gen(), self.rng.gen()];
        let direction = CombatSystem::apply_spread(presence.facing, spread, jitter);

        let probe = match self.host.raycast(origin, direction, weapon.range, user_id) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(arena_id = self.config.id, user_id = %user_id, error = %e, "Raycast failed");
                return;
            }
        };
        let Some(impact) = probe else {
            return;
        };

        let hits = if weapon.is_area_effect() {
            self.blast_hits(user_id, &weapon, impact.point)
        } else if let Some(target_id) = impact.entity {
            self.direct_hit(user_id, target_id, &weapon, origin, impact.point)
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };

        for hit in hits {
            self.apply_hit(hit, &weapon, now);
        }
    }

    fn direct_hit(
        &self,
        shooter_id: Uuid,
        target_id: Uuid,
        weapon: &WeaponDefinition,
        origin: Vec3,
        point: Vec3,
    ) -> Option<HitResult> {
        if !self.combatants.contains_key(&target_id) {
            return None;
        }
        let target = self.host.presence(target_id)?;
        let location = HitLocation::from_offset(point.y - target.position.y);
        let damage = CombatSystem::calculate_damage(weapon, location, origin.distance(point));

        Some(HitResult {
            shooter_id,
            target_id,
            damage,
            location: Some(location),
            point,
        })
    }

    fn blast_hits(&self, shooter_id: Uuid, weapon: &WeaponDefinition, impact: Vec3) -> Vec<HitResult> {
        self.round
            .players
            .iter()
            .filter(|id| self.combatants.get(*id).is_some_and(|c| !c.is_dead))
            .filter_map(|id| {
                let presence = self.host.presence(*id)?;
                CombatSystem::in_blast(impact, presence.position).then(|| HitResult {
                    shooter_id,
                    target_id: *id,
                    damage: weapon.damage,
                    location: None,
                    point: impact,
                })
            })
            .collect()
    }

    fn apply_hit(&mut self, hit: HitResult, weapon: &WeaponDefinition, now: u64) {
        let Some(target) = self.combatants.get_mut(&hit.target_id) else {
            return;
        };
        let outcome = target.apply_damage(hit.damage);
        if outcome == DamageOutcome::Ignored {
            return;
        }
        let health = target.health;

        if let Some(shooter) = self.combatants.get_mut(&hit.shooter_id) {
            shooter.shots_hit += 1;
            shooter.damage_dealt += hit.damage;
        }

        debug!(
            arena_id = self.config.id,
            shooter_id = %hit.shooter_id,
            target_id = %hit.target_id,
            location = ?hit.location,
            damage = hit.damage,
            health,
            "Hit registered"
        );

        // Health is already committed; a failed push does not undo it
        self.send_stats(hit.target_id);

        if outcome == DamageOutcome::Killed {
            self.handle_death(&hit, weapon, now);
        }
    }

    /// Death path: off-map, kill feed, respawn countdown, then scoring while ACTIVE
    fn handle_death(&mut self, hit: &HitResult, weapon: &WeaponDefinition, now: u64) {
        let victim_id = hit.target_id;
        let attacker_id = hit.shooter_id;
        let life = self.next_token();
        let respawn_secs = self.config.timings.respawn_secs;

        let Some(victim) = self.combatants.get_mut(&victim_id) else {
            return;
        };
        victim.on_death(life);

        self.host.set_position(victim_id, OFF_MAP_POSITION);
        self.host.reset_velocities(victim_id);
        self.host.play_cue(victim_id, Cue::UnequipModel);
        self.send(victim_id, ServerMsg::PlayerDied { respawn_secs });

        let killer = self.username(attacker_id);
        let victim_name = self.username(victim_id);
        info!(
            arena_id = self.config.id,
            attacker_id = %attacker_id,
            victim_id = %victim_id,
            weapon = %weapon.name,
            "{} killed {}", killer, victim_name
        );
        self.broadcast(ServerMsg::KillFeed {
            killer,
            victim: victim_name,
        });

        let report = KillReport {
            victim_id,
            attacker_id,
            damage: hit.damage,
            hit_location: hit.location,
            weapon: weapon.name.clone(),
            at: now,
        };
        self.host.on_kill_reported(&report);
        self.kill_reports.push(report);

        self.schedule_respawn(victim_id, life, respawn_secs, now);

        if attacker_id == victim_id || !self.combatants.contains_key(&attacker_id) {
            return;
        }
        // Standings are final once the round has timed out
        if self.round.play_state != PlayState::Active {
            return;
        }

        self.round.increment_score(attacker_id);
        if let Some(attacker) = self.combatants.get_mut(&attacker_id) {
            attacker.kills += 1;
        }
        self.apply_progression(attacker_id);

        if weapon.is_victory_weapon
            && self.round.play_state == PlayState::Active
            && self.win_pending.is_none()
        {
            self.begin_win(attacker_id, now);
        }
    }

    fn schedule_respawn(&mut self, user_id: Uuid, life: u64, respawn_secs: u32, now: u64) {
        let (fire_at, seconds_left) = if respawn_secs == 0 {
            (now, 0)
        } else {
            (now + 1_000, respawn_secs - 1)
        };
        self.scheduler.schedule(
            fire_at,
            TimerKind::Respawn {
                user_id,
                life,
                seconds_left,
            },
        );
    }

    fn respawn_step(&mut self, user_id: Uuid, life: u64, seconds_left: u32, fired_at: u64) {
        let alive_target = self
            .combatants
            .get(&user_id)
            .is_some_and(|c| c.is_dead && c.life_token() == life);
        if !alive_target {
            return;
        }

        if seconds_left > 0 {
            self.send(
                user_id,
                ServerMsg::RespawnCountdown {
                    time_left: seconds_left,
                },
            );
            self.scheduler.schedule(
                fired_at + 1_000,
                TimerKind::Respawn {
                    user_id,
                    life,
                    seconds_left: seconds_left - 1,
                },
            );
            return;
        }

        self.respawn(user_id);
    }

    fn respawn(&mut self, user_id: Uuid) {
        let frozen = self.round.play_state != PlayState::Active;
        let spawn = self.spawns.allocate();
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };
        combatant.respawn();
        combatant.set_frozen(frozen);
        let model_uri = combatant.current_weapon.assets.model_uri.clone();
        let weapon = combatant.current_weapon.name.clone();

        self.host.set_position(user_id, spawn);
        self.host.reset_velocities(user_id);
        self.host.play_cue(user_id, Cue::EquipModel { model_uri });
        self.send_stats(user_id);

        info!(
            arena_id = self.config.id,
            user_id = %user_id,
            weapon = %weapon,
            "Player respawned"
        );
    }

    /// Hand the attacker the weapon their kill count now earns
    fn apply_progression(&mut self, attacker_id: Uuid) {
        let Some(attacker) = self.combatants.get_mut(&attacker_id) else {
            return;
        };
        let earned = self.catalog.by_kill_count(attacker.kills);

        if attacker.is_dead {
            // Picked up on respawn
            attacker.last_weapon_before_death = earned;
            return;
        }
        if earned.name == attacker.current_weapon.name {
            return;
        }

        attacker.switch_weapon(earned.clone());
        info!(
            arena_id = self.config.id,
            user_id = %attacker_id,
            kills = attacker.kills,
            weapon = %earned.name,
            "Weapon upgraded"
        );

        self.host.play_cue(
            attacker_id,
            Cue::EquipModel {
                model_uri: earned.assets.model_uri.clone(),
            },
        );
        self.send_stats(attacker_id);
    }

    /// Victory-weapon kill: announce won/lost and start the reset countdown
    fn begin_win(&mut self, winner: Uuid, now: u64) {
        self.win_pending = Some(winner);
        let winner_name = self.username(winner);
        let countdown = self.config.timings.win_countdown_secs;

        info!(
            arena_id = self.config.id,
            user_id = %winner,
            "{} won the game", winner_name
        );

        for user_id in self.round.players.clone() {
            let outcome = if user_id == winner {
                VictoryOutcome::Won
            } else {
                VictoryOutcome::Lost
            };
            self.send(
                user_id,
                ServerMsg::Victory {
                    outcome,
                    winner: winner_name.clone(),
                },
            );
        }
        self.broadcast_message(format!(
            "{winner_name} WON THE GAME! New game starting in {countdown} seconds..."
        ));

        self.scheduler.schedule(
            now,
            TimerKind::WinCountdown {
                winner,
                seconds_left: countdown,
            },
        );
    }

    fn win_countdown_step(&mut self, winner: Uuid, seconds_left: u32, fired_at: u64) {
        if self.win_pending != Some(winner) {
            return;
        }

        if seconds_left == 0 {
            info!(arena_id = self.config.id, "Victory period ended, resetting arena");
            self.teardown(fired_at);
            return;
        }

        self.broadcast(ServerMsg::WinCountdown { seconds_left });
        self.scheduler.schedule(
            fired_at + 1_000,
            TimerKind::WinCountdown {
                winner,
                seconds_left: seconds_left - 1,
            },
        );
    }

    fn send(&mut self, user_id: Uuid, msg: ServerMsg) {
        if let Err(e) = self.host.send_to_client(user_id, &msg) {
            warn!(arena_id = self.config.id, user_id = %user_id, error = %e, "Failed to send client message");
        }
    }

    fn broadcast(&mut self, msg: ServerMsg) {
        for user_id in self.round.players.clone() {
            self.send(user_id, msg.clone());
        }
    }

    fn broadcast_message(&mut self, message: String) {
        self.broadcast(ServerMsg::GameMessage { message });
    }

    fn send_stats(&mut self, user_id: Uuid) {
        let Some(combatant) = self.combatants.get(&user_id) else {
            return;
        };
        let stats = ServerMsg::StatsUpdate {
            weapon: combatant.current_weapon.name.clone(),
            health: combatant.health,
            ammo: combatant.current_ammo,
        };
        let bullets = ServerMsg::BulletsCount {
            bullets: combatant.current_ammo,
        };
        self.send(user_id, stats);
        self.send(user_id, bullets);
    }

    #[cfg(test)]
    pub(crate) fn combatant_mut(&mut self, user_id: Uuid) -> Option<&mut CombatantState> {
        self.combatants.get_mut(&user_id)
    }

    #[cfg(test)]
    pub(crate) fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }
}

/// Handle to a running arena
#[derive(Clone)]
pub struct MatchHandle {
    pub id: u32,
    pub name: String,
    pub max_players: usize,
    pub command_tx: mpsc::Sender<ArenaCommand>,
    pub kill_tx: broadcast::Sender<KillReport>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe_kills(&self) -> broadcast::Receiver<KillReport> {
        self.kill_tx.subscribe()
    }

    /// Deliver a command; false once the arena task has stopped
    pub async fn send(&self, command: ArenaCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }
}

/// Registry of all running arenas
pub struct MatchRegistry {
    matches: DashMap<u32, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &u32) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &u32) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Lowest-id arena with a free slot
    pub fn find_available_match(&self) -> Option<MatchHandle> {
        self.matches
            .iter()
            .filter(|entry| entry.value().player_count() < entry.value().max_players)
            .min_by_key(|entry| *entry.key())
            .map(|entry| entry.value().clone())
    }

    /// Drop every handle; arena tasks stop once their command channel closes
    pub fn close_all(&self) {
        self.matches.clear();
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative arena task
pub struct GameMatch<H: Host> {
    arena: ArenaMatch<H>,
    command_rx: mpsc::Receiver<ArenaCommand>,
    kill_tx: broadcast::Sender<KillReport>,
    player_count: Arc<AtomicUsize>,
    clock_origin: Instant,
    clock_base_ms: u64,
}

impl<H: Host> GameMatch<H> {
    pub fn new(config: ArenaConfig, catalog: Arc<WeaponCatalog>, host: H) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (kill_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id: config.id,
            name: config.name.clone(),
            max_players: config.max_players,
            command_tx,
            kill_tx: kill_tx.clone(),
            player_count: player_count.clone(),
        };

        let clock_base_ms = unix_millis();
        let game_match = Self {
            arena: ArenaMatch::new(config, catalog, host, clock_base_ms),
            command_rx,
            kill_tx,
            player_count,
            clock_origin: Instant::now(),
            clock_base_ms,
        };

        (game_match, handle)
    }

    /// Milliseconds on the arena clock (follows tokio time, so paused tests fast-forward)
    fn now(&self) -> u64 {
        self.clock_base_ms + self.clock_origin.elapsed().as_millis() as u64
    }

    /// Run the round tick, timer pump and command intake until every handle is dropped
    pub async fn run(mut self) {
        info!(arena_id = self.arena.id(), "Arena started");

        let mut round_interval = interval(Duration::from_millis(ROUND_TICK_MS));
        round_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timer_interval = interval(Duration::from_millis(TIMER_PUMP_MS));
        timer_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = round_interval.tick() => {
                    let now = self.now();
                    self.arena.advance(now);
                    self.arena.tick(now);
                }
                _ = timer_interval.tick() => {
                    let now = self.now();
                    self.arena.advance(now);
                }
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let now = self.now();
                    self.arena.advance(now);
                    self.handle_command(command, now);
                }
            }

            self.publish();
        }

        info!(arena_id = self.arena.id(), "Arena stopped");
    }

    fn handle_command(&mut self, command: ArenaCommand, now: u64) {
        match command {
            ArenaCommand::Join { user_id, username } => {
                self.arena.on_join(user_id, username, now);
            }
            ArenaCommand::Leave { user_id } => {
                self.arena.on_leave(user_id, now);
            }
            ArenaCommand::Input {
                user_id,
                input,
                camera_yaw,
                camera_pitch,
                dt_ms,
            } => {
                let dt_ms = if dt_ms > 0.0 { dt_ms } else { tick_delta_ms() };
                self.arena.on_input(user_id, input, camera_yaw, camera_pitch, dt_ms, now);
            }
        }
    }

    fn publish(&mut self) {
        for report in self.arena.drain_kill_reports() {
            // No subscribers is fine
            let _ = self.kill_tx.send(report);
        }
        self.player_count
            .store(self.arena.player_count(), Ordering::Relaxed);
    }
}

/// Start an arena task and register it; the registry entry goes away when the task ends
pub fn spawn_arena<H: Host + 'static>(
    registry: &Arc<MatchRegistry>,
    config: ArenaConfig,
    catalog: Arc<WeaponCatalog>,
    host: H,
) -> MatchHandle {
    let arena_id = config.id;
    let (game_match, handle) = GameMatch::new(config, catalog, host);
    registry.insert(handle.clone());

    info!(arena_id, name = %handle.name, "Registered arena");

    let registry = registry.clone();
    tokio::spawn(async move {
        game_match.run().await;
        registry.remove(&arena_id);
        info!(arena_id, "Arena removed from registry");
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoundTimings;
    use crate::game::host::testing::RecordingHost;
    use crate::host::HeadlessHost;
    use crate::game::weapons::{standard_weapons, WeaponClass, WeaponSet};

    const T0: u64 = 1_000_000;

    /// pistol (0) → rifle (2) → baguette (3, victory)
    fn progression_catalog() -> Arc<WeaponCatalog> {
        let mut weapons = standard_weapons();
        let pistol = weapons.remove(0);
        let mut rifle = weapons.remove(0);
        rifle.required_kills = 2;
        let mut baguette = weapons.pop().expect("baguette is last");
        baguette.required_kills = 3;
        Arc::new(WeaponCatalog::new(vec![pistol, rifle, baguette]).expect("valid catalog"))
    }

    fn arena_with(catalog: Arc<WeaponCatalog>, min: usize, max: usize) -> ArenaMatch<RecordingHost> {
        let config = ArenaConfig::new(1, "Test Arena", min, max);
        ArenaMatch::new(config, catalog, RecordingHost::default(), T0)
    }

    fn arena() -> ArenaMatch<RecordingHost> {
        arena_with(progression_catalog(), 2, 4)
    }

    fn join(arena: &mut ArenaMatch<RecordingHost>, name: &str, now: u64) -> Uuid {
        let id = Uuid::new_v4();
        arena.on_join(id, name.to_string(), now);
        id
    }

    /// Two players, countdown elapsed, round active. Returns (a, b, now).
    fn active_duel(arena: &mut ArenaMatch<RecordingHost>) -> (Uuid, Uuid, u64) {
        let a = join(arena, "alice", T0);
        let b = join(arena, "bob", T0);
        arena.tick(T0);
        let start = T0 + RoundTimings::default().start_countdown_ms;
        arena.tick(start);
        assert_eq!(arena.play_state(), PlayState::Active);

        // Face each other along -Z
        arena.host_mut().presences.get_mut(&a).expect("a spawned").position =
            Vec3::new(0.0, 1.0, 0.0);
        arena.host_mut().presences.get_mut(&b).expect("b spawned").position =
            Vec3::new(0.0, 1.0, -10.0);
        (a, b, start)
    }

    fn fire(arena: &mut ArenaMatch<RecordingHost>, user_id: Uuid, now: u64) {
        let input = InputState {
            fire: true,
            ..Default::default()
        };
        arena.on_input(user_id, input, 0.0, 0.0, 16.0, now);
        let release = InputState::default();
        arena.on_input(user_id, release, 0.0, 0.0, 16.0, now);
    }

    /// Script a head shot on `target` and fire
    fn kill(arena: &mut ArenaMatch<RecordingHost>, shooter: Uuid, target: Uuid, now: u64) {
        arena.combatant_mut(target).expect("target exists").health = 1.0;
        let point = arena.host().presences[&target].position + Vec3::new(0.0, 0.5, 0.0);
        arena.host().script_hit(point, Some(target));
        fire(arena, shooter, now);
    }

    #[test]
    fn waiting_moves_to_starting_on_first_tick_at_threshold() {
        let mut arena = arena();
        let a = join(&mut arena, "alice", T0);
        arena.tick(T0);
        assert_eq!(arena.play_state(), PlayState::Waiting);

        let b = join(&mut arena, "bob", T0 + 10);
        arena.tick(T0 + 1_000);
        assert_eq!(arena.play_state(), PlayState::Starting);
        assert_eq!(arena.round().start_time, T0 + 1_000);
        assert!(arena.combatant(a).expect("a").is_frozen);
        assert!(arena.combatant(b).expect("b").is_frozen);
        assert!(arena
            .host()
            .game_messages_for(a)
            .iter()
            .any(|m| m == "Game starting in 15 seconds! Get ready!"));
    }

    #[test]
    fn countdown_announces_each_second_once_then_activates() {
        let mut arena = arena();
        let a = join(&mut arena, "alice", T0);
        let _b = join(&mut arena, "bob", T0);
        arena.tick(T0);

        // Jittery ticks must not repeat a value
        for offset in [0, 400, 1_000, 1_600, 2_000, 2_000, 14_500] {
            arena.tick(T0 + offset);
        }
        let countdown: Vec<String> = arena
            .host()
            .game_messages_for(a)
            .into_iter()
            .filter(|m| m.ends_with("...") && m.starts_with("Game starting in"))
            .collect();
        assert_eq!(
            countdown,
            [
                "Game starting in 15...",
                "Game starting in 14...",
                "Game starting in 13...",
                "Game starting in 1..."
            ]
        );
        assert_eq!(arena.play_state(), PlayState::Starting);

        arena.tick(T0 + 15_000);
        assert_eq!(arena.play_state(), PlayState::Active);
        assert_eq!(arena.round().round_number, 1);
        assert_eq!(arena.round().round_start_time, Some(T0 + 15_000));
        assert!(!arena.combatant(a).expect("a").is_frozen);
    }

    #[test]
    fn frozen_players_cannot_move_or_fire() {
        let mut arena = arena();
        let a = join(&mut arena, "alice", T0);
        assert!(arena.combatant(a).expect("a").is_frozen);

        let input = InputState {
            forward: true,
            fire: true,
            reload: true,
            ..Default::default()
        };
        arena.on_input(a, input, 1.0, 0.0, 16.0, T0);

        let combatant = arena.combatant(a).expect("a");
        assert_eq!(combatant.current_ammo, combatant.current_weapon.max_ammo);
        assert!(combatant.last_fire_time.is_none());
        assert!(arena.host().movements.is_empty());
        assert!(arena.host().probes.borrow().is_empty());
    }

    #[test]
    fn set_frozen_twice_matches_once() {
        let mut arena = arena();
        let (a, _b, _) = active_duel(&mut arena);
        let messages_before = arena.host().messages.len();
        let resets_before = arena.host().velocity_resets.len();

        arena.set_frozen(a, true);
        let once = arena.combatant(a).expect("a").clone();
        arena.set_frozen(a, true);
        let twice = arena.combatant(a).expect("a");

        assert!(once.is_frozen && twice.is_frozen);
        assert_eq!(once.current_ammo, twice.current_ammo);
        assert_eq!(arena.host().messages.len(), messages_before);
        assert_eq!(arena.host().velocity_resets.len(), resets_before + 2);
    }

    #[test]
    fn movement_is_forwarded_when_active() {
        let mut arena = arena();
        let (a, _b, now) = active_duel(&mut arena);
        let input = InputState {
            forward: true,
            ..Default::default()
        };
        arena.on_input(a, input, 0.0, 0.0, 16.0, now);
        let (id, velocity) = arena.host().movements.last().copied().expect("movement sent");
        assert_eq!(id, a);
        assert!(velocity.abs_diff_eq(Vec3::new(0.0, 0.0, -4.0), 1e-5));
    }

    #[test]
    fn kill_scores_respawns_and_upgrades() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);

        kill(&mut arena, a, b, now);
        assert_eq!(arena.round().score(a), 1);
        assert_eq!(arena.round().score(b), 0);
        assert!(arena.combatant(b).expect("b").is_dead);
        assert_eq!(arena.combatant(b).expect("b").health, 0.0);
        assert_eq!(arena.combatant(a).expect("a").current_weapon.name, "pistol");
        assert_eq!(arena.host().presences[&b].position, OFF_MAP_POSITION);
        assert_eq!(arena.host().kill_reports.len(), 1);
        assert_eq!(arena.host().kill_reports[0].hit_location, Some(HitLocation::Head));
        assert!(arena
            .host()
            .messages_for(b)
            .contains(&&ServerMsg::PlayerDied { respawn_secs: 5 }));

        arena.advance(now + 4_999);
        assert!(arena.combatant(b).expect("b").is_dead);
        assert!(arena
            .host()
            .messages_for(b)
            .contains(&&ServerMsg::RespawnCountdown { time_left: 1 }));

        arena.advance(now + 5_000);
        let victim = arena.combatant(b).expect("b");
        assert!(!victim.is_dead);
        assert_eq!(victim.health, 100.0);
        assert_eq!(victim.current_weapon.name, "pistol");
        assert_eq!(victim.current_ammo, victim.current_weapon.max_ammo);
        assert_ne!(arena.host().presences[&b].position, OFF_MAP_POSITION);

        // Second kill reaches the rifle tier
        arena.host_mut().presences.get_mut(&b).expect("b").position = Vec3::new(0.0, 1.0, -10.0);
        kill(&mut arena, a, b, now + 6_000);
        assert_eq!(arena.round().score(a), 2);
        let attacker = arena.combatant(a).expect("a");
        assert_eq!(attacker.current_weapon.name, "ak47");
        assert_eq!(attacker.current_ammo, attacker.current_weapon.max_ammo);
        assert_eq!(arena.play_state(), PlayState::Active);
    }

    #[test]
    fn victim_keeps_weapon_through_respawn() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        let rifle = progression_catalog().by_name("ak47").expect("rifle");
        arena.combatant_mut(b).expect("b").switch_weapon(rifle);
        arena.combatant_mut(b).expect("b").current_ammo = 2;

        kill(&mut arena, a, b, now);
        arena.advance(now + 5_000);
        let victim = arena.combatant(b).expect("b");
        assert_eq!(victim.current_weapon.name, "ak47");
        assert_eq!(victim.current_ammo, 30);
    }

    #[test]
    fn hit_location_and_falloff_drive_damage() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);

        // Body shot at 10 units: inside pistol falloff start
        let point = Vec3::new(0.0, 1.2, -10.0);
        arena.host().script_hit(point, Some(b));
        fire(&mut arena, a, now);
        assert_eq!(arena.combatant(b).expect("b").health, 95.0);

        // Limb shot
        arena.host().script_hit(Vec3::new(0.0, 0.9, -10.0), Some(b));
        fire(&mut arena, a, now + 500);
        assert_eq!(arena.combatant(b).expect("b").health, 92.0);

        let probes = arena.host().probes.borrow();
        let (origin, direction, range, exclude) = probes[0];
        assert_eq!(origin, Vec3::new(0.0, 1.7, 0.0));
        assert_eq!(direction, Vec3::NEG_Z);
        assert_eq!(range, 50.0);
        assert_eq!(exclude, a);
    }

    #[test]
    fn fire_rate_and_empty_magazine() {
        let mut arena = arena();
        let (a, _b, now) = active_duel(&mut arena);

        fire(&mut arena, a, now);
        fire(&mut arena, a, now + 100);
        assert_eq!(arena.combatant(a).expect("a").current_ammo, 19);

        arena.combatant_mut(a).expect("a").current_ammo = 0;
        let held = InputState {
            fire: true,
            ..Default::default()
        };
        for step in 0..5 {
            arena.on_input(a, held, 0.0, 0.0, 16.0, now + 1_000 + step * 16);
        }
        let dry_fires = arena
            .host()
            .cues
            .iter()
            .filter(|(_, cue)| matches!(cue, Cue::Audio { uri, .. } if uri == DRY_FIRE_AUDIO))
            .count();
        assert_eq!(dry_fires, 1);
        assert_eq!(arena.combatant(a).expect("a").current_ammo, 0);
    }

    #[test]
    fn reload_completes_through_scheduler() {
        let mut arena = arena();
        let (a, _b, now) = active_duel(&mut arena);
        arena.combatant_mut(a).expect("a").current_ammo = 3;

        let reload = InputState {
            reload: true,
            ..Default::default()
        };
        arena.on_input(a, reload, 0.0, 0.0, 16.0, now);
        assert!(arena.combatant(a).expect("a").is_reloading());

        // Fire is rejected while reloading
        fire(&mut arena, a, now + 100);
        assert_eq!(arena.combatant(a).expect("a").current_ammo, 3);

        arena.advance(now + 2_199);
        assert!(arena.combatant(a).expect("a").is_reloading());
        arena.advance(now + 2_200);
        let combatant = arena.combatant(a).expect("a");
        assert!(!combatant.is_reloading());
        assert_eq!(combatant.current_ammo, 20);
    }

    #[test]
    fn reload_timer_survives_disconnect_and_rejoin() {
        let mut arena = arena();
        let (a, _b, now) = active_duel(&mut arena);
        arena.combatant_mut(a).expect("a").current_ammo = 3;
        let reload = InputState {
            reload: true,
            ..Default::default()
        };
        arena.on_input(a, reload, 0.0, 0.0, 16.0, now);

        arena.on_leave(a, now + 100);
        arena.on_join(a, "alice".to_string(), now + 200);
        arena.combatant_mut(a).expect("a rejoined").current_ammo = 1;

        arena.advance(now + 5_000);
        assert_eq!(arena.combatant(a).expect("a").current_ammo, 1);
    }

    #[test]
    fn respawn_timer_is_dropped_when_victim_leaves() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        kill(&mut arena, a, b, now);
        arena.on_leave(b, now + 1_500);

        arena.advance(now + 10_000);
        assert!(arena.combatant(b).is_none());
        assert_eq!(arena.pending_timers(), 0);
    }

    #[test]
    fn suicide_does_not_score() {
        let mut arena = arena_with(
            Arc::new(WeaponCatalog::builtin(WeaponSet::Standard).expect("valid")),
            2,
            4,
        );
        let (a, b, now) = active_duel(&mut arena);
        let rpg = arena.catalog.by_name("rpg").expect("rpg");
        assert_eq!(rpg.class, WeaponClass::Explosive);
        arena.combatant_mut(a).expect("a").switch_weapon(rpg);
        arena.combatant_mut(a).expect("a").health = 5.0;

        // Rocket into the floor at the shooter's feet; b is out of the blast
        arena.host().script_hit(Vec3::new(0.0, 0.0, -1.0), None);
        fire(&mut arena, a, now);

        assert!(arena.combatant(a).expect("a").is_dead);
        assert!(!arena.combatant(b).expect("b").is_dead);
        assert_eq!(arena.round().score(a), 0);
        assert_eq!(arena.combatant(a).expect("a").kills, 0);
    }

    #[test]
    fn explosion_damages_everyone_in_radius_once() {
        let catalog = Arc::new(WeaponCatalog::builtin(WeaponSet::Standard).expect("valid"));
        let mut arena = arena_with(catalog, 2, 4);
        let (a, b, now) = active_duel(&mut arena);
        let c = join(&mut arena, "carol", now);
        arena.set_frozen(c, false);
        arena.host_mut().presences.get_mut(&c).expect("c").position = Vec3::new(2.0, 1.0, -10.0);

        let rpg = arena.catalog.by_name("rpg").expect("rpg");
        arena.combatant_mut(a).expect("a").switch_weapon(rpg);
        arena.host().script_hit(Vec3::new(0.0, 1.0, -10.0), Some(b));
        fire(&mut arena, a, now);

        assert_eq!(arena.combatant(b).expect("b").health, 85.0);
        assert_eq!(arena.combatant(c).expect("c").health, 85.0);
        assert_eq!(arena.combatant(a).expect("a").health, 100.0);
    }

    #[test]
    fn raycast_failure_is_swallowed() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        arena.host().script_failure();
        fire(&mut arena, a, now);

        assert_eq!(arena.combatant(a).expect("a").current_ammo, 19);
        assert_eq!(arena.combatant(b).expect("b").health, 100.0);
    }

    #[test]
    fn failed_sends_do_not_roll_back_damage() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        arena.host_mut().fail_sends = true;
        kill(&mut arena, a, b, now);

        assert!(arena.combatant(b).expect("b").is_dead);
        assert_eq!(arena.round().score(a), 1);
    }

    #[test]
    fn victory_weapon_kill_runs_win_path() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        let baguette = progression_catalog().by_name("baguette").expect("baguette");
        arena.combatant_mut(a).expect("a").switch_weapon(baguette);
        arena.combatant_mut(a).expect("a").kills = 3;

        kill(&mut arena, a, b, now);
        assert_eq!(arena.win_pending(), Some(a));
        assert!(arena.host().messages_for(a).contains(&&ServerMsg::Victory {
            outcome: VictoryOutcome::Won,
            winner: "alice".into()
        }));
        assert!(arena.host().messages_for(b).contains(&&ServerMsg::Victory {
            outcome: VictoryOutcome::Lost,
            winner: "alice".into()
        }));

        // Time-out is suspended while the win countdown runs
        arena.tick(now + 400_000);
        assert_eq!(arena.play_state(), PlayState::Active);

        arena.advance(now);
        arena.advance(now + 4_000);
        let countdown: Vec<u32> = arena
            .host()
            .messages_for(b)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::WinCountdown { seconds_left } => Some(*seconds_left),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, [5, 4, 3, 2, 1]);
        assert!(arena.host().lobby.is_empty());

        arena.advance(now + 5_000);
        assert_eq!(arena.play_state(), PlayState::Waiting);
        assert_eq!(arena.round().round_number, 0);
        assert!(arena.round().scores.is_empty());
        assert!(arena.round().players.is_empty());
        assert!(arena.combatant(a).is_none());
        assert_eq!(arena.host().lobby, vec![a, b]);
        assert_eq!(arena.pending_timers(), 0);
        assert!(arena
            .host()
            .messages_for(a)
            .iter()
            .all(|m| !matches!(m, ServerMsg::RoundResults { .. })));
    }

    #[test]
    fn timeout_path_shows_sorted_scores_then_resets() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        let c = join(&mut arena, "carol", now);
        arena.set_frozen(c, false);
        arena.host_mut().presences.get_mut(&c).expect("c").position = Vec3::new(0.0, 1.0, -5.0);

        kill(&mut arena, c, b, now);

        let duration = RoundTimings::default().round_duration_ms;
        arena.tick(now + duration - 1);
        assert_eq!(arena.play_state(), PlayState::Active);
        arena.tick(now + duration);
        assert_eq!(arena.play_state(), PlayState::Ending);
        assert_eq!(arena.round().round_end_time, Some(now + duration));

        let results = arena
            .host()
            .messages_for(a)
            .into_iter()
            .find_map(|m| match m {
                ServerMsg::RoundResults {
                    scores,
                    round_number,
                    is_game_over,
                } => Some((scores.clone(), *round_number, *is_game_over)),
                _ => None,
            })
            .expect("results sent");
        let order: Vec<(&str, u32)> = results
            .0
            .iter()
            .map(|s| (s.username.as_str(), s.score))
            .collect();
        assert_eq!(order, [("carol", 1), ("alice", 0), ("bob", 0)]);
        assert_eq!(results.1, 1);
        assert!(results.2);

        arena.tick(now + duration + 4_999);
        assert_eq!(arena.play_state(), PlayState::Ending);
        arena.tick(now + duration + 5_000);
        assert_eq!(arena.play_state(), PlayState::Waiting);
        assert_eq!(arena.round().round_number, 0);
        assert!(arena.round().scores.is_empty());
        assert_eq!(arena.host().lobby, vec![a, b, c]);
    }

    #[test]
    fn round_warning_once_per_second_in_final_window() {
        let mut arena = arena();
        let (a, _b, now) = active_duel(&mut arena);
        let duration = RoundTimings::default().round_duration_ms;

        arena.tick(now + duration - 31_000);
        arena.tick(now + duration - 30_000);
        arena.tick(now + duration - 30_000);
        arena.tick(now + duration - 29_000);

        let warnings: Vec<String> = arena
            .host()
            .game_messages_for(a)
            .into_iter()
            .filter(|m| m.starts_with("Round ending in"))
            .collect();
        assert_eq!(warnings, ["Round ending in 30...", "Round ending in 29..."]);
    }

    #[test]
    fn capacity_and_duplicate_joins() {
        let mut arena = arena_with(progression_catalog(), 1, 2);
        let a = join(&mut arena, "alice", T0);
        arena.on_join(a, "alice".to_string(), T0);
        let _b = join(&mut arena, "bob", T0);
        let c = join(&mut arena, "carol", T0);

        assert_eq!(arena.player_count(), 2);
        assert!(arena.combatant(c).is_none());
        assert!(matches!(
            arena.host().messages_for(c).first(),
            Some(ServerMsg::Error { code, .. }) if code == "arena_full"
        ));
    }

    #[test]
    fn scores_track_joined_players_only() {
        let mut arena = arena();
        let a = join(&mut arena, "alice", T0);
        let b = join(&mut arena, "bob", T0);
        assert_eq!(arena.round().scores.len(), 2);

        arena.on_leave(b, T0);
        assert!(arena.round().scores.keys().all(|id| arena.round().players.contains(id)));
        assert_eq!(arena.round().players, vec![a]);
        assert_eq!(arena.host().despawned, vec![b]);
    }

    #[test]
    fn empty_arena_falls_back_to_waiting() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        arena.on_leave(a, now);
        arena.on_leave(b, now);
        arena.tick(now + 1_000);
        assert_eq!(arena.play_state(), PlayState::Waiting);
        assert_eq!(arena.round().round_number, 0);
    }

    #[test]
    fn respawn_during_countdown_stays_frozen() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        kill(&mut arena, a, b, now);

        let duration = RoundTimings::default().round_duration_ms;
        arena.tick(now + duration);
        assert_eq!(arena.play_state(), PlayState::Ending);
        arena.advance(now + 5_000);
        assert!(arena.combatant(b).expect("b").is_frozen);
    }

    #[test]
    fn time_out_freezes_everyone_and_locks_standings() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        let end = now + RoundTimings::default().round_duration_ms;

        arena.tick(end);
        assert_eq!(arena.play_state(), PlayState::Ending);
        assert!(arena.combatant(a).expect("a").is_frozen);
        assert!(arena.combatant(b).expect("b").is_frozen);

        // Frozen shooters cannot fire at all
        kill(&mut arena, a, b, end + 100);
        assert!(!arena.combatant(b).expect("b").is_dead);
        assert_eq!(arena.combatant(a).expect("a").current_ammo, 20);

        // A kill that still lands leaves the published standings alone
        arena.set_frozen(a, false);
        kill(&mut arena, a, b, end + 600);
        assert!(arena.combatant(b).expect("b").is_dead);
        assert_eq!(arena.round().score(a), 0);
        let attacker = arena.combatant(a).expect("a");
        assert_eq!(attacker.kills, 0);
        assert_eq!(attacker.current_weapon.name, "pistol");
    }

    #[test]
    fn victory_weapon_kill_after_time_out_keeps_ending_path() {
        let mut arena = arena();
        let (a, b, now) = active_duel(&mut arena);
        let baguette = progression_catalog().by_name("baguette").expect("baguette");
        arena.combatant_mut(a).expect("a").switch_weapon(baguette);
        arena.combatant_mut(a).expect("a").kills = 3;

        let end = now + RoundTimings::default().round_duration_ms;
        arena.tick(end);
        arena.set_frozen(a, false);
        kill(&mut arena, a, b, end + 100);

        assert!(arena.combatant(b).expect("b").is_dead);
        assert_eq!(arena.win_pending(), None);
        assert!(arena
            .host()
            .messages
            .iter()
            .all(|(_, m)| !matches!(m, ServerMsg::Victory { .. } | ServerMsg::WinCountdown { .. })));

        arena.advance(end + 4_999);
        arena.tick(end + 4_999);
        assert_eq!(arena.play_state(), PlayState::Ending);
        arena.tick(end + 5_000);
        assert_eq!(arena.play_state(), PlayState::Waiting);
        assert_eq!(arena.host().lobby, vec![a, b]);
    }

    #[test]
    fn pitched_aim_reaches_body_on_headless_host() {
        let config = ArenaConfig::new(1, "Headless", 2, 4);
        let mut arena = ArenaMatch::new(config, progression_catalog(), HeadlessHost::new(), T0);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        arena.on_join(a, "alice".to_string(), T0);
        arena.on_join(b, "bob".to_string(), T0);
        arena.tick(T0);
        let start = T0 + RoundTimings::default().start_countdown_ms;
        arena.tick(start);

        arena.host_mut().set_position(a, Vec3::new(0.0, 1.0, 0.0));
        arena.host_mut().set_position(b, Vec3::new(0.0, 1.0, -10.0));

        // Muzzle sits 0.7 up; aim half a unit lower over ten units
        let pitch = -(0.5f32 / 10.0).atan();
        let input = InputState {
            fire: true,
            ..Default::default()
        };
        arena.on_input(a, input, 0.0, pitch, 16.0, start);
        assert_eq!(arena.combatant(b).expect("b").health, 95.0);

        // Level aim from the muzzle lands in the head bucket
        let release = InputState::default();
        arena.on_input(a, release, 0.0, 0.0, 16.0, start + 500);
        arena.on_input(a, input, 0.0, 0.0, 16.0, start + 1_000);
        assert_eq!(arena.combatant(b).expect("b").health, 85.0);
    }

    #[tokio::test(start_paused = true)]
    async fn arena_task_processes_commands_and_deregisters() {
        let registry = Arc::new(MatchRegistry::new());
        let catalog = progression_catalog();
        let handle = spawn_arena(
            &registry,
            ArenaConfig::new(7, "Runner", 2, 4),
            catalog,
            RecordingHost::default(),
        );
        assert_eq!(registry.active_matches(), 1);

        for name in ["alice", "bob"] {
            assert!(
                handle
                    .send(ArenaCommand::Join {
                        user_id: Uuid::new_v4(),
                        username: name.to_string(),
                    })
                    .await
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.player_count(), 2);
        assert_eq!(registry.total_players(), 2);
        assert!(registry.find_available_match().is_some());

        registry.close_all();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.active_matches(), 0);
    }
}
