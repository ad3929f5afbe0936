//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;

use crate::game::weapons::WeaponSet;

/// Round lifecycle timings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundTimings {
    /// Length of an active round
    pub round_duration_ms: u64,
    /// Countdown between reaching the player threshold and the round start
    pub start_countdown_ms: u64,
    /// Final stretch of a round that gets "round ending" announcements
    pub round_warning_ms: u64,
    /// How long final scores stay up before players return to the lobby
    pub end_screen_ms: u64,
    /// Countdown between a victory and the arena reset
    pub win_countdown_secs: u32,
    pub respawn_secs: u32,
}

impl Default for RoundTimings {
    fn default() -> Self {
        Self {
            round_duration_ms: 300_000,
            start_countdown_ms: 15_000,
            round_warning_ms: 30_000,
            end_screen_ms: 5_000,
            win_countdown_secs: 5,
            respawn_secs: 5,
        }
    }
}

/// One arena instance
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    pub id: u32,
    pub name: String,
    pub min_players: usize,
    pub max_players: usize,
    pub timings: RoundTimings,
    /// Seed for spawn selection and spread jitter
    pub seed: u64,
}

impl ArenaConfig {
    pub fn new(id: u32, name: impl Into<String>, min_players: usize, max_players: usize) -> Self {
        Self {
            id,
            name: name.into(),
            min_players,
            max_players,
            timings: RoundTimings::default(),
            seed: u64::from(id),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Built-in weapon table used by every arena
    pub weapon_set: WeaponSet,
    pub arenas: Vec<ArenaConfig>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let weapon_set = match env::var("WEAPON_SET") {
            Ok(raw) => raw
                .parse::<WeaponSet>()
                .map_err(|_| ConfigError::Invalid("WEAPON_SET"))?,
            Err(_) => WeaponSet::Standard,
        };

        let defaults = RoundTimings::default();
        let timings = RoundTimings {
            round_duration_ms: parse_or("ROUND_DURATION_MS", defaults.round_duration_ms)?,
            start_countdown_ms: parse_or("START_COUNTDOWN_MS", defaults.start_countdown_ms)?,
            round_warning_ms: parse_or("ROUND_WARNING_MS", defaults.round_warning_ms)?,
            end_screen_ms: parse_or("END_SCREEN_MS", defaults.end_screen_ms)?,
            win_countdown_secs: parse_or("WIN_COUNTDOWN_SECS", defaults.win_countdown_secs)?,
            respawn_secs: parse_or("RESPAWN_SECS", defaults.respawn_secs)?,
        };

        let min_players: usize = parse_or("ARENA_MIN_PLAYERS", 2)?;
        let max_players: usize = parse_or("ARENA_MAX_PLAYERS", 4)?;
        if min_players == 0 {
            return Err(ConfigError::Invalid("ARENA_MIN_PLAYERS"));
        }
        if max_players < min_players {
            return Err(ConfigError::Invalid("ARENA_MAX_PLAYERS"));
        }

        let seed = match env::var("SPAWN_SEED") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid("SPAWN_SEED"))?,
            Err(_) => rand::random::<u64>(),
        };

        let practice_arena = parse_or("PRACTICE_ARENA", true)?;

        let mut arenas = vec![ArenaConfig {
            timings: timings.clone(),
            seed,
            ..ArenaConfig::new(1, "Gun Game World", min_players, max_players)
        }];
        if practice_arena {
            arenas.push(ArenaConfig {
                timings,
                seed: seed.wrapping_add(1),
                ..ArenaConfig::new(2, "Practice Range", 1, 1)
            });
        }

        Ok(Self {
            log_level,
            weapon_set,
            arenas,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
