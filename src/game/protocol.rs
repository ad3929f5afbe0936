//! Message definitions exchanged between an arena and its host
//! These are the structured payloads pushed to clients and the commands fed into a match

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::combat::HitLocation;
use super::InputState;

/// Commands delivered to a running arena
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaCommand {
    /// Player attached to the arena
    Join { user_id: Uuid, username: String },

    /// Player left or disconnected
    Leave { user_id: Uuid },

    /// One simulation step of player input
    Input {
        user_id: Uuid,
        input: InputState,
        /// Camera yaw in radians
        camera_yaw: f32,
        /// Camera pitch in radians, positive looks up
        #[serde(default)]
        camera_pitch: f32,
        /// Simulation step length
        dt_ms: f32,
    },
}

/// Messages sent from the arena to a client UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Free-form announcement (countdowns, round start, player counts)
    GameMessage { message: String },

    /// Own combat stats after any change
    StatsUpdate {
        weapon: String,
        /// One decimal place
        health: f32,
        ammo: u32,
    },

    /// Ammo counter widget
    BulletsCount { bullets: u32 },

    /// Someone died
    KillFeed { killer: String, victim: String },

    /// Sent to the victim at death
    PlayerDied { respawn_secs: u32 },

    /// Seconds until the victim respawns
    RespawnCountdown { time_left: u32 },

    /// Final standings at the end of a timed-out round
    RoundResults {
        scores: Vec<ScoreLine>,
        round_number: u32,
        is_game_over: bool,
    },

    /// Victory-weapon kill ended the match
    Victory {
        outcome: VictoryOutcome,
        winner: String,
    },

    /// Seconds until the arena resets after a victory
    WinCountdown { seconds_left: u32 },

    /// Error message
    Error { code: String, message: String },
}

/// One row of the final scoreboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub rank: u32,
    pub user_id: Uuid,
    pub username: String,
    pub score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictoryOutcome {
    Won,
    Lost,
}

/// Fire-and-forget presentation side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum Cue {
    Audio { uri: String, volume: f32 },
    Animation { name: String },
    /// Attach a weapon model to the player's hand
    EquipModel { model_uri: String },
    UnequipModel,
}

/// Emitted for every death, for telemetry and kill-feed consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillReport {
    pub victim_id: Uuid,
    pub attacker_id: Uuid,
    /// Damage of the killing hit
    pub damage: f32,
    /// None for area-effect kills
    pub hit_location: Option<HitLocation>,
    pub weapon: String,
    pub at: u64,
}
