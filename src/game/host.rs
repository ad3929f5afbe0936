//! Capability interface the embedding engine implements for an arena

use glam::Vec3;
use uuid::Uuid;

use super::protocol::{Cue, KillReport, ServerMsg};

/// Engine-side view of a player's physical presence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Presence {
    /// Reference position (body centre)
    pub position: Vec3,
    /// Unit camera facing direction
    pub facing: Vec3,
}

/// Result of a hit-scan probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub point: Vec3,
    /// Player whose presence was hit, None for world geometry
    pub entity: Option<Uuid>,
}

/// Host collaborator failures. Logged by the arena, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("No presence for player {0}")]
    NoPresence(Uuid),

    #[error("Client channel closed for player {0}")]
    ClientGone(Uuid),

    #[error("Physics query failed: {0}")]
    Physics(String),

    #[error("Lobby transfer failed: {0}")]
    Lobby(String),
}

/// Engine services an arena relies on. All calls are synchronous and fast;
/// the arena treats errors as best-effort failures.
pub trait Host: Send {
    /// Probe from `origin` along `direction` up to `max_distance`, ignoring `exclude`'s presence
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        exclude: Uuid,
    ) -> Result<Option<RaycastHit>, HostError>;

    fn presence(&self, user_id: Uuid) -> Option<Presence>;

    fn spawn_presence(
        &mut self,
        user_id: Uuid,
        position: Vec3,
        model_uri: &str,
    ) -> Result<(), HostError>;

    fn despawn_presence(&mut self, user_id: Uuid);

    fn set_position(&mut self, user_id: Uuid, position: Vec3);

    /// Zero linear and angular velocity
    fn reset_velocities(&mut self, user_id: Uuid);

    /// Point the camera; the presence's facing follows it
    fn set_camera(&mut self, user_id: Uuid, yaw: f32, pitch: f32);

    /// Drive the presence towards `target_velocity` for one simulation step
    fn apply_movement(&mut self, user_id: Uuid, target_velocity: Vec3, dt_ms: f32);

    fn play_cue(&mut self, user_id: Uuid, cue: Cue);

    fn send_to_client(&mut self, user_id: Uuid, msg: &ServerMsg) -> Result<(), HostError>;

    fn move_to_lobby(&mut self, user_id: Uuid) -> Result<(), HostError>;

    fn on_kill_reported(&mut self, _report: &KillReport) {}
}
