//! In-process host: presence table, sphere hit-scan and outbound fan-out

use glam::Vec3;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::game::movement::MovementSystem;
use crate::game::protocol::{Cue, KillReport, ServerMsg};
use crate::game::{Host, HostError, Presence, RaycastHit};

/// Hit sphere around a presence's reference point
pub const PLAYER_RADIUS: f32 = 0.9;

/// Height of the reference point above the floor when standing
const STANDING_HEIGHT: f32 = 1.0;

const GRAVITY: f32 = 20.0;

/// Everything the arena pushes out of the process
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Message { user_id: Uuid, msg: ServerMsg },
    Cue { user_id: Uuid, cue: Cue },
    LobbyTransfer { user_id: Uuid },
    Kill { report: KillReport },
}

#[derive(Debug, Clone)]
struct Body {
    position: Vec3,
    velocity: Vec3,
    yaw: f32,
    pitch: f32,
    model_uri: String,
}

impl Body {
    fn grounded(&self) -> bool {
        self.position.y <= STANDING_HEIGHT + f32::EPSILON
    }
}

/// Host without an engine behind it. Players are spheres on a flat floor at y = 0.
pub struct HeadlessHost {
    bodies: HashMap<Uuid, Body>,
    outbound: broadcast::Sender<Outbound>,
}

impl HeadlessHost {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(1024);
        Self {
            bodies: HashMap::new(),
            outbound,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    pub fn presence_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn model_uri(&self, user_id: Uuid) -> Option<&str> {
        self.bodies.get(&user_id).map(|b| b.model_uri.as_str())
    }

    fn publish(&self, event: Outbound) {
        // Nobody listening is fine
        let _ = self.outbound.send(event);
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Distance along a unit ray to the first intersection with a sphere
fn ray_sphere(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let to_center = center - origin;
    let along = to_center.dot(direction);
    let closest_sq = to_center.length_squared() - along * along;
    let radius_sq = radius * radius;
    if closest_sq > radius_sq {
        return None;
    }

    let half_chord = (radius_sq - closest_sq).sqrt();
    let near = along - half_chord;
    let far = along + half_chord;
    if far < 0.0 {
        None
    } else if near >= 0.0 {
        Some(near)
    } else {
        Some(far)
    }
}

/// Distance along a unit ray to the floor plane
fn ray_floor(origin: Vec3, direction: Vec3) -> Option<f32> {
    if direction.y >= 0.0 || origin.y < 0.0 {
        return None;
    }
    Some(-origin.y / direction.y)
}

impl Host for HeadlessHost {
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        exclude: Uuid,
    ) -> Result<Option<RaycastHit>, HostError> {
        let direction = direction.try_normalize().ok_or_else(|| {
            HostError::Physics(format!("degenerate ray direction {direction}"))
        })?;

        let mut best: Option<(f32, Option<Uuid>)> =
            ray_floor(origin, direction).map(|t| (t, None));

        for (id, body) in &self.bodies {
            if *id == exclude {
                continue;
            }
            if let Some(t) = ray_sphere(origin, direction, body.position, PLAYER_RADIUS) {
                if best.map_or(true, |(closest, _)| t < closest) {
                    best = Some((t, Some(*id)));
                }
            }
        }

        Ok(best
            .filter(|(t, _)| *t <= max_distance)
            .map(|(t, entity)| RaycastHit {
                point: origin + direction * t,
                entity,
            }))
    }

    fn presence(&self, user_id: Uuid) -> Option<Presence> {
        self.bodies.get(&user_id).map(|body| Presence {
            position: body.position,
            facing: MovementSystem::facing_from_angles(body.yaw, body.pitch),
        })
    }

    fn spawn_presence(
        &mut self,
        user_id: Uuid,
        position: Vec3,
        model_uri: &str,
    ) -> Result<(), HostError> {
        self.bodies.insert(
            user_id,
            Body {
                position,
                velocity: Vec3::ZERO,
                yaw: 0.0,
                pitch: 0.0,
                model_uri: model_uri.to_string(),
            },
        );
        debug!(user_id = %user_id, %position, "Presence spawned");
        Ok(())
    }

    fn despawn_presence(&mut self, user_id: Uuid) {
        self.bodies.remove(&user_id);
    }

    fn set_position(&mut self, user_id: Uuid, position: Vec3) {
        if let Some(body) = self.bodies.get_mut(&user_id) {
            body.position = position;
        }
    }

    fn reset_velocities(&mut self, user_id: Uuid) {
        if let Some(body) = self.bodies.get_mut(&user_id) {
            body.velocity = Vec3::ZERO;
        }
    }

    fn set_camera(&mut self, user_id: Uuid, yaw: f32, pitch: f32) {
        if let Some(body) = self.bodies.get_mut(&user_id) {
            body.yaw = yaw;
            body.pitch = pitch;
        }
    }

    fn apply_movement(&mut self, user_id: Uuid, target_velocity: Vec3, dt_ms: f32) {
        let Some(body) = self.bodies.get_mut(&user_id) else {
            return;
        };
        let dt = dt_ms / 1000.0;

        body.velocity.x = target_velocity.x;
        body.velocity.z = target_velocity.z;
        if body.grounded() {
            body.velocity.y = target_velocity.y.max(0.0);
        } else {
            body.velocity.y -= GRAVITY * dt;
        }

        body.position += body.velocity * dt;
        if body.position.y < STANDING_HEIGHT {
            body.position.y = STANDING_HEIGHT;
            body.velocity.y = 0.0;
        }
    }

    fn play_cue(&mut self, user_id: Uuid, cue: Cue) {
        self.publish(Outbound::Cue { user_id, cue });
    }

    fn send_to_client(&mut self, user_id: Uuid, msg: &ServerMsg) -> Result<(), HostError> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string(msg) {
                Ok(json) => debug!(user_id = %user_id, payload = %json, "Client message"),
                Err(e) => debug!(user_id = %user_id, error = %e, "Client message not encodable"),
            }
        }
        self.publish(Outbound::Message {
            user_id,
            msg: msg.clone(),
        });
        Ok(())
    }

    fn move_to_lobby(&mut self, user_id: Uuid) -> Result<(), HostError> {
        self.bodies.remove(&user_id);
        self.publish(Outbound::LobbyTransfer { user_id });
        Ok(())
    }

    fn on_kill_reported(&mut self, report: &KillReport) {
        debug!(
            attacker_id = %report.attacker_id,
            victim_id = %report.victim_id,
            "Kill recorded"
        );
        self.publish(Outbound::Kill {
            report: report.clone(),
        });
    }
}
