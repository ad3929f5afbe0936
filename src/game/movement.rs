//! Player movement intent and facing helpers

use glam::Vec3;

use super::InputState;

/// Steepest camera pitch, just under vertical
pub const MAX_PITCH: f32 = 1.55;

/// Movement constants for player presences
#[derive(Debug, Clone, Copy)]
pub struct MovementStats {
    pub walk_velocity: f32,
    pub run_velocity: f32,
    pub jump_velocity: f32,
}

impl Default for MovementStats {
    fn default() -> Self {
        Self {
            walk_velocity: 4.0,
            run_velocity: 8.0,
            jump_velocity: 10.0,
        }
    }
}

/// Movement system turning input into target velocities for the host
pub struct MovementSystem;

impl MovementSystem {
    /// Target velocity for one input tick, relative to camera yaw.
    /// Diagonals are clamped to the walk/run speed; `y` carries the jump impulse.
    pub fn target_velocity(input: &InputState, yaw: f32, stats: &MovementStats) -> Vec3 {
        let speed = if input.run {
            stats.run_velocity
        } else {
            stats.walk_velocity
        };
        let (sin, cos) = yaw.sin_cos();
        let mut x = 0.0;
        let mut z = 0.0;

        if input.forward {
            x -= speed * sin;
            z -= speed * cos;
        }
        if input.back {
            x += speed * sin;
            z += speed * cos;
        }
        if input.left {
            x -= speed * cos;
            z += speed * sin;
        }
        if input.right {
            x += speed * cos;
            z -= speed * sin;
        }

        // Normalize diagonal movement
        let length = (x * x + z * z).sqrt();
        if length > speed {
            let factor = speed / length;
            x *= factor;
            z *= factor;
        }

        let y = if input.jump { stats.jump_velocity } else { 0.0 };
        Vec3::new(x, y, z)
    }

    /// Unit facing vector for camera yaw and pitch. Pitch is clamped short of straight up/down.
    pub fn facing_from_angles(yaw: f32, pitch: f32) -> Vec3 {
        let pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
        let (sin_yaw, cos_yaw) = yaw.sin_cos();
        let (sin_pitch, cos_pitch) = pitch.sin_cos();
        Vec3::new(-sin_yaw * cos_pitch, sin_pitch, -cos_yaw * cos_pitch)
    }
}
