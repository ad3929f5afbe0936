//! Non-repeating spawn point rotation

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Spawn points of the arena map
pub const DEFAULT_SPAWN_POINTS: [[f32; 3]; 12] = [
    [-18.0, 4.0, -18.0],
    [-6.0, 4.0, -20.0],
    [6.0, 4.0, -20.0],
    [18.0, 4.0, -18.0],
    [20.0, 4.0, -6.0],
    [20.0, 4.0, 6.0],
    [18.0, 4.0, 18.0],
    [6.0, 4.0, 20.0],
    [-6.0, 4.0, 20.0],
    [-18.0, 4.0, 18.0],
    [-20.0, 4.0, 6.0],
    [-20.0, 4.0, -6.0],
];

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Spawn point list is empty")]
    NoSpawnPoints,
}

/// Hands out spawn points uniformly at random without repeats until every
/// point has been used once, then starts a new rotation.
#[derive(Debug, Clone)]
pub struct SpawnAllocator {
    points: Vec<Vec3>,
    available: Vec<usize>,
    used: Vec<usize>,
    rng: ChaCha8Rng,
}

impl SpawnAllocator {
    pub fn new(points: Vec<Vec3>, seed: u64) -> Result<Self, SpawnError> {
        if points.is_empty() {
            return Err(SpawnError::NoSpawnPoints);
        }
        Ok(Self {
            available: (0..points.len()).collect(),
            used: Vec::with_capacity(points.len()),
            points,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn with_default_points(seed: u64) -> Self {
        let points = DEFAULT_SPAWN_POINTS
            .iter()
            .map(|p| Vec3::from_array(*p))
            .collect();
        Self {
            available: (0..DEFAULT_SPAWN_POINTS.len()).collect(),
            used: Vec::with_capacity(DEFAULT_SPAWN_POINTS.len()),
            points,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn allocate(&mut self) -> Vec3 {
        if self.available.is_empty() {
            std::mem::swap(&mut self.available, &mut self.used);
        }

        let pick = self.rng.gen_range(0..self.available.len());
        let idx = self.available.swap_remove(pick);
        self.used.push(idx);
        self.points[idx]
    }

    /// Return every point to the available set
    pub fn reset(&mut self) {
        self.available.append(&mut self.used);
        self.available.sort_unstable();
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(p: Vec3) -> [u32; 3] {
        [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]
    }

    #[test]
    fn empty_point_list_is_rejected() {
        assert!(matches!(
            SpawnAllocator::new(Vec::new(), 1),
            Err(SpawnError::NoSpawnPoints)
        ));
    }

    #[test]
    fn full_rotation_has_no_repeats() {
        let mut spawns = SpawnAllocator::with_default_points(42);
        let mut seen = HashSet::new();
        for _ in 0..spawns.len() {
            assert!(seen.insert(key(spawns.allocate())));
            assert_eq!(spawns.available_count() + spawns.used_count(), spawns.len());
        }
        assert_eq!(seen.len(), 12);
        assert_eq!(spawns.available_count(), 0);
    }

    #[test]
    fn refills_after_exhaustion() {
        let mut spawns = SpawnAllocator::with_default_points(7);
        let first_round: HashSet<_> = (0..12).map(|_| key(spawns.allocate())).collect();

        let next = spawns.allocate();
        assert!(first_round.contains(&key(next)));
        assert_eq!(spawns.used_count(), 1);
        assert_eq!(spawns.available_count(), 11);
    }

    #[test]
    fn single_point_pool_never_fails() {
        let point = Vec3::new(1.0, 2.0, 3.0);
        let mut spawns = SpawnAllocator::new(vec![point], 0).expect("one point is enough");
        for _ in 0..5 {
            assert_eq!(spawns.allocate(), point);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SpawnAllocator::with_default_points(99);
        let mut b = SpawnAllocator::with_default_points(99);
        for _ in 0..30 {
            assert_eq!(a.allocate(), b.allocate());
        }
    }

    #[test]
    fn reset_returns_all_points() {
        let mut spawns = SpawnAllocator::with_default_points(3);
        for _ in 0..5 {
            spawns.allocate();
        }
        spawns.reset();
        assert_eq!(spawns.available_count(), 12);
        assert_eq!(spawns.used_count(), 0);
    }
}
