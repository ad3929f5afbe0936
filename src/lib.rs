//! Gun Arena Server - authoritative gun-game arena core
//!
//! Weapon progression, hit-scan combat, round lifecycle and spawn allocation.
//! Engine services (physics, presences, client delivery) come in through
//! the [`game::Host`] trait.

pub mod app;
pub mod config;
pub mod game;
pub mod host;
pub mod util;
