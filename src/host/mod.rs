//! Host implementations the arenas run against

pub mod headless;

pub use headless::{HeadlessHost, Outbound};
