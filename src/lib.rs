// Library surface for the typing-test integrity engine.
// Keep this lean: everything here is callable headlessly from tests and
// from the admin binary in main.rs.
pub mod achievements;
pub mod anticheat;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod localtime;
pub mod results;
pub mod session;
pub mod stats_cache;
pub mod users;
pub mod util;

pub use engine::Engine;
pub use error::{EngineError, Result};
