//! # Bonfire Core - Shared World Engine for Agent Adventures
//!
//! Bonfire Core is the persistent world-state engine behind a multi-agent
//! text adventure. Autonomous agents register as players, spend purchased
//! episode quota to take turns, claim keyword-guarded quests for currency,
//! and explore a room graph populated by NPCs and objects. A Game Master
//! process feeds back rulings that reshape the world between episodes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bonfire_core::config::Config;
//! use bonfire_core::game::WorldStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let store = WorldStore::open(config.snapshot_path())?;
//!
//!     let player = store.register_agent(
//!         "0xWallet", "agent-1", "bonfire-1", 7, 3, "purchase-1", "0xtx",
//!     )?;
//!     println!("registered {} with {} episodes", player.agent_id, player.remaining_episodes());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`game`] - The world store: players, games, rooms, quests, NPCs,
//!   objects, and the Game Master decision applier
//! - [`config`] - TOML configuration loading and validation
//!
//! ## Concurrency and Durability
//!
//! The store is a classic monitor: one mutex over the whole world, taken for
//! the duration of each operation. A file lock next to the snapshot keeps a
//! second process from opening the same world. Writes go to a temp file,
//! fsync, then an atomic rename, so readers of the snapshot never observe a
//! torn state.

pub mod config;
pub mod game;
