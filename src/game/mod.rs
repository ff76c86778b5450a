//! # World-State Engine
//!
//! Persistent world state for a multi-agent text adventure. One process owns
//! one JSON snapshot; every mutation runs under a single [`WorldStore`] lock,
//! appends to the event feed, and rewrites the snapshot atomically before the
//! lock is released. Crash recovery is therefore trivial: the snapshot on
//! disk is always the result of a completed operation.
//!
//! The store tracks, per bonfire (one shared game world):
//!
//! - registered players with purchased episode quotas and a currency ledger
//! - the active game instance, its room graph, NPCs, and objects
//! - quests with keyword-checked claims, cooldowns, and expiry
//! - the event feed, room chat, and per-agent GM context
//!
//! [`apply_decision`](WorldStore::apply_decision) is the write path for Game
//! Master rulings: episode extensions, room and NPC changes, and object
//! grants parsed from loosely-shaped model output.

pub mod decision;
pub mod errors;
pub mod inventory;
pub mod quest;
pub mod rooms;
pub mod state;
pub mod storage;
pub mod types;

pub use decision::{DecisionSummary, GmDecision};
pub use errors::WorldError;
pub use quest::evaluate_submission;
pub use state::{WorldStore, WorldStoreBuilder};
pub use types::{
    AgentContext, AttemptRecord, BonfireAdmin, BonfireState, ClaimReceipt, EventRecord, GameRecord, GameStatus,
    GameSummary, LedgerEntry, NpcRecord, ObjectKind, ObjectLocation, ObjectRecord, PlayerRecord,
    PlayerStanding, QuestRecord, QuestStatus, RechargeReceipt, RoomMap, RoomMessage, RoomRecord,
    TurnReceipt, UseOutcome, Verdict, WorldNarrative,
};
