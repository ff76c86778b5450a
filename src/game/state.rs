//! The world store: sole owner of all entity maps for every bonfire.
//!
//! The store is a monitor. Every public method takes the process-wide lock
//! for its full duration, and every mutating method finishes, still under the
//! lock, by appending a domain event where significant and rewriting the full
//! snapshot to disk. No operation suspends while holding the lock.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info};
use serde_json::{json, Value};

use crate::game::errors::WorldError;
use crate::game::storage;
use crate::game::types::{
    AgentContext, AttemptRecord, BonfireAdmin, BonfireState, EventRecord, GameRecord, GameStatus,
    GameSummary, LedgerEntry, NpcRecord, ObjectRecord, PlayerRecord, PlayerStanding, QuestRecord,
    RechargeReceipt, RoomMessage, TurnReceipt, WorldNarrative,
};

/// Events kept per bonfire before the ring buffer drops the oldest.
pub const EVENT_HISTORY_LIMIT: usize = 500;
/// Chat messages kept per room.
pub const ROOM_CHAT_LIMIT: usize = 200;
/// Episode ids kept on an agent's rolling context.
pub const RECENT_EPISODE_LIMIT: usize = 20;

pub const STARTING_ROOM_NAME: &str = "The Hearth";
pub const STARTING_ROOM_DESCRIPTION: &str =
    "A warm gathering place where all adventurers begin their journey.";

/// Everything the store owns, for all bonfires. Guarded by the store mutex;
/// nothing outside the store ever holds a reference into these maps.
#[derive(Debug, Default)]
pub(crate) struct WorldState {
    pub(crate) players_by_agent: HashMap<String, PlayerRecord>,
    pub(crate) game_admin_by_bonfire: HashMap<String, BonfireAdmin>,
    pub(crate) games_by_bonfire: HashMap<String, GameRecord>,
    pub(crate) quests_by_bonfire: HashMap<String, HashMap<String, QuestRecord>>,
    pub(crate) attempts: Vec<AttemptRecord>,
    pub(crate) claimed_by_quest: HashMap<String, BTreeSet<String>>,
    pub(crate) last_claim_at: HashMap<String, DateTime<Utc>>,
    pub(crate) events_by_bonfire: HashMap<String, Vec<EventRecord>>,
    pub(crate) ledger_by_agent: HashMap<String, Vec<LedgerEntry>>,
    pub(crate) agent_context_by_agent: HashMap<String, AgentContext>,
    pub(crate) room_chat_by_room: HashMap<String, Vec<RoomMessage>>,
    pub(crate) npcs_by_game: HashMap<String, HashMap<String, NpcRecord>>,
    pub(crate) objects_by_game: HashMap<String, HashMap<String, ObjectRecord>>,
}

impl WorldState {
    pub(crate) fn push_event(&mut self, bonfire_id: &str, event_type: &str, payload: Value) {
        let events = self.events_by_bonfire.entry(bonfire_id.to_string()).or_default();
        events.push(EventRecord::new(event_type, payload));
        if events.len() > EVENT_HISTORY_LIMIT {
            let excess = events.len() - EVENT_HISTORY_LIMIT;
            events.drain(..excess);
        }
    }
}

/// Cooldown map key for one (quest, agent) pair.
pub(crate) fn claim_key(quest_id: &str, agent_id: &str) -> String {
    format!("{}:{}", quest_id, agent_id)
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct WorldStoreBuilder {
    path: PathBuf,
    seed_starting_rooms: bool,
}

impl WorldStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seed_starting_rooms: true,
        }
    }

    /// Opt out of the starting-room migration during load (useful for targeted tests).
    pub fn without_room_migration(mut self) -> Self {
        self.seed_starting_rooms = false;
        self
    }

    pub fn open(self) -> Result<WorldStore, WorldError> {
        WorldStore::open_with_options(self.path, self.seed_starting_rooms)
    }
}

/// Shared, persistent world-state store. One lock serializes every operation;
/// the on-disk snapshot is atomically replaced after each mutation.
#[derive(Debug)]
pub struct WorldStore {
    inner: Mutex<WorldState>,
    storage_path: PathBuf,
    // Held for the store's lifetime; enforces single-process snapshot ownership.
    _lock_file: File,
}

impl WorldStore {
    /// Open (or create) the store persisting to `path`. Existing snapshots are
    /// loaded defensively and migrated so every active game has a starting room.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        Self::open_with_options(path.as_ref().to_path_buf(), true)
    }

    fn open_with_options(path: PathBuf, seed_starting_rooms: bool) -> Result<Self, WorldError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let lock_path = lock_file_path(&path);
        let lock_file = OpenOptions::new().create(true).write(true).open(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|_| {
            WorldError::Conflict(format!(
                "snapshot {} is owned by another process",
                path.display()
            ))
        })?;

        let mut world = storage::load_snapshot(&path)?.unwrap_or_default();
        let migrated = seed_starting_rooms && storage::seed_starting_rooms(&mut world);
        let store = Self {
            inner: Mutex::new(world),
            storage_path: path,
            _lock_file: lock_file,
        };
        if migrated {
            let world = store.world();
            store.persist(&world)?;
        }
        Ok(store)
    }

    pub(crate) fn world(&self) -> MutexGuard<'_, WorldState> {
        // A poisoned lock means a panic mid-operation; the maps themselves are
        // still structurally sound because persist runs before unlock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn persist(&self, world: &WorldState) -> Result<(), WorldError> {
        storage::save_snapshot(&self.storage_path, world)
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    // ── Registration & billing ──

    /// Register an agent. Idempotent per agent_id: re-registering with the
    /// same wallet returns the existing record; a different wallet is a
    /// conflict. Players are never deleted.
    pub fn register_agent(
        &self,
        wallet: &str,
        agent_id: &str,
        bonfire_id: &str,
        erc8004_bonfire_id: i64,
        episodes_purchased: i64,
        purchase_id: &str,
        purchase_tx_hash: &str,
    ) -> Result<PlayerRecord, WorldError> {
        let mut world = self.world();
        let wallet_normalized = wallet.to_ascii_lowercase();

        if let Some(existing) = world.players_by_agent.get(agent_id) {
            if existing.wallet != wallet_normalized {
                return Err(WorldError::Conflict(
                    "agent_id already belongs to a different wallet".to_string(),
                ));
            }
            return Ok(existing.clone());
        }

        if !purchase_id.is_empty() {
            if let Some(existing) = world
                .players_by_agent
                .values()
                .find(|p| p.purchase_id == purchase_id)
            {
                if existing.agent_id != agent_id || existing.wallet != wallet_normalized {
                    return Err(WorldError::Conflict(
                        "purchase_id already belongs to a different wallet or agent".to_string(),
                    ));
                }
                return Ok(existing.clone());
            }
        }

        if episodes_purchased <= 0 {
            return Err(WorldError::InvalidArgument(
                "episodes_purchased must be positive".to_string(),
            ));
        }

        let mut player = PlayerRecord::new(wallet, agent_id, bonfire_id, episodes_purchased as u32);
        player.erc8004_bonfire_id = erc8004_bonfire_id;
        player.purchase_id = purchase_id.to_string();
        player.purchase_tx_hash = purchase_tx_hash.to_string();
        let receipt = player.clone();
        world.players_by_agent.insert(agent_id.to_string(), player);
        world.ledger_by_agent.entry(agent_id.to_string()).or_default();
        world.push_event(
            bonfire_id,
            "player_registered",
            json!({
                "wallet": receipt.wallet,
                "agent_id": receipt.agent_id,
                "base_quota": receipt.base_quota,
            }),
        );
        info!("registered agent {} for bonfire {}", agent_id, bonfire_id);
        self.persist(&world)?;
        Ok(receipt)
    }

    /// Register an agent from a completed purchase. Idempotent per purchase_id.
    pub fn register_purchase(
        &self,
        wallet: &str,
        agent_id: &str,
        bonfire_id: &str,
        erc8004_bonfire_id: i64,
        purchase_id: &str,
        purchase_tx_hash: &str,
        episodes_purchased: i64,
    ) -> Result<PlayerRecord, WorldError> {
        self.register_agent(
            wallet,
            agent_id,
            bonfire_id,
            erc8004_bonfire_id,
            episodes_purchased,
            purchase_id,
            purchase_tx_hash,
        )
    }

    /// Look up all players for a wallet, optionally filtered by purchase tx.
    pub fn restore_players(
        &self,
        wallet: &str,
        purchase_tx_hash: Option<&str>,
    ) -> Vec<PlayerRecord> {
        let world = self.world();
        let wallet_normalized = wallet.to_ascii_lowercase();
        let mut restored: Vec<PlayerRecord> = world
            .players_by_agent
            .values()
            .filter(|p| p.wallet == wallet_normalized)
            .filter(|p| purchase_tx_hash.map_or(true, |tx| p.purchase_tx_hash == tx))
            .cloned()
            .collect();
        restored.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        restored
    }

    // ── Bonfire admin ──

    pub fn link_bonfire(
        &self,
        bonfire_id: &str,
        erc8004_bonfire_id: i64,
        owner_wallet: &str,
    ) -> Result<BonfireAdmin, WorldError> {
        let mut world = self.world();
        let admin = BonfireAdmin {
            bonfire_id: bonfire_id.to_string(),
            erc8004_bonfire_id,
            owner_wallet: owner_wallet.to_ascii_lowercase(),
            last_verified_at: Utc::now(),
        };
        world
            .game_admin_by_bonfire
            .insert(bonfire_id.to_string(), admin.clone());
        world.push_event(
            bonfire_id,
            "bonfire_linked",
            json!({
                "erc8004_bonfire_id": erc8004_bonfire_id,
                "owner_wallet": admin.owner_wallet,
            }),
        );
        self.persist(&world)?;
        Ok(admin)
    }

    pub fn owner_wallet_of(&self, bonfire_id: &str) -> Option<String> {
        let world = self.world();
        world
            .game_admin_by_bonfire
            .get(bonfire_id)
            .map(|admin| admin.owner_wallet.clone())
    }

    /// The agent that speaks for the GM: the game's configured gm_agent_id,
    /// falling back to the first agent registered under the owner's wallet.
    pub fn owner_agent_id(&self, bonfire_id: &str) -> Option<String> {
        let world = self.world();
        if let Some(game) = world.games_by_bonfire.get(bonfire_id) {
            if let Some(gm) = &game.gm_agent_id {
                if !gm.is_empty() {
                    return Some(gm.clone());
                }
            }
        }
        let owner = world
            .game_admin_by_bonfire
            .get(bonfire_id)
            .map(|admin| admin.owner_wallet.clone())?;
        let mut owned: Vec<&PlayerRecord> = world
            .players_by_agent
            .values()
            .filter(|p| p.wallet == owner)
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        owned.first().map(|p| p.agent_id.clone())
    }

    // ── Games ──

    /// Create the active game for a bonfire. Any previously active game is
    /// archived first; archival is a state transition, never a delete.
    pub fn create_or_replace_game(
        &self,
        bonfire_id: &str,
        owner_wallet: &str,
        game_prompt: &str,
        gm_agent_id: Option<&str>,
        initial_episode_summary: &str,
    ) -> Result<GameRecord, WorldError> {
        let mut world = self.world();
        let mut archived_event = None;
        if let Some(existing) = world.games_by_bonfire.get_mut(bonfire_id) {
            if existing.status == GameStatus::Active {
                let now = Utc::now();
                existing.status = GameStatus::Archived;
                existing.archived_at = Some(now);
                existing.updated_at = now;
                archived_event = Some(existing.game_id.clone());
            }
        }
        if let Some(game_id) = archived_event {
            info!("archiving game {} for bonfire {}", game_id, bonfire_id);
            world.push_event(
                bonfire_id,
                "game_archived",
                json!({ "game_id": game_id, "reason": "replaced_by_new_game" }),
            );
        }

        let mut game = GameRecord::new(bonfire_id, owner_wallet, game_prompt);
        game.gm_agent_id = gm_agent_id.map(|s| s.to_string());
        game.initial_episode_summary = initial_episode_summary.trim().to_string();
        let receipt = game.clone();
        world.games_by_bonfire.insert(bonfire_id.to_string(), game);
        world.push_event(
            bonfire_id,
            "game_created",
            json!({ "game_id": receipt.game_id, "owner_wallet": receipt.owner_wallet }),
        );
        self.persist(&world)?;
        Ok(receipt)
    }

    pub fn get_game(&self, bonfire_id: &str) -> Option<GameRecord> {
        self.world().games_by_bonfire.get(bonfire_id).cloned()
    }

    /// Active games, newest first.
    pub fn list_active_games(&self) -> Vec<GameSummary> {
        let world = self.world();
        let mut summaries: Vec<GameSummary> = world
            .games_by_bonfire
            .values()
            .filter(|g| g.status == GameStatus::Active)
            .map(|g| GameSummary {
                game_id: g.game_id.clone(),
                bonfire_id: g.bonfire_id.clone(),
                owner_wallet: g.owner_wallet.clone(),
                game_prompt: g.game_prompt.clone(),
                gm_agent_id: g.gm_agent_id.clone(),
                initial_episode_summary: g.initial_episode_summary.clone(),
                created_at: g.created_at,
                updated_at: g.updated_at,
                active_agent_count: world
                    .players_by_agent
                    .values()
                    .filter(|p| p.bonfire_id == g.bonfire_id)
                    .count(),
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Fold an episode's narrative outcome into the game record. Returns None
    /// when the bonfire has no game; empty fields leave the previous text.
    pub fn update_game_world_state(
        &self,
        bonfire_id: &str,
        episode_id: &str,
        world_state_summary: &str,
        gm_reaction: &str,
    ) -> Result<Option<WorldNarrative>, WorldError> {
        let mut world = self.world();
        let (narrative, game_id) = {
            let Some(game) = world.games_by_bonfire.get_mut(bonfire_id) else {
                return Ok(None);
            };
            if !world_state_summary.trim().is_empty() {
                game.world_state_summary = world_state_summary.trim().to_string();
            }
            if !gm_reaction.trim().is_empty() {
                game.last_gm_reaction = gm_reaction.trim().to_string();
            }
            game.last_episode_id = episode_id.trim().to_string();
            game.updated_at = Utc::now();
            (
                WorldNarrative {
                    world_state_summary: game.world_state_summary.clone(),
                    last_gm_reaction: game.last_gm_reaction.clone(),
                    last_episode_id: game.last_episode_id.clone(),
                },
                game.game_id.clone(),
            )
        };
        world.push_event(
            bonfire_id,
            "world_state_updated",
            json!({
                "game_id": game_id,
                "episode_id": episode_id,
                "world_state_summary": narrative.world_state_summary,
            }),
        );
        self.persist(&world)?;
        Ok(Some(narrative))
    }

    // ── Turns & quota ──

    /// Consume one episode of quota. Exhausted quota deactivates the player
    /// and fails with PermissionDenied("episode_quota_exhausted").
    pub fn run_turn(&self, agent_id: &str, action: &str) -> Result<TurnReceipt, WorldError> {
        let mut world = self.world();
        let Some(player) = world.players_by_agent.get_mut(agent_id) else {
            return Err(WorldError::NotFound("agent is not registered in game".to_string()));
        };
        if player.remaining_episodes() == 0 {
            player.is_active = false;
            self.persist(&world)?;
            return Err(WorldError::PermissionDenied("episode_quota_exhausted".to_string()));
        }

        player.turns_used += 1;
        if player.remaining_episodes() == 0 {
            player.is_active = false;
        }
        let receipt = TurnReceipt {
            agent_id: player.agent_id.clone(),
            remaining_episodes: player.remaining_episodes(),
            turns_used: player.turns_used,
            is_active: player.is_active,
        };
        let bonfire_id = player.bonfire_id.clone();
        world.push_event(
            &bonfire_id,
            "turn_processed",
            json!({
                "agent_id": agent_id,
                "action": action.trim(),
                "turns_used": receipt.turns_used,
                "remaining_episodes": receipt.remaining_episodes,
            }),
        );
        self.persist(&world)?;
        Ok(receipt)
    }

    /// Add bonus quota to an agent and log a ledger credit. Reactivates the
    /// player when the recharge makes episodes available again.
    pub fn recharge_agent(
        &self,
        bonfire_id: &str,
        agent_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<RechargeReceipt, WorldError> {
        if amount < 1 {
            return Err(WorldError::InvalidArgument("amount must be >= 1".to_string()));
        }
        let mut world = self.world();
        let Some(player) = world.players_by_agent.get_mut(agent_id) else {
            return Err(WorldError::NotFound(
                "agent is not registered to this bonfire".to_string(),
            ));
        };
        if player.bonfire_id != bonfire_id {
            return Err(WorldError::NotFound(
                "agent is not registered to this bonfire".to_string(),
            ));
        }

        player.bonus_quota += amount as u32;
        if player.remaining_episodes() > 0 {
            player.is_active = true;
        }
        let receipt = RechargeReceipt {
            agent_id: player.agent_id.clone(),
            remaining_episodes: player.remaining_episodes(),
            total_quota: player.total_quota(),
            is_active: player.is_active,
        };
        world
            .ledger_by_agent
            .entry(agent_id.to_string())
            .or_default()
            .push(LedgerEntry::credit(reason, amount as u32));
        world.push_event(
            bonfire_id,
            "agent_recharged",
            json!({ "agent_id": agent_id, "amount": amount, "reason": reason }),
        );
        self.persist(&world)?;
        Ok(receipt)
    }

    // ── Reads ──

    pub fn get_player(&self, agent_id: &str) -> Option<PlayerRecord> {
        self.world().players_by_agent.get(agent_id).cloned()
    }

    pub fn all_agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.world().players_by_agent.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn ledger_for(&self, agent_id: &str) -> Vec<LedgerEntry> {
        self.world()
            .ledger_by_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn attempts_for_quest(&self, quest_id: &str) -> Vec<AttemptRecord> {
        self.world()
            .attempts
            .iter()
            .filter(|a| a.quest_id == quest_id)
            .cloned()
            .collect()
    }

    /// GM-facing rollup of one bonfire: player standings, quests, contexts.
    pub fn bonfire_state(&self, bonfire_id: &str) -> BonfireState {
        let world = self.world();
        let players: Vec<&PlayerRecord> = world
            .players_by_agent
            .values()
            .filter(|p| p.bonfire_id == bonfire_id)
            .collect();
        let standings = players
            .iter()
            .map(|p| PlayerStanding {
                wallet: p.wallet.clone(),
                agent_id: p.agent_id.clone(),
                remaining_episodes: p.remaining_episodes(),
                turns_used: p.turns_used,
                total_quota: p.total_quota(),
                is_active: p.is_active,
            })
            .collect();
        let quests = world
            .quests_by_bonfire
            .get(bonfire_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        let agent_context = players
            .iter()
            .filter_map(|p| world.agent_context_by_agent.get(&p.agent_id).cloned())
            .collect();
        BonfireState {
            bonfire_id: bonfire_id.to_string(),
            players: standings,
            quests,
            agent_context,
        }
    }

    /// Most recent events for a bonfire, oldest first, up to `limit`.
    pub fn recent_events(&self, bonfire_id: &str, limit: usize) -> Vec<EventRecord> {
        let world = self.world();
        let events = match world.events_by_bonfire.get(bonfire_id) {
            Some(events) => events,
            None => return Vec::new(),
        };
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }

    // ── Room chat ──

    pub fn append_room_message(
        &self,
        room_id: &str,
        sender_agent_id: &str,
        sender_wallet: &str,
        role: &str,
        text: &str,
    ) -> Result<RoomMessage, WorldError> {
        let mut world = self.world();
        let entry = RoomMessage {
            room_id: room_id.to_string(),
            sender_agent_id: sender_agent_id.to_string(),
            sender_wallet: sender_wallet.to_string(),
            role: role.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        let messages = world.room_chat_by_room.entry(room_id.to_string()).or_default();
        messages.push(entry.clone());
        if messages.len() > ROOM_CHAT_LIMIT {
            let excess = messages.len() - ROOM_CHAT_LIMIT;
            messages.drain(..excess);
        }
        self.persist(&world)?;
        Ok(entry)
    }

    pub fn room_messages(&self, room_id: &str, limit: usize) -> Vec<RoomMessage> {
        let world = self.world();
        let messages = match world.room_chat_by_room.get(room_id) {
            Some(messages) => messages,
            None => return Vec::new(),
        };
        let start = messages.len().saturating_sub(limit);
        messages[start..].to_vec()
    }

    // ── Agent context ──

    pub fn agent_context(&self, agent_id: &str) -> Option<AgentContext> {
        self.world().agent_context_by_agent.get(agent_id).cloned()
    }

    /// Fold a processed episode into the agent's rolling GM context.
    pub fn update_agent_context_from_episode(
        &self,
        agent_id: &str,
        episode_id: &str,
        episode_summary: &str,
    ) -> Result<AgentContext, WorldError> {
        let mut world = self.world();
        let bonfire_id = match world.players_by_agent.get(agent_id) {
            Some(player) => player.bonfire_id.clone(),
            None => {
                return Err(WorldError::NotFound(
                    "agent is not registered in game".to_string(),
                ))
            }
        };
        let context = world
            .agent_context_by_agent
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentContext::new(agent_id, &bonfire_id));
        context.recent_episode_ids.push(episode_id.to_string());
        if context.recent_episode_ids.len() > RECENT_EPISODE_LIMIT {
            let excess = context.recent_episode_ids.len() - RECENT_EPISODE_LIMIT;
            context.recent_episode_ids.drain(..excess);
        }
        context.episode_count += 1;
        context.last_episode_id = episode_id.to_string();
        context.last_episode_summary = episode_summary.to_string();
        context.updated_at = Utc::now();
        let receipt = context.clone();
        world.push_event(
            &bonfire_id,
            "game_master_context_updated",
            json!({ "agent_id": agent_id, "episode_id": episode_id }),
        );
        self.persist(&world)?;
        Ok(receipt)
    }

    /// Record the GM's reaction to an episode on the agent's context.
    pub fn record_gm_response(
        &self,
        agent_id: &str,
        episode_id: &str,
        gm_reaction: &str,
        world_state_update: &str,
    ) -> Result<AgentContext, WorldError> {
        let mut world = self.world();
        let bonfire_id = match world.players_by_agent.get(agent_id) {
            Some(player) => player.bonfire_id.clone(),
            None => {
                return Err(WorldError::NotFound(
                    "agent is not registered in game".to_string(),
                ))
            }
        };
        let now = Utc::now();
        let context = world
            .agent_context_by_agent
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentContext::new(agent_id, &bonfire_id));
        context.gm_last_reaction = gm_reaction.trim().to_string();
        context.gm_world_state_update = world_state_update.trim().to_string();
        context.gm_last_episode_id = episode_id.trim().to_string();
        context.gm_updated_at = Some(now);
        context.updated_at = now;
        let receipt = context.clone();
        world.push_event(
            &bonfire_id,
            "gm_response_recorded",
            json!({ "agent_id": agent_id, "episode_id": episode_id }),
        );
        debug!("recorded gm response for agent {}", agent_id);
        self.persist(&world)?;
        Ok(receipt)
    }
}

fn lock_file_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "world".to_string());
    path.with_file_name(format!("{}.lock", file_name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn setup_test_store() -> (TempDir, WorldStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = WorldStoreBuilder::new(dir.path().join("world.json"))
            .open()
            .expect("store");
        (dir, store)
    }

    pub(crate) fn register_test_agent(store: &WorldStore, agent_id: &str, episodes: i64) {
        store
            .register_agent("0xABCD", agent_id, "bonfire-1", 7, episodes, "", "")
            .expect("register");
    }

    #[test]
    fn registration_is_idempotent_per_agent_id() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 3);
        let again = store
            .register_agent("0xabcd", "agent-1", "bonfire-1", 7, 99, "", "")
            .expect("re-register");
        assert_eq!(again.base_quota, 3, "existing record returned unchanged");
    }

    #[test]
    fn registration_rejects_wallet_mismatch() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 3);
        let err = store
            .register_agent("0xother", "agent-1", "bonfire-1", 7, 3, "", "")
            .unwrap_err();
        assert!(matches!(err, WorldError::Conflict(_)));
    }

    #[test]
    fn registration_rejects_nonpositive_quota() {
        let (_dir, store) = setup_test_store();
        let err = store
            .register_agent("0xabcd", "agent-1", "bonfire-1", 7, 0, "", "")
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(_)));
    }

    #[test]
    fn purchase_registration_is_idempotent_per_purchase_id() {
        let (_dir, store) = setup_test_store();
        store
            .register_purchase("0xabcd", "agent-1", "bonfire-1", 7, "purchase-1", "0xtx", 5)
            .expect("first");
        let again = store
            .register_purchase("0xabcd", "agent-1", "bonfire-1", 7, "purchase-1", "0xtx", 5)
            .expect("second");
        assert_eq!(again.agent_id, "agent-1");
        let err = store
            .register_purchase("0xabcd", "agent-2", "bonfire-1", 7, "purchase-1", "0xtx", 5)
            .unwrap_err();
        assert!(matches!(err, WorldError::Conflict(_)));
    }

    #[test]
    fn quota_exhaustion_then_recharge_reactivates() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);

        store.run_turn("agent-1", "look around").expect("turn 1");
        let receipt = store.run_turn("agent-1", "walk north").expect("turn 2");
        assert_eq!(receipt.remaining_episodes, 0);
        assert!(!receipt.is_active, "deactivated when remaining hits zero");

        let err = store.run_turn("agent-1", "one more").unwrap_err();
        assert!(matches!(err, WorldError::PermissionDenied(ref m) if m == "episode_quota_exhausted"));

        let recharge = store
            .recharge_agent("bonfire-1", "agent-1", 3, "top_up")
            .expect("recharge");
        assert_eq!(recharge.remaining_episodes, 3);
        assert!(recharge.is_active);

        let ledger = store.ledger_for("agent-1");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].amount, 3);
    }

    #[test]
    fn recharge_validates_amount_and_membership() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);
        assert!(matches!(
            store.recharge_agent("bonfire-1", "agent-1", 0, "x").unwrap_err(),
            WorldError::InvalidArgument(_)
        ));
        assert!(matches!(
            store.recharge_agent("other-bonfire", "agent-1", 1, "x").unwrap_err(),
            WorldError::NotFound(_)
        ));
    }

    #[test]
    fn replacing_a_game_archives_the_previous_one() {
        let (_dir, store) = setup_test_store();
        let first = store
            .create_or_replace_game("bonfire-1", "0xOwner", "a fiery realm", None, "")
            .expect("first game");
        let second = store
            .create_or_replace_game("bonfire-1", "0xOwner", "a frozen realm", Some("gm-1"), "")
            .expect("second game");
        assert_ne!(first.game_id, second.game_id);

        let active = store.get_game("bonfire-1").expect("game");
        assert_eq!(active.game_id, second.game_id);
        assert_eq!(active.status, GameStatus::Active);
        assert_eq!(active.gm_agent_id.as_deref(), Some("gm-1"));

        let summaries = store.list_active_games();
        assert_eq!(summaries.len(), 1, "only one active game per bonfire");

        let events = store.recent_events("bonfire-1", 10);
        assert!(events.iter().any(|e| e.event_type == "game_archived"));
    }

    #[test]
    fn world_state_update_skips_empty_fields() {
        let (_dir, store) = setup_test_store();
        store
            .create_or_replace_game("bonfire-1", "0xowner", "prompt", None, "")
            .expect("game");
        store
            .update_game_world_state("bonfire-1", "ep-1", "the gates opened", "well done")
            .expect("update")
            .expect("narrative");
        let narrative = store
            .update_game_world_state("bonfire-1", "ep-2", "", "")
            .expect("update")
            .expect("narrative");
        assert_eq!(narrative.world_state_summary, "the gates opened");
        assert_eq!(narrative.last_gm_reaction, "well done");
        assert_eq!(narrative.last_episode_id, "ep-2");

        assert!(store
            .update_game_world_state("unknown", "ep", "x", "y")
            .expect("no game")
            .is_none());
    }

    #[test]
    fn event_ring_buffer_is_capped() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 1);
        {
            let mut world = store.world();
            for i in 0..(EVENT_HISTORY_LIMIT + 25) {
                world.push_event("bonfire-1", "turn_processed", json!({ "i": i }));
            }
        }
        let events = store.recent_events("bonfire-1", EVENT_HISTORY_LIMIT * 2);
        assert_eq!(events.len(), EVENT_HISTORY_LIMIT);
    }

    #[test]
    fn room_chat_is_capped_and_tail_ordered() {
        let (_dir, store) = setup_test_store();
        for i in 0..(ROOM_CHAT_LIMIT + 10) {
            store
                .append_room_message("room-1", "agent-1", "0xabcd", "player", &format!("msg {}", i))
                .expect("append");
        }
        let all = store.room_messages("room-1", ROOM_CHAT_LIMIT * 2);
        assert_eq!(all.len(), ROOM_CHAT_LIMIT);
        let last = store.room_messages("room-1", 5);
        assert_eq!(last.len(), 5);
        assert_eq!(last[4].text, format!("msg {}", ROOM_CHAT_LIMIT + 9));
    }

    #[test]
    fn agent_context_caps_recent_episode_ids() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 5);
        for i in 0..(RECENT_EPISODE_LIMIT + 5) {
            store
                .update_agent_context_from_episode("agent-1", &format!("ep-{}", i), "summary")
                .expect("context");
        }
        let context = store.agent_context("agent-1").expect("context");
        assert_eq!(context.episode_count, (RECENT_EPISODE_LIMIT + 5) as u32);
        assert_eq!(context.recent_episode_ids.len(), RECENT_EPISODE_LIMIT);
        assert_eq!(
            context.recent_episode_ids.last().map(String::as_str),
            Some(format!("ep-{}", RECENT_EPISODE_LIMIT + 4).as_str())
        );
    }

    #[test]
    fn gm_response_lands_on_agent_context() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 5);
        let context = store
            .record_gm_response("agent-1", "ep-1", "  the GM nods  ", "fog rolls in")
            .expect("gm response");
        assert_eq!(context.gm_last_reaction, "the GM nods");
        assert_eq!(context.gm_world_state_update, "fog rolls in");
        assert!(context.gm_updated_at.is_some());
    }

    #[test]
    fn owner_agent_id_prefers_gm_agent_then_owner_wallet() {
        let (_dir, store) = setup_test_store();
        store.link_bonfire("bonfire-1", 7, "0xOwner").expect("link");
        register_test_agent(&store, "agent-1", 2);
        assert_eq!(store.owner_agent_id("bonfire-1"), None, "wallet differs");

        store
            .register_agent("0xowner", "owner-agent", "bonfire-1", 7, 2, "", "")
            .expect("owner agent");
        assert_eq!(store.owner_agent_id("bonfire-1").as_deref(), Some("owner-agent"));

        store
            .create_or_replace_game("bonfire-1", "0xowner", "prompt", Some("gm-agent"), "")
            .expect("game");
        assert_eq!(store.owner_agent_id("bonfire-1").as_deref(), Some("gm-agent"));
    }

    #[test]
    fn second_store_on_same_snapshot_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("world.json");
        let _store = WorldStoreBuilder::new(&path).open().expect("first");
        let err = WorldStoreBuilder::new(&path).open().unwrap_err();
        assert!(matches!(err, WorldError::Conflict(_)));
    }
}
