//! Snapshot persistence: one JSON document, atomically replaced on every
//! mutation, loaded defensively so a corrupt section drops entries instead of
//! failing the whole store.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::game::errors::WorldError;
use crate::game::state::{WorldState, ROOM_CHAT_LIMIT, STARTING_ROOM_DESCRIPTION, STARTING_ROOM_NAME};
use crate::game::types::{
    AgentContext, AttemptRecord, BonfireAdmin, EventRecord, GameRecord, GameStatus, LedgerEntry,
    NpcRecord, ObjectRecord, PlayerRecord, QuestRecord, RoomMessage, RoomRecord,
};

fn snapshot_value(world: &WorldState) -> Result<Value, WorldError> {
    let mut players: Vec<&PlayerRecord> = world.players_by_agent.values().collect();
    players.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    let mut games: Vec<&GameRecord> = world.games_by_bonfire.values().collect();
    games.sort_by(|a, b| a.bonfire_id.cmp(&b.bonfire_id));

    let room_chat: HashMap<&String, &[RoomMessage]> = world
        .room_chat_by_room
        .iter()
        .map(|(room_id, messages)| {
            let start = messages.len().saturating_sub(ROOM_CHAT_LIMIT);
            (room_id, &messages[start..])
        })
        .collect();

    Ok(json!({
        "players": players,
        "game_admin_by_bonfire": world.game_admin_by_bonfire,
        "games": games,
        "quests_by_bonfire": world.quests_by_bonfire,
        "attempts": world.attempts,
        "claimed_by_quest": world.claimed_by_quest,
        "last_claim_at": world.last_claim_at,
        "events_by_bonfire": world.events_by_bonfire,
        "ledger_by_agent": world.ledger_by_agent,
        "agent_context_by_agent": world.agent_context_by_agent,
        "room_chat_by_room": room_chat,
        "npcs_by_game": world.npcs_by_game,
        "objects_by_game": world.objects_by_game,
    }))
}

/// Write the full snapshot: temp file, fsync, then atomic rename so a crash
/// never leaves a half-written document and readers never see a torn file.
pub(crate) fn save_snapshot(path: &Path, world: &WorldState) -> Result<(), WorldError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let document = serde_json::to_string_pretty(&snapshot_value(world)?)?;
    let temp_path = path.with_extension("json.tmp");
    {
        use std::io::Write;
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(document.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn parse_entry<T: DeserializeOwned>(section: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!("snapshot load: dropping malformed {} entry: {}", section, err);
            None
        }
    }
}

fn object_entries(payload: &Map<String, Value>, key: &str) -> Vec<(String, Value)> {
    match payload.get(key) {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn array_entries(payload: &Map<String, Value>, key: &str) -> Vec<Value> {
    match payload.get(key) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Load a snapshot if one exists. An unreadable file yields `None` (fresh
/// world) rather than an error; individual malformed entries are dropped.
pub(crate) fn load_snapshot(path: &Path) -> Result<Option<WorldState>, WorldError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("snapshot load: unreadable file {}: {}", path.display(), err);
            return Ok(None);
        }
    };
    let payload: Value = match serde_json::from_str(&text) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("snapshot load: invalid json in {}: {}", path.display(), err);
            return Ok(None);
        }
    };
    let Value::Object(payload) = payload else {
        warn!("snapshot load: top level is not an object, starting fresh");
        return Ok(None);
    };

    let mut world = WorldState::default();

    for entry in array_entries(&payload, "players") {
        if let Some(player) = parse_entry::<PlayerRecord>("players", entry) {
            world.ledger_by_agent.entry(player.agent_id.clone()).or_default();
            world.players_by_agent.insert(player.agent_id.clone(), player);
        }
    }

    for (bonfire_id, entry) in object_entries(&payload, "game_admin_by_bonfire") {
        if let Some(admin) = parse_entry::<BonfireAdmin>("game_admin_by_bonfire", entry) {
            world.game_admin_by_bonfire.insert(bonfire_id, admin);
        }
    }

    for entry in array_entries(&payload, "games") {
        if let Some(game) = parse_entry::<GameRecord>("games", entry) {
            world.games_by_bonfire.insert(game.bonfire_id.clone(), game);
        }
    }

    for (bonfire_id, quest_map) in object_entries(&payload, "quests_by_bonfire") {
        let Value::Object(quest_map) = quest_map else { continue };
        let quests = world.quests_by_bonfire.entry(bonfire_id).or_default();
        for (quest_id, entry) in quest_map {
            if let Some(quest) = parse_entry::<QuestRecord>("quests_by_bonfire", entry) {
                quests.insert(quest_id, quest);
            }
        }
    }

    for entry in array_entries(&payload, "attempts") {
        if let Some(attempt) = parse_entry::<AttemptRecord>("attempts", entry) {
            world.attempts.push(attempt);
        }
    }

    for (quest_id, entry) in object_entries(&payload, "claimed_by_quest") {
        if let Some(agents) = parse_entry::<BTreeSet<String>>("claimed_by_quest", entry) {
            world.claimed_by_quest.insert(quest_id, agents);
        }
    }

    for (key, entry) in object_entries(&payload, "last_claim_at") {
        if let Some(at) = parse_entry::<DateTime<Utc>>("last_claim_at", entry) {
            world.last_claim_at.insert(key, at);
        }
    }

    for (bonfire_id, entry) in object_entries(&payload, "events_by_bonfire") {
        let Value::Array(items) = entry else { continue };
        let events = world.events_by_bonfire.entry(bonfire_id).or_default();
        for item in items {
            if let Some(event) = parse_entry::<EventRecord>("events_by_bonfire", item) {
                events.push(event);
            }
        }
    }

    for (agent_id, entry) in object_entries(&payload, "ledger_by_agent") {
        let Value::Array(items) = entry else { continue };
        let ledger = world.ledger_by_agent.entry(agent_id).or_default();
        for item in items {
            if let Some(ledger_entry) = parse_entry::<LedgerEntry>("ledger_by_agent", item) {
                ledger.push(ledger_entry);
            }
        }
    }

    for (agent_id, entry) in object_entries(&payload, "agent_context_by_agent") {
        if let Some(context) = parse_entry::<AgentContext>("agent_context_by_agent", entry) {
            world.agent_context_by_agent.insert(agent_id, context);
        }
    }

    for (room_id, entry) in object_entries(&payload, "room_chat_by_room") {
        let Value::Array(items) = entry else { continue };
        let messages = world.room_chat_by_room.entry(room_id).or_default();
        for item in items {
            if let Some(message) = parse_entry::<RoomMessage>("room_chat_by_room", item) {
                messages.push(message);
            }
        }
    }

    for (bonfire_id, npc_map) in object_entries(&payload, "npcs_by_game") {
        let Value::Object(npc_map) = npc_map else { continue };
        let npcs = world.npcs_by_game.entry(bonfire_id).or_default();
        for (npc_id, entry) in npc_map {
            if let Some(npc) = parse_entry::<NpcRecord>("npcs_by_game", entry) {
                npcs.insert(npc_id, npc);
            }
        }
    }

    for (bonfire_id, object_map) in object_entries(&payload, "objects_by_game") {
        let Value::Object(object_map) = object_map else { continue };
        let objects = world.objects_by_game.entry(bonfire_id).or_default();
        for (object_id, entry) in object_map {
            if let Some(object) = parse_entry::<ObjectRecord>("objects_by_game", entry) {
                objects.insert(object_id, object);
            }
        }
    }

    Ok(Some(world))
}

/// Migration: seed a starting room for any active game that has none, then
/// place roomless players into their game's first room. Returns true when
/// anything changed and the snapshot needs rewriting.
pub(crate) fn seed_starting_rooms(world: &mut WorldState) -> bool {
    let mut dirty = false;
    for game in world.games_by_bonfire.values_mut() {
        if game.status != GameStatus::Active || !game.rooms.is_empty() {
            continue;
        }
        game.rooms
            .push(RoomRecord::new(STARTING_ROOM_NAME, STARTING_ROOM_DESCRIPTION));
        game.updated_at = Utc::now();
        dirty = true;
    }
    if dirty {
        for player in world.players_by_agent.values_mut() {
            if !player.current_room.is_empty() {
                continue;
            }
            if let Some(first_room) = world
                .games_by_bonfire
                .get(&player.bonfire_id)
                .and_then(|game| game.rooms.first())
            {
                player.current_room = first_room.room_id.clone();
            }
        }
    }
    dirty
}
