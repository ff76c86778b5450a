use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle of a game instance. Replacing a game archives the previous one;
/// records are never deleted so historical attempts and events keep resolving.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Active,
    Closed,
}

/// Outcome of evaluating a quest claim submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Key,
    Tool,
    Artifact,
    Consumable,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Key => "key",
            ObjectKind::Tool => "tool",
            ObjectKind::Artifact => "artifact",
            ObjectKind::Consumable => "consumable",
        }
    }

    /// Lenient parse for GM-supplied payloads; unknown kinds fall back to artifact.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "key" => ObjectKind::Key,
            "tool" => ObjectKind::Tool,
            "consumable" => ObjectKind::Consumable,
            _ => ObjectKind::Artifact,
        }
    }
}

/// Where an object currently lives. Exactly one owner at a time; the
/// string-keyed `location_type`/`location_id` pair exists only on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLocation {
    Nowhere,
    Room { room_id: String },
    Player { agent_id: String },
    Npc { npc_id: String },
}

impl ObjectLocation {
    fn to_wire(&self) -> Option<(&'static str, &str)> {
        match self {
            ObjectLocation::Nowhere => None,
            ObjectLocation::Room { room_id } => Some(("room", room_id)),
            ObjectLocation::Player { agent_id } => Some(("player", agent_id)),
            ObjectLocation::Npc { npc_id } => Some(("npc", npc_id)),
        }
    }

    /// Resolve a loosely-typed location pair from a GM payload. Unknown
    /// types and empty ids resolve to `Nowhere`.
    pub fn from_decision(location_type: &str, location_id: &str) -> Self {
        Self::from_wire(location_type, location_id.to_string())
    }

    fn from_wire(location_type: &str, location_id: String) -> Self {
        match location_type {
            "room" if !location_id.is_empty() => ObjectLocation::Room { room_id: location_id },
            "player" if !location_id.is_empty() => ObjectLocation::Player { agent_id: location_id },
            "npc" if !location_id.is_empty() => ObjectLocation::Npc { npc_id: location_id },
            _ => ObjectLocation::Nowhere,
        }
    }
}

/// A registered agent-controlled player character.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub wallet: String,
    pub agent_id: String,
    pub bonfire_id: String,
    #[serde(default)]
    pub erc8004_bonfire_id: i64,
    #[serde(default)]
    pub purchase_id: String,
    #[serde(default)]
    pub purchase_tx_hash: String,
    pub base_quota: u32,
    #[serde(default)]
    pub bonus_quota: u32,
    #[serde(default)]
    pub turns_used: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub current_room: String,
    #[serde(default)]
    pub inventory: Vec<String>,
}

impl PlayerRecord {
    pub fn new(wallet: &str, agent_id: &str, bonfire_id: &str, base_quota: u32) -> Self {
        Self {
            wallet: wallet.to_ascii_lowercase(),
            agent_id: agent_id.to_string(),
            bonfire_id: bonfire_id.to_string(),
            erc8004_bonfire_id: 0,
            purchase_id: String::new(),
            purchase_tx_hash: String::new(),
            base_quota,
            bonus_quota: 0,
            turns_used: 0,
            is_active: true,
            created_at: Utc::now(),
            current_room: String::new(),
            inventory: Vec::new(),
        }
    }

    pub fn total_quota(&self) -> u32 {
        self.base_quota + self.bonus_quota
    }

    pub fn remaining_episodes(&self) -> u32 {
        self.total_quota().saturating_sub(self.turns_used)
    }
}

/// A room embedded in its game's ordered room list. Connections are directed
/// and not necessarily symmetric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomRecord {
    pub room_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default)]
    pub graph_entity_uuid: String,
    #[serde(default)]
    pub dataroom_id: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub latest_hyperblog_id: String,
    #[serde(default)]
    pub latest_summary: String,
}

impl RoomRecord {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            room_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            connections: Vec::new(),
            graph_entity_uuid: String::new(),
            dataroom_id: String::new(),
            image_url: String::new(),
            latest_hyperblog_id: String::new(),
            latest_summary: String::new(),
        }
    }

    pub fn with_connections(mut self, connections: Vec<String>) -> Self {
        self.connections = connections;
        self
    }
}

/// One game instance for a bonfire. At most one per bonfire is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameRecord {
    pub bonfire_id: String,
    pub owner_wallet: String,
    pub game_prompt: String,
    pub status: GameStatus,
    pub game_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gm_agent_id: Option<String>,
    #[serde(default)]
    pub initial_episode_summary: String,
    #[serde(default)]
    pub world_state_summary: String,
    #[serde(default)]
    pub last_gm_reaction: String,
    #[serde(default)]
    pub last_episode_id: String,
    #[serde(default)]
    pub rooms: Vec<RoomRecord>,
}

impl GameRecord {
    pub fn new(bonfire_id: &str, owner_wallet: &str, game_prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            bonfire_id: bonfire_id.to_string(),
            owner_wallet: owner_wallet.to_ascii_lowercase(),
            game_prompt: game_prompt.trim().to_string(),
            status: GameStatus::Active,
            game_id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            gm_agent_id: None,
            initial_episode_summary: String::new(),
            world_state_summary: String::new(),
            last_gm_reaction: String::new(),
            last_episode_id: String::new(),
            rooms: Vec::new(),
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomRecord> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut RoomRecord> {
        self.rooms.iter_mut().find(|r| r.room_id == room_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestRecord {
    pub quest_id: String,
    pub bonfire_id: String,
    pub creator_wallet: String,
    #[serde(default)]
    pub quest_type: String,
    #[serde(default)]
    pub prompt: String,
    pub keyword: String,
    pub reward: u32,
    pub cooldown_seconds: u64,
    pub status: QuestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Immutable audit record of one claim attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub quest_id: String,
    pub agent_id: String,
    pub submission: String,
    pub verdict: Verdict,
    pub reward_granted: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcRecord {
    pub npc_id: String,
    pub name: String,
    pub room_id: String,
    pub personality: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dialogue_style: String,
    #[serde(default)]
    pub graph_entity_uuid: String,
    #[serde(default)]
    pub inventory: Vec<String>,
    pub is_active: bool,
}

impl NpcRecord {
    pub fn new(name: &str, room_id: &str, personality: &str) -> Self {
        Self {
            npc_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            room_id: room_id.to_string(),
            personality: personality.to_string(),
            description: String::new(),
            dialogue_style: String::new(),
            graph_entity_uuid: String::new(),
            inventory: Vec::new(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ObjectWire", into = "ObjectWire")]
pub struct ObjectRecord {
    pub object_id: String,
    pub name: String,
    pub description: String,
    pub kind: ObjectKind,
    pub location: ObjectLocation,
    pub properties: BTreeMap<String, String>,
    pub graph_entity_uuid: String,
    pub is_consumed: bool,
}

impl ObjectRecord {
    pub fn new(name: &str, description: &str, kind: ObjectKind) -> Self {
        Self {
            object_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            kind,
            location: ObjectLocation::Nowhere,
            properties: BTreeMap::new(),
            graph_entity_uuid: String::new(),
            is_consumed: false,
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

/// Wire shape of an object: placement flattened into the properties bag as
/// `location_type`/`location_id`, matching the persisted snapshot layout.
#[derive(Serialize, Deserialize)]
struct ObjectWire {
    object_id: String,
    name: String,
    description: String,
    obj_type: ObjectKind,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    graph_entity_uuid: String,
    #[serde(default)]
    is_consumed: bool,
}

impl From<ObjectRecord> for ObjectWire {
    fn from(record: ObjectRecord) -> Self {
        let mut properties = record.properties;
        if let Some((location_type, location_id)) = record.location.to_wire() {
            properties.insert("location_type".to_string(), location_type.to_string());
            properties.insert("location_id".to_string(), location_id.to_string());
        }
        Self {
            object_id: record.object_id,
            name: record.name,
            description: record.description,
            obj_type: record.kind,
            properties,
            graph_entity_uuid: record.graph_entity_uuid,
            is_consumed: record.is_consumed,
        }
    }
}

impl From<ObjectWire> for ObjectRecord {
    fn from(wire: ObjectWire) -> Self {
        let mut properties = wire.properties;
        let location_type = properties.remove("location_type").unwrap_or_default();
        let location_id = properties.remove("location_id").unwrap_or_default();
        Self {
            object_id: wire.object_id,
            name: wire.name,
            description: wire.description,
            kind: wire.obj_type,
            location: ObjectLocation::from_wire(&location_type, location_id),
            properties,
            graph_entity_uuid: wire.graph_entity_uuid,
            is_consumed: wire.is_consumed,
        }
    }
}

/// Admin linkage between a bonfire and its on-chain registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BonfireAdmin {
    pub bonfire_id: String,
    pub erc8004_bonfire_id: i64,
    pub owner_wallet: String,
    pub last_verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub at: DateTime<Utc>,
    pub payload: Value,
}

impl EventRecord {
    pub fn new(event_type: &str, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Credit,
    Debit,
}

/// Append-only quota accounting entry for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub entry_id: String,
    #[serde(rename = "type")]
    pub kind: LedgerEntryKind,
    pub reason: String,
    pub amount: u32,
    #[serde(default)]
    pub quest_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn credit(reason: &str, amount: u32) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            kind: LedgerEntryKind::Credit,
            reason: reason.to_string(),
            amount,
            quest_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_quest(mut self, quest_id: &str) -> Self {
        self.quest_id = Some(quest_id.to_string());
        self
    }
}

/// GM-facing rolling summary of an agent's recent narrative progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentContext {
    pub agent_id: String,
    pub bonfire_id: String,
    #[serde(default)]
    pub episode_count: u32,
    #[serde(default)]
    pub recent_episode_ids: Vec<String>,
    #[serde(default)]
    pub last_episode_id: String,
    #[serde(default)]
    pub last_episode_summary: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub gm_last_reaction: String,
    #[serde(default)]
    pub gm_world_state_update: String,
    #[serde(default)]
    pub gm_last_episode_id: String,
    #[serde(default)]
    pub gm_updated_at: Option<DateTime<Utc>>,
}

impl AgentContext {
    pub fn new(agent_id: &str, bonfire_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            bonfire_id: bonfire_id.to_string(),
            episode_count: 0,
            recent_episode_ids: Vec::new(),
            last_episode_id: String::new(),
            last_episode_summary: String::new(),
            updated_at: Utc::now(),
            gm_last_reaction: String::new(),
            gm_world_state_update: String::new(),
            gm_last_episode_id: String::new(),
            gm_updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomMessage {
    pub room_id: String,
    pub sender_agent_id: String,
    pub sender_wallet: String,
    pub role: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Receipts returned by store operations (callers get values, never references)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnReceipt {
    pub agent_id: String,
    pub remaining_episodes: u32,
    pub turns_used: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClaimReceipt {
    pub quest_id: String,
    pub agent_id: String,
    pub verdict: Verdict,
    pub reward_granted: u32,
    pub remaining_episodes: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RechargeReceipt {
    pub agent_id: String,
    pub remaining_episodes: u32,
    pub total_quota: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GameSummary {
    pub game_id: String,
    pub bonfire_id: String,
    pub owner_wallet: String,
    pub game_prompt: String,
    pub gm_agent_id: Option<String>,
    pub initial_episode_summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_agent_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorldNarrative {
    pub world_state_summary: String,
    pub last_gm_reaction: String,
    pub last_episode_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerPosition {
    pub agent_id: String,
    pub wallet: String,
    pub current_room: String,
}

/// Full spatial view of one bonfire for GM context building.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RoomMap {
    pub rooms: Vec<RoomRecord>,
    pub players: Vec<PlayerPosition>,
    pub npcs_by_room: std::collections::HashMap<String, Vec<NpcRecord>>,
    pub objects_by_room: std::collections::HashMap<String, Vec<ObjectRecord>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerStanding {
    pub wallet: String,
    pub agent_id: String,
    pub remaining_episodes: u32,
    pub turns_used: u32,
    pub total_quota: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BonfireState {
    pub bonfire_id: String,
    pub players: Vec<PlayerStanding>,
    pub quests: Vec<QuestRecord>,
    pub agent_context: Vec<AgentContext>,
}

/// Result of `use_object`. Failures are data, not errors, so batch callers
/// can report them without aborting.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UseOutcome {
    Applied {
        effects: Vec<String>,
        object: ObjectRecord,
    },
    Failed {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_episodes_saturates_at_zero() {
        let mut player = PlayerRecord::new("0xAB", "agent-1", "bonfire-1", 2);
        assert_eq!(player.wallet, "0xab");
        player.turns_used = 5;
        assert_eq!(player.remaining_episodes(), 0);
    }

    #[test]
    fn object_location_round_trips_through_properties() {
        let mut object = ObjectRecord::new("Brass Key", "An old key", ObjectKind::Key)
            .with_property("unlocks_room", "room-2");
        object.location = ObjectLocation::Player {
            agent_id: "agent-1".to_string(),
        };

        let json = serde_json::to_value(&object).expect("serialize");
        assert_eq!(json["properties"]["location_type"], "player");
        assert_eq!(json["properties"]["location_id"], "agent-1");
        assert_eq!(json["obj_type"], "key");

        let back: ObjectRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.location, object.location);
        // The wire-only keys must not leak into the typed properties bag.
        assert!(!back.properties.contains_key("location_type"));
        assert_eq!(back.properties.get("unlocks_room").map(String::as_str), Some("room-2"));
    }

    #[test]
    fn unplaced_object_serializes_without_location_keys() {
        let object = ObjectRecord::new("Torch", "A burning torch", ObjectKind::Tool);
        let json = serde_json::to_value(&object).expect("serialize");
        assert!(json["properties"].get("location_type").is_none());
    }

    #[test]
    fn lenient_object_kind_defaults_to_artifact() {
        assert_eq!(ObjectKind::parse_lenient("KEY"), ObjectKind::Key);
        assert_eq!(ObjectKind::parse_lenient("weird"), ObjectKind::Artifact);
        assert_eq!(ObjectKind::parse_lenient(""), ObjectKind::Artifact);
    }
}
