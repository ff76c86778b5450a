//! Applies a Game Master decision to the world. The decision arrives as
//! loosely-shaped JSON from an upstream model; every list entry is parsed
//! individually and bad entries are skipped, never fatal. Application order
//! matters: rooms exist before anything moves into them, NPCs exist before
//! objects are handed to them.

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::game::errors::WorldError;
use crate::game::state::WorldStore;
use crate::game::types::{ObjectKind, ObjectLocation};

/// A Game Master ruling for one processed episode. All fields are optional
/// on the wire; a bare `{}` is a valid no-op decision.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmDecision {
    #[serde(default)]
    pub extension_awarded: i64,
    #[serde(default)]
    pub reaction: String,
    #[serde(default)]
    pub world_state_update: String,
    #[serde(default)]
    pub new_rooms: Vec<Value>,
    #[serde(default)]
    pub room_updates: Vec<Value>,
    #[serde(default)]
    pub room_movements: Vec<Value>,
    #[serde(default)]
    pub new_npcs: Vec<Value>,
    #[serde(default)]
    pub npc_updates: Vec<Value>,
    #[serde(default)]
    pub new_objects: Vec<Value>,
    #[serde(default)]
    pub object_grants: Vec<Value>,
}

impl GmDecision {
    /// Parse a decision from raw model output. Tolerates a JSON object
    /// wrapped in prose or markdown fences by slicing from the first `{`
    /// to the last `}`.
    pub fn from_model_text(text: &str) -> Option<Self> {
        let candidate = text.trim();
        if candidate.is_empty() {
            return None;
        }
        if let Ok(decision) = serde_json::from_str(candidate) {
            return Some(decision);
        }
        let start = candidate.find('{')?;
        let end = candidate.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&candidate[start..=end]).ok()
    }

    /// Extension clamped to the range the GM is allowed to award.
    pub fn clamped_extension(&self) -> i64 {
        self.extension_awarded.clamp(0, 3)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NewRoomEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    connections: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RoomUpdateEntry {
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    connections: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MovementEntry {
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    to_room: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NewNpcEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dialogue_style: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NpcUpdateEntry {
    #[serde(default)]
    npc_id: String,
    #[serde(default)]
    room_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NewObjectEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_obj_type")]
    obj_type: String,
    #[serde(default)]
    location_type: String,
    #[serde(default)]
    location_id: String,
    #[serde(default)]
    properties: std::collections::BTreeMap<String, String>,
}

fn default_obj_type() -> String {
    "artifact".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ObjectGrantEntry {
    #[serde(default)]
    object_id: String,
    #[serde(default)]
    to_agent_id: String,
}

fn parse_entry<T: for<'de> Deserialize<'de>>(section: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(entry) => Some(entry),
        Err(err) => {
            warn!("skipping malformed {} entry: {}", section, err);
            None
        }
    }
}

/// Partial application: a domain failure on one entry (no game yet, bad
/// values) skips that entry; IO and serialization failures still abort.
fn skip_on_domain_error<T>(
    section: &str,
    result: Result<T, WorldError>,
) -> Result<Option<T>, WorldError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(WorldError::NotFound(msg))
        | Err(WorldError::InvalidArgument(msg))
        | Err(WorldError::Conflict(msg))
        | Err(WorldError::PermissionDenied(msg)) => {
            warn!("skipping {} entry: {}", section, msg);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// What actually changed when a decision was applied. Identifiers only;
/// callers fetch full records if they need them.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DecisionSummary {
    pub extension_awarded: i64,
    pub new_rooms_created: Vec<String>,
    pub rooms_updated: Vec<String>,
    pub movements_applied: Vec<(String, String)>,
    pub npcs_created: Vec<String>,
    pub npcs_moved: Vec<String>,
    pub objects_created: Vec<String>,
    pub objects_granted: Vec<String>,
}

impl WorldStore {
    /// Apply a full GM decision for one agent's episode: narrative update,
    /// GM context for the agent, episode extension, then world changes.
    pub fn apply_decision(
        &self,
        bonfire_id: &str,
        agent_id: &str,
        episode_id: &str,
        decision: &GmDecision,
    ) -> Result<DecisionSummary, WorldError> {
        let reaction = decision.reaction.trim();
        let world_update = decision.world_state_update.trim();

        self.update_game_world_state(bonfire_id, episode_id, world_update, reaction)?;
        // The agent may have dropped off between episode and ruling; a
        // missing player context is not a reason to discard world changes.
        if let Err(err) = self.record_gm_response(agent_id, episode_id, reaction, world_update) {
            debug!("gm response not recorded for {}: {}", agent_id, err);
        }

        let mut summary = DecisionSummary::default();
        let extension = decision.clamped_extension();
        if extension > 0 {
            let recharged = skip_on_domain_error(
                "episode_extension",
                self.recharge_agent(bonfire_id, agent_id, extension, "gm_episode_extension"),
            )?;
            if recharged.is_some() {
                summary.extension_awarded = extension;
            }
        }

        self.apply_room_changes(bonfire_id, decision, &mut summary)?;
        self.apply_npc_and_object_changes(bonfire_id, decision, &mut summary)?;
        Ok(summary)
    }

    fn apply_room_changes(
        &self,
        bonfire_id: &str,
        decision: &GmDecision,
        summary: &mut DecisionSummary,
    ) -> Result<(), WorldError> {
        for value in &decision.new_rooms {
            let Some(entry) = parse_entry::<NewRoomEntry>("new_rooms", value) else {
                continue;
            };
            let name = entry.name.trim();
            if name.is_empty() {
                continue;
            }
            let created = skip_on_domain_error(
                "new_rooms",
                self.create_room(bonfire_id, name, entry.description.trim(), entry.connections),
            )?;
            if let Some(room) = created {
                summary.new_rooms_created.push(room.room_id);
            }
        }

        for value in &decision.room_updates {
            let Some(entry) = parse_entry::<RoomUpdateEntry>("room_updates", value) else {
                continue;
            };
            let room_id = entry.room_id.trim();
            if room_id.is_empty() {
                continue;
            }
            let description = entry.description.as_deref().map(str::trim);
            if self.update_room(bonfire_id, room_id, description, entry.connections)? {
                summary.rooms_updated.push(room_id.to_string());
            }
        }

        if !decision.room_movements.is_empty() {
            // Models often name rooms instead of citing ids; resolve
            // case-insensitively against the room list, falling back to the
            // raw value as an id.
            let mut name_to_id = std::collections::HashMap::new();
            if let Some(game) = self.get_game(bonfire_id) {
                for room in &game.rooms {
                    name_to_id.insert(room.name.to_lowercase(), room.room_id.clone());
                    name_to_id.insert(room.room_id.clone(), room.room_id.clone());
                }
            }
            for value in &decision.room_movements {
                let Some(entry) = parse_entry::<MovementEntry>("room_movements", value) else {
                    continue;
                };
                let agent = entry.agent_id.trim();
                let to_room = entry.to_room.trim();
                if agent.is_empty() || to_room.is_empty() {
                    continue;
                }
                let resolved = name_to_id
                    .get(&to_room.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| to_room.to_string());
                if self.move_player(agent, &resolved)? {
                    summary.movements_applied.push((agent.to_string(), resolved));
                }
            }
        }
        Ok(())
    }

    fn apply_npc_and_object_changes(
        &self,
        bonfire_id: &str,
        decision: &GmDecision,
        summary: &mut DecisionSummary,
    ) -> Result<(), WorldError> {
        for value in &decision.new_npcs {
            let Some(entry) = parse_entry::<NewNpcEntry>("new_npcs", value) else {
                continue;
            };
            let name = entry.name.trim();
            let room_id = entry.room_id.trim();
            if name.is_empty() || room_id.is_empty() {
                continue;
            }
            let created = skip_on_domain_error(
                "new_npcs",
                self.create_npc(
                    bonfire_id,
                    name,
                    room_id,
                    entry.personality.trim(),
                    entry.description.trim(),
                    entry.dialogue_style.trim(),
                ),
            )?;
            if let Some(npc) = created {
                summary.npcs_created.push(npc.npc_id);
            }
        }

        for value in &decision.npc_updates {
            let Some(entry) = parse_entry::<NpcUpdateEntry>("npc_updates", value) else {
                continue;
            };
            let npc_id = entry.npc_id.trim();
            if npc_id.is_empty() {
                continue;
            }
            let room_id = entry.room_id.trim();
            let room = (!room_id.is_empty()).then_some(room_id);
            if self.update_npc(bonfire_id, npc_id, room, None, None)? {
                summary.npcs_moved.push(npc_id.to_string());
            }
        }

        for value in &decision.new_objects {
            let Some(entry) = parse_entry::<NewObjectEntry>("new_objects", value) else {
                continue;
            };
            let name = entry.name.trim();
            if name.is_empty() {
                continue;
            }
            let kind = ObjectKind::parse_lenient(&entry.obj_type);
            let created = skip_on_domain_error(
                "new_objects",
                self.create_object(bonfire_id, name, entry.description.trim(), kind, entry.properties),
            )?;
            let Some(object) = created else {
                continue;
            };
            // Placement goes through the same paths as everything else so
            // the exclusive-owner rule holds even for GM-created items.
            let location = ObjectLocation::from_decision(
                entry.location_type.trim(),
                entry.location_id.trim(),
            );
            match location {
                ObjectLocation::Room { room_id } => {
                    self.drop_object_in_room(bonfire_id, &room_id, &object.object_id)?;
                }
                ObjectLocation::Player { agent_id } => {
                    self.grant_object_to_player(bonfire_id, &agent_id, &object.object_id)?;
                }
                ObjectLocation::Npc { npc_id } => {
                    self.grant_object_to_npc(bonfire_id, &npc_id, &object.object_id)?;
                }
                ObjectLocation::Nowhere => {}
            }
            summary.objects_created.push(object.object_id);
        }

        for value in &decision.object_grants {
            let Some(entry) = parse_entry::<ObjectGrantEntry>("object_grants", value) else {
                continue;
            };
            let object_id = entry.object_id.trim();
            let to_agent = entry.to_agent_id.trim();
            if object_id.is_empty() || to_agent.is_empty() {
                continue;
            }
            if self.grant_object_to_player(bonfire_id, to_agent, object_id)? {
                summary.objects_granted.push(object_id.to_string());
            }
        }
        Ok(())
    }
}
