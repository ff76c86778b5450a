//! Room graph and NPC management. Rooms are embedded in their game's ordered
//! list and mutated by linear scan; room counts stay small enough that O(n)
//! lookups beat a separate index.

use chrono::Utc;
use log::debug;

use crate::game::errors::WorldError;
use crate::game::state::{
    WorldStore, STARTING_ROOM_DESCRIPTION, STARTING_ROOM_NAME,
};
use crate::game::types::{
    NpcRecord, ObjectLocation, PlayerPosition, RoomMap, RoomRecord,
};

impl WorldStore {
    // ── Rooms ──

    /// Create a room in a bonfire's game. The room id is store-generated and
    /// opaque to callers.
    pub fn create_room(
        &self,
        bonfire_id: &str,
        name: &str,
        description: &str,
        connections: Vec<String>,
    ) -> Result<RoomRecord, WorldError> {
        let mut world = self.world();
        let Some(game) = world.games_by_bonfire.get_mut(bonfire_id) else {
            return Err(WorldError::NotFound(format!("no game for bonfire {}", bonfire_id)));
        };
        let room = RoomRecord::new(name, description).with_connections(connections);
        let receipt = room.clone();
        game.rooms.push(room);
        game.updated_at = Utc::now();
        self.persist(&world)?;
        Ok(receipt)
    }

    /// Update a room's description and/or connections in place. Returns false
    /// when the game or room is unknown.
    pub fn update_room(
        &self,
        bonfire_id: &str,
        room_id: &str,
        description: Option<&str>,
        connections: Option<Vec<String>>,
    ) -> Result<bool, WorldError> {
        let mut world = self.world();
        let Some(game) = world.games_by_bonfire.get_mut(bonfire_id) else {
            return Ok(false);
        };
        let Some(room) = game.room_mut(room_id) else {
            return Ok(false);
        };
        if let Some(description) = description {
            room.description = description.to_string();
        }
        if let Some(connections) = connections {
            room.connections = connections;
        }
        game.updated_at = Utc::now();
        self.persist(&world)?;
        Ok(true)
    }

    /// Attach an external knowledge-graph entity to a room.
    pub fn set_room_graph_entity(
        &self,
        bonfire_id: &str,
        room_id: &str,
        entity_uuid: &str,
    ) -> Result<bool, WorldError> {
        let mut world = self.world();
        let Some(room) = world
            .games_by_bonfire
            .get_mut(bonfire_id)
            .and_then(|game| game.room_mut(room_id))
        else {
            return Ok(false);
        };
        room.graph_entity_uuid = entity_uuid.to_string();
        self.persist(&world)?;
        Ok(true)
    }

    pub fn room_by_id(&self, bonfire_id: &str, room_id: &str) -> Option<RoomRecord> {
        self.world()
            .games_by_bonfire
            .get(bonfire_id)
            .and_then(|game| game.room(room_id))
            .cloned()
    }

    /// Make sure the game has at least one room and return the first room's id.
    pub fn ensure_starting_room(&self, bonfire_id: &str) -> Result<Option<String>, WorldError> {
        let mut world = self.world();
        let Some(game) = world.games_by_bonfire.get_mut(bonfire_id) else {
            return Ok(None);
        };
        if let Some(first) = game.rooms.first() {
            return Ok(Some(first.room_id.clone()));
        }
        let room = RoomRecord::new(STARTING_ROOM_NAME, STARTING_ROOM_DESCRIPTION);
        let room_id = room.room_id.clone();
        game.rooms.push(room);
        game.updated_at = Utc::now();
        self.persist(&world)?;
        Ok(Some(room_id))
    }

    /// Place a roomless player into the first room of their game. No-op when
    /// the player already has a room or the game has none.
    pub fn place_player_in_starting_room(&self, agent_id: &str) -> Result<(), WorldError> {
        let mut world = self.world();
        let Some(bonfire_id) = world
            .players_by_agent
            .get(agent_id)
            .filter(|p| p.current_room.is_empty())
            .map(|p| p.bonfire_id.clone())
        else {
            return Ok(());
        };
        let Some(room_id) = world
            .games_by_bonfire
            .get(&bonfire_id)
            .and_then(|game| game.rooms.first())
            .map(|room| room.room_id.clone())
        else {
            return Ok(());
        };
        if let Some(player) = world.players_by_agent.get_mut(agent_id) {
            player.current_room = room_id;
        }
        self.persist(&world)?;
        Ok(())
    }

    /// Move a player to a room in their game. Returns false instead of
    /// erroring on unknown agents or rooms; the GM applier batches movements
    /// and must be able to skip invalid ones.
    pub fn move_player(&self, agent_id: &str, room_id: &str) -> Result<bool, WorldError> {
        let mut world = self.world();
        let Some(bonfire_id) = world
            .players_by_agent
            .get(agent_id)
            .map(|p| p.bonfire_id.clone())
        else {
            return Ok(false);
        };
        let valid = world
            .games_by_bonfire
            .get(&bonfire_id)
            .map(|game| game.room(room_id).is_some())
            .unwrap_or(false);
        if !valid {
            debug!("move_player: room {} is not in bonfire {}", room_id, bonfire_id);
            return Ok(false);
        }
        if let Some(player) = world.players_by_agent.get_mut(agent_id) {
            player.current_room = room_id.to_string();
        }
        self.persist(&world)?;
        Ok(true)
    }

    /// Spatial view of a bonfire: rooms, player positions, active NPCs and
    /// unconsumed room objects grouped by room.
    pub fn room_map(&self, bonfire_id: &str) -> RoomMap {
        let world = self.world();
        let mut map = RoomMap::default();
        if let Some(game) = world.games_by_bonfire.get(bonfire_id) {
            map.rooms = game.rooms.clone();
        }
        for player in world.players_by_agent.values() {
            if player.bonfire_id == bonfire_id {
                map.players.push(PlayerPosition {
                    agent_id: player.agent_id.clone(),
                    wallet: player.wallet.clone(),
                    current_room: player.current_room.clone(),
                });
            }
        }
        map.players.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        if let Some(npcs) = world.npcs_by_game.get(bonfire_id) {
            for npc in npcs.values().filter(|npc| npc.is_active) {
                map.npcs_by_room
                    .entry(npc.room_id.clone())
                    .or_default()
                    .push(npc.clone());
            }
        }
        if let Some(objects) = world.objects_by_game.get(bonfire_id) {
            for object in objects.values().filter(|o| !o.is_consumed) {
                if let ObjectLocation::Room { room_id } = &object.location {
                    map.objects_by_room
                        .entry(room_id.clone())
                        .or_default()
                        .push(object.clone());
                }
            }
        }
        map
    }

    // ── NPCs ──

    pub fn create_npc(
        &self,
        bonfire_id: &str,
        name: &str,
        room_id: &str,
        personality: &str,
        description: &str,
        dialogue_style: &str,
    ) -> Result<NpcRecord, WorldError> {
        let mut world = self.world();
        if !world.games_by_bonfire.contains_key(bonfire_id) {
            return Err(WorldError::NotFound(format!("no game for bonfire {}", bonfire_id)));
        }
        let mut npc = NpcRecord::new(name, room_id, personality);
        npc.description = description.to_string();
        npc.dialogue_style = dialogue_style.to_string();
        let receipt = npc.clone();
        world
            .npcs_by_game
            .entry(bonfire_id.to_string())
            .or_default()
            .insert(npc.npc_id.clone(), npc);
        self.persist(&world)?;
        Ok(receipt)
    }

    pub fn get_npc(&self, bonfire_id: &str, npc_id: &str) -> Option<NpcRecord> {
        self.world()
            .npcs_by_game
            .get(bonfire_id)
            .and_then(|npcs| npcs.get(npc_id))
            .cloned()
    }

    pub fn npcs_in_room(&self, bonfire_id: &str, room_id: &str) -> Vec<NpcRecord> {
        self.world()
            .npcs_by_game
            .get(bonfire_id)
            .map(|npcs| {
                npcs.values()
                    .filter(|npc| npc.room_id == room_id && npc.is_active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Update an NPC's room, personality, or description. Returns false for
    /// unknown NPCs.
    pub fn update_npc(
        &self,
        bonfire_id: &str,
        npc_id: &str,
        room_id: Option<&str>,
        personality: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool, WorldError> {
        let mut world = self.world();
        let Some(npc) = world
            .npcs_by_game
            .get_mut(bonfire_id)
            .and_then(|npcs| npcs.get_mut(npc_id))
        else {
            return Ok(false);
        };
        if let Some(room_id) = room_id {
            npc.room_id = room_id.to_string();
        }
        if let Some(personality) = personality {
            npc.personality = personality.to_string();
        }
        if let Some(description) = description {
            npc.description = description.to_string();
        }
        self.persist(&world)?;
        Ok(true)
    }

    /// Soft-delete an NPC. The record stays so historical events keep
    /// resolving; it just stops appearing in room queries.
    pub fn remove_npc(&self, bonfire_id: &str, npc_id: &str) -> Result<bool, WorldError> {
        let mut world = self.world();
        let Some(npc) = world
            .npcs_by_game
            .get_mut(bonfire_id)
            .and_then(|npcs| npcs.get_mut(npc_id))
        else {
            return Ok(false);
        };
        npc.is_active = false;
        self.persist(&world)?;
        Ok(true)
    }
}
