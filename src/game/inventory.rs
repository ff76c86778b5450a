//! Object lifecycle: creation, placement, inventories, and the effects that
//! fire when a player uses an item. Placement is exclusive; moving an object
//! always detaches it from its previous holder inside the same lock scope.

use std::collections::BTreeMap;

use log::debug;
use serde_json::json;

use crate::game::errors::WorldError;
use crate::game::state::{WorldState, WorldStore};
use crate::game::types::{ObjectKind, ObjectLocation, ObjectRecord, UseOutcome};

/// Move an object to a new holder, keeping the denormalized inventory lists
/// on players and NPCs consistent with the object's location. Exactly one
/// inventory ever contains the object id.
fn set_location(
    world: &mut WorldState,
    bonfire_id: &str,
    object_id: &str,
    location: ObjectLocation,
) -> bool {
    let previous = match world
        .objects_by_game
        .get(bonfire_id)
        .and_then(|objects| objects.get(object_id))
        .filter(|o| !o.is_consumed)
    {
        Some(object) => object.location.clone(),
        None => return false,
    };
    // The new holder must exist; a grant to a ghost would orphan the object.
    match &location {
        ObjectLocation::Player { agent_id } => {
            if !world.players_by_agent.contains_key(agent_id) {
                return false;
            }
        }
        ObjectLocation::Npc { npc_id } => {
            let known = world
                .npcs_by_game
                .get(bonfire_id)
                .map(|npcs| npcs.contains_key(npc_id))
                .unwrap_or(false);
            if !known {
                return false;
            }
        }
        ObjectLocation::Room { .. } | ObjectLocation::Nowhere => {}
    }

    detach_from_holder(world, bonfire_id, object_id, &previous);
    match &location {
        ObjectLocation::Player { agent_id } => {
            if let Some(player) = world.players_by_agent.get_mut(agent_id) {
                if !player.inventory.iter().any(|id| id == object_id) {
                    player.inventory.push(object_id.to_string());
                }
            }
        }
        ObjectLocation::Npc { npc_id } => {
            if let Some(npc) = world
                .npcs_by_game
                .get_mut(bonfire_id)
                .and_then(|npcs| npcs.get_mut(npc_id))
            {
                if !npc.inventory.iter().any(|id| id == object_id) {
                    npc.inventory.push(object_id.to_string());
                }
            }
        }
        ObjectLocation::Room { .. } | ObjectLocation::Nowhere => {}
    }
    if let Some(object) = world
        .objects_by_game
        .get_mut(bonfire_id)
        .and_then(|objects| objects.get_mut(object_id))
    {
        object.location = location;
    }
    true
}

fn detach_from_holder(
    world: &mut WorldState,
    bonfire_id: &str,
    object_id: &str,
    previous: &ObjectLocation,
) {
    match previous {
        ObjectLocation::Player { agent_id } => {
            if let Some(player) = world.players_by_agent.get_mut(agent_id) {
                player.inventory.retain(|id| id != object_id);
            }
        }
        ObjectLocation::Npc { npc_id } => {
            if let Some(npc) = world
                .npcs_by_game
                .get_mut(bonfire_id)
                .and_then(|npcs| npcs.get_mut(npc_id))
            {
                npc.inventory.retain(|id| id != object_id);
            }
        }
        ObjectLocation::Room { .. } | ObjectLocation::Nowhere => {}
    }
}

impl WorldStore {
    /// Create an object in a bonfire's game. New objects start unplaced;
    /// callers hand them out with `grant_object_to_*` or `drop_object_in_room`.
    pub fn create_object(
        &self,
        bonfire_id: &str,
        name: &str,
        description: &str,
        kind: ObjectKind,
        properties: BTreeMap<String, String>,
    ) -> Result<ObjectRecord, WorldError> {
        let mut world = self.world();
        if !world.games_by_bonfire.contains_key(bonfire_id) {
            return Err(WorldError::NotFound(format!("no game for bonfire {}", bonfire_id)));
        }
        let mut object = ObjectRecord::new(name, description, kind);
        object.properties = properties;
        let receipt = object.clone();
        world
            .objects_by_game
            .entry(bonfire_id.to_string())
            .or_default()
            .insert(object.object_id.clone(), object);
        self.persist(&world)?;
        Ok(receipt)
    }

    pub fn get_object(&self, bonfire_id: &str, object_id: &str) -> Option<ObjectRecord> {
        self.world()
            .objects_by_game
            .get(bonfire_id)
            .and_then(|objects| objects.get(object_id))
            .cloned()
    }

    pub fn objects_in_room(&self, bonfire_id: &str, room_id: &str) -> Vec<ObjectRecord> {
        self.world()
            .objects_by_game
            .get(bonfire_id)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| {
                        !o.is_consumed
                            && o.location
                                == ObjectLocation::Room { room_id: room_id.to_string() }
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn player_inventory(&self, bonfire_id: &str, agent_id: &str) -> Vec<ObjectRecord> {
        self.world()
            .objects_by_game
            .get(bonfire_id)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| {
                        !o.is_consumed
                            && o.location
                                == ObjectLocation::Player { agent_id: agent_id.to_string() }
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hand an object to a player. Returns false when the object is unknown.
    pub fn grant_object_to_player(
        &self,
        bonfire_id: &str,
        agent_id: &str,
        object_id: &str,
    ) -> Result<bool, WorldError> {
        let mut world = self.world();
        let location = ObjectLocation::Player { agent_id: agent_id.to_string() };
        if !set_location(&mut world, bonfire_id, object_id, location) {
            return Ok(false);
        }
        self.persist(&world)?;
        Ok(true)
    }

    pub fn grant_object_to_npc(
        &self,
        bonfire_id: &str,
        npc_id: &str,
        object_id: &str,
    ) -> Result<bool, WorldError> {
        let mut world = self.world();
        let location = ObjectLocation::Npc { npc_id: npc_id.to_string() };
        if !set_location(&mut world, bonfire_id, object_id, location) {
            return Ok(false);
        }
        self.persist(&world)?;
        Ok(true)
    }

    pub fn drop_object_in_room(
        &self,
        bonfire_id: &str,
        room_id: &str,
        object_id: &str,
    ) -> Result<bool, WorldError> {
        let mut world = self.world();
        let location = ObjectLocation::Room { room_id: room_id.to_string() };
        if !set_location(&mut world, bonfire_id, object_id, location) {
            return Ok(false);
        }
        self.persist(&world)?;
        Ok(true)
    }

    /// Apply an object's effects for a player holding it. Property-driven:
    /// `unlocks_room` splices a connection into the player's current room,
    /// `reveals_entity` surfaces a hidden entity id, and consumables burn on
    /// use. Bad preconditions come back as `UseOutcome::Failed` so the GM
    /// applier can log and continue.
    pub fn use_object(
        &self,
        bonfire_id: &str,
        agent_id: &str,
        object_id: &str,
    ) -> Result<UseOutcome, WorldError> {
        let mut world = self.world();

        let Some(object) = world
            .objects_by_game
            .get(bonfire_id)
            .and_then(|objects| objects.get(object_id))
            .filter(|o| !o.is_consumed)
            .cloned()
        else {
            return Ok(UseOutcome::Failed { reason: "object_not_found_or_consumed".to_string() });
        };
        if object.location != (ObjectLocation::Player { agent_id: agent_id.to_string() }) {
            return Ok(UseOutcome::Failed { reason: "not_in_inventory".to_string() });
        }

        let mut effects = Vec::new();

        if let Some(target) = object.properties.get("unlocks_room").cloned() {
            let current_room = world
                .players_by_agent
                .get(agent_id)
                .map(|p| p.current_room.clone())
                .unwrap_or_default();
            if let Some(room) = world
                .games_by_bonfire
                .get_mut(bonfire_id)
                .and_then(|game| game.room_mut(&current_room))
            {
                // Unlocking twice must not duplicate the passage; the effect
                // is only reported when the connection was actually added.
                if !room.connections.contains(&target) {
                    room.connections.push(target.clone());
                    effects.push(format!("Unlocked passage to {}", target));
                }
            } else {
                debug!("use_object: holder {} has no resolvable room", agent_id);
            }
        }

        if let Some(entity) = object.properties.get("reveals_entity") {
            effects.push(format!("Revealed entity {}", entity));
        }

        let mut consumed = object.clone();
        if object.kind == ObjectKind::Consumable {
            if let Some(stored) = world
                .objects_by_game
                .get_mut(bonfire_id)
                .and_then(|objects| objects.get_mut(object_id))
            {
                stored.is_consumed = true;
                stored.location = ObjectLocation::Nowhere;
                consumed = stored.clone();
            }
            if let Some(player) = world.players_by_agent.get_mut(agent_id) {
                player.inventory.retain(|id| id != object_id);
            }
            effects.push("Item consumed".to_string());
        }

        world.push_event(
            bonfire_id,
            "object_used",
            json!({
                "agent_id": agent_id,
                "object_id": object_id,
                "object_name": consumed.name,
                "effects": effects,
            }),
        );
        self.persist(&world)?;
        Ok(UseOutcome::Applied { effects, object: consumed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::tests::{register_test_agent, setup_test_store};

    fn setup_world(store: &WorldStore) -> String {
        store
            .create_or_replace_game("bonfire-1", "0xowner", "prompt", None, "")
            .expect("game");
        register_test_agent(store, "agent-1", 2);
        let room_id = store.ensure_starting_room("bonfire-1").expect("room").expect("id");
        store.place_player_in_starting_room("agent-1").expect("place");
        room_id
    }

    fn key_props(unlocks: &str) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("unlocks_room".to_string(), unlocks.to_string());
        props
    }

    #[test]
    fn create_object_requires_a_game() {
        let (_dir, store) = setup_test_store();
        assert!(matches!(
            store
                .create_object("bonfire-1", "Torch", "", ObjectKind::Tool, Default::default())
                .unwrap_err(),
            WorldError::NotFound(_)
        ));
    }

    #[test]
    fn placement_is_exclusive() {
        let (_dir, store) = setup_test_store();
        let room_id = setup_world(&store);
        let object = store
            .create_object("bonfire-1", "Torch", "A torch", ObjectKind::Tool, Default::default())
            .expect("object");

        assert!(store
            .drop_object_in_room("bonfire-1", &room_id, &object.object_id)
            .expect("drop"));
        assert_eq!(store.objects_in_room("bonfire-1", &room_id).len(), 1);

        // Granting to a player removes the object from the room.
        assert!(store
            .grant_object_to_player("bonfire-1", "agent-1", &object.object_id)
            .expect("grant"));
        assert!(store.objects_in_room("bonfire-1", &room_id).is_empty());
        assert_eq!(store.player_inventory("bonfire-1", "agent-1").len(), 1);

        // And an NPC grant empties the player's inventory in turn.
        let npc = store
            .create_npc("bonfire-1", "Keeper", &room_id, "stern", "", "")
            .expect("npc");
        assert!(store
            .grant_object_to_npc("bonfire-1", &npc.npc_id, &object.object_id)
            .expect("grant"));
        assert!(store.player_inventory("bonfire-1", "agent-1").is_empty());

        assert!(!store
            .grant_object_to_player("bonfire-1", "agent-1", "missing")
            .expect("unknown object"));
    }

    #[test]
    fn use_object_fails_outside_inventory() {
        let (_dir, store) = setup_test_store();
        let room_id = setup_world(&store);
        let object = store
            .create_object("bonfire-1", "Torch", "", ObjectKind::Tool, Default::default())
            .expect("object");
        store
            .drop_object_in_room("bonfire-1", &room_id, &object.object_id)
            .expect("drop");

        let outcome = store
            .use_object("bonfire-1", "agent-1", &object.object_id)
            .expect("use");
        assert_eq!(outcome, UseOutcome::Failed { reason: "not_in_inventory".to_string() });

        let missing = store.use_object("bonfire-1", "agent-1", "nope").expect("use");
        assert_eq!(
            missing,
            UseOutcome::Failed { reason: "object_not_found_or_consumed".to_string() }
        );
    }

    #[test]
    fn unlocking_a_room_is_idempotent() {
        let (_dir, store) = setup_test_store();
        let room_id = setup_world(&store);
        let key = store
            .create_object("bonfire-1", "Brass Key", "", ObjectKind::Key, key_props("crypt"))
            .expect("key");
        store
            .grant_object_to_player("bonfire-1", "agent-1", &key.object_id)
            .expect("grant");

        let first = store
            .use_object("bonfire-1", "agent-1", &key.object_id)
            .expect("use");
        match first {
            UseOutcome::Applied { effects, .. } => {
                assert_eq!(effects, vec!["Unlocked passage to crypt".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // A second use succeeds but the passage is not duplicated, and the
        // unlock effect is not re-reported.
        let second = store
            .use_object("bonfire-1", "agent-1", &key.object_id)
            .expect("use");
        match second {
            UseOutcome::Applied { effects, .. } => assert!(effects.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let room = store.room_by_id("bonfire-1", &room_id).expect("room");
        assert_eq!(room.connections.iter().filter(|c| *c == "crypt").count(), 1);
    }

    #[test]
    fn consumables_burn_on_use() {
        let (_dir, store) = setup_test_store();
        setup_world(&store);
        let mut props = BTreeMap::new();
        props.insert("reveals_entity".to_string(), "ghost-7".to_string());
        let potion = store
            .create_object("bonfire-1", "Potion", "", ObjectKind::Consumable, props)
            .expect("potion");
        store
            .grant_object_to_player("bonfire-1", "agent-1", &potion.object_id)
            .expect("grant");

        let outcome = store
            .use_object("bonfire-1", "agent-1", &potion.object_id)
            .expect("use");
        match outcome {
            UseOutcome::Applied { effects, object } => {
                assert_eq!(
                    effects,
                    vec!["Revealed entity ghost-7".to_string(), "Item consumed".to_string()]
                );
                assert!(object.is_consumed);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(store.player_inventory("bonfire-1", "agent-1").is_empty());

        // A second use reports the consumed state.
        let again = store
            .use_object("bonfire-1", "agent-1", &potion.object_id)
            .expect("use");
        assert_eq!(
            again,
            UseOutcome::Failed { reason: "object_not_found_or_consumed".to_string() }
        );
    }
}
