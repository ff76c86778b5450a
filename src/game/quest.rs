//! Quest economy: creation, claim evaluation, cooldowns, and the append-only
//! attempt/ledger audit trail.
//!
//! The claim state machine enforces at most one successful claim per
//! (quest, agent) pair, forever. Rejected submissions leave the slot open and
//! never start the cooldown timer, so an agent may retry after a rejection.

use chrono::{Duration, Utc};
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::game::errors::WorldError;
use crate::game::state::{claim_key, WorldStore};
use crate::game::types::{
    AttemptRecord, ClaimReceipt, LedgerEntry, QuestRecord, QuestStatus, Verdict,
};

/// Submissions shorter than this are rejected outright.
const MIN_SUBMISSION_LEN: usize = 10;

/// Evaluate a claim submission against a quest keyword. The submission is
/// normalized (trimmed, lowercased); the keyword is stored lowercased.
pub fn evaluate_submission(keyword: &str, submission: &str) -> Verdict {
    let normalized = submission.trim().to_lowercase();
    if normalized.len() < MIN_SUBMISSION_LEN {
        return Verdict::Rejected;
    }
    if !keyword.is_empty() && !normalized.contains(keyword) {
        return Verdict::Rejected;
    }
    Verdict::Accepted
}

impl WorldStore {
    /// Create a quest for a bonfire. `expires_in_seconds` only sets an expiry
    /// when positive; expiry is then checked lazily at claim time.
    pub fn create_quest(
        &self,
        bonfire_id: &str,
        creator_wallet: &str,
        quest_type: &str,
        prompt: &str,
        keyword: &str,
        reward: i64,
        cooldown_seconds: i64,
        expires_in_seconds: Option<i64>,
    ) -> Result<QuestRecord, WorldError> {
        if reward < 1 {
            return Err(WorldError::InvalidArgument("reward must be >= 1".to_string()));
        }
        if cooldown_seconds < 0 {
            return Err(WorldError::InvalidArgument(
                "cooldown_seconds must be >= 0".to_string(),
            ));
        }
        let expires_at = match expires_in_seconds {
            Some(ttl) if ttl > 0 => Some(Utc::now() + Duration::seconds(ttl)),
            _ => None,
        };

        let mut world = self.world();
        let quest = QuestRecord {
            quest_id: Uuid::new_v4().to_string(),
            bonfire_id: bonfire_id.to_string(),
            creator_wallet: creator_wallet.to_ascii_lowercase(),
            quest_type: quest_type.to_string(),
            prompt: prompt.trim().to_string(),
            keyword: keyword.trim().to_lowercase(),
            reward: reward as u32,
            cooldown_seconds: cooldown_seconds as u64,
            status: QuestStatus::Active,
            created_at: Utc::now(),
            expires_at,
        };
        let receipt = quest.clone();
        world
            .quests_by_bonfire
            .entry(bonfire_id.to_string())
            .or_default()
            .insert(quest.quest_id.clone(), quest);
        world.claimed_by_quest.entry(receipt.quest_id.clone()).or_default();
        world.push_event(
            bonfire_id,
            "quest_created",
            json!({
                "quest_id": receipt.quest_id,
                "quest_type": receipt.quest_type,
                "reward": receipt.reward,
                "keyword": receipt.keyword,
            }),
        );
        info!(
            "created quest {} (reward {}) for bonfire {}",
            receipt.quest_id, receipt.reward, bonfire_id
        );
        self.persist(&world)?;
        Ok(receipt)
    }

    /// Run the claim state machine for one (quest, agent) pair.
    ///
    /// Order of checks: quest exists and is active, lazy expiry, permanent
    /// already-claimed guard, cooldown window, then submission evaluation.
    /// Every attempt, accepted or rejected, lands in the audit log.
    pub fn claim_quest(
        &self,
        quest_id: &str,
        agent_id: &str,
        submission: &str,
    ) -> Result<ClaimReceipt, WorldError> {
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
        let (keyword, reward, cooldown_seconds) = {
            let quest = world
                .quests_by_bonfire
                .get(&bonfire_id)
                .and_then(|quests| quests.get(quest_id))
                .ok_or_else(|| WorldError::NotFound("quest not found".to_string()))?;
            if quest.status != QuestStatus::Active {
                return Err(WorldError::InvalidArgument("quest is not active".to_string()));
            }
            if let Some(expires_at) = quest.expires_at {
                if now > expires_at {
                    return Err(WorldError::InvalidArgument("quest expired".to_string()));
                }
            }
            (quest.keyword.clone(), quest.reward, quest.cooldown_seconds)
        };

        if world
            .claimed_by_quest
            .get(quest_id)
            .is_some_and(|claimed| claimed.contains(agent_id))
        {
            return Err(WorldError::Conflict(
                "quest already claimed by this agent".to_string(),
            ));
        }

        let cooldown_key = claim_key(quest_id, agent_id);
        if let Some(last_claim) = world.last_claim_at.get(&cooldown_key) {
            let elapsed = now.signed_duration_since(*last_claim);
            if elapsed < Duration::seconds(cooldown_seconds as i64) {
                return Err(WorldError::PermissionDenied(
                    "claim is in cooldown window".to_string(),
                ));
            }
        }

        let verdict = evaluate_submission(&keyword, submission);
        let reward_granted = match verdict {
            Verdict::Accepted => reward,
            Verdict::Rejected => 0,
        };

        if verdict == Verdict::Accepted {
            if let Some(player) = world.players_by_agent.get_mut(agent_id) {
                player.bonus_quota += reward_granted;
                if player.remaining_episodes() > 0 {
                    player.is_active = true;
                }
            }
            world
                .claimed_by_quest
                .entry(quest_id.to_string())
                .or_default()
                .insert(agent_id.to_string());
            world.last_claim_at.insert(cooldown_key, now);
            world
                .ledger_by_agent
                .entry(agent_id.to_string())
                .or_default()
                .push(LedgerEntry::credit("quest_reward", reward_granted).with_quest(quest_id));
        }

        world.attempts.push(AttemptRecord {
            quest_id: quest_id.to_string(),
            agent_id: agent_id.to_string(),
            submission: submission.to_string(),
            verdict,
            reward_granted,
            created_at: now,
        });

        let (remaining_episodes, is_active) = world
            .players_by_agent
            .get(agent_id)
            .map(|p| (p.remaining_episodes(), p.is_active))
            .unwrap_or((0, false));
        let receipt = ClaimReceipt {
            quest_id: quest_id.to_string(),
            agent_id: agent_id.to_string(),
            verdict,
            reward_granted,
            remaining_episodes,
            is_active,
        };
        world.push_event(
            &bonfire_id,
            "quest_claimed",
            json!({
                "quest_id": quest_id,
                "agent_id": agent_id,
                "verdict": verdict.as_str(),
                "reward_granted": reward_granted,
            }),
        );
        self.persist(&world)?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::tests::{register_test_agent, setup_test_store};
    use crate::game::state::WorldStore;

    fn create_test_quest(store: &WorldStore, keyword: &str, reward: i64, cooldown: i64) -> QuestRecord {
        store
            .create_quest("bonfire-1", "0xowner", "riddle", "prove it", keyword, reward, cooldown, None)
            .expect("quest")
    }

    #[test]
    fn submission_evaluation_rules() {
        assert_eq!(evaluate_submission("", "short"), Verdict::Rejected);
        assert_eq!(evaluate_submission("", "  padded but long enough  "), Verdict::Accepted);
        assert_eq!(
            evaluate_submission("artifact", "a long submission without the word"),
            Verdict::Rejected
        );
        assert_eq!(
            evaluate_submission("artifact", "I located an ARTIFACT in the ruins"),
            Verdict::Accepted
        );
    }

    #[test]
    fn create_quest_validates_reward_and_cooldown() {
        let (_dir, store) = setup_test_store();
        assert!(matches!(
            store
                .create_quest("bonfire-1", "0xowner", "riddle", "p", "k", 0, 0, None)
                .unwrap_err(),
            WorldError::InvalidArgument(_)
        ));
        assert!(matches!(
            store
                .create_quest("bonfire-1", "0xowner", "riddle", "p", "k", 1, -1, None)
                .unwrap_err(),
            WorldError::InvalidArgument(_)
        ));
        // Zero and negative ttl mean no expiry.
        let quest = store
            .create_quest("bonfire-1", "0xowner", "riddle", "p", "k", 1, 0, Some(0))
            .expect("quest");
        assert!(quest.expires_at.is_none());
    }

    #[test]
    fn accepted_claim_pays_reward_and_logs_ledger() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);
        let quest = create_test_quest(&store, "artifact", 2, 60);

        let receipt = store
            .claim_quest(&quest.quest_id, "agent-1", "I located an artifact in the ruins")
            .expect("claim");
        assert_eq!(receipt.verdict, Verdict::Accepted);
        assert_eq!(receipt.reward_granted, 2);
        assert_eq!(receipt.remaining_episodes, 4);

        let player = store.get_player("agent-1").expect("player");
        assert_eq!(player.bonus_quota, 2);

        let ledger = store.ledger_for("agent-1");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].reason, "quest_reward");
        assert_eq!(ledger[0].quest_id.as_deref(), Some(quest.quest_id.as_str()));

        let attempts = store.attempts_for_quest(&quest.quest_id);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].verdict, Verdict::Accepted);
    }

    #[test]
    fn second_claim_after_success_conflicts_regardless_of_submission() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);
        let quest = create_test_quest(&store, "artifact", 1, 0);

        store
            .claim_quest(&quest.quest_id, "agent-1", "the artifact is found at last")
            .expect("first claim");
        let err = store
            .claim_quest(&quest.quest_id, "agent-1", "another artifact submission here")
            .unwrap_err();
        assert!(matches!(err, WorldError::Conflict(_)));
    }

    #[test]
    fn rejected_claim_leaves_slot_open_and_no_cooldown() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);
        let quest = create_test_quest(&store, "artifact", 1, 3600);

        let rejected = store
            .claim_quest(&quest.quest_id, "agent-1", "too short")
            .expect("rejected claim is not an error");
        assert_eq!(rejected.verdict, Verdict::Rejected);
        assert_eq!(rejected.reward_granted, 0);

        // Resubmission succeeds immediately: no cooldown stamp, no claim slot.
        let accepted = store
            .claim_quest(&quest.quest_id, "agent-1", "this time the artifact is described")
            .expect("retry");
        assert_eq!(accepted.verdict, Verdict::Accepted);

        let attempts = store.attempts_for_quest(&quest.quest_id);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].reward_granted, 0);
    }

    #[test]
    fn cooldown_window_blocks_claims() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);
        let quest = create_test_quest(&store, "", 1, 3600);

        // Stamp a recent claim without consuming the slot; only the cooldown
        // check can fire then.
        {
            let mut world = store.world();
            world
                .last_claim_at
                .insert(claim_key(&quest.quest_id, "agent-1"), Utc::now());
        }
        let err = store
            .claim_quest(&quest.quest_id, "agent-1", "a perfectly valid submission")
            .unwrap_err();
        assert!(matches!(err, WorldError::PermissionDenied(ref m) if m == "claim is in cooldown window"));

        // An old stamp outside the window does not block.
        {
            let mut world = store.world();
            world.last_claim_at.insert(
                claim_key(&quest.quest_id, "agent-1"),
                Utc::now() - Duration::seconds(7200),
            );
        }
        store
            .claim_quest(&quest.quest_id, "agent-1", "a perfectly valid submission")
            .expect("claim after cooldown");
    }

    #[test]
    fn expired_quest_rejects_claims_lazily() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 2);
        let quest = create_test_quest(&store, "", 1, 0);
        {
            let mut world = store.world();
            let stored = world
                .quests_by_bonfire
                .get_mut("bonfire-1")
                .and_then(|m| m.get_mut(&quest.quest_id))
                .expect("quest");
            stored.expires_at = Some(Utc::now() - Duration::seconds(5));
        }
        let err = store
            .claim_quest(&quest.quest_id, "agent-1", "a perfectly valid submission")
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(ref m) if m == "quest expired"));
        // Status stays active on the record; expiry is evaluated per claim.
        let state = store.bonfire_state("bonfire-1");
        assert_eq!(state.quests[0].status, QuestStatus::Active);
    }

    #[test]
    fn claim_reactivates_exhausted_player() {
        let (_dir, store) = setup_test_store();
        register_test_agent(&store, "agent-1", 1);
        store.run_turn("agent-1", "spend it").expect("turn");
        assert!(!store.get_player("agent-1").expect("player").is_active);

        let quest = create_test_quest(&store, "", 2, 0);
        let receipt = store
            .claim_quest(&quest.quest_id, "agent-1", "a perfectly valid submission")
            .expect("claim");
        assert!(receipt.is_active);
        assert_eq!(receipt.remaining_episodes, 2);
    }

    #[test]
    fn claim_requires_registered_agent_and_known_quest() {
        let (_dir, store) = setup_test_store();
        assert!(matches!(
            store.claim_quest("nope", "ghost", "whatever here").unwrap_err(),
            WorldError::NotFound(_)
        ));
        register_test_agent(&store, "agent-1", 1);
        assert!(matches!(
            store.claim_quest("nope", "agent-1", "whatever here").unwrap_err(),
            WorldError::NotFound(_)
        ));
    }
}
