//! The waiting pool for random pairing.

use std::collections::VecDeque;

use veil_presence::PresenceRegistry;
use veil_protocol::ClientId;

/// Clients waiting for a random partner, in arrival order.
#[derive(Debug, Default)]
pub struct WaitingPool {
    entries: VecDeque<ClientId>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a client unless it is already waiting.
    pub fn enqueue(&mut self, client_id: ClientId) -> bool {
        if self.entries.contains(&client_id) {
            return false;
        }
        self.entries.push_back(client_id);
        true
    }

    /// Removes a client. Returns `true` if it was waiting.
    pub fn remove(&mut self, client_id: &ClientId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|id| id != client_id);
        self.entries.len() != before
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.entries.contains(client_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Selects the best partner for `seeker` and removes it from the pool.
    ///
    /// Entries that are no longer registered or no longer available are
    /// pruned first. Among the remaining candidates (never `seeker`
    /// itself), the one with the smallest age difference wins when the
    /// seeker and at least one candidate declared an age; ties and all
    /// other cases fall back to arrival order.
    pub fn take_partner(
        &mut self,
        presence: &PresenceRegistry,
        seeker: &ClientId,
    ) -> Option<ClientId> {
        self.entries.retain(|id| presence.is_available(id));

        let seeker_age = presence.get(seeker).and_then(|h| h.age());
        let mut first_eligible: Option<usize> = None;
        let mut closest: Option<(usize, u8)> = None;

        for (idx, id) in self.entries.iter().enumerate() {
            if id == seeker {
                continue;
            }
            first_eligible.get_or_insert(idx);

            let candidate_age = presence.get(id).and_then(|h| h.age());
            if let (Some(mine), Some(theirs)) = (seeker_age, candidate_age) {
                let diff = mine.abs_diff(theirs);
                // Strict `<` keeps the earlier arrival on ties.
                if closest.is_none_or(|(_, best)| diff < best) {
                    closest = Some((idx, diff));
                }
            }
        }

        let chosen = closest.map(|(idx, _)| idx).or(first_eligible)?;
        self.entries.remove(chosen)
    }
}
