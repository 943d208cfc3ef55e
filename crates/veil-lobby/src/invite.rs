//! Pending friend calls.

use std::collections::HashMap;
use std::time::Instant;

use veil_protocol::ClientId;

/// A friend call that is ringing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub caller: ClientId,
    pub caller_name: String,
    pub callee: ClientId,
    pub created_at: Instant,
    /// Distinguishes this invite from a later one between the same pair,
    /// so a stale expiry timer cannot withdraw a fresh call.
    pub serial: u64,
}

/// Index of pending invites.
///
/// A client holds at most one incoming and one outgoing invite, and
/// never both at once. Both directions are indexed so disconnect cleanup
/// is a pair of lookups.
#[derive(Debug, Default)]
pub struct InviteBook {
    by_callee: HashMap<ClientId, Invite>,
    by_caller: HashMap<ClientId, ClientId>,
    next_serial: u64,
}

impl InviteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new invite. The caller checks the uniqueness rules first.
    pub(crate) fn insert(
        &mut self,
        caller: ClientId,
        caller_name: String,
        callee: ClientId,
    ) -> Invite {
        self.next_serial += 1;
        let invite = Invite {
            caller: caller.clone(),
            caller_name,
            callee: callee.clone(),
            created_at: Instant::now(),
            serial: self.next_serial,
        };
        self.by_caller.insert(caller, callee.clone());
        self.by_callee.insert(callee, invite.clone());
        invite
    }

    /// The invite currently ringing at `callee`.
    pub fn incoming(&self, callee: &ClientId) -> Option<&Invite> {
        self.by_callee.get(callee)
    }

    /// The invite `caller` currently has outstanding.
    pub fn outgoing(&self, caller: &ClientId) -> Option<&Invite> {
        self.by_caller
            .get(caller)
            .and_then(|callee| self.by_callee.get(callee))
    }

    /// Removes the invite from `caller` to `callee`, if that exact pair
    /// is pending.
    pub(crate) fn take(&mut self, caller: &ClientId, callee: &ClientId) -> Option<Invite> {
        match self.by_callee.get(callee) {
            Some(invite) if &invite.caller == caller => {}
            _ => return None,
        }
        self.by_caller.remove(caller);
        self.by_callee.remove(callee)
    }

    /// Removes the invite ringing at `callee`.
    pub(crate) fn take_incoming(&mut self, callee: &ClientId) -> Option<Invite> {
        let invite = self.by_callee.remove(callee)?;
        self.by_caller.remove(&invite.caller);
        Some(invite)
    }

    /// Removes the invite placed by `caller`.
    pub(crate) fn take_outgoing(&mut self, caller: &ClientId) -> Option<Invite> {
        let callee = self.by_caller.remove(caller)?;
        self.by_callee.remove(&callee)
    }

    pub fn len(&self) -> usize {
        self.by_callee.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_callee.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(id: &str) -> ClientId {
        ClientId::from(id)
    }

    #[test]
    fn test_insert_indexes_both_directions() {
        let mut book = InviteBook::new();
        let invite = book.insert(cid("a"), "Ann".into(), cid("b"));

        assert_eq!(book.incoming(&cid("b")), Some(&invite));
        assert_eq!(book.outgoing(&cid("a")), Some(&invite));
        assert!(book.incoming(&cid("a")).is_none());
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_serials_increase() {
        let mut book = InviteBook::new();
        let first = book.insert(cid("a"), "Ann".into(), cid("b"));
        book.take(&cid("a"), &cid("b"));
        let second = book.insert(cid("a"), "Ann".into(), cid("b"));
        assert!(second.serial > first.serial);
    }

    #[test]
    fn test_take_wrong_caller_leaves_invite() {
        let mut book = InviteBook::new();
        book.insert(cid("a"), "Ann".into(), cid("b"));

        assert!(book.take(&cid("x"), &cid("b")).is_none());
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_take_incoming_clears_caller_index() {
        let mut book = InviteBook::new();
        book.insert(cid("a"), "Ann".into(), cid("b"));

        let invite = book.take_incoming(&cid("b")).unwrap();
        assert_eq!(invite.caller, cid("a"));
        assert!(book.outgoing(&cid("a")).is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn test_take_outgoing_clears_callee_index() {
        let mut book = InviteBook::new();
        book.insert(cid("a"), "Ann".into(), cid("b"));

        assert!(book.take_outgoing(&cid("a")).is_some());
        assert!(book.incoming(&cid("b")).is_none());
        assert!(book.take_outgoing(&cid("a")).is_none());
    }
}
