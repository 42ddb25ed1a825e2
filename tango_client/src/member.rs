//! Room members.
//!
//! A member is identified by display name, case-insensitively. One user may
//! hold several simultaneous client sessions (browser tabs); the member is
//! present in the room for as long as at least one client remains. Member
//! records are never deleted, only marked absent by emptying their client
//! map, so moderator state survives rejoins.

use std::collections::HashMap;

use tango_proto::ModFlags;

const AVATAR_URL: &str = "http://fp.chatango.com/profileimg";

#[derive(Debug, Clone, Default)]
pub struct Member {
    name: String,
    /// client session id -> join time
    clients: HashMap<u64, f64>,
    flags: ModFlags,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_flags(name: impl Into<String>, flags: ModFlags) -> Self {
        Self {
            name: name.into(),
            clients: HashMap::new(),
            flags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive identity comparison.
    pub fn is_named(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }

    pub fn flags(&self) -> ModFlags {
        self.flags
    }

    pub fn is_mod(&self) -> bool {
        !self.flags.is_empty()
    }

    /// Present iff at least one client session remains.
    pub fn joined(&self) -> bool {
        !self.clients.is_empty()
    }

    /// Earliest join time across clients, or 0 when absent.
    pub fn join_time(&self) -> f64 {
        self.clients
            .values()
            .copied()
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_client(&self, client_id: u64) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn add_client(&mut self, client_id: u64, join_time: f64) {
        self.clients.insert(client_id, join_time);
    }

    pub fn remove_client(&mut self, client_id: u64) {
        self.clients.remove(&client_id);
    }

    pub fn clear_clients(&mut self) {
        self.clients.clear();
    }

    /// Replace the moderation flags. Zero demotes.
    pub fn promote(&mut self, flags: ModFlags) {
        self.flags = flags;
    }

    /// Location of the member's avatar image.
    pub fn avatar_url(&self) -> String {
        let name = self.name.to_lowercase();
        let mut chars = name.chars();
        let first = chars.next().unwrap_or('_');
        let second = chars.next().unwrap_or(first);
        format!("{AVATAR_URL}/{first}/{second}/{name}/full.jpg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_case_insensitive() {
        let member = Member::new("SomeUser");
        assert!(member.is_named("someuser"));
        assert!(member.is_named("SOMEUSER"));
        assert!(!member.is_named("other"));
    }

    #[test]
    fn present_while_any_client_remains() {
        let mut member = Member::new("user");
        assert!(!member.joined());
        member.add_client(1, 100.0);
        member.add_client(2, 200.0);
        member.remove_client(1);
        assert!(member.joined());
        member.remove_client(2);
        assert!(!member.joined());
    }

    #[test]
    fn promotion_and_demotion() {
        let mut member = Member::new("user");
        assert!(!member.is_mod());
        member.promote(tango_proto::ModFlags::MODERATOR);
        assert!(member.is_mod());
        member.promote(tango_proto::ModFlags::empty());
        assert!(!member.is_mod());
    }

    #[test]
    fn avatar_url_shape() {
        let member = Member::new("Ab");
        assert_eq!(
            member.avatar_url(),
            "http://fp.chatango.com/profileimg/a/b/ab/full.jpg"
        );
        let single = Member::new("x");
        assert_eq!(
            single.avatar_url(),
            "http://fp.chatango.com/profileimg/x/x/x/full.jpg"
        );
    }
}
