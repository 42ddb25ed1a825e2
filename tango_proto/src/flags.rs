//! Permission flag domains.
//!
//! Two bitmask domains share the same discipline: group settings
//! ([`GroupFlags`]) and per-moderator permissions ([`ModFlags`]). Each
//! carries an implication table (setting one bit forces others) and a
//! human-readable name per understood bit. Bits the client does not
//! understand are reported as an explicit unknown-flag marker rather than
//! being hidden, so newer server bits stay visible.

use std::fmt;
use std::ops::{BitAnd, BitOr};

const UNKNOWN_FLAG: &str = "(unknown flag)";

fn explain_bits(value: u32, table: &[Option<&'static str>]) -> Vec<String> {
    let mut out = Vec::new();
    for (position, name) in table.iter().enumerate() {
        if value & (1 << position) == 0 {
            continue;
        }
        out.push(name.unwrap_or(UNKNOWN_FLAG).to_string());
    }
    out
}

fn with_implied(flag: u32, implies: &[(u32, u32)]) -> u32 {
    let mut out = flag;
    for &(source, implied) in implies {
        if flag & source != 0 {
            out |= implied;
        }
    }
    out
}

/// Compute the `(set, clear)` masks for a flag-update command from a list
/// of `(desired, flag)` candidates, applying implications.
///
/// In `radio` mode the candidates are mutually exclusive: the first true
/// candidate is set and every other candidate is cleared, like a radio
/// button group.
fn update_masks(candidates: &[(bool, u32)], radio: bool, implies: &[(u32, u32)]) -> (u32, u32) {
    let mut set = 0_u32;
    let mut clear = 0_u32;
    let mut chosen = None;

    for &(desired, flag) in candidates {
        let flag = with_implied(flag, implies);
        if radio {
            if desired && chosen.is_none() {
                chosen = Some(flag);
            } else {
                clear |= flag;
            }
            continue;
        }
        if desired {
            set |= flag;
            clear &= !flag;
        } else {
            clear |= flag;
            set &= !flag;
        }
    }

    if radio {
        set = chosen.unwrap_or(0);
    }
    (set, clear)
}

macro_rules! flag_domain_common {
    ($name:ident, $explain:ident, $implies:ident) => {
        impl $name {
            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Set `flag` and everything it implies.
            pub fn set(&mut self, flag: Self) {
                self.0 |= with_implied(flag.0, $implies);
            }

            /// Clear `flag`, unless it is implied by another bit that is
            /// still set.
            pub fn clear(&mut self, flag: Self) {
                for &(source, implied) in $implies {
                    if self.0 & source != 0 && flag.0 & implied != 0 {
                        return;
                    }
                }
                self.0 &= !flag.0;
            }

            /// Human-readable names for every set bit. Bits without a known
            /// meaning render as the literal unknown-flag marker.
            pub fn explain(self) -> Vec<String> {
                explain_bits(self.0, &$explain)
            }

            /// `(set, clear)` masks for an update command; see
            /// [`update_masks`].
            pub fn update(candidates: &[(bool, Self)], radio: bool) -> (Self, Self) {
                let raw: Vec<(bool, u32)> =
                    candidates.iter().map(|&(d, f)| (d, f.0)).collect();
                let (set, clear) = update_masks(&raw, radio, $implies);
                (Self(set), Self(clear))
            }
        }

        impl BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitAnd for $name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

/// Group settings that moderators can change.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupFlags(pub u32);

const GROUP_EXPLAIN: [Option<&str>; 23] = [
    None,
    None,
    Some("Anons disabled"),
    None,
    Some("User counter disabled"),
    Some("Images disabled"),
    Some("Links disabled"),
    Some("Video embeds disabled"),
    None,
    None,
    Some("Send censored messages to author only"),
    Some("Slow mode active (implied by rate limit)"),
    None,
    Some("Channels disabled"),
    Some("Basic nonsense detection"),
    Some("Block repetitious messages (limits messages to 850 bytes)"),
    Some("Broadcast mode active"),
    Some("Closed without moderators"),
    None,
    // Badges are hidden by default; the next two are mutually exclusive
    Some("Force staff badges visible"),
    Some("Let mods choose badge visibility"),
    Some("Advanced nonsense detection"),
    Some("Ban proxies and vpns"),
];

const GROUP_IMPLIES: &[(u32, u32)] = &[
    (GroupFlags::BLOCK_REPETITIOUS.0, GroupFlags::BASIC_FILTER.0),
    (GroupFlags::BROADCAST.0, GroupFlags::CLOSED_WITHOUT_MODS.0),
    (GroupFlags::ADVANCED_FILTER.0, GroupFlags::BASIC_FILTER.0),
];

impl GroupFlags {
    pub const NO_ANONS: Self = Self(0x4);
    pub const NO_COUNTER: Self = Self(0x10);
    pub const NO_IMAGES: Self = Self(0x20);
    pub const NO_LINKS: Self = Self(0x40);
    pub const NO_VIDEOS: Self = Self(0x80);
    pub const CENSOR_TO_AUTHOR: Self = Self(0x400);
    pub const SLOW_MODE: Self = Self(0x800);
    pub const NO_CHANNELS: Self = Self(0x2000);
    pub const BASIC_FILTER: Self = Self(0x4000);
    pub const BLOCK_REPETITIOUS: Self = Self(0x8000);
    pub const BROADCAST: Self = Self(0x10000);
    pub const CLOSED_WITHOUT_MODS: Self = Self(0x20000);
    pub const SHOW_STAFF_BADGES: Self = Self(0x80000);
    pub const CHOOSE_BADGES: Self = Self(0x100000);
    pub const ADVANCED_FILTER: Self = Self(0x200000);
    pub const BAN_PROXIES: Self = Self(0x400000);
}

flag_domain_common!(GroupFlags, GROUP_EXPLAIN, GROUP_IMPLIES);

/// Per-moderator permission bits.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ModFlags(pub u32);

const MOD_EXPLAIN: [Option<&str>; 19] = [
    None,
    Some("Add and remove mods"),
    None,
    Some("Set banned content"),
    Some("Set chat restrictions"),
    Some("Edit group (title, MOTD, delete all)"),
    Some("Delete messages"),
    Some("Ban/unban users"),
    Some("See mod actions"),
    Some("Set auto-moderation"),
    Some("Set group announcement"),
    None,
    None,
    Some("Exempt from sending limits"),
    Some("Can see IP addresses"),
    Some("Close group input"),
    Some("Can post in broadcast mode"),
    Some("Displaying mod badge"),
    Some("Can display staff badge"),
];

const MOD_IMPLIES: &[(u32, u32)] = &[
    (ModFlags::EDIT_MODS.0, ModFlags::ADMIN.0),
    (
        ModFlags::CLOSE_INPUT.0,
        ModFlags::BROADCAST_POST.0 | ModFlags::CHAT_RESTRICTIONS.0,
    ),
];

impl ModFlags {
    pub const EDIT_MODS: Self = Self(0x2);
    pub const BANNED_CONTENT: Self = Self(0x8);
    pub const CHAT_RESTRICTIONS: Self = Self(0x10);
    pub const EDIT_GROUP: Self = Self(0x20);
    pub const DELETE_MESSAGES: Self = Self(0x40);
    pub const BAN_USERS: Self = Self(0x80);
    pub const SEE_MOD_ACTIONS: Self = Self(0x100);
    pub const AUTO_MODERATION: Self = Self(0x200);
    pub const ANNOUNCEMENT: Self = Self(0x400);
    pub const EXEMPT_FROM_LIMITS: Self = Self(0x2000);
    pub const SEE_IPS: Self = Self(0x4000);
    pub const CLOSE_INPUT: Self = Self(0x8000);
    pub const BROADCAST_POST: Self = Self(0x10000);
    pub const MOD_BADGE: Self = Self(0x20000);
    pub const STAFF_BADGE: Self = Self(0x40000);

    /// Default mask granted to a plain moderator.
    pub const MODERATOR: Self = Self(354_300);
    /// Default mask granted to an admin.
    pub const ADMIN: Self = Self(82_368);
}

flag_domain_common!(ModFlags, MOD_EXPLAIN, MOD_IMPLIES);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radio_update_keeps_first_true_candidate() {
        let candidates = [
            (true, GroupFlags::CLOSED_WITHOUT_MODS),
            (false, GroupFlags::NO_IMAGES),
            (true, GroupFlags::SHOW_STAFF_BADGES),
        ];
        let (set, clear) = GroupFlags::update(&candidates, true);
        assert!(set.intersects(GroupFlags::CLOSED_WITHOUT_MODS));
        assert!(!set.intersects(GroupFlags::SHOW_STAFF_BADGES));
        assert!(clear.intersects(GroupFlags::NO_IMAGES));
        assert!(clear.intersects(GroupFlags::SHOW_STAFF_BADGES));
    }

    #[test]
    fn radio_update_with_no_true_candidate_sets_nothing() {
        let (set, clear) = GroupFlags::update(
            &[(false, GroupFlags::BROADCAST), (false, GroupFlags::NO_ANONS)],
            true,
        );
        assert!(set.is_empty());
        assert!(!clear.is_empty());
    }

    #[test]
    fn update_applies_implications() {
        let (set, _) = GroupFlags::update(&[(true, GroupFlags::ADVANCED_FILTER)], false);
        assert!(set.intersects(GroupFlags::BASIC_FILTER));

        let (_, clear) = GroupFlags::update(&[(false, GroupFlags::BLOCK_REPETITIOUS)], false);
        assert!(clear.intersects(GroupFlags::BASIC_FILTER));
    }

    #[test]
    fn set_forces_implied_bits() {
        let mut flags = ModFlags::empty();
        flags.set(ModFlags::EDIT_MODS);
        assert!(flags.intersects(ModFlags::ADMIN));
    }

    #[test]
    fn clear_respects_implications() {
        let mut flags = GroupFlags::BROADCAST | GroupFlags::CLOSED_WITHOUT_MODS;
        // Implied by broadcast mode, so refuses to clear
        flags.clear(GroupFlags::CLOSED_WITHOUT_MODS);
        assert!(flags.intersects(GroupFlags::CLOSED_WITHOUT_MODS));

        let mut flags = GroupFlags::CLOSED_WITHOUT_MODS;
        flags.clear(GroupFlags::CLOSED_WITHOUT_MODS);
        assert!(flags.is_empty());
    }

    #[test]
    fn unknown_bits_surface_as_unknown_marker() {
        let explained = GroupFlags(0x1 | 0x4).explain();
        assert_eq!(explained, vec!["(unknown flag)", "Anons disabled"]);
    }

    #[test]
    fn explain_names_known_bits() {
        let explained = ModFlags(ModFlags::DELETE_MESSAGES.0 | ModFlags::BAN_USERS.0).explain();
        assert_eq!(explained, vec!["Delete messages", "Ban/unban users"]);
    }
}
