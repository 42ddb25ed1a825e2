//! The moderation data model: bans and the moderation log.

use serde_json::Value;
use strum::EnumString;

use crate::member::Member;
use tango_proto::{GroupFlags, ModFlags};

/// A ban record. Immutable once constructed; the ban list is rebuilt
/// wholesale from a `blocklist` response and appended to on live events.
#[derive(Debug, Clone)]
pub struct Ban {
    /// User the ban applies to
    pub target: String,
    /// IP the user was posting from
    pub ip: String,
    /// Message unique id the ban was issued from
    pub id: String,
    /// Responsible moderator, canonical name when resolvable
    pub moderator: Option<String>,
    pub time: f64,
}

impl Ban {
    /// Build a ban from `(id, ip, target, moderator, time)` fields,
    /// resolving the moderator against the current moderator set. Records
    /// without a target are meaningless and rejected.
    pub fn new(
        id: &str,
        ip: &str,
        target: &str,
        moderator: &str,
        time: &str,
        mods: &[&Member],
    ) -> Option<Self> {
        if target.is_empty() {
            return None;
        }
        let moderator = if moderator.is_empty() {
            None
        } else {
            Some(
                mods.iter()
                    .find(|m| m.is_named(moderator))
                    .map_or_else(|| moderator.to_string(), |m| m.name().to_string()),
            )
        };
        Some(Self {
            target: target.to_string(),
            ip: ip.to_string(),
            id: id.to_string(),
            moderator,
            time: time.parse().unwrap_or(0.0),
        })
    }
}

/// Action codes appearing in the moderation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ModAction {
    /// Group flags changed (two embedded bitmasks)
    Enlp,
    /// Staff badges hidden
    Hidi,
    /// Mods allowed to choose badges
    Chsi,
    /// Mods forced to show badges
    Shwi,
    /// Announcement enabled/disabled
    Annc,
    /// Proxy/VPN posting toggled
    Prxy,
    /// Rate limit set
    Chrl,
    /// Close without moderators
    Cinm,
    /// Broadcast mode
    Brdc,
    /// Anons toggled
    Anon,
    /// Channels toggled
    Chan,
    /// A moderator's permissions changed (two embedded bitmasks)
    Emod,
    /// Admin promotion
    Aadm,
    /// Moderator promotion
    Amod,
    /// Group title/MOTD edited
    Egrp,
    /// Counter toggled
    Cntr,
    /// Banned words updated
    Chbw,
    /// Auto-closed without moderators
    Acls,
    /// Auto-opened on moderator login
    Aopn,
}

/// One decoded moderation-log record.
#[derive(Debug, Clone)]
pub struct ModLogEntry {
    /// Log entry id. Unrelated to post or ban ids.
    pub id: String,
    /// The raw mnemonic, kept for forward compatibility
    pub mnemonic: String,
    pub action: Option<ModAction>,
    /// Responsible moderator, canonical name when resolvable
    pub moderator: Option<String>,
    pub ip: Option<String>,
    pub target: Option<String>,
    pub time: f64,
    /// Opaque structured arguments; shape depends on the action
    pub args: Value,
}

impl ModLogEntry {
    /// Decode one `,`-delimited record from a `getmodactions` batch.
    pub fn parse(record: &str, mods: &[&Member]) -> Option<Self> {
        let fields: Vec<&str> = record.split(',').collect();
        if fields.len() < 8 {
            tracing::debug!(record, "short modlog record");
            return None;
        }

        let moderator = match fields[2] {
            "None" | "" => None,
            name => Some(
                mods.iter()
                    .find(|m| m.is_named(name))
                    .map_or_else(|| name.to_string(), |m| m.name().to_string()),
            ),
        };

        // The argument blob is JSON and may itself contain commas
        let raw_args = fields[7..].join(",");

        Some(Self {
            id: fields[0].to_string(),
            mnemonic: fields[1].to_string(),
            action: fields[1].parse().ok(),
            moderator,
            ip: (fields[3] != "None").then(|| fields[3].to_string()),
            target: (fields[4] != "None").then(|| fields[4].to_string()),
            time: fields[5].parse().unwrap_or(0.0),
            args: serde_json::from_str(&raw_args).unwrap_or(Value::Null),
        })
    }

    /// Human-readable explanation of the action, derived from the
    /// mnemonic. Unknown mnemonics get the literal fallback text.
    pub fn describe(&self) -> String {
        let Some(action) = self.action else {
            return "no explanation found".to_string();
        };

        let moderator = self.moderator.as_deref().unwrap_or("(unknown)");
        let target = self.target.as_deref().unwrap_or("(unknown)");

        match action {
            ModAction::Enlp => {
                let enabled = GroupFlags(arg_u32(&self.args, 0));
                let disabled = GroupFlags(arg_u32(&self.args, 1));
                format!(
                    "Changed group flags:\nEnabled: {}\nDisabled: {}",
                    enabled.explain().join(", "),
                    disabled.explain().join(", ")
                )
            }
            ModAction::Hidi => "Hid staff badges".to_string(),
            ModAction::Chsi => "Allowed mods to choose badges".to_string(),
            ModAction::Shwi => "Forced mods to show badges".to_string(),
            ModAction::Annc => {
                if arg_str(&self.args, 1) != "0" {
                    format!(
                        "Set announcement repeating every {} seconds: {}",
                        arg_str(&self.args, 1),
                        urlencoding::decode(&arg_str(&self.args, 2))
                            .map_or_else(|_| arg_str(&self.args, 2), |s| s.into_owned())
                    )
                } else {
                    "Disabled announcement".to_string()
                }
            }
            ModAction::Prxy => {
                format!("{} posting from proxies and VPNs", allowed(&self.args))
            }
            ModAction::Chrl => {
                let seconds = self.args.as_u64().unwrap_or(0);
                if seconds > 0 {
                    format!("Set rate limit:\n{seconds} seconds")
                } else {
                    "Set rate limit:\nFlood-controlled".to_string()
                }
            }
            ModAction::Cinm => "Set group to close without moderators".to_string(),
            ModAction::Brdc => "Set group to broadcast mode".to_string(),
            ModAction::Anon => format!("{} anons", allowed(&self.args)),
            ModAction::Chan => format!("{} channels", allowed(&self.args)),
            ModAction::Emod => {
                let enabled = ModFlags(arg_u32(&self.args, 0));
                let disabled = ModFlags(arg_u32(&self.args, 1));
                format!(
                    "Changed {moderator}'s permissions:\nEnabled: {}\nDisabled: {}",
                    enabled.explain().join(", "),
                    disabled.explain().join(", ")
                )
            }
            ModAction::Aadm => format!("Made {target} an admin"),
            ModAction::Amod => format!("Made {target} a moderator"),
            ModAction::Egrp => "Edited group title/MOTD".to_string(),
            ModAction::Cntr => {
                format!(
                    "Counter {}",
                    if truthy(&self.args) { "enabled" } else { "disabled" }
                )
            }
            ModAction::Chbw => "Updated banned words".to_string(),
            ModAction::Acls => "Room closed because no moderators".to_string(),
            ModAction::Aopn => "Room opened upon moderator login".to_string(),
        }
    }
}

fn arg_u32(args: &Value, index: usize) -> u32 {
    match args.get(index) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn arg_str(args: &Value, index: usize) -> String {
    match args.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn allowed(args: &Value) -> &'static str {
    if truthy(args) {
        "Allowed"
    } else {
        "Disallowed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_with_empty_target_is_discarded() {
        assert!(Ban::new("id", "1.2.3.4", "", "mod", "100.0", &[]).is_none());
    }

    #[test]
    fn ban_moderator_resolution_is_case_insensitive() {
        let member = Member::new("TheMod");
        let mods = [&member];
        let ban = Ban::new("id", "1.2.3.4", "target", "themod", "100.0", &mods).unwrap();
        assert_eq!(ban.moderator.as_deref(), Some("TheMod"));

        let unresolved = Ban::new("id", "1.2.3.4", "target", "ghost", "100.0", &mods).unwrap();
        assert_eq!(unresolved.moderator.as_deref(), Some("ghost"));
    }

    #[test]
    fn modlog_record_parses() {
        let entry = ModLogEntry::parse("55,amod,boss,None,newmod,1650000000.0,x,null", &[]).unwrap();
        assert_eq!(entry.id, "55");
        assert_eq!(entry.action, Some(ModAction::Amod));
        assert_eq!(entry.moderator.as_deref(), Some("boss"));
        assert_eq!(entry.ip, None);
        assert_eq!(entry.target.as_deref(), Some("newmod"));
        assert_eq!(entry.describe(), "Made newmod a moderator");
    }

    #[test]
    fn unknown_mnemonic_has_fallback_text() {
        let entry = ModLogEntry::parse("1,zzzz,None,None,None,0,x,null", &[]).unwrap();
        assert_eq!(entry.action, None);
        assert_eq!(entry.describe(), "no explanation found");
        // Raw mnemonic kept for the caller
        assert_eq!(entry.mnemonic, "zzzz");
    }

    #[test]
    fn short_record_rejected() {
        assert!(ModLogEntry::parse("1,amod,None", &[]).is_none());
    }

    #[test]
    fn enlp_renders_both_bitmasks() {
        let record = format!(
            "9,enlp,boss,None,None,0,x,[{},{}]",
            GroupFlags::NO_IMAGES.bits(),
            GroupFlags::NO_ANONS.bits()
        );
        let entry = ModLogEntry::parse(&record, &[]).unwrap();
        let text = entry.describe();
        assert!(text.contains("Enabled: Images disabled"));
        assert!(text.contains("Disabled: Anons disabled"));
    }

    #[test]
    fn rate_limit_descriptions() {
        let limited = ModLogEntry::parse("1,chrl,m,None,None,0,x,10", &[]).unwrap();
        assert_eq!(limited.describe(), "Set rate limit:\n10 seconds");
        let flood = ModLogEntry::parse("1,chrl,m,None,None,0,x,0", &[]).unwrap();
        assert_eq!(flood.describe(), "Set rate limit:\nFlood-controlled");
    }

    #[test]
    fn announcement_descriptions() {
        let set = ModLogEntry::parse("1,annc,m,None,None,0,x,[1,\"30\",\"hello%20there\"]", &[])
            .unwrap();
        assert_eq!(
            set.describe(),
            "Set announcement repeating every 30 seconds: hello there"
        );
        let off = ModLogEntry::parse("1,annc,m,None,None,0,x,[1,\"0\",\"\"]", &[]).unwrap();
        assert_eq!(off.describe(), "Disabled announcement");
    }
}
