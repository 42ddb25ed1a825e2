//! Posts: messages reconstructed from the wire.
//!
//! A live post (`b`) carries only a provisional sequence number; its
//! durable id arrives separately (`u`) and the two are joined by the room
//! session. History posts (`i`) carry the durable id directly. Direct
//! messages and announcements use reduced layouts.

use crate::member::Member;
use tango_proto::format::{self, Badge, Channel, PostFormat};
use tango_proto::ident;

#[derive(Debug, Clone)]
pub struct Post {
    /// Unix timestamp the server attached
    pub time: f64,
    /// Body text with markup flattened out
    pub body: String,
    /// Author display name; `!anonNNNN` for anons, `#name` for temp names
    pub user: String,
    /// Session id of the sending client
    pub user_id: u64,
    /// Author identifier used for delete-all targeting
    pub mod_id: String,
    /// Durable server-assigned id, once known
    pub id: Option<String>,
    /// Short-lived number used only to correlate with the durable id
    pub provisional: Option<String>,
    /// IP the post was sent from, when visible
    pub ip: String,
    pub channel: Channel,
    pub badge: Badge,
    pub format: PostFormat,
    /// `@name` tokens found in the body
    pub mentions: Vec<String>,
    /// For announcement queries: whether the announcement is enabled
    pub enabled: Option<bool>,
    /// For announcement queries: repeat period in seconds
    pub duration: Option<u32>,
}

impl Post {
    /// Resolved once it carries the durable id.
    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }

    fn base(args: &[String], members: &[Member]) -> Self {
        let raw_body = join_from(args, 9);
        let mut fmt = format::parse_format(args.get(9).map_or("", String::as_str));

        let user_id = parse_u64(args.get(3));
        let mut user = args.get(1).cloned().unwrap_or_default();
        if user.is_empty() {
            let temp = args.get(2).map_or("", String::as_str);
            if !temp.is_empty() {
                user = format!("#{temp}");
            } else {
                let session = args.get(3).map_or("", String::as_str);
                user = format!("!anon{}", ident::anon_id(&fmt.name_color, session));
            }
            // The name color feeds an anon's number, not their display
            fmt.name_color.clear();
        } else if let Some(member) = members.iter().find(|m| m.is_named(&user)) {
            user = member.name().to_string();
        }

        let packed = parse_u64(args.get(7)) as u32;
        let (badge, channel) = format::unpack_channel_badge(packed);

        Self {
            time: parse_f64(args.first()),
            body: format::format_body(&raw_body),
            user,
            user_id,
            mod_id: args.get(4).cloned().unwrap_or_default(),
            id: None,
            provisional: None,
            ip: args.get(6).cloned().unwrap_or_default(),
            channel,
            badge,
            format: fmt,
            mentions: extract_mentions(&raw_body),
            enabled: None,
            duration: None,
        }
    }

    /// A live post from a `b` command. Provisional number in field 5.
    pub fn live(args: &[String], members: &[Member]) -> Self {
        let mut post = Self::base(args, members);
        post.provisional = args.get(5).cloned();
        post
    }

    /// A backfilled post from an `i` command. Durable id in field 5.
    pub fn history(args: &[String], members: &[Member]) -> Self {
        let mut post = Self::base(args, members);
        post.id = args.get(5).cloned();
        post
    }

    /// A recurring announcement (`annc`), or the reply to an announcement
    /// query (`getannc`) which additionally carries state and period.
    pub fn announcement(args: &[String], room: &str, query_reply: bool) -> Self {
        let start = if query_reply { 4 } else { 2 };
        let raw_body = join_from(args, start);
        let fmt = format::parse_format(args.get(start).map_or("", String::as_str));

        Self {
            time: 0.0,
            body: format::format_body(&raw_body),
            user: room.to_string(),
            user_id: 0,
            mod_id: String::new(),
            id: None,
            provisional: None,
            ip: String::new(),
            channel: Channel::None,
            badge: Badge::None,
            format: fmt,
            mentions: Vec::new(),
            enabled: query_reply.then(|| parse_u64(args.first()) != 0),
            duration: query_reply.then(|| parse_u64(args.get(3)) as u32),
        }
    }

    /// A direct message (`msg`/`msgoff`).
    pub fn private(args: &[String]) -> Self {
        let raw_body = join_from(args, 5);
        let fmt = format::parse_format(args.get(5).map_or("", String::as_str));

        Self {
            time: parse_f64(args.get(3)),
            body: format::format_body(&raw_body),
            user: args.first().cloned().unwrap_or_default(),
            user_id: 0,
            mod_id: String::new(),
            id: None,
            provisional: None,
            ip: String::new(),
            channel: Channel::None,
            badge: Badge::None,
            format: fmt,
            mentions: extract_mentions(&raw_body),
            enabled: None,
            duration: None,
        }
    }
}

fn join_from(args: &[String], from: usize) -> String {
    if from >= args.len() {
        return String::new();
    }
    args[from..].join(":")
}

fn parse_u64(field: Option<&String>) -> u64 {
    field.and_then(|f| f.parse().ok()).unwrap_or(0)
}

fn parse_f64(field: Option<&String>) -> f64 {
    field.and_then(|f| f.parse().ok()).unwrap_or(0.0)
}

/// Collect the `@name` tokens from a message body.
fn extract_mentions(body: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    let mut rest = body;
    while let Some(at) = rest.find('@') {
        rest = &rest[at + 1..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    mentions
}
