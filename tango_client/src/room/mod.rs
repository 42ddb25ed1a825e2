//! A joined room: one connection plus the state machine that interprets
//! room-scoped commands.
//!
//! The state lives behind a mutex shared by the inbound task and the
//! public handle. Handlers never await while holding the lock, so every
//! mutation is atomic between suspension points.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

use crate::connection::Connection;
use crate::error::{ClientError, ValidationError};
use crate::event::{ClientEvent, RoomEvent, Subscribers};
use crate::member::Member;
use crate::moderation::{Ban, ModLogEntry};
use crate::post::Post;
use tango_proto::format::{Channel, FONT_FACES};
use tango_proto::{ident, GroupFlags, ModFlags};

const MAX_POST_LENGTH: usize = 2000;

pub(crate) struct RoomState {
    // Account identity
    pub username: String,
    pub password: String,
    pub session_id: String,
    pub anon_id: Option<String>,

    // Posting format preferences
    pub name_color: String,
    pub font_color: String,
    pub font_size: u8,
    /// Face index as digits, or a literal face name
    pub font_face: String,

    // Server-announced room state
    pub owner: Option<String>,
    pub members: Vec<Member>,
    pub usercount: u32,
    pub ratelimit: u32,
    pub settings: Option<GroupFlags>,
    pub banned_words: Vec<String>,
    pub banned_parts: Vec<String>,
    pub bans: Vec<Ban>,
    pub modlog: Vec<ModLogEntry>,
    pub last_modlog: String,

    // Message correlation and history
    pub pending_posts: HashMap<String, Post>,
    pub pending_ids: HashMap<String, String>,
    pub history: Vec<Post>,
    pub history_count: u32,
    pub no_more: bool,
    pub last_message: f64,
}

impl RoomState {
    fn new(username: &str, password: &str, session_id: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            session_id,
            anon_id: None,
            name_color: String::new(),
            font_color: String::new(),
            font_size: 11,
            font_face: "0".to_string(),
            owner: None,
            members: Vec::new(),
            usercount: 0,
            ratelimit: 0,
            settings: None,
            banned_words: Vec::new(),
            banned_parts: Vec::new(),
            bans: Vec::new(),
            modlog: Vec::new(),
            last_modlog: "0".to_string(),
            pending_posts: HashMap::new(),
            pending_ids: HashMap::new(),
            history: Vec::new(),
            history_count: 0,
            no_more: false,
            last_message: 0.0,
        }
    }

    /// The name we appear under in the room.
    pub fn display_name(&self) -> String {
        if let Some(anon_id) = &self.anon_id {
            format!("!anon{anon_id}")
        } else if self.password.is_empty() {
            format!("#{}", self.username)
        } else {
            self.username.clone()
        }
    }

    /// Client-side permission gate: the owner may do anything, a moderator
    /// whatever their flags grant. The server remains the authority; this
    /// just avoids sending commands that would be rejected.
    pub fn has_permission(&self, required: ModFlags) -> bool {
        let me = self.display_name();
        if let Some(owner) = &self.owner {
            if owner.eq_ignore_ascii_case(&me) {
                return true;
            }
        }
        self.members
            .iter()
            .find(|m| m.is_named(&me))
            .is_some_and(|m| m.flags().intersects(required))
    }

    /// Find a member by name, moderators first, creating it if absent.
    pub fn member_entry(&mut self, name: &str) -> &mut Member {
        let position = self
            .members
            .iter()
            .position(|m| m.is_mod() && m.is_named(name))
            .or_else(|| self.members.iter().position(|m| m.is_named(name)));
        let index = position.unwrap_or_else(|| {
            self.members.push(Member::new(name));
            self.members.len() - 1
        });
        &mut self.members[index]
    }

    pub fn mods(&self) -> Vec<&Member> {
        self.members.iter().filter(|m| m.is_mod()).collect()
    }
}

/// Handle to a joined room.
///
/// All mutation of room state happens through the inbound command task;
/// this handle only reads state and sends validated commands.
pub struct RoomSession {
    name: String,
    conn: Connection,
    state: Arc<Mutex<RoomState>>,
    ready: watch::Receiver<bool>,
    subscribers: Arc<Mutex<Subscribers<RoomEvent>>>,
    emitter: handlers::RoomEmitter,
}

impl RoomSession {
    /// Resolve the room's shard, connect, and start the session. The
    /// handshake result arrives later as events.
    pub async fn connect(
        name: &str,
        username: &str,
        password: &str,
        recovered_anon: Option<u16>,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<Self, ClientError> {
        let shard = ident::server_for_room(name)?;
        let host = format!("s{shard}.chatango.com");

        let session_id = ident::new_session_id();
        let (conn_tx, conn_rx) = unbounded_channel();
        let conn = Connection::connect(
            &host,
            443,
            &["bauth", name, session_id.as_str(), username, password],
            conn_tx,
        )
        .await?;

        let mut state = RoomState::new(username, password, session_id);
        if let Some(number) = recovered_anon {
            state.anon_id = Some(format!("{:04}", number % 10_000));
        }
        let state = Arc::new(Mutex::new(state));

        let (ready_tx, ready_rx) = watch::channel(false);
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));

        let emitter = handlers::RoomEmitter::new(name.to_string(), events, subscribers.clone());
        let task = handlers::RoomTask {
            room: name.to_string(),
            state: state.clone(),
            conn: conn.clone(),
            emitter: emitter.clone(),
            ready: ready_tx,
        };
        tokio::spawn(task.run(conn_rx));

        Ok(Self {
            name: name.to_string(),
            conn,
            state,
            ready: ready_rx,
            subscribers,
            emitter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the initial handshake has completed.
    pub async fn ready(&self) {
        let mut ready = self.ready.clone();
        while !*ready.borrow() {
            if ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Register an event callback for this session. Callbacks run in
    /// registration order, before the event reaches the manager channel.
    pub fn subscribe(&self, callback: impl Fn(&RoomEvent) + Send + Sync + 'static) {
        self.subscribers.lock().subscribe(callback);
    }

    /// Close the session deliberately.
    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.emitter.emit(RoomEvent::Disconnected);
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    pub fn display_name(&self) -> String {
        self.state.lock().display_name()
    }

    pub fn owner(&self) -> Option<String> {
        self.state.lock().owner.clone()
    }

    /// Members currently present.
    pub fn users(&self) -> Vec<Member> {
        self.state
            .lock()
            .members
            .iter()
            .filter(|m| m.joined())
            .cloned()
            .collect()
    }

    pub fn mods(&self) -> Vec<Member> {
        self.state.lock().mods().into_iter().cloned().collect()
    }

    pub fn usercount(&self) -> u32 {
        self.state.lock().usercount
    }

    pub fn bans(&self) -> Vec<Ban> {
        self.state.lock().bans.clone()
    }

    pub fn modlog(&self) -> Vec<ModLogEntry> {
        self.state.lock().modlog.clone()
    }

    /// `(partially banned, totally banned)` word lists.
    pub fn banned_words(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state.lock();
        (state.banned_parts.clone(), state.banned_words.clone())
    }

    pub fn ratelimit(&self) -> u32 {
        self.state.lock().ratelimit
    }

    pub fn settings(&self) -> Option<GroupFlags> {
        self.state.lock().settings
    }

    pub fn last_message_time(&self) -> f64 {
        self.state.lock().last_message
    }

    // ------------------------------------------------------------------
    // Formatting preferences
    // ------------------------------------------------------------------

    /// Set the name color. Anons derive their number from the color, so
    /// it cannot be changed while anonymous.
    pub fn set_name_color(&self, color: &str) -> Result<(), ValidationError> {
        let mut state = self.state.lock();
        if state.anon_id.is_some() {
            return Err(ValidationError::AnonymousNameColor);
        }
        validate_hex(color)?;
        state.name_color = color.to_string();
        Ok(())
    }

    /// Set the font color; an empty string clears it.
    pub fn set_font_color(&self, color: &str) -> Result<(), ValidationError> {
        if !color.is_empty() {
            validate_hex(color)?;
        }
        self.state.lock().font_color = color.to_string();
        Ok(())
    }

    /// Set the font size, clamped to the supported range.
    pub fn set_font_size(&self, size: u8) {
        self.state.lock().font_size = size.clamp(9, 22);
    }

    /// Set the font face by table index or literal name.
    pub fn set_font_face(&self, face: &str) {
        let mut state = self.state.lock();
        state.font_face = match face.parse::<usize>() {
            Ok(index) => index.min(FONT_FACES.len() - 1).to_string(),
            Err(_) => face.to_string(),
        };
    }

    /// Move this session to a specific 4-digit anonymous number.
    pub fn set_anon(&self, number: u16) {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            // Already handshaken: shift the seed so future posts carry the
            // requested number
            let seed = ident::reverse_anon_id(&format!("{number:04}"), &state.session_id);
            state.anon_id = Some(format!("{:04}", number % 10_000));
            state.name_color = seed;
        } else {
            state.anon_id = Some(format!("{:04}", number % 10_000));
        }
    }

    // ------------------------------------------------------------------
    // Posting and history
    // ------------------------------------------------------------------

    /// Send a post. Overlong posts are split into consecutive messages.
    pub fn send_post(&self, body: &str, channel: Channel) {
        if body.is_empty() {
            return;
        }
        let escaped = escape_html(body).replace('\n', "<br/>");
        let state = self.state.lock();
        let channel_bits = channel.wire_value().to_string();

        for section in split_chunks(&escaped, MAX_POST_LENGTH) {
            let name_tag = if state.name_color.is_empty() {
                String::new()
            } else {
                format!("<n{}/>", state.name_color)
            };
            let message = format!(
                "{name_tag}<f x{:02}{}=\"{}\">{section}",
                state.font_size, state.font_color, state.font_face
            );
            self.conn
                .send(&["bm", "meme", channel_bits.as_str(), message.as_str()]);
        }
    }

    /// Request another batch of history. A no-op once the server has said
    /// there is nothing further.
    pub fn get_more(&self, amount: u32) {
        let state = self.state.lock();
        if state.no_more {
            return;
        }
        let amount = amount.to_string();
        let count = state.history_count.to_string();
        self.conn.send(&["get_more", amount.as_str(), count.as_str()]);
    }

    /// Restart the member feed.
    pub fn reload_users(&self) {
        self.conn.send(&["gparticipants", "stop"]);
        self.conn.send(&["gparticipants"]);
    }

    // ------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------

    fn gated(&self, required: ModFlags) -> bool {
        self.state.lock().has_permission(required)
    }

    /// Promote a user. Admins receive the wider default mask.
    pub fn add_mod(&self, name: &str, admin: bool) {
        if self.gated(ModFlags::EDIT_MODS) {
            let flags = if admin {
                ModFlags::ADMIN
            } else {
                ModFlags::MODERATOR
            };
            let bits = flags.bits().to_string();
            self.conn.send(&["addmod", name, bits.as_str()]);
        }
    }

    pub fn remove_mod(&self, name: &str) {
        if self.gated(ModFlags::EDIT_MODS) {
            let is_mod = self.state.lock().mods().iter().any(|m| m.is_named(name));
            if is_mod {
                self.conn.send(&["removemod", name]);
            }
        }
    }

    /// Delete a single message by durable id.
    pub fn delete(&self, message_id: &str) {
        if self.gated(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS) {
            self.conn.send(&["delmsg", message_id]);
        }
    }

    /// Delete all of an author's messages.
    pub fn delete_all(&self, post: &Post) {
        if self.gated(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS) {
            self.conn
                .send(&["delallmsg", post.mod_id.as_str(), post.ip.as_str(), ""]);
        }
    }

    /// Ban the author of a post.
    pub fn ban(&self, post: &Post) {
        if self.gated(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS) {
            let id = post.id.as_deref().unwrap_or_default();
            self.conn
                .send(&["block", post.user.as_str(), post.ip.as_str(), id]);
        }
    }

    /// Repeal a ban previously observed on the ban list.
    pub fn unban(&self, target: &str) -> bool {
        if !self.gated(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS) {
            return false;
        }
        let record = self
            .state
            .lock()
            .bans
            .iter()
            .find(|b| b.target.eq_ignore_ascii_case(target))
            .cloned();
        match record {
            Some(ban) => {
                self.conn.send(&["removeblock", &ban.id, &ban.ip, &ban.target]);
                true
            }
            None => false,
        }
    }

    pub fn request_banlist(&self) {
        if self.gated(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS) {
            self.conn.send(&["blocklist", "block", "", "next", "500"]);
        }
    }

    /// Fetch more moderation-log entries.
    pub fn get_mod_actions(&self, count: u32) {
        if self.gated(ModFlags::SEE_MOD_ACTIONS) {
            let last = self.state.lock().last_modlog.clone();
            let count = count.to_string();
            self.conn
                .send(&["getmodactions", "prev", last.as_str(), count.as_str()]);
        }
    }

    /// Replace the banned-word lists. Words containing the list delimiter
    /// are dropped.
    pub fn ban_words(&self, partial: &[&str], total: &[&str]) {
        if !self.gated(ModFlags::BANNED_CONTENT) {
            return;
        }
        {
            let mut state = self.state.lock();
            state
                .banned_parts
                .extend(clean_words(partial).map(str::to_string));
            state
                .banned_words
                .extend(clean_words(total).map(str::to_string));
        }
        self.send_banned_words();
    }

    pub fn unban_words(&self, partial: &[&str], total: &[&str]) {
        if !self.gated(ModFlags::BANNED_CONTENT) {
            return;
        }
        {
            let mut state = self.state.lock();
            state
                .banned_parts
                .retain(|w| !partial.iter().any(|p| p == w));
            state.banned_words.retain(|w| !total.iter().any(|t| t == w));
        }
        self.send_banned_words();
    }

    fn send_banned_words(&self) {
        let (parts, words) = {
            let state = self.state.lock();
            (
                urlencoding::encode(&state.banned_parts.join(",")).into_owned(),
                urlencoding::encode(&state.banned_words.join(",")).into_owned(),
            )
        };
        self.conn
            .send(&["setbannedwords", parts.as_str(), words.as_str()]);
    }

    /// One post allowed per `seconds`; zero reverts to flood control.
    pub fn set_rate_limit(&self, seconds: u32) {
        if self.gated(ModFlags::CHAT_RESTRICTIONS) {
            let seconds = seconds.to_string();
            self.conn.send(&["ratelimitset", seconds.as_str()]);
        }
    }

    /// Clear every message in the room.
    pub fn clear_all(&self) {
        if self.gated(ModFlags::EDIT_GROUP) {
            self.conn.send(&["clearall"]);
        }
    }

    pub fn get_announcement(&self) {
        if self.gated(ModFlags::ANNOUNCEMENT) {
            self.conn.send(&["getannouncement"]);
        }
    }

    /// Set a recurring announcement; an empty message disables it.
    pub fn set_announcement(&self, message: &str, repeat_seconds: u32) {
        if !self.gated(ModFlags::ANNOUNCEMENT) {
            return;
        }
        if message.is_empty() {
            self.conn.send(&["updateannouncement", "0"]);
            return;
        }
        let state = self.state.lock();
        let truncated: String = message.chars().take(MAX_POST_LENGTH).collect();
        let body = format!(
            "<f x{:02}{}=\"\">{truncated}",
            state.font_size, state.font_color
        );
        let repeat = repeat_seconds.to_string();
        self.conn
            .send(&["updateannouncement", "1", repeat.as_str(), body.as_str()]);
    }

    // ------------------------------------------------------------------
    // Group-flag toggles
    // ------------------------------------------------------------------

    fn update_flags(&self, required: ModFlags, candidates: &[(bool, GroupFlags)], radio: bool) {
        if !self.gated(required) {
            return;
        }
        let (set, clear) = GroupFlags::update(candidates, radio);
        let set = set.bits().to_string();
        let clear = clear.bits().to_string();
        self.conn
            .send(&["updategroupflags", set.as_str(), clear.as_str()]);
    }

    pub fn disable_content(&self, images: bool, links: bool, videos: bool) {
        self.update_flags(
            ModFlags::BANNED_CONTENT,
            &[
                (images, GroupFlags::NO_IMAGES),
                (links, GroupFlags::NO_LINKS),
                (videos, GroupFlags::NO_VIDEOS),
            ],
            false,
        );
    }

    pub fn disable_anons(&self, disable: bool) {
        self.update_flags(
            ModFlags::CHAT_RESTRICTIONS,
            &[(disable, GroupFlags::NO_ANONS)],
            false,
        );
    }

    pub fn disable_usercount(&self, disable: bool) {
        self.update_flags(
            ModFlags::EDIT_GROUP,
            &[(disable, GroupFlags::NO_COUNTER)],
            false,
        );
    }

    pub fn disable_channels(&self, disable: bool) {
        self.update_flags(
            ModFlags::EDIT_GROUP,
            &[(disable, GroupFlags::NO_CHANNELS)],
            false,
        );
    }

    /// Configure the nonsense filters.
    pub fn auto_moderation(&self, basic: bool, repetitious: bool, advanced: bool) {
        self.update_flags(
            ModFlags::AUTO_MODERATION,
            &[
                (basic, GroupFlags::BASIC_FILTER),
                (repetitious, GroupFlags::BLOCK_REPETITIOUS),
                (advanced, GroupFlags::ADVANCED_FILTER),
            ],
            false,
        );
    }

    /// Broadcast mode and closed-without-mods are mutually exclusive.
    ///
    /// The live service assigns these two bits the other way round from
    /// their settings labels; the wire numbering wins.
    pub fn set_input(&self, closed_without_mods: bool, broadcast: bool) {
        self.update_flags(
            ModFlags::CLOSE_INPUT,
            &[
                (closed_without_mods, GroupFlags::BROADCAST),
                (broadcast, GroupFlags::CLOSED_WITHOUT_MODS),
            ],
            true,
        );
    }

    /// Badge visibility is owner-only and a radio choice.
    pub fn display_badge(&self, choose: bool, force: bool) {
        self.update_flags(
            ModFlags::empty(),
            &[
                (choose, GroupFlags::SHOW_STAFF_BADGES),
                (force, GroupFlags::CHOOSE_BADGES),
            ],
            true,
        );
    }
}

fn validate_hex(color: &str) -> Result<(), ValidationError> {
    if color.is_empty() || u32::from_str_radix(color, 16).is_err() {
        return Err(ValidationError::InvalidColor(color.to_string()));
    }
    Ok(())
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn clean_words<'a>(words: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
    words.iter().copied().filter(|w| !w.contains(','))
}

/// Split a message into sections of at most `size` characters, sent as
/// consecutive posts.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionEvent;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct SessionFixture {
        session: RoomSession,
        socket: TcpStream,
        _events: UnboundedReceiver<ClientEvent>,
        _conn_events: UnboundedReceiver<ConnectionEvent>,
    }

    /// A session handle wired to a loopback socket, authorized as owner.
    async fn joined_session() -> SessionFixture {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let (conn_tx, conn_events) = unbounded_channel();
        let conn = Connection::connect(&addr.ip().to_string(), addr.port(), &["hs"], conn_tx)
            .await
            .unwrap();
        let mut socket = accept.await.unwrap();
        assert_eq!(read_frame(&mut socket).await, "hs");

        let mut state = RoomState::new("boss", "hunter2", "1234".into());
        state.owner = Some("boss".into());
        let state = Arc::new(Mutex::new(state));
        let (ready_tx, ready) = watch::channel(true);
        drop(ready_tx);
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let (event_tx, events) = unbounded_channel();
        let emitter = handlers::RoomEmitter::new("lobby".into(), event_tx, subscribers.clone());

        SessionFixture {
            session: RoomSession {
                name: "lobby".into(),
                conn,
                state,
                ready,
                subscribers,
                emitter,
            },
            socket,
            _events: events,
            _conn_events: conn_events,
        }
    }

    async fn read_frame(socket: &mut TcpStream) -> String {
        let mut bytes = Vec::new();
        let mut buf = [0_u8; 256];
        while !bytes.ends_with(b"\0") {
            let n = socket.read(&mut buf).await.unwrap();
            bytes.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(bytes)
            .unwrap()
            .trim_end_matches(|c| c == '\r' || c == '\n' || c == '\0')
            .to_string()
    }

    #[tokio::test]
    async fn input_flag_update_uses_the_wire_numbering() {
        let mut fx = joined_session().await;

        // Closing input rides bit 65536, which implies 131072
        fx.session.set_input(true, false);
        assert_eq!(
            read_frame(&mut fx.socket).await,
            "updategroupflags:196608:131072"
        );

        fx.session.set_input(false, true);
        assert_eq!(
            read_frame(&mut fx.socket).await,
            "updategroupflags:131072:196608"
        );
    }

    #[tokio::test]
    async fn exhausted_history_suppresses_further_requests() {
        let mut fx = joined_session().await;

        fx.session.state.lock().history_count = 7;
        fx.session.get_more(20);
        assert_eq!(read_frame(&mut fx.socket).await, "get_more:20:7");

        fx.session.state.lock().no_more = true;
        fx.session.get_more(20);
        let mut buf = [0_u8; 16];
        let quiet =
            tokio::time::timeout(Duration::from_millis(200), fx.socket.read(&mut buf)).await;
        assert!(quiet.is_err(), "request sent after the no-more signal");
    }

    #[test]
    fn hex_validation() {
        assert!(validate_hex("FF0000").is_ok());
        assert!(validate_hex("1a2").is_ok());
        assert!(validate_hex("").is_err());
        assert!(validate_hex("red").is_err());
    }

    #[test]
    fn html_escaping() {
        assert_eq!(
            escape_html("<b>&\"'</b>"),
            "&lt;b&gt;&amp;&quot;&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn overlong_posts_split_on_character_boundaries() {
        let text = "ä".repeat(MAX_POST_LENGTH + 5);
        let chunks = split_chunks(&text, MAX_POST_LENGTH);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), MAX_POST_LENGTH);
        assert_eq!(chunks[1].chars().count(), 5);
        assert_eq!(chunks.concat(), text);

        assert_eq!(split_chunks("short", MAX_POST_LENGTH), vec!["short"]);
    }

    #[test]
    fn comma_words_dropped() {
        let words = ["ok", "not,ok", "fine"];
        let kept: Vec<_> = clean_words(&words).collect();
        assert_eq!(kept, vec!["ok", "fine"]);
    }

    #[test]
    fn owner_bypasses_permission_check() {
        let mut state = RoomState::new("boss", "secret", "123".into());
        state.owner = Some("Boss".into());
        assert!(state.has_permission(ModFlags::DELETE_MESSAGES));
        // Even the empty, owner-only gate
        assert!(state.has_permission(ModFlags::empty()));
    }

    #[test]
    fn moderator_needs_matching_flags() {
        let mut state = RoomState::new("mod", "pw", "123".into());
        state.owner = Some("someoneelse".into());
        state
            .member_entry("Mod")
            .promote(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS);
        assert!(state.has_permission(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS));
        assert!(!state.has_permission(ModFlags::EDIT_MODS));
        assert!(!state.has_permission(ModFlags::empty()));
    }

    #[test]
    fn anonymous_display_name() {
        let mut state = RoomState::new("", "", "123".into());
        state.anon_id = Some("1234".into());
        assert_eq!(state.display_name(), "!anon1234");
    }

    #[test]
    fn temp_name_display() {
        let state = RoomState::new("visitor", "", "123".into());
        assert_eq!(state.display_name(), "#visitor");
    }

    #[test]
    fn member_entry_reuses_case_insensitive_match() {
        let mut state = RoomState::new("u", "p", "1".into());
        state.member_entry("Alice").add_client(1, 1.0);
        state.member_entry("ALICE").add_client(2, 2.0);
        assert_eq!(state.members.len(), 1);
        assert_eq!(state.members[0].client_count(), 2);
    }
}
