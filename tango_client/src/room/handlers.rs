//! Inbound command handling for a room session.
//!
//! One task per session receives tokenised commands from the connection
//! and applies them to the shared state strictly in arrival order. Events
//! are emitted only after the state lock is released, so subscriber
//! callbacks may safely read session state.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use crate::connection::{Connection, ConnectionEvent};
use crate::event::{ClientEvent, RoomEvent, Subscribers, UserRef};
use crate::member::Member;
use crate::moderation::{Ban, ModLogEntry};
use crate::post::Post;
use crate::room::RoomState;
use tango_proto::command::Command;
use tango_proto::{ident, GroupFlags, ModFlags};

/// Fan-out point for one session's events: subscriber callbacks first, in
/// registration order, then the manager channel.
#[derive(Clone)]
pub(super) struct RoomEmitter {
    room: String,
    events: UnboundedSender<ClientEvent>,
    subscribers: Arc<Mutex<Subscribers<RoomEvent>>>,
}

impl RoomEmitter {
    pub(super) fn new(
        room: String,
        events: UnboundedSender<ClientEvent>,
        subscribers: Arc<Mutex<Subscribers<RoomEvent>>>,
    ) -> Self {
        Self {
            room,
            events,
            subscribers,
        }
    }

    pub(super) fn emit(&self, event: RoomEvent) {
        self.subscribers.lock().emit(&event);
        // The manager may have dropped its receiver; that is not an error
        let _ = self.events.send(ClientEvent::Room {
            room: self.room.clone(),
            event,
        });
    }
}

pub(super) struct RoomTask {
    pub(super) room: String,
    pub(super) state: Arc<Mutex<RoomState>>,
    pub(super) conn: Connection,
    pub(super) emitter: RoomEmitter,
    pub(super) ready: watch::Sender<bool>,
}

impl RoomTask {
    pub(super) async fn run(self, mut events: UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Command(cmd) => self.handle(&cmd),
                ConnectionEvent::Closed(error) => {
                    self.emitter.emit(RoomEvent::ConnectionLost(error));
                    break;
                }
            }
        }
        tracing::debug!(room = %self.room, "session task finished");
    }

    fn handle(&self, cmd: &Command) {
        match cmd.mnemonic.as_str() {
            // Reply to a keepalive
            "" => {}
            "ok" => self.on_ok(&cmd.args),
            "denied" => {
                self.emitter.emit(RoomEvent::Denied);
                self.conn.disconnect();
                self.emitter.emit(RoomEvent::Disconnected);
            }
            "badalias" => self.emitter.emit(RoomEvent::BadAlias),
            "inited" => self.on_inited(),
            "b" => self.on_live_post(&cmd.args),
            "u" => self.on_post_update(&cmd.args),
            "i" => self.on_history_post(&cmd.args),
            "gotmore" => self.on_gotmore(),
            "nomore" => {
                self.state.lock().no_more = true;
                self.emitter.emit(RoomEvent::NoMoreHistory);
            }
            "annc" => {
                let post = Post::announcement(&cmd.args, &self.room, false);
                self.emitter.emit(RoomEvent::Announcement(post));
            }
            "getannc" => {
                let post = Post::announcement(&cmd.args, &self.room, true);
                self.emitter.emit(RoomEvent::AnnouncementInfo(post));
            }
            "gparticipants" => self.on_roster(cmd),
            "participant" => self.on_participant(&cmd.args),
            "n" => self.on_usercount(&cmd.args),
            "bw" => self.on_banned_words(&cmd.args),
            "ratelimitset" => {
                let seconds = parse_or_default(cmd.args.get(1));
                self.state.lock().ratelimit = seconds;
                self.emitter.emit(RoomEvent::RateLimit(seconds));
            }
            "show_fw" => self.emitter.emit(RoomEvent::FloodWarning),
            "show_tb" => self
                .emitter
                .emit(RoomEvent::FloodBan(parse_or_default(cmd.args.first()))),
            "tb" => self
                .emitter
                .emit(RoomEvent::FloodBanRepeat(parse_or_default(cmd.args.first()))),
            "groupflagsupdate" => {
                let flags = GroupFlags(parse_or_default(cmd.args.first()));
                self.state.lock().settings = Some(flags);
                self.emitter.emit(RoomEvent::SettingsChanged(flags));
            }
            "updgroupinfo" => self.emitter.emit(RoomEvent::GroupInfo {
                title: cmd.args.first().cloned().unwrap_or_default(),
                message: cmd.rest(1),
            }),
            "modactions" => self.on_modactions(cmd),
            "blocklist" => self.on_blocklist(cmd),
            "blocked" => self.on_blocked(&cmd.args),
            "unblocked" => self.on_unblocked(&cmd.args),
            "mods" => self.on_mods(&cmd.args),
            "delete" => self.emitter.emit(RoomEvent::MessageDeleted(
                cmd.args.first().cloned().unwrap_or_default(),
            )),
            "deleteall" => {
                for id in &cmd.args {
                    self.emitter.emit(RoomEvent::MessageDeleted(id.clone()));
                }
            }
            other => tracing::trace!(room = %self.room, mnemonic = other, "unhandled command"),
        }
    }

    /// Handshake acknowledgement. Carries the owner, our (possibly
    /// reassigned) session id, the login status and the moderator set.
    fn on_ok(&self, args: &[String]) {
        let session = args.get(1).cloned().unwrap_or_default();
        let status = args.get(2).map_or("", String::as_str);

        let mut state = self.state.lock();
        if status == "C" {
            if !state.username.is_empty() && !state.password.is_empty() {
                // Credentials rejected; the session is useless
                drop(state);
                self.emitter.emit(RoomEvent::LoginFailed);
                self.conn.disconnect();
                self.emitter.emit(RoomEvent::Disconnected);
                return;
            } else if !state.username.is_empty() {
                self.conn.send(&["blogin", state.username.as_str()]);
            } else {
                // The seed doubles as our name color; recover it when a
                // specific anon number was requested before connecting
                let seed = match &state.anon_id {
                    Some(anon_id) => ident::reverse_anon_id(anon_id, &session),
                    None => ident::anon_seed(),
                };
                state.anon_id = Some(ident::anon_id(&seed, &session));
                state.name_color = seed;
            }
        } else {
            state.anon_id = None;
        }

        state.session_id = session;
        state.owner = Some(args.first().cloned().unwrap_or_default());
        if let Some(mods) = args.get(6) {
            for entry in mods.split(';').filter(|e| !e.is_empty()) {
                if let Some((name, flags)) = entry.split_once(',') {
                    let flags = ModFlags(flags.parse().unwrap_or(0));
                    state.member_entry(name).promote(flags);
                }
            }
        }
    }

    /// End of the handshake. Open the member feed, ask for the ambient
    /// room data and flush the first history batch. This batch does not
    /// count as a `get_more` retrieval.
    fn on_inited(&self) {
        self.conn.send(&["gparticipants"]);
        self.conn.send(&["getpremium", "1"]);
        self.conn.send(&["getbannedwords"]);
        self.conn.send(&["getratelimit"]);

        let batch = std::mem::take(&mut self.state.lock().history);
        let _ = self.ready.send(true);
        self.emitter.emit(RoomEvent::Connected);
        self.emitter.emit(RoomEvent::HistoryBatch(batch));
    }

    /// A live post. Held back until its durable id has arrived; the id
    /// may come first, in which case it is waiting for us.
    fn on_live_post(&self, args: &[String]) {
        let mut state = self.state.lock();
        let mut post = Post::live(args, &state.members);
        if post.time > state.last_message {
            state.last_message = post.time;
        }
        let Some(provisional) = post.provisional.clone() else {
            return;
        };
        match state.pending_ids.remove(&provisional) {
            Some(id) => {
                post.id = Some(id);
                drop(state);
                self.emitter.emit(RoomEvent::Message(post));
            }
            None => {
                state.pending_posts.insert(provisional, post);
            }
        }
    }

    /// Durable-id assignment for a provisional post number.
    fn on_post_update(&self, args: &[String]) {
        let provisional = args.first().cloned().unwrap_or_default();
        let id = args.get(1).cloned().unwrap_or_default();

        let mut state = self.state.lock();
        match state.pending_posts.remove(&provisional) {
            Some(mut post) => {
                post.id = Some(id);
                drop(state);
                self.emitter.emit(RoomEvent::Message(post));
            }
            None => {
                state.pending_ids.insert(provisional, id);
            }
        }
    }

    fn on_history_post(&self, args: &[String]) {
        let mut state = self.state.lock();
        let post = Post::history(args, &state.members);
        if post.time > state.last_message {
            state.last_message = post.time;
        }
        state.history.push(post);
    }

    fn on_gotmore(&self) {
        let batch = {
            let mut state = self.state.lock();
            state.history_count += 1;
            std::mem::take(&mut state.history)
        };
        self.emitter.emit(RoomEvent::HistoryBatch(batch));
    }

    /// Full roster snapshot. Replaces presence wholesale; moderator
    /// records survive so their flags are not lost between refreshes.
    fn on_roster(&self, cmd: &Command) {
        let roster = cmd.rest(1);
        let mut state = self.state.lock();
        state.members.retain(Member::is_mod);
        for member in &mut state.members {
            member.clear_clients();
        }
        for person in roster.split(';') {
            let fields: Vec<&str> = person.split(':').collect();
            // Anonymous participants have no member record
            if fields.len() < 4 || fields[3] == "None" {
                continue;
            }
            let client_id = fields[0].parse().unwrap_or(0);
            let join_time = fields[1].parse().unwrap_or(0.0);
            state.member_entry(fields[3]).add_client(client_id, join_time);
        }
        drop(state);
        self.emitter.emit(RoomEvent::Participants);
    }

    /// Live join/leave feed. `joined` is 0 for a leave, 1 for a join and
    /// 2 for a client re-identifying (login, logout or alias change).
    fn on_participant(&self, args: &[String]) {
        let joined: u32 = parse_or_default(args.first());
        let client_id: u64 = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(0);
        let username = args.get(3).map_or("", String::as_str);
        let join_time: f64 = args.get(6).and_then(|a| a.parse().ok()).unwrap_or(0.0);

        let mut state = self.state.lock();
        if username != "None" && state.members.iter().any(|m| m.is_named(username)) {
            let member = state.member_entry(username);
            let event = if joined != 0 {
                member.add_client(client_id, join_time);
                RoomEvent::MemberJoin(UserRef::Member(member.clone()))
            } else {
                member.remove_client(client_id);
                RoomEvent::MemberLeave(UserRef::Member(member.clone()))
            };
            drop(state);
            self.emitter.emit(event);
            return;
        }

        // Re-identification: whoever held this client has logged out
        if joined == 2 {
            if let Some(index) = state.members.iter().position(|m| m.has_client(client_id)) {
                state.members[index].remove_client(client_id);
                let member = state.members[index].clone();
                drop(state);
                self.emitter
                    .emit(RoomEvent::MemberLeave(UserRef::Member(member)));
                return;
            }
        }

        if username == "None" {
            let name = if joined == 2 {
                args.get(4).cloned().unwrap_or_default()
            } else {
                "anon".to_string()
            };
            drop(state);
            self.emitter.emit(RoomEvent::MemberJoin(UserRef::Anon(name)));
            return;
        }

        let member = state.member_entry(username);
        let event = if joined != 0 {
            member.add_client(client_id, join_time);
            RoomEvent::MemberJoin(UserRef::Member(member.clone()))
        } else {
            member.remove_client(client_id);
            RoomEvent::MemberLeave(UserRef::Member(member.clone()))
        };
        drop(state);
        self.emitter.emit(event);
    }

    /// Member count, in base 16.
    fn on_usercount(&self, args: &[String]) {
        let count = args
            .first()
            .and_then(|a| u32::from_str_radix(a, 16).ok())
            .unwrap_or(0);
        self.state.lock().usercount = count;
        self.emitter.emit(RoomEvent::UserCount(count));
    }

    fn on_banned_words(&self, args: &[String]) {
        let decode = |field: Option<&String>| -> Vec<String> {
            let raw = field.map_or("", String::as_str);
            let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned());
            decoded
                .split(',')
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect()
        };
        let mut state = self.state.lock();
        state.banned_parts = decode(args.first());
        state.banned_words = decode(args.get(1));
    }

    fn on_modactions(&self, cmd: &Command) {
        let raw = cmd.rest(0);
        let mut state = self.state.lock();
        let mods: Vec<Member> = state.mods().into_iter().cloned().collect();
        let mod_refs: Vec<&Member> = mods.iter().collect();
        let entries: Vec<ModLogEntry> = raw
            .split(';')
            .filter_map(|record| ModLogEntry::parse(record, &mod_refs))
            .collect();
        if let Some(last) = entries.last() {
            state.last_modlog = last.id.clone();
        }
        state.modlog.extend(entries.iter().cloned());
        drop(state);
        self.emitter.emit(RoomEvent::ModLog(entries));
    }

    /// Full ban-list snapshot: `unid:ip:target:time:moderator` records.
    fn on_blocklist(&self, cmd: &Command) {
        let raw = cmd.rest(0);
        let mut state = self.state.lock();
        let mods: Vec<Member> = state.mods().into_iter().cloned().collect();
        let mod_refs: Vec<&Member> = mods.iter().collect();
        let mut bans = Vec::new();
        for record in raw.split(';') {
            let fields: Vec<&str> = record.split(':').collect();
            if fields.len() != 5 {
                continue;
            }
            if let Some(ban) =
                Ban::new(fields[0], fields[1], fields[2], fields[4], fields[3], &mod_refs)
            {
                bans.push(ban);
            }
        }
        state.bans = bans;
        drop(state);
        self.emitter.emit(RoomEvent::BanListUpdate);
    }

    /// Live ban: `unid:ip:target:moderator:time`. Note the trailing two
    /// fields are swapped relative to the snapshot layout.
    fn on_blocked(&self, args: &[String]) {
        let field = |i: usize| args.get(i).map_or("", String::as_str);
        let mut state = self.state.lock();
        let mods: Vec<Member> = state.mods().into_iter().cloned().collect();
        let mod_refs: Vec<&Member> = mods.iter().collect();
        let Some(ban) = Ban::new(field(0), field(1), field(2), field(3), field(4), &mod_refs)
        else {
            return;
        };
        state.bans.push(ban.clone());
        let refresh = state.has_permission(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS);
        drop(state);
        self.emitter.emit(RoomEvent::Ban(ban));
        if refresh {
            self.conn.send(&["blocklist", "block", "", "next", "500"]);
        }
    }

    fn on_unblocked(&self, args: &[String]) {
        let id = args.first().map_or("", String::as_str);
        let mut state = self.state.lock();
        let Some(index) = state.bans.iter().position(|b| b.id == id) else {
            return;
        };
        let ban = state.bans.remove(index);
        let refresh = state.has_permission(ModFlags::DELETE_MESSAGES | ModFlags::BAN_USERS);
        drop(state);
        self.emitter.emit(RoomEvent::Unban(ban));
        if refresh {
            self.conn.send(&["blocklist", "block", "", "next", "500"]);
        }
    }

    /// Full moderator set: one `name,flags` pair per field. Raises the
    /// symmetric difference against the previous set, then a summary.
    fn on_mods(&self, args: &[String]) {
        let mut state = self.state.lock();
        let old_names: Vec<String> = state
            .mods()
            .iter()
            .map(|m| m.name().to_lowercase())
            .collect();

        let mut new_names = Vec::new();
        for entry in args {
            let Some((name, flags)) = entry.split_once(',') else {
                continue;
            };
            new_names.push(name.to_lowercase());
            state
                .member_entry(name)
                .promote(ModFlags(flags.parse().unwrap_or(0)));
        }

        let mut added = Vec::new();
        for name in &new_names {
            if !old_names.contains(name) {
                added.push(state.member_entry(name).clone());
            }
        }
        let mut removed = Vec::new();
        for name in &old_names {
            if !new_names.contains(name) {
                let member = state.member_entry(name);
                removed.push(member.clone());
                member.promote(ModFlags::empty());
            }
        }
        drop(state);

        for member in added {
            self.emitter.emit(RoomEvent::ModAdded(member));
        }
        for member in removed {
            self.emitter.emit(RoomEvent::ModRemoved(member));
        }
        self.emitter.emit(RoomEvent::ModsChanged);
    }
}

fn parse_or_default<T: std::str::FromStr + Default>(field: Option<&String>) -> T {
    field.and_then(|f| f.parse().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc::unbounded_channel;

    struct Fixture {
        task: RoomTask,
        events: UnboundedReceiver<ClientEvent>,
        ready: watch::Receiver<bool>,
        _socket: TcpStream,
        _conn_events: UnboundedReceiver<ConnectionEvent>,
    }

    async fn fixture(username: &str, password: &str) -> Fixture {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let (conn_tx, conn_events) = unbounded_channel();
        let conn = Connection::connect(&addr.ip().to_string(), addr.port(), &["hs"], conn_tx)
            .await
            .unwrap();
        let socket = accept.await.unwrap();

        let (event_tx, events) = unbounded_channel();
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let emitter = RoomEmitter::new("testroom".into(), event_tx, subscribers);
        let (ready_tx, ready) = watch::channel(false);
        let state = Arc::new(Mutex::new(RoomState::new(
            username,
            password,
            "1234567890123456".into(),
        )));

        Fixture {
            task: RoomTask {
                room: "testroom".into(),
                state,
                conn,
                emitter,
                ready: ready_tx,
            },
            events,
            ready,
            _socket: socket,
            _conn_events: conn_events,
        }
    }

    fn feed(fixture: &Fixture, raw: &str) {
        fixture.task.handle(&Command::parse(raw));
    }

    fn next_event(fixture: &mut Fixture) -> RoomEvent {
        match fixture.events.try_recv() {
            Ok(ClientEvent::Room { event, .. }) => event,
            other => panic!("expected room event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn anonymous_handshake_derives_identity() {
        let fx = fixture("", "").await;
        feed(
            &fx,
            "ok:theowner:9876543210000000:C:x:x:x:modone,354300;modtwo,82368",
        );

        let state = fx.task.state.lock();
        let anon_id = state.anon_id.clone().unwrap();
        assert_eq!(anon_id, ident::anon_id(&state.name_color, "9876543210000000"));
        assert_eq!(state.session_id, "9876543210000000");
        assert_eq!(state.owner.as_deref(), Some("theowner"));
        assert_eq!(state.mods().len(), 2);
    }

    #[tokio::test]
    async fn requested_anon_number_survives_handshake() {
        let fx = fixture("", "").await;
        fx.task.state.lock().anon_id = Some("1234".into());
        feed(&fx, "ok:theowner:9876543210000000:C:x:x:x:");
        assert_eq!(fx.task.state.lock().anon_id.as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn failed_login_ends_the_session() {
        let mut fx = fixture("user", "wrongpw").await;
        feed(&fx, "ok:theowner:9876543210000000:C:x:x:x:");
        assert!(matches!(next_event(&mut fx), RoomEvent::LoginFailed));
        assert!(matches!(next_event(&mut fx), RoomEvent::Disconnected));
    }

    #[tokio::test]
    async fn post_resolves_exactly_once_in_either_arrival_order() {
        // Post first, id second
        let mut fx = fixture("", "").await;
        feed(&fx, "b:1650000000.5:alice::12345678:mid:42:ip:0::hello");
        assert!(fx.events.try_recv().is_err());
        feed(&fx, "u:42:IDX");
        let RoomEvent::Message(post) = next_event(&mut fx) else {
            panic!("expected message");
        };
        assert_eq!(post.id.as_deref(), Some("IDX"));
        assert_eq!(post.body, "hello");
        assert!(fx.events.try_recv().is_err());

        // Id first, post second
        let mut fx = fixture("", "").await;
        feed(&fx, "u:42:IDX");
        assert!(fx.events.try_recv().is_err());
        feed(&fx, "b:1650000000.5:alice::12345678:mid:42:ip:0::hello");
        let RoomEvent::Message(post) = next_event(&mut fx) else {
            panic!("expected message");
        };
        assert_eq!(post.id.as_deref(), Some("IDX"));
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn initial_history_flush_does_not_count_as_retrieval() {
        let mut fx = fixture("", "").await;
        feed(&fx, "i:1650000000.0:alice::12345678:mid:OLD1:ip:0::first");
        feed(&fx, "inited");

        assert!(*fx.ready.borrow());
        assert!(matches!(next_event(&mut fx), RoomEvent::Connected));
        let RoomEvent::HistoryBatch(batch) = next_event(&mut fx) else {
            panic!("expected history batch");
        };
        assert_eq!(batch.len(), 1);
        assert_eq!(fx.task.state.lock().history_count, 0);

        feed(&fx, "i:1650000001.0:alice::12345678:mid:OLD2:ip:0::second");
        feed(&fx, "gotmore");
        let RoomEvent::HistoryBatch(batch) = next_event(&mut fx) else {
            panic!("expected history batch");
        };
        assert_eq!(batch.len(), 1);
        assert_eq!(fx.task.state.lock().history_count, 1);

        feed(&fx, "nomore");
        assert!(matches!(next_event(&mut fx), RoomEvent::NoMoreHistory));
        assert!(fx.task.state.lock().no_more);
    }

    #[tokio::test]
    async fn roster_snapshot_keeps_moderator_records() {
        let mut fx = fixture("", "").await;
        {
            let mut state = fx.task.state.lock();
            state.member_entry("Boss").promote(ModFlags::MODERATOR);
            state.member_entry("drifter").add_client(9, 1.0);
        }
        feed(&fx, "gparticipants:2:100:1650.0:sess:Alice:;200:1651.0:sess:None:");
        assert!(matches!(next_event(&mut fx), RoomEvent::Participants));

        let state = fx.task.state.lock();
        assert!(state.members.iter().any(|m| m.is_named("Boss")));
        assert!(!state.members.iter().any(|m| m.is_named("drifter")));
        let alice = state.members.iter().find(|m| m.is_named("Alice")).unwrap();
        assert!(alice.joined());
        assert!(alice.has_client(100));
    }

    #[tokio::test]
    async fn participant_feed_joins_and_leaves() {
        let mut fx = fixture("", "").await;
        feed(&fx, "participant:1:77:sess:Alice:x:x:1650.0");
        let RoomEvent::MemberJoin(user) = next_event(&mut fx) else {
            panic!("expected join");
        };
        assert_eq!(user.name(), "Alice");

        feed(&fx, "participant:0:77:sess:Alice:x:x:1650.0");
        let RoomEvent::MemberLeave(user) = next_event(&mut fx) else {
            panic!("expected leave");
        };
        assert_eq!(user.name(), "Alice");
        assert!(!fx.task.state.lock().members[0].joined());
    }

    #[tokio::test]
    async fn leave_for_an_unseen_name_stays_a_leave() {
        let mut fx = fixture("", "").await;
        feed(&fx, "participant:0:77:sess:Ghost:x:x:1650.0");
        let RoomEvent::MemberLeave(user) = next_event(&mut fx) else {
            panic!("expected leave");
        };
        assert_eq!(user.name(), "Ghost");
        assert!(!fx.task.state.lock().members[0].joined());
    }

    #[tokio::test]
    async fn logout_is_matched_by_client_id() {
        let mut fx = fixture("", "").await;
        fx.task.state.lock().member_entry("Alice").add_client(77, 1.0);

        feed(&fx, "participant:2:77:sess:None:alias:x:1650.0");
        let RoomEvent::MemberLeave(user) = next_event(&mut fx) else {
            panic!("expected leave");
        };
        assert_eq!(user.name(), "Alice");
        assert!(!fx.task.state.lock().members[0].joined());
    }

    #[tokio::test]
    async fn anonymous_participants_pass_through_unresolved() {
        let mut fx = fixture("", "").await;
        feed(&fx, "participant:1:88:sess:None:x:x:1650.0");
        let RoomEvent::MemberJoin(user) = next_event(&mut fx) else {
            panic!("expected join");
        };
        assert!(matches!(user, UserRef::Anon(_)));
        assert_eq!(user.name(), "anon");
        assert!(fx.task.state.lock().members.is_empty());
    }

    #[tokio::test]
    async fn usercount_is_base_sixteen() {
        let mut fx = fixture("", "").await;
        feed(&fx, "n:3e");
        let RoomEvent::UserCount(count) = next_event(&mut fx) else {
            panic!("expected count");
        };
        assert_eq!(count, 62);
    }

    #[tokio::test]
    async fn ban_records_without_a_target_are_discarded() {
        let mut fx = fixture("", "").await;
        feed(
            &fx,
            "blocklist:id1:1.2.3.4::1650.0:modname;id2:2.2.2.2:baduser:1651.0:modname",
        );
        assert!(matches!(next_event(&mut fx), RoomEvent::BanListUpdate));

        let state = fx.task.state.lock();
        assert_eq!(state.bans.len(), 1);
        assert_eq!(state.bans[0].target, "baduser");
        assert_eq!(state.bans[0].time, 1651.0);
    }

    #[tokio::test]
    async fn live_ban_and_unban_update_the_list() {
        let mut fx = fixture("", "").await;
        feed(&fx, "blocked:uid9:3.3.3.3:troll:modname:1650.0");
        let RoomEvent::Ban(ban) = next_event(&mut fx) else {
            panic!("expected ban");
        };
        assert_eq!(ban.target, "troll");
        assert_eq!(ban.time, 1650.0);
        assert_eq!(fx.task.state.lock().bans.len(), 1);

        feed(&fx, "unblocked:uid9:3.3.3.3:troll");
        let RoomEvent::Unban(ban) = next_event(&mut fx) else {
            panic!("expected unban");
        };
        assert_eq!(ban.target, "troll");
        assert!(fx.task.state.lock().bans.is_empty());
    }

    #[tokio::test]
    async fn live_ban_without_target_is_ignored() {
        let mut fx = fixture("", "").await;
        feed(&fx, "blocked:uid9:3.3.3.3::modname:1650.0");
        assert!(fx.events.try_recv().is_err());
        assert!(fx.task.state.lock().bans.is_empty());
    }

    #[tokio::test]
    async fn moderator_set_diff_raises_individual_events() {
        let mut fx = fixture("", "").await;
        fx.task
            .state
            .lock()
            .member_entry("OldMod")
            .promote(ModFlags::MODERATOR);

        feed(&fx, "mods:newmod,354300");
        let RoomEvent::ModAdded(member) = next_event(&mut fx) else {
            panic!("expected mod added");
        };
        assert!(member.is_named("newmod"));
        let RoomEvent::ModRemoved(member) = next_event(&mut fx) else {
            panic!("expected mod removed");
        };
        assert!(member.is_named("OldMod"));
        // The event carries the flags held before demotion
        assert!(member.is_mod());
        assert!(matches!(next_event(&mut fx), RoomEvent::ModsChanged));

        let state = fx.task.state.lock();
        assert_eq!(state.mods().len(), 1);
        assert!(state.mods()[0].is_named("newmod"));
    }

    #[tokio::test]
    async fn modlog_batch_tracks_last_entry() {
        let mut fx = fixture("", "").await;
        feed(
            &fx,
            "modactions:3,amod,boss,None,alpha,1650.0,x,null;7,hidi,boss,None,None,1651.0,x,null",
        );
        let RoomEvent::ModLog(entries) = next_event(&mut fx) else {
            panic!("expected modlog");
        };
        assert_eq!(entries.len(), 2);
        let state = fx.task.state.lock();
        assert_eq!(state.last_modlog, "7");
        assert_eq!(state.modlog.len(), 2);
    }

    #[tokio::test]
    async fn flags_and_limits_update_state() {
        let mut fx = fixture("", "").await;
        feed(&fx, "groupflagsupdate:4");
        let RoomEvent::SettingsChanged(flags) = next_event(&mut fx) else {
            panic!("expected settings");
        };
        assert!(flags.intersects(GroupFlags::NO_ANONS));

        feed(&fx, "ratelimitset:x:8");
        let RoomEvent::RateLimit(seconds) = next_event(&mut fx) else {
            panic!("expected ratelimit");
        };
        assert_eq!(seconds, 8);
        assert_eq!(fx.task.state.lock().ratelimit, 8);

        feed(&fx, "show_tb:60");
        assert!(matches!(next_event(&mut fx), RoomEvent::FloodBan(60)));
    }

    #[tokio::test]
    async fn banned_word_lists_are_decoded() {
        let fx = fixture("", "").await;
        feed(&fx, "bw:bad%2Cworse:awful");
        let state = fx.task.state.lock();
        assert_eq!(state.banned_parts, vec!["bad", "worse"]);
        assert_eq!(state.banned_words, vec!["awful"]);
    }

    #[tokio::test]
    async fn deletions_are_forwarded_per_message() {
        let mut fx = fixture("", "").await;
        feed(&fx, "delete:ID1");
        assert!(matches!(next_event(&mut fx), RoomEvent::MessageDeleted(id) if id == "ID1"));

        feed(&fx, "deleteall:ID2:ID3");
        assert!(matches!(next_event(&mut fx), RoomEvent::MessageDeleted(id) if id == "ID2"));
        assert!(matches!(next_event(&mut fx), RoomEvent::MessageDeleted(id) if id == "ID3"));
    }
}
