//! The private-message session.
//!
//! Direct messages ride a separate connection to a fixed host, not a room
//! shard. The handshake uses a token obtained out of band from the login
//! endpoint. Alongside messages the server pushes presence: the watch list
//! (a non-mutual friends list) and per-user tracking.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::connection::{Connection, ConnectionEvent};
use crate::error::ConnectError;
use crate::event::{ClientEvent, PmEvent, Presence, Subscribers};
use crate::post::Post;
use tango_proto::command::Command;
use tango_proto::ident;

const PM_HOST: &str = "c1.chatango.com";
const PM_PORT: u16 = 5222;

#[derive(Default)]
struct PmState {
    /// Friends list; the server pushes updates for everyone on it
    watch: HashMap<String, Presence>,
    /// Users we asked to track without befriending
    track: HashMap<String, Presence>,
}

/// Handle to the private-message session.
pub struct PmSession {
    conn: Connection,
    state: Arc<Mutex<PmState>>,
    subscribers: Arc<Mutex<Subscribers<PmEvent>>>,
    emitter: PmEmitter,
}

impl PmSession {
    /// Connect and authenticate with a token from
    /// [`tango_auth::pm_auth`].
    pub async fn connect(
        auth_token: &str,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<Self, ConnectError> {
        let session_id = ident::new_session_id();
        let (conn_tx, conn_rx) = unbounded_channel();
        let conn = Connection::connect(
            PM_HOST,
            PM_PORT,
            &["tlogin", auth_token, session_id.as_str()],
            conn_tx,
        )
        .await?;

        let state = Arc::new(Mutex::new(PmState::default()));
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let emitter = PmEmitter {
            events,
            subscribers: subscribers.clone(),
        };

        let task = PmTask {
            state: state.clone(),
            conn: conn.clone(),
            emitter: emitter.clone(),
        };
        tokio::spawn(task.run(conn_rx));

        Ok(Self {
            conn,
            state,
            subscribers,
            emitter,
        })
    }

    /// Register an event callback, invoked in registration order before
    /// the event reaches the manager channel.
    pub fn subscribe(&self, callback: impl Fn(&PmEvent) + Send + Sync + 'static) {
        self.subscribers.lock().subscribe(callback);
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.emitter.emit(PmEvent::Disconnected);
    }

    /// Send a direct message.
    pub fn send_post(&self, user: &str, body: &str) {
        let escaped = crate::room::escape_html(body).replace('\n', "<br/>");
        let wrapped = format!("<m>{escaped}</m>");
        self.conn.send(&["msg", user, wrapped.as_str()]);
    }

    /// The watch list with last-known presence.
    pub fn friends(&self) -> HashMap<String, Presence> {
        self.state.lock().watch.clone()
    }

    /// Presence of everyone we track without befriending.
    pub fn tracked(&self) -> HashMap<String, Presence> {
        self.state.lock().track.clone()
    }

    pub fn add_friend(&self, user: &str) {
        self.conn.send(&["wladd", user]);
    }

    pub fn remove_friend(&self, user: &str) {
        self.conn.send(&["wldelete", user]);
    }

    /// Ask for presence updates for a user outside the watch list.
    pub fn track(&self, user: &str) {
        self.state.lock().track.entry(user.to_string()).or_insert(Presence {
            last_seen: 0.0,
            status: String::new(),
        });
        self.conn.send(&["track", user]);
    }
}

#[derive(Clone)]
struct PmEmitter {
    events: UnboundedSender<ClientEvent>,
    subscribers: Arc<Mutex<Subscribers<PmEvent>>>,
}

impl PmEmitter {
    fn emit(&self, event: PmEvent) {
        self.subscribers.lock().emit(&event);
        let _ = self.events.send(ClientEvent::Pm(event));
    }
}

struct PmTask {
    state: Arc<Mutex<PmState>>,
    conn: Connection,
    emitter: PmEmitter,
}

impl PmTask {
    async fn run(self, mut events: UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Command(cmd) => self.handle(&cmd),
                ConnectionEvent::Closed(error) => {
                    self.emitter.emit(PmEvent::ConnectionLost(error));
                    break;
                }
            }
        }
        tracing::debug!("pm task finished");
    }

    fn handle(&self, cmd: &Command) {
        match cmd.mnemonic.as_str() {
            "" => {}
            // Handshake ACK; note the different case from room commands
            "OK" => {
                self.conn.send(&["settings"]);
                self.conn.send(&["wl"]);
                self.emitter.emit(PmEvent::Connected);
            }
            // Echo of our tlogin session id and username
            "seller_name" => {}
            "msg" => self.emitter.emit(PmEvent::Message {
                post: Post::private(&cmd.args),
                offline: false,
            }),
            "msgoff" => self.emitter.emit(PmEvent::Message {
                post: Post::private(&cmd.args),
                offline: true,
            }),
            "wl" => self.on_watch_list(&cmd.args),
            "wladd" => self.on_watch_add(&cmd.args),
            "wldelete" => self.on_watch_delete(&cmd.args),
            "track" => self.on_track(&cmd.args),
            "status" => self.on_status(&cmd.args),
            other => tracing::trace!(mnemonic = other, "unhandled pm command"),
        }
    }

    /// Full watch list: repeating `name:last:status:0` groups.
    fn on_watch_list(&self, args: &[String]) {
        let mut watch = HashMap::new();
        for group in args.chunks(4) {
            let [name, last, status, ..] = group else {
                continue;
            };
            watch.insert(
                name.clone(),
                Presence {
                    last_seen: last.parse().unwrap_or(0.0),
                    status: status.clone(),
                },
            );
        }
        self.state.lock().watch = watch;
        self.emitter.emit(PmEvent::WatchList);
    }

    /// One user added: `name:status:last`, fields swapped relative to
    /// the full list.
    fn on_watch_add(&self, args: &[String]) {
        let field = |i: usize| args.get(i).cloned().unwrap_or_default();
        self.state.lock().watch.insert(
            field(0),
            Presence {
                last_seen: field(2).parse().unwrap_or(0.0),
                status: field(1),
            },
        );
        self.emitter.emit(PmEvent::WatchListUpdate);
    }

    fn on_watch_delete(&self, args: &[String]) {
        let name = args.first().map_or("", String::as_str);
        self.state.lock().watch.remove(name);
        self.emitter.emit(PmEvent::WatchListUpdate);
    }

    fn on_track(&self, args: &[String]) {
        let field = |i: usize| args.get(i).cloned().unwrap_or_default();
        self.state.lock().track.insert(
            field(0),
            Presence {
                last_seen: field(1).parse().unwrap_or(0.0),
                status: field(2),
            },
        );
        self.emitter.emit(PmEvent::Track);
    }

    /// Presence change for a user on the watch list, the track list or
    /// both.
    fn on_status(&self, args: &[String]) {
        let field = |i: usize| args.get(i).cloned().unwrap_or_default();
        let name = field(0);
        let presence = Presence {
            last_seen: field(1).parse().unwrap_or(0.0),
            status: field(2),
        };

        let (watched, tracked) = {
            let mut state = self.state.lock();
            let watched = state.watch.contains_key(&name);
            if watched {
                state.watch.insert(name.clone(), presence.clone());
            }
            let tracked = state.track.contains_key(&name);
            if tracked {
                state.track.insert(name, presence);
            }
            (watched, tracked)
        };
        if watched {
            self.emitter.emit(PmEvent::WatchListUpdate);
        }
        if tracked {
            self.emitter.emit(PmEvent::Track);
        }
    }
}
