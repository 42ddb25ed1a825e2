//! Session manager: one account, any number of room sessions and at most
//! one private-message session, all funneled into a single event channel.

use std::collections::HashMap;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::ClientError;
use crate::event::ClientEvent;
use crate::pm::PmSession;
use crate::room::RoomSession;

/// Owns the account identity and all live sessions.
pub struct Manager {
    username: String,
    password: String,
    /// Anon number recovered from an `anonNNNN` login name
    recovered_anon: Option<u16>,
    rooms: HashMap<String, RoomSession>,
    pm: Option<PmSession>,
    events: UnboundedSender<ClientEvent>,
}

impl Manager {
    /// Create a manager and the receiving end of its event channel.
    ///
    /// Empty credentials mean anonymous; a login name of the form
    /// `anonNNNN` is recognised as a previous anonymous identity and its
    /// number is reclaimed on join.
    pub fn new(username: &str, password: &str) -> (Self, UnboundedReceiver<ClientEvent>) {
        let (events, receiver) = unbounded_channel();

        let recovered_anon = recover_anon_number(username);
        let username = if recovered_anon.is_some() { "" } else { username };

        (
            Self {
                username: username.to_string(),
                password: password.to_string(),
                recovered_anon,
                rooms: HashMap::new(),
                pm: None,
                events,
            },
            receiver,
        )
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Join a room. Room names are case-insensitive and folded to
    /// lowercase.
    pub async fn join_room(&mut self, name: &str) -> Result<&RoomSession, ClientError> {
        let name = name.to_lowercase();
        if self.rooms.contains_key(&name) {
            return Err(ClientError::AlreadyJoined(name));
        }

        let session = RoomSession::connect(
            &name,
            &self.username,
            &self.password,
            self.recovered_anon,
            self.events.clone(),
        )
        .await?;
        tracing::info!(room = %name, "joined room");

        Ok(self.rooms.entry(name).or_insert(session))
    }

    pub fn room(&self, name: &str) -> Option<&RoomSession> {
        self.rooms.get(&name.to_lowercase())
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomSession> {
        self.rooms.values()
    }

    /// Leave a room, closing its connection. Unknown names are a no-op.
    pub fn leave_room(&mut self, name: &str) {
        if let Some(session) = self.rooms.remove(&name.to_lowercase()) {
            session.disconnect();
        }
    }

    /// Open the private-message session. Requires full credentials.
    pub async fn join_pm(&mut self) -> Result<&PmSession, ClientError> {
        if self.pm.is_none() {
            let token = tango_auth::pm_auth(&self.username, &self.password).await?;
            let session = PmSession::connect(&token, self.events.clone()).await?;
            tracing::info!("joined private messaging");
            self.pm = Some(session);
        }
        self.pm.as_ref().ok_or(ClientError::NoPmSession)
    }

    pub fn pm(&self) -> Option<&PmSession> {
        self.pm.as_ref()
    }

    pub fn leave_pm(&mut self) {
        if let Some(session) = self.pm.take() {
            session.disconnect();
        }
    }

    /// Disconnect everything.
    pub fn leave_all(&mut self) {
        for (_, session) in self.rooms.drain() {
            session.disconnect();
        }
        self.leave_pm();
    }

    /// Replace the account's profile image.
    pub async fn upload_avatar(&self, path: &std::path::Path) -> Result<(), ClientError> {
        tango_auth::upload_avatar(&self.username, &self.password, path).await?;
        Ok(())
    }
}

/// Recognise an `anonNNNN` login name and extract its number.
fn recover_anon_number(username: &str) -> Option<u16> {
    let digits = username.strip_prefix("anon")?;
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
