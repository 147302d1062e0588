//! User / UserAssociations (C6, §4.4): per-user socket set, room-joined
//! map, the distributed join/leave protocol, and socket-lifecycle echoes.
//!
//! Associations are injected into `User` as a plain field (design note in
//! §9: "model as an embedded association component with explicit
//! dependency injection ... rather than inheritance") — `UserAssociations`
//! never owns a `User` back-reference; it only holds the capability handles
//! (state, transport, room registry, config) it needs.

use crate::config::ChatServiceOptions;
use crate::direct_messaging::DirectMessaging;
use crate::error::{ChatError, ChatResult, ConsistencyEvent, ErrorKind};
use crate::room::RoomRegistry;
use crate::state::{self, with_lock, State};
use crate::transport::Transport;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Semaphore};

/// Bounded concurrency for `disconnect_instance_sockets` (§4.4).
const DISCONNECT_CONCURRENCY: usize = 8;

#[derive(Default)]
struct LocalUserState {
    /// Socket IDs of this user on this instance.
    sockets: HashSet<String>,
    /// Per-socket set of rooms joined through that socket, on this instance.
    socket_rooms: HashMap<String, HashSet<String>>,
}

/// Per-user cluster keys (§3: "The State store records (socketId ->
/// userName) cluster-wide and (socketId -> instanceUID) for routing").
pub(crate) fn socket_user_key(socket_id: &str) -> String {
    format!("socket:user:{socket_id}")
}

fn socket_instance_key(socket_id: &str) -> String {
    format!("socket:instance:{socket_id}")
}

fn user_sockets_key(user_name: &str) -> String {
    format!("user:sockets:{user_name}")
}

/// Per-user transport channel joined by all of that user's sockets (glossary:
/// "Echo channel").
pub fn echo_channel(user_name: &str) -> String {
    format!("echo:{user_name}")
}

pub struct UserAssociations {
    user_name: String,
    instance_uid: Arc<str>,
    state: Arc<dyn State>,
    transport: Arc<dyn Transport>,
    rooms: Arc<RoomRegistry>,
    options: Arc<ChatServiceOptions>,
    consistency: broadcast::Sender<ConsistencyEvent>,
    local: StdMutex<LocalUserState>,
}

impl UserAssociations {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_name: impl Into<String>,
        instance_uid: Arc<str>,
        state: Arc<dyn State>,
        transport: Arc<dyn Transport>,
        rooms: Arc<RoomRegistry>,
        options: Arc<ChatServiceOptions>,
        consistency: broadcast::Sender<ConsistencyEvent>,
    ) -> Self {
        UserAssociations {
            user_name: user_name.into(),
            instance_uid,
            state,
            transport,
            rooms,
            options,
            consistency,
            local: StdMutex::new(LocalUserState::default()),
        }
    }

    /// Report a [`ConsistencyEvent::StoreConsistencyFailure`] when `result`
    /// failed because of the State store itself (§4.4/§7: I/O errors mid-
    /// operation surface as `serverError` *and* a consistency event), not
    /// because of an ordinary domain/validation error. Returns `result`
    /// unchanged either way.
    fn report_store_result<T>(&self, op_type: &str, result: ChatResult<T>) -> ChatResult<T> {
        if let Err(err) = &result {
            if err.kind == ErrorKind::ServerError {
                let _ = self.consistency.send(ConsistencyEvent::StoreConsistencyFailure {
                    user_name: self.user_name.clone(),
                    op_type: op_type.to_string(),
                    detail: err.message.clone(),
                });
            }
        }
        result
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    fn echo_channel(&self) -> String {
        echo_channel(&self.user_name)
    }

    /// Sockets of this user known to this instance.
    pub fn local_sockets(&self) -> Vec<String> {
        let local = self.local.lock().unwrap_or_else(|e| e.into_inner());
        local.sockets.iter().cloned().collect()
    }

    /// `listJoinedSockets` (§6): per-socket set of joined room names, on
    /// this instance.
    pub fn list_joined_sockets(&self) -> HashMap<String, Vec<String>> {
        let local = self.local.lock().unwrap_or_else(|e| e.into_inner());
        local
            .socket_rooms
            .iter()
            .map(|(socket, rooms)| {
                let mut rooms: Vec<String> = rooms.iter().cloned().collect();
                rooms.sort();
                (socket.clone(), rooms)
            })
            .collect()
    }

    fn sockets_joined_to_room(&self, room_name: &str) -> usize {
        let local = self.local.lock().unwrap_or_else(|e| e.into_inner());
        local.socket_rooms.values().filter(|rooms| rooms.contains(room_name)).count()
    }

    /// `registerSocket(id)` (§4.4), under the per-user lock (§5). Binds the
    /// socket's eventual disconnect to the `removeSocket` protocol: the
    /// transport queues the socket once it notices the disconnect (either a
    /// client hangup or an engine-initiated `disconnect`), and
    /// `ChatService::drain_disconnects` runs `remove_socket` for it.
    pub async fn register_socket(&self, socket_id: &str) -> ChatResult<usize> {
        let lock_name = state::user_lock_name(&self.user_name);
        let result = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || self.register_socket_locked(socket_id)).await;
        self.report_store_result("registerSocket", result)
    }

    async fn register_socket_locked(&self, socket_id: &str) -> ChatResult<usize> {
        if !self.transport.has_socket(socket_id) {
            return Err(ChatError::no_socket());
        }

        self.state.kv_set(&socket_user_key(socket_id), &self.user_name).await?;
        self.state.kv_set(&socket_instance_key(socket_id), &self.instance_uid).await?;
        self.state.set_add(&user_sockets_key(&self.user_name), socket_id).await?;

        {
            let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            local.sockets.insert(socket_id.to_string());
            local.socket_rooms.entry(socket_id.to_string()).or_default();
        }

        self.transport.join_channel(socket_id, &self.echo_channel()).await?;

        let n_connected = self.state.set_card(&user_sockets_key(&self.user_name)).await?;
        self.transport
            .send_to_channel(
                socket_id,
                &self.echo_channel(),
                "socketConnectEcho",
                json!({ "id": socket_id, "n": n_connected }),
            )
            .await?;

        Ok(n_connected)
    }

    /// `removeSocket(id)` (§4.4): leaves every room this socket joined, then
    /// drops the socket from local and cluster state, under the per-user
    /// lock (§5).
    pub async fn remove_socket(&self, socket_id: &str) -> ChatResult<usize> {
        let lock_name = state::user_lock_name(&self.user_name);
        let result = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || self.remove_socket_locked(socket_id)).await;
        self.report_store_result("removeSocket", result)
    }

    async fn remove_socket_locked(&self, socket_id: &str) -> ChatResult<usize> {
        let was_known = {
            let local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            local.sockets.contains(socket_id)
        };
        if !was_known {
            // Already cleaned up (e.g. the forced-disconnect path already ran
            // this protocol before the transport's disconnect queue caught
            // up). `removeSocket` is idempotent.
            return Ok(self.state.set_card(&user_sockets_key(&self.user_name)).await?);
        }

        let joined_rooms: Vec<String> = {
            let local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            local
                .socket_rooms
                .get(socket_id)
                .map(|rooms| rooms.iter().cloned().collect())
                .unwrap_or_default()
        };

        for room_name in joined_rooms {
            self.leave_socket_from_room(socket_id, &room_name).await?;
        }

        {
            let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            local.sockets.remove(socket_id);
            local.socket_rooms.remove(socket_id);
        }

        self.state.kv_del(&socket_user_key(socket_id)).await?;
        self.state.kv_del(&socket_instance_key(socket_id)).await?;
        self.state.set_remove(&user_sockets_key(&self.user_name), socket_id).await?;

        let n_connected = self.state.set_card(&user_sockets_key(&self.user_name)).await?;
        self.transport.leave_channel(socket_id, &self.echo_channel()).await.ok();
        self.transport
            .emit_to_channel(
                &self.echo_channel(),
                "socketDisconnectEcho",
                json!({ "id": socket_id, "n": n_connected }),
            )
            .await?;

        Ok(n_connected)
    }

    /// Bounded-concurrency forced disconnect of every local socket of this
    /// user (used by the server-side API, §4.4): ends the connection at the
    /// transport level, then runs the full `removeSocket` protocol for each
    /// socket so cluster/local state, room membership, and
    /// `socketDisconnectEcho` all stay in sync immediately (it does not wait
    /// on the transport's disconnect-drain seam).
    pub async fn disconnect_instance_sockets(&self) {
        let socket_ids = self.local_sockets();
        let semaphore = Arc::new(Semaphore::new(DISCONNECT_CONCURRENCY));
        let mut handles = Vec::with_capacity(socket_ids.len());

        for socket_id in &socket_ids {
            let transport = self.transport.clone();
            let semaphore = semaphore.clone();
            let socket_id = socket_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let _ = transport.disconnect(&socket_id, Some("serverDisconnect")).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        for socket_id in socket_ids {
            if let Err(err) = self.remove_socket(&socket_id).await {
                tracing::warn!(user = %self.user_name, socket = %socket_id, error = %err, "removeSocket failed after forced disconnect");
            }
        }
    }

    /// `joinSocketToRoom(id, roomName)` (§4.4), the 8-step protocol.
    pub async fn join_socket_to_room(&self, socket_id: &str, room_name: &str) -> ChatResult<usize> {
        if socket_id.is_empty() {
            return Err(ChatError::no_socket());
        }
        let lock_name = state::join_lock_name(&self.user_name, room_name);
        let result = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || async {
            self.join_socket_to_room_locked(socket_id, room_name).await
        })
        .await;
        self.report_store_result("joinSocketToRoom", result)
    }

    async fn join_socket_to_room_locked(&self, socket_id: &str, room_name: &str) -> ChatResult<usize> {
        let room_arc = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;

        let was_cluster_member = {
            let room = room_arc.lock().unwrap_or_else(|e| e.into_inner());
            room.is_member(&self.user_name)
        };

        {
            let mut room = room_arc.lock().unwrap_or_else(|e| e.into_inner());
            room.join(&self.user_name)?;
        }

        {
            let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            local
                .socket_rooms
                .entry(socket_id.to_string())
                .or_default()
                .insert(room_name.to_string());
        }

        self.transport.join_channel(socket_id, room_name).await?;

        if !was_cluster_member && self.options.enable_userlist_updates {
            self.transport
                .emit_to_channel(room_name, "roomUserJoined", json!({ "room": room_name, "user": self.user_name }))
                .await?;
        }

        let n_joined = self.sockets_joined_to_room(room_name);
        self.transport
            .emit_to_channel(
                &self.echo_channel(),
                "roomJoinedEcho",
                json!({ "room": room_name, "id": socket_id, "n": n_joined }),
            )
            .await?;

        Ok(n_joined)
    }

    /// Symmetric leave protocol (§4.4).
    pub async fn leave_socket_from_room(&self, socket_id: &str, room_name: &str) -> ChatResult<usize> {
        let lock_name = state::join_lock_name(&self.user_name, room_name);
        let result = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || async {
            self.leave_socket_from_room_locked(socket_id, room_name).await
        })
        .await;
        self.report_store_result("leaveSocketFromRoom", result)
    }

    async fn leave_socket_from_room_locked(&self, socket_id: &str, room_name: &str) -> ChatResult<usize> {
        let had_room = {
            let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            match local.socket_rooms.get_mut(socket_id) {
                Some(rooms) => rooms.remove(room_name),
                None => false,
            }
        };
        if !had_room {
            return Ok(self.sockets_joined_to_room(room_name));
        }

        self.transport.leave_channel(socket_id, room_name).await.ok();

        let n_joined = self.sockets_joined_to_room(room_name);
        self.transport
            .emit_to_channel(
                &self.echo_channel(),
                "roomLeftEcho",
                json!({ "room": room_name, "id": socket_id, "n": n_joined }),
            )
            .await?;

        // Single-instance reference deployment: this instance's last socket
        // for the room is also the cluster-wide last socket (see
        // DESIGN.md). A State-backed Room would instead require a
        // cluster-wide membership count here.
        if n_joined == 0 {
            if let Some(room_arc) = self.rooms.get(room_name) {
                {
                    let mut room = room_arc.lock().unwrap_or_else(|e| e.into_inner());
                    room.leave(&self.user_name);
                }
                if self.options.enable_userlist_updates {
                    self.transport
                        .emit_to_channel(room_name, "roomUserLeft", json!({ "room": room_name, "user": self.user_name }))
                        .await?;
                }
            }
        }

        Ok(n_joined)
    }

    /// Evict this user from `room_name` on this instance: leaves every
    /// local socket, then emits `roomAccessRemoved` once on the echo
    /// channel. Called both when this instance originates a list mutation
    /// and when a cluster-bus message arrives for a remote mutation
    /// (§4.4). A no-op if this user has no local sockets in the room.
    pub async fn evict_from_room(&self, room_name: &str) -> ChatResult<()> {
        let socket_ids: Vec<String> = {
            let local = self.local.lock().unwrap_or_else(|e| e.into_inner());
            local
                .socket_rooms
                .iter()
                .filter(|(_, rooms)| rooms.contains(room_name))
                .map(|(socket_id, _)| socket_id.clone())
                .collect()
        };

        if socket_ids.is_empty() {
            return Ok(());
        }

        for socket_id in &socket_ids {
            self.leave_socket_from_room(socket_id, room_name).await?;
        }

        self.transport
            .emit_to_channel(&self.echo_channel(), "roomAccessRemoved", json!({ "room": room_name }))
            .await?;
        Ok(())
    }
}

/// A chat user (§3): identity plus its `DirectMessaging` record and
/// `UserAssociations`.
pub struct User {
    name: String,
    direct_messaging: StdMutex<DirectMessaging>,
    associations: UserAssociations,
}

impl User {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        instance_uid: Arc<str>,
        state: Arc<dyn State>,
        transport: Arc<dyn Transport>,
        rooms: Arc<RoomRegistry>,
        options: Arc<ChatServiceOptions>,
        consistency: broadcast::Sender<ConsistencyEvent>,
    ) -> Self {
        let name = name.into();
        User {
            direct_messaging: StdMutex::new(DirectMessaging::new(name.clone())),
            associations: UserAssociations::new(name.clone(), instance_uid, state, transport, rooms, options, consistency),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn associations(&self) -> &UserAssociations {
        &self.associations
    }

    pub fn direct_messaging(&self) -> std::sync::MutexGuard<'_, DirectMessaging> {
        self.direct_messaging.lock().unwrap_or_else(|e| e.into_inner())
    }
}
