//! ChatService facade (C8, §4.6): binds the other components, runs the
//! accept loop, and exposes the server-side API (`addUser`, `addRoom`,
//! `removeRoom`, `disconnectUserSockets`) plus the unified client-command
//! `exec` entry point (§4.5).

use crate::command::{CommandBinder, HookDecision};
use crate::config::ChatServiceOptions;
use crate::direct_messaging::DirectListName;
use crate::error::{ChatError, ChatResult, ConsistencyEvent, ErrorKind};
use crate::room::{RoomListName, RoomRegistry};
use crate::state::{self, with_lock, ClusterMessage, State, CLUSTER_BUS_TOPIC};
use crate::transport::Transport;
use crate::user::{echo_channel, User};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::broadcast;

/// Channel every registered socket joins, used for `systemMessage` fan-out
/// (§6) — distinct from any one room's channel, mirroring the reference
/// project's separate `routes::system` surface.
pub const SYSTEM_CHANNEL: &str = "__system__";

type ConnectFuture = Pin<Box<dyn Future<Output = ChatResult<String>> + Send>>;
type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// `onConnect(authPayload) -> userName` (§6). Rejecting with an error
/// surfaces as `loginRejected`.
pub type OnConnectHook = Arc<dyn Fn(Value) -> ConnectFuture + Send + Sync>;
pub type OnCloseHook = Arc<dyn Fn() -> CloseFuture + Send + Sync>;

/// Options for the unified server-side `exec` entry point (§4.5): runs the
/// same pipeline without a real socket when `is_local_call` is set.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub id: Option<String>,
    pub bypass_permissions: bool,
    pub is_local_call: bool,
}

/// Snapshot of this instance's local activity (§9 "Supplemented features":
/// an internal accessor, not a wire command).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub instance_uid: String,
    pub active_users: usize,
    pub active_rooms: usize,
    pub active_sockets: usize,
}

/// Parameters for [`ChatService::add_room`] (§4.6 `addRoom(name, state)`).
#[derive(Debug, Clone, Default)]
pub struct RoomOptions {
    pub owner: Option<String>,
    pub whitelist_only: bool,
}

pub struct ChatService {
    instance_uid: Arc<str>,
    options: Arc<ChatServiceOptions>,
    state: Arc<dyn State>,
    transport: Arc<dyn Transport>,
    rooms: Arc<RoomRegistry>,
    users: StdMutex<HashMap<String, Arc<User>>>,
    binder: StdMutex<CommandBinder>,
    consistency: broadcast::Sender<ConsistencyEvent>,
    system_messages: broadcast::Sender<Value>,
    on_connect: StdMutex<Option<OnConnectHook>>,
    on_close: StdMutex<Option<OnCloseHook>>,
}

impl ChatService {
    pub fn new(options: ChatServiceOptions, state: Arc<dyn State>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let instance_uid: Arc<str> = Arc::from(uuid::Uuid::new_v4().to_string());
        let (consistency, _) = broadcast::channel(256);
        let (system_messages, _) = broadcast::channel(256);

        let service = Arc::new(ChatService {
            instance_uid,
            options: Arc::new(options),
            state,
            transport,
            rooms: Arc::new(RoomRegistry::new()),
            users: StdMutex::new(HashMap::new()),
            binder: StdMutex::new(CommandBinder::new()),
            consistency,
            system_messages,
            on_connect: StdMutex::new(None),
            on_close: StdMutex::new(None),
        });
        ChatService::spawn_cluster_bus_listener(Arc::downgrade(&service));
        service
    }

    pub fn instance_uid(&self) -> &str {
        &self.instance_uid
    }

    pub fn options(&self) -> &ChatServiceOptions {
        &self.options
    }

    pub fn set_on_connect(&self, hook: OnConnectHook) {
        *self.on_connect.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn set_on_close(&self, hook: OnCloseHook) {
        *self.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn set_before_hook(&self, command: impl Into<String>, hook: crate::command::BeforeHook) {
        self.binder.lock().unwrap_or_else(|e| e.into_inner()).set_before_hook(command, hook);
    }

    pub fn set_after_hook(&self, command: impl Into<String>, hook: crate::command::AfterHook) {
        self.binder.lock().unwrap_or_else(|e| e.into_inner()).set_after_hook(command, hook);
    }

    pub fn subscribe_consistency_events(&self) -> broadcast::Receiver<ConsistencyEvent> {
        self.consistency.subscribe()
    }

    pub fn subscribe_system_messages(&self) -> broadcast::Receiver<Value> {
        self.system_messages.subscribe()
    }

    fn report_consistency(&self, event: ConsistencyEvent) {
        let (level, detail) = match &event {
            ConsistencyEvent::StoreConsistencyFailure { user_name, op_type, detail } => ("store", format!("{user_name}/{op_type}: {detail}")),
            ConsistencyEvent::TransportConsistencyFailure { user_name, op_type, detail } => ("transport", format!("{user_name}/{op_type}: {detail}")),
        };
        tracing::warn!(kind = level, %detail, "consistency failure");
        let _ = self.consistency.send(event);
    }

    fn local_user(&self, name: &str) -> Option<Arc<User>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    fn get_or_create_user(&self, name: &str) -> ChatResult<Arc<User>> {
        crate::validator::validate_name(name)?;
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(u) = users.get(name) {
            return Ok(u.clone());
        }
        let user = Arc::new(User::new(
            name,
            self.instance_uid.clone(),
            self.state.clone(),
            self.transport.clone(),
            self.rooms.clone(),
            self.options.clone(),
            self.consistency.clone(),
        ));
        users.insert(name.to_string(), user.clone());
        Ok(user)
    }

    fn require_user(&self, name: &str) -> ChatResult<Arc<User>> {
        self.local_user(name).ok_or_else(|| ChatError::new(ErrorKind::NoUserOnline, format!("'{name}' is not known to this instance")))
    }

    // ---- Server-side API (§4.6) ----------------------------------------

    /// `addUser(name, state)` (§4.6). `state` is left to future extension
    /// (e.g. preloaded direct-messaging lists); the bundled engine only
    /// needs the name today.
    pub fn add_user(&self, name: &str) -> ChatResult<()> {
        crate::validator::validate_name(name)?;
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if users.contains_key(name) {
            return Err(ChatError::user_exists(name));
        }
        users.insert(
            name.to_string(),
            Arc::new(User::new(
                name,
                self.instance_uid.clone(),
                self.state.clone(),
                self.transport.clone(),
                self.rooms.clone(),
                self.options.clone(),
                self.consistency.clone(),
            )),
        );
        tracing::info!(user = name, "user added");
        Ok(())
    }

    /// `addRoom(name, state)` (§4.6).
    pub fn add_room(&self, name: &str, opts: RoomOptions) -> ChatResult<()> {
        crate::validator::validate_name(name)?;
        self.rooms
            .create(name, opts.owner, opts.whitelist_only, self.options.history_max_messages, self.options.history_max_get_messages)
            .map(|_| ())?;
        tracing::info!(room = name, "room added");
        Ok(())
    }

    /// `removeRoom(name)` (§4.6): evicts all joined users, then drops the
    /// room's state.
    pub async fn remove_room(&self, name: &str) -> ChatResult<()> {
        self.remove_room_internal(name).await
    }

    /// `disconnectUserSockets(name)` (§4.6).
    pub async fn disconnect_user_sockets(&self, name: &str) -> ChatResult<()> {
        let user = self.require_user(name)?;
        user.associations().disconnect_instance_sockets().await;
        Ok(())
    }

    /// Internal instance-activity snapshot (§9 supplemented feature).
    pub fn stats(&self) -> Stats {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let active_sockets: usize = users.values().map(|u| u.associations().local_sockets().len()).sum();
        Stats {
            instance_uid: self.instance_uid.to_string(),
            active_users: users.len(),
            active_rooms: self.rooms.list().len(),
            active_sockets,
        }
    }

    /// `close()` (§4.6): stop accepting new sockets, wait up to
    /// `closeTimeout` for clients to disconnect, call `onClose`, then drop
    /// state.
    pub async fn close(&self) {
        self.transport.stop_accepting().await;

        let user_names: Vec<String> = self.users.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        let disconnects = user_names.iter().map(|name| {
            let user = self.require_user(name).ok();
            async move {
                if let Some(user) = user {
                    user.associations().disconnect_instance_sockets().await;
                }
            }
        });
        let _ = tokio::time::timeout(self.options.close_timeout, futures_join_all(disconnects)).await;

        if let Some(hook) = self.on_close.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            hook().await;
        }
    }

    /// Bind a newly accepted socket: run `onConnect` to resolve the
    /// authenticated user name, register the socket, join the system
    /// channel, and emit `loginConfirmed`/`loginRejected` (§4.4, §6).
    pub async fn bind_socket(&self, socket_id: &str, auth_payload: Value) -> ChatResult<()> {
        let on_connect = self.on_connect.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let user_name = match on_connect {
            Some(hook) => match hook(auth_payload).await {
                Ok(name) => name,
                Err(err) => {
                    self.transport.emit(socket_id, "loginRejected", json!({ "error": err.to_wire(self.options.use_raw_error_objects) })).await?;
                    self.transport.disconnect(socket_id, Some("loginRejected")).await?;
                    return Err(err);
                }
            },
            None => {
                return Err(ChatError::server_error("no onConnect hook registered"));
            }
        };

        let user = self.get_or_create_user(&user_name)?;
        let n_connected = user.associations().register_socket(socket_id).await?;
        self.transport.join_channel(socket_id, SYSTEM_CHANNEL).await?;
        self.transport
            .emit(socket_id, "loginConfirmed", json!({ "userName": user_name, "id": socket_id, "n": n_connected }))
            .await?;
        Ok(())
    }

    /// Drain and bind every pending connection the transport has queued.
    /// The concrete accept loop (polling a real listener) is out of scope
    /// (§1); this is the seam a caller drives from its own event loop.
    pub async fn accept_pending(&self) -> ChatResult<usize> {
        let mut count = 0;
        while let Some(pending) = self.transport.poll_pending().await {
            self.bind_socket(&pending.socket_id, pending.auth_payload).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Drain every socket the transport has noticed disconnecting — a
    /// client hangup the engine didn't initiate — and run `removeSocket`
    /// (§4.4) for each: leaves every room it had joined, drops its
    /// local/cluster state, and emits `socketDisconnectEcho`. Symmetric to
    /// `accept_pending`; the concrete disconnect-detection loop is out of
    /// scope (§1).
    pub async fn drain_disconnects(&self) -> ChatResult<usize> {
        let mut count = 0;
        while let Some(socket_id) = self.transport.poll_disconnected().await {
            self.remove_socket_everywhere(&socket_id).await;
            count += 1;
        }
        Ok(count)
    }

    async fn remove_socket_everywhere(&self, socket_id: &str) {
        let owner = match self.state.kv_get(&crate::user::socket_user_key(socket_id)).await {
            Ok(owner) => owner,
            Err(err) => {
                self.report_consistency(ConsistencyEvent::StoreConsistencyFailure {
                    user_name: String::new(),
                    op_type: "lookupSocketOwner".to_string(),
                    detail: err.to_string(),
                });
                return;
            }
        };
        let Some(user_name) = owner else { return };
        if let Some(user) = self.local_user(&user_name) {
            if let Err(err) = user.associations().remove_socket(socket_id).await {
                self.report_consistency(ConsistencyEvent::TransportConsistencyFailure {
                    user_name,
                    op_type: "removeSocket".to_string(),
                    detail: err.to_string(),
                });
            }
        }
    }

    fn spawn_cluster_bus_listener(weak: Weak<ChatService>) {
        tokio::spawn(async move {
            let mut receiver = match weak.upgrade() {
                Some(service) => service.state.subscribe(CLUSTER_BUS_TOPIC),
                None => return,
            };
            loop {
                let message = match receiver.recv().await {
                    Ok(m) => m,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(service) = weak.upgrade() else { break };
                service.handle_cluster_message(message).await;
            }
        });
    }

    async fn handle_cluster_message(&self, message: ClusterMessage) {
        match message {
            ClusterMessage::DisconnectUserFromRoom { user, room, origin_instance } => {
                if origin_instance == *self.instance_uid {
                    return; // already evicted synchronously by the originator
                }
                if let Some(u) = self.local_user(&user) {
                    let fut = u.associations().evict_from_room(&room);
                    if tokio::time::timeout(self.options.bus_ack_timeout, fut).await.is_err() {
                        self.report_consistency(ConsistencyEvent::TransportConsistencyFailure {
                            user_name: user,
                            op_type: "disconnectUserFromRoom".to_string(),
                            detail: format!("timed out evicting from '{room}' within bus_ack_timeout"),
                        });
                    }
                }
            }
            ClusterMessage::RoomRemoved { room, origin_instance } => {
                if origin_instance == *self.instance_uid {
                    return;
                }
                let user_names: Vec<String> = self.users.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
                for name in user_names {
                    if let Some(u) = self.local_user(&name) {
                        let _ = u.associations().evict_from_room(&room).await;
                    }
                }
            }
        }
    }

    /// Cross-instance eviction (§4.4): evict every evicted user that has
    /// local sockets, and publish a cluster-bus message so other instances
    /// do the same for theirs.
    async fn evict_and_publish(&self, room_name: &str, evicted: &HashSet<String>) {
        for user_name in evicted {
            if let Some(user) = self.local_user(user_name) {
                if let Err(err) = user.associations().evict_from_room(room_name).await {
                    self.report_consistency(ConsistencyEvent::TransportConsistencyFailure {
                        user_name: user_name.clone(),
                        op_type: "evictFromRoom".to_string(),
                        detail: err.to_string(),
                    });
                }
            }
            let publish = self.state.publish(
                CLUSTER_BUS_TOPIC,
                ClusterMessage::DisconnectUserFromRoom {
                    user: user_name.clone(),
                    room: room_name.to_string(),
                    origin_instance: self.instance_uid.to_string(),
                },
            );
            if tokio::time::timeout(self.options.bus_ack_timeout, publish).await.is_err() {
                self.report_consistency(ConsistencyEvent::TransportConsistencyFailure {
                    user_name: user_name.clone(),
                    op_type: "publishDisconnectUserFromRoom".to_string(),
                    detail: "cluster bus publish exceeded bus_ack_timeout".to_string(),
                });
            }
        }
    }

    async fn remove_room_internal(&self, room_name: &str) -> ChatResult<()> {
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let members = room.lock().unwrap_or_else(|e| e.into_inner()).userlist();
        self.rooms.remove(room_name);

        for member in &members {
            if let Some(user) = self.local_user(member) {
                let _ = user.associations().evict_from_room(room_name).await;
            }
        }
        let _ = self
            .state
            .publish(
                CLUSTER_BUS_TOPIC,
                ClusterMessage::RoomRemoved { room: room_name.to_string(), origin_instance: self.instance_uid.to_string() },
            )
            .await;
        tracing::info!(room = room_name, "room removed");
        Ok(())
    }

    async fn notify_room_list_change(&self, room_name: &str, event: &str, list: &str, names: &[String]) -> ChatResult<()> {
        if self.options.enable_access_lists_updates {
            self.transport.emit_to_channel(room_name, event, json!({ "room": room_name, "list": list, "names": names })).await?;
        }
        Ok(())
    }

    // ---- Per-command dispatch (§4.5 step 3, §6 vocabulary) --------------

    async fn do_direct_add_to_list(&self, caller: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let list = DirectListName::parse(arg_str(&args, 0)?)?;
        let values = arg_str_array(&args, 1)?;
        let user = self.require_user(caller)?;
        user.direct_messaging().add_to_list(list, &values)?;
        Ok(vec![])
    }

    async fn do_direct_remove_from_list(&self, caller: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let list = DirectListName::parse(arg_str(&args, 0)?)?;
        let values = arg_str_array(&args, 1)?;
        let user = self.require_user(caller)?;
        user.direct_messaging().remove_from_list(list, &values)?;
        Ok(vec![])
    }

    async fn do_direct_get_access_list(&self, caller: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let list = DirectListName::parse(arg_str(&args, 0)?)?;
        let user = self.require_user(caller)?;
        let names = user.direct_messaging().get_list(list);
        Ok(vec![json!(names)])
    }

    async fn do_direct_get_whitelist_mode(&self, caller: &str, _args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let user = self.require_user(caller)?;
        Ok(vec![json!(user.direct_messaging().get_mode())])
    }

    async fn do_direct_set_whitelist_mode(&self, caller: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let mode = arg_bool(&args, 0)?;
        let user = self.require_user(caller)?;
        user.direct_messaging().change_mode(mode);
        Ok(vec![])
    }

    async fn do_direct_message(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        if !self.options.enable_direct_messages {
            return Err(ChatError::not_allowed("direct messages are disabled"));
        }
        let target_name = arg_str(&args, 0)?.to_string();
        let payload = arg_obj(&args, 1)?;
        let text_message = payload.get("textMessage").and_then(Value::as_str).unwrap_or("").to_string();

        let target = self.require_user(&target_name)?;
        target.direct_messaging().message(caller, bypass_permissions)?;

        if target.associations().local_sockets().is_empty() {
            return Err(ChatError::no_user_online(&target_name));
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let envelope = json!({
            "author": caller,
            "textMessage": text_message,
            "timestamp": timestamp,
        });
        self.transport.emit_to_channel(&echo_channel(&target_name), "directMessage", envelope.clone()).await?;
        self.transport.emit_to_channel(&echo_channel(caller), "directMessageEcho", envelope.clone()).await?;
        Ok(vec![envelope])
    }

    async fn do_list_joined_sockets(&self, caller: &str, _args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let user = self.require_user(caller)?;
        Ok(vec![json!(user.associations().list_joined_sockets())])
    }

    async fn do_list_rooms(&self, _caller: &str, _args: Vec<Value>) -> ChatResult<Vec<Value>> {
        Ok(vec![json!(self.rooms.list())])
    }

    async fn do_room_create(&self, caller: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        if !self.options.enable_rooms_management {
            return Err(ChatError::not_allowed("room management is disabled"));
        }
        let name = arg_str(&args, 0)?.to_string();
        let whitelist_only = args.get(1).and_then(Value::as_bool).unwrap_or(false);
        self.add_room(&name, RoomOptions { owner: Some(caller.to_string()), whitelist_only })?;
        Ok(vec![])
    }

    async fn do_room_delete(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        if !self.options.enable_rooms_management {
            return Err(ChatError::not_allowed("room management is disabled"));
        }
        let name = arg_str(&args, 0)?;
        let room = self.rooms.get(name).ok_or_else(|| ChatError::no_room(name))?;
        let is_owner = room.lock().unwrap_or_else(|e| e.into_inner()).check_is_owner(caller);
        if !bypass_permissions && !is_owner {
            return Err(ChatError::not_allowed(format!("'{caller}' is not the owner of room '{name}'")));
        }
        self.remove_room_internal(name).await?;
        Ok(vec![])
    }

    async fn do_room_add_to_list(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?.to_string();
        let list = RoomListName::parse(arg_str(&args, 1)?)?;
        let values = arg_str_array(&args, 2)?;
        let room = self.rooms.get(&room_name).ok_or_else(|| ChatError::no_room(&room_name))?;
        let lock_name = state::room_lock_name(&room_name);
        let evicted = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || async {
            room.lock().unwrap_or_else(|e| e.into_inner()).add_to_list(caller, list, &values, bypass_permissions)
        })
        .await?;
        self.notify_room_list_change(&room_name, "roomAccessListAdded", list.as_str(), &values).await?;
        self.evict_and_publish(&room_name, &evicted).await;
        Ok(vec![])
    }

    async fn do_room_remove_from_list(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?.to_string();
        let list = RoomListName::parse(arg_str(&args, 1)?)?;
        let values = arg_str_array(&args, 2)?;
        let room = self.rooms.get(&room_name).ok_or_else(|| ChatError::no_room(&room_name))?;
        let lock_name = state::room_lock_name(&room_name);
        let evicted = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || async {
            room.lock().unwrap_or_else(|e| e.into_inner()).remove_from_list(caller, list, &values, bypass_permissions)
        })
        .await?;
        self.notify_room_list_change(&room_name, "roomAccessListRemoved", list.as_str(), &values).await?;
        self.evict_and_publish(&room_name, &evicted).await;
        Ok(vec![])
    }

    async fn do_room_set_whitelist_mode(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?.to_string();
        let mode = arg_bool(&args, 1)?;
        let room = self.rooms.get(&room_name).ok_or_else(|| ChatError::no_room(&room_name))?;
        let lock_name = state::room_lock_name(&room_name);
        let (evicted, new_mode) = with_lock(self.state.as_ref(), &lock_name, self.options.lock_ttl, || async {
            room.lock().unwrap_or_else(|e| e.into_inner()).change_mode(caller, mode, bypass_permissions)
        })
        .await?;
        if self.options.enable_access_lists_updates {
            self.transport.emit_to_channel(&room_name, "roomModeChanged", json!({ "room": room_name, "mode": new_mode })).await?;
        }
        self.evict_and_publish(&room_name, &evicted).await;
        Ok(vec![])
    }

    async fn do_room_get_access_list(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let list = RoomListName::parse(arg_str(&args, 1)?)?;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let names = room.lock().unwrap_or_else(|e| e.into_inner()).get_list(caller, list, bypass_permissions)?;
        Ok(vec![json!(names)])
    }

    async fn do_room_get_owner(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let owner = room.lock().unwrap_or_else(|e| e.into_inner()).get_owner(caller, bypass_permissions)?;
        Ok(vec![json!(owner)])
    }

    async fn do_room_get_whitelist_mode(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let mode = room.lock().unwrap_or_else(|e| e.into_inner()).get_mode(caller, bypass_permissions)?;
        Ok(vec![json!(mode)])
    }

    async fn do_room_history_get(&self, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let from_id = arg_u64(&args, 1)?;
        let limit = arg_u64(&args, 2)? as usize;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let messages = room.lock().unwrap_or_else(|e| e.into_inner()).get_messages(from_id, limit);
        Ok(vec![json!(messages)])
    }

    async fn do_room_history_info(&self, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let info = room.lock().unwrap_or_else(|e| e.into_inner()).get_history_info();
        Ok(vec![json!(info)])
    }

    async fn do_room_recent_history(&self, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let messages = room.lock().unwrap_or_else(|e| e.into_inner()).get_recent_messages();
        Ok(vec![json!(messages)])
    }

    async fn do_room_join(&self, caller: &str, socket_id: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let user = self.require_user(caller)?;
        let n = user.associations().join_socket_to_room(socket_id, room_name).await?;
        Ok(vec![json!(n)])
    }

    async fn do_room_leave(&self, caller: &str, socket_id: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let user = self.require_user(caller)?;
        let n = user.associations().leave_socket_from_room(socket_id, room_name).await?;
        Ok(vec![json!(n)])
    }

    async fn do_room_message(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?.to_string();
        let payload = arg_obj(&args, 1)?;
        let text_message = payload.get("textMessage").and_then(Value::as_str).unwrap_or("").to_string();
        let mut extensions = payload.clone();
        extensions.remove("textMessage");

        let room = self.rooms.get(&room_name).ok_or_else(|| ChatError::no_room(&room_name))?;
        let message = room.lock().unwrap_or_else(|e| e.into_inner()).message(caller, text_message, extensions, bypass_permissions)?;
        self.transport.emit_to_channel(&room_name, "roomMessage", json!({ "room": room_name, "message": message })).await?;
        Ok(vec![json!({ "id": message.id })])
    }

    async fn do_room_user_seen(&self, caller: &str, args: Vec<Value>, bypass_permissions: bool) -> ChatResult<Vec<Value>> {
        let room_name = arg_str(&args, 0)?;
        let target = arg_str(&args, 1)?;
        let room = self.rooms.get(room_name).ok_or_else(|| ChatError::no_room(room_name))?;
        let seen = room.lock().unwrap_or_else(|e| e.into_inner()).user_seen(caller, target, bypass_permissions)?;
        Ok(vec![json!(seen)])
    }

    async fn do_system_message(&self, caller: &str, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let payload = arg_obj(&args, 0)?;
        let envelope = json!({ "author": caller, "payload": payload });
        self.transport.emit_to_channel(SYSTEM_CHANNEL, "systemMessage", envelope.clone()).await?;
        let _ = self.system_messages.send(envelope.clone());
        Ok(vec![envelope])
    }

    /// Unified server-side entry point (§4.5): runs the same
    /// validate/before/dispatch/after pipeline without a real socket when
    /// `opts.is_local_call` is set, exactly the shape a bound socket
    /// command uses.
    pub async fn exec(&self, command: &str, user_name: &str, opts: ExecOptions, args: Vec<Value>) -> ChatResult<Vec<Value>> {
        let bypass = opts.bypass_permissions;
        let is_local_call = opts.is_local_call;
        let socket_owned = opts.id;
        let command_owned = command.to_string();
        let user_owned = user_name.to_string();

        macro_rules! run {
            ($dispatch:expr) => {
                self.run_with_hooks(&command_owned, &user_owned, socket_owned.as_deref(), is_local_call, args, $dispatch)
                    .await
            };
        }

        match command {
            "directAddToList" => run!(|args| self.do_direct_add_to_list(&user_owned, args)),
            "directRemoveFromList" => run!(|args| self.do_direct_remove_from_list(&user_owned, args)),
            "directGetAccessList" => run!(|args| self.do_direct_get_access_list(&user_owned, args)),
            "directGetWhitelistMode" => run!(|args| self.do_direct_get_whitelist_mode(&user_owned, args)),
            "directSetWhitelistMode" => run!(|args| self.do_direct_set_whitelist_mode(&user_owned, args)),
            "directMessage" => run!(|args| self.do_direct_message(&user_owned, args, bypass)),
            "listJoinedSockets" => run!(|args| self.do_list_joined_sockets(&user_owned, args)),
            "listRooms" => run!(|args| self.do_list_rooms(&user_owned, args)),
            "roomCreate" => run!(|args| self.do_room_create(&user_owned, args)),
            "roomDelete" => run!(|args| self.do_room_delete(&user_owned, args, bypass)),
            "roomAddToList" => run!(|args| self.do_room_add_to_list(&user_owned, args, bypass)),
            "roomRemoveFromList" => run!(|args| self.do_room_remove_from_list(&user_owned, args, bypass)),
            "roomSetWhitelistMode" => run!(|args| self.do_room_set_whitelist_mode(&user_owned, args, bypass)),
            "roomGetAccessList" => run!(|args| self.do_room_get_access_list(&user_owned, args, bypass)),
            "roomGetOwner" => run!(|args| self.do_room_get_owner(&user_owned, args, bypass)),
            "roomGetWhitelistMode" => run!(|args| self.do_room_get_whitelist_mode(&user_owned, args, bypass)),
            "roomHistoryGet" => run!(|args| self.do_room_history_get(args)),
            "roomHistoryInfo" => run!(|args| self.do_room_history_info(args)),
            "roomRecentHistory" => run!(|args| self.do_room_recent_history(args)),
            "roomJoin" => {
                let socket = socket_owned.clone().unwrap_or_default();
                run!(|args| self.do_room_join(&user_owned, &socket, args))
            }
            "roomLeave" => {
                let socket = socket_owned.clone().unwrap_or_default();
                run!(|args| self.do_room_leave(&user_owned, &socket, args))
            }
            "roomMessage" => run!(|args| self.do_room_message(&user_owned, args, bypass)),
            "roomUserSeen" => run!(|args| self.do_room_user_seen(&user_owned, args, bypass)),
            "systemMessage" => run!(|args| self.do_system_message(&user_owned, args)),
            other => Err(ChatError::new(ErrorKind::NoCommand, format!("unknown command '{other}'"))),
        }
    }

    async fn run_with_hooks<D, Fut>(
        &self,
        command: &str,
        user_name: &str,
        socket_id: Option<&str>,
        is_local_call: bool,
        args: Vec<Value>,
        dispatch: D,
    ) -> ChatResult<Vec<Value>>
    where
        D: FnOnce(Vec<Value>) -> Fut,
        Fut: Future<Output = ChatResult<Vec<Value>>>,
    {
        // Validate + hooks live in `CommandBinder`; this instance's binder
        // carries whatever before/after hooks were registered via
        // `set_before_hook`/`set_after_hook`. Since `CommandBinder::run`
        // only needs shared access, we run it while holding the mutex only
        // long enough to clone the relevant hook (cheap, `Arc`-backed).
        let (validator_result, before, after) = {
            let binder = self.binder.lock().unwrap_or_else(|e| e.into_inner());
            (binder.validate_only(command, &args), binder.before_hook(command), binder.after_hook(command))
        };
        validator_result?;

        if CommandBinder::requires_socket(command) && !is_local_call && socket_id.unwrap_or("").is_empty() {
            return Err(ChatError::no_socket().with_command(command));
        }

        let args = if let Some(hook) = before {
            match hook(user_name, socket_id, args).await? {
                HookDecision::ShortCircuit(results) => return Ok(results),
                HookDecision::Proceed(args) => args,
            }
        } else {
            args
        };

        let results = dispatch(args.clone()).await?;

        let results = if let Some(hook) = after {
            hook(user_name, socket_id, args, results).await?
        } else {
            results
        };

        Ok(results)
    }
}

fn arg_str(args: &[Value], i: usize) -> ChatResult<&str> {
    args.get(i).and_then(Value::as_str).ok_or_else(|| ChatError::new(ErrorKind::BadArgument, format!("argument {i} must be a string")).with_argument_position(i))
}

fn arg_bool(args: &[Value], i: usize) -> ChatResult<bool> {
    args.get(i).and_then(Value::as_bool).ok_or_else(|| ChatError::new(ErrorKind::BadArgument, format!("argument {i} must be a bool")).with_argument_position(i))
}

fn arg_u64(args: &[Value], i: usize) -> ChatResult<u64> {
    args.get(i).and_then(Value::as_u64).ok_or_else(|| ChatError::new(ErrorKind::BadArgument, format!("argument {i} must be an integer")).with_argument_position(i))
}

fn arg_obj(args: &[Value], i: usize) -> ChatResult<serde_json::Map<String, Value>> {
    args.get(i)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ChatError::new(ErrorKind::BadArgument, format!("argument {i} must be an object")).with_argument_position(i))
}

fn arg_str_array(args: &[Value], i: usize) -> ChatResult<Vec<String>> {
    let arr = args.get(i).and_then(Value::as_array).ok_or_else(|| ChatError::new(ErrorKind::BadArgument, format!("argument {i} must be an array")).with_argument_position(i))?;
    arr.iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(|| ChatError::new(ErrorKind::BadArgument, format!("argument {i} must be an array of strings")).with_argument_position(i)))
        .collect()
}

/// Minimal `join_all` so this crate doesn't need the `futures` dependency
/// for a single call site.
async fn futures_join_all<I>(iter: I)
where
    I: IntoIterator,
    I::Item: Future<Output = ()>,
{
    for fut in iter {
        fut.await;
    }
}
