//! In-process `Transport` implementation. Instead of writing frames to a
//! real socket, each connected socket accumulates an ordered log of
//! `(event, payload)` emissions that a test (or an in-process UI) can drain.

use super::{PendingSocket, Transport};
use crate::error::ChatResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

struct SocketRecord {
    log: Vec<(String, Value)>,
    disconnected: bool,
}

pub struct InMemoryTransport {
    sockets: Mutex<HashMap<String, SocketRecord>>,
    channels: Mutex<HashMap<String, HashSet<String>>>,
    pending: Mutex<VecDeque<PendingSocket>>,
    disconnected: Mutex<VecDeque<String>>,
    accepting: AtomicBool,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        InMemoryTransport {
            sockets: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            disconnected: Mutex::new(VecDeque::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Test/demo helper: simulate a client connecting with `auth_payload`,
    /// queuing it for `ChatService`'s accept loop to pick up via
    /// `poll_pending`.
    pub fn simulate_connect(&self, socket_id: &str, auth_payload: Value) {
        self.sockets.lock().unwrap_or_else(|e| e.into_inner()).insert(
            socket_id.to_string(),
            SocketRecord {
                log: Vec::new(),
                disconnected: false,
            },
        );
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push_back(PendingSocket {
            socket_id: socket_id.to_string(),
            auth_payload,
        });
    }

    /// Test/demo helper: simulate the client side of `socket_id` dropping
    /// the connection on its own, without the engine calling `disconnect`
    /// first. Queues it for `ChatService`'s disconnect-drain loop to pick
    /// up via `poll_disconnected` and run `removeSocket` (§4.4).
    pub fn simulate_client_disconnect(&self, socket_id: &str) {
        let was_known = {
            let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
            match sockets.get_mut(socket_id) {
                Some(record) if !record.disconnected => {
                    record.disconnected = true;
                    true
                }
                _ => false,
            }
        };
        if !was_known {
            return;
        }
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        for members in channels.values_mut() {
            members.remove(socket_id);
        }
        channels.retain(|_, members| !members.is_empty());
        drop(channels);
        self.disconnected.lock().unwrap_or_else(|e| e.into_inner()).push_back(socket_id.to_string());
    }

    /// Register a socket directly without going through the pending queue
    /// (used by tests that don't exercise the accept loop).
    pub fn register_socket_for_test(&self, socket_id: &str) {
        self.sockets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(socket_id.to_string())
            .or_insert_with(|| SocketRecord {
                log: Vec::new(),
                disconnected: false,
            });
    }

    /// Drain and return everything emitted to `socket_id` so far.
    pub fn take_emitted(&self, socket_id: &str) -> Vec<(String, Value)> {
        self.sockets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(socket_id)
            .map(|record| std::mem::take(&mut record.log))
            .unwrap_or_default()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn channel_members(&self, channel: &str) -> HashSet<String> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn poll_pending(&self) -> Option<PendingSocket> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    async fn poll_disconnected(&self) -> Option<String> {
        self.disconnected.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    fn has_socket(&self, socket_id: &str) -> bool {
        self.sockets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(socket_id)
            .map(|r| !r.disconnected)
            .unwrap_or(false)
    }

    async fn emit(&self, socket_id: &str, event: &str, payload: Value) -> ChatResult<()> {
        if let Some(record) = self.sockets.lock().unwrap_or_else(|e| e.into_inner()).get_mut(socket_id) {
            if !record.disconnected {
                record.log.push((event.to_string(), payload));
            }
        }
        Ok(())
    }

    async fn disconnect(&self, socket_id: &str, reason: Option<&str>) -> ChatResult<()> {
        let payload = serde_json::json!({ "reason": reason.unwrap_or("server") });
        self.emit(socket_id, "disconnect", payload).await?;
        if let Some(record) = self.sockets.lock().unwrap_or_else(|e| e.into_inner()).get_mut(socket_id) {
            record.disconnected = true;
        }
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        for members in channels.values_mut() {
            members.remove(socket_id);
        }
        channels.retain(|_, members| !members.is_empty());
        Ok(())
    }

    async fn join_channel(&self, socket_id: &str, channel: &str) -> ChatResult<()> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel.to_string())
            .or_default()
            .insert(socket_id.to_string());
        Ok(())
    }

    async fn leave_channel(&self, socket_id: &str, channel: &str) -> ChatResult<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = channels.get_mut(channel) {
            members.remove(socket_id);
            if members.is_empty() {
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn emit_to_channel(&self, channel: &str, event: &str, payload: Value) -> ChatResult<()> {
        let members = self.channel_members(channel);
        for socket_id in members {
            self.emit(&socket_id, event, payload.clone()).await?;
        }
        Ok(())
    }

    async fn send_to_channel(
        &self,
        exclude_socket_id: &str,
        channel: &str,
        event: &str,
        payload: Value,
    ) -> ChatResult<()> {
        let members = self.channel_members(channel);
        for socket_id in members {
            if socket_id == exclude_socket_id {
                continue;
            }
            self.emit(&socket_id, event, payload.clone()).await?;
        }
        Ok(())
    }

    async fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}
