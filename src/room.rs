//! Room (C5, §4.3): per-room allow/deny/admin lists, owner, whitelist-only
//! mode, bounded message history with monotonic IDs, and user-seen
//! timestamps.
//!
//! `Room` itself holds only local, pure state — it has no notion of
//! sockets, instances, or the distributed lock that must surround any
//! mutating call. [`crate::user::UserAssociations`] is the only caller that
//! is allowed to invoke [`Room::join`]/[`Room::leave`], and always does so
//! holding the room's and the join lock (§4.4, §5).

use crate::error::{ChatError, ChatResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// The three list names a room's access control is built from (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomListName {
    Whitelist,
    Blacklist,
    Adminlist,
}

impl RoomListName {
    pub fn parse(name: &str) -> ChatResult<Self> {
        match name {
            "whitelist" => Ok(RoomListName::Whitelist),
            "blacklist" => Ok(RoomListName::Blacklist),
            "adminlist" => Ok(RoomListName::Adminlist),
            other => Err(ChatError::no_list(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomListName::Whitelist => "whitelist",
            RoomListName::Blacklist => "blacklist",
            RoomListName::Adminlist => "adminlist",
        }
    }
}

/// A materialized room message (§3). `extensions` carries any additional
/// fields a `roomMessageChecker` hook chooses to stamp onto the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub timestamp: i64,
    pub author: String,
    pub text_message: String,
    #[serde(flatten, default)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryInfo {
    pub last_id: u64,
    pub history_max_get_messages: usize,
    pub history_max_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSeenInfo {
    pub joined: bool,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
struct UserSeen {
    joined: bool,
    timestamp: i64,
}

pub struct Room {
    name: String,
    owner: Option<String>,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    adminlist: HashSet<String>,
    userlist: HashSet<String>,
    whitelist_only: bool,
    history: VecDeque<Message>,
    history_max_size: usize,
    history_max_get_messages: usize,
    last_id: u64,
    user_seen: std::collections::HashMap<String, UserSeen>,
    removing: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Room {
    pub fn new(
        name: impl Into<String>,
        owner: Option<String>,
        whitelist_only: bool,
        history_max_size: usize,
        history_max_get_messages: usize,
    ) -> Self {
        let mut adminlist = HashSet::new();
        if let Some(o) = &owner {
            adminlist.insert(o.clone());
        }
        Room {
            name: name.into(),
            owner,
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            adminlist,
            userlist: HashSet::new(),
            whitelist_only,
            history: VecDeque::new(),
            history_max_size,
            history_max_get_messages,
            last_id: 0,
            user_seen: std::collections::HashMap::new(),
            removing: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_removing(&self) -> bool {
        self.removing
    }

    fn guard_removing(&self) -> ChatResult<()> {
        if self.removing {
            Err(ChatError::room_removed(&self.name))
        } else {
            Ok(())
        }
    }

    /// Canonical admission predicate (§4.3).
    pub fn admits(&self, user_name: &str, bypass_permissions: bool) -> bool {
        bypass_permissions
            || (!self.blacklist.contains(user_name)
                && (!self.whitelist_only
                    || self.whitelist.contains(user_name)
                    || self.adminlist.contains(user_name)
                    || self.owner.as_deref() == Some(user_name)))
    }

    fn is_admin(&self, user_name: &str) -> bool {
        self.owner.as_deref() == Some(user_name) || self.adminlist.contains(user_name)
    }

    fn guard_admin(&self, caller: &str, bypass_permissions: bool) -> ChatResult<()> {
        if bypass_permissions || self.is_admin(caller) {
            Ok(())
        } else {
            Err(ChatError::not_allowed(format!(
                "'{caller}' is not an owner or admin of room '{}'",
                self.name
            )))
        }
    }

    fn guard_member_or_admin(&self, caller: &str, bypass_permissions: bool) -> ChatResult<()> {
        if bypass_permissions || self.is_admin(caller) || self.userlist.contains(caller) {
            Ok(())
        } else {
            Err(ChatError::not_allowed(format!(
                "'{caller}' must be a member or admin of room '{}'",
                self.name
            )))
        }
    }

    fn list_mut(&mut self, list: RoomListName) -> &mut HashSet<String> {
        match list {
            RoomListName::Whitelist => &mut self.whitelist,
            RoomListName::Blacklist => &mut self.blacklist,
            RoomListName::Adminlist => &mut self.adminlist,
        }
    }

    fn list(&self, list: RoomListName) -> &HashSet<String> {
        match list {
            RoomListName::Whitelist => &self.whitelist,
            RoomListName::Blacklist => &self.blacklist,
            RoomListName::Adminlist => &self.adminlist,
        }
    }

    /// Users admitted before the mutation that are no longer admitted after
    /// it, excluding the owner and admins (§4.3 step 4).
    fn newly_evicted(&self, before: &HashSet<String>) -> HashSet<String> {
        before
            .iter()
            .filter(|u| !self.admits(u, false) && !self.is_admin(u) && self.owner.as_deref() != Some(u.as_str()))
            .cloned()
            .collect()
    }

    /// Remove `evicted` from `userlist` (step 5); the caller is responsible
    /// for the cross-instance eviction of per-user room memberships.
    fn apply_eviction(&mut self, evicted: &HashSet<String>) {
        for u in evicted {
            self.userlist.remove(u);
        }
    }

    /// The 6-step access-list mutation algorithm (§4.3), add variant.
    pub fn add_to_list(
        &mut self,
        caller: &str,
        list: RoomListName,
        values: &[String],
        bypass_permissions: bool,
    ) -> ChatResult<HashSet<String>> {
        self.guard_removing()?;
        self.guard_admin(caller, bypass_permissions)?;

        let before = self.userlist.clone();
        for v in values {
            self.list_mut(list).insert(v.clone());
        }
        let evicted = self.newly_evicted(&before);
        self.apply_eviction(&evicted);
        Ok(evicted)
    }

    /// The 6-step access-list mutation algorithm (§4.3), remove variant.
    pub fn remove_from_list(
        &mut self,
        caller: &str,
        list: RoomListName,
        values: &[String],
        bypass_permissions: bool,
    ) -> ChatResult<HashSet<String>> {
        self.guard_removing()?;
        self.guard_admin(caller, bypass_permissions)?;

        let before = self.userlist.clone();
        for v in values {
            self.list_mut(list).remove(v);
        }
        let evicted = self.newly_evicted(&before);
        self.apply_eviction(&evicted);
        Ok(evicted)
    }

    /// Flip `whitelistOnly`. Returns the set of users evicted as a result
    /// and the new mode (§4.3).
    pub fn change_mode(&mut self, caller: &str, whitelist_only: bool, bypass_permissions: bool) -> ChatResult<(HashSet<String>, bool)> {
        self.guard_removing()?;
        self.guard_admin(caller, bypass_permissions)?;

        let before = self.userlist.clone();
        self.whitelist_only = whitelist_only;
        let evicted = self.newly_evicted(&before);
        self.apply_eviction(&evicted);
        Ok((evicted, self.whitelist_only))
    }

    pub fn get_list(&self, caller: &str, list: RoomListName, bypass_permissions: bool) -> ChatResult<Vec<String>> {
        self.guard_removing()?;
        self.guard_member_or_admin(caller, bypass_permissions)?;
        let mut v: Vec<String> = self.list(list).iter().cloned().collect();
        v.sort();
        Ok(v)
    }

    pub fn get_owner(&self, caller: &str, bypass_permissions: bool) -> ChatResult<Option<String>> {
        self.guard_removing()?;
        self.guard_member_or_admin(caller, bypass_permissions)?;
        Ok(self.owner.clone())
    }

    pub fn get_mode(&self, caller: &str, bypass_permissions: bool) -> ChatResult<bool> {
        self.guard_removing()?;
        self.guard_member_or_admin(caller, bypass_permissions)?;
        Ok(self.whitelist_only)
    }

    pub fn check_is_owner(&self, user_name: &str) -> bool {
        self.owner.as_deref() == Some(user_name)
    }

    /// Gate all subsequent joins with `roomRemoved`; existing joins that
    /// already hold the join lock when this flips still succeed (open
    /// question, resolved in SPEC_FULL.md / DESIGN.md), and are evicted by
    /// the broadcast that follows room deletion.
    pub fn start_removing(&mut self) {
        self.removing = true;
    }

    /// Pure join, called only by `UserAssociations` under the per-(user,
    /// room) join lock. Admission failure is `notAllowed`.
    pub fn join(&mut self, user_name: &str) -> ChatResult<()> {
        self.guard_removing()?;
        if !self.admits(user_name, false) {
            return Err(ChatError::not_allowed(format!(
                "'{user_name}' is not admitted to room '{}'",
                self.name
            )));
        }
        self.userlist.insert(user_name.to_string());
        self.user_seen.insert(
            user_name.to_string(),
            UserSeen {
                joined: true,
                timestamp: now_ms(),
            },
        );
        Ok(())
    }

    /// Pure leave. Idempotent.
    pub fn leave(&mut self, user_name: &str) {
        self.userlist.remove(user_name);
        self.user_seen.insert(
            user_name.to_string(),
            UserSeen {
                joined: false,
                timestamp: now_ms(),
            },
        );
    }

    pub fn is_member(&self, user_name: &str) -> bool {
        self.userlist.contains(user_name)
    }

    pub fn userlist(&self) -> Vec<String> {
        let mut v: Vec<String> = self.userlist.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn member_count(&self) -> usize {
        self.userlist.len()
    }

    /// Admission for posting: current membership unless bypass (§4.3).
    pub fn message(
        &mut self,
        sender: &str,
        text_message: String,
        extensions: serde_json::Map<String, serde_json::Value>,
        bypass_permissions: bool,
    ) -> ChatResult<Message> {
        self.guard_removing()?;
        if !bypass_permissions && !self.userlist.contains(sender) {
            return Err(ChatError::new(
                ErrorKind::NotAllowed,
                format!("'{sender}' must join room '{}' before posting", self.name),
            ));
        }

        self.last_id += 1;
        let message = Message {
            id: self.last_id,
            timestamp: now_ms(),
            author: sender.to_string(),
            text_message,
            extensions,
        };
        self.history.push_back(message.clone());
        while self.history.len() > self.history_max_size {
            self.history.pop_front();
        }
        Ok(message)
    }

    pub fn get_recent_messages(&self) -> Vec<Message> {
        let take = self.history_max_get_messages.min(self.history.len());
        self.history
            .iter()
            .rev()
            .take(take)
            .rev()
            .cloned()
            .collect()
    }

    /// Messages with `id > from_id`, capped at `min(limit,
    /// historyMaxGetMessages)` (§3 invariant 6).
    pub fn get_messages(&self, from_id: u64, limit: usize) -> Vec<Message> {
        let cap = limit.min(self.history_max_get_messages);
        self.history
            .iter()
            .filter(|m| m.id > from_id)
            .take(cap)
            .cloned()
            .collect()
    }

    pub fn get_history_info(&self) -> HistoryInfo {
        HistoryInfo {
            last_id: self.last_id,
            history_max_get_messages: self.history_max_get_messages,
            history_max_size: self.history_max_size,
        }
    }

    pub fn user_seen(&self, caller: &str, target: &str, bypass_permissions: bool) -> ChatResult<UserSeenInfo> {
        self.guard_removing()?;
        self.guard_member_or_admin(caller, bypass_permissions)?;
        Ok(match self.user_seen.get(target) {
            Some(seen) => UserSeenInfo {
                joined: seen.joined,
                timestamp: Some(seen.timestamp),
            },
            None => UserSeenInfo {
                joined: false,
                timestamp: None,
            },
        })
    }
}

/// Process-wide directory of rooms (C5, §4.3/§6: "addRoom"/"removeRoom").
/// Grounded on the reference project's `RoomManager`: a name-keyed map
/// behind a single mutex, handing out `Arc<Mutex<Room>>` so a caller can
/// hold a room past the registry lookup without holding the registry lock.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// `addRoom` (§6). Fails with `roomExists` if the name is taken.
    pub fn create(
        &self,
        name: &str,
        owner: Option<String>,
        whitelist_only: bool,
        history_max_size: usize,
        history_max_get_messages: usize,
    ) -> ChatResult<Arc<Mutex<Room>>> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if rooms.contains_key(name) {
            return Err(ChatError::room_exists(name));
        }
        let room = Arc::new(Mutex::new(Room::new(name, owner, whitelist_only, history_max_size, history_max_get_messages)));
        rooms.insert(name.to_string(), room.clone());
        Ok(room)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    /// `removeRoom` (§6): marks the room as removing (so in-flight joins
    /// fail `roomRemoved`) and evicts it from the directory. The caller is
    /// responsible for running the cross-instance eviction of whoever was
    /// still a member (§4.4).
    pub fn remove(&self, name: &str) -> Option<Arc<Mutex<Room>>> {
        let removed = self.rooms.lock().unwrap_or_else(|e| e.into_inner()).remove(name);
        if let Some(room) = &removed {
            room.lock().unwrap_or_else(|e| e.into_inner()).start_removing();
        }
        removed
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).contains_key(name)
    }
}
