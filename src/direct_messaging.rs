//! DirectMessaging (C4, §4.2): per-user allow/deny lists and whitelist-only
//! mode, plus the admission check for 1:1 messages.

use crate::error::{ChatError, ChatResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The two list names a user may mutate on their own `DirectMessaging`
/// record (§4.2). `adminlist` does not exist at this scope — that's a
/// room-level concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectListName {
    Whitelist,
    Blacklist,
}

impl DirectListName {
    pub fn parse(name: &str) -> ChatResult<Self> {
        match name {
            "whitelist" => Ok(DirectListName::Whitelist),
            "blacklist" => Ok(DirectListName::Blacklist),
            other => Err(ChatError::no_list(other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectMessaging {
    owner: String,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    whitelist_only: bool,
}

impl DirectMessaging {
    pub fn new(owner: impl Into<String>) -> Self {
        DirectMessaging {
            owner: owner.into(),
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            whitelist_only: false,
        }
    }

    fn list_mut(&mut self, list: DirectListName) -> &mut HashSet<String> {
        match list {
            DirectListName::Whitelist => &mut self.whitelist,
            DirectListName::Blacklist => &mut self.blacklist,
        }
    }

    fn list(&self, list: DirectListName) -> &HashSet<String> {
        match list {
            DirectListName::Whitelist => &self.whitelist,
            DirectListName::Blacklist => &self.blacklist,
        }
    }

    /// Idempotent set-add; rejects writing one's own name (§4.2).
    pub fn add_to_list(&mut self, list: DirectListName, values: &[String]) -> ChatResult<()> {
        for v in values {
            if v == &self.owner {
                return Err(ChatError::not_allowed("cannot add your own name to your own list"));
            }
        }
        for v in values {
            self.list_mut(list).insert(v.clone());
        }
        Ok(())
    }

    /// Idempotent set-remove.
    pub fn remove_from_list(&mut self, list: DirectListName, values: &[String]) -> ChatResult<()> {
        for v in values {
            self.list_mut(list).remove(v);
        }
        Ok(())
    }

    pub fn get_list(&self, list: DirectListName) -> Vec<String> {
        let mut v: Vec<String> = self.list(list).iter().cloned().collect();
        v.sort();
        v
    }

    pub fn get_mode(&self) -> bool {
        self.whitelist_only
    }

    pub fn change_mode(&mut self, whitelist_only: bool) {
        self.whitelist_only = whitelist_only;
    }

    /// Admission predicate (§4.2): `bypass ∨ (sender ∉ blacklist ∧
    /// (¬whitelist_only ∨ sender ∈ whitelist))`.
    pub fn admits(&self, sender: &str, bypass_permissions: bool) -> bool {
        bypass_permissions || (!self.blacklist.contains(sender) && (!self.whitelist_only || self.whitelist.contains(sender)))
    }

    pub fn message(&self, sender: &str, bypass_permissions: bool) -> ChatResult<()> {
        if self.admits(sender, bypass_permissions) {
            Ok(())
        } else {
            Err(ChatError::new(
                ErrorKind::NotAllowed,
                format!("'{sender}' is not allowed to direct-message '{}'", self.owner),
            ))
        }
    }
}
