use std::collections::{HashMap, HashSet};

use serde::Serialize;
use shared::domain::ParticipantId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub name: String,
    pub is_host: bool,
}

/// Live membership of one meeting.
///
/// Every observation only grows the set; `remove` is the single way to shrink it and is
/// reserved for authoritative departure signals. Iteration follows first appearance with
/// the local user pinned to the front.
#[derive(Debug)]
pub struct ParticipantSet {
    local_id: ParticipantId,
    host_id: Option<ParticipantId>,
    order: Vec<ParticipantId>,
    members: HashSet<ParticipantId>,
    names: HashMap<ParticipantId, String>,
}

impl ParticipantSet {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            host_id: None,
            order: Vec::new(),
            members: HashSet::new(),
            names: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn host_id(&self) -> Option<&ParticipantId> {
        self.host_id.as_ref()
    }

    pub fn set_host(&mut self, host_id: ParticipantId) -> bool {
        if self.host_id.as_ref() == Some(&host_id) {
            return false;
        }
        self.host_id = Some(host_id);
        true
    }

    pub fn set_local_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !name.trim().is_empty() {
            self.names.insert(self.local_id.clone(), name);
        }
    }

    pub fn seed(&mut self, ids: impl IntoIterator<Item = ParticipantId>) -> bool {
        self.union(ids)
    }

    pub fn observe_poll(&mut self, ids: impl IntoIterator<Item = ParticipantId>) -> bool {
        self.union(ids)
    }

    pub fn observe_joined(&mut self, id: ParticipantId) -> bool {
        self.insert(id)
    }

    /// Speaking in the room counts as presence; the latest non-empty name wins.
    pub fn observe_sender(&mut self, id: &ParticipantId, name: &str) -> bool {
        let mut changed = self.insert(id.clone());
        if !name.trim().is_empty() && self.names.get(id).map(String::as_str) != Some(name) {
            self.names.insert(id.clone(), name.to_string());
            changed = true;
        }
        changed
    }

    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|member| member != id);
        true
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        let mut ids = Vec::with_capacity(self.order.len());
        if self.members.contains(&self.local_id) {
            ids.push(self.local_id.clone());
        }
        ids.extend(
            self.order
                .iter()
                .filter(|id| **id != self.local_id)
                .cloned(),
        );
        ids
    }

    pub fn display_name(&self, id: &ParticipantId) -> String {
        match self.names.get(id) {
            Some(name) => name.clone(),
            None => placeholder_name(id),
        }
    }

    pub fn snapshot(&self) -> Vec<ParticipantView> {
        self.ids()
            .into_iter()
            .map(|id| ParticipantView {
                name: self.display_name(&id),
                is_host: self.host_id.as_ref() == Some(&id),
                id,
            })
            .collect()
    }

    fn union(&mut self, ids: impl IntoIterator<Item = ParticipantId>) -> bool {
        let mut changed = false;
        for id in ids {
            changed |= self.insert(id);
        }
        changed
    }

    fn insert(&mut self, id: ParticipantId) -> bool {
        if id.as_str().is_empty() || self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push(id);
        true
    }
}

pub fn placeholder_name(id: &ParticipantId) -> String {
    let short: String = id.as_str().chars().take(6).collect();
    format!("Guest {short}")
}

#[cfg(test)]
#[path = "tests/participants_tests.rs"]
mod tests;
