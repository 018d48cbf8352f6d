/// GroupDelegate: read/write facade over the store and the local identity.
///
/// Answers "who is the owner/admin/assistant/member of this group" and
/// issues throttled network queries when local data is missing. Missing
/// data is a transient state, never an error.
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::config::GroupConfig;
use crate::content::Content;
use crate::crypto::LocalIdentity;
use crate::error::TomGroupError;
use crate::group::command::{CommandKind, GroupCommand};
use crate::group::types::*;
use crate::store::{GroupStore, HistoryEntry};
use crate::types::{now_ms, NodeId, Priority};

/// Groups remembered by the query throttle.
const QUERY_CACHE_GROUPS: usize = 1024;

pub struct GroupDelegate {
    store: Arc<dyn GroupStore>,
    identity: LocalIdentity,
    neighbor: Option<NodeId>,
    query_expires_ms: u64,
    /// group → last time a query was sent.
    last_queries: Mutex<LruCache<GroupId, u64>>,
}

impl GroupDelegate {
    pub fn new(store: Arc<dyn GroupStore>, identity: LocalIdentity, config: &GroupConfig) -> Self {
        let capacity = NonZeroUsize::new(QUERY_CACHE_GROUPS).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            identity,
            neighbor: config.neighbor,
            query_expires_ms: config.query_expires.as_millis() as u64,
            last_queries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.identity.id()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn store(&self) -> &dyn GroupStore {
        self.store.as_ref()
    }

    pub fn neighbor(&self) -> Option<NodeId> {
        self.neighbor
    }

    // ── Documents ────────────────────────────────────────────────────────

    pub fn meta(&self, group: &GroupId) -> Result<Option<GroupMeta>, TomGroupError> {
        Ok(self.store.meta(group)?)
    }

    pub fn bulletin(&self, group: &GroupId) -> Result<Option<Bulletin>, TomGroupError> {
        Ok(self.store.bulletin(group)?)
    }

    /// Store a meta if its fingerprint checks out. Returns whether it was kept.
    pub fn save_meta(&self, meta: &GroupMeta) -> Result<bool, TomGroupError> {
        if !meta.verify() {
            tracing::warn!("rejecting meta with bad fingerprint for {}", meta.group_id());
            return Ok(false);
        }
        self.store.save_meta(meta)?;
        Ok(true)
    }

    /// Accept a bulletin that verifies against the stored meta and is newer
    /// than the stored one. The administrator list is mirrored locally and
    /// `resign` commands older than the bulletin are discarded.
    pub fn save_bulletin(&self, bulletin: &Bulletin) -> Result<bool, TomGroupError> {
        let Some(meta) = self.store.meta(&bulletin.group)? else {
            tracing::debug!("bulletin for unknown group {}", bulletin.group);
            return Ok(false);
        };
        if let Err(e) = bulletin.verify(&meta) {
            tracing::warn!("rejecting bulletin for {}: {e}", bulletin.group);
            return Ok(false);
        }
        if let Some(old) = self.store.bulletin(&bulletin.group)? {
            if old.time >= bulletin.time {
                return Ok(false);
            }
        }
        self.store
            .commit_bulletin(bulletin, &dedup_members(&bulletin.administrators))?;
        Ok(true)
    }

    // ── Roles ────────────────────────────────────────────────────────────

    pub fn founder(&self, group: &GroupId) -> Result<Option<NodeId>, TomGroupError> {
        if let Some(meta) = self.store.meta(group)? {
            return Ok(Some(meta.founder));
        }
        Ok(self.store.bulletin(group)?.map(|b| b.founder))
    }

    /// Owner, as named by the bulletin.
    pub fn owner(&self, group: &GroupId) -> Result<Option<NodeId>, TomGroupError> {
        Ok(self.store.bulletin(group)?.map(|b| b.owner))
    }

    pub fn administrators(&self, group: &GroupId) -> Result<Vec<NodeId>, TomGroupError> {
        Ok(self.store.administrators(group)?)
    }

    pub fn assistants(&self, group: &GroupId) -> Result<Vec<NodeId>, TomGroupError> {
        Ok(self
            .store
            .bulletin(group)?
            .map(|b| b.assistants)
            .unwrap_or_default())
    }

    pub fn members(&self, group: &GroupId) -> Result<Vec<NodeId>, TomGroupError> {
        Ok(self.store.members(group)?)
    }

    pub fn save_members(&self, group: &GroupId, members: &[NodeId]) -> Result<(), TomGroupError> {
        Ok(self.store.save_members(group, &dedup_members(members))?)
    }

    /// Roles of a group in one read. `None` when no bulletin is known.
    pub fn snapshot(&self, group: &GroupId) -> Result<Option<GroupSnapshot>, TomGroupError> {
        let Some(bulletin) = self.store.bulletin(group)? else {
            return Ok(None);
        };
        Ok(Some(GroupSnapshot {
            group: group.clone(),
            owner: bulletin.owner,
            members: self.store.members(group)?,
            administrators: self.store.administrators(group)?,
            assistants: bulletin.assistants,
        }))
    }

    /// Timestamp of the cached reset checkpoint.
    pub fn last_reset_time(&self, group: &GroupId) -> Result<Option<u64>, TomGroupError> {
        Ok(self.store.reset_command(group)?.map(|e| e.command.time))
    }

    pub fn groups(&self) -> Result<Vec<GroupId>, TomGroupError> {
        Ok(self.store.groups()?)
    }

    // ── Applications ─────────────────────────────────────────────────────

    /// Join requests and member invites whose candidates are not all
    /// members yet.
    pub fn pending_applications(&self, group: &GroupId) -> Result<Vec<HistoryEntry>, TomGroupError> {
        let members = self.store.members(group)?;
        Ok(self
            .store
            .group_histories(group)?
            .into_iter()
            .filter(|entry| {
                let candidates = application_candidates(entry);
                !candidates.is_empty() && candidates.iter().any(|c| !members.contains(c))
            })
            .collect())
    }

    /// Every node waiting in an application, deduplicated.
    pub fn pending_candidates(&self, group: &GroupId) -> Result<Vec<NodeId>, TomGroupError> {
        let members = self.store.members(group)?;
        let candidates: Vec<NodeId> = self
            .pending_applications(group)?
            .iter()
            .flat_map(application_candidates)
            .filter(|c| !members.contains(c))
            .collect();
        Ok(dedup_members(&candidates))
    }

    // ── Naming ───────────────────────────────────────────────────────────

    pub fn nickname(&self, node: &NodeId) -> Result<Option<String>, TomGroupError> {
        Ok(self.store.nickname(node)?)
    }

    /// Default group name: member nicknames joined, cut to
    /// `MAX_GROUP_NAME_LEN` characters.
    pub fn build_group_name(&self, members: &[NodeId]) -> Result<String, TomGroupError> {
        let mut names = Vec::with_capacity(members.len());
        for member in members {
            let name = match self.store.nickname(member)? {
                Some(name) if !name.is_empty() => name,
                _ => member.to_string()[..8].to_string(),
            };
            names.push(name);
        }
        let joined = names.join(", ");
        if joined.chars().count() <= MAX_GROUP_NAME_LEN {
            return Ok(joined);
        }
        let cut: String = joined.chars().take(MAX_GROUP_NAME_LEN - 3).collect();
        Ok(format!("{cut}..."))
    }

    // ── Network queries ──────────────────────────────────────────────────

    /// Ask the network for a group's history.
    ///
    /// Sent to the assistants, else the administrators and owner, else the
    /// neighbor relay. Throttled to one query per group per
    /// `query_expires` window; a throttled call returns no actions.
    pub fn query_group(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        let now = now_ms();
        if !self.query_allowed(group, now) {
            tracing::debug!("query for {group} throttled");
            return Ok(vec![]);
        }

        let local = self.local_id();
        let mut targets = self.assistants(group)?;
        if targets.is_empty() {
            targets = self.administrators(group)?;
            if let Some(owner) = self.owner(group)? {
                targets.push(owner);
            }
        }
        targets.retain(|t| *t != local);
        let mut targets = dedup_members(&targets);
        if targets.is_empty() {
            match self.neighbor {
                Some(neighbor) => targets.push(neighbor),
                None => {
                    tracing::debug!("no one to query for {group}");
                    return Ok(vec![]);
                }
            }
        }

        let last_time = self.last_reset_time(group)?;
        let query = GroupCommand::query(group.clone(), now, last_time);
        tracing::debug!("querying {} node(s) for {group}", targets.len());
        Ok(targets
            .into_iter()
            .map(|to| GroupAction::Send {
                to,
                content: Content::Command(query.clone()),
                priority: Priority::Slower,
            })
            .collect())
    }

    fn query_allowed(&self, group: &GroupId, now: u64) -> bool {
        let mut cache = self
            .last_queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = cache.get(group) {
            if now.saturating_sub(*last) < self.query_expires_ms {
                return false;
            }
        }
        cache.put(group.clone(), now);
        true
    }
}

/// Nodes an application asks to admit: the sender of a join, the
/// invitees of an invite.
pub fn application_candidates(entry: &HistoryEntry) -> Vec<NodeId> {
    match entry.command.kind() {
        CommandKind::Join => vec![entry.message.sender],
        CommandKind::Invite => entry.command.members().to_vec(),
        _ => vec![],
    }
}
