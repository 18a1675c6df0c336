/// Shared, versioned parameter store for concurrent workers.
///
/// One canonical copy per parameter group, each behind its own
/// `parking_lot::RwLock` and tagged with a version that every write bumps.
/// Workers own a `LocalReplica` and pull on their own schedule: a sync copies
/// only the groups whose version moved, each whole group under one read lock,
/// so a replica never sees a half-written group.
///
/// Workers are threads sharing an `Arc<ParameterServer>`.

use parking_lot::RwLock;

use crate::error::{PersistenceError, PolicyError};
use crate::model::IncrementalPolicyModel;
use crate::submodule::{GroupState, ParamGroup};

/// A group's canonical state and the number of writes it has seen.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedGroup {
    pub version: u64,
    pub state: GroupState,
}

pub struct ParameterServer {
    groups: Vec<RwLock<VersionedGroup>>,
}

fn layout(state: &mut GroupState) -> Vec<usize> {
    state.tensors_mut().iter().map(|t| t.len()).collect()
}

impl ParameterServer {
    /// Seed every group from `model` at version 0.
    pub fn from_model(model: &IncrementalPolicyModel) -> Self {
        let groups = ParamGroup::ALL
            .iter()
            .map(|&g| RwLock::new(VersionedGroup { version: 0, state: model.group_state(g) }))
            .collect();
        ParameterServer { groups }
    }

    fn slot(&self, group: ParamGroup) -> &RwLock<VersionedGroup> {
        &self.groups[group.index()]
    }

    pub fn version(&self, group: ParamGroup) -> u64 {
        self.slot(group).read().version
    }

    pub fn versions(&self) -> [u64; 5] {
        ParamGroup::ALL.map(|g| self.version(g))
    }

    /// Consistent copy of one group.
    pub fn snapshot(&self, group: ParamGroup) -> VersionedGroup {
        self.slot(group).read().clone()
    }

    /// Replace one group's canonical state; returns the new version.
    pub fn publish_group(&self, mut state: GroupState) -> Result<u64, PersistenceError> {
        let group = state.group();
        let mut slot = self.slot(group).write();
        let (want, got) = (layout(&mut slot.state), layout(&mut state));
        if want != got {
            return Err(PersistenceError::StateMismatch {
                group,
                reason: format!("published tensor lengths {got:?}, server holds {want:?}"),
            });
        }
        slot.state = state;
        slot.version += 1;
        tracing::debug!(%group, version = slot.version, "group published");
        Ok(slot.version)
    }

    /// Publish all five groups of `model`.
    pub fn publish(&self, model: &IncrementalPolicyModel) -> Result<(), PersistenceError> {
        for group in ParamGroup::ALL {
            self.publish_group(model.group_state(group))?;
        }
        Ok(())
    }

    /// SGD step on the canonical copy of one group. `grads` follows the
    /// group's tensor order, concatenated.
    pub fn apply_gradients(&self, group: ParamGroup, grads: &[f32], lr: f32) -> Result<u64, PolicyError> {
        let mut slot = self.slot(group).write();
        let mut tensors = slot.state.tensors_mut();
        let expected: usize = tensors.iter().map(|t| t.len()).sum();
        if grads.len() != expected {
            return Err(PolicyError::GradientLength { expected, found: grads.len() });
        }
        let mut offset = 0;
        for param in tensors.iter_mut() {
            let n = param.len();
            for (v, g) in param.iter_mut().zip(&grads[offset..offset + n]) {
                *v -= lr * g;
            }
            offset += n;
        }
        drop(tensors);
        slot.version += 1;
        tracing::debug!(%group, version = slot.version, "gradients applied");
        Ok(slot.version)
    }
}

/// A worker's private model plus the group versions it last copied.
pub struct LocalReplica {
    model: IncrementalPolicyModel,
    seen: [Option<u64>; 5],
}

impl LocalReplica {
    /// Wrap `model`. The first `sync` copies every group.
    pub fn new(model: IncrementalPolicyModel) -> Self {
        LocalReplica { model, seen: [None; 5] }
    }

    pub fn model(&self) -> &IncrementalPolicyModel {
        &self.model
    }

    pub fn into_model(self) -> IncrementalPolicyModel {
        self.model
    }

    pub fn seen_version(&self, group: ParamGroup) -> Option<u64> {
        self.seen[group.index()]
    }

    /// Pull every group whose version changed since the last sync.
    /// Returns the groups that were copied.
    pub fn sync(&mut self, server: &ParameterServer) -> Result<Vec<ParamGroup>, PersistenceError> {
        let mut updated = Vec::new();
        for group in ParamGroup::ALL {
            let snapshot = {
                let slot = server.slot(group).read();
                if self.seen[group.index()] == Some(slot.version) {
                    continue;
                }
                slot.clone()
            };
            self.model.load_group_state(snapshot.state)?;
            self.seen[group.index()] = Some(snapshot.version);
            updated.push(group);
        }
        if !updated.is_empty() {
            tracing::debug!(groups = ?updated, "replica synced");
        }
        Ok(updated)
    }
}
