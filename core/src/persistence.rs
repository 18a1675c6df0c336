/// Model directory persistence: one JSON file per parameter group.
///
/// Each file records the group state together with the device it was saved
/// from. Loading remaps every group onto the model's own execution context,
/// so a directory saved from an accelerator loads on a CPU-only host.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::PersistenceError;
use crate::model::IncrementalPolicyModel;
use crate::submodule::{GroupState, ParamGroup};

pub const FORMAT_VERSION: u32 = 1;

/// On-disk wrapper for one group file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedGroup {
    pub format_version: u32,
    pub device: Device,
    pub state: GroupState,
}

pub fn group_path(dir: &Path, group: ParamGroup) -> PathBuf {
    dir.join(group.file_name())
}

/// Write one group file, creating `dir` if needed.
pub fn write_group(dir: &Path, device: Device, state: GroupState) -> Result<(), PersistenceError> {
    let group = state.group();
    let path = group_path(dir, group);
    let record = PersistedGroup { format_version: FORMAT_VERSION, device, state };
    let json = serde_json::to_string(&record)
        .map_err(|source| PersistenceError::Malformed { group, path: path.clone(), source })?;
    std::fs::create_dir_all(dir)
        .and_then(|()| std::fs::write(&path, json))
        .map_err(|source| PersistenceError::Io { group, path, source })
}

/// Read one group file and check it holds that group's state.
pub fn read_group(dir: &Path, group: ParamGroup) -> Result<PersistedGroup, PersistenceError> {
    let path = group_path(dir, group);
    let json = std::fs::read_to_string(&path)
        .map_err(|source| PersistenceError::Io { group, path: path.clone(), source })?;
    let record: PersistedGroup = serde_json::from_str(&json)
        .map_err(|source| PersistenceError::Malformed { group, path: path.clone(), source })?;
    if record.format_version != FORMAT_VERSION {
        return Err(PersistenceError::StateMismatch {
            group,
            reason: format!(
                "{} has format version {}, expected {}",
                path.display(),
                record.format_version,
                FORMAT_VERSION
            ),
        });
    }
    let found = record.state.group();
    if found != group {
        return Err(PersistenceError::WrongGroup { group, found, path });
    }
    Ok(record)
}

impl IncrementalPolicyModel {
    /// Write all five group files into `dir`.
    pub fn save_model(&self, dir: &Path) -> Result<(), PersistenceError> {
        for group in ParamGroup::ALL {
            let module = self.submodule(group);
            write_group(dir, module.device(), module.state())?;
        }
        tracing::info!(dir = %dir.display(), params = self.num_params(), "model saved");
        Ok(())
    }

    /// Replace every group's parameters with the files in `dir`.
    ///
    /// All five files are read and decoded before any parameter changes. If a
    /// group then fails to apply, groups already replaced are restored, so the
    /// model is either fully loaded or unchanged.
    pub fn load_saved_model(&mut self, dir: &Path) -> Result<(), PersistenceError> {
        let mut incoming = Vec::with_capacity(ParamGroup::ALL.len());
        for group in ParamGroup::ALL {
            let record = read_group(dir, group)?;
            let device = self.context().remap(record.device);
            tracing::debug!(%group, from = %record.device, to = %device, "group state read");
            incoming.push(record.state);
        }

        let mut previous: Vec<GroupState> = Vec::with_capacity(incoming.len());
        for state in incoming {
            let group = state.group();
            let old = self.group_state(group);
            if let Err(e) = self.load_group_state(state) {
                for restore in previous.into_iter().rev() {
                    self.load_group_state(restore)?;
                }
                tracing::warn!(%group, error = %e, "model load aborted");
                return Err(e);
            }
            previous.push(old);
        }
        tracing::info!(dir = %dir.display(), "model loaded");
        Ok(())
    }
}
