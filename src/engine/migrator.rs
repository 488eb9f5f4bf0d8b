// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Resumable conversion of a filesystem partition into an LVM2 thinpool.
//
// A migration is a fixed sequence of phases. Each phase moves the
// persisted state one step forward, so a migration interrupted by a crash
// resumes at the first phase that has not yet completed. Every phase but
// the last can be undone; the last overwrites the filesystem superblock
// and is never reverted.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use devicemapper::Sectors;
use nix::unistd::sync;

use crate::{
    engine::{
        consts::{PARTITION_HEADER_SIZE, THINPOOL_METADATA_PATH, VGCFGRESTORE_PATH},
        metadata::StatefulMetadata,
        ops::DiskOps,
        status::{MigrationStatus, StatusStore},
    },
    migrator::{MigratorError, MigratorResult},
};

/// How far the layout of the device has been changed. States are ordered;
/// each successful phase advances the state by exactly one step.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::VariantArray,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    NotStarted,
    FilesystemResized,
    PartitionHeaderCopied,
    ThinpoolMetadataPersisted,
    Completed,
}

impl MigrationState {
    /// The state reached when the phase starting at this state succeeds.
    pub fn next(self) -> Option<MigrationState> {
        match self {
            MigrationState::NotStarted => Some(MigrationState::FilesystemResized),
            MigrationState::FilesystemResized => Some(MigrationState::PartitionHeaderCopied),
            MigrationState::PartitionHeaderCopied => {
                Some(MigrationState::ThinpoolMetadataPersisted)
            }
            MigrationState::ThinpoolMetadataPersisted => Some(MigrationState::Completed),
            MigrationState::Completed => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display)]
enum Phase {
    #[strum(serialize = "shrink filesystem")]
    ShrinkFilesystem,
    #[strum(serialize = "duplicate partition header")]
    DuplicateHeader,
    #[strum(serialize = "persist thinpool metadata")]
    PersistThinpoolMetadata,
    #[strum(serialize = "persist LVM2 metadata")]
    PersistLvmMetadata,
}

/// All phases in the order they run.
const PHASES: [Phase; 4] = [
    Phase::ShrinkFilesystem,
    Phase::DuplicateHeader,
    Phase::PersistThinpoolMetadata,
    Phase::PersistLvmMetadata,
];

impl Phase {
    /// The state in which this phase begins.
    fn from_state(self) -> MigrationState {
        match self {
            Phase::ShrinkFilesystem => MigrationState::NotStarted,
            Phase::DuplicateHeader => MigrationState::FilesystemResized,
            Phase::PersistThinpoolMetadata => MigrationState::PartitionHeaderCopied,
            Phase::PersistLvmMetadata => MigrationState::ThinpoolMetadataPersisted,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhaseOutcome {
    Succeeded,
    Failed,
}

/// The state after a phase that started in state finishes with outcome.
pub fn transition(state: MigrationState, outcome: PhaseOutcome) -> MigrationState {
    match outcome {
        PhaseOutcome::Succeeded => state.next().unwrap_or(state),
        PhaseOutcome::Failed => state,
    }
}

/// Disk operation that undoes the effect of reaching a state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RevertAction {
    /// Copy the relocated header back to the start of the partition.
    RestoreHeader,
    /// Grow the filesystem back over the whole partition.
    GrowFilesystem,
}

/// The next step backwards from state, if the state can be reverted.
///
/// Growing the filesystem discards everything the shrink freed up, so it
/// returns the device all the way to NotStarted. Completed has no revert:
/// the start of the partition holds the LVM2 label, not the filesystem.
pub fn revert_step(state: MigrationState) -> Option<(RevertAction, MigrationState)> {
    match state {
        MigrationState::NotStarted | MigrationState::Completed => None,
        MigrationState::FilesystemResized | MigrationState::PartitionHeaderCopied => {
            Some((RevertAction::GrowFilesystem, MigrationState::NotStarted))
        }
        MigrationState::ThinpoolMetadataPersisted => Some((
            RevertAction::RestoreHeader,
            MigrationState::FilesystemResized,
        )),
    }
}

pub struct ThinpoolMigrator<O, S> {
    ops: O,
    store: S,
    metadata: StatefulMetadata,
    status: MigrationStatus,
    thinpool_xml_path: PathBuf,
    vgcfgrestore_path: PathBuf,
}

impl<O, S> fmt::Debug for ThinpoolMigrator<O, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThinpoolMigrator")
            .field("metadata", &self.metadata)
            .field("status", &self.status)
            .finish()
    }
}

impl<O, S> ThinpoolMigrator<O, S>
where
    O: DiskOps,
    S: StatusStore,
{
    pub fn new(
        ops: O,
        store: S,
        metadata: StatefulMetadata,
        status: MigrationStatus,
    ) -> ThinpoolMigrator<O, S> {
        ThinpoolMigrator {
            ops,
            store,
            metadata,
            status,
            thinpool_xml_path: PathBuf::from(THINPOOL_METADATA_PATH),
            vgcfgrestore_path: PathBuf::from(VGCFGRESTORE_PATH),
        }
    }

    /// Write the intermediate metadata files somewhere other than /tmp.
    pub fn with_dump_paths(mut self, thinpool_xml: &Path, vgcfgrestore: &Path) -> Self {
        self.thinpool_xml_path = thinpool_xml.to_owned();
        self.vgcfgrestore_path = vgcfgrestore.to_owned();
        self
    }

    pub fn state(&self) -> MigrationState {
        self.status.state
    }

    pub fn status(&self) -> MigrationStatus {
        self.status
    }

    pub fn metadata(&self) -> &StatefulMetadata {
        &self.metadata
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn partition_size(&self) -> Sectors {
        self.metadata.partition_size()
    }

    pub fn resized_filesystem_size(&self) -> Sectors {
        self.metadata.resized_filesystem_size()
    }

    /// Where the copy of the partition header is parked: immediately past
    /// the end of the shrunk filesystem.
    pub fn relocated_header_offset(&self) -> Sectors {
        self.metadata.resized_filesystem_size()
    }

    pub fn thinpool_metadata_offset(&self) -> Sectors {
        self.metadata.thinpool_metadata_offset()
    }

    pub fn thinpool_metadata_size(&self) -> Sectors {
        self.metadata.thinpool_metadata_size()
    }

    fn set_state(&mut self, state: MigrationState) -> MigratorResult<()> {
        info!("Migration state {} -> {}", self.status.state, state);
        self.status.state = state;
        self.store.store(&self.status)
    }

    /// Run the migration from the current state to Completed.
    ///
    /// In a dry run the metadata that would be written is logged and nothing
    /// else happens. Otherwise one try is used up and every remaining phase
    /// runs in order. If a phase fails the device is reverted as far as
    /// possible and the phase's error is returned.
    pub fn migrate(&mut self, dry_run: bool) -> MigratorResult<()> {
        if dry_run {
            info!(
                "Dry run; thinpool metadata:\n{}",
                self.metadata.thinpool_metadata_xml()
            );
            info!("Dry run; LVM2 metadata:\n{}", self.metadata.lvm_metadata());
            return Ok(());
        }

        let start = self.status.state;
        if start == MigrationState::Completed {
            return Err(MigratorError::Msg(
                "Migration has already completed".to_string(),
            ));
        }
        if self.status.tries == 0 {
            return Err(MigratorError::Msg(format!(
                "No migration attempts remain; device left in state {start}"
            )));
        }

        self.status.tries -= 1;
        self.store.store(&self.status)?;
        info!(
            "Starting migration in state {start}, {} attempts remain after this one",
            self.status.tries
        );

        for phase in PHASES.iter().skip_while(|phase| phase.from_state() != start) {
            let result = self.run_phase(*phase);
            let outcome = if result.is_ok() {
                PhaseOutcome::Succeeded
            } else {
                PhaseOutcome::Failed
            };
            let next = transition(self.status.state, outcome);

            if let Err(err) = result.and_then(|_| self.set_state(next)) {
                error!("Phase \"{phase}\" failed: {err}");
                return Err(self.revert_after_failure(*phase, err));
            }
        }

        info!("Migration completed");
        Ok(())
    }

    fn revert_after_failure(&mut self, phase: Phase, err: MigratorError) -> MigratorError {
        if self.status.state == MigrationState::NotStarted {
            return err;
        }

        match self.revert_migration() {
            Ok(()) => {
                info!("Reverted failed migration to state {}", self.status.state);
                MigratorError::Chained(
                    format!("Phase \"{phase}\" of the migration failed"),
                    Box::new(err),
                )
            }
            Err(revert_err) => {
                error!(
                    "Failed to revert migration, device left in state {}: {revert_err}",
                    self.status.state
                );
                MigratorError::RevertFailure {
                    causal_error: Box::new(err),
                    revert_error: Box::new(revert_err),
                }
            }
        }
    }

    fn run_phase(&mut self, phase: Phase) -> MigratorResult<()> {
        info!("Running phase \"{phase}\"");
        match phase {
            Phase::ShrinkFilesystem => {
                let size = self.resized_filesystem_size();
                self.ops.resize_filesystem(Some(size))
            }
            Phase::DuplicateHeader => {
                let to = self.relocated_header_offset();
                self.ops
                    .duplicate_header(Sectors(0), to, PARTITION_HEADER_SIZE)
            }
            Phase::PersistThinpoolMetadata => self.persist_thinpool_metadata(),
            Phase::PersistLvmMetadata => self.persist_lvm_metadata(),
        }
    }

    /// Write the binary thinpool metadata into the region reserved for it.
    /// The device-mapper target used to reach that region is removed
    /// whether or not the write succeeds.
    fn persist_thinpool_metadata(&mut self) -> MigratorResult<()> {
        self.metadata
            .dump_thinpool_metadata_mappings(&self.thinpool_xml_path)?;

        let devnode = self.ops.setup_metadata_target(
            self.metadata.thinpool_metadata_offset(),
            self.metadata.thinpool_metadata_size(),
        )?;

        let converted = self
            .ops
            .convert_thinpool_metadata_to_binary(&self.thinpool_xml_path, &devnode)
            .map(|_| sync());
        let removed = self.ops.remove_metadata_target();
        if let (Err(err), Err(_)) = (&removed, &converted) {
            warn!("Also failed to remove metadata target: {err}");
        }

        converted.and(removed)
    }

    /// Replace the filesystem header with the LVM2 PV label and restore the
    /// volume group onto it.
    fn persist_lvm_metadata(&mut self) -> MigratorResult<()> {
        self.metadata.dump_lvm_metadata(&self.vgcfgrestore_path)?;
        self.ops
            .initialize_physical_volume(self.metadata.pv_uuid(), &self.vgcfgrestore_path)?;
        self.ops
            .restore_volume_group_configuration(self.metadata.vg_name(), &self.vgcfgrestore_path)
    }

    /// Walk the device back to NotStarted.
    ///
    /// Refuses in NotStarted, where there is nothing to undo, and in
    /// Completed, where undoing would destroy the filesystem. Stops at the
    /// first failing step, leaving the state at the last step that
    /// succeeded.
    pub fn revert_migration(&mut self) -> MigratorResult<()> {
        match self.status.state {
            MigrationState::Completed => {
                error!("Refusing to revert a completed migration");
                return Err(MigratorError::Msg(
                    "A completed migration can not be reverted".to_string(),
                ));
            }
            MigrationState::NotStarted => {
                return Err(MigratorError::Msg(
                    "Migration has not started; nothing to revert".to_string(),
                ));
            }
            _ => (),
        }

        while let Some((action, target)) = revert_step(self.status.state) {
            match action {
                // Offset 0 is only written by the final phase. This guards
                // against that phase having been interrupted part way
                // through its write.
                RevertAction::RestoreHeader => {
                    let from = self.relocated_header_offset();
                    self.ops
                        .duplicate_header(from, Sectors(0), PARTITION_HEADER_SIZE)?;
                }
                RevertAction::GrowFilesystem => self.ops.resize_filesystem(None)?,
            }
            self.set_state(target)?;
        }

        Ok(())
    }
}
