// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Persistence of migration progress across process restarts and reboots.

use strum::VariantArray;

use crate::{
    engine::{
        cmd::{vpd_delete, vpd_get, vpd_set},
        consts::{MAX_MIGRATION_TRIES, VPD_PARTITION, VPD_STATUS_KEY},
        migrator::MigrationState,
    },
    migrator::{MigratorError, MigratorResult},
};

/// The durable record of a migration: how far the device layout has been
/// changed and how many attempts remain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub state: MigrationState,
    pub tries: u32,
}

impl Default for MigrationStatus {
    fn default() -> MigrationStatus {
        MigrationStatus {
            state: MigrationState::NotStarted,
            tries: MAX_MIGRATION_TRIES,
        }
    }
}

fn valid_states() -> String {
    MigrationState::VARIANTS
        .iter()
        .map(|state| state.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub trait StatusStore {
    /// Load the stored status. None means that no migration has been
    /// enabled for this device.
    fn load(&self) -> MigratorResult<Option<MigrationStatus>>;

    fn store(&mut self, status: &MigrationStatus) -> MigratorResult<()>;

    fn clear(&mut self) -> MigratorResult<()>;
}

impl<S> StatusStore for &mut S
where
    S: StatusStore + ?Sized,
{
    fn load(&self) -> MigratorResult<Option<MigrationStatus>> {
        (**self).load()
    }

    fn store(&mut self, status: &MigrationStatus) -> MigratorResult<()> {
        (**self).store(status)
    }

    fn clear(&mut self) -> MigratorResult<()> {
        (**self).clear()
    }
}

/// Mark the device for migration with a full set of tries.
///
/// A status that has moved past NotStarted is left alone: resetting it
/// would rerun the filesystem shrink on a device whose layout has already
/// been changed. Returns the status in effect afterwards.
pub fn enable_migration<S>(store: &mut S) -> MigratorResult<MigrationStatus>
where
    S: StatusStore,
{
    match store.load()? {
        Some(status) if status.state != MigrationState::NotStarted => {
            info!(
                "Migration already in progress or done in state {}; leaving status alone",
                status.state
            );
            Ok(status)
        }
        _ => {
            let status = MigrationStatus::default();
            store.store(&status)?;
            Ok(status)
        }
    }
}

/// Status kept in the RW_VPD partition of the firmware flash, which survives
/// reboots and repartitioning of the disk.
#[derive(Debug, Default)]
pub struct VpdStore;

impl StatusStore for VpdStore {
    fn load(&self) -> MigratorResult<Option<MigrationStatus>> {
        match vpd_get(VPD_PARTITION, VPD_STATUS_KEY)? {
            Some(value) => serde_json::from_str(&value).map(Some).map_err(|err| {
                MigratorError::Chained(
                    format!(
                        "Malformed migration status \"{value}\" in VPD; valid states are {}",
                        valid_states()
                    ),
                    Box::new(MigratorError::Serde(err)),
                )
            }),
            None => Ok(None),
        }
    }

    fn store(&mut self, status: &MigrationStatus) -> MigratorResult<()> {
        vpd_set(VPD_PARTITION, VPD_STATUS_KEY, &serde_json::to_string(status)?)
    }

    fn clear(&mut self) -> MigratorResult<()> {
        vpd_delete(VPD_PARTITION, VPD_STATUS_KEY)
    }
}

/// Status kept only for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    status: Option<MigrationStatus>,
}

impl MemoryStore {
    pub fn new(status: Option<MigrationStatus>) -> MemoryStore {
        MemoryStore { status }
    }
}

impl StatusStore for MemoryStore {
    fn load(&self) -> MigratorResult<Option<MigrationStatus>> {
        Ok(self.status)
    }

    fn store(&mut self, status: &MigrationStatus) -> MigratorResult<()> {
        self.status = Some(*status);
        Ok(())
    }

    fn clear(&mut self) -> MigratorResult<()> {
        self.status = None;
        Ok(())
    }
}
