// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    cmd::verify_binaries,
    consts::{LOG_DIR, LOG_FILE, MAX_MIGRATION_TRIES},
    device::blkdev_size,
    metadata::StatefulMetadata,
    migrator::{revert_step, transition, MigrationState, PhaseOutcome, RevertAction, ThinpoolMigrator},
    ops::{DiskOps, StatefulDevice},
    status::{enable_migration, MemoryStore, MigrationStatus, StatusStore, VpdStore},
};

mod cmd;
mod consts;
mod device;
mod dm;
mod metadata;
mod migrator;
mod ops;
mod status;
