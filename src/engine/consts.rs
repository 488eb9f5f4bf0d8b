// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use devicemapper::{Sectors, IEC, SECTOR_SIZE};

/// Size of the region at the start of the partition that is parked at the
/// end of the shrunk filesystem while the device is converted. The LVM2
/// physical volume label and metadata area live entirely inside it.
pub const PARTITION_HEADER_SIZE: Sectors = Sectors(IEC::Mi / SECTOR_SIZE as u64);

/// Size of an LVM2 physical extent.
pub const EXTENT_SIZE: Sectors = Sectors(4 * IEC::Mi / SECTOR_SIZE as u64);

/// Size of a thinpool data block.
pub const THINPOOL_DATA_BLOCK_SIZE: Sectors = Sectors(64 * IEC::Ki / SECTOR_SIZE as u64);

/// Largest thinpool metadata device the kernel makes use of.
pub const MAX_THINPOOL_METADATA_SIZE: Sectors = Sectors(16 * IEC::Gi / SECTOR_SIZE as u64);

/// Thinpool metadata is sized as this percentage of the partition.
pub const THINPOOL_METADATA_PERCENT: u64 = 1;

pub const THINPOOL_METADATA_PATH: &str = "/tmp/thinpool.xml";
pub const VGCFGRESTORE_PATH: &str = "/tmp/vgcfgrestore.txt";

pub const METADATA_DM_TARGET: &str = "thinpool-metadata-dev";

pub const VOLUME_GROUP_NAME: &str = "STATEFUL";
pub const THINPOOL_NAME: &str = "thinpool";
pub const THIN_VOLUME_NAME: &str = "unencrypted";

/// Number of migration attempts allowed before the migration is abandoned.
pub const MAX_MIGRATION_TRIES: u32 = 5;

pub const VPD_PARTITION: &str = "RW_VPD";
pub const VPD_STATUS_KEY: &str = "thinpool_migration_status";

pub const LOG_DIR: &str = "/run/thinpool_migrator";
pub const LOG_FILE: &str = "thinpool_migrator.log";
