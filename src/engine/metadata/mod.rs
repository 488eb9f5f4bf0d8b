// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Static layout of a partition converted to an LVM2 thinpool.
//
// Physical layout of the device after migration:
//
// | PV header | filesystem blocks 1 MiB.. | relocated header | thin metadata |
// 0           pe_start                    resized_fs_size    metadata_offset
//
// The thinpool data LV covers [pe_start, metadata_offset). The single thin
// volume maps its first MiB onto the relocated header and the rest of its
// blocks onto the filesystem blocks where they already lie, so no
// filesystem data moves except the header.

mod lvm;
mod thinpool;

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use devicemapper::{Bytes, Sectors};

use crate::{
    engine::consts::{
        EXTENT_SIZE, MAX_THINPOOL_METADATA_SIZE, PARTITION_HEADER_SIZE,
        THINPOOL_DATA_BLOCK_SIZE, THINPOOL_METADATA_PERCENT, VOLUME_GROUP_NAME,
    },
    migrator::{MigratorError, MigratorResult},
};

#[derive(Debug)]
pub struct StatefulMetadata {
    devnode: PathBuf,
    partition_size: Sectors,
    /// Number of physical extents in the PV.
    pe_count: u64,
    /// Extents at the end of the PV given over to thinpool metadata.
    metadata_extents: u64,
    ids: lvm::LvmIds,
}

impl StatefulMetadata {
    /// Compute the layout for the partition at devnode, which is
    /// partition_size bytes long. Any trailing partial sector is ignored.
    pub fn new(devnode: &Path, partition_size: Bytes) -> MigratorResult<StatefulMetadata> {
        let partition_size = partition_size.sectors();
        if partition_size <= PARTITION_HEADER_SIZE {
            return Err(MigratorError::Msg(format!(
                "Partition of {} sectors can not hold the {} sector header",
                *partition_size, *PARTITION_HEADER_SIZE
            )));
        }

        let pe_count = (*partition_size - *PARTITION_HEADER_SIZE) / *EXTENT_SIZE;
        let metadata_extents = (*partition_size * THINPOOL_METADATA_PERCENT / 100)
            .div_ceil(*EXTENT_SIZE)
            .clamp(1, *MAX_THINPOOL_METADATA_SIZE / *EXTENT_SIZE);

        if pe_count <= metadata_extents {
            return Err(MigratorError::Msg(format!(
                "Partition of {} sectors is too small to hold thinpool data and {} extents of thinpool metadata",
                *partition_size, metadata_extents
            )));
        }

        let metadata = StatefulMetadata {
            devnode: devnode.to_owned(),
            partition_size,
            pe_count,
            metadata_extents,
            ids: lvm::LvmIds::generate(),
        };
        debug!(
            "Computed thinpool layout for {}: resized filesystem {} sectors, metadata at {} for {} sectors",
            devnode.display(),
            *metadata.resized_filesystem_size(),
            *metadata.thinpool_metadata_offset(),
            *metadata.thinpool_metadata_size()
        );
        Ok(metadata)
    }

    pub fn partition_size(&self) -> Sectors {
        self.partition_size
    }

    fn data_extents(&self) -> u64 {
        self.pe_count - self.metadata_extents
    }

    /// The size the filesystem must be shrunk to. It equals the size of the
    /// thinpool data LV, which also holds the relocated header.
    pub fn resized_filesystem_size(&self) -> Sectors {
        EXTENT_SIZE * self.data_extents()
    }

    pub fn thinpool_metadata_offset(&self) -> Sectors {
        PARTITION_HEADER_SIZE + EXTENT_SIZE * self.data_extents()
    }

    pub fn thinpool_metadata_size(&self) -> Sectors {
        EXTENT_SIZE * self.metadata_extents
    }

    /// Number of data blocks in the pool, all of which are mapped by the
    /// thin volume.
    pub fn nr_data_blocks(&self) -> u64 {
        *self.resized_filesystem_size() / *THINPOOL_DATA_BLOCK_SIZE
    }

    pub fn pv_uuid(&self) -> &str {
        &self.ids.pv
    }

    pub fn vg_name(&self) -> &str {
        VOLUME_GROUP_NAME
    }

    /// thin_restore XML describing the thin volume's block mappings.
    pub fn thinpool_metadata_xml(&self) -> String {
        thinpool::render(self.nr_data_blocks())
    }

    /// LVM2 text-format description of the volume group, suitable for
    /// vgcfgrestore.
    pub fn lvm_metadata(&self) -> String {
        lvm::render(&lvm::VolumeGroupLayout {
            devnode: &self.devnode,
            ids: &self.ids,
            partition_size: self.partition_size,
            pe_count: self.pe_count,
            data_extents: self.data_extents(),
            metadata_extents: self.metadata_extents,
        })
    }

    pub fn dump_thinpool_metadata_mappings(&self, path: &Path) -> MigratorResult<()> {
        write_file(path, &self.thinpool_metadata_xml())
    }

    pub fn dump_lvm_metadata(&self, path: &Path) -> MigratorResult<()> {
        write_file(path, &self.lvm_metadata())
    }
}

fn write_file(path: &Path, contents: &str) -> MigratorResult<()> {
    let mut f = File::create(path)?;
    f.write_all(contents.as_bytes())?;
    f.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use devicemapper::IEC;
    use proptest::prelude::*;

    use super::*;

    fn metadata_for(size: Bytes) -> MigratorResult<StatefulMetadata> {
        StatefulMetadata::new(Path::new("/dev/mmcblk0p1"), size)
    }

    #[test]
    fn test_layout_512_gib() {
        let metadata = metadata_for(Bytes(512 * u128::from(IEC::Gi))).unwrap();
        let extent = *EXTENT_SIZE;

        // 1% of 512 GiB rounded up to 4 MiB extents.
        assert_eq!(metadata.metadata_extents, 1311);
        assert_eq!(metadata.pe_count, (512 * 256) - 1);
        assert_eq!(
            *metadata.resized_filesystem_size(),
            (512 * 256 - 1 - 1311) * extent
        );
        assert_eq!(
            metadata.thinpool_metadata_offset(),
            metadata.resized_filesystem_size() + PARTITION_HEADER_SIZE
        );
        assert_eq!(*metadata.thinpool_metadata_size(), 1311 * extent);
    }

    #[test]
    fn test_metadata_capped() {
        let metadata = metadata_for(Bytes(4 * u128::from(IEC::Ti))).unwrap();
        assert_eq!(metadata.thinpool_metadata_size(), MAX_THINPOOL_METADATA_SIZE);
    }

    #[test]
    fn test_too_small() {
        assert!(metadata_for(Bytes(u128::from(IEC::Mi))).is_err());
        assert!(metadata_for(Bytes(5 * u128::from(IEC::Mi))).is_err());
        assert!(metadata_for(Bytes(9 * u128::from(IEC::Mi))).is_ok());
    }

    #[test]
    fn test_partial_sector_ignored() {
        let whole = metadata_for(Bytes(u128::from(IEC::Gi))).unwrap();
        let ragged = metadata_for(Bytes(u128::from(IEC::Gi) + 511)).unwrap();
        assert_eq!(whole.partition_size(), ragged.partition_size());
        assert_eq!(
            whole.resized_filesystem_size(),
            ragged.resized_filesystem_size()
        );
    }

    #[test]
    fn test_dumps_written() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = metadata_for(Bytes(8 * u128::from(IEC::Gi))).unwrap();

        let xml_path = dir.path().join("thinpool.xml");
        metadata.dump_thinpool_metadata_mappings(&xml_path).unwrap();
        assert_eq!(
            read_to_string(&xml_path).unwrap(),
            metadata.thinpool_metadata_xml()
        );

        let lvm_path = dir.path().join("vgcfgrestore.txt");
        metadata.dump_lvm_metadata(&lvm_path).unwrap();
        let lvm = read_to_string(&lvm_path).unwrap();
        assert!(lvm.contains(metadata.pv_uuid()));
        assert!(lvm.starts_with("contents = \"Text Format Volume Group\""));
    }

    proptest! {
        #[test]
        /// The shrunk filesystem, the relocated header and the metadata
        /// region are laid out back to back and fit in the partition.
        fn layout_fits(size in (16 * IEC::Mi)..(64 * IEC::Ti)) {
            let metadata = metadata_for(Bytes(u128::from(size))).unwrap();
            let fs = metadata.resized_filesystem_size();
            let relocated_end = fs + PARTITION_HEADER_SIZE;

            prop_assert_eq!(relocated_end, metadata.thinpool_metadata_offset());
            prop_assert!(
                metadata.thinpool_metadata_offset() + metadata.thinpool_metadata_size()
                    <= metadata.partition_size()
            );
            prop_assert!(metadata.partition_size() - relocated_end - metadata.thinpool_metadata_size() < EXTENT_SIZE);
            prop_assert_eq!(*fs % *THINPOOL_DATA_BLOCK_SIZE, 0);
            prop_assert!(metadata.thinpool_metadata_size() <= MAX_THINPOOL_METADATA_SIZE);
            prop_assert!(
                *metadata.thinpool_metadata_size() + *EXTENT_SIZE
                    > *metadata.partition_size() * THINPOOL_METADATA_PERCENT / 100
                    || metadata.thinpool_metadata_size() == MAX_THINPOOL_METADATA_SIZE
            );
        }
    }
}
