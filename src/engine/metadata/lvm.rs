// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Rendering of the volume group in LVM2 text format, as read by
// vgcfgrestore and pvcreate --restorefile.

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use devicemapper::Sectors;
use uuid::Uuid;

use crate::engine::{
    consts::{
        EXTENT_SIZE, PARTITION_HEADER_SIZE, THINPOOL_DATA_BLOCK_SIZE, THINPOOL_NAME,
        THIN_VOLUME_NAME, VOLUME_GROUP_NAME,
    },
    metadata::thinpool::{POOL_TRANSACTION_ID, THIN_DEVICE_ID},
};

const ID_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ID_GROUPS: [usize; 7] = [6, 4, 4, 4, 4, 4, 6];

/// Generate an identifier in the format LVM2 uses for PVs, VGs and LVs.
fn lvm_id() -> String {
    let bytes = Uuid::new_v4()
        .as_bytes()
        .iter()
        .chain(Uuid::new_v4().as_bytes().iter())
        .map(|b| ID_CHARS[usize::from(*b) % ID_CHARS.len()] as char)
        .collect::<Vec<_>>();

    let mut groups = Vec::with_capacity(ID_GROUPS.len());
    let mut start = 0;
    for len in ID_GROUPS {
        groups.push(bytes[start..start + len].iter().collect::<String>());
        start += len;
    }
    groups.join("-")
}

/// Identifiers of the LVM2 objects created by a migration.
#[derive(Debug)]
pub struct LvmIds {
    pub pv: String,
    pub vg: String,
    pub thinpool: String,
    pub thin: String,
    pub tmeta: String,
    pub tdata: String,
}

impl LvmIds {
    pub fn generate() -> LvmIds {
        LvmIds {
            pv: lvm_id(),
            vg: lvm_id(),
            thinpool: lvm_id(),
            thin: lvm_id(),
            tmeta: lvm_id(),
            tdata: lvm_id(),
        }
    }
}

pub struct VolumeGroupLayout<'a> {
    pub devnode: &'a Path,
    pub ids: &'a LvmIds,
    pub partition_size: Sectors,
    pub pe_count: u64,
    pub data_extents: u64,
    pub metadata_extents: u64,
}

fn logical_volume(
    name: &str,
    id: &str,
    visible: bool,
    creation_time: u64,
    segment: &str,
) -> String {
    let status = if visible {
        "[\"READ\", \"WRITE\", \"VISIBLE\"]"
    } else {
        "[\"READ\", \"WRITE\"]"
    };
    format!(
        "\t\t{name} {{\n\
         \t\t\tid = \"{id}\"\n\
         \t\t\tstatus = {status}\n\
         \t\t\tflags = []\n\
         \t\t\tcreation_time = {creation_time}\n\
         \t\t\tcreation_host = \"localhost\"\n\
         \t\t\tsegment_count = 1\n\
         \n\
         \t\t\tsegment1 {{\n\
         \t\t\t\tstart_extent = 0\n\
         {segment}\
         \t\t\t}}\n\
         \t\t}}\n"
    )
}

fn striped_segment(extent_count: u64, pv_extent: u64) -> String {
    format!(
        "\t\t\t\textent_count = {extent_count}\n\
         \t\t\t\ttype = \"striped\"\n\
         \t\t\t\tstripe_count = 1\n\
         \t\t\t\tstripes = [\"pv0\", {pv_extent}]\n"
    )
}

pub fn render(layout: &VolumeGroupLayout<'_>) -> String {
    let creation_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let tmeta = format!("{THINPOOL_NAME}_tmeta");
    let tdata = format!("{THINPOOL_NAME}_tdata");

    let pool_segment = format!(
        "\t\t\t\textent_count = {}\n\
         \t\t\t\ttype = \"thin-pool\"\n\
         \t\t\t\tmetadata = \"{tmeta}\"\n\
         \t\t\t\tpool = \"{tdata}\"\n\
         \t\t\t\ttransaction_id = {POOL_TRANSACTION_ID}\n\
         \t\t\t\tchunk_size = {}\n\
         \t\t\t\tdiscards = \"passdown\"\n\
         \t\t\t\tzero_new_blocks = 0\n",
        layout.data_extents, *THINPOOL_DATA_BLOCK_SIZE
    );
    let thin_segment = format!(
        "\t\t\t\textent_count = {}\n\
         \t\t\t\ttype = \"thin\"\n\
         \t\t\t\tthin_pool = \"{THINPOOL_NAME}\"\n\
         \t\t\t\ttransaction_id = 0\n\
         \t\t\t\tdevice_id = {THIN_DEVICE_ID}\n",
        layout.data_extents
    );

    let logical_volumes = [
        logical_volume(
            THINPOOL_NAME,
            &layout.ids.thinpool,
            true,
            creation_time,
            &pool_segment,
        ),
        logical_volume(
            THIN_VOLUME_NAME,
            &layout.ids.thin,
            true,
            creation_time,
            &thin_segment,
        ),
        logical_volume(
            &tmeta,
            &layout.ids.tmeta,
            false,
            creation_time,
            &striped_segment(layout.metadata_extents, layout.data_extents),
        ),
        logical_volume(
            &tdata,
            &layout.ids.tdata,
            false,
            creation_time,
            &striped_segment(layout.data_extents, 0),
        ),
    ]
    .join("\n");

    format!(
        "contents = \"Text Format Volume Group\"\n\
         version = 1\n\
         \n\
         description = \"Created by thinpool_migrator\"\n\
         \n\
         creation_host = \"localhost\"\n\
         creation_time = {creation_time}\n\
         \n\
         {VOLUME_GROUP_NAME} {{\n\
         \tid = \"{vg_id}\"\n\
         \tseqno = 1\n\
         \tformat = \"lvm2\"\n\
         \tstatus = [\"RESIZEABLE\", \"READ\", \"WRITE\"]\n\
         \tflags = []\n\
         \textent_size = {extent_size}\n\
         \tmax_lv = 0\n\
         \tmax_pv = 0\n\
         \tmetadata_copies = 0\n\
         \n\
         \tphysical_volumes {{\n\
         \n\
         \t\tpv0 {{\n\
         \t\t\tid = \"{pv_id}\"\n\
         \t\t\tdevice = \"{devnode}\"\n\
         \n\
         \t\t\tstatus = [\"ALLOCATABLE\"]\n\
         \t\t\tflags = []\n\
         \t\t\tdev_size = {dev_size}\n\
         \t\t\tpe_start = {pe_start}\n\
         \t\t\tpe_count = {pe_count}\n\
         \t\t}}\n\
         \t}}\n\
         \n\
         \tlogical_volumes {{\n\
         \n\
         {logical_volumes}\
         \t}}\n\
         }}\n",
        vg_id = layout.ids.vg,
        extent_size = *EXTENT_SIZE,
        pv_id = layout.ids.pv,
        devnode = layout.devnode.display(),
        dev_size = *layout.partition_size,
        pe_start = *PARTITION_HEADER_SIZE,
        pe_count = layout.pe_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lvm_id_format() {
        let id = lvm_id();
        let groups = id.split('-').map(|g| g.len()).collect::<Vec<_>>();
        assert_eq!(groups, ID_GROUPS.to_vec());
        assert!(id
            .chars()
            .all(|c| c == '-' || c.is_ascii_alphanumeric()));
        assert_ne!(id, lvm_id());
    }

    #[test]
    fn test_render_volume_group() {
        let ids = LvmIds::generate();
        let text = render(&VolumeGroupLayout {
            devnode: Path::new("/dev/sda1"),
            ids: &ids,
            partition_size: Sectors(2 * 1024 * 1024),
            pe_count: 127,
            data_extents: 125,
            metadata_extents: 2,
        });

        assert!(text.contains(&format!("{VOLUME_GROUP_NAME} {{\n")));
        assert!(text.contains(&format!("\t\t\tid = \"{}\"\n", ids.pv)));
        assert!(text.contains("\t\t\tdevice = \"/dev/sda1\"\n"));
        assert!(text.contains("\t\t\tdev_size = 2097152\n"));
        assert!(text.contains("\t\t\tpe_start = 2048\n"));
        assert!(text.contains("\t\t\tpe_count = 127\n"));
        assert!(text.contains("\textent_size = 8192\n"));
        assert!(text.contains("\t\t\t\tmetadata = \"thinpool_tmeta\"\n"));
        assert!(text.contains("\t\t\t\tpool = \"thinpool_tdata\"\n"));
        assert!(text.contains("\t\t\t\tthin_pool = \"thinpool\"\n"));
        assert!(text.contains("\t\t\t\tstripes = [\"pv0\", 125]\n"));
        assert!(text.contains("\t\t\t\tstripes = [\"pv0\", 0]\n"));
        assert_eq!(text.matches("segment1 {").count(), 4);
        assert_eq!(
            text.matches('{').count(),
            text.matches('}').count()
        );
    }
}
