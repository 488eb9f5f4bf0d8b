// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Rendering of thinpool metadata in the XML format read by thin_restore.

use std::fmt::Write;

use crate::engine::consts::{PARTITION_HEADER_SIZE, THINPOOL_DATA_BLOCK_SIZE};

/// Id of the one thin device in the pool. Must agree with the device_id of
/// the thin LV in the LVM2 metadata.
pub const THIN_DEVICE_ID: u32 = 1;

/// Pool transaction id after the thin device has been created. Must agree
/// with the transaction_id of the thin-pool LV in the LVM2 metadata.
pub const POOL_TRANSACTION_ID: u32 = 1;

/// Render the mappings for a pool of nr_data_blocks blocks, all owned by a
/// single thin device.
///
/// The relocated header occupies the last header-sized stretch of the data
/// LV and becomes the start of the thin device; every other block of the
/// thin device sits one header's length further along the partition than
/// the corresponding data LV block, because the data LV begins after the
/// PV header.
pub fn render(nr_data_blocks: u64) -> String {
    let header_blocks = *PARTITION_HEADER_SIZE / *THINPOOL_DATA_BLOCK_SIZE;
    let body_blocks = nr_data_blocks - header_blocks;

    let mut xml = String::new();
    // Writing to a String can not fail.
    let _ = writeln!(
        xml,
        "<superblock uuid=\"\" time=\"0\" transaction=\"{POOL_TRANSACTION_ID}\" flags=\"0\" version=\"2\" data_block_size=\"{}\" nr_data_blocks=\"{nr_data_blocks}\">",
        *THINPOOL_DATA_BLOCK_SIZE
    );
    let _ = writeln!(
        xml,
        "  <device dev_id=\"{THIN_DEVICE_ID}\" mapped_blocks=\"{nr_data_blocks}\" transaction=\"0\" creation_time=\"0\" snap_time=\"0\">"
    );
    let _ = writeln!(
        xml,
        "    <range_mapping origin_begin=\"0\" data_begin=\"{body_blocks}\" length=\"{header_blocks}\" time=\"0\"/>"
    );
    let _ = writeln!(
        xml,
        "    <range_mapping origin_begin=\"{header_blocks}\" data_begin=\"0\" length=\"{body_blocks}\" time=\"0\"/>"
    );
    let _ = writeln!(xml, "  </device>");
    let _ = writeln!(xml, "</superblock>");
    xml
}
