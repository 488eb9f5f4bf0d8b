// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Functions for gathering information about the target block device.

use std::{fs::File, os::unix::io::AsRawFd, path::Path};

use devicemapper::{Bytes, Device};
use nix::sys::stat::{stat, SFlag};

use crate::migrator::{MigratorError, MigratorResult};

nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Get the size of the block device at devnode.
pub fn blkdev_size(devnode: &Path) -> MigratorResult<Bytes> {
    let file = File::open(devnode).map_err(|err| {
        MigratorError::Chained(
            format!("Failed to open {} to determine its size", devnode.display()),
            Box::new(MigratorError::Io(err)),
        )
    })?;
    let mut val: u64 = 0;
    // SAFETY: the file descriptor is open for the duration of the call and
    // val is a valid u64 for the kernel to write to.
    unsafe { blkgetsize64(file.as_raw_fd(), &mut val) }?;
    Ok(Bytes(u128::from(val)))
}

/// Get the device number of the block device at devnode.
pub fn devnode_to_devno(devnode: &Path) -> MigratorResult<Device> {
    let st = stat(devnode)?;
    if SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT != SFlag::S_IFBLK {
        return Err(MigratorError::Msg(format!(
            "{} is not a block device",
            devnode.display()
        )));
    }
    Ok(Device::from(st.st_rdev))
}
