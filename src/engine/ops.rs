// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// The disk-mutating primitives that the migration phases are built from.

use std::path::{Path, PathBuf};

use devicemapper::{
    DevId, Device, DmDevice, DmName, DmNameBuf, DmOptions, LinearDev, LinearDevTargetParams,
    LinearTargetParams, Sectors, TargetLine, DM,
};
use nix::unistd::sync;
use retry::{delay::Fixed, retry_with_index};

use crate::{
    engine::{
        cmd::{dd_copy, pvcreate, resize2fs, thin_restore, vgcfgrestore},
        consts::METADATA_DM_TARGET,
        device::devnode_to_devno,
        dm::get_dm,
    },
    migrator::{MigratorError, MigratorResult},
};

/// Operations a migration performs on the device. Each one runs to
/// completion before returning.
pub trait DiskOps {
    /// Resize the filesystem on the device to size. None grows the
    /// filesystem to fill the whole device.
    fn resize_filesystem(&mut self, size: Option<Sectors>) -> MigratorResult<()>;

    /// Copy length sectors at from to to on the same device. The copy is
    /// durable when this method returns successfully. On failure any part
    /// of the destination may have been written.
    fn duplicate_header(&mut self, from: Sectors, to: Sectors, length: Sectors)
        -> MigratorResult<()>;

    /// Map [start, start + length) of the device to a device-mapper linear
    /// target. Returns the devnode of the target.
    fn setup_metadata_target(&mut self, start: Sectors, length: Sectors)
        -> MigratorResult<PathBuf>;

    /// Remove the target created by setup_metadata_target, if any.
    fn remove_metadata_target(&mut self) -> MigratorResult<()>;

    fn convert_thinpool_metadata_to_binary(
        &mut self,
        xml: &Path,
        metadata_dev: &Path,
    ) -> MigratorResult<()>;

    /// Write the LVM2 PV label over the start of the device. This destroys
    /// the original filesystem superblock.
    fn initialize_physical_volume(&mut self, pv_uuid: &str, restore_file: &Path)
        -> MigratorResult<()>;

    fn restore_volume_group_configuration(
        &mut self,
        vg_name: &str,
        restore_file: &Path,
    ) -> MigratorResult<()>;
}

/// Whether a device named name appears in a device-mapper device listing.
fn target_exists(devices: &[(DmNameBuf, Device, Option<u32>)], name: &DmName) -> bool {
    devices
        .iter()
        .any(|(dm_name, _, _)| dm_name.to_string() == name.to_string())
}

/// Remove a target named name left behind by an earlier run that was
/// killed before it could tear the target down.
fn remove_stale_target(dm: &DM, name: &DmName) -> MigratorResult<()> {
    if !target_exists(&dm.list_devices()?, name) {
        return Ok(());
    }

    warn!("Removing stale device-mapper target {name}");
    retry_with_index(Fixed::from_millis(100).take(3), |i| {
        trace!("Stale target removal attempt {i} for {name}");
        dm.device_remove(&DevId::Name(name), DmOptions::default())
    })
    .map(|_| ())
    .map_err(|err| {
        MigratorError::Msg(format!(
            "Failed to remove stale device-mapper target {name}: {err}"
        ))
    })
}

/// The real partition being migrated.
#[derive(Debug)]
pub struct StatefulDevice {
    devnode: PathBuf,
    devno: Device,
    metadata_dev: Option<LinearDev>,
}

impl StatefulDevice {
    pub fn new(devnode: &Path) -> MigratorResult<StatefulDevice> {
        Ok(StatefulDevice {
            devnode: devnode.to_owned(),
            devno: devnode_to_devno(devnode)?,
            metadata_dev: None,
        })
    }
}

impl DiskOps for StatefulDevice {
    fn resize_filesystem(&mut self, size: Option<Sectors>) -> MigratorResult<()> {
        match size {
            Some(size) => info!(
                "Resizing filesystem on {} to {} sectors",
                self.devnode.display(),
                *size
            ),
            None => info!(
                "Growing filesystem on {} to fill the device",
                self.devnode.display()
            ),
        }
        resize2fs(&self.devnode, size)
    }

    fn duplicate_header(
        &mut self,
        from: Sectors,
        to: Sectors,
        length: Sectors,
    ) -> MigratorResult<()> {
        info!(
            "Copying {} sectors at sector {} to sector {} on {}",
            *length,
            *from,
            *to,
            self.devnode.display()
        );
        dd_copy(&self.devnode, from, to, length)?;
        sync();
        Ok(())
    }

    fn setup_metadata_target(
        &mut self,
        start: Sectors,
        length: Sectors,
    ) -> MigratorResult<PathBuf> {
        if self.metadata_dev.is_some() {
            return Err(MigratorError::Msg(format!(
                "Device-mapper target {METADATA_DM_TARGET} is already set up"
            )));
        }

        let dm = get_dm()?;
        let name = DmNameBuf::new(METADATA_DM_TARGET.to_string())?;
        remove_stale_target(dm, &name)?;

        let table = vec![TargetLine::new(
            Sectors(0),
            length,
            LinearDevTargetParams::Linear(LinearTargetParams::new(self.devno, start)),
        )];
        let dev = LinearDev::setup(dm, &name, None, table)?;
        let devnode = dev.devnode();
        debug!(
            "Set up {} over sectors [{}, {}) of {}",
            devnode.display(),
            *start,
            *(start + length),
            self.devnode.display()
        );
        self.metadata_dev = Some(dev);
        Ok(devnode)
    }

    fn remove_metadata_target(&mut self) -> MigratorResult<()> {
        if let Some(mut dev) = self.metadata_dev.take() {
            let dm = get_dm()?;
            retry_with_index(Fixed::from_millis(100).take(3), |i| {
                trace!("Teardown attempt {i} for {METADATA_DM_TARGET}");
                dev.teardown(dm)
            })
            .map_err(|err| {
                MigratorError::Msg(format!(
                    "Failed to remove device-mapper target {METADATA_DM_TARGET}: {err}"
                ))
            })?;
        }
        Ok(())
    }

    fn convert_thinpool_metadata_to_binary(
        &mut self,
        xml: &Path,
        metadata_dev: &Path,
    ) -> MigratorResult<()> {
        info!(
            "Writing thinpool metadata from {} to {}",
            xml.display(),
            metadata_dev.display()
        );
        thin_restore(xml, metadata_dev)
    }

    fn initialize_physical_volume(
        &mut self,
        pv_uuid: &str,
        restore_file: &Path,
    ) -> MigratorResult<()> {
        info!(
            "Creating physical volume {pv_uuid} on {}",
            self.devnode.display()
        );
        pvcreate(&self.devnode, pv_uuid, restore_file)
    }

    fn restore_volume_group_configuration(
        &mut self,
        vg_name: &str,
        restore_file: &Path,
    ) -> MigratorResult<()> {
        info!("Restoring volume group {vg_name} from {}", restore_file.display());
        vgcfgrestore(vg_name, restore_file)
    }
}

impl Drop for StatefulDevice {
    fn drop(&mut self) {
        if let Err(err) = self.remove_metadata_target() {
            warn!("{err}");
        }
    }
}
