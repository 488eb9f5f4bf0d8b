// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Handles invoking external binaries.
// Binaries are looked up once per process in a fixed list of directories.
// verify_binaries() must be called before the first phase of a migration
// runs, so that a missing tool is reported before the device is touched
// rather than in the middle of a conversion.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::LazyLock,
};

use devicemapper::Sectors;

use crate::migrator::{MigratorError, MigratorResult};

const BINARIES_PATHS: [&str; 4] = ["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

/// Find the binary with the given name by looking in likely locations.
/// Return None if no binary was found.
/// The PATH environment variable is not consulted; early in boot it may be
/// unset.
fn find_binary(name: &str) -> Option<PathBuf> {
    BINARIES_PATHS
        .iter()
        .map(|pre| [*pre, name].iter().collect::<PathBuf>())
        .find(|path| path.exists())
}

const DD: &str = "dd";
const PVCREATE: &str = "pvcreate";
const RESIZE2FS: &str = "resize2fs";
const THIN_RESTORE: &str = "thin_restore";
const VGCFGRESTORE: &str = "vgcfgrestore";
const VPD: &str = "vpd";

/// Binaries required for every migration. vpd is only needed when
/// migration status is kept in VPD and so is not part of this list.
const MIGRATION_BINARIES: [&str; 5] = [DD, PVCREATE, RESIZE2FS, THIN_RESTORE, VGCFGRESTORE];

static BINARIES: LazyLock<HashMap<&'static str, Option<PathBuf>>> = LazyLock::new(|| {
    MIGRATION_BINARIES
        .iter()
        .chain([VPD].iter())
        .map(|name| (*name, find_binary(name)))
        .collect()
});

/// Verify that all binaries that a migration might invoke are available at
/// some path. Return an error naming every missing binary.
pub fn verify_binaries() -> MigratorResult<()> {
    let missing: Vec<String> = MIGRATION_BINARIES
        .iter()
        .filter(|name| matches!(BINARIES.get(*name), Some(None) | None))
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MigratorError::BinariesNotFound {
            names: missing,
            locations: BINARIES_PATHS.iter().map(|path| path.to_string()).collect(),
        })
    }
}

/// Get an absolute path for the executable with the given name.
/// The binary may have been removed since it was looked up, so its
/// existence is checked again.
fn get_executable(name: &str) -> MigratorResult<&'static Path> {
    match BINARIES.get(name) {
        Some(Some(path)) if path.exists() => Ok(path.as_path()),
        _ => Err(MigratorError::BinariesNotFound {
            names: vec![name.to_string()],
            locations: BINARIES_PATHS.iter().map(|path| path.to_string()).collect(),
        }),
    }
}

/// Invoke the specified command. Return the standard output of the command
/// if it succeeded, an error if invoking the command fails or if the command
/// itself fails.
fn execute_cmd(cmd: &mut Command) -> MigratorResult<String> {
    debug!("Executing {cmd:?}");
    match cmd.stdin(Stdio::null()).output() {
        Err(err) => Err(MigratorError::CommandExecution {
            cmd: format!("{cmd:?}"),
            err,
        }),
        Ok(result) => {
            if result.status.success() {
                Ok(String::from_utf8_lossy(&result.stdout).into_owned())
            } else {
                Err(MigratorError::CommandFailure {
                    cmd: format!("{cmd:?}"),
                    status: result.status,
                    stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
                })
            }
        }
    }
}

fn resize2fs_cmd(resize2fs: &Path, devnode: &Path, size: Option<Sectors>) -> Command {
    let mut cmd = Command::new(resize2fs);
    cmd.arg("-f").arg(devnode);
    if let Some(size) = size {
        cmd.arg(format!("{}s", *size));
    }
    cmd
}

/// Resize the ext4 filesystem on devnode to size. If size is None, the
/// filesystem is grown to fill the whole block device.
pub fn resize2fs(devnode: &Path, size: Option<Sectors>) -> MigratorResult<()> {
    execute_cmd(&mut resize2fs_cmd(get_executable(RESIZE2FS)?, devnode, size)).map(|_| ())
}

fn dd_copy_cmd(dd: &Path, devnode: &Path, from: Sectors, to: Sectors, length: Sectors) -> Command {
    let mut cmd = Command::new(dd);
    cmd.arg(format!("if={}", devnode.display()))
        .arg(format!("of={}", devnode.display()))
        .arg("bs=512")
        .arg(format!("skip={}", *from))
        .arg(format!("seek={}", *to))
        .arg(format!("count={}", *length))
        .arg("conv=notrunc,fsync");
    cmd
}

/// Copy length sectors from offset from to offset to on the same device.
/// Writes are flushed before dd exits.
pub fn dd_copy(devnode: &Path, from: Sectors, to: Sectors, length: Sectors) -> MigratorResult<()> {
    execute_cmd(&mut dd_copy_cmd(
        get_executable(DD)?,
        devnode,
        from,
        to,
        length,
    ))
    .map(|_| ())
}

fn thin_restore_cmd(thin_restore: &Path, input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new(thin_restore);
    cmd.arg("-i").arg(input).arg("-o").arg(output);
    cmd
}

/// Write the binary thinpool metadata described by the XML file at input
/// to the metadata device at output.
pub fn thin_restore(input: &Path, output: &Path) -> MigratorResult<()> {
    execute_cmd(&mut thin_restore_cmd(
        get_executable(THIN_RESTORE)?,
        input,
        output,
    ))
    .map(|_| ())
}

fn pvcreate_cmd(pvcreate: &Path, devnode: &Path, pv_uuid: &str, restore_file: &Path) -> Command {
    let mut cmd = Command::new(pvcreate);
    cmd.arg("-ff")
        .arg("--yes")
        .arg("--uuid")
        .arg(pv_uuid)
        .arg("--restorefile")
        .arg(restore_file)
        .arg(devnode);
    cmd
}

/// Write an LVM2 physical volume label with the given UUID to devnode,
/// taking the data area layout from restore_file.
pub fn pvcreate(devnode: &Path, pv_uuid: &str, restore_file: &Path) -> MigratorResult<()> {
    execute_cmd(&mut pvcreate_cmd(
        get_executable(PVCREATE)?,
        devnode,
        pv_uuid,
        restore_file,
    ))
    .map(|_| ())
}

fn vgcfgrestore_cmd(vgcfgrestore: &Path, vg_name: &str, restore_file: &Path) -> Command {
    let mut cmd = Command::new(vgcfgrestore);
    cmd.arg("--force").arg("-f").arg(restore_file).arg(vg_name);
    cmd
}

/// Restore the volume group vg_name from restore_file.
pub fn vgcfgrestore(vg_name: &str, restore_file: &Path) -> MigratorResult<()> {
    execute_cmd(&mut vgcfgrestore_cmd(
        get_executable(VGCFGRESTORE)?,
        vg_name,
        restore_file,
    ))
    .map(|_| ())
}

/// Read key from the given VPD partition. Returns None if the key is not
/// set.
pub fn vpd_get(partition: &str, key: &str) -> MigratorResult<Option<String>> {
    let listing = execute_cmd(Command::new(get_executable(VPD)?).arg("-i").arg(partition).arg("-l"))?;
    let prefix = format!("\"{key}\"=");
    if !listing.lines().any(|line| line.starts_with(&prefix)) {
        return Ok(None);
    }
    execute_cmd(
        Command::new(get_executable(VPD)?)
            .arg("-i")
            .arg(partition)
            .arg("-g")
            .arg(key),
    )
    .map(|value| Some(value.trim().to_string()))
}

/// Set key to value in the given VPD partition.
pub fn vpd_set(partition: &str, key: &str, value: &str) -> MigratorResult<()> {
    execute_cmd(
        Command::new(get_executable(VPD)?)
            .arg("-i")
            .arg(partition)
            .arg("-s")
            .arg(format!("{key}={value}")),
    )
    .map(|_| ())
}

/// Remove key from the given VPD partition.
pub fn vpd_delete(partition: &str, key: &str) -> MigratorResult<()> {
    execute_cmd(
        Command::new(get_executable(VPD)?)
            .arg("-i")
            .arg(partition)
            .arg("-d")
            .arg(key),
    )
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    fn args(cmd: &Command) -> Vec<&OsStr> {
        cmd.get_args().collect()
    }

    #[test]
    fn test_resize2fs_args() {
        let bin = Path::new("/sbin/resize2fs");
        let dev = Path::new("/dev/mmcblk0p1");

        let shrink = resize2fs_cmd(bin, dev, Some(Sectors(1_048_576)));
        assert_eq!(shrink.get_program(), bin.as_os_str());
        assert_eq!(args(&shrink), ["-f", "/dev/mmcblk0p1", "1048576s"]);

        // Growing back leaves the size to resize2fs.
        let grow = resize2fs_cmd(bin, dev, None);
        assert_eq!(args(&grow), ["-f", "/dev/mmcblk0p1"]);
    }

    #[test]
    fn test_dd_copy_args() {
        let cmd = dd_copy_cmd(
            Path::new("/bin/dd"),
            Path::new("/dev/sda1"),
            Sectors(1_046_528),
            Sectors(0),
            Sectors(2048),
        );
        assert_eq!(
            args(&cmd),
            [
                "if=/dev/sda1",
                "of=/dev/sda1",
                "bs=512",
                "skip=1046528",
                "seek=0",
                "count=2048",
                "conv=notrunc,fsync",
            ]
        );

        let cmd = dd_copy_cmd(
            Path::new("/bin/dd"),
            Path::new("/dev/sda1"),
            Sectors(0),
            Sectors(1_046_528),
            Sectors(2048),
        );
        assert!(args(&cmd).contains(&OsStr::new("skip=0")));
        assert!(args(&cmd).contains(&OsStr::new("seek=1046528")));
    }

    #[test]
    fn test_metadata_tool_args() {
        let restore = Path::new("/tmp/vgcfgrestore.txt");

        let cmd = thin_restore_cmd(
            Path::new("/usr/sbin/thin_restore"),
            Path::new("/tmp/thinpool.xml"),
            Path::new("/dev/mapper/thinpool-metadata-dev"),
        );
        assert_eq!(
            args(&cmd),
            [
                "-i",
                "/tmp/thinpool.xml",
                "-o",
                "/dev/mapper/thinpool-metadata-dev"
            ]
        );

        let cmd = pvcreate_cmd(
            Path::new("/sbin/pvcreate"),
            Path::new("/dev/sda1"),
            "abcdef-ghij-klmn-opqr-stuv-wxyz-ABCDEF",
            restore,
        );
        assert_eq!(
            args(&cmd),
            [
                "-ff",
                "--yes",
                "--uuid",
                "abcdef-ghij-klmn-opqr-stuv-wxyz-ABCDEF",
                "--restorefile",
                "/tmp/vgcfgrestore.txt",
                "/dev/sda1",
            ]
        );

        let cmd = vgcfgrestore_cmd(Path::new("/sbin/vgcfgrestore"), "STATEFUL", restore);
        assert_eq!(
            args(&cmd),
            ["--force", "-f", "/tmp/vgcfgrestore.txt", "STATEFUL"]
        );
    }
}
