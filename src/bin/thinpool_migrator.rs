// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#[macro_use]
extern crate log;

use std::{
    env,
    fs::{create_dir_all, OpenOptions},
    path::{Path, PathBuf},
    process,
};

use clap::{ArgAction, Parser};
use env_logger::{Builder, Target};
use log::LevelFilter;

use thinpool_migrator::{
    engine::{
        blkdev_size, enable_migration, verify_binaries, MemoryStore, MigrationState,
        MigrationStatus, StatefulDevice, StatefulMetadata, StatusStore, ThinpoolMigrator,
        VpdStore, LOG_DIR, LOG_FILE,
    },
    migrator::{MigratorResult, VERSION},
};

/// Convert a filesystem partition into an LVM2 thinpool in place
#[derive(Debug, Parser)]
#[command(name = "thinpool_migrator", version = VERSION)]
struct Args {
    /// Partition holding the filesystem to migrate
    #[arg(long, value_name = "PATH")]
    device: PathBuf,

    /// Log the metadata that would be written and change nothing
    #[arg(long, alias = "dry_run", conflicts_with_all = ["enable", "cleanup"])]
    dry_run: bool,

    /// Mark the device for migration on the next run
    #[arg(long, conflicts_with = "cleanup")]
    enable: bool,

    /// Remove the persisted migration status
    #[arg(long)]
    cleanup: bool,

    /// Write nothing to the console
    #[arg(long)]
    silent: bool,

    /// Keep migration status in VPD; otherwise status lasts only for this run
    #[arg(
        long,
        alias = "use_vpd",
        action = ArgAction::Set,
        default_value_t = true,
        value_name = "BOOL"
    )]
    use_vpd: bool,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value_t = LevelFilter::Info, value_name = "LEVEL")]
    log_level: LevelFilter,
}

/// Configure and initialize the logger.
/// Log records go to a dedicated file so that the console stays quiet at
/// boot. RUST_LOG, if set, overrides the log level given on the command
/// line. If the log file can not be opened, log to stderr unless silent.
fn initialize_log(level: LevelFilter, silent: bool) {
    let mut builder = Builder::new();

    match env::var("RUST_LOG") {
        Ok(s) => {
            builder.parse_filters(&s);
        }
        Err(_) => {
            builder.filter_level(level);
        }
    }

    let log_path = Path::new(LOG_DIR).join(LOG_FILE);
    match create_dir_all(LOG_DIR).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
    }) {
        Ok(file) => {
            builder.target(Target::Pipe(Box::new(file)));
        }
        Err(err) => {
            if silent {
                builder.filter_level(LevelFilter::Off);
            } else {
                eprintln!(
                    "Could not open log file {}, logging to stderr: {err}",
                    log_path.display()
                );
                builder.target(Target::Stderr);
            }
        }
    }

    builder.init()
}

fn run_with_store<S>(args: &Args, mut store: S) -> MigratorResult<()>
where
    S: StatusStore,
{
    if args.enable {
        info!("Enabling thinpool migration for {}", args.device.display());
        return enable_migration(&mut store).map(|_| ());
    }

    if args.cleanup {
        info!("Removing thinpool migration status");
        return store.clear();
    }

    let status = match store.load()? {
        Some(status) => status,
        None if args.use_vpd && !args.dry_run => {
            info!("Thinpool migration is not enabled; nothing to do");
            return Ok(());
        }
        None => MigrationStatus::default(),
    };
    info!(
        "Migration status for {}: state {}, {} tries left",
        args.device.display(),
        status.state,
        status.tries
    );

    if status.state == MigrationState::Completed && !args.dry_run {
        info!("Thinpool migration has already completed; nothing to do");
        return Ok(());
    }

    let partition_size = blkdev_size(&args.device)?;
    let metadata = StatefulMetadata::new(&args.device, partition_size)?;

    if args.dry_run {
        if !args.silent {
            print!("{}", metadata.thinpool_metadata_xml());
            print!("{}", metadata.lvm_metadata());
        }
    } else {
        verify_binaries()?;
    }

    let device = StatefulDevice::new(&args.device)?;
    let mut migrator = ThinpoolMigrator::new(device, store, metadata, status);
    let result = migrator.migrate(args.dry_run);
    info!("Migration finished in state {}", migrator.state());
    result
}

fn run(args: &Args) -> MigratorResult<()> {
    if args.use_vpd {
        run_with_store(args, VpdStore)
    } else {
        run_with_store(args, MemoryStore::default())
    }
}

fn main() {
    let args = Args::parse();
    initialize_log(args.log_level, args.silent);

    if let Err(err) = run(&args) {
        error!("{err}");
        if !args.silent {
            eprintln!("thinpool_migrator: {err}");
        }
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use thinpool_migrator::engine::{MemoryStore, MigrationState, MigrationStatus, StatusStore};

    use super::{run_with_store, Args};

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "thinpool_migrator",
            "--device",
            "/nonexistent/thinpool-migrator-test",
            "--use-vpd",
            "false",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_thinpool_migrator_parse_args() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_use_vpd_default() {
        let args = Args::try_parse_from(["thinpool_migrator", "--device", "/dev/sda1"]).unwrap();
        assert!(args.use_vpd);
        assert!(!args.dry_run);

        let args = Args::try_parse_from([
            "thinpool_migrator",
            "--device",
            "/dev/sda1",
            "--use-vpd",
            "false",
        ])
        .unwrap();
        assert!(!args.use_vpd);
    }

    #[test]
    fn test_conflicting_flags() {
        assert!(Args::try_parse_from([
            "thinpool_migrator",
            "--device",
            "/dev/sda1",
            "--enable",
            "--cleanup",
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "thinpool_migrator",
            "--device",
            "/dev/sda1",
            "--dry-run",
            "--enable",
        ])
        .is_err());
    }

    #[test]
    fn test_enable_keeps_completed_status() {
        let completed = MigrationStatus {
            state: MigrationState::Completed,
            tries: 0,
        };
        let mut store = MemoryStore::new(Some(completed));
        run_with_store(&args(&["--enable"]), &mut store).unwrap();
        assert_eq!(store.load().unwrap(), Some(completed));
    }

    #[test]
    fn test_enable_arms_fresh_device() {
        let mut store = MemoryStore::default();
        run_with_store(&args(&["--enable"]), &mut store).unwrap();
        assert_eq!(store.load().unwrap(), Some(MigrationStatus::default()));

        run_with_store(&args(&["--cleanup"]), &mut store).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_completed_migration_succeeds() {
        let completed = MigrationStatus {
            state: MigrationState::Completed,
            tries: 0,
        };
        let mut store = MemoryStore::new(Some(completed));
        // The device does not exist, so reaching it would fail.
        run_with_store(&args(&[]), &mut store).unwrap();
        assert_eq!(store.load().unwrap(), Some(completed));
    }

    #[test]
    fn test_unfinished_migration_needs_device() {
        let mut store = MemoryStore::new(Some(MigrationStatus::default()));
        assert!(run_with_store(&args(&[]), &mut store).is_err());
        assert_eq!(store.load().unwrap(), Some(MigrationStatus::default()));
    }
}
