//! BootSetup - install the LiLo or Grub2 boot loader
//!
//! Text-mode front end: gathers disks, partitions and operating systems,
//! then walks the user through configuring and installing a boot loader.

use anyhow::Result;
use bootsetup::cleanup::Cleaner;
use bootsetup::config::{Bootloader, Configuration, GatherOptions, Settings};
use bootsetup::frontend::{print_summary, Wizard};
use bootsetup::inventory::{FixtureInventory, HostInventory, SystemInventory};
use bootsetup::utils::error::BootSetupError;
use bootsetup::utils::signal;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bootsetup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Boot loader to install: lilo, grub2, or _ to choose interactively
    #[arg(default_value = "_")]
    bootloader: String,

    /// Partition holding the system to boot (e.g. /dev/sda5)
    partition: Option<String>,

    /// Test mode - log commands instead of running them
    #[arg(short, long)]
    test: bool,

    /// Use built-in sample data instead of probing the machine
    #[arg(short, long, requires = "test")]
    data: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Path to the settings file
    #[arg(short, long, env = "BOOTSETUP_CONFIG")]
    config: Option<PathBuf>,

    /// Disk to write the boot sector to (e.g. sda)
    #[arg(long)]
    mbr: Option<String>,

    /// Accept the defaults without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Print the gathered configuration and exit
    #[arg(long)]
    list: bool,

    /// Unmount and remove what an interrupted run left behind, then exit
    #[arg(long, conflicts_with = "list")]
    cleanup: bool,

    /// Print the effective settings as TOML and exit
    #[arg(long)]
    print_settings: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    if cli.print_settings {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    if cli.test {
        info!("Running in test mode - no changes will be made");
    } else if !nix::unistd::geteuid().is_root() {
        return Err(BootSetupError::NotRoot.into());
    }

    signal::defer_termination_signals()?;
    let outcome = if cli.cleanup {
        cmd_cleanup(&settings, cli.test)
    } else {
        cmd_setup(&cli, &settings)
    };
    signal::reraise_pending()?;
    outcome
}

fn cmd_cleanup(settings: &Settings, dry_run: bool) -> Result<()> {
    let report = Cleaner::new(settings, dry_run).cleanup()?;
    println!(
        "{} mount(s) released, {} scratch director{} removed",
        report.unmounted,
        report.removed,
        if report.removed == 1 { "y" } else { "ies" }
    );
    for dir in &report.kept {
        println!("Still in use: {}", dir.display());
    }
    Ok(())
}

fn cmd_setup(cli: &Cli, settings: &Settings) -> Result<()> {
    let options = GatherOptions {
        bootloader: Bootloader::parse_choice(&cli.bootloader)?,
        target_partition: cli.partition.clone(),
        test_mode: cli.test,
        uses_fixture_data: cli.data,
    };
    let inventory: Box<dyn SystemInventory> = if cli.data {
        Box::new(FixtureInventory)
    } else {
        Box::new(HostInventory::new(settings, cli.test))
    };

    let mut config = Configuration::gather(inventory.as_ref(), &options)?;
    if let Some(mbr) = &cli.mbr {
        config.set_mbr_device(mbr)?;
    }

    if cli.list {
        print_summary(&config);
        return Ok(());
    }

    let mut wizard = Wizard::new(config, settings, cli.yes);
    let outcome = wizard.run();
    if let Err(e) = wizard.finish() {
        warn!("Cleanup incomplete: {}", e);
    }

    match outcome {
        Ok(true) => Ok(()),
        Ok(false) if cli.yes => Err(anyhow::anyhow!("no boot loader was installed")),
        Ok(false) | Err(BootSetupError::UserCancelled) => {
            info!("No boot loader installed");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
