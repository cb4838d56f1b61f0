//! Interactive text front end

use crate::config::{Bootloader, Configuration, LabelValidity, Settings};
use crate::install::{GrubInstaller, LiloInstaller};
use crate::utils::command::run_interactive;
use crate::utils::error::{BootSetupError, Result};
use crate::utils::prompt::{prompt_confirm, prompt_label, prompt_select, warn_confirm};
use crate::utils::signal;
use console::style;
use indicatif::ProgressBar;
use std::time::Duration;
use tracing::{debug, warn};

const LILO_ACTIONS: [&str; 8] = [
    "Edit a menu label",
    "Move an entry up",
    "Move an entry down",
    "Create configuration",
    "Edit configuration",
    "Undo custom configuration",
    "Install LiLo",
    "Quit",
];

/// Print the gathered configuration
pub fn print_summary(config: &Configuration) {
    println!("{}", style("Disks").bold());
    for disk in config.disks() {
        let marker = if disk.device == config.mbr_device() { "*" } else { " " };
        println!(" {} {:<12} {}", marker, disk.device, disk.description);
    }

    println!("{}", style("Partitions").bold());
    for part in config.partitions() {
        let marker = if Some(part.device.as_str()) == config.boot_partition() {
            "*"
        } else {
            " "
        };
        println!(
            " {} {:<12} {:<8} {}",
            marker, part.device, part.filesystem, part.description
        );
    }

    println!("{}", style("Boot menu").bold());
    for (i, candidate) in config.boot_candidates().iter().enumerate() {
        println!(
            " {:>2}. {:<12} {:<8} {:<6} {:<16} {}",
            i + 1,
            candidate.device,
            candidate.filesystem,
            candidate.os_kind.to_string(),
            candidate.menu_label,
            style(&candidate.os_label).dim()
        );
    }
}

/// Run `f` behind a spinner
fn with_spinner<T>(message: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let bar = ProgressBar::new_spinner();
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    let result = f();
    bar.finish_and_clear();
    result
}

fn ensure_not_interrupted() -> Result<()> {
    if signal::is_interrupted() {
        return Err(BootSetupError::Interrupted);
    }
    Ok(())
}

/// Report the outcome of one operation. Only an interruption or an
/// explicit cancel propagates; every other failure is shown and the
/// session goes on.
fn report(result: Result<()>, success: &str) -> Result<bool> {
    match result {
        Ok(()) => {
            println!("{} {}", style("✓").green().bold(), success);
            Ok(true)
        }
        Err(e @ (BootSetupError::Interrupted | BootSetupError::UserCancelled)) => Err(e),
        Err(e) => {
            println!("{} {}", style("✗").red().bold(), e);
            Ok(false)
        }
    }
}

/// Guides the user from the gathered configuration to an installed boot
/// loader.
pub struct Wizard<'a> {
    config: Configuration,
    settings: &'a Settings,
    assume_yes: bool,
    grub: Option<GrubInstaller>,
    lilo: Option<LiloInstaller>,
}

impl<'a> Wizard<'a> {
    /// With `assume_yes` every default is accepted and nothing is asked.
    pub fn new(config: Configuration, settings: &'a Settings, assume_yes: bool) -> Self {
        Self {
            config,
            settings,
            assume_yes,
            grub: None,
            lilo: None,
        }
    }

    /// Run the session. Returns whether a boot loader got installed.
    pub fn run(&mut self) -> Result<bool> {
        self.print_banner();

        let bootloader = self.choose_bootloader()?;
        if !self.assume_yes {
            self.choose_devices(bootloader)?;
        }

        match bootloader {
            Bootloader::Grub2 => self.run_grub(),
            Bootloader::Lilo if self.assume_yes => self.run_lilo_unattended(),
            Bootloader::Lilo => self.run_lilo_menu(),
        }
    }

    /// Close the installers, releasing their scratch directories
    pub fn finish(self) -> Result<()> {
        let mut first_error = None;
        if let Some(grub) = self.grub {
            if let Err(e) = grub.close() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(lilo) = self.lilo {
            if let Err(e) = lilo.close() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn print_banner(&self) {
        println!();
        println!("{}", style("═══════════════════════════════════════").cyan());
        println!("{}", style("               BootSetup               ").cyan().bold());
        println!("{}", style("═══════════════════════════════════════").cyan());
        if self.config.test_mode() {
            println!(
                "{}",
                style("TEST MODE - commands are only logged").yellow().bold()
            );
        }
        if self.config.is_live() && !self.config.test_mode() {
            println!("{}", style("Live environment detected").cyan());
        }
        if self.config.uses_fixture_data() {
            println!("{}", style("Using built-in sample data").yellow());
        }
        println!();
    }

    fn choose_bootloader(&mut self) -> Result<Bootloader> {
        if let Some(bootloader) = self.config.bootloader() {
            return Ok(bootloader);
        }
        let bootloader = if self.assume_yes {
            Bootloader::Lilo
        } else {
            let choices = ["LiLo", "Grub2"];
            match prompt_select("Boot loader to install", &choices, 0)? {
                0 => Bootloader::Lilo,
                _ => Bootloader::Grub2,
            }
        };
        self.config.set_bootloader(bootloader);
        Ok(bootloader)
    }

    fn choose_devices(&mut self, bootloader: Bootloader) -> Result<()> {
        let partitions: Vec<String> = self
            .config
            .partitions()
            .iter()
            .map(|p| format!("{} ({}) {}", p.device, p.filesystem, p.description))
            .collect();
        // LiLo takes its boot partition from the first Linux menu entry
        if bootloader == Bootloader::Grub2 && !partitions.is_empty() {
            let current = self
                .config
                .boot_partition()
                .and_then(|b| self.config.partitions().iter().position(|p| p.device == b))
                .unwrap_or(0);
            let idx = prompt_select("Partition holding /boot/grub", &partitions, current)?;
            let device = self.config.partitions()[idx].device.clone();
            self.config.set_boot_partition(&device)?;
        }

        let disks: Vec<String> = self
            .config
            .disks()
            .iter()
            .map(|d| format!("{} {}", d.device, d.description))
            .collect();
        let current = self
            .config
            .disks()
            .iter()
            .position(|d| d.device == self.config.mbr_device())
            .unwrap_or(0);
        let idx = prompt_select("Disk to write the boot sector to", &disks, current)?;
        let device = self.config.disks()[idx].device.clone();
        self.config.set_mbr_device(&device)
    }

    fn grub_installer(&mut self) -> Result<&mut GrubInstaller> {
        if self.grub.is_none() {
            self.grub = Some(GrubInstaller::new(self.settings, self.config.test_mode())?);
        }
        self.grub
            .as_mut()
            .ok_or_else(|| BootSetupError::ConfigError("Grub2 installer unavailable".to_string()))
    }

    fn lilo_installer(&mut self) -> Result<&mut LiloInstaller> {
        if self.lilo.is_none() {
            self.lilo = Some(LiloInstaller::new(self.settings, self.config.test_mode())?);
        }
        self.lilo
            .as_mut()
            .ok_or_else(|| BootSetupError::ConfigError("LiLo installer unavailable".to_string()))
    }

    fn run_grub(&mut self) -> Result<bool> {
        let Some(boot) = self.config.boot_partition().map(str::to_string) else {
            println!("{} No partition to install Grub2 from", style("✗").red());
            return Ok(false);
        };
        let mbr = self.config.mbr_device().to_string();

        loop {
            if !self.assume_yes
                && !warn_confirm(&format!(
                    "Grub2 will be written to the boot sector of /dev/{}",
                    mbr
                ))?
            {
                return Ok(false);
            }
            ensure_not_interrupted()?;

            let grub = self.grub_installer()?;
            let result = with_spinner("Installing Grub2...", || grub.install(&mbr, &boot));
            if report(result, &format!("Grub2 installed on /dev/{}", mbr))? {
                return Ok(true);
            }
            if self.assume_yes || !prompt_confirm("Try again?", false)? {
                return Ok(false);
            }
        }
    }

    fn create_lilo_configuration(&mut self) -> Result<()> {
        let mbr = self.config.mbr_device().to_string();
        let boot = self.config.boot_partition().unwrap_or_default().to_string();
        let candidates = self.config.boot_candidates().to_vec();
        let lilo = self.lilo_installer()?;
        with_spinner("Creating LiLo configuration...", || {
            lilo.create_configuration(&mbr, &boot, &candidates)
        })?;
        if let Some(boot) = lilo.boot_partition() {
            debug!("LiLo boot partition is {}", boot);
        }
        Ok(())
    }

    fn install_lilo(&mut self) -> Result<()> {
        let lilo = self.lilo_installer()?;
        with_spinner("Installing LiLo...", || lilo.install())
    }

    fn run_lilo_unattended(&mut self) -> Result<bool> {
        ensure_not_interrupted()?;
        let created = self.create_lilo_configuration();
        if !report(created, "LiLo configuration created")? {
            return Ok(false);
        }
        ensure_not_interrupted()?;
        let installed = self.install_lilo();
        report(installed, "LiLo installed")
    }

    fn run_lilo_menu(&mut self) -> Result<bool> {
        let mut installed = false;
        loop {
            println!();
            print_summary(&self.config);
            let has_config = self.lilo.as_ref().is_some_and(|l| l.has_configuration());
            if has_config {
                println!("{}", style("A LiLo configuration is ready").green());
            }

            let action = match prompt_select("LiLo", &LILO_ACTIONS, if has_config { 6 } else { 3 }) {
                Ok(action) => action,
                Err(BootSetupError::UserCancelled) => return Ok(installed),
                Err(e) => return Err(e),
            };

            match action {
                0 => self.edit_label()?,
                1 | 2 => self.move_entry(action == 1)?,
                3 => {
                    ensure_not_interrupted()?;
                    let created = self.create_lilo_configuration();
                    report(created, "LiLo configuration created")?;
                }
                4 => self.edit_configuration()?,
                5 => {
                    let removed = self.lilo_installer().and_then(|l| l.remove_configuration());
                    report(removed, "Custom configuration removed")?;
                }
                6 => {
                    if !self.assume_yes
                        && !warn_confirm(&format!(
                            "LiLo will be written to the boot sector of /dev/{}",
                            self.config.mbr_device()
                        ))?
                    {
                        continue;
                    }
                    ensure_not_interrupted()?;
                    let result = self.install_lilo();
                    installed |= report(result, "LiLo installed")?;
                }
                _ => return Ok(installed),
            }
        }
    }

    fn candidate_choices(&self) -> Vec<String> {
        self.config
            .boot_candidates()
            .iter()
            .map(|c| format!("{} {} ({})", c.menu_label, c.device, c.os_label))
            .collect()
    }

    fn edit_label(&mut self) -> Result<()> {
        let choices = self.candidate_choices();
        if choices.is_empty() {
            return Ok(());
        }
        let idx = prompt_select("Entry", &choices, 0)?;
        let current = self.config.boot_candidates()[idx].menu_label.clone();
        let label = prompt_label("Menu label", &current)?;
        let validity = self.config.set_menu_label(idx, &label)?;
        if validity != LabelValidity::Ok {
            println!("{} {}", style("✗").red().bold(), validity);
        } else {
            self.warn_stale_configuration();
        }
        Ok(())
    }

    fn move_entry(&mut self, up: bool) -> Result<()> {
        let choices = self.candidate_choices();
        if choices.is_empty() {
            return Ok(());
        }
        let idx = prompt_select("Entry", &choices, 0)?;
        let moved = if up {
            self.config.move_candidate_up(idx)
        } else {
            self.config.move_candidate_down(idx)
        };
        if moved {
            self.warn_stale_configuration();
        }
        Ok(())
    }

    fn warn_stale_configuration(&self) {
        if self.lilo.as_ref().is_some_and(|l| l.has_configuration()) {
            println!(
                "{}",
                style("The existing configuration does not reflect this change, create it again")
                    .yellow()
            );
        }
    }

    fn edit_configuration(&mut self) -> Result<()> {
        let editor = self.settings.editor();
        let lilo = self.lilo_installer()?;
        if !lilo.has_configuration() {
            println!("{} Create the configuration first", style("✗").red().bold());
            return Ok(());
        }
        let path = lilo.configuration_path().to_string_lossy().to_string();
        if let Err(e) = run_interactive(&editor, &[&path]) {
            warn!("Editor failed: {}", e);
            println!("{} {}", style("✗").red().bold(), e);
        }
        Ok(())
    }
}
