use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::agent::config::ExecutorSettings;
use crate::commands::kind::{
    guess_failed_package, parse_serial_number, Command, CommandKind, WALLPAPER_PREFIX,
};
use crate::commands::result::ExecutionResult;
use crate::commands::runner::{CommandRunner, ProcessOutput};
use crate::commands::shortcut::ShortcutWriter;

/// Classifies one command string and performs the matching side effect.
///
/// Never fails: every problem ends up as `status: false` in the returned
/// results plus an error in the log.
pub struct CommandExecutor {
    runner: Arc<dyn CommandRunner>,
    shortcuts: ShortcutWriter,
    bin_dir: PathBuf,
    verify_attempts: u32,
    verify_delay: Duration,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &ExecutorSettings) -> Self {
        Self {
            runner,
            shortcuts: ShortcutWriter::from_settings(settings),
            bin_dir: settings.bin_dir.clone(),
            verify_attempts: settings.verify_attempts,
            verify_delay: Duration::from_millis(settings.verify_delay_ms),
        }
    }

    /// Replace the launcher writer (tests point it at a scratch directory).
    pub fn with_shortcuts(mut self, shortcuts: ShortcutWriter) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    /// Run one command. Package installs produce one result per package,
    /// everything else exactly one.
    pub async fn execute(&self, raw: &str, mac: &str) -> Vec<ExecutionResult> {
        let command = Command::classify(raw);
        info!(command = %raw, kind = ?command.kind, "executing command");

        match command.kind {
            CommandKind::WallpaperSet { url } => vec![self.set_wallpaper(url, mac).await],
            CommandKind::SerialNumberQuery => vec![self.query_serial(&command.raw, mac).await],
            CommandKind::PackageInstall { packages } => {
                self.install_packages(&command.raw, &packages, mac).await
            }
            CommandKind::Generic => vec![self.run_generic(&command.raw, mac).await],
        }
    }

    /// Run through the runner; a runner error is logged and reported as `None`.
    async fn run_logged(&self, line: &str) -> Option<ProcessOutput> {
        match self.runner.run(line).await {
            Ok(out) => {
                if !out.success() {
                    error!(
                        command = %line,
                        exit_code = ?out.exit_code,
                        stderr = %out.stderr.trim_end(),
                        "command failed"
                    );
                }
                Some(out)
            }
            Err(e) => {
                error!(command = %line, error = %e, "command could not be run");
                None
            }
        }
    }

    async fn set_wallpaper(&self, url: Option<String>, mac: &str) -> ExecutionResult {
        let Some(url) = url else {
            error!("no valid URL found in wallpaper command");
            return ExecutionResult::Wallpaper {
                status: false,
                mac_address: mac.to_string(),
            };
        };

        let line = format!("{WALLPAPER_PREFIX} \"{url}\"");
        let status = self
            .run_logged(&line)
            .await
            .is_some_and(|out| out.success());
        if status {
            info!(url = %url, "wallpaper set");
        }

        ExecutionResult::Wallpaper {
            status,
            mac_address: mac.to_string(),
        }
    }

    async fn query_serial(&self, raw: &str, mac: &str) -> ExecutionResult {
        let (serial, status) = match self.run_logged(raw).await {
            Some(out) if out.success() => (
                parse_serial_number(&out.stdout).unwrap_or_else(|| "unknown".to_string()),
                true,
            ),
            _ => ("unknown".to_string(), false),
        };
        info!(serial = %serial, "system serial number");

        ExecutionResult::SerialNumber {
            serial,
            status,
            mac_address: mac.to_string(),
        }
    }

    async fn install_packages(
        &self,
        raw: &str,
        packages: &[String],
        mac: &str,
    ) -> Vec<ExecutionResult> {
        let installed = self.run_logged(raw).await.is_some_and(|out| out.success());
        if !installed {
            return vec![ExecutionResult::Software {
                installed_software: guess_failed_package(raw),
                status: false,
                mac_address: mac.to_string(),
            }];
        }

        let mut results = Vec::with_capacity(packages.len());
        for package in packages {
            let status = self.finish_install(package).await;
            results.push(ExecutionResult::Software {
                installed_software: package.clone(),
                status,
                mac_address: mac.to_string(),
            });
        }
        results
    }

    /// Locate, verify and publish a launcher for one installed package.
    async fn finish_install(&self, package: &str) -> bool {
        let Some(exec_path) = self.resolve_executable(package).await else {
            error!(package, bin_dir = %self.bin_dir.display(), "no executable found for package");
            return false;
        };

        if let Err(e) = self.verify_executable(&exec_path).await {
            error!(package, error = %e, "failed to verify executable");
            return false;
        }

        if let Err(e) = self.shortcuts.create(&exec_path, package).await {
            warn!(package, error = %e, "could not create desktop shortcut");
        }
        true
    }

    /// First existing path under the binary directory in the package's file list.
    pub async fn resolve_executable(&self, package: &str) -> Option<PathBuf> {
        let out = self.run_logged(&format!("dpkg -L {package}")).await?;
        if !out.success() {
            return None;
        }

        let prefix = format!("{}/", self.bin_dir.display());
        for line in out.stdout.lines().map(str::trim) {
            if line.starts_with(&prefix) && path_exists(Path::new(line)).await {
                debug!(package, path = line, "resolved executable");
                return Some(PathBuf::from(line));
            }
        }
        None
    }

    /// Wait for the path to show up, polling a bounded number of times.
    pub async fn verify_executable(&self, path: &Path) -> Result<()> {
        for attempt in 1..=self.verify_attempts {
            if path_exists(path).await {
                return Ok(());
            }
            if attempt < self.verify_attempts {
                sleep(self.verify_delay).await;
            }
        }
        bail!(
            "executable not found at {} after {} attempts",
            path.display(),
            self.verify_attempts
        )
    }

    async fn run_generic(&self, raw: &str, mac: &str) -> ExecutionResult {
        let (output, status) = match self.run_logged(raw).await {
            Some(out) => {
                let ok = out.success();
                if ok {
                    debug!(command = %raw, stdout = %out.stdout, "command output");
                }
                (out.stdout, ok)
            }
            None => (String::new(), false),
        };

        ExecutionResult::Command {
            output,
            status,
            mac_address: mac.to_string(),
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
