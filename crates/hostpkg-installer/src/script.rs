use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use hostpkg_core::{Clock, PluginOutput, Result, ResultStatus, TraceStep};

use crate::installer::{Installer, InstallerFactory, InstallerRequest};

/// Exit codes a script uses to ask for a reboot after a successful action.
pub const REBOOT_EXIT_CODES: [i32; 2] = [3010, 194];

const SCRIPT_EXTENSION: &str = if cfg!(windows) { "ps1" } else { "sh" };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    Install,
    Uninstall,
    Validate,
}

impl ScriptAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Validate => "validate",
        }
    }

    pub fn script_name(self) -> String {
        format!("{}.{SCRIPT_EXTENSION}", self.as_str())
    }
}

/// Runs `install`, `uninstall` and `validate` scripts shipped in the
/// package payload.
pub struct ScriptInstaller {
    request: InstallerRequest,
    clock: Arc<dyn Clock>,
}

impl ScriptInstaller {
    pub fn new(request: InstallerRequest, clock: Arc<dyn Clock>) -> Self {
        Self { request, clock }
    }

    pub fn script_path(&self, action: ScriptAction) -> Option<PathBuf> {
        let path = self.request.payload_dir.join(action.script_name());
        path.is_file().then_some(path)
    }

    fn run(&self, action: ScriptAction) -> PluginOutput {
        let started = self.clock.now_unix_nanos();
        let operation = format!("{} script", action.as_str());

        let Some(script) = self.script_path(action) else {
            if action == ScriptAction::Validate {
                let mut step = TraceStep::new(operation, 0, started);
                step.info.push("no validate script".to_string());
                return PluginOutput::new(ResultStatus::Success)
                    .with_step(step)
                    .with_message("no validate script; nothing to check");
            }
            let message = format!(
                "no {} script in {}",
                action.as_str(),
                self.request.payload_dir.display()
            );
            return failed_output(operation, started, message);
        };

        let mut command = script_command(&script);
        command
            .current_dir(&self.request.payload_dir)
            .env("HOSTPKG_PACKAGE_NAME", &self.request.package_name)
            .env("HOSTPKG_PACKAGE_VERSION", &self.request.version)
            .env("HOSTPKG_MANIFEST_REF", &self.request.manifest_ref)
            .env(
                "HOSTPKG_CONFIGURATION",
                self.request.configuration.as_deref().unwrap_or_default(),
            );
        tracing::debug!(
            package = %self.request.package_name,
            version = %self.request.version,
            script = %script.display(),
            "running installer script"
        );

        let output = match command.output() {
            Ok(output) => output,
            Err(err) => {
                let message = format!("failed to start {}: {err}", script.display());
                return failed_output(operation, started, message);
            }
        };

        let status = classify_exit(output.status.code());
        let mut step = TraceStep::new(
            operation,
            output.status.code().map(i64::from).unwrap_or(-1),
            started,
        );
        step.info.extend(
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );

        let message = match status {
            ResultStatus::Success => format!("{} script succeeded", action.as_str()),
            ResultStatus::SuccessAndReboot => {
                format!("{} script succeeded and requested a reboot", action.as_str())
            }
            ResultStatus::Failed => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let error = if stderr.is_empty() {
                    format!("{} script exited with {}", action.as_str(), output.status)
                } else {
                    stderr
                };
                step.error = Some(error.clone());
                error
            }
        };
        PluginOutput::new(status).with_step(step).with_message(message)
    }
}

impl Installer for ScriptInstaller {
    fn install(&self) -> PluginOutput {
        self.run(ScriptAction::Install)
    }

    fn uninstall(&self) -> PluginOutput {
        self.run(ScriptAction::Uninstall)
    }

    fn validate(&self) -> PluginOutput {
        self.run(ScriptAction::Validate)
    }

    fn package_name(&self) -> &str {
        &self.request.package_name
    }

    fn version(&self) -> &str {
        &self.request.version
    }
}

pub struct ScriptInstallerFactory {
    clock: Arc<dyn Clock>,
}

impl ScriptInstallerFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl InstallerFactory for ScriptInstallerFactory {
    fn create(&self, request: InstallerRequest) -> Result<Box<dyn Installer>> {
        Ok(Box::new(ScriptInstaller::new(request, self.clock.clone())))
    }
}

pub fn classify_exit(code: Option<i32>) -> ResultStatus {
    match code {
        Some(0) => ResultStatus::Success,
        Some(code) if REBOOT_EXIT_CODES.contains(&code) => ResultStatus::SuccessAndReboot,
        _ => ResultStatus::Failed,
    }
}

fn script_command(script: &Path) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-File")
            .arg(script);
        return command;
    }
    let mut command = Command::new("sh");
    command.arg(script);
    command
}

fn failed_output(operation: String, started: i64, message: String) -> PluginOutput {
    let mut step = TraceStep::new(operation, 1, started);
    step.error = Some(message.clone());
    PluginOutput::new(ResultStatus::Failed)
        .with_step(step)
        .with_message(message)
}
