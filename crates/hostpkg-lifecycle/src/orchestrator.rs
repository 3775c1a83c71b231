use std::sync::Arc;

use hostpkg_core::{
    Clock, PackageError, PluginOutput, Result, ResultStatus, Tracer, VersionTransition,
};
use hostpkg_installer::{InstallState, Installer, PackageState, Repository, StateData};
use hostpkg_registry::{Operation, PackageResolver, PackageResult, Reporter};

use crate::cancel::CancelFlag;
use crate::request::{LifecycleAction, LifecycleOutcome, LifecycleRequest};

const STAGE_LOCK: &str = "lock acquisition";
const STAGE_INSTALLER: &str = "installer invocation";

#[derive(Debug, Clone, Copy)]
enum InstallerAction {
    Install,
    Uninstall,
    Validate,
}

impl InstallerAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Validate => "validate",
        }
    }

    fn run(self, installer: &dyn Installer) -> PluginOutput {
        match self {
            Self::Install => installer.install(),
            Self::Uninstall => installer.uninstall(),
            Self::Validate => installer.validate(),
        }
    }
}

/// Identity of the package version a flow is acting on.
#[derive(Debug, Clone)]
struct Target {
    name: String,
    manifest_ref: String,
    version: String,
    configuration: Option<String>,
}

impl Target {
    fn at(&self, version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..self.clone()
        }
    }
}

/// Result of the locked part of a request.
struct Flow {
    operation: Operation,
    version: String,
    previous_version: Option<String>,
    status: ResultStatus,
    error: Option<PackageError>,
}

impl Flow {
    fn new(operation: Operation, version: &str, previous_version: Option<&str>) -> Self {
        Self {
            operation,
            version: version.to_string(),
            previous_version: previous_version.map(str::to_string),
            status: ResultStatus::Success,
            error: None,
        }
    }

    fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = status;
        self
    }

    fn failed(mut self, error: PackageError) -> Self {
        self.status = ResultStatus::Failed;
        self.error = Some(error);
        self
    }
}

/// Releases the package lock on every exit path, unwinding included.
struct PackageLock<'a> {
    repository: &'a dyn Repository,
    name: &'a str,
}

impl<'a> PackageLock<'a> {
    fn acquire(repository: &'a dyn Repository, name: &'a str, holder: &str) -> Result<Self> {
        repository.lock_package(name, holder)?;
        Ok(Self { repository, name })
    }
}

impl Drop for PackageLock<'_> {
    fn drop(&mut self) {
        self.repository.unlock_package(self.name);
    }
}

/// Drives install, upgrade and uninstall of one package at a time per name.
///
/// Every request runs as a single sequential flow under the package lock:
/// resolve, fetch artifacts, invoke the installer, record each state
/// transition, then release the lock and report. Errors raised before the
/// first state write (cancellation, lock contention, resolution, transport)
/// are returned as `Err` and never reported; everything after is captured in
/// the [`LifecycleOutcome`].
pub struct LifecycleOrchestrator {
    resolver: Arc<dyn PackageResolver>,
    repository: Arc<dyn Repository>,
    reporter: Arc<dyn Reporter>,
    clock: Arc<dyn Clock>,
}

impl LifecycleOrchestrator {
    pub fn new(
        resolver: Arc<dyn PackageResolver>,
        repository: Arc<dyn Repository>,
        reporter: Arc<dyn Reporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            repository,
            reporter,
            clock,
        }
    }

    pub fn execute(
        &self,
        request: &LifecycleRequest,
        cancel: &CancelFlag,
    ) -> Result<LifecycleOutcome> {
        let mut tracer = Tracer::new(self.clock.clone());
        cancel.check(STAGE_LOCK)?;

        let flow = {
            let _lock = PackageLock::acquire(
                self.repository.as_ref(),
                &request.package_name,
                request.action.as_str(),
            )?;
            let flow = self.run_locked(request, cancel, &mut tracer)?;
            self.settle_trace(&request.package_name, &flow, &tracer);
            flow
        };

        let started_at = tracer.started_at();
        let result = PackageResult {
            package_name: request.package_name.clone(),
            version: flow.version,
            previous_version: flow.previous_version,
            operation: flow.operation,
            status: flow.status,
            timing: started_at,
            trace: tracer.into_steps(),
        };

        let report_error = match self.reporter.report(&result) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    package = %result.package_name,
                    version = %result.version,
                    error = %err,
                    "failed to report lifecycle result"
                );
                Some(err)
            }
        };

        match &flow.error {
            Some(err) => tracing::error!(
                package = %result.package_name,
                version = %result.version,
                operation = result.operation.as_str(),
                error = %err,
                "lifecycle operation failed"
            ),
            None => tracing::info!(
                package = %result.package_name,
                version = %result.version,
                operation = result.operation.as_str(),
                status = result.status.as_str(),
                "lifecycle operation finished"
            ),
        }

        Ok(LifecycleOutcome {
            status: result.status,
            result,
            error: flow.error,
            report_error,
        })
    }

    fn run_locked(
        &self,
        request: &LifecycleRequest,
        cancel: &CancelFlag,
        tracer: &mut Tracer,
    ) -> Result<Flow> {
        let current = self.repository.get_install_state(&request.package_name)?;
        tracing::debug!(
            package = %request.package_name,
            state = %current.state,
            version = %current.version,
            "current install state"
        );
        match request.action {
            LifecycleAction::Uninstall => self.plan_uninstall(request, cancel, tracer),
            LifecycleAction::Install | LifecycleAction::Upgrade => {
                self.plan_install(request, &current, cancel, tracer)
            }
        }
    }

    fn plan_install(
        &self,
        request: &LifecycleRequest,
        current: &PackageState,
        cancel: &CancelFlag,
        tracer: &mut Tracer,
    ) -> Result<Flow> {
        let name = request.package_name.as_str();
        let resolved = self
            .resolver
            .resolve_manifest(tracer, name, request.requested_version())?;
        let target = Target {
            name: name.to_string(),
            manifest_ref: resolved.manifest.package_arn.clone(),
            version: resolved.manifest.version.clone(),
            configuration: request.configuration.clone(),
        };

        let installed = self.repository.get_installed_version(name)?;
        if request.action == LifecycleAction::Upgrade && installed.is_empty() {
            return Err(PackageError::not_found(format!(
                "installed version of {name} to upgrade"
            )));
        }

        let resumable = matches!(
            current.state,
            InstallState::Installing | InstallState::Upgrading
        );
        if resumable && current.data.reboot_pending && current.version == target.version {
            cancel.check(STAGE_INSTALLER)?;
            self.restore_trace(name, tracer);
            return Ok(self.resume_after_reboot(&target, current, tracer));
        }

        let requested_operation = match request.action {
            LifecycleAction::Upgrade => Operation::Upgrade,
            _ => Operation::Install,
        };
        let mut refresh_artifacts = false;
        if current.state == InstallState::Installed && installed == target.version {
            let section = tracer.begin_section(format!("verify installed {name} {installed}"));
            match self.repository.validate_package(name, &installed) {
                Ok(()) if resolved.unchanged_since_cache => {
                    tracer.append_info(section, "already installed; manifest unchanged");
                    tracer.end(section, 0);
                    tracing::info!(package = name, version = %installed, "already installed");
                    return Ok(Flow::new(requested_operation, &installed, None));
                }
                Ok(()) => {
                    // Stored artifacts were taken from the previous manifest.
                    tracer.append_info(section, "manifest changed; downloading again");
                    refresh_artifacts = true;
                }
                Err(err) => tracer.append_info(section, format!("reinstalling: {err}")),
            }
            tracer.end(section, 0);
        }

        if let Err(err) = self.ensure_artifacts(tracer, &target, refresh_artifacts) {
            if err.is_pre_mutation() {
                return Err(err);
            }
            let previous = (!installed.is_empty()).then_some(installed.as_str());
            return Ok(Flow::new(requested_operation, &target.version, previous).failed(err));
        }

        cancel.check(STAGE_INSTALLER)?;
        if current.state == InstallState::Installed
            && !installed.is_empty()
            && installed != target.version
        {
            Ok(self.upgrade(&target, &installed, tracer))
        } else {
            Ok(self.install(&target, tracer))
        }
    }

    fn plan_uninstall(
        &self,
        request: &LifecycleRequest,
        cancel: &CancelFlag,
        tracer: &mut Tracer,
    ) -> Result<Flow> {
        let name = request.package_name.as_str();
        let installed = self.repository.get_installed_version(name)?;
        if installed.is_empty() {
            return Err(PackageError::not_found(format!(
                "installed version of {name}"
            )));
        }
        if let Some(requested) = request.version.as_deref() {
            if requested != installed {
                return Err(PackageError::not_found(format!(
                    "{name} {requested} (installed: {installed})"
                )));
            }
        }

        cancel.check(STAGE_INSTALLER)?;
        let target = Target {
            name: name.to_string(),
            manifest_ref: name.to_string(),
            version: installed,
            configuration: request.configuration.clone(),
        };
        Ok(self.uninstall(&target, tracer))
    }

    /// Makes sure the target's artifacts are in the repository, downloading
    /// them when the stored copy is invalid or `refresh` is set.
    fn ensure_artifacts(&self, tracer: &mut Tracer, target: &Target, refresh: bool) -> Result<()> {
        if !refresh {
            let section = tracer.begin_section(format!("validate package {}", target.version));
            match self
                .repository
                .validate_package(&target.name, &target.version)
            {
                Ok(()) => {
                    tracer.append_info(section, "artifacts already present");
                    tracer.end(section, 0);
                    return Ok(());
                }
                Err(err) => {
                    tracer.append_info(section, err.to_string());
                    tracer.end(section, 0);
                }
            }
        }

        let artifact = self
            .resolver
            .download_artifact(tracer, &target.manifest_ref, &target.version)?;
        let section = tracer.begin_section(format!("add package {}", target.version));
        match self
            .repository
            .add_package(&target.name, &target.version, &artifact)
        {
            Ok(()) => {
                tracer.end(section, 0);
                Ok(())
            }
            Err(err) => {
                tracer.fail(section, &err);
                Err(err)
            }
        }
    }

    fn install(&self, target: &Target, tracer: &mut Tracer) -> Flow {
        let flow = Flow::new(Operation::Install, &target.version, None);
        if let Err(err) = self.transition(target, InstallState::Installing, StateData::default()) {
            return flow.failed(err);
        }

        match self.install_and_validate(target, tracer) {
            Ok(ResultStatus::SuccessAndReboot) => {
                let pending = StateData {
                    reboot_pending: true,
                    ..StateData::default()
                };
                match self.transition(target, InstallState::Installing, pending) {
                    Ok(()) => flow.with_status(ResultStatus::SuccessAndReboot),
                    Err(err) => flow.failed(err),
                }
            }
            Ok(_) => match self.transition(target, InstallState::Installed, StateData::default())
            {
                Ok(()) => flow,
                Err(err) => flow.failed(err),
            },
            Err(err) => {
                self.mark_failed(target, StateData::default());
                flow.failed(err)
            }
        }
    }

    fn upgrade(&self, target: &Target, previous: &str, tracer: &mut Tracer) -> Flow {
        let flow = Flow::new(Operation::Upgrade, &target.version, Some(previous));
        let transition = VersionTransition::classify(previous, &target.version);
        let section = tracer.begin_section(format!(
            "{} {} {previous} -> {}",
            transition.as_str(),
            target.name,
            target.version
        ));
        tracer.end(section, 0);
        tracing::info!(
            package = %target.name,
            from = previous,
            to = %target.version,
            transition = transition.as_str(),
            "starting upgrade"
        );

        let data = StateData {
            previous_version: Some(previous.to_string()),
            reboot_pending: false,
        };
        if let Err(err) = self.transition(target, InstallState::Upgrading, data.clone()) {
            return flow.failed(err);
        }

        match self.install_and_validate(target, tracer) {
            Ok(ResultStatus::SuccessAndReboot) => {
                let pending = StateData {
                    reboot_pending: true,
                    ..data
                };
                match self.transition(target, InstallState::Upgrading, pending) {
                    Ok(()) => flow.with_status(ResultStatus::SuccessAndReboot),
                    Err(err) => flow.failed(err),
                }
            }
            Ok(_) => self.commit_upgrade(target, previous, tracer, flow),
            Err(err) => self.rollback(target, previous, err, tracer, flow),
        }
    }

    fn commit_upgrade(
        &self,
        target: &Target,
        previous: &str,
        tracer: &mut Tracer,
        flow: Flow,
    ) -> Flow {
        if let Err(err) = self.transition(target, InstallState::Installed, StateData::default()) {
            return flow.failed(err);
        }
        let section = tracer.begin_section(format!("remove package {previous}"));
        match self.repository.remove_package(&target.name, previous) {
            Ok(()) => tracer.end(section, 0),
            Err(err) => {
                // The upgrade stands; stale artifacts only cost disk space.
                tracing::warn!(
                    package = %target.name,
                    version = previous,
                    error = %err,
                    "failed to remove previous version"
                );
                tracer.append_info(section, err.to_string());
                tracer.end(section, 0);
            }
        }
        flow
    }

    fn rollback(
        &self,
        target: &Target,
        previous: &str,
        original: PackageError,
        tracer: &mut Tracer,
        flow: Flow,
    ) -> Flow {
        tracing::warn!(
            package = %target.name,
            failed_version = %target.version,
            rollback_to = previous,
            error = %original,
            "upgrade failed; rolling back"
        );
        let data = StateData {
            previous_version: Some(previous.to_string()),
            reboot_pending: false,
        };
        let section = tracer.begin_section(format!("rollback {} to {previous}", target.name));

        match self.restore_previous(target, previous, &data, tracer) {
            Ok(()) => {
                tracer.end(section, 0);
                match self.transition(
                    &target.at(previous),
                    InstallState::Installed,
                    StateData::default(),
                ) {
                    Ok(()) => {
                        tracing::info!(
                            package = %target.name,
                            version = previous,
                            "rollback succeeded"
                        );
                        flow.failed(original)
                    }
                    Err(err) => {
                        flow.failed(self.rollback_failure(target, previous, original, err))
                    }
                }
            }
            Err(err) => {
                tracer.fail(section, &err);
                self.mark_failed(target, data);
                flow.failed(self.rollback_failure(target, previous, original, err))
            }
        }
    }

    fn restore_previous(
        &self,
        target: &Target,
        previous: &str,
        data: &StateData,
        tracer: &mut Tracer,
    ) -> Result<()> {
        self.transition(target, InstallState::RollingBack, data.clone())?;
        self.repository.validate_package(&target.name, previous)?;

        // Best effort: clear whatever the failed version left behind.
        match self.installer(target) {
            Ok(failed) => {
                let _ = self.invoke(tracer, failed.as_ref(), InstallerAction::Uninstall);
            }
            Err(err) => tracing::warn!(
                package = %target.name,
                error = %err,
                "cannot clean up failed version"
            ),
        }

        let installer = self.installer(&target.at(previous))?;
        if let Err(err) = self.invoke(tracer, installer.as_ref(), InstallerAction::Uninstall) {
            tracing::warn!(
                package = %target.name,
                version = previous,
                error = %err,
                "uninstall before rollback failed; continuing"
            );
        }
        let status = self.invoke(tracer, installer.as_ref(), InstallerAction::Install)?;
        if status.requires_reboot() {
            tracing::warn!(
                package = %target.name,
                version = previous,
                "rollback install requested a reboot"
            );
        }
        self.invoke(tracer, installer.as_ref(), InstallerAction::Validate)?;
        Ok(())
    }

    fn resume_after_reboot(
        &self,
        target: &Target,
        current: &PackageState,
        tracer: &mut Tracer,
    ) -> Flow {
        let previous = current
            .data
            .previous_version
            .as_deref()
            .filter(|_| current.state == InstallState::Upgrading);
        let operation = if previous.is_some() {
            Operation::Upgrade
        } else {
            Operation::Install
        };
        let flow = Flow::new(operation, &target.version, previous);
        let section = tracer.begin_section(format!(
            "resume {} {} after reboot",
            target.name, target.version
        ));
        tracer.end(section, 0);

        let validated = self.installer(target).and_then(|installer| {
            self.invoke(tracer, installer.as_ref(), InstallerAction::Validate)
        });
        match (validated, previous) {
            (Ok(ResultStatus::SuccessAndReboot), _) => {
                let pending = StateData {
                    reboot_pending: true,
                    ..current.data.clone()
                };
                match self.transition(target, current.state, pending) {
                    Ok(()) => flow.with_status(ResultStatus::SuccessAndReboot),
                    Err(err) => flow.failed(err),
                }
            }
            (Ok(_), Some(previous)) => self.commit_upgrade(target, previous, tracer, flow),
            (Ok(_), None) => {
                match self.transition(target, InstallState::Installed, StateData::default()) {
                    Ok(()) => flow,
                    Err(err) => flow.failed(err),
                }
            }
            (Err(err), Some(previous)) => self.rollback(target, previous, err, tracer, flow),
            (Err(err), None) => {
                self.mark_failed(target, StateData::default());
                flow.failed(err)
            }
        }
    }

    fn uninstall(&self, target: &Target, tracer: &mut Tracer) -> Flow {
        let flow = Flow::new(Operation::Uninstall, &target.version, None);
        if let Err(err) =
            self.transition(target, InstallState::Uninstalling, StateData::default())
        {
            return flow.failed(err);
        }

        let uninstalled = self.installer(target).and_then(|installer| {
            self.invoke(tracer, installer.as_ref(), InstallerAction::Uninstall)
        });
        let status = match uninstalled {
            Ok(status) => status,
            Err(err) => {
                self.mark_failed(target, StateData::default());
                return flow.failed(err);
            }
        };

        let section = tracer.begin_section(format!("remove package {}", target.version));
        match self.repository.remove_package(&target.name, &target.version) {
            Ok(()) => tracer.end(section, 0),
            Err(err) => {
                tracing::warn!(
                    package = %target.name,
                    version = %target.version,
                    error = %err,
                    "failed to remove package artifacts"
                );
                tracer.append_info(section, err.to_string());
                tracer.end(section, 0);
            }
        }

        match self.transition(target, InstallState::NotInstalled, StateData::default()) {
            Ok(()) => flow.with_status(status),
            Err(err) => flow.failed(err),
        }
    }

    /// Install, then validate unless the install already asked for a reboot.
    fn install_and_validate(&self, target: &Target, tracer: &mut Tracer) -> Result<ResultStatus> {
        let installer = self.installer(target)?;
        let status = self.invoke(tracer, installer.as_ref(), InstallerAction::Install)?;
        if status.requires_reboot() {
            return Ok(status);
        }
        self.invoke(tracer, installer.as_ref(), InstallerAction::Validate)
    }

    fn installer(&self, target: &Target) -> Result<Box<dyn Installer>> {
        self.repository.get_installer(
            &target.name,
            &target.manifest_ref,
            target.configuration.as_deref(),
            &target.version,
        )
    }

    fn invoke(
        &self,
        tracer: &mut Tracer,
        installer: &dyn Installer,
        action: InstallerAction,
    ) -> Result<ResultStatus> {
        let section = tracer.begin_section(format!(
            "{} {} {}",
            action.as_str(),
            installer.package_name(),
            installer.version()
        ));
        let output = action.run(installer);
        let message = output.describe();
        let status = output.status;
        tracer.extend(output.steps);

        if status == ResultStatus::Failed {
            tracer.fail(section, &message);
            return Err(PackageError::InstallerFailure {
                name: installer.package_name().to_string(),
                version: installer.version().to_string(),
                action: action.as_str().to_string(),
                message,
            });
        }
        tracer.end(section, status.exit_code());
        Ok(status)
    }

    /// Keeps the trace while a reboot is pending and drops it once the
    /// operation has settled either way.
    fn settle_trace(&self, name: &str, flow: &Flow, tracer: &Tracer) {
        let settled = if flow.status == ResultStatus::SuccessAndReboot {
            self.repository.save_trace(name, &tracer.snapshot())
        } else {
            self.repository.clear_trace(name)
        };
        if let Err(err) = settled {
            tracing::warn!(package = name, error = %err, "failed to update saved trace");
        }
    }

    fn restore_trace(&self, name: &str, tracer: &mut Tracer) {
        match self.repository.load_trace(name) {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    package = name,
                    steps = snapshot.steps.len(),
                    "continuing trace from before reboot"
                );
                tracer.restore(snapshot);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(
                package = name,
                error = %err,
                "saved trace unreadable; starting fresh"
            ),
        }
    }

    fn transition(&self, target: &Target, state: InstallState, data: StateData) -> Result<()> {
        self.repository
            .set_install_state(&target.name, &target.version, state, data)
    }

    /// Records `Failed`; a storage error here is logged since the
    /// operation's own error is what gets surfaced.
    fn mark_failed(&self, target: &Target, data: StateData) {
        if let Err(err) = self.transition(target, InstallState::Failed, data) {
            tracing::error!(
                package = %target.name,
                version = %target.version,
                error = %err,
                "failed to record failed install state"
            );
        }
    }

    fn rollback_failure(
        &self,
        target: &Target,
        previous: &str,
        original: PackageError,
        rollback: PackageError,
    ) -> PackageError {
        tracing::error!(
            package = %target.name,
            version = previous,
            error = %rollback,
            "rollback failed; package left in failed state"
        );
        PackageError::RollbackFailure {
            name: target.name.clone(),
            previous_version: previous.to_string(),
            original: Box::new(original),
            rollback: Box::new(rollback),
        }
    }
}
