use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use hostpkg_core::{Clock, StaticEnvironment, SystemClock};
use hostpkg_installer::{
    LocalFileSystem, LocalRepository, PrefixLayout, Repository, ScriptInstallerFactory,
};
use hostpkg_lifecycle::{CancelFlag, LifecycleOrchestrator, LifecycleRequest};
use hostpkg_registry::{
    FsManifestCache, HttpArtifactDownloader, HttpPackageService, ManifestResolver, ResultReporter,
};

use crate::config::AgentConfig;
use crate::render::{current_output_style, format_outcome_lines, format_state_lines, print_lines};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli, config: &AgentConfig) -> Result<ExitCode> {
    let layout = PrefixLayout::new(config.resolved_prefix()?);
    let style = current_output_style();

    let request = match cli.command {
        Commands::Install {
            name,
            version,
            configuration,
        } => with_optional(LifecycleRequest::install(name), version, configuration),
        Commands::Upgrade {
            name,
            version,
            configuration,
        } => with_optional(LifecycleRequest::upgrade(name), version, configuration),
        Commands::Uninstall { name, version } => {
            with_optional(LifecycleRequest::uninstall(name), version, None)
        }
        Commands::State { name } => {
            let repository = build_repository(&layout);
            let state = repository.get_install_state(&name)?;
            print_lines(&format_state_lines(&name, &state), style);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Completions { shell } => {
            crate::completion::write_completions_script(shell, &mut std::io::stdout())?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    layout.ensure_base_dirs()?;
    let orchestrator = build_orchestrator(config, &layout)?;
    tracing::debug!(
        action = request.action.as_str(),
        package = %request.package_name,
        version = request.requested_version(),
        prefix = %layout.prefix().display(),
        "executing lifecycle request"
    );

    let outcome = orchestrator.execute(&request, &CancelFlag::new())?;
    print_lines(&format_outcome_lines(&outcome), style);
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn with_optional(
    mut request: LifecycleRequest,
    version: Option<String>,
    configuration: Option<String>,
) -> LifecycleRequest {
    if let Some(version) = version {
        request = request.with_version(version);
    }
    if let Some(configuration) = configuration {
        request = request.with_configuration(configuration);
    }
    request
}

fn build_repository(layout: &PrefixLayout) -> LocalRepository {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    LocalRepository::new(
        layout.clone(),
        Arc::new(LocalFileSystem),
        Arc::new(ScriptInstallerFactory::new(clock)),
    )
}

pub(crate) fn build_orchestrator(
    config: &AgentConfig,
    layout: &PrefixLayout,
) -> Result<LifecycleOrchestrator> {
    let endpoint = config.endpoint.as_deref().context(
        "no package service endpoint configured; pass --endpoint or set `endpoint` in the config file",
    )?;
    let timeout = config.request_timeout();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = Arc::new(HttpPackageService::new(endpoint, timeout)?);
    let cache = Arc::new(FsManifestCache::new(layout.manifest_cache_dir()));
    let collector = Arc::new(StaticEnvironment::new(config.environment_facts()));
    let downloader = Arc::new(HttpArtifactDownloader::new(layout.downloads_dir(), timeout)?);

    let resolver = Arc::new(ManifestResolver::new(
        service.clone(),
        cache,
        collector.clone(),
        downloader,
    ));
    let reporter = Arc::new(ResultReporter::new(service, collector, clock.clone()));
    let repository = Arc::new(build_repository(layout));

    Ok(LifecycleOrchestrator::new(
        resolver, repository, reporter, clock,
    ))
}
