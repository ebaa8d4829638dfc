//! Command entry points: wire the capabilities for a target and run

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::options::AppOptions;
use crate::backup::local::LocalBackups;
use crate::backup::remote::RemoteBackups;
use crate::backup::BackupManager;
use crate::deploy::cleanup::{cleanup, CleanupReport};
use crate::deploy::orchestrator::{Capabilities, DeploymentReport, Orchestrator};
use crate::deploy::rollback::{RollbackExecutor, RollbackSummary};
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::health::http::HttpProbe;
use crate::models::deployment::{DeploymentRequest, PromotionMode, VolumeMapping};
use crate::models::instance::InstanceNames;
use crate::runtime::compose::ComposeRuntime;
use crate::runtime::docker::DockerRuntime;
use crate::runtime::Runtime;
use crate::storage::layout::DeployLayout;
use crate::storage::metadata::{LocalMetadata, MetadataStore, RemoteMetadata};
use crate::storage::settings::Settings;

/// Read the settings file. An explicit `config` must exist; otherwise
/// `{deploy_path}/rollguard.json` is used when present.
pub async fn load_settings(
    config: Option<&Path>,
    deploy_path: Option<&Path>,
) -> Result<Settings, DeployError> {
    if let Some(path) = config {
        let file = File::new(path);
        if !file.exists().await {
            return Err(DeployError::ConfigError(format!(
                "Settings file not found: {}",
                path.display()
            )));
        }
        return Settings::load_or_default(&file).await;
    }

    match deploy_path {
        Some(path) => {
            let layout = DeployLayout::new(path, crate::storage::layout::DEFAULT_DATA_FILE);
            Settings::load_or_default(&layout.settings_file()).await
        }
        None => Ok(Settings::default()),
    }
}

/// Deploy `request`. The report is returned for failed attempts too; the
/// caller turns it into an exit status.
pub async fn run_deploy(
    options: &AppOptions,
    mut request: DeploymentRequest,
) -> Result<DeploymentReport, DeployError> {
    let layout = DeployLayout::new(&request.deploy_path, options.data_file.clone());

    // The data directory is always mounted, ahead of any user volumes
    request.volumes.insert(
        0,
        VolumeMapping {
            source: layout.data_dir().path().to_string_lossy().into_owned(),
            target: options.data_mount.clone(),
        },
    );
    if let PromotionMode::Compose { file } = &request.mode {
        request.mode = PromotionMode::Compose {
            file: resolve_against(&request.deploy_path, file),
        };
    }

    let caps = Capabilities {
        runtime: build_runtime(options, &request.mode, &layout),
        backups: build_backups(options, &layout),
        metadata: build_metadata(options, &layout),
        probe: Arc::new(HttpProbe::new(
            &request.health_base_url,
            &options.health_endpoint,
            options.request_timeout,
        )?),
    };

    if options.transport.is_remote() {
        info!("Target: {:?}", options.transport);
    } else {
        match LocalMetadata::new(layout.clone()).load().await {
            Ok(Some(current)) => info!(
                "Currently deployed: {} (since {})",
                current.version,
                current.deployed_at_string()
            ),
            Ok(None) => debug!("No deployment recorded in {}", request.deploy_path.display()),
            Err(e) => warn!("Could not read deployment metadata: {}", e),
        }
    }

    Orchestrator::new(caps, options.deploy.clone())
        .deploy(&request)
        .await
}

/// Reinstate `<name>-previous` and restore the latest backup. Refuses to
/// touch anything when there is no previous instance.
pub async fn run_rollback(
    options: &AppOptions,
    name: &str,
    deploy_path: &Path,
    mode: &PromotionMode,
) -> Result<RollbackSummary, DeployError> {
    crate::models::deployment::validate_instance_name(name)?;
    let layout = DeployLayout::new(deploy_path, options.data_file.clone());
    let mode = resolve_mode(deploy_path, mode);
    let runtime = build_runtime(options, &mode, &layout);
    let names = InstanceNames::new(name);

    if !runtime.exists(&names.previous).await? {
        return Err(DeployError::RollbackExhausted(format!(
            "no previous instance {} exists; nothing was changed",
            names.previous
        )));
    }

    let executor = RollbackExecutor::new(runtime, build_backups(options, &layout));
    let summary = executor.rollback(&names).await?;
    if !summary.reinstated {
        return Err(DeployError::RollbackExhausted(format!(
            "{} could not be started again: {}",
            names.previous,
            summary.step_errors.join("; ")
        )));
    }
    if !summary.is_clean() {
        warn!(
            "Rollback finished with failed steps: {}",
            summary.step_errors.join("; ")
        );
    }
    Ok(summary)
}

/// Remove leftover candidate and previous instances
pub async fn run_cleanup(
    options: &AppOptions,
    name: &str,
    deploy_path: Option<&Path>,
    mode: &PromotionMode,
    prune_images: bool,
) -> Result<CleanupReport, DeployError> {
    crate::models::deployment::validate_instance_name(name)?;

    let runtime = match (mode, deploy_path) {
        (PromotionMode::Container, _) => build_docker(options),
        (PromotionMode::Compose { .. }, Some(path)) => {
            let layout = DeployLayout::new(path, options.data_file.clone());
            build_runtime(options, &resolve_mode(path, mode), &layout)
        }
        (PromotionMode::Compose { .. }, None) => {
            return Err(DeployError::ConfigError(
                "Compose mode needs a deploy path".to_string(),
            ))
        }
    };

    Ok(cleanup(runtime.as_ref(), name, prune_images).await)
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

fn resolve_mode(deploy_path: &Path, mode: &PromotionMode) -> PromotionMode {
    match mode {
        PromotionMode::Container => PromotionMode::Container,
        PromotionMode::Compose { file } => PromotionMode::Compose {
            file: resolve_against(deploy_path, file),
        },
    }
}

fn build_docker(options: &AppOptions) -> Arc<dyn Runtime> {
    Arc::new(DockerRuntime::new(
        options.transport.clone(),
        options.docker_bin.clone(),
    ))
}

fn build_runtime(options: &AppOptions, mode: &PromotionMode, layout: &DeployLayout) -> Arc<dyn Runtime> {
    match mode {
        PromotionMode::Container => build_docker(options),
        PromotionMode::Compose { file } => Arc::new(ComposeRuntime::new(
            options.transport.clone(),
            options.docker_bin.clone(),
            file.clone(),
            layout.instances_dir().path().to_path_buf(),
        )),
    }
}

fn build_backups(options: &AppOptions, layout: &DeployLayout) -> Arc<dyn BackupManager> {
    if options.transport.is_remote() {
        Arc::new(RemoteBackups::new(options.transport.clone(), layout.clone()))
    } else {
        Arc::new(LocalBackups::new(layout.clone()))
    }
}

fn build_metadata(options: &AppOptions, layout: &DeployLayout) -> Arc<dyn MetadataStore> {
    if options.transport.is_remote() {
        Arc::new(RemoteMetadata::new(options.transport.clone(), layout.clone()))
    } else {
        Arc::new(LocalMetadata::new(layout.clone()))
    }
}
