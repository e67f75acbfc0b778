//! Docker Engine adapter built on `bollard`.

use crate::container::{
    domain::{BindMount, ContainerSpec},
    ports::{
        ContainerRuntime, ContainerRuntimeError, ContainerRuntimeResult, ManagedContainer,
        RuntimeState,
    },
};
use async_trait::async_trait;
use bollard::{
    Docker,
    errors::Error as BollardError,
    models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig},
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
        ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
        StopContainerOptionsBuilder,
    },
};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Container runtime backed by a Docker-compatible engine.
#[derive(Debug, Clone)]
pub struct DockerContainerRuntime {
    docker: Docker,
}

impl DockerContainerRuntime {
    /// Connects using the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns [`ContainerRuntimeError::Runtime`] when the client cannot be
    /// configured.
    pub fn connect_local() -> ContainerRuntimeResult<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(ContainerRuntimeError::runtime)?;
        Ok(Self { docker })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn remove_if_exists(&self, container: &str) -> ContainerRuntimeResult<()> {
        match self
            .docker
            .remove_container(
                container,
                Some(
                    RemoveContainerOptionsBuilder::new()
                        .force(true)
                        .v(true)
                        .build(),
                ),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(error) if is_not_found_error(&error) => Ok(()),
            Err(error) => Err(ContainerRuntimeError::runtime(error)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerContainerRuntime {
    async fn ensure_image(&self, image: &str) -> ContainerRuntimeResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let (from_image, tag) = split_image_reference(image);
        info!(image, "pulling image");
        let mut options = CreateImageOptionsBuilder::new().from_image(from_image);
        if let Some(image_tag) = tag {
            options = options.tag(image_tag);
        }
        self.docker
            .create_image(Some(options.build()), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|error| ContainerRuntimeError::ImageUnavailable {
                image: image.to_owned(),
                reason: error.to_string(),
            })?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> ContainerRuntimeResult<String> {
        // A container left behind by an earlier run holds the deterministic name.
        self.remove_if_exists(spec.name()).await?;

        let env = spec.env_pairs();
        let binds: Vec<String> = spec.mounts().iter().map(BindMount::to_bind_string).collect();
        let labels: HashMap<String, String> = spec
            .labels()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let config = ContainerCreateBody {
            image: Some(spec.image().to_owned()),
            labels: Some(labels),
            env: if env.is_empty() { None } else { Some(env) },
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                network_mode: spec.network().map(str::to_owned),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(spec.name()).build()),
                config,
            )
            .await
            .map_err(ContainerRuntimeError::runtime)?;
        debug!(container = %spec.name(), id = %response.id, "container created");
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> ContainerRuntimeResult<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await
            .map_err(|error| map_container_error(container_id, error))
    }

    async fn inspect(&self, container_id: &str) -> ContainerRuntimeResult<RuntimeState> {
        let details = match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => details,
            Err(error) if is_not_found_error(&error) => return Ok(RuntimeState::Missing),
            Err(error) => return Err(ContainerRuntimeError::runtime(error)),
        };

        let Some(state) = details.state else {
            return Ok(RuntimeState::Created);
        };
        if state.running == Some(true) {
            let address = details
                .network_settings
                .and_then(|settings| settings.networks)
                .and_then(|networks| {
                    networks
                        .into_values()
                        .filter_map(|endpoint| endpoint.ip_address)
                        .find(|ip| !ip.is_empty())
                });
            return Ok(RuntimeState::Running { address });
        }

        match state.status {
            Some(ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD) => {
                Ok(RuntimeState::Exited {
                    exit_code: state.exit_code,
                })
            }
            _ => Ok(RuntimeState::Created),
        }
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> ContainerRuntimeResult<()> {
        let seconds = i32::try_from(grace.as_secs()).unwrap_or(i32::MAX);
        match self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptionsBuilder::new().t(seconds).build()),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(error) if is_not_found_error(&error) || is_not_modified(&error) => Ok(()),
            Err(error) => Err(ContainerRuntimeError::runtime(error)),
        }
    }

    async fn remove(&self, container_id: &str) -> ContainerRuntimeResult<()> {
        self.remove_if_exists(container_id).await
    }

    async fn list_managed(&self, label: &str) -> ContainerRuntimeResult<Vec<ManagedContainer>> {
        let filters = HashMap::from([("label", vec![label])]);
        let summaries = self
            .docker
            .list_containers(Some(
                ListContainersOptionsBuilder::new()
                    .all(true)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(ContainerRuntimeError::runtime)?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|raw| raw.trim_start_matches('/').to_owned())
                    .unwrap_or_default();
                let running = summary
                    .status
                    .as_deref()
                    .is_some_and(|status| status.starts_with("Up"));
                Some(ManagedContainer {
                    id,
                    name,
                    image: summary.image.unwrap_or_default(),
                    labels: summary.labels.unwrap_or_default().into_iter().collect(),
                    running,
                })
            })
            .collect())
    }
}

/// Splits `image` into the `fromImage` and `tag` pull parameters.
///
/// Digest references and untagged images are pulled without a tag. A colon in
/// a registry host (`localhost:5000/app`) is not mistaken for a tag.
fn split_image_reference(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag)),
        _ => (image, Some("latest")),
    }
}

fn map_container_error(container_id: &str, error: BollardError) -> ContainerRuntimeError {
    if is_not_found_error(&error) {
        ContainerRuntimeError::NotFound(container_id.to_owned())
    } else {
        ContainerRuntimeError::runtime(error)
    }
}

const fn is_not_found_error(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

const fn is_not_modified(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}
