//! Workload patching
//!
//! Applies CR and operator settings to decoded driver workloads: images,
//! controller replicas, tolerations, node selectors and ownership.

use k8s_openapi::api::core::v1::PodSpec;
use kube::Resource;
use tracing::debug;

use super::common::CONFIG_VERSION_ANNOTATION;
use crate::config::OperatorConfig;
use crate::crd::{ContainerStorageModule, ContainerTemplate};
use crate::manifest::{ControllerYaml, NodeYaml};
use crate::versions::VersionSpec;

/// Name of the driver container in every controller and node template
pub const DRIVER_CONTAINER: &str = "driver";

/// Image sources consulted while patching
pub struct ImageSources<'a> {
    pub config: &'a OperatorConfig,
    pub version_spec: Option<&'a VersionSpec>,
}

impl ImageSources<'_> {
    /// Image for a container, or `None` to keep the template's image
    pub fn resolve(&self, cr: &ContainerStorageModule, container: &str) -> Option<String> {
        if container == DRIVER_CONTAINER {
            if let Some(image) = cr.spec.driver.common.image.as_deref().filter(|i| !i.is_empty()) {
                return Some(image.to_string());
            }
            return self
                .version_spec
                .and_then(|vs| vs.image(cr.driver_type().image_key()))
                .map(str::to_string);
        }

        self.version_spec
            .and_then(|vs| vs.image(container))
            .or_else(|| self.config.k8s_images.images.for_container(container))
            .map(str::to_string)
    }
}

/// Patch the controller Deployment
pub fn patch_controller(yaml: &mut ControllerYaml, cr: &ContainerStorageModule, images: &ImageSources<'_>) {
    let deployment = &mut yaml.workload;
    if let Some(owner) = cr.controller_owner_ref(&()) {
        deployment.metadata.owner_references = Some(vec![owner]);
    }
    deployment
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(CONFIG_VERSION_ANNOTATION.to_string(), cr.spec.driver.config_version.clone());

    let spec = deployment.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(cr.spec.driver.replicas);
    if let Some(pod) = spec.template.spec.as_mut() {
        patch_pod_spec(pod, &cr.spec.driver.controller, cr, images);
    }
}

/// Patch the node DaemonSet
pub fn patch_node(yaml: &mut NodeYaml, cr: &ContainerStorageModule, images: &ImageSources<'_>) {
    let daemon_set = &mut yaml.workload;
    if let Some(owner) = cr.controller_owner_ref(&()) {
        daemon_set.metadata.owner_references = Some(vec![owner]);
    }

    if let Some(pod) = daemon_set
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
    {
        patch_pod_spec(pod, &cr.spec.driver.node, cr, images);
    }
}

fn patch_pod_spec(
    pod: &mut PodSpec,
    template: &ContainerTemplate,
    cr: &ContainerStorageModule,
    images: &ImageSources<'_>,
) {
    let init = pod.init_containers.iter_mut().flatten();
    for container in pod.containers.iter_mut().chain(init) {
        if let Some(image) = images.resolve(cr, &container.name) {
            debug!(container = %container.name, image = %image, "Patched image");
            container.image = Some(image);
        }
    }

    if !template.tolerations.is_empty() {
        pod.tolerations = Some(template.tolerations.iter().map(Into::into).collect());
    }
    if !template.node_selector.is_empty() {
        pod.node_selector = Some(template.node_selector.clone());
    }
}
