//! Host image resolution.

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use super::{ScalewayClient, ScalewayClientError};

impl ScalewayClient {
    /// Resolves the configured host image label to an image id in `zone`.
    ///
    /// Project-scoped images win over public ones with the same label.
    pub(super) async fn resolve_image_id(
        &self,
        zone: &str,
    ) -> Result<String, ScalewayClientError> {
        let label = &self.config.default_image;
        let arch = &self.config.default_architecture;

        let mut scoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
            .public(true)
            .project(&self.config.default_project_id)
            .name(label)
            .arch(arch);
        if let Some(org) = &self.config.default_organization_id {
            scoped = scoped.organization(org);
        }
        let project_images = scoped.run_async().await?;

        let candidates = if project_images.is_empty() {
            ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                .public(true)
                .name(label)
                .arch(arch)
                .run_async()
                .await?
        } else {
            project_images
        };

        select_image_id(candidates, arch).ok_or_else(|| ScalewayClientError::ImageNotFound {
            label: label.clone(),
            arch: arch.clone(),
            zone: zone.to_owned(),
        })
    }
}

/// Picks the newest available image built for `arch`.
pub(super) fn select_image_id(candidates: Vec<ScalewayImage>, arch: &str) -> Option<String> {
    candidates
        .into_iter()
        .filter(|image| image.arch == arch && image.state == "available")
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
}
