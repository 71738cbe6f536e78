//! Container environment assembled for each deployment.
//!
//! Sources are applied in order and later ones overwrite earlier keys:
//! variant defaults, region values, generated credentials, then the
//! deployment's extra overrides.

use std::collections::BTreeMap;

use crate::catalog::{RegionConfig, VariantConfig};
use crate::domain::{DeploymentContext, ServerCredentials};

const REGION_PLACEHOLDER: &str = "{region}";

/// Builds the environment handed to the game-server container.
#[must_use]
pub fn build_environment(
    context: &DeploymentContext,
    credentials: &ServerCredentials,
    variant: &VariantConfig,
    region: &RegionConfig,
) -> BTreeMap<String, String> {
    let mut env = variant.environment.clone();

    for (mode, cfg) in &variant.default_cfgs {
        env.insert(
            format!("DEFAULT_{}_CFG", mode.to_uppercase()),
            cfg.clone(),
        );
    }

    env.insert(
        String::from("SERVER_HOSTNAME"),
        server_hostname(context, variant, region),
    );
    env.insert(String::from("STV_NAME"), region.tv_hostname.clone());

    env.insert(
        String::from("SERVER_PASSWORD"),
        credentials.server_password.clone(),
    );
    env.insert(
        String::from("RCON_PASSWORD"),
        credentials.rcon_password.clone(),
    );
    env.insert(String::from("STV_PASSWORD"), credentials.tv_password.clone());
    env.insert(
        String::from("SV_LOGSECRET"),
        credentials.log_secret.to_string(),
    );
    env.insert(String::from("ADMIN_LIST"), admin_list(context, variant));

    env.extend(
        context
            .extra_env()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    env
}

fn server_hostname(
    context: &DeploymentContext,
    variant: &VariantConfig,
    region: &RegionConfig,
) -> String {
    let hostname = variant.hostname.as_ref().map_or_else(
        || region.srcds_hostname.clone(),
        |template| template.replace(REGION_PLACEHOLDER, &region.display_name),
    );
    format!("#{} {hostname}", context.hostname_prefix())
}

fn admin_list(context: &DeploymentContext, variant: &VariantConfig) -> String {
    variant
        .admins
        .iter()
        .map(String::as_str)
        .chain(context.admin_identity())
        .filter(|admin| !admin.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
