//! Security groups scoped to one game server.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{BackendError, FirewallRule, FirewallService, GAME_SERVER_RULES};
use crate::domain::{Region, ServerId};
use crate::future::BoxFuture;

use super::{RESOURCE_PREFIX, ScalewayClient, ScalewayClientError, resource_name};

#[derive(Serialize)]
struct CreateGroupRequest<'a> {
    name: &'a str,
    description: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    stateful: bool,
    inbound_default_policy: &'static str,
    outbound_default_policy: &'static str,
    tags: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct CreateRuleRequest {
    pub(super) protocol: &'static str,
    pub(super) direction: &'static str,
    pub(super) action: &'static str,
    pub(super) ip_range: &'static str,
    pub(super) dest_port_from: u16,
}

impl From<FirewallRule> for CreateRuleRequest {
    fn from(rule: FirewallRule) -> Self {
        Self {
            protocol: rule.protocol.as_str(),
            direction: "inbound",
            action: "accept",
            ip_range: "0.0.0.0/0",
            dest_port_from: rule.port,
        }
    }
}

#[derive(Deserialize)]
struct GroupEnvelope {
    security_group: SecurityGroup,
}

#[derive(Deserialize)]
struct GroupList {
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
}

#[derive(Deserialize)]
struct SecurityGroup {
    id: String,
    name: String,
}

impl ScalewayClient {
    async fn create_group(
        &self,
        server_id: &ServerId,
        zone: &str,
    ) -> Result<String, ScalewayClientError> {
        let name = resource_name(server_id);
        let description = format!("Inbound game traffic for server {server_id}");
        let payload = CreateGroupRequest {
            name: &name,
            description: &description,
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            stateful: true,
            inbound_default_policy: "drop",
            outbound_default_policy: "accept",
            tags: vec![String::from(RESOURCE_PREFIX), server_id.to_string()],
        };
        let created: GroupEnvelope = self
            .send(
                self.http
                    .post(self.zone_url(zone, "security_groups"))
                    .json(&payload),
                &format!("security group {name}"),
            )
            .await?;
        let group_id = created.security_group.id;

        for rule in GAME_SERVER_RULES {
            let path = format!("security_groups/{group_id}/rules");
            self.send_raw(
                self.http
                    .post(self.zone_url(zone, &path))
                    .json(&CreateRuleRequest::from(rule)),
                &format!("security group {group_id}"),
            )
            .await?;
        }
        Ok(group_id)
    }

    async fn find_group(
        &self,
        server_id: &ServerId,
        zone: &str,
    ) -> Result<String, ScalewayClientError> {
        let name = resource_name(server_id);
        let listed: GroupList = self
            .send(
                self.http.get(self.zone_url(zone, "security_groups")).query(&[
                    ("name", name.as_str()),
                    ("project", self.config.default_project_id.as_str()),
                ]),
                "security groups",
            )
            .await?;
        listed
            .security_groups
            .into_iter()
            .find(|group| group.name == name)
            .map(|group| group.id)
            .ok_or_else(|| ScalewayClientError::NotFound {
                resource: format!("security group {name}"),
            })
    }

    async fn delete_group(
        &self,
        server_id: &ServerId,
        zone: &str,
    ) -> Result<(), ScalewayClientError> {
        let group_id = self.find_group(server_id, zone).await?;
        let path = format!("security_groups/{group_id}");
        self.send_raw(
            self.http.delete(self.zone_url(zone, &path)),
            &format!("security group {group_id}"),
        )
        .await?;
        info!(server_id = %server_id, group_id = %group_id, "security group deleted");
        Ok(())
    }
}

impl FirewallService for ScalewayClient {
    fn create<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            let group_id = self.create_group(server_id, region.as_ref()).await?;
            info!(server_id = %server_id, group_id = %group_id, "security group created");
            Ok(group_id)
        })
    }

    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            self.delete_group(server_id, region.as_ref())
                .await
                .map_err(BackendError::from)
        })
    }
}
