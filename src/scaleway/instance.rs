//! Instances running one game container each.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{
    BackendError, InstanceLaunch, InstanceService, InstanceSnapshot, InstanceState,
};
use crate::domain::{Region, ServerId};
use crate::future::BoxFuture;

use super::cloud_init::{CLOUD_INIT_USER_DATA_KEY, render_user_data};
use super::{RESOURCE_PREFIX, ScalewayClient, ScalewayClientError, resource_name};

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    security_group: &'a str,
    dynamic_ip_required: bool,
    routed_ip_enabled: bool,
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: RemoteServer,
}

#[derive(Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<RemoteServer>,
}

#[derive(Deserialize)]
pub(super) struct RemoteServer {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    pub(super) state: String,
    #[serde(default)]
    pub(super) public_ip: Option<RemoteIp>,
}

#[derive(Deserialize)]
pub(super) struct RemoteIp {
    pub(super) id: String,
    #[serde(default)]
    pub(super) address: String,
}

#[derive(Deserialize)]
struct IpEnvelope {
    ip: RemoteIp,
}

/// Maps a Scaleway server state onto the strategy's view.
pub(super) fn instance_state(state: &str) -> InstanceState {
    match state {
        "running" => InstanceState::Active,
        "starting" | "stopped" => InstanceState::Provisioning,
        "stopping" => InstanceState::Deleting,
        other => InstanceState::Other(other.to_owned()),
    }
}

impl From<RemoteServer> for InstanceSnapshot {
    fn from(server: RemoteServer) -> Self {
        Self {
            state: instance_state(&server.state),
            attachment: server.public_ip.map(|ip| ip.id),
            id: server.id,
        }
    }
}

impl ScalewayClient {
    async fn create_server(&self, launch: &InstanceLaunch) -> Result<String, BackendError> {
        let zone = launch.region.as_ref();
        let image_id = self.resolve_image_id(zone).await?;
        let name = resource_name(&launch.server_id);
        let payload = CreateServerRequest {
            name: &name,
            commercial_type: &launch.shape,
            image: &image_id,
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            security_group: &launch.firewall_group,
            dynamic_ip_required: true,
            routed_ip_enabled: true,
            tags: vec![String::from(RESOURCE_PREFIX), launch.server_id.to_string()],
        };
        let created: Result<ServerEnvelope, _> = self
            .send(
                self.http.post(self.zone_url(zone, "servers")).json(&payload),
                &format!("instance {name}"),
            )
            .await;
        let server_id = match created {
            Ok(envelope) => envelope.server.id,
            Err(ScalewayClientError::Capacity { message }) => {
                info!(server_id = %launch.server_id, zone, message = %message, "no capacity for instance");
                return Err(BackendError::InsufficientCapacity {
                    region: launch.region.clone(),
                    shape: launch.shape.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let user_data = render_user_data(&launch.image, &launch.environment);
        let path = format!("servers/{server_id}/user_data/{CLOUD_INIT_USER_DATA_KEY}");
        self.send_raw(
            self.http
                .patch(self.zone_url(zone, &path))
                .header("Content-Type", "text/plain")
                .body(user_data),
            &format!("instance {server_id}"),
        )
        .await?;

        self.api
            .perform_instance_action_async(zone, &server_id, "poweron")
            .await
            .map_err(ScalewayClientError::from)?;
        Ok(server_id)
    }

    async fn fetch_server(
        &self,
        instance_id: &str,
        zone: &str,
    ) -> Result<RemoteServer, ScalewayClientError> {
        let path = format!("servers/{instance_id}");
        let envelope: ServerEnvelope = self
            .send(
                self.http.get(self.zone_url(zone, &path)),
                &format!("instance {instance_id}"),
            )
            .await?;
        Ok(envelope.server)
    }

    async fn find_server(
        &self,
        server_id: &ServerId,
        zone: &str,
    ) -> Result<String, ScalewayClientError> {
        let name = resource_name(server_id);
        let listed: ServerList = self
            .send(
                self.http.get(self.zone_url(zone, "servers")).query(&[
                    ("name", name.as_str()),
                    ("project", self.config.default_project_id.as_str()),
                ]),
                "instances",
            )
            .await?;
        listed
            .servers
            .into_iter()
            .find(|server| server.name == name)
            .map(|server| server.id)
            .ok_or_else(|| ScalewayClientError::NotFound {
                resource: format!("instance {name}"),
            })
    }

    async fn remove_server(
        &self,
        instance_id: &str,
        zone: &str,
    ) -> Result<(), ScalewayClientError> {
        let server = self.fetch_server(instance_id, zone).await?;
        if server.state == "stopped" {
            let path = format!("servers/{instance_id}");
            self.send_raw(
                self.http.delete(self.zone_url(zone, &path)),
                &format!("instance {instance_id}"),
            )
            .await?;
            return Ok(());
        }
        self.api
            .perform_instance_action_async(zone, instance_id, "terminate")
            .await
            .map_err(ScalewayClientError::from)?;
        Ok(())
    }
}

impl InstanceService for ScalewayClient {
    fn launch<'a>(&'a self, launch: &'a InstanceLaunch) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            let instance_id = self.create_server(launch).await?;
            info!(server_id = %launch.server_id, instance_id = %instance_id, "instance powered on");
            Ok(instance_id)
        })
    }

    fn describe<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, InstanceSnapshot, BackendError> {
        Box::pin(async move {
            let server = self.fetch_server(instance_id, region.as_ref()).await?;
            Ok(InstanceSnapshot::from(server))
        })
    }

    fn public_ip<'a>(
        &'a self,
        attachment: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            let path = format!("ips/{attachment}");
            let envelope: IpEnvelope = self
                .send(
                    self.http.get(self.zone_url(region.as_ref(), &path)),
                    &format!("ip {attachment}"),
                )
                .await?;
            if envelope.ip.address.is_empty() {
                return Err(BackendError::NotReady {
                    resource: format!("ip {attachment}"),
                    detail: String::from("address not assigned yet"),
                });
            }
            Ok(envelope.ip.address)
        })
    }

    fn find<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError> {
        Box::pin(async move {
            self.find_server(server_id, region.as_ref())
                .await
                .map_err(BackendError::from)
        })
    }

    fn delete<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            self.remove_server(instance_id, region.as_ref()).await?;
            info!(instance_id, region = %region, "instance termination requested");
            Ok(())
        })
    }
}
