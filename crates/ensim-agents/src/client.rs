//! Control-plane client seam.
//!
//! Agents only see `FleetClient`; how a client is obtained for an agent is
//! up to the `FleetConnector`. `GrpcConnector` talks to a real control plane
//! over tonic channels, `LoopbackFleet` keeps everything in process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use tonic::codec::ProstCodec;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use ensim_core::proto::{
    GetTelemetryConfigRequest, GetTelemetryConfigResponse, PlatformUpdateStatusRequest,
    PlatformUpdateStatusResponse, UpdateHostSystemInfoRequest, UpdateHostSystemInfoResponse,
    UpdateInstanceStatusRequest, UpdateInstanceStatusResponse,
};
use ensim_core::{AgentType, Settings};

use crate::auth::CallContext;
use crate::error::ClientError;

pub const UPDATE_INSTANCE_STATUS: &str =
    "/hostmgr.v1.HostmgrSouthbound/UpdateInstanceStateStatusByHostGUID";
pub const UPDATE_HOST_SYSTEM_INFO: &str = "/hostmgr.v1.HostmgrSouthbound/UpdateHostSystemInfoByGUID";
pub const PLATFORM_UPDATE_STATUS: &str = "/maintmgr.v1.MaintmgrService/PlatformUpdateStatus";
pub const GET_TELEMETRY_CONFIG: &str = "/telemetrymgr.v1.TelemetryMgr/GetTelemetryConfigByGUID";

/// The calls simulated agents make against the control plane.
#[async_trait]
pub trait FleetClient: Send + Sync {
    async fn update_instance_status(
        &self,
        ctx: &CallContext,
        req: UpdateInstanceStatusRequest,
    ) -> Result<UpdateInstanceStatusResponse, ClientError>;

    async fn update_host_system_info(
        &self,
        ctx: &CallContext,
        req: UpdateHostSystemInfoRequest,
    ) -> Result<UpdateHostSystemInfoResponse, ClientError>;

    async fn platform_update_status(
        &self,
        ctx: &CallContext,
        req: PlatformUpdateStatusRequest,
    ) -> Result<PlatformUpdateStatusResponse, ClientError>;

    async fn get_telemetry_config(
        &self,
        ctx: &CallContext,
        req: GetTelemetryConfigRequest,
    ) -> Result<GetTelemetryConfigResponse, ClientError>;
}

/// Produces the client an agent uses to reach `address`.
#[async_trait]
pub trait FleetConnector: Send + Sync {
    async fn connect(
        &self,
        agent: AgentType,
        address: &str,
        settings: &Settings,
    ) -> Result<Arc<dyn FleetClient>, ClientError>;
}

// ── gRPC ───────────────────────────────────────────────────────

/// Connects agents over plaintext HTTP/2 gRPC channels.
///
/// Channels are lazy: connecting never blocks and an unreachable endpoint
/// surfaces as `Unavailable` on the first call.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    connect_timeout: Duration,
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl GrpcConnector {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl FleetConnector for GrpcConnector {
    async fn connect(
        &self,
        agent: AgentType,
        address: &str,
        _settings: &Settings,
    ) -> Result<Arc<dyn FleetClient>, ClientError> {
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| ClientError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout);
        debug!(%agent, %address, "grpc channel created");
        Ok(Arc::new(GrpcFleetClient {
            channel: endpoint.connect_lazy(),
        }))
    }
}

struct GrpcFleetClient {
    channel: Channel,
}

impl GrpcFleetClient {
    async fn unary<Req, Resp>(
        &self,
        ctx: &CallContext,
        method: &'static str,
        req: Req,
    ) -> Result<Resp, ClientError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;

        let bearer: MetadataValue<Ascii> = format!("Bearer {}", ctx.bearer)
            .parse()
            .map_err(|_| ClientError::Metadata("bearer token is not valid ASCII".into()))?;
        let mut request = tonic::Request::new(req);
        request.set_timeout(ctx.timeout);
        request.metadata_mut().insert("authorization", bearer);

        let codec = ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(method), codec)
            .await
            .map_err(|status| ClientError::Rpc {
                method,
                code: status.code(),
                message: status.message().to_string(),
            })?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl FleetClient for GrpcFleetClient {
    async fn update_instance_status(
        &self,
        ctx: &CallContext,
        req: UpdateInstanceStatusRequest,
    ) -> Result<UpdateInstanceStatusResponse, ClientError> {
        self.unary(ctx, UPDATE_INSTANCE_STATUS, req).await
    }

    async fn update_host_system_info(
        &self,
        ctx: &CallContext,
        req: UpdateHostSystemInfoRequest,
    ) -> Result<UpdateHostSystemInfoResponse, ClientError> {
        self.unary(ctx, UPDATE_HOST_SYSTEM_INFO, req).await
    }

    async fn platform_update_status(
        &self,
        ctx: &CallContext,
        req: PlatformUpdateStatusRequest,
    ) -> Result<PlatformUpdateStatusResponse, ClientError> {
        self.unary(ctx, PLATFORM_UPDATE_STATUS, req).await
    }

    async fn get_telemetry_config(
        &self,
        ctx: &CallContext,
        req: GetTelemetryConfigRequest,
    ) -> Result<GetTelemetryConfigResponse, ClientError> {
        self.unary(ctx, GET_TELEMETRY_CONFIG, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grpc_connect_is_lazy() {
        let connector = GrpcConnector::default().with_connect_timeout(Duration::from_millis(100));
        let settings = Settings::new("5a7c1d7e-1111-2222-3333-444455556666", "/tmp/unused");
        // Nothing listens here; creating the client must still succeed.
        let client = connector
            .connect(AgentType::Node, "127.0.0.1:1", &settings)
            .await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn grpc_call_to_closed_port_fails() {
        let connector = GrpcConnector::default().with_connect_timeout(Duration::from_millis(200));
        let settings = Settings::new("5a7c1d7e-1111-2222-3333-444455556666", "/tmp/unused");
        let client = connector
            .connect(AgentType::Telemetry, "127.0.0.1:1", &settings)
            .await
            .unwrap();
        let ctx = CallContext {
            bearer: "token".into(),
            timeout: Duration::from_millis(500),
        };
        let err = client
            .get_telemetry_config(
                &ctx,
                GetTelemetryConfigRequest {
                    guid: settings.uuid.clone(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Unavailable(_) | ClientError::Rpc { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        let connector = GrpcConnector::default();
        let settings = Settings::new("5a7c1d7e-1111-2222-3333-444455556666", "/tmp/unused");
        let err = connector
            .connect(AgentType::Hd, "bad host:443", &settings)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
