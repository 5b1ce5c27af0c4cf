//! Request handlers for sync endpoints.

use crate::applier::HubApplier;
use crate::artifact::ArtifactStore;
use crate::auth::secret_matches;
use crate::config::ServerConfig;
use crate::directory::HubDirectory;
use crate::distribution::DistributionUpdate;
use crate::error::{ServerError, ServerResult};
use crate::registry::{NodeStatus, RegisteredNode};
use crate::stores::HubStores;
use std::path::PathBuf;
use std::sync::Arc;
use syncq_core::SharedClock;
use syncq_sync_protocol::{
    DownloadRequest, DownloadResponse, RegisterRequest, RegisterResponse, ReportRequest,
    ReportResponse, ResponseStatus, StatusRequest, StatusResponse, UploadRequest, UploadResponse,
};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Durable hub state.
    pub stores: HubStores,
    /// Applies uploaded items.
    pub applier: HubApplier,
    /// Out-of-band artifacts.
    pub artifacts: ArtifactStore,
    /// Hub clock.
    pub clock: SharedClock,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        stores: HubStores,
        directory: Arc<dyn HubDirectory>,
        clock: SharedClock,
    ) -> Self {
        let applier = HubApplier::new(
            directory,
            Arc::clone(&stores.mappings),
            config.conflict_policy,
            clock.clone(),
        );
        let artifacts = ArtifactStore::new(config.artifact_dir.clone());
        Self {
            config,
            stores,
            applier,
            artifacts,
            clock,
        }
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Shared context.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Handles a status check.
    ///
    /// Status never fails with an error body; refusals are reported in the
    /// response so a leaf can tell "not registered" from "network down".
    pub fn handle_status(
        &self,
        request: StatusRequest,
        header_key: Option<&str>,
    ) -> ServerResult<StatusResponse> {
        let now = self.context.clock.now();
        if !self.context.config.enabled {
            return Ok(StatusResponse::error("Sync is disabled on this hub", false, now));
        }
        if request.node_id.is_empty() {
            return Ok(StatusResponse {
                status: ResponseStatus::Ok,
                message: "available".into(),
                registered: false,
                active: false,
                node_name: None,
                last_synced_at: None,
                server_time: now,
            });
        }

        let Some(node) = self.context.stores.registry.get(&request.node_id) else {
            return Ok(StatusResponse::error("Node not registered", false, now));
        };

        let key = pick_key(request.apikey.as_deref().unwrap_or_default(), header_key);
        if let Some(key) = key {
            match self.context.stores.registry.authenticate(&node.node_id, key) {
                Ok(_) => {}
                Err(ServerError::AuthenticationFailed(message)) => {
                    return Ok(StatusResponse::error(message, true, now));
                }
                Err(e) => return Err(e),
            }
        }

        if !node.is_active() {
            return Ok(StatusResponse::error(format!("Node is {}", node.status), true, now));
        }

        // Without a key only the registration state is disclosed.
        let (node_name, last_synced_at) = match key {
            Some(_) => (Some(node.display_name), node.last_synced_at),
            None => (None, None),
        };
        Ok(StatusResponse {
            status: ResponseStatus::Ok,
            message: "Node active".into(),
            registered: true,
            active: true,
            node_name,
            last_synced_at,
            server_time: now,
        })
    }

    /// Handles a self-registration. Every refusal is a structured error
    /// response with an empty key.
    pub fn handle_register(&self, request: RegisterRequest) -> ServerResult<RegisterResponse> {
        let config = &self.context.config;
        if !config.enabled {
            return Ok(RegisterResponse::error("Sync is disabled on this hub"));
        }
        if !config.allow_registration {
            return Ok(RegisterResponse::error("Registration is disabled"));
        }
        let expected = config.registration_secret.as_deref().unwrap_or_default();
        if expected.is_empty() || !secret_matches(&request.secret, expected) {
            tracing::warn!(node_id = %request.node_id, "registration secret rejected");
            return Ok(RegisterResponse::error("Invalid registration secret"));
        }
        if request.node_id.trim().is_empty() || request.name.trim().is_empty() {
            return Ok(RegisterResponse::error("Node id and name are required"));
        }

        match self.context.stores.registry.register(
            &request.node_id,
            &request.name,
            request.contact_email,
            request.description,
        ) {
            Ok(key) => Ok(RegisterResponse::success(key)),
            Err(ServerError::InvalidRequest(message)) => Ok(RegisterResponse::error(message)),
            Err(e) => Err(e),
        }
    }

    /// Handles a batch upload.
    pub fn handle_upload(
        &self,
        request: UploadRequest,
        header_key: Option<&str>,
    ) -> ServerResult<UploadResponse> {
        let node = self.authorize(&request.node_id, &request.apikey, header_key)?;

        let max = self.context.config.max_upload_batch as usize;
        if request.items.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "Too many items: {} > {}",
                request.items.len(),
                max
            )));
        }

        let results = self.context.applier.apply_batch(&node.node_id, &request.items);
        let response = UploadResponse::from_results(results);
        self.context.stores.registry.record_sync(
            &node.node_id,
            response.processed,
            response.success,
        )?;

        tracing::info!(
            node_id = %node.node_id,
            processed = response.processed,
            success = response.success,
            failed = response.failed,
            conflicts = response.conflicts,
            "upload applied"
        );
        Ok(response)
    }

    /// Handles a batch download. Every returned update is recorded as
    /// delivered to the caller.
    pub fn handle_download(
        &self,
        request: DownloadRequest,
        header_key: Option<&str>,
    ) -> ServerResult<DownloadResponse> {
        let node = self.authorize(&request.node_id, &request.apikey, header_key)?;

        let limit = request.limit.min(self.context.config.max_download_batch) as usize;
        let distribution = &self.context.stores.distribution;
        let updates: Vec<_> = distribution
            .take_pending(&node.node_id, request.since, limit)?
            .iter()
            .map(DistributionUpdate::to_wire)
            .collect();

        tracing::info!(
            node_id = %node.node_id,
            since = request.since,
            delivered = updates.len(),
            "updates delivered"
        );
        Ok(DownloadResponse {
            count: updates.len() as u32,
            since: request.since,
            server_time: self.context.clock.now(),
            updates,
        })
    }

    /// Handles an audit report.
    pub fn handle_report(
        &self,
        request: ReportRequest,
        header_key: Option<&str>,
    ) -> ServerResult<ReportResponse> {
        let node = self.authorize(&request.node_id, &request.apikey, header_key)?;
        self.context
            .stores
            .sync_log
            .record(&node.node_id, &request.summary)?;
        Ok(ReportResponse {
            status: ResponseStatus::Ok,
            message: "Report recorded".into(),
            server_time: self.context.clock.now(),
        })
    }

    /// Authorizes an artifact download and returns the file to stream.
    pub fn artifact_path(&self, node_id: &str, api_key: &str, name: &str) -> ServerResult<PathBuf> {
        let node = self.authorize(node_id, api_key, None)?;
        let path = self.context.artifacts.resolve(name)?;
        tracing::info!(node_id = %node.node_id, artifact = name, "artifact requested");
        Ok(path)
    }

    fn authorize(
        &self,
        node_id: &str,
        body_key: &str,
        header_key: Option<&str>,
    ) -> ServerResult<RegisteredNode> {
        if !self.context.config.enabled {
            return Err(ServerError::Disabled);
        }
        if node_id.is_empty() {
            return Err(ServerError::InvalidRequest("nodeId is required".into()));
        }
        let key = pick_key(body_key, header_key)
            .ok_or_else(|| ServerError::AuthenticationFailed("Missing API key".into()))?;
        self.context.stores.registry.verify(node_id, key)
    }

    /// Operator action: suspends, reactivates or parks a node.
    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) -> ServerResult<()> {
        self.context.stores.registry.set_status(node_id, status)
    }
}

/// The JSON field wins over the header when both are present.
fn pick_key<'a>(body_key: &'a str, header_key: Option<&'a str>) -> Option<&'a str> {
    if !body_key.is_empty() {
        return Some(body_key);
    }
    header_key.filter(|k| !k.is_empty())
}
