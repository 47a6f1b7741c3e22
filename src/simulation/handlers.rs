//! HTTP inspection endpoints over a running simulation.
//!
//! - `GET /nodes`: one summary line per simulated node.
//! - `GET /nodes/:peer/members`: the full membership table of one node.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::cluster::Cluster;
use crate::membership::types::{MemberEntry, PeerId};

pub type SharedCluster = Arc<RwLock<Cluster>>;

pub const ENDPOINT_NODES: &str = "/nodes";
pub const ENDPOINT_NODE_MEMBERS: &str = "/nodes/:peer/members";

#[derive(Debug, Serialize)]
pub struct NodeSummary {
    pub peer: String,
    pub in_group: bool,
    pub failed: bool,
    pub members: usize,
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub peer: Option<String>,
    pub now: u64,
    pub members: Vec<MemberEntry>,
    pub error: Option<String>,
}

impl MembersResponse {
    fn error(now: u64, error: String) -> Self {
        Self {
            peer: None,
            now,
            members: Vec::new(),
            error: Some(error),
        }
    }
}

pub async fn handle_list_nodes(
    Extension(cluster): Extension<SharedCluster>,
) -> (StatusCode, Json<Vec<NodeSummary>>) {
    let cluster = cluster.read().await;
    let nodes = cluster
        .nodes()
        .map(|node| NodeSummary {
            peer: node.local().to_string(),
            in_group: node.is_in_group(),
            failed: node.is_failed(),
            members: node.table().len(),
        })
        .collect();

    (StatusCode::OK, Json(nodes))
}

pub async fn handle_node_members(
    Extension(cluster): Extension<SharedCluster>,
    Path(peer): Path<String>,
) -> (StatusCode, Json<MembersResponse>) {
    let cluster = cluster.read().await;
    let now = cluster.now();

    let peer: PeerId = match peer.parse() {
        Ok(peer) => peer,
        Err(e) => {
            tracing::warn!("Bad peer id in request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(MembersResponse::error(now, e.to_string())),
            );
        }
    };

    match cluster.node(&peer) {
        Some(node) => (
            StatusCode::OK,
            Json(MembersResponse {
                peer: Some(peer.to_string()),
                now,
                members: node.snapshot(),
                error: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(MembersResponse::error(now, format!("no node {}", peer))),
        ),
    }
}
