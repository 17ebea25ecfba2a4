//! Master server messages.
//!
//! Session servers use the same framing and `t`-tagged JSON objects as the
//! gameplay protocol to register, heartbeat and unregister. Browsing clients
//! may issue LIST over this channel or use the HTTP listing endpoint.

use serde::{Deserialize, Serialize};

/// Room metadata advertised by a session server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerMetadata {
    pub name: String,
    pub player_count: u32,
    pub capacity: u32,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default = "default_protocol")]
    pub protocol: u32,
}

fn default_protocol() -> u32 {
    crate::PROTOCOL_VERSION
}

/// One row of the public server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerListing {
    pub address: String,
    pub player_count: u32,
    pub capacity: u32,
    pub metadata: ServerMetadata,
}

/// Optional filters for LIST and `GET /list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ListFilter {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn matches(&self, metadata: &ServerMetadata) -> bool {
        let field_ok = |wanted: &Option<String>, actual: &str| {
            wanted.as_deref().map_or(true, |w| w.is_empty() || w == actual)
        };
        field_ok(&self.mode, &metadata.mode)
            && field_ok(&self.region, &metadata.region)
            && field_ok(&self.build, &metadata.build)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterRequest {
    Register {
        address: String,
        metadata: ServerMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Heartbeat {
        registry_id: String,
        metadata: ServerMetadata,
    },
    Unregister {
        registry_id: String,
    },
    List {
        #[serde(default)]
        filter: ListFilter,
    },
    Ping {
        timestamp: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterResponse {
    Registered { registry_id: String },
    HeartbeatAck,
    Unregistered,
    Servers { servers: Vec<ServerListing> },
    Error { reason: String },
    Pong { timestamp: u64 },
}

/// Error reason the master sends for a heartbeat against an unknown id.
pub const UNKNOWN_REGISTRY_ID: &str = "unknown_registry_id";

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(mode: &str, region: &str) -> ServerMetadata {
        ServerMetadata {
            name: "room".into(),
            player_count: 1,
            capacity: 4,
            mode: mode.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_matches() {
        let meta = metadata("coop", "eu");
        assert!(ListFilter::default().matches(&meta));

        let coop = ListFilter {
            mode: Some("coop".into()),
            ..Default::default()
        };
        assert!(coop.matches(&meta));

        let us = ListFilter {
            region: Some("us".into()),
            ..Default::default()
        };
        assert!(!us.matches(&meta));
    }

    #[test]
    fn test_register_wire_format() {
        let raw = r#"{"t":"REGISTER","address":"10.0.0.1:7777",
            "metadata":{"name":"r","player_count":0,"capacity":2}}"#;
        let req: MasterRequest = serde_json::from_str(raw).unwrap();
        match req {
            MasterRequest::Register {
                address,
                metadata,
                token,
            } => {
                assert_eq!(address, "10.0.0.1:7777");
                assert_eq!(metadata.capacity, 2);
                assert_eq!(metadata.protocol, crate::PROTOCOL_VERSION);
                assert!(token.is_none());
            }
            _ => panic!("Wrong request kind"),
        }
    }

    #[test]
    fn test_list_without_filter() {
        let req: MasterRequest = serde_json::from_str(r#"{"t":"LIST"}"#).unwrap();
        assert_eq!(
            req,
            MasterRequest::List {
                filter: ListFilter::default()
            }
        );
    }

    #[test]
    fn test_unit_response_kind() {
        let value = serde_json::to_value(MasterResponse::HeartbeatAck).unwrap();
        assert_eq!(value["t"], "HEARTBEAT_ACK");
    }
}
