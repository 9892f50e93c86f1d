//! Management protocol shared between the CLI and the daemon.
//!
//! Requests and replies travel in `ControlRequest`/`ControlReply` packets
//! whose payload TLV carries one JSON-encoded value. Symbolic names for
//! connections and routes must match `[A-Za-z][A-Za-z0-9]*`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    AddConnection {
        symbolic: String,
        remote: String,
    },
    AddListener {
        symbolic: String,
        local: String,
    },
    AddRoute {
        prefix: String,
        /// Face id or a previously registered symbolic connection name.
        nexthop: String,
        weight: u8,
    },
    ListConnections,
    ListInterfaces,
    ListRoutes,
    RemoveConnection {
        symbolic: String,
    },
    RemoveRoute {
        prefix: String,
        nexthop: String,
    },
    SetDebug,
    UnsetDebug,
    CacheServe {
        on: bool,
    },
    CacheStore {
        on: bool,
    },
    Quit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    /// One JSON object per listed item.
    List { items: Vec<serde_json::Value> },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub symbolic: String,
    pub face_id: u16,
    pub local: String,
    pub remote: String,
    pub up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteInfo {
    pub prefix: String,
    pub face_id: u16,
    pub weight: u8,
}

/// Validates a symbolic connection/listener name.
pub fn valid_symbolic(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_names() {
        assert!(valid_symbolic("conn0"));
        assert!(valid_symbolic("A"));
        assert!(!valid_symbolic(""));
        assert!(!valid_symbolic("0conn"));
        assert!(!valid_symbolic("conn-0"));
        assert!(!valid_symbolic("conn 0"));
    }

    #[test]
    fn test_request_roundtrip() {
        let requests = vec![
            Request::AddConnection {
                symbolic: "conn0".into(),
                remote: "127.0.0.1:9695".into(),
            },
            Request::AddRoute {
                prefix: "ccnx:/a/b".into(),
                nexthop: "conn0".into(),
                weight: 16,
            },
            Request::ListRoutes,
            Request::RemoveRoute {
                prefix: "ccnx:/a/b".into(),
                nexthop: "conn0".into(),
            },
            Request::CacheServe { on: false },
            Request::Quit,
        ];
        for req in requests {
            let json = serde_json::to_vec(&req).unwrap();
            let back: Request = serde_json::from_slice(&json).unwrap();
            assert_eq!(back, req);
        }
    }

    #[test]
    fn test_reply_roundtrip() {
        let reply = Reply::List {
            items: vec![serde_json::to_value(RouteInfo {
                prefix: "ccnx:/a".into(),
                face_id: 1,
                weight: 16,
            })
            .unwrap()],
        };
        let json = serde_json::to_vec(&reply).unwrap();
        let back: Reply = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, reply);
    }
}
