//! Wire-level message taxonomy for the bidirectional socket (§6). Every
//! frame is one self-describing JSON document tagged by `type`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{FileMeta, Viewport};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Elements {
        elements: Vec<Value>,
        #[serde(rename = "appState", skip_serializing_if = "Option::is_none")]
        app_state: Option<Value>,
        version: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<&'static str>,
    },
    Append {
        elements: Vec<Value>,
    },
    Viewport {
        viewport: Viewport,
    },
    Clear {},
    FilesMeta {
        files: HashMap<String, FileMeta>,
    },
    FileAdded {
        file: FileMeta,
    },
}

impl ServerMessage {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Update {
        elements: Vec<Value>,
        #[serde(default, rename = "baseVersion")]
        base_version: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements_message_omits_absent_source_and_app_state() {
        let msg = ServerMessage::Elements {
            elements: vec![],
            app_state: None,
            version: 3,
            source: None,
        };
        let json = msg.to_frame().unwrap();
        assert!(!json.contains("source"));
        assert!(!json.contains("appState"));
        assert!(json.contains("\"type\":\"elements\""));
    }

    #[test]
    fn client_update_parses_with_and_without_base_version() {
        let with: ClientMessage =
            serde_json::from_str(r#"{"type":"update","elements":[],"baseVersion":2}"#).unwrap();
        assert!(matches!(with, ClientMessage::Update { base_version: Some(2), .. }));

        let without: ClientMessage =
            serde_json::from_str(r#"{"type":"update","elements":[]}"#).unwrap();
        assert!(matches!(without, ClientMessage::Update { base_version: None, .. }));
    }
}
