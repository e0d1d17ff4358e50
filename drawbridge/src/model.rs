//! The data model shared by the durable log store, the mutation engine, and
//! the wire protocol: operations, viewports, file metadata, and the opaque
//! scene elements that pass through the server untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use drawbridge_macros::LogLine;

/// One reducer step, written verbatim to a session's log.
///
/// `set` and `update` are reducer-equivalent: both fully replace the stored
/// elements. The distinction is kept in the encoding for auditing (which
/// endpoint produced the mutation) even though replay treats them alike.
#[derive(Clone, Debug, Serialize, Deserialize, LogLine)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    Set {
        elements: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_state: Option<Value>,
    },
    Append {
        elements: Vec<Value>,
    },
    Update {
        elements: Vec<Value>,
    },
    Viewport {
        viewport: Viewport,
    },
    Clear,
}

/// The camera rectangle the browser should frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 800.0,
            height: 600.0,
        }
    }
}

/// Metadata for one embedded image, keyed by file id in `Session::files`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub id: String,
    pub cdn_url: String,
    pub mime_type: String,
    pub created: u128,
}

/// The reconstructable part of a session's state: everything that can be
/// rebuilt by replaying `current snapshot` + the log. The subscriber set and
/// the version counter live alongside this in `Session` (see `session.rs`)
/// but are not part of what gets snapshotted, since version is tracked
/// separately and subscribers are a pure in-memory concept.
#[derive(Clone, Debug, Default, Serialize, Deserialize, LogLine)]
pub struct Snapshot {
    pub elements: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

/// Files-meta persisted independently of the operation log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilesMeta {
    #[serde(flatten)]
    pub files: HashMap<String, FileMeta>,
}

/// Apply one operation to a snapshot in place. This reducer is the single
/// source of truth for how an operation transforms state; both log replay
/// and live mutation call it.
pub fn apply(state: &mut Snapshot, op: &Operation) {
    match op {
        Operation::Set { elements, app_state } => {
            state.elements = elements.clone();
            state.app_state = app_state.clone();
        }
        Operation::Append { elements } => {
            state.elements.extend(elements.iter().cloned());
        }
        Operation::Update { elements } => {
            state.elements = elements.clone();
        }
        Operation::Viewport { viewport } => {
            state.viewport = Some(*viewport);
        }
        Operation::Clear => {
            state.elements.clear();
            state.app_state = None;
            state.viewport = None;
        }
    }
}

/// The two synthetic element types the server recognizes and strips out of
/// the stored elements, reinterpreting them as viewport operations.
const SYNTHETIC_VIEWPORT_TYPES: [&str; 2] = ["cameraUpdate", "viewportUpdate"];

/// Split an incoming element batch into ordinary draw elements and any
/// synthetic viewport updates found among them, in the order they appeared.
///
/// The server never validates element schema beyond this projection; that is
/// the browser's job.
pub fn strip_viewport_elements(elements: Vec<Value>) -> (Vec<Value>, Vec<Viewport>) {
    let mut draw_elements = Vec::with_capacity(elements.len());
    let mut viewports = Vec::new();
    for element in elements {
        match element_type(&element) {
            Some(t) if SYNTHETIC_VIEWPORT_TYPES.contains(&t) => {
                if let Some(v) = element_as_viewport(&element) {
                    viewports.push(v);
                }
            }
            _ => draw_elements.push(element),
        }
    }
    (draw_elements, viewports)
}

/// Typed projection of the handful of fields the server ever needs to look
/// at on an otherwise-opaque element.
fn element_type(element: &Value) -> Option<&str> {
    element.get("type").and_then(Value::as_str)
}

fn element_as_viewport(element: &Value) -> Option<Viewport> {
    Some(Viewport {
        x: element.get("x").and_then(Value::as_f64).unwrap_or(0.0),
        y: element.get("y").and_then(Value::as_f64).unwrap_or(0.0),
        width: element.get("width").and_then(Value::as_f64).unwrap_or(800.0),
        height: element.get("height").and_then(Value::as_f64).unwrap_or(600.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_camera_update_and_keeps_draw_elements() {
        let elements = vec![
            json!({"type": "cameraUpdate", "x": 0, "y": 0, "width": 400, "height": 300}),
            json!({"id": "r", "type": "rectangle", "x": 0, "y": 0, "width": 10, "height": 10}),
        ];
        let (draw, viewports) = strip_viewport_elements(elements);
        assert_eq!(draw.len(), 1);
        assert_eq!(draw[0]["id"], "r");
        assert_eq!(viewports.len(), 1);
        assert_eq!(
            viewports[0],
            Viewport {
                x: 0.0,
                y: 0.0,
                width: 400.0,
                height: 300.0
            }
        );
    }

    #[test]
    fn set_then_append_then_clear_round_trips() {
        let mut state = Snapshot::default();
        apply(&mut state, &Operation::Set { elements: vec![json!({"id": "a"})], app_state: None });
        apply(&mut state, &Operation::Append { elements: vec![json!({"id": "b"})] });
        assert_eq!(state.elements.len(), 2);
        apply(&mut state, &Operation::Clear);
        assert!(state.elements.is_empty());
        assert!(state.app_state.is_none());
        assert!(state.viewport.is_none());
    }

    #[test]
    fn set_and_update_are_reducer_equivalent() {
        let mut a = Snapshot::default();
        let mut b = Snapshot::default();
        let elements = vec![json!({"id": "x"})];
        apply(&mut a, &Operation::Set { elements: elements.clone(), app_state: None });
        apply(&mut b, &Operation::Update { elements });
        assert_eq!(a.elements, b.elements);
    }
}
