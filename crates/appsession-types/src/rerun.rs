use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Widget values keyed by widget id.
pub type WidgetStates = BTreeMap<String, Value>;

/// Most recent client view of the app: query string plus widget values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientState {
    pub query_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_states: Option<WidgetStates>,
}

/// Input for one script run.
///
/// Compared structurally: two requests with the same query string and
/// widget snapshot are the same request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerunData {
    pub query_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_states: Option<WidgetStates>,
}

impl RerunData {
    pub fn new(query_string: impl Into<String>, widget_states: Option<WidgetStates>) -> Self {
        Self {
            query_string: query_string.into(),
            widget_states,
        }
    }
}

impl From<ClientState> for RerunData {
    fn from(state: ClientState) -> Self {
        Self {
            query_string: state.query_string,
            widget_states: state.widget_states,
        }
    }
}
