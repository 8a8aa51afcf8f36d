//! Router snapshot types.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Lifecycle of a client inside the router.
///
/// `Disconnected → Connecting → Connected → Failed`; removal drops the
/// client entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Disconnected,
    Connecting,
    /// Tools were listed at least once on the last refresh.
    Connected,
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A tool as exposed by the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    /// Name callers use. Either the server's name or `<client>_<tool>`.
    pub name: String,
    /// Name the owning server knows the tool by.
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    /// Owning client.
    pub owner: String,
}

impl ToolDescriptor {
    /// Whether the tool is exposed under a collision prefix.
    pub fn is_prefixed(&self) -> bool {
        self.name != self.tool_name
    }

    /// OpenAI-style function definition.
    pub fn to_openai_tool(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Per-client row of [`RouterStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub name: String,
    pub state: ClientState,
    pub alive: bool,
    pub tool_count: usize,
    pub target: String,
}

/// Read-only snapshot of the router.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouterStatus {
    pub clients: Vec<ClientStatus>,
    pub total_tools: usize,
}

impl RouterStatus {
    pub fn total_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn connected_clients(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| c.state == ClientState::Connected && c.alive)
            .count()
    }
}
