//! Bridge status on `{prefix}/@/status`.
//!
//! The `running` message carries the bus description returned by bridge
//! setup (port, baud rate, sensor ids). The `offline` message published on
//! shutdown repeats it, so subscribers can tell which bus went away.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Running,
    Offline,
}

/// Status message of a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub bridge: String,
    pub version: String,
    pub status: BridgeState,
    /// Bus description, flattened into the message.
    #[serde(flatten)]
    pub bus: serde_json::Value,
}

/// Publishes a bridge's running and offline status.
pub struct StatusPublisher {
    publisher: Publisher,
    bridge: String,
    version: String,
    bus: serde_json::Value,
}

impl StatusPublisher {
    pub fn new(publisher: Publisher, bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            publisher,
            bridge: bridge.into(),
            version: version.into(),
            bus: serde_json::Value::Null,
        }
    }

    fn status(&self, state: BridgeState) -> BridgeStatus {
        BridgeStatus {
            bridge: self.bridge.clone(),
            version: self.version.clone(),
            status: state,
            bus: self.bus.clone(),
        }
    }

    /// Publish `running`, remembering `bus` for the offline message.
    pub async fn publish_running(&mut self, bus: Option<serde_json::Value>) -> Result<()> {
        if let Some(bus) = bus {
            self.bus = bus;
        }
        let status = self.status(BridgeState::Running);
        self.publisher.publish_report("status", &status).await
    }

    pub async fn publish_offline(&self) -> Result<()> {
        let status = self.status(BridgeState::Offline);
        self.publisher.publish_report("status", &status).await
    }
}
