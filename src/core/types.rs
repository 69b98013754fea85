use serde::{Deserialize, Serialize};

/// Handle to a node in the in-memory page. Only valid for the `Document` that issued it.
pub type NodeId = usize;

/// Form body of a chapter purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub action: String,
    pub chapter: String,
    pub nonce: String,
}

impl PurchaseRequest {
    /// `application/x-www-form-urlencoded` encoding of the three fields.
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("action", &self.action)
            .append_pair("chapter", &self.chapter)
            .append_pair("nonce", &self.nonce)
            .finish()
    }
}

/// Backend reply: `{success, data: {status, url, message}}`.
///
/// `data` is kept loose because error replies sometimes carry a bare string there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PurchaseResponse {
    pub fn status(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("status"))
            .and_then(|s| s.as_bool())
            .unwrap_or(false)
    }

    pub fn url(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("url"))
            .and_then(|u| u.as_str())
            .filter(|u| !u.trim().is_empty())
    }

    pub fn message(&self) -> Option<&str> {
        match self.data.as_ref()? {
            serde_json::Value::String(s) => Some(s.as_str()),
            other => other.get("message").and_then(|m| m.as_str()),
        }
    }

    /// The purchase went through: HTTP-level `success` and a true `data.status`.
    pub fn is_purchased(&self) -> bool {
        self.success && self.status()
    }
}

/// A locked chapter as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedItem {
    pub node: NodeId,
    pub chapter_id: Option<String>,
    pub title: String,
    pub cost: Option<u64>,
    pub instrumented: bool,
}

/// Result of one pass of the item scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub locked: usize,
    pub newly_instrumented: Vec<NodeId>,
    pub total_cost: u64,
    /// Locked items whose cost could not be read (counted as 0).
    pub anomalies: usize,
}

/// What a successful unlock committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockReceipt {
    pub node: NodeId,
    pub chapter_id: String,
    pub cost: u64,
    pub url: Option<String>,
}

/// Summary of a bulk unlock run.
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub requested: usize,
    pub unlocked: usize,
    pub failed: usize,
    pub total_cost: u64,
    pub duration_ms: u64,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}
