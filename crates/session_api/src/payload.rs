use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of `POST rag/session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSessionPayload {
    pub user_id: String,
    pub api_key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Session JSON as returned by the session endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionPayload {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub settings: SettingsPayload,
    #[serde(default)]
    pub dataset: Option<DatasetPayload>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Flat settings object. Absent fields keep the server default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePayload {
    pub title: String,
    #[serde(alias = "similarity")]
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    #[serde(default)]
    pub rows: Option<u64>,
    #[serde(default)]
    pub columns: Option<u64>,
    #[serde(default)]
    pub column_names: Option<Vec<String>>,
    #[serde(default)]
    pub missing_values: Option<BTreeMap<String, u64>>,
}

/// Dataset summary in either the flat shape or nested under `statistics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub rows: Option<u64>,
    #[serde(default)]
    pub columns: Option<u64>,
    #[serde(default)]
    pub column_names: Option<Vec<String>>,
    #[serde(default)]
    pub missing_values: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DatasetStatistics>,
}

/// Dataset fields after resolving the flat and nested shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatDataset {
    pub name: String,
    pub path: String,
    pub rows: u64,
    pub columns: u64,
    pub column_names: Vec<String>,
    pub missing_values: Option<BTreeMap<String, u64>>,
}

impl DatasetPayload {
    /// Top-level fields win over `statistics`. A missing column count falls
    /// back to the number of column names.
    pub fn flatten(self) -> FlatDataset {
        let statistics = self.statistics.unwrap_or_default();
        let column_names = self
            .column_names
            .or(statistics.column_names)
            .unwrap_or_default();
        let columns = self
            .columns
            .or(statistics.columns)
            .unwrap_or(column_names.len() as u64);
        let path = self.path.unwrap_or_default();
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| file_name_of(&path));

        FlatDataset {
            name,
            path,
            rows: self.rows.or(statistics.rows).unwrap_or(0),
            columns,
            column_names,
            missing_values: self.missing_values.or(statistics.missing_values),
        }
    }
}

fn file_name_of(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_owned()
}

/// Role as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireRole {
    User,
    Assistant,
}

impl WireRole {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Self::User,
            "assistant" | "ai" | "analyzer" | "system" | "bot" => Self::Assistant,
            _ => return None,
        })
    }
}

/// One persisted history entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HistoryItem {
    Message(HistoryMessage),
    /// Legacy question/answer pair; expands into two messages.
    Exchange(ChatExchange),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, alias = "source")]
    pub sources: Vec<SourcePayload>,
    #[serde(default)]
    pub dataset: Option<DatasetPayload>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatExchange {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourcePayload>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Response of `POST rag/{id}/upload`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub dataset: Option<DatasetPayload>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: std::sync::Arc<[u8]>,
}
