use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Response from the `GET /api/tags` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelList {
    /// Models installed on the server.
    #[serde(default)]
    pub models: Vec<ModelSummary>,
}

impl ModelList {
    /// Get the list of models.
    pub fn models(&self) -> &[ModelSummary] {
        &self.models
    }

    /// True when the server has no models installed.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look a model up by its full name (`llama2:latest`) or its base name (`llama2`).
    pub fn find(&self, name: &str) -> Option<&ModelSummary> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .or_else(|| self.models.iter().find(|m| m.base_name() == name))
    }
}

/// A model installed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Full model name including its tag, e.g. `llama2:latest`.
    pub name: String,

    /// Size on disk in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Last modification time.
    #[serde(default, with = "crate::utils::time")]
    pub modified_at: Option<OffsetDateTime>,

    /// Content digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Model family and quantization details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ModelDetails>,
}

/// Details of an installed model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetails {
    /// Model family, e.g. `llama`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    /// Parameter count, e.g. `7B`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,

    /// Quantization level, e.g. `Q4_0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization_level: Option<String>,
}

impl ModelSummary {
    /// Create a summary with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified_at: None,
            digest: None,
            details: None,
        }
    }

    /// The model name without its tag.
    pub fn base_name(&self) -> &str {
        self.name
            .split_once(':')
            .map(|(base, _)| base)
            .unwrap_or(&self.name)
    }

    /// Size in gigabytes with three decimals, e.g. `3.826 Gb`.
    pub fn display_size(&self) -> String {
        match self.size {
            Some(size) => format_model_size(size),
            None => "Unknown size".to_string(),
        }
    }

    /// Modification date as `YYYY-MM-DD`.
    pub fn display_modified(&self) -> String {
        self.modified_at
            .and_then(|at| at.format(DATE_FORMAT).ok())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Format a byte count as gigabytes with three decimals.
pub fn format_model_size(size_bytes: u64) -> String {
    format!("{:.3} Gb", size_bytes as f64 / BYTES_PER_GB)
}
