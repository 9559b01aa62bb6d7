use serde::{Deserialize, Serialize};

/// Response from the `GET /api/version` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Server version string, e.g. `0.1.32`.
    #[serde(default = "unknown_version")]
    pub version: String,
}

fn unknown_version() -> String {
    "unknown".to_string()
}

/// One progress line of a streamed `POST /api/pull` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
    /// Human-readable phase, e.g. `pulling manifest` or `success`.
    #[serde(default)]
    pub status: String,

    /// Digest of the layer being downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Total bytes of the layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Bytes downloaded so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,

    /// Error reported by the server in place of progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PullProgress {
    /// True once the server reports the pull finished.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Download progress as a percentage, when the layer size is known.
    pub fn percent(&self) -> Option<f64> {
        let total = self.total.filter(|t| *t > 0)?;
        let completed = self.completed.unwrap_or(0).min(total);
        Some(completed as f64 * 100.0 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        let info: VersionInfo = serde_json::from_str(r#"{"version":"0.1.32"}"#).unwrap();
        assert_eq!(info.version, "0.1.32");
        let info: VersionInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info.version, "unknown");
    }

    #[test]
    fn pull_progress_parsing() {
        let progress: PullProgress = serde_json::from_str(
            r#"{"status":"pulling 8934d96d3f08","digest":"sha256:8934d96d3f08","total":400,"completed":100}"#,
        )
        .unwrap();
        assert!(!progress.is_success());
        assert_eq!(progress.percent(), Some(25.0));

        let progress: PullProgress = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(progress.is_success());
        assert_eq!(progress.percent(), None);
    }

    #[test]
    fn percent_is_clamped() {
        let progress = PullProgress {
            total: Some(10),
            completed: Some(20),
            ..PullProgress::default()
        };
        assert_eq!(progress.percent(), Some(100.0));
    }
}
