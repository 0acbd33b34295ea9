use serde::{Deserialize, Serialize};

/// The server-delivered version document (`version.json`). Only `version`
/// is contractually read; everything else is tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub version: String,
    #[serde(default)]
    pub build_time: Option<i64>,
}

impl VersionDescriptor {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// An update is available whenever the deployed version differs from the
    /// running one, in either direction.
    pub fn differs_from(&self, running_version: &str) -> bool {
        self.version != running_version
    }
}
