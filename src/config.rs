use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::depth_tracking::DEFAULT_MAX_DEPTH;

/// Engine settings. Every field has a default, so a partial document deserializes.
#[derive(Educe, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Directory or URL prefix schema files are fetched from, as `<schema_root>/<file name>`.
    #[educe(Default(expression = String::from("schemas")))]
    pub schema_root: String,
    /// How many nested decodes deep to follow before giving up on a value.
    #[educe(Default = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
