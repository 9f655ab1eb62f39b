//! Stack outputs and the outputs file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use derive_more::{Deref, DerefMut, From};
use serde::{Deserialize, Serialize};

/// Named values exposed by a provisioned stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut, From)]
#[serde(transparent)]
pub struct StackOutputs(BTreeMap<String, String>);

impl StackOutputs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StackOutputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Write aggregated outputs (layer name -> outputs) to `path`.
///
/// A `.json` extension produces JSON, anything else YAML.
pub fn write_outputs_file(
    path: &Path,
    outputs: &BTreeMap<String, StackOutputs>,
) -> Result<PathBuf> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let content = if is_json {
        serde_json::to_string_pretty(outputs).context("Failed to serialize outputs to JSON")?
    } else {
        serde_yaml::to_string(outputs).context("Failed to serialize outputs to YAML")?
    };

    std::fs::write(path, content)
        .context(format!("Failed to write outputs to {}", path.display()))?;
    tracing::info!(path = %path.display(), "Outputs saved");

    Ok(path.to_path_buf())
}
