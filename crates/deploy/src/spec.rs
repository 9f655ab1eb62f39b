//! Environment specification document.
//!
//! A specification is a YAML document whose root key is the environment name:
//!
//! ```yaml
//! my-env:
//!   tags: {team: data}
//!   sns-topic-arn: []
//!   layers:
//!     - layer: secrets-vault
//!     - layer: streams
//!       depends_on: [secrets-vault]
//!       shard_count: 2
//! ```

use std::{collections::BTreeMap, path::Path};

use anyhow::Result;
use serde::{Deserialize, Deserializer, de::Error as _};

use crate::DeployError;

/// The body of an environment specification, below the environment-name root key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvironmentSpec {
    /// Free-form tags attached to every stack of the environment.
    ///
    /// Numbers and booleans are stringified; nested values are rejected.
    #[serde(default, deserialize_with = "scalar_tags")]
    pub tags: BTreeMap<String, String>,
    /// SNS topics notified of stack events.
    #[serde(default, rename = "sns-topic-arn")]
    pub sns_topic_arn: Vec<String>,
    /// Layer entries, in declaration order.
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
}

/// One entry of the `layers` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LayerEntry {
    /// The logical layer name. Required, but kept optional here so that a missing
    /// name is reported as a format error rather than a generic parse error.
    pub layer: Option<String>,
    /// Skip this layer entirely.
    #[serde(default)]
    pub disable: bool,
    /// Names of the layers this layer depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Every other key, forwarded verbatim to the layer.
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

fn scalar_tags<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(D::Error::custom(format!(
                        "tag '{key}' must be a string, number or boolean"
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

impl EnvironmentSpec {
    /// Parse the specification of environment `name` from a YAML document.
    ///
    /// `path` is only used for error reporting.
    pub fn parse(name: &str, path: &Path, content: &str) -> Result<Self> {
        let root: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
            DeployError::config_format(path, format!("not a valid YAML document: {e}"))
        })?;

        let body = match root.get(name) {
            None | Some(serde_yaml::Value::Null) => {
                return Err(DeployError::config_format(
                    path,
                    format!("missing root key '{name}'"),
                )
                .into());
            }
            Some(serde_yaml::Value::Mapping(m)) if m.is_empty() => {
                return Err(
                    DeployError::config_format(path, format!("root key '{name}' is empty")).into(),
                );
            }
            Some(body) => body.clone(),
        };

        let spec: Self = serde_yaml::from_value(body)
            .map_err(|e| DeployError::config_format(path, e.to_string()))?;

        if let Some(entry) = spec.layers.iter().find(|entry| entry.layer.is_none()) {
            return Err(DeployError::config_format(
                path,
                format!("wrongly formatted layer, no 'layer' name: {:?}", entry.params),
            )
            .into());
        }

        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
demo:
  tags:
    team: data
  sns-topic-arn:
    - arn:aws:sns:eu-west-1:123456789012:alerts
  layers:
    - layer: secrets-vault
    - layer: streams
      depends_on: [secrets-vault]
      shard_count: 2
    - layer: legacy
      disable: true
"#;

    fn parse(content: &str) -> Result<EnvironmentSpec> {
        EnvironmentSpec::parse("demo", Path::new("demo.yml"), content)
    }

    #[test]
    fn test_parse_full_document() {
        let spec = parse(SPEC).unwrap();

        assert_eq!(spec.tags.get("team").map(String::as_str), Some("data"));
        assert_eq!(spec.sns_topic_arn.len(), 1);
        assert_eq!(spec.layers.len(), 3);
        assert_eq!(spec.layers[1].layer.as_deref(), Some("streams"));
        assert_eq!(spec.layers[1].depends_on, vec!["secrets-vault".to_string()]);
        assert!(spec.layers[2].disable);
        assert!(!spec.layers[0].disable);
    }

    #[test]
    fn test_pass_through_params_are_kept() {
        let spec = parse(SPEC).unwrap();
        let params = &spec.layers[1].params;

        assert_eq!(params.get("shard_count").and_then(|v| v.as_u64()), Some(2));
        // Reserved keys are not duplicated into the pass-through map.
        assert!(!params.contains_key("layer"));
        assert!(!params.contains_key("depends_on"));
    }

    #[test]
    fn test_missing_root_key() {
        let err = parse("other:\n  layers: []\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ConfigFormat { .. })
        ));
    }

    #[test]
    fn test_empty_root_key() {
        for content in ["demo:\n", "demo: {}\n"] {
            let err = parse(content).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DeployError>(),
                Some(DeployError::ConfigFormat { .. })
            ));
        }
    }

    #[test]
    fn test_layer_without_name() {
        let err = parse("demo:\n  layers:\n    - depends_on: [a]\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("wrongly formatted layer"), "{msg}");
    }

    #[test]
    fn test_defaults_when_sections_are_missing() {
        let spec = parse("demo:\n  layers:\n    - layer: a\n").unwrap();
        assert!(spec.tags.is_empty());
        assert!(spec.sns_topic_arn.is_empty());
        assert!(spec.layers[0].depends_on.is_empty());
    }

    #[test]
    fn test_scalar_tags_are_stringified() {
        let spec = parse(
            "demo:\n  tags:\n    cost-center: 1234\n    billable: true\n    team: data\n  layers: []\n",
        )
        .unwrap();

        assert_eq!(spec.tags.get("cost-center").map(String::as_str), Some("1234"));
        assert_eq!(spec.tags.get("billable").map(String::as_str), Some("true"));
        assert_eq!(spec.tags.get("team").map(String::as_str), Some("data"));
    }

    #[test]
    fn test_nested_tag_is_rejected() {
        let err = parse("demo:\n  tags:\n    owner: {name: ops}\n  layers: []\n").unwrap_err();

        match err.downcast_ref::<DeployError>() {
            Some(DeployError::ConfigFormat { reason, .. }) => {
                assert!(reason.contains("tag 'owner'"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
