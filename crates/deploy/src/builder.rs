//! Builder for constructing an [`Environment`] from its specification file.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::{
    DeployError, DeployOrder, Environment, EnvironmentSpec, Layer, LayerContext, LayerEntry,
    LayerGraph, environment::DEFAULT_VAULT_LAYER, layer::PROVENANCE_TAG,
};

/// Builder for an [`Environment`].
///
/// # Example
///
/// ```rust,no_run
/// use layercake_deploy::EnvironmentBuilder;
///
/// # fn example() -> anyhow::Result<()> {
/// let environment = EnvironmentBuilder::new("envs/demo.yml")
///     .stage("dev")
///     .build()?;
/// assert_eq!(environment.name, "demo");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    spec_path: PathBuf,
    stage: Option<String>,
    vault_layer: Option<String>,
    order: DeployOrder,
}

impl EnvironmentBuilder {
    /// Create a builder for the specification at `spec_path`.
    ///
    /// The environment is named after the file stem: `envs/demo.yml` yields `demo`.
    pub fn new(spec_path: impl Into<PathBuf>) -> Self {
        Self {
            spec_path: spec_path.into(),
            stage: None,
            vault_layer: None,
            order: DeployOrder::default(),
        }
    }

    /// Set the stage qualifier. It is uppercased; an empty stage means no stage.
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Use `layer` as the vault layer instead of `secrets-vault`.
    pub fn vault_layer(mut self, layer: impl Into<String>) -> Self {
        self.vault_layer = Some(layer.into());
        self
    }

    /// Set how layers are sequenced on create and delete.
    pub fn order(mut self, order: DeployOrder) -> Self {
        self.order = order;
        self
    }

    /// Read the specification file and build the [`Environment`].
    pub fn build(&self) -> Result<Environment> {
        let content = std::fs::read_to_string(&self.spec_path).context(format!(
            "Failed to read environment specification {}",
            self.spec_path.display()
        ))?;
        self.build_from_yaml(&content)
    }

    /// Build the [`Environment`] from a specification document already in memory.
    pub fn build_from_yaml(&self, content: &str) -> Result<Environment> {
        let name = self
            .spec_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                DeployError::config_format(&self.spec_path, "cannot derive an environment name")
            })?;

        let basedir = match self.spec_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let stage = self
            .stage
            .as_deref()
            .map(str::trim)
            .filter(|stage| !stage.is_empty())
            .map(str::to_uppercase);

        let spec = EnvironmentSpec::parse(&name, &self.spec_path, content)?;

        let mut tags = spec.tags;
        tags.insert(PROVENANCE_TAG.to_string(), name.clone());

        let layers = build_layers(
            &LayerContext {
                environment: &name,
                stage: stage.as_deref(),
                basedir: &basedir,
                tags: &tags,
                sns_topic_arn: &spec.sns_topic_arn,
            },
            spec.layers,
        );

        let vault_name = self.vault_layer.as_deref().unwrap_or(DEFAULT_VAULT_LAYER);
        let vault_layer = layers.iter().position(|layer| layer.matches(vault_name));
        if vault_layer.is_none() {
            tracing::debug!(environment = %name, vault_layer = vault_name, "No vault layer");
        }

        let secrets_table = match stage.as_deref() {
            Some(stage) => format!("secrets_{name}_{stage}"),
            None => format!("secrets_{name}"),
        };

        tracing::info!(
            environment = %name,
            stage = ?stage,
            layers = layers.len(),
            spec = %self.spec_path.display(),
            "Loaded environment"
        );

        Ok(Environment {
            graph: LayerGraph::with_nodes(layers.len()),
            spec_path: self.spec_path.clone(),
            name,
            stage,
            basedir,
            tags,
            sns_topic_arn: spec.sns_topic_arn,
            order: self.order,
            layers,
            vault_layer,
            secrets_table,
        })
    }
}

fn build_layers(ctx: &LayerContext<'_>, entries: Vec<LayerEntry>) -> Vec<Layer> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.layer?;
            if entry.disable {
                tracing::warn!(
                    environment = ctx.environment,
                    layer = %name,
                    "Layer is disabled, skipping"
                );
                return None;
            }
            Some(Layer::new(ctx, name, entry.depends_on, entry.params))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
demo:
  tags:
    team: data
    layercake:environment: spoofed
  layers:
    - layer: secrets-vault
    - layer: streams
      depends_on: [secrets-vault]
    - layer: legacy
      disable: true
    - layer: api
      depends_on: [streams]
"#;

    #[test]
    fn test_builder_defaults() {
        let builder = EnvironmentBuilder::new("envs/demo.yml");
        assert_eq!(builder.spec_path, PathBuf::from("envs/demo.yml"));
        assert!(builder.stage.is_none());
        assert!(builder.vault_layer.is_none());
        assert_eq!(builder.order, DeployOrder::Dependency);
    }

    #[test]
    fn test_build_skips_disabled_layers() {
        let env = EnvironmentBuilder::new("envs/demo.yml")
            .build_from_yaml(SPEC)
            .unwrap();

        assert_eq!(env.name, "demo");
        assert_eq!(env.basedir, PathBuf::from("envs"));
        let names: Vec<_> = env.layers().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["secrets-vault", "streams", "api"]);
    }

    #[test]
    fn test_stage_is_uppercased() {
        let env = EnvironmentBuilder::new("demo.yml")
            .stage("dev")
            .build_from_yaml(SPEC)
            .unwrap();

        assert_eq!(env.stage.as_deref(), Some("DEV"));
        assert_eq!(env.basedir, PathBuf::from("."));
        assert_eq!(env.secrets_table(), "secrets_demo_DEV");
        assert_eq!(env.layers()[1].cf_name, "demo-streams-DEV");
    }

    #[test]
    fn test_empty_stage_means_no_stage() {
        let env = EnvironmentBuilder::new("demo.yml")
            .stage("")
            .build_from_yaml(SPEC)
            .unwrap();

        assert!(env.stage.is_none());
        assert_eq!(env.secrets_table(), "secrets_demo");
        assert_eq!(env.layers()[1].cf_name, "demo-streams");
    }

    #[test]
    fn test_provenance_tag_wins() {
        let env = EnvironmentBuilder::new("demo.yml")
            .build_from_yaml(SPEC)
            .unwrap();

        assert_eq!(env.tags.get(PROVENANCE_TAG).map(String::as_str), Some("demo"));
        assert_eq!(env.tags.get("team").map(String::as_str), Some("data"));
    }

    #[test]
    fn test_vault_layer_resolution() {
        let env = EnvironmentBuilder::new("demo.yml")
            .build_from_yaml(SPEC)
            .unwrap();
        assert_eq!(env.vault_layer().map(|l| l.name.as_str()), Some("secrets-vault"));

        let env = EnvironmentBuilder::new("demo.yml")
            .vault_layer("demo-streams")
            .build_from_yaml(SPEC)
            .unwrap();
        assert_eq!(env.vault_layer().map(|l| l.name.as_str()), Some("streams"));

        let env = EnvironmentBuilder::new("demo.yml")
            .vault_layer("nowhere")
            .build_from_yaml(SPEC)
            .unwrap();
        assert!(env.vault_layer().is_none());
    }

    #[test]
    fn test_missing_root_key() {
        let err = EnvironmentBuilder::new("other.yml")
            .build_from_yaml(SPEC)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ConfigFormat { .. })
        ));
    }
}
