//! A single deployable layer, backed by one remote stack.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{
    DeployError, StackOutputs,
    adapters::{StackRequest, StackService},
};

/// Tag identifying the environment that created a stack.
pub const PROVENANCE_TAG: &str = "layercake:environment";
/// Tag holding the logical layer name.
pub const LAYER_TAG: &str = "layercake:layer";
/// Tag holding the environment stage.
pub const STAGE_TAG: &str = "layercake:stage";
/// Tag listing the layers a stack depends on, comma-separated.
pub const DEPENDS_ON_TAG: &str = "layercake:depends-on";

/// Template file names looked up in a layer directory, in order.
const TEMPLATE_FILES: &[&str] = &["template.yaml", "template.yml", "template.json"];

/// Environment-wide values a layer is built from.
pub struct LayerContext<'a> {
    pub environment: &'a str,
    pub stage: Option<&'a str>,
    pub basedir: &'a Path,
    pub tags: &'a BTreeMap<String, String>,
    pub sns_topic_arn: &'a [String],
}

/// One deployable unit of an environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Logical name, as written in the specification.
    pub name: String,
    /// Name of the underlying stack: `<environment>-<layer>[-<STAGE>]`.
    pub cf_name: String,
    /// Declared parent layer names.
    pub depends_on: Vec<String>,
    /// Pass-through parameters from the specification.
    pub params: BTreeMap<String, serde_yaml::Value>,
    /// Tags attached to the stack (environment tags plus layer tags).
    pub tags: BTreeMap<String, String>,
    /// SNS topics notified of stack events.
    pub notification_arns: Vec<String>,
    /// Directory holding the layer template.
    pub layer_dir: PathBuf,
    outputs: Option<StackOutputs>,
}

impl Layer {
    pub fn new(
        ctx: &LayerContext<'_>,
        name: impl Into<String>,
        depends_on: Vec<String>,
        params: BTreeMap<String, serde_yaml::Value>,
    ) -> Self {
        let name = name.into();
        let cf_name = match ctx.stage {
            Some(stage) => format!("{}-{}-{}", ctx.environment, name, stage),
            None => format!("{}-{}", ctx.environment, name),
        };

        let mut tags = ctx.tags.clone();
        tags.insert(PROVENANCE_TAG.to_string(), ctx.environment.to_string());
        tags.insert(LAYER_TAG.to_string(), name.clone());
        if let Some(stage) = ctx.stage {
            tags.insert(STAGE_TAG.to_string(), stage.to_string());
        }

        Self {
            layer_dir: ctx.basedir.join("layers").join(&name),
            name,
            cf_name,
            depends_on,
            params,
            tags,
            notification_arns: ctx.sns_topic_arn.to_vec(),
            outputs: None,
        }
    }

    /// Outputs of the provisioned stack. `None` until provisioned, and for empty outputs.
    pub fn outputs(&self) -> Option<&StackOutputs> {
        self.outputs.as_ref().filter(|outputs| !outputs.is_empty())
    }

    pub fn set_outputs(&mut self, outputs: Option<StackOutputs>) {
        self.outputs = outputs;
    }

    /// Whether `identifier` names this layer, by logical or stack name.
    pub fn matches(&self, identifier: &str) -> bool {
        self.name == identifier || self.cf_name == identifier
    }

    /// Scalar pass-through parameters, stringified for the stack service.
    ///
    /// Sequences and mappings have no stack parameter equivalent and are skipped.
    pub fn stack_parameters(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        tracing::debug!(layer = %self.name, param = %key, value = ?other, "Skipping non-scalar parameter");
                        return None;
                    }
                };
                Some((key.clone(), value))
            })
            .collect()
    }

    /// Path of the stack template inside the layer directory.
    pub fn template_path(&self) -> Result<PathBuf> {
        TEMPLATE_FILES
            .iter()
            .map(|file| self.layer_dir.join(file))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                DeployError::MissingTemplate {
                    layer: self.name.clone(),
                    dir: self.layer_dir.clone(),
                }
                .into()
            })
    }

    /// Build the stack request for this layer; `parents` are the resolved parent names.
    pub async fn stack_request(&self, parents: &[String]) -> Result<StackRequest> {
        let template_path = self.template_path()?;
        let template_body = tokio::fs::read_to_string(&template_path)
            .await
            .context(format!("Failed to read template {}", template_path.display()))?;

        let mut tags = self.tags.clone();
        if !parents.is_empty() {
            tags.insert(DEPENDS_ON_TAG.to_string(), parents.join(","));
        }

        Ok(StackRequest {
            stack_name: self.cf_name.clone(),
            template_body,
            parameters: self.stack_parameters(),
            tags,
            notification_arns: self.notification_arns.clone(),
        })
    }

    /// Create the layer's stack, or update it if it exists and `update` is set.
    ///
    /// An existing stack is left untouched when `update` is not set. The layer's outputs
    /// are refreshed afterwards in every case.
    pub async fn create<S: StackService>(
        &mut self,
        stacks: &S,
        parents: &[String],
        update: bool,
    ) -> Result<()> {
        let existing = stacks.describe_stack(&self.cf_name).await?;

        match existing {
            Some(_) if update => {
                tracing::info!(layer = %self.name, stack = %self.cf_name, "Updating layer");
                let request = self.stack_request(parents).await?;
                stacks.update_stack(&request).await?;
            }
            Some(_) => {
                tracing::info!(
                    layer = %self.name,
                    stack = %self.cf_name,
                    "Layer already deployed, skipping"
                );
            }
            None => {
                tracing::info!(layer = %self.name, stack = %self.cf_name, "Creating layer");
                let request = self.stack_request(parents).await?;
                stacks.create_stack(&request).await?;
            }
        }

        self.refresh_outputs(stacks).await
    }

    /// Delete the layer's stack if it exists.
    pub async fn delete<S: StackService>(&mut self, stacks: &S) -> Result<()> {
        if stacks.describe_stack(&self.cf_name).await?.is_none() {
            tracing::info!(layer = %self.name, stack = %self.cf_name, "Layer not deployed, nothing to delete");
        } else {
            tracing::info!(layer = %self.name, stack = %self.cf_name, "Deleting layer");
            stacks.delete_stack(&self.cf_name).await?;
        }

        self.outputs = None;
        Ok(())
    }

    /// Re-read the layer's outputs from the stack service.
    pub async fn refresh_outputs<S: StackService>(&mut self, stacks: &S) -> Result<()> {
        self.outputs = stacks
            .describe_stack(&self.cf_name)
            .await?
            .map(|stack| stack.outputs);
        Ok(())
    }
}
