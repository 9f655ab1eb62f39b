//! The environment orchestrator.
//!
//! An [`Environment`] owns the layers declared in a specification, links them into a
//! [`LayerGraph`], drives their creation and deletion through a [`Backend`], aggregates
//! their outputs and implements the secret vault on top of the vault layer.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    DeployError, Layer, LayerGraph, StackOutputs,
    adapters::{Backend, CryptoService, SecretStore, StackService},
    graph::Cycle,
    layer::PROVENANCE_TAG,
    outputs,
};

/// Name of the vault layer when none is configured.
pub const DEFAULT_VAULT_LAYER: &str = "secrets-vault";

/// Output of the vault layer holding the KMS key id.
pub const KMS_KEY_OUTPUT: &str = "KmsKeyId";

/// How layers are sequenced on create and delete.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeployOrder {
    /// Parents before children, derived from the dependency graph. Ties keep the
    /// declaration order, so a correctly declared specification deploys as written.
    #[default]
    Dependency,
    /// Exactly the declaration order, trusted as given.
    Declaration,
}

/// A named collection of layers deployed together.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Environment name, derived from the specification file name.
    pub name: String,
    /// Optional stage qualifier, uppercased.
    pub stage: Option<String>,
    /// Directory holding the specification file.
    pub basedir: PathBuf,
    /// Environment tags, including the provenance tag.
    pub tags: BTreeMap<String, String>,
    /// SNS topics notified of stack events.
    pub sns_topic_arn: Vec<String>,
    /// Sequencing policy for create and delete.
    pub order: DeployOrder,
    pub(crate) spec_path: PathBuf,
    pub(crate) layers: Vec<Layer>,
    pub(crate) graph: LayerGraph,
    pub(crate) vault_layer: Option<usize>,
    pub(crate) secrets_table: String,
}

impl Environment {
    /// Layers in declaration order, disabled layers excluded.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// First layer whose logical name or stack name is `identifier`.
    ///
    /// Names are not checked for uniqueness: when several layers match, the first one
    /// declared wins.
    pub fn get_layer(&self, identifier: &str) -> Option<&Layer> {
        self.layer_index(identifier).map(|idx| &self.layers[idx])
    }

    pub(crate) fn layer_index(&self, identifier: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.matches(identifier))
    }

    /// The designated vault layer, if the specification declares one.
    pub fn vault_layer(&self) -> Option<&Layer> {
        self.vault_layer.map(|idx| &self.layers[idx])
    }

    /// Table holding this environment's secrets.
    pub fn secrets_table(&self) -> &str {
        &self.secrets_table
    }

    /// Path of the specification this environment was built from.
    pub fn spec_path(&self) -> &Path {
        &self.spec_path
    }

    /// Link every layer to the parents it declares.
    ///
    /// Safe to call repeatedly: an already known dependency is not registered twice.
    pub fn populate_hierarchy(&mut self) -> Result<()> {
        for child in 0..self.layers.len() {
            for parent_name in &self.layers[child].depends_on {
                let parent = self.layer_index(parent_name).ok_or_else(|| {
                    DeployError::config_format(
                        &self.spec_path,
                        format!(
                            "layer '{}' depends on unknown layer '{}'",
                            self.layers[child].name, parent_name
                        ),
                    )
                })?;

                if self.graph.link(parent, child) {
                    tracing::debug!(
                        parent = %self.layers[parent].name,
                        child = %self.layers[child].name,
                        "Linked layers"
                    );
                }
            }
        }

        Ok(())
    }

    /// Layers depending on `identifier`.
    pub fn children(&self, identifier: &str) -> Vec<&Layer> {
        self.layer_index(identifier)
            .map(|idx| self.graph.children(idx).map(|c| &self.layers[c]).collect())
            .unwrap_or_default()
    }

    /// Layers `identifier` depends on.
    pub fn parents(&self, identifier: &str) -> Vec<&Layer> {
        self.layer_index(identifier)
            .map(|idx| self.graph.parents(idx).map(|p| &self.layers[p]).collect())
            .unwrap_or_default()
    }

    /// Layer indices in creation order. Deletion uses the reverse.
    pub fn deployment_order(&self) -> Result<Vec<usize>> {
        match self.order {
            DeployOrder::Declaration => Ok((0..self.layers.len()).collect()),
            DeployOrder::Dependency => self.graph.topological_order().map_err(|Cycle(nodes)| {
                DeployError::CircularDependency {
                    layers: nodes
                        .into_iter()
                        .map(|idx| self.layers[idx].name.clone())
                        .collect(),
                }
                .into()
            }),
        }
    }

    /// Stack names in creation order, without contacting any service.
    pub fn plan(&mut self) -> Result<Vec<String>> {
        self.populate_hierarchy()?;
        Ok(self
            .deployment_order()?
            .into_iter()
            .map(|idx| self.layers[idx].cf_name.clone())
            .collect())
    }

    fn parent_names(&self, idx: usize) -> Vec<String> {
        self.graph
            .parents(idx)
            .map(|p| self.layers[p].name.clone())
            .collect()
    }

    /// Create (or update) every layer, then optionally write the outputs file.
    ///
    /// Layers are processed one at a time. The first failure aborts the sequence and
    /// leaves the layers already processed in place.
    pub async fn create<B: Backend>(
        &mut self,
        backend: &B,
        update: bool,
        output_file: Option<&Path>,
    ) -> Result<()> {
        self.populate_hierarchy()?;
        let order = self.deployment_order()?;

        tracing::info!(
            environment = %self.name,
            stage = ?self.stage,
            layers = order.len(),
            update,
            "Creating environment"
        );

        for idx in order {
            let parents = self.parent_names(idx);
            self.layers[idx]
                .create(backend.stacks(), &parents, update)
                .await?;
        }

        tracing::info!(outputs = ?self.outputs(), "Environment outputs");

        if let Some(path) = output_file {
            self.write_outputs(Some(path))?;
        }

        Ok(())
    }

    /// Delete every layer, children before parents.
    pub async fn delete<B: Backend>(&mut self, backend: &B) -> Result<()> {
        self.populate_hierarchy()?;
        let order = self.deployment_order()?;

        tracing::info!(environment = %self.name, stage = ?self.stage, "Deleting environment");

        for idx in order.into_iter().rev() {
            self.layers[idx].delete(backend.stacks()).await?;
        }

        Ok(())
    }

    /// Outputs of every provisioned layer, keyed by layer name.
    ///
    /// Layers without outputs (not deployed yet, deleted, or simply exposing none) are
    /// left out.
    pub fn outputs(&self) -> BTreeMap<String, StackOutputs> {
        self.layers
            .iter()
            .filter_map(|layer| {
                layer
                    .outputs()
                    .map(|outputs| (layer.name.clone(), outputs.clone()))
            })
            .collect()
    }

    /// Re-read the outputs of every layer from the stack service.
    pub async fn refresh_outputs<B: Backend>(&mut self, backend: &B) -> Result<()> {
        for layer in &mut self.layers {
            layer.refresh_outputs(backend.stacks()).await?;
        }
        Ok(())
    }

    /// Default outputs file name: `<name>[-<STAGE>].outputs.yaml`.
    pub fn default_outputs_path(&self) -> PathBuf {
        match self.stage.as_deref() {
            Some(stage) if !stage.is_empty() => {
                PathBuf::from(format!("{}-{}.outputs.yaml", self.name, stage))
            }
            _ => PathBuf::from(format!("{}.outputs.yaml", self.name)),
        }
    }

    /// Write the aggregated outputs to `path`, or to the default outputs file.
    pub fn write_outputs(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_outputs_path());
        outputs::write_outputs_file(&path, &self.outputs())
    }

    fn require_vault(&self) -> Result<&Layer> {
        self.vault_layer().ok_or_else(|| {
            DeployError::VaultRequired {
                environment: self.name.clone(),
            }
            .into()
        })
    }

    /// The id of the KMS key exposed by the vault layer.
    ///
    /// Uses the outputs already known for the vault layer, and asks the stack service
    /// otherwise.
    pub async fn kms_key_id<B: Backend>(&self, backend: &B) -> Result<String> {
        let vault = self.require_vault()?;

        let outputs = match vault.outputs() {
            Some(outputs) => Some(outputs.clone()),
            None => backend
                .stacks()
                .describe_stack(&vault.cf_name)
                .await?
                .map(|stack| stack.outputs),
        };

        outputs
            .and_then(|outputs| outputs.get(KMS_KEY_OUTPUT).cloned())
            .ok_or_else(|| {
                DeployError::MissingOutput {
                    layer: vault.name.clone(),
                    key: KMS_KEY_OUTPUT.to_string(),
                }
                .into()
            })
    }

    /// Encrypt `plaintext` with the vault key and store it under `key`.
    pub async fn set_secret<B: Backend>(
        &self,
        backend: &B,
        key: &str,
        plaintext: &str,
    ) -> Result<()> {
        self.require_vault()?;

        let key_id = self.kms_key_id(backend).await?;
        let ciphertext = backend
            .crypto()
            .encrypt(&key_id, plaintext.as_bytes())
            .await?;
        backend
            .store()
            .put(&self.secrets_table, key, &ciphertext)
            .await?;

        tracing::info!(
            environment = %self.name,
            table = %self.secrets_table,
            key,
            "Secret stored"
        );
        Ok(())
    }

    /// Read and decrypt the secret stored under `key`.
    pub async fn get_secret<B: Backend>(&self, backend: &B, key: &str) -> Result<String> {
        self.require_vault()?;

        let ciphertext = backend
            .store()
            .get(&self.secrets_table, key)
            .await?
            .ok_or_else(|| DeployError::SecretNotFound {
                table: self.secrets_table.clone(),
                key: key.to_string(),
            })?;
        let plaintext = backend.crypto().decrypt(&ciphertext).await?;

        String::from_utf8(plaintext).context(format!("Secret '{key}' is not valid UTF-8 text"))
    }

    /// Whether any deployed stack carries this environment's provenance tag.
    pub async fn in_cf<B: Backend>(&self, backend: &B) -> Result<bool> {
        let stacks = backend.stacks().list_stacks().await?;
        Ok(stacks
            .iter()
            .filter_map(|stack| stack.tags.get(PROVENANCE_TAG))
            .any(|name| *name == self.name))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment('{}')", self.spec_path.display())
    }
}
