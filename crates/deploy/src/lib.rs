//! layercake-deploy - Layered cloud environment orchestration.
//!
//! An environment is described by a YAML specification listing layers, each backed by
//! one CloudFormation stack. This crate builds the layer dependency graph, creates and
//! deletes the stacks in dependency order, aggregates their outputs and stores secrets
//! encrypted with the key exposed by the environment's vault layer.

pub mod adapters;
mod builder;
mod config;
mod environment;
mod error;
pub mod graph;
pub mod layer;
mod outputs;
pub mod poll;
pub mod spec;

pub use adapters::{
    AwsBackend, Backend, Call, CryptoService, MemoryBackend, SecretStore, StackDescription,
    StackRequest, StackService, StackSummary,
};
pub use builder::EnvironmentBuilder;
pub use config::{CloudConfig, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_STACK_TIMEOUT_SECS};
pub use environment::{DEFAULT_VAULT_LAYER, DeployOrder, Environment, KMS_KEY_OUTPUT};
pub use error::DeployError;
pub use graph::LayerGraph;
pub use layer::{DEPENDS_ON_TAG, LAYER_TAG, Layer, LayerContext, PROVENANCE_TAG, STAGE_TAG};
pub use outputs::{StackOutputs, write_outputs_file};
pub use spec::{EnvironmentSpec, LayerEntry};
