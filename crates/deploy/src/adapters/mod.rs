//! Interfaces to the external services the orchestrator drives.
//!
//! - [`StackService`]: create, update, delete and inspect named stacks.
//! - [`CryptoService`]: encrypt and decrypt secret values.
//! - [`SecretStore`]: binary values by id, scoped to a table.
//!
//! A [`Backend`] bundles one implementation of each and is the single context object
//! handed to the [`Environment`](crate::Environment) operations.

mod aws;
mod memory;

pub use aws::{AwsBackend, CloudFormationStacks, DynamoSecretStore, KmsCrypto};
pub use memory::{Call, MemoryBackend};

use std::{collections::BTreeMap, future::Future};

use anyhow::Result;

use crate::StackOutputs;

/// Everything needed to create or update a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub notification_arns: Vec<String>,
}

/// A deployed stack as reported by a stack listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSummary {
    pub stack_name: String,
    pub tags: BTreeMap<String, String>,
}

/// Current state of a single stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_name: String,
    /// Provider status string, e.g. `CREATE_COMPLETE`.
    pub status: String,
    pub outputs: StackOutputs,
}

impl StackDescription {
    /// Whether an operation is still running on the stack.
    pub fn is_in_progress(&self) -> bool {
        self.status.ends_with("_IN_PROGRESS")
    }

    /// Whether the last operation on the stack failed or was rolled back.
    pub fn is_failed(&self) -> bool {
        self.status.ends_with("_FAILED") || self.status.contains("ROLLBACK")
    }
}

/// Stack provisioning service.
pub trait StackService: Send + Sync {
    /// List every stack visible to the caller, with its tags.
    fn list_stacks(&self) -> impl Future<Output = Result<Vec<StackSummary>>> + Send;

    /// Describe a stack. `None` if it does not exist.
    fn describe_stack(
        &self,
        stack_name: &str,
    ) -> impl Future<Output = Result<Option<StackDescription>>> + Send;

    /// Create a stack and wait for the creation to settle.
    fn create_stack(&self, request: &StackRequest) -> impl Future<Output = Result<()>> + Send;

    /// Update an existing stack and wait for the update to settle.
    fn update_stack(&self, request: &StackRequest) -> impl Future<Output = Result<()>> + Send;

    /// Delete a stack and wait for the deletion to settle.
    fn delete_stack(&self, stack_name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Key management service.
pub trait CryptoService: Send + Sync {
    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn decrypt(&self, ciphertext: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Key-value store holding encrypted secrets.
pub trait SecretStore: Send + Sync {
    fn put(&self, table: &str, id: &str, value: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// `None` if no item is stored under `id`.
    fn get(&self, table: &str, id: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

/// One implementation of each adapter.
pub trait Backend: Send + Sync {
    type Stacks: StackService;
    type Crypto: CryptoService;
    type Store: SecretStore;

    fn stacks(&self) -> &Self::Stacks;
    fn crypto(&self) -> &Self::Crypto;
    fn store(&self) -> &Self::Store;
}
