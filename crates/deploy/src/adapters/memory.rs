//! In-process backend that keeps stacks, keys and secrets in memory.
//!
//! Every adapter call is recorded, so tests can assert on the exact sequence of remote
//! operations an environment performs.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};

use super::{
    Backend, CryptoService, SecretStore, StackDescription, StackRequest, StackService,
    StackSummary,
};
use crate::StackOutputs;

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListStacks,
    DescribeStack(String),
    CreateStack(String),
    UpdateStack(String),
    DeleteStack(String),
    Encrypt { key_id: String },
    Decrypt,
    Put { table: String, id: String },
    Get { table: String, id: String },
}

#[derive(Debug, Clone)]
struct MemoryStack {
    tags: BTreeMap<String, String>,
    outputs: StackOutputs,
    request: Option<StackRequest>,
}

#[derive(Debug, Default)]
struct MemoryState {
    stacks: BTreeMap<String, MemoryStack>,
    /// Outputs a stack exposes once it gets created.
    planned_outputs: BTreeMap<String, StackOutputs>,
    failing: BTreeSet<String>,
    items: BTreeMap<(String, String), Vec<u8>>,
    calls: Vec<Call>,
}

/// In-memory implementation of all three adapters.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs that `stack_name` will expose once created.
    pub fn with_outputs(self, stack_name: impl Into<String>, outputs: StackOutputs) -> Self {
        self.state()
            .planned_outputs
            .insert(stack_name.into(), outputs);
        self
    }

    /// Register a stack that is already deployed.
    pub fn with_stack(
        self,
        stack_name: impl Into<String>,
        tags: BTreeMap<String, String>,
        outputs: StackOutputs,
    ) -> Self {
        self.state().stacks.insert(
            stack_name.into(),
            MemoryStack {
                tags,
                outputs,
                request: None,
            },
        );
        self
    }

    /// Make every create, update or delete of `stack_name` fail.
    pub fn failing_on(self, stack_name: impl Into<String>) -> Self {
        self.state().failing.insert(stack_name.into());
        self
    }

    /// Calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Names of the stacks currently deployed.
    pub fn stack_names(&self) -> Vec<String> {
        self.state().stacks.keys().cloned().collect()
    }

    /// The last request used to create or update `stack_name`.
    pub fn stack_request(&self, stack_name: &str) -> Option<StackRequest> {
        self.state()
            .stacks
            .get(stack_name)
            .and_then(|stack| stack.request.clone())
    }

    /// Raw value stored under `id` in `table`.
    pub fn item(&self, table: &str, id: &str) -> Option<Vec<u8>> {
        self.state()
            .items
            .get(&(table.to_string(), id.to_string()))
            .cloned()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn check_failure(&self, stack_name: &str) -> Result<()> {
        if self.failing.contains(stack_name) {
            anyhow::bail!("Simulated failure for stack {}", stack_name);
        }
        Ok(())
    }
}

impl StackService for MemoryBackend {
    async fn list_stacks(&self) -> Result<Vec<StackSummary>> {
        let mut state = self.state();
        state.calls.push(Call::ListStacks);

        Ok(state
            .stacks
            .iter()
            .map(|(name, stack)| StackSummary {
                stack_name: name.clone(),
                tags: stack.tags.clone(),
            })
            .collect())
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let mut state = self.state();
        state.calls.push(Call::DescribeStack(stack_name.to_string()));

        Ok(state
            .stacks
            .get(stack_name)
            .map(|stack| StackDescription {
                stack_name: stack_name.to_string(),
                status: "CREATE_COMPLETE".to_string(),
                outputs: stack.outputs.clone(),
            }))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .push(Call::CreateStack(request.stack_name.clone()));
        state.check_failure(&request.stack_name)?;

        if state.stacks.contains_key(&request.stack_name) {
            anyhow::bail!("Stack {} already exists", request.stack_name);
        }

        let outputs = state
            .planned_outputs
            .get(&request.stack_name)
            .cloned()
            .unwrap_or_default();
        state.stacks.insert(
            request.stack_name.clone(),
            MemoryStack {
                tags: request.tags.clone(),
                outputs,
                request: Some(request.clone()),
            },
        );

        Ok(())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .push(Call::UpdateStack(request.stack_name.clone()));
        state.check_failure(&request.stack_name)?;

        let stack = state
            .stacks
            .get_mut(&request.stack_name)
            .with_context(|| format!("Stack {} does not exist", request.stack_name))?;
        stack.tags = request.tags.clone();
        stack.request = Some(request.clone());

        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::DeleteStack(stack_name.to_string()));
        state.check_failure(stack_name)?;

        state.stacks.remove(stack_name);
        Ok(())
    }
}

impl CryptoService for MemoryBackend {
    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.state().calls.push(Call::Encrypt {
            key_id: key_id.to_string(),
        });

        let envelope = format!("{}.{}", STANDARD.encode(key_id), STANDARD.encode(plaintext));
        Ok(envelope.into_bytes())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.state().calls.push(Call::Decrypt);

        let envelope = std::str::from_utf8(ciphertext).context("Ciphertext is not an envelope")?;
        let (_, payload) = envelope
            .split_once('.')
            .context("Ciphertext is not an envelope")?;
        STANDARD
            .decode(payload)
            .context("Failed to decode ciphertext payload")
    }
}

impl SecretStore for MemoryBackend {
    async fn put(&self, table: &str, id: &str, value: &[u8]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Put {
            table: table.to_string(),
            id: id.to_string(),
        });
        state
            .items
            .insert((table.to_string(), id.to_string()), value.to_vec());
        Ok(())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state();
        state.calls.push(Call::Get {
            table: table.to_string(),
            id: id.to_string(),
        });
        Ok(state
            .items
            .get(&(table.to_string(), id.to_string()))
            .cloned())
    }
}

impl Backend for MemoryBackend {
    type Stacks = Self;
    type Crypto = Self;
    type Store = Self;

    fn stacks(&self) -> &Self {
        self
    }

    fn crypto(&self) -> &Self {
        self
    }

    fn store(&self) -> &Self {
        self
    }
}
