//! AWS implementations of the adapters: CloudFormation, KMS and DynamoDB.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudformation::{
    error::ProvideErrorMetadata,
    types::{Capability, Parameter, Stack, Tag},
};
use aws_sdk_dynamodb::{primitives::Blob as DynamoBlob, types::AttributeValue};
use aws_sdk_kms::primitives::Blob as KmsBlob;

use super::{
    Backend, CryptoService, SecretStore, StackDescription, StackRequest, StackService,
    StackSummary,
};
use crate::{CloudConfig, StackOutputs, poll};

/// Attribute holding the secret id in a secrets table.
const ID_ATTRIBUTE: &str = "id";
/// Attribute holding the encrypted secret in a secrets table.
const VALUE_ATTRIBUTE: &str = "value";

/// Backend talking to AWS, built from a single [`CloudConfig`].
#[derive(Debug, Clone)]
pub struct AwsBackend {
    stacks: CloudFormationStacks,
    crypto: KmsCrypto,
    store: DynamoSecretStore,
}

impl AwsBackend {
    /// Load the shared SDK configuration once and build every client from it.
    pub async fn from_config(config: &CloudConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;

        tracing::debug!(
            region = ?shared_config.region(),
            endpoint = ?config.endpoint_url,
            "AWS clients configured"
        );

        Self {
            stacks: CloudFormationStacks::new(
                aws_sdk_cloudformation::Client::new(&shared_config),
                config.stack_timeout(),
                config.poll_interval(),
            ),
            crypto: KmsCrypto::new(aws_sdk_kms::Client::new(&shared_config)),
            store: DynamoSecretStore::new(aws_sdk_dynamodb::Client::new(&shared_config)),
        }
    }
}

impl Backend for AwsBackend {
    type Stacks = CloudFormationStacks;
    type Crypto = KmsCrypto;
    type Store = DynamoSecretStore;

    fn stacks(&self) -> &CloudFormationStacks {
        &self.stacks
    }

    fn crypto(&self) -> &KmsCrypto {
        &self.crypto
    }

    fn store(&self) -> &DynamoSecretStore {
        &self.store
    }
}

/// CloudFormation stack service.
///
/// Mutating calls block until the stack settles, polling its status.
#[derive(Debug, Clone)]
pub struct CloudFormationStacks {
    client: aws_sdk_cloudformation::Client,
    timeout: Duration,
    interval: Duration,
}

impl CloudFormationStacks {
    pub fn new(
        client: aws_sdk_cloudformation::Client,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            timeout,
            interval,
        }
    }

    /// Wait until `stack_name` leaves its `*_IN_PROGRESS` state.
    ///
    /// Returns `None` if the stack disappeared, which is how a finished deletion shows.
    async fn wait_for_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        poll::wait_until(
            &format!("stack {stack_name}"),
            self.timeout,
            self.interval,
            move || async move {
                let described = self.describe_stack(stack_name).await?;
                match described {
                    Some(stack) if stack.is_in_progress() => Ok(None),
                    other => Ok(Some(other)),
                }
            },
        )
        .await
    }

    async fn wait_for_success(&self, stack_name: &str) -> Result<()> {
        match self.wait_for_stack(stack_name).await? {
            Some(stack) if stack.is_failed() => {
                anyhow::bail!("Stack {} ended in status {}", stack_name, stack.status)
            }
            Some(stack) => {
                tracing::info!(stack = %stack_name, status = %stack.status, "Stack settled");
                Ok(())
            }
            None => anyhow::bail!("Stack {} disappeared while waiting for it", stack_name),
        }
    }

    fn to_parameters(request: &StackRequest) -> Vec<Parameter> {
        request
            .parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect()
    }

    fn to_tags(request: &StackRequest) -> Vec<Tag> {
        request
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect()
    }

    fn to_description(stack: &Stack) -> StackDescription {
        let outputs = stack
            .outputs()
            .iter()
            .filter_map(|output| {
                let key = output.output_key()?;
                Some((
                    key.to_string(),
                    output.output_value().unwrap_or_default().to_string(),
                ))
            })
            .collect::<BTreeMap<_, _>>();

        StackDescription {
            stack_name: stack.stack_name().unwrap_or_default().to_string(),
            status: stack
                .stack_status()
                .map(|status| status.as_str().to_string())
                .unwrap_or_default(),
            outputs: StackOutputs::from(outputs),
        }
    }

    fn to_tag_map(stack: &Stack) -> BTreeMap<String, String> {
        stack
            .tags()
            .iter()
            .map(|tag| {
                (
                    tag.key().unwrap_or_default().to_string(),
                    tag.value().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

impl StackService for CloudFormationStacks {
    async fn list_stacks(&self) -> Result<Vec<StackSummary>> {
        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .describe_stacks()
                .set_next_token(next_token.take())
                .send()
                .await
                .context("Failed to list CloudFormation stacks")?;

            for stack in response.stacks() {
                summaries.push(StackSummary {
                    stack_name: stack.stack_name().unwrap_or_default().to_string(),
                    tags: Self::to_tag_map(stack),
                });
            }

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(summaries)
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let response = match self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|e| e.message())
                    .is_some_and(|msg| msg.contains("does not exist")) =>
            {
                return Ok(None);
            }
            Err(err) => {
                return Err(err).context(format!("Failed to describe stack {stack_name}"));
            }
        };

        Ok(response.stacks().first().map(Self::to_description))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<()> {
        tracing::info!(stack = %request.stack_name, "Creating stack");

        self.client
            .create_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::to_parameters(request)))
            .set_tags(Some(Self::to_tags(request)))
            .set_notification_arns(Some(request.notification_arns.clone()))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .context(format!("Failed to create stack {}", request.stack_name))?;

        self.wait_for_success(&request.stack_name).await
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<()> {
        tracing::info!(stack = %request.stack_name, "Updating stack");

        let result = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::to_parameters(request)))
            .set_tags(Some(Self::to_tags(request)))
            .set_notification_arns(Some(request.notification_arns.clone()))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await;

        match result {
            Ok(_) => self.wait_for_success(&request.stack_name).await,
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|e| e.message())
                    .is_some_and(|msg| msg.contains("No updates are to be performed")) =>
            {
                tracing::info!(stack = %request.stack_name, "Stack is already up to date");
                Ok(())
            }
            Err(err) => {
                Err(err).context(format!("Failed to update stack {}", request.stack_name))
            }
        }
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        tracing::info!(stack = %stack_name, "Deleting stack");

        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .context(format!("Failed to delete stack {stack_name}"))?;

        match self.wait_for_stack(stack_name).await? {
            Some(stack) if stack.status == "DELETE_FAILED" => {
                anyhow::bail!("Stack {} could not be deleted", stack_name)
            }
            _ => Ok(()),
        }
    }
}

/// KMS crypto service.
#[derive(Debug, Clone)]
pub struct KmsCrypto {
    client: aws_sdk_kms::Client,
}

impl KmsCrypto {
    pub fn new(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }
}

impl CryptoService for KmsCrypto {
    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(KmsBlob::new(plaintext.to_vec()))
            .send()
            .await
            .context(format!("Failed to encrypt with KMS key {key_id}"))?;

        response
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .context("KMS returned no ciphertext")
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .client
            .decrypt()
            .ciphertext_blob(KmsBlob::new(ciphertext.to_vec()))
            .send()
            .await
            .context("Failed to decrypt with KMS")?;

        response
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .context("KMS returned no plaintext")
    }
}

/// DynamoDB secret store. Items are `{id: S, value: B}`.
#[derive(Debug, Clone)]
pub struct DynamoSecretStore {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoSecretStore {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

impl SecretStore for DynamoSecretStore {
    async fn put(&self, table: &str, id: &str, value: &[u8]) -> Result<()> {
        self.client
            .put_item()
            .table_name(table)
            .item(ID_ATTRIBUTE, AttributeValue::S(id.to_string()))
            .item(VALUE_ATTRIBUTE, AttributeValue::B(DynamoBlob::new(value.to_vec())))
            .send()
            .await
            .context(format!("Failed to store item {id} in table {table}"))?;

        Ok(())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get_item()
            .table_name(table)
            .key(ID_ATTRIBUTE, AttributeValue::S(id.to_string()))
            .send()
            .await
            .context(format!("Failed to read item {id} from table {table}"))?;

        let Some(item) = response.item() else {
            return Ok(None);
        };

        let value = item
            .get(VALUE_ATTRIBUTE)
            .context(format!("Item {id} in table {table} has no value"))?
            .as_b()
            .map_err(|_| anyhow::anyhow!("Item {id} in table {table} is not binary"))?;

        Ok(Some(value.as_ref().to_vec()))
    }
}
