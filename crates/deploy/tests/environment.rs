//! Environment tests against the in-memory backend.
//!
//! Each test writes a specification and its layer templates into a temporary
//! directory, then drives the environment through a [`MemoryBackend`] and checks the
//! recorded adapter calls.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use layercake_deploy::{
    Call, DEPENDS_ON_TAG, DeployError, DeployOrder, Environment, EnvironmentBuilder,
    MemoryBackend, PROVENANCE_TAG, StackOutputs,
};
use tempdir::TempDir;

const VAULT_SPEC: &str = r#"
demo:
  tags:
    team: data
  layers:
    - layer: secrets-vault
    - layer: streams
      depends_on: [secrets-vault]
      shard_count: 2
    - layer: legacy
      disable: true
    - layer: api
      depends_on: [streams]
"#;

/// Temporary directory holding a specification and its layer templates.
struct TestContext {
    dir: TempDir,
    spec_path: PathBuf,
}

impl TestContext {
    /// Write `spec` as `demo.yml`, with a template for each of `layers`.
    fn new(spec: &str, layers: &[&str]) -> Result<Self> {
        init_test_tracing();

        let dir = TempDir::new("layercake").context("Failed to create temporary directory")?;
        let spec_path = dir.path().join("demo.yml");
        std::fs::write(&spec_path, spec).context("Failed to write specification")?;

        for layer in layers {
            let layer_dir = dir.path().join("layers").join(layer);
            std::fs::create_dir_all(&layer_dir)?;
            std::fs::write(
                layer_dir.join("template.yaml"),
                format!("Description: {layer}\nResources: {{}}\n"),
            )?;
        }

        Ok(Self { dir, spec_path })
    }

    fn environment(&self) -> Result<Environment> {
        EnvironmentBuilder::new(&self.spec_path).build()
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }
}

/// Initialize tracing for tests (idempotent).
fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

fn outputs(pairs: &[(&str, &str)]) -> StackOutputs {
    pairs.iter().copied().collect()
}

/// Specification for `(layer, depends_on)` pairs, `depends_on` comma-separated.
fn layer_spec(layers: &[(&str, &str)]) -> String {
    let mut spec = String::from("demo:\n  layers:\n");
    for (name, depends_on) in layers {
        spec.push_str(&format!("    - layer: {name}\n"));
        if !depends_on.is_empty() {
            spec.push_str(&format!("      depends_on: [{depends_on}]\n"));
        }
    }
    spec
}

fn created(backend: &MemoryBackend) -> Vec<String> {
    backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::CreateStack(name) => Some(name),
            _ => None,
        })
        .collect()
}

fn deleted(backend: &MemoryBackend) -> Vec<String> {
    backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::DeleteStack(name) => Some(name),
            _ => None,
        })
        .collect()
}

fn deploy_error(err: &anyhow::Error) -> Option<&DeployError> {
    err.downcast_ref::<DeployError>()
}

#[test]
fn test_disabled_layers_are_skipped() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &[])?;
    let env = ctx.environment()?;

    let names: Vec<_> = env.layers().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["secrets-vault", "streams", "api"]);
    assert!(env.get_layer("legacy").is_none());
    assert_eq!(env.basedir, ctx.dir.path());
    assert_eq!(env.to_string(), format!("Environment('{}')", ctx.spec_path.display()));
    Ok(())
}

#[test]
fn test_get_layer_by_either_name() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &[])?;
    let env = ctx.environment()?;

    let by_name = env.get_layer("streams").context("layer by name")?;
    let by_stack = env.get_layer("demo-streams").context("layer by stack name")?;
    assert_eq!(by_name, by_stack);
    assert!(env.get_layer("unknown").is_none());
    Ok(())
}

#[test]
fn test_populate_hierarchy_is_idempotent() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "a")]), &[])?;
    let mut env = ctx.environment()?;

    env.populate_hierarchy()?;
    env.populate_hierarchy()?;

    let children: Vec<_> = env.children("a").iter().map(|l| l.name.clone()).collect();
    assert_eq!(children, vec!["b"]);
    let parents: Vec<_> = env.parents("b").iter().map(|l| l.name.clone()).collect();
    assert_eq!(parents, vec!["a"]);
    assert!(env.children("b").is_empty());
    Ok(())
}

#[test]
fn test_unknown_dependency_is_a_format_error() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "c")]), &[])?;
    let mut env = ctx.environment()?;

    let err = env.populate_hierarchy().unwrap_err();
    match deploy_error(&err) {
        Some(DeployError::ConfigFormat { reason, .. }) => {
            assert!(reason.contains("'b'"));
            assert!(reason.contains("'c'"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_missing_layer_name_is_a_format_error() -> Result<()> {
    let ctx = TestContext::new("demo:\n  layers:\n    - depends_on: [a]\n", &[])?;

    let err = ctx.environment().unwrap_err();
    assert!(matches!(
        deploy_error(&err),
        Some(DeployError::ConfigFormat { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_create_parents_before_children() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "a")]), &["a", "b"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new();

    env.create(&backend, false, None).await?;

    assert_eq!(created(&backend), vec!["demo-a", "demo-b"]);

    let request = backend.stack_request("demo-b").context("request for demo-b")?;
    assert_eq!(request.tags.get(DEPENDS_ON_TAG).map(String::as_str), Some("a"));
    assert_eq!(request.tags.get(PROVENANCE_TAG).map(String::as_str), Some("demo"));
    assert!(request.template_body.contains("Description: b"));
    Ok(())
}

#[tokio::test]
async fn test_create_forwards_scalar_parameters() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &["secrets-vault", "streams", "api"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new();

    env.create(&backend, false, None).await?;

    let request = backend
        .stack_request("demo-streams")
        .context("request for demo-streams")?;
    assert_eq!(
        request.parameters.get("shard_count").map(String::as_str),
        Some("2")
    );
    assert!(!request.parameters.contains_key("depends_on"));
    Ok(())
}

#[tokio::test]
async fn test_create_skips_existing_stacks_unless_updating() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "a")]), &["a", "b"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_stack(
        "demo-a",
        BTreeMap::new(),
        outputs(&[("Arn", "arn:a")]),
    );

    env.create(&backend, false, None).await?;
    assert_eq!(created(&backend), vec!["demo-b"]);
    assert!(
        !backend
            .calls()
            .contains(&Call::UpdateStack("demo-a".to_string()))
    );
    assert_eq!(
        env.get_layer("a").and_then(|l| l.outputs()),
        Some(&outputs(&[("Arn", "arn:a")]))
    );

    backend.clear_calls();
    env.create(&backend, true, None).await?;
    assert!(created(&backend).is_empty());
    assert!(
        backend
            .calls()
            .contains(&Call::UpdateStack("demo-a".to_string()))
    );
    assert!(
        backend
            .calls()
            .contains(&Call::UpdateStack("demo-b".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_create_aborts_on_first_failure() -> Result<()> {
    let ctx = TestContext::new(
        &layer_spec(&[("a", ""), ("b", "a"), ("c", "b")]),
        &["a", "b", "c"],
    )?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().failing_on("demo-b");

    let err = env.create(&backend, false, None).await.unwrap_err();
    assert!(err.to_string().contains("Simulated failure"));

    assert_eq!(created(&backend), vec!["demo-a", "demo-b"]);
    assert_eq!(backend.stack_names(), vec!["demo-a"]);
    Ok(())
}

#[tokio::test]
async fn test_create_requires_templates() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", "")]), &[])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new();

    let err = env.create(&backend, false, None).await.unwrap_err();
    assert!(matches!(
        deploy_error(&err),
        Some(DeployError::MissingTemplate { .. })
    ));
    assert!(created(&backend).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_reverses_creation_order() -> Result<()> {
    let ctx = TestContext::new(
        &layer_spec(&[("a", ""), ("b", "a"), ("c", "a, b")]),
        &["a", "b", "c"],
    )?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_outputs("demo-c", outputs(&[("Url", "https://c")]));

    env.create(&backend, false, None).await?;
    let creation = created(&backend);
    assert!(!env.outputs().is_empty());

    backend.clear_calls();
    env.delete(&backend).await?;

    let mut expected = creation;
    expected.reverse();
    assert_eq!(deleted(&backend), expected);
    assert!(backend.stack_names().is_empty());
    assert!(env.outputs().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_skips_missing_stacks() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "a")]), &[])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_stack("demo-a", BTreeMap::new(), StackOutputs::new());

    env.delete(&backend).await?;

    assert_eq!(deleted(&backend), vec!["demo-a"]);
    Ok(())
}

#[tokio::test]
async fn test_delete_aborts_on_first_failure() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "a"), ("c", "b")]), &[])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new()
        .with_stack("demo-a", BTreeMap::new(), StackOutputs::new())
        .with_stack("demo-b", BTreeMap::new(), StackOutputs::new())
        .with_stack("demo-c", BTreeMap::new(), StackOutputs::new())
        .failing_on("demo-b");

    let err = env.delete(&backend).await.unwrap_err();
    assert!(err.to_string().contains("Simulated failure"));

    assert_eq!(deleted(&backend), vec!["demo-c", "demo-b"]);
    assert_eq!(backend.stack_names(), vec!["demo-a", "demo-b"]);
    Ok(())
}

#[tokio::test]
async fn test_circular_dependency() -> Result<()> {
    let ctx = TestContext::new(
        &layer_spec(&[("a", "b"), ("b", "a"), ("c", "")]),
        &["a", "b", "c"],
    )?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new();

    let err = env.create(&backend, false, None).await.unwrap_err();
    match deploy_error(&err) {
        Some(DeployError::CircularDependency { layers }) => {
            assert_eq!(layers, &vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(backend.calls().is_empty());
    Ok(())
}

#[test]
fn test_plan_follows_dependencies() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("b", "a"), ("a", ""), ("c", "")]), &[])?;

    let mut env = ctx.environment()?;
    assert_eq!(env.plan()?, vec!["demo-a", "demo-b", "demo-c"]);

    let mut env = EnvironmentBuilder::new(&ctx.spec_path)
        .order(DeployOrder::Declaration)
        .build()?;
    assert_eq!(env.plan()?, vec!["demo-b", "demo-a", "demo-c"]);
    Ok(())
}

#[test]
fn test_plan_keeps_declaration_order_when_valid() -> Result<()> {
    let ctx = TestContext::new(
        &layer_spec(&[("x", ""), ("a", ""), ("b", "x"), ("c", "a")]),
        &[],
    )?;

    let mut env = EnvironmentBuilder::new(&ctx.spec_path).stage("qa").build()?;
    assert_eq!(
        env.plan()?,
        vec!["demo-x-QA", "demo-a-QA", "demo-b-QA", "demo-c-QA"]
    );
    Ok(())
}

#[tokio::test]
async fn test_secret_round_trip() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &["secrets-vault", "streams", "api"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new()
        .with_outputs("demo-secrets-vault", outputs(&[("KmsKeyId", "key-123")]));

    env.create(&backend, false, None).await?;
    backend.clear_calls();

    env.set_secret(&backend, "token", "s3cr3t").await?;
    assert_eq!(
        backend.calls(),
        vec![
            Call::Encrypt {
                key_id: "key-123".to_string()
            },
            Call::Put {
                table: "secrets_demo".to_string(),
                id: "token".to_string()
            },
        ]
    );

    let stored = backend
        .item("secrets_demo", "token")
        .context("stored secret")?;
    assert_ne!(stored, b"s3cr3t".to_vec());

    assert_eq!(env.get_secret(&backend, "token").await?, "s3cr3t");
    Ok(())
}

#[tokio::test]
async fn test_secret_uses_deployed_vault() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &[])?;
    let env = EnvironmentBuilder::new(&ctx.spec_path).stage("prod").build()?;
    let backend = MemoryBackend::new().with_stack(
        "demo-secrets-vault-PROD",
        BTreeMap::new(),
        outputs(&[("KmsKeyId", "key-prod")]),
    );

    env.set_secret(&backend, "token", "value").await?;

    assert_eq!(
        backend.calls(),
        vec![
            Call::DescribeStack("demo-secrets-vault-PROD".to_string()),
            Call::Encrypt {
                key_id: "key-prod".to_string()
            },
            Call::Put {
                table: "secrets_demo_PROD".to_string(),
                id: "token".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_secrets_require_a_vault_layer() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", "")]), &[])?;
    let env = ctx.environment()?;
    let backend = MemoryBackend::new();

    let err = env.set_secret(&backend, "token", "value").await.unwrap_err();
    assert!(matches!(
        deploy_error(&err),
        Some(DeployError::VaultRequired { .. })
    ));

    let err = env.get_secret(&backend, "token").await.unwrap_err();
    assert!(matches!(
        deploy_error(&err),
        Some(DeployError::VaultRequired { .. })
    ));

    assert!(backend.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_vault_without_key_output() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &[])?;
    let env = ctx.environment()?;
    let backend = MemoryBackend::new();

    let err = env.set_secret(&backend, "token", "value").await.unwrap_err();
    assert!(matches!(
        deploy_error(&err),
        Some(DeployError::MissingOutput { key, .. }) if key == "KmsKeyId"
    ));
    assert!(backend.item("secrets_demo", "token").is_none());
    Ok(())
}

#[tokio::test]
async fn test_missing_secret() -> Result<()> {
    let ctx = TestContext::new(VAULT_SPEC, &[])?;
    let env = ctx.environment()?;
    let backend = MemoryBackend::new();

    let err = env.get_secret(&backend, "nope").await.unwrap_err();
    assert!(matches!(
        deploy_error(&err),
        Some(DeployError::SecretNotFound { table, key }) if table == "secrets_demo" && key == "nope"
    ));
    Ok(())
}

#[tokio::test]
async fn test_outputs_skip_layers_without_outputs() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "a")]), &["a", "b"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_outputs("demo-a", outputs(&[("Arn", "arn:a")]));

    assert!(env.outputs().is_empty());
    env.create(&backend, false, None).await?;

    let all = env.outputs();
    assert_eq!(all.len(), 1);
    assert_eq!(all.get("a"), Some(&outputs(&[("Arn", "arn:a")])));
    Ok(())
}

#[tokio::test]
async fn test_refresh_outputs() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", ""), ("b", "")]), &[])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_stack(
        "demo-b",
        BTreeMap::new(),
        outputs(&[("Queue", "q")]),
    );

    env.refresh_outputs(&backend).await?;

    assert_eq!(env.outputs().keys().collect::<Vec<_>>(), vec!["b"]);
    Ok(())
}

#[tokio::test]
async fn test_in_cf() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", "")]), &[])?;
    let env = ctx.environment()?;

    let mut tags = BTreeMap::new();
    tags.insert(PROVENANCE_TAG.to_string(), "demo".to_string());
    let backend = MemoryBackend::new().with_stack("anything", tags, StackOutputs::new());
    assert!(env.in_cf(&backend).await?);

    let mut tags = BTreeMap::new();
    tags.insert(PROVENANCE_TAG.to_string(), "other".to_string());
    let backend = MemoryBackend::new()
        .with_stack("demo-a", BTreeMap::new(), StackOutputs::new())
        .with_stack("other-a", tags, StackOutputs::new());
    assert!(!env.in_cf(&backend).await?);
    Ok(())
}

#[tokio::test]
async fn test_create_writes_outputs_file() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", "")]), &["a"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_outputs("demo-a", outputs(&[("Arn", "arn:a")]));
    let path = ctx.path("out.yaml");

    env.create(&backend, false, Some(&path)).await?;

    let content = std::fs::read_to_string(&path)?;
    let written: BTreeMap<String, BTreeMap<String, String>> = serde_yaml::from_str(&content)?;
    assert_eq!(
        written.get("a").and_then(|o| o.get("Arn")).map(String::as_str),
        Some("arn:a")
    );
    Ok(())
}

#[tokio::test]
async fn test_write_outputs_as_json() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", "")]), &["a"])?;
    let mut env = ctx.environment()?;
    let backend = MemoryBackend::new().with_outputs("demo-a", outputs(&[("Arn", "arn:a")]));
    env.create(&backend, false, None).await?;

    let path = env.write_outputs(Some(&ctx.path("out.json")))?;

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(written["a"]["Arn"], "arn:a");
    Ok(())
}

#[test]
fn test_default_outputs_path() -> Result<()> {
    let ctx = TestContext::new(&layer_spec(&[("a", "")]), &[])?;

    let env = ctx.environment()?;
    assert_eq!(env.default_outputs_path(), Path::new("demo.outputs.yaml"));

    let env = EnvironmentBuilder::new(&ctx.spec_path).stage("dev").build()?;
    assert_eq!(env.default_outputs_path(), Path::new("demo-DEV.outputs.yaml"));
    Ok(())
}
