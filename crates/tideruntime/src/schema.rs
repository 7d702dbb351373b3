use async_trait::async_trait;
use serde_json::json;
use tidecore::Schema;

/// Source of the schemas referenced as `{ "$ref": name }` in program props
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch_schema(&self, reference: &str) -> Result<Schema, String>;
}

/// Resolves every reference to a schema whose `type` is the reference name
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedTypeFetcher;

#[async_trait]
impl SchemaFetcher for NamedTypeFetcher {
    async fn fetch_schema(&self, reference: &str) -> Result<Schema, String> {
        Ok(Schema::from(json!({ "type": reference })))
    }
}
