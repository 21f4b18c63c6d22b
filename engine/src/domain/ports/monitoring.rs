use crate::domain::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Produces live metric values for the instance.
///
/// Monitors are plugin code and may be slow or broken; a failing monitor is
/// logged and skipped so the rest of the snapshot still gets published.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> Result<BTreeMap<String, Value>>;
}

/// Produces static service details, computed once per agent lifetime.
#[async_trait]
pub trait DetailsProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn details(&self) -> Result<BTreeMap<String, Value>>;
}
