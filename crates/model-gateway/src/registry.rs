//! Static model catalog loaded from an on-disk JSON configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{ModelMetadata, ModelTier};
use crate::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub models: Vec<ModelMetadata>,
}

/// Catalog of backend models. Iteration order is the configuration order,
/// which doubles as the router's tie-break order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelMetadata>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelMetadata>) -> Self {
        Self { models }
    }

    pub async fn load(path: &Path) -> Result<Self, GatewayError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let config: RegistryConfig = serde_json::from_str(&raw)?;
        if config.models.is_empty() {
            return Err(GatewayError::Config(format!(
                "model catalog {} contains no models",
                path.display()
            )));
        }

        tracing::info!(
            path = %path.display(),
            model_count = config.models.len(),
            "model catalog loaded"
        );
        Ok(Self::new(config.models))
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelMetadata> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn require(&self, model_id: &str) -> Result<&ModelMetadata, GatewayError> {
        self.get(model_id)
            .ok_or_else(|| GatewayError::ModelNotFound(model_id.to_string()))
    }

    pub fn models(&self) -> &[ModelMetadata] {
        &self.models
    }

    pub fn enabled_models(&self) -> impl Iterator<Item = &ModelMetadata> {
        self.models.iter().filter(|m| m.enabled)
    }

    /// Position in configuration order, used as the final ranking tie-break.
    pub fn position(&self, model_id: &str) -> usize {
        self.models
            .iter()
            .position(|m| m.id == model_id)
            .unwrap_or(usize::MAX)
    }

    /// Cost of a call against a cataloged model.
    pub fn calculate_cost(
        &self,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<f64, GatewayError> {
        Ok(self.require(model_id)?.cost_for(input_tokens, output_tokens))
    }

    /// Default tier for an agent role. Planning-heavy roles get the
    /// strategic tier, research gets the research tier, the rest run on the
    /// operational tier.
    pub fn default_tier_for_role(role: &str) -> ModelTier {
        match role {
            "project_manager" | "business_analyst" | "solution_architect" => ModelTier::Strategic,
            "research" => ModelTier::Research,
            _ => ModelTier::Operational,
        }
    }
}
