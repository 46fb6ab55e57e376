//! Model selector: picks a capability tier for a piece of text.
//!
//! Holds one model per tier and routes with a cheap heuristic: long or
//! planning-flavoured text goes to the smart tier, trivial text to the
//! cheap tier when one exists, everything else to the fast tier.

use std::sync::Arc;

use async_trait::async_trait;
use snak_config::ModelsConfig;
use snak_core::error::ModelError;
use snak_core::model::{ChatModel, ModelSelector, ModelTier, SelectedModel};
use tracing::debug;

use crate::openai_compat::OpenAiEndpoint;

const SMART_MIN_CHARS: usize = 300;
const CHEAP_MAX_CHARS: usize = 40;
const SMART_KEYWORDS: [&str; 6] = ["plan", "analyze", "design", "debug", "refactor", "strategy"];

/// A selector over a fixed set of tiers.
#[derive(Clone, Default)]
pub struct StaticModelSelector {
    fast: Option<Arc<dyn ChatModel>>,
    smart: Option<Arc<dyn ChatModel>>,
    cheap: Option<Arc<dyn ChatModel>>,
}

impl StaticModelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fast(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.fast = Some(model);
        self
    }

    pub fn with_smart(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.smart = Some(model);
        self
    }

    pub fn with_cheap(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.cheap = Some(model);
        self
    }

    /// The same model for every tier.
    pub fn single(model: Arc<dyn ChatModel>) -> Self {
        Self {
            fast: Some(model.clone()),
            smart: Some(model),
            cheap: None,
        }
    }

    /// Which tier `text` should run on.
    pub fn tier_for(&self, text: &str) -> ModelTier {
        let chars = text.chars().count();
        let lower = text.to_lowercase();
        if chars > SMART_MIN_CHARS || SMART_KEYWORDS.iter().any(|k| lower.contains(k)) {
            ModelTier::Smart
        } else if chars < CHEAP_MAX_CHARS && self.cheap.is_some() {
            ModelTier::Cheap
        } else {
            ModelTier::Fast
        }
    }
}

#[async_trait]
impl ModelSelector for StaticModelSelector {
    async fn select_model_for_messages(&self, text: &str) -> Result<SelectedModel, ModelError> {
        let tier = self.tier_for(text);
        let model = self
            .model(tier)
            .ok_or_else(|| ModelError::ModelNotFound(format!("no model configured for tier {tier}")))?;
        debug!(%tier, model = model.name(), "Selected model");
        Ok(SelectedModel {
            model_name: model.name().to_string(),
            model,
            tier,
        })
    }

    fn model(&self, tier: ModelTier) -> Option<Arc<dyn ChatModel>> {
        match tier {
            ModelTier::Fast => self.fast.clone(),
            ModelTier::Smart => self.smart.clone(),
            ModelTier::Cheap => self.cheap.clone(),
        }
    }
}

/// Build a selector from configuration.
pub fn build_from_config(config: &ModelsConfig) -> Result<StaticModelSelector, ModelError> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let endpoint = OpenAiEndpoint::new(&config.provider, &config.base_url, api_key)?;

    let tier = |name: &str| -> Arc<dyn ChatModel> {
        Arc::new(endpoint.model(name).with_max_tokens(config.max_tokens))
    };

    let mut selector = StaticModelSelector::new()
        .with_fast(tier(&config.fast))
        .with_smart(tier(&config.smart));
    if let Some(cheap) = &config.cheap {
        selector = selector.with_cheap(tier(cheap));
    }
    Ok(selector)
}
