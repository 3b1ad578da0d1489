//! Registry of configured gateway adapters, keyed by processor.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::settlement::Processor;

use super::GatewayAdapter;

/// Adapters for the processors present in configuration.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: BTreeMap<Processor, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under the processor it reports.
    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.processor(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, processor: Processor) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(&processor).cloned()
    }

    /// Looks up by URL slug, e.g. `freekassa`.
    pub fn by_slug(&self, slug: &str) -> Option<Arc<dyn GatewayAdapter>> {
        slug.parse::<Processor>().ok().and_then(|p| self.get(p))
    }

    pub fn processors(&self) -> Vec<Processor> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("processors", &self.processors())
            .finish()
    }
}
