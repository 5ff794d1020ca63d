use std::sync::Arc;

use rill_types::indexmap::IndexMap;
use rill_types::serde::de::DeserializeOwned;
use rill_types::serde_json;

use crate::bridge::BridgeVariant;
use crate::errors::RegistryError;
use crate::location::Location;
use crate::node::{NodeKind, SourceFactory, TransformFactory};

type Constructor = Box<dyn Fn(serde_json::Value) -> Result<NodeKind, RegistryError> + Send + Sync>;

struct NodeEntry {
    class_name: String,
    constructor: Constructor,
}

/// Maps class names to node constructors. Lookup is case-insensitive; the
/// declared spelling is kept for serialization.
#[derive(Default)]
pub struct NodeRegistry {
    entries: IndexMap<String, NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> NodeRegistry {
        NodeRegistry::default()
    }

    pub fn register(
        &mut self,
        class_name: &str,
        constructor: impl Fn(serde_json::Value) -> Result<NodeKind, RegistryError> + Send + Sync + 'static,
    ) {
        self.entries.insert(
            class_name.to_lowercase(),
            NodeEntry {
                class_name: class_name.to_string(),
                constructor: Box::new(constructor),
            },
        );
    }

    /// Registers a source class whose factory deserializes from settings.
    pub fn register_source<T>(&mut self, class_name: &str)
    where
        T: SourceFactory + DeserializeOwned + 'static,
    {
        let class = class_name.to_string();
        self.register(class_name, move |settings| {
            let factory: T =
                serde_json::from_value(settings).map_err(|source| RegistryError::InvalidSettings {
                    class: class.clone(),
                    source,
                })?;
            Ok(NodeKind::Source(Arc::new(factory)))
        });
    }

    /// Registers a transform or sink class whose factory deserializes from
    /// settings.
    pub fn register_transform<T>(&mut self, class_name: &str)
    where
        T: TransformFactory + DeserializeOwned + 'static,
    {
        let class = class_name.to_string();
        self.register(class_name, move |settings| {
            let factory: T =
                serde_json::from_value(settings).map_err(|source| RegistryError::InvalidSettings {
                    class: class.clone(),
                    source,
                })?;
            Ok(NodeKind::Transform(Arc::new(factory)))
        });
    }

    pub fn get(
        &self,
        class_name: &str,
        settings: serde_json::Value,
    ) -> Result<NodeKind, RegistryError> {
        let entry = self
            .entries
            .get(&class_name.to_lowercase())
            .ok_or_else(|| RegistryError::UnknownClass(class_name.to_string()))?;
        (entry.constructor)(settings)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.class_name.as_str())
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.entries.contains_key(&class_name.to_lowercase())
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("classes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Ordered set of bridge variants considered at lock time. Registration
/// order breaks cost ties.
#[derive(Clone, Debug)]
pub struct BridgeRegistry {
    variants: Vec<BridgeVariant>,
}

impl BridgeRegistry {
    pub fn new(variants: Vec<BridgeVariant>) -> BridgeRegistry {
        BridgeRegistry { variants }
    }

    pub fn register(&mut self, variant: BridgeVariant) {
        self.variants.push(variant);
    }

    pub fn variants(&self) -> &[BridgeVariant] {
        &self.variants
    }

    /// The cheapest capable variant for a location pair, if any.
    pub fn resolve(&self, from: &Location, to: &Location) -> Option<(BridgeVariant, u32)> {
        let mut best: Option<(BridgeVariant, u32)> = None;
        for variant in &self.variants {
            let (can_handle, cost) = variant.can_handle(from, to);
            if can_handle && best.map_or(true, |(_, best_cost)| cost < best_cost) {
                best = Some((*variant, cost));
            }
        }
        best
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        BridgeRegistry::new(vec![
            BridgeVariant::Local,
            BridgeVariant::Thread,
            BridgeVariant::Process,
            BridgeVariant::ThreadSync,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_selection_prefers_cheapest() {
        let registry = BridgeRegistry::default();
        let same = Location::parse("");
        let (variant, cost) = registry.resolve(&same, &same).unwrap();
        assert_eq!(variant, BridgeVariant::Local);
        assert_eq!(cost, 1);

        let (variant, _) = registry
            .resolve(&Location::parse("1"), &Location::parse("2"))
            .unwrap();
        assert_eq!(variant, BridgeVariant::Thread);

        let (variant, _) = registry
            .resolve(&Location::parse("1:1"), &Location::parse("2:1"))
            .unwrap();
        assert_eq!(variant, BridgeVariant::Process);
    }

    #[test]
    fn registration_order_breaks_ties() {
        // two variants claiming the same pair at equal cost
        let registry = BridgeRegistry::new(vec![BridgeVariant::ThreadSync, BridgeVariant::Thread]);
        let (variant, _) = registry
            .resolve(&Location::parse("1"), &Location::parse("2"))
            .unwrap();
        // ThreadSync costs more, so Thread still wins despite the order
        assert_eq!(variant, BridgeVariant::Thread);

        let sync_only = BridgeRegistry::new(vec![BridgeVariant::ThreadSync]);
        let (variant, cost) = sync_only
            .resolve(&Location::parse("1"), &Location::parse("2"))
            .unwrap();
        assert_eq!(variant, BridgeVariant::ThreadSync);
        assert_eq!(cost, 4);
    }

    #[test]
    fn no_variant_for_unreachable_pair() {
        let registry = BridgeRegistry::new(vec![BridgeVariant::Local]);
        assert!(registry
            .resolve(&Location::parse("1"), &Location::parse("2"))
            .is_none());
    }
}
