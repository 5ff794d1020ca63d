//! The standard node library: simple producers, transforms and sinks that
//! ship with the engine and populate the default class registry. Worker
//! binaries must register at least these classes to rebuild serialized
//! graphs.

pub mod ctr_increase;
pub mod feedback;
pub mod passthrough;
pub mod quadratic;
pub mod save;
pub mod sequence;
pub mod sum;
pub mod window;

use rill_core::NodeRegistry;
use rill_types::serde::Serialize;
use rill_types::serde_json;

pub use ctr_increase::CtrIncreaseFactory;
pub use feedback::FeedbackFactory;
pub use passthrough::PassthroughFactory;
pub use quadratic::QuadraticFactory;
pub use save::SaveFactory;
pub use sequence::SequenceFactory;
pub use sum::SumFactory;
pub use window::WindowFactory;

/// Registers every standard node class.
pub fn register_defaults(registry: &mut NodeRegistry) {
    registry.register_source::<SequenceFactory>("Sequence");
    registry.register_transform::<QuadraticFactory>("Quadratic");
    registry.register_transform::<PassthroughFactory>("Passthrough");
    registry.register_transform::<WindowFactory>("Window");
    registry.register_transform::<SumFactory>("Sum");
    registry.register_transform::<CtrIncreaseFactory>("CtrIncrease");
    registry.register_transform::<FeedbackFactory>("Feedback");
    registry.register_transform::<SaveFactory>("Save");
}

/// A registry holding exactly the standard classes.
pub fn default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_defaults(&mut registry);
    registry
}

pub(crate) fn settings_of<T: Serialize>(factory: &T) -> serde_json::Value {
    serde_json::to_value(factory).unwrap_or(serde_json::Value::Object(Default::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_the_standard_classes() {
        let registry = default_registry();
        for class in [
            "Sequence",
            "Quadratic",
            "Passthrough",
            "Window",
            "Sum",
            "CtrIncrease",
            "Feedback",
            "Save",
        ] {
            assert!(registry.contains(class), "{class}");
        }
        // lookup is case-insensitive
        assert!(registry.contains("sequence"));
    }
}
