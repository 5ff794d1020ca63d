use rill_core::{Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;

/// Forwards its input unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct PassthroughFactory {}

impl TransformFactory for PassthroughFactory {
    fn class_name(&self) -> &str {
        "Passthrough"
    }

    fn ports_in(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Any)])
    }

    fn ports_out(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Any)])
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        Ok(Box::new(Passthrough))
    }
}

#[derive(Debug)]
struct Passthrough;

impl Transform for Passthrough {
    fn process(&mut self, mut frame: InputFrame, _ctr: u64) -> Result<Emissions, BoxedError> {
        let value = frame.take("data").ok_or("missing data input")?;
        Ok(Emissions::new().emit("data", value))
    }
}
