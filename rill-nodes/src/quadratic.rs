use rill_core::{Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;
use rill_types::Value;

/// Squares every incoming number.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct QuadraticFactory {}

impl TransformFactory for QuadraticFactory {
    fn class_name(&self) -> &str {
        "Quadratic"
    }

    fn ports_in(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Float)])
    }

    fn ports_out(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Float)])
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        Ok(Box::new(Quadratic))
    }
}

#[derive(Debug)]
struct Quadratic;

impl Transform for Quadratic {
    fn process(&mut self, mut frame: InputFrame, _ctr: u64) -> Result<Emissions, BoxedError> {
        let squared = match frame.take("data") {
            Some(Value::Int(v)) => Value::Int(v * v),
            Some(Value::Float(v)) => Value::from(v.0 * v.0),
            Some(other) => return Err(format!("cannot square a {}", other.type_name()).into()),
            None => return Err("missing data input".into()),
        };
        Ok(Emissions::new().emit("data", squared))
    }
}
