use rill_core::{Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;
use rill_types::Value;

/// Adds the packets arriving on `data` and `delayed` at the same counter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct SumFactory {}

impl TransformFactory for SumFactory {
    fn class_name(&self) -> &str {
        "Sum"
    }

    fn ports_in(&self) -> PortSet {
        PortSet::new(vec![
            Port::new("Data", PortKind::Float),
            Port::new("Delayed", PortKind::Float),
        ])
    }

    fn ports_out(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Float)])
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        Ok(Box::new(Sum))
    }
}

fn add(a: &Value, b: &Value) -> Result<Value, BoxedError> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        _ => {
            let (a, b) = (
                a.as_float()
                    .ok_or_else(|| format!("cannot add a {}", a.type_name()))?,
                b.as_float()
                    .ok_or_else(|| format!("cannot add a {}", b.type_name()))?,
            );
            Ok(Value::from(a + b))
        }
    }
}

#[derive(Debug)]
struct Sum;

impl Transform for Sum {
    fn process(&mut self, frame: InputFrame, _ctr: u64) -> Result<Emissions, BoxedError> {
        let data = frame.get("data").ok_or("missing data input")?;
        let delayed = frame.get("delayed").ok_or("missing delayed input")?;
        Ok(Emissions::new().emit("data", add(data, delayed)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_ints_exactly() {
        let mut transform = SumFactory::default().build().unwrap();
        let frame: InputFrame = [
            ("data".to_string(), Value::Int(2)),
            ("delayed".to_string(), Value::Int(1000)),
        ]
        .into_iter()
        .collect();
        let out = transform.process(frame, 0).unwrap();
        assert_eq!(out.iter().next().unwrap().value, Value::Int(1002));
    }

    #[test]
    fn widens_mixed_operands() {
        let mut transform = SumFactory::default().build().unwrap();
        let frame: InputFrame = [
            ("data".to_string(), Value::Int(2)),
            ("delayed".to_string(), Value::from(0.5)),
        ]
        .into_iter()
        .collect();
        let out = transform.process(frame, 0).unwrap();
        assert_eq!(out.iter().next().unwrap().value, Value::from(2.5));
    }
}
