use rill_core::{
    Attr, Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory,
};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;
use rill_types::Value;

/// The circuit breaker of the standard library.
///
/// Forwards `data` and `delayed` pairwise. On the first packet, before the
/// loop has produced anything, `delayed` is bootstrapped from the
/// `fallback` setting; afterwards the node waits for the fed-back value of
/// each counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct FeedbackFactory {
    pub fallback: Value,
}

impl TransformFactory for FeedbackFactory {
    fn class_name(&self) -> &str {
        "Feedback"
    }

    fn ports_in(&self) -> PortSet {
        PortSet::new(vec![
            Port::new("Data", PortKind::Any),
            Port::new("Delayed", PortKind::Any),
        ])
    }

    fn ports_out(&self) -> PortSet {
        PortSet::new(vec![
            Port::new("Data", PortKind::Any),
            Port::new("Delayed", PortKind::Any),
        ])
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn attrs(&self) -> &[Attr] {
        &[Attr::CircuitBreaker]
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        Ok(Box::new(Feedback {
            fallback: Some(self.fallback.clone()),
        }))
    }
}

#[derive(Debug)]
struct Feedback {
    fallback: Option<Value>,
}

impl Transform for Feedback {
    fn should_process(&self, frame: &InputFrame) -> bool {
        frame.contains("delayed") || self.fallback.is_some()
    }

    fn process(&mut self, mut frame: InputFrame, _ctr: u64) -> Result<Emissions, BoxedError> {
        let data = frame.take("data").ok_or("missing data input")?;
        let delayed = match frame.take("delayed") {
            Some(delayed) => delayed,
            None => self
                .fallback
                .take()
                .ok_or("no delayed value and the fallback is already spent")?,
        };
        // once the loop is live, the fallback must never fire again
        self.fallback = None;
        Ok(Emissions::new()
            .emit("data", data)
            .emit("delayed", delayed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(entries: &[(&str, i64)]) -> InputFrame {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), Value::Int(*value)))
            .collect()
    }

    #[test]
    fn bootstraps_from_fallback_once() {
        let factory = FeedbackFactory {
            fallback: Value::Int(1000),
        };
        let mut transform = factory.build().unwrap();

        assert!(transform.should_process(&frame(&[("data", 0)])));
        let out = transform.process(frame(&[("data", 0)]), 0).unwrap();
        let values: Vec<_> = out.into_iter().map(|emission| emission.value).collect();
        assert_eq!(values, vec![Value::Int(0), Value::Int(1000)]);

        // the fallback is spent: now the fed-back value is required
        assert!(!transform.should_process(&frame(&[("data", 1)])));
        assert!(transform.should_process(&frame(&[("data", 1), ("delayed", 1000)])));
        let out = transform
            .process(frame(&[("data", 1), ("delayed", 1000)]), 1)
            .unwrap();
        let values: Vec<_> = out.into_iter().map(|emission| emission.value).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(1000)]);
    }
}
