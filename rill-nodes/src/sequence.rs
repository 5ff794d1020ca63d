use rill_core::{Emissions, Port, PortKind, PortSet, Source, SourceFactory};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;

/// Produces the integers `from..to` (exclusive), one per counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct SequenceFactory {
    #[serde(default)]
    pub from: i64,
    pub to: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

impl SourceFactory for SequenceFactory {
    fn class_name(&self) -> &str {
        "Sequence"
    }

    fn ports_out(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Int)])
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn build(&self) -> Result<Box<dyn Source>, BoxedError> {
        if self.step == 0 {
            return Err("step must not be zero".into());
        }
        Ok(Box::new(Sequence {
            next: self.from,
            to: self.to,
            step: self.step,
        }))
    }
}

#[derive(Debug)]
struct Sequence {
    next: i64,
    to: i64,
    step: i64,
}

impl Source for Sequence {
    fn tick(&mut self) -> Result<Option<Emissions>, BoxedError> {
        let exhausted = if self.step > 0 {
            self.next >= self.to
        } else {
            self.next <= self.to
        };
        if exhausted {
            return Ok(None);
        }
        let value = self.next;
        self.next += self.step;
        Ok(Some(Emissions::new().emit("data", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_types::Value;

    #[test]
    fn emits_the_range_then_ends() {
        let factory = SequenceFactory {
            from: 0,
            to: 3,
            step: 1,
        };
        let mut source = factory.build().unwrap();
        let mut produced = Vec::new();
        while let Some(emissions) = source.tick().unwrap() {
            for emission in emissions {
                produced.push(emission.value);
            }
        }
        assert_eq!(produced, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn zero_step_is_rejected_at_build() {
        let factory = SequenceFactory {
            from: 0,
            to: 3,
            step: 0,
        };
        assert!(factory.build().is_err());
    }

    #[test]
    fn settings_round_trip() {
        let factory = SequenceFactory {
            from: 2,
            to: 9,
            step: 1,
        };
        let settings = factory.settings();
        let back: SequenceFactory = serde_json::from_value(settings).unwrap();
        assert_eq!(back.from, 2);
        assert_eq!(back.to, 9);
    }
}
