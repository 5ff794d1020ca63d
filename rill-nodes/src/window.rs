use std::collections::VecDeque;

use rill_core::{Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;
use rill_types::Value;

/// Sliding window: once `length` packets arrived, emits the last `length`
/// values as an array on every counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct WindowFactory {
    pub length: usize,
}

impl TransformFactory for WindowFactory {
    fn class_name(&self) -> &str {
        "Window"
    }

    fn ports_in(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Any)])
    }

    fn ports_out(&self) -> PortSet {
        PortSet::new(vec![Port::new(
            "Frame",
            PortKind::List(Box::new(PortKind::Any)),
        )])
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        if self.length == 0 {
            return Err("window length must be positive".into());
        }
        Ok(Box::new(Window {
            length: self.length,
            buffer: VecDeque::with_capacity(self.length),
        }))
    }
}

#[derive(Debug)]
struct Window {
    length: usize,
    buffer: VecDeque<Value>,
}

impl Transform for Window {
    fn process(&mut self, mut frame: InputFrame, _ctr: u64) -> Result<Emissions, BoxedError> {
        let value = frame.take("data").ok_or("missing data input")?;
        if self.buffer.len() == self.length {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
        if self.buffer.len() < self.length {
            return Ok(Emissions::none());
        }
        let snapshot: Vec<Value> = self.buffer.iter().cloned().collect();
        Ok(Emissions::new().emit("frame", snapshot))
    }
}
