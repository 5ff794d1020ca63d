use rill_core::{
    Attr, Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory,
};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;

/// Re-emits its input one counter later. The building block for feeding a
/// value back into the next tick of a loop.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct CtrIncreaseFactory {}

impl TransformFactory for CtrIncreaseFactory {
    fn class_name(&self) -> &str {
        "CtrIncrease"
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

    fn attrs(&self) -> &[Attr] {
        &[Attr::CtrIncrease]
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        Ok(Box::new(CtrIncrease))
    }
}

#[derive(Debug)]
struct CtrIncrease;

impl Transform for CtrIncrease {
    fn process(&mut self, mut frame: InputFrame, ctr: u64) -> Result<Emissions, BoxedError> {
        let value = frame.take("data").ok_or("missing data input")?;
        Ok(Emissions::new().emit_at("data", value, ctr + 1))
    }
}
