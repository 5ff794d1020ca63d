use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use rill_core::{Emissions, InputFrame, Port, PortKind, PortSet, Transform, TransformFactory};
use rill_types::errors::internal::BoxedError;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;

/// Sink that appends every packet as one JSON line to a file.
///
/// The file is truncated when a run starts, so re-running a graph yields a
/// fresh recording. Because the observation channel is a file, it also
/// works for nodes placed in worker processes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct SaveFactory {
    pub path: PathBuf,
}

impl TransformFactory for SaveFactory {
    fn class_name(&self) -> &str {
        "Save"
    }

    fn ports_in(&self) -> PortSet {
        PortSet::new(vec![Port::new("Data", PortKind::Any)])
    }

    fn ports_out(&self) -> PortSet {
        PortSet::empty()
    }

    fn settings(&self) -> serde_json::Value {
        crate::settings_of(self)
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError> {
        Ok(Box::new(Save {
            path: self.path.clone(),
            file: None,
        }))
    }
}

#[derive(Debug)]
struct Save {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl Transform for Save {
    fn on_start(&mut self) -> Result<(), BoxedError> {
        self.file = Some(BufWriter::new(File::create(&self.path)?));
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), BoxedError> {
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }

    fn process(&mut self, mut frame: InputFrame, _ctr: u64) -> Result<Emissions, BoxedError> {
        let value = frame.take("data").ok_or("missing data input")?;
        let file = self.file.as_mut().ok_or("sink file was never opened")?;
        serde_json::to_writer(&mut *file, &value)?;
        file.write_all(b"\n")?;
        // flushed per line so another process can observe the stream
        file.flush()?;
        Ok(Emissions::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_types::Value;

    #[test]
    fn writes_one_json_line_per_packet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let factory = SaveFactory { path: path.clone() };
        let mut sink = factory.build().unwrap();

        sink.on_start().unwrap();
        for value in [Value::Int(1), Value::from("two")] {
            let frame: InputFrame = [("data".to_string(), value)].into_iter().collect();
            sink.process(frame, 0).unwrap();
        }
        sink.on_stop().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1\n\"two\"\n");
    }

    #[test]
    fn restart_truncates_the_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let factory = SaveFactory { path: path.clone() };

        for _ in 0..2 {
            let mut sink = factory.build().unwrap();
            sink.on_start().unwrap();
            let frame: InputFrame = [("data".to_string(), Value::Int(7))].into_iter().collect();
            sink.process(frame, 0).unwrap();
            sink.on_stop().unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7\n");
    }
}
