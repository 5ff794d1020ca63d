use std::fmt::{Display, Formatter};

use rill_types::serde::de::Deserializer;
use rill_types::serde::ser::Serializer;
use rill_types::serde::{Deserialize, Serialize};

/// Where a node computes: `host:port:process:thread`, right-anchored.
///
/// Missing leading components default to empty, so `"1:2"` names process 1,
/// thread 2 on the local host and `""` is the main cooperative worker of the
/// host process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    host: String,
    port: String,
    process: String,
    thread: String,
}

impl Location {
    pub fn parse(text: &str) -> Location {
        let mut comps = ["", "", "", ""];
        for (i, split) in text.split(':').rev().enumerate() {
            if i >= comps.len() {
                break;
            }
            comps[i] = split;
        }
        let [thread, process, port, host] = comps;
        Location {
            host: host.to_string(),
            port: port.to_string(),
            process: process.to_string(),
            thread: thread.to_string(),
        }
    }

    /// The network component, `host:port`.
    pub fn host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn thread(&self) -> &str {
        &self.thread
    }

    /// Nodes in the empty process run inside the launching process itself.
    pub fn is_main_process(&self) -> bool {
        self.process.is_empty()
    }

    pub fn same_host(&self, other: &Location) -> bool {
        self.host == other.host && self.port == other.port
    }

    pub fn same_process(&self, other: &Location) -> bool {
        self.same_host(other) && self.process == other.process
    }

    /// Grouping key for the launcher: one worker process per distinct key.
    pub fn process_key(&self) -> (String, String) {
        (self.host(), self.process.clone())
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let comps = [
            self.host.as_str(),
            self.port.as_str(),
            self.process.as_str(),
            self.thread.as_str(),
        ];
        let first = comps
            .iter()
            .position(|c| !c.is_empty())
            .unwrap_or(comps.len());
        write!(f, "{}", comps[first.min(3)..].join(":"))
    }
}

impl From<&str> for Location {
    fn from(text: &str) -> Self {
        Location::parse(text)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Location::parse(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_right_anchored() {
        let loc = Location::parse("1:2");
        assert_eq!(loc.process(), "1");
        assert_eq!(loc.thread(), "2");
        assert_eq!(loc.host(), ":");

        let loc = Location::parse("1");
        assert_eq!(loc.process(), "");
        assert_eq!(loc.thread(), "1");

        let loc = Location::parse("pi:9000:3:4");
        assert_eq!(loc.host(), "pi:9000");
        assert_eq!(loc.process(), "3");
        assert_eq!(loc.thread(), "4");
    }

    #[test]
    fn empty_is_main_worker() {
        let loc = Location::parse("");
        assert!(loc.is_main_process());
        assert_eq!(loc.thread(), "");
        assert_eq!(loc, Location::default());
    }

    #[test]
    fn display_round_trip() {
        for text in ["", "1", "1:2", "pi:9000:3:4", "3:"] {
            let loc = Location::parse(text);
            assert_eq!(Location::parse(&loc.to_string()), loc, "{text}");
        }
        assert_eq!(Location::parse("1:2").to_string(), "1:2");
        assert_eq!(Location::parse("").to_string(), "");
    }

    #[test]
    fn grouping_predicates() {
        let a = Location::parse("1:2");
        let b = Location::parse("1:3");
        let c = Location::parse("2:1");
        assert!(a.same_process(&b));
        assert!(!a.same_process(&c));
        assert!(a.same_host(&c));
        assert_eq!(a.process_key(), b.process_key());
    }
}
