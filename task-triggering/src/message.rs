//! Wire format for trigger messages.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reference to a task as the external task store identifies it. The core
/// never sees the task payload itself — only this header, plus whatever
/// `type` selects the handler that knows how to execute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: i64,
    pub version: i64,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Submitted,
    Waiting,
    Processing,
    Error,
    Done,
}

/// JSON encoding of a [`TaskRef`] as it travels over the wire. Unknown
/// properties are tolerated on deserialization via `#[serde(default)]` on
/// every field that isn't strictly required, so a producer ahead of a
/// consumer on the schema doesn't break delivery.
pub type TriggerMessage = TaskRef;

/// A random, never-zero 16-bit value used as the produce key purely to
/// distribute across partitions: the broker client's default partitioner
/// batches messages with the same key onto one partition for efficiency,
/// which would undermine the fan-out this system depends on. Any per-send
/// entropy source would do; this one picks a random non-surrogate UTF-16
/// code point so it's representable as a `char`.
pub fn random_partitioning_key() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let candidate: u16 = rng.gen_range(1..=u16::MAX);
        if let Some(ch) = char::from_u32(candidate as u32) {
            return ch.to_string();
        }
        // candidate fell in the UTF-16 surrogate range (0xD800..=0xDFFF),
        // which isn't a valid standalone scalar value; resample.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_partitioning_key_is_never_empty() {
        for _ in 0..1000 {
            assert!(!random_partitioning_key().is_empty());
        }
    }

    #[test]
    fn task_ref_round_trips_through_json() {
        let task = TaskRef {
            id: 42,
            version: 3,
            task_type: "send_email".to_string(),
            priority: 5,
            status: TaskStatus::Submitted,
        };
        let json = serde_json::to_string(&task).unwrap();
        let decoded: TaskRef = serde_json::from_str(&json).unwrap();
        assert_eq!(task, decoded);
    }

    #[test]
    fn unknown_properties_are_tolerated_on_deserialize() {
        let json = r#"{"id":1,"version":0,"type":"x","priority":0,"status":"SUBMITTED","extra":"ignored"}"#;
        let decoded: TaskRef = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.id, 1);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"id":1,"version":0,"type":"x"}"#;
        let decoded: TaskRef = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.priority, 0);
        assert_eq!(decoded.status, TaskStatus::Submitted);
    }
}
