//! Flow record and key definitions
//!
//! A [`FlowRecord`] is either a single measurement reported by a client or an
//! hourly aggregate computed by the store. Both share the same JSON shape.

use serde::{Deserialize, Serialize};

/// Hour bucket. Signed so that out-of-range hours can be decoded and then
/// rejected with a proper error instead of a codec failure.
pub type Hour = i64;

/// Network bytes transmitted and received by one flow tuple during one hour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Source application name
    pub src_app: String,

    /// Destination application name
    pub dst_app: String,

    /// Network zone (VPC) the flow was observed in
    pub vpc_id: String,

    /// Bytes sent from source to destination
    pub bytes_tx: u64,

    /// Bytes received by the source
    pub bytes_rx: u64,

    /// Hour bucket the measurement belongs to
    pub hour: Hour,
}

impl FlowRecord {
    pub fn new(
        src_app: impl Into<String>,
        dst_app: impl Into<String>,
        vpc_id: impl Into<String>,
        bytes_tx: u64,
        bytes_rx: u64,
        hour: Hour,
    ) -> Self {
        Self {
            src_app: src_app.into(),
            dst_app: dst_app.into(),
            vpc_id: vpc_id.into(),
            bytes_tx,
            bytes_rx,
            hour,
        }
    }

    /// Identity of the stream this record belongs to.
    pub fn key(&self) -> FlowKey {
        FlowKey {
            src_app: self.src_app.clone(),
            dst_app: self.dst_app.clone(),
            vpc_id: self.vpc_id.clone(),
        }
    }
}

/// Unique `(source, destination, zone)` tuple identifying a flow stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_app: String,
    pub dst_app: String,
    pub vpc_id: String,
}

impl FlowKey {
    pub fn new(
        src_app: impl Into<String>,
        dst_app: impl Into<String>,
        vpc_id: impl Into<String>,
    ) -> Self {
        Self {
            src_app: src_app.into(),
            dst_app: dst_app.into(),
            vpc_id: vpc_id.into(),
        }
    }

    /// Build a record for this key with the given counters.
    pub fn record(&self, bytes_tx: u64, bytes_rx: u64, hour: Hour) -> FlowRecord {
        FlowRecord {
            src_app: self.src_app.clone(),
            dst_app: self.dst_app.clone(),
            vpc_id: self.vpc_id.clone(),
            bytes_tx,
            bytes_rx,
            hour,
        }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}@{}", self.src_app, self.dst_app, self.vpc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_names() {
        let record = FlowRecord::new("foo", "bar", "vpc-0", 100, 300, 1);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "src_app": "foo",
                "dst_app": "bar",
                "vpc_id": "vpc-0",
                "bytes_tx": 100,
                "bytes_rx": 300,
                "hour": 1,
            })
        );
    }

    #[test]
    fn test_decode_rejects_negative_bytes() {
        let json = r#"{"src_app":"a","dst_app":"b","vpc_id":"v","bytes_tx":-1,"bytes_rx":0,"hour":1}"#;
        assert!(serde_json::from_str::<FlowRecord>(json).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let json = r#"{"src_app":"a","dst_app":"b","bytes_tx":1,"bytes_rx":0,"hour":1}"#;
        assert!(serde_json::from_str::<FlowRecord>(json).is_err());
    }

    #[test]
    fn test_decode_keeps_non_positive_hour() {
        let json = r#"{"src_app":"a","dst_app":"b","vpc_id":"v","bytes_tx":1,"bytes_rx":2,"hour":-3}"#;
        let record: FlowRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.hour, -3);
    }

    #[test]
    fn test_key_ignores_counters_and_hour() {
        let a = FlowRecord::new("foo", "bar", "vpc-0", 100, 300, 1);
        let b = FlowRecord::new("foo", "bar", "vpc-0", 7, 9, 42);
        let c = FlowRecord::new("foo", "bar", "vpc-1", 100, 300, 1);

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_key_record_round_trip() {
        let key = FlowKey::new("baz", "qux", "vpc-1");
        let record = key.record(5, 6, 2);
        assert_eq!(record.key(), key);
        assert_eq!(record, FlowRecord::new("baz", "qux", "vpc-1", 5, 6, 2));
        assert_eq!(key.to_string(), "baz->qux@vpc-1");
    }
}
