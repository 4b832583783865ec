//! Canonical event handed to stream handlers:
//! `{ "records": [ { "stream": { approximateArrivalTimestamp, data, partitionKey, sequenceNumber } } ] }`.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::RawRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordEnvelope {
    pub approximate_arrival_timestamp: Option<DateTime<Utc>>,
    /// Base64 of the record payload.
    pub data: String,
    pub partition_key: String,
    pub sequence_number: String,
}

impl RecordEnvelope {
    pub fn from_raw(record: &RawRecord) -> Self {
        Self {
            approximate_arrival_timestamp: record.arrival_timestamp,
            data: BASE64_STANDARD.encode(&record.payload),
            partition_key: record.partition_key.clone(),
            sequence_number: record.sequence_number.clone(),
        }
    }

    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamRecord {
    pub stream: RecordEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamEvent {
    pub records: Vec<StreamRecord>,
}

impl StreamEvent {
    /// Wraps a whole batch, preserving broker order.
    pub fn from_records(records: &[RawRecord]) -> Self {
        Self {
            records: records
                .iter()
                .map(|record| StreamRecord {
                    stream: RecordEnvelope::from_raw(record),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(payload: &[u8], key: &str, sequence: &str) -> RawRecord {
        RawRecord {
            arrival_timestamp: None,
            payload: payload.to_vec(),
            partition_key: key.to_string(),
            sequence_number: sequence.to_string(),
        }
    }

    #[test]
    fn serializes_to_handler_contract() {
        let event = StreamEvent::from_records(&[raw(b"Hello!", "1", "1")]);

        assert_eq!(
            serde_json::to_value(&event).expect("event should serialize"),
            json!({
                "records": [
                    {
                        "stream": {
                            "approximateArrivalTimestamp": null,
                            "data": "SGVsbG8h",
                            "partitionKey": "1",
                            "sequenceNumber": "1",
                        }
                    }
                ]
            })
        );
    }

    #[test]
    fn arrival_timestamp_is_rfc3339() {
        let mut record = raw(b"x", "k", "7");
        record.arrival_timestamp = DateTime::from_timestamp(1_700_000_000, 0);

        let value = serde_json::to_value(RecordEnvelope::from_raw(&record))
            .expect("envelope should serialize");

        assert_eq!(
            value["approximateArrivalTimestamp"],
            json!("2023-11-14T22:13:20Z")
        );
    }

    #[test]
    fn data_decodes_back_to_payload() {
        let payloads: [&[u8]; 4] = [b"", b"Hello!", &[0, 159, 255, 1, 2], b"{\"id\":1}"];
        let records: Vec<RawRecord> = payloads
            .iter()
            .enumerate()
            .map(|(index, payload)| raw(payload, "pk", &index.to_string()))
            .collect();

        let event = StreamEvent::from_records(&records);

        for (record, wrapped) in records.iter().zip(&event.records) {
            assert_eq!(
                wrapped.stream.decode_data().expect("data should decode"),
                record.payload
            );
        }
    }

    #[test]
    fn preserves_batch_order() {
        let records = vec![raw(b"a", "1", "10"), raw(b"b", "1", "11"), raw(b"c", "2", "12")];

        let sequence_numbers: Vec<String> = StreamEvent::from_records(&records)
            .records
            .into_iter()
            .map(|record| record.stream.sequence_number)
            .collect();

        assert_eq!(sequence_numbers, vec!["10", "11", "12"]);
    }
}
