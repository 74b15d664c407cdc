//! Recorder command protocol client.
//!
//! Every command is a JSON object tagged with a request id and a `type`. The reply
//! is a `result` envelope carrying the same id. The client owns its transport and the
//! id counter, so one client means one logical connection with one request in flight.

use std::collections::BTreeSet;

use chrono::{SecondsFormat, TimeZone, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::store::{StatStore, StatisticType, StoreError};
use crate::{SeriesMetadata, StatPoint};

pub trait CommandTransport {
    fn send_command(&mut self, command: &Value) -> Result<Value, StoreError>;
}

pub struct RemoteStatClient<T> {
    transport: T,
    next_id: u64,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    id: u64,
    #[serde(rename = "type")]
    kind: String,
    success: bool,
    #[serde(default)]
    result: Value,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    start: Value,
    #[serde(default)]
    state: Option<f64>,
    #[serde(default)]
    sum: Option<f64>,
}

impl<T: CommandTransport> RemoteStatClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: 1,
        }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn call(&mut self, command_type: &str, fields: Value) -> Result<Value, StoreError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut command = match fields {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(StoreError::Protocol(format!(
                    "command fields must be an object, got {other}"
                )))
            }
        };
        command.insert("id".to_string(), json!(id));
        command.insert("type".to_string(), json!(command_type));

        debug!(
            component = "remote_store",
            event = "remote.command.send",
            id,
            command = command_type
        );
        let reply = self.transport.send_command(&Value::Object(command))?;
        let envelope: ResultEnvelope = serde_json::from_value(reply).map_err(|err| {
            StoreError::Protocol(format!("malformed reply to {command_type}: {err}"))
        })?;

        if envelope.id != id {
            return Err(StoreError::Protocol(format!(
                "reply id {} does not match request id {id}",
                envelope.id
            )));
        }
        if envelope.kind != "result" {
            return Err(StoreError::Protocol(format!(
                "unexpected reply type {} for {command_type}",
                envelope.kind
            )));
        }
        if !envelope.success {
            let (code, message) = envelope
                .error
                .map(|err| (err.code, err.message))
                .unwrap_or_else(|| ("unknown_error".to_string(), String::new()));
            return Err(StoreError::Rejected {
                command: command_type.to_string(),
                code,
                message,
            });
        }

        Ok(envelope.result)
    }
}

impl<T: CommandTransport> StatStore for RemoteStatClient<T> {
    fn statistics_during_period(
        &mut self,
        statistic_id: &str,
        start_ts_ms_utc: i64,
        end_ts_ms_utc_exclusive: i64,
    ) -> Result<Vec<StatPoint>, StoreError> {
        let result = self.call(
            "recorder/statistics_during_period",
            json!({
                "start_time": rfc3339(start_ts_ms_utc)?,
                "end_time": rfc3339(end_ts_ms_utc_exclusive)?,
                "statistic_ids": [statistic_id],
                "period": "day",
                "types": ["state", "sum"],
            }),
        )?;

        let Some(raw_points) = result.get(statistic_id) else {
            return Ok(Vec::new());
        };
        let wire: Vec<WirePoint> = serde_json::from_value(raw_points.clone()).map_err(|err| {
            StoreError::Protocol(format!("malformed points for {statistic_id}: {err}"))
        })?;

        let mut points = Vec::with_capacity(wire.len());
        for point in wire {
            let point_start = parse_start(&point.start)?;
            // The recorder also returns a point starting exactly at `end_time`.
            if point_start < start_ts_ms_utc || point_start >= end_ts_ms_utc_exclusive {
                continue;
            }
            points.push(StatPoint {
                start_ts_ms_utc: point_start,
                state: point.state,
                sum: point.sum.unwrap_or(0.0),
            });
        }
        points.sort_by_key(|point| point.start_ts_ms_utc);
        Ok(points)
    }

    fn list_statistic_ids(
        &mut self,
        statistic_type: StatisticType,
    ) -> Result<BTreeSet<String>, StoreError> {
        let result = self.call(
            "recorder/list_statistic_ids",
            json!({ "statistic_type": statistic_type.as_str() }),
        )?;

        let entries = result.as_array().ok_or_else(|| {
            StoreError::Protocol("list_statistic_ids result is not an array".to_string())
        })?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("statistic_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn import_statistics(
        &mut self,
        metadata: &SeriesMetadata,
        points: &[StatPoint],
    ) -> Result<(), StoreError> {
        let mut stats = Vec::with_capacity(points.len());
        for point in points {
            let mut stat = json!({
                "start": rfc3339(point.start_ts_ms_utc)?,
                "sum": point.sum,
            });
            if let Some(state) = point.state {
                stat["state"] = json!(state);
            }
            stats.push(stat);
        }

        self.call(
            "recorder/import_statistics",
            json!({
                "metadata": {
                    "has_mean": false,
                    "has_sum": true,
                    "name": metadata.name,
                    "source": metadata.source,
                    "statistic_id": metadata.statistic_id,
                    "unit_of_measurement": metadata.unit,
                },
                "stats": stats,
            }),
        )?;
        Ok(())
    }

    fn adjust_sum(
        &mut self,
        statistic_id: &str,
        start_ts_ms_utc: i64,
        adjustment: f64,
        unit: &str,
    ) -> Result<(), StoreError> {
        self.call(
            "recorder/adjust_sum_statistics",
            json!({
                "statistic_id": statistic_id,
                "start_time": rfc3339(start_ts_ms_utc)?,
                "adjustment": adjustment,
                "adjustment_unit_of_measurement": unit,
            }),
        )?;
        Ok(())
    }

    fn clear_statistics(&mut self, statistic_ids: &[String]) -> Result<(), StoreError> {
        self.call(
            "recorder/clear_statistics",
            json!({ "statistic_ids": statistic_ids }),
        )?;
        Ok(())
    }
}

// The recorder only speaks this protocol over a websocket, so `url` must point at
// an HTTP bridge that relays each command and returns the reply.
pub struct HttpCommandTransport {
    client: reqwest::blocking::Client,
    url: String,
    token: String,
}

impl HttpCommandTransport {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }
}

impl CommandTransport for HttpCommandTransport {
    fn send_command(&mut self, command: &Value) -> Result<Value, StoreError> {
        let body = serde_json::to_vec(command)
            .map_err(|err| StoreError::Protocol(format!("unserializable command: {err}")))?;

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|err| StoreError::Connection(format!("{}: {err}", self.url)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Auth(format!("{} answered {status}", self.url)));
        }
        if !status.is_success() {
            return Err(StoreError::Connection(format!(
                "unexpected HTTP status {status} from {}",
                self.url
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|err| StoreError::Connection(format!("{}: {err}", self.url)))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::Protocol(format!("reply is not JSON: {err}")))
    }
}

fn rfc3339(ts_ms_utc: i64) -> Result<String, StoreError> {
    Utc.timestamp_millis_opt(ts_ms_utc)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or(StoreError::InvalidTimestamp(ts_ms_utc))
}

fn parse_start(value: &Value) -> Result<i64, StoreError> {
    if let Some(ms) = value.as_i64() {
        return Ok(ms);
    }
    if let Some(ms) = value.as_f64() {
        return Ok(ms.round() as i64);
    }
    if let Some(text) = value.as_str() {
        return chrono::DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp_millis())
            .map_err(|_| StoreError::Protocol(format!("unparseable point start '{text}'")));
    }
    Err(StoreError::Protocol(format!("unparseable point start {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::{Direction, SeriesId};

    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Value>,
        sent: Vec<Value>,
    }

    impl ScriptedTransport {
        fn reply(mut self, reply: Value) -> Self {
            self.replies.push_back(reply);
            self
        }
    }

    impl CommandTransport for ScriptedTransport {
        fn send_command(&mut self, command: &Value) -> Result<Value, StoreError> {
            self.sent.push(command.clone());
            self.replies
                .pop_front()
                .ok_or_else(|| StoreError::Connection("script exhausted".to_string()))
        }
    }

    fn ok(id: u64, result: Value) -> Value {
        json!({ "id": id, "type": "result", "success": true, "result": result })
    }

    #[test]
    fn request_ids_increase_per_command() {
        let transport = ScriptedTransport::default()
            .reply(ok(1, json!([])))
            .reply(ok(2, Value::Null));
        let mut client = RemoteStatClient::new(transport);

        client.list_statistic_ids(StatisticType::Sum).unwrap();
        client.clear_statistics(&["meter:1".to_string()]).unwrap();

        let sent = client.into_transport().sent;
        assert_eq!(sent[0]["id"], 1);
        assert_eq!(sent[0]["type"], "recorder/list_statistic_ids");
        assert_eq!(sent[0]["statistic_type"], "sum");
        assert_eq!(sent[1]["id"], 2);
        assert_eq!(sent[1]["statistic_ids"], json!(["meter:1"]));
    }

    #[test]
    fn query_parses_integer_and_float_starts() {
        let transport = ScriptedTransport::default().reply(ok(
            1,
            json!({
                "meter:1": [
                    { "start": 1_735_689_600_000_i64, "end": 1_735_776_000_000_i64, "sum": 3.5, "state": 1.0 },
                    { "start": 1_735_776_000_000.0, "sum": 4.5 },
                ]
            }),
        ));
        let mut client = RemoteStatClient::new(transport);

        let points = client
            .statistics_during_period("meter:1", 1_735_689_600_000, 1_735_862_400_000)
            .unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].start_ts_ms_utc, 1_735_689_600_000);
        assert_eq!(points[0].state, Some(1.0));
        assert_eq!(points[1].start_ts_ms_utc, 1_735_776_000_000);
        assert_eq!(points[1].sum, 4.5);

        let sent = &client.into_transport().sent[0];
        assert_eq!(sent["period"], "day");
        assert_eq!(sent["start_time"], "2025-01-01T00:00:00Z");
        assert_eq!(sent["end_time"], "2025-01-03T00:00:00Z");
    }

    #[test]
    fn query_drops_point_at_exclusive_end() {
        let transport = ScriptedTransport::default().reply(ok(
            1,
            json!({ "meter:1": [ { "start": 2_000, "sum": 1.0 } ] }),
        ));
        let mut client = RemoteStatClient::new(transport);

        let points = client
            .statistics_during_period("meter:1", 1_000, 2_000)
            .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn missing_series_key_reads_as_empty() {
        let transport = ScriptedTransport::default().reply(ok(1, json!({})));
        let mut client = RemoteStatClient::new(transport);

        let points = client
            .statistics_during_period("meter:unknown", 0, 86_400_000)
            .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn import_and_adjust_payloads_match_recorder_shape() {
        let transport = ScriptedTransport::default()
            .reply(ok(1, Value::Null))
            .reply(ok(2, Value::Null));
        let mut client = RemoteStatClient::new(transport);
        let meta = SeriesId::energy("1", Direction::Consumption).metadata("EUR");

        client
            .import_statistics(
                &meta,
                &[StatPoint {
                    start_ts_ms_utc: 1_735_689_600_000,
                    state: Some(2.0),
                    sum: 12.0,
                }],
            )
            .unwrap();
        client
            .adjust_sum("meter:1", 1_735_776_000_000, 8.0, "kWh")
            .unwrap();

        let sent = client.into_transport().sent;
        assert_eq!(sent[0]["type"], "recorder/import_statistics");
        assert_eq!(sent[0]["metadata"]["unit_of_measurement"], "kWh");
        assert_eq!(sent[0]["metadata"]["has_sum"], true);
        assert_eq!(sent[0]["stats"][0]["start"], "2025-01-01T00:00:00Z");
        assert_eq!(sent[0]["stats"][0]["sum"], 12.0);
        assert_eq!(sent[1]["type"], "recorder/adjust_sum_statistics");
        assert_eq!(sent[1]["adjustment"], 8.0);
        assert_eq!(sent[1]["start_time"], "2025-01-02T00:00:00Z");
    }

    #[test]
    fn error_envelope_becomes_rejected() {
        let transport = ScriptedTransport::default().reply(json!({
            "id": 1,
            "type": "result",
            "success": false,
            "error": { "code": "invalid_format", "message": "bad unit" }
        }));
        let mut client = RemoteStatClient::new(transport);

        let err = client
            .adjust_sum("meter:1", 0, 1.0, "kWh")
            .unwrap_err();
        match err {
            StoreError::Rejected {
                command,
                code,
                message,
            } => {
                assert_eq!(command, "recorder/adjust_sum_statistics");
                assert_eq!(code, "invalid_format");
                assert_eq!(message, "bad unit");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn mismatched_reply_id_is_a_protocol_error() {
        let transport = ScriptedTransport::default().reply(ok(7, json!([])));
        let mut client = RemoteStatClient::new(transport);

        let err = client.list_statistic_ids(StatisticType::Sum).unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }

    #[test]
    fn transport_failure_is_fatal() {
        let mut client = RemoteStatClient::new(ScriptedTransport::default());
        let err = client.list_statistic_ids(StatisticType::Sum).unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(feature = "live-remote-tests")]
    #[test]
    #[ignore = "requires a reachable recorder endpoint"]
    fn live_remote_lists_statistics() {
        let url = std::env::var("STATFILL_REMOTE_URL").expect("STATFILL_REMOTE_URL must be set");
        let token =
            std::env::var("STATFILL_REMOTE_TOKEN").expect("STATFILL_REMOTE_TOKEN must be set");
        let transport = HttpCommandTransport::new(url, token, 15_000).unwrap();
        let mut client = RemoteStatClient::new(transport);

        client.list_statistic_ids(StatisticType::Sum).unwrap();
    }
}
