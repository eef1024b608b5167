//! co2map.de historical intensity API.
//!
//! One call fetches one batch: `GET <base>/<series-path>?state=..&start=..&end=..`
//! and returns the record array under the series-specific key.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::data::retry::{AbandonReason, Attempt, Backoff, RetryPolicy, RetryState};
use crate::data::transport::{Pause, Transport};
use crate::domain::{DateWindow, EntityKey, HttpSettings};
use crate::io::store::RawRecord;

pub const DEFAULT_BASE_URL: &str = "https://api.co2map.de/";

/// How a single batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Fetched { attempts: u32 },
    /// Still rate limited after the full request budget.
    Exhausted { attempts: u32 },
    /// Non-retryable failure.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub records: Vec<RawRecord>,
    pub status: BatchStatus,
}

impl BatchResult {
    pub fn is_fetched(&self) -> bool {
        matches!(self.status, BatchStatus::Fetched { .. })
    }
}

/// Client for the historical endpoints.
pub struct IntensityClient<T, P> {
    transport: T,
    pause: P,
    base_url: String,
    settings: HttpSettings,
}

impl<T: Transport, P: Pause> IntensityClient<T, P> {
    pub fn new(transport: T, pause: P, base_url: impl Into<String>, settings: HttpSettings) -> Self {
        Self {
            transport,
            pause,
            base_url: base_url.into(),
            settings,
        }
    }

    pub fn pause(&self) -> &P {
        &self.pause
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    pub fn endpoint(&self, entity: &EntityKey) -> String {
        join_url(&self.base_url, entity.kind.series_path())
    }

    /// Fetch one batch, retrying only on HTTP 429.
    ///
    /// Never fails: problems are logged and reported through `BatchStatus`,
    /// with an empty record list.
    pub fn fetch_batch(&self, entity: &EntityKey, batch: &DateWindow) -> BatchResult {
        let url = self.endpoint(entity);
        let query = [
            ("state", entity.state.code().to_string()),
            ("start", batch.start.to_string()),
            ("end", batch.end.to_string()),
        ];

        self.pause.pause(self.settings.request_delay);

        let mut backoff = Backoff::new(RetryPolicy {
            max_attempts: self.settings.retries,
            base_delay: self.settings.base_delay,
        });
        let mut records = Vec::new();
        let mut failure = String::new();

        loop {
            match backoff.state() {
                RetryState::Ready { attempt } => {
                    debug!(%entity, %batch, attempt, "requesting batch");
                    let outcome = match self.transport.get(&url, &query) {
                        Ok(reply) if reply.is_success() => match extract_records(&reply.body, entity) {
                            Ok(found) => {
                                records = found;
                                Attempt::Succeeded
                            }
                            Err(e) => {
                                failure = e;
                                Attempt::Failed
                            }
                        },
                        Ok(reply) if reply.is_rate_limited() => Attempt::RateLimited {
                            retry_after: reply.retry_after_secs().map(Duration::from_secs),
                        },
                        Ok(reply) => {
                            failure = format!("HTTP {}", reply.status);
                            Attempt::Failed
                        }
                        Err(e) => {
                            failure = e.to_string();
                            Attempt::Failed
                        }
                    };
                    backoff.record(outcome);
                }
                RetryState::Backoff { wait, next_attempt } => {
                    warn!(
                        %entity,
                        %batch,
                        wait_secs = wait.as_secs_f64(),
                        next_attempt,
                        "rate limit exceeded, backing off"
                    );
                    self.pause.pause(wait);
                    backoff.resume();
                }
                RetryState::Succeeded { attempts } => {
                    return BatchResult {
                        records,
                        status: BatchStatus::Fetched { attempts },
                    };
                }
                RetryState::Abandoned {
                    attempts,
                    reason: AbandonReason::Exhausted,
                } => {
                    warn!(%entity, %batch, attempts, "giving up on batch after repeated rate limiting");
                    return BatchResult {
                        records: Vec::new(),
                        status: BatchStatus::Exhausted { attempts },
                    };
                }
                RetryState::Abandoned {
                    reason: AbandonReason::Fatal,
                    ..
                } => {
                    warn!(%entity, %batch, error = %failure, "batch failed");
                    return BatchResult {
                        records: Vec::new(),
                        status: BatchStatus::Failed { reason: failure },
                    };
                }
            }
        }
    }
}

/// Pull the record array for `entity`'s series kind out of a response body.
///
/// A missing key is an empty batch, not an error.
pub fn extract_records(body: &str, entity: &EntityKey) -> Result<Vec<RawRecord>, String> {
    let json: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON response: {e}"))?;
    let key = entity.kind.response_key();
    let items = match json.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(format!("`{key}` is not an array")),
    };

    let mut out = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    for item in items {
        match RawRecord::from_json(item) {
            Some(r) => out.push(r),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(%entity, skipped, "dropped records without a parseable start");
    }
    Ok(out)
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transport::testing::{RecordingPause, ScriptedTransport, rate_limited, reply};
    use crate::data::transport::TransportError;
    use crate::domain::{IntensityKind, StateCode};
    use chrono::NaiveDate;

    fn entity() -> EntityKey {
        EntityKey::new(StateCode::Bw, IntensityKind::Consumption)
    }

    fn batch() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 5).unwrap(),
        )
        .unwrap()
    }

    fn body(n: usize) -> String {
        let items: Vec<_> = (0..n)
            .map(|h| serde_json::json!({ "start": format!("2022-01-01T{h:02}:00:00"), "value": 100 + h }))
            .collect();
        serde_json::json!({ "Consumption-based Intensity (historical)": items }).to_string()
    }

    fn client<'a>(
        t: &'a ScriptedTransport,
        p: &'a RecordingPause,
    ) -> IntensityClient<&'a ScriptedTransport, &'a RecordingPause> {
        IntensityClient::new(t, p, "https://api.example/", HttpSettings::default())
    }

    #[test]
    fn builds_query_and_endpoint() {
        let t = ScriptedTransport::new(|_, _| reply(200, "{}"));
        let p = RecordingPause::default();
        let result = client(&t, &p).fetch_batch(&entity(), &batch());

        assert!(result.is_fetched());
        assert!(result.records.is_empty());
        let calls = t.calls.borrow();
        assert_eq!(calls[0].0, "https://api.example/ConsumptionIntensityHistorical/");
        assert_eq!(
            calls[0].1,
            vec![
                ("state".to_string(), "BW".to_string()),
                ("start".to_string(), "2022-01-01".to_string()),
                ("end".to_string(), "2022-01-05".to_string()),
            ]
        );
        // Proactive delay before the request.
        assert_eq!(p.pauses.borrow().as_slice(), &[Duration::from_secs(1)]);
    }

    #[test]
    fn parses_records_under_series_key() {
        let t = ScriptedTransport::new(|_, _| reply(200, &body(3)));
        let p = RecordingPause::default();
        let result = client(&t, &p).fetch_batch(&entity(), &batch());
        assert_eq!(result.records.len(), 3);
        assert_eq!(result.status, BatchStatus::Fetched { attempts: 1 });
    }

    #[test]
    fn always_rate_limited_is_abandoned_after_budget() {
        let t = ScriptedTransport::new(|_, _| rate_limited(None));
        let p = RecordingPause::default();
        let result = client(&t, &p).fetch_batch(&entity(), &batch());

        assert!(result.records.is_empty());
        assert_eq!(result.status, BatchStatus::Exhausted { attempts: 5 });
        assert_eq!(t.call_count(), 5);
        let secs: Vec<u64> = p.pauses.borrow().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 30, 60, 120, 240]);
    }

    #[test]
    fn honours_numeric_retry_after() {
        let t = ScriptedTransport::new(|_, _| reply(200, &body(1)));
        t.push(rate_limited(Some("3")));
        t.push(rate_limited(Some("Wed, 21 Oct 2015 07:28:00 GMT")));
        let p = RecordingPause::default();
        let result = client(&t, &p).fetch_batch(&entity(), &batch());

        assert_eq!(result.status, BatchStatus::Fetched { attempts: 3 });
        assert_eq!(result.records.len(), 1);
        let secs: Vec<u64> = p.pauses.borrow().iter().map(|d| d.as_secs()).collect();
        // 3s from the header, then the doubled delay since the date form is ignored.
        assert_eq!(secs, vec![1, 3, 6]);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let t = ScriptedTransport::new(|_, _| reply(200, &body(2)));
        t.push(reply(500, "boom"));
        let p = RecordingPause::default();
        let result = client(&t, &p).fetch_batch(&entity(), &batch());
        assert_eq!(t.call_count(), 1);
        assert!(result.records.is_empty());
        assert!(matches!(result.status, BatchStatus::Failed { .. }));

        let t = ScriptedTransport::new(|url, _| {
            Err(TransportError::Request {
                url: url.to_string(),
                message: "connection refused".into(),
            })
        });
        let result = client(&t, &p).fetch_batch(&entity(), &batch());
        assert_eq!(t.call_count(), 1);
        assert!(matches!(result.status, BatchStatus::Failed { reason } if reason.contains("connection refused")));
    }

    #[test]
    fn missing_key_is_empty_and_bad_json_fails() {
        let e = entity();
        assert!(extract_records(r#"{"other": []}"#, &e).unwrap().is_empty());
        assert!(extract_records("not json", &e).is_err());
        assert!(extract_records(r#"{"Consumption-based Intensity (historical)": 5}"#, &e).is_err());

        let prod = EntityKey::new(StateCode::Bw, IntensityKind::Production);
        // Consumption key is ignored for production series.
        assert!(extract_records(&body(2), &prod).unwrap().is_empty());
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("https://a/", "B/"), "https://a/B/");
        assert_eq!(join_url("https://a", "/B/"), "https://a/B/");
    }
}
