use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    pub backtest_id: String,
    #[serde(default, skip_serializing)]
    pub bearer_token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub user_agent: String,
}

/// Samples recorded for one subgroup.
///
/// The endpoint sends either a bare number or an array of numbers per slot;
/// the shape is resolved here once so nothing downstream has to branch on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleSet {
    One(f64),
    Many(Vec<f64>),
}

impl SampleSet {
    pub fn values(&self) -> &[f64] {
        match self {
            SampleSet::One(v) => std::slice::from_ref(v),
            SampleSet::Many(vs) => vs,
        }
    }
}

/// Parallel subgroup labels and sample sets for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSeries {
    pub x: Vec<String>,
    pub y: Vec<SampleSet>,
}

/// Decoded box-plot payload, groups kept in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResponse {
    pub groups: Vec<(String, GroupSeries)>,
}

impl<'de> Deserialize<'de> for RawResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct GroupsVisitor;

        impl<'de> Visitor<'de> for GroupsVisitor {
            type Value = RawResponse;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping group names to {x, y} series")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut groups: Vec<(String, GroupSeries)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, series)) = map.next_entry::<String, GroupSeries>()? {
                    // A repeated key keeps its first position and takes the last value.
                    match groups.iter_mut().find(|(existing, _)| *existing == name) {
                        Some((_, slot)) => *slot = series,
                        None => groups.push((name, series)),
                    }
                }
                Ok(RawResponse { groups })
            }
        }

        deserializer.deserialize_map(GroupsVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(deserialize_with = "nan_from_null")]
    pub mu: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub sd: f64,
    pub n: usize,
    #[serde(deserialize_with = "nan_from_null")]
    pub value: f64,
}

// serde_json writes non-finite floats as null; read them back as NaN.
fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// One row of box-plot input: a subgroup and the statistics of its samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub group: String,
    pub subgroup: String,
    #[serde(flatten)]
    pub stats: Statistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxPlotReport {
    pub timestamp_utc: String,
    pub run_id: String,
    pub backtest_id: String,
    pub source: String,
    pub records: Vec<SummaryRecord>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    Started {
        backtest_id: String,
        url: String,
    },
    Completed {
        backtest_id: String,
        bytes: usize,
    },
    Failed {
        backtest_id: String,
        message: String,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the engine and consumed by the CLI layer.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    ReadingFile { path: String },
    UnauthenticatedRequest,
}

impl InfoEvent {
    /// Render a human-readable message for the CLI.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::ReadingFile { path } => format!("Reading box-plot data from {}", path),
            InfoEvent::UnauthenticatedRequest => {
                "No bearer token configured; sending unauthenticated request".to_string()
            }
        }
    }
}

impl FetchEvent {
    pub fn to_message(&self) -> String {
        match self {
            FetchEvent::Started { backtest_id, url } => {
                format!("Fetching backtest {backtest_id} from {url}")
            }
            FetchEvent::Completed { backtest_id, bytes } => {
                format!("Fetched backtest {backtest_id} ({bytes} bytes)")
            }
            FetchEvent::Failed {
                backtest_id,
                message,
            } => format!("Fetch failed for backtest {backtest_id}: {message}"),
            FetchEvent::Info(info) => info.to_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_groups_in_document_order() {
        let raw: RawResponse = serde_json::from_str(
            r#"{"zeta": {"x": ["A"], "y": [1]}, "alpha": {"x": [], "y": []}, "mid": {"x": ["B"], "y": [[2, 3]]}}"#,
        )
        .unwrap();
        let names: Vec<&str> = raw.groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn repeated_group_key_keeps_first_position_last_value() {
        let raw: RawResponse = serde_json::from_str(
            r#"{"G1": {"x": ["A"], "y": [1]}, "G2": {"x": ["B"], "y": [2]}, "G1": {"x": ["C"], "y": [3]}}"#,
        )
        .unwrap();
        let names: Vec<&str> = raw.groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["G1", "G2"]);
        assert_eq!(raw.groups[0].1.x, vec!["C"]);
        assert_eq!(raw.groups[0].1.y, vec![SampleSet::One(3.0)]);
    }

    #[test]
    fn fetch_config_round_trips_without_token() {
        let cfg = FetchConfig {
            base_url: "https://example.net".into(),
            backtest_id: "bt".into(),
            bearer_token: Some("s3cret".into()),
            timeout: Duration::from_millis(1500),
            user_agent: "ua".into(),
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["timeout"], "1s 500ms");
        assert!(json.get("bearer_token").is_none());

        let back: FetchConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_millis(1500));
        assert_eq!(back.backtest_id, "bt");
        assert!(back.bearer_token.is_none());
    }

    #[test]
    fn sample_slot_resolves_scalar_or_array() {
        let series: GroupSeries =
            serde_json::from_str(r#"{"x": ["A", "B"], "y": [[1, 2.5], 5]}"#).unwrap();
        assert_eq!(series.y[0], SampleSet::Many(vec![1.0, 2.5]));
        assert_eq!(series.y[1], SampleSet::One(5.0));
        assert_eq!(series.y[1].values(), &[5.0]);
    }

    #[test]
    fn missing_y_is_a_decode_error() {
        let err = serde_json::from_str::<RawResponse>(r#"{"G1": {"x": ["A"]}}"#).unwrap_err();
        assert!(err.to_string().contains("missing field `y`"));
    }

    #[test]
    fn non_numeric_samples_are_rejected() {
        assert!(serde_json::from_str::<RawResponse>(r#"{"G1": {"x": ["A"], "y": ["oops"]}}"#)
            .is_err());
    }

    #[test]
    fn record_serializes_flat_and_round_trips_nan() {
        let rec = SummaryRecord {
            group: "G1".into(),
            subgroup: "A".into(),
            stats: Statistics {
                mu: f64::NAN,
                sd: f64::NAN,
                n: 0,
                value: f64::NAN,
            },
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(
            json,
            r#"{"group":"G1","subgroup":"A","mu":null,"sd":null,"n":0,"value":null}"#
        );
        let back: SummaryRecord = serde_json::from_str(&json).unwrap();
        assert!(back.stats.mu.is_nan());
        assert_eq!(back.stats.n, 0);
    }
}
