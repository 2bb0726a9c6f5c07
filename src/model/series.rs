use serde::{Deserialize, Serialize};

/// One sample of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix milliseconds.
    pub timestamp: i64,
    pub value: f64,
}

/// Reduction applied to each bucket of a ranged time-series query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    First,
    Last,
}

string_enum!(Aggregation {
    Avg => "avg",
    Sum => "sum",
    Min => "min",
    Max => "max",
    Count => "count",
    First => "first",
    Last => "last",
});

impl Aggregation {
    /// Reduce the values of one bucket, in timestamp order.
    /// Returns `None` for an empty bucket.
    pub fn reduce(self, values: &[f64]) -> Option<f64> {
        let (first, last) = (values.first()?, values.last()?);
        Some(match self {
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Count => values.len() as f64,
            Aggregation::First => *first,
            Aggregation::Last => *last,
        })
    }
}

/// Start of the bucket containing `timestamp`.
pub fn bucket_start(timestamp: i64, bucket: i64) -> i64 {
    timestamp - timestamp.rem_euclid(bucket)
}
