use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use std::io::Cursor;

use crate::error::MetricsError;

/// Significant decimal digits kept by every latency histogram.
const SIGNIFICANT_DIGITS: u8 = 3;

/// Log-linear latency histogram in microseconds; memory does not grow with
/// the number of recorded values.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let hist =
            Histogram::<u64>::new(SIGNIFICANT_DIGITS).map_err(|err| MetricsError::Histogram {
                context: "create",
                source: err.to_string().into(),
            })?;
        Ok(Self { hist })
    }

    /// Record a latency value in microseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be recorded.
    pub fn record(&mut self, latency_us: u64) -> Result<(), MetricsError> {
        let value = latency_us.max(1);
        self.hist
            .record(value)
            .map_err(|err| MetricsError::Histogram {
                context: "record",
                source: err.to_string().into(),
            })
    }

    /// Merge another histogram into this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge fails.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<(), MetricsError> {
        self.hist
            .add(&other.hist)
            .map_err(|err| MetricsError::Histogram {
                context: "merge",
                source: err.to_string().into(),
            })
    }

    #[must_use]
    pub fn percentiles(&self) -> (u64, u64, u64) {
        if self.count() == 0 {
            return (0, 0, 0);
        }

        (
            self.hist.value_at_quantile(0.5),
            self.hist.value_at_quantile(0.9),
            self.hist.value_at_quantile(0.99),
        )
    }

    #[must_use]
    pub fn min(&self) -> u64 {
        if self.count() == 0 { 0 } else { self.hist.min() }
    }

    #[must_use]
    pub fn max(&self) -> u64 {
        self.hist.max()
    }

    /// Mean and standard deviation, rounded to whole microseconds.
    #[must_use]
    pub fn mean_and_stddev(&self) -> (u64, u64) {
        if self.count() == 0 {
            return (0, 0);
        }
        (
            self.hist.mean().round() as u64,
            self.hist.stdev().round() as u64,
        )
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    /// Encode the histogram as base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be serialized.
    pub fn encode_base64(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        V2Serializer::new()
            .serialize(&self.hist, &mut buffer)
            .map_err(|err| MetricsError::Histogram {
                context: "serialize",
                source: err.to_string().into(),
            })?;
        Ok(B64.encode(buffer))
    }

    /// Decode a base64 histogram payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or deserialized.
    pub fn decode_base64(encoded: &str) -> Result<Self, MetricsError> {
        let bytes = B64
            .decode(encoded.as_bytes())
            .map_err(|err| MetricsError::Histogram {
                context: "decode",
                source: err.to_string().into(),
            })?;
        let mut cursor = Cursor::new(bytes);
        let hist: Histogram<u64> = Deserializer::new()
            .deserialize(&mut cursor)
            .map_err(|err| MetricsError::Histogram {
                context: "deserialize",
                source: err.to_string().into(),
            })?;
        Ok(Self { hist })
    }
}
