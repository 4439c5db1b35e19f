//! Versioned response envelopes, SLO meta-fields and record-framed
//! streaming.
//!
//! Single-document mode wraps a payload in `{schema, ok, data, meta}`;
//! streaming mode emits a header record, one record per row and a footer
//! carrying the same meta. Every record is one newline-terminated JSON
//! document with no embedded newlines.

use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::engine::rows::{ChainRow, EquityBar};
use crate::error::{EngineError, Result};
use crate::quality::QualityScores;

/// Fixed schema identifier for every envelope this engine emits.
pub const SCHEMA_VERSION: &str = "history.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    #[default]
    Cold,
    Warm,
}

/// Where the rows came from, as far as the packager can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceHint {
    #[default]
    Sqlite,
    Csv,
    Parquet,
    Stub,
    /// No partitions covered the range.
    Empty,
    /// Partitions were missing mid-range.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Meta {
    pub count: usize,
    pub bytes_estimate: usize,
    pub first_byte_ms: f64,
    pub total_ms: f64,
    pub cache: CacheState,
    pub source: SourceHint,
    pub rows_per_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityScores>,
}

impl Meta {
    /// Assemble meta for a finished operation. `first_byte` is when the
    /// first row became available; `count` drives rows/sec over the total
    /// elapsed time.
    pub fn for_rows(
        count: usize,
        started: Instant,
        first_byte: Option<Instant>,
        cache: CacheState,
        source: SourceHint,
    ) -> Self {
        let total_ms = started.elapsed().as_secs_f64() * 1000.0;
        let first_byte_ms = first_byte
            .map_or(total_ms, |t| t.duration_since(started).as_secs_f64() * 1000.0);
        let rows_per_sec = if total_ms > 0.0 {
            count as f64 / (total_ms / 1000.0)
        } else {
            0.0
        };
        Self {
            count,
            bytes_estimate: 0,
            first_byte_ms,
            total_ms,
            cache,
            source,
            rows_per_sec,
            latency: None,
            quality: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityScores) -> Self {
        self.quality = Some(quality);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorBody {
    pub fn from_error(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            hint: err.hint().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub schema: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: Meta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T, mut meta: Meta) -> Self {
        meta.bytes_estimate = serde_json::to_vec(&data).map(|v| v.len()).unwrap_or(0);
        Self {
            schema: SCHEMA_VERSION.to_string(),
            ok: true,
            data: Some(data),
            meta,
            error: None,
        }
    }

    pub fn failure(err: &EngineError, meta: Meta) -> Self {
        Self {
            schema: SCHEMA_VERSION.to_string(),
            ok: false,
            data: None,
            meta,
            error: Some(ErrorBody::from_error(err)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatencySnapshot {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub samples: usize,
}

/// In-process latency aggregation per operation name.
#[derive(Default)]
pub struct LatencyRecorder {
    samples: Mutex<FxHashMap<String, Vec<f64>>>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: &str, elapsed_ms: f64) {
        if let Ok(mut map) = self.samples.lock() {
            map.entry(op.to_string()).or_default().push(elapsed_ms);
        }
    }

    /// Percentiles over everything recorded so far for `op`.
    pub fn snapshot(&self, op: &str) -> Option<LatencySnapshot> {
        let map = self.samples.lock().ok()?;
        let samples = map.get(op)?;
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Some(LatencySnapshot {
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            samples: sorted.len(),
        })
    }
}

/// Nearest-rank percentile on a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Record-framed streaming grammar. The `type` discriminator makes each
/// record self-describing so consumers can stop reading at any point.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamRecord<'a> {
    #[serde(rename = "bars-header")]
    BarsHeader {
        schema: &'a str,
        symbol: &'a str,
        granularity: &'a str,
    },
    #[serde(rename = "bar")]
    Bar(&'a EquityBar),
    #[serde(rename = "bars-footer")]
    BarsFooter { meta: &'a Meta },
    #[serde(rename = "options-header")]
    OptionsHeader {
        schema: &'a str,
        underlying: &'a str,
    },
    #[serde(rename = "option")]
    Option(&'a ChainRow),
    #[serde(rename = "options-footer")]
    OptionsFooter { meta: &'a Meta },
}

fn write_record<W: Write>(out: &mut W, record: &StreamRecord<'_>) -> Result<()> {
    let line = serde_json::to_string(record)
        .map_err(|e| EngineError::Internal(format!("stream encode: {e}")))?;
    debug_assert!(!line.contains('\n'));
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Stream bars: header, one record per bar, footer. Rows are written as
/// they are walked; nothing beyond one record is buffered.
pub fn stream_bars<W: Write>(
    out: &mut W,
    symbol: &str,
    granularity: &str,
    bars: &[EquityBar],
    meta: &Meta,
) -> Result<()> {
    write_record(
        out,
        &StreamRecord::BarsHeader {
            schema: SCHEMA_VERSION,
            symbol,
            granularity,
        },
    )?;
    for bar in bars {
        write_record(out, &StreamRecord::Bar(bar))?;
    }
    write_record(out, &StreamRecord::BarsFooter { meta })?;
    out.flush()?;
    Ok(())
}

/// Stream an options chain with the same header/rows/footer framing.
pub fn stream_options<W: Write>(
    out: &mut W,
    underlying: &str,
    rows: &[ChainRow],
    meta: &Meta,
) -> Result<()> {
    write_record(
        out,
        &StreamRecord::OptionsHeader {
            schema: SCHEMA_VERSION,
            underlying,
        },
    )?;
    for row in rows {
        write_record(out, &StreamRecord::Option(row))?;
    }
    write_record(out, &StreamRecord::OptionsFooter { meta })?;
    out.flush()?;
    Ok(())
}
