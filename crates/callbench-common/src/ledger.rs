//! Append-only CSV ledger of completed sessions.
//!
//! The header is fixed and only ever grows by appending trailing columns, so
//! rows are read positionally against [`LEDGER_COLUMNS`]. Rows written by an
//! older schema are shorter; their missing trailing fields read as empty.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CallbenchError, Result};
use crate::models::{LifecycleTimestamps, MetricsRow, PeerMeasurements, ScoreDimension, TrafficCounters};

/// Ledger header, in column order. The first seven columns are the
/// original schema; everything after was appended later.
pub const LEDGER_COLUMNS: &[&str] = &[
    "LibVersion",
    "Sample",
    "Network",
    "Distorted",
    "ScorePreprocess",
    "ScoreOutput",
    "ScoreCombined",
    "Score997",
    "Score1002",
    "Score1007",
    "Score1010",
    "Score1012",
    "CallerRxBytes",
    "CallerTxBytes",
    "CallerRxPackets",
    "CallerTxPackets",
    "CalleeRxBytes",
    "CalleeTxBytes",
    "CalleeRxPackets",
    "CalleeTxPackets",
    "CallerFirstSend",
    "CallerFirstRecv",
    "CallerLastSend",
    "CallerLastRecv",
    "CalleeFirstSend",
    "CalleeFirstRecv",
    "CalleeLastSend",
    "CalleeLastRecv",
];

// Offsets of the column groups inside LEDGER_COLUMNS.
const SCORES_AT: usize = 4;
const TRAFFIC_AT: usize = 12;
const TIMESTAMPS_AT: usize = 20;

/// Append-only store of [`MetricsRow`]s backed by a CSV file.
pub struct MetricsLedger {
    path: PathBuf,
    file: Mutex<File>,
}

impl MetricsLedger {
    /// Opens the ledger for appending, creating it with the header if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            let header: Vec<String> = LEDGER_COLUMNS.iter().map(|c| c.to_string()).collect();
            file.write_all(&encode_record(&header)?)?;
            file.flush()?;
            tracing::info!(path = %path.display(), "created ledger");
        } else {
            tracing::debug!(path = %path.display(), "opened ledger for append");
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row with a single `write_all` on an `O_APPEND` handle.
    ///
    /// Appends from several threads are serialized by the internal lock.
    pub fn append(&self, row: &MetricsRow) -> Result<()> {
        let bytes = encode_record(&to_record(row))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("ledger lock poisoned"))?;
        file.write_all(&bytes)?;
        file.flush()?;
        tracing::debug!(
            entry = %row.entry,
            network = %row.network,
            distorted = %row.distorted,
            "appended ledger row"
        );
        Ok(())
    }

    /// Reads all rows present right now. Call again to restart.
    pub fn rows(&self) -> Result<LedgerRows> {
        read_rows(&self.path)
    }
}

/// Lazily reads the ledger at `path`, bounded by its size at call time.
pub fn read_rows(path: impl AsRef<Path>) -> Result<LedgerRows> {
    let file = File::open(path.as_ref())?;
    let len = file.metadata()?.len();
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file.take(len));
    Ok(LedgerRows {
        records: reader.into_records(),
    })
}

/// Iterator over ledger rows returned by [`MetricsLedger::rows`].
pub struct LedgerRows {
    records: csv::StringRecordsIntoIter<io::Take<File>>,
}

impl Iterator for LedgerRows {
    type Item = Result<MetricsRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(
            record
                .map(|r| from_record(&r))
                .map_err(CallbenchError::from),
        )
    }
}

fn encode_record(fields: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| CallbenchError::Io(io::Error::other(e.to_string())))
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn traffic_fields(t: Option<TrafficCounters>) -> [String; 4] {
    [
        opt(t.map(|t| t.rx_bytes)),
        opt(t.map(|t| t.tx_bytes)),
        opt(t.map(|t| t.rx_packets)),
        opt(t.map(|t| t.tx_packets)),
    ]
}

fn timestamp_fields(ts: &LifecycleTimestamps) -> [String; 4] {
    [
        opt(ts.first_send),
        opt(ts.first_recv),
        opt(ts.last_send),
        opt(ts.last_recv),
    ]
}

fn to_record(row: &MetricsRow) -> Vec<String> {
    let mut out = Vec::with_capacity(LEDGER_COLUMNS.len());
    out.push(row.entry.clone());
    out.push(row.sample.clone());
    out.push(row.network.clone());
    out.push(row.distorted.clone());
    for dim in ScoreDimension::ALL {
        out.push(opt(row.scores.get(&dim)));
    }
    out.extend(traffic_fields(row.caller.traffic));
    out.extend(traffic_fields(row.callee.traffic));
    out.extend(timestamp_fields(&row.caller.timestamps));
    out.extend(timestamp_fields(&row.callee.timestamps));
    debug_assert_eq!(out.len(), LEDGER_COLUMNS.len());
    out
}

fn from_record(record: &csv::StringRecord) -> MetricsRow {
    let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
    let float = |idx: usize| field(idx).parse::<f64>().ok();
    let count = |idx: usize| field(idx).parse::<u64>().ok();

    let traffic = |at: usize| -> Option<TrafficCounters> {
        Some(TrafficCounters {
            rx_bytes: count(at)?,
            tx_bytes: count(at + 1)?,
            rx_packets: count(at + 2)?,
            tx_packets: count(at + 3)?,
        })
    };
    let timestamps = |at: usize| LifecycleTimestamps {
        first_send: float(at),
        first_recv: float(at + 1),
        last_send: float(at + 2),
        last_recv: float(at + 3),
    };

    let scores = ScoreDimension::ALL
        .iter()
        .enumerate()
        .filter_map(|(i, dim)| float(SCORES_AT + i).map(|v| (*dim, v)))
        .collect();

    MetricsRow {
        entry: field(0).to_string(),
        sample: field(1).to_string(),
        network: field(2).to_string(),
        distorted: field(3).to_string(),
        scores,
        caller: PeerMeasurements {
            traffic: traffic(TRAFFIC_AT),
            timestamps: timestamps(TIMESTAMPS_AT),
        },
        callee: PeerMeasurements {
            traffic: traffic(TRAFFIC_AT + 4),
            timestamps: timestamps(TIMESTAMPS_AT + 4),
        },
    }
}
