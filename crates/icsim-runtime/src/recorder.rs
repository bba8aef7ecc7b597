//! Per-controller snapshot CSV recording.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use smol_str::SmolStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::RuntimeError;
use crate::scheduler::CycleTiming;
use crate::value::TagValue;

const TIMING_COLUMNS: [&str; 4] = ["time", "current_loop", "loop_latency", "logic_execution_time"];

/// Column header for one recorded tag: `NAME(id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotColumn {
    pub name: SmolStr,
    pub id: u16,
}

/// Append-only CSV sink, one row per controller tick.
pub struct SnapshotRecorder {
    path: Option<PathBuf>,
    writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for SnapshotRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotRecorder")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SnapshotRecorder {
    /// Open `dir/snapshots_<controller>.csv` for appending.
    pub fn create(dir: &Path, controller: &str) -> Result<Self, RuntimeError> {
        fs::create_dir_all(dir).map_err(|err| recorder_error(dir, &err))?;
        let path = dir.join(format!("snapshots_{controller}.csv"));
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| recorder_error(&path, &err))?;
        Ok(Self {
            path: Some(path),
            writer: Box::new(BufWriter::new(file)),
        })
    }

    /// Record into an arbitrary writer.
    #[must_use]
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            path: None,
            writer: Box::new(writer),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write_header(&mut self, columns: &[SnapshotColumn]) -> Result<(), RuntimeError> {
        let line = header_line(columns);
        self.write_line(&line)
    }

    pub fn write_row(
        &mut self,
        timing: &CycleTiming,
        values: &[Option<TagValue>],
    ) -> Result<(), RuntimeError> {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| RuntimeError::Recorder(err.to_string().into()))?;
        let line = row_line(&now, timing, values);
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> Result<(), RuntimeError> {
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|err| RuntimeError::Recorder(err.to_string().into()))
    }
}

fn recorder_error(path: &Path, err: &std::io::Error) -> RuntimeError {
    RuntimeError::Recorder(format!("{}: {err}", path.display()).into())
}

/// `time, current_loop, loop_latency, logic_execution_time, NAME(id), ...`
#[must_use]
pub fn header_line(columns: &[SnapshotColumn]) -> String {
    TIMING_COLUMNS
        .iter()
        .map(|column| (*column).to_string())
        .chain(
            columns
                .iter()
                .map(|column| format!("{}({})", column.name, column.id)),
        )
        .collect::<Vec<_>>()
        .join(", ")
}

/// One data row. Durations are in milliseconds; absent values are left empty.
#[must_use]
pub fn row_line(time: &str, timing: &CycleTiming, values: &[Option<TagValue>]) -> String {
    let mut fields = vec![
        time.to_string(),
        timing.current_cycle_ms().to_string(),
        millis(timing.loop_latency()),
        millis(timing.logic_execution_time()),
    ];
    fields.extend(
        values
            .iter()
            .map(|value| value.as_ref().map(ToString::to_string).unwrap_or_default()),
    );
    fields.join(", ")
}

fn millis(duration: std::time::Duration) -> String {
    format!("{:.3}", duration.as_secs_f64() * 1000.0)
}
