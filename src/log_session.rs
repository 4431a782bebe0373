use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use polars::prelude::*;

const FILE_SUFFIX: &str = "batt_log";
const STAMP_COLUMN_NAME: &str = "stamp";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Output directory {} does not exist", path.display())]
    MissingDirectory { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] PolarsError),

    #[error("Log file {} is already closed", path.display())]
    Closed { path: PathBuf },
}

/// First column of every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// 1-based row counter, restarted in every file
    RowIndex,
    /// `HH:MM:SS`
    TimeOfDay,
    /// `YY/MM/DD HH:MM:SS`
    DateTime,
}

impl RowFormat {
    fn stamp(&self, row_number: u64, timestamp: &DateTime<FixedOffset>) -> Series {
        match self {
            RowFormat::RowIndex => Series::new(STAMP_COLUMN_NAME.into(), [row_number]),
            RowFormat::TimeOfDay => Series::new(
                STAMP_COLUMN_NAME.into(),
                [timestamp.format("%H:%M:%S").to_string()],
            ),
            RowFormat::DateTime => Series::new(
                STAMP_COLUMN_NAME.into(),
                [timestamp.format("%y/%m/%d %H:%M:%S").to_string()],
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// One file for the whole run.
    Unbounded,
    /// New file whenever the wall clock crosses a multiple of `boundary`
    /// (counted from local midnight), or once a file is older than `ceiling`.
    Windowed { boundary: Duration, ceiling: Duration },
}

impl RotationPolicy {
    /// Quarter-hour windows, at most five minutes per file.
    pub fn quarter_hourly() -> Self {
        RotationPolicy::Windowed {
            boundary: Duration::from_secs(15 * 60),
            ceiling: Duration::from_secs(300),
        }
    }

    pub fn is_due(&self, started_at: &DateTime<FixedOffset>, now: &DateTime<FixedOffset>) -> bool {
        match self {
            RotationPolicy::Unbounded => false,
            RotationPolicy::Windowed { boundary, ceiling } => {
                let elapsed_ms = (*now - *started_at).num_milliseconds();
                if elapsed_ms > ceiling.as_millis() as i64 {
                    return true;
                }
                window_of(started_at, *boundary) != window_of(now, *boundary)
            }
        }
    }
}

fn window_of(time: &DateTime<FixedOffset>, boundary: Duration) -> (NaiveDate, u64) {
    let seconds = u64::from(time.num_seconds_from_midnight());
    (time.date_naive(), seconds / boundary.as_secs().max(1))
}

/// One accepted capture: when it happened and one value per enabled channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: DateTime<FixedOffset>,
    pub values: Vec<f64>,
}

impl Row {
    pub fn new(timestamp: DateTime<FixedOffset>, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }
}

/// One CSV file, open from creation until `close`.
///
/// Rows are buffered; they are only guaranteed on disk once the session is
/// closed.
#[derive(Debug)]
pub struct LogSession {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    started_at: DateTime<FixedOffset>,
    rows_written: u64,
    format: RowFormat,
    precision: usize,
}

impl LogSession {
    pub fn file_name_for(started_at: &DateTime<FixedOffset>) -> String {
        format!("{} {}.csv", started_at.format("%Y-%m-%d %H_%M_%S"), FILE_SUFFIX)
    }

    pub fn open(
        dir: &Path,
        started_at: DateTime<FixedOffset>,
        format: RowFormat,
        precision: usize,
    ) -> Result<Self, LogError> {
        if !dir.is_dir() {
            return Err(LogError::MissingDirectory {
                path: dir.to_path_buf(),
            });
        }

        let base_name = Self::file_name_for(&started_at);
        let mut path = dir.join(&base_name);
        let mut attempt = 1;
        let file = loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    path = dir.join(format!(
                        "{}-{}.csv",
                        base_name.trim_end_matches(".csv"),
                        attempt
                    ));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        log::info!("Created log file {}", path.display());

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            started_at,
            rows_written: 0,
            format,
            precision,
        })
    }

    pub fn append_row(&mut self, row: &Row) -> Result<(), LogError> {
        let writer = self.writer.as_mut().ok_or_else(|| LogError::Closed {
            path: self.path.clone(),
        })?;

        let mut columns: Vec<Column> = Vec::with_capacity(row.values.len() + 1);
        columns.push(self.format.stamp(self.rows_written + 1, &row.timestamp).into());
        for (channel, value) in row.values.iter().enumerate() {
            let column: Column = Series::new(format!("ch{}", channel).into(), [*value]).into();
            columns.push(column);
        }
        let mut df = DataFrame::new(columns)?;

        CsvWriter::new(writer)
            .include_header(false)
            .with_float_precision(Some(self.precision))
            .finish(&mut df)?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and close the file. Closing an already closed session is a no-op.
    pub fn close(&mut self) -> Result<(), LogError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            log::info!(
                "Log saved with name {} ({} rows)",
                self.path.display(),
                self.rows_written
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<FixedOffset> {
        self.started_at
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close {}: {}", self.path.display(), e);
        }
    }
}

/// Owns the currently open [`LogSession`] and replaces it when the rotation
/// policy says so.
#[derive(Debug)]
pub struct RotatingLog {
    dir: PathBuf,
    policy: RotationPolicy,
    format: RowFormat,
    precision: usize,
    session: Option<LogSession>,
    files_opened: usize,
}

impl RotatingLog {
    pub fn new(
        dir: impl Into<PathBuf>,
        policy: RotationPolicy,
        format: RowFormat,
        precision: usize,
    ) -> Result<Self, LogError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(LogError::MissingDirectory { path: dir });
        }
        Ok(Self {
            dir,
            policy,
            format,
            precision,
            session: None,
            files_opened: 0,
        })
    }

    /// Close the current file, if any, and start a new one at `now`.
    pub fn rotate(&mut self, now: DateTime<FixedOffset>) -> Result<&LogSession, LogError> {
        if let Some(mut previous) = self.session.take() {
            previous.close()?;
        }
        let session = LogSession::open(&self.dir, now, self.format, self.precision)?;
        self.files_opened += 1;
        Ok(self.session.insert(session))
    }

    /// Append `row`, first rotating if the row's timestamp falls outside the
    /// current file's window.
    pub fn append(&mut self, row: &Row) -> Result<(), LogError> {
        let due = match &self.session {
            Some(session) => self.policy.is_due(&session.started_at, &row.timestamp),
            None => true,
        };
        if due {
            self.rotate(row.timestamp)?;
        }
        match self.session.as_mut() {
            Some(session) => session.append_row(row),
            None => Err(LogError::Closed {
                path: self.dir.clone(),
            }),
        }
    }

    pub fn close(&mut self) -> Result<(), LogError> {
        match self.session.as_mut() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }

    pub fn session(&self) -> Option<&LogSession> {
        self.session.as_ref()
    }

    pub fn files_opened(&self) -> usize {
        self.files_opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn at(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    fn csv_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_file_name_from_start_time() {
        let name = LogSession::file_name_for(&at("2024-03-01T09:05:07+07:00"));
        assert_eq!(name, "2024-03-01 09_05_07 batt_log.csv");
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("data");
        let start = at("2024-03-01T09:05:07+07:00");
        assert!(matches!(
            LogSession::open(&missing, start, RowFormat::TimeOfDay, 2),
            Err(LogError::MissingDirectory { .. })
        ));
        assert!(matches!(
            RotatingLog::new(&missing, RotationPolicy::Unbounded, RowFormat::TimeOfDay, 2),
            Err(LogError::MissingDirectory { .. })
        ));
    }

    #[test]
    fn test_row_formats() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = at("2024-03-01T09:05:07+07:00");
        let row = Row::new(stamp, vec![2.6149, -0.5]);

        let mut by_time = LogSession::open(dir.path(), stamp, RowFormat::TimeOfDay, 2).unwrap();
        by_time.append_row(&row).unwrap();
        by_time.close().unwrap();
        assert_eq!(fs::read_to_string(by_time.path()).unwrap(), "09:05:07,2.61,-0.50\n");

        let mut by_date = LogSession::open(dir.path(), stamp, RowFormat::DateTime, 2).unwrap();
        by_date.append_row(&row).unwrap();
        by_date.close().unwrap();
        assert_eq!(
            fs::read_to_string(by_date.path()).unwrap(),
            "24/03/01 09:05:07,2.61,-0.50\n"
        );

        let mut by_index = LogSession::open(dir.path(), stamp, RowFormat::RowIndex, 3).unwrap();
        by_index.append_row(&row).unwrap();
        by_index.append_row(&row).unwrap();
        by_index.close().unwrap();
        assert_eq!(
            fs::read_to_string(by_index.path()).unwrap(),
            "1,2.615,-0.500\n2,2.615,-0.500\n"
        );
    }

    #[test]
    fn test_same_second_sessions_do_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = at("2024-03-01T09:05:07+07:00");
        let first = LogSession::open(dir.path(), stamp, RowFormat::TimeOfDay, 2).unwrap();
        let second = LogSession::open(dir.path(), stamp, RowFormat::TimeOfDay, 2).unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(csv_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_close_twice() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = at("2024-03-01T09:05:07+07:00");
        let mut session = LogSession::open(dir.path(), stamp, RowFormat::TimeOfDay, 2).unwrap();
        session.append_row(&Row::new(stamp, vec![1.0])).unwrap();

        session.close().unwrap();
        session.close().unwrap();
        assert!(!session.is_open());
        assert_eq!(fs::read_to_string(session.path()).unwrap(), "09:05:07,1.00\n");

        assert!(matches!(
            session.append_row(&Row::new(stamp, vec![1.0])),
            Err(LogError::Closed { .. })
        ));
    }

    #[test]
    fn test_ceiling_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let start = at("2024-03-01T10:00:00+07:00");
        let mut log = RotatingLog::new(
            dir.path(),
            RotationPolicy::quarter_hourly(),
            RowFormat::DateTime,
            2,
        )
        .unwrap();

        for second in 0..=301 {
            let row = Row::new(start + chrono::Duration::seconds(second), vec![1.0]);
            log.append(&row).unwrap();
            if second == 300 {
                assert_eq!(log.files_opened(), 1);
            }
        }
        log.close().unwrap();

        let files = csv_files(dir.path());
        assert_eq!(files.len(), 2);
        assert_eq!(log.files_opened(), 2);

        let first = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(first.lines().count(), 301);
        assert_eq!(first.lines().last(), Some("24/03/01 10:05:00,1.00"));

        let second = fs::read_to_string(&files[1]).unwrap();
        assert_eq!(second.lines().collect::<Vec<_>>(), vec!["24/03/01 10:05:01,1.00"]);
        assert!(files[1].ends_with("2024-03-01 10_05_01 batt_log.csv"));
    }

    #[test]
    fn test_wall_clock_boundary_rotation() {
        let policy = RotationPolicy::quarter_hourly();
        let start = at("2024-03-01T10:13:00+07:00");
        assert!(!policy.is_due(&start, &at("2024-03-01T10:14:59+07:00")));
        assert!(policy.is_due(&start, &at("2024-03-01T10:15:00+07:00")));
        assert!(policy.is_due(
            &at("2024-03-01T23:59:00+07:00"),
            &at("2024-03-02T00:00:30+07:00")
        ));
    }

    #[test]
    fn test_unbounded_never_rotates() {
        let policy = RotationPolicy::Unbounded;
        assert!(!policy.is_due(
            &at("2024-03-01T10:00:00+07:00"),
            &at("2024-03-09T10:00:00+07:00")
        ));
    }
}
