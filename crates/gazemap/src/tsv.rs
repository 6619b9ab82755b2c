//! Tab-separated readers and writers for gaze tables, task logs and summaries.
//!
//! Every table starts with a header row. Readers locate columns by header
//! name, so extra columns and any column order are accepted. An empty field
//! means "no value"; undefined summary statistics are written as `NaN`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::correlate::Correlation;
use crate::error::GazeMapError;
use crate::gaze::{FrameTimestamps, GazeSample};
use crate::scoring::{CalibrationPoint, PointSummary, TrialGaze, TrialSummary};
use crate::transform_chain::MappedGazePoint;

pub const CORRELATED_GAZE_COLUMNS: [&str; 5] =
    ["timestamp", "frame_index", "confidence", "norm_pos_x", "norm_pos_y"];

pub const MAPPED_GAZE_COLUMNS: [&str; 9] = [
    "frame_index",
    "timestamp",
    "confidence",
    "frame_x",
    "frame_y",
    "reference_x",
    "reference_y",
    "grid_x",
    "grid_y",
];

pub const TRIAL_DETAIL_COLUMNS: [&str; 17] = [
    "trial",
    "point_index",
    "column",
    "row",
    "trial_ms",
    "task_ms",
    "timestamp",
    "frame_index",
    "confidence",
    "frame_x",
    "frame_y",
    "reference_x",
    "reference_y",
    "grid_x",
    "grid_y",
    "distance_deg",
    "angle_deg",
];

pub const TRIAL_SUMMARY_COLUMNS: [&str; 9] = [
    "trial",
    "point_index",
    "retained",
    "percent_valid",
    "centroid_x",
    "centroid_y",
    "centroid_distance_deg",
    "centroid_angle_deg",
    "rms_precision_deg",
];

pub const POINT_SUMMARY_COLUMNS: [&str; 7] = [
    "point_index",
    "column",
    "row",
    "trials",
    "mean_percent_valid",
    "mean_centroid_distance_deg",
    "mean_rms_precision_deg",
];

/// A task-log row that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRowIssue {
    /// 1-based line number in the file.
    pub line: usize,
    pub reason: String,
}

// ── Writing ──────────────────────────────────────────────────────────────

fn header<W: Write>(w: &mut W, columns: &[&str]) -> io::Result<()> {
    writeln!(w, "{}", columns.join("\t"))
}

fn opt_xy(p: Option<[f64; 2]>, prec: usize) -> [String; 2] {
    match p {
        Some([x, y]) => [format!("{:.*}", prec, x), format!("{:.*}", prec, y)],
        None => [String::new(), String::new()],
    }
}

fn opt_f(v: Option<f64>, prec: usize) -> String {
    v.map(|v| format!("{:.*}", prec, v)).unwrap_or_default()
}

/// Fixed precision, with `NaN` for undefined values.
fn stat(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        format!("{:.4}", v)
    }
}

fn mapped_fields(p: &MappedGazePoint) -> [String; 6] {
    let [fx, fy] = opt_xy(p.frame, 3);
    let [rx, ry] = opt_xy(p.reference, 3);
    let [gx, gy] = opt_xy(p.grid, 3);
    [fx, fy, rx, ry, gx, gy]
}

pub fn write_correlated_gaze<W: Write>(w: &mut W, correlation: &Correlation) -> io::Result<()> {
    header(w, &CORRELATED_GAZE_COLUMNS)?;
    for (frame_index, s) in correlation.groups.iter_assigned() {
        writeln!(
            w,
            "{:.6}\t{}\t{:.3}\t{:.3}\t{:.3}",
            s.timestamp, frame_index, s.confidence, s.norm_x, s.norm_y
        )?;
    }
    Ok(())
}

pub fn write_mapped_gaze<W: Write>(w: &mut W, points: &[MappedGazePoint]) -> io::Result<()> {
    header(w, &MAPPED_GAZE_COLUMNS)?;
    for p in points {
        writeln!(
            w,
            "{}\t{:.6}\t{:.3}\t{}",
            p.frame_index,
            p.timestamp,
            p.confidence,
            mapped_fields(p).join("\t")
        )?;
    }
    Ok(())
}

pub fn write_trial_details<W: Write>(w: &mut W, details: &[TrialGaze]) -> io::Result<()> {
    header(w, &TRIAL_DETAIL_COLUMNS)?;
    for d in details {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{:.3}\t{:.3}\t{:.6}\t{}\t{:.3}\t{}\t{}\t{}",
            d.trial,
            d.point_index,
            d.column,
            d.row,
            d.trial_ms,
            d.task_ms,
            d.point.timestamp,
            d.point.frame_index,
            d.point.confidence,
            mapped_fields(&d.point).join("\t"),
            opt_f(d.distance_deg, 3),
            opt_f(d.angle_deg, 3),
        )?;
    }
    Ok(())
}

pub fn write_trial_summaries<W: Write>(w: &mut W, trials: &[TrialSummary]) -> io::Result<()> {
    header(w, &TRIAL_SUMMARY_COLUMNS)?;
    for t in trials {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            t.trial,
            t.point_index,
            t.retained,
            stat(t.percent_valid),
            stat(t.centroid[0]),
            stat(t.centroid[1]),
            stat(t.centroid_distance_deg),
            stat(t.centroid_angle_deg),
            stat(t.rms_precision_deg),
        )?;
    }
    Ok(())
}

pub fn write_point_summaries<W: Write>(w: &mut W, points: &[PointSummary]) -> io::Result<()> {
    header(w, &POINT_SUMMARY_COLUMNS)?;
    for p in points {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            p.point_index,
            p.column,
            p.row,
            p.trials,
            stat(p.mean_percent_valid),
            stat(p.mean_centroid_distance_deg),
            stat(p.mean_rms_precision_deg),
        )?;
    }
    Ok(())
}

/// Create `path`, run `write` on a buffered writer and flush it.
///
/// On error the partially written file is left behind and the error names it.
pub fn write_file<F>(path: &Path, write: F) -> Result<(), GazeMapError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let file = File::create(path).map_err(|e| GazeMapError::io(path, e))?;
    let mut w = BufWriter::new(file);
    write(&mut w).map_err(|e| GazeMapError::io(path, e))?;
    w.flush().map_err(|e| GazeMapError::io(path, e))
}

// ── Reading ──────────────────────────────────────────────────────────────

struct Table<'a> {
    path: &'a Path,
    columns: Vec<&'a str>,
    /// `(1-based line number, fields)` for each non-blank data row.
    rows: Vec<(usize, Vec<&'a str>)>,
}

impl<'a> Table<'a> {
    fn parse(path: &'a Path, text: &'a str) -> Result<Self, GazeMapError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
            .filter(|(_, l)| !l.trim().is_empty());
        let (_, head) = lines
            .next()
            .ok_or_else(|| GazeMapError::parse(path, 1, "empty file, expected a header row"))?;
        let columns = head.split('\t').map(str::trim).collect();
        let rows = lines
            .map(|(n, l)| (n, l.split('\t').map(str::trim).collect()))
            .collect();
        Ok(Self {
            path,
            columns,
            rows,
        })
    }

    fn column(&self, name: &str) -> Result<usize, GazeMapError> {
        self.columns.iter().position(|c| *c == name).ok_or_else(|| {
            GazeMapError::parse(self.path, 1, format!("missing column '{}'", name))
        })
    }

    fn optional_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }

    fn field(&self, line: usize, fields: &[&'a str], col: usize) -> Result<&'a str, GazeMapError> {
        fields
            .get(col)
            .copied()
            .ok_or_else(|| GazeMapError::parse(self.path, line, format!("missing field '{}'", self.columns[col])))
    }

    fn number(&self, line: usize, fields: &[&str], col: usize) -> Result<f64, GazeMapError> {
        let raw = self.field(line, fields, col)?;
        raw.parse::<f64>().map_err(|_| {
            GazeMapError::parse(
                self.path,
                line,
                format!("column '{}': '{}' is not a number", self.columns[col], raw),
            )
        })
    }

    /// Empty or absent field → `None`.
    fn optional_number(&self, line: usize, fields: &[&str], col: usize) -> Result<Option<f64>, GazeMapError> {
        match fields.get(col) {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(_) => self.number(line, fields, col).map(Some),
        }
    }

    fn optional_xy(
        &self,
        line: usize,
        fields: &[&str],
        cols: (Option<usize>, Option<usize>),
    ) -> Result<Option<[f64; 2]>, GazeMapError> {
        let (Some(cx), Some(cy)) = cols else {
            return Ok(None);
        };
        let x = self.optional_number(line, fields, cx)?;
        let y = self.optional_number(line, fields, cy)?;
        Ok(x.zip(y).map(|(x, y)| [x, y]))
    }
}

fn read_text(path: &Path) -> Result<String, GazeMapError> {
    std::fs::read_to_string(path).map_err(|e| GazeMapError::io(path, e))
}

/// Parse a gaze table with `timestamp`, `norm_pos_x`, `norm_pos_y` and
/// `confidence` columns.
pub fn parse_gaze_samples(path: &Path, text: &str) -> Result<Vec<GazeSample>, GazeMapError> {
    let t = Table::parse(path, text)?;
    let (ct, cx, cy, cc) = (
        t.column("timestamp")?,
        t.column("norm_pos_x")?,
        t.column("norm_pos_y")?,
        t.column("confidence")?,
    );
    t.rows
        .iter()
        .map(|(n, f)| {
            Ok(GazeSample {
                timestamp: t.number(*n, f, ct)?,
                norm_x: t.number(*n, f, cx)?,
                norm_y: t.number(*n, f, cy)?,
                confidence: t.number(*n, f, cc)?,
            })
        })
        .collect()
}

pub fn read_gaze_samples(path: &Path) -> Result<Vec<GazeSample>, GazeMapError> {
    parse_gaze_samples(path, &read_text(path)?)
}

/// Parse frame timestamps: a table with a `timestamp` column, or a bare
/// column of numbers without a header.
pub fn parse_frame_timestamps(path: &Path, text: &str) -> Result<FrameTimestamps, GazeMapError> {
    let first_field = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.split('\t').next())
        .map(str::trim);
    let bare = first_field.is_some_and(|f| f.parse::<f64>().is_ok());

    let ts = if bare {
        text.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| {
                let raw = l.split('\t').next().unwrap_or("").trim();
                raw.parse::<f64>().map_err(|_| {
                    GazeMapError::parse(path, i + 1, format!("'{}' is not a timestamp", raw))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let t = Table::parse(path, text)?;
        let c = t.column("timestamp")?;
        t.rows
            .iter()
            .map(|(n, f)| t.number(*n, f, c))
            .collect::<Result<Vec<_>, _>>()?
    };
    FrameTimestamps::new(ts)
}

pub fn read_frame_timestamps(path: &Path) -> Result<FrameTimestamps, GazeMapError> {
    parse_frame_timestamps(path, &read_text(path)?)
}

/// Parse a mapped-gaze table as written by [`write_mapped_gaze`].
pub fn parse_mapped_gaze(path: &Path, text: &str) -> Result<Vec<MappedGazePoint>, GazeMapError> {
    let t = Table::parse(path, text)?;
    let (cf, ct, cc) = (
        t.column("frame_index")?,
        t.column("timestamp")?,
        t.column("confidence")?,
    );
    let pair = |x: &str, y: &str| (t.optional_column(x), t.optional_column(y));
    let (frame, reference, grid) = (
        pair("frame_x", "frame_y"),
        pair("reference_x", "reference_y"),
        pair("grid_x", "grid_y"),
    );
    if grid.0.is_none() || grid.1.is_none() {
        return Err(GazeMapError::parse(path, 1, "missing columns 'grid_x'/'grid_y'"));
    }
    t.rows
        .iter()
        .map(|(n, f)| {
            let raw_frame = t.field(*n, f, cf)?;
            let frame_index = raw_frame.parse::<usize>().map_err(|_| {
                GazeMapError::parse(path, *n, format!("'{}' is not a frame index", raw_frame))
            })?;
            Ok(MappedGazePoint {
                frame_index,
                timestamp: t.number(*n, f, ct)?,
                confidence: t.number(*n, f, cc)?,
                frame: t.optional_xy(*n, f, frame)?,
                reference: t.optional_xy(*n, f, reference)?,
                grid: t.optional_xy(*n, f, grid)?,
            })
        })
        .collect()
}

pub fn read_mapped_gaze(path: &Path) -> Result<Vec<MappedGazePoint>, GazeMapError> {
    parse_mapped_gaze(path, &read_text(path)?)
}

/// Parse a task log with `col`, `row` and `time` (ms) columns.
///
/// Rows with missing or non-numeric fields are skipped and returned as
/// issues; only a missing header is an error.
pub fn parse_task_log(
    path: &Path,
    text: &str,
) -> Result<(Vec<CalibrationPoint>, Vec<LogRowIssue>), GazeMapError> {
    let t = Table::parse(path, text)?;
    let (cc, cr, ct) = (t.column("col")?, t.column("row")?, t.column("time")?);

    let mut points = Vec::new();
    let mut issues = Vec::new();
    for (n, f) in &t.rows {
        let parse_index = |c: usize| -> Result<u32, String> {
            let raw = f.get(c).copied().unwrap_or("");
            match raw.parse::<u32>() {
                Ok(v) if v >= 1 => Ok(v),
                _ => Err(format!("'{}': '{}' is not a 1-based index", t.columns[c], raw)),
            }
        };
        let parse_time = || -> Result<f64, String> {
            let raw = f.get(ct).copied().unwrap_or("");
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("'time': '{}' is not a number", raw))
        };
        match (parse_index(cc), parse_index(cr), parse_time()) {
            (Ok(column), Ok(row), Ok(presentation_time_ms)) => points.push(CalibrationPoint {
                column,
                row,
                presentation_time_ms,
            }),
            (c, r, tm) => {
                let reason = [c.err(), r.err(), tm.err()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join("; ");
                tracing::warn!("{}:{}: skipping task-log row: {}", path.display(), n, reason);
                issues.push(LogRowIssue { line: *n, reason });
            }
        }
    }
    Ok((points, issues))
}

pub fn read_task_log(path: &Path) -> Result<(Vec<CalibrationPoint>, Vec<LogRowIssue>), GazeMapError> {
    parse_task_log(path, &read_text(path)?)
}
