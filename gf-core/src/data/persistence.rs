//! Plain-text persistence for fan curves
//!
//! One `temperature,fanSpeed` pair per line, no header, ascending order.
//! Loading is lenient: blank lines are skipped and malformed lines are
//! logged and dropped. A file without a single valid point never replaces
//! the active curve.

use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use gf_error::GpufanError;

use crate::engine::Curve;
use crate::data::ControlPoint;
use crate::error::Result;

/// Parsed file contents plus the lines that were discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCurve {
    pub points: Vec<ControlPoint>,
    /// 1-based line numbers that failed to parse
    pub rejected: Vec<usize>,
}

/// Parse line-format curve text
pub fn parse_curve(content: &str) -> ParsedCurve {
    let mut points = Vec::new();
    let mut rejected = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(point) => points.push(point),
            None => {
                warn!(line = idx + 1, content = line, "Discarding malformed curve line");
                rejected.push(idx + 1);
            }
        }
    }

    ParsedCurve { points, rejected }
}

fn parse_line(line: &str) -> Option<ControlPoint> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != 2 {
        return None;
    }
    let temperature = parts[0].trim().parse::<i32>().ok()?;
    let fan_speed = parts[1].trim().parse::<i32>().ok()?;
    if !(0..=100).contains(&fan_speed) {
        return None;
    }
    Some(ControlPoint::new(temperature, fan_speed as u8))
}

/// Render a curve in line format
pub fn format_curve(curve: &Curve) -> String {
    curve
        .points()
        .iter()
        .map(|p| format!("{},{}\n", p.temperature, p.fan_speed))
        .collect()
}

/// Load a curve file.
///
/// Returns `Ok(None)` when the file holds no valid point, so callers keep
/// their current curve.
pub fn load_curve(path: &Path) -> Result<Option<Curve>> {
    let content = fs::read_to_string(path).map_err(|source| GpufanError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = parse_curve(&content);
    if parsed.points.is_empty() {
        warn!(path = %path.display(), "Curve file has no valid points, keeping current curve");
        return Ok(None);
    }

    let curve = Curve::new(parsed.points);
    info!(
        path = %path.display(),
        points = curve.len(),
        rejected = parsed.rejected.len(),
        "Loaded curve"
    );
    Ok(Some(curve))
}

/// Save a curve file atomically (temp file, fsync, rename)
pub fn save_curve(path: &Path, curve: &Curve) -> Result<()> {
    write_atomic(path, format_curve(curve).as_bytes())?;
    debug!(path = %path.display(), points = curve.len(), "Saved curve");
    Ok(())
}

/// Write `contents` to `path` via a temp file and rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| GpufanError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    let write_err = |source| GpufanError::FileWrite {
        path: temp_path.clone(),
        source,
    };

    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(contents).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|source| GpufanError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CurvePreset;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_blank_and_malformed() {
        let parsed = parse_curve("30,20\n\nfoo,bar\n50,40\n60\n70,70,1\n 85 , 100 \n90,140\n");
        assert_eq!(
            parsed.points,
            vec![
                ControlPoint::new(30, 20),
                ControlPoint::new(50, 40),
                ControlPoint::new(85, 100),
            ]
        );
        assert_eq!(parsed.rejected, vec![3, 5, 6, 8]);
    }

    #[test]
    fn test_format_is_sorted_lines() {
        let curve = Curve::new([ControlPoint::new(70, 70), ControlPoint::new(30, 20)]);
        assert_eq!(format_curve(&curve), "30,20\n70,70\n");
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("curve.txt");
        let curve = CurvePreset::Silent.to_curve();

        save_curve(&path, &curve).unwrap();
        assert_eq!(load_curve(&path).unwrap(), Some(curve));
        assert!(!dir.path().join("nested").join("curve.txt.tmp").exists());
    }

    #[test]
    fn test_load_without_valid_points_keeps_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("curve.txt");
        fs::write(&path, "garbage\n\n").unwrap();
        assert_eq!(load_curve(&path).unwrap(), None);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_curve(&dir.path().join("absent.txt")),
            Err(GpufanError::FileRead { .. })
        ));
    }
}
