//! Raster scan programs.
//!
//! A program is an ordered list of `(x, y)` stage targets in device units,
//! generated as a boustrophedon raster over a rectangle or loaded from a
//! two-column CSV in engineering units. The program worker walks the list,
//! taking one instrument reading per point and appending it to the log file.
//!
//! The point list is immutable once generated; the `updated` flag tells the
//! status poller that the plotted program overlay needs a redraw.

use crate::config::{Settings, StageAxis};
use crate::error::AppResult;
use crate::instrument::Acquisition;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Inclusive-bound slack for fractional increments.
const RANGE_EPSILON: f64 = 1e-9;

/// One stage target in device units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramPoint {
    pub x: i64,
    pub y: i64,
}

/// Raster traversal order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanOrder {
    /// Rows of constant y, x sweeping back and forth.
    #[default]
    XThenY,
    /// Columns of constant x, y sweeping back and forth.
    YThenX,
}

/// A scan program plus its run state.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub points: Vec<ProgramPoint>,
    pub min_x: f64,
    pub max_x: f64,
    pub x_inc: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub y_inc: f64,
    pub order: ScanOrder,
    pub pre_delay: f64,
    pub post_delay: f64,
    pub running: bool,
    /// Set whenever the point list changes; cleared by the plot refresh.
    pub updated: bool,
    pub log_file: Option<PathBuf>,
}

/// Program handle shared between the GUI and the program worker.
pub type SharedProgram = Arc<RwLock<Program>>;

fn inclusive_range(min: f64, max: f64, inc: f64) -> Vec<f64> {
    let mut values = Vec::new();
    if inc <= 0.0 {
        return values;
    }
    let mut value = min;
    while value <= max + RANGE_EPSILON {
        values.push(value);
        value += inc;
    }
    values
}

impl Program {
    /// Generates a boustrophedon raster over `[min, max]` per axis, in
    /// engineering units, converted to device units via the settings.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        settings: &Settings,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        x_inc: f64,
        y_inc: f64,
        pre_delay: f64,
        post_delay: f64,
        order: ScanOrder,
    ) -> Self {
        let x_units = inclusive_range(min_x, max_x, x_inc);
        let y_units = inclusive_range(min_y, max_y, y_inc);
        let mut points = Vec::with_capacity(x_units.len() * y_units.len());

        let (outer, inner, outer_axis) = match order {
            ScanOrder::XThenY => (&y_units, &x_units, StageAxis::Y),
            ScanOrder::YThenX => (&x_units, &y_units, StageAxis::X),
        };
        for (row, &outer_val) in outer.iter().enumerate() {
            let forward = row % 2 == 0;
            let sweep: Vec<f64> = if forward {
                inner.clone()
            } else {
                inner.iter().rev().copied().collect()
            };
            for inner_val in sweep {
                let (xu, yu) = match outer_axis {
                    StageAxis::Y => (inner_val, outer_val),
                    StageAxis::X => (outer_val, inner_val),
                };
                points.push(ProgramPoint {
                    x: settings.units_to_value(xu, StageAxis::X),
                    y: settings.units_to_value(yu, StageAxis::Y),
                });
            }
        }

        Self {
            points,
            min_x,
            max_x,
            x_inc,
            min_y,
            max_y,
            y_inc,
            order,
            pre_delay,
            post_delay,
            running: false,
            updated: true,
            log_file: None,
        }
    }

    /// Default full-travel scan at a tenth of each axis span per step.
    pub fn default_scan(settings: &Settings) -> Self {
        Self::generate(
            settings,
            0.0,
            settings.x_dist,
            0.0,
            settings.y_dist,
            settings.x_dist / 10.0,
            settings.y_dist / 10.0,
            0.5,
            0.5,
            ScanOrder::XThenY,
        )
    }

    /// Loads points from a two-column CSV of engineering units. Lines with
    /// the wrong field count or non-numeric values are skipped.
    pub fn load(&mut self, settings: &Settings, path: &Path) -> AppResult<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut points = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() != 2 {
                continue;
            }
            let (Ok(xu), Ok(yu)) = (
                record[0].trim().parse::<f64>(),
                record[1].trim().parse::<f64>(),
            ) else {
                continue;
            };
            points.push(ProgramPoint {
                x: settings.units_to_value(xu, StageAxis::X),
                y: settings.units_to_value(yu, StageAxis::Y),
            });
        }
        let count = points.len();
        self.points = points;
        self.updated = true;
        Ok(count)
    }

    /// Saves the point list as a two-column CSV in engineering units.
    pub fn save(&self, settings: &Settings, path: &Path) -> AppResult<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        for point in &self.points {
            writer.write_record([
                format_units(settings.value_to_units(point.x, StageAxis::X)),
                format_units(settings.value_to_units(point.y, StageAxis::Y)),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Formats an engineering-unit value without float noise.
fn format_units(value: f64) -> String {
    let formatted = format!("{value:.6}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn labeled(id: &str, unit: &str) -> String {
    if unit.is_empty() {
        id.to_string()
    } else {
        format!("{id} ({unit})")
    }
}

/// Program log header: `date`, labeled x and y, then the instrument's
/// labeled channel ids.
pub fn log_header(settings: &Settings, reading: &Acquisition) -> Vec<String> {
    let mut header = vec![
        "date".to_string(),
        labeled("x", &settings.x_units),
        labeled("y", &settings.y_units),
    ];
    for channel in reading {
        header.push(labeled(&channel.id, &channel.unit));
    }
    header
}

/// One program log row. Errored channels produce an empty cell so partial
/// readings stay machine-readable.
pub fn log_row(
    settings: &Settings,
    timestamp: DateTime<Local>,
    point: ProgramPoint,
    reading: &Acquisition,
) -> Vec<String> {
    let mut row = vec![
        timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        format_units(settings.value_to_units(point.x, StageAxis::X)),
        format_units(settings.value_to_units(point.y, StageAxis::Y)),
    ];
    for channel in reading {
        row.push(
            channel
                .value
                .map(|v| v.to_string())
                .unwrap_or_default(),
        );
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Channel;
    use std::io::Write;

    fn unit_settings() -> Settings {
        // 1:1 device/engineering unit scaling keeps point values readable
        Settings {
            max_x: 100,
            max_y: 100,
            x_dist: 100.0,
            y_dist: 100.0,
            ..Settings::default()
        }
    }

    #[test]
    fn test_three_by_three_boustrophedon() {
        let settings = unit_settings();
        let program = Program::generate(
            &settings,
            0.0,
            2.0,
            0.0,
            2.0,
            1.0,
            1.0,
            0.5,
            0.5,
            ScanOrder::XThenY,
        );
        let expected = [
            (0, 0),
            (1, 0),
            (2, 0),
            (2, 1),
            (1, 1),
            (0, 1),
            (0, 2),
            (1, 2),
            (2, 2),
        ];
        let actual: Vec<(i64, i64)> = program.points.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(actual, expected);
        assert!(program.updated);
    }

    #[test]
    fn test_transposed_order() {
        let settings = unit_settings();
        let program = Program::generate(
            &settings,
            0.0,
            1.0,
            0.0,
            1.0,
            1.0,
            1.0,
            0.5,
            0.5,
            ScanOrder::YThenX,
        );
        let actual: Vec<(i64, i64)> = program.points.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(actual, [(0, 0), (0, 1), (1, 1), (1, 0)]);
    }

    #[test]
    fn test_fractional_increment_includes_upper_bound() {
        let values = inclusive_range(0.0, 0.3, 0.1);
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn test_save_load_round_trip() {
        let settings = unit_settings();
        let program = Program::generate(
            &settings,
            0.0,
            2.0,
            0.0,
            2.0,
            1.0,
            1.0,
            0.5,
            0.5,
            ScanOrder::XThenY,
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.csv");
        program.save(&settings, &path).unwrap();

        let mut loaded = Program::default();
        let count = loaded.load(&settings, &path).unwrap();
        assert_eq!(count, program.points.len());
        assert_eq!(loaded.points, program.points);
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let settings = unit_settings();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "1.0,2.0").unwrap();
        writeln!(file, "not,numeric").unwrap();
        writeln!(file, "3.0").unwrap();
        writeln!(file, "4.0,5.0,6.0").unwrap();
        writeln!(file, "7.0,8.0").unwrap();
        drop(file);

        let mut program = Program::default();
        let count = program.load(&settings, &path).unwrap();
        assert_eq!(count, 2);
        assert_eq!(program.points[0], ProgramPoint { x: 1, y: 2 });
        assert_eq!(program.points[1], ProgramPoint { x: 7, y: 8 });
    }

    #[test]
    fn test_format_units_trims_float_noise() {
        assert_eq!(format_units(10.000000000000002), "10");
        assert_eq!(format_units(0.5), "0.5");
        assert_eq!(format_units(0.0), "0");
        assert_eq!(format_units(-2.25), "-2.25");
    }

    #[test]
    fn test_log_header_and_row() {
        let settings = unit_settings();
        let reading = vec![
            Channel {
                id: "temperature".to_string(),
                value: Some(21.0),
                unit: "C".to_string(),
                error: None,
            },
            Channel {
                id: "humidity".to_string(),
                value: None,
                unit: "%".to_string(),
                error: Some("sensor fault".to_string()),
            },
        ];
        let header = log_header(&settings, &reading);
        assert_eq!(
            header,
            ["date", "x (mm)", "y (mm)", "temperature (C)", "humidity (%)"]
        );

        let timestamp = Local::now();
        let row = log_row(
            &settings,
            timestamp,
            ProgramPoint { x: 10, y: 20 },
            &reading,
        );
        assert_eq!(row.len(), 5);
        assert_eq!(row[1], "10");
        assert_eq!(row[2], "20");
        assert_eq!(row[3], "21");
        // Errored channel leaves an empty cell
        assert_eq!(row[4], "");
    }
}
