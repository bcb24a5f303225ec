//! Logged-series tables from previous runs
//!
//! Two file shapes are recognised from their header line:
//! - annotation tables: `Frame` followed by `<name>_x, <name>_y, <name>_<kind>` triples,
//!   where `<kind>` is `val`, `num`, `time` or `txt`
//! - first-minute files: `h,m,frames`, giving the wall-clock minute the recording
//!   started in and how many frames of it were recorded
//!
//! Anything else is rejected.

use std::fs;
use std::path::Path;

use crate::store::{Origin, Series, Track};
use crate::types::{is_blank, EngineError, Result, BLANK};

/// Kind of the value column of a logged annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggedColumn {
    /// Template-match confidence, thresholded to 0/1 on ingest
    Value,
    Number,
    Time,
    Text,
}

impl LoggedColumn {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "val" => Some(LoggedColumn::Value),
            "num" => Some(LoggedColumn::Number),
            "time" => Some(LoggedColumn::Time),
            "txt" => Some(LoggedColumn::Text),
            _ => None,
        }
    }
}

/// One annotation read from a logged table
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedAnnotation {
    pub name: String,
    pub column: LoggedColumn,
    pub track: Track,
}

/// Contents of an annotation table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoggedTable {
    pub annotations: Vec<LoggedAnnotation>,
    pub frames: usize,
}

/// Contents of a first-minute file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstMinute {
    pub hour: u32,
    pub minute: u32,
    /// Frames recorded within that first minute
    pub frames: u32,
}

/// A logged file, classified by its header
#[derive(Debug, Clone, PartialEq)]
pub enum LoggedFile {
    Annotations(LoggedTable),
    FirstMinute(FirstMinute),
}

fn split_fields(line: &str) -> Vec<String> {
    line.split(',')
        .map(|field| field.trim().trim_matches('"').to_string())
        .collect()
}

impl LoggedFile {
    /// Reads and classifies a logged file
    pub fn read(path: &Path, threshold: f32) -> Result<Self> {
        log::info!("Reading logged series: {:?}", path);
        let content = fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string(), threshold)
    }

    /// Classifies and parses file content; `origin` names the file in errors
    pub fn parse(content: &str, origin: &str, threshold: f32) -> Result<Self> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());
        let header = lines
            .next()
            .map(split_fields)
            .ok_or_else(|| EngineError::InvalidInput(format!("{} is empty", origin)))?;

        if header == ["h", "m", "frames"] {
            let row = lines.next().map(split_fields).ok_or_else(|| {
                EngineError::InvalidInput(format!("{} has no first-minute row", origin))
            })?;
            let parse = |i: usize| -> Result<u32> {
                row.get(i)
                    .and_then(|v| v.parse::<u32>().ok())
                    .ok_or_else(|| {
                        EngineError::InvalidInput(format!(
                            "{} has an invalid first-minute row",
                            origin
                        ))
                    })
            };
            return Ok(LoggedFile::FirstMinute(FirstMinute {
                hour: parse(0)?,
                minute: parse(1)?,
                frames: parse(2)?,
            }));
        }

        if header.first().map(String::as_str) != Some("Frame") || (header.len() - 1) % 3 != 0 {
            return Err(EngineError::InvalidInput(format!(
                "{} doesn't contain frame annotations",
                origin
            )));
        }

        let mut annotations = Vec::new();
        for triple in header[1..].chunks(3) {
            let value_header = &triple[2];
            let (name, column) = value_header
                .rsplit_once('_')
                .and_then(|(name, suffix)| Some((name, LoggedColumn::from_suffix(suffix)?)))
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!(
                        "{}: unsupported annotation column '{}'",
                        origin, value_header
                    ))
                })?;
            let series = match column {
                LoggedColumn::Value => Series::Numeric(Vec::new()),
                LoggedColumn::Number | LoggedColumn::Time | LoggedColumn::Text => {
                    Series::Text(Vec::new())
                }
            };
            annotations.push(LoggedAnnotation {
                name: name.to_string(),
                column,
                track: Track {
                    series,
                    x: Vec::new(),
                    y: Vec::new(),
                    origin: Origin::Logged,
                    size: None,
                },
            });
        }

        let mut frames = 0;
        let mut skipped = 0;
        for line in lines {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != header.len() {
                skipped += 1;
                continue;
            }
            for (i, annotation) in annotations.iter_mut().enumerate() {
                let base = 1 + 3 * i;
                let track = &mut annotation.track;
                track.x.push(fields[base].trim().parse().unwrap_or(0.0));
                track.y.push(fields[base + 1].trim().parse().unwrap_or(0.0));
                let raw = fields[base + 2].trim_matches('"');
                match &mut track.series {
                    Series::Numeric(values) => {
                        let confidence: f32 = raw.trim().parse().unwrap_or(0.0);
                        values.push(if confidence > threshold { 1.0 } else { 0.0 });
                    }
                    Series::Text(values) => values.push(if is_blank(raw) {
                        BLANK.to_string()
                    } else {
                        raw.to_string()
                    }),
                }
            }
            frames += 1;
        }

        if skipped > 0 {
            log::warn!("{}: skipped {} rows with a wrong number of columns", origin, skipped);
        }
        log::debug!(
            "{}: {} annotations over {} frames",
            origin,
            annotations.len(),
            frames
        );

        Ok(LoggedFile::Annotations(LoggedTable {
            annotations,
            frames,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TABLE: &str = "\"Frame\",\"logo_x\",\"logo_y\",\"logo_val\",\"clock_x\",\"clock_y\",\"clock_time\"\n\
        0,10,20,0.995,0,0, \n\
        1,11,21,0.5,5,6,12:04\n\
        2,12,22,0.999,5,6,12:05\n";

    #[test]
    fn test_parse_annotation_table() {
        let file = LoggedFile::parse(TABLE, "table.csv", 0.99).unwrap();
        let LoggedFile::Annotations(table) = file else {
            panic!("expected annotations");
        };

        assert_eq!(table.frames, 3);
        assert_eq!(table.annotations.len(), 2);

        let logo = &table.annotations[0];
        assert_eq!(logo.name, "logo");
        assert_eq!(logo.column, LoggedColumn::Value);
        assert_eq!(logo.track.series, Series::Numeric(vec![1.0, 0.0, 1.0]));
        assert_eq!(logo.track.x, vec![10.0, 11.0, 12.0]);

        let clock = &table.annotations[1];
        assert_eq!(clock.column, LoggedColumn::Time);
        assert_eq!(
            clock.track.series,
            Series::Text(vec![" ".into(), "12:04".into(), "12:05".into()])
        );
    }

    #[test]
    fn test_parse_first_minute() {
        let file = LoggedFile::parse("h,m,frames\n10,22,1125\n", "first.csv", 0.99).unwrap();
        assert_eq!(
            file,
            LoggedFile::FirstMinute(FirstMinute {
                hour: 10,
                minute: 22,
                frames: 1125
            })
        );
    }

    #[test]
    fn test_rejects_other_files() {
        assert_matches!(
            LoggedFile::parse("time,value\n1,2\n", "other.csv", 0.99),
            Err(EngineError::InvalidInput(_))
        );
        assert_matches!(
            LoggedFile::parse("Frame,a_x,a_y,a_blob\n", "odd.csv", 0.99),
            Err(EngineError::InvalidInput(_))
        );
        assert_matches!(
            LoggedFile::parse("", "empty.csv", 0.99),
            Err(EngineError::InvalidInput(_))
        );
    }

    #[test]
    fn test_skips_ragged_rows() {
        let content = "Frame,a_x,a_y,a_txt\n0,1,2,hello\n1,1\n2,1,2,world\n";
        let LoggedFile::Annotations(table) = LoggedFile::parse(content, "r.csv", 0.99).unwrap()
        else {
            panic!("expected annotations");
        };
        assert_eq!(table.frames, 2);
    }
}
