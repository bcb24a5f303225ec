//! Per-frame CSV tables
//!
//! Header fields are quoted; the first column is always `"Frame"`. Each annotation
//! contributes an `x`, `y` and value column.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::types::{EngineError, Observation, Result, Sample};

/// Column names of one annotation: `<name>_x`, `<name>_y`, `<name>_<suffix>`
pub fn observation_columns(name: &str, suffix: &str) -> [String; 3] {
    [
        format!("{}_x", name),
        format!("{}_y", name),
        format!("{}_{}", name, suffix),
    ]
}

/// Quotes a text field; embedded quotes are dropped
pub fn quote_text(text: &str) -> String {
    format!("\"{}\"", text.replace('"', ""))
}

/// Append-only CSV writer
pub struct TableWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    columns: usize,
    rows_written: usize,
}

impl TableWriter {
    /// Creates the file and writes the quoted header
    pub fn create(path: &Path, header: &[String]) -> Result<Self> {
        let file = File::create(path).map_err(|e| EngineError::export(path, e))?;
        let mut table = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            columns: header.len(),
            rows_written: 0,
        };
        let quoted: Vec<String> = header.iter().map(|h| format!("\"{}\"", h)).collect();
        table.write_line(&quoted.join(","))?;
        log::debug!("Opened table {:?} with {} columns", path, header.len());
        Ok(table)
    }

    /// Writes `frame` followed by the `(x, y, value)` triple of each observation
    pub fn write_observations(&mut self, frame: usize, observations: &[Observation]) -> Result<()> {
        let mut fields = Vec::with_capacity(1 + observations.len() * 3);
        fields.push(frame.to_string());
        for observation in observations {
            fields.push(observation.x.to_string());
            fields.push(observation.y.to_string());
            fields.push(match &observation.sample {
                Sample::Numeric(v) => v.to_string(),
                Sample::Text(text) => quote_text(text),
            });
        }
        self.write_record(&fields)
    }

    /// Writes pre-formatted fields
    pub fn write_record(&mut self, fields: &[String]) -> Result<()> {
        if fields.len() != self.columns {
            return Err(EngineError::Consistency(format!(
                "row with {} fields written to {:?}, which has {} columns",
                fields.len(),
                self.path,
                self.columns
            )));
        }
        self.write_line(&fields.join(","))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the file
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer
            .flush()
            .map_err(|e| EngineError::export(&self.path, e))?;
        log::info!("Wrote {} rows to {:?}", self.rows_written, self.path);
        Ok(self.path)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line).map_err(|e| EngineError::export(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec_logo.csv");

        let mut header = vec!["Frame".to_string()];
        header.extend(observation_columns("logo", "val"));
        header.extend(observation_columns("title", "txt"));

        let mut table = TableWriter::create(&path, &header).unwrap();
        table
            .write_observations(
                0,
                &[
                    Observation::new(2.0, 3.0, Sample::Numeric(0.995)),
                    Observation::new(0.0, 0.0, Sample::Text("Intro".into())),
                ],
            )
            .unwrap();
        assert_eq!(table.rows_written(), 1);
        table.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            r#""Frame","logo_x","logo_y","logo_val","title_x","title_y","title_txt""#
        );
        assert_eq!(lines[1], r#"0,2,3,0.995,0,0,"Intro""#);
    }

    #[test]
    fn test_row_width_checked() {
        let dir = tempfile::tempdir().unwrap();
        let mut table =
            TableWriter::create(&dir.path().join("t.csv"), &["Frame".to_string()]).unwrap();
        let result = table.write_observations(0, &[Observation::new(0.0, 0.0, Sample::blank())]);
        assert_matches!(result, Err(EngineError::Consistency(_)));
    }
}
