//! Plain-text stream storage for channels.
//!
//! Each channel in storage mode writes one file named `<base>_<channel>.txt`. The file
//! starts with a `#`-prefixed header, followed by one sample per line. Markers such as
//! scan and step boundaries are written as `# <text>` lines in between.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{Frequency, Hint};

/// Header fields written at the top of a stream file.
#[derive(Debug)]
pub struct StreamHeader<'a> {
    /// Channel name.
    pub name: &'a str,
    /// Display hint.
    pub hint: Hint,
    /// Sampling class.
    pub frequency: Frequency,
    /// Custom tags, already carrying their `X-` prefix.
    pub tags: &'a BTreeMap<String, String>,
    /// Display argument suggestions.
    pub display: &'a BTreeMap<String, String>,
}

/// An open stream file.
///
/// Sample rows go through a single-column `csv` writer. Header and marker lines are
/// written raw after draining the record buffer, so the file keeps its line order.
#[derive(Debug)]
pub struct StreamFile {
    path: PathBuf,
    rows: csv::Writer<BufWriter<File>>,
}

impl StreamFile {
    /// Path for the stream of `name` below `base`.
    pub fn path_for(base: &Path, name: &str) -> PathBuf {
        let mut path = OsString::from(base.as_os_str());
        path.push(format!("_{name}.txt"));
        PathBuf::from(path)
    }

    /// Create the file and write its header.
    pub fn create(base: &Path, header: &StreamHeader<'_>) -> io::Result<Self> {
        let path = Self::path_for(base, header.name);
        let mut writer = BufWriter::new(File::create(&path)?);

        writeln!(writer, "# Name: {}", header.name)?;
        writeln!(writer, "# Hint: {}", header.hint)?;
        writeln!(writer, "# Frequency: {}", header.frequency)?;
        for (tag, value) in header.tags {
            writeln!(writer, "# {tag}: {value}")?;
        }
        for (key, value) in header.display {
            writeln!(writer, "# DISPLAY {key}: {value}")?;
        }

        let rows = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);
        Ok(Self { path, rows })
    }

    /// Location of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a `# text` marker line.
    pub fn write_marker(&mut self, text: &str) -> io::Result<()> {
        self.rows.write_record([format!("# {text}")])?;
        Ok(())
    }

    /// Write samples, one row each.
    pub fn write_samples(&mut self, samples: &[f64]) -> io::Result<()> {
        for sample in samples {
            self.rows.write_record([sample.to_string()])?;
        }
        Ok(())
    }

    /// Flush buffered rows to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.rows.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_markers_and_samples() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run");

        let mut tags = BTreeMap::new();
        tags.insert("X-Unit".to_string(), "counts".to_string());
        let mut display = BTreeMap::new();
        display.insert("plot.steps".to_string(), "true".to_string());

        let header = StreamHeader {
            name: "det",
            hint: Hint::Histogram,
            frequency: Frequency::Step,
            tags: &tags,
            display: &display,
        };

        let mut file = StreamFile::create(&base, &header).unwrap();
        file.write_marker("SCAN 0").unwrap();
        file.write_samples(&[1.5, 2.0]).unwrap();
        file.flush().unwrap();

        assert_eq!(file.path(), dir.path().join("run_det.txt"));
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            text,
            "# Name: det\n# Hint: histogram\n# Frequency: step\n# X-Unit: counts\n\
             # DISPLAY plot.steps: true\n# SCAN 0\n1.5\n2\n"
        );
    }

    #[test]
    fn rows_and_markers_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("order");
        let empty = BTreeMap::new();
        let header = StreamHeader {
            name: "det",
            hint: Hint::Waveform,
            frequency: Frequency::Continuous,
            tags: &empty,
            display: &empty,
        };

        let mut file = StreamFile::create(&base, &header).unwrap();
        file.write_samples(&[0.5, -3.0]).unwrap();
        file.write_marker("STEP 1: 2").unwrap();
        file.write_samples(&[f64::NAN]).unwrap();
        file.flush().unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let body: Vec<&str> = text.lines().skip_while(|l| l.starts_with("# ")).collect();
        assert_eq!(body, ["0.5", "-3", "# STEP 1: 2", "NaN"]);
    }
}
