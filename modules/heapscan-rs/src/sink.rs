//! Output sinks for residency records

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SamplerError};
use crate::types::ResidencyRecord;

/// Destination of the records of one sampling pass
pub trait RecordSink {
    /// Append one record
    fn write_record(&mut self, record: &ResidencyRecord) -> io::Result<()>;

    /// Flush and close; records must not be lost silently
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

impl RecordSink for &mut Vec<ResidencyRecord> {
    fn write_record(&mut self, record: &ResidencyRecord) -> io::Result<()> {
        self.push(*record);
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

/// File name for `iteration`: `iter-0000`, `iter-0001`, ...
pub fn iteration_file_name(iteration: u64) -> String {
    format!("iter-{:04}", iteration)
}

/// Text file holding one line per record
#[derive(Debug)]
pub struct IterationFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl IterationFile {
    /// Create (or truncate) the file of `iteration` inside `dir`
    pub fn create(dir: &Path, iteration: u64) -> Result<Self> {
        let path = dir.join(iteration_file_name(iteration));
        let file = File::create(&path).map_err(|source| SamplerError::SinkCreate {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for IterationFile {
    fn write_record(&mut self, record: &ResidencyRecord) -> io::Result<()> {
        writeln!(self.writer, "{}", record)
    }

    fn close(self) -> io::Result<()> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_file_name() {
        assert_eq!(iteration_file_name(0), "iter-0000");
        assert_eq!(iteration_file_name(17), "iter-0017");
        assert_eq!(iteration_file_name(12345), "iter-12345");
    }

    #[test]
    fn test_iteration_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = IterationFile::create(dir.path(), 2).unwrap();
        let path = sink.path().to_path_buf();
        sink.write_record(&ResidencyRecord {
            iteration: 2,
            address: 0x1000,
            present: false,
            swapped: true,
        })
        .unwrap();
        sink.close().unwrap();

        assert_eq!(path, dir.path().join("iter-0002"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2\t0x1000\t\t4096\t01\n");
    }

    #[test]
    fn test_create_in_missing_dir() {
        let err = IterationFile::create(Path::new("/nonexistent/output"), 0).unwrap_err();
        assert!(matches!(err, SamplerError::SinkCreate { .. }));
        assert!(err.to_string().contains("iter-0000"));
    }
}
