//! Finding a tool's data files inside the run tree.
//!
//! `locate` turns a tool's [`ToolCoordinates`] into the list of
//! [`DataFile`]s its transformer will consume. Each `DataFile` owns the
//! cursor over its contents; csv files are opened and their header read
//! here so that header problems are counted before any document is built.

use std::fs::File;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::archive::RunArchive;
use crate::counters::{Counter, Counters};
use crate::layout::ToolCoordinates;
use crate::registry::{Handling, HandlerRegistry, ToolHandler};

/// Read position in a data file.
#[derive(Debug)]
pub enum FileCursor {
    /// Opened lazily by the transformer (json and stdout files).
    Pending,
    /// Open csv reader positioned after the header row.
    Csv {
        reader: csv::Reader<File>,
        header: Vec<String>,
    },
    Done,
}

/// One physical file of a tool, with its matched handler record.
#[derive(Debug)]
pub struct DataFile {
    pub path: PathBuf,
    pub basename: String,
    /// Index into the tool's handler records; `None` for raw-record files.
    pub record: Option<usize>,
    pub cursor: FileCursor,
}

impl DataFile {
    pub fn pending(path: PathBuf, record: Option<usize>) -> Self {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            basename,
            record,
            cursor: FileCursor::Pending,
        }
    }

    /// Open a csv file and read its header row.
    ///
    /// Returns `None`, with the matching counter bumped, when the file
    /// cannot be read or has no header.
    pub fn open_csv(path: PathBuf, record: usize, counters: &mut Counters) -> Option<Self> {
        let mut file = Self::pending(path, Some(record));
        let mut reader = match csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&file.path)
        {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %file.path.display(), "Unreadable csv file: {}", e);
                counters.incr(Counter::UnreadableCsvFile);
                return None;
            }
        };
        let mut row = csv::StringRecord::new();
        match reader.read_record(&mut row) {
            Ok(true) => {
                file.cursor = FileCursor::Csv {
                    reader,
                    header: row.iter().map(str::to_string).collect(),
                };
                Some(file)
            }
            Ok(false) => {
                warn!(path = %file.path.display(), "Empty csv file");
                counters.incr(Counter::CsvFileWithoutHeader);
                None
            }
            Err(e) => {
                warn!(path = %file.path.display(), "Unreadable csv header: {}", e);
                counters.incr(Counter::UnreadableCsvFile);
                None
            }
        }
    }

    pub fn header(&self) -> Option<&[String]> {
        match &self.cursor {
            FileCursor::Csv { header, .. } => Some(header),
            _ => None,
        }
    }

    /// Next csv row, or `None` once the file is exhausted.
    ///
    /// A read error ends the file early and is counted.
    pub fn next_row(&mut self, counters: &mut Counters) -> Option<Vec<String>> {
        let FileCursor::Csv { reader, .. } = &mut self.cursor else {
            return None;
        };
        let mut row = csv::StringRecord::new();
        match reader.read_record(&mut row) {
            Ok(true) => Some(row.iter().map(str::to_string).collect()),
            Ok(false) => {
                self.cursor = FileCursor::Done;
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Unreadable csv row: {}", e);
                counters.incr(Counter::UnreadableCsvFile);
                self.cursor = FileCursor::Done;
                None
            }
        }
    }

    pub fn finish(&mut self) {
        self.cursor = FileCursor::Done;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.cursor, FileCursor::Done)
    }
}

/// Data files of one tool at one coordinate, in file-name order.
pub fn locate(
    registry: &HandlerRegistry,
    handler: &ToolHandler,
    coords: &ToolCoordinates,
    archive: &RunArchive,
    counters: &mut Counters,
) -> Vec<DataFile> {
    let tool_dir = coords.tool_dir(archive.dirname());
    match handler.prospectus.handling() {
        Handling::Csv => {
            let csv_dir = format!("{}/csv", tool_dir);
            let mut files = Vec::new();
            for member in archive.files_in(&csv_dir) {
                let Some(record) = registry.record_for_csv(handler, member.basename()) else {
                    debug!(file = %member.name, "No csv handler");
                    counters.incr(Counter::CsvFileWithoutHandler);
                    continue;
                };
                if let Some(file) = DataFile::open_csv(archive.path_of(&member.name), record, counters) {
                    files.push(file);
                }
            }
            files
        }
        Handling::Json => {
            let json_dir = format!("{}/json", tool_dir);
            archive
                .files_in(&json_dir)
                .map(|m| DataFile::pending(archive.path_of(&m.name), None))
                .collect()
        }
        Handling::Stdout => {
            let basename = format!("{}-stdout.txt", coords.tool);
            let name = format!("{}/{}", tool_dir, basename);
            let present = archive.files_in(&tool_dir).any(|m| m.name == name);
            match (present, handler.record_for(&basename)) {
                (true, Some(record)) => vec![DataFile::pending(archive.path_of(&name), Some(record))],
                _ => Vec::new(),
            }
        }
    }
}
