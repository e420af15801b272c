// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::collections::BTreeMap;
use std::fmt;
use std::io::{ Read, Seek, SeekFrom };
use std::path::*;
use byteorder::{ BigEndian, ReadBytesExt };

pub mod desc_reader;
pub mod gps;
pub mod inputs;
pub mod scanner;
pub mod writer;
#[cfg(test)]
mod test_support;

pub use desc_reader::{ ChunkIndexEntry, DescriptorBox };
pub use gps::{ DecodeOutcome, GpsSample, SkipReason };
pub use writer::{ check_output, render_gpx, write_gpx };

// GPS data in Novatek files:
// - moov/gps  index of (position, length) pairs pointing into the file
// - free      one box per fix with magic "GPS ", usually inside mdat
// When the index is missing (recording cut short) the free boxes are found by scanning for their tag.

pub const fn fourcc(s: &str) -> u32 {
    let s = s.as_bytes();
    (s[3] as u32) | ((s[2] as u32) << 8) | ((s[1] as u32) << 16) | ((s[0] as u32) << 24)
}

/// Renders a box type as text, `None` if the bytes are not valid UTF-8.
pub fn tag_str(typ: u32) -> Option<String> {
    String::from_utf8(typ.to_be_bytes().to_vec()).ok()
}

pub fn typ_to_str(typ: u32) -> String {
    tag_str(typ).unwrap_or_else(|| format!("{:08X}", typ))
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open '{}': {source}", .path.display())]
    Open { path: PathBuf, source: std::io::Error },

    #[error("Output file '{}' exists", .0.display())]
    OutputExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Generic 8 byte box header. `size` is the declared size of the whole box,
/// `header_size` is 16 when the 64-bit largesize escape was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub position: u64,
    pub size: u64,
    pub header_size: u64,
    pub typ: u32,
}

impl BoxHeader {
    /// Type tag as text, `None` for tags that can't be rendered.
    pub fn tag(&self) -> Option<String> { tag_str(self.typ) }
}

/// Reads the box header at `position`. `None` marks the end of a sibling chain:
/// short read, seek failure or a truncated largesize.
pub fn read_box_header<R: Read + Seek>(reader: &mut R, position: u64) -> Option<BoxHeader> {
    let read = |reader: &mut R| -> std::io::Result<BoxHeader> {
        reader.seek(SeekFrom::Start(position))?;
        let size = reader.read_u32::<BigEndian>()?;
        let typ = reader.read_u32::<BigEndian>()?;
        if size == 1 {
            let largesize = reader.read_u64::<BigEndian>()?;
            Ok(BoxHeader { position, size: largesize, header_size: 16, typ })
        } else {
            Ok(BoxHeader { position, size: size as u64, header_size: 8, typ })
        }
    };
    read(reader).ok()
}

/// Attempted/valid/skipped record counts for one discovery path.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct PathStats {
    pub attempted: usize,
    pub valid: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl PathStats {
    pub fn record(&mut self, outcome: &DecodeOutcome) {
        self.attempted += 1;
        match outcome {
            DecodeOutcome::Sample(_) => self.valid += 1,
            DecodeOutcome::Skipped(reason) => *self.skipped.entry(*reason).or_default() += 1,
        }
    }
    pub fn skipped_total(&self) -> usize { self.skipped.values().sum() }
    pub fn merge(&mut self, other: &PathStats) {
        self.attempted += other.attempted;
        self.valid += other.valid;
        for (reason, count) in &other.skipped {
            *self.skipped.entry(*reason).or_default() += count;
        }
    }
}

impl fmt::Display for PathStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempted: {}, valid: {}, skipped: {}", self.attempted, self.valid, self.skipped_total())?;
        for (reason, count) in &self.skipped {
            write!(f, ", {reason}: {count}")?;
        }
        Ok(())
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct FileStats {
    pub descriptor_found: bool,
    pub chunk_index: PathStats,
    pub raw_scan: PathStats,
}

#[derive(Default, Clone, Debug)]
pub struct FileReport {
    pub samples: Vec<GpsSample>,
    pub stats: FileStats,
}

/// Extracts every GPS fix from one stream: the moov/gps index first, the raw tag scan
/// if that yields nothing.
pub fn process_stream<R: Read + Seek>(reader: &mut R) -> Result<FileReport> {
    let mut report = FileReport::default();

    if let Some(descriptor) = desc_reader::find_gps_descriptor(reader) {
        report.stats.descriptor_found = true;
        let mut entries = desc_reader::read_chunk_index(reader, &descriptor);
        entries.sort();
        report.samples = decode_entries(reader, &entries, &mut report.stats.chunk_index);
        log::info!("GPS index: {}", report.stats.chunk_index);
    } else {
        log::info!("No GPS chunk descriptor box found");
    }

    if report.samples.is_empty() {
        log::info!("Scanning for raw {:?} records", String::from_utf8_lossy(scanner::RAW_GPS_MAGIC));
        let entries = scanner::find_raw_records(reader)?;
        report.samples = decode_entries(reader, &entries, &mut report.stats.raw_scan);
        log::info!("Raw scan: {}", report.stats.raw_scan);
    }

    Ok(report)
}

fn decode_entries<R: Read + Seek>(reader: &mut R, entries: &[ChunkIndexEntry], stats: &mut PathStats) -> Vec<GpsSample> {
    entries.iter().filter_map(|entry| {
        let outcome = gps::decode_record(reader, entry.position as u64, entry.length);
        stats.record(&outcome);
        outcome.into_sample()
    }).collect()
}

pub fn process_file<P: AsRef<Path>>(path: P) -> Result<FileReport> {
    let path = path.as_ref();
    log::info!("Processing file '{}'...", path.display());
    let f = std::fs::File::open(path).map_err(|source| Error::Open { path: path.to_path_buf(), source })?;
    let mut fs = std::io::BufReader::with_capacity(16*1024, f);
    process_stream(&mut fs)
}

/// What to do with an input that can't be opened or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnFileError {
    #[default]
    Abort,
    Skip,
}

#[derive(Default, Debug)]
pub struct RunSummary {
    pub samples: Vec<GpsSample>,
    pub files: Vec<(PathBuf, FileStats)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RunSummary {
    pub fn add(&mut self, path: PathBuf, mut report: FileReport) {
        self.samples.append(&mut report.samples);
        self.files.push((path, report.stats));
    }

    /// Totals over all files, (gps index, raw scan).
    pub fn totals(&self) -> (PathStats, PathStats) {
        let mut chunk_index = PathStats::default();
        let mut raw_scan = PathStats::default();
        for (_, stats) in &self.files {
            chunk_index.merge(&stats.chunk_index);
            raw_scan.merge(&stats.raw_scan);
        }
        (chunk_index, raw_scan)
    }
}

/// Processes `files` in the given order, concatenating their samples.
pub fn extract_files<P: AsRef<Path>>(files: &[P], on_error: OnFileError) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for path in files {
        let path = path.as_ref();
        match process_file(path) {
            Ok(report) => summary.add(path.to_path_buf(), report),
            Err(e) if on_error == OnFileError::Skip => {
                log::error!("{e}, skipping");
                summary.failed.push((path.to_path_buf(), e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

#[derive(Debug)]
pub enum RunOutcome {
    Written(RunSummary),
    NoGpsData(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Written(s) | RunOutcome::NoGpsData(s) => s,
        }
    }
}

/// Extracts `files` and writes the GPX track to `output`. Nothing is written when no
/// input had a single valid fix. The overwrite policy is left to the caller, see [`check_output`].
pub fn convert_files<P: AsRef<Path>>(files: &[P], output: &Path, on_error: OnFileError) -> Result<RunOutcome> {
    let summary = extract_files(files, on_error)?;
    if summary.samples.is_empty() {
        return Ok(RunOutcome::NoGpsData(summary));
    }
    log::info!("Writing {} points to output file '{}'", summary.samples.len(), output.display());
    write_gpx(output, &summary.samples)?;
    Ok(RunOutcome::Written(summary))
}
