//! Capture files: the only input of the presence pipeline
//!
//! The pipeline never looks inside a capture beyond what a [`CaptureSource`]
//! extracts from it: the nominal capture timestamp and the set of link-layer
//! source addresses seen.

pub mod pcap;

pub use pcap::PcapCaptureSource;

use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed capture: {0}")]
    Pcap(#[from] pcap_file::PcapError),
    #[error("No capture timestamp in file name: {0}")]
    Timestamp(String),
}

/// What one capture file yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Nominal capture time (Unix seconds, UTC), not yet bucketed
    pub timestamp: i64,
    /// Distinct source addresses, lowercase `aa:bb:cc:dd:ee:ff`
    pub addresses: BTreeSet<String>,
    /// Frames read, for logging
    pub packet_count: usize,
}

/// Extracts observations from a capture file
///
/// Implementations are blocking; the ingestion pool calls them from
/// `spawn_blocking`.
pub trait CaptureSource: Send + Sync {
    fn read(&self, path: &Path) -> Result<Capture, CaptureError>;
}

/// Parse the nominal timestamp out of a capture file name
///
/// The first run of 14 digits is read as `%Y%m%d%H%M%S` (UTC), so both
/// `arp_20230721100000.pcap` and `20230721100000-eth0.pcap` work.
pub fn timestamp_from_file_name(path: &Path) -> Result<i64, CaptureError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let bytes = name.as_bytes();
    let mut run_start = None;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            let start = *run_start.get_or_insert(i);
            if i + 1 - start == 14 {
                let digits = &name[start..=i];
                return NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
                    .map(|dt| dt.and_utc().timestamp())
                    .map_err(|_| CaptureError::Timestamp(name.clone()));
            }
        } else {
            run_start = None;
        }
    }

    Err(CaptureError::Timestamp(name))
}

/// Capture files ready for ingestion, oldest first
///
/// Files are sorted by name (names embed the capture timestamp) and the
/// newest one is left out: the capture process may still be writing it.
pub fn select_capture_files(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files.pop();

    Ok(files)
}
