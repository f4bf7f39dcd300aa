//! File reading for content aggregation
//!
//! Provides consistent handling for:
//! - Non-UTF-8 files (lossy decoding or skip)
//! - Oversized files (skipped)
//! - Binary files (skipped)

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Default maximum file size in bytes (16 MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Number of leading bytes inspected for NUL when detecting binary files
const BINARY_SNIFF_LEN: usize = 8192;

/// Strategy for handling non-UTF-8 content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingStrategy {
    /// Skip non-UTF-8 files entirely
    Skip,
    /// Replace invalid sequences with U+FFFD
    #[default]
    Lossy,
}

/// Configuration for file reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReadConfig {
    /// Files larger than this are skipped
    pub max_file_size: u64,

    /// How to handle non-UTF-8 content
    pub encoding_strategy: EncodingStrategy,
}

impl Default for FileReadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            encoding_strategy: EncodingStrategy::Lossy,
        }
    }
}

/// Reasons a file's content could not be produced
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("file appears to be binary")]
    Binary,

    #[error("file exceeds size limit ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("file contains invalid UTF-8")]
    InvalidUtf8,
}

/// Read a text file with the given configuration
pub fn read_text(path: &Path, config: &FileReadConfig) -> Result<String, ReadError> {
    let file = fs::File::open(path)?;
    let size = file.metadata()?.len();
    if size > config.max_file_size {
        return Err(ReadError::TooLarge {
            size,
            limit: config.max_file_size,
        });
    }

    let mut bytes = Vec::with_capacity(size as usize);
    io::BufReader::new(file).read_to_end(&mut bytes)?;
    decode(bytes, config)
}

fn decode(bytes: Vec<u8>, config: &FileReadConfig) -> Result<String, ReadError> {
    let sniff = bytes.len().min(BINARY_SNIFF_LEN);
    if bytes[..sniff].contains(&0) {
        return Err(ReadError::Binary);
    }

    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => match config.encoding_strategy {
            EncodingStrategy::Skip => Err(ReadError::InvalidUtf8),
            EncodingStrategy::Lossy => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        },
    }
}
