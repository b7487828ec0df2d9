//! Gzip'd delimited-text decoding.
//!
//! The whole compressed file is held in memory and decompressed as rows are
//! pulled. Multi-member gzip streams are read through to the last member.

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use std::io::Cursor;

use crate::error::DecodeError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One parsed record: its fields in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<String>,
}

impl Row {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field at `index`, if the row is that long.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

impl<S: Into<String>> FromIterator<S> for Row {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Totals reported when a decoder is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub rows: u64,
    /// Rows with at least one field that was not valid UTF-8.
    pub lossy_rows: u64,
    pub compressed_bytes: u64,
}

/// Pulls rows out of a gzip-compressed delimited-text file.
///
/// Rows may have any number of fields; validating their shape is left to the
/// row mapping. There is no header row. Fields are returned byte for byte
/// when they are valid UTF-8; invalid sequences become U+FFFD and the row is
/// counted in [`DecodeStats::lossy_rows`].
pub struct RowDecoder {
    reader: csv::Reader<MultiGzDecoder<Cursor<Bytes>>>,
    record: csv::ByteRecord,
    rows: u64,
    lossy_rows: u64,
    compressed_bytes: u64,
}

impl std::fmt::Debug for RowDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowDecoder")
            .field("rows", &self.rows)
            .field("compressed_bytes", &self.compressed_bytes)
            .finish_non_exhaustive()
    }
}

impl RowDecoder {
    /// Start decoding `data`, which must begin with a valid gzip header.
    pub fn open(data: Bytes, delimiter: u8) -> Result<Self, DecodeError> {
        if !data.starts_with(&GZIP_MAGIC) {
            return Err(DecodeError::NotCompressed);
        }

        let compressed_bytes = data.len() as u64;
        let gz = MultiGzDecoder::new(Cursor::new(data));
        if gz.header().is_none() {
            return Err(DecodeError::NotCompressed);
        }

        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(gz);

        Ok(Self {
            reader,
            record: csv::ByteRecord::new(),
            rows: 0,
            lossy_rows: 0,
            compressed_bytes,
        })
    }

    /// The next row, or `Ok(None)` at a clean end of stream.
    ///
    /// An error means the rest of the file is unreadable (typically truncated
    /// or corrupt compressed data); the decoder should not be polled again.
    pub fn next_row(&mut self) -> Result<Option<Row>, DecodeError> {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.rows += 1;
                let mut lossy = false;
                let row = self
                    .record
                    .iter()
                    .map(|field| match std::str::from_utf8(field) {
                        Ok(text) => text.to_string(),
                        Err(_) => {
                            lossy = true;
                            String::from_utf8_lossy(field).into_owned()
                        }
                    })
                    .collect();
                if lossy {
                    self.lossy_rows += 1;
                }
                Ok(Some(row))
            }
            Err(source) => Err(DecodeError::Malformed {
                row: self.rows,
                source,
            }),
        }
    }

    /// Rows delivered so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Release the stream and report totals.
    pub fn close(self) -> DecodeStats {
        DecodeStats {
            rows: self.rows,
            lossy_rows: self.lossy_rows,
            compressed_bytes: self.compressed_bytes,
        }
    }
}
