//! Node metadata
//!
//! Each node publishes the list of files in its local tree as a JSON array
//! in `meta/<hostname>.txt`. The file is rewritten whole on every pass and
//! only ever written by the node it is named after.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::ser::Formatter;
use tracing::{info, warn};

use super::crawler::RelativePath;
use super::write_atomic;
use crate::error::Result;

/// JSON layout of legacy metadata files: one entry per line with no
/// indentation, `", "` between entries and everything outside printable
/// ASCII written as `\uXXXX`.
#[derive(Default)]
struct LegacyFormatter {
    has_value: bool,
}

impl Formatter for LegacyFormatter {
    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.has_value = false;
        writer.write_all(b"[")
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.has_value {
            writer.write_all(b"\n")?;
        }
        writer.write_all(b"]")
    }

    fn begin_array_value<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.has_value = true;
        writer.write_all(if first { &b"\n"[..] } else { &b", \n"[..] })
    }

    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Write `files` to `path`, replacing any previous list.
///
/// The bytes match what legacy nodes write for the same list.
pub fn dump(files: &[RelativePath], path: &Path) -> Result<()> {
    let mut payload = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut payload, LegacyFormatter::default());
    files.serialize(&mut serializer)?;

    write_atomic(path, &payload)?;
    info!("Dumped {} entries to {:?}", files.len(), path);
    Ok(())
}

/// Read the list published by `hostname`.
///
/// A node that never published yields an empty list. Entries that are not
/// valid relative paths are dropped.
pub fn load(hostname: &str, meta_dir: &Path) -> Result<Vec<RelativePath>> {
    let path = meta_dir.join(format!("{}.txt", hostname));

    if !path.exists() {
        warn!("No metadata file for {} at {:?}", hostname, path);
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(&path)?);
    let entries: Vec<String> = serde_json::from_reader(reader)?;

    let total = entries.len();
    let files: Vec<RelativePath> = entries
        .into_iter()
        .filter_map(|entry| match RelativePath::new(entry) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Ignoring entry from {}: {}", hostname, e);
                None
            }
        })
        .collect();

    info!("Loaded metadata for {} ({}/{} entries)", hostname, files.len(), total);
    Ok(files)
}
