use super::{BlockSnapshot, SnapshotSink, TableSnapshot};
use crate::config::DumpFormat;
use crate::error::{HeapError, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Writes one dump file per recorded event into a folder.
#[derive(Debug)]
pub struct DumpWriter {
    folder: PathBuf,
    format: DumpFormat,
    sequence: AtomicU64,
}

impl DumpWriter {
    /// Creates `folder` (and parents) if it does not exist.
    pub fn new(folder: impl Into<PathBuf>, format: DumpFormat) -> Result<Self> {
        let folder = folder.into();
        fs::create_dir_all(&folder).map_err(|e| {
            HeapError::InternalError(format!(
                "Failed to create dump folder {}: {}",
                folder.display(),
                e
            ))
        })?;
        Ok(Self {
            folder,
            format,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn format(&self) -> DumpFormat {
        self.format
    }

    /// `memory_dump_<timestamp>_<seq>.<ext>`; the sequence keeps names unique
    /// within one millisecond.
    pub fn file_name(snapshot: &TableSnapshot, sequence: u64, format: DumpFormat) -> String {
        format!(
            "memory_dump_{}_{}.{}",
            snapshot.timestamp_label(),
            sequence,
            format.extension()
        )
    }

    pub fn write(&self, snapshot: &TableSnapshot) -> Result<PathBuf> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self
            .folder
            .join(Self::file_name(snapshot, sequence, self.format));

        let contents = match self.format {
            DumpFormat::Text => Self::render_text(snapshot),
            DumpFormat::Json => Self::render_json(snapshot)?,
        };

        fs::write(&path, contents).map_err(|e| {
            HeapError::InternalError(format!(
                "Failed to create dump file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(path)
    }

    pub fn render_text(snapshot: &TableSnapshot) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Memory Dump - {}", snapshot.timestamp_label());
        let _ = writeln!(out, "Total Memory: {} bytes", snapshot.capacity);
        out.push('\n');
        let _ = writeln!(out, "Allocated Blocks: {}", snapshot.blocks.len());

        for block in &snapshot.blocks {
            out.push_str(&format_block_line(block));
            out.push('\n');
            out.push_str("Content (hex): ");
            out.push_str(&format_preview(block));
            out.push_str("\n\n");
        }
        out
    }

    pub fn render_json(snapshot: &TableSnapshot) -> Result<String> {
        serde_json::to_string_pretty(snapshot)
            .map_err(|e| HeapError::InternalError(format!("Failed to serialize snapshot: {}", e)))
    }
}

impl SnapshotSink for DumpWriter {
    fn record(&self, event: &str, snapshot: &TableSnapshot) {
        match self.write(snapshot) {
            Ok(path) => log::debug!("Memory dump created after {}: {}", event, path.display()),
            Err(e) => log::error!("Dump after {} failed: {}", event, e),
        }
    }
}

fn format_block_line(block: &BlockSnapshot) -> String {
    format!(
        "Block ID: {} | Offset: {} | Size: {} bytes | Type: {} | RefCount: {} | Status: {}",
        block.id,
        block.offset,
        block.size,
        block.type_tag,
        block.ref_count,
        block.status_label()
    )
}

/// Two-digit hex bytes separated by spaces, an extra space after every
/// eighth byte, and `...` when the block is longer than the preview.
fn format_preview(block: &BlockSnapshot) -> String {
    let mut out = String::with_capacity(block.preview.len() * 3 + 8);
    for (i, byte) in block.preview.iter().enumerate() {
        let _ = write!(out, "{:02x} ", byte);
        if (i + 1) % 8 == 0 {
            out.push(' ');
        }
    }
    if block.is_truncated() {
        out.push_str("...");
    }
    out
}

/// Logs the table summary and one line per entry at `info`.
pub fn log_memory_state(snapshot: &TableSnapshot) {
    log::info!(
        "Memory Manager State: total={} bytes, entries={}, allocated={} ({} bytes)",
        snapshot.capacity,
        snapshot.blocks.len(),
        snapshot.allocated_count(),
        snapshot.allocated_bytes()
    );
    for block in &snapshot.blocks {
        log::info!("{}", format_block_line(block));
    }
}
