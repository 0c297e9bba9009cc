//! Console output helpers

use crate::capture::notifier::CapturedArtifact;
use std::io::Write;

/// A writer that writes to both console and file
///
/// Used for logging to both stderr and a log file simultaneously.
pub struct DualWriter {
    pub console: std::io::Stderr,
    pub file: std::fs::File,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.console.write(buf);
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

/// Format bytes into human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// One line per saved photo
pub fn describe_artifact(artifact: &CapturedArtifact) -> String {
    let thumb = match &artifact.thumbnail_path {
        Some(path) => format!(", thumbnail {}", path.display()),
        None => String::new(),
    };
    format!(
        "#{} {} ({}{})",
        artifact.sequence,
        artifact.full_image_path.display(),
        format_bytes(artifact.bytes),
        thumb
    )
}
