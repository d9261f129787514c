//! Archive root validation.

use ovnk_common::validate;
use ovnk_common::{DiagError, DiagResult};
use std::io;
use std::path::{Path, PathBuf};

pub const SOS_COMMANDS_DIR: &str = "sos_commands";
pub const SOS_MANIFEST: &str = "sos_reports/manifest.json";
pub const MUST_GATHER_LOG: &str = "must-gather.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Sosreport,
    MustGather,
}

impl ArchiveKind {
    /// Entries that must exist below the root
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            ArchiveKind::Sosreport => &[SOS_COMMANDS_DIR, SOS_MANIFEST],
            ArchiveKind::MustGather => &[MUST_GATHER_LOG],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArchiveKind::Sosreport => "sosreport",
            ArchiveKind::MustGather => "must-gather",
        }
    }
}

/// Validate a caller-supplied archive root and check its markers
pub fn archive_root(field: &str, raw: &str, kind: ArchiveKind) -> DiagResult<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DiagError::invalid_input(field, format!("{} path is required", kind.label())));
    }
    validate::absolute_path(field, raw)?;

    let root = PathBuf::from(raw);
    match root.metadata() {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(DiagError::invalid_input(field, format!("not a directory: {}", raw))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DiagError::ResourceNotFound(format!(
                "{} path does not exist: {}",
                kind.label(),
                raw
            )))
        }
        Err(e) => return Err(io_failure(&format!("failed to stat {}", raw), e)),
    }

    for marker in kind.markers() {
        if !root.join(marker).exists() {
            return Err(DiagError::invalid_input(
                field,
                format!("not a valid {}: missing {}", kind.label(), marker),
            ));
        }
    }
    Ok(root)
}

/// Join a caller-supplied relative path onto a validated root.
///
/// No component below the root may be a symlink, so a link planted in an
/// archive cannot lead the read outside of it. Components that do not exist
/// yet are left for the caller's read to report.
pub fn resolve_relative(root: &Path, field: &str, relative: &str) -> DiagResult<PathBuf> {
    let relative = relative.trim();
    validate::relative_path(field, relative)?;

    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        path.push(component);
        match path.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(DiagError::invalid_input(
                    field,
                    format!("path traversal not allowed: {} is a symlink", relative),
                ));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(root.join(relative))
}

pub(crate) fn io_failure(message: &str, err: io::Error) -> DiagError {
    DiagError::execution(format!("{}: {}", message, err), "", None)
}
