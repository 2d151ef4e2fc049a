use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a transfer label can be used as a single file name inside
/// a destination directory.
///
/// The announced file name is an arbitrary peer-controlled string. Before it
/// touches the filesystem it must be exactly one normal path component.
///
/// Rejects:
/// - Empty names and `.` / `..`
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Any separator (`/` or `\`), so nested paths are refused too
/// - NUL bytes
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }

    if file_name.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte not allowed: {file_name:?}"
        )));
    }

    if file_name.contains('/') || file_name.contains('\\') {
        return Err(TransferError::InvalidPath(format!(
            "path separators not allowed: {file_name}"
        )));
    }

    let path = Path::new(file_name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (Some(Component::CurDir), _) => Err(
            TransferError::InvalidPath(format!("relative directory not allowed: {file_name}")),
        ),
        _ => Err(TransferError::InvalidPath(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}
