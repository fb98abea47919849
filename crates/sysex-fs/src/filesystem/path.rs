//! Item path parsing and derivation.
//!
//! Device paths look like `/<fs-name>/<id>[:<name>]`. The name after the
//! separator is for display only; slot storage addresses items by id.

use std::path::{Path, PathBuf};

use super::{FsOptions, Item};
use crate::config::ID_NAME_SEPARATOR;
use crate::errors::BackendError;

/// Splits `/preset/12:Lead` into `("preset", "/12:Lead")`.
///
/// The filesystem root maps to `/`.
pub fn split_fs_path(path: &str) -> Result<(&str, String), BackendError> {
    let rest = path.strip_prefix('/').ok_or_else(|| BackendError::invalid_path(path))?;
    let (fs_name, inner) = match rest.split_once('/') {
        Some((fs_name, inner)) => (fs_name, inner.trim_end_matches('/')),
        None => (rest, ""),
    };
    if fs_name.is_empty() {
        return Err(BackendError::invalid_path(path));
    }
    Ok((fs_name, format!("/{inner}")))
}

/// Last path component.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parses the id and optional display name of the last path component.
pub fn id_name_from_path(path: &str) -> Result<(u32, Option<String>), BackendError> {
    let base = basename(path);
    let (id, name) = match base.split_once(ID_NAME_SEPARATOR) {
        Some((id, name)) => (id, Some(name)),
        None => (base, None),
    };
    let id = id.parse::<u32>().map_err(|_| BackendError::invalid_path(path))?;
    let name = name.filter(|n| !n.is_empty()).map(str::to_string);
    Ok((id, name))
}

pub fn id_from_path(path: &str) -> Result<u32, BackendError> {
    id_name_from_path(path).map(|(id, _)| id)
}

/// Joins a device directory and a name without doubling the separator.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Device path for uploading `local_name` into `dst_dir`.
///
/// With slot storage the destination is either a slot (`/12` or `/12:Old`),
/// which keeps its id, or the root, which takes `next_index` and bumps it.
pub fn upload_path(options: FsOptions, dst_dir: &str, local_name: &str, next_index: &mut u32) -> String {
    let stem = Path::new(local_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| local_name.to_string());

    if !options.contains(FsOptions::SLOT_STORAGE) {
        return join(dst_dir, basename(local_name));
    }

    match id_from_path(dst_dir) {
        Ok(id) => {
            let parent = &dst_dir[..dst_dir.len() - basename(dst_dir).len()];
            format!("{parent}{id}{ID_NAME_SEPARATOR}{stem}")
        }
        Err(_) => {
            let path = join(dst_dir, &format!("{}{ID_NAME_SEPARATOR}{stem}", next_index));
            *next_index += 1;
            path
        }
    }
}

/// Local file path for a downloaded item: `<dir>/<name>.<ext>`.
pub fn download_path(dst_dir: &Path, item: &Item, extension: &str) -> PathBuf {
    let name = if item.name.is_empty() {
        item.id.to_string()
    } else {
        sanitize_file_name(&item.name)
    };
    dst_dir.join(format!("{name}.{extension}"))
}

/// Replaces characters that cannot appear in a local file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\0' { '_' } else { c })
        .collect()
}

/// Finds the item addressed by `src_path` in a listing.
pub fn find_item(mut items: impl Iterator<Item = Item>, src_path: &str) -> Result<Item, BackendError> {
    let id = id_from_path(src_path)?;
    items
        .find(|item| item.id == id)
        .ok_or_else(|| BackendError::invalid_path(src_path))
}
