//! Generic filesystem helpers.
//!
//! Every helper takes a full device path (`/<fs-name>/...`), picks the table
//! bound to the backend under that name and refuses operations the table does
//! not declare with `NotSupported`.

use log::{debug, info};
use std::path::{Path, PathBuf};

use super::path::split_fs_path;
use super::{FsOperation, FsOperations, FsOptions, Item, ItemIterator};
use crate::backend::Backend;
use crate::errors::BackendError;
use crate::job_control::JobControl;

fn resolve(backend: &Backend, path: &str) -> Result<(&'static dyn FsOperations, String), BackendError> {
    let (fs_name, inner) = split_fs_path(path)?;
    let ops = backend
        .fs_operations_by_name(fs_name)
        .ok_or_else(|| BackendError::invalid_path(path))?;
    Ok((ops, inner))
}

fn resolve_for(
    backend: &Backend,
    path: &str,
    op: FsOperation,
) -> Result<(&'static dyn FsOperations, String), BackendError> {
    let (ops, inner) = resolve(backend, path)?;
    if !ops.capabilities().contains(op.capability()) {
        debug!("{} does not support {}", ops.name(), op);
        return Err(BackendError::not_supported(op.name()));
    }
    Ok((ops, inner))
}

/// Resolves a source/destination pair that must live on the same filesystem.
fn resolve_pair(
    backend: &Backend,
    src: &str,
    dst: &str,
    op: FsOperation,
) -> Result<(&'static dyn FsOperations, String, String), BackendError> {
    let (ops, src_inner) = resolve_for(backend, src, op)?;
    let (dst_ops, dst_inner) = resolve(backend, dst)?;
    if dst_ops.id() != ops.id() {
        return Err(BackendError::invalid_path(dst));
    }
    Ok((ops, src_inner, dst_inner))
}

fn is_root(path: &str) -> bool {
    path.trim_end_matches('/').is_empty()
}

/// Lists a directory. The device root lists the filesystems as directories.
pub fn list<'a>(backend: &'a Backend, path: &str) -> Result<ItemIterator<'a>, BackendError> {
    if is_root(path) {
        let filesystems = backend.filesystems();
        return Ok(ItemIterator::new(
            filesystems.iter().map(|ops| Item::directory(ops.id(), ops.name())),
        ));
    }
    let (ops, dir) = resolve_for(backend, path, FsOperation::List)?;
    ops.read_dir(backend, &dir)
}

/// Lists a directory in the order the filesystem asks for.
pub fn list_sorted(backend: &Backend, path: &str) -> Result<Vec<Item>, BackendError> {
    let options = if is_root(path) {
        FsOptions::SORT_BY_ID
    } else {
        resolve(backend, path)?.0.options()
    };
    let mut items: Vec<Item> = list(backend, path)?.collect();
    if options.contains(FsOptions::SORT_BY_ID) {
        items.sort_by_key(|item| item.id);
    } else if options.contains(FsOptions::SORT_BY_NAME) {
        items.sort_by(|a, b| a.name.cmp(&b.name));
    }
    Ok(items)
}

/// Downloads one item. Progress is reported through `job`.
pub fn download(backend: &Backend, path: &str, job: &JobControl) -> Result<Vec<u8>, BackendError> {
    let (ops, inner) = resolve_for(backend, path, FsOperation::Download)?;
    job.check_active()?;
    let single_op = ops.options().contains(FsOptions::SINGLE_OP);
    if single_op {
        job.begin(1);
    }

    debug!("Downloading {} (job {})", path, job.id());
    let data = ops.download(backend, &inner, job)?;
    // A job cancelled during the transfer never reports success
    job.check_active()?;
    if single_op {
        job.advance(1.0);
    }
    info!("Downloaded {} ({} bytes)", path, data.len());
    Ok(data)
}

/// Uploads `data` to the item at `path`.
pub fn upload(backend: &Backend, path: &str, data: &[u8], job: &JobControl) -> Result<(), BackendError> {
    let (ops, inner) = resolve_for(backend, path, FsOperation::Upload)?;
    job.check_active()?;
    let single_op = ops.options().contains(FsOptions::SINGLE_OP);
    if single_op {
        job.begin(1);
    }

    debug!("Uploading {} bytes to {} (job {})", data.len(), path, job.id());
    ops.upload(backend, &inner, data, job)?;
    job.check_active()?;
    if single_op {
        job.advance(1.0);
    }
    info!("Uploaded {}", path);
    Ok(())
}

/// Renames an item.
///
/// On filesystems that can move items, rename is a move and `dst` is a full
/// path. Otherwise `dst` is handed over as is, either a bare name or a path.
pub fn rename(backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
    let (ops, _) = resolve(backend, src)?;
    if ops.capabilities().contains(FsOperation::Move.capability()) {
        return move_item(backend, src, dst);
    }

    let (ops, src_inner) = resolve_for(backend, src, FsOperation::Rename)?;
    let dst_inner = match resolve(backend, dst) {
        Ok((dst_ops, inner)) if dst_ops.id() == ops.id() => inner,
        Ok(_) => return Err(BackendError::invalid_path(dst)),
        Err(_) => dst.to_string(),
    };
    debug!("Renaming {} to {}", src, dst);
    ops.rename(backend, &src_inner, &dst_inner)
}

pub fn move_item(backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
    let (ops, src_inner, dst_inner) = resolve_pair(backend, src, dst, FsOperation::Move)?;
    debug!("Moving {} to {}", src, dst);
    ops.move_item(backend, &src_inner, &dst_inner)
}

pub fn copy(backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
    let (ops, src_inner, dst_inner) = resolve_pair(backend, src, dst, FsOperation::Copy)?;
    debug!("Copying {} to {}", src, dst);
    ops.copy(backend, &src_inner, &dst_inner)
}

pub fn swap(backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
    let (ops, src_inner, dst_inner) = resolve_pair(backend, src, dst, FsOperation::Swap)?;
    debug!("Swapping {} and {}", src, dst);
    ops.swap(backend, &src_inner, &dst_inner)
}

pub fn delete(backend: &Backend, path: &str) -> Result<(), BackendError> {
    let (ops, inner) = resolve_for(backend, path, FsOperation::Delete)?;
    debug!("Deleting {}", path);
    ops.delete(backend, &inner)
}

pub fn mkdir(backend: &Backend, path: &str) -> Result<(), BackendError> {
    let (ops, inner) = resolve_for(backend, path, FsOperation::Mkdir)?;
    debug!("Creating directory {}", path);
    ops.mkdir(backend, &inner)
}

pub fn clear(backend: &Backend, path: &str) -> Result<(), BackendError> {
    let (ops, inner) = resolve_for(backend, path, FsOperation::Clear)?;
    debug!("Clearing {}", path);
    ops.clear(backend, &inner)
}

/// Device path for uploading the local file `local_name` into `dst_dir`.
pub fn upload_path(
    backend: &Backend,
    dst_dir: &str,
    local_name: &str,
    next_index: &mut u32,
) -> Result<String, BackendError> {
    let (ops, inner) = resolve(backend, dst_dir)?;
    let path = ops.upload_path(backend, &inner, local_name, next_index);
    Ok(format!("/{}{}", ops.name(), path))
}

/// Local path a downloaded item should be saved to.
///
/// `items` is a listing of the directory containing `src_path`.
pub fn download_path(
    backend: &Backend,
    items: ItemIterator<'_>,
    dst_dir: &Path,
    src_path: &str,
) -> Result<PathBuf, BackendError> {
    let (ops, inner) = resolve(backend, src_path)?;
    ops.download_path(backend, items, dst_dir, &inner)
}

/// Canonical device path of an item listed in `dir` of filesystem `ops`.
pub fn item_path(ops: &dyn FsOperations, dir: &str, item: &Item) -> String {
    let dir = dir.trim_end_matches('/');
    if ops.options().contains(FsOptions::SLOT_STORAGE) {
        format!("/{}{}/{}", ops.name(), dir, item.id)
    } else {
        format!("/{}{}/{}", ops.name(), dir, item.name)
    }
}

/// One line summary: `<device name>; filesystems=<fs>,<fs>`.
pub fn info(backend: &Backend) -> String {
    let names: Vec<&str> = backend.filesystems().iter().map(|ops| ops.name()).collect();
    format!("{}; filesystems={}", backend.name(), names.join(","))
}
