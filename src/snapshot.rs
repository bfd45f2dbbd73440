//! On-disk records snapshot.
//!
//! The snapshot is one pretty-printed JSON object mapping
//! `domain -> name -> record`. It is shared by independent processes, so:
//!
//! - readers take a shared `flock` on the file while decoding it;
//! - writers never touch the canonical file in place. They serialize into a
//!   fresh `.tmp` sibling (same directory, same filesystem) under an exclusive
//!   `flock`, fsync it, release the lock and atomically rename it over the
//!   canonical path. A failure before the rename removes the temporary file
//!   and leaves the previous snapshot untouched.

use std::collections::BTreeMap;
use std::fs::{self, File, Permissions};
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, trace};

use crate::error::DnsError;
use crate::record::Record;

/// Records of one domain, keyed by name.
pub type DomainRecords = BTreeMap<String, Record>;

/// Full record index, keyed by domain.
pub type Snapshot = BTreeMap<String, DomainRecords>;

/// Read the snapshot at `path`.
///
/// Returns `Ok(None)` when the file does not exist yet.
pub fn read(path: &Path) -> Result<Option<Snapshot>, DnsError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DnsError::persistence(path, e)),
    };

    let locked = Flock::lock(file, FlockArg::LockShared)
        .map_err(|(_, errno)| DnsError::persistence(path, errno.into()))?;

    let records: Snapshot =
        serde_json::from_reader(BufReader::new(&*locked)).map_err(|source| {
            DnsError::Snapshot {
                path: path.to_path_buf(),
                source,
            }
        })?;

    trace!(path = %path.display(), domains = records.len(), "read records snapshot");
    Ok(Some(records))
}

/// Atomically replace the snapshot at `path` with `records`.
pub fn write(path: &Path, records: &Snapshot) -> Result<(), DnsError> {
    write_with(path, records, |_| Ok(()))
}

/// Write protocol with a hook invoked after the temporary file is complete
/// and unlocked, right before the rename.
fn write_with<F>(path: &Path, records: &Snapshot, before_rename: F) -> Result<(), DnsError>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let dir = parent_dir(path);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            DnsError::persistence(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "snapshot path has no file name"),
            )
        })?;

    // Dropping `tmp` on any early return deletes the temporary file.
    let tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| DnsError::persistence(path, e))?;

    write_locked(tmp.as_file(), records).map_err(|e| DnsError::persistence(path, e))?;
    before_rename(tmp.path()).map_err(|e| DnsError::persistence(path, e))?;

    tmp.persist(path)
        .map_err(|e| DnsError::persistence(path, e.error))?;

    if let Err(e) = sync_dir(dir) {
        debug!(dir = %dir.display(), error = %e, "failed to fsync snapshot directory");
    }

    trace!(path = %path.display(), domains = records.len(), "wrote records snapshot");
    Ok(())
}

fn write_locked(file: &File, records: &Snapshot) -> io::Result<()> {
    file.set_permissions(Permissions::from_mode(0o644))?;

    let locked = Flock::lock(file.try_clone()?, FlockArg::LockExclusive)
        .map_err(|(_, errno)| io::Error::from(errno))?;

    {
        let mut writer = BufWriter::new(&*locked);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    locked.sync_all()?;

    let _file = locked
        .unlock()
        .map_err(|(_, errno)| io::Error::from(errno))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Ensure the directory holding `path` exists.
pub fn ensure_parent(path: &Path) -> Result<(), DnsError> {
    fs::create_dir_all(parent_dir(path)).map_err(|e| DnsError::persistence(path, e))
}
