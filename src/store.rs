use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::config::ListOrder;
use crate::crypto::{self, KdfParams};
use crate::error::ErrorKind;

/// Suffix every encrypted note carries on disk.
pub const NOTE_SUFFIX: &str = ".md.enc";

/// A note as seen in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRef {
    pub storage_path: PathBuf,
    pub display_name: String,
    pub modified_at: DateTime<Local>,
}

/// One row of the file list. The "new note" action is a row of its own
/// rather than a fake note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry<'a> {
    NewNoteAction,
    Note(&'a NoteRef),
}

/// Encrypted notes living as `<name>.md.enc` files in one directory.
#[derive(Debug, Clone)]
pub struct NoteStore {
    dir: PathBuf,
    kdf: KdfParams,
    order: ListOrder,
}

impl NoteStore {
    pub fn new(dir: impl Into<PathBuf>, kdf: KdfParams, order: ListOrder) -> Self {
        Self {
            dir: dir.into(),
            kdf,
            order,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn storage_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, NOTE_SUFFIX))
    }

    pub fn list(&self) -> Result<Vec<NoteRef>, ErrorKind> {
        let entries = fs::read_dir(&self.dir).map_err(|e| ErrorKind::from_io(&self.dir, e))?;

        let mut notes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ErrorKind::from_io(&self.dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(display_name) = file_name.strip_suffix(NOTE_SUFFIX) else {
                continue;
            };
            if display_name.is_empty() {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                // Removed between read_dir and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ErrorKind::from_io(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified_at = metadata
                .modified()
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());

            notes.push(NoteRef {
                storage_path: path,
                display_name: display_name.to_string(),
                modified_at,
            });
        }

        match self.order {
            ListOrder::Name => notes.sort_by(|a, b| {
                a.display_name
                    .to_lowercase()
                    .cmp(&b.display_name.to_lowercase())
                    .then_with(|| a.display_name.cmp(&b.display_name))
            }),
            ListOrder::Modified => notes.sort_by(|a, b| b.modified_at.cmp(&a.modified_at)),
            ListOrder::Filesystem => {}
        }

        Ok(notes)
    }

    pub fn exists(&self, name: &str) -> Result<bool, ErrorKind> {
        let path = self.storage_path(name);
        match fs::symlink_metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ErrorKind::from_io(&path, e)),
        }
    }

    /// Decrypts one note. The bytes are exactly what was sealed; decoding
    /// them for display is up to the caller.
    pub fn open(&self, path: &Path, password: &str) -> Result<Zeroizing<Vec<u8>>, ErrorKind> {
        let blob = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                ErrorKind::Format(format!("{}: not a text blob", path.display()))
            }
            _ => ErrorKind::from_io(path, e),
        })?;
        Ok(crypto::decrypt(&blob, password)?)
    }

    /// Encrypts the scratch file at `plaintext_path` into `storage_path`.
    /// The target is replaced by rename only once the new blob is fully
    /// written, so a failure leaves any previous note untouched.
    pub fn seal(
        &self,
        plaintext_path: &Path,
        storage_path: &Path,
        password: &str,
    ) -> Result<(), ErrorKind> {
        let plaintext = Zeroizing::new(
            fs::read(plaintext_path).map_err(|e| ErrorKind::from_io(plaintext_path, e))?,
        );
        let blob = crypto::encrypt(&plaintext, password, &self.kdf)?;
        write_atomic(storage_path, blob.as_bytes())
    }
}

/// Writes `contents` next to `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ErrorKind> {
    let mut file = staged_file(path, contents)?;
    file.as_file_mut()
        .sync_all()
        .map_err(|e| ErrorKind::from_io(path, e))?;
    file.persist(path)
        .map_err(|e| ErrorKind::from_io(path, e.error))?;
    Ok(())
}

/// Like [`write_atomic`] but fails instead of replacing an existing file.
pub(crate) fn write_new(path: &Path, contents: &[u8]) -> Result<(), ErrorKind> {
    let file = staged_file(path, contents)?;
    file.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            ErrorKind::Io(format!("{} already exists", path.display()))
        } else {
            ErrorKind::from_io(path, e.error)
        }
    })?;
    Ok(())
}

fn staged_file(path: &Path, contents: &[u8]) -> Result<NamedTempFile, ErrorKind> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(parent).map_err(|e| ErrorKind::from_io(parent, e))?;
    file.write_all(contents)
        .map_err(|e| ErrorKind::from_io(file.path(), e))?;
    Ok(file)
}

/// Rejects names that would escape the note directory or hide the file.
pub fn validate_name(name: &str) -> Result<(), ErrorKind> {
    if name.is_empty() {
        return Err(ErrorKind::InvalidName("name is empty".to_string()));
    }
    if name.starts_with('.') {
        return Err(ErrorKind::InvalidName(format!(
            "\"{}\" may not start with a dot",
            name
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(ErrorKind::InvalidName(format!(
            "\"{}\" contains a path separator or control character",
            name
        )));
    }
    Ok(())
}
