use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};

use crate::error::ErrorKind;
use crate::logger::log;
use crate::store::{NoteStore, NOTE_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Create,
    Edit,
}

/// What an edit is about to write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    /// A note that does not exist yet, by display name.
    NewNote(String),
    /// An existing note, by storage path.
    Existing(PathBuf),
}

impl EditTarget {
    pub fn mode(&self) -> EditMode {
        match self {
            EditTarget::NewNote(_) => EditMode::Create,
            EditTarget::Existing(_) => EditMode::Edit,
        }
    }
}

/// Resolves `target` against the store and opens a scratch session for it.
/// Existing notes are decrypted into the scratch file first.
pub fn prepare(
    store: &NoteStore,
    target: &EditTarget,
    password: &str,
    scratch_dir: &Path,
) -> Result<TempEditSession, ErrorKind> {
    match target {
        EditTarget::NewNote(name) => TempEditSession::begin(
            EditMode::Create,
            None,
            store.storage_path(name),
            name,
            scratch_dir,
        ),
        EditTarget::Existing(path) => {
            let content = store.open(path, password)?;
            let prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.strip_suffix(NOTE_SUFFIX).unwrap_or(n))
                .unwrap_or("note");
            TempEditSession::begin(
                EditMode::Edit,
                Some(content.as_slice()),
                path.clone(),
                prefix,
                scratch_dir,
            )
        }
    }
}

/// One in-flight edit: a plaintext scratch file plus the note it will be
/// sealed into.
///
/// `commit` and `discard` take the session by value, so each session ends
/// exactly once. Dropping an unfinished session still removes the scratch
/// file through [`TempPath`].
#[derive(Debug)]
pub struct TempEditSession {
    scratch: TempPath,
    target: PathBuf,
    mode: EditMode,
}

impl TempEditSession {
    /// Creates a uniquely named scratch file in `scratch_dir`, pre-filled
    /// with `source` when editing an existing note.
    pub fn begin(
        mode: EditMode,
        source: Option<&[u8]>,
        target: PathBuf,
        name_prefix: &str,
        scratch_dir: &Path,
    ) -> Result<Self, ErrorKind> {
        ensure_private_dir(scratch_dir)?;

        let prefix = format!("{}-", sanitize_prefix(name_prefix));
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".md")
            .tempfile_in(scratch_dir)
            .map_err(|e| ErrorKind::from_io(scratch_dir, e))
            .map_err(not_found_is_io)?;
        check_same_owner(scratch_dir, file.as_file())?;

        if let Some(content) = source {
            file.write_all(content)
                .and_then(|_| file.flush())
                .map_err(|e| ErrorKind::Io(format!("{}: {}", file.path().display(), e)))?;
        }

        // Close our handle; the editor gets the path alone.
        let scratch = file.into_temp_path();
        log(&format!(
            "edit: began {:?} session for {}",
            mode,
            target.display()
        ));
        Ok(Self {
            scratch,
            target,
            mode,
        })
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    /// Seals the scratch contents into the target note, then removes the
    /// scratch file whether or not sealing worked. A seal failure wins over
    /// a cleanup failure in the returned error.
    pub fn commit(self, store: &NoteStore, password: &str) -> Result<(), ErrorKind> {
        let sealed = store.seal(&self.scratch, &self.target, password);
        let removed = remove_scratch(self.scratch);
        log(&format!(
            "edit: committed {} (seal ok: {}, cleanup ok: {})",
            self.target.display(),
            sealed.is_ok(),
            removed.is_ok()
        ));
        sealed.map_err(not_found_is_io)?;
        removed
    }

    /// Removes the scratch file without touching the store.
    pub fn discard(self) -> Result<(), ErrorKind> {
        let removed = remove_scratch(self.scratch);
        log(&format!(
            "edit: discarded edit of {} (cleanup ok: {})",
            self.target.display(),
            removed.is_ok()
        ));
        removed
    }
}

fn remove_scratch(scratch: TempPath) -> Result<(), ErrorKind> {
    let path = scratch.to_path_buf();
    match scratch.close() {
        Ok(()) => Ok(()),
        // Already gone, which is all we wanted.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ErrorKind::Io(format!(
            "could not remove scratch file {}: {}",
            path.display(),
            e
        ))),
    }
}

// Missing scratch or note directories are environment failures, not a
// note that vanished from the listing.
fn not_found_is_io(err: ErrorKind) -> ErrorKind {
    match err {
        ErrorKind::NotFound(msg) => ErrorKind::Io(format!("{}: no such file or directory", msg)),
        other => other,
    }
}

/// Creates the scratch directory at 0700, or tightens an existing one to
/// 0700. Symlinks and non-directories are refused.
fn ensure_private_dir(dir: &Path) -> Result<(), ErrorKind> {
    let io_err = |e: std::io::Error| ErrorKind::Io(format!("{}: {}", dir.display(), e));
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() || !meta.is_dir() => {
            return Err(ErrorKind::Io(format!(
                "{}: scratch path is not a plain directory",
                dir.display()
            )));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                builder.mode(0o700);
            }
            builder.create(dir).map_err(io_err)?;
        }
        Err(e) => return Err(io_err(e)),
    }

    #[cfg(unix)]
    {
        let mode = fs::metadata(dir).map_err(io_err)?.mode() & 0o777;
        if mode != 0o700 {
            log(&format!(
                "edit: tightening {} from {:o} to 700",
                dir.display(),
                mode
            ));
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
                ErrorKind::Io(format!("{}: scratch directory is not private: {}", dir.display(), e))
            })?;
        }
    }
    Ok(())
}

// A directory someone else owns can be read by them whatever its mode.
#[cfg(unix)]
fn check_same_owner(dir: &Path, scratch: &fs::File) -> Result<(), ErrorKind> {
    let io_err = |e: std::io::Error| ErrorKind::Io(format!("{}: {}", dir.display(), e));
    let dir_uid = fs::metadata(dir).map_err(io_err)?.uid();
    let our_uid = scratch.metadata().map_err(io_err)?.uid();
    if dir_uid != our_uid {
        return Err(ErrorKind::Io(format!(
            "{}: scratch directory belongs to another user",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_same_owner(_dir: &Path, _scratch: &fs::File) -> Result<(), ErrorKind> {
    Ok(())
}

fn sanitize_prefix(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(32)
        .collect();
    if cleaned.is_empty() {
        "note".to_string()
    } else {
        cleaned
    }
}

/// Default scratch area: the per-user runtime directory when there is one,
/// then the user's cache directory, then the system temp directory.
pub fn default_scratch_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("enotes")
}

/// The external editor: a program plus any leading flags. The scratch path
/// is appended as the only positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    program: String,
    args: Vec<String>,
}

impl EditorCommand {
    pub fn parse(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .unwrap_or_else(|| crate::config::DEFAULT_EDITOR.to_string());
        Self {
            program,
            args: parts.collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the editor on `path` with inherited stdio and waits for it.
    /// A spawn failure or a non-zero exit both come back as
    /// `EditorLaunch`.
    pub async fn run(&self, path: &Path) -> Result<(), ErrorKind> {
        log(&format!("editor: launching {}", self.program));
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .status()
            .await
            .map_err(|e| ErrorKind::EditorLaunch(format!("could not start {}: {}", self.program, e)))?;

        if status.success() {
            Ok(())
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            log(&format!("editor: {} exited with {}", self.program, code));
            Err(ErrorKind::EditorLaunch(format!(
                "{} exited with status {}",
                self.program, code
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListOrder;
    use crate::crypto::test_params;

    fn store_in(dir: &Path) -> NoteStore {
        NoteStore::new(dir, test_params(), ListOrder::Name)
    }

    #[test]
    fn begin_writes_source_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch_dir = tmp.path().join("scratch");
        let edit = TempEditSession::begin(
            EditMode::Edit,
            Some(b"# hello\n"),
            tmp.path().join("hello.md.enc"),
            "hello",
            &scratch_dir,
        )
        .unwrap();
        assert!(edit.scratch_path().starts_with(&scratch_dir));
        assert_eq!(fs::read(edit.scratch_path()).unwrap(), b"# hello\n");
        let file_name = edit.scratch_path().file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("hello-"));
        assert!(file_name.ends_with(".md"));
        edit.discard().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn scratch_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let scratch_dir = tmp.path().join("private");
        let edit = TempEditSession::begin(
            EditMode::Create,
            None,
            tmp.path().join("x.md.enc"),
            "x",
            &scratch_dir,
        )
        .unwrap();
        let mode = fs::metadata(&scratch_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        edit.discard().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn existing_open_scratch_dir_is_tightened() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch_dir = tmp.path().join("shared");
        fs::create_dir(&scratch_dir).unwrap();
        fs::set_permissions(&scratch_dir, fs::Permissions::from_mode(0o755)).unwrap();

        let edit = TempEditSession::begin(
            EditMode::Create,
            None,
            tmp.path().join("x.md.enc"),
            "x",
            &scratch_dir,
        )
        .unwrap();
        let mode = fs::metadata(&scratch_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        edit.discard().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_scratch_dir_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let result = TempEditSession::begin(
            EditMode::Create,
            None,
            tmp.path().join("x.md.enc"),
            "x",
            &link,
        );
        assert!(matches!(result, Err(ErrorKind::Io(_))));
        assert_eq!(fs::read_dir(&real).unwrap().count(), 0);
    }

    #[test]
    fn scratch_file_in_a_regular_file_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let not_dir = tmp.path().join("plain");
        fs::write(&not_dir, "x").unwrap();
        let result = TempEditSession::begin(
            EditMode::Create,
            None,
            tmp.path().join("x.md.enc"),
            "x",
            &not_dir,
        );
        assert!(matches!(result, Err(ErrorKind::Io(_))));
    }

    #[test]
    fn commit_seals_and_removes_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let target = store.storage_path("todo");
        let edit = TempEditSession::begin(
            EditMode::Create,
            None,
            target.clone(),
            "todo",
            &tmp.path().join("scratch"),
        )
        .unwrap();
        fs::write(edit.scratch_path(), "- write tests").unwrap();
        let scratch = edit.scratch_path().to_path_buf();

        edit.commit(&store, "abc").unwrap();
        assert!(!scratch.exists());
        assert_eq!(store.open(&target, "abc").unwrap().as_slice(), b"- write tests");
    }

    #[test]
    fn commit_removes_scratch_even_when_seal_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let target = tmp.path().join("missing-dir").join("todo.md.enc");
        let edit = TempEditSession::begin(
            EditMode::Create,
            None,
            target.clone(),
            "todo",
            &tmp.path().join("scratch"),
        )
        .unwrap();
        fs::write(edit.scratch_path(), "plaintext that must not linger").unwrap();
        let scratch = edit.scratch_path().to_path_buf();

        let err = edit.commit(&store, "abc").unwrap_err();
        assert!(matches!(err, ErrorKind::Io(_)));
        assert!(!scratch.exists());
        assert!(!target.exists());
    }

    #[test]
    fn discard_removes_scratch_and_leaves_note() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("n.md.enc");
        fs::write(&target, "untouched").unwrap();
        let edit = TempEditSession::begin(
            EditMode::Edit,
            Some(b"draft"),
            target.clone(),
            "n",
            &tmp.path().join("scratch"),
        )
        .unwrap();
        let scratch = edit.scratch_path().to_path_buf();

        edit.discard().unwrap();
        assert!(!scratch.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "untouched");
    }

    #[test]
    fn discard_tolerates_scratch_removed_by_the_editor() {
        let tmp = tempfile::tempdir().unwrap();
        let edit = TempEditSession::begin(
            EditMode::Create,
            None,
            tmp.path().join("n.md.enc"),
            "n",
            &tmp.path().join("scratch"),
        )
        .unwrap();
        fs::remove_file(edit.scratch_path()).unwrap();
        assert_eq!(edit.discard(), Ok(()));
    }

    #[test]
    fn dropping_an_unfinished_session_removes_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let edit = TempEditSession::begin(
            EditMode::Create,
            None,
            tmp.path().join("n.md.enc"),
            "n",
            &tmp.path().join("scratch"),
        )
        .unwrap();
        let scratch = edit.scratch_path().to_path_buf();
        drop(edit);
        assert!(!scratch.exists());
    }

    #[test]
    fn prepare_decrypts_existing_note_into_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let source = tmp.path().join("seed.txt");
        fs::write(&source, "# plan\n").unwrap();
        let path = store.storage_path("plan");
        store.seal(&source, &path, "abc").unwrap();

        let target = EditTarget::Existing(path.clone());
        assert_eq!(target.mode(), EditMode::Edit);
        let edit = prepare(&store, &target, "abc", &tmp.path().join("scratch")).unwrap();
        assert_eq!(edit.mode(), EditMode::Edit);
        assert_eq!(edit.target(), path.as_path());
        assert_eq!(fs::read_to_string(edit.scratch_path()).unwrap(), "# plan\n");
        let name = edit.scratch_path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("plan-"));
        edit.discard().unwrap();

        assert_eq!(
            prepare(&store, &target, "wrong", &tmp.path().join("scratch")).unwrap_err(),
            ErrorKind::IncorrectPassword
        );
    }

    #[test]
    fn prepare_new_note_targets_storage_path() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let target = EditTarget::NewNote("ideas".to_string());
        let edit = prepare(&store, &target, "abc", &tmp.path().join("scratch")).unwrap();
        assert_eq!(edit.mode(), EditMode::Create);
        assert_eq!(edit.target(), store.storage_path("ideas").as_path());
        assert_eq!(fs::read(edit.scratch_path()).unwrap(), b"");
        edit.discard().unwrap();
    }

    #[test]
    fn prefix_is_sanitized() {
        assert_eq!(sanitize_prefix("Oct 17 10:00:00"), "Oct_17_10_00_00");
        assert_eq!(sanitize_prefix(""), "note");
        assert_eq!(sanitize_prefix("a/b"), "a_b");
    }

    #[test]
    fn editor_command_splits_program_and_flags() {
        let editor = EditorCommand::parse("code --wait");
        assert_eq!(editor.program(), "code");
        assert_eq!(editor.args, vec!["--wait".to_string()]);
        assert_eq!(EditorCommand::parse("   ").program(), "vim");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn editor_exit_status_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("scratch.md");
        fs::write(&path, "").unwrap();

        assert_eq!(EditorCommand::parse("true").run(&path).await, Ok(()));
        assert!(matches!(
            EditorCommand::parse("false").run(&path).await,
            Err(ErrorKind::EditorLaunch(_))
        ));
        assert!(matches!(
            EditorCommand::parse("enotes-no-such-editor-binary").run(&path).await,
            Err(ErrorKind::EditorLaunch(_))
        ));
    }
}
