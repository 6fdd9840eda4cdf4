//! Deterministic artifact naming.
//!
//! Every name derives from `(dir, base, step)`, so concurrent writes and
//! fusers for different steps never touch the same path.

use std::io;
use std::path::{Path, PathBuf};

/// Name of the artifact written for one step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactName {
    dir: PathBuf,
    base: String,
    step: u64,
    ext: &'static str,
}

impl ArtifactName {
    /// `<dir>/<base>_<step>.<ext>`.
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>, step: u64, ext: &'static str) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            step,
            ext,
        }
    }

    /// The step this artifact belongs to.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<base>_<step>.<ext>`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.base, self.step, self.ext)
    }

    /// Full path of the main artifact.
    pub fn path(&self) -> PathBuf {
        self.dir.join(self.file_name())
    }

    /// File name of subfile `index` of `count`, keyed by the main
    /// artifact's inode. The index is zero-padded to the width of `count`.
    pub fn subfile_name(&self, inode: u64, index: usize, count: usize) -> String {
        let width = count.to_string().len();
        format!(
            "{}.subfile_{inode}_{index:0width$}_of_{count}",
            self.file_name()
        )
    }

    /// Subfiling config file for this artifact inside `config_dir`.
    pub fn config_path(&self, config_dir: &Path, inode: u64) -> PathBuf {
        config_dir.join(format!("{}.subfile_{inode}.config", self.file_name()))
    }

    /// Node-level fused artifact for node `index` of `count`.
    pub fn node_artifact_path(&self, index: usize, count: usize) -> PathBuf {
        node_artifact_path(&self.path(), index, count)
    }
}

/// `<main>.node_<index>_of_<count>` next to `main`.
pub fn node_artifact_path(main: &Path, index: usize, count: usize) -> PathBuf {
    let mut name = main.as_os_str().to_os_string();
    name.push(format!(".node_{index}_of_{count}"));
    PathBuf::from(name)
}

/// On-disk identity of `path`: the inode on unix, 0 elsewhere.
///
/// Fails if the file does not exist.
pub fn file_inode(path: &Path) -> io::Result<u64> {
    let meta = std::fs::metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(meta.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        Ok(0)
    }
}

/// Write `path` by filling a temporary sibling and renaming it into place.
///
/// Readers never observe a partially written file; an existing file at
/// `path` is replaced.
pub fn write_atomically(
    path: &Path,
    fill: impl FnOnce(&mut dyn io::Write) -> io::Result<()>,
) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(format!(".tmp{}", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    let result = std::fs::File::create(&tmp).and_then(|file| {
        let mut w = io::BufWriter::new(file);
        fill(&mut w)?;
        let file = w.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()
    });
    match result.and_then(|()| std::fs::rename(&tmp, path)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}
