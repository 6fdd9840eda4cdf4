//! The subfiling config file.
//!
//! Written by world rank 0 next to every partitioned step, read by the
//! fuse utility. Plain text: `key=value` lines, then one subfile name per
//! line.
//!
//! ```text
//! stripe_size=1048576
//! subfile_count=2
//! step=40
//! subfile_dir=/scratch/run
//! main_file=/scratch/run/particles_40.bin
//! particles_40.bin.subfile_123_1_of_2
//! particles_40.bin.subfile_123_2_of_2
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::error::FuseError;
use crate::naming::write_atomically;

/// Contents of one subfiling config file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubfilingConfig {
    /// Payload alignment the subfiles were written with (0 = none).
    pub stripe_size: u64,
    /// Step the subfiles belong to.
    pub step: u64,
    /// Directory holding the subfiles.
    pub subfile_dir: PathBuf,
    /// The main (stub) artifact.
    pub main_file: PathBuf,
    /// Subfile names, in index order.
    pub subfiles: Vec<String>,
}

impl SubfilingConfig {
    /// Render the file contents.
    pub fn render(&self) -> String {
        let mut out = format!(
            "stripe_size={}\nsubfile_count={}\nstep={}\nsubfile_dir={}\nmain_file={}\n",
            self.stripe_size,
            self.subfiles.len(),
            self.step,
            self.subfile_dir.display(),
            self.main_file.display(),
        );
        for name in &self.subfiles {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Write atomically to `path`.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let text = self.render();
        write_atomically(path, |w| w.write_all(text.as_bytes()))
    }

    /// Read and parse `path`.
    pub fn read_from(path: &Path) -> Result<Self, FuseError> {
        let text = std::fs::read_to_string(path).map_err(|source| FuseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|detail| FuseError::Config {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Parse file contents.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut stripe_size = None;
        let mut subfile_count = None;
        let mut step = None;
        let mut subfile_dir = None;
        let mut main_file = None;
        let mut subfiles = Vec::new();

        let number = |key: &str, value: &str| {
            value
                .parse::<u64>()
                .map_err(|e| format!("{key}: invalid number '{value}': {e}"))
        };

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.split_once('=') {
                Some(("stripe_size", v)) => stripe_size = Some(number("stripe_size", v)?),
                Some(("subfile_count", v)) => subfile_count = Some(number("subfile_count", v)?),
                Some(("step", v)) => step = Some(number("step", v)?),
                Some(("subfile_dir", v)) => subfile_dir = Some(PathBuf::from(v)),
                Some(("main_file", v)) => main_file = Some(PathBuf::from(v)),
                _ => subfiles.push(line.to_string()),
            }
        }

        let missing = |key: &str| format!("missing key '{key}'");
        let subfile_count = subfile_count.ok_or_else(|| missing("subfile_count"))?;
        if subfile_count != subfiles.len() as u64 {
            return Err(format!(
                "subfile_count={subfile_count} but {} subfiles listed",
                subfiles.len()
            ));
        }
        Ok(Self {
            stripe_size: stripe_size.ok_or_else(|| missing("stripe_size"))?,
            step: step.ok_or_else(|| missing("step"))?,
            subfile_dir: subfile_dir.ok_or_else(|| missing("subfile_dir"))?,
            main_file: main_file.ok_or_else(|| missing("main_file"))?,
            subfiles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SubfilingConfig {
        SubfilingConfig {
            stripe_size: 4096,
            step: 40,
            subfile_dir: PathBuf::from("/scratch/run"),
            main_file: PathBuf::from("/scratch/run/particles_40.bin"),
            subfiles: vec![
                "particles_40.bin.subfile_123_1_of_2".into(),
                "particles_40.bin.subfile_123_2_of_2".into(),
            ],
        }
    }

    #[test]
    fn render_then_parse() {
        let config = sample();
        assert_eq!(SubfilingConfig::parse(&config.render()).unwrap(), config);
    }

    #[test]
    fn rendered_layout() {
        let text = sample().render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "stripe_size=4096");
        assert_eq!(lines[1], "subfile_count=2");
        assert_eq!(lines[5], "particles_40.bin.subfile_123_1_of_2");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let text = sample().render().replace("subfile_count=2", "subfile_count=3");
        let err = SubfilingConfig::parse(&text).unwrap_err();
        assert!(err.contains("3"), "{err}");
    }

    #[test]
    fn missing_key_is_rejected() {
        let text = sample().render().replace("step=40\n", "");
        assert_eq!(SubfilingConfig::parse(&text).unwrap_err(), "missing key 'step'");
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.config");
        sample().write_to(&path).unwrap();
        assert_eq!(SubfilingConfig::read_from(&path).unwrap(), sample());
        assert!(matches!(
            SubfilingConfig::read_from(&dir.path().join("missing")),
            Err(FuseError::Io { .. })
        ));
    }
}
