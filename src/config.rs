use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Repo-level config, at the worktree root.
pub const REPO_FILENAME: &str = ".bumper-lanes.toml";
/// Personal config, inside the git dir so it is never committed.
pub const PERSONAL_FILENAME: &str = "bumper-lanes.toml";

pub const DEFAULT_THRESHOLD: u32 = 400;
pub const MIN_THRESHOLD: u32 = 50;
pub const MAX_THRESHOLD: u32 = 2000;

/// Contents of one config file. Every key is optional so layers can be
/// merged; unknown keys are preserved on write.
///
/// ```toml
/// # 0 disables enforcement; 50-2000 when set through `config set`.
/// threshold = 400
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,

    #[serde(flatten)]
    pub other: toml::Table,
}

impl ConfigFile {
    /// Read a config file; a missing file reads as empty.
    pub fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, toml_str).with_context(|| format!("writing {}", path.display()))
    }
}

/// Which file a threshold came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Default,
    Repo,
    Personal,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Source::Default => "default",
            Source::Repo => "repo",
            Source::Personal => "personal",
        })
    }
}

/// Effective configuration: personal overrides repo overrides defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub threshold: u32,
    pub source: Source,
    pub repo_path: Option<PathBuf>,
    pub personal_path: PathBuf,
}

impl Config {
    /// Load both layers. Never creates a file: anything written into the
    /// worktree would itself show up in the next snapshot.
    pub fn load(workdir: Option<&Path>, git_dir: &Path) -> Result<Self> {
        let repo_path = workdir.map(|w| w.join(REPO_FILENAME));
        let personal_path = git_dir.join(PERSONAL_FILENAME);

        let mut threshold = DEFAULT_THRESHOLD;
        let mut source = Source::Default;
        if let Some(path) = &repo_path {
            if let Some(t) = ConfigFile::read(path)?.threshold {
                threshold = t;
                source = Source::Repo;
            }
        }
        if let Some(t) = ConfigFile::read(&personal_path)?.threshold {
            threshold = t;
            source = Source::Personal;
        }

        Ok(Self {
            threshold,
            source,
            repo_path,
            personal_path,
        })
    }

    /// Defaults for when the config files cannot be read. Paths are kept so
    /// a later write reports what is wrong with the file it touches.
    pub fn fallback(workdir: Option<&Path>, git_dir: &Path) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            source: Source::Default,
            repo_path: workdir.map(|w| w.join(REPO_FILENAME)),
            personal_path: git_dir.join(PERSONAL_FILENAME),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.threshold == 0
    }

    /// Persist a threshold into the repo (`personal == false`) or personal
    /// file, keeping any other keys. Returns the path written.
    pub fn set_threshold(&self, value: u32, personal: bool) -> Result<PathBuf> {
        validate_threshold(value)?;
        let path = if personal {
            self.personal_path.clone()
        } else {
            self.repo_path
                .clone()
                .context("repository has no working directory")?
        };
        let mut file = ConfigFile::read(&path)?;
        file.threshold = Some(value);
        file.write(&path)?;
        Ok(path)
    }
}

/// Reject thresholds outside the user-settable range. Never clamps.
pub fn validate_threshold(value: u32) -> Result<()> {
    if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&value) {
        bail!("threshold must be between {MIN_THRESHOLD} and {MAX_THRESHOLD} (got {value})");
    }
    Ok(())
}

/// Parse user input for `config set`.
pub fn parse_threshold(raw: &str) -> Result<u32> {
    let value: u32 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid threshold value: {raw}"))?;
    validate_threshold(value)?;
    Ok(value)
}
