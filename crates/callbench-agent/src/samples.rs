//! Sample pool and caller/callee pairing.
//!
//! Sample files carry their duration in the name (`sample<N>_...`). Two
//! files may be paired when their durations differ by at most
//! [`MAX_DURATION_GAP`].

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rand::RngExt as _;
use regex::Regex;
use serde::Deserialize;

use callbench_common::{CallbenchError, Result};

pub const MAX_DURATION_GAP: u32 = 3;

/// Samples up to this many seconds count as short.
pub const SHORT_MAX_SECS: u32 = 7;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sample(\d+)_").expect("static regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleLength {
    Short,
    #[default]
    Long,
    Any,
}

impl SampleLength {
    fn admits(self, secs: u32) -> bool {
        match self {
            SampleLength::Short => secs <= SHORT_MAX_SECS,
            SampleLength::Long => secs > SHORT_MAX_SECS,
            SampleLength::Any => true,
        }
    }

    /// Silence reference long enough to cover a caller sample of this length.
    fn silence_secs(self) -> u32 {
        match self {
            SampleLength::Short => 8,
            SampleLength::Long | SampleLength::Any => 18,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingPreference {
    pub length: SampleLength,
    /// Callee answers with silence instead of a second sample.
    pub one_way: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCouple {
    pub caller: PathBuf,
    pub callee: PathBuf,
}

/// Duration tag embedded in a sample file name.
pub fn duration_tag(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    DURATION_RE.captures(name)?[1].parse().ok()
}

#[derive(Debug, Clone)]
struct Sample {
    path: PathBuf,
    secs: u32,
}

#[derive(Debug, Clone)]
pub struct SamplePool {
    samples: Vec<Sample>,
    silence_dir: PathBuf,
    max_attempts: Option<usize>,
}

impl SamplePool {
    /// Builds a pool from explicit paths. Files without a duration tag are
    /// skipped.
    pub fn from_files(files: impl IntoIterator<Item = PathBuf>, silence_dir: &Path) -> Self {
        let mut samples: Vec<Sample> = files
            .into_iter()
            .filter_map(|path| match duration_tag(&path) {
                Some(secs) => Some(Sample { path, secs }),
                None => {
                    tracing::warn!(path = %path.display(), "sample has no duration tag, skipping");
                    None
                }
            })
            .collect();
        samples.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            samples,
            silence_dir: silence_dir.to_path_buf(),
            max_attempts: None,
        }
    }

    /// Lists `dir` (not recursive).
    pub fn scan(dir: &Path, silence_dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        let pool = Self::from_files(files, silence_dir);
        tracing::info!(dir = %dir.display(), samples = pool.len(), "sample pool loaded");
        Ok(pool)
    }

    /// Caps random pairing attempts. Without a cap the loop only ends on success.
    pub fn with_max_attempts(mut self, max: Option<usize>) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn choose_couple(&self, pref: PairingPreference) -> Result<SampleCouple> {
        self.choose_couple_with(pref, &mut rand::rng())
    }

    /// Picks a random caller sample matching `pref.length` and a callee
    /// within [`MAX_DURATION_GAP`] of it, retrying until one is found.
    pub fn choose_couple_with<R: rand::Rng + ?Sized>(
        &self,
        pref: PairingPreference,
        rng: &mut R,
    ) -> Result<SampleCouple> {
        // Any admitted caller can at least pair with itself, so one
        // admitted sample guarantees the loop below terminates.
        if !self.samples.iter().any(|s| pref.length.admits(s.secs)) {
            return Err(CallbenchError::NoSuitablePair(format!(
                "no {:?} sample among {} files",
                pref.length,
                self.samples.len()
            )));
        }

        let mut attempts = 0usize;
        loop {
            attempts += 1;
            if let Some(max) = self.max_attempts {
                if attempts > max {
                    return Err(CallbenchError::NoSuitablePair(format!(
                        "gave up after {max} attempts"
                    )));
                }
            }

            let caller = &self.samples[rng.random_range(0..self.samples.len())];
            if !pref.length.admits(caller.secs) {
                continue;
            }
            if pref.one_way {
                let silence = self
                    .silence_dir
                    .join(format!("silence{}.pcm", pref.length.silence_secs()));
                return Ok(SampleCouple {
                    caller: caller.path.clone(),
                    callee: silence,
                });
            }

            let callee = &self.samples[rng.random_range(0..self.samples.len())];
            if caller.secs.abs_diff(callee.secs) <= MAX_DURATION_GAP {
                tracing::debug!(
                    caller = %caller.path.display(),
                    callee = %callee.path.display(),
                    attempts,
                    "chose sample couple"
                );
                return Ok(SampleCouple {
                    caller: caller.path.clone(),
                    callee: callee.path.clone(),
                });
            }
        }
    }
}
