//! Harness configuration (`callbench.toml`).
//!
//! Parsed in two stages: `*Input` structs mirror the file with every field
//! optional, then [`HarnessConfigInput::resolve`] fills defaults and
//! validates.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use callbench_common::aggregate::FINAL_WEIGHTS;
use callbench_common::{CallbenchError, Result};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_CALL_BINARY: &str = "bin/tgvoipcall";
const DEFAULT_RATE_COMMAND: &str = "bin/tgvoiprate";
const DEFAULT_PEER_TIMEOUT_SECS: u64 = 300;

// ── Input (as written in the file) ──────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub version: u32,
    pub interface: Option<String>,
    pub namespace: Option<String>,
    pub run_as: Option<String>,
    pub call_binary: Option<String>,
    pub peer_timeout_secs: Option<u64>,
    pub max_pair_attempts: Option<usize>,
    pub paths: PathsConfigInput,
    pub callee: CalleeConfigInput,
    pub broker: BrokerConfigInput,
    pub scoring: ScoringConfigInput,
    pub entries: Vec<EntryConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfigInput {
    pub samples: Option<PathBuf>,
    pub silence: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub preprocessed: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalleeConfigInput {
    pub host: Option<String>,
    pub workdir: Option<String>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfigInput {
    /// `"http"` (default) or `"static"`.
    pub kind: Option<String>,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
    pub endpoint: Option<String>,
    pub caller_tag: Option<String>,
    pub callee_tag: Option<String>,
    pub encryption_key: Option<String>,
    pub config: Option<toml::Table>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfigInput {
    pub rate_command: Option<String>,
    pub raters: Vec<RaterConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RaterConfigInput {
    pub id: u32,
    pub command: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntryConfigInput {
    pub id: String,
    pub binary: Option<String>,
    pub preload: Option<String>,
}

// ── Resolved ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub samples: PathBuf,
    pub silence: PathBuf,
    pub out: PathBuf,
    pub preprocessed: PathBuf,
    pub ledger: PathBuf,
}

impl PathsConfig {
    /// Where the broker's codec config is written for the peers.
    pub fn call_config(&self) -> PathBuf {
        self.out.join("config.json")
    }

    /// Append-only stderr of every rating command.
    pub fn rate_errors(&self) -> PathBuf {
        self.out.join("rate_errors.log")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            samples: "samples".into(),
            silence: "silence".into(),
            out: "out".into(),
            preprocessed: "preprocessed".into(),
            ledger: PathBuf::from("out").join("ratings.csv"),
        }
    }
}

/// Where the callee runs. No host means this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalleeConfig {
    pub remote: Option<RemotePeer>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub host: String,
    pub workdir: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerConfig {
    Http {
        base_url: String,
        token: String,
        timeout: Duration,
    },
    Static {
        endpoint: String,
        caller_tag: String,
        callee_tag: String,
        encryption_key: String,
        config: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaterConfig {
    pub id: u32,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringConfig {
    pub rate_command: String,
    pub raters: Vec<RaterConfig>,
}

/// One implementation version under comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryConfig {
    pub id: String,
    pub binary: String,
    /// Library injected with `LD_PRELOAD`.
    pub preload: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub version: u32,
    /// Caller-side device that `tc` shapes. `None` means auto-detect.
    pub interface: Option<String>,
    pub namespace: Option<String>,
    pub run_as: Option<String>,
    pub peer_timeout: Option<Duration>,
    pub max_pair_attempts: Option<usize>,
    pub paths: PathsConfig,
    pub callee: CalleeConfig,
    pub broker: BrokerConfig,
    pub scoring: ScoringConfig,
    pub entries: Vec<EntryConfig>,
}

impl HarnessConfigInput {
    pub fn resolve(self) -> Result<HarnessConfig> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(CallbenchError::Config(format!(
                "unsupported config version {version}"
            )));
        }

        let defaults = PathsConfig::default();
        let ledger = self
            .paths
            .ledger
            .or_else(|| self.paths.out.as_ref().map(|o| o.join("ratings.csv")))
            .unwrap_or(defaults.ledger);
        let paths = PathsConfig {
            samples: self.paths.samples.unwrap_or(defaults.samples),
            silence: self.paths.silence.unwrap_or(defaults.silence),
            out: self.paths.out.unwrap_or(defaults.out),
            preprocessed: self.paths.preprocessed.unwrap_or(defaults.preprocessed),
            ledger,
        };

        let remote = match non_empty(self.callee.host) {
            Some(host) => Some(RemotePeer {
                host,
                workdir: non_empty(self.callee.workdir).unwrap_or_else(|| ".".into()),
            }),
            None => None,
        };
        let callee = CalleeConfig {
            remote,
            interface: non_empty(self.callee.interface),
        };

        let broker = resolve_broker(self.broker)?;

        let mut seen_raters = HashSet::new();
        let mut raters = Vec::new();
        for r in self.scoring.raters {
            if callbench_common::models::ScoreDimension::from_rater_id(r.id).is_none() {
                return Err(CallbenchError::Config(format!(
                    "rater {} has no ledger column",
                    r.id
                )));
            }
            if r.command.trim().is_empty() || !seen_raters.insert(r.id) {
                continue;
            }
            raters.push(RaterConfig {
                id: r.id,
                command: r.command.trim().to_string(),
            });
        }
        let scoring = ScoringConfig {
            rate_command: non_empty(self.scoring.rate_command)
                .unwrap_or_else(|| DEFAULT_RATE_COMMAND.into()),
            raters,
        };

        let call_binary = non_empty(self.call_binary).unwrap_or_else(|| DEFAULT_CALL_BINARY.into());
        let mut seen_entries = HashSet::new();
        let mut entries = Vec::new();
        for e in self.entries {
            let id = e.id.trim().to_string();
            if id.is_empty() {
                continue;
            }
            if !seen_entries.insert(id.clone()) {
                return Err(CallbenchError::Config(format!("duplicate entry {id:?}")));
            }
            entries.push(EntryConfig {
                id,
                binary: non_empty(e.binary).unwrap_or_else(|| call_binary.clone()),
                preload: non_empty(e.preload),
            });
        }

        let peer_timeout = match self.peer_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(DEFAULT_PEER_TIMEOUT_SECS)),
        };

        Ok(HarnessConfig {
            version,
            interface: non_empty(self.interface),
            namespace: non_empty(self.namespace),
            run_as: non_empty(self.run_as),
            peer_timeout,
            max_pair_attempts: self.max_pair_attempts.filter(|n| *n > 0),
            paths,
            callee,
            broker,
            scoring,
            entries,
        })
    }
}

fn resolve_broker(input: BrokerConfigInput) -> Result<BrokerConfig> {
    let kind = non_empty(input.kind).unwrap_or_else(|| "http".into());
    match kind.as_str() {
        "http" => {
            let base_url = non_empty(input.base_url)
                .ok_or_else(|| CallbenchError::Config("broker.base_url is required".into()))?;
            Ok(BrokerConfig::Http {
                base_url,
                token: input.token.unwrap_or_default().trim().to_string(),
                timeout: Duration::from_secs(input.timeout_secs.unwrap_or(30)),
            })
        }
        "static" => {
            let required = |v: Option<String>, name: &str| {
                non_empty(v).ok_or_else(|| {
                    CallbenchError::Config(format!("broker.{name} is required for a static broker"))
                })
            };
            let config = serde_json::to_value(input.config.unwrap_or_default())
                .map_err(|e| CallbenchError::Config(format!("broker.config: {e}")))?;
            Ok(BrokerConfig::Static {
                endpoint: required(input.endpoint, "endpoint")?,
                caller_tag: required(input.caller_tag, "caller_tag")?,
                callee_tag: required(input.callee_tag, "callee_tag")?,
                encryption_key: required(input.encryption_key, "encryption_key")?,
                config,
            })
        }
        other => Err(CallbenchError::Config(format!(
            "unknown broker kind {other:?}, expected \"http\" or \"static\""
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl HarnessConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let parsed: HarnessConfigInput = toml::from_str(input)
            .map_err(|e| CallbenchError::Config(format!("invalid config TOML: {e}")))?;
        parsed.resolve()
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CallbenchError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn entry(&self, id: &str) -> Option<&EntryConfig> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Weighted-score raters with no configured command, sorted by id.
    ///
    /// While any are missing, no session gets a final score.
    pub fn missing_final_raters(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = FINAL_WEIGHTS
            .iter()
            .filter_map(|(dim, _)| dim.rater_id())
            .filter(|id| !self.scoring.raters.iter().any(|r| r.id == *id))
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
            version = 1
            interface = "v-peer1"
            namespace = "client1"
            peer_timeout_secs = 90

            [paths]
            out = "results"

            [callee]
            host = "10.0.0.2"
            workdir = "suite"

            [broker]
            base_url = "https://broker.example/voip"
            token = "abc"

            [scoring]
            [[scoring.raters]]
            id = 1010
            command = "bin/other_raters/entry1010/rate"

            [[entries]]
            id = "stable"
            preload = "lib/libtgvoip-stable.so"

            [[entries]]
            id = "custom"
            binary = "bin/mycall"
        "#;
        let cfg = HarnessConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.interface.as_deref(), Some("v-peer1"));
        assert_eq!(cfg.peer_timeout, Some(Duration::from_secs(90)));
        assert_eq!(cfg.paths.ledger, PathBuf::from("results/ratings.csv"));
        assert_eq!(cfg.paths.call_config(), PathBuf::from("results/config.json"));
        assert_eq!(cfg.paths.samples, PathBuf::from("samples"));
        assert_eq!(
            cfg.callee.remote,
            Some(RemotePeer {
                host: "10.0.0.2".into(),
                workdir: "suite".into()
            })
        );
        assert!(matches!(cfg.broker, BrokerConfig::Http { ref token, .. } if token == "abc"));
        assert_eq!(cfg.scoring.rate_command, DEFAULT_RATE_COMMAND);
        assert_eq!(cfg.scoring.raters.len(), 1);
        assert_eq!(cfg.entries[0].binary, DEFAULT_CALL_BINARY);
        assert_eq!(cfg.entries[0].preload.as_deref(), Some("lib/libtgvoip-stable.so"));
        assert_eq!(cfg.entry("custom").unwrap().binary, "bin/mycall");
    }

    #[test]
    fn static_broker_carries_config_blob() {
        let toml = r#"
            [broker]
            kind = "static"
            endpoint = "127.0.0.1:5555"
            caller_tag = "aa"
            callee_tag = "bb"
            encryption_key = "00ff"
            [broker.config]
            audio_frame_size = 60
        "#;
        let cfg = HarnessConfig::from_toml_str(toml).unwrap();
        let BrokerConfig::Static { config, endpoint, .. } = cfg.broker else {
            panic!("expected static broker");
        };
        assert_eq!(endpoint, "127.0.0.1:5555");
        assert_eq!(config["audio_frame_size"], 60);
        assert!(cfg.callee.remote.is_none());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(HarnessConfig::from_toml_str("version = 2\n[broker]\nbase_url='x'").is_err());
        assert!(HarnessConfig::from_toml_str("").is_err(), "http broker needs a url");
        assert!(HarnessConfig::from_toml_str("[broker]\nkind = 'static'").is_err());

        let dup = r#"
            [broker]
            base_url = "x"
            [[entries]]
            id = "a"
            [[entries]]
            id = "a"
        "#;
        assert!(HarnessConfig::from_toml_str(dup).is_err());

        let unknown_rater = r#"
            [broker]
            base_url = "x"
            [[scoring.raters]]
            id = 42
            command = "r"
        "#;
        assert!(HarnessConfig::from_toml_str(unknown_rater).is_err());
    }

    #[test]
    fn reports_missing_final_raters() {
        let cfg = HarnessConfig::from_toml_str("[broker]\nbase_url = 'x'").unwrap();
        assert_eq!(cfg.missing_final_raters(), [1007, 1010, 1012]);

        let toml = r#"
            [broker]
            base_url = "x"
            [[scoring.raters]]
            id = 1012
            command = "r12"
            [[scoring.raters]]
            id = 997
            command = "r997"
            [[scoring.raters]]
            id = 1010
            command = "r10"
            [[scoring.raters]]
            id = 1007
            command = "r7"
        "#;
        let cfg = HarnessConfig::from_toml_str(toml).unwrap();
        assert!(cfg.missing_final_raters().is_empty());

        let blank = "[broker]\nbase_url = 'x'\n[[scoring.raters]]\nid = 1007\ncommand = ' '";
        let cfg = HarnessConfig::from_toml_str(blank).unwrap();
        assert_eq!(cfg.missing_final_raters(), [1007, 1010, 1012]);
    }

    #[test]
    fn zero_timeout_disables_bound() {
        let cfg =
            HarnessConfig::from_toml_str("peer_timeout_secs = 0\n[broker]\nbase_url = 'x'").unwrap();
        assert_eq!(cfg.peer_timeout, None);
        assert_eq!(cfg.max_pair_attempts, None);
    }
}
