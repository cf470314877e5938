//! Data models shared between the session controller (which produces them)
//! and the ledger/aggregator (which persist and read them).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Peer role ───────────────────────────────────────────────────────

/// Which side of the simulated call a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Caller,
    Callee,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Caller => write!(f, "caller"),
            PeerRole::Callee => write!(f, "callee"),
        }
    }
}

// ── Network type ────────────────────────────────────────────────────

/// Network classification handed to the call client (`-t <code>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    #[serde(rename = "gprs")]
    Gprs,
    #[serde(rename = "edge")]
    Edge,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "hspa")]
    Hspa,
    #[serde(rename = "lte")]
    Lte,
    #[serde(rename = "wifi")]
    Wifi,
    #[serde(rename = "ethernet")]
    Ethernet,
    #[serde(rename = "other_high_speed")]
    OtherHighSpeed,
    #[serde(rename = "other_low_speed")]
    OtherLowSpeed,
    #[serde(rename = "dialup")]
    Dialup,
    #[serde(rename = "other_mobile")]
    OtherMobile,
}

impl NetworkType {
    /// Numeric code understood by the call client.
    pub fn code(self) -> u8 {
        match self {
            NetworkType::Gprs => 1,
            NetworkType::Edge => 2,
            NetworkType::ThreeG => 3,
            NetworkType::Hspa => 4,
            NetworkType::Lte => 5,
            NetworkType::Wifi => 6,
            NetworkType::Ethernet => 7,
            NetworkType::OtherHighSpeed => 8,
            NetworkType::OtherLowSpeed => 9,
            NetworkType::Dialup => 10,
            NetworkType::OtherMobile => 11,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::Gprs => "gprs",
            NetworkType::Edge => "edge",
            NetworkType::ThreeG => "3g",
            NetworkType::Hspa => "hspa",
            NetworkType::Lte => "lte",
            NetworkType::Wifi => "wifi",
            NetworkType::Ethernet => "ethernet",
            NetworkType::OtherHighSpeed => "other_high_speed",
            NetworkType::OtherLowSpeed => "other_low_speed",
            NetworkType::Dialup => "dialup",
            NetworkType::OtherMobile => "other_mobile",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gprs" => Ok(NetworkType::Gprs),
            "edge" => Ok(NetworkType::Edge),
            "3g" => Ok(NetworkType::ThreeG),
            "hspa" => Ok(NetworkType::Hspa),
            "lte" => Ok(NetworkType::Lte),
            "wifi" => Ok(NetworkType::Wifi),
            "ethernet" => Ok(NetworkType::Ethernet),
            "other_high_speed" => Ok(NetworkType::OtherHighSpeed),
            "other_low_speed" => Ok(NetworkType::OtherLowSpeed),
            "dialup" => Ok(NetworkType::Dialup),
            "other_mobile" => Ok(NetworkType::OtherMobile),
            other => Err(format!("unknown network type: {other:?}")),
        }
    }
}

// ── Traffic counters ────────────────────────────────────────────────

/// Interface statistics as read from `/sys/class/net/<iface>/statistics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

impl TrafficCounters {
    /// Counters accumulated between `before` and `self`.
    ///
    /// Saturates at zero so a counter reset (interface re-created mid-run)
    /// does not wrap around.
    pub fn since(&self, before: &TrafficCounters) -> TrafficCounters {
        TrafficCounters {
            rx_bytes: self.rx_bytes.saturating_sub(before.rx_bytes),
            tx_bytes: self.tx_bytes.saturating_sub(before.tx_bytes),
            rx_packets: self.rx_packets.saturating_sub(before.rx_packets),
            tx_packets: self.tx_packets.saturating_sub(before.tx_packets),
        }
    }
}

// ── Lifecycle timestamps ────────────────────────────────────────────

/// Media lifecycle markers a peer prints to its log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleTimestamps {
    pub first_send: Option<f64>,
    pub first_recv: Option<f64>,
    pub last_send: Option<f64>,
    pub last_recv: Option<f64>,
}

/// Everything measured about one peer during a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerMeasurements {
    pub traffic: Option<TrafficCounters>,
    pub timestamps: LifecycleTimestamps,
}

// ── Scores ──────────────────────────────────────────────────────────

/// The fixed set of score columns recorded per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScoreDimension {
    /// Full rating: reference vs. the caller's pre-send capture.
    Preprocess,
    /// Full rating: reference vs. the callee's received output.
    Output,
    /// Short rating: reference vs. received output in one pass.
    Combined,
    Rater997,
    Rater1002,
    Rater1007,
    Rater1010,
    Rater1012,
}

impl ScoreDimension {
    pub const ALL: [ScoreDimension; 8] = [
        ScoreDimension::Preprocess,
        ScoreDimension::Output,
        ScoreDimension::Combined,
        ScoreDimension::Rater997,
        ScoreDimension::Rater1002,
        ScoreDimension::Rater1007,
        ScoreDimension::Rater1010,
        ScoreDimension::Rater1012,
    ];

    /// Ledger column name.
    pub fn column(self) -> &'static str {
        match self {
            ScoreDimension::Preprocess => "ScorePreprocess",
            ScoreDimension::Output => "ScoreOutput",
            ScoreDimension::Combined => "ScoreCombined",
            ScoreDimension::Rater997 => "Score997",
            ScoreDimension::Rater1002 => "Score1002",
            ScoreDimension::Rater1007 => "Score1007",
            ScoreDimension::Rater1010 => "Score1010",
            ScoreDimension::Rater1012 => "Score1012",
        }
    }

    /// Maps an external rater id (the `entryNNNN` directory number) to its column.
    pub fn from_rater_id(id: u32) -> Option<ScoreDimension> {
        match id {
            997 => Some(ScoreDimension::Rater997),
            1002 => Some(ScoreDimension::Rater1002),
            1007 => Some(ScoreDimension::Rater1007),
            1010 => Some(ScoreDimension::Rater1010),
            1012 => Some(ScoreDimension::Rater1012),
            _ => None,
        }
    }

    /// The external rater id behind this column, if it comes from one.
    pub fn rater_id(self) -> Option<u32> {
        match self {
            ScoreDimension::Rater997 => Some(997),
            ScoreDimension::Rater1002 => Some(1002),
            ScoreDimension::Rater1007 => Some(1007),
            ScoreDimension::Rater1010 => Some(1010),
            ScoreDimension::Rater1012 => Some(1012),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScoreDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

pub type ScoreSet = BTreeMap<ScoreDimension, f64>;

// ── Ledger row ──────────────────────────────────────────────────────

/// One completed session, as persisted in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    /// Implementation version under comparison.
    pub entry: String,
    /// Caller's reference sample file name.
    pub sample: String,
    /// Network alias, or the session name when no alias was given.
    pub network: String,
    /// File name of the degraded output rated against the sample.
    pub distorted: String,
    pub scores: ScoreSet,
    pub caller: PeerMeasurements,
    pub callee: PeerMeasurements,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_type_codes_match_client() {
        assert_eq!(NetworkType::Gprs.code(), 1);
        assert_eq!(NetworkType::Wifi.code(), 6);
        assert_eq!(NetworkType::OtherMobile.code(), 11);
    }

    #[test]
    fn network_type_roundtrips_through_str() {
        for s in ["gprs", "3g", "other_low_speed", "dialup"] {
            let t: NetworkType = s.parse().unwrap();
            assert_eq!(t.to_string(), s);
        }
        assert!("5g".parse::<NetworkType>().is_err());
    }

    #[test]
    fn counter_delta_saturates() {
        let before = TrafficCounters {
            rx_bytes: 100,
            tx_bytes: 50,
            rx_packets: 10,
            tx_packets: 5,
        };
        let after = TrafficCounters {
            rx_bytes: 350,
            tx_bytes: 20,
            rx_packets: 14,
            tx_packets: 9,
        };
        let d = after.since(&before);
        assert_eq!(d.rx_bytes, 250);
        assert_eq!(d.tx_bytes, 0);
        assert_eq!(d.rx_packets, 4);
        assert_eq!(d.tx_packets, 4);
    }

    #[test]
    fn rater_ids_map_to_columns() {
        assert_eq!(
            ScoreDimension::from_rater_id(1010).map(ScoreDimension::column),
            Some("Score1010")
        );
        assert_eq!(ScoreDimension::from_rater_id(42), None);
    }
}
