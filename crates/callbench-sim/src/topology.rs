//! Interface discovery and traffic counters.

use std::sync::LazyLock;

use regex::Regex;

use callbench_common::models::TrafficCounters;
use callbench_common::{CallbenchError, Result};

use crate::exec::ExecutionTarget;

static DEFAULT_ROUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^default\b.*?\bdev\s+(\S+)").expect("static regex"));

static IFACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,15}$").expect("static regex"));

const COUNTER_FILES: [&str; 4] = ["rx_bytes", "tx_bytes", "rx_packets", "tx_packets"];

/// Rejects names that are not valid Linux interface names.
pub fn validate_interface(name: &str) -> Result<&str> {
    if IFACE_RE.is_match(name) {
        Ok(name)
    } else {
        Err(CallbenchError::Validation(format!(
            "invalid interface name {name:?}"
        )))
    }
}

/// Extracts the device of the first `default` route in `ip route` output.
pub fn parse_default_route(ip_route: &str) -> Option<String> {
    DEFAULT_ROUTE_RE
        .captures(ip_route)
        .map(|c| c[1].to_string())
}

/// Asks `target` which interface carries its default route.
pub fn default_route_interface(target: &dyn ExecutionTarget) -> Result<String> {
    let out = target.run_sync("ip route show default")?.check("ip")?;
    let iface = parse_default_route(&out.stdout).ok_or_else(|| {
        CallbenchError::Config(format!(
            "no default route on {}, set the interface explicitly",
            target.label()
        ))
    })?;
    tracing::info!(interface = %iface, target_label = target.label(), "detected default interface");
    Ok(iface)
}

/// Reads the kernel's cumulative counters for `iface` on `target`.
pub fn read_counters(target: &dyn ExecutionTarget, iface: &str) -> Result<TrafficCounters> {
    let iface = validate_interface(iface)?;
    let cmd = COUNTER_FILES
        .iter()
        .map(|f| format!("cat /sys/class/net/{iface}/statistics/{f}"))
        .collect::<Vec<_>>()
        .join(" && ");
    let out = target.run_sync(&cmd)?.check("cat")?;
    parse_counters(&out.stdout)
}

/// Parses four newline-separated values in [`COUNTER_FILES`] order.
fn parse_counters(text: &str) -> Result<TrafficCounters> {
    let values = text
        .split_whitespace()
        .map(|v| v.parse::<u64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CallbenchError::external("cat", format!("bad counter value: {e}")))?;
    let [rx_bytes, tx_bytes, rx_packets, tx_packets] = values[..] else {
        return Err(CallbenchError::external(
            "cat",
            format!("expected 4 counters, got {}", values.len()),
        ));
    };
    Ok(TrafficCounters {
        rx_bytes,
        tx_bytes,
        rx_packets,
        tx_packets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::LocalTarget;

    #[test]
    fn finds_default_route_device() {
        let out = "default via 192.168.1.1 dev wlp3s0 proto dhcp metric 600\n\
                   10.0.0.0/8 dev eth1 scope link\n";
        assert_eq!(parse_default_route(out).as_deref(), Some("wlp3s0"));
        assert_eq!(parse_default_route("10.0.0.0/8 dev eth1\n"), None);
    }

    #[test]
    fn default_route_need_not_be_first_line() {
        let out = "10.0.0.0/8 dev eth1 scope link\ndefault dev ppp0 scope link\n";
        assert_eq!(parse_default_route(out).as_deref(), Some("ppp0"));
    }

    #[test]
    fn interface_names_are_checked() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("veth_a.10").is_ok());
        assert!(validate_interface("eth0; rm -rf /").is_err());
        assert!(validate_interface("").is_err());
        assert!(validate_interface("a_very_long_interface").is_err());
    }

    #[test]
    fn counters_parse_in_file_order() {
        let c = parse_counters("100\n200\n3\n4\n").unwrap();
        assert_eq!(c.rx_bytes, 100);
        assert_eq!(c.tx_bytes, 200);
        assert_eq!(c.rx_packets, 3);
        assert_eq!(c.tx_packets, 4);
        assert!(parse_counters("1\n2\n").is_err());
        assert!(parse_counters("1\nx\n3\n4").is_err());
    }

    #[test]
    fn loopback_counters_are_readable() {
        if !std::path::Path::new("/sys/class/net/lo/statistics/rx_bytes").exists() {
            eprintln!("Skipping test, no sysfs");
            return;
        }
        let c = read_counters(&LocalTarget::new(), "lo").unwrap();
        let again = read_counters(&LocalTarget::new(), "lo").unwrap();
        assert!(again.rx_bytes >= c.rx_bytes);
    }
}
