//! Host identity detection: fully-qualified hostname and the local
//! non-loopback address used in the access URLs.

use crate::exec::CommandRunner;

/// Fully-qualified hostname, degrading to the short hostname and finally to
/// `localhost` when the resolver has no opinion.
pub fn detect_fqdn(runner: &dyn CommandRunner) -> String {
    for args in [&["-f"][..], &[][..]] {
        if let Ok(out) = runner.run("hostname", args) {
            let name = out.stdout.trim();
            if out.success() && !name.is_empty() {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

/// Local outbound address via a routing-table probe, with a
/// hostname-derived fallback when `ip` is unavailable.
pub fn detect_local_ip(runner: &dyn CommandRunner) -> Option<String> {
    if let Ok(out) = runner.run("ip", &["route", "get", "1.1.1.1"]) {
        if out.success() {
            if let Some(ip) = parse_route_src(&out.stdout) {
                return Some(ip);
            }
        }
    }
    if let Ok(out) = runner.run("hostname", &["-I"]) {
        if out.success() {
            if let Some(first) = out.stdout.split_whitespace().next() {
                return Some(first.to_string());
            }
        }
    }
    None
}

/// Pull the `src` address out of `ip route get` output, e.g.
/// `1.1.1.1 via 192.168.1.1 dev eth0 src 192.168.1.23 uid 0`.
pub fn parse_route_src(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    while let Some(word) = words.next() {
        if word == "src" {
            return words.next().map(|s| s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_src_address_from_route_output() {
        let out = "1.1.1.1 via 10.0.0.1 dev ens3 src 10.0.0.42 uid 0\n    cache";
        assert_eq!(parse_route_src(out), Some("10.0.0.42".to_string()));
    }

    #[test]
    fn route_output_without_src_yields_none() {
        assert_eq!(parse_route_src("RTNETLINK answers: Network is unreachable"), None);
    }
}
