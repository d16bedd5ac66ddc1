use std::net::IpAddr;

/// Parses `entry` as either a bare IP (`/32` or `/128`) or a CIDR range
/// (`10.0.0.0/8`). Returns the network address and prefix length.
pub fn parse_cidr(entry: &str) -> Option<(IpAddr, u8)> {
    match entry.split_once('/') {
        Some((addr, prefix)) => {
            let addr: IpAddr = addr.parse().ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            let max_prefix = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max_prefix {
                return None;
            }
            Some((addr, prefix))
        }
        None => {
            let addr: IpAddr = entry.parse().ok()?;
            let prefix = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Some((addr, prefix))
        }
    }
}

fn in_network(ip: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask: u128 = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

/// `true` if `ip` falls inside any of the CIDR/bare-IP `entries`.
pub fn ip_allowed(ip: IpAddr, entries: &[String]) -> bool {
    entries.iter().any(|entry| {
        parse_cidr(entry)
            .map(|(network, prefix)| in_network(ip, network, prefix))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_ip_matches_only_itself() {
        let entries = vec!["203.0.113.5".to_string()];
        assert!(ip_allowed("203.0.113.5".parse().unwrap(), &entries));
        assert!(!ip_allowed("203.0.113.6".parse().unwrap(), &entries));
    }

    #[test]
    fn cidr_matches_whole_range() {
        let entries = vec!["10.0.0.0/8".to_string()];
        assert!(ip_allowed("10.255.0.1".parse().unwrap(), &entries));
        assert!(!ip_allowed("11.0.0.1".parse().unwrap(), &entries));
    }

    #[test]
    fn invalid_entry_is_rejected_by_parser() {
        assert!(parse_cidr("not-an-ip").is_none());
        assert!(parse_cidr("10.0.0.0/40").is_none());
    }
}
