//! Address selector (spec §2, §4.2, §4.3): splits resolved addresses into
//! v4/v6 lists and defines dual-stack preference.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Resolved addresses for one hostname, partitioned by family.
///
/// Property 7: for any mixed v4/v6 resolution, the returned lists preserve
/// input order within each family and partition the input exactly.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAddresses {
    pub v4: Vec<Ipv4Addr>,
    pub v6: Vec<Ipv6Addr>,
}

impl ResolvedAddresses {
    #[must_use]
    pub fn partition(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for addr in addrs {
            match addr {
                IpAddr::V4(a) => v4.push(a),
                IpAddr::V6(a) => v6.push(a),
            }
        }
        Self { v4, v6 }
    }

    #[must_use]
    pub fn all(&self) -> Vec<IpAddr> {
        self.v6
            .iter()
            .map(|a| IpAddr::V6(*a))
            .chain(self.v4.iter().map(|a| IpAddr::V4(*a)))
            .collect()
    }

    /// Dual-stack preference order per §4.2/§4.3: v6 first (if present), then
    /// v4. Fallback to the second family is only attempted on a dial error,
    /// never on a read/write error once a connection is established.
    #[must_use]
    pub fn preference_order(&self) -> Vec<IpAddr> {
        let mut out = Vec::new();
        if let Some(first) = self.v6.first() {
            out.push(IpAddr::V6(*first));
        }
        if let Some(first) = self.v4.first() {
            out.push(IpAddr::V4(*first));
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_and_preserves_order() {
        let input = vec![
            IpAddr::V4("1.1.1.1".parse().unwrap()),
            IpAddr::V6("::1".parse().unwrap()),
            IpAddr::V4("2.2.2.2".parse().unwrap()),
            IpAddr::V6("::2".parse().unwrap()),
        ];
        let resolved = ResolvedAddresses::partition(input);
        assert_eq!(resolved.v4, vec!["1.1.1.1".parse::<Ipv4Addr>().unwrap(), "2.2.2.2".parse().unwrap()]);
        assert_eq!(resolved.v6, vec!["::1".parse::<Ipv6Addr>().unwrap(), "::2".parse().unwrap()]);
    }

    #[test]
    fn prefers_v6_first_when_dual_stack() {
        let resolved = ResolvedAddresses {
            v4: vec!["9.9.9.9".parse().unwrap()],
            v6: vec!["::9".parse().unwrap()],
        };
        let order = resolved.preference_order();
        assert_eq!(order, vec![IpAddr::V6("::9".parse().unwrap()), IpAddr::V4("9.9.9.9".parse().unwrap())]);
    }

    #[test]
    fn single_family_has_no_fallback() {
        let resolved = ResolvedAddresses {
            v4: vec!["9.9.9.9".parse().unwrap()],
            v6: vec![],
        };
        assert_eq!(resolved.preference_order(), vec![IpAddr::V4("9.9.9.9".parse().unwrap())]);
    }
}
