//! Route exclusion planning
//!
//! Turns a list of "networks that must bypass the tunnel" into the list of
//! CIDR blocks that are routed *through* the tunnel adapter: everything in
//! the IPv4 space that is not excluded.
//!
//! The planner is a pure function over a sorted exclusion list, so it can
//! be tested without any adapter or socket. Installing the resulting routes
//! is the session engine's job and is non-fatal per block.

use std::net::Ipv4Addr;

use crate::cidr::{range_to_cidrs, Ipv4Net};

/// Loopback, never tunneled.
pub const LOOPBACK_RANGE: Ipv4Net = Ipv4Net::new(Ipv4Addr::new(127, 0, 0, 0), 8);

/// Conventional tethering subnets (USB, Wi-Fi hotspot, Bluetooth), kept on
/// the local network path.
pub const TETHERING_RANGES: [Ipv4Net; 3] = [
    Ipv4Net::new(Ipv4Addr::new(192, 168, 42, 0), 24),
    Ipv4Net::new(Ipv4Addr::new(192, 168, 43, 0), 24),
    Ipv4Net::new(Ipv4Addr::new(192, 168, 44, 0), 24),
];

/// Multicast through the broadcast address (224.0.0.0 - 255.255.255.255).
/// Carved out of the main exclusion walk as the trailing block, then
/// re-included as tunnel routes afterwards.
pub const MULTICAST_RANGE: Ipv4Net = Ipv4Net::new(Ipv4Addr::new(224, 0, 0, 0), 3);

/// The set of networks that bypass the tunnel, sorted by network address.
///
/// Built once at session start and consumed immediately by the planner.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    blocks: Vec<Ipv4Net>,
}

impl ExclusionSet {
    /// Build the standard session exclusion set: the relay server itself
    /// (when it has an IPv4 address), DNS resolvers, loopback, tethering
    /// ranges, subnets of other local interfaces, and the multicast tail.
    pub fn for_session(
        server: Option<Ipv4Addr>,
        dns_resolvers: &[Ipv4Addr],
        local_subnets: &[Ipv4Net],
    ) -> Self {
        let mut blocks = Vec::with_capacity(6 + dns_resolvers.len() + local_subnets.len());
        blocks.extend(server.map(Ipv4Net::host));
        blocks.extend(dns_resolvers.iter().copied().map(Ipv4Net::host));
        blocks.push(LOOPBACK_RANGE);
        blocks.extend(TETHERING_RANGES);
        blocks.extend(local_subnets.iter().copied());
        blocks.push(MULTICAST_RANGE);
        Self::from_blocks(blocks)
    }

    /// Build from arbitrary blocks: canonicalizes, sorts by network address
    /// and drops exact duplicates. Overlaps are kept; the planner's cursor
    /// walk handles them.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Ipv4Net>) -> Self {
        let mut blocks: Vec<Ipv4Net> = blocks.into_iter().map(|b| b.canonical()).collect();
        blocks.sort_by_key(|b| (b.network(), b.prefix_len()));
        blocks.dedup();
        Self { blocks }
    }

    /// The excluded blocks, ascending by network address.
    pub fn blocks(&self) -> &[Ipv4Net] {
        &self.blocks
    }

    /// The CIDR blocks to route through the tunnel: every gap between the
    /// exclusions, plus the re-included multicast/broadcast tail.
    pub fn tunnel_routes(&self) -> Vec<Ipv4Net> {
        let mut routes = plan_tunnel_routes(&self.blocks);
        // Broadcast-range traffic still rides the tunnel even though the
        // tail is excluded from the main walk.
        routes.extend(range_to_cidrs(
            MULTICAST_RANGE.network(),
            MULTICAST_RANGE.last(),
        ));
        routes
    }
}

/// Walk the gaps between sorted exclusions and emit them as canonical CIDR
/// blocks covering the rest of the IPv4 space.
///
/// Input must be sorted by network address ascending; overlapping or nested
/// entries are tolerated (they only shrink the gaps). The output plus the
/// exclusions exactly partitions 0.0.0.0 - 255.255.255.255.
pub fn plan_tunnel_routes(exclusions: &[Ipv4Net]) -> Vec<Ipv4Net> {
    const TOP: u64 = u32::MAX as u64;
    let mut routes = Vec::new();
    let mut cursor: u64 = 0;

    for block in exclusions {
        let span = block.range();
        let start = u64::from(u32::from(span.start()));
        let end = u64::from(u32::from(span.end()));
        if cursor < start {
            routes.extend(range_to_cidrs(
                Ipv4Addr::from(cursor as u32),
                Ipv4Addr::from((start - 1) as u32),
            ));
        }
        // Entries fully inside an already-skipped region move nothing.
        cursor = cursor.max(end + 1);
    }

    if cursor <= TOP {
        routes.extend(range_to_cidrs(
            Ipv4Addr::from(cursor as u32),
            Ipv4Addr::from(TOP as u32),
        ));
    }

    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn net(s: &str, p: u8) -> Ipv4Net {
        Ipv4Net::new(addr(s), p)
    }

    /// Routes plus exclusions must cover every address exactly once
    /// (exclusion overlaps excepted - they are tolerated input).
    fn assert_partition(exclusions: &[Ipv4Net], routes: &[Ipv4Net]) {
        let mut spans: Vec<(u64, u64)> = exclusions
            .iter()
            .chain(routes.iter())
            .map(|b| {
                (
                    u64::from(u32::from(b.network())),
                    u64::from(u32::from(b.last())),
                )
            })
            .collect();
        spans.sort();

        // Merge exclusion overlaps, then require a seamless cover.
        let mut cursor = 0u64;
        for (start, end) in spans {
            assert!(start <= cursor, "gap before {start:#x}");
            cursor = cursor.max(end + 1);
        }
        assert_eq!(cursor, 1u64 << 32, "space not fully covered");

        // Routes themselves must never overlap an exclusion.
        for route in routes {
            for excl in exclusions {
                assert!(
                    route.last() < excl.network() || excl.last() < route.network(),
                    "route {route} overlaps exclusion {excl}"
                );
            }
        }
    }

    #[test]
    fn test_single_host_exclusion() {
        // One excluded server address: the plan covers everything else.
        let exclusions = [net("10.0.0.5", 32)];
        let routes = plan_tunnel_routes(&exclusions);

        assert_partition(&exclusions, &routes);
        for route in &routes {
            assert!(!route.contains(addr("10.0.0.5")), "{route} covers the server");
        }
        // Leading gap ends at 10.0.0.4, trailing gap starts at 10.0.0.6.
        assert_eq!(routes.first().unwrap().network(), addr("0.0.0.0"));
        assert_eq!(routes.first().unwrap().prefix_len(), 5);
        assert!(routes.iter().any(|r| r.contains(addr("10.0.0.4"))));
        assert!(routes.iter().any(|r| r.contains(addr("10.0.0.6"))));
        assert!(routes.iter().any(|r| r.contains(addr("255.255.255.255"))));
    }

    #[test]
    fn test_exclusion_at_space_start_has_no_leading_gap() {
        let exclusions = [net("0.0.0.0", 8)];
        let routes = plan_tunnel_routes(&exclusions);
        assert_partition(&exclusions, &routes);
        assert_eq!(routes.first().unwrap().network(), addr("1.0.0.0"));
    }

    #[test]
    fn test_abutting_exclusions_leave_no_gap_between() {
        let exclusions = [net("10.0.0.0", 24), net("10.0.1.0", 24)];
        let routes = plan_tunnel_routes(&exclusions);
        assert_partition(&exclusions, &routes);
        for route in &routes {
            assert!(
                route.last() < addr("10.0.0.0") || route.network() > addr("10.0.1.255"),
                "unexpected route {route} inside the excluded span"
            );
        }
    }

    #[test]
    fn test_nested_and_duplicate_exclusions_collapse() {
        let nested = [net("10.0.0.0", 16), net("10.0.5.0", 24), net("10.0.5.0", 24)];
        let routes = plan_tunnel_routes(&nested);
        let plain = plan_tunnel_routes(&[net("10.0.0.0", 16)]);
        assert_eq!(routes, plain);
    }

    #[test]
    fn test_trailing_exclusion_ends_walk() {
        let exclusions = [MULTICAST_RANGE];
        let routes = plan_tunnel_routes(&exclusions);
        assert_partition(&exclusions, &routes);
        assert!(routes.iter().all(|r| r.last() <= addr("223.255.255.255")));
    }

    #[test]
    fn test_empty_exclusions_yield_default_route() {
        assert_eq!(plan_tunnel_routes(&[]), vec![net("0.0.0.0", 0)]);
    }

    #[test]
    fn test_session_set_is_sorted_and_deduped() {
        let set = ExclusionSet::for_session(
            Some(addr("192.168.43.7")), // server inside a tethering range
            &[addr("8.8.8.8"), addr("8.8.8.8")],
            &[net("192.168.1.0", 24)],
        );
        let blocks = set.blocks();
        assert!(blocks.windows(2).all(|w| w[0].network() <= w[1].network()));
        assert_eq!(
            blocks.iter().filter(|b| **b == Ipv4Net::host(addr("8.8.8.8"))).count(),
            1
        );
        assert!(blocks.contains(&LOOPBACK_RANGE));
        assert!(blocks.contains(&MULTICAST_RANGE));
    }

    #[test]
    fn test_tunnel_routes_reinclude_multicast_tail() {
        let set = ExclusionSet::for_session(Some(addr("10.0.0.5")), &[], &[]);
        let routes = set.tunnel_routes();
        assert_eq!(*routes.last().unwrap(), MULTICAST_RANGE);
        // The tail is re-included even though the walk excluded it.
        assert!(routes.iter().any(|r| r.contains(addr("239.1.2.3"))));
        // The server stays excluded.
        assert!(routes.iter().all(|r| !r.contains(addr("10.0.0.5"))));
    }

    #[test]
    fn test_non_canonical_input_is_canonicalized() {
        let set = ExclusionSet::from_blocks([net("10.0.0.77", 24)]);
        assert_eq!(set.blocks(), &[net("10.0.0.0", 24)]);
    }
}
