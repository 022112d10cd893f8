//! IPv4 CIDR algebra
//!
//! Address arithmetic and range/CIDR conversion used by the route planner:
//! - [`Ipv4Net`] - a network expressed as (address, prefix length)
//! - [`AddressRange`] - an inclusive, non-aligned address range
//! - [`range_to_cidrs`] - minimal decomposition of a range into CIDR blocks
//!
//! All arithmetic treats an address as a big-endian unsigned integer.
//! Internally the math is widened to u64 so the top of the address space
//! needs no overflow special cases.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Error parsing `a.b.c.d/p` notation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Ipv4NetParseError {
    #[error("Invalid network notation (expected a.b.c.d/p): {0}")]
    Malformed(String),

    #[error("Invalid address in {0}")]
    Address(String),

    #[error("Prefix length out of range in {0}")]
    PrefixLength(String),
}

/// An IPv4 network: address plus prefix length (0..=32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Net {
    /// Create a network. Panics if `prefix_len > 32`; the address is kept
    /// as given and may be non-canonical (see [`Ipv4Net::is_canonical`]).
    pub const fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        assert!(prefix_len <= 32, "prefix length out of range");
        Self { addr, prefix_len }
    }

    /// Single-host network (/32).
    pub const fn host(addr: Ipv4Addr) -> Self {
        Self::new(addr, 32)
    }

    /// The address as given at construction.
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Network mask with the high `prefix_len` bits set.
    pub fn netmask(&self) -> Ipv4Addr {
        if self.prefix_len == 0 {
            Ipv4Addr::UNSPECIFIED
        } else {
            Ipv4Addr::from(u32::MAX << (32 - self.prefix_len))
        }
    }

    /// First address of the block (low host bits cleared).
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & u32::from(self.netmask()))
    }

    /// Last address of the block (host bits set).
    pub fn last(&self) -> Ipv4Addr {
        let hostmask = u32::from(self.netmask()) ^ u32::MAX;
        Ipv4Addr::from(u32::from(self.network()) | hostmask)
    }

    /// A network is canonical when its address equals its network address,
    /// i.e. the low `32 - prefix_len` bits are zero.
    pub fn is_canonical(&self) -> bool {
        self.addr == self.network()
    }

    /// The same block with the address normalized to the network address.
    pub fn canonical(&self) -> Self {
        Self::new(self.network(), self.prefix_len)
    }

    /// Whether `addr` falls inside this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.network() <= addr && addr <= self.last()
    }

    /// The inclusive range covered by this block.
    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.network(), self.last())
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Ipv4Net {
    type Err = Ipv4NetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Ipv4NetParseError::Malformed(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Ipv4NetParseError::Address(s.to_string()))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| Ipv4NetParseError::PrefixLength(s.to_string()))?;
        if prefix_len > 32 {
            return Err(Ipv4NetParseError::PrefixLength(s.to_string()));
        }
        Ok(Self::new(addr, prefix_len))
    }
}

/// An inclusive address range, `start <= end`.
///
/// Intermediate representation while computing exclusions; decomposed into
/// canonical CIDR blocks before any route is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl AddressRange {
    /// Create a range. Panics if `start > end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        assert!(start <= end, "range start {start} above end {end}");
        Self { start, end }
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses in the range (at least 1).
    pub fn len(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Next address up, or `None` at 255.255.255.255.
pub fn increment(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    u32::from(addr).checked_add(1).map(Ipv4Addr::from)
}

/// Next address down, or `None` at 0.0.0.0.
pub fn decrement(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    u32::from(addr).checked_sub(1).map(Ipv4Addr::from)
}

/// Decompose an inclusive range into the minimal ordered set of canonical
/// CIDR blocks whose union is exactly the range.
///
/// Greedy: from the current start, emit the largest block that is both
/// aligned to its own size and does not overrun `end`, then advance past
/// it. Returns an empty vec when `start > end`.
pub fn range_to_cidrs(start: Ipv4Addr, end: Ipv4Addr) -> Vec<Ipv4Net> {
    let end = u64::from(u32::from(end));
    let mut cur = u64::from(u32::from(start));
    let mut blocks = Vec::new();

    while cur <= end {
        // Host bits allowed by alignment: a block of 2^h addresses must
        // start on a multiple of its size.
        let align = if cur == 0 { 32 } else { cur.trailing_zeros().min(32) };
        // Shrink until the block also fits below `end`.
        let mut host_bits = align;
        while host_bits > 0 && cur + (1u64 << host_bits) - 1 > end {
            host_bits -= 1;
        }
        blocks.push(Ipv4Net::new(
            Ipv4Addr::from(cur as u32),
            (32 - host_bits) as u8,
        ));
        cur += 1u64 << host_bits;
    }

    blocks
}
