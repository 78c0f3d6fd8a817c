//! Registered address tables
//!
//! Every table follows the same rule: registering an entry already present
//! leaves the table unchanged, and a full table refuses new entries.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::net::MacAddr;

pub const MAC_TABLE_SIZE: usize = 32;
pub const IP_TABLE_SIZE: usize = 8;
pub const IPM_TABLE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyPresent,
    TableFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Removed,
    NotFound,
}

/// Bounded table keyed by `K`, carrying a value `V` per entry
#[derive(Debug, Clone)]
pub struct AddressTable<K, V = ()> {
    entries: Vec<(K, V)>,
    capacity: usize,
}

impl<K: PartialEq + Copy, V: Copy> AddressTable<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    pub fn register(&mut self, key: K, value: V) -> RegisterOutcome {
        if self.contains(&key) {
            RegisterOutcome::AlreadyPresent
        } else if self.entries.len() >= self.capacity {
            RegisterOutcome::TableFull
        } else {
            self.entries.push((key, value));
            RegisterOutcome::Added
        }
    }

    pub fn unregister(&mut self, key: &K) -> UnregisterOutcome {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(i) => {
                self.entries.remove(i);
                UnregisterOutcome::Removed
            }
            None => UnregisterOutcome::NotFound,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// All per-group address tables
#[derive(Debug, Clone)]
pub struct AddressTables {
    /// Unicast MACs (SETVMAC)
    pub vmac: AddressTable<MacAddr>,
    /// Group MACs (SETGMAC)
    pub gmac: AddressTable<MacAddr>,
    /// IPv4 address and mask (SETIP)
    pub ipv4: AddressTable<Ipv4Addr, Ipv4Addr>,
    /// IPv6 address and prefix mask (SETIP)
    pub ipv6: AddressTable<Ipv6Addr, Ipv6Addr>,
    pub ipv4_mc: AddressTable<Ipv4Addr>,
    pub ipv6_mc: AddressTable<Ipv6Addr>,
}

impl AddressTables {
    pub fn new() -> Self {
        Self {
            vmac: AddressTable::new(MAC_TABLE_SIZE),
            gmac: AddressTable::new(MAC_TABLE_SIZE),
            ipv4: AddressTable::new(IP_TABLE_SIZE),
            ipv6: AddressTable::new(IP_TABLE_SIZE),
            ipv4_mc: AddressTable::new(IPM_TABLE_SIZE),
            ipv6_mc: AddressTable::new(IPM_TABLE_SIZE),
        }
    }

    pub fn clear(&mut self) {
        self.vmac.clear();
        self.gmac.clear();
        self.ipv4.clear();
        self.ipv6.clear();
        self.ipv4_mc.clear();
        self.ipv6_mc.clear();
    }
}

impl Default for AddressTables {
    fn default() -> Self {
        Self::new()
    }
}
