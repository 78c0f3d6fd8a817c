//! Inbound traffic filter
//!
//! A read-only snapshot of the addressing state, rebuilt by the CCW path
//! whenever the tables change and picked up by the worker on its next pass.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::net::{Layer, MacAddr, ETH_HLEN};

use super::header::{L2Cast, L3Cast};
use super::state::GroupState;

const IPV4_MIN_HLEN: usize = 20;
const IPV6_HLEN: usize = 40;

/// Where an inbound datagram goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Layer2(L2Cast),
    Layer3 { cast: L3Cast, dest: IpAddr },
    Drop(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct InboundFilter {
    layer: Option<Layer>,
    promisc: bool,
    vmacs: Vec<MacAddr>,
    gmacs: Vec<MacAddr>,
    ipv4: Vec<(Ipv4Addr, Ipv4Addr)>,
    ipv6: Vec<Ipv6Addr>,
    ipv4_mc: Vec<Ipv4Addr>,
    ipv6_mc: Vec<Ipv6Addr>,
}

impl InboundFilter {
    /// Filter that drops everything (no layer negotiated yet)
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn from_state(state: &GroupState) -> Self {
        let t = &state.tables;
        Self {
            layer: state.layer,
            promisc: state.promisc,
            vmacs: t.vmac.keys().collect(),
            gmacs: t.gmac.keys().collect(),
            ipv4: t.ipv4.iter().copied().collect(),
            ipv6: t.ipv6.keys().collect(),
            ipv4_mc: t.ipv4_mc.keys().collect(),
            ipv6_mc: t.ipv6_mc.keys().collect(),
        }
    }

    pub fn layer(&self) -> Option<Layer> {
        self.layer
    }

    pub fn classify(&self, datagram: &[u8]) -> Verdict {
        match self.layer {
            Some(Layer::Layer2) => self.classify_frame(datagram),
            Some(Layer::Layer3) => self.classify_packet(datagram),
            None => Verdict::Drop("no layer negotiated"),
        }
    }

    fn classify_frame(&self, frame: &[u8]) -> Verdict {
        let dest = match MacAddr::from_slice(frame) {
            Some(mac) if frame.len() >= ETH_HLEN => mac,
            _ => return Verdict::Drop("runt frame"),
        };
        if dest.is_broadcast() {
            Verdict::Layer2(L2Cast::Broadcast)
        } else if dest.is_multicast() {
            if self.promisc || self.gmacs.contains(&dest) {
                Verdict::Layer2(L2Cast::Multicast)
            } else {
                Verdict::Drop("multicast group not registered")
            }
        } else if self.promisc || self.vmacs.contains(&dest) {
            Verdict::Layer2(L2Cast::Unicast)
        } else {
            Verdict::Drop("not our MAC")
        }
    }

    fn classify_packet(&self, pkt: &[u8]) -> Verdict {
        match pkt.first().map(|b| b >> 4) {
            Some(4) if pkt.len() >= IPV4_MIN_HLEN => {
                let dest = Ipv4Addr::new(pkt[16], pkt[17], pkt[18], pkt[19]);
                self.classify_v4(dest)
            }
            Some(6) if pkt.len() >= IPV6_HLEN => {
                let mut a = [0u8; 16];
                a.copy_from_slice(&pkt[24..40]);
                self.classify_v6(Ipv6Addr::from(a))
            }
            _ => Verdict::Drop("not an IP packet"),
        }
    }

    fn classify_v4(&self, dest: Ipv4Addr) -> Verdict {
        let to = |cast| Verdict::Layer3 { cast, dest: IpAddr::V4(dest) };
        if self.ipv4.is_empty() {
            return to(L3Cast::None);
        }
        let subnet_bcast = self
            .ipv4
            .iter()
            .any(|(a, m)| u32::from(*a) | !u32::from(*m) == u32::from(dest));
        if dest.is_broadcast() || subnet_bcast {
            to(L3Cast::Broadcast)
        } else if dest.is_multicast() {
            if self.ipv4_mc.contains(&dest) {
                to(L3Cast::Multicast)
            } else {
                Verdict::Drop("multicast group not registered")
            }
        } else if self.ipv4.iter().any(|(a, _)| *a == dest) {
            to(L3Cast::Unicast)
        } else {
            Verdict::Drop("not our IPv4 address")
        }
    }

    fn classify_v6(&self, dest: Ipv6Addr) -> Verdict {
        let to = |cast| Verdict::Layer3 { cast, dest: IpAddr::V6(dest) };
        if self.ipv6.is_empty() {
            return to(L3Cast::None);
        }
        let all_nodes = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0, 1);
        if dest.is_multicast() {
            if dest == all_nodes || self.ipv6_mc.contains(&dest) {
                to(L3Cast::Multicast)
            } else {
                Verdict::Drop("multicast group not registered")
            }
        } else if self.ipv6.contains(&dest) {
            to(L3Cast::Unicast)
        } else {
            Verdict::Drop("not our IPv6 address")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_to(dest: [u8; 6]) -> Vec<u8> {
        let mut f = dest.to_vec();
        f.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x99, 0x08, 0x00]);
        f.resize(60, 0);
        f
    }

    fn ipv4_to(dest: [u8; 4]) -> Vec<u8> {
        let mut p = vec![0u8; 28];
        p[0] = 0x45;
        p[16..20].copy_from_slice(&dest);
        p
    }

    fn ipv6_to(dest: Ipv6Addr) -> Vec<u8> {
        let mut p = vec![0u8; 48];
        p[0] = 0x60;
        p[24..40].copy_from_slice(&dest.octets());
        p
    }

    fn l2_state() -> GroupState {
        let mut st = GroupState::new(None, None);
        st.layer = Some(Layer::Layer2);
        st
    }

    fn l3_state() -> GroupState {
        let mut st = GroupState::new(None, None);
        st.layer = Some(Layer::Layer3);
        st
    }

    #[test]
    fn test_l2_unicast_needs_registration() {
        let mut st = l2_state();
        let own = MacAddr::new([0x02, 0, 0, 0, 0, 0x01]);
        let f = InboundFilter::from_state(&st);
        assert!(matches!(f.classify(&frame_to(own.0)), Verdict::Drop(_)));

        st.tables.vmac.register(own, ());
        let f = InboundFilter::from_state(&st);
        assert_eq!(f.classify(&frame_to(own.0)), Verdict::Layer2(L2Cast::Unicast));
    }

    #[test]
    fn test_l2_broadcast_and_multicast() {
        let mut st = l2_state();
        let group = MacAddr::new([0x01, 0x00, 0x5E, 0, 0, 0xFB]);
        let f = InboundFilter::from_state(&st);
        assert_eq!(f.classify(&frame_to([0xFF; 6])), Verdict::Layer2(L2Cast::Broadcast));
        assert!(matches!(f.classify(&frame_to(group.0)), Verdict::Drop(_)));

        st.tables.gmac.register(group, ());
        let f = InboundFilter::from_state(&st);
        assert_eq!(f.classify(&frame_to(group.0)), Verdict::Layer2(L2Cast::Multicast));
    }

    #[test]
    fn test_l2_promiscuous_accepts_all() {
        let mut st = l2_state();
        st.promisc = true;
        let f = InboundFilter::from_state(&st);
        assert_eq!(f.classify(&frame_to([0x02, 1, 2, 3, 4, 5])), Verdict::Layer2(L2Cast::Unicast));
        assert!(matches!(f.classify(&[0u8; 10]), Verdict::Drop(_)));
    }

    #[test]
    fn test_l3_empty_table_is_cast_none() {
        let f = InboundFilter::from_state(&l3_state());
        assert!(matches!(
            f.classify(&ipv4_to([192, 168, 1, 1])),
            Verdict::Layer3 { cast: L3Cast::None, .. }
        ));
    }

    #[test]
    fn test_l3_v4_casts() {
        let mut st = l3_state();
        st.tables.ipv4.register(Ipv4Addr::new(10, 1, 0, 5), Ipv4Addr::new(255, 255, 0, 0));
        st.tables.ipv4_mc.register(Ipv4Addr::new(224, 0, 0, 251), ());
        let f = InboundFilter::from_state(&st);

        let cast = |d| match f.classify(&ipv4_to(d)) {
            Verdict::Layer3 { cast, .. } => Some(cast),
            _ => None,
        };
        assert_eq!(cast([10, 1, 0, 5]), Some(L3Cast::Unicast));
        assert_eq!(cast([10, 1, 255, 255]), Some(L3Cast::Broadcast));
        assert_eq!(cast([255, 255, 255, 255]), Some(L3Cast::Broadcast));
        assert_eq!(cast([224, 0, 0, 251]), Some(L3Cast::Multicast));
        assert_eq!(cast([224, 0, 0, 252]), None);
        assert_eq!(cast([10, 1, 0, 6]), None);
    }

    #[test]
    fn test_l3_v6_casts() {
        let mut st = l3_state();
        let own: Ipv6Addr = "fd00::5".parse().unwrap();
        st.tables.ipv6.register(own, "ffff:ffff:ffff:ffff::".parse().unwrap());
        let f = InboundFilter::from_state(&st);

        assert!(matches!(f.classify(&ipv6_to(own)), Verdict::Layer3 { cast: L3Cast::Unicast, .. }));
        assert!(matches!(
            f.classify(&ipv6_to("ff02::1".parse().unwrap())),
            Verdict::Layer3 { cast: L3Cast::Multicast, .. }
        ));
        assert!(matches!(f.classify(&ipv6_to("ff02::1:ff00:5".parse().unwrap())), Verdict::Drop(_)));
        assert!(matches!(f.classify(&ipv6_to("fd00::6".parse().unwrap())), Verdict::Drop(_)));
    }

    #[test]
    fn test_closed_filter_drops() {
        assert!(matches!(InboundFilter::closed().classify(&ipv4_to([1, 2, 3, 4])), Verdict::Drop(_)));
    }
}
