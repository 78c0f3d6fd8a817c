//! Per-group adapter state
//!
//! Everything the handshake and IPA processor mutate lives in
//! [`GroupState`], guarded by one lock in the group. The queue engine never
//! reads it directly: it works from the published inbound filter.

use crate::mpc::ipa::IpaAssists;
use crate::mpc::th::{build_message, RequestHeader};
use crate::mpc::proto;
use crate::net::{Layer, MacAddr};

use super::tables::AddressTables;

/// Tokens the adapter hands out, fixed per kind
pub mod adapter_token {
    pub const IDX: u32 = 0x0100_0001;
    pub const CM_FILTER: u32 = 0x0100_0002;
    pub const CM_CONNECTION: u32 = 0x0100_0003;
    pub const ULP_FILTER: u32 = 0x0100_0004;
    pub const ULP_CONNECTION: u32 = 0x0100_0005;
}

/// Position of a device inside its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Read,
    Write,
    Data,
}

impl DeviceRole {
    pub fn offset(&self) -> u16 {
        match self {
            DeviceRole::Read => 0,
            DeviceRole::Write => 1,
            DeviceRole::Data => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceRole::Read => "read",
            DeviceRole::Write => "write",
            DeviceRole::Data => "data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmState {
    #[default]
    Idle,
    Enabled,
    SetupDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UlpState {
    #[default]
    Idle,
    Enabled,
    SetupDone,
    Active,
}

/// Tokens captured from the guest during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerTokens {
    /// Issuer token from IDX ACTIVATE
    pub issuer: u32,
    pub cm_filter: u32,
    pub cm_connection: u32,
    pub ulp_filter: u32,
    pub ulp_connection: u32,
}

/// Response sequence counters
///
/// [`Sequencer::frame`] is the only way responses are built, so the
/// counters advance exactly once per response and never out of order.
#[derive(Debug, Default)]
pub struct Sequencer {
    th_seq: u32,
    rrh_seq: u32,
}

impl Sequencer {
    /// Frame `payload` as a single-RRH response acknowledging `ack`
    pub fn frame(&mut self, rrh_type: u8, proto: u8, ack: u32, token: u32, payload: &[u8]) -> Vec<u8> {
        self.th_seq = self.th_seq.wrapping_add(1);
        self.rrh_seq = self.rrh_seq.wrapping_add(1);
        let rrh = RequestHeader {
            rrh_type,
            proto,
            seq: self.rrh_seq,
            ack,
            token,
            ..Default::default()
        };
        build_message(self.th_seq, &rrh, payload)
    }

    pub fn th_seq(&self) -> u32 {
        self.th_seq
    }

    pub fn rrh_seq(&self) -> u32 {
        self.rrh_seq
    }
}

/// Handshake, addressing and link state of one group
#[derive(Debug)]
pub struct GroupState {
    pub idx_read: bool,
    pub idx_write: bool,
    pub cm: CmState,
    pub ulp: UlpState,
    pub layer: Option<Layer>,
    pub tokens: PeerTokens,
    pub seq: Sequencer,
    pub tables: AddressTables,
    /// Adapter MAC as reported to the guest
    pub mac: MacAddr,
    pub mtu: u32,
    pub lan_up: bool,
    pub promisc: bool,
    pub enabled_v4: IpaAssists,
    pub enabled_v6: IpaAssists,
}

impl GroupState {
    pub fn new(mac: Option<MacAddr>, mtu: Option<u32>) -> Self {
        Self {
            idx_read: false,
            idx_write: false,
            cm: CmState::Idle,
            ulp: UlpState::Idle,
            layer: None,
            tokens: PeerTokens::default(),
            seq: Sequencer::default(),
            tables: AddressTables::new(),
            mac: mac.unwrap_or(MacAddr::ZERO),
            mtu: mtu.unwrap_or(0),
            lan_up: false,
            promisc: false,
            enabled_v4: IpaAssists::empty(),
            enabled_v6: IpaAssists::empty(),
        }
    }

    pub fn idx_active(&self, role: DeviceRole) -> bool {
        match role {
            DeviceRole::Read => self.idx_read,
            DeviceRole::Write => self.idx_write,
            DeviceRole::Data => false,
        }
    }

    pub fn set_idx_active(&mut self, role: DeviceRole, active: bool) {
        match role {
            DeviceRole::Read => self.idx_read = active,
            DeviceRole::Write => self.idx_write = active,
            DeviceRole::Data => {}
        }
    }

    /// RRH protocol byte for the negotiated layer
    pub fn proto(&self) -> u8 {
        match self.layer {
            Some(Layer::Layer2) => proto::L2,
            Some(Layer::Layer3) => proto::L3,
            None => proto::UNSPECIFIED,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ulp == UlpState::Active
    }

    /// Assists advertised for the current layer
    pub fn supported_assists(&self) -> IpaAssists {
        match self.layer {
            Some(Layer::Layer3) => {
                IpaAssists::ARP_PROCESSING
                    | IpaAssists::IPV6
                    | IpaAssists::MULTICASTING
                    | IpaAssists::SETADAPTERPARMS
            }
            _ => IpaAssists::SETADAPTERPARMS,
        }
    }

    pub fn enabled_assists(&self, ipv6: bool) -> IpaAssists {
        if ipv6 {
            self.enabled_v6
        } else {
            self.enabled_v4
        }
    }

    pub fn enabled_assists_mut(&mut self, ipv6: bool) -> &mut IpaAssists {
        if ipv6 {
            &mut self.enabled_v6
        } else {
            &mut self.enabled_v4
        }
    }

    /// Forget all registered addresses and negotiated assists
    pub fn reset_addressing(&mut self) {
        self.tables = AddressTables::new();
        self.promisc = false;
        self.enabled_v4 = IpaAssists::empty();
        self.enabled_v6 = IpaAssists::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::{rrh_type, MpcMessage};

    #[test]
    fn test_sequencer_monotonic() {
        let mut seq = Sequencer::default();
        let a = seq.frame(rrh_type::CM, proto::UNSPECIFIED, 5, 0x11, &[1, 2]);
        let b = seq.frame(rrh_type::CM, proto::UNSPECIFIED, 9, 0x22, &[3]);

        let ma = MpcMessage::parse(&a).unwrap();
        let mb = MpcMessage::parse(&b).unwrap();
        assert!(mb.th.seq > ma.th.seq);
        let ra = ma.first_request().unwrap().header;
        let rb = mb.first_request().unwrap().header;
        assert_eq!((ra.seq, ra.ack, ra.token), (1, 5, 0x11));
        assert_eq!((rb.seq, rb.ack, rb.token), (2, 9, 0x22));
        assert_eq!(seq.rrh_seq(), 2);
    }

    #[test]
    fn test_assists_per_layer() {
        let mut st = GroupState::new(None, None);
        assert_eq!(st.proto(), proto::UNSPECIFIED);
        st.layer = Some(Layer::Layer2);
        assert_eq!(st.supported_assists(), IpaAssists::SETADAPTERPARMS);
        st.layer = Some(Layer::Layer3);
        assert!(st.supported_assists().contains(IpaAssists::IPV6 | IpaAssists::ARP_PROCESSING));
        assert_eq!(st.proto(), proto::L3);
    }

    #[test]
    fn test_idx_flags_per_role() {
        let mut st = GroupState::new(None, None);
        st.set_idx_active(DeviceRole::Write, true);
        assert!(st.idx_active(DeviceRole::Write));
        assert!(!st.idx_active(DeviceRole::Read));
        st.set_idx_active(DeviceRole::Data, true);
        assert!(!st.idx_active(DeviceRole::Data));
    }
}
