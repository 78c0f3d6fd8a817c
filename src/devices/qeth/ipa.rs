//! IP Assist command processing
//!
//! The reply is the request with its header rewritten: return code and the
//! assist masks for the request's protocol version are filled in, any
//! command-specific reply data is written into the copy.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::host::HostInterface;
use crate::mpc::cursor::ByteView;
use crate::mpc::ipa::{cmd, ipa_rc, setadp, setass, IpaAssists, PROT_IPV4, PROT_IPV6};
use crate::mpc::{ByteWriter, CodecError, IpaHeader, IPA_HDR_LEN};
use crate::net::{Layer, MacAddr};

use super::state::GroupState;
use super::tables::{RegisterOutcome, UnregisterOutcome};

/// MAC command data: u32 length + 6-byte address
const MAC_DATA_LEN: usize = 10;
/// SETIPM/DELIPM data: MAC, 2 pad bytes, 16-byte address
const IPM_DATA_LEN: usize = 24;
/// QUERY_COMMANDS_SUPPORTED reply body
const QUERY_REPLY_LEN: usize = 20;
/// ALTER_MAC_ADDRESS body: cmd, addr size, count, address
const CHANGE_ADDR_LEN: usize = 18;

#[derive(Debug)]
pub struct IpaReply {
    pub data: Vec<u8>,
    /// Registered addresses or promiscuous mode changed
    pub republish: bool,
}

pub fn process(
    tag: &str,
    state: &mut GroupState,
    host: Option<&dyn HostInterface>,
    request: &[u8],
) -> Result<IpaReply, CodecError> {
    let hdr = IpaHeader::decode(&ByteView::new(request))?;
    let mut buf = request.to_vec();
    let mut ipa = Ipa { tag, state, host, hdr, republish: false };
    let rc = ipa.dispatch(&mut buf);

    let v6 = hdr.is_ipv6();
    let reply = IpaHeader {
        rc,
        supported: ipa.state.supported_assists().bits(),
        enabled: ipa.state.enabled_assists(v6).bits(),
        ..hdr
    };
    let mut w = ByteWriter::with_capacity(IPA_HDR_LEN);
    reply.encode(&mut w);
    buf[..IPA_HDR_LEN].copy_from_slice(&w.into_vec());

    if rc == ipa_rc::SUCCESS {
        log::debug!("{} IPA {} ok", tag, cmd::name(hdr.command));
    } else {
        log::debug!("{} IPA {} rc {:#06x}", tag, cmd::name(hdr.command), rc);
    }
    Ok(IpaReply { data: buf, republish: ipa.republish })
}

fn l2_only(c: u8) -> bool {
    matches!(c, cmd::SETVMAC | cmd::DELVMAC | cmd::SETGMAC | cmd::DELGMAC | cmd::SETVLAN | cmd::DELVLAN)
}

fn l3_only(c: u8) -> bool {
    matches!(c, cmd::SETIP | cmd::DELIP | cmd::SETIPM | cmd::DELIPM | cmd::SETRTG | cmd::CREATE_ADDR)
}

fn register_rc(outcome: RegisterOutcome, dup: u16, full: u16) -> u16 {
    match outcome {
        RegisterOutcome::Added => ipa_rc::SUCCESS,
        RegisterOutcome::AlreadyPresent => dup,
        RegisterOutcome::TableFull => full,
    }
}

fn unregister_rc(outcome: UnregisterOutcome, missing: u16) -> u16 {
    match outcome {
        UnregisterOutcome::Removed => ipa_rc::SUCCESS,
        UnregisterOutcome::NotFound => missing,
    }
}

enum IpFamily {
    V4,
    V6,
}

struct Ipa<'a> {
    tag: &'a str,
    state: &'a mut GroupState,
    host: Option<&'a dyn HostInterface>,
    hdr: IpaHeader,
    republish: bool,
}

impl Ipa<'_> {
    fn dispatch(&mut self, buf: &mut Vec<u8>) -> u16 {
        let c = self.hdr.command;
        match self.state.layer {
            Some(Layer::Layer3) if l2_only(c) => return ipa_rc::L2_UNSUPPORTED_CMD,
            Some(Layer::Layer2) if l3_only(c) => return ipa_rc::NOTSUPP,
            _ => {}
        }

        let data = &buf[IPA_HDR_LEN..];
        match c {
            cmd::STARTLAN => self.start_lan(),
            cmd::STOPLAN => self.stop_lan(),
            cmd::SETVMAC | cmd::DELVMAC | cmd::SETGMAC | cmd::DELGMAC => self.mac_command(c, data),
            cmd::SETIP | cmd::DELIP => self.ip_command(c, data),
            cmd::SETIPM | cmd::DELIPM => self.ipm_command(c, data),
            cmd::SETASSPARMS => self.set_assist_parms(buf),
            cmd::SETADAPTERPARMS => self.set_adapter_parms(buf),
            cmd::CREATE_ADDR => {
                write_at(buf, IPA_HDR_LEN, &self.state.mac.interface_id());
                ipa_rc::SUCCESS
            }
            cmd::QIPASSIST | cmd::SET_DIAG_ASS | cmd::SETRTG | cmd::SETVLAN | cmd::DELVLAN | cmd::DESTROY_ADDR => {
                ipa_rc::SUCCESS
            }
            other => {
                log::debug!("{} IPA command {:#04x} not supported", self.tag, other);
                ipa_rc::NOTSUPP
            }
        }
    }

    fn start_lan(&mut self) -> u16 {
        let Some(host) = self.host else {
            return ipa_rc::LAN_OFFLINE;
        };
        match host.set_enabled(true) {
            Ok(()) => {
                self.state.lan_up = true;
                log::info!("{} LAN started on {}", self.tag, host.name());
                ipa_rc::SUCCESS
            }
            Err(e) => {
                log::warn!("{} cannot bring {} up: {}", self.tag, host.name(), e);
                ipa_rc::LAN_OFFLINE
            }
        }
    }

    fn stop_lan(&mut self) -> u16 {
        if let Some(host) = self.host {
            if let Err(e) = host.set_enabled(false) {
                log::warn!("{} cannot bring {} down: {}", self.tag, host.name(), e);
            }
            log::info!("{} LAN stopped on {}", self.tag, host.name());
        }
        self.state.lan_up = false;
        ipa_rc::SUCCESS
    }

    fn mac_command(&mut self, c: u8, data: &[u8]) -> u16 {
        let Some(mac) = data.get(4..MAC_DATA_LEN).and_then(MacAddr::from_slice) else {
            return ipa_rc::INVALID_FORMAT;
        };
        let t = &mut self.state.tables;
        let rc = match c {
            cmd::SETVMAC => register_rc(t.vmac.register(mac, ()), ipa_rc::L2_DUP_MAC, ipa_rc::L2_ADDR_TABLE_FULL),
            cmd::DELVMAC => unregister_rc(t.vmac.unregister(&mac), ipa_rc::L2_MAC_NOT_FOUND),
            cmd::SETGMAC => register_rc(t.gmac.register(mac, ()), ipa_rc::L2_DUP_MAC, ipa_rc::L2_ADDR_TABLE_FULL),
            _ => unregister_rc(t.gmac.unregister(&mac), ipa_rc::L2_GMAC_NOT_FOUND),
        };
        if rc == ipa_rc::SUCCESS {
            self.republish = true;
        }
        log::debug!("{} {} {} -> {:#06x}", self.tag, cmd::name(c), mac, rc);
        rc
    }

    fn family(&self) -> Option<IpFamily> {
        match self.hdr.prot_version {
            PROT_IPV4 => Some(IpFamily::V4),
            PROT_IPV6 => Some(IpFamily::V6),
            _ => None,
        }
    }

    fn ip_command(&mut self, c: u8, data: &[u8]) -> u16 {
        let v = ByteView::new(data);
        let family = self.family();
        let t = &mut self.state.tables;
        let rc = match family {
            Some(IpFamily::V4) => {
                let (Ok(a), Ok(m)) = (v.array_at::<4>(0), v.array_at::<4>(4)) else {
                    return ipa_rc::INVALID_FORMAT;
                };
                let (addr, mask) = (Ipv4Addr::from(a), Ipv4Addr::from(m));
                if c == cmd::SETIP {
                    register_rc(t.ipv4.register(addr, mask), ipa_rc::DUPLICATE_IP_ADDRESS, ipa_rc::IP_TABLE_FULL)
                } else {
                    unregister_rc(t.ipv4.unregister(&addr), ipa_rc::IP_ADDR_NOT_DEFINED)
                }
            }
            Some(IpFamily::V6) => {
                let (Ok(a), Ok(m)) = (v.array_at::<16>(0), v.array_at::<16>(16)) else {
                    return ipa_rc::INVALID_FORMAT;
                };
                let (addr, mask) = (Ipv6Addr::from(a), Ipv6Addr::from(m));
                if c == cmd::SETIP {
                    register_rc(t.ipv6.register(addr, mask), ipa_rc::DUPLICATE_IP_ADDRESS, ipa_rc::IP_TABLE_FULL)
                } else {
                    unregister_rc(t.ipv6.unregister(&addr), ipa_rc::IP_ADDR_NOT_DEFINED)
                }
            }
            None => ipa_rc::INVALID_IP_VERSION,
        };
        if rc == ipa_rc::SUCCESS {
            self.republish = true;
        }
        rc
    }

    fn ipm_command(&mut self, c: u8, data: &[u8]) -> u16 {
        if data.len() < IPM_DATA_LEN {
            return ipa_rc::INVALID_FORMAT;
        }
        let ip = &data[8..IPM_DATA_LEN];
        let family = self.family();
        let t = &mut self.state.tables;
        let set = c == cmd::SETIPM;
        let rc = match family {
            Some(IpFamily::V4) => {
                let addr = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
                if set {
                    register_rc(t.ipv4_mc.register(addr, ()), ipa_rc::DUPLICATE_IP_ADDRESS, ipa_rc::IP_TABLE_FULL)
                } else {
                    unregister_rc(t.ipv4_mc.unregister(&addr), ipa_rc::IP_ADDR_NOT_DEFINED)
                }
            }
            Some(IpFamily::V6) => {
                let mut a = [0u8; 16];
                a.copy_from_slice(ip);
                let addr = Ipv6Addr::from(a);
                if set {
                    register_rc(t.ipv6_mc.register(addr, ()), ipa_rc::DUPLICATE_IP_ADDRESS, ipa_rc::IP_TABLE_FULL)
                } else {
                    unregister_rc(t.ipv6_mc.unregister(&addr), ipa_rc::IP_ADDR_NOT_DEFINED)
                }
            }
            None => ipa_rc::INVALID_IP_VERSION,
        };
        if rc == ipa_rc::SUCCESS {
            self.republish = true;
        }
        rc
    }

    fn set_assist_parms(&mut self, buf: &mut Vec<u8>) -> u16 {
        let v = ByteView::new(&buf[IPA_HDR_LEN..]);
        let (Ok(assist_no), Ok(sub)) = (v.u32_at(0), v.u16_at(6)) else {
            return ipa_rc::INVALID_FORMAT;
        };
        if buf.len() < IPA_HDR_LEN + setass::HDR_LEN {
            return ipa_rc::INVALID_FORMAT;
        }
        let assist = IpaAssists::from_bits_truncate(assist_no);
        let v6 = self.hdr.is_ipv6();

        let rc = if assist.is_empty() || !self.state.supported_assists().contains(assist) {
            ipa_rc::NOTSUPP
        } else {
            match sub {
                setass::START => {
                    self.state.enabled_assists_mut(v6).insert(assist);
                    ipa_rc::SUCCESS
                }
                setass::STOP => {
                    self.state.enabled_assists_mut(v6).remove(assist);
                    ipa_rc::SUCCESS
                }
                setass::CONFIGURE | setass::ENABLE => ipa_rc::SUCCESS,
                _ => ipa_rc::UNSUPPORTED_SUBCMD,
            }
        };
        log::debug!("{} SETASSPARMS {:?} sub {:#06x} -> {:#06x}", self.tag, assist, sub, rc);
        write_at(buf, IPA_HDR_LEN + 8, &rc.to_be_bytes());
        rc
    }

    fn set_adapter_parms(&mut self, buf: &mut Vec<u8>) -> u16 {
        let base = IPA_HDR_LEN;
        let body = base + setadp::HDR_LEN;
        let Ok(code) = ByteView::new(&buf[base..]).u32_at(4) else {
            return ipa_rc::INVALID_FORMAT;
        };

        let rc = match code {
            setadp::QUERY_COMMANDS_SUPPORTED => {
                let mut w = ByteWriter::with_capacity(QUERY_REPLY_LEN);
                w.put_u32(1).put_u8(setadp::LAN_TYPE_ETHERNET).put_zeros(3).put_u32(setadp::SUPPORTED).put_zeros(8);
                write_at(buf, body, &w.into_vec());
                ipa_rc::SUCCESS
            }
            setadp::ALTER_MAC_ADDRESS => self.alter_mac(buf, body),
            setadp::SET_PROMISC_MODE => match ByteView::new(&buf[base..]).u32_at(setadp::HDR_LEN) {
                Ok(mode) => {
                    self.state.promisc = mode == setadp::PROMISC_ON;
                    self.republish = true;
                    log::info!("{} promiscuous mode {}", self.tag, if self.state.promisc { "on" } else { "off" });
                    ipa_rc::SUCCESS
                }
                Err(_) => ipa_rc::INVALID_FORMAT,
            },
            _ => ipa_rc::UNSUPPORTED_SUBCMD,
        };
        write_at(buf, base + 8, &rc.to_be_bytes());
        rc
    }

    fn alter_mac(&mut self, buf: &mut Vec<u8>, body: usize) -> u16 {
        let Ok(sub) = ByteView::new(&buf[body.min(buf.len())..]).u32_at(0) else {
            return ipa_rc::INVALID_FORMAT;
        };
        match sub {
            setadp::CHANGE_ADDR_READ_MAC => {
                let mut w = ByteWriter::with_capacity(CHANGE_ADDR_LEN);
                w.put_u32(sub).put_u32(6).put_u32(1).put_bytes(self.state.mac.as_bytes());
                write_at(buf, body, &w.into_vec());
                ipa_rc::SUCCESS
            }
            setadp::CHANGE_ADDR_REPLACE_MAC => {
                let Some(mac) = buf.get(body + 12..body + CHANGE_ADDR_LEN).and_then(MacAddr::from_slice) else {
                    return ipa_rc::INVALID_FORMAT;
                };
                if !mac.is_unicast() || mac.is_zero() {
                    return ipa_rc::INVALID_FORMAT;
                }
                self.state.mac = mac;
                if let (Some(host), Some(Layer::Layer2)) = (self.host, self.state.layer) {
                    if let Err(e) = host.set_hw_addr(mac) {
                        log::warn!("{} cannot set {} address: {}", self.tag, host.name(), e);
                    }
                }
                log::info!("{} adapter MAC now {}", self.tag, mac);
                ipa_rc::SUCCESS
            }
            _ => ipa_rc::UNSUPPORTED_SUBCMD,
        }
    }
}

/// Write reply data at `off`, growing the reply if the request was short
fn write_at(buf: &mut Vec<u8>, off: usize, data: &[u8]) {
    let end = off + data.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[off..end].copy_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::qeth::tables::MAC_TABLE_SIZE;
    use crate::host::MemoryInterface;
    use crate::mpc::ipa::initiator;

    fn state(layer: Layer) -> GroupState {
        let mut st = GroupState::new(Some(MacAddr::new([0x02, 0, 0, 0, 0, 0x0A])), Some(1500));
        st.layer = Some(layer);
        st
    }

    fn request(command: u8, prot: u16, data: &[u8]) -> Vec<u8> {
        let hdr = IpaHeader { command, initiator: initiator::HOST, seq: 1, prot_version: prot, ..Default::default() };
        let mut w = ByteWriter::new();
        hdr.encode(&mut w);
        w.put_bytes(data);
        w.into_vec()
    }

    fn mac_data(mac: [u8; 6]) -> Vec<u8> {
        let mut d = vec![0, 0, 0, 6];
        d.extend_from_slice(&mac);
        d
    }

    fn rc_of(reply: &IpaReply) -> u16 {
        IpaHeader::decode(&ByteView::new(&reply.data)).unwrap().rc
    }

    fn run(st: &mut GroupState, req: &[u8]) -> IpaReply {
        process("[QETH TEST]", st, None, req).unwrap()
    }

    #[test]
    fn test_vmac_register_rules() {
        let mut st = state(Layer::Layer2);
        let req = request(cmd::SETVMAC, PROT_IPV4, &mac_data([0x02, 1, 2, 3, 4, 5]));
        let first = run(&mut st, &req);
        assert_eq!(rc_of(&first), ipa_rc::SUCCESS);
        assert!(first.republish);
        assert_eq!(rc_of(&run(&mut st, &req)), ipa_rc::L2_DUP_MAC);
        assert_eq!(st.tables.vmac.len(), 1);

        let del = request(cmd::DELVMAC, PROT_IPV4, &mac_data([0x02, 1, 2, 3, 4, 5]));
        assert_eq!(rc_of(&run(&mut st, &del)), ipa_rc::SUCCESS);
        assert_eq!(rc_of(&run(&mut st, &del)), ipa_rc::L2_MAC_NOT_FOUND);
    }

    #[test]
    fn test_vmac_table_full() {
        let mut st = state(Layer::Layer2);
        for i in 0..MAC_TABLE_SIZE {
            let req = request(cmd::SETVMAC, PROT_IPV4, &mac_data([0x02, 0, 0, 0, 1, i as u8]));
            assert_eq!(rc_of(&run(&mut st, &req)), ipa_rc::SUCCESS);
        }
        let req = request(cmd::SETVMAC, PROT_IPV4, &mac_data([0x02, 0, 0, 0, 2, 0]));
        assert_eq!(rc_of(&run(&mut st, &req)), ipa_rc::L2_ADDR_TABLE_FULL);
        assert_eq!(st.tables.vmac.len(), MAC_TABLE_SIZE);
    }

    #[test]
    fn test_layer_checks() {
        let mut l3 = state(Layer::Layer3);
        let req = request(cmd::SETVMAC, PROT_IPV4, &mac_data([0x02, 1, 2, 3, 4, 5]));
        assert_eq!(rc_of(&run(&mut l3, &req)), ipa_rc::L2_UNSUPPORTED_CMD);

        let mut l2 = state(Layer::Layer2);
        let req = request(cmd::SETIP, PROT_IPV4, &[10, 0, 0, 1, 255, 255, 255, 0, 0, 0, 0, 0]);
        assert_eq!(rc_of(&run(&mut l2, &req)), ipa_rc::NOTSUPP);
    }

    #[test]
    fn test_setip_v4_and_v6() {
        let mut st = state(Layer::Layer3);
        let v4 = request(cmd::SETIP, PROT_IPV4, &[10, 0, 0, 1, 255, 255, 255, 0, 0, 0, 0, 0]);
        assert_eq!(rc_of(&run(&mut st, &v4)), ipa_rc::SUCCESS);
        assert_eq!(rc_of(&run(&mut st, &v4)), ipa_rc::DUPLICATE_IP_ADDRESS);

        let mut d = "fd00::1".parse::<Ipv6Addr>().unwrap().octets().to_vec();
        d.extend_from_slice(&[0xFF; 8]);
        d.extend_from_slice(&[0; 12]);
        let v6 = request(cmd::SETIP, PROT_IPV6, &d);
        assert_eq!(rc_of(&run(&mut st, &v6)), ipa_rc::SUCCESS);
        assert_eq!(st.tables.ipv6.len(), 1);

        let bad = request(cmd::SETIP, 5, &d);
        assert_eq!(rc_of(&run(&mut st, &bad)), ipa_rc::INVALID_IP_VERSION);

        let del = request(cmd::DELIP, PROT_IPV4, &[10, 0, 0, 9, 255, 255, 255, 0]);
        assert_eq!(rc_of(&run(&mut st, &del)), ipa_rc::IP_ADDR_NOT_DEFINED);
    }

    #[test]
    fn test_setipm_v4() {
        let mut st = state(Layer::Layer3);
        let mut d = vec![0x01, 0x00, 0x5E, 0, 0, 0xFB, 0, 0];
        d.extend_from_slice(&[0; 12]);
        d.extend_from_slice(&[224, 0, 0, 251]);
        let req = request(cmd::SETIPM, PROT_IPV4, &d);
        assert_eq!(rc_of(&run(&mut st, &req)), ipa_rc::SUCCESS);
        assert!(st.tables.ipv4_mc.contains(&Ipv4Addr::new(224, 0, 0, 251)));
        let del = request(cmd::DELIPM, PROT_IPV4, &d);
        assert_eq!(rc_of(&run(&mut st, &del)), ipa_rc::SUCCESS);
        assert_eq!(rc_of(&run(&mut st, &del)), ipa_rc::IP_ADDR_NOT_DEFINED);
    }

    #[test]
    fn test_setassparms_start_stop() {
        let mut st = state(Layer::Layer3);
        let mut d = IpaAssists::IPV6.bits().to_be_bytes().to_vec();
        d.extend_from_slice(&[0, 10]);
        d.extend_from_slice(&setass::START.to_be_bytes());
        d.extend_from_slice(&[0, 0]);
        let reply = run(&mut st, &request(cmd::SETASSPARMS, PROT_IPV6, &d));
        let hdr = IpaHeader::decode(&ByteView::new(&reply.data)).unwrap();
        assert_eq!(hdr.rc, ipa_rc::SUCCESS);
        assert_eq!(hdr.enabled & IpaAssists::IPV6.bits(), IpaAssists::IPV6.bits());
        assert!(st.enabled_v4.is_empty());

        d[6..8].copy_from_slice(&0x0099u16.to_be_bytes());
        let reply = run(&mut st, &request(cmd::SETASSPARMS, PROT_IPV6, &d));
        assert_eq!(rc_of(&reply), ipa_rc::UNSUPPORTED_SUBCMD);
        assert_eq!(&reply.data[IPA_HDR_LEN + 8..IPA_HDR_LEN + 10], &ipa_rc::UNSUPPORTED_SUBCMD.to_be_bytes());

        // Not offered in layer 2
        let mut l2 = state(Layer::Layer2);
        d[6..8].copy_from_slice(&setass::START.to_be_bytes());
        assert_eq!(rc_of(&run(&mut l2, &request(cmd::SETASSPARMS, PROT_IPV6, &d))), ipa_rc::NOTSUPP);
    }

    #[test]
    fn test_setadapterparms() {
        let mut st = state(Layer::Layer2);
        let sub = |code: u32, extra: &[u8]| {
            let mut d = vec![0u8; setadp::HDR_LEN];
            d[4..8].copy_from_slice(&code.to_be_bytes());
            d.extend_from_slice(extra);
            request(cmd::SETADAPTERPARMS, PROT_IPV4, &d)
        };

        let reply = run(&mut st, &sub(setadp::QUERY_COMMANDS_SUPPORTED, &[]));
        assert_eq!(rc_of(&reply), ipa_rc::SUCCESS);
        let body = IPA_HDR_LEN + setadp::HDR_LEN;
        assert_eq!(reply.data[body + 4], setadp::LAN_TYPE_ETHERNET);
        assert_eq!(&reply.data[body + 8..body + 12], &setadp::SUPPORTED.to_be_bytes());

        let reply = run(&mut st, &sub(setadp::ALTER_MAC_ADDRESS, &[0, 0, 0, 0]));
        assert_eq!(&reply.data[body + 12..body + 18], &[0x02, 0, 0, 0, 0, 0x0A]);

        let mut replace = vec![0, 0, 0, 1, 0, 0, 0, 6, 0, 0, 0, 1];
        replace.extend_from_slice(&[0x02, 9, 9, 9, 9, 9]);
        assert_eq!(rc_of(&run(&mut st, &sub(setadp::ALTER_MAC_ADDRESS, &replace))), ipa_rc::SUCCESS);
        assert_eq!(st.mac, MacAddr::new([0x02, 9, 9, 9, 9, 9]));

        let reply = run(&mut st, &sub(setadp::SET_PROMISC_MODE, &setadp::PROMISC_ON.to_be_bytes()));
        assert!(reply.republish);
        assert!(st.promisc);

        let reply = run(&mut st, &sub(0x4000, &[]));
        assert_eq!(rc_of(&reply), ipa_rc::UNSUPPORTED_SUBCMD);
        assert_eq!(&reply.data[IPA_HDR_LEN + 8..IPA_HDR_LEN + 10], &ipa_rc::UNSUPPORTED_SUBCMD.to_be_bytes());
    }

    #[test]
    fn test_lan_start_stop() {
        let host = MemoryInterface::new("t0");
        let mut st = state(Layer::Layer3);
        let req = request(cmd::STARTLAN, PROT_IPV4, &[]);
        assert_eq!(rc_of(&run(&mut st, &req)), ipa_rc::LAN_OFFLINE);

        let reply = process("[QETH TEST]", &mut st, Some(&host as &dyn HostInterface), &req).unwrap();
        assert_eq!(rc_of(&reply), ipa_rc::SUCCESS);
        assert!(host.is_enabled());
        assert!(st.lan_up);

        let reply = process("[QETH TEST]", &mut st, Some(&host as &dyn HostInterface), &request(cmd::STOPLAN, PROT_IPV4, &[])).unwrap();
        assert_eq!(rc_of(&reply), ipa_rc::SUCCESS);
        assert!(!host.is_enabled());
    }

    #[test]
    fn test_reply_keeps_header_fields() {
        let mut st = state(Layer::Layer3);
        let reply = run(&mut st, &request(cmd::QIPASSIST, PROT_IPV4, &[]));
        let hdr = IpaHeader::decode(&ByteView::new(&reply.data)).unwrap();
        assert_eq!(hdr.command, cmd::QIPASSIST);
        assert_eq!(hdr.initiator, initiator::HOST);
        assert_eq!(hdr.seq, 1);
        assert_eq!(hdr.supported, st.supported_assists().bits());

        let reply = run(&mut st, &request(0x77, PROT_IPV4, &[]));
        assert_eq!(rc_of(&reply), ipa_rc::NOTSUPP);

        let reply = run(&mut st, &request(cmd::CREATE_ADDR, PROT_IPV6, &[]));
        assert_eq!(&reply.data[IPA_HDR_LEN..IPA_HDR_LEN + 8], &st.mac.interface_id());
    }
}
