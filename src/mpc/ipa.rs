//! IP Assist header and command constants

use bitflags::bitflags;

use super::cursor::{ByteView, ByteWriter};
use super::{CodecError, IPA_HDR_LEN};

/// IPA header (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpaHeader {
    pub command: u8,
    pub initiator: u8,
    pub seq: u16,
    pub rc: u16,
    pub adapter_type: u8,
    pub rel_adapter: u8,
    pub prim_version: u8,
    pub param_count: u8,
    pub prot_version: u16,
    pub supported: u32,
    pub enabled: u32,
}

impl IpaHeader {
    pub fn decode(view: &ByteView<'_>) -> Result<Self, CodecError> {
        view.slice(0, IPA_HDR_LEN)?;
        Ok(Self {
            command: view.u8_at(0x00)?,
            initiator: view.u8_at(0x01)?,
            seq: view.u16_at(0x02)?,
            rc: view.u16_at(0x04)?,
            adapter_type: view.u8_at(0x06)?,
            rel_adapter: view.u8_at(0x07)?,
            prim_version: view.u8_at(0x08)?,
            param_count: view.u8_at(0x09)?,
            prot_version: view.u16_at(0x0A)?,
            supported: view.u32_at(0x0C)?,
            enabled: view.u32_at(0x10)?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.command)
            .put_u8(self.initiator)
            .put_u16(self.seq)
            .put_u16(self.rc)
            .put_u8(self.adapter_type)
            .put_u8(self.rel_adapter)
            .put_u8(self.prim_version)
            .put_u8(self.param_count)
            .put_u16(self.prot_version)
            .put_u32(self.supported)
            .put_u32(self.enabled);
    }

    /// Patch the return code of an encoded command in place
    pub fn set_rc(buf: &mut [u8], rc: u16) {
        if let Some(field) = buf.get_mut(0x04..0x06) {
            field.copy_from_slice(&rc.to_be_bytes());
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.prot_version == PROT_IPV6
    }
}

pub const PROT_IPV4: u16 = 4;
pub const PROT_IPV6: u16 = 6;

/// Initiator byte
pub mod initiator {
    pub const HOST: u8 = 0x00;
    pub const OSA: u8 = 0x01;
    pub const HOST_REPLY: u8 = 0x02;
}

/// IPA command codes
pub mod cmd {
    pub const STARTLAN: u8 = 0x01;
    pub const STOPLAN: u8 = 0x02;
    pub const SETVMAC: u8 = 0x21;
    pub const DELVMAC: u8 = 0x22;
    pub const SETGMAC: u8 = 0x23;
    pub const DELGMAC: u8 = 0x24;
    pub const SETVLAN: u8 = 0x25;
    pub const DELVLAN: u8 = 0x26;
    pub const SETIP: u8 = 0xB1;
    pub const QIPASSIST: u8 = 0xB2;
    pub const SETASSPARMS: u8 = 0xB3;
    pub const SETIPM: u8 = 0xB4;
    pub const DELIPM: u8 = 0xB5;
    pub const SETRTG: u8 = 0xB6;
    pub const DELIP: u8 = 0xB7;
    pub const SETADAPTERPARMS: u8 = 0xB8;
    pub const SET_DIAG_ASS: u8 = 0xB9;
    pub const CREATE_ADDR: u8 = 0xC3;
    pub const DESTROY_ADDR: u8 = 0xC4;

    pub fn name(code: u8) -> &'static str {
        match code {
            STARTLAN => "STARTLAN",
            STOPLAN => "STOPLAN",
            SETVMAC => "SETVMAC",
            DELVMAC => "DELVMAC",
            SETGMAC => "SETGMAC",
            DELGMAC => "DELGMAC",
            SETVLAN => "SETVLAN",
            DELVLAN => "DELVLAN",
            SETIP => "SETIP",
            QIPASSIST => "QIPASSIST",
            SETASSPARMS => "SETASSPARMS",
            SETIPM => "SETIPM",
            DELIPM => "DELIPM",
            SETRTG => "SETRTG",
            DELIP => "DELIP",
            SETADAPTERPARMS => "SETADAPTERPARMS",
            SET_DIAG_ASS => "SET_DIAG_ASS",
            CREATE_ADDR => "CREATE_ADDR",
            DESTROY_ADDR => "DESTROY_ADDR",
            _ => "UNKNOWN",
        }
    }
}

/// IPA return codes
pub mod ipa_rc {
    pub const SUCCESS: u16 = 0x0000;
    pub const NOTSUPP: u16 = 0x0001;
    pub const INVALID_FORMAT: u16 = 0x0006;
    pub const INVALID_IP_VERSION: u16 = 0x0020;
    pub const L2_UNSUPPORTED_CMD: u16 = 0x2003;
    pub const L2_DUP_MAC: u16 = 0x2005;
    pub const L2_ADDR_TABLE_FULL: u16 = 0x2006;
    pub const L2_GMAC_NOT_FOUND: u16 = 0x200B;
    pub const L2_MAC_NOT_FOUND: u16 = 0x2010;
    pub const DUPLICATE_IP_ADDRESS: u16 = 0xE005;
    pub const IP_TABLE_FULL: u16 = 0xE006;
    pub const IP_ADDR_NOT_DEFINED: u16 = 0xE00C;
    pub const UNSUPPORTED_SUBCMD: u16 = 0xE00E;
    pub const LAN_OFFLINE: u16 = 0xE080;
}

bitflags! {
    /// IP assist bits carried in the supported/enabled masks
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IpaAssists: u32 {
        const ARP_PROCESSING = 0x0000_0001;
        const INBOUND_CHECKSUM = 0x0000_0002;
        const OUTBOUND_CHECKSUM = 0x0000_0004;
        const FILTERING = 0x0000_0010;
        const IPV6 = 0x0000_0020;
        const MULTICASTING = 0x0000_0040;
        const SETADAPTERPARMS = 0x0000_0400;
        const SOURCE_MAC = 0x0001_0000;
    }
}

/// SETADAPTERPARMS sub-commands and layout
pub mod setadp {
    /// Sub-header length in front of the command data
    pub const HDR_LEN: usize = 16;

    pub const QUERY_COMMANDS_SUPPORTED: u32 = 0x0000_0001;
    pub const ALTER_MAC_ADDRESS: u32 = 0x0000_0002;
    pub const SET_PROMISC_MODE: u32 = 0x0000_0800;

    /// Everything this adapter answers
    pub const SUPPORTED: u32 = QUERY_COMMANDS_SUPPORTED | ALTER_MAC_ADDRESS | SET_PROMISC_MODE;

    pub const CHANGE_ADDR_READ_MAC: u32 = 0;
    pub const CHANGE_ADDR_REPLACE_MAC: u32 = 1;

    pub const PROMISC_OFF: u32 = 0;
    pub const PROMISC_ON: u32 = 1;

    /// LAN type reported by QUERY_COMMANDS_SUPPORTED
    pub const LAN_TYPE_ETHERNET: u8 = 0x01;
}

/// SETASSPARMS sub-commands and layout
pub mod setass {
    /// assist number (4) + length (2) + command (2) + rc (2)
    pub const HDR_LEN: usize = 10;

    pub const START: u16 = 0x0001;
    pub const STOP: u16 = 0x0002;
    pub const CONFIGURE: u16 = 0x0003;
    pub const ENABLE: u16 = 0x0004;
}
