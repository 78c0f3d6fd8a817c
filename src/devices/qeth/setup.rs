//! Fixed data returned by the setup CCWs
//!
//! SENSE ID, READ CONFIGURATION DATA and READ NODE IDENTIFIER describe the
//! adapter as a 1731-01 control unit with 1732-01 devices.

use crate::devices::ccw_op;

/// Control unit type/model, device type/model
const CU_TYPE: u16 = 0x1731;
const CU_MODEL: u8 = 0x01;
const DEV_TYPE: u16 = 0x1732;
const DEV_MODEL: u8 = 0x01;

pub const RCD_LEN: usize = 128;
pub const RNI_LEN: usize = 64;
const NED_LEN: usize = 32;

/// CIW type nibbles
mod ciw {
    pub const RCD: u8 = 0x40;
    pub const SII: u8 = 0x41;
    pub const RNI: u8 = 0x42;
    pub const EQ: u8 = 0x43;
    pub const AQ: u8 = 0x44;
}

/// SENSE ID reply: basic identification followed by the command
/// information words the guest driver looks for
pub fn sense_id() -> Vec<u8> {
    let mut b = vec![0xFF];
    b.extend_from_slice(&CU_TYPE.to_be_bytes());
    b.push(CU_MODEL);
    b.extend_from_slice(&DEV_TYPE.to_be_bytes());
    b.push(DEV_MODEL);
    b.push(0x00);
    for (t, op, count) in [
        (ciw::RCD, ccw_op::READ_CONFIG_DATA, RCD_LEN as u16),
        (ciw::SII, ccw_op::SET_INTERFACE_ID, 4),
        (ciw::RNI, ccw_op::READ_NODE_ID, RNI_LEN as u16),
        (ciw::EQ, ccw_op::ESTABLISH_QUEUES, 0x1000),
        (ciw::AQ, ccw_op::ACTIVATE_QUEUES, 0),
    ] {
        b.push(t);
        b.push(op);
        b.extend_from_slice(&count.to_be_bytes());
    }
    b
}

fn to_ebcdic(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => 0xF0 + (c - b'0'),
        b'A'..=b'I' => 0xC1 + (c - b'A'),
        b'J'..=b'R' => 0xD1 + (c - b'J'),
        b'S'..=b'Z' => 0xE2 + (c - b'S'),
        _ => 0x40,
    }
}

/// One node-element descriptor
fn ned(flags: u8, kind: u8, type_number: &str, devnum: u16, tag: u16) -> [u8; NED_LEN] {
    let mut n = [0x40u8; NED_LEN];
    n[0] = flags;
    n[1] = kind;
    n[2] = 0x06;
    n[3] = 0x00;
    let text = format!("{:0>6}{:0>3}HRCZZ{:08}{:04X}", type_number, "001", 0, devnum);
    for (dst, src) in n[4..30].iter_mut().zip(text.bytes()) {
        *dst = to_ebcdic(src);
    }
    n[30..32].copy_from_slice(&tag.to_be_bytes());
    n
}

/// READ CONFIGURATION DATA: device NED, control unit NED, token NED and a
/// general NEQ
pub fn configuration_data(devnum: u16) -> Vec<u8> {
    let mut b = Vec::with_capacity(RCD_LEN);
    b.extend_from_slice(&ned(0xD0, 0x01, "1732", devnum, devnum & 0xFF));
    b.extend_from_slice(&ned(0xC0, 0x02, "1731", devnum, 0x0000));
    b.extend_from_slice(&ned(0xF0, 0x00, "1730", devnum, 0x0000));
    let mut neq = [0u8; NED_LEN];
    neq[0] = 0x80;
    neq[8..10].copy_from_slice(&devnum.to_be_bytes());
    b.extend_from_slice(&neq);
    b
}

/// READ NODE IDENTIFIER: node descriptor and the attached control unit
pub fn node_id(devnum: u16) -> Vec<u8> {
    let mut b = Vec::with_capacity(RNI_LEN);
    b.extend_from_slice(&ned(0xD0, 0x01, "1732", devnum, devnum & 0xFF));
    b.extend_from_slice(&ned(0xC0, 0x02, "1731", devnum, 0x0000));
    b
}
