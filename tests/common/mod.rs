//! Shared test harness
//!
//! Drives a QETH group the way a guest driver would: CCWs on the three
//! devices, MPC messages built byte for byte, and QDIO queues laid out in
//! guest storage.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use zqeth::devices::ccw_op;
use zqeth::devices::qeth::{sbale, QueueDescriptor, QueueKeys, Qdr, Sbale, QDIO_SLOTS, SBALE_COUNT};
use zqeth::mpc::idx::{IDX_ACT_TYPE_READ, IDX_ACT_TYPE_WRITE};
use zqeth::mpc::ipa::{initiator, PROT_IPV4};
use zqeth::mpc::puk::PukBuilder;
use zqeth::mpc::th::build_message;
use zqeth::mpc::{
    proto, puk_type, rrh_type, ByteView, ByteWriter, IdxRequest, IdxResponse, IpaHeader, MpcMessage, Puk, PusBody,
    RequestHeader, LINK_TYPE_ETHERNET, TOKEN_TYPE,
};
use zqeth::{
    CcwStatus, ChannelDevice, CountingSink, DeviceRole, GuestAddr, GuestStorage, Layer, MainStorage, MemoryFactory,
    MemoryInterface, QethConfig, QethGroup,
};

pub const ISSUER_TOKEN: u32 = 0x0500_0001;
pub const CM_FILTER: u32 = 0x0500_0011;
pub const CM_CONNECTION: u32 = 0x0500_0022;
pub const ULP_FILTER: u32 = 0x0500_0033;
pub const ULP_CONNECTION: u32 = 0x0500_0044;

const READ_BUF: usize = 4096;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

// ============================================================================
// MPC request builders
// ============================================================================

pub fn idx_request(act_type: u8, port: u8) -> Vec<u8> {
    let mut w = ByteWriter::new();
    IdxRequest { act_type, port, issuer_token: ISSUER_TOKEN, func_level: 0x0201 }.encode(&mut w);
    w.into_vec()
}

pub fn puk(puk_type: u8, bodies: &[PusBody<'_>]) -> Vec<u8> {
    let mut b = PukBuilder::new(puk_type::CAT_CONTROL, puk_type);
    for body in bodies {
        b.push(body);
    }
    b.finish()
}

pub fn filter(proto: u8, token: u32) -> PusBody<'static> {
    PusBody::Filter { proto, token_type: TOKEN_TYPE, token }
}

pub fn connection(token: u32) -> PusBody<'static> {
    PusBody::Connection { token_type: TOKEN_TYPE, token }
}

pub fn partner(token: u32) -> PusBody<'static> {
    PusBody::Partner { token_type: TOKEN_TYPE, token }
}

pub fn link_level(wire_proto: u8) -> PusBody<'static> {
    PusBody::LinkLevel { link_type: LINK_TYPE_ETHERNET, lan_number: 0, proto: wire_proto, mtu: 0 }
}

pub fn ipa_command(command: u8, prot_version: u16, data: &[u8]) -> Vec<u8> {
    let hdr = IpaHeader { command, initiator: initiator::HOST, seq: 1, prot_version, ..Default::default() };
    let mut w = ByteWriter::new();
    hdr.encode(&mut w);
    w.put_bytes(data);
    w.into_vec()
}

/// Length-prefixed MAC as carried by SETVMAC and friends
pub fn mac_data(mac: [u8; 6]) -> Vec<u8> {
    let mut d = vec![0, 0, 0, 6];
    d.extend_from_slice(&mac);
    d
}

/// One decoded adapter response
#[derive(Debug, Clone)]
pub struct Response {
    pub th_seq: u32,
    pub rrh_type: u8,
    pub seq: u32,
    pub ack: u32,
    pub token: u32,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn parse(data: &[u8]) -> Self {
        let msg = MpcMessage::parse(data).expect("response framing");
        let req = msg.first_request().expect("response RRH");
        Self {
            th_seq: msg.th.seq,
            rrh_type: req.header.rrh_type,
            seq: req.header.seq,
            ack: req.header.ack,
            token: req.header.token,
            payload: req.first_data().expect("response PH").to_vec(),
        }
    }

    pub fn puk_type(&self) -> u8 {
        Puk::parse(&self.payload).expect("response PUK").header.puk_type
    }

    pub fn ipa(&self) -> IpaHeader {
        IpaHeader::decode(&ByteView::new(&self.payload)).expect("IPA header")
    }
}

// ============================================================================
// Group harness
// ============================================================================

pub struct Harness {
    pub group: QethGroup,
    pub storage: Arc<MainStorage>,
    pub sink: Arc<CountingSink>,
    pub factory: Arc<MemoryFactory>,
    seq: u32,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(QethConfig::default())
    }

    pub fn with_config(config: QethConfig) -> Self {
        init_logging();
        let storage = Arc::new(MainStorage::new(0x10_0000));
        let sink = Arc::new(CountingSink::new());
        let factory = Arc::new(MemoryFactory::new());
        let group = QethGroup::new(config, storage.clone(), sink.clone(), factory.clone()).expect("group");
        Self { group, storage, sink, factory, seq: 0 }
    }

    pub fn host(&self) -> Arc<MemoryInterface> {
        self.factory.interface()
    }

    pub fn device(&self, role: DeviceRole) -> Arc<zqeth::QethDevice> {
        self.group.device(role)
    }

    pub fn write(&self, role: DeviceRole, data: &[u8]) -> CcwStatus {
        let mut buf = data.to_vec();
        self.device(role).execute(ccw_op::WRITE, &mut buf)
    }

    /// READ on `role`; returns the status and the bytes transferred.
    /// Blocks when nothing is pending on an active device.
    pub fn read(&self, role: DeviceRole) -> (CcwStatus, Vec<u8>) {
        let mut buf = vec![0u8; READ_BUF];
        let st = self.device(role).execute(ccw_op::READ, &mut buf);
        buf.truncate(READ_BUF - st.residual as usize);
        (st, buf)
    }

    pub fn activate_idx(&self) {
        for (role, act) in [(DeviceRole::Read, IDX_ACT_TYPE_READ), (DeviceRole::Write, IDX_ACT_TYPE_WRITE)] {
            assert_eq!(self.write(role, &idx_request(act, 0)), CcwStatus::ok(0));
            let (_, data) = self.read(role);
            assert!(IdxResponse::decode(&data).expect("IDX response").is_positive());
        }
    }

    /// Send one MPC request on the write device without reading anything
    pub fn post(&mut self, rrh: u8, wire_proto: u8, payload: &[u8]) -> u32 {
        self.seq += 1;
        let hdr = RequestHeader { rrh_type: rrh, proto: wire_proto, seq: self.seq, ..Default::default() };
        let msg = build_message(self.seq, &hdr, payload);
        assert_eq!(self.write(DeviceRole::Write, &msg), CcwStatus::ok(0));
        self.seq
    }

    /// Send one MPC request and read its response
    pub fn request(&mut self, rrh: u8, wire_proto: u8, payload: &[u8]) -> Response {
        let seq = self.post(rrh, wire_proto, payload);
        let (st, data) = self.read(DeviceRole::Read);
        assert_eq!(st.unit_status, CcwStatus::ok(0).unit_status);
        let resp = Response::parse(&data);
        assert_eq!(resp.ack, seq, "response acknowledges its request");
        resp
    }

    /// Run IDX, CM and ULP activation up to ULP ACTIVE; returns the
    /// responses in order
    pub fn handshake(&mut self, layer: Layer) -> Vec<Response> {
        let wire = match layer {
            Layer::Layer2 => proto::L2,
            Layer::Layer3 => proto::L3,
        };
        self.activate_idx();
        let steps: Vec<(u8, Vec<u8>)> = vec![
            (
                rrh_type::CM,
                puk(puk_type::ENABLE, &[filter(proto::UNSPECIFIED, CM_FILTER), PusBody::UserData(b"zqeth-test")]),
            ),
            (rrh_type::CM, puk(puk_type::SETUP, &[connection(CM_CONNECTION), partner(0x0100_0001)])),
            (rrh_type::ULP, puk(puk_type::ENABLE, &[filter(wire, ULP_FILTER), link_level(wire)])),
            (rrh_type::ULP, puk(puk_type::SETUP, &[connection(ULP_CONNECTION), partner(0x0100_0002)])),
            (rrh_type::ULP, puk(puk_type::ACTIVE, &[connection(ULP_CONNECTION)])),
        ];
        steps.into_iter().map(|(rrh, payload)| self.request(rrh, proto::UNSPECIFIED, &payload)).collect()
    }

    pub fn ipa(&mut self, command: u8, prot_version: u16, data: &[u8]) -> Response {
        self.request(rrh_type::IPA, proto::UNSPECIFIED, &ipa_command(command, prot_version, data))
    }

    pub fn ipa_rc(&mut self, command: u8, data: &[u8]) -> u16 {
        self.ipa(command, PROT_IPV4, data).ipa().rc
    }
}

// ============================================================================
// QDIO layout in guest storage
// ============================================================================

/// Per-element buffer size used by [`QueueLayout`]
pub const ELEM_LEN: u32 = 256;
/// Slots that get SBALs and buffers
pub const USED_SLOTS: usize = 4;

/// One input and one output queue at fixed addresses
pub struct QueueLayout {
    pub input: QueueDescriptor,
    pub output: QueueDescriptor,
}

impl QueueLayout {
    const IN_SL: GuestAddr = 0x1_0000;
    const OUT_SL: GuestAddr = 0x1_1000;
    const IN_SLSB: GuestAddr = 0x1_2000;
    const OUT_SLSB: GuestAddr = 0x1_3000;
    const IN_SBALS: GuestAddr = 0x2_0000;
    const OUT_SBALS: GuestAddr = 0x3_0000;
    const IN_BUFS: GuestAddr = 0x8_0000;
    const OUT_BUFS: GuestAddr = 0xC_0000;

    pub fn build(storage: &MainStorage) -> Self {
        let input = QueueDescriptor { slib: 0, sl: Self::IN_SL, slsb: Self::IN_SLSB, keys: QueueKeys::default() };
        let output = QueueDescriptor { slib: 0, sl: Self::OUT_SL, slsb: Self::OUT_SLSB, keys: QueueKeys::default() };
        for slot in 0..QDIO_SLOTS {
            storage.store(Self::IN_SL + slot as u64 * 8, 0, &Self::sbal(Self::IN_SBALS, slot).to_be_bytes()).unwrap();
            storage.store(Self::OUT_SL + slot as u64 * 8, 0, &Self::sbal(Self::OUT_SBALS, slot).to_be_bytes()).unwrap();
        }
        Self { input, output }
    }

    pub fn qdr(&self) -> Vec<u8> {
        Qdr { qib: 0x1_4000, input: vec![self.input], output: vec![self.output] }.encode()
    }

    fn sbal(base: GuestAddr, slot: usize) -> GuestAddr {
        base + slot as u64 * 256
    }

    pub fn in_buf(slot: usize, elem: usize) -> GuestAddr {
        Self::IN_BUFS + ((slot * SBALE_COUNT + elem) as u64) * ELEM_LEN as u64
    }

    pub fn out_buf(slot: usize, elem: usize) -> GuestAddr {
        Self::OUT_BUFS + ((slot * SBALE_COUNT + elem) as u64) * ELEM_LEN as u64
    }

    /// Hand `slot` of the input queue to the adapter with every element
    /// pointing at an empty buffer
    pub fn offer_input(&self, storage: &MainStorage, slot: usize) {
        let entries: Vec<Sbale> = (0..SBALE_COUNT)
            .map(|e| Sbale { flags: 0, sflags: 0, length: ELEM_LEN, addr: Self::in_buf(slot, e) })
            .collect();
        self.input.store_sbales(storage, Self::sbal(Self::IN_SBALS, slot), &entries).unwrap();
        self.input.set_slot_state(storage, slot, zqeth::devices::qeth::slsb::INPUT_EMPTY).unwrap();
    }

    /// Prime `slot` of the output queue with `unit` split into pieces of at
    /// most `piece` bytes
    pub fn prime_output(&self, storage: &MainStorage, slot: usize, unit: &[u8], piece: usize, pci: bool) {
        let chunks: Vec<&[u8]> = unit.chunks(piece).collect();
        let last = chunks.len() - 1;
        let mut entries = Vec::new();
        for (e, chunk) in chunks.iter().enumerate() {
            let addr = Self::out_buf(slot, e);
            storage.store(addr, 0, chunk).unwrap();
            let frag = match (e, last) {
                (_, 0) => sbale::FRAG_WHOLE,
                (0, _) => sbale::FRAG_FIRST,
                (e, l) if e == l => sbale::FRAG_LAST,
                _ => sbale::FRAG_MIDDLE,
            };
            let flags = if e == last { frag | sbale::LAST_ENTRY } else { frag };
            let sflags = if e == 0 && pci { sbale::SFLAG_PCI_REQ } else { 0 };
            entries.push(Sbale { flags, sflags, length: chunk.len() as u32, addr });
        }
        self.output.store_sbales(storage, Self::sbal(Self::OUT_SBALS, slot), &entries).unwrap();
        self.output.set_slot_state(storage, slot, zqeth::devices::qeth::slsb::OUTPUT_PRIMED).unwrap();
    }

    pub fn prime_raw(&self, storage: &MainStorage, slot: usize, entries: &[Sbale]) {
        self.output.store_sbales(storage, Self::sbal(Self::OUT_SBALS, slot), entries).unwrap();
        self.output.set_slot_state(storage, slot, zqeth::devices::qeth::slsb::OUTPUT_PRIMED).unwrap();
    }

    pub fn input_state(&self, storage: &MainStorage, slot: usize) -> u8 {
        self.input.slot_state(storage, slot).unwrap()
    }

    pub fn output_state(&self, storage: &MainStorage, slot: usize) -> u8 {
        self.output.slot_state(storage, slot).unwrap()
    }

    pub fn input_entries(&self, storage: &MainStorage, slot: usize) -> [Sbale; SBALE_COUNT] {
        self.input.fetch_sbal(storage, Self::sbal(Self::IN_SBALS, slot)).unwrap()
    }

    /// Reassemble the bytes the adapter placed in an input slot
    pub fn input_bytes(&self, storage: &MainStorage, slot: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for e in self.input_entries(storage, slot) {
            let mut part = vec![0u8; e.length as usize];
            storage.fetch(e.addr, 0, &mut part).unwrap();
            out.extend_from_slice(&part);
            if e.is_last_entry() {
                break;
            }
        }
        out
    }
}
