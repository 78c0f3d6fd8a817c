//! QETH (OSA-Express) adapter
//!
//! A group of three channel devices sharing one adapter:
//! - read (devnum): IDX activation, then control responses via READ
//! - write (devnum + 1): IDX activation, then MPC control messages via WRITE
//! - data (devnum + 2): ESTABLISH/ACTIVATE QUEUES and the QDIO data path
//!
//! Control traffic is handled synchronously on the CCW path. Packet traffic
//! runs on a per-group worker thread started by ACTIVATE QUEUES and driven
//! by SIGA instructions.

mod chain;
mod engine;
mod filter;
mod handshake;
mod header;
mod ipa;
mod qdio;
mod setup;
mod state;
mod stats;
mod tables;
mod worker;

pub use chain::{PendingResponse, ResponseChain};
pub use engine::Direction;
pub use filter::{InboundFilter, Verdict};
pub use header::{hdr_id, l2_cast, l3_flags, AdapterHeader, L2Cast, L3Cast, HDR_LEN};
pub use qdio::{
    all_queues, queue_bit, sbale, slsb, Qdr, QueueDescriptor, QueueKeys, Sbale, QDIO_MAX_QUEUES, QDIO_SLOTS,
    SBALE_COUNT, SBALE_LEN, SBAL_LEN,
};
pub use state::{adapter_token, CmState, DeviceRole, GroupState, PeerTokens, UlpState};
pub use stats::StatsSnapshot;
pub use tables::{
    AddressTable, AddressTables, RegisterOutcome, UnregisterOutcome, IPM_TABLE_SIZE, IP_TABLE_SIZE, MAC_TABLE_SIZE,
};

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::QethConfig;
use crate::devices::{ccw_op, sense, unit_status, CcwStatus, ChannelDevice, DeviceNumber, InterruptSink};
use crate::error::{QethError, QethResult};
use crate::host::{HostFactory, HostInterface};
use crate::memory::GuestStorage;
use crate::mpc::idx::{
    IDX_ACT_TYPE_READ, IDX_ACT_TYPE_WRITE, IDX_CAUSE_UNSUPPORTED_PORT, IDX_CAUSE_WRONG_DEVICE,
};
use crate::mpc::{classify_write, hex_dump, IdxRequest, IdxResponse, WriteKind};
use crate::net::Layer;

use engine::QueueEngine;
use handshake::HandshakeCtx;
use stats::QethStats;
use worker::{FilterSlot, HostSlot, WorkerCommand, WorkerHandle, WorkerLinks};

/// Data-path control, guarded separately from the handshake state
#[derive(Default)]
struct QdioControl {
    qdr: Option<Qdr>,
    worker: Option<WorkerHandle>,
    /// Current packing modes (input, output)
    packing: (bool, bool),
}

struct GroupShared {
    config: QethConfig,
    tag: String,
    storage: Arc<dyn GuestStorage>,
    interrupts: Arc<dyn InterruptSink>,
    factory: Arc<dyn HostFactory>,
    state: Mutex<GroupState>,
    filter: FilterSlot,
    host: HostSlot,
    read_chain: ResponseChain,
    write_chain: ResponseChain,
    qdio: Mutex<QdioControl>,
    /// True while ACTIVATE QUEUES is in progress
    active: Mutex<bool>,
    active_cond: Condvar,
    stats: Arc<QethStats>,
    /// Pending sense byte 0 per device
    sense: Mutex<[u8; 3]>,
}

impl GroupShared {
    fn debug(&self) -> bool {
        cfg!(feature = "debug_mpc") || self.config.debug
    }

    fn devnum(&self, role: DeviceRole) -> DeviceNumber {
        DeviceNumber(self.config.devnum.wrapping_add(role.offset()))
    }

    fn chain(&self, role: DeviceRole) -> Option<&ResponseChain> {
        match role {
            DeviceRole::Read => Some(&self.read_chain),
            DeviceRole::Write => Some(&self.write_chain),
            DeviceRole::Data => None,
        }
    }

    fn republish(&self, state: &GroupState) {
        *self.filter.write() = Arc::new(InboundFilter::from_state(state));
    }

    fn reject(&self, role: DeviceRole, residual: usize) -> CcwStatus {
        self.sense.lock()[role.offset() as usize] = sense::COMMAND_REJECT;
        CcwStatus::unit_check(residual as u16)
    }

    // ========================================================================
    // WRITE
    // ========================================================================

    fn write(&self, role: DeviceRole, data: &[u8]) -> CcwStatus {
        if self.debug() {
            log::trace!("{} {} WRITE {} bytes:{}", self.tag, role.name(), data.len(), hex_dump(data));
        }
        match classify_write(data) {
            WriteKind::Idx => self.idx_activate(role, data),
            WriteKind::Mpc => {
                if role != DeviceRole::Write {
                    log::warn!("{} MPC data written to {} device", self.tag, role.name());
                    return self.reject(role, data.len());
                }
                if !self.state.lock().idx_active(DeviceRole::Write) {
                    log::warn!("{} MPC write before IDX activation dropped", self.tag);
                    return CcwStatus::ok(0);
                }
                self.mpc_write(data);
                CcwStatus::ok(0)
            }
            WriteKind::Unknown => {
                log::debug!("{} {} WRITE of {} bytes ignored", self.tag, role.name(), data.len());
                CcwStatus::ok(0)
            }
        }
    }

    fn idx_activate(&self, role: DeviceRole, data: &[u8]) -> CcwStatus {
        let Some(chain) = self.chain(role) else {
            return self.reject(role, data.len());
        };
        let req = match IdxRequest::decode(data) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{} {} IDX ACTIVATE rejected: {}", self.tag, role.name(), e);
                return self.reject(role, data.len());
            }
        };

        let expected = if role == DeviceRole::Read { IDX_ACT_TYPE_READ } else { IDX_ACT_TYPE_WRITE };
        let resp = if req.act_type != expected {
            IdxResponse::negative(req.port, IDX_CAUSE_WRONG_DEVICE)
        } else if req.port != self.config.port {
            IdxResponse::negative(req.port, IDX_CAUSE_UNSUPPORTED_PORT)
        } else {
            IdxResponse::positive(req.port, adapter_token::IDX)
        };

        {
            let mut st = self.state.lock();
            st.set_idx_active(role, resp.is_positive());
            if resp.is_positive() {
                st.tokens.issuer = req.issuer_token;
            }
        }
        if resp.is_positive() {
            log::info!("{} {} device IDX active on port {}", self.tag, role.name(), req.port);
        } else {
            log::warn!(
                "{} {} device IDX ACTIVATE refused (port {}, cause {:#04x})",
                self.tag,
                role.name(),
                req.port,
                resp.cause
            );
        }
        chain.push(resp.encode(), "IDX");
        CcwStatus::ok(0)
    }

    fn mpc_write(&self, data: &[u8]) {
        let ctx = HandshakeCtx {
            tag: &self.tag,
            config: &self.config,
            factory: self.factory.as_ref(),
            host: &self.host,
        };
        let mut st = self.state.lock();
        let out = handshake::process_message(&ctx, &mut st, data);
        if out.republish {
            self.republish(&st);
        }
        drop(st);
        for (resp, tag) in out.responses {
            self.read_chain.push(resp, tag);
        }
    }

    // ========================================================================
    // READ
    // ========================================================================

    fn read(&self, role: DeviceRole, iobuf: &mut [u8]) -> CcwStatus {
        let Some(chain) = self.chain(role) else {
            return self.reject(role, iobuf.len());
        };
        chain.begin_read();
        let resp = match chain.try_next() {
            Some(r) => r,
            None if !self.state.lock().idx_active(role) => {
                self.sense.lock()[role.offset() as usize] = sense::INTERVENTION_REQUIRED;
                return CcwStatus {
                    unit_status: unit_status::CE_DE | unit_status::UNIT_CHECK | unit_status::STATUS_MODIFIER,
                    residual: iobuf.len() as u16,
                };
            }
            None => match chain.wait_next() {
                Some(r) => r,
                None => {
                    log::debug!("{} {} READ halted", self.tag, role.name());
                    return CcwStatus::ok(iobuf.len() as u16);
                }
            },
        };
        if self.debug() {
            log::trace!("{} {} READ {} ({} bytes):{}", self.tag, role.name(), resp.tag, resp.data.len(), hex_dump(&resp.data));
        }
        CcwStatus::read_into(iobuf, &resp.data)
    }

    // ========================================================================
    // Data path
    // ========================================================================

    fn establish_queues(&self, data: &[u8]) -> CcwStatus {
        match Qdr::decode(data) {
            Ok(qdr) => {
                log::info!(
                    "{} queues established: {} input, {} output",
                    self.tag,
                    qdr.input.len(),
                    qdr.output.len()
                );
                self.qdio.lock().qdr = Some(qdr);
                CcwStatus::ok(0)
            }
            Err(e) => {
                log::warn!("{} ESTABLISH QUEUES rejected: {}", self.tag, e);
                self.reject(DeviceRole::Data, data.len())
            }
        }
    }

    fn start_data_path(&self) -> QethResult<()> {
        let layer = {
            let st = self.state.lock();
            if !st.is_active() {
                return Err(QethError::NotActive);
            }
            st.layer.unwrap_or(Layer::Layer3)
        };

        let mut q = self.qdio.lock();
        if q.worker.is_some() {
            return Err(QethError::AlreadyActive);
        }
        let qdr = q.qdr.clone().ok_or(QethError::QueuesNotEstablished)?;
        let engine = QueueEngine::new(
            self.tag.clone(),
            Arc::clone(&self.storage),
            layer,
            qdr.input,
            qdr.output,
            self.config.max_packet,
            q.packing,
            Arc::clone(&self.stats),
        );
        let links = WorkerLinks {
            tag: self.tag.clone(),
            devnum: self.devnum(DeviceRole::Data),
            host: Arc::clone(&self.host),
            filter: Arc::clone(&self.filter),
            interrupts: Arc::clone(&self.interrupts),
            stats: Arc::clone(&self.stats),
            poll_timeout: self.config.poll_timeout(),
        };
        q.worker = Some(WorkerHandle::spawn(engine, links)?);
        *self.active.lock() = true;
        log::info!("{} data path started", self.tag);
        Ok(())
    }

    fn halt_data_path(&self) -> QethResult<()> {
        let worker = self.qdio.lock().worker.take();
        let res = match worker {
            Some(w) => w.halt(self.config.halt_timeout()),
            None => Ok(()),
        };
        let mut active = self.active.lock();
        if *active {
            log::info!("{} data path halted", self.tag);
        }
        *active = false;
        self.active_cond.notify_all();
        res
    }

    /// ACTIVATE QUEUES: start the worker and hold the CCW until halted
    fn activate_queues(&self) -> CcwStatus {
        if let Err(e) = self.start_data_path() {
            log::warn!("{} ACTIVATE QUEUES failed: {}", self.tag, e);
            return self.reject(DeviceRole::Data, 0);
        }
        let mut active = self.active.lock();
        while *active {
            self.active_cond.wait(&mut active);
        }
        CcwStatus::ok(0)
    }

    fn signal(&self, cmd: WorkerCommand) -> QethResult<()> {
        match self.qdio.lock().worker.as_ref() {
            Some(w) => {
                w.send(cmd);
                Ok(())
            }
            None => Err(QethError::NotActive),
        }
    }

    fn queue_counts(&self) -> (usize, usize) {
        self.qdio
            .lock()
            .qdr
            .as_ref()
            .map(|q| (q.input.len(), q.output.len()))
            .unwrap_or((0, 0))
    }
}

/// One device of a QETH group, as seen by the channel subsystem
pub struct QethDevice {
    shared: Arc<GroupShared>,
    role: DeviceRole,
    devnum: DeviceNumber,
    name: String,
}

impl QethDevice {
    pub fn role(&self) -> DeviceRole {
        self.role
    }
}

impl ChannelDevice for QethDevice {
    fn devnum(&self) -> DeviceNumber {
        self.devnum
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, opcode: u8, iobuf: &mut [u8]) -> CcwStatus {
        let sh = &self.shared;
        log::trace!("{} {} CCW {:#04x} count {}", sh.tag, self.role.name(), opcode, iobuf.len());
        match opcode {
            ccw_op::WRITE => sh.write(self.role, iobuf),
            ccw_op::READ => sh.read(self.role, iobuf),
            ccw_op::NOP => CcwStatus::ok(0),
            ccw_op::SENSE => {
                let mut data = [0u8; sense::SENSE_LEN];
                data[0] = std::mem::take(&mut sh.sense.lock()[self.role.offset() as usize]);
                CcwStatus::read_into(iobuf, &data)
            }
            ccw_op::SENSE_ID => CcwStatus::read_into(iobuf, &setup::sense_id()),
            ccw_op::READ_CONFIG_DATA => CcwStatus::read_into(iobuf, &setup::configuration_data(self.devnum.0)),
            ccw_op::READ_NODE_ID => CcwStatus::read_into(iobuf, &setup::node_id(self.devnum.0)),
            ccw_op::SET_INTERFACE_ID => CcwStatus::ok(0),
            ccw_op::ESTABLISH_QUEUES if self.role == DeviceRole::Data => sh.establish_queues(iobuf),
            ccw_op::ACTIVATE_QUEUES if self.role == DeviceRole::Data => sh.activate_queues(),
            _ => {
                log::warn!("{} {} CCW {:#04x} rejected", sh.tag, self.role.name(), opcode);
                sh.reject(self.role, iobuf.len())
            }
        }
    }

    fn halt(&self) {
        let sh = &self.shared;
        log::debug!("{} {} device halt", sh.tag, self.role.name());
        match self.role {
            DeviceRole::Read => sh.read_chain.halt(),
            DeviceRole::Write => sh.write_chain.halt(),
            DeviceRole::Data => {
                if let Err(e) = sh.halt_data_path() {
                    log::error!("{} halt of data path failed: {}", sh.tag, e);
                }
            }
        }
    }
}

/// A configured QETH group
pub struct QethGroup {
    shared: Arc<GroupShared>,
    devices: [Arc<QethDevice>; 3],
}

impl QethGroup {
    pub fn new(
        config: QethConfig,
        storage: Arc<dyn GuestStorage>,
        interrupts: Arc<dyn InterruptSink>,
        factory: Arc<dyn HostFactory>,
    ) -> QethResult<Self> {
        config.validate()?;
        let tag = format!("[QETH {:04X}]", config.devnum);
        let state = GroupState::new(config.mac, config.mtu);
        let packing = (config.input_packing, config.output_packing);

        let shared = Arc::new(GroupShared {
            tag,
            storage,
            interrupts,
            factory,
            state: Mutex::new(state),
            filter: Arc::new(RwLock::new(Arc::new(InboundFilter::closed()))),
            host: Arc::new(RwLock::new(None)),
            read_chain: ResponseChain::new(),
            write_chain: ResponseChain::new(),
            qdio: Mutex::new(QdioControl { packing, ..Default::default() }),
            active: Mutex::new(false),
            active_cond: Condvar::new(),
            stats: Arc::new(QethStats::default()),
            sense: Mutex::new([0; 3]),
            config,
        });

        let device = |role: DeviceRole| {
            let devnum = shared.devnum(role);
            Arc::new(QethDevice {
                shared: Arc::clone(&shared),
                role,
                devnum,
                name: format!("QETH {} {}", devnum, role.name()),
            })
        };
        let devices = [device(DeviceRole::Read), device(DeviceRole::Write), device(DeviceRole::Data)];
        log::info!(
            "{} group created: read {}, write {}, data {}",
            shared.tag,
            devices[0].devnum,
            devices[1].devnum,
            devices[2].devnum
        );
        Ok(Self { shared, devices })
    }

    pub fn config(&self) -> &QethConfig {
        &self.shared.config
    }

    pub fn device(&self, role: DeviceRole) -> Arc<QethDevice> {
        Arc::clone(&self.devices[role.offset() as usize])
    }

    pub fn devices(&self) -> impl Iterator<Item = Arc<QethDevice>> + '_ {
        self.devices.iter().cloned()
    }

    /// SIGA-r
    pub fn siga_input(&self, mask: u32) -> QethResult<()> {
        let (inputs, _) = self.shared.queue_counts();
        if mask & !all_queues(inputs) != 0 {
            log::debug!("{} SIGA-r mask {:08X} names queues that do not exist", self.shared.tag, mask);
        }
        self.shared.signal(WorkerCommand::InputMask(mask))
    }

    /// SIGA-w
    pub fn siga_output(&self, mask: u32) -> QethResult<()> {
        let (_, outputs) = self.shared.queue_counts();
        if mask & !all_queues(outputs) != 0 {
            log::debug!("{} SIGA-w mask {:08X} names queues that do not exist", self.shared.tag, mask);
        }
        self.shared.signal(WorkerCommand::OutputMask(mask))
    }

    /// SIGA-m
    pub fn siga_output_multiple(&self, mask: u32) -> QethResult<()> {
        self.siga_output(mask)
    }

    /// SIGA-s
    pub fn siga_sync(&self, output_mask: u32, input_mask: u32) -> QethResult<()> {
        if output_mask != 0 {
            self.shared.signal(WorkerCommand::OutputMask(output_mask))?;
        }
        if input_mask != 0 {
            self.shared.signal(WorkerCommand::InputMask(input_mask))?;
        }
        self.shared.signal(WorkerCommand::Sync)
    }

    /// Switch packing for one direction; applies to a running worker and to
    /// the next activation
    pub fn set_packing(&self, dir: Direction, on: bool) {
        let mut q = self.shared.qdio.lock();
        match dir {
            Direction::Input => q.packing.0 = on,
            Direction::Output => q.packing.1 = on,
        }
        if let Some(w) = q.worker.as_ref() {
            w.send(WorkerCommand::Packing { dir, on });
        }
    }

    /// Start the data path without an ACTIVATE QUEUES CCW
    pub fn start_data_path(&self) -> QethResult<()> {
        self.shared.start_data_path()
    }

    pub fn halt_data_path(&self) -> QethResult<()> {
        self.shared.halt_data_path()
    }

    pub fn is_data_path_active(&self) -> bool {
        *self.shared.active.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn host(&self) -> Option<Arc<dyn HostInterface>> {
        self.shared.host.read().clone()
    }

    /// Inspect the handshake and addressing state
    pub fn with_state<R>(&self, f: impl FnOnce(&GroupState) -> R) -> R {
        f(&self.shared.state.lock())
    }

    /// Halt every device and release the host interface
    pub fn close(&self) -> QethResult<()> {
        let sh = &self.shared;
        sh.read_chain.halt();
        sh.write_chain.halt();
        let res = sh.halt_data_path();
        sh.read_chain.clear();
        sh.write_chain.clear();
        if let Some(host) = sh.host.write().take() {
            if let Err(e) = host.set_enabled(false) {
                log::warn!("{} cannot bring {} down: {}", sh.tag, host.name(), e);
            }
        }
        *sh.filter.write() = Arc::new(InboundFilter::closed());
        log::info!("{} group closed", sh.tag);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::CountingSink;
    use crate::host::MemoryFactory;
    use crate::memory::MainStorage;
    use crate::mpc::idx::IDX_RESP_POSITIVE;
    use crate::mpc::ByteWriter;
    use std::thread;
    use std::time::Duration;

    fn group() -> QethGroup {
        QethGroup::new(
            QethConfig::default(),
            Arc::new(MainStorage::new(0x10000)),
            Arc::new(CountingSink::new()),
            Arc::new(MemoryFactory::new()),
        )
        .unwrap()
    }

    fn idx(act_type: u8, port: u8) -> Vec<u8> {
        let mut w = ByteWriter::new();
        IdxRequest { act_type, port, issuer_token: 0x4711, func_level: 0x0201 }.encode(&mut w);
        w.into_vec()
    }

    #[test]
    fn test_device_numbers() {
        let g = group();
        assert_eq!(g.device(DeviceRole::Read).devnum(), DeviceNumber(0x0A00));
        assert_eq!(g.device(DeviceRole::Data).devnum(), DeviceNumber(0x0A02));
        assert_eq!(g.device(DeviceRole::Write).name(), "QETH 0A01 write");
    }

    #[test]
    fn test_read_before_idx_is_unit_check() {
        let g = group();
        let mut buf = [0u8; 64];
        let st = g.device(DeviceRole::Read).execute(ccw_op::READ, &mut buf);
        assert!(st.is_unit_check());
        assert_ne!(st.unit_status & unit_status::STATUS_MODIFIER, 0);
    }

    #[test]
    fn test_idx_activation_roundtrip() {
        let g = group();
        let dev = g.device(DeviceRole::Read);
        let mut req = idx(IDX_ACT_TYPE_READ, 0);
        assert_eq!(dev.execute(ccw_op::WRITE, &mut req), CcwStatus::ok(0));
        let mut buf = [0u8; 64];
        let st = dev.execute(ccw_op::READ, &mut buf);
        assert_eq!(st.residual, 32);
        let resp = IdxResponse::decode(&buf).unwrap();
        assert_eq!(resp.code, IDX_RESP_POSITIVE);
        assert_eq!(resp.token, adapter_token::IDX);
        assert!(g.with_state(|s| s.idx_read && s.tokens.issuer == 0x4711));
    }

    #[test]
    fn test_idx_wrong_type_for_device() {
        let g = group();
        let dev = g.device(DeviceRole::Write);
        dev.execute(ccw_op::WRITE, &mut idx(IDX_ACT_TYPE_READ, 0));
        let mut buf = [0u8; 32];
        dev.execute(ccw_op::READ, &mut buf);
        let resp = IdxResponse::decode(&buf).unwrap();
        assert!(!resp.is_positive());
        assert_eq!(resp.cause, IDX_CAUSE_WRONG_DEVICE);
        assert!(!g.with_state(|s| s.idx_write));
    }

    #[test]
    fn test_halt_wakes_blocked_read() {
        let g = group();
        let dev = g.device(DeviceRole::Read);
        dev.execute(ccw_op::WRITE, &mut idx(IDX_ACT_TYPE_READ, 0));
        let mut buf = [0u8; 32];
        dev.execute(ccw_op::READ, &mut buf);

        let reader = Arc::clone(&dev);
        let t = thread::spawn(move || {
            let mut buf = [0u8; 16];
            reader.execute(ccw_op::READ, &mut buf)
        });
        while g.shared.read_chain.waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        dev.halt();
        assert_eq!(t.join().unwrap(), CcwStatus::ok(16));

        // The halt does not leak into the next READ
        dev.execute(ccw_op::WRITE, &mut idx(IDX_ACT_TYPE_READ, 0));
        let mut buf = [0u8; 32];
        assert_eq!(dev.execute(ccw_op::READ, &mut buf), CcwStatus::ok(0));
    }

    #[test]
    fn test_unknown_ccw_sets_command_reject() {
        let g = group();
        let dev = g.device(DeviceRole::Write);
        let mut none = [0u8; 0];
        assert!(dev.execute(0x77, &mut none).is_unit_check());
        let mut sense_buf = [0u8; 32];
        dev.execute(ccw_op::SENSE, &mut sense_buf);
        assert_eq!(sense_buf[0], sense::COMMAND_REJECT);
        // Reading sense clears it
        dev.execute(ccw_op::SENSE, &mut sense_buf);
        assert_eq!(sense_buf[0], 0);
    }

    #[test]
    fn test_activate_requires_active_ulp() {
        let g = group();
        assert!(matches!(g.start_data_path(), Err(QethError::NotActive)));
        assert!(matches!(g.siga_output(0x8000_0000), Err(QethError::NotActive)));
        let mut none = [0u8; 0];
        assert!(g.device(DeviceRole::Data).execute(ccw_op::ACTIVATE_QUEUES, &mut none).is_unit_check());
        // Queue CCWs only exist on the data device
        assert!(g.device(DeviceRole::Read).execute(ccw_op::ESTABLISH_QUEUES, &mut none).is_unit_check());
    }
}
