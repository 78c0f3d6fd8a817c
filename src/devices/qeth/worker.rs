//! Data-path worker thread
//!
//! One thread per group, started by ACTIVATE QUEUES and stopped by halt. It
//! sleeps in `poll(2)` on the host interface and a wake-up pipe; SIGA
//! instructions reach it as [`WorkerCommand`]s followed by a pipe write.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::RwLock;

use crate::devices::{DeviceNumber, InterruptSink};
use crate::error::{QethError, QethResult};
use crate::host::HostInterface;

use super::engine::{Direction, QueueEngine};
use super::filter::InboundFilter;
use super::stats::QethStats;

/// Slot holding the group's host interface, shared with the CCW path
pub type HostSlot = Arc<RwLock<Option<Arc<dyn HostInterface>>>>;
/// Latest published inbound filter
pub type FilterSlot = Arc<RwLock<Arc<InboundFilter>>>;

#[derive(Debug)]
pub enum WorkerCommand {
    /// SIGA-r: queues the guest made input buffers available on
    InputMask(u32),
    /// SIGA-w / SIGA-m: queues with primed output
    OutputMask(u32),
    /// SIGA-s: just run a pass
    Sync,
    Packing { dir: Direction, on: bool },
    /// Stop; the sender is signalled once the loop has exited
    Halt(Sender<()>),
}

/// Self-pipe used to interrupt `poll(2)`
struct SignalPipe {
    read: RawFd,
    write: RawFd,
}

impl SignalPipe {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { read: fds[0], write: fds[1] })
    }

    fn notify(&self) -> io::Result<()> {
        let b = 1u8;
        let ret = unsafe { libc::write(self.write, &b as *const u8 as *const libc::c_void, 1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full pipe already guarantees a wake-up
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let ret = unsafe { libc::read(self.read, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if ret <= 0 {
                break;
            }
        }
    }

    /// Wait until the pipe or `extra` is readable, or `timeout` passes
    fn wait(&self, extra: Option<RawFd>, timeout: Duration) {
        let mut fds = [
            libc::pollfd { fd: self.read, events: libc::POLLIN, revents: 0 },
            libc::pollfd { fd: extra.unwrap_or(-1), events: libc::POLLIN, revents: 0 },
        ];
        let n = if extra.is_some() { 2 } else { 1 };
        let ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), n, ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                log::warn!("poll failed: {}", err);
            }
        }
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

/// Everything the worker loop needs besides its engine
pub struct WorkerLinks {
    pub tag: String,
    /// Data device, target of the PCIs
    pub devnum: DeviceNumber,
    pub host: HostSlot,
    pub filter: FilterSlot,
    pub interrupts: Arc<dyn InterruptSink>,
    pub stats: Arc<QethStats>,
    pub poll_timeout: Duration,
}

/// Owner's end of a running worker
pub struct WorkerHandle {
    tx: Sender<WorkerCommand>,
    signal: Arc<SignalPipe>,
    thread: Option<JoinHandle<()>>,
    tag: String,
}

impl WorkerHandle {
    pub fn spawn(engine: QueueEngine, links: WorkerLinks) -> QethResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let signal = Arc::new(SignalPipe::new()?);
        let tag = links.tag.clone();
        let pipe = Arc::clone(&signal);

        let thread = thread::Builder::new()
            .name(format!("qeth-{}", links.devnum))
            .spawn(move || worker_loop(engine, links, rx, pipe))?;
        log::debug!("{} worker started", tag);

        Ok(Self { tx, signal, thread: Some(thread), tag })
    }

    /// Queue a command and wake the worker
    pub fn send(&self, cmd: WorkerCommand) {
        if self.tx.send(cmd).is_err() {
            log::warn!("{} worker is gone, command dropped", self.tag);
            return;
        }
        if let Err(e) = self.signal.notify() {
            log::warn!("{} worker wake-up failed: {}", self.tag, e);
        }
    }

    /// Stop the worker and wait for it to confirm
    pub fn halt(mut self, timeout: Duration) -> QethResult<()> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(WorkerCommand::Halt(ack_tx));
        match ack_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(t) = self.thread.take() {
                    if t.join().is_err() {
                        log::error!("{} worker panicked", self.tag);
                    }
                }
                log::debug!("{} worker stopped", self.tag);
                Ok(())
            }
            Err(_) => {
                // Leave the thread detached; it exits once it sees the command
                log::error!("{} worker did not acknowledge halt within {:?}", self.tag, timeout);
                Err(QethError::HaltTimeout)
            }
        }
    }
}

fn worker_loop(mut engine: QueueEngine, links: WorkerLinks, rx: Receiver<WorkerCommand>, signal: Arc<SignalPipe>) {
    loop {
        let host = links.host.read().clone();
        signal.wait(host.as_ref().and_then(|h| h.raw_fd()), links.poll_timeout);
        signal.drain();

        loop {
            match rx.try_recv() {
                Ok(WorkerCommand::InputMask(mask)) => engine.set_mask(Direction::Input, mask),
                Ok(WorkerCommand::OutputMask(mask)) => engine.set_mask(Direction::Output, mask),
                Ok(WorkerCommand::Sync) => {}
                Ok(WorkerCommand::Packing { dir, on }) => engine.set_packing(dir, on),
                Ok(WorkerCommand::Halt(ack)) => {
                    log::trace!("{} worker halting", links.tag);
                    let _ = ack.send(());
                    return;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        let Some(host) = host else {
            continue;
        };
        let mut interrupt = engine.process_output(host.as_ref());
        let filter = links.filter.read().clone();
        interrupt |= engine.process_input(host.as_ref(), &filter);

        if interrupt {
            links.stats.record_interrupt();
            links.interrupts.raise_pci(links.devnum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::CountingSink;
    use crate::host::MemoryInterface;
    use crate::memory::MainStorage;
    use crate::net::Layer;

    fn links(host: Option<Arc<dyn HostInterface>>, sink: Arc<CountingSink>) -> WorkerLinks {
        WorkerLinks {
            tag: "[QETH TEST]".into(),
            devnum: DeviceNumber(0x0A02),
            host: Arc::new(RwLock::new(host)),
            filter: Arc::new(RwLock::new(Arc::new(InboundFilter::closed()))),
            interrupts: sink,
            stats: Arc::new(QethStats::default()),
            poll_timeout: Duration::from_millis(5),
        }
    }

    fn idle_engine() -> QueueEngine {
        QueueEngine::new(
            "[QETH TEST]".into(),
            Arc::new(MainStorage::new(0x1000)),
            Layer::Layer3,
            Vec::new(),
            Vec::new(),
            1500,
            (false, false),
            Arc::new(QethStats::default()),
        )
    }

    #[test]
    fn test_signal_pipe_coalesces() {
        let pipe = SignalPipe::new().unwrap();
        for _ in 0..10 {
            pipe.notify().unwrap();
        }
        pipe.drain();
        // Nothing left: a zero timeout wait returns immediately either way
        pipe.wait(None, Duration::from_millis(0));
    }

    #[test]
    fn test_halt_acknowledged() {
        let sink = Arc::new(CountingSink::new());
        let host: Arc<dyn HostInterface> = Arc::new(MemoryInterface::new("t0"));
        let worker = WorkerHandle::spawn(idle_engine(), links(Some(host), sink.clone())).unwrap();
        worker.send(WorkerCommand::Sync);
        worker.send(WorkerCommand::Packing { dir: Direction::Input, on: true });
        assert!(worker.halt(Duration::from_secs(2)).is_ok());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_halt_without_host() {
        let sink = Arc::new(CountingSink::new());
        let worker = WorkerHandle::spawn(idle_engine(), links(None, sink)).unwrap();
        assert!(worker.halt(Duration::from_secs(2)).is_ok());
    }
}
