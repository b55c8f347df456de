//! The VM host: owns the receptors, routes their signals and drives their
//! reduction queues.
//!
//! The host is single threaded at its core; auxiliary threads (the clock,
//! stream bridges) never touch host state. They hand whole signal trees to
//! a channel and the host drains it between loop iterations, so everything
//! that mutates a receptor happens on the thread running [`VmHost::process`]
//! (or stepping the host manually).

use crate::error::{DeliveryStatus, HostError};
use crate::receptor::{Receptor, ReceptorState};
use crate::semtable::{sys::*, SemTable};
use crate::tree::{Surface, Tree};
use crate::{signal, CeptrError, ReceptorAddress, Symbol};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// Routing-table capacity.
pub const MAX_RECEPTORS: usize = 512;
/// How many receptors may be active at once.
pub const MAX_ACTIVE_RECEPTORS: usize = 128;

/// Cloneable handle auxiliary threads use to push signals into the host.
#[derive(Clone)]
pub struct SignalInjector {
    tx: Sender<Tree>,
}

impl SignalInjector {
    pub fn inject(&self, signal: Tree) -> Result<(), CeptrError> {
        self.tx
            .send(signal)
            .map_err(|_| "the vm host is no longer receiving".into())
    }
}

/// Cloneable handle for stopping a running [`VmHost::process`] loop from
/// another thread.
#[derive(Clone)]
pub struct HostControl {
    stop: Arc<AtomicBool>,
}

impl HostControl {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

struct ClockThread {
    join: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

pub struct VmHost {
    pub sem: SemTable,
    /// Routing table; a receptor's address is its slot index. Slot 0 is the
    /// root receptor whose liveness gates the whole host.
    receptors: Vec<Receptor>,
    active: Vec<usize>,
    tx: Sender<Tree>,
    rx: Receiver<Tree>,
    clock: Option<ClockThread>,
    stop: Arc<AtomicBool>,
}

/// The periodic signal the clock thread produces: addressed to the clock
/// receptor itself, carrying the wall clock in seconds.
pub fn tick_signal(clock_addr: ReceptorAddress, now: i64) -> Tree {
    let body = Tree::with_root(CLOCK_TICK, Surface::Int(now));
    signal::make_signal(
        clock_addr,
        clock_addr,
        DEFAULT_ASPECT,
        CLOCK_TICK,
        &body,
        Some(Uuid::new_v4()),
        None,
        None,
    )
}

impl VmHost {
    /// A host with a seeded semantic table and an alive root receptor in
    /// slot 0.
    pub fn new() -> VmHost {
        let sem = SemTable::new();
        let mut root = Receptor::new(SYS_RECEPTOR);
        root.addr = ReceptorAddress::vm(0);
        root.state = ReceptorState::Alive;
        let (tx, rx) = channel();
        VmHost {
            sem,
            receptors: vec![root],
            active: Vec::new(),
            tx,
            rx,
            clock: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn injector(&self) -> SignalInjector {
        SignalInjector {
            tx: self.tx.clone(),
        }
    }

    pub fn control(&self) -> HostControl {
        HostControl {
            stop: self.stop.clone(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.receptors[0].state == ReceptorState::Alive
    }

    fn index_of(&self, addr: ReceptorAddress) -> Option<usize> {
        usize::try_from(addr.addr)
            .ok()
            .filter(|&i| i < self.receptors.len())
    }

    pub fn receptor(&self, addr: ReceptorAddress) -> Option<&Receptor> {
        self.receptors.get(self.index_of(addr)?)
    }

    pub fn receptor_mut(&mut self, addr: ReceptorAddress) -> Option<&mut Receptor> {
        let i = self.index_of(addr)?;
        self.receptors.get_mut(i)
    }

    /// Assign the next routing-table slot to a new receptor named by
    /// `symbol`. Overflowing the table is fatal to the host.
    pub fn new_receptor(&mut self, symbol: Symbol) -> Result<ReceptorAddress, HostError> {
        if self.receptors.len() >= MAX_RECEPTORS {
            self.receptors[0].state = ReceptorState::Dying;
            return Err(HostError::TooManyReceptors);
        }
        let addr = ReceptorAddress::vm(self.receptors.len() as i32);
        let mut r = Receptor::new(symbol);
        r.addr = addr;
        self.receptors.push(r);
        tracing::debug!(target: "ceptr::receptor", addr = addr.addr, "new receptor");
        Ok(addr)
    }

    /// Put a receptor on the active list and bring it alive. Activating the
    /// clock receptor starts its tick thread.
    pub fn activate(&mut self, addr: ReceptorAddress) -> Result<(), HostError> {
        let idx = self.index_of(addr).ok_or(HostError::BadAddress(addr.addr))?;
        if self.active.contains(&idx) {
            return Ok(());
        }
        if self.active.len() >= MAX_ACTIVE_RECEPTORS {
            return Err(HostError::TooManyActive);
        }
        self.receptors[idx].state = ReceptorState::Alive;
        self.active.push(idx);
        if self.receptors[idx].symbol == CLOCK_RECEPTOR && self.clock.is_none() {
            self.start_clock(addr);
        }
        Ok(())
    }

    /// Create and activate the receptors every host carries: the clock.
    pub fn instantiate_builtins(&mut self) -> Result<ReceptorAddress, HostError> {
        let clock = self.new_receptor(CLOCK_RECEPTOR)?;
        self.activate(clock)?;
        Ok(clock)
    }

    fn start_clock(&mut self, addr: ReceptorAddress) {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let tx = self.tx.clone();
        let join = std::thread::spawn(move || {
            let mut last = 0i64;
            while !thread_stop.load(Ordering::Relaxed) {
                let now = signal::now_secs();
                if now > last {
                    last = now;
                    if tx.send(tick_signal(addr, now)).is_err() {
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        });
        self.clock = Some(ClockThread { join, stop });
        tracing::debug!(target: "ceptr::receptor", addr = addr.addr, "clock started");
    }

    fn stop_clock(&mut self) {
        if let Some(c) = self.clock.take() {
            c.stop.store(true, Ordering::Relaxed);
            let _ = c.join.join();
        }
    }

    /// Resolve self addresses against the sender, look the destination up
    /// in the routing table and deliver. A senderless signal that uses the
    /// self placeholder is a host-level invariant violation and kills the
    /// host.
    fn route(
        &mut self,
        sender: Option<usize>,
        mut signal: Tree,
    ) -> Result<DeliveryStatus, HostError> {
        let from = signal::from(&signal)
            .ok_or(HostError::BadSignalShape("header names no from address"))?;
        if from.is_self() {
            let Some(s) = sender else {
                self.receptors[0].state = ReceptorState::Dying;
                return Err(HostError::SelfWithoutSender);
            };
            signal::set_from(&mut signal, ReceptorAddress::vm(s as i32));
        }
        let mut to =
            signal::to(&signal).ok_or(HostError::BadSignalShape("header names no to address"))?;
        if to.is_self() {
            let Some(s) = sender else {
                self.receptors[0].state = ReceptorState::Dying;
                return Err(HostError::SelfWithoutSender);
            };
            to = ReceptorAddress::vm(s as i32);
            signal::set_to(&mut signal, to);
        }
        let idx = self.index_of(to).ok_or(HostError::BadAddress(to.addr))?;
        self.receptors[idx].deliver(&self.sem, signal)
    }

    fn route_logged(&mut self, sender: Option<usize>, signal: Tree) {
        match self.route(sender, signal) {
            Ok(_) => {}
            Err(HostError::BadAddress(addr)) => {
                tracing::warn!(target: "ceptr::signal", addr, "dropping signal to unknown address");
            }
            Err(e) => {
                tracing::warn!(target: "ceptr::signal", error = %e, "dropping signal");
            }
        }
    }

    /// Wrap a body as a signal from outside the host and deliver it
    /// immediately.
    pub fn send_external(
        &mut self,
        from: ReceptorAddress,
        to: ReceptorAddress,
        aspect: Symbol,
        carrier: Symbol,
        body: &Tree,
    ) -> Result<DeliveryStatus, HostError> {
        let s = signal::make_signal(from, to, aspect, carrier, body, Some(Uuid::new_v4()), None, None);
        self.route(None, s)
    }

    /// One pass of the main loop: drain injected signals, then for each
    /// active receptor reduce, route its outbox and clean its queue.
    /// Returns whether anything happened.
    pub fn step(&mut self) -> bool {
        let mut worked = false;

        let injected: Vec<Tree> = self.rx.try_iter().collect();
        for s in injected {
            worked = true;
            self.route_logged(None, s);
        }

        let active = self.active.clone();
        for idx in active {
            if !self.is_alive() {
                break;
            }
            if !self.receptors[idx].is_alive() {
                continue;
            }
            if self.receptors[idx].q.runnable_count() > 0 {
                worked = true;
                self.receptors[idx].q.reduce_q(&self.sem);
            }
            let pending = self.receptors[idx].take_pending();
            for s in pending {
                worked = true;
                self.route_logged(Some(idx), s);
            }
            // completed run trees have served their purpose
            let _ = self.receptors[idx].q.cleanup();
        }
        worked
    }

    /// The main monitoring and execution loop: runs until the root receptor
    /// stops being alive (or [`HostControl::shutdown`] fires), then kills
    /// every active receptor and joins the clock thread.
    pub fn process(&mut self) {
        while self.is_alive() && !self.stop.load(Ordering::Relaxed) {
            if !self.step() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.shutdown();
    }

    /// Kill all active receptors and stop the clock. Idempotent.
    pub fn shutdown(&mut self) {
        if self.receptors[0].state == ReceptorState::Alive {
            self.receptors[0].state = ReceptorState::Dying;
        }
        for idx in self.active.clone() {
            if self.receptors[idx].state != ReceptorState::Dead {
                self.receptors[idx].kill();
            }
        }
        self.stop_clock();
        self.receptors[0].state = ReceptorState::Dead;
    }
}

impl Default for VmHost {
    fn default() -> Self {
        VmHost::new()
    }
}

impl Drop for VmHost {
    fn drop(&mut self) {
        self.stop_clock();
    }
}
