//! Receptors: isolated actors with aspects, expectations and a run queue.
//!
//! A receptor never touches another receptor directly. Outbound signals go
//! into its `pending_signals` outbox for the host to route; inbound signals
//! arrive through [`Receptor::deliver`], which matches them against the
//! expectations installed on the target aspect and turns each match into a
//! queued run tree.

use crate::error::{DeliveryStatus, HostError};
use crate::process::{make_run_tree, Action, ProcessQueue};
use crate::semtable::{sys::SIGNAL_ACK, SemTable};
use crate::tree::{Surface, Tree};
use crate::{semtrex, signal, Protocol, ReceptorAddress, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Receptor lifecycle. Only `Alive` receptors reduce and receive
/// deliveries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceptorState {
    Spawned,
    Alive,
    Dying,
    Dead,
}

/// When an expectation is removed. The default is persistent; a first-match
/// expectation is dropped after it fires once.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Until {
    #[default]
    Persistent,
    FirstMatch,
}

/// An installed (pattern, action) pair, triggered by incoming signals on an
/// aspect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Expectation {
    /// The protocol this expectation was expressed from, if any.
    pub protocol: Option<Protocol>,
    /// Semtrex matched against the signal body.
    pub pattern: Tree,
    /// Additional semtrex the body must also satisfy for the expectation to
    /// fire.
    pub where_clause: Option<Tree>,
    pub action: Action,
    pub until: Until,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AspectChannel {
    expectations: Vec<Expectation>,
    /// Signals delivered on this aspect, in arrival order.
    signals: Vec<Tree>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receptor {
    /// The symbol naming this receptor.
    pub symbol: Symbol,
    pub addr: ReceptorAddress,
    pub state: ReceptorState,
    aspects: HashMap<Symbol, AspectChannel>,
    /// In-flight reduction contexts, advanced by the host loop.
    pub q: ProcessQueue,
    pending_signals: Vec<Tree>,
}

impl Receptor {
    pub fn new(symbol: Symbol) -> Receptor {
        Receptor {
            symbol,
            addr: ReceptorAddress::vm_self(),
            state: ReceptorState::Spawned,
            aspects: HashMap::new(),
            q: ProcessQueue::default(),
            pending_signals: Vec::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == ReceptorState::Alive
    }

    pub fn add_expectation(&mut self, aspect: Symbol, e: Expectation) {
        self.aspects.entry(aspect).or_default().expectations.push(e);
    }

    pub fn expectation_count(&self, aspect: Symbol) -> usize {
        self.aspects
            .get(&aspect)
            .map(|c| c.expectations.len())
            .unwrap_or(0)
    }

    /// Signals that arrived on an aspect, in arrival order.
    pub fn aspect_signals(&self, aspect: Symbol) -> &[Tree] {
        self.aspects
            .get(&aspect)
            .map(|c| c.signals.as_slice())
            .unwrap_or(&[])
    }

    /// Queue a signal for the host to route. Ownership of the signal passes
    /// in; the returned acknowledgement tree passes to the caller.
    pub fn send(&mut self, signal: Tree) -> Tree {
        let ack = match signal::uuid(&signal) {
            Some(u) => Tree::with_root(SIGNAL_ACK, Surface::Uuid(u)),
            None => Tree::with_root(SIGNAL_ACK, Surface::None),
        };
        self.pending_signals.push(signal);
        ack
    }

    pub fn pending_count(&self) -> usize {
        self.pending_signals.len()
    }

    /// Drain the outbox, in emission order.
    pub fn take_pending(&mut self) -> Vec<Tree> {
        std::mem::take(&mut self.pending_signals)
    }

    /// Match a signal against the expectations on its target aspect. Every
    /// matching expectation enqueues exactly one run tree, with the capture
    /// groups bound as its params; the signal itself is recorded on the
    /// aspect either way.
    pub fn deliver(&mut self, sem: &SemTable, signal: Tree) -> Result<DeliveryStatus, HostError> {
        if !self.is_alive() {
            return Err(HostError::DeadReceptor(self.addr));
        }
        let aspect =
            signal::aspect(&signal).ok_or(HostError::BadSignalShape("header names no aspect"))?;
        let body =
            signal::body_node(&signal).ok_or(HostError::BadSignalShape("signal has no body"))?;

        let mut runs = Vec::new();
        let mut spent = Vec::new();
        if let Some(channel) = self.aspects.get(&aspect) {
            for (i, e) in channel.expectations.iter().enumerate() {
                let Some(results) = semtrex::match_tree(&e.pattern, e.pattern.root(), &signal, body)
                else {
                    continue;
                };
                if let Some(w) = &e.where_clause {
                    if !semtrex::matches(w, w.root(), &signal, body) {
                        continue;
                    }
                }
                let mut params = Vec::new();
                for m in results.child_nodes(results.root()) {
                    let path = results
                        .child(m, 1)
                        .and_then(|c| results.as_path(c).cloned())
                        .unwrap_or_default();
                    if let Some(src) = signal.node_at(body, &path) {
                        params.push(signal.extract(src));
                    }
                }
                let run = make_run_tree(sem, &e.action, &params)
                    .map_err(|err| HostError::RunTree(err.to_string()))?;
                runs.push(run);
                if e.until == Until::FirstMatch {
                    spent.push(i);
                }
            }
        }

        let fired = !runs.is_empty();
        for run in runs {
            self.q.enqueue(run);
        }
        let channel = self.aspects.entry(aspect).or_default();
        for &i in spent.iter().rev() {
            channel.expectations.remove(i);
        }
        channel.signals.push(signal);

        tracing::debug!(
            target: "ceptr::receptor",
            addr = self.addr.addr,
            fired,
            "delivery"
        );
        Ok(if fired {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::NoMatch
        })
    }

    /// `Alive → Dying → Dead`. Anything still queued stays introspectable;
    /// a dead receptor neither reduces nor accepts deliveries.
    pub fn kill(&mut self) {
        self.state = ReceptorState::Dying;
        tracing::debug!(target: "ceptr::receptor", addr = self.addr.addr, "dying");
        self.state = ReceptorState::Dead;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::RunState;
    use crate::semtable::sys::*;
    use crate::semtrex::symbol_literal;

    fn setup() -> (SemTable, Symbol, Receptor) {
        let mut sem = SemTable::new();
        let c = sem.new_context();
        let ti = sem.define_symbol(c, INTEGER, "TEST_INT").unwrap();
        let mut r = Receptor::new(SYS_RECEPTOR);
        r.addr = ReceptorAddress::vm(1);
        r.state = ReceptorState::Alive;
        (sem, ti, r)
    }

    fn int_pattern(ti: Symbol) -> Tree {
        // %TEST_INT{ TEST_INT }  -- capture the whole matched body
        let mut p = Tree::with_root(SEMTREX_GROUP, Surface::Sem(ti));
        let root = p.root();
        symbol_literal(&mut p, root, ti);
        p
    }

    fn int_signal(to: ReceptorAddress, ti: Symbol, v: i64) -> Tree {
        let body = Tree::with_root(ti, Surface::Int(v));
        signal::make_signal(
            ReceptorAddress::vm(0),
            to,
            DEFAULT_ASPECT,
            ti,
            &body,
            None,
            None,
            None,
        )
    }

    #[test]
    fn matching_delivery_enqueues_one_run_tree() -> Result<(), HostError> {
        let (sem, ti, mut r) = setup();
        r.add_expectation(
            DEFAULT_ASPECT,
            Expectation {
                protocol: None,
                where_clause: None,
                pattern: int_pattern(ti),
                action: Action::Process(NOOP),
                until: Until::Persistent,
            },
        );

        let status = r.deliver(&sem, int_signal(r.addr, ti, 5))?;
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(r.q.len(), 1);
        // the captured body is bound as the first param
        let run = &r.q.runs()[0].run;
        let params = run.child(run.root(), 2).unwrap();
        let p1 = run.child(params, 1).unwrap();
        assert_eq!((run.symbol(p1), run.as_int(p1)), (ti, Some(5)));

        // persistent: a second matching signal enqueues again
        r.deliver(&sem, int_signal(r.addr, ti, 6))?;
        assert_eq!(r.q.len(), 2);
        assert_eq!(r.expectation_count(DEFAULT_ASPECT), 1);
        assert_eq!(r.aspect_signals(DEFAULT_ASPECT).len(), 2);
        Ok(())
    }

    #[test]
    fn first_match_expectations_are_spent() -> Result<(), HostError> {
        let (sem, ti, mut r) = setup();
        r.add_expectation(
            DEFAULT_ASPECT,
            Expectation {
                protocol: None,
                where_clause: None,
                pattern: int_pattern(ti),
                action: Action::Process(NOOP),
                until: Until::FirstMatch,
            },
        );
        assert_eq!(r.deliver(&sem, int_signal(r.addr, ti, 1))?, DeliveryStatus::Delivered);
        assert_eq!(r.expectation_count(DEFAULT_ASPECT), 0);
        assert_eq!(r.deliver(&sem, int_signal(r.addr, ti, 2))?, DeliveryStatus::NoMatch);
        assert_eq!(r.q.len(), 1);
        Ok(())
    }

    #[test]
    fn where_clauses_filter_matches() -> Result<(), HostError> {
        let (sem, ti, mut r) = setup();
        // pattern matches any TEST_INT; the where clause wants the value 7
        let mut wanted = Tree::with_root(SEMTREX_VALUE_LITERAL, Surface::None);
        let root = wanted.root();
        wanted.newi(root, ti, 7);
        r.add_expectation(
            DEFAULT_ASPECT,
            Expectation {
                protocol: None,
                pattern: int_pattern(ti),
                where_clause: Some(wanted),
                action: Action::Process(NOOP),
                until: Until::Persistent,
            },
        );

        assert_eq!(r.deliver(&sem, int_signal(r.addr, ti, 3))?, DeliveryStatus::NoMatch);
        assert!(r.q.is_empty());
        assert_eq!(r.deliver(&sem, int_signal(r.addr, ti, 7))?, DeliveryStatus::Delivered);
        assert_eq!(r.q.len(), 1);
        Ok(())
    }

    #[test]
    fn unmatched_delivery_is_recorded_but_silent() -> Result<(), HostError> {
        let (sem, ti, mut r) = setup();
        let status = r.deliver(&sem, int_signal(r.addr, ti, 9))?;
        assert_eq!(status, DeliveryStatus::NoMatch);
        assert!(r.q.is_empty());
        assert_eq!(r.aspect_signals(DEFAULT_ASPECT).len(), 1);
        Ok(())
    }

    #[test]
    fn dead_receptors_refuse_delivery() {
        let (sem, ti, mut r) = setup();
        r.kill();
        assert_eq!(r.state, ReceptorState::Dead);
        let err = r.deliver(&sem, int_signal(r.addr, ti, 1)).unwrap_err();
        assert_eq!(err, HostError::DeadReceptor(ReceptorAddress::vm(1)));
    }

    #[test]
    fn send_queues_and_acknowledges() {
        let (_, ti, mut r) = setup();
        let mut s = int_signal(ReceptorAddress::vm(2), ti, 1);
        let u = uuid::Uuid::new_v4();
        let h = signal::header(&s).unwrap();
        s.new_node(h, SIGNAL_UUID, Surface::Uuid(u));

        let ack = r.send(s);
        assert_eq!(ack.symbol(ack.root()), SIGNAL_ACK);
        assert_eq!(ack.surface(ack.root()), &Surface::Uuid(u));
        assert_eq!(r.pending_count(), 1);
        let drained = r.take_pending();
        assert_eq!(drained.len(), 1);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn delivered_run_trees_reduce_with_their_captures() -> Result<(), HostError> {
        let (mut sem, ti, mut r) = setup();
        // double(x) == x + x, applied to whatever the pattern captured
        let mut code = Tree::with_root(ADD_INT, Surface::None);
        let root = code.root();
        code.newi(root, PARAM_REF, 1);
        code.newi(root, PARAM_REF, 1);
        let double = sem
            .define_process(ti.context, Some(code), "double", "", &[], None)
            .unwrap();

        r.add_expectation(
            DEFAULT_ASPECT,
            Expectation {
                protocol: None,
                where_clause: None,
                pattern: int_pattern(ti),
                action: Action::Process(double),
                until: Until::Persistent,
            },
        );
        r.deliver(&sem, int_signal(r.addr, ti, 21))?;
        r.q.reduce_q(&sem);
        r.q.reduce_q(&sem);
        r.q.reduce_q(&sem);
        r.q.reduce_q(&sem);
        assert!(r.q.runs().iter().all(|q| q.state != RunState::Errored));
        let done = r.q.cleanup();
        assert_eq!(done.len(), 1);
        let run = &done[0];
        let v = run.child(run.root(), 1).unwrap();
        assert_eq!((run.symbol(v), run.as_int(v)), (ti, Some(42)));
        Ok(())
    }
}
