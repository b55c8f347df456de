//! Signal construction and envelope access.
//!
//! A signal is an ordinary tree:
//! `SIGNAL { ENVELOPE { MESSAGE_HEADER { … } }, BODY { payload } }` with the
//! header recording from/to addresses, aspect, carrier, a wall-clock
//! timestamp and the optional uuid triple. Only this in-process form is
//! normative; nothing here serializes for the wire.

use crate::semtable::sys::*;
use crate::tree::{Node, Surface, Tree};
use crate::{ReceptorAddress, Symbol};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Build a signal tree. The body is adopted whole under `BODY`; the
/// timestamp is the wall clock at construction, at second resolution.
#[allow(clippy::too_many_arguments)]
pub fn make_signal(
    from: ReceptorAddress,
    to: ReceptorAddress,
    aspect: Symbol,
    carrier: Symbol,
    body: &Tree,
    uuid: Option<Uuid>,
    in_response_to: Option<Uuid>,
    conversation: Option<Uuid>,
) -> Tree {
    let mut s = Tree::with_root(SIGNAL, Surface::None);
    let root = s.root();
    let envelope = s.newr(root, ENVELOPE);
    let header = s.newr(envelope, MESSAGE_HEADER);
    s.new_node(header, FROM_ADDRESS, Surface::Addr(from));
    s.new_node(header, TO_ADDRESS, Surface::Addr(to));
    s.news(header, ASPECT, aspect);
    s.news(header, CARRIER, carrier);
    s.newi(header, TIMESTAMP, now_secs());
    if let Some(u) = uuid {
        s.new_node(header, SIGNAL_UUID, Surface::Uuid(u));
    }
    if let Some(u) = in_response_to {
        s.new_node(header, IN_RESPONSE_TO_UUID, Surface::Uuid(u));
    }
    if let Some(u) = conversation {
        s.new_node(header, CONVERSATION_UUID, Surface::Uuid(u));
    }
    let b = s.newr(root, BODY);
    s.adopt(b, body, body.root());
    s
}

/// The `MESSAGE_HEADER` node of a signal.
pub fn header(s: &Tree) -> Option<Node> {
    let envelope = s.child(s.root(), 1)?;
    s.child(envelope, 1)
        .filter(|&h| s.symbol(h) == MESSAGE_HEADER)
}

fn header_field(s: &Tree, field: Symbol) -> Option<Node> {
    let h = header(s)?;
    s.child_nodes(h).into_iter().find(|&c| s.symbol(c) == field)
}

pub fn from(s: &Tree) -> Option<ReceptorAddress> {
    s.as_addr(header_field(s, FROM_ADDRESS)?)
}

pub fn to(s: &Tree) -> Option<ReceptorAddress> {
    s.as_addr(header_field(s, TO_ADDRESS)?)
}

pub fn aspect(s: &Tree) -> Option<Symbol> {
    s.as_sem(header_field(s, ASPECT)?)
}

pub fn carrier(s: &Tree) -> Option<Symbol> {
    s.as_sem(header_field(s, CARRIER)?)
}

pub fn timestamp(s: &Tree) -> Option<i64> {
    s.as_int(header_field(s, TIMESTAMP)?)
}

pub fn uuid(s: &Tree) -> Option<Uuid> {
    match s.surface(header_field(s, SIGNAL_UUID)?) {
        Surface::Uuid(u) => Some(*u),
        _ => None,
    }
}

/// Rewrite the from address (used to resolve the self placeholder).
pub fn set_from(s: &mut Tree, addr: ReceptorAddress) -> bool {
    match header_field(s, FROM_ADDRESS) {
        Some(n) => {
            s.set_surface(n, Surface::Addr(addr));
            true
        }
        None => false,
    }
}

/// Rewrite the to address.
pub fn set_to(s: &mut Tree, addr: ReceptorAddress) -> bool {
    match header_field(s, TO_ADDRESS) {
        Some(n) => {
            s.set_surface(n, Surface::Addr(addr));
            true
        }
        None => false,
    }
}

/// The payload root: the first child under `BODY`.
pub fn body_node(s: &Tree) -> Option<Node> {
    let b = s.child(s.root(), 2)?;
    if s.symbol(b) != BODY {
        return None;
    }
    s.child(b, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_carries_the_envelope_fields() {
        let body = Tree::with_root(LINE, Surface::Str("fish".into()));
        let u = Uuid::new_v4();
        let s = make_signal(
            ReceptorAddress::vm(0),
            ReceptorAddress::vm(0),
            DEFAULT_ASPECT,
            LINE,
            &body,
            Some(u),
            None,
            None,
        );

        assert_eq!(from(&s), Some(ReceptorAddress::vm(0)));
        assert_eq!(to(&s), Some(ReceptorAddress::vm(0)));
        assert_eq!(aspect(&s), Some(DEFAULT_ASPECT));
        assert_eq!(carrier(&s), Some(LINE));
        assert_eq!(uuid(&s), Some(u));

        let b = body_node(&s).unwrap();
        assert_eq!(s.symbol(b), LINE);
        assert_eq!(s.as_str(b), Some("fish"));

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let ts = timestamp(&s).unwrap();
        assert!((now - ts).abs() <= 1);
    }

    #[test]
    fn self_placeholder_can_be_rewritten() {
        let body = Tree::with_root(LINE, Surface::Str("x".into()));
        let mut s = make_signal(
            ReceptorAddress::vm_self(),
            ReceptorAddress::vm(3),
            DEFAULT_ASPECT,
            LINE,
            &body,
            None,
            None,
            None,
        );
        assert!(from(&s).unwrap().is_self());
        assert!(set_from(&mut s, ReceptorAddress::vm(7)));
        assert_eq!(from(&s), Some(ReceptorAddress::vm(7)));
        // optional header fields are simply absent
        assert_eq!(uuid(&s), None);
    }
}
