/*
    A semantic computing substrate: a VM host contains receptors (isolated
    actors) that exchange signals carrying semantic trees over named aspects.

    All reduction is single threaded; a receptor's run queue is only ever
    advanced by the host's process loop, so receptors need no internal
    locking. The only cross-thread traffic is whole signal trees moving over
    channels (the clock thread and stream bridges inject signals, the host
    drains them between loop iterations).

    Trees are arenas of slots addressed by integer handles. A handle stays
    valid while its slot is occupied, which makes in-place rewriting (the
    reducer's bread and butter) safe without any pointer juggling: the
    rewritten node keeps its handle and its place under its parent.
*/

pub mod error;
pub mod process;
pub mod protocol;
pub mod receptor;
pub mod semtable;
pub mod semtrex;
pub mod signal;
pub mod tree;
pub mod vmhost;

pub mod prelude {
    pub use crate::error::{DeliveryStatus, HostError};
    pub use crate::semtable::{sys, SemTable};
    pub use crate::tree::{Node, Surface, Tree, TreePath};
    pub use crate::{
        AddressKind, CeptrError, Context, Process, Protocol, ReceptorAddress, SemanticId,
        SemanticType, Structure, Symbol, SELF_RECEPTOR_ADDR,
    };
}

use serde::{Deserialize, Serialize};

/// The error type.
pub type CeptrError = Box<dyn std::error::Error + Send + Sync>;

/// A definition namespace. Context 0 is the system context, created by
/// [`semtable::SemTable::new`].
pub type Context = u16;

/// What kind of definition a [`SemanticId`] refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum SemanticType {
    Symbol,
    Structure,
    Process,
    Protocol,
    Receptor,
}

/// Identifies a definition: a (context, type, id) triple.
///
/// Equality is component-wise; `id` indexes into the context's store for the
/// given type. Symbols, structures, processes and protocols are all semantic
/// ids, distinguished only by `semtype`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SemanticId {
    pub context: Context,
    pub semtype: SemanticType,
    pub id: u32,
}

impl SemanticId {
    pub const fn new(context: Context, semtype: SemanticType, id: u32) -> Self {
        SemanticId {
            context,
            semtype,
            id,
        }
    }

    /// An id in the system context.
    pub const fn sys(semtype: SemanticType, id: u32) -> Self {
        SemanticId::new(0, semtype, id)
    }

    /// Component-wise equality, under its traditional name.
    pub fn semeq(&self, other: &SemanticId) -> bool {
        self == other
    }
}

/// A semantic id known to be of type symbol.
pub type Symbol = SemanticId;
/// A semantic id known to be of type structure.
pub type Structure = SemanticId;
/// A semantic id known to be of type process.
pub type Process = SemanticId;
/// A semantic id known to be of type protocol.
pub type Protocol = SemanticId;

/// Transport kind of a receptor address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum AddressKind {
    Vm,
    UnixDomain,
}

/// Placeholder address component meaning "the sending receptor itself";
/// rewritten to the sender's routing-table slot at delivery time.
pub const SELF_RECEPTOR_ADDR: i32 = -1;

/// Where a signal comes from or goes to: a routing-table slot within one VM.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ReceptorAddress {
    pub kind: AddressKind,
    pub addr: i32,
}

impl ReceptorAddress {
    pub const fn vm(addr: i32) -> Self {
        ReceptorAddress {
            kind: AddressKind::Vm,
            addr,
        }
    }

    /// The self placeholder, resolved against the sender on delivery.
    pub const fn vm_self() -> Self {
        ReceptorAddress::vm(SELF_RECEPTOR_ADDR)
    }

    pub fn is_self(&self) -> bool {
        self.addr == SELF_RECEPTOR_ADDR
    }
}
