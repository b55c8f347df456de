//! Per-context stores of symbol, structure, process and protocol
//! definitions, with name lookup in both directions.
//!
//! Context 0 is the system context: [`SemTable::new`] seeds it with the
//! well-known symbols, structures and built-in processes in [`sys`]. Ids are
//! small and monotonic per store; nothing is ever redefined or removed, so
//! readers can hold ids across later definitions.

use crate::tree::{Surface, Tree};
use crate::{CeptrError, Context, Process, Protocol, SemanticId, SemanticType, Structure, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which [`Surface`] variant nodes of a structure carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceKind {
    None,
    Int,
    Float,
    Sem,
    Addr,
    Path,
    Str,
    Bytes,
    Uuid,
    /// The payload is the node's children; no surface of its own.
    Tree,
}

impl SurfaceKind {
    fn admits(&self, surface: &Surface) -> bool {
        matches!(
            (self, surface),
            (SurfaceKind::None, Surface::None)
                | (SurfaceKind::Tree, Surface::None)
                | (SurfaceKind::Int, Surface::Int(_))
                | (SurfaceKind::Float, Surface::Float(_))
                | (SurfaceKind::Sem, Surface::Sem(_))
                | (SurfaceKind::Addr, Surface::Addr(_))
                | (SurfaceKind::Path, Surface::Path(_))
                | (SurfaceKind::Str, Surface::Str(_))
                | (SurfaceKind::Bytes, Surface::Bytes(_))
                | (SurfaceKind::Uuid, Surface::Uuid(_))
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StructureParts {
    Primitive(SurfaceKind),
    /// Required child symbols, in order.
    Composite(Vec<Symbol>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SymbolDef {
    pub label: String,
    pub structure: Structure,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructureDef {
    pub label: String,
    pub parts: StructureParts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessDef {
    pub label: String,
    pub doc: String,
    /// None for built-in processes; user-defined processes carry their code
    /// tree here.
    pub code: Option<Tree>,
    pub input: Vec<Structure>,
    pub output: Option<Structure>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolDefEntry {
    pub label: String,
    pub def: Tree,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ContextStore {
    symbols: Vec<SymbolDef>,
    structures: Vec<StructureDef>,
    processes: Vec<ProcessDef>,
    protocols: Vec<ProtocolDefEntry>,
    names: HashMap<String, SemanticId>,
}

/// The registry binding semantic ids to definitions across contexts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemTable {
    stores: Vec<ContextStore>,
}

impl SemTable {
    /// A table with the system context (context 0) fully seeded.
    pub fn new() -> SemTable {
        let mut sem = SemTable { stores: Vec::new() };
        let c = sem.new_context();
        debug_assert_eq!(c, sys::SYS_CONTEXT);
        sys::bootstrap(&mut sem);
        sem
    }

    /// Open a fresh definition namespace.
    pub fn new_context(&mut self) -> Context {
        self.stores.push(ContextStore::default());
        self.stores.len() as Context - 1
    }

    pub fn contexts(&self) -> usize {
        self.stores.len()
    }

    fn store_mut(&mut self, context: Context) -> Result<&mut ContextStore, CeptrError> {
        self.stores
            .get_mut(context as usize)
            .ok_or_else(|| format!("context {context} does not exist").into())
    }

    pub fn define_symbol(
        &mut self,
        context: Context,
        structure: Structure,
        label: &str,
    ) -> Result<Symbol, CeptrError> {
        let store = self.store_mut(context)?;
        let id = SemanticId::new(context, SemanticType::Symbol, store.symbols.len() as u32);
        store.symbols.push(SymbolDef {
            label: label.to_owned(),
            structure,
        });
        store.names.insert(label.to_owned(), id);
        Ok(id)
    }

    /// Define a composite structure listing its required child symbols.
    pub fn define_structure(
        &mut self,
        context: Context,
        label: &str,
        parts: &[Symbol],
    ) -> Result<Structure, CeptrError> {
        self.define_structure_parts(context, label, StructureParts::Composite(parts.to_vec()))
    }

    pub fn define_structure_parts(
        &mut self,
        context: Context,
        label: &str,
        parts: StructureParts,
    ) -> Result<Structure, CeptrError> {
        let store = self.store_mut(context)?;
        let id = SemanticId::new(context, SemanticType::Structure, store.structures.len() as u32);
        store.structures.push(StructureDef {
            label: label.to_owned(),
            parts,
        });
        store.names.insert(label.to_owned(), id);
        Ok(id)
    }

    pub fn define_process(
        &mut self,
        context: Context,
        code: Option<Tree>,
        label: &str,
        doc: &str,
        input: &[Structure],
        output: Option<Structure>,
    ) -> Result<Process, CeptrError> {
        let store = self.store_mut(context)?;
        let id = SemanticId::new(context, SemanticType::Process, store.processes.len() as u32);
        store.processes.push(ProcessDef {
            label: label.to_owned(),
            doc: doc.to_owned(),
            code,
            input: input.to_vec(),
            output,
        });
        store.names.insert(label.to_owned(), id);
        Ok(id)
    }

    pub fn define_protocol(
        &mut self,
        context: Context,
        label: &str,
        def: Tree,
    ) -> Result<Protocol, CeptrError> {
        let store = self.store_mut(context)?;
        let id = SemanticId::new(context, SemanticType::Protocol, store.protocols.len() as u32);
        store.protocols.push(ProtocolDefEntry {
            label: label.to_owned(),
            def,
        });
        store.names.insert(label.to_owned(), id);
        Ok(id)
    }

    /// True when `id` is resolvable in this table.
    pub fn is_defined(&self, id: SemanticId) -> bool {
        let Some(store) = self.stores.get(id.context as usize) else {
            return false;
        };
        let i = id.id as usize;
        match id.semtype {
            SemanticType::Symbol => i < store.symbols.len(),
            SemanticType::Structure => i < store.structures.len(),
            SemanticType::Process => i < store.processes.len(),
            SemanticType::Protocol => i < store.protocols.len(),
            SemanticType::Receptor => true,
        }
    }

    /// Inverse name lookup.
    pub fn get_name(&self, id: SemanticId) -> Option<&str> {
        let store = self.stores.get(id.context as usize)?;
        let i = id.id as usize;
        match id.semtype {
            SemanticType::Symbol => store.symbols.get(i).map(|d| d.label.as_str()),
            SemanticType::Structure => store.structures.get(i).map(|d| d.label.as_str()),
            SemanticType::Process => store.processes.get(i).map(|d| d.label.as_str()),
            SemanticType::Protocol => store.protocols.get(i).map(|d| d.label.as_str()),
            SemanticType::Receptor => None,
        }
    }

    /// Name to id within one context.
    pub fn lookup(&self, context: Context, name: &str) -> Option<SemanticId> {
        self.stores.get(context as usize)?.names.get(name).copied()
    }

    pub fn symbol_def(&self, sym: Symbol) -> Option<&SymbolDef> {
        self.stores.get(sym.context as usize)?.symbols.get(sym.id as usize)
    }

    /// The structure a symbol's payload is shaped by.
    pub fn get_symbol_structure(&self, sym: Symbol) -> Option<Structure> {
        Some(self.symbol_def(sym)?.structure)
    }

    pub fn structure_def(&self, s: Structure) -> Option<&StructureDef> {
        self.stores.get(s.context as usize)?.structures.get(s.id as usize)
    }

    pub fn process_def(&self, p: Process) -> Option<&ProcessDef> {
        self.stores.get(p.context as usize)?.processes.get(p.id as usize)
    }

    pub fn protocol_def(&self, p: Protocol) -> Option<&Tree> {
        Some(
            &self
                .stores
                .get(p.context as usize)?
                .protocols
                .get(p.id as usize)?
                .def,
        )
    }

    /// A process with no code tree is built in: the reducer implements it.
    pub fn is_builtin(&self, p: Process) -> bool {
        self.process_def(p).map(|d| d.code.is_none()).unwrap_or(false)
    }

    /// The surface kind a symbol's nodes must carry, if its structure is
    /// primitive.
    pub fn surface_kind_of(&self, sym: Symbol) -> Option<SurfaceKind> {
        let st = self.get_symbol_structure(sym)?;
        match &self.structure_def(st)?.parts {
            StructureParts::Primitive(k) => Some(*k),
            StructureParts::Composite(_) => None,
        }
    }

    /// Check that every symbol in the tree is defined here and that every
    /// surface matches its symbol's declared structure.
    pub fn validate(&self, t: &Tree) -> Result<(), CeptrError> {
        for n in t.pre_order(t.root()) {
            let sym = t.symbol(n);
            if !self.is_defined(sym) {
                return Err(format!("undefined symbol {sym:?} at {:?}", t.path_of(n)).into());
            }
            if let Some(kind) = self.surface_kind_of(sym) {
                if !kind.admits(t.surface(n)) {
                    return Err(format!(
                        "surface of {} at {:?} does not fit its structure",
                        self.get_name(sym).unwrap_or("?"),
                        t.path_of(n)
                    )
                    .into());
                }
            }
        }
        Ok(())
    }
}

impl Default for SemTable {
    fn default() -> Self {
        SemTable::new()
    }
}

/// Well-known definitions in the system context.
///
/// The const ids below must line up with the bootstrap registration order;
/// registration asserts the correspondence.
pub mod sys {
    use super::{SemTable, StructureParts, SurfaceKind};
    use crate::{Context, Process, SemanticId, SemanticType, Structure, Symbol};

    pub const SYS_CONTEXT: Context = 0;

    macro_rules! sys_structures {
        ($($name:ident = $id:literal => $kind:ident;)*) => {
            $(pub const $name: Structure = SemanticId::sys(SemanticType::Structure, $id);)*
            fn bootstrap_structures(sem: &mut SemTable) {
                $(
                    let got = sem
                        .define_structure_parts(
                            SYS_CONTEXT,
                            stringify!($name),
                            StructureParts::Primitive(SurfaceKind::$kind),
                        )
                        .expect("system context exists");
                    assert_eq!(got, $name);
                )*
            }
        };
    }

    macro_rules! sys_symbols {
        ($($name:ident = $id:literal => $structure:ident;)*) => {
            $(pub const $name: Symbol = SemanticId::sys(SemanticType::Symbol, $id);)*
            fn bootstrap_symbols(sem: &mut SemTable) {
                $(
                    let got = sem
                        .define_symbol(SYS_CONTEXT, $structure, stringify!($name))
                        .expect("system context exists");
                    assert_eq!(got, $name);
                )*
            }
        };
    }

    macro_rules! sys_processes {
        ($($name:ident = $id:literal;)*) => {
            $(pub const $name: Process = SemanticId::sys(SemanticType::Process, $id);)*
            fn bootstrap_processes(sem: &mut SemTable) {
                $(
                    let got = sem
                        .define_process(SYS_CONTEXT, None, stringify!($name), "", &[], None)
                        .expect("system context exists");
                    assert_eq!(got, $name);
                )*
            }
        };
    }

    sys_structures! {
        NULL_STRUCTURE = 0 => None;
        INTEGER = 1 => Int;
        FLOAT = 2 => Float;
        BOOLEAN = 3 => Int;
        CSTRING = 4 => Str;
        BINARY = 5 => Bytes;
        SYMBOL = 6 => Sem;
        PROCESS = 7 => Sem;
        TREE = 8 => Tree;
        RECEPTOR_ADDRESS = 9 => Addr;
        TREE_PATH = 10 => Path;
        UUID = 11 => Uuid;
        PROTOCOL = 12 => Sem;
        INTERACTION = 13 => Tree;
    }

    sys_symbols! {
        NULL_SYMBOL = 0 => NULL_STRUCTURE;
        DEFAULT_ASPECT = 1 => NULL_STRUCTURE;

        // signal envelope
        SIGNAL = 2 => TREE;
        ENVELOPE = 3 => TREE;
        MESSAGE_HEADER = 4 => TREE;
        FROM_ADDRESS = 5 => RECEPTOR_ADDRESS;
        TO_ADDRESS = 6 => RECEPTOR_ADDRESS;
        ASPECT = 7 => SYMBOL;
        CARRIER = 8 => SYMBOL;
        TIMESTAMP = 9 => INTEGER;
        SIGNAL_UUID = 10 => UUID;
        IN_RESPONSE_TO_UUID = 11 => UUID;
        CONVERSATION_UUID = 12 => UUID;
        BODY = 13 => TREE;
        SIGNAL_ACK = 14 => UUID;

        // run trees
        RUN_TREE = 15 => TREE;
        PARAMS = 16 => TREE;
        PARAM_REF = 17 => INTEGER;
        TRUE_FALSE = 18 => BOOLEAN;

        // reducer errors, written into the run tree
        REDUCTION_ERROR = 19 => TREE;
        ERROR_SYMBOL = 20 => SYMBOL;
        ERROR_DESCRIPTION = 21 => CSTRING;
        ERROR_PATH = 22 => TREE_PATH;
        ZERO_DIVISION = 23 => NULL_STRUCTURE;
        PARAM_OUT_OF_RANGE = 24 => NULL_STRUCTURE;
        NOT_REDUCIBLE = 25 => NULL_STRUCTURE;
        BAD_ARITY = 26 => NULL_STRUCTURE;
        UNKNOWN_SYMBOL = 27 => NULL_STRUCTURE;

        // semtrex combinators and match results
        SEMTREX_SYMBOL_LITERAL = 28 => TREE;
        SEMTREX_SYMBOL_ANY = 29 => TREE;
        SEMTREX_SEQUENCE = 30 => TREE;
        SEMTREX_OR = 31 => TREE;
        SEMTREX_NOT = 32 => TREE;
        SEMTREX_ZERO_OR_MORE = 33 => TREE;
        SEMTREX_ONE_OR_MORE = 34 => TREE;
        SEMTREX_ZERO_OR_ONE = 35 => TREE;
        SEMTREX_VALUE_LITERAL = 36 => TREE;
        SEMTREX_GROUP = 37 => SYMBOL;
        SEMTREX_WALK = 38 => TREE;
        SEMTREX_SYMBOL = 39 => SYMBOL;
        SEMTREX_MATCH_RESULTS = 40 => TREE;
        SEMTREX_MATCH = 41 => SYMBOL;
        SEMTREX_MATCHED_PATH = 42 => TREE_PATH;
        SEMTREX_MATCH_SIBLINGS_COUNT = 43 => INTEGER;
        INTERPOLATE_SYMBOL = 44 => SYMBOL;

        // protocol definitions
        PROTOCOL_DEFINITION = 45 => TREE;
        PROTOCOL_LABEL = 46 => CSTRING;
        PROTOCOL_SEMANTICS = 47 => TREE;
        PROTOCOL_BINDINGS = 48 => TREE;
        ROLE = 49 => SYMBOL;
        GOAL = 50 => PROCESS;
        USAGE = 51 => SYMBOL;
        EXPECT = 52 => TREE;
        INITIATE = 53 => TREE;
        SOURCE = 54 => TREE;
        DESTINATION = 55 => TREE;
        ACTION = 56 => PROCESS;
        INCLUSION = 57 => TREE;
        PNAME = 58 => PROTOCOL;
        CONNECTION = 59 => TREE;
        RESOLUTION = 60 => TREE;
        WHICH_SYMBOL = 61 => TREE;
        WHICH_PROCESS = 62 => TREE;
        WHICH_RECEPTOR = 63 => TREE;
        WHICH_ROLE = 64 => TREE;
        WHICH_GOAL = 65 => TREE;
        WHICH_USAGE = 66 => TREE;
        ACTUAL_SYMBOL = 67 => SYMBOL;
        ACTUAL_PROCESS = 68 => PROCESS;
        ACTUAL_RECEPTOR = 69 => RECEPTOR_ADDRESS;

        // built-in receptors and carriers
        CLOCK_TICK = 70 => INTEGER;
        LINE = 71 => CSTRING;
        SYS_RECEPTOR = 72 => NULL_STRUCTURE;
        CLOCK_RECEPTOR = 73 => NULL_STRUCTURE;
    }

    sys_processes! {
        NOOP = 0;
        IF = 1;
        ADD_INT = 2;
        SUB_INT = 3;
        MULT_INT = 4;
        DIV_INT = 5;
        MOD_INT = 6;
        EQ_INT = 7;
        LT_INT = 8;
        GT_INT = 9;
        INTERPOLATE_FROM_MATCH = 10;
    }

    pub(super) fn bootstrap(sem: &mut SemTable) {
        bootstrap_structures(sem);
        bootstrap_symbols(sem);
        bootstrap_processes(sem);
    }
}
