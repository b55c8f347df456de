//! Protocols: declarative bundles of roles, goals and role-bound
//! expectation/initiation rules, composing via inclusion.
//!
//! A protocol definition is a tree:
//!
//! ```text
//! PROTOCOL_DEFINITION {
//!     PROTOCOL_LABEL: "…",
//!     PROTOCOL_SEMANTICS { ROLE:…, GOAL:…, USAGE:… },
//!     <interaction> { EXPECT { ROLE, SOURCE{ROLE}, pattern, ACTION|GOAL },
//!                     INITIATE { ROLE, DESTINATION{ROLE}, ACTION|GOAL } }…,
//!     INCLUSION { PNAME, CONNECTION…, RESOLUTION… }…,
//! }
//! ```
//!
//! Each `<interaction>` is a symbol defined on the fly whose structure is
//! `INTERACTION`. [`ProtocolBuilder`] produces these trees with typed
//! chaining (misuse is a [`HostError::ProtocolBuild`], never a crash);
//! [`unwrap`] expands inclusions, [`resolve`] binds abstract goals, usages
//! and roles to concrete ones, and [`express_role`] installs the resulting
//! expectations into a receptor.

use crate::error::HostError;
use crate::process::Action;
use crate::receptor::{Expectation, Receptor, Until};
use crate::semtable::{sys::*, SemTable};
use crate::tree::{Node, Surface, Tree};
use crate::{semtrex, Context, Protocol, ReceptorAddress, Symbol};

/// Child index of `PROTOCOL_SEMANTICS` in a definition.
const SEMANTICS_IDX: usize = 2;

/// The action side of an expect/initiate rule: a concrete process, or an
/// abstract goal to be bound later.
#[derive(Copy, Clone, Debug)]
pub enum ProtocolAction {
    Process(crate::Process),
    Goal(crate::Process),
}

fn action_leaf(def: &mut Tree, parent: Node, action: ProtocolAction) {
    match action {
        ProtocolAction::Process(p) => def.news(parent, ACTION, p),
        ProtocolAction::Goal(g) => def.news(parent, GOAL, g),
    };
}

/// Builds `PROTOCOL_DEFINITION` trees and registers them in the semantic
/// table. Errors are sticky: the first misuse is reported by
/// [`ProtocolBuilder::define`] and later calls are ignored.
pub struct ProtocolBuilder<'a> {
    sem: &'a mut SemTable,
    context: Context,
    label: String,
    def: Tree,
    error: Option<String>,
}

impl<'a> ProtocolBuilder<'a> {
    pub fn new(sem: &'a mut SemTable, context: Context, label: &str) -> ProtocolBuilder<'a> {
        let mut def = Tree::with_root(PROTOCOL_DEFINITION, Surface::None);
        let root = def.root();
        def.new_str(root, PROTOCOL_LABEL, label);
        def.newr(root, PROTOCOL_SEMANTICS);
        ProtocolBuilder {
            sem,
            context,
            label: label.to_owned(),
            def,
            error: None,
        }
    }

    fn semantics(&self) -> Node {
        self.def
            .child(self.def.root(), SEMANTICS_IDX)
            .expect("built in new")
    }

    pub fn role(mut self, role: Symbol) -> Self {
        let s = self.semantics();
        self.def.news(s, ROLE, role);
        self
    }

    pub fn goal(mut self, goal: crate::Process) -> Self {
        let s = self.semantics();
        self.def.news(s, GOAL, goal);
        self
    }

    pub fn usage(mut self, usage: Symbol) -> Self {
        let s = self.semantics();
        self.def.news(s, USAGE, usage);
        self
    }

    /// Open an interaction: defines a symbol with `INTERACTION` structure in
    /// the protocol's context and hands its rules to the closure.
    pub fn interaction<F>(mut self, label: &str, f: F) -> Self
    where
        F: FnOnce(InteractionBuilder) -> InteractionBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        let isym = match self.sem.define_symbol(self.context, INTERACTION, label) {
            Ok(s) => s,
            Err(e) => {
                self.error = Some(e.to_string());
                return self;
            }
        };
        let root = self.def.root();
        let node = self.def.newr(root, isym);
        let ib = InteractionBuilder {
            def: &mut self.def,
            node,
        };
        f(ib);
        self
    }

    /// Include another protocol, wiring its abstract items up through the
    /// closure's connections and resolutions.
    pub fn include<F>(mut self, protocol: Protocol, f: F) -> Self
    where
        F: FnOnce(InclusionBuilder) -> InclusionBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        if self.sem.protocol_def(protocol).is_none() {
            self.error = Some(format!("included protocol {protocol:?} is not defined"));
            return self;
        }
        let root = self.def.root();
        let node = self.def.newr(root, INCLUSION);
        self.def.news(node, PNAME, protocol);
        let ib = InclusionBuilder {
            def: &mut self.def,
            node,
        };
        f(ib);
        self
    }

    /// Roles this definition may legitimately refer to: its own declared
    /// roles plus those contributed by included protocols.
    fn known_roles(&self) -> Result<Vec<Symbol>, HostError> {
        let mut roles = Vec::new();
        let s = self.semantics();
        for n in self.def.child_nodes(s) {
            if self.def.symbol(n) == ROLE {
                roles.extend(self.def.as_sem(n));
            }
        }
        for n in self.def.child_nodes(self.def.root()) {
            if self.def.symbol(n) != INCLUSION {
                continue;
            }
            let p = self
                .def
                .child(n, 1)
                .and_then(|c| self.def.as_sem(c))
                .ok_or_else(|| HostError::ProtocolBuild("inclusion names no protocol".into()))?;
            let inc = unwrap(self.sem, self.sem.protocol_def(p).expect("checked in include"))?;
            let Some(isem) = inc.child(inc.root(), SEMANTICS_IDX) else {
                continue;
            };
            for m in inc.child_nodes(isem) {
                if inc.symbol(m) == ROLE {
                    roles.extend(inc.as_sem(m));
                }
            }
        }
        Ok(roles)
    }

    /// Validate and register the definition.
    pub fn define(self) -> Result<Protocol, HostError> {
        if let Some(e) = self.error {
            return Err(HostError::ProtocolBuild(e));
        }
        if self.label.is_empty() {
            return Err(HostError::ProtocolBuild("protocol needs a label".into()));
        }
        let roles = self.known_roles()?;
        for t in self.def.child_nodes(self.def.root()) {
            if self.sem.get_symbol_structure(self.def.symbol(t)) != Some(INTERACTION) {
                continue;
            }
            for x in self.def.child_nodes(t) {
                let role = self.def.child(x, 1).and_then(|c| self.def.as_sem(c));
                match role {
                    Some(r) if roles.contains(&r) => {}
                    Some(r) => {
                        return Err(HostError::ProtocolBuild(format!(
                            "role {} is not declared",
                            self.sem.get_name(r).unwrap_or("?")
                        )))
                    }
                    None => {
                        return Err(HostError::ProtocolBuild(
                            "expect/initiate names no role".into(),
                        ))
                    }
                }
            }
        }
        self.sem
            .define_protocol(self.context, &self.label, self.def)
            .map_err(|e| HostError::ProtocolBuild(e.to_string()))
    }
}

/// Adds `EXPECT`/`INITIATE` rules to one interaction.
pub struct InteractionBuilder<'a> {
    def: &'a mut Tree,
    node: Node,
}

impl InteractionBuilder<'_> {
    /// Expect `pattern` from `source` while playing `role`; run `action` on
    /// a match.
    pub fn expect(
        self,
        role: Symbol,
        source: Symbol,
        pattern: &Tree,
        action: ProtocolAction,
    ) -> Self {
        let e = self.def.newr(self.node, EXPECT);
        self.def.news(e, ROLE, role);
        let s = self.def.newr(e, SOURCE);
        self.def.news(s, ROLE, source);
        self.def.adopt(e, pattern, pattern.root());
        action_leaf(self.def, e, action);
        self
    }

    /// While playing `role`, open the interaction towards `destination` by
    /// running `action`.
    pub fn initiate(self, role: Symbol, destination: Symbol, action: ProtocolAction) -> Self {
        let i = self.def.newr(self.node, INITIATE);
        self.def.news(i, ROLE, role);
        let d = self.def.newr(i, DESTINATION);
        self.def.news(d, ROLE, destination);
        action_leaf(self.def, i, action);
        self
    }
}

/// Adds connections and resolutions to one inclusion.
pub struct InclusionBuilder<'a> {
    def: &'a mut Tree,
    node: Node,
}

impl InclusionBuilder<'_> {
    fn connection(self, which: Symbol, tag: Symbol, from: Surface, to: Surface) -> Self {
        let c = self.def.newr(self.node, CONNECTION);
        let w = self.def.newr(c, which);
        self.def.new_node(w, tag, from);
        self.def.new_node(w, tag, to);
        self
    }

    fn resolution(self, which: Symbol, tag: Symbol, from: Surface, actual: Symbol, to: Surface) -> Self {
        let r = self.def.newr(self.node, RESOLUTION);
        let w = self.def.newr(r, which);
        self.def.new_node(w, tag, from);
        self.def.new_node(w, actual, to);
        self
    }

    /// Rename the included protocol's `from` role to `to`.
    pub fn which_role(self, from: Symbol, to: Symbol) -> Self {
        self.connection(WHICH_ROLE, ROLE, Surface::Sem(from), Surface::Sem(to))
    }

    pub fn which_goal(self, from: crate::Process, to: crate::Process) -> Self {
        self.connection(WHICH_GOAL, GOAL, Surface::Sem(from), Surface::Sem(to))
    }

    pub fn which_usage(self, from: Symbol, to: Symbol) -> Self {
        self.connection(WHICH_USAGE, USAGE, Surface::Sem(from), Surface::Sem(to))
    }

    /// Bind the included protocol's `usage` placeholder to a concrete
    /// symbol.
    pub fn which_symbol(self, usage: Symbol, actual: Symbol) -> Self {
        self.resolution(
            WHICH_SYMBOL,
            USAGE,
            Surface::Sem(usage),
            ACTUAL_SYMBOL,
            Surface::Sem(actual),
        )
    }

    /// Bind the included protocol's `goal` to a concrete process.
    pub fn which_process(self, goal: crate::Process, actual: crate::Process) -> Self {
        self.resolution(
            WHICH_PROCESS,
            GOAL,
            Surface::Sem(goal),
            ACTUAL_PROCESS,
            Surface::Sem(actual),
        )
    }

    /// Bind a role to a concrete receptor address.
    pub fn which_receptor(self, role: Symbol, actual: ReceptorAddress) -> Self {
        self.resolution(
            WHICH_RECEPTOR,
            ROLE,
            Surface::Sem(role),
            ACTUAL_RECEPTOR,
            Surface::Addr(actual),
        )
    }
}

/// Accumulates `RESOLUTION`s for [`resolve`] and [`express_role`].
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    tree: Option<Tree>,
}

impl Bindings {
    pub fn new() -> Bindings {
        Bindings::default()
    }

    fn root(&mut self) -> (&mut Tree, Node) {
        let t = self
            .tree
            .get_or_insert_with(|| Tree::with_root(PROTOCOL_BINDINGS, Surface::None));
        let root = t.root();
        (t, root)
    }

    fn resolution(mut self, which: Symbol, tag: Symbol, from: Surface, actual: Symbol, to: Surface) -> Self {
        let (t, root) = self.root();
        let r = t.newr(root, RESOLUTION);
        let w = t.newr(r, which);
        t.new_node(w, tag, from);
        t.new_node(w, actual, to);
        self
    }

    pub fn which_symbol(self, usage: Symbol, actual: Symbol) -> Self {
        self.resolution(
            WHICH_SYMBOL,
            USAGE,
            Surface::Sem(usage),
            ACTUAL_SYMBOL,
            Surface::Sem(actual),
        )
    }

    pub fn which_process(self, goal: crate::Process, actual: crate::Process) -> Self {
        self.resolution(
            WHICH_PROCESS,
            GOAL,
            Surface::Sem(goal),
            ACTUAL_PROCESS,
            Surface::Sem(actual),
        )
    }

    pub fn which_receptor(self, role: Symbol, actual: ReceptorAddress) -> Self {
        self.resolution(
            WHICH_RECEPTOR,
            ROLE,
            Surface::Sem(role),
            ACTUAL_RECEPTOR,
            Surface::Addr(actual),
        )
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }
}

fn build_error(e: impl std::fmt::Display) -> HostError {
    HostError::ProtocolBuild(e.to_string())
}

/// Recursively expand included protocol definitions into a standalone
/// clone. Connections rename, resolutions bind; whatever the inclusion left
/// abstract is merged into the parent's semantics for later binding.
/// Definitions with no inclusions come back as plain clones, so `unwrap` is
/// idempotent on them.
pub fn unwrap(sem: &SemTable, def: &Tree) -> Result<Tree, HostError> {
    let mut d = def.clone();
    let root = d.root();
    let inclusions: Vec<Node> = d
        .child_nodes(root)
        .into_iter()
        .filter(|&n| d.symbol(n) == INCLUSION)
        .collect();

    for inc in inclusions {
        let p = d
            .child(inc, 1)
            .filter(|&c| d.symbol(c) == PNAME)
            .and_then(|c| d.as_sem(c))
            .ok_or_else(|| build_error("inclusion names no protocol"))?;
        let included = sem
            .protocol_def(p)
            .ok_or(HostError::ProtocolNotFound(p))?;
        let mut p_def = unwrap(sem, included)?;

        let mut bindings: Option<Tree> = None;
        for x in &d.child_nodes(inc)[1..] {
            let x = *x;
            if d.symbol(x) == CONNECTION {
                let w = d
                    .child(x, 1)
                    .ok_or_else(|| build_error("connection is empty"))?;
                let src = d
                    .child(w, 1)
                    .ok_or_else(|| build_error("connection has no source"))?;
                let dst = d
                    .child(w, 2)
                    .ok_or_else(|| build_error("connection has no target"))?;
                // replace every node equal to the source with the target
                let mut stx = Tree::with_root(SEMTREX_WALK, Surface::None);
                let g = stx.news(stx.root(), SEMTREX_GROUP, d.symbol(src));
                let vl = stx.newr(g, SEMTREX_VALUE_LITERAL);
                stx.adopt(vl, &d, src);
                let replacement = d.extract(dst);
                semtrex::replace(&stx, stx.root(), &mut p_def, &replacement)
                    .map_err(build_error)?;
            } else if d.symbol(x) == RESOLUTION {
                let b = bindings
                    .get_or_insert_with(|| Tree::with_root(PROTOCOL_BINDINGS, Surface::None));
                let broot = b.root();
                b.adopt(broot, &d, x);
            } else {
                return Err(build_error("expecting CONNECTION or RESOLUTION"));
            }
        }
        if let Some(b) = &bindings {
            resolve(sem, &mut p_def, b)?;
        }

        // merge whatever stayed abstract into the parent's semantics
        let p_sem = p_def
            .child(p_def.root(), SEMANTICS_IDX)
            .ok_or_else(|| build_error("included definition has no semantics"))?;
        let d_sem = d
            .child(root, SEMANTICS_IDX)
            .ok_or_else(|| build_error("definition has no semantics"))?;
        for item in p_def.child_nodes(p_sem) {
            let dup = d.child_nodes(d_sem).into_iter().any(|y| {
                d.symbol(y) == p_def.symbol(item) && d.surface(y) == p_def.surface(item)
            });
            if !dup {
                d.adopt(d_sem, &p_def, item);
            }
        }

        // splice the unwrapped interactions in order
        for x in &p_def.child_nodes(p_def.root())[SEMANTICS_IDX..] {
            d.adopt(root, &p_def, *x);
        }
        d.remove(inc).map_err(build_error)?;
    }
    Ok(d)
}

fn strip_semantics_entry(def: &mut Tree, tag: Symbol, value: Symbol) {
    let Some(sems) = def.child(def.root(), SEMANTICS_IDX) else {
        return;
    };
    if let Some(n) = def
        .child_nodes(sems)
        .into_iter()
        .find(|&n| def.symbol(n) == tag && def.as_sem(n) == Some(value))
    {
        let _ = def.remove(n);
    }
}

/// Apply a `PROTOCOL_BINDINGS` tree to a definition: every bound goal,
/// usage and role is rewritten to its concrete counterpart everywhere it
/// occurs, and its declaration is dropped from the semantics. With bindings
/// covering everything abstract, no `GOAL` or `USAGE` node survives.
pub fn resolve(sem: &SemTable, def: &mut Tree, bindings: &Tree) -> Result<(), HostError> {
    let _ = sem;
    for res in bindings.child_nodes(bindings.root()) {
        if bindings.symbol(res) != RESOLUTION {
            return Err(build_error("bindings may only hold resolutions"));
        }
        let w = bindings
            .child(res, 1)
            .ok_or_else(|| build_error("resolution is empty"))?;
        let from = bindings
            .child(w, 1)
            .and_then(|c| bindings.as_sem(c))
            .ok_or_else(|| build_error("resolution names no source"))?;
        let actual = bindings
            .child(w, 2)
            .ok_or_else(|| build_error("resolution names no actual"))?;
        let which = bindings.symbol(w);

        if which == WHICH_PROCESS {
            // %EXPECT/.*,<ACTION:GOAL=from>  ->  ACTION:actual
            let mut stx = Tree::with_root(SEMTREX_WALK, Surface::None);
            let root = stx.root();
            let sl = semtrex::symbol_literal(&mut stx, root, EXPECT);
            let seq = stx.newr(sl, SEMTREX_SEQUENCE);
            let star = stx.newr(seq, SEMTREX_ZERO_OR_MORE);
            stx.newr(star, SEMTREX_SYMBOL_ANY);
            let g = stx.news(seq, SEMTREX_GROUP, ACTION);
            let vl = stx.newr(g, SEMTREX_VALUE_LITERAL);
            stx.news(vl, GOAL, from);
            let replacement = Tree::with_root(ACTION, bindings.surface(actual).clone());
            semtrex::replace(&stx, root, def, &replacement).map_err(build_error)?;
            strip_semantics_entry(def, GOAL, from);
        } else if which == WHICH_SYMBOL {
            // %SEMTREX_SYMBOL_LITERAL/<SEMTREX_SYMBOL:USAGE=from>  ->  SEMTREX_SYMBOL:actual
            let mut stx = Tree::with_root(SEMTREX_WALK, Surface::None);
            let root = stx.root();
            let sl = semtrex::symbol_literal(&mut stx, root, SEMTREX_SYMBOL_LITERAL);
            let g = stx.news(sl, SEMTREX_GROUP, SEMTREX_SYMBOL);
            let vl = stx.newr(g, SEMTREX_VALUE_LITERAL);
            stx.news(vl, USAGE, from);
            let replacement = Tree::with_root(SEMTREX_SYMBOL, bindings.surface(actual).clone());
            semtrex::replace(&stx, root, def, &replacement).map_err(build_error)?;
            strip_semantics_entry(def, USAGE, from);
        } else if which == WHICH_RECEPTOR {
            // role references under SOURCE/DESTINATION become addresses
            let mut stx = Tree::with_root(SEMTREX_WALK, Surface::None);
            let root = stx.root();
            let or = stx.newr(root, SEMTREX_OR);
            for host in [SOURCE, DESTINATION] {
                let sl = semtrex::symbol_literal(&mut stx, or, host);
                let g = stx.news(sl, SEMTREX_GROUP, ROLE);
                let vl = stx.newr(g, SEMTREX_VALUE_LITERAL);
                stx.news(vl, ROLE, from);
            }
            let replacement =
                Tree::with_root(ACTUAL_RECEPTOR, bindings.surface(actual).clone());
            semtrex::replace(&stx, root, def, &replacement).map_err(build_error)?;
            strip_semantics_entry(def, ROLE, from);
        } else {
            return Err(build_error("unknown resolution kind"));
        }
    }
    Ok(())
}

/// Set a receptor up to play `role` in `protocol`: unwrap the definition,
/// resolve it against `bindings`, and install an expectation on `aspect`
/// for every `EXPECT` rule bound to the role. An action still abstract
/// after resolution fails with [`HostError::UnboundGoal`]; a pattern still
/// holding a `USAGE` placeholder fails with [`HostError::UnboundUsage`].
pub fn express_role(
    r: &mut Receptor,
    sem: &SemTable,
    protocol: Protocol,
    role: Symbol,
    aspect: Symbol,
    bindings: Option<&Tree>,
) -> Result<(), HostError> {
    let def = sem
        .protocol_def(protocol)
        .ok_or(HostError::ProtocolNotFound(protocol))?;
    let mut d = unwrap(sem, def)?;
    if let Some(b) = bindings {
        resolve(sem, &mut d, b)?;
    }

    let mut installed = 0usize;
    for t in d.child_nodes(d.root()) {
        if sem.get_symbol_structure(d.symbol(t)) != Some(INTERACTION) {
            continue;
        }
        for x in d.child_nodes(t) {
            if d.symbol(x) != EXPECT {
                continue;
            }
            let rl = d.child(x, 1).and_then(|c| d.as_sem(c));
            if rl != Some(role) {
                continue;
            }
            let pattern_node = d
                .child(x, 3)
                .ok_or_else(|| build_error("expect has no pattern"))?;
            let action_node = d
                .child(x, 4)
                .ok_or_else(|| build_error("expect has no action"))?;
            if d.symbol(action_node) == GOAL {
                return Err(HostError::UnboundGoal(
                    d.as_sem(action_node).unwrap_or(NULL_SYMBOL),
                ));
            }
            if let Some(u) = d
                .pre_order(pattern_node)
                .into_iter()
                .find(|&n| d.symbol(n) == USAGE)
            {
                return Err(HostError::UnboundUsage(d.as_sem(u).unwrap_or(NULL_SYMBOL)));
            }
            let process = d
                .as_sem(action_node)
                .ok_or_else(|| build_error("action names no process"))?;
            r.add_expectation(
                aspect,
                Expectation {
                    protocol: Some(protocol),
                    where_clause: None,
                    pattern: d.extract(pattern_node),
                    action: Action::Process(process),
                    until: Until::Persistent,
                },
            );
            installed += 1;
        }
    }
    tracing::debug!(
        target: "ceptr::protocol",
        protocol = sem.get_name(protocol).unwrap_or("?"),
        role = sem.get_name(role).unwrap_or("?"),
        installed,
        "expressed role"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receptor::ReceptorState;
    use crate::semtrex::symbol_literal;
    use crate::SemanticId;

    struct Fixture {
        sem: SemTable,
        context: Context,
        alice: Symbol,
        bob: Symbol,
        greeting: Symbol,
        respond: crate::Process,
    }

    fn fixture() -> Fixture {
        let mut sem = SemTable::new();
        let context = sem.new_context();
        let alice = sem.define_symbol(context, NULL_STRUCTURE, "ALICE").unwrap();
        let bob = sem.define_symbol(context, NULL_STRUCTURE, "BOB").unwrap();
        let greeting = sem.define_symbol(context, CSTRING, "GREETING").unwrap();
        // an abstract goal: a process id with no code behind it
        let respond = sem
            .define_process(context, None, "respond", "respond to a greeting", &[], None)
            .unwrap();
        Fixture {
            sem,
            context,
            alice,
            bob,
            greeting,
            respond,
        }
    }

    fn greeting_pattern(greeting: Symbol) -> Tree {
        let mut p = Tree::with_root(SEMTREX_GROUP, Surface::Sem(greeting));
        let root = p.root();
        symbol_literal(&mut p, root, greeting);
        p
    }

    fn define_base(f: &mut Fixture, goal: crate::Process) -> Protocol {
        let pattern = greeting_pattern(f.greeting);
        let (alice, bob) = (f.alice, f.bob);
        ProtocolBuilder::new(&mut f.sem, f.context, "greet")
            .role(alice)
            .role(bob)
            .goal(goal)
            .interaction("exchange greeting", |i| {
                i.expect(bob, alice, &pattern, ProtocolAction::Goal(goal))
            })
            .define()
            .unwrap()
    }

    #[test]
    fn builder_produces_the_definition_shape() {
        let mut f = fixture();
        let p = define_base(&mut f, NOOP);
        let def = f.sem.protocol_def(p).unwrap();
        let root = def.root();
        assert_eq!(def.symbol(root), PROTOCOL_DEFINITION);
        assert_eq!(def.as_str(def.child(root, 1).unwrap()), Some("greet"));

        let sems = def.child(root, 2).unwrap();
        assert_eq!(def.symbol(sems), PROTOCOL_SEMANTICS);
        assert_eq!(def.children(sems), 3);

        let interaction = def.child(root, 3).unwrap();
        assert_eq!(
            f.sem.get_symbol_structure(def.symbol(interaction)),
            Some(INTERACTION)
        );
        let expect = def.child(interaction, 1).unwrap();
        assert_eq!(def.symbol(expect), EXPECT);
        assert_eq!(def.children(expect), 4);
        assert_eq!(def.as_sem(def.child(expect, 1).unwrap()), Some(f.bob));
        assert_eq!(def.symbol(def.child(expect, 4).unwrap()), GOAL);
    }

    #[test]
    fn builder_rejects_undeclared_roles() {
        let mut f = fixture();
        let pattern = greeting_pattern(f.greeting);
        let (alice, bob) = (f.alice, f.bob);
        let err = ProtocolBuilder::new(&mut f.sem, f.context, "broken")
            .role(alice)
            .interaction("x", |i| {
                i.expect(bob, alice, &pattern, ProtocolAction::Process(NOOP))
            })
            .define()
            .unwrap_err();
        assert!(matches!(err, HostError::ProtocolBuild(_)));
    }

    #[test]
    fn unwrap_is_idempotent_without_inclusions() {
        let mut f = fixture();
        let p = define_base(&mut f, NOOP);
        let def = f.sem.protocol_def(p).unwrap();
        let once = unwrap(&f.sem, def).unwrap();
        assert!(once.subtree_eq(once.root(), def, def.root()));
        let twice = unwrap(&f.sem, &once).unwrap();
        assert!(twice.subtree_eq(twice.root(), &once, once.root()));
    }

    fn count_symbols(t: &Tree, sym: Symbol) -> usize {
        t.pre_order(t.root())
            .into_iter()
            .filter(|&n| t.symbol(n) == sym)
            .count()
    }

    #[test]
    fn inclusion_connects_and_resolves() {
        let mut f = fixture();
        let goal = f.respond;
        let base = define_base(&mut f, goal);
        let server = f
            .sem
            .define_symbol(f.context, NULL_STRUCTURE, "SERVER")
            .unwrap();
        let (alice, bob) = (f.alice, f.bob);

        let composed = ProtocolBuilder::new(&mut f.sem, f.context, "serve")
            .role(server)
            .include(base, |i| {
                i.which_role(bob, server).which_process(goal, NOOP)
            })
            .define()
            .unwrap();

        let def = f.sem.protocol_def(composed).unwrap();
        let d = unwrap(&f.sem, def).unwrap();

        // the inclusion is consumed and its interaction spliced in
        assert_eq!(count_symbols(&d, INCLUSION), 0);
        let interaction = d.child(d.root(), 3).expect("spliced interaction");
        let expect = d.child(interaction, 1).unwrap();
        assert_eq!(d.symbol(expect), EXPECT);
        // BOB was renamed to SERVER, the goal became a concrete action
        assert_eq!(d.as_sem(d.child(expect, 1).unwrap()), Some(server));
        let action = d.child(expect, 4).unwrap();
        assert_eq!(d.symbol(action), ACTION);
        assert_eq!(d.as_sem(action), Some(NOOP));
        assert_eq!(count_symbols(&d, GOAL), 0);

        // ALICE stayed abstract, so she was merged into the semantics
        let sems = d.child(d.root(), 2).unwrap();
        let roles: Vec<_> = d
            .child_nodes(sems)
            .into_iter()
            .filter(|&n| d.symbol(n) == ROLE)
            .filter_map(|n| d.as_sem(n))
            .collect();
        assert!(roles.contains(&server));
        assert!(roles.contains(&alice));
        assert!(!roles.contains(&bob));
    }

    #[test]
    fn resolve_leaves_no_goal_or_usage_behind() {
        let mut f = fixture();
        let goal = f.respond;
        let usage = f
            .sem
            .define_symbol(f.context, NULL_STRUCTURE, "SOMETHING_TO_GREET_WITH")
            .unwrap();
        let (alice, bob, greeting) = (f.alice, f.bob, f.greeting);

        // pattern with an abstract USAGE placeholder
        let mut pattern = Tree::with_root(SEMTREX_SYMBOL_LITERAL, Surface::None);
        let root = pattern.root();
        pattern.news(root, USAGE, usage);

        let p = ProtocolBuilder::new(&mut f.sem, f.context, "abstract greet")
            .role(alice)
            .role(bob)
            .goal(goal)
            .usage(usage)
            .interaction("exchange", |i| {
                i.expect(bob, alice, &pattern, ProtocolAction::Goal(goal))
            })
            .define()
            .unwrap();

        let mut d = unwrap(&f.sem, f.sem.protocol_def(p).unwrap()).unwrap();
        let b = Bindings::new()
            .which_process(goal, NOOP)
            .which_symbol(usage, greeting);
        resolve(&f.sem, &mut d, b.as_tree().unwrap()).unwrap();

        assert_eq!(count_symbols(&d, GOAL), 0);
        assert_eq!(count_symbols(&d, USAGE), 0);
        // the placeholder literal now names the concrete symbol
        let interaction = d.child(d.root(), 3).unwrap();
        let expect = d.child(interaction, 1).unwrap();
        let pat = d.child(expect, 3).unwrap();
        assert_eq!(d.symbol(pat), SEMTREX_SYMBOL_LITERAL);
        let spec = d.child(pat, 1).unwrap();
        assert_eq!(d.symbol(spec), SEMTREX_SYMBOL);
        assert_eq!(d.as_sem(spec), Some(greeting));
    }

    #[test]
    fn express_role_installs_expectations() {
        let mut f = fixture();
        let goal = f.respond;
        let base = define_base(&mut f, goal);

        let mut r = Receptor::new(SYS_RECEPTOR);
        r.state = ReceptorState::Alive;

        // without a binding for the goal the role cannot be expressed
        let err = express_role(&mut r, &f.sem, base, f.bob, DEFAULT_ASPECT, None).unwrap_err();
        assert_eq!(err, HostError::UnboundGoal(goal));

        let b = Bindings::new().which_process(goal, NOOP);
        express_role(&mut r, &f.sem, base, f.bob, DEFAULT_ASPECT, b.as_tree()).unwrap();
        assert_eq!(r.expectation_count(DEFAULT_ASPECT), 1);

        // alice has no expect rules; expressing her role installs nothing
        express_role(&mut r, &f.sem, base, f.alice, DEFAULT_ASPECT, b.as_tree()).unwrap();
        assert_eq!(r.expectation_count(DEFAULT_ASPECT), 1);
    }

    #[test]
    fn unknown_protocol_is_reported() {
        let f = fixture();
        let bogus = SemanticId::new(f.context, crate::SemanticType::Protocol, 99);
        let mut r = Receptor::new(SYS_RECEPTOR);
        r.state = ReceptorState::Alive;
        let err =
            express_role(&mut r, &f.sem, bogus, f.alice, DEFAULT_ASPECT, None).unwrap_err();
        assert_eq!(err, HostError::ProtocolNotFound(bogus));
    }
}
