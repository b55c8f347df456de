//! Semtrex: tree regular expressions.
//!
//! A semtrex is itself a tree whose nodes carry `SEMTREX_*` symbols; the
//! engine interprets that tree against a target tree. Matching is
//! structural (symbol plus children) and may inspect surfaces through value
//! literals. Traversal is depth-first pre-order with ties broken by child
//! index, so results are deterministic.
//!
//! Combinator shapes:
//! - `SEMTREX_SYMBOL_LITERAL { SEMTREX_SYMBOL:sym, child-patterns… }` —
//!   matches a node tagged `sym`. With no child patterns the target's
//!   children are unconstrained; with child patterns they must match the
//!   target's children exactly, start to end. A `USAGE` leaf in place of
//!   `SEMTREX_SYMBOL` is an unresolved placeholder and never matches.
//! - `SEMTREX_SYMBOL_ANY { child-patterns… }` — any symbol, same child rule.
//! - `SEMTREX_VALUE_LITERAL { literal }` — node with the literal's symbol
//!   and surface.
//! - `SEMTREX_SEQUENCE { p… }` — sibling patterns in order.
//! - `SEMTREX_OR { p… }` / `SEMTREX_NOT { p }` / `SEMTREX_ZERO_OR_MORE` /
//!   `SEMTREX_ONE_OR_MORE` / `SEMTREX_ZERO_OR_ONE { p }` — the usual; each
//!   repetition of a quantified pattern consumes one sibling.
//! - `SEMTREX_GROUP:name { p… }` — names a capture: the siblings the inner
//!   patterns consume, recorded with their path and count.
//! - `SEMTREX_WALK { p }` — tries `p` at every node of the target subtree.

use crate::semtable::sys::*;
use crate::tree::{Node, Surface, Tree, TreePath};
use crate::{CeptrError, Symbol};

/// One named capture: the consumed sibling run.
#[derive(Clone, Debug)]
pub struct Capture {
    pub name: Symbol,
    pub nodes: Vec<Node>,
}

struct Matcher<'a> {
    stx: &'a Tree,
    target: &'a Tree,
}

impl<'a> Matcher<'a> {
    /// Match sibling patterns against sibling targets, consuming both
    /// completely. Captures recorded during a failed attempt are rolled
    /// back.
    fn match_seq(&self, pats: &[Node], targs: &[Node], caps: &mut Vec<Capture>) -> bool {
        let mark = caps.len();
        let ok = self.match_seq_inner(pats, targs, caps);
        if !ok {
            caps.truncate(mark);
        }
        ok
    }

    fn match_seq_inner(&self, pats: &[Node], targs: &[Node], caps: &mut Vec<Capture>) -> bool {
        let Some((&p, rest)) = pats.split_first() else {
            return targs.is_empty();
        };
        let sym = self.stx.symbol(p);
        if sym == SEMTREX_SEQUENCE {
            let mut inline = self.stx.child_nodes(p);
            inline.extend_from_slice(rest);
            return self.match_seq(&inline, targs, caps);
        }
        if sym == SEMTREX_OR {
            for alt in self.stx.child_nodes(p) {
                let mut pats = vec![alt];
                pats.extend_from_slice(rest);
                if self.match_seq(&pats, targs, caps) {
                    return true;
                }
            }
            return false;
        }
        if sym == SEMTREX_ZERO_OR_MORE || sym == SEMTREX_ONE_OR_MORE || sym == SEMTREX_ZERO_OR_ONE
        {
            let Some(pc) = self.stx.child(p, 1) else {
                return false;
            };
            let (min, max) = match sym {
                s if s == SEMTREX_ONE_OR_MORE => (1, targs.len()),
                s if s == SEMTREX_ZERO_OR_ONE => (0, 1.min(targs.len())),
                _ => (0, targs.len()),
            };
            for k in min..=max {
                if k > 0 && !self.match_seq(&[pc], &targs[k - 1..k], caps) {
                    break;
                }
                if self.match_seq(rest, &targs[k..], caps) {
                    return true;
                }
            }
            return false;
        }
        if sym == SEMTREX_GROUP {
            let inner = self.stx.child_nodes(p);
            let Some(name) = self.stx.as_sem(p) else {
                return false;
            };
            for k in 0..=targs.len() {
                let mark = caps.len();
                if self.match_seq(&inner, &targs[..k], caps) {
                    caps.push(Capture {
                        name,
                        nodes: targs[..k].to_vec(),
                    });
                    if self.match_seq(rest, &targs[k..], caps) {
                        return true;
                    }
                }
                caps.truncate(mark);
            }
            return false;
        }
        if sym == SEMTREX_NOT {
            let Some(pc) = self.stx.child(p, 1) else {
                return false;
            };
            let Some((&t0, trest)) = targs.split_first() else {
                return false;
            };
            let mut scratch = Vec::new();
            return !self.match_seq(&[pc], &[t0], &mut scratch)
                && self.match_seq(rest, trest, caps);
        }
        if sym == SEMTREX_WALK {
            let Some(pc) = self.stx.child(p, 1) else {
                return false;
            };
            let Some((&t0, trest)) = targs.split_first() else {
                return false;
            };
            for cand in self.target.pre_order(t0) {
                if self.match_seq(&[pc], &[cand], caps) {
                    return self.match_seq(rest, trest, caps);
                }
            }
            return false;
        }
        // leaf combinators consume exactly one sibling
        let Some((&t0, trest)) = targs.split_first() else {
            return false;
        };
        self.match_leaf(p, t0, caps) && self.match_seq(rest, trest, caps)
    }

    fn match_leaf(&self, p: Node, t: Node, caps: &mut Vec<Capture>) -> bool {
        let sym = self.stx.symbol(p);
        if sym == SEMTREX_SYMBOL_LITERAL {
            let Some(spec) = self.stx.child(p, 1) else {
                return false;
            };
            if self.stx.symbol(spec) != SEMTREX_SYMBOL {
                // an unresolved USAGE placeholder, or a malformed literal
                return false;
            }
            let Some(want) = self.stx.as_sem(spec) else {
                return false;
            };
            if self.target.symbol(t) != want {
                return false;
            }
            let all = self.stx.child_nodes(p);
            let pats = &all[1..];
            pats.is_empty() || self.match_seq(pats, &self.target.child_nodes(t), caps)
        } else if sym == SEMTREX_SYMBOL_ANY {
            let pats = self.stx.child_nodes(p);
            pats.is_empty() || self.match_seq(&pats, &self.target.child_nodes(t), caps)
        } else if sym == SEMTREX_VALUE_LITERAL {
            let Some(lit) = self.stx.child(p, 1) else {
                return false;
            };
            self.target.symbol(t) == self.stx.symbol(lit)
                && self.target.surface(t) == self.stx.surface(lit)
        } else {
            false
        }
    }
}

fn relative_path(target: &Tree, base: Node, n: Node) -> TreePath {
    let bp = target.path_of(base);
    let np = target.path_of(n);
    np[bp.len()..].to_vec()
}

/// Build the match-results tree for a successful match: one `SEMTREX_MATCH`
/// per capture, recording the matched path (relative to the match root) and
/// the number of siblings consumed.
fn results_tree(target: &Tree, base: Node, caps: &[Capture]) -> Tree {
    let mut out = Tree::with_root(SEMTREX_MATCH_RESULTS, Surface::None);
    let root = out.root();
    for cap in caps {
        if cap.nodes.is_empty() {
            continue;
        }
        let m = out.news(root, SEMTREX_MATCH, cap.name);
        let path = relative_path(target, base, cap.nodes[0]);
        out.new_node(m, SEMTREX_MATCHED_PATH, Surface::Path(path));
        out.newi(m, SEMTREX_MATCH_SIBLINGS_COUNT, cap.nodes.len() as i64);
    }
    out
}

fn match_captures(stx: &Tree, sp: Node, target: &Tree, t: Node) -> Option<Vec<Capture>> {
    let m = Matcher { stx, target };
    if stx.symbol(sp) == SEMTREX_WALK {
        let inner = stx.child(sp, 1)?;
        for cand in target.pre_order(t) {
            let mut caps = Vec::new();
            if m.match_seq(&[inner], &[cand], &mut caps) {
                return Some(caps);
            }
        }
        None
    } else {
        let mut caps = Vec::new();
        m.match_seq(&[sp], &[t], &mut caps).then_some(caps)
    }
}

/// Does the pattern match the subtree at `t`?
pub fn matches(stx: &Tree, sp: Node, target: &Tree, t: Node) -> bool {
    match_captures(stx, sp, target, t).is_some()
}

/// Match and return the results tree, or `None`. Paths in the results are
/// relative to `t`.
pub fn match_tree(stx: &Tree, sp: Node, target: &Tree, t: Node) -> Option<Tree> {
    match_captures(stx, sp, target, t).map(|caps| results_tree(target, t, &caps))
}

/// Try the pattern at every node of the subtree at `t` in pre-order; return
/// the first matching node's path (relative to `t`) and its results.
pub fn walk(stx: &Tree, sp: Node, target: &Tree, t: Node) -> Option<(TreePath, Tree)> {
    for cand in target.pre_order(t) {
        if let Some(results) = match_tree(stx, sp, target, cand) {
            return Some((relative_path(target, t, cand), results));
        }
    }
    None
}

/// For every match of the pattern's first `SEMTREX_GROUP`, substitute the
/// captured siblings with a clone of `replacement`, repeatedly until no
/// match remains. The caller retains `replacement`. Returns how many
/// substitutions were made.
///
/// Each substitution must make the pattern stop matching at that site (as
/// the protocol resolution patterns do); a bounded retry count turns a
/// non-converging substitution into an error instead of a hang.
pub fn replace(
    stx: &Tree,
    sp: Node,
    target: &mut Tree,
    replacement: &Tree,
) -> Result<usize, CeptrError> {
    let limit = 4 * target.size(target.root()) + 64;
    let mut count = 0;
    for _ in 0..limit {
        let Some(caps) = match_captures(stx, sp, target, target.root()) else {
            return Ok(count);
        };
        let Some(cap) = caps.iter().find(|c| !c.nodes.is_empty()) else {
            return Err("semtrex replace needs a group with a non-empty capture".into());
        };
        let orphan = target.adopt_orphan(replacement, replacement.root());
        target.replace(cap.nodes[0], orphan)?;
        for &extra in &cap.nodes[1..] {
            target.remove(extra)?;
        }
        count += 1;
    }
    Err("semtrex replace did not converge".into())
}

/// Append a `SEMTREX_SYMBOL_LITERAL` for `sym` under `parent`; child
/// patterns can be added under the returned node.
pub fn symbol_literal(t: &mut Tree, parent: Node, sym: Symbol) -> Node {
    let l = t.newr(parent, SEMTREX_SYMBOL_LITERAL);
    t.news(l, SEMTREX_SYMBOL, sym);
    l
}
