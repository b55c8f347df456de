//! The process reducer: step-wise rewriting of run trees.
//!
//! A run tree is `RUN_TREE { code, PARAMS { arg… } }`. The code child is
//! mutated in place as reduction proceeds; reduction is eager and
//! innermost-first, so a node is rewritten only once its subtree holds no
//! further redex. A node is a redex when its symbol is a process id or a
//! `PARAM_REF`. Reduction ends when the code contains no redex.
//!
//! A failed rewrite does not tear anything down: the offending subtree is
//! replaced with a `REDUCTION_ERROR` tree naming the kind, a description and
//! the path, and only that run tree stops.

use crate::semtable::{sys::*, SemTable};
use crate::tree::{Node, Surface, Tree};
use crate::{CeptrError, SemanticType, Symbol};
use serde::{Deserialize, Serialize};

/// Outcome of one reduction step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// A redex was rewritten; more work may remain.
    Continue,
    /// The code is fully reduced to a value.
    Done,
    /// The offending subtree was replaced with an error tree; this run tree
    /// is finished.
    Error,
}

/// What an expectation (or caller) wants executed: a process from the
/// semantic table, or an inline code tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Action {
    Process(crate::Process),
    Inline(Tree),
}

/// Build `RUN_TREE { code, PARAMS { clone(arg)… } }` for an action.
///
/// The code is always a clone (a built-in process becomes a node tagged
/// with the process whose children are `PARAM_REF` references to the
/// params); the caller retains the action and every argument.
pub fn make_run_tree(sem: &SemTable, action: &Action, args: &[Tree]) -> Result<Tree, CeptrError> {
    let mut run = Tree::with_root(RUN_TREE, Surface::None);
    let root = run.root();
    match action {
        Action::Process(p) => {
            let def = sem
                .process_def(*p)
                .ok_or_else(|| format!("process {p:?} is not defined"))?;
            match &def.code {
                Some(code) => {
                    run.adopt(root, code, code.root());
                }
                None => {
                    let c = run.newr(root, *p);
                    for i in 1..=args.len() {
                        run.newi(c, PARAM_REF, i as i64);
                    }
                }
            }
        }
        Action::Inline(code) => {
            run.adopt(root, code, code.root());
        }
    }
    let params = run.newr(root, PARAMS);
    for a in args {
        run.adopt(params, a, a.root());
    }
    Ok(run)
}

struct Failure {
    kind: Symbol,
    desc: String,
}

impl Failure {
    fn new(kind: Symbol, desc: impl Into<String>) -> Failure {
        Failure {
            kind,
            desc: desc.into(),
        }
    }
}

fn is_redex(t: &Tree, n: Node) -> bool {
    let sym = t.symbol(n);
    sym.semtype == SemanticType::Process || sym == PARAM_REF
}

/// Deepest-leftmost redex under `n`, if any.
fn find_redex(t: &Tree, n: Node) -> Option<Node> {
    for c in t.child_nodes(n) {
        if let Some(r) = find_redex(t, c) {
            return Some(r);
        }
    }
    is_redex(t, n).then_some(n)
}

/// Perform one rewrite on the run tree.
pub fn reduce_step(sem: &SemTable, run: &mut Tree) -> Step {
    let root = run.root();
    let Some(code) = run.child(root, 1) else {
        let kind = run.orphan(REDUCTION_ERROR, Surface::None);
        run.news(kind, ERROR_SYMBOL, NOT_REDUCIBLE);
        run.new_str(kind, ERROR_DESCRIPTION, "run tree has no code");
        let _ = run.add(root, kind);
        return Step::Error;
    };
    let Some(n) = find_redex(run, code) else {
        return Step::Done;
    };
    match apply(sem, run, n) {
        Ok(()) => Step::Continue,
        Err(f) => {
            let path = run.path_of(n);
            tracing::debug!(
                target: "ceptr::reduce",
                kind = sem.get_name(f.kind).unwrap_or("?"),
                desc = %f.desc,
                ?path,
                "reduction failed"
            );
            let e = run.orphan(REDUCTION_ERROR, Surface::None);
            run.news(e, ERROR_SYMBOL, f.kind);
            run.new_str(e, ERROR_DESCRIPTION, &f.desc);
            run.new_node(e, ERROR_PATH, Surface::Path(path));
            run.replace(n, e).expect("error tree is an orphan");
            Step::Error
        }
    }
}

/// Drive [`reduce_step`] to a terminal state.
pub fn reduce(sem: &SemTable, run: &mut Tree) -> Step {
    loop {
        match reduce_step(sem, run) {
            Step::Continue => continue,
            done => return done,
        }
    }
}

fn int_operand(run: &Tree, n: Node, i: usize) -> Result<i64, Failure> {
    let c = run
        .child(n, i)
        .ok_or_else(|| Failure::new(BAD_ARITY, format!("missing operand {i}")))?;
    run.as_int(c)
        .ok_or_else(|| Failure::new(NOT_REDUCIBLE, format!("operand {i} is not an integer")))
}

fn expect_arity(run: &Tree, n: Node, arity: usize) -> Result<(), Failure> {
    if run.children(n) == arity {
        Ok(())
    } else {
        Err(Failure::new(
            BAD_ARITY,
            format!("expected {arity} children, got {}", run.children(n)),
        ))
    }
}

fn apply(sem: &SemTable, run: &mut Tree, n: Node) -> Result<(), Failure> {
    let sym = run.symbol(n);

    if sym == PARAM_REF {
        let i = run
            .as_int(n)
            .ok_or_else(|| Failure::new(NOT_REDUCIBLE, "parameter reference needs an index"))?;
        let params = run
            .child(run.root(), 2)
            .filter(|&p| run.symbol(p) == PARAMS)
            .ok_or_else(|| Failure::new(PARAM_OUT_OF_RANGE, "no parameters bound"))?;
        let arg = (i > 0)
            .then(|| run.child(params, i as usize))
            .flatten()
            .ok_or_else(|| Failure::new(PARAM_OUT_OF_RANGE, format!("no parameter {i}")))?;
        let v = run.clone_node(arg);
        run.replace(n, v).expect("clone is an orphan");
        return Ok(());
    }

    match sym {
        s if s == IF => {
            expect_arity(run, n, 3)?;
            let cond = int_operand(run, n, 1)?;
            let taken = run
                .child(n, if cond != 0 { 2 } else { 3 })
                .expect("arity checked");
            let v = run.clone_node(taken);
            run.replace(n, v).expect("clone is an orphan");
            Ok(())
        }
        s if s == ADD_INT || s == SUB_INT || s == MULT_INT || s == DIV_INT || s == MOD_INT => {
            expect_arity(run, n, 2)?;
            let a = int_operand(run, n, 1)?;
            let b = int_operand(run, n, 2)?;
            if (s == DIV_INT || s == MOD_INT) && b == 0 {
                return Err(Failure::new(ZERO_DIVISION, "division by zero"));
            }
            let v = match s {
                x if x == ADD_INT => a + b,
                x if x == SUB_INT => a - b,
                x if x == MULT_INT => a * b,
                x if x == DIV_INT => a / b,
                _ => a % b,
            };
            // the result carries the symbol of the first operand
            let out_sym = run.symbol(run.child(n, 1).expect("arity checked"));
            let out = run.orphan(out_sym, Surface::Int(v));
            run.replace(n, out).expect("result is an orphan");
            Ok(())
        }
        s if s == EQ_INT || s == LT_INT || s == GT_INT => {
            expect_arity(run, n, 2)?;
            let a = int_operand(run, n, 1)?;
            let b = int_operand(run, n, 2)?;
            let v = match s {
                x if x == EQ_INT => a == b,
                x if x == LT_INT => a < b,
                _ => a > b,
            };
            let out = run.orphan(TRUE_FALSE, Surface::Int(v as i64));
            run.replace(n, out).expect("result is an orphan");
            Ok(())
        }
        s if s == INTERPOLATE_FROM_MATCH => {
            expect_arity(run, n, 3)?;
            let template = run.child(n, 1).expect("arity checked");
            let results = run.child(n, 2).expect("arity checked");
            let source = run.child(n, 3).expect("arity checked");
            let out = run.clone_node(template);
            interpolate(run, out, results, source)?;
            run.replace(n, out).expect("clone is an orphan");
            Ok(())
        }
        s if s == NOOP => {
            let out = run.orphan(NULL_SYMBOL, Surface::None);
            run.replace(n, out).expect("result is an orphan");
            Ok(())
        }
        s => {
            let def = sem
                .process_def(s)
                .ok_or_else(|| Failure::new(UNKNOWN_SYMBOL, format!("process {s:?} undefined")))?;
            let Some(code) = def.code.clone() else {
                return Err(Failure::new(
                    NOT_REDUCIBLE,
                    format!("process {} has no code", def.label),
                ));
            };
            let body = run.adopt_orphan(&code, code.root());
            // inline arguments substitute the code's parameter references;
            // a childless call leaves them to resolve against PARAMS
            let args = run.child_nodes(n);
            if !args.is_empty() {
                // deepest-first so substituting a site never frees another
                for site in run.pre_order(body).into_iter().rev() {
                    if run.symbol(site) != PARAM_REF {
                        continue;
                    }
                    let i = run.as_int(site).unwrap_or(0);
                    let arg = (i > 0).then(|| args.get(i as usize - 1)).flatten().ok_or_else(
                        || Failure::new(PARAM_OUT_OF_RANGE, format!("no argument {i}")),
                    )?;
                    let v = run.clone_node(*arg);
                    run.replace(site, v).expect("clone is an orphan");
                }
            }
            run.replace(n, body).expect("body is an orphan");
            Ok(())
        }
    }
}

/// Replace every leaf `INTERPOLATE_SYMBOL` in the (already cloned) template
/// with a clone of the source subtree at the path its match recorded.
fn interpolate(run: &mut Tree, template: Node, results: Node, source: Node) -> Result<(), Failure> {
    let sites: Vec<Node> = run
        .pre_order(template)
        .into_iter()
        .filter(|&x| run.symbol(x) == INTERPOLATE_SYMBOL)
        .collect();
    for site in sites {
        let want = run
            .as_sem(site)
            .ok_or_else(|| Failure::new(NOT_REDUCIBLE, "interpolation site names no symbol"))?;
        if run.children(site) > 0 {
            // where the replaced node's children would hook on is undefined
            return Err(Failure::new(
                NOT_REDUCIBLE,
                "interpolation sites must be leaves",
            ));
        }
        let matches = if run.symbol(results) == SEMTREX_MATCH {
            vec![results]
        } else {
            run.child_nodes(results)
        };
        let m = matches
            .into_iter()
            .find(|&m| run.symbol(m) == SEMTREX_MATCH && run.as_sem(m) == Some(want))
            .ok_or_else(|| Failure::new(NOT_REDUCIBLE, "no match recorded for symbol"))?;
        let path = run
            .child_nodes(m)
            .into_iter()
            .find(|&c| run.symbol(c) == SEMTREX_MATCHED_PATH)
            .and_then(|c| run.as_path(c).cloned())
            .ok_or_else(|| Failure::new(NOT_REDUCIBLE, "match records no path"))?;
        let src = run
            .node_at(source, &path)
            .ok_or_else(|| Failure::new(NOT_REDUCIBLE, "matched path escapes the source"))?;
        let v = run.clone_node(src);
        run.replace(site, v).expect("clone is an orphan");
    }
    Ok(())
}

/// State of one queued reduction context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Runnable,
    Completed,
    Errored,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedRun {
    pub run: Tree,
    pub state: RunState,
}

/// A receptor's list of in-flight reduction contexts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessQueue {
    runs: Vec<QueuedRun>,
}

impl ProcessQueue {
    pub fn enqueue(&mut self, run: Tree) {
        self.runs.push(QueuedRun {
            run,
            state: RunState::Runnable,
        });
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn runnable_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.state == RunState::Runnable)
            .count()
    }

    pub fn runs(&self) -> &[QueuedRun] {
        &self.runs
    }

    /// One reduction step for each runnable context, round-robin.
    pub fn reduce_q(&mut self, sem: &SemTable) {
        for q in &mut self.runs {
            if q.state != RunState::Runnable {
                continue;
            }
            match reduce_step(sem, &mut q.run) {
                Step::Continue => {}
                Step::Done => q.state = RunState::Completed,
                Step::Error => q.state = RunState::Errored,
            }
        }
    }

    pub fn has_completed(&self) -> bool {
        self.runs.iter().any(|r| r.state == RunState::Completed)
    }

    /// Remove completed contexts, passing their run trees to the caller.
    /// Errored contexts stay queued so the receptor can introspect them.
    pub fn cleanup(&mut self) -> Vec<Tree> {
        let mut done = Vec::new();
        self.runs.retain_mut(|q| {
            if q.state == RunState::Completed {
                done.push(std::mem::replace(
                    &mut q.run,
                    Tree::with_root(NULL_SYMBOL, Surface::None),
                ));
                false
            } else {
                true
            }
        });
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    fn test_defs() -> (SemTable, Context, Symbol, Symbol) {
        let mut sem = SemTable::new();
        let c = sem.new_context();
        let ti = sem.define_symbol(c, INTEGER, "TEST_INT").unwrap();
        let ti2 = sem.define_symbol(c, INTEGER, "TEST_INT2").unwrap();
        (sem, c, ti, ti2)
    }

    fn run_tree_with(code: impl FnOnce(&mut Tree, Node)) -> Tree {
        let mut run = Tree::with_root(RUN_TREE, Surface::None);
        let root = run.root();
        code(&mut run, root);
        run
    }

    fn reduced_value(sem: &SemTable, run: &mut Tree) -> (Symbol, i64) {
        assert_eq!(reduce(sem, run), Step::Done);
        let v = run.child(run.root(), 1).unwrap();
        (run.symbol(v), run.as_int(v).unwrap())
    }

    #[test]
    fn if_takes_the_marked_branch() {
        let (sem, _, ti, _) = test_defs();
        let mut run = run_tree_with(|t, root| {
            let n = t.newr(root, IF);
            t.newi(n, TRUE_FALSE, 1);
            t.newi(n, ti, 99);
            t.newi(n, ti, 100);
        });
        assert_eq!(reduced_value(&sem, &mut run), (ti, 99));
    }

    #[test]
    fn int_math() {
        let (sem, _, ti, _) = test_defs();
        let cases: &[(crate::Process, i64, i64, i64)] = &[
            (ADD_INT, 99, 100, 199),
            (SUB_INT, 100, 98, 2),
            (MULT_INT, 100, 98, 9800),
            (DIV_INT, 100, 48, 2),
            (MOD_INT, 100, 2, 0),
        ];
        for &(op, a, b, want) in cases {
            let mut run = run_tree_with(|t, root| {
                let n = t.newr(root, op);
                t.newi(n, ti, a);
                t.newi(n, ti, b);
            });
            assert_eq!(reduced_value(&sem, &mut run), (ti, want));
        }
    }

    #[test]
    fn comparisons_yield_true_false() {
        let (sem, _, ti, _) = test_defs();
        let cases: &[(crate::Process, i64, i64, i64)] = &[
            (EQ_INT, 100, 2, 0),
            (EQ_INT, 100, 100, 1),
            (LT_INT, 2, 100, 1),
            (LT_INT, 100, 100, 0),
            (GT_INT, 2, 100, 0),
            (GT_INT, 101, 100, 1),
        ];
        for &(op, a, b, want) in cases {
            let mut run = run_tree_with(|t, root| {
                let n = t.newr(root, op);
                t.newi(n, ti, a);
                t.newi(n, ti, b);
            });
            assert_eq!(reduced_value(&sem, &mut run), (TRUE_FALSE, want));
        }
    }

    #[test]
    fn nested_reduction_is_innermost_first() {
        let (sem, _, ti, _) = test_defs();
        // (2 + 3) * (10 - 4) = 30
        let mut run = run_tree_with(|t, root| {
            let mul = t.newr(root, MULT_INT);
            let add = t.newr(mul, ADD_INT);
            t.newi(add, ti, 2);
            t.newi(add, ti, 3);
            let sub = t.newr(mul, SUB_INT);
            t.newi(sub, ti, 10);
            t.newi(sub, ti, 4);
        });
        assert_eq!(reduced_value(&sem, &mut run), (ti, 30));
    }

    #[test]
    fn zero_division_replaces_the_redex_with_an_error() {
        let (sem, _, ti, _) = test_defs();
        let mut run = run_tree_with(|t, root| {
            let n = t.newr(root, DIV_INT);
            t.newi(n, ti, 100);
            t.newi(n, ti, 0);
        });
        assert_eq!(reduce(&sem, &mut run), Step::Error);
        let e = run.child(run.root(), 1).unwrap();
        assert_eq!(run.symbol(e), REDUCTION_ERROR);
        assert_eq!(run.as_sem(run.child(e, 1).unwrap()), Some(ZERO_DIVISION));
        assert_eq!(run.as_path(run.child(e, 3).unwrap()).unwrap(), &vec![1]);
    }

    #[test]
    fn interpolate_from_match() {
        let (sem, _, ti, ti2) = test_defs();
        let mut run = run_tree_with(|t, root| {
            let n = t.newr(root, INTERPOLATE_FROM_MATCH);
            let template = t.newi(n, ti2, 0);
            t.news(template, INTERPOLATE_SYMBOL, ti);
            let results = t.newr(n, SEMTREX_MATCH_RESULTS);
            let m = t.news(results, SEMTREX_MATCH, ti);
            t.new_node(m, SEMTREX_MATCHED_PATH, Surface::Path(vec![]));
            t.newi(m, SEMTREX_MATCH_SIBLINGS_COUNT, 1);
            t.newi(n, ti, 314);
        });
        assert_eq!(reduce(&sem, &mut run), Step::Done);
        let v = run.child(run.root(), 1).unwrap();
        assert_eq!((run.symbol(v), run.as_int(v)), (ti2, Some(0)));
        let kid = run.child(v, 1).unwrap();
        assert_eq!((run.symbol(kid), run.as_int(kid)), (ti, Some(314)));
    }

    #[test]
    fn interior_interpolation_site_is_an_error() {
        let (sem, _, ti, ti2) = test_defs();
        let mut run = run_tree_with(|t, root| {
            let n = t.newr(root, INTERPOLATE_FROM_MATCH);
            let template = t.newi(n, ti2, 0);
            let site = t.news(template, INTERPOLATE_SYMBOL, ti);
            t.newi(site, ti, 5); // children under the site
            let results = t.newr(n, SEMTREX_MATCH_RESULTS);
            let m = t.news(results, SEMTREX_MATCH, ti);
            t.new_node(m, SEMTREX_MATCHED_PATH, Surface::Path(vec![]));
            t.newi(m, SEMTREX_MATCH_SIBLINGS_COUNT, 1);
            t.newi(n, ti, 314);
        });
        assert_eq!(reduce(&sem, &mut run), Step::Error);
    }

    #[test]
    fn make_run_tree_clones_code_and_params() -> Result<(), CeptrError> {
        let (mut sem, c, ti, _) = test_defs();
        // myif(p1,p2,p3) == IF(p3, p1, p2)
        let mut code = Tree::with_root(IF, Surface::None);
        let r = code.root();
        code.newi(r, PARAM_REF, 3);
        code.newi(r, PARAM_REF, 1);
        code.newi(r, PARAM_REF, 2);
        let myif = sem.define_process(
            c,
            Some(code),
            "myif",
            "sys if with the condition last",
            &[],
            None,
        )?;

        let p1 = Tree::with_root(ti, Surface::Int(123));
        let p2 = Tree::with_root(ti, Surface::Int(321));
        let p3 = Tree::with_root(TRUE_FALSE, Surface::Int(1));
        let mut run = make_run_tree(
            &sem,
            &Action::Process(myif),
            &[p1.clone(), p2.clone(), p3.clone()],
        )?;

        let root = run.root();
        assert_eq!(run.symbol(root), RUN_TREE);
        let code = run.child(root, 1).unwrap();
        assert_eq!(run.symbol(code), IF);
        let params = run.child(root, 2).unwrap();
        assert_eq!(run.symbol(params), PARAMS);
        assert_eq!(run.children(params), 3);
        assert!(run.subtree_eq(run.child(params, 1).unwrap(), &p1, p1.root()));
        assert!(run.subtree_eq(run.child(params, 3).unwrap(), &p3, p3.root()));

        assert_eq!(reduced_value(&sem, &mut run), (ti, 123));
        Ok(())
    }

    #[test]
    fn inline_user_process_substitutes_its_arguments() -> Result<(), CeptrError> {
        let (mut sem, c, ti, _) = test_defs();
        // double(x) == x + x
        let mut code = Tree::with_root(ADD_INT, Surface::None);
        let r = code.root();
        code.newi(r, PARAM_REF, 1);
        code.newi(r, PARAM_REF, 1);
        let double = sem.define_process(c, Some(code), "double", "", &[], None)?;

        let mut run = run_tree_with(|t, root| {
            let call = t.newr(root, double);
            t.newi(call, ti, 21);
        });
        assert_eq!(reduced_value(&sem, &mut run), (ti, 42));
        Ok(())
    }

    #[test]
    fn param_out_of_range_errors_the_run() {
        let (sem, _, _, _) = test_defs();
        let mut run = run_tree_with(|t, root| {
            t.newi(root, PARAM_REF, 2);
            t.newr(root, PARAMS);
        });
        assert_eq!(reduce(&sem, &mut run), Step::Error);
        let e = run.child(run.root(), 1).unwrap();
        assert_eq!(
            run.as_sem(run.child(e, 1).unwrap()),
            Some(PARAM_OUT_OF_RANGE)
        );
    }

    #[test]
    fn queue_steps_round_robin_and_cleans_up() {
        let (sem, _, ti, _) = test_defs();
        let mut q = ProcessQueue::default();
        q.enqueue(run_tree_with(|t, root| {
            let n = t.newr(root, ADD_INT);
            t.newi(n, ti, 1);
            t.newi(n, ti, 2);
        }));
        q.enqueue(run_tree_with(|t, root| {
            let n = t.newr(root, DIV_INT);
            t.newi(n, ti, 1);
            t.newi(n, ti, 0);
        }));
        assert_eq!(q.runnable_count(), 2);

        // both contexts advance each pass
        q.reduce_q(&sem);
        q.reduce_q(&sem);
        assert!(q.has_completed());
        assert_eq!(q.runnable_count(), 0);

        let done = q.cleanup();
        assert_eq!(done.len(), 1);
        let run = &done[0];
        assert_eq!(run.as_int(run.child(run.root(), 1).unwrap()), Some(3));

        // the errored context stays for introspection
        assert_eq!(q.len(), 1);
        assert!(!q.has_completed());
    }
}
