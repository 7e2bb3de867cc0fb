use smol_str::SmolStr;
use std::collections::{BTreeSet, HashMap, HashSet};
use lilt_ast::{ExprId, ExprKind, PatternId, PatternKind, Program};

use crate::{Case, Declaration, Expr, LnName};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    #[error("unbound variable '{0}' during lowering")]
    UnboundVariable(SmolStr),

    #[error("unknown constructor {0}::{1} during lowering")]
    UnknownConstructor(SmolStr, SmolStr),

    #[error("let rec binds '{0}' to a value that is not a function")]
    RecursiveValue(SmolStr),
}

/// The output of closure conversion: hoisted declarations plus the
/// residual program expression referring to them.
#[derive(Debug, Clone)]
pub struct LowerResult {
    pub declarations: Vec<Declaration>,
    pub entry: Expr,
}

/// Closure-convert a program. Every lambda becomes a top-level
/// declaration whose leading parameters are its captured variables;
/// pattern matches become tag dispatch. Expects a program that has
/// already type-checked.
pub fn lower(program: &Program) -> Result<LowerResult, LowerError> {
    let mut lowerer = Lowerer::new(program);
    let entry = lowerer.lower_expr(program.root)?;
    Ok(LowerResult {
        declarations: lowerer.decls,
        entry,
    })
}

// ── Lowering state ───────────────────────────────────────────────

/// How a surface name is reachable at the current point.
#[derive(Debug, Clone)]
enum Binding {
    /// A binder slot, identified by its flat position in `locals`.
    Local(usize),
    /// A hoisted declaration applied to captured slots.
    Global(GlobalRef),
}

#[derive(Debug, Clone)]
struct GlobalRef {
    name: SmolStr,
    /// Flat positions of the captured slots, outermost first.
    captures: Vec<usize>,
}

/// One binder slot: its surface (or synthetic) name, the binder group it
/// belongs to, and its offset within that group.
#[derive(Debug, Clone)]
struct Slot {
    name: SmolStr,
    frame: usize,
    offset: usize,
}

struct CtorInfo {
    tag: u32,
    arity: u32,
}

struct Lowerer<'a> {
    program: &'a Program,

    /// (type, constructor) → tag and field count, tags in declaration order.
    tags: HashMap<(SmolStr, SmolStr), CtorInfo>,
    /// type → constructors in declaration order, for catch-all expansion.
    adts: HashMap<SmolStr, Vec<(SmolStr, u32)>>,

    /// Name resolution stack; later entries shadow earlier ones.
    scope: Vec<(SmolStr, Binding)>,
    /// All live binder slots, one per binder, groups outermost first.
    locals: Vec<Slot>,
    /// Sizes of the live binder groups, outermost first.
    frames: Vec<usize>,

    decls: Vec<Declaration>,
    used_names: HashSet<SmolStr>,
    next_lambda: u32,
}

impl<'a> Lowerer<'a> {
    fn new(program: &'a Program) -> Self {
        let mut tags = HashMap::new();
        let mut adts = HashMap::new();
        for decl in &program.decls {
            let mut ctors = Vec::new();
            for (i, ctor) in decl.constructors.iter().enumerate() {
                tags.insert(
                    (decl.name.clone(), ctor.name.clone()),
                    CtorInfo {
                        tag: i as u32,
                        arity: ctor.fields.len() as u32,
                    },
                );
                ctors.push((ctor.name.clone(), ctor.fields.len() as u32));
            }
            adts.insert(decl.name.clone(), ctors);
        }

        let mut scope = Vec::new();
        let mut used_names = HashSet::new();
        for builtin in ["add", "sub", "div", "eq_int"] {
            let name = SmolStr::new_static(builtin);
            scope.push((
                name.clone(),
                Binding::Global(GlobalRef {
                    name: name.clone(),
                    captures: Vec::new(),
                }),
            ));
            used_names.insert(name);
        }
        used_names.insert(SmolStr::new_static("main"));

        Self {
            program,
            tags,
            adts,
            scope,
            locals: Vec::new(),
            frames: Vec::new(),
            decls: Vec::new(),
            used_names,
            next_lambda: 0,
        }
    }

    // ── Binder bookkeeping ───────────────────────────────────────

    /// Bound index of a slot as seen from the current depth: the number
    /// of binders in strictly inner groups plus the slot's offset.
    fn resolve_slot(&self, pos: usize) -> u32 {
        let slot = &self.locals[pos];
        let inner: usize = self.frames[slot.frame + 1..].iter().sum();
        (inner + slot.offset) as u32
    }

    /// Push one binder group. Synthetic names (starting with `$`) can
    /// never be referenced, so entering them into scope is harmless.
    fn push_frame(&mut self, names: Vec<SmolStr>) {
        let frame = self.frames.len();
        self.frames.push(names.len());
        for (offset, name) in names.into_iter().enumerate() {
            let pos = self.locals.len();
            self.locals.push(Slot {
                name: name.clone(),
                frame,
                offset,
            });
            self.scope.push((name, Binding::Local(pos)));
        }
    }

    fn pop_frame(&mut self) {
        let size = self.frames.pop().unwrap_or(0);
        self.locals.truncate(self.locals.len() - size);
        self.scope.truncate(self.scope.len() - size);
    }

    fn resolve_var(&self, name: &SmolStr) -> Result<Expr, LowerError> {
        for (n, binding) in self.scope.iter().rev() {
            if n == name {
                return Ok(match binding {
                    Binding::Local(pos) => Expr::Var(LnName::Bound(self.resolve_slot(*pos))),
                    Binding::Global(g) => self.global_ref(g),
                });
            }
        }
        Err(LowerError::UnboundVariable(name.clone()))
    }

    /// A reference to a hoisted declaration: the bare function applied to
    /// its captured slots, resolved at the reference site.
    fn global_ref(&self, g: &GlobalRef) -> Expr {
        let mut expr = Expr::Var(LnName::Free(g.name.clone()));
        for &pos in &g.captures {
            expr = Expr::Apply(
                Box::new(expr),
                Box::new(Expr::Var(LnName::Bound(self.resolve_slot(pos)))),
            );
        }
        expr
    }

    fn fresh_lambda_name(&mut self) -> SmolStr {
        loop {
            let name = SmolStr::new(format!("lambda${}", self.next_lambda));
            self.next_lambda += 1;
            if self.used_names.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Use the surface name for a hoisted `let rec` when it is still
    /// available, otherwise suffix it.
    fn unique_name(&mut self, base: &SmolStr) -> SmolStr {
        if self.used_names.insert(base.clone()) {
            return base.clone();
        }
        let mut i = 1;
        loop {
            let name = SmolStr::new(format!("{}${}", base, i));
            if self.used_names.insert(name.clone()) {
                return name;
            }
            i += 1;
        }
    }

    // ── Capture analysis ─────────────────────────────────────────

    /// Collect the slots a lambda body captures from the enclosing scope.
    /// References to globals count as references to their captured slots,
    /// so captures are always materializable values.
    fn collect_captures(
        &self,
        id: ExprId,
        bound: &mut Vec<SmolStr>,
        acc: &mut BTreeSet<usize>,
    ) -> Result<(), LowerError> {
        match &self.program.exprs[id].kind {
            ExprKind::Int(_) | ExprKind::Bool(_) => Ok(()),

            ExprKind::Var(name) => {
                if bound.iter().any(|b| b == name) {
                    return Ok(());
                }
                for (n, binding) in self.scope.iter().rev() {
                    if n == name {
                        match binding {
                            Binding::Local(pos) => {
                                acc.insert(*pos);
                            }
                            Binding::Global(g) => {
                                acc.extend(g.captures.iter().copied());
                            }
                        }
                        return Ok(());
                    }
                }
                Err(LowerError::UnboundVariable(name.clone()))
            }

            ExprKind::Lambda { param, body } => {
                bound.push(param.clone());
                self.collect_captures(*body, bound, acc)?;
                bound.pop();
                Ok(())
            }

            ExprKind::Apply { func, arg } => {
                self.collect_captures(*func, bound, acc)?;
                self.collect_captures(*arg, bound, acc)
            }

            ExprKind::Let {
                name,
                recursive,
                value,
                body,
            } => {
                if *recursive {
                    bound.push(name.clone());
                    self.collect_captures(*value, bound, acc)?;
                    self.collect_captures(*body, bound, acc)?;
                    bound.pop();
                } else {
                    self.collect_captures(*value, bound, acc)?;
                    bound.push(name.clone());
                    self.collect_captures(*body, bound, acc)?;
                    bound.pop();
                }
                Ok(())
            }

            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.collect_captures(*condition, bound, acc)?;
                self.collect_captures(*then_branch, bound, acc)?;
                self.collect_captures(*else_branch, bound, acc)
            }

            ExprKind::Match { scrutinee, arms } => {
                self.collect_captures(*scrutinee, bound, acc)?;
                for arm in arms {
                    let before = bound.len();
                    self.pattern_vars(arm.pattern, bound);
                    self.collect_captures(arm.body, bound, acc)?;
                    bound.truncate(before);
                }
                Ok(())
            }

            ExprKind::Construct { args, .. } => {
                for &arg in args {
                    self.collect_captures(arg, bound, acc)?;
                }
                Ok(())
            }
        }
    }

    fn pattern_vars(&self, id: PatternId, acc: &mut Vec<SmolStr>) {
        match &self.program.patterns[id].kind {
            PatternKind::Var(name) => acc.push(name.clone()),
            PatternKind::Constructor { fields, .. } => {
                for &f in fields {
                    self.pattern_vars(f, acc);
                }
            }
        }
    }

    // ── Lambda hoisting ──────────────────────────────────────────

    /// Hoist one lambda to a top-level declaration. Returns the
    /// declaration name and the captured slots (relative to the current
    /// stack, outermost first).
    fn hoist_lambda(
        &mut self,
        rec_name: Option<SmolStr>,
        param: SmolStr,
        body: ExprId,
    ) -> Result<(SmolStr, Vec<usize>), LowerError> {
        let mut caps_set = BTreeSet::new();
        let mut bound = Vec::new();
        if let Some(n) = &rec_name {
            bound.push(n.clone());
        }
        bound.push(param.clone());
        self.collect_captures(body, &mut bound, &mut caps_set)?;
        let caps: Vec<usize> = caps_set.into_iter().collect();

        let decl_name = match &rec_name {
            Some(n) => self.unique_name(n),
            None => self.fresh_lambda_name(),
        };

        let mut param_names: Vec<SmolStr> =
            caps.iter().map(|&p| self.locals[p].name.clone()).collect();
        param_names.push(param.clone());

        // Enter the declaration body: a fresh stack whose only frame holds
        // the captures followed by the binder. Scope entries carry over in
        // order, remapped through the capture positions; anything not
        // captured is unreachable from here and dropped.
        let saved_scope = std::mem::take(&mut self.scope);
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_frames = std::mem::take(&mut self.frames);

        let pos_map: HashMap<usize, usize> =
            caps.iter().enumerate().map(|(i, &p)| (p, i)).collect();

        self.frames.push(param_names.len());
        for (offset, name) in param_names.iter().enumerate() {
            self.locals.push(Slot {
                name: name.clone(),
                frame: 0,
                offset,
            });
        }
        for (name, binding) in &saved_scope {
            match binding {
                Binding::Local(p) => {
                    if let Some(&new_pos) = pos_map.get(p) {
                        self.scope.push((name.clone(), Binding::Local(new_pos)));
                    }
                }
                Binding::Global(g) => {
                    if let Some(remapped) = g
                        .captures
                        .iter()
                        .map(|p| pos_map.get(p).copied())
                        .collect::<Option<Vec<_>>>()
                    {
                        self.scope.push((
                            name.clone(),
                            Binding::Global(GlobalRef {
                                name: g.name.clone(),
                                captures: remapped,
                            }),
                        ));
                    }
                }
            }
        }
        if let Some(n) = &rec_name {
            self.scope.push((
                n.clone(),
                Binding::Global(GlobalRef {
                    name: decl_name.clone(),
                    captures: (0..caps.len()).collect(),
                }),
            ));
        }
        self.scope
            .push((param.clone(), Binding::Local(caps.len())));

        let body = self.lower_expr(body);

        self.scope = saved_scope;
        self.locals = saved_locals;
        self.frames = saved_frames;

        self.decls.push(Declaration {
            name: decl_name.clone(),
            params: param_names,
            body: body?,
        });
        Ok((decl_name, caps))
    }

    // ── Expression lowering ──────────────────────────────────────

    fn lower_expr(&mut self, id: ExprId) -> Result<Expr, LowerError> {
        match &self.program.exprs[id].kind {
            ExprKind::Int(n) => Ok(Expr::Int(*n)),
            ExprKind::Bool(b) => Ok(Expr::Bool(*b)),
            ExprKind::Var(name) => self.resolve_var(name),

            ExprKind::Lambda { param, body } => {
                let (decl_name, caps) = self.hoist_lambda(None, param.clone(), *body)?;
                Ok(self.global_ref(&GlobalRef {
                    name: decl_name,
                    captures: caps,
                }))
            }

            ExprKind::Apply { func, arg } => Ok(Expr::Apply(
                Box::new(self.lower_expr(*func)?),
                Box::new(self.lower_expr(*arg)?),
            )),

            ExprKind::Let {
                name,
                recursive: false,
                value,
                body,
            } => {
                let value = self.lower_expr(*value)?;
                self.push_frame(vec![name.clone()]);
                let body = self.lower_expr(*body);
                self.pop_frame();
                Ok(Expr::Let(Box::new(value), Box::new(body?)))
            }

            ExprKind::Let {
                name,
                recursive: true,
                value,
                body,
            } => {
                let ExprKind::Lambda {
                    param,
                    body: lambda_body,
                } = &self.program.exprs[*value].kind
                else {
                    return Err(LowerError::RecursiveValue(name.clone()));
                };
                let (decl_name, caps) =
                    self.hoist_lambda(Some(name.clone()), param.clone(), *lambda_body)?;
                self.scope.push((
                    name.clone(),
                    Binding::Global(GlobalRef {
                        name: decl_name,
                        captures: caps,
                    }),
                ));
                let body = self.lower_expr(*body);
                self.scope.pop();
                body
            }

            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => Ok(Expr::If(
                Box::new(self.lower_expr(*condition)?),
                Box::new(self.lower_expr(*then_branch)?),
                Box::new(self.lower_expr(*else_branch)?),
            )),

            ExprKind::Match { scrutinee, arms } => self.lower_match(*scrutinee, arms),

            ExprKind::Construct {
                type_name,
                ctor,
                args,
            } => {
                let info = self.ctor_info(type_name, ctor)?;
                let tag = info.tag;
                let values = args
                    .iter()
                    .map(|&a| self.lower_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::Pack { tag, values })
            }
        }
    }

    fn ctor_info(&self, type_name: &SmolStr, ctor: &SmolStr) -> Result<&CtorInfo, LowerError> {
        self.tags
            .get(&(type_name.clone(), ctor.clone()))
            .ok_or_else(|| LowerError::UnknownConstructor(type_name.clone(), ctor.clone()))
    }

    // ── Match lowering ───────────────────────────────────────────

    /// `match e { … }` becomes `Let(e, Match(Bound(0), cases))` with tags
    /// in constructor declaration order.
    fn lower_match(
        &mut self,
        scrutinee: ExprId,
        arms: &[lilt_ast::MatchArm],
    ) -> Result<Expr, LowerError> {
        let scrut = self.lower_expr(scrutinee)?;

        if arms.is_empty() {
            return Ok(Expr::Match {
                scrutinee: Box::new(scrut),
                cases: Vec::new(),
            });
        }

        // A leading variable arm matches everything; later arms are dead.
        if let PatternKind::Var(name) = &self.program.patterns[arms[0].pattern].kind {
            self.push_frame(vec![name.clone()]);
            let body = self.lower_expr(arms[0].body);
            self.pop_frame();
            return Ok(Expr::Let(Box::new(scrut), Box::new(body?)));
        }

        let adt_name = match &self.program.patterns[arms[0].pattern].kind {
            PatternKind::Constructor { type_name, .. } => type_name.clone(),
            PatternKind::Var(_) => unreachable!(),
        };

        self.push_frame(vec![SmolStr::new_static("$scrutinee")]);
        let scrut_pos = self.locals.len() - 1;
        let scrut_ref = Expr::Var(LnName::Bound(self.resolve_slot(scrut_pos)));

        let mut cases = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();
        let mut result = Ok(());

        'arms: for arm in arms {
            match &self.program.patterns[arm.pattern].kind {
                PatternKind::Constructor {
                    type_name,
                    ctor,
                    fields,
                } => {
                    let tag = match self.ctor_info(type_name, ctor) {
                        Ok(info) => info.tag,
                        Err(e) => {
                            result = Err(e);
                            break 'arms;
                        }
                    };
                    if !seen.insert(tag) {
                        continue; // dead arm, already covered
                    }
                    match self.lower_case(tag, &fields.clone(), arm.body) {
                        Ok(case) => cases.push(case),
                        Err(e) => {
                            result = Err(e);
                            break 'arms;
                        }
                    }
                }
                PatternKind::Var(name) => {
                    // Catch-all after constructor arms: one case per
                    // remaining constructor, binding the whole scrutinee.
                    let ctors = match self.adts.get(&adt_name) {
                        Some(c) => c.clone(),
                        None => {
                            result = Err(LowerError::UnknownConstructor(
                                adt_name.clone(),
                                name.clone(),
                            ));
                            break 'arms;
                        }
                    };
                    for (ctor_name, arity) in ctors {
                        let tag = self.tags[&(adt_name.clone(), ctor_name)].tag;
                        if !seen.insert(tag) {
                            continue;
                        }
                        let binder_names =
                            (0..arity).map(|i| SmolStr::new(format!("$field{}", i))).collect();
                        self.push_frame(binder_names);
                        self.scope
                            .push((name.clone(), Binding::Local(scrut_pos)));
                        let body = self.lower_expr(arm.body);
                        self.scope.pop();
                        self.pop_frame();
                        match body {
                            Ok(body) => cases.push(Case {
                                tag,
                                binders: arity,
                                body,
                            }),
                            Err(e) => {
                                result = Err(e);
                                break 'arms;
                            }
                        }
                    }
                    break 'arms; // every later arm is dead
                }
            }
        }

        self.pop_frame();
        result?;

        Ok(Expr::Let(
            Box::new(scrut),
            Box::new(Expr::Match {
                scrutinee: Box::new(scrut_ref),
                cases,
            }),
        ))
    }

    /// Lower one constructor arm: a case whose binders are the pack
    /// fields. Nested constructor patterns flatten into inner single-case
    /// matches over the bound field.
    fn lower_case(
        &mut self,
        tag: u32,
        fields: &[PatternId],
        body: ExprId,
    ) -> Result<Case, LowerError> {
        let names: Vec<SmolStr> = fields
            .iter()
            .enumerate()
            .map(|(i, &f)| match &self.program.patterns[f].kind {
                PatternKind::Var(n) => n.clone(),
                PatternKind::Constructor { .. } => SmolStr::new(format!("$field{}", i)),
            })
            .collect();
        let base = self.locals.len();
        self.push_frame(names);

        let pending: Vec<(usize, PatternId)> = fields
            .iter()
            .enumerate()
            .filter(|(_, &f)| {
                matches!(
                    self.program.patterns[f].kind,
                    PatternKind::Constructor { .. }
                )
            })
            .map(|(i, &f)| (base + i, f))
            .collect();

        let body = self.lower_pending(pending, body);
        self.pop_frame();

        Ok(Case {
            tag,
            binders: fields.len() as u32,
            body: body?,
        })
    }

    /// Destructure the queued nested patterns left to right, wrapping the
    /// arm body in one inner match per nested constructor.
    fn lower_pending(
        &mut self,
        mut pending: Vec<(usize, PatternId)>,
        body: ExprId,
    ) -> Result<Expr, LowerError> {
        if pending.is_empty() {
            return self.lower_expr(body);
        }
        let (pos, pattern) = pending.remove(0);

        let PatternKind::Constructor {
            type_name,
            ctor,
            fields,
        } = &self.program.patterns[pattern].kind
        else {
            unreachable!("only constructor patterns are queued");
        };
        let (type_name, ctor, fields) = (type_name.clone(), ctor.clone(), fields.clone());
        let tag = self.ctor_info(&type_name, &ctor)?.tag;

        // The inner scrutinee is the already-bound field slot, resolved
        // outside the nested binders.
        let scrut_ref = Expr::Var(LnName::Bound(self.resolve_slot(pos)));

        let names: Vec<SmolStr> = fields
            .iter()
            .enumerate()
            .map(|(i, &f)| match &self.program.patterns[f].kind {
                PatternKind::Var(n) => n.clone(),
                PatternKind::Constructor { .. } => SmolStr::new(format!("$field{}", i)),
            })
            .collect();
        let base = self.locals.len();
        self.push_frame(names);

        let mut queue: Vec<(usize, PatternId)> = fields
            .iter()
            .enumerate()
            .filter(|(_, &f)| {
                matches!(
                    self.program.patterns[f].kind,
                    PatternKind::Constructor { .. }
                )
            })
            .map(|(i, &f)| (base + i, f))
            .collect();
        queue.extend(pending);

        let inner = self.lower_pending(queue, body);
        self.pop_frame();

        Ok(Expr::Match {
            scrutinee: Box::new(scrut_ref),
            cases: vec![Case {
                tag,
                binders: fields.len() as u32,
                body: inner?,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_source(source: &str) -> LowerResult {
        let program = lilt_parser::parse(source).unwrap_or_else(|e| panic!("parse error: {}", e));
        lower(&program).unwrap_or_else(|e| panic!("lower error: {}", e))
    }

    fn lower_err(source: &str) -> LowerError {
        let program = lilt_parser::parse(source).unwrap_or_else(|e| panic!("parse error: {}", e));
        match lower(&program) {
            Ok(_) => panic!("expected lowering to fail"),
            Err(e) => e,
        }
    }

    fn bound(i: u32) -> Expr {
        Expr::Var(LnName::Bound(i))
    }

    fn free(name: &str) -> Expr {
        Expr::Var(LnName::Free(name.into()))
    }

    #[test]
    fn identity_let_hoists_one_declaration() {
        let result = lower_source(r"let id = \x. x in id");
        assert_eq!(result.declarations.len(), 1);
        let decl = &result.declarations[0];
        assert_eq!(decl.name, "lambda$0");
        assert_eq!(decl.params, vec![SmolStr::new("x")]);
        assert_eq!(decl.body, bound(0));
        assert_eq!(
            result.entry,
            Expr::Let(Box::new(free("lambda$0")), Box::new(bound(0)))
        );
    }

    #[test]
    fn let_rec_hoists_under_its_own_name() {
        let result = lower_source(r"let rec fib = \x. fib x in fib 10");
        assert_eq!(result.declarations.len(), 1);
        let decl = &result.declarations[0];
        assert_eq!(decl.name, "fib");
        assert_eq!(decl.params, vec![SmolStr::new("x")]);
        // the recursive reference resolves to the hoisted function
        assert_eq!(
            decl.body,
            Expr::Apply(Box::new(free("fib")), Box::new(bound(0)))
        );
        assert_eq!(
            result.entry,
            Expr::Apply(Box::new(free("fib")), Box::new(Expr::Int(10)))
        );
    }

    #[test]
    fn nested_lambda_captures_outer_binder() {
        let result = lower_source(r"\x. \y. add x y");
        assert_eq!(result.declarations.len(), 2);
        // inner lambda finishes lowering first
        let inner = &result.declarations[0];
        let outer = &result.declarations[1];
        assert_eq!(outer.name, "lambda$0");
        assert_eq!(inner.name, "lambda$1");
        assert_eq!(
            inner.params,
            vec![SmolStr::new("x"), SmolStr::new("y")]
        );
        assert_eq!(
            inner.body,
            Expr::Apply(
                Box::new(Expr::Apply(Box::new(free("add")), Box::new(bound(0)))),
                Box::new(bound(1)),
            )
        );
        // the outer body rebuilds the inner closure over its own binder
        assert_eq!(outer.params, vec![SmolStr::new("x")]);
        assert_eq!(
            outer.body,
            Expr::Apply(Box::new(free("lambda$1")), Box::new(bound(0)))
        );
    }

    #[test]
    fn match_lowers_to_tag_dispatch() {
        let result = lower_source(
            "type Maybe<a> { Nothing(), Just(a) }\n\
             \\m. match m { Maybe::Just(x) -> x, Maybe::Nothing() -> 0 }",
        );
        let decl = &result.declarations[0];
        assert_eq!(
            decl.body,
            Expr::Let(
                Box::new(bound(0)),
                Box::new(Expr::Match {
                    scrutinee: Box::new(bound(0)),
                    cases: vec![
                        Case {
                            tag: 1,
                            binders: 1,
                            body: bound(0),
                        },
                        Case {
                            tag: 0,
                            binders: 0,
                            body: Expr::Int(0),
                        },
                    ],
                })
            )
        );
    }

    #[test]
    fn construction_lowers_to_pack() {
        let result = lower_source(
            "type List<a> { Cons(a, List<a>), Nil() }\n\
             List::Cons(1, List::Nil())",
        );
        assert_eq!(
            result.entry,
            Expr::Pack {
                tag: 0,
                values: vec![
                    Expr::Int(1),
                    Expr::Pack {
                        tag: 1,
                        values: vec![],
                    },
                ],
            }
        );
    }

    #[test]
    fn nested_patterns_flatten_to_inner_matches() {
        let result = lower_source(
            "type List<a> { Cons(a, List<a>), Nil() }\n\
             \\l. match l { List::Cons(x, List::Cons(y, rest)) -> add x y, z -> 0 }",
        );
        let decl = &result.declarations[0];
        let Expr::Let(_, match_expr) = &decl.body else {
            panic!("expected let around match, got {:?}", decl.body);
        };
        let Expr::Match { cases, .. } = match_expr.as_ref() else {
            panic!("expected match, got {:?}", match_expr);
        };
        // first case: Cons with a nested Cons over its second field
        let nested = &cases[0];
        assert_eq!((nested.tag, nested.binders), (0, 2));
        let Expr::Match {
            scrutinee,
            cases: inner_cases,
        } = &nested.body
        else {
            panic!("expected nested match, got {:?}", nested.body);
        };
        // the nested scrutinee is the second field of the outer case
        assert_eq!(scrutinee.as_ref(), &bound(1));
        assert_eq!((inner_cases[0].tag, inner_cases[0].binders), (0, 2));
        // body: add x y, with x two binders out and y in the innermost slot
        assert_eq!(
            inner_cases[0].body,
            Expr::Apply(
                Box::new(Expr::Apply(Box::new(free("add")), Box::new(bound(2)))),
                Box::new(bound(0)),
            )
        );
    }

    #[test]
    fn catch_all_arm_expands_to_remaining_constructors() {
        let result = lower_source(
            "type Maybe<a> { Nothing(), Just(a) }\n\
             \\m. match m { Maybe::Just(x) -> 1, other -> 2 }",
        );
        let decl = &result.declarations[0];
        let Expr::Let(_, match_expr) = &decl.body else {
            panic!("expected let around match");
        };
        let Expr::Match { cases, .. } = match_expr.as_ref() else {
            panic!("expected match");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!((cases[0].tag, cases[0].binders), (1, 1));
        assert_eq!(cases[0].body, Expr::Int(1));
        // Nothing gets the catch-all body
        assert_eq!((cases[1].tag, cases[1].binders), (0, 0));
        assert_eq!(cases[1].body, Expr::Int(2));
    }

    #[test]
    fn leading_variable_arm_collapses_to_let() {
        let result = lower_source("match 5 { x -> x }");
        assert_eq!(
            result.entry,
            Expr::Let(Box::new(Expr::Int(5)), Box::new(bound(0)))
        );
    }

    #[test]
    fn empty_match_stays_empty() {
        let result = lower_source("match 5 { }");
        assert_eq!(
            result.entry,
            Expr::Match {
                scrutinee: Box::new(Expr::Int(5)),
                cases: vec![],
            }
        );
    }

    #[test]
    fn catch_all_binds_the_scrutinee() {
        let result = lower_source(
            "type Maybe<a> { Nothing(), Just(a) }\n\
             \\m. match m { Maybe::Just(x) -> m, other -> other }",
        );
        let decl = &result.declarations[0];
        let Expr::Let(_, match_expr) = &decl.body else {
            panic!("expected let around match");
        };
        let Expr::Match { cases, .. } = match_expr.as_ref() else {
            panic!("expected match");
        };
        // In the Nothing case (binders = 0) `other` is the let-bound
        // scrutinee, one binder out past the case's zero binders.
        assert_eq!((cases[1].tag, cases[1].binders), (0, 0));
        assert_eq!(cases[1].body, bound(0));
    }

    #[test]
    fn shadowed_capture_resolves_to_nearest_binder() {
        // The lambda captures the let-bound y, not anything outer.
        let result = lower_source(r"let y = 1 in let f = \x. add x y in f 2");
        let lambda = result
            .declarations
            .iter()
            .find(|d| d.params.len() == 2)
            .expect("hoisted lambda with one capture");
        assert_eq!(lambda.params, vec![SmolStr::new("y"), SmolStr::new("x")]);
        // body: add x y with y = param 0, x = param 1
        assert_eq!(
            lambda.body,
            Expr::Apply(
                Box::new(Expr::Apply(Box::new(free("add")), Box::new(bound(1)))),
                Box::new(bound(0)),
            )
        );
    }

    #[test]
    fn recursive_reference_through_nested_lambda() {
        // g references f from inside another lambda; f has no captures, so
        // the nested reference stays a bare function reference.
        let result = lower_source(r"let rec f = \x. x in let g = \y. f y in g 1");
        let g = result
            .declarations
            .iter()
            .find(|d| d.params == vec![SmolStr::new("y")])
            .expect("hoisted g lambda");
        assert_eq!(
            g.body,
            Expr::Apply(Box::new(free("f")), Box::new(bound(0)))
        );
    }

    #[test]
    fn let_rec_of_non_lambda_is_rejected() {
        assert_eq!(
            lower_err("let rec x = 1 in x"),
            LowerError::RecursiveValue(SmolStr::new("x"))
        );
    }

    #[test]
    fn unbound_variable_is_rejected() {
        assert_eq!(
            lower_err("missing"),
            LowerError::UnboundVariable(SmolStr::new("missing"))
        );
    }

    #[test]
    fn duplicate_arm_is_dropped_as_dead() {
        let result = lower_source(
            "type Maybe<a> { Nothing(), Just(a) }\n\
             \\m. match m { Maybe::Nothing() -> 1, Maybe::Nothing() -> 2, Maybe::Just(x) -> 3 }",
        );
        let decl = &result.declarations[0];
        let Expr::Let(_, match_expr) = &decl.body else {
            panic!("expected let around match");
        };
        let Expr::Match { cases, .. } = match_expr.as_ref() else {
            panic!("expected match");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].body, Expr::Int(1));
    }
}
