mod error;
mod types;


pub use error::{TypeError, TypeErrorKind};
pub use types::{DataConstructor, Scheme, Ty, TypeInfo, TypeMap};

use smol_str::SmolStr;
use std::collections::HashMap;
use lilt_ast::{
    ExprId, ExprKind, PatternId, PatternKind, Program, Span, TypeDecl, TypeExprId, TypeExprKind,
};

// ── Public API ───────────────────────────────────────────────────

/// Infer the most general type of a program's expression.
///
/// The environment starts with the runtime primitives (`add`, `sub`, `div`,
/// `eq_int`) and the type map with `Int` and `Bool`; the program's own type
/// declarations are added before inference. Every failure is fatal.
pub fn check(program: &Program) -> Result<Scheme, TypeError> {
    let mut checker = Checker::new(program)?;
    let ty = checker.infer(program.root)?;
    Ok(checker.generalise(&ty))
}

// ── Checker ──────────────────────────────────────────────────────

struct Checker<'a> {
    program: &'a Program,

    /// Substitution: index = unknown id, value = solved type (or None).
    /// The fresh supply is the vector's length.
    subst: Vec<Option<Ty>>,

    /// Scoped bindings; `bind_name` records and restores the previous
    /// entry around each nested action.
    env: HashMap<SmolStr, Scheme>,

    /// Declared ADTs plus the primitive `Int` and `Bool`.
    types: TypeMap,
}

impl<'a> Checker<'a> {
    fn new(program: &'a Program) -> Result<Self, TypeError> {
        let mut env = HashMap::new();
        let int_binop = Scheme::mono(Ty::func(Ty::int(), Ty::func(Ty::int(), Ty::int())));
        env.insert(SmolStr::new_static("add"), int_binop.clone());
        env.insert(SmolStr::new_static("sub"), int_binop.clone());
        env.insert(SmolStr::new_static("div"), int_binop);
        env.insert(
            SmolStr::new_static("eq_int"),
            Scheme::mono(Ty::func(Ty::int(), Ty::func(Ty::int(), Ty::bool()))),
        );

        let mut types = TypeMap::new();
        types.insert(
            SmolStr::new_static("Int"),
            TypeInfo {
                params: Vec::new(),
                constructors: Vec::new(),
            },
        );
        types.insert(
            SmolStr::new_static("Bool"),
            TypeInfo {
                params: Vec::new(),
                constructors: Vec::new(),
            },
        );

        let mut checker = Self {
            program,
            subst: Vec::new(),
            env,
            types,
        };
        checker.collect_type_decls()?;
        Ok(checker)
    }

    /// Register every declared ADT: names first so constructor fields can
    /// refer to any declaration (including their own), then the resolved
    /// constructors.
    fn collect_type_decls(&mut self) -> Result<(), TypeError> {
        for decl in &self.program.decls {
            self.types.insert(
                decl.name.clone(),
                TypeInfo {
                    params: decl.params.clone(),
                    constructors: Vec::new(),
                },
            );
        }
        for decl in &self.program.decls {
            let mut constructors = Vec::new();
            for ctor in &decl.constructors {
                let fields = ctor
                    .fields
                    .iter()
                    .map(|&f| self.resolve_type_expr(decl, f))
                    .collect::<Result<Vec<_>, _>>()?;
                constructors.push(DataConstructor {
                    name: ctor.name.clone(),
                    fields,
                });
            }
            if let Some(info) = self.types.get_mut(&decl.name) {
                info.constructors = constructors;
            }
        }
        Ok(())
    }

    /// Resolve a declaration field's type expression. Lowercase names must
    /// be parameters of the enclosing declaration; uppercase names must be
    /// declared types.
    fn resolve_type_expr(&self, decl: &TypeDecl, id: TypeExprId) -> Result<Ty, TypeError> {
        let type_expr = &self.program.type_exprs[id];
        match &type_expr.kind {
            TypeExprKind::Param(name) => {
                if decl.params.contains(name) {
                    Ok(Ty::Var(name.clone()))
                } else {
                    Err(TypeErrorKind::UnknownType(name.clone()).at(type_expr.span))
                }
            }
            TypeExprKind::Named { name, args } => {
                if !self.types.contains_key(name) {
                    return Err(TypeErrorKind::UnknownType(name.clone()).at(type_expr.span));
                }
                let args = args
                    .iter()
                    .map(|&a| self.resolve_type_expr(decl, a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Ty::Con(name.clone(), args))
            }
            TypeExprKind::Fn { arg, result } => Ok(Ty::func(
                self.resolve_type_expr(decl, *arg)?,
                self.resolve_type_expr(decl, *result)?,
            )),
        }
    }

    // ── Fresh unknowns ───────────────────────────────────────────

    fn fresh_unknown(&mut self) -> Ty {
        let id = self.subst.len() as u32;
        self.subst.push(None);
        Ty::Unknown(id)
    }

    // ── Substitution ─────────────────────────────────────────────

    /// Zonk: resolve every unknown in `ty` through the substitution.
    fn apply(&self, ty: &Ty) -> Ty {
        match ty {
            Ty::Unknown(u) => {
                if let Some(Some(resolved)) = self.subst.get(*u as usize) {
                    self.apply(resolved)
                } else {
                    ty.clone()
                }
            }
            Ty::Fn(arg, result) => Ty::func(self.apply(arg), self.apply(result)),
            Ty::Con(name, args) => Ty::Con(
                name.clone(),
                args.iter().map(|a| self.apply(a)).collect(),
            ),
            Ty::Var(_) => ty.clone(),
        }
    }

    /// Record `u ↦ ty` after the occurs check.
    fn solve(&mut self, u: u32, ty: Ty, span: Span) -> Result<(), TypeError> {
        self.occurs_check(u, &ty, span)?;
        self.subst[u as usize] = Some(ty);
        Ok(())
    }

    /// Fails when `u` appears inside `ty`. A direct unknown-to-unknown
    /// link always passes.
    fn occurs_check(&self, u: u32, ty: &Ty, span: Span) -> Result<(), TypeError> {
        if matches!(ty, Ty::Unknown(_)) {
            return Ok(());
        }
        if self.occurs_in(u, ty) {
            return Err(TypeErrorKind::OccursCheck(u, self.apply(ty)).at(span));
        }
        Ok(())
    }

    fn occurs_in(&self, u: u32, ty: &Ty) -> bool {
        match self.apply(ty) {
            Ty::Unknown(v) => v == u,
            Ty::Fn(arg, result) => self.occurs_in(u, &arg) || self.occurs_in(u, &result),
            Ty::Con(_, args) => args.iter().any(|a| self.occurs_in(u, a)),
            Ty::Var(_) => false,
        }
    }

    // ── Unification ──────────────────────────────────────────────

    fn unify(&mut self, a: &Ty, b: &Ty, span: Span) -> Result<(), TypeError> {
        let a = self.apply(a);
        let b = self.apply(b);

        if a == b {
            return Ok(());
        }

        match (a, b) {
            (Ty::Con(n1, args1), Ty::Con(n2, args2)) if n1 == n2 && args1.len() == args2.len() => {
                for (x, y) in args1.iter().zip(args2.iter()) {
                    self.unify(x, y, span)?;
                }
                Ok(())
            }
            (Ty::Unknown(u), other) | (other, Ty::Unknown(u)) => self.solve(u, other, span),
            (Ty::Fn(a1, r1), Ty::Fn(a2, r2)) => {
                self.unify(&a1, &a2, span)?;
                self.unify(&r1, &r2, span)
            }
            (a, b) => Err(TypeErrorKind::UnifyMismatch(a, b).at(span)),
        }
    }

    // ── Environment ──────────────────────────────────────────────

    /// Run `action` with `name` bound, then restore the previous binding
    /// exactly: remove when previously absent, reinstate when previously
    /// present. Restoration also holds on the error path.
    fn bind_name<T>(
        &mut self,
        name: &SmolStr,
        scheme: Scheme,
        action: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        let prev = self.env.insert(name.clone(), scheme);
        let result = action(self);
        match prev {
            Some(p) => {
                self.env.insert(name.clone(), p);
            }
            None => {
                self.env.remove(name);
            }
        }
        result
    }

    /// Bind a pattern's binding list monomorphically, left to right, so a
    /// later binding of the same name shadows an earlier one.
    fn bind_many<T>(
        &mut self,
        bindings: &[(SmolStr, Ty)],
        action: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        let mut saved = Vec::with_capacity(bindings.len());
        for (name, ty) in bindings {
            saved.push((
                name.clone(),
                self.env.insert(name.clone(), Scheme::mono(ty.clone())),
            ));
        }
        let result = action(self);
        for (name, prev) in saved.into_iter().rev() {
            match prev {
                Some(p) => {
                    self.env.insert(name, p);
                }
                None => {
                    self.env.remove(&name);
                }
            }
        }
        result
    }

    /// Union of free unknown ids across all currently-bound scheme bodies,
    /// over zonked forms.
    fn env_unknowns(&self) -> Vec<u32> {
        let mut acc = Vec::new();
        for scheme in self.env.values() {
            for u in self.apply(&scheme.ty).unknowns() {
                if !acc.contains(&u) {
                    acc.push(u);
                }
            }
        }
        acc
    }

    // ── Instantiation and generalisation ─────────────────────────

    /// Replace each quantified variable with a fresh unknown.
    fn instantiate(&mut self, scheme: &Scheme) -> Ty {
        let mapping: HashMap<SmolStr, Ty> = scheme
            .vars
            .iter()
            .map(|v| (v.clone(), self.fresh_unknown()))
            .collect();
        scheme.ty.substitute(&mapping)
    }

    /// Quantify the free unknowns of `ty` that are not free in the
    /// environment. Quantified variables are named `a`, `b`, … in order of
    /// first encounter, and each solved unknown is recorded in the
    /// substitution.
    fn generalise(&mut self, ty: &Ty) -> Scheme {
        let ty = self.apply(ty);
        let env_unknowns = self.env_unknowns();
        let mut vars = Vec::new();
        for u in ty.unknowns() {
            if env_unknowns.contains(&u) {
                continue;
            }
            let name = tyvar_name(vars.len());
            self.subst[u as usize] = Some(Ty::Var(name.clone()));
            vars.push(name);
        }
        Scheme {
            vars,
            ty: self.apply(&ty),
        }
    }

    // ── Inference ────────────────────────────────────────────────

    fn infer(&mut self, id: ExprId) -> Result<Ty, TypeError> {
        let expr = &self.program.exprs[id];
        let span = expr.span;

        match &expr.kind {
            ExprKind::Int(_) => Ok(Ty::int()),
            ExprKind::Bool(_) => Ok(Ty::bool()),

            ExprKind::Var(name) => {
                let scheme = self
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| TypeErrorKind::UnknownVariable(name.clone()).at(span))?;
                Ok(self.instantiate(&scheme))
            }

            ExprKind::Lambda { param, body } => {
                let param_ty = self.fresh_unknown();
                let body = *body;
                let body_ty =
                    self.bind_name(param, Scheme::mono(param_ty.clone()), |s| s.infer(body))?;
                Ok(Ty::func(param_ty, body_ty))
            }

            ExprKind::Apply { func, arg } => {
                let func_ty = self.infer(*func)?;
                let arg_ty = self.infer(*arg)?;
                let result = self.fresh_unknown();
                self.unify(&func_ty, &Ty::func(arg_ty, result.clone()), span)?;
                Ok(result)
            }

            ExprKind::Let {
                name,
                recursive,
                value,
                body,
            } => {
                let (value, body) = (*value, *body);
                let scheme = if *recursive {
                    // Bind the name monomorphically while inferring its own
                    // definition, then generalise the solved type.
                    let placeholder = self.fresh_unknown();
                    let value_ty = self.bind_name(name, Scheme::mono(placeholder.clone()), |s| {
                        s.infer(value)
                    })?;
                    self.unify(&value_ty, &placeholder, span)?;
                    self.generalise(&placeholder)
                } else {
                    let value_ty = self.infer(value)?;
                    self.generalise(&value_ty)
                };
                self.bind_name(name, scheme, |s| s.infer(body))
            }

            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond_span = self.program.exprs[*condition].span;
                let cond_ty = self.infer(*condition)?;
                self.unify(&cond_ty, &Ty::bool(), cond_span)?;
                let then_ty = self.infer(*then_branch)?;
                let else_ty = self.infer(*else_branch)?;
                self.unify(&then_ty, &else_ty, span)?;
                Ok(then_ty)
            }

            ExprKind::Match { scrutinee, arms } => {
                let scrut_ty = self.infer(*scrutinee)?;
                let result_ty = self.fresh_unknown();
                for arm in arms {
                    let bindings = self.infer_pattern(arm.pattern, &scrut_ty)?;
                    let body = arm.body;
                    let arm_ty = self.bind_many(&bindings, |s| s.infer(body))?;
                    self.unify(&result_ty, &arm_ty, arm.span)?;
                }
                Ok(result_ty)
            }

            ExprKind::Construct {
                type_name,
                ctor,
                args,
            } => self.infer_construct(type_name, ctor, args, span),
        }
    }

    fn infer_construct(
        &mut self,
        type_name: &SmolStr,
        ctor: &SmolStr,
        args: &[ExprId],
        span: Span,
    ) -> Result<Ty, TypeError> {
        let (result_ty, field_tys) = self.instantiate_constructor(type_name, ctor, span)?;

        if field_tys.len() != args.len() {
            let mut arg_tys = Vec::with_capacity(args.len());
            for &arg in args {
                arg_tys.push(self.infer(arg)?);
            }
            let supplied_result = self.fresh_unknown();
            return Err(TypeErrorKind::UnifyMismatch(
                curry(&field_tys, result_ty),
                curry(&arg_tys, supplied_result),
            )
            .at(span));
        }

        for (&arg, field_ty) in args.iter().zip(field_tys.iter()) {
            let arg_span = self.program.exprs[arg].span;
            let arg_ty = self.infer(arg)?;
            self.unify(&arg_ty, field_ty, arg_span)?;
        }
        Ok(result_ty)
    }

    /// Returns a list of bindings introduced by the pattern, left to right.
    fn infer_pattern(
        &mut self,
        id: PatternId,
        expected: &Ty,
    ) -> Result<Vec<(SmolStr, Ty)>, TypeError> {
        let pattern = &self.program.patterns[id];
        let span = pattern.span;

        match &pattern.kind {
            PatternKind::Var(name) => Ok(vec![(name.clone(), expected.clone())]),

            PatternKind::Constructor {
                type_name,
                ctor,
                fields,
            } => {
                let (result_ty, field_tys) =
                    self.instantiate_constructor(type_name, ctor, span)?;
                self.unify(expected, &result_ty, span)?;

                if field_tys.len() != fields.len() {
                    let supplied: Vec<Ty> =
                        (0..fields.len()).map(|_| self.fresh_unknown()).collect();
                    let supplied_result = self.fresh_unknown();
                    return Err(TypeErrorKind::UnifyMismatch(
                        curry(&field_tys, result_ty),
                        curry(&supplied, supplied_result),
                    )
                    .at(span));
                }

                let mut bindings = Vec::new();
                for (&field, field_ty) in fields.iter().zip(field_tys.iter()) {
                    bindings.extend(self.infer_pattern(field, field_ty)?);
                }
                Ok(bindings)
            }
        }
    }

    /// Look up a constructor and instantiate its declaration's type
    /// parameters with fresh unknowns. Returns the applied constructor
    /// type `T<α₁…αₙ>` and the substituted field types.
    fn instantiate_constructor(
        &mut self,
        type_name: &SmolStr,
        ctor: &SmolStr,
        span: Span,
    ) -> Result<(Ty, Vec<Ty>), TypeError> {
        let info = self
            .types
            .get(type_name)
            .cloned()
            .ok_or_else(|| TypeErrorKind::UnknownType(type_name.clone()).at(span))?;
        let dc = info
            .constructors
            .iter()
            .find(|c| c.name == *ctor)
            .cloned()
            .ok_or_else(|| {
                TypeErrorKind::UnknownConstructor(type_name.clone(), ctor.clone()).at(span)
            })?;

        let mapping: HashMap<SmolStr, Ty> = info
            .params
            .iter()
            .map(|p| (p.clone(), self.fresh_unknown()))
            .collect();
        let type_args: Vec<Ty> = info.params.iter().map(|p| mapping[p].clone()).collect();
        let result_ty = Ty::Con(type_name.clone(), type_args);
        let field_tys: Vec<Ty> = dc.fields.iter().map(|f| f.substitute(&mapping)).collect();
        Ok((result_ty, field_tys))
    }
}

/// Fold field types into a curried function type ending at `result`.
fn curry(fields: &[Ty], result: Ty) -> Ty {
    fields
        .iter()
        .rev()
        .fold(result, |acc, f| Ty::func(f.clone(), acc))
}

/// Deterministic quantifier names: `a` … `z`, then `a1`, `b1`, …
fn tyvar_name(i: usize) -> SmolStr {
    let letter = (b'a' + (i % 26) as u8) as char;
    if i < 26 {
        SmolStr::new(letter.to_string())
    } else {
        SmolStr::new(format!("{}{}", letter, i / 26))
    }
}
