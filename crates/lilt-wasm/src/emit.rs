use wasm_encoder::{BlockType, Function, Instruction, ValType};
use lilt_ir::{Expr, LnName};

use crate::{Codegen, CodegenError};

impl Codegen {
    /// Compile one IR expression to operand-stack code, leaving exactly
    /// one i32 on the stack. Binders are instantiated with `GetLocal`
    /// references as they are crossed, so a surviving `Bound` index is a
    /// lowering bug.
    pub(crate) fn emit_expr(
        &mut self,
        expr: &Expr,
        func: &mut Function,
    ) -> Result<(), CodegenError> {
        match expr {
            Expr::Int(n) => {
                func.instruction(&Instruction::I32Const(*n));
                Ok(())
            }

            Expr::Bool(b) => {
                func.instruction(&Instruction::I32Const(if *b { 1 } else { 0 }));
                Ok(())
            }

            Expr::GetLocal(idx) => {
                func.instruction(&Instruction::LocalGet(*idx));
                Ok(())
            }

            Expr::Var(LnName::Bound(_)) => Err(CodegenError::InternalBound),

            // A bare function reference becomes a fresh closure with no
            // applied arguments.
            Expr::Var(LnName::Free(name)) => {
                let info = self.func_info(name)?;
                func.instruction(&Instruction::I32Const(info.arity as i32));
                func.instruction(&Instruction::I32Const(info.table_index as i32));
                func.instruction(&Instruction::Call(self.rt.make_closure));
                Ok(())
            }

            Expr::Apply(_, _) => {
                let (head, args) = expr.unfold_apply();

                // Saturated call of a known function: skip the closure
                // protocol and call the direct-stack form.
                if let Expr::Var(LnName::Free(name)) = head {
                    let info = self.func_info(name)?;
                    if info.arity as usize == args.len() {
                        for arg in &args {
                            self.emit_expr(arg, func)?;
                        }
                        func.instruction(&Instruction::Call(info.inner));
                        return Ok(());
                    }
                }

                self.emit_expr(head, func)?;
                for arg in &args {
                    self.emit_expr(arg, func)?;
                    func.instruction(&Instruction::Call(self.rt.apply_closure));
                }
                Ok(())
            }

            Expr::Pack { tag, values } => {
                func.instruction(&Instruction::I32Const(*tag as i32));
                func.instruction(&Instruction::I32Const(values.len() as i32));
                func.instruction(&Instruction::Call(self.rt.make_pack));
                for (i, value) in values.iter().enumerate() {
                    func.instruction(&Instruction::I32Const(i as i32));
                    self.emit_expr(value, func)?;
                    func.instruction(&Instruction::Call(self.rt.write_pack_field));
                }
                Ok(())
            }

            Expr::If(condition, then_branch, else_branch) => {
                self.emit_expr(condition, func)?;
                func.instruction(&Instruction::If(BlockType::Result(ValType::I32)));
                self.emit_expr(then_branch, func)?;
                func.instruction(&Instruction::Else);
                self.emit_expr(else_branch, func)?;
                func.instruction(&Instruction::End);
                Ok(())
            }

            Expr::Let(value, body) => {
                self.emit_expr(value, func)?;
                let local = self.new_local();
                func.instruction(&Instruction::LocalSet(local));
                let body = body.instantiate(&[Expr::GetLocal(local)]);
                self.emit_expr(&body, func)
            }

            Expr::Match { scrutinee, cases } => self.emit_match(scrutinee, cases, func),
        }
    }

    /// Tag dispatch: evaluate the scrutinee into a local, read its tag,
    /// and compare against each case in an if-chain. Case binders load
    /// the pack fields into fresh locals. The terminal else traps; a
    /// non-exhaustive match is a compile-time input assumption.
    fn emit_match(
        &mut self,
        scrutinee: &Expr,
        cases: &[lilt_ir::Case],
        func: &mut Function,
    ) -> Result<(), CodegenError> {
        self.emit_expr(scrutinee, func)?;
        let scrut = self.new_local();
        func.instruction(&Instruction::LocalSet(scrut));

        if cases.is_empty() {
            func.instruction(&Instruction::Unreachable);
            return Ok(());
        }

        func.instruction(&Instruction::LocalGet(scrut));
        func.instruction(&Instruction::Call(self.rt.read_pack_tag));
        let tag = self.new_local();
        func.instruction(&Instruction::LocalSet(tag));

        for case in cases {
            func.instruction(&Instruction::LocalGet(tag));
            func.instruction(&Instruction::I32Const(case.tag as i32));
            func.instruction(&Instruction::I32Eq);
            func.instruction(&Instruction::If(BlockType::Result(ValType::I32)));

            let mut binders = Vec::with_capacity(case.binders as usize);
            for i in 0..case.binders {
                func.instruction(&Instruction::LocalGet(scrut));
                func.instruction(&Instruction::I32Const(i as i32));
                func.instruction(&Instruction::Call(self.rt.read_pack_field));
                let local = self.new_local();
                func.instruction(&Instruction::LocalSet(local));
                binders.push(Expr::GetLocal(local));
            }

            let body = case.body.instantiate(&binders);
            self.emit_expr(&body, func)?;
            func.instruction(&Instruction::Else);
        }

        func.instruction(&Instruction::Unreachable);
        for _ in cases {
            func.instruction(&Instruction::End);
        }
        Ok(())
    }
}
