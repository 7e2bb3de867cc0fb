mod emit;
pub(crate) mod runtime;

use std::borrow::Cow;
use std::collections::HashMap;

use smol_str::SmolStr;
use wasm_encoder::{
    CodeSection, ConstExpr, ElementSection, Elements, ExportKind, ExportSection, Function,
    FunctionSection, GlobalSection, GlobalType, Instruction, MemorySection, MemoryType, Module,
    RefType, TableSection, TableType, TypeSection, ValType,
};
use lilt_ir::{Declaration, Expr, LowerResult};

use runtime::{
    emit_allocate, emit_apply_closure, emit_arg_wrapper, emit_binop, emit_copy_closure,
    emit_make_closure, emit_make_pack, emit_read_pack_field, emit_read_pack_tag,
    emit_write_pack_field, INITIAL_PAGES,
};

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    /// A locally-nameless bound index survived to emission; lowering must
    /// have instantiated every binder by then.
    #[error("bound variable escaped to code generation")]
    InternalBound,

    #[error("undefined symbol '{0}' during code generation")]
    UndefinedSymbol(SmolStr),
}

// ── Codegen ──────────────────────────────────────────────────────

/// A function callable from compiled code: its direct-stack form, its
/// slot in the function table, and its argument count.
#[derive(Clone, Copy)]
pub(crate) struct FuncInfo {
    pub(crate) inner: u32,
    pub(crate) table_index: u32,
    pub(crate) arity: u32,
}

/// Indices of the installed runtime primitives used during emission.
#[derive(Clone, Copy, Default)]
pub(crate) struct RuntimeIndices {
    pub(crate) make_closure: u32,
    pub(crate) apply_closure: u32,
    pub(crate) make_pack: u32,
    pub(crate) write_pack_field: u32,
    pub(crate) read_pack_field: u32,
    pub(crate) read_pack_tag: u32,
}

pub struct Codegen {
    types: TypeSection,
    functions: FunctionSection,
    code: CodeSection,
    exports: ExportSection,

    type_index_cache: HashMap<(Vec<ValType>, Vec<ValType>), u32>,
    next_type_index: u32,
    next_func_index: u32,

    /// Table-registered function indices, in registration order. A
    /// closure's code pointer is an index into this table.
    table: Vec<u32>,

    /// Callable registry: runtime builtins plus user declarations.
    pub(crate) funcs: HashMap<SmolStr, FuncInfo>,
    pub(crate) rt: RuntimeIndices,
    /// Type of table-callable functions: (arg_ptr: i32) -> i32.
    apply_type: u32,

    // Per-function emission state.
    pub(crate) next_local: u32,
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen {
    pub fn new() -> Self {
        let mut codegen = Self {
            types: TypeSection::new(),
            functions: FunctionSection::new(),
            code: CodeSection::new(),
            exports: ExportSection::new(),
            type_index_cache: HashMap::new(),
            next_type_index: 0,
            next_func_index: 0,
            table: Vec::new(),
            funcs: HashMap::new(),
            rt: RuntimeIndices::default(),
            apply_type: 0,
            next_local: 0,
        };
        codegen.init_rts();
        codegen
    }

    /// Register or retrieve a function type index; deduplicated
    /// structurally over parameters and results.
    fn func_type_index(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        let key = (params.clone(), results.clone());
        if let Some(&idx) = self.type_index_cache.get(&key) {
            return idx;
        }
        let idx = self.next_type_index;
        self.next_type_index += 1;
        self.types.ty().function(params, results);
        self.type_index_cache.insert(key, idx);
        idx
    }

    /// Declare, emit, and export one function. Bodies installed this way
    /// may only call functions installed before them.
    fn install(
        &mut self,
        name: &str,
        params: &[ValType],
        results: &[ValType],
        locals: &[ValType],
        build: impl FnOnce(&mut Function),
    ) -> u32 {
        let type_idx = self.func_type_index(params.to_vec(), results.to_vec());
        self.functions.function(type_idx);
        let idx = self.next_func_index;
        self.next_func_index += 1;

        let mut func = Function::new(locals.iter().map(|&vt| (1, vt)).collect::<Vec<_>>());
        build(&mut func);
        self.code.function(&func);
        self.exports.export(name, ExportKind::Func, idx);
        idx
    }

    /// Install the fixed runtime: allocator, closure and pack operations,
    /// and the integer builtins with their table wrappers.
    fn init_rts(&mut self) {
        const I32: ValType = ValType::I32;

        self.apply_type = self.func_type_index(vec![I32], vec![I32]);

        let allocate = self.install("allocate", &[I32], &[I32], &[I32], emit_allocate);
        self.rt.make_closure = self.install("make_closure", &[I32, I32], &[I32], &[I32], |f| {
            emit_make_closure(f, allocate)
        });
        let copy_closure = self.install("copy_closure", &[I32], &[I32], &[I32, I32, I32], |f| {
            emit_copy_closure(f, allocate)
        });
        let apply_type = self.apply_type;
        self.rt.apply_closure =
            self.install("apply_closure", &[I32, I32], &[I32], &[I32, I32], |f| {
                emit_apply_closure(f, copy_closure, apply_type)
            });
        self.rt.make_pack = self.install("make_pack", &[I32, I32], &[I32], &[I32], |f| {
            emit_make_pack(f, allocate)
        });
        self.rt.write_pack_field =
            self.install("write_pack_field", &[I32, I32, I32], &[I32], &[], emit_write_pack_field);
        self.rt.read_pack_field =
            self.install("read_pack_field", &[I32, I32], &[I32], &[], emit_read_pack_field);
        self.rt.read_pack_tag =
            self.install("read_pack_tag", &[I32], &[I32], &[], emit_read_pack_tag);

        for (name, op) in [
            ("add", Instruction::I32Add),
            ("sub", Instruction::I32Sub),
            ("div", Instruction::I32DivS),
            ("eq_int", Instruction::I32Eq),
        ] {
            let inner = self.install(
                &format!("{}$inner", name),
                &[I32, I32],
                &[I32],
                &[],
                |f| emit_binop(f, op),
            );
            let wrapper = self.install(name, &[I32], &[I32], &[], |f| {
                emit_arg_wrapper(f, inner, 2)
            });
            let table_index = self.table.len() as u32;
            self.table.push(wrapper);
            self.funcs.insert(
                SmolStr::new(name),
                FuncInfo {
                    inner,
                    table_index,
                    arity: 2,
                },
            );
        }
    }

    /// Declare one user function pair: `name$inner` (direct call form)
    /// and the table-callable `name` trampoline. Bodies are emitted in a
    /// second pass so declarations can reference each other.
    fn declare(&mut self, decl: &Declaration) {
        const I32: ValType = ValType::I32;
        let arity = decl.params.len() as u32;

        let inner_type = self.func_type_index(vec![I32; arity as usize], vec![I32]);
        self.functions.function(inner_type);
        let inner = self.next_func_index;
        self.next_func_index += 1;
        self.exports
            .export(&format!("{}$inner", decl.name), ExportKind::Func, inner);

        let wrapper_type = self.apply_type;
        self.functions.function(wrapper_type);
        let wrapper = self.next_func_index;
        self.next_func_index += 1;
        self.exports.export(&decl.name, ExportKind::Func, wrapper);

        let table_index = self.table.len() as u32;
        self.table.push(wrapper);
        self.funcs.insert(
            decl.name.clone(),
            FuncInfo {
                inner,
                table_index,
                arity,
            },
        );
    }

    /// Emit the bodies declared by [`Codegen::declare`], in the same
    /// order: `name$inner` compiled from the IR, then the trampoline.
    fn emit_declaration(&mut self, decl: &Declaration) -> Result<(), CodegenError> {
        let info = self
            .funcs
            .get(&decl.name)
            .copied()
            .ok_or_else(|| CodegenError::UndefinedSymbol(decl.name.clone()))?;
        let arity = decl.params.len() as u32;

        // Open the declaration's binders onto the parameter locals.
        let params: Vec<Expr> = (0..arity).map(Expr::GetLocal).collect();
        let body = decl.body.instantiate(&params);

        // Pass 1: discover how many scratch locals the body needs.
        self.next_local = arity;
        let mut scratch = Function::new(vec![]);
        self.emit_expr(&body, &mut scratch)?;
        let extra = self.next_local - arity;

        // Pass 2: emit with the locals declared up front.
        self.next_local = arity;
        let locals = if extra > 0 {
            vec![(extra, ValType::I32)]
        } else {
            vec![]
        };
        let mut func = Function::new(locals);
        self.emit_expr(&body, &mut func)?;
        func.instruction(&Instruction::End);
        self.code.function(&func);

        let mut wrapper = Function::new(vec![]);
        emit_arg_wrapper(&mut wrapper, info.inner, arity);
        self.code.function(&wrapper);
        Ok(())
    }

    pub(crate) fn func_info(&self, name: &SmolStr) -> Result<FuncInfo, CodegenError> {
        self.funcs
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UndefinedSymbol(name.clone()))
    }

    pub(crate) fn new_local(&mut self) -> u32 {
        let idx = self.next_local;
        self.next_local += 1;
        idx
    }

    /// Assemble the module: memory, watermark global, function table and
    /// element segment, exports, and all compiled code.
    fn finish(self) -> Module {
        let mut memory = MemorySection::new();
        memory.memory(MemoryType {
            minimum: INITIAL_PAGES,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });

        let mut globals = GlobalSection::new();
        globals.global(
            GlobalType {
                val_type: ValType::I32,
                mutable: true,
                shared: false,
            },
            &ConstExpr::i32_const(0),
        );

        let mut tables = TableSection::new();
        tables.table(TableType {
            element_type: RefType::FUNCREF,
            table64: false,
            minimum: self.table.len() as u64,
            maximum: Some(self.table.len() as u64),
            shared: false,
        });

        let mut elements = ElementSection::new();
        if !self.table.is_empty() {
            elements.active(
                Some(0),
                &ConstExpr::i32_const(0),
                Elements::Functions(Cow::Borrowed(&self.table)),
            );
        }

        let mut exports = self.exports;
        exports.export("memory", ExportKind::Memory, 0);
        exports.export("watermark", ExportKind::Global, 0);

        let mut module = Module::new();
        module.section(&self.types);
        module.section(&self.functions);
        module.section(&tables);
        module.section(&memory);
        module.section(&globals);
        module.section(&exports);
        module.section(&elements);
        module.section(&self.code);
        module
    }
}

// ── Public API ───────────────────────────────────────────────────

/// Build the WASM module value for a set of closure-converted
/// declarations. Byte serialization is the caller's concern.
pub fn build_module(declarations: &[Declaration]) -> Result<Module, CodegenError> {
    let mut codegen = Codegen::new();
    for decl in declarations {
        codegen.declare(decl);
    }
    for decl in declarations {
        codegen.emit_declaration(decl)?;
    }
    Ok(codegen.finish())
}

/// Compile declarations to a `.wasm` binary.
pub fn compile(declarations: &[Declaration]) -> Result<Vec<u8>, CodegenError> {
    Ok(build_module(declarations)?.finish())
}

/// Compile a lowered program: its declarations plus a zero-argument
/// `main` holding the residual expression.
pub fn compile_program(lowered: &LowerResult) -> Result<Vec<u8>, CodegenError> {
    let mut declarations = lowered.declarations.clone();
    declarations.push(Declaration {
        name: SmolStr::new_static("main"),
        params: Vec::new(),
        body: lowered.entry.clone(),
    });
    compile(&declarations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_source(source: &str) -> Vec<u8> {
        let program = lilt_parser::parse(source).unwrap_or_else(|e| panic!("parse error: {}", e));
        lilt_typeck::check(&program).unwrap_or_else(|e| panic!("type error: {}", e));
        let lowered = lilt_ir::lower(&program).unwrap_or_else(|e| panic!("lower error: {}", e));
        let wasm_bytes = compile_program(&lowered).expect("codegen failed");

        let mut validator = wasmparser::Validator::new();
        if let Err(e) = validator.validate_all(&wasm_bytes) {
            panic!("WASM validation failed: {} (offset: {:?})", e, e.offset());
        }
        wasm_bytes
    }

    fn run_main(source: &str) -> i32 {
        let wasm_bytes = compile_source(source);
        let engine = wasmtime::Engine::default();
        let module = wasmtime::Module::new(&engine, &wasm_bytes).expect("module load failed");
        let mut store = wasmtime::Store::new(&engine, ());
        let instance =
            wasmtime::Instance::new(&mut store, &module, &[]).expect("instantiation failed");
        let main = instance
            .get_typed_func::<(), i32>(&mut store, "main$inner")
            .expect("main$inner export");
        main.call(&mut store, ()).expect("execution trapped")
    }

    // ── Module shape ─────────────────────────────────────────────

    #[test]
    fn runtime_exports_are_present() {
        let wasm_bytes = compile_source("0");
        let engine = wasmtime::Engine::default();
        let module = wasmtime::Module::new(&engine, &wasm_bytes).unwrap();
        let mut store = wasmtime::Store::new(&engine, ());
        let instance = wasmtime::Instance::new(&mut store, &module, &[]).unwrap();
        for name in [
            "allocate",
            "make_closure",
            "copy_closure",
            "apply_closure",
            "make_pack",
            "write_pack_field",
            "read_pack_field",
            "read_pack_tag",
            "add",
            "add$inner",
            "sub",
            "div",
            "eq_int",
            "main",
            "main$inner",
        ] {
            assert!(
                instance.get_func(&mut store, name).is_some(),
                "missing export {}",
                name
            );
        }
        assert!(instance.get_memory(&mut store, "memory").is_some());
    }

    #[test]
    fn allocate_bumps_the_watermark() {
        let wasm_bytes = compile_source("0");
        let engine = wasmtime::Engine::default();
        let module = wasmtime::Module::new(&engine, &wasm_bytes).unwrap();
        let mut store = wasmtime::Store::new(&engine, ());
        let instance = wasmtime::Instance::new(&mut store, &module, &[]).unwrap();
        let allocate = instance
            .get_typed_func::<i32, i32>(&mut store, "allocate")
            .unwrap();
        assert_eq!(allocate.call(&mut store, 16).unwrap(), 0);
        assert_eq!(allocate.call(&mut store, 8).unwrap(), 16);
        assert_eq!(allocate.call(&mut store, 4).unwrap(), 24);
    }

    // ── Scalars and builtins ─────────────────────────────────────

    #[test]
    fn integer_literal() {
        assert_eq!(run_main("42"), 42);
    }

    #[test]
    fn boolean_literals() {
        assert_eq!(run_main("true"), 1);
        assert_eq!(run_main("false"), 0);
    }

    #[test]
    fn arithmetic_builtins() {
        assert_eq!(run_main("add 2 3"), 5);
        assert_eq!(run_main("sub 10 4"), 6);
        assert_eq!(run_main("div 10 2"), 5);
        assert_eq!(run_main("eq_int 3 3"), 1);
        assert_eq!(run_main("eq_int 3 4"), 0);
    }

    #[test]
    fn if_expression() {
        assert_eq!(run_main("if true then 1 else 2"), 1);
        assert_eq!(run_main("if eq_int 1 2 then 1 else 2"), 2);
    }

    // ── Closures ─────────────────────────────────────────────────

    #[test]
    fn direct_lambda_application() {
        assert_eq!(run_main(r"(\x. add x 1) 41"), 42);
    }

    #[test]
    fn let_bound_closure() {
        assert_eq!(run_main(r"let f = \x. add x 1 in f 41"), 42);
    }

    #[test]
    fn closure_captures_environment() {
        assert_eq!(run_main(r"let y = 10 in let f = \x. add x y in f 5"), 15);
    }

    #[test]
    fn partial_application() {
        assert_eq!(run_main("let add3 = add 3 in add3 4"), 7);
    }

    #[test]
    fn partial_application_is_non_destructive() {
        // Applying the same partial closure twice must not clobber it.
        assert_eq!(run_main("let f = add 1 in add (f 10) (f 20)"), 32);
    }

    #[test]
    fn curried_user_function() {
        assert_eq!(run_main(r"let f = \x. \y. add x y in f 1 2"), 3);
    }

    #[test]
    fn polymorphic_identity() {
        assert_eq!(run_main(r"let id = \x. x in id 9"), 9);
        assert_eq!(run_main(r"let id = \x. x in if id true then id 1 else 2"), 1);
    }

    #[test]
    fn higher_order_compose() {
        assert_eq!(
            run_main(r"let compose = \f. \g. \x. f (g x) in compose (add 1) (add 2) 3"),
            6
        );
    }

    #[test]
    fn variable_shadowing() {
        assert_eq!(run_main("let x = 1 in let x = add x 1 in x"), 2);
    }

    // ── Recursion ────────────────────────────────────────────────

    #[test]
    fn fibonacci_returns_55() {
        assert_eq!(
            run_main(
                r"let rec fib = \x.
                    if eq_int x 1 then 1
                    else if eq_int x 2 then 1
                    else add (fib (sub x 1)) (fib (sub x 2))
                  in fib 10"
            ),
            55
        );
    }

    #[test]
    fn recursive_function_with_capture() {
        assert_eq!(
            run_main(
                r"let y = 3 in
                  let rec f = \x. if eq_int x 0 then y else f (sub x 1) in
                  f 5"
            ),
            3
        );
    }

    // ── ADTs and matching ────────────────────────────────────────

    const MAYBE: &str = "type Maybe<a> { Nothing(), Just(a) }\n";
    const LIST: &str = "type List<a> { Cons(a, List<a>), Nil() }\n";

    #[test]
    fn match_on_just() {
        assert_eq!(
            run_main(&format!(
                "{}match Maybe::Just(7) {{ Maybe::Just(x) -> x, Maybe::Nothing() -> 0 }}",
                MAYBE
            )),
            7
        );
    }

    #[test]
    fn match_on_nothing() {
        assert_eq!(
            run_main(&format!(
                "{}match Maybe::Nothing() {{ Maybe::Just(x) -> x, Maybe::Nothing() -> 0 }}",
                MAYBE
            )),
            0
        );
    }

    #[test]
    fn catch_all_arm() {
        assert_eq!(
            run_main(&format!(
                "{}match Maybe::Nothing() {{ Maybe::Just(x) -> 1, other -> 2 }}",
                MAYBE
            )),
            2
        );
    }

    #[test]
    fn nested_pattern_match() {
        assert_eq!(
            run_main(&format!(
                r"{}match List::Cons(4, List::Cons(5, List::Nil())) {{
                    List::Cons(x, List::Cons(y, rest)) -> add x y,
                    List::Cons(x, List::Nil()) -> x,
                    List::Nil() -> 0
                  }}",
                LIST
            )),
            9
        );
    }

    #[test]
    fn constructors_inside_closures() {
        assert_eq!(
            run_main(&format!(
                r"{}let get = \m. match m {{ Maybe::Just(x) -> x, Maybe::Nothing() -> 0 }} in
                  add (get Maybe::Just(3)) (get Maybe::Nothing())",
                MAYBE
            )),
            3
        );
    }

    #[test]
    fn list_map_sum_returns_1() {
        assert_eq!(
            run_main(&format!(
                r"{}let rec map = \f. \l. match l {{
                    List::Cons(x, rest) -> List::Cons(f x, map f rest),
                    List::Nil() -> List::Nil()
                  }} in
                  let rec sum = \l. match l {{
                    List::Cons(x, rest) -> add x (sum rest),
                    List::Nil() -> 0
                  }} in
                  sum (map (\x. sub x 1) (List::Cons(1, List::Cons(2, List::Nil()))))",
                LIST
            )),
            1
        );
    }

    #[test]
    fn list_length_via_recursion() {
        assert_eq!(
            run_main(&format!(
                r"{}let rec length = \l. match l {{
                    List::Cons(x, rest) -> add 1 (length rest),
                    List::Nil() -> 0
                  }} in
                  length (List::Cons(9, List::Cons(9, List::Cons(9, List::Nil()))))",
                LIST
            )),
            3
        );
    }
}
