use wasm_encoder::{BlockType, Function, Instruction, MemArg, ValType};

/// Runtime layout constants. All values are 32-bit words; heap objects
/// carry two 16-bit header fields.
///
/// Closure: `| arity: i16 | applied: i16 | code_ptr: i32 | arg_0 … arg_{arity-1} |`
/// Pack:    `| tag: i16 | arity: i16 | field_0 … field_{arity-1} |`
pub const CLOSURE_HEADER: u32 = 8;
pub const PACK_HEADER: u32 = 4;
pub const WORD: u32 = 4;

/// Global index of the bump-allocator watermark.
pub const GLOBAL_WATERMARK: u32 = 0;

/// Initial linear memory size in 64KiB pages, no maximum.
pub const INITIAL_PAGES: u64 = 65535;

pub(crate) fn memarg(offset: u64) -> MemArg {
    MemArg {
        offset,
        align: 0,
        memory_index: 0,
    }
}

/// Emit `allocate(bytes: i32) -> i32`.
///
/// Returns the current watermark and advances it. Monotonic; nothing is
/// ever freed.
pub(crate) fn emit_allocate(func: &mut Function) {
    // local 0 = bytes, local 1 = ptr
    func.instruction(&Instruction::GlobalGet(GLOBAL_WATERMARK));
    func.instruction(&Instruction::LocalTee(1));
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::GlobalSet(GLOBAL_WATERMARK));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::End);
}

/// Emit `make_closure(arity: i32, code_ptr: i32) -> i32`.
///
/// Allocates `8 + 4*arity` bytes, writes the arity and code pointer and
/// leaves `applied` at zero.
pub(crate) fn emit_make_closure(func: &mut Function, allocate: u32) {
    // local 0 = arity, local 1 = code_ptr, local 2 = ptr
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Mul);
    func.instruction(&Instruction::I32Const(CLOSURE_HEADER as i32));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::Call(allocate));
    func.instruction(&Instruction::LocalSet(2));

    // arity at +0, applied = 0 at +2, code_ptr at +4
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Store16(memarg(0)));
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::I32Const(0));
    func.instruction(&Instruction::I32Store16(memarg(2)));
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Store(memarg(4)));

    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::End);
}

/// Emit `copy_closure(ptr: i32) -> i32`.
///
/// Clones a closure word by word so that application never mutates a
/// shared closure.
pub(crate) fn emit_copy_closure(func: &mut Function, allocate: u32) {
    // local 0 = src, local 1 = size, local 2 = dst, local 3 = i
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Load16U(memarg(0)));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Mul);
    func.instruction(&Instruction::I32Const(CLOSURE_HEADER as i32));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalTee(1));
    func.instruction(&Instruction::Call(allocate));
    func.instruction(&Instruction::LocalSet(2));

    // for (i = 0; i < size; i += 4) dst[i] = src[i]
    func.instruction(&Instruction::I32Const(0));
    func.instruction(&Instruction::LocalSet(3));
    func.instruction(&Instruction::Block(BlockType::Empty));
    func.instruction(&Instruction::Loop(BlockType::Empty));

    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32GeU);
    func.instruction(&Instruction::BrIf(1));

    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::I32Load(memarg(0)));
    func.instruction(&Instruction::I32Store(memarg(0)));

    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalSet(3));
    func.instruction(&Instruction::Br(0));
    func.instruction(&Instruction::End); // loop
    func.instruction(&Instruction::End); // block

    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::End);
}

/// Emit `apply_closure(closure: i32, arg: i32) -> i32`.
///
/// Copies the closure and writes the argument into the next slot. When
/// the copy is still unsaturated the new closure is returned; otherwise
/// the code pointer is invoked indirectly with a pointer to the argument
/// vector.
pub(crate) fn emit_apply_closure(func: &mut Function, copy_closure: u32, apply_type: u32) {
    // local 0 = closure, local 1 = arg, local 2 = copy, local 3 = applied
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::Call(copy_closure));
    func.instruction(&Instruction::LocalSet(2));

    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::I32Load16U(memarg(2)));
    func.instruction(&Instruction::LocalSet(3));

    // copy[8 + 4*applied] = arg
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Mul);
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Store(memarg(CLOSURE_HEADER as u64)));

    // applied + 1 < arity ?
    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::I32Const(1));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::I32Load16U(memarg(0)));
    func.instruction(&Instruction::I32LtS);
    func.instruction(&Instruction::If(BlockType::Result(ValType::I32)));

    // still unsaturated: bump applied, hand back the copy
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(3));
    func.instruction(&Instruction::I32Const(1));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::I32Store16(memarg(2)));
    func.instruction(&Instruction::LocalGet(2));

    func.instruction(&Instruction::Else);

    // saturated: call the code pointer with the argument vector
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::I32Const(CLOSURE_HEADER as i32));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::I32Load(memarg(4)));
    func.instruction(&Instruction::CallIndirect {
        type_index: apply_type,
        table_index: 0,
    });

    func.instruction(&Instruction::End); // if
    func.instruction(&Instruction::End);
}

/// Emit `make_pack(tag: i32, arity: i32) -> i32`.
pub(crate) fn emit_make_pack(func: &mut Function, allocate: u32) {
    // local 0 = tag, local 1 = arity, local 2 = ptr
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Mul);
    func.instruction(&Instruction::I32Const(PACK_HEADER as i32));
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::Call(allocate));
    func.instruction(&Instruction::LocalSet(2));

    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Store16(memarg(0)));
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Store16(memarg(2)));

    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::End);
}

/// Emit `write_pack_field(pack: i32, offset: i32, field: i32) -> i32`.
///
/// Returns the pack so field writes chain on the operand stack.
pub(crate) fn emit_write_pack_field(func: &mut Function) {
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Mul);
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::LocalGet(2));
    func.instruction(&Instruction::I32Store(memarg(PACK_HEADER as u64)));
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::End);
}

/// Emit `read_pack_field(pack: i32, offset: i32) -> i32`.
pub(crate) fn emit_read_pack_field(func: &mut Function) {
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&Instruction::I32Const(WORD as i32));
    func.instruction(&Instruction::I32Mul);
    func.instruction(&Instruction::I32Add);
    func.instruction(&Instruction::I32Load(memarg(PACK_HEADER as u64)));
    func.instruction(&Instruction::End);
}

/// Emit `read_pack_tag(pack: i32) -> i32`.
pub(crate) fn emit_read_pack_tag(func: &mut Function) {
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::I32Load16U(memarg(0)));
    func.instruction(&Instruction::End);
}

/// Emit a two-argument integer builtin body (`add$inner` and friends).
pub(crate) fn emit_binop(func: &mut Function, op: Instruction) {
    func.instruction(&Instruction::LocalGet(0));
    func.instruction(&Instruction::LocalGet(1));
    func.instruction(&op);
    func.instruction(&Instruction::End);
}

/// Emit the table-callable wrapper `name(arg_ptr: i32) -> i32`: load each
/// argument slot from the vector and call the direct-stack form.
pub(crate) fn emit_arg_wrapper(func: &mut Function, inner: u32, arity: u32) {
    for i in 0..arity {
        func.instruction(&Instruction::LocalGet(0));
        func.instruction(&Instruction::I32Load(memarg((i * WORD) as u64)));
    }
    func.instruction(&Instruction::Call(inner));
    func.instruction(&Instruction::End);
}
