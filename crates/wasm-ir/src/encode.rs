//! Binary encoding of a [`Module`].
//!
//! Assembles the type/import/function/memory/global/export/code sections
//! with `wasm-encoder`. Signatures referenced by imports or functions that
//! are missing from the module's type table are interned into the encoded
//! table; the module itself is not mutated.
//!
//! Named branch targets are resolved to relative depths against the stack
//! of scope labels that are open at the branch.

use std::borrow::Cow;

use wasm_encoder::{
    CodeSection, ConstExpr, EntityType, ExportSection, Function, FunctionSection, GlobalSection,
    GlobalType, ImportSection, Instruction, MemArg, MemorySection, MemoryType, TypeSection,
};

use crate::error::EncodeError;
use crate::instr::{BinOp, BrTarget, CmpOp, Instr, MemOp, UnOp, Val};
use crate::module::{ExportKind, FuncType, Module, ValType};

/// Encode `module` into a WebAssembly binary.
pub fn encode(module: &Module) -> Result<Vec<u8>, EncodeError> {
    for imp in &module.imports {
        if !imp.locals.is_empty() {
            return Err(EncodeError::ImportLocals {
                module: imp.module.clone(),
                name: imp.name.clone(),
                count: imp.locals.len(),
            });
        }
    }

    // Intern every referenced signature into a working copy of the table.
    let mut types = module.types.clone();
    let import_types: Vec<u32> = module
        .imports
        .iter()
        .map(|imp| type_index(&mut types, &imp.sig))
        .collect();
    let func_types: Vec<u32> = module
        .funcs
        .iter()
        .map(|func| type_index(&mut types, &func.sig))
        .collect();

    let mut type_section = TypeSection::new();
    for sig in &types {
        type_section.ty().function(
            sig.params.iter().map(|&t| val_type(t)),
            sig.results.iter().map(|&t| val_type(t)),
        );
    }

    let mut import_section = ImportSection::new();
    for (imp, &ty) in module.imports.iter().zip(&import_types) {
        import_section.import(&imp.module, &imp.name, EntityType::Function(ty));
    }

    let mut function_section = FunctionSection::new();
    for &ty in &func_types {
        function_section.function(ty);
    }

    let mut memory_section = MemorySection::new();
    for mem in &module.memories {
        memory_section.memory(MemoryType {
            minimum: mem.min,
            maximum: mem.max,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
    }

    let mut global_section = GlobalSection::new();
    for (index, global) in module.globals.iter().enumerate() {
        let init = match global.init.as_slice() {
            [Instr::Const(Val::I32(v))] => ConstExpr::i32_const(*v),
            [Instr::Const(Val::I64(v))] => ConstExpr::i64_const(*v),
            _ => return Err(EncodeError::NonConstGlobalInit { index }),
        };
        global_section.global(
            GlobalType {
                val_type: val_type(global.ty),
                mutable: global.mutable,
                shared: false,
            },
            &init,
        );
    }

    let mut export_section = ExportSection::new();
    for export in &module.exports {
        let kind = match export.kind {
            ExportKind::Func => wasm_encoder::ExportKind::Func,
            ExportKind::Global => wasm_encoder::ExportKind::Global,
            ExportKind::Memory => wasm_encoder::ExportKind::Memory,
        };
        export_section.export(&export.name, kind, export.index);
    }

    let mut code_section = CodeSection::new();
    for func in &module.funcs {
        let mut f = Function::new(compress_locals(&func.locals));
        let mut labels = Vec::new();
        encode_instrs(&mut f, &func.body, &mut labels)?;
        f.instruction(&Instruction::End);
        code_section.function(&f);
    }

    let mut out = wasm_encoder::Module::new();
    out.section(&type_section);
    out.section(&import_section);
    out.section(&function_section);
    out.section(&memory_section);
    out.section(&global_section);
    out.section(&export_section);
    out.section(&code_section);
    Ok(out.finish())
}

fn type_index(types: &mut Vec<FuncType>, sig: &FuncType) -> u32 {
    match types.iter().position(|t| t == sig) {
        Some(idx) => idx as u32,
        None => {
            types.push(sig.clone());
            (types.len() - 1) as u32
        }
    }
}

fn val_type(ty: ValType) -> wasm_encoder::ValType {
    match ty {
        ValType::I32 => wasm_encoder::ValType::I32,
        ValType::I64 => wasm_encoder::ValType::I64,
        ValType::F32 => wasm_encoder::ValType::F32,
        ValType::F64 => wasm_encoder::ValType::F64,
    }
}

/// Run-length encode a locals list the way the code section expects.
fn compress_locals(locals: &[ValType]) -> Vec<(u32, wasm_encoder::ValType)> {
    let mut out: Vec<(u32, wasm_encoder::ValType)> = Vec::new();
    for &ty in locals {
        let ty = val_type(ty);
        match out.last_mut() {
            Some((count, last)) if *last == ty => *count += 1,
            _ => out.push((1, ty)),
        }
    }
    out
}

fn branch_depth(target: &BrTarget, labels: &[Option<String>]) -> Result<u32, EncodeError> {
    match target {
        BrTarget::Index(depth) => Ok(*depth),
        BrTarget::Label(name) => labels
            .iter()
            .rev()
            .position(|l| l.as_deref() == Some(name.as_str()))
            .map(|d| d as u32)
            .ok_or_else(|| EncodeError::UndefinedLabel(name.clone())),
    }
}

fn encode_instrs(
    f: &mut Function,
    instrs: &[Instr],
    labels: &mut Vec<Option<String>>,
) -> Result<(), EncodeError> {
    for instr in instrs {
        match instr {
            Instr::Block(body) => {
                f.instruction(&Instruction::Block(wasm_encoder::BlockType::Empty));
                labels.push(body.label.clone());
                encode_instrs(f, &body.instrs, labels)?;
                labels.pop();
                f.instruction(&Instruction::End);
            }
            Instr::Loop(body) => {
                f.instruction(&Instruction::Loop(wasm_encoder::BlockType::Empty));
                labels.push(body.label.clone());
                encode_instrs(f, &body.instrs, labels)?;
                labels.pop();
                f.instruction(&Instruction::End);
            }
            Instr::If(body) => {
                f.instruction(&Instruction::If(wasm_encoder::BlockType::Empty));
                labels.push(body.label.clone());
                encode_instrs(f, &body.then_instrs, labels)?;
                if !body.else_instrs.is_empty() {
                    f.instruction(&Instruction::Else);
                    encode_instrs(f, &body.else_instrs, labels)?;
                }
                labels.pop();
                f.instruction(&Instruction::End);
            }
            Instr::Br(target) => {
                f.instruction(&Instruction::Br(branch_depth(target, labels)?));
            }
            Instr::BrIf(target) => {
                f.instruction(&Instruction::BrIf(branch_depth(target, labels)?));
            }
            Instr::BrTable { targets, default } => {
                f.instruction(&Instruction::BrTable(Cow::from(targets.clone()), *default));
            }
            Instr::Return => {
                f.instruction(&Instruction::Return);
            }
            Instr::Unreachable => {
                f.instruction(&Instruction::Unreachable);
            }
            Instr::Nop => {
                f.instruction(&Instruction::Nop);
            }
            Instr::Call(index) => {
                f.instruction(&Instruction::Call(*index));
            }
            Instr::CallIndirect {
                type_index,
                table_index,
            } => {
                f.instruction(&Instruction::CallIndirect {
                    type_index: *type_index,
                    table_index: *table_index,
                });
            }
            Instr::Drop => {
                f.instruction(&Instruction::Drop);
            }
            Instr::Select => {
                f.instruction(&Instruction::Select);
            }
            Instr::LocalGet(index) => {
                f.instruction(&Instruction::LocalGet(*index));
            }
            Instr::LocalSet(index) => {
                f.instruction(&Instruction::LocalSet(*index));
            }
            Instr::LocalTee(index) => {
                f.instruction(&Instruction::LocalTee(*index));
            }
            Instr::GlobalGet(index) => {
                f.instruction(&Instruction::GlobalGet(*index));
            }
            Instr::GlobalSet(index) => {
                f.instruction(&Instruction::GlobalSet(*index));
            }
            Instr::Load(op) => {
                f.instruction(&load_instr(op));
            }
            Instr::Store(op) => {
                f.instruction(&store_instr(op));
            }
            Instr::MemorySize => {
                f.instruction(&Instruction::MemorySize(0));
            }
            Instr::MemoryGrow => {
                f.instruction(&Instruction::MemoryGrow(0));
            }
            Instr::Const(Val::I32(v)) => {
                f.instruction(&Instruction::I32Const(*v));
            }
            Instr::Const(Val::I64(v)) => {
                f.instruction(&Instruction::I64Const(*v));
            }
            Instr::Binary(op) => {
                f.instruction(&binary_instr(*op));
            }
            Instr::Compare(op) => {
                f.instruction(&compare_instr(*op));
            }
            Instr::Unary(op) => {
                f.instruction(&unary_instr(*op));
            }
        }
    }
    Ok(())
}

fn memarg(offset: u64, align: u32) -> MemArg {
    MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

fn load_instr(op: &MemOp) -> Instruction<'static> {
    match op.ty {
        ValType::I32 => Instruction::I32Load(memarg(op.offset as u64, 2)),
        ValType::I64 => Instruction::I64Load(memarg(op.offset as u64, 3)),
        ValType::F32 => Instruction::F32Load(memarg(op.offset as u64, 2)),
        ValType::F64 => Instruction::F64Load(memarg(op.offset as u64, 3)),
    }
}

fn store_instr(op: &MemOp) -> Instruction<'static> {
    match op.ty {
        ValType::I32 => Instruction::I32Store(memarg(op.offset as u64, 2)),
        ValType::I64 => Instruction::I64Store(memarg(op.offset as u64, 3)),
        ValType::F32 => Instruction::F32Store(memarg(op.offset as u64, 2)),
        ValType::F64 => Instruction::F64Store(memarg(op.offset as u64, 3)),
    }
}

fn binary_instr(op: BinOp) -> Instruction<'static> {
    match op {
        BinOp::I32Add => Instruction::I32Add,
        BinOp::I32Sub => Instruction::I32Sub,
        BinOp::I32Mul => Instruction::I32Mul,
        BinOp::I32And => Instruction::I32And,
        BinOp::I32Or => Instruction::I32Or,
        BinOp::I32Xor => Instruction::I32Xor,
        BinOp::I64Add => Instruction::I64Add,
        BinOp::I64Sub => Instruction::I64Sub,
        BinOp::I64Mul => Instruction::I64Mul,
        BinOp::I64And => Instruction::I64And,
        BinOp::I64Or => Instruction::I64Or,
        BinOp::I64Xor => Instruction::I64Xor,
    }
}

fn compare_instr(op: CmpOp) -> Instruction<'static> {
    match op {
        CmpOp::I32Eq => Instruction::I32Eq,
        CmpOp::I32Ne => Instruction::I32Ne,
        CmpOp::I32LtS => Instruction::I32LtS,
        CmpOp::I32LtU => Instruction::I32LtU,
        CmpOp::I32GtS => Instruction::I32GtS,
        CmpOp::I32GtU => Instruction::I32GtU,
        CmpOp::I32GeU => Instruction::I32GeU,
        CmpOp::I64Eq => Instruction::I64Eq,
        CmpOp::I64Ne => Instruction::I64Ne,
        CmpOp::I64LtU => Instruction::I64LtU,
        CmpOp::I64LeU => Instruction::I64LeU,
        CmpOp::I64GtU => Instruction::I64GtU,
        CmpOp::I64GeU => Instruction::I64GeU,
    }
}

fn unary_instr(op: UnOp) -> Instruction<'static> {
    match op {
        UnOp::I32Eqz => Instruction::I32Eqz,
        UnOp::I64Eqz => Instruction::I64Eqz,
        UnOp::I32Clz => Instruction::I32Clz,
        UnOp::I64Clz => Instruction::I64Clz,
        UnOp::I32Popcnt => Instruction::I32Popcnt,
        UnOp::I64Popcnt => Instruction::I64Popcnt,
    }
}
