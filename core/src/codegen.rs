//! Backend: IR functions to x86-64 machine code.
//!
//! Every [IrFunction] runs through a [FuncEmitter] whose state machine
//! moves strictly forward: prologue, body, landing pads, epilogue
//! bookkeeping, relocation queue, finalized bytes. Temps live in frame
//! slots; a one-entry look-back cache remembers the register that last
//! held a temp so immediately reused values skip the reload. Frames are
//! rounded to 16 bytes so RSP is 16-aligned at every `call`, and argument
//! passing follows the System-V or Windows x64 convention depending on
//! the target.

use crate::{
    intern::{StringHandle, StringInterner},
    ir::{
        BinOp, CallTarget, Instr, IrFunction, IrType, Operand, TempVar, UnOp,
    },
    mangle::{runtime_symbol, MangleScheme, RuntimeFn},
    types::TypeIndex,
};
use log::trace;
use std::collections::HashMap;

/// Pre-resolved type-info data for every type the IR references in
/// `throw`/`catch`/`dynamic_cast` position. The driver builds this once
/// from the registries so the emitter never needs them.
#[derive(Clone, Debug, Default)]
pub struct TypeinfoTable {
    pub symbols: HashMap<TypeIndex, String>,
    pub sizes: HashMap<TypeIndex, u64>,
}

impl TypeinfoTable {
    fn symbol(&self, index: TypeIndex) -> &str {
        self.symbols
            .get(&index)
            .map(String::as_str)
            .unwrap_or_else(|| panic!("unresolved type-info for {:?}", index))
    }
}

/// Relocation queued against the function's own byte buffer; the driver
/// rebases offsets when the function is placed in `.text`.
#[derive(Clone, Debug, PartialEq)]
pub struct Reloc {
    pub offset: u64,
    pub symbol: String,
    pub kind: RelocKind,
    pub addend: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelocKind {
    /// Absolute 8-byte address (`R_X86_64_64` / `IMAGE_REL_AMD64_ADDR64`).
    Abs64,
    /// 4-byte PC-relative (`R_X86_64_PC32` / `IMAGE_REL_AMD64_REL32`).
    Pc32,
    /// PC-relative through the PLT; never used for type-info references.
    Plt32,
    /// 4-byte image-relative address (`IMAGE_REL_AMD64_ADDR32NB`), COFF
    /// unwind tables only.
    Rva32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Abi {
    SysV,
    Win64,
}

impl Abi {
    fn int_arg_regs(self) -> &'static [Reg] {
        match self {
            Abi::SysV => &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9],
            Abi::Win64 => &[Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9],
        }
    }

    fn max_float_regs(self) -> usize {
        match self {
            Abi::SysV => 8,
            Abi::Win64 => 4,
        }
    }

    /// Bytes reserved below the stack arguments (Win64 shadow space).
    fn shadow_space(self) -> u64 {
        match self {
            Abi::SysV => 0,
            Abi::Win64 => 32,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    fn low3(self) -> u8 {
        (self as u8) & 7
    }

    fn ext(self) -> bool {
        (self as u8) >= 8
    }
}

/// Per-function emission progress; transitions are strictly forward.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EmitState {
    PrologueNotEmitted,
    Emitting,
    EpilogueEmitted,
    RelocationsPending,
    Finalized,
}

/// One catch clause as the exception-metadata builder needs it: the
/// mangled type-info symbol (`None` for `catch (...)`).
#[derive(Clone, Debug)]
pub struct EhCatch {
    pub type_symbol: Option<String>,
    /// Offset of the handler's entry (its `CatchBegin`).
    pub handler_offset: u64,
}

/// One try region resolved to code offsets.
#[derive(Clone, Debug)]
pub struct EhRegion {
    pub start: u64,
    pub end: u64,
    pub landing_pad: u64,
    pub catches: Vec<EhCatch>,
}

/// Everything the unwind-metadata writers need about one emitted
/// function.
#[derive(Clone, Debug, Default)]
pub struct EhFunctionInfo {
    pub regions: Vec<EhRegion>,
    pub code_len: u64,
    pub frame_size: u32,
    pub prologue_len: u8,
}

/// The finished product of one function's emission.
pub struct EmittedFunction {
    pub mangled: String,
    pub bytes: Vec<u8>,
    pub relocs: Vec<Reloc>,
    pub eh: EhFunctionInfo,
}

pub struct FuncEmitter<'a> {
    f: &'a IrFunction,
    interner: &'a StringInterner,
    typeinfo: &'a TypeinfoTable,
    abi: Abi,
    scheme: MangleScheme,
    state: EmitState,
    bytes: Vec<u8>,
    relocs: Vec<Reloc>,
    frame: HashMap<StringHandle, i32>,
    temp_offsets: HashMap<u32, i32>,
    frame_size: u64,
    outgoing_area: u64,
    /// Frame slots for the landing pad's exception pointer and selector.
    exc_slot: i32,
    labels: HashMap<StringHandle, u64>,
    fixups: Vec<(u64, StringHandle)>,
    /// Look-back window: the register that currently mirrors a temp.
    reg_cache: Option<(TempVar, Reg)>,
    prologue_len: u8,
    try_starts: HashMap<u32, u64>,
    try_ends: HashMap<u32, u64>,
    catch_offsets: HashMap<(u32, usize), u64>,
    catch_counter: HashMap<u32, usize>,
}

impl<'a> FuncEmitter<'a> {
    pub fn new(
        f: &'a IrFunction,
        interner: &'a StringInterner,
        typeinfo: &'a TypeinfoTable,
        abi: Abi,
        scheme: MangleScheme,
    ) -> Self {
        Self {
            f,
            interner,
            typeinfo,
            abi,
            scheme,
            state: EmitState::PrologueNotEmitted,
            bytes: Vec::new(),
            relocs: Vec::new(),
            frame: HashMap::new(),
            temp_offsets: HashMap::new(),
            frame_size: 0,
            outgoing_area: 0,
            exc_slot: 0,
            labels: HashMap::new(),
            fixups: Vec::new(),
            reg_cache: None,
            prologue_len: 0,
            try_starts: HashMap::new(),
            try_ends: HashMap::new(),
            catch_offsets: HashMap::new(),
            catch_counter: HashMap::new(),
        }
    }

    fn advance_state(&mut self, next: EmitState) {
        assert!(
            self.state < next,
            "emitter state must move forward: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    pub fn emit(mut self) -> EmittedFunction {
        self.layout_frame();
        self.emit_prologue();
        self.advance_state(EmitState::Emitting);
        for instr in &self.f.instrs {
            self.emit_instr(instr);
        }
        // Defensive trailing return for bodies that end in a branch
        if !matches!(self.f.instrs.last(), Some(Instr::Return { .. })) {
            self.emit_epilogue_and_ret();
        }
        let landing_pads = self.emit_landing_pads();
        self.advance_state(EmitState::EpilogueEmitted);
        self.advance_state(EmitState::RelocationsPending);
        self.patch_fixups();
        self.advance_state(EmitState::Finalized);
        trace!(
            "emitted {}: {} bytes, {} relocs",
            self.f.mangled,
            self.bytes.len(),
            self.relocs.len()
        );
        let eh = self.build_eh_info(landing_pads);
        EmittedFunction {
            mangled: self.f.mangled.clone(),
            bytes: self.bytes,
            relocs: self.relocs,
            eh,
        }
    }

    // ===== Frame layout =====

    fn layout_frame(&mut self) {
        let mut offset: i64 = 0;
        for local in &self.f.locals {
            let size = local.size.max(1);
            let align = local.align.clamp(1, 16) as i64;
            offset += size as i64;
            offset = (offset + align - 1) / align * align;
            self.frame.insert(local.name, -(offset as i32));
        }
        for temp in 0..self.f.temp_count {
            offset += 8;
            self.temp_offsets.insert(temp, -(offset as i32));
        }
        let needs_eh_slots = self.f.has_eh()
            || self
                .f
                .instrs
                .iter()
                .any(|i| matches!(i, Instr::Throw { .. }));
        if needs_eh_slots {
            // Exception pointer plus a value scratch that survives calls
            offset += 16;
            self.exc_slot = -(offset as i32);
        }
        // Outgoing stack arguments: the widest call's overflow area
        let mut max_stack_args = 0usize;
        for instr in &self.f.instrs {
            if let Instr::Call { args, .. } = instr {
                let int_regs = self.abi.int_arg_regs().len();
                let stack = match self.abi {
                    Abi::SysV => {
                        let ints = args.iter().filter(|(_, t)| !t.is_float()).count();
                        let floats = args.len() - ints;
                        ints.saturating_sub(int_regs)
                            + floats.saturating_sub(self.abi.max_float_regs())
                    }
                    Abi::Win64 => args.len().saturating_sub(int_regs),
                };
                max_stack_args = max_stack_args.max(stack);
            }
        }
        self.outgoing_area =
            self.abi.shadow_space() + (max_stack_args as u64) * 8;
        let total = offset as u64 + self.outgoing_area;
        // Round so RSP stays 16-aligned immediately before each call
        self.frame_size = (total + 15) / 16 * 16;
    }

    fn local_offset(&self, name: StringHandle) -> i32 {
        *self
            .frame
            .get(&name)
            .unwrap_or_else(|| panic!("unknown frame slot `{}`", self.interner.view(name)))
    }

    fn temp_offset(&self, temp: TempVar) -> i32 {
        self.temp_offsets[&temp.0]
    }

    // ===== Byte-level encoding =====

    fn push_byte(&mut self, b: u8) {
        self.bytes.push(b);
    }

    fn push_bytes(&mut self, bs: &[u8]) {
        self.bytes.extend_from_slice(bs);
    }

    fn push_u32(&mut self, v: u32) {
        self.push_bytes(&v.to_le_bytes());
    }

    fn rex(&mut self, w: bool, r: Reg, b: Reg) {
        self.push_byte(
            0x40 | ((w as u8) << 3)
                | ((r.ext() as u8) << 2)
                | (b.ext() as u8),
        );
    }

    fn modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.push_byte((mode << 6) | (reg << 3) | rm);
    }

    /// `[rbp + disp32]` addressing for `reg`.
    fn frame_operand(&mut self, reg: Reg, disp: i32) {
        self.modrm(0b10, reg.low3(), Reg::Rbp.low3());
        self.push_bytes(&disp.to_le_bytes());
    }

    /// `[base + disp32]` addressing (base must not be RSP).
    fn mem_operand(&mut self, reg: Reg, base: Reg, disp: i32) {
        debug_assert!(base != Reg::Rsp, "RSP-based addressing needs a SIB byte");
        if disp == 0 && base.low3() != Reg::Rbp.low3() {
            self.modrm(0b00, reg.low3(), base.low3());
        } else {
            self.modrm(0b10, reg.low3(), base.low3());
            self.push_bytes(&disp.to_le_bytes());
        }
    }

    fn mov_ri(&mut self, dst: Reg, value: i64) {
        if value == 0 {
            // xor dst32, dst32
            self.rex(false, dst, dst);
            self.push_byte(0x31);
            self.modrm(0b11, dst.low3(), dst.low3());
        } else if let Ok(v32) = i32::try_from(value) {
            self.rex(true, Reg::Rax, dst);
            self.push_byte(0xC7);
            self.modrm(0b11, 0, dst.low3());
            self.push_bytes(&v32.to_le_bytes());
        } else {
            // movabs
            self.rex(true, Reg::Rax, dst);
            self.push_byte(0xB8 + dst.low3());
            self.push_bytes(&value.to_le_bytes());
        }
    }

    fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.rex(true, src, dst);
        self.push_byte(0x89);
        self.modrm(0b11, src.low3(), dst.low3());
    }

    fn mov_frame_to_reg(&mut self, dst: Reg, disp: i32) {
        self.rex(true, dst, Reg::Rbp);
        self.push_byte(0x8B);
        self.frame_operand(dst, disp);
    }

    fn mov_reg_to_frame(&mut self, disp: i32, src: Reg) {
        self.rex(true, src, Reg::Rbp);
        self.push_byte(0x89);
        self.frame_operand(src, disp);
    }

    fn lea_frame(&mut self, dst: Reg, disp: i32) {
        self.rex(true, dst, Reg::Rbp);
        self.push_byte(0x8D);
        self.frame_operand(dst, disp);
    }

    /// `lea dst, [rip + symbol]` with a PC-relative relocation.
    fn lea_rip(&mut self, dst: Reg, symbol: &str, kind: RelocKind) {
        self.rex(true, dst, Reg::Rax);
        self.push_byte(0x8D);
        self.modrm(0b00, dst.low3(), 0b101);
        let offset = self.bytes.len() as u64;
        self.relocs.push(Reloc {
            offset,
            symbol: symbol.to_string(),
            kind,
            addend: -4,
        });
        self.push_u32(0);
    }

    /// Load from `[base + disp]` with the IR type's width and signedness,
    /// extending to 64 bits.
    fn load_sized(&mut self, dst: Reg, base: Reg, disp: i32, ty: IrType) {
        match ty {
            IrType::I8 => {
                self.rex(true, dst, base);
                self.push_bytes(&[0x0F, 0xBE]);
                self.mem_operand(dst, base, disp);
            }
            IrType::U8 => {
                self.rex(true, dst, base);
                self.push_bytes(&[0x0F, 0xB6]);
                self.mem_operand(dst, base, disp);
            }
            IrType::I16 => {
                self.rex(true, dst, base);
                self.push_bytes(&[0x0F, 0xBF]);
                self.mem_operand(dst, base, disp);
            }
            IrType::U16 => {
                self.rex(true, dst, base);
                self.push_bytes(&[0x0F, 0xB7]);
                self.mem_operand(dst, base, disp);
            }
            IrType::I32 => {
                // movsxd
                self.rex(true, dst, base);
                self.push_byte(0x63);
                self.mem_operand(dst, base, disp);
            }
            IrType::U32 | IrType::F32 => {
                // 32-bit load zero-extends
                self.rex(false, dst, base);
                self.push_byte(0x8B);
                self.mem_operand(dst, base, disp);
            }
            _ => {
                self.rex(true, dst, base);
                self.push_byte(0x8B);
                self.mem_operand(dst, base, disp);
            }
        }
    }

    fn store_sized(&mut self, base: Reg, disp: i32, src: Reg, ty: IrType) {
        match ty.size() {
            1 => {
                self.rex(true, src, base);
                self.push_byte(0x88);
                self.mem_operand(src, base, disp);
            }
            2 => {
                self.push_byte(0x66);
                self.rex(false, src, base);
                self.push_byte(0x89);
                self.mem_operand(src, base, disp);
            }
            4 => {
                self.rex(false, src, base);
                self.push_byte(0x89);
                self.mem_operand(src, base, disp);
            }
            _ => {
                self.rex(true, src, base);
                self.push_byte(0x89);
                self.mem_operand(src, base, disp);
            }
        }
    }

    fn alu_rr(&mut self, opcode: u8, dst: Reg, src: Reg) {
        self.rex(true, src, dst);
        self.push_byte(opcode);
        self.modrm(0b11, src.low3(), dst.low3());
    }

    fn imul_rr(&mut self, dst: Reg, src: Reg) {
        self.rex(true, dst, src);
        self.push_bytes(&[0x0F, 0xAF]);
        self.modrm(0b11, dst.low3(), src.low3());
    }

    fn cmp_rr(&mut self, a: Reg, b: Reg) {
        self.rex(true, b, a);
        self.push_byte(0x39);
        self.modrm(0b11, b.low3(), a.low3());
    }

    fn test_rr(&mut self, a: Reg, b: Reg) {
        self.rex(true, b, a);
        self.push_byte(0x85);
        self.modrm(0b11, b.low3(), a.low3());
    }

    /// `setcc al; movzx rax, al`
    fn setcc_rax(&mut self, cc: u8) {
        self.push_bytes(&[0x0F, 0x90 | cc, 0xC0]);
        self.push_bytes(&[0x48, 0x0F, 0xB6, 0xC0]);
    }

    fn jmp_label(&mut self, label: StringHandle) {
        self.push_byte(0xE9);
        let at = self.bytes.len() as u64;
        self.fixups.push((at, label));
        self.push_u32(0);
    }

    fn jcc_label(&mut self, cc: u8, label: StringHandle) {
        self.push_bytes(&[0x0F, 0x80 | cc]);
        let at = self.bytes.len() as u64;
        self.fixups.push((at, label));
        self.push_u32(0);
    }

    fn call_symbol(&mut self, symbol: &str) {
        self.push_byte(0xE8);
        let offset = self.bytes.len() as u64;
        let kind = match self.scheme {
            MangleScheme::Itanium => RelocKind::Plt32,
            MangleScheme::Msvc => RelocKind::Pc32,
        };
        self.relocs.push(Reloc {
            offset,
            symbol: symbol.to_string(),
            kind,
            addend: -4,
        });
        self.push_u32(0);
        self.reg_cache = None;
    }

    fn call_reg(&mut self, reg: Reg) {
        if reg.ext() {
            self.push_byte(0x41);
        }
        self.push_byte(0xFF);
        self.modrm(0b11, 2, reg.low3());
        self.reg_cache = None;
    }

    // ===== Operand plumbing =====

    /// Load an operand into `reg`, consulting the look-back cache first.
    fn load_operand(&mut self, op: Operand, reg: Reg) {
        // The look-back window only survives until the first operand load
        // after it was set; any later load may have clobbered the cached
        // register, so the entry is consumed here either way.
        let cached = self.reg_cache.take();
        match op {
            Operand::Const(value) => self.mov_ri(reg, value),
            Operand::FloatConst(value) => {
                self.mov_ri(reg, value.to_bits() as i64)
            }
            Operand::Temp(temp) => {
                if let Some((cached_temp, cached_reg)) = cached {
                    if cached_temp == temp {
                        if cached_reg != reg {
                            self.mov_rr(reg, cached_reg);
                        }
                        return;
                    }
                }
                let disp = self.temp_offset(temp);
                self.mov_frame_to_reg(reg, disp);
            }
        }
    }

    /// Spill a result register into its temp's home slot and remember the
    /// assignment for immediate reuse.
    fn store_temp(&mut self, temp: TempVar, reg: Reg) {
        let disp = self.temp_offset(temp);
        self.mov_reg_to_frame(disp, reg);
        self.reg_cache = Some((temp, reg));
    }

    // ===== SSE helpers =====

    fn movq_xmm_from(&mut self, xmm: u8, reg: Reg) {
        self.push_byte(0x66);
        self.rex(true, Reg::Rax, reg);
        self.push_bytes(&[0x0F, 0x6E]);
        self.modrm(0b11, xmm, reg.low3());
    }

    fn movq_to_reg(&mut self, reg: Reg, xmm: u8) {
        self.push_byte(0x66);
        self.rex(true, Reg::Rax, reg);
        self.push_bytes(&[0x0F, 0x7E]);
        self.modrm(0b11, xmm, reg.low3());
    }

    fn sse_op(&mut self, prefix: u8, opcode: u8, dst_xmm: u8, src_xmm: u8) {
        self.push_byte(prefix);
        self.push_bytes(&[0x0F, opcode]);
        self.modrm(0b11, dst_xmm, src_xmm);
    }

    // ===== Prologue / epilogue =====

    fn emit_prologue(&mut self) {
        assert_eq!(self.state, EmitState::PrologueNotEmitted);
        self.push_byte(0x55); // push rbp
        self.push_bytes(&[0x48, 0x89, 0xE5]); // mov rbp, rsp
        if self.frame_size > 0 {
            self.push_bytes(&[0x48, 0x81, 0xEC]); // sub rsp, imm32
            self.push_u32(self.frame_size as u32);
        }
        self.prologue_len = self.bytes.len() as u8;
        // Home the register arguments into their slots
        let int_regs = self.abi.int_arg_regs();
        let mut int_used = 0usize;
        let mut float_used = 0usize;
        let params: Vec<_> = self.f.params.clone();
        for (position, (slot, ty)) in params.iter().enumerate() {
            let disp = self.local_offset(*slot);
            if ty.is_float() {
                let xmm = match self.abi {
                    Abi::SysV => float_used,
                    Abi::Win64 => position,
                };
                if xmm < self.abi.max_float_regs() {
                    self.movq_to_reg(Reg::Rax, xmm as u8);
                    self.mov_reg_to_frame(disp, Reg::Rax);
                }
                float_used += 1;
            } else {
                let reg_index = match self.abi {
                    Abi::SysV => int_used,
                    Abi::Win64 => position,
                };
                if reg_index < int_regs.len() {
                    let reg = int_regs[reg_index];
                    self.mov_reg_to_frame(disp, reg);
                } else {
                    // Stack argument: return address and saved RBP sit
                    // below, and Win64 callers leave shadow space too.
                    let stack_index = reg_index - int_regs.len();
                    let src = 16
                        + self.abi.shadow_space() as i32
                        + (stack_index as i32) * 8;
                    self.mov_frame_to_reg(Reg::Rax, src);
                    self.mov_reg_to_frame(disp, Reg::Rax);
                }
                int_used += 1;
            }
        }
    }

    fn emit_epilogue_and_ret(&mut self) {
        self.push_bytes(&[0x48, 0x89, 0xEC]); // mov rsp, rbp
        self.push_byte(0x5D); // pop rbp
        self.push_byte(0xC3); // ret
        self.reg_cache = None;
    }

    // ===== Instruction lowering =====

    fn emit_instr(&mut self, instr: &Instr) {
        match instr {
            Instr::Copy { dst, src } => {
                self.load_operand(*src, Reg::Rax);
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::Convert { dst, src, from, to } => {
                self.emit_convert(*dst, *src, *from, *to);
            }
            Instr::LoadLocal { dst, var, ty } => {
                let disp = self.local_offset(*var);
                self.load_sized(Reg::Rax, Reg::Rbp, disp, *ty);
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::StoreLocal { var, src, ty } => {
                let disp = self.local_offset(*var);
                self.load_operand(*src, Reg::Rax);
                self.store_sized(Reg::Rbp, disp, Reg::Rax, *ty);
            }
            Instr::AddrOfLocal { dst, var } => {
                let disp = self.local_offset(*var);
                self.lea_frame(Reg::Rax, disp);
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::AddrOfSymbol { dst, symbol } => {
                let name = self.interner.view(*symbol).to_string();
                self.lea_rip(Reg::Rax, &name, RelocKind::Pc32);
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::AddrOfString { dst, index } => {
                let symbol = string_symbol(*index);
                self.lea_rip(Reg::Rax, &symbol, RelocKind::Pc32);
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::Load { dst, addr, ty } => {
                self.load_operand(*addr, Reg::R10);
                self.load_sized(Reg::Rax, Reg::R10, 0, *ty);
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::Store { addr, src, ty } => {
                self.load_operand(*addr, Reg::R10);
                self.load_operand(*src, Reg::Rax);
                self.store_sized(Reg::R10, 0, Reg::Rax, *ty);
            }
            Instr::ComputeAddress {
                dst,
                base,
                index,
                scale,
                offset,
            } => {
                self.emit_compute_address(*dst, *base, *index, *scale, *offset);
            }
            Instr::MemCopy {
                dst_addr,
                src_addr,
                size,
            } => {
                // rep movsb
                self.load_operand(*dst_addr, Reg::Rdi);
                self.load_operand(*src_addr, Reg::Rsi);
                self.mov_ri(Reg::Rcx, *size as i64);
                self.push_bytes(&[0xF3, 0xA4]);
                self.reg_cache = None;
            }
            Instr::Binary {
                op,
                dst,
                lhs,
                rhs,
                ty,
            } => self.emit_binary(*op, *dst, *lhs, *rhs, *ty),
            Instr::Unary { op, dst, src, ty } => {
                self.emit_unary(*op, *dst, *src, *ty)
            }
            Instr::Label { name } => {
                self.labels.insert(*name, self.bytes.len() as u64);
                self.reg_cache = None;
            }
            Instr::Branch { target } => {
                self.jmp_label(*target);
                self.reg_cache = None;
            }
            Instr::CondBranch {
                cond,
                if_true,
                if_false,
            } => {
                self.load_operand(*cond, Reg::Rax);
                self.test_rr(Reg::Rax, Reg::Rax);
                self.jcc_label(0x05, *if_true); // jnz
                self.jmp_label(*if_false);
                self.reg_cache = None;
            }
            Instr::Return { value, ty } => {
                if let Some(value) = value {
                    if ty.is_float() {
                        self.load_operand(*value, Reg::Rax);
                        self.movq_xmm_from(0, Reg::Rax);
                    } else {
                        self.load_operand(*value, Reg::Rax);
                    }
                }
                self.emit_epilogue_and_ret();
            }
            Instr::Call {
                dst,
                target,
                args,
                ret,
                variadic,
            } => self.emit_call(dst.as_ref(), target, args, *ret, *variadic),
            Instr::NewObject {
                dst,
                elem_size,
                count,
            } => {
                let arg_reg = self.abi.int_arg_regs()[0];
                match count {
                    Some(count) => {
                        self.load_operand(*count, Reg::Rax);
                        self.mov_ri(Reg::R10, *elem_size as i64);
                        self.imul_rr(Reg::Rax, Reg::R10);
                        self.mov_rr(arg_reg, Reg::Rax);
                        let symbol =
                            runtime_symbol(RuntimeFn::NewArray, self.scheme);
                        self.call_symbol(symbol);
                    }
                    None => {
                        self.mov_ri(arg_reg, *elem_size as i64);
                        let symbol = runtime_symbol(RuntimeFn::New, self.scheme);
                        self.call_symbol(symbol);
                    }
                }
                self.store_temp(*dst, Reg::Rax);
            }
            Instr::DeleteObject { ptr, array } => {
                let arg_reg = self.abi.int_arg_regs()[0];
                self.load_operand(*ptr, arg_reg);
                let symbol = runtime_symbol(
                    if *array {
                        RuntimeFn::DeleteArray
                    } else {
                        RuntimeFn::Delete
                    },
                    self.scheme,
                );
                self.call_symbol(symbol);
            }
            Instr::Throw { value, ty } => {
                let symbol = self.typeinfo.symbol(*ty).to_string();
                let size = self.typeinfo.sizes.get(ty).copied().unwrap_or(8);
                let value_ty = match size {
                    1 => IrType::U8,
                    2 => IrType::U16,
                    4 => IrType::I32,
                    _ => IrType::I64,
                };
                self.emit_throw(*value, value_ty, size, &symbol);
            }
            Instr::DynamicCast {
                dst,
                src,
                from,
                to,
                ref_cast,
            } => {
                let src_ti = self.typeinfo.symbol(*from).to_string();
                let dst_ti = self.typeinfo.symbol(*to).to_string();
                self.emit_dynamic_cast(*dst, *src, &src_ti, &dst_ti, *ref_cast);
            }
            Instr::TryBegin { region } => {
                self.try_starts.insert(*region, self.bytes.len() as u64);
            }
            Instr::TryEnd { region } => {
                self.try_ends.insert(*region, self.bytes.len() as u64);
            }
            Instr::CatchBegin { region, dst } => {
                let counter = self.catch_counter.entry(*region).or_insert(0);
                let index = *counter;
                *counter += 1;
                self.catch_offsets
                    .insert((*region, index), self.bytes.len() as u64);
                // Exception pointer was parked by the landing pad
                let arg_reg = self.abi.int_arg_regs()[0];
                self.mov_frame_to_reg(arg_reg, self.exc_slot);
                self.call_symbol(runtime_symbol(
                    RuntimeFn::BeginCatch,
                    self.scheme,
                ));
                if let Some(dst) = dst {
                    self.store_temp(*dst, Reg::Rax);
                }
            }
            Instr::CatchEnd { .. } => {
                self.call_symbol(runtime_symbol(
                    RuntimeFn::EndCatch,
                    self.scheme,
                ));
            }
        }
    }

    fn emit_convert(&mut self, dst: TempVar, src: Operand, from: IrType, to: IrType) {
        match (from.is_float(), to.is_float()) {
            (false, false) => {
                self.load_operand(src, Reg::Rax);
                // Re-narrow through a sized store+load only when shrinking
                if to.size() < from.size() || from.is_signed() != to.is_signed()
                {
                    let scratch = self.temp_offset(dst);
                    self.store_sized(Reg::Rbp, scratch, Reg::Rax, to);
                    self.load_sized(Reg::Rax, Reg::Rbp, scratch, to);
                }
                self.store_temp(dst, Reg::Rax);
            }
            (false, true) => {
                self.load_operand(src, Reg::Rax);
                // cvtsi2sd/ss xmm0, rax
                self.push_byte(if to == IrType::F64 { 0xF2 } else { 0xF3 });
                self.push_byte(0x48);
                self.push_bytes(&[0x0F, 0x2A, 0xC0]);
                self.movq_to_reg(Reg::Rax, 0);
                self.store_temp(dst, Reg::Rax);
            }
            (true, false) => {
                self.load_operand(src, Reg::Rax);
                self.movq_xmm_from(0, Reg::Rax);
                // cvttsd2si/ss2si rax, xmm0
                self.push_byte(if from == IrType::F64 { 0xF2 } else { 0xF3 });
                self.push_byte(0x48);
                self.push_bytes(&[0x0F, 0x2C, 0xC0]);
                self.store_temp(dst, Reg::Rax);
            }
            (true, true) => {
                self.load_operand(src, Reg::Rax);
                self.movq_xmm_from(0, Reg::Rax);
                if from == IrType::F32 && to == IrType::F64 {
                    self.sse_op(0xF3, 0x5A, 0, 0); // cvtss2sd
                } else if from == IrType::F64 && to == IrType::F32 {
                    self.sse_op(0xF2, 0x5A, 0, 0); // cvtsd2ss
                }
                self.movq_to_reg(Reg::Rax, 0);
                self.store_temp(dst, Reg::Rax);
            }
        }
    }

    fn emit_compute_address(
        &mut self,
        dst: TempVar,
        base: Operand,
        index: Option<Operand>,
        scale: u32,
        offset: i64,
    ) {
        self.load_operand(base, Reg::Rax);
        if let Some(index) = index {
            self.load_operand(index, Reg::R10);
            if scale > 1 {
                self.mov_ri(Reg::R11, scale as i64);
                self.imul_rr(Reg::R10, Reg::R11);
            }
            self.alu_rr(0x01, Reg::Rax, Reg::R10); // add rax, r10
        }
        if offset != 0 {
            self.mov_ri(Reg::R10, offset);
            self.alu_rr(0x01, Reg::Rax, Reg::R10);
        }
        self.store_temp(dst, Reg::Rax);
    }

    fn emit_binary(&mut self, op: BinOp, dst: TempVar, lhs: Operand, rhs: Operand, ty: IrType) {
        if ty.is_float() && !op.is_comparison() {
            self.load_operand(lhs, Reg::Rax);
            self.movq_xmm_from(0, Reg::Rax);
            self.load_operand(rhs, Reg::Rax);
            self.movq_xmm_from(1, Reg::Rax);
            let prefix = if ty == IrType::F64 { 0xF2 } else { 0xF3 };
            let opcode = match op {
                BinOp::Add => 0x58,
                BinOp::Sub => 0x5C,
                BinOp::Mul => 0x59,
                BinOp::Div => 0x5E,
                _ => 0x58,
            };
            self.sse_op(prefix, opcode, 0, 1);
            self.movq_to_reg(Reg::Rax, 0);
            self.store_temp(dst, Reg::Rax);
            return;
        }
        if ty.is_float() && op.is_comparison() {
            self.load_operand(lhs, Reg::Rax);
            self.movq_xmm_from(0, Reg::Rax);
            self.load_operand(rhs, Reg::Rax);
            self.movq_xmm_from(1, Reg::Rax);
            // ucomisd/ucomiss xmm0, xmm1
            if ty == IrType::F64 {
                self.push_byte(0x66);
            }
            self.push_bytes(&[0x0F, 0x2E, 0xC1]);
            let cc = match op {
                BinOp::CmpEq => 0x04,
                BinOp::CmpNe => 0x05,
                BinOp::CmpLt => 0x02, // below
                BinOp::CmpLe => 0x06, // below-or-equal
                BinOp::CmpGt => 0x07, // above
                _ => 0x03,            // above-or-equal
            };
            self.setcc_rax(cc);
            self.store_temp(dst, Reg::Rax);
            return;
        }
        match op {
            BinOp::Div | BinOp::Rem => {
                self.load_operand(lhs, Reg::Rax);
                self.load_operand(rhs, Reg::R10);
                if ty.is_signed() {
                    self.push_bytes(&[0x48, 0x99]); // cqo
                    self.push_bytes(&[0x49, 0xF7, 0xFA]); // idiv r10
                } else {
                    self.push_bytes(&[0x31, 0xD2]); // xor edx, edx
                    self.push_bytes(&[0x49, 0xF7, 0xF2]); // div r10
                }
                let result = if op == BinOp::Div { Reg::Rax } else { Reg::Rdx };
                self.store_temp(dst, result);
            }
            BinOp::Shl | BinOp::Shr => {
                self.load_operand(lhs, Reg::Rax);
                self.load_operand(rhs, Reg::Rcx);
                let modrm_ext = if op == BinOp::Shl {
                    0xE0
                } else if ty.is_signed() {
                    0xF8 // sar
                } else {
                    0xE8 // shr
                };
                self.push_bytes(&[0x48, 0xD3, modrm_ext]);
                self.store_temp(dst, Reg::Rax);
            }
            BinOp::Mul => {
                self.load_operand(lhs, Reg::Rax);
                self.load_operand(rhs, Reg::R10);
                self.imul_rr(Reg::Rax, Reg::R10);
                self.store_temp(dst, Reg::Rax);
            }
            BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Or | BinOp::Xor => {
                self.load_operand(lhs, Reg::Rax);
                self.load_operand(rhs, Reg::R10);
                let opcode = match op {
                    BinOp::Add => 0x01,
                    BinOp::Sub => 0x29,
                    BinOp::And => 0x21,
                    BinOp::Or => 0x09,
                    _ => 0x31,
                };
                self.alu_rr(opcode, Reg::Rax, Reg::R10);
                self.store_temp(dst, Reg::Rax);
            }
            _ => {
                // Comparisons
                self.load_operand(lhs, Reg::Rax);
                self.load_operand(rhs, Reg::R10);
                self.cmp_rr(Reg::Rax, Reg::R10);
                let cc: u8 = match (op, ty.is_signed()) {
                    (BinOp::CmpEq, _) => 0x04,
                    (BinOp::CmpNe, _) => 0x05,
                    (BinOp::CmpLt, true) => 0x0C,
                    (BinOp::CmpLe, true) => 0x0E,
                    (BinOp::CmpGt, true) => 0x0F,
                    (BinOp::CmpGe, true) => 0x0D,
                    (BinOp::CmpLt, false) => 0x02,
                    (BinOp::CmpLe, false) => 0x06,
                    (BinOp::CmpGt, false) => 0x07,
                    _ => 0x03,
                };
                self.setcc_rax(cc);
                self.store_temp(dst, Reg::Rax);
            }
        }
    }

    fn emit_unary(&mut self, op: UnOp, dst: TempVar, src: Operand, ty: IrType) {
        self.load_operand(src, Reg::Rax);
        match op {
            UnOp::Neg => {
                if ty.is_float() {
                    // Flip through integer negate of the sign bit
                    self.movq_xmm_from(0, Reg::Rax);
                    let sign = if ty == IrType::F64 {
                        i64::MIN
                    } else {
                        (1i64) << 31
                    };
                    self.mov_ri(Reg::R10, sign);
                    self.movq_to_reg(Reg::Rax, 0);
                    self.alu_rr(0x31, Reg::Rax, Reg::R10); // xor
                } else {
                    self.push_bytes(&[0x48, 0xF7, 0xD8]); // neg rax
                }
            }
            UnOp::Not => {
                self.test_rr(Reg::Rax, Reg::Rax);
                self.setcc_rax(0x04); // sete
            }
            UnOp::BitNot => {
                self.push_bytes(&[0x48, 0xF7, 0xD0]); // not rax
            }
        }
        self.store_temp(dst, Reg::Rax);
    }

    fn emit_call(
        &mut self,
        dst: Option<&TempVar>,
        target: &CallTarget,
        args: &[(Operand, IrType)],
        ret: IrType,
        variadic: bool,
    ) {
        // Virtual targets: park the receiver and resolve the entry before
        // argument registers are live.
        let resolved_target: ResolvedCall = match target {
            CallTarget::Direct(symbol) => {
                ResolvedCall::Direct(self.interner.view(*symbol).to_string())
            }
            CallTarget::Indirect(value) => {
                self.load_operand(*value, Reg::R11);
                ResolvedCall::Register
            }
            CallTarget::Virtual { object, slot } => {
                self.load_operand(*object, Reg::R10);
                // vtable pointer at object offset 0
                self.load_sized(Reg::R11, Reg::R10, 0, IrType::Ptr);
                // entry at vtable[slot * 8]
                self.load_sized(
                    Reg::Rax,
                    Reg::R11,
                    (*slot as i32) * 8,
                    IrType::Ptr,
                );
                self.mov_rr(Reg::R11, Reg::Rax);
                ResolvedCall::Register
            }
        };

        // Classify and place the arguments
        let int_regs = self.abi.int_arg_regs();
        let mut int_used = 0usize;
        let mut float_used = 0usize;
        let mut stack_used = 0u64;
        for (position, (value, ty)) in args.iter().enumerate() {
            if ty.is_float() {
                let xmm = match self.abi {
                    Abi::SysV => float_used,
                    Abi::Win64 => position,
                };
                if xmm < self.abi.max_float_regs() {
                    self.load_operand(*value, Reg::Rax);
                    self.movq_xmm_from(xmm as u8, Reg::Rax);
                } else {
                    self.spill_call_arg(*value, &mut stack_used);
                }
                float_used += 1;
            } else {
                let reg_index = match self.abi {
                    Abi::SysV => int_used,
                    Abi::Win64 => position,
                };
                if reg_index < int_regs.len() {
                    self.load_operand(*value, int_regs[reg_index]);
                } else {
                    self.spill_call_arg(*value, &mut stack_used);
                }
                int_used += 1;
            }
        }
        if variadic && self.abi == Abi::SysV {
            // AL = number of vector registers used
            self.push_bytes(&[0xB0, float_used.min(8) as u8]);
        }
        match resolved_target {
            ResolvedCall::Direct(symbol) => self.call_symbol(&symbol),
            ResolvedCall::Register => self.call_reg(Reg::R11),
        }
        if let Some(dst) = dst {
            if ret.is_float() {
                self.movq_to_reg(Reg::Rax, 0);
            }
            self.store_temp(*dst, Reg::Rax);
        }
    }

    /// Write a stack argument into the reserved outgoing area:
    /// `[rsp + shadow + 8*k]`.
    fn spill_call_arg(&mut self, value: Operand, stack_used: &mut u64) {
        self.load_operand(value, Reg::Rax);
        let disp = (self.abi.shadow_space() + *stack_used) as i32;
        // mov [rsp + disp], rax  (SIB with base rsp)
        self.push_bytes(&[0x48, 0x89, 0x84, 0x24]);
        self.push_bytes(&disp.to_le_bytes());
        *stack_used += 8;
    }

    // ===== Exception plumbing =====

    /// Emit a `throw`: allocate, store the payload, call the runtime.
    /// `type_symbol` is the mangled type-info symbol of the thrown type.
    pub(crate) fn emit_throw(
        &mut self,
        value: Operand,
        value_ty: IrType,
        size: u64,
        type_symbol: &str,
    ) {
        let arg0 = self.abi.int_arg_regs()[0];
        // The payload has to survive the allocation call; park it in the
        // frame's exception scratch slot.
        self.load_operand(value, Reg::Rax);
        self.mov_reg_to_frame(self.exc_slot + 8, Reg::Rax);
        self.mov_ri(arg0, size.max(1) as i64);
        self.call_symbol(runtime_symbol(RuntimeFn::AllocException, self.scheme));
        self.mov_frame_to_reg(Reg::R10, self.exc_slot + 8);
        self.store_sized(Reg::Rax, 0, Reg::R10, value_ty);
        match self.scheme {
            MangleScheme::Itanium => {
                let arg1 = self.abi.int_arg_regs()[1];
                let arg2 = self.abi.int_arg_regs()[2];
                self.mov_rr(arg0, Reg::Rax);
                self.lea_rip(arg1, type_symbol, RelocKind::Pc32);
                self.mov_ri(arg2, 0); // no destructor
                self.call_symbol(runtime_symbol(RuntimeFn::Throw, self.scheme));
            }
            MangleScheme::Msvc => {
                let arg1 = self.abi.int_arg_regs()[1];
                self.mov_rr(arg0, Reg::Rax);
                self.lea_rip(arg1, type_symbol, RelocKind::Pc32);
                self.call_symbol(runtime_symbol(RuntimeFn::Throw, self.scheme));
            }
        }
    }

    /// Emit a `dynamic_cast` through the runtime helper; reference casts
    /// branch to a `bad_cast` throw on null.
    pub(crate) fn emit_dynamic_cast(
        &mut self,
        dst: TempVar,
        src: Operand,
        src_ti: &str,
        dst_ti: &str,
        ref_cast: bool,
    ) {
        let regs = self.abi.int_arg_regs();
        self.load_operand(src, regs[0]);
        self.lea_rip(regs[1], src_ti, RelocKind::Pc32);
        self.lea_rip(regs[2], dst_ti, RelocKind::Pc32);
        self.mov_ri(regs[3], -1); // offset hint: unknown
        self.call_symbol(runtime_symbol(RuntimeFn::DynamicCast, self.scheme));
        if ref_cast {
            // Failed reference casts throw std::bad_cast
            self.test_rr(Reg::Rax, Reg::Rax);
            let over = 5i32; // length of the call below
            self.push_bytes(&[0x0F, 0x85]); // jnz past the trampoline
            self.push_bytes(&over.to_le_bytes());
            self.call_symbol(runtime_symbol(RuntimeFn::BadCast, self.scheme));
        }
        self.store_temp(dst, Reg::Rax);
    }

    /// One unified landing pad per try region: park RAX (exception
    /// pointer), dispatch on the RDX selector to the matching handler,
    /// resume if nothing matches.
    fn emit_landing_pads(&mut self) -> HashMap<u32, u64> {
        let regions = self.f.try_regions.clone();
        let mut pads = HashMap::new();
        let mut filter = 1i32;
        for region in &regions {
            let pad_offset = self.bytes.len() as u64;
            pads.insert(region.id, pad_offset);
            // Save the exception pointer for the CatchBegin calls
            self.mov_reg_to_frame(self.exc_slot, Reg::Rax);
            for (index, _catch) in region.catches.iter().enumerate() {
                // cmp edx, filter
                self.push_bytes(&[0x83, 0xFA, filter as u8]);
                let label = region.catches[index].label;
                self.jcc_label(0x04, label); // je handler
                filter += 1;
            }
            // No clause matched: keep unwinding
            let arg0 = self.abi.int_arg_regs()[0];
            self.mov_frame_to_reg(arg0, self.exc_slot);
            self.call_symbol(runtime_symbol(RuntimeFn::Resume, self.scheme));
        }
        pads
    }

    fn patch_fixups(&mut self) {
        assert_eq!(self.state, EmitState::RelocationsPending);
        let fixups = std::mem::take(&mut self.fixups);
        for (at, label) in fixups {
            let target = *self
                .labels
                .get(&label)
                .unwrap_or_else(|| {
                    panic!(
                        "undefined label `{}`",
                        self.interner.view(label)
                    )
                });
            let rel = target as i64 - (at as i64 + 4);
            let bytes = (rel as i32).to_le_bytes();
            self.bytes[at as usize..at as usize + 4].copy_from_slice(&bytes);
        }
    }

    fn build_eh_info(&self, pads: HashMap<u32, u64>) -> EhFunctionInfo {
        let mut regions = Vec::new();
        for region in &self.f.try_regions {
            let (Some(&start), Some(&end), Some(&pad)) = (
                self.try_starts.get(&region.id),
                self.try_ends.get(&region.id),
                pads.get(&region.id),
            ) else {
                continue;
            };
            let catches = region
                .catches
                .iter()
                .enumerate()
                .map(|(index, clause)| EhCatch {
                    type_symbol: clause
                        .ty
                        .map(|ty| self.typeinfo.symbol(ty).to_string()),
                    // The CatchBegin position is the handler entry; the
                    // clause label points at the same place.
                    handler_offset: self
                        .catch_offsets
                        .get(&(region.id, index))
                        .or_else(|| self.labels.get(&clause.label))
                        .copied()
                        .unwrap_or(0),
                })
                .collect();
            regions.push(EhRegion {
                start,
                end,
                landing_pad: pad,
                catches,
            });
        }
        EhFunctionInfo {
            regions,
            code_len: self.bytes.len() as u64,
            frame_size: self.frame_size as u32,
            prologue_len: self.prologue_len,
        }
    }
}

enum ResolvedCall {
    Direct(String),
    Register,
}

/// Label of a pooled string literal.
pub fn string_symbol(index: u32) -> String {
    format!(".Lstr{}", index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringInterner;
    use crate::ir::LocalSlot;

    fn simple_function(
        interner: &mut StringInterner,
        instrs: Vec<Instr>,
        temp_count: u32,
    ) -> IrFunction {
        IrFunction {
            display_name: "f".into(),
            mangled: "_Z1fv".into(),
            params: Vec::new(),
            ret: IrType::I32,
            instrs,
            locals: Vec::new(),
            temp_count,
            try_regions: Vec::new(),
            value_categories: Default::default(),
            lvalues: Default::default(),
            is_variadic: false,
        }
    }

    #[test]
    fn test_prologue_and_ret_shape() {
        let mut interner = StringInterner::new();
        let f = simple_function(
            &mut interner,
            vec![Instr::Return {
                value: Some(Operand::Const(6)),
                ty: IrType::I32,
            }],
            0,
        );
        let table = TypeinfoTable::default();
        let emitted =
            FuncEmitter::new(&f, &interner, &table, Abi::SysV, MangleScheme::Itanium)
                .emit();
        // push rbp; mov rbp, rsp
        assert_eq!(&emitted.bytes[..4], &[0x55, 0x48, 0x89, 0xE5]);
        // ends with mov rsp, rbp; pop rbp; ret
        assert_eq!(
            &emitted.bytes[emitted.bytes.len() - 5..],
            &[0x48, 0x89, 0xEC, 0x5D, 0xC3]
        );
    }

    #[test]
    fn test_frame_is_16_aligned() {
        let mut interner = StringInterner::new();
        let slot = interner.create("x");
        let f = IrFunction {
            locals: vec![LocalSlot {
                name: slot,
                size: 4,
                align: 4,
                ty: IrType::I32,
                is_param: false,
            }],
            ..simple_function(
                &mut interner,
                vec![Instr::Return {
                    value: None,
                    ty: IrType::Void,
                }],
                3,
            )
        };
        let table = TypeinfoTable::default();
        let mut emitter =
            FuncEmitter::new(&f, &interner, &table, Abi::SysV, MangleScheme::Itanium);
        emitter.layout_frame();
        assert_eq!(emitter.frame_size % 16, 0);
        assert!(emitter.frame_size >= 4 + 3 * 8);
    }

    #[test]
    fn test_branch_fixups_resolve() {
        let mut interner = StringInterner::new();
        let label = interner.create(".Ltest");
        let f = simple_function(
            &mut interner,
            vec![
                Instr::Branch { target: label },
                Instr::Label { name: label },
                Instr::Return {
                    value: Some(Operand::Const(0)),
                    ty: IrType::I32,
                },
            ],
            0,
        );
        let table = TypeinfoTable::default();
        let emitted =
            FuncEmitter::new(&f, &interner, &table, Abi::SysV, MangleScheme::Itanium)
                .emit();
        // The jmp rel32 lands on the instruction right after itself
        let jmp_at = emitted
            .bytes
            .windows(1)
            .position(|w| w[0] == 0xE9)
            .expect("jmp emitted");
        let rel = i32::from_le_bytes(
            emitted.bytes[jmp_at + 1..jmp_at + 5].try_into().unwrap(),
        );
        assert_eq!(rel, 0);
    }

    #[test]
    fn test_direct_call_emits_reloc() {
        let mut interner = StringInterner::new();
        let callee = interner.intern("_Z6calleev");
        let f = simple_function(
            &mut interner,
            vec![
                Instr::Call {
                    dst: Some(TempVar(0)),
                    target: CallTarget::Direct(callee),
                    args: Vec::new(),
                    ret: IrType::I32,
                    variadic: false,
                },
                Instr::Return {
                    value: Some(Operand::Temp(TempVar(0))),
                    ty: IrType::I32,
                },
            ],
            1,
        );
        let table = TypeinfoTable::default();
        let emitted =
            FuncEmitter::new(&f, &interner, &table, Abi::SysV, MangleScheme::Itanium)
                .emit();
        assert_eq!(emitted.relocs.len(), 1);
        assert_eq!(emitted.relocs[0].symbol, "_Z6calleev");
        assert_eq!(emitted.relocs[0].kind, RelocKind::Plt32);
        assert_eq!(emitted.relocs[0].addend, -4);
    }

    #[test]
    fn test_forward_only_state_machine() {
        let mut interner = StringInterner::new();
        let f = simple_function(
            &mut interner,
            vec![Instr::Return {
                value: None,
                ty: IrType::Void,
            }],
            0,
        );
        let table = TypeinfoTable::default();
        let mut emitter =
            FuncEmitter::new(&f, &interner, &table, Abi::SysV, MangleScheme::Itanium);
        emitter.advance_state(EmitState::Emitting);
        let result = std::panic::catch_unwind(
            std::panic::AssertUnwindSafe(|| {
                emitter.advance_state(EmitState::PrologueNotEmitted);
            }),
        );
        assert!(result.is_err(), "backward transition must panic");
    }
}
