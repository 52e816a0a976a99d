//! Exception-handling metadata.
//!
//! ELF targets get DWARF call-frame information (`.eh_frame` CIEs and
//! FDEs) plus a per-function Language-Specific Data Area in
//! `.gcc_except_table`: a call-site table covering every byte of the
//! function, a chained action table, and a reversed type-info table whose
//! entries are indirect pc-relative references through `.data.DW.ref.*`
//! cells. COFF targets get `.pdata` RUNTIME_FUNCTION entries and
//! `.xdata` UNWIND_INFO records chained to a C++ `FuncInfo` /
//! `TryBlockMap` / `HandlerType` / `UnwindMap` group.

use crate::codegen::{EhFunctionInfo, Reloc, RelocKind};

pub fn uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn sleb128(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign = byte & 0x40 != 0;
        if (value == 0 && !sign) || (value == -1 && sign) {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn uleb_len(value: u64) -> usize {
    let mut buf = Vec::new();
    uleb128(value, &mut buf);
    buf.len()
}

/// DW_EH_PE encodings used below.
const DW_EH_PE_ULEB128: u8 = 0x01;
const DW_EH_PE_PCREL_SDATA4: u8 = 0x1b;
const DW_EH_PE_INDIRECT_PCREL_SDATA4: u8 = 0x9b;
const DW_EH_PE_OMIT: u8 = 0xff;

/// One function's LSDA plus the relocations into it (offsets are
/// LSDA-relative; the caller rebases them into `.gcc_except_table`).
pub struct Lsda {
    pub bytes: Vec<u8>,
    /// `(offset, DW.ref cell symbol)` for each type-table entry.
    pub relocs: Vec<(u64, String)>,
}

/// Flattened filter assignment: catch clauses across all regions in
/// order, 1-based. Must match the selector comparisons the backend
/// emitted in the landing pads.
pub fn assign_filters(eh: &EhFunctionInfo) -> Vec<Option<String>> {
    let mut filters = Vec::new();
    for region in &eh.regions {
        for catch in &region.catches {
            filters.push(catch.type_symbol.clone());
        }
    }
    filters
}

/// Build the `.gcc_except_table` contents for one function.
pub fn build_lsda(eh: &EhFunctionInfo) -> Option<Lsda> {
    if eh.regions.is_empty() {
        return None;
    }
    let filters = assign_filters(eh);

    // Action table: one chain per region. A call-site references the
    // chain head by (byte offset + 1); each record is {filter sleb,
    // next sleb} where `next` is self-relative and 0 terminates.
    let mut actions = Vec::new();
    let mut region_action_refs = Vec::new();
    let mut filter = 1i64;
    for region in &eh.regions {
        region_action_refs.push(actions.len() as u64 + 1);
        for (index, _) in region.catches.iter().enumerate() {
            let last = index + 1 == region.catches.len();
            sleb128(filter, &mut actions);
            if last {
                sleb128(0, &mut actions);
            } else {
                // Next record begins right after this byte
                sleb128(1, &mut actions);
            }
            filter += 1;
        }
    }

    // Call-site table: sorted by start, gapless from the function start
    // to the first landing pad.
    let limit = eh
        .regions
        .iter()
        .map(|r| r.landing_pad)
        .min()
        .unwrap_or(eh.code_len);
    let mut regions: Vec<_> = eh.regions.iter().enumerate().collect();
    regions.sort_by_key(|(_, r)| r.start);
    let mut call_sites = Vec::new();
    let mut pos = 0u64;
    for (index, region) in &regions {
        if region.start > pos {
            // Gap: no landing pad, no action
            uleb128(pos, &mut call_sites);
            uleb128(region.start - pos, &mut call_sites);
            uleb128(0, &mut call_sites);
            uleb128(0, &mut call_sites);
        }
        uleb128(region.start, &mut call_sites);
        uleb128(region.end - region.start, &mut call_sites);
        uleb128(region.landing_pad, &mut call_sites);
        uleb128(region_action_refs[*index], &mut call_sites);
        pos = region.end;
    }
    if pos < limit {
        uleb128(pos, &mut call_sites);
        uleb128(limit - pos, &mut call_sites);
        uleb128(0, &mut call_sites);
        uleb128(0, &mut call_sites);
    }

    // Assemble: the TType base offset runs from the byte after its own
    // ULEB128 to the end of the type table, so it covers the call-site
    // encoding byte, the call-site size ULEB128, both tables, the
    // alignment padding, and the type table itself.
    let mut body = Vec::new();
    body.push(DW_EH_PE_ULEB128); // call-site encoding
    uleb128(call_sites.len() as u64, &mut body);
    body.extend_from_slice(&call_sites);
    body.extend_from_slice(&actions);

    // Header prefix before the TType base: LPStart omitted + encoding
    let prefix_len = 2usize;
    // Type table length: 4 bytes per filter, highest filter first
    let tt_len = filters.len() * 4;
    // Iterate padding: the pad depends on where the type table starts,
    // which depends on the uleb length of the offset itself.
    let mut tt_base_guess = (body.len() + tt_len) as u64;
    loop {
        let off_len = uleb_len(tt_base_guess);
        let tt_start = prefix_len + off_len + body.len();
        let pad = (4 - (tt_start % 4)) % 4;
        let candidate = (body.len() + pad + tt_len) as u64;
        if candidate == tt_base_guess {
            break;
        }
        tt_base_guess = candidate;
    }
    let tt_base = tt_base_guess;

    let mut bytes = Vec::new();
    bytes.push(DW_EH_PE_OMIT); // LPStart: landing pads are function-relative
    bytes.push(DW_EH_PE_INDIRECT_PCREL_SDATA4); // TType encoding
    uleb128(tt_base, &mut bytes);
    bytes.extend_from_slice(&body);
    while (bytes.len() + tt_len) % 4 != 0 {
        bytes.push(0);
    }
    // Type table, reversed: the entry for filter N comes first so that
    // entry k sits at (table end - 4k).
    let mut relocs = Vec::new();
    for symbol in filters.iter().rev() {
        match symbol {
            Some(symbol) => {
                relocs.push((
                    bytes.len() as u64,
                    format!("DW.ref.{}", symbol),
                ));
                bytes.extend_from_slice(&0u32.to_le_bytes());
            }
            // catch(...) has a null type entry
            None => bytes.extend_from_slice(&0u32.to_le_bytes()),
        }
    }
    Some(Lsda { bytes, relocs })
}

/// A function placed in `.text`, as the frame-info builders see it.
pub struct EhFunction {
    pub symbol: String,
    pub text_offset: u64,
    pub info: EhFunctionInfo,
    /// Offset of this function's LSDA within `.gcc_except_table`, when it
    /// has one.
    pub lsda_offset: Option<u64>,
}

/// Build `.eh_frame`: one plain CIE for functions without handlers, one
/// personality-carrying CIE for the rest, and an FDE per function.
pub fn build_eh_frame(
    functions: &[EhFunction],
    personality: &str,
) -> (Vec<u8>, Vec<Reloc>) {
    let mut out = Vec::new();
    let mut relocs = Vec::new();

    // CIE 0: augmentation "zR", used by functions without LSDA
    let plain_cie_offset = out.len() as u64;
    {
        let mut cie = Vec::new();
        cie.extend_from_slice(&0u32.to_le_bytes()); // CIE id
        cie.push(1); // version
        cie.extend_from_slice(b"zR\0");
        uleb128(1, &mut cie); // code alignment
        sleb128(-8, &mut cie); // data alignment
        uleb128(16, &mut cie); // return address register
        uleb128(1, &mut cie); // augmentation data length
        cie.push(DW_EH_PE_PCREL_SDATA4);
        initial_cfi(&mut cie);
        push_length_prefixed(&mut out, cie);
    }

    // CIE 1: augmentation "zPLR" with the personality routine referenced
    // indirectly through its DW.ref cell.
    let eh_cie_offset = out.len() as u64;
    let needs_personality = functions.iter().any(|f| f.lsda_offset.is_some());
    if needs_personality {
        let mut cie = Vec::new();
        cie.extend_from_slice(&0u32.to_le_bytes());
        cie.push(1);
        cie.extend_from_slice(b"zPLR\0");
        uleb128(1, &mut cie);
        sleb128(-8, &mut cie);
        uleb128(16, &mut cie);
        uleb128(7, &mut cie); // P(1+4) + L(1) + R(1)
        cie.push(DW_EH_PE_INDIRECT_PCREL_SDATA4);
        // Personality pointer slot: offset is within this CIE body; the
        // final offset is fixed up after the length prefix is known.
        let slot = cie.len();
        cie.extend_from_slice(&0u32.to_le_bytes());
        cie.push(DW_EH_PE_PCREL_SDATA4); // LSDA encoding
        cie.push(DW_EH_PE_PCREL_SDATA4); // FDE pointer encoding
        initial_cfi(&mut cie);
        let body_start = out.len() as u64 + 4; // after the length field
        relocs.push(Reloc {
            offset: body_start + slot as u64,
            symbol: format!("DW.ref.{}", personality),
            kind: RelocKind::Pc32,
            addend: 0,
        });
        push_length_prefixed(&mut out, cie);
    }

    for function in functions {
        let cie_offset = if function.lsda_offset.is_some() {
            eh_cie_offset
        } else {
            plain_cie_offset
        };
        let mut fde = Vec::new();
        let fde_start = out.len() as u64;
        // CIE pointer: distance from this field back to the CIE
        let cie_ptr = (fde_start + 4) - cie_offset;
        fde.extend_from_slice(&(cie_ptr as u32).to_le_bytes());
        // pc_begin: pc-relative to the function's entry
        relocs.push(Reloc {
            offset: fde_start + 4 + fde.len() as u64,
            symbol: function.symbol.clone(),
            kind: RelocKind::Pc32,
            addend: 0,
        });
        fde.extend_from_slice(&0u32.to_le_bytes());
        fde.extend_from_slice(&(function.info.code_len as u32).to_le_bytes());
        match function.lsda_offset {
            Some(lsda_offset) => {
                uleb128(4, &mut fde);
                relocs.push(Reloc {
                    offset: fde_start + 4 + fde.len() as u64,
                    symbol: ".gcc_except_table".to_string(),
                    kind: RelocKind::Pc32,
                    addend: lsda_offset as i64,
                });
                fde.extend_from_slice(&0u32.to_le_bytes());
            }
            None => uleb128(0, &mut fde),
        }
        fde_cfi(&mut fde, function.info.prologue_len);
        push_length_prefixed(&mut out, fde);
    }
    // Terminator
    out.extend_from_slice(&0u32.to_le_bytes());
    (out, relocs)
}

/// CFA at rsp+8 with the return address saved at CFA-8.
fn initial_cfi(out: &mut Vec<u8>) {
    out.push(0x0c); // DW_CFA_def_cfa
    uleb128(7, out); // rsp
    uleb128(8, out);
    out.push(0x80 | 16); // DW_CFA_offset r16 (return address)
    uleb128(1, out);
}

/// Prologue CFI: `push rbp` (CFA 16, rbp saved), `mov rbp, rsp` (CFA via
/// rbp). The epilogue restores by frame-pointer convention, so no further
/// rows are needed.
fn fde_cfi(out: &mut Vec<u8>, prologue_len: u8) {
    out.push(0x41); // DW_CFA_advance_loc 1 (after push rbp)
    out.push(0x0e); // DW_CFA_def_cfa_offset
    uleb128(16, out);
    out.push(0x80 | 6); // DW_CFA_offset rbp
    uleb128(2, out);
    out.push(0x43); // DW_CFA_advance_loc 3 (after mov rbp, rsp)
    out.push(0x0d); // DW_CFA_def_cfa_register
    uleb128(6, out);
    let _ = prologue_len;
}

fn push_length_prefixed(out: &mut Vec<u8>, mut body: Vec<u8>) {
    // Entries are 8-aligned, padded with DW_CFA_nop
    while (body.len() + 4) % 8 != 0 {
        body.push(0);
    }
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
}

// ===== COFF (.pdata / .xdata) =====

/// The `.pdata` and `.xdata` payloads plus their relocations (offsets are
/// section-relative).
pub struct CoffUnwind {
    pub pdata: Vec<u8>,
    pub pdata_relocs: Vec<Reloc>,
    pub xdata: Vec<u8>,
    pub xdata_relocs: Vec<Reloc>,
}

const UNW_FLAG_EHANDLER: u8 = 0x01;
const UWOP_PUSH_NONVOL: u8 = 0;
const UWOP_ALLOC_LARGE: u8 = 1;
const UWOP_ALLOC_SMALL: u8 = 2;
const UWOP_SET_FPREG: u8 = 3;
const FUNC_INFO_MAGIC: u32 = 0x1993_0522;

/// Build RUNTIME_FUNCTION + UNWIND_INFO (+ FuncInfo chain for functions
/// with handlers) for every emitted function.
pub fn build_coff_unwind(functions: &[EhFunction]) -> CoffUnwind {
    let mut pdata = Vec::new();
    let mut pdata_relocs = Vec::new();
    let mut xdata = Vec::new();
    let mut xdata_relocs = Vec::new();

    for function in functions {
        let unwind_offset = xdata.len() as u64;
        let has_eh = !function.info.regions.is_empty();

        // UNWIND_INFO. Codes are stored in reverse prologue order:
        // stack allocation first, then `mov rbp, rsp`, then `push rbp`.
        let frame = function.info.frame_size;
        // Each code: (prologue offset, opcode, op-info nibble, extra slot)
        let mut codes: Vec<(u8, u8, u8, Option<u16>)> = Vec::new();
        if frame > 0 {
            if frame <= 128 {
                codes.push((
                    function.info.prologue_len,
                    UWOP_ALLOC_SMALL,
                    ((frame - 8) / 8) as u8,
                    None,
                ));
            } else {
                codes.push((
                    function.info.prologue_len,
                    UWOP_ALLOC_LARGE,
                    0,
                    Some((frame / 8) as u16),
                ));
            }
        }
        codes.push((4, UWOP_SET_FPREG, 0, None));
        codes.push((1, UWOP_PUSH_NONVOL, 5, None)); // rbp
        let code_count: u8 = codes
            .iter()
            .map(|(_, _, _, extra)| 1 + extra.is_some() as u8)
            .sum();

        let flags = if has_eh { UNW_FLAG_EHANDLER } else { 0 };
        xdata.push(1 | (flags << 3));
        xdata.push(function.info.prologue_len);
        xdata.push(code_count);
        xdata.push(5); // frame register rbp, frame offset 0
        for (offset, op, op_info, extra) in &codes {
            xdata.push(*offset);
            xdata.push(op | (op_info << 4));
            if let Some(extra) = extra {
                xdata.extend_from_slice(&extra.to_le_bytes());
            }
        }
        while xdata.len() % 4 != 0 {
            xdata.push(0);
        }
        if has_eh {
            // Handler RVA + FuncInfo RVA
            xdata_relocs.push(Reloc {
                offset: xdata.len() as u64,
                symbol: "__CxxFrameHandler3".to_string(),
                kind: RelocKind::Rva32,
                addend: 0,
            });
            xdata.extend_from_slice(&0u32.to_le_bytes());
            let funcinfo_ref_at = xdata.len() as u64;
            xdata.extend_from_slice(&0u32.to_le_bytes());

            // FuncInfo; the slot above points here via relocation
            let funcinfo_offset = xdata.len() as u64;
            xdata_relocs.push(Reloc {
                offset: funcinfo_ref_at,
                symbol: ".xdata".to_string(),
                kind: RelocKind::Rva32,
                addend: funcinfo_offset as i64,
            });

            let region_count = function.info.regions.len() as u32;
            let max_state = region_count + 1;
            xdata.extend_from_slice(&FUNC_INFO_MAGIC.to_le_bytes());
            xdata.extend_from_slice(&max_state.to_le_bytes());
            let unwind_map_ref = xdata.len() as u64;
            xdata.extend_from_slice(&0u32.to_le_bytes()); // pUnwindMap
            xdata.extend_from_slice(&region_count.to_le_bytes());
            let try_map_ref = xdata.len() as u64;
            xdata.extend_from_slice(&0u32.to_le_bytes()); // pTryBlockMap
            xdata.extend_from_slice(&0u32.to_le_bytes()); // nIPMapEntries
            xdata.extend_from_slice(&0u32.to_le_bytes()); // pIPToStateMap
            xdata.extend_from_slice(&0u32.to_le_bytes()); // pESTypeList
            xdata.extend_from_slice(&1u32.to_le_bytes()); // EHFlags

            // UnwindMap: one entry per state, no unwind actions
            let unwind_map_offset = xdata.len() as u64;
            for _ in 0..max_state {
                xdata.extend_from_slice(&(-1i32).to_le_bytes());
                xdata.extend_from_slice(&0u32.to_le_bytes());
            }
            xdata_relocs.push(Reloc {
                offset: unwind_map_ref,
                symbol: ".xdata".to_string(),
                kind: RelocKind::Rva32,
                addend: unwind_map_offset as i64,
            });

            // TryBlockMap with its HandlerType arrays following
            let try_map_offset = xdata.len() as u64;
            xdata_relocs.push(Reloc {
                offset: try_map_ref,
                symbol: ".xdata".to_string(),
                kind: RelocKind::Rva32,
                addend: try_map_offset as i64,
            });
            let handlers_start = try_map_offset
                + function.info.regions.len() as u64 * 20;
            let mut handler_cursor = handlers_start;
            for (state, region) in function.info.regions.iter().enumerate() {
                xdata.extend_from_slice(&(state as u32).to_le_bytes()); // tryLow
                xdata.extend_from_slice(&(state as u32).to_le_bytes()); // tryHigh
                xdata
                    .extend_from_slice(&(state as u32 + 1).to_le_bytes()); // catchHigh
                xdata.extend_from_slice(
                    &(region.catches.len() as u32).to_le_bytes(),
                );
                xdata_relocs.push(Reloc {
                    offset: xdata.len() as u64,
                    symbol: ".xdata".to_string(),
                    kind: RelocKind::Rva32,
                    addend: handler_cursor as i64,
                });
                xdata.extend_from_slice(&0u32.to_le_bytes());
                handler_cursor += region.catches.len() as u64 * 20;
            }
            for region in &function.info.regions {
                for catch in &region.catches {
                    xdata.extend_from_slice(&0u32.to_le_bytes()); // adjectives
                    match &catch.type_symbol {
                        Some(symbol) => {
                            xdata_relocs.push(Reloc {
                                offset: xdata.len() as u64,
                                symbol: symbol.clone(),
                                kind: RelocKind::Rva32,
                                addend: 0,
                            });
                            xdata.extend_from_slice(&0u32.to_le_bytes());
                        }
                        None => {
                            xdata.extend_from_slice(&0u32.to_le_bytes())
                        }
                    }
                    xdata.extend_from_slice(&0u32.to_le_bytes()); // dispCatchObj
                    xdata_relocs.push(Reloc {
                        offset: xdata.len() as u64,
                        symbol: function.symbol.clone(),
                        kind: RelocKind::Rva32,
                        addend: catch.handler_offset as i64,
                    });
                    xdata.extend_from_slice(&0u32.to_le_bytes());
                    xdata.extend_from_slice(&0u32.to_le_bytes()); // frame adj
                }
            }
        }
        while xdata.len() % 4 != 0 {
            xdata.push(0);
        }

        // RUNTIME_FUNCTION
        pdata_relocs.push(Reloc {
            offset: pdata.len() as u64,
            symbol: function.symbol.clone(),
            kind: RelocKind::Rva32,
            addend: 0,
        });
        pdata.extend_from_slice(&0u32.to_le_bytes());
        pdata_relocs.push(Reloc {
            offset: pdata.len() as u64,
            symbol: function.symbol.clone(),
            kind: RelocKind::Rva32,
            addend: function.info.code_len as i64,
        });
        pdata.extend_from_slice(&0u32.to_le_bytes());
        pdata_relocs.push(Reloc {
            offset: pdata.len() as u64,
            symbol: ".xdata".to_string(),
            kind: RelocKind::Rva32,
            addend: unwind_offset as i64,
        });
        pdata.extend_from_slice(&0u32.to_le_bytes());
    }

    CoffUnwind {
        pdata,
        pdata_relocs,
        xdata,
        xdata_relocs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{EhCatch, EhRegion};

    fn leb(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        uleb128(value, &mut out);
        out
    }

    #[test]
    fn test_uleb_sleb_encodings() {
        assert_eq!(leb(0), vec![0]);
        assert_eq!(leb(127), vec![0x7f]);
        assert_eq!(leb(128), vec![0x80, 0x01]);
        let mut out = Vec::new();
        sleb128(-8, &mut out);
        assert_eq!(out, vec![0x78]);
        let mut out = Vec::new();
        sleb128(1, &mut out);
        assert_eq!(out, vec![0x01]);
    }

    fn one_region_info() -> EhFunctionInfo {
        EhFunctionInfo {
            regions: vec![EhRegion {
                start: 20,
                end: 60,
                landing_pad: 100,
                catches: vec![EhCatch {
                    type_symbol: Some("_ZTIi".to_string()),
                    handler_offset: 70,
                }],
            }],
            code_len: 140,
            frame_size: 48,
            prologue_len: 11,
        }
    }

    #[test]
    fn test_lsda_header_and_tables() {
        let lsda = build_lsda(&one_region_info()).expect("lsda built");
        // LPStart omitted, TType encoding 0x9b
        assert_eq!(lsda.bytes[0], 0xff);
        assert_eq!(lsda.bytes[1], 0x9b);
        // Call-site encoding is uleb128
        let tt_base_len = 1; // small offsets fit one uleb byte
        assert_eq!(lsda.bytes[2 + tt_base_len - 1 + 1], 0x01);
        // TType base offset spans to the end of the table
        let tt_base = lsda.bytes[2] as usize;
        assert_eq!(3 + tt_base, lsda.bytes.len());
        // One typeinfo entry, relocated through a DW.ref cell
        assert_eq!(lsda.relocs.len(), 1);
        assert_eq!(lsda.relocs[0].1, "DW.ref._ZTIi");
    }

    #[test]
    fn test_lsda_call_sites_cover_gaps() {
        let lsda = build_lsda(&one_region_info()).expect("lsda built");
        // Parse back the call-site table: header is 3 bytes here
        let mut at = 3;
        assert_eq!(lsda.bytes[at], 0x01);
        at += 1;
        let cs_len = lsda.bytes[at] as usize;
        at += 1;
        let cs = &lsda.bytes[at..at + cs_len];
        // Three entries of four one-byte ulebs each: pre-try gap, the
        // try region, and the post-try gap up to the landing pad.
        assert_eq!(cs.len(), 12);
        assert_eq!(&cs[0..4], &[0, 20, 0, 0]);
        assert_eq!(&cs[4..8], &[20, 40, 100, 1]);
        assert_eq!(&cs[8..12], &[60, 40, 0, 0]);
    }

    #[test]
    fn test_lsda_action_chain_terminates() {
        let lsda = build_lsda(&one_region_info()).expect("lsda built");
        // Single catch: action table is {filter=1, next=0}
        let at = 3 + 1 + 1 + 12;
        assert_eq!(&lsda.bytes[at..at + 2], &[1, 0]);
    }

    #[test]
    fn test_eh_frame_has_cie_and_fde() {
        let functions = vec![EhFunction {
            symbol: "main".to_string(),
            text_offset: 0,
            info: one_region_info(),
            lsda_offset: Some(0),
        }];
        let (bytes, relocs) = build_eh_frame(&functions, "__gxx_personality_v0");
        // Ends with the zero terminator
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
        // Personality goes through its DW.ref cell
        assert!(relocs
            .iter()
            .any(|r| r.symbol == "DW.ref.__gxx_personality_v0"));
        // FDE references the function and its LSDA
        assert!(relocs.iter().any(|r| r.symbol == "main"));
        assert!(relocs.iter().any(|r| r.symbol == ".gcc_except_table"));
    }

    #[test]
    fn test_coff_unwind_shapes() {
        let functions = vec![EhFunction {
            symbol: "main".to_string(),
            text_offset: 0,
            info: one_region_info(),
            lsda_offset: None,
        }];
        let unwind = build_coff_unwind(&functions);
        // One RUNTIME_FUNCTION: begin, end, unwind-info
        assert_eq!(unwind.pdata.len(), 12);
        assert_eq!(unwind.pdata_relocs.len(), 3);
        // UNWIND_INFO starts with version 1 + EHANDLER flag
        assert_eq!(unwind.xdata[0] & 0x07, 1);
        assert_eq!((unwind.xdata[0] >> 3) & 0x1f, UNW_FLAG_EHANDLER);
        // The handler chain references __CxxFrameHandler3
        assert!(unwind
            .xdata_relocs
            .iter()
            .any(|r| r.symbol == "__CxxFrameHandler3"));
    }
}
