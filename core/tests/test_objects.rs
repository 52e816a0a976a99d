//! Integration tests that inspect the emitted object model: symbols,
//! vtable layout, relocations, exception metadata, and the serialized
//! ELF/COFF headers.

use cppc::{
    compile_to_model, compile_to_object, CompatMode, Compiler, ObjectModel,
    Options, Target,
};

fn model(src: &str) -> Compiler<ObjectModel> {
    match compile_to_model(src.into(), "test.cpp".into(), Options::default()) {
        Ok(compiled) => compiled,
        Err(error) => panic!("unexpected diagnostics:\n{:#}", error),
    }
}

fn read_uleb(bytes: &[u8], at: &mut usize) -> u64 {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = bytes[*at];
        *at += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return value;
        }
        shift += 7;
    }
}

#[test]
fn test_simple_arithmetic_defines_main() {
    let compiled = model("int main() { return 1 + 2 + 3; }");
    let object = compiled.object();
    let main = object.symbol("main").expect("main defined");
    assert_eq!(main.section.as_deref(), Some(".text"));
    assert!(main.global);
    assert!(main.size > 0);

    let bytes = compiled.emit();
    assert_eq!(&bytes[0..4], b"\x7fELF");
}

#[test]
fn test_static_dispatch_mangles_member_and_emits_no_vtable() {
    let compiled = model(
        "struct S {\n\
             int f() { return 7; }\n\
         };\n\
         int main() { S s; return s.f(); }",
    );
    let object = compiled.object();
    assert!(object.symbol("_ZN1S1fEv").is_some(), "S::f mangled symbol");
    assert!(
        !object.symbols.iter().any(|s| s.name.starts_with("_ZTV")),
        "no vtable may be emitted for a non-polymorphic class"
    );
}

#[test]
fn test_virtual_dispatch_emits_vtable_with_override() {
    let compiled = model(
        "struct Base {\n\
             virtual int f() { return 1; }\n\
         };\n\
         struct Derived : Base {\n\
             int f() override { return 2; }\n\
         };\n\
         int main() { Base* p = new Derived; return p->f(); }",
    );
    let object = compiled.object();

    // All three RTTI artifacts exist for both classes
    for class in ["Base", "Derived"] {
        for prefix in ["_ZTV", "_ZTI", "_ZTS"] {
            let symbol = format!("{}7{}", prefix, class);
            assert!(
                object.symbol(&symbol).is_some(),
                "missing {}",
                symbol
            );
        }
    }

    // Derived's vtable: top offset, RTTI pointer at the slot right
    // before the first function pointer, then slot 0 = Derived::f.
    let vtable = object
        .section(".data.rel.ro._ZTV7Derived")
        .expect("vtable section");
    assert_eq!(vtable.bytes.len(), 24, "header + one slot");
    let rtti = vtable
        .relocs
        .iter()
        .find(|r| r.offset == 8)
        .expect("RTTI pointer at -8 from the first slot");
    assert_eq!(rtti.symbol, "_ZTI7Derived");
    let slot0 = vtable
        .relocs
        .iter()
        .find(|r| r.offset == 16)
        .expect("slot 0 pointer");
    assert_eq!(slot0.symbol, "_ZN7Derived1fEv");

    // The type string is the mangled class name
    let zts = object
        .section(".rodata._ZTS7Derived")
        .expect("type string section");
    assert_eq!(&zts.bytes, b"7Derived\0");

    // Derived's type_info is an __si_class_type_info (single base)
    let zti = object
        .section(".data.rel.ro._ZTI7Derived")
        .expect("type info section");
    assert!(zti
        .relocs
        .iter()
        .any(|r| r.symbol.contains("__si_class_type_info")));
    assert!(zti.relocs.iter().any(|r| r.symbol == "_ZTI7Base"));
}

#[test]
fn test_constexpr_static_assert_scenario_compiles() {
    model(
        "constexpr int f(int n) {\n\
             int r = 1;\n\
             for (int i = 1; i <= n; ++i) r *= i;\n\
             return r;\n\
         }\n\
         static_assert(f(5) == 120);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_template_instantiation_emits_one_symbol() {
    let compiled = model(
        "template<typename T> T id(T x) { return x; }\n\
         int main() { return id<int>(1) + id<int>(2); }",
    );
    let object = compiled.object();
    let instantiations: Vec<_> = object
        .symbols
        .iter()
        .filter(|s| s.name.starts_with("_Z2id"))
        .collect();
    assert_eq!(
        instantiations.len(),
        1,
        "identical cache keys must share one instantiation: {:?}",
        instantiations
            .iter()
            .map(|s| &s.name)
            .collect::<Vec<_>>()
    );
    assert_eq!(instantiations[0].name, "_Z2idIiEii");
}

#[test]
fn test_exception_metadata_on_elf() {
    let compiled = model(
        "int main() {\n\
             try {\n\
                 throw 42;\n\
             } catch (int e) {\n\
                 return e;\n\
             }\n\
             return 0;\n\
         }",
    );
    let object = compiled.object();

    // The throw/catch machinery is called through the C++ runtime
    let text = object.section(".text").expect("text section");
    for runtime in [
        "__cxa_allocate_exception",
        "__cxa_throw",
        "__cxa_begin_catch",
        "__cxa_end_catch",
        "_Unwind_Resume",
    ] {
        assert!(
            text.relocs.iter().any(|r| r.symbol == runtime),
            "missing call to {}",
            runtime
        );
    }

    // LSDA: LPStart omitted, TType encoding 0x9b, call-site table in
    // ULEB form covering the function without gaps, action chain
    // terminating, typeinfo through a DW.ref cell.
    let lsda = object
        .section(".gcc_except_table")
        .expect("gcc_except_table");
    let bytes = &lsda.bytes;
    assert_eq!(bytes[0], 0xff);
    assert_eq!(bytes[1], 0x9b);
    let mut at = 2;
    let tt_base = read_uleb(bytes, &mut at);
    assert_eq!(
        at + tt_base as usize,
        bytes.len(),
        "TType base offset must span to the end of the type table"
    );
    assert_eq!(bytes[at], 0x01, "call sites are uleb128-encoded");
    at += 1;
    let cs_len = read_uleb(bytes, &mut at) as usize;
    let cs_end = at + cs_len;
    let mut entries = Vec::new();
    while at < cs_end {
        let start = read_uleb(bytes, &mut at);
        let len = read_uleb(bytes, &mut at);
        let pad = read_uleb(bytes, &mut at);
        let action = read_uleb(bytes, &mut at);
        entries.push((start, len, pad, action));
    }
    assert!(entries.len() >= 2, "pre-try and try entries expected");
    // Gapless coverage from the function start
    assert_eq!(entries[0].0, 0);
    for pair in entries.windows(2) {
        assert_eq!(
            pair[0].0 + pair[0].1,
            pair[1].0,
            "call-site entries must be contiguous"
        );
    }
    // Exactly one region has a landing pad and an action
    let armed: Vec<_> = entries.iter().filter(|e| e.2 != 0).collect();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].3, 1, "first action chain");
    // Action table directly follows: {filter=1, next=0}
    assert_eq!(&bytes[cs_end..cs_end + 2], &[1, 0]);
    // One typeinfo entry referencing int's type_info via its cell
    assert!(lsda
        .relocs
        .iter()
        .any(|r| r.symbol == "DW.ref._ZTIi"));
    assert!(object.symbol("DW.ref._ZTIi").is_some());

    // Frame info present with the personality's indirection cell
    let eh_frame = object.section(".eh_frame").expect("eh_frame");
    assert!(eh_frame
        .relocs
        .iter()
        .any(|r| r.symbol == "DW.ref.__gxx_personality_v0"));
    assert!(object.symbol("DW.ref.__gxx_personality_v0").is_some());
}

#[test]
fn test_coff_output_shape() {
    let options = Options {
        target: Target::Coff,
        compat: CompatMode::Msvc,
        ..Options::default()
    };
    let compiled = compile_to_model(
        "struct S {\n\
             int f() { return 7; }\n\
         };\n\
         int main() { S s; return s.f(); }"
            .into(),
        "test.cpp".into(),
        options,
    )
    .expect("compiles for coff");
    let object = compiled.object();
    assert!(object.section(".pdata").is_some());
    assert!(object.section(".xdata").is_some());
    assert!(object.section(".drectve").is_some());
    // main stays unmangled, members use MSVC decoration
    assert!(object.symbol("main").is_some());
    assert!(object.symbol("?f@S@@QEAAHXZ").is_some());

    let bytes = compiled.emit();
    assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x8664);
}

#[test]
fn test_globals_are_placed_in_data_and_bss() {
    let compiled = model(
        "int counter = 5;\n\
         int uninitialized;\n\
         int main() { return counter; }",
    );
    let object = compiled.object();
    let counter = object.symbol("counter").expect("counter defined");
    assert_eq!(counter.section.as_deref(), Some(".data"));
    let data = object.section(".data").expect("data section");
    assert_eq!(&data.bytes[counter.offset as usize..][..4], &[5, 0, 0, 0]);
    let unin = object.symbol("uninitialized").expect("bss symbol");
    assert_eq!(unin.section.as_deref(), Some(".bss"));
}

#[test]
fn test_string_literals_are_pooled() {
    let compiled = model(
        "const char* a() { return \"shared\"; }\n\
         const char* b() { return \"shared\"; }\n\
         int main() { return 0; }",
    );
    let object = compiled.object();
    let rodata = object.section(".rodata").expect("rodata");
    // One pooled copy, NUL-terminated
    assert_eq!(rodata.bytes, b"shared\0");
}

#[test]
fn test_emission_is_deterministic() {
    let src = "template<typename T> T id(T x) { return x; }\n\
               struct Base { virtual int f() { return 1; } };\n\
               struct Derived : Base { int f() override { return 2; } };\n\
               int g = 3;\n\
               int main() {\n\
                   Base* p = new Derived;\n\
                   return id<int>(p->f()) + g;\n\
               }";
    let first = compile_to_object(
        src.into(),
        "test.cpp".into(),
        Options::default(),
    )
    .expect("first compile");
    let second = compile_to_object(
        src.into(),
        "test.cpp".into(),
        Options::default(),
    )
    .expect("second compile");
    assert_eq!(first, second, "object emission must be reproducible");
}

#[test]
fn test_prologue_pushes_and_ret() {
    let compiled = model("int main() { return 6; }");
    let object = compiled.object();
    let text = object.section(".text").expect("text");
    let main = object.symbol("main").expect("main");
    let code = &text.bytes
        [main.offset as usize..(main.offset + main.size) as usize];
    // push rbp; mov rbp, rsp
    assert_eq!(&code[0..4], &[0x55, 0x48, 0x89, 0xE5]);
    // ends with mov rsp, rbp; pop rbp; ret
    assert_eq!(&code[code.len() - 5..], &[0x48, 0x89, 0xEC, 0x5D, 0xC3]);
}

#[test]
fn test_namespaced_function_mangling() {
    let compiled = model(
        "namespace math {\n\
             int abs(int v) { return v < 0 ? -v : v; }\n\
         }\n\
         int main() { return math::abs(-3); }",
    );
    let object = compiled.object();
    assert!(object.symbol("_ZN4math3absEi").is_some());
}
