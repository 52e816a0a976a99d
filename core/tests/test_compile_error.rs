//! Integration tests for programs that must be rejected. Every case
//! expects compilation to fail with a diagnostic mentioning the given
//! fragment.

use cppc::{compile_to_object, Options};

/// Compiles the program with default options and expects a diagnostic
/// containing `$needle`. Panics if the program compiles or the message
/// does not match.
macro_rules! assert_compile_error {
    ($src:expr, $needle:expr $(,)?) => {
        let error = compile_to_object(
            $src.into(),
            "test.cpp".into(),
            Options::default(),
        )
        .expect_err("program compiled unexpectedly");
        let rendered = error.to_string();
        assert!(
            rendered.contains($needle),
            "diagnostic `{}` does not mention `{}`",
            rendered,
            $needle,
        );
    };
}

#[test]
fn test_lex_error_unterminated_string() {
    assert_compile_error!(
        "int main() { const char* s = \"oops; return 0; }",
        "unterminated string literal",
    );
}

#[test]
fn test_syntax_error_reports_expectation() {
    assert_compile_error!("int main( { return 0; }", "Syntax error");
}

#[test]
fn test_diagnostics_carry_file_and_position() {
    let error = compile_to_object(
        "int main() {\n    return zzz;\n}".into(),
        "diag.cpp".into(),
        Options::default(),
    )
    .expect_err("program compiled unexpectedly");
    assert_eq!(
        error.to_string(),
        "diag.cpp:Lookup error at 2:12: use of undeclared identifier `zzz`"
    );
}

#[test]
fn test_undeclared_identifier() {
    assert_compile_error!(
        "int main() { return zzz; }",
        "use of undeclared identifier `zzz`",
    );
}

#[test]
fn test_undeclared_function() {
    assert_compile_error!(
        "int main() { return missing(1); }",
        "undeclared",
    );
}

#[test]
fn test_qualified_call_does_not_fall_back_to_global() {
    assert_compile_error!(
        "namespace ns { }\n\
         int f() { return 0; }\n\
         int main() { return ns::f(); }",
        "is not a member",
    );
}

#[test]
fn test_static_assert_failure_with_message() {
    assert_compile_error!(
        "static_assert(2 + 2 == 5, \"arithmetic is broken\");\n\
         int main() { return 0; }",
        "static assertion failed: arithmetic is broken",
    );
}

#[test]
fn test_static_assert_failure_without_message() {
    assert_compile_error!(
        "static_assert(sizeof(int) == 3);\n\
         int main() { return 0; }",
        "static assertion failed",
    );
}

#[test]
fn test_constexpr_division_by_zero() {
    assert_compile_error!(
        "constexpr int x = 1 / 0;\n\
         int main() { return 0; }",
        "division by zero",
    );
}

#[test]
fn test_constexpr_shift_out_of_range() {
    assert_compile_error!(
        "constexpr int x = 1 << 40;\n\
         int main() { return 0; }",
        "out of range",
    );
}

#[test]
fn test_constexpr_overflow() {
    assert_compile_error!(
        "constexpr long long x = 9223372036854775807 + 1;\n\
         int main() { return 0; }",
        "integer overflow",
    );
}

#[test]
fn test_constexpr_heap_leak() {
    assert_compile_error!(
        "constexpr int f() { int* p = new int(3); return *p; }\n\
         static_assert(f() == 3);\n\
         int main() { return 0; }",
        "not deallocated",
    );
}

#[test]
fn test_constexpr_double_delete() {
    assert_compile_error!(
        "constexpr int f() {\n\
             int* p = new int(1);\n\
             delete p;\n\
             delete p;\n\
             return 0;\n\
         }\n\
         static_assert(f() == 0);\n\
         int main() { return 0; }",
        "double delete",
    );
}

#[test]
fn test_constexpr_use_after_delete() {
    assert_compile_error!(
        "constexpr int f() {\n\
             int* p = new int(1);\n\
             delete p;\n\
             return *p;\n\
         }\n\
         static_assert(f() == 1);\n\
         int main() { return 0; }",
        "use after delete",
    );
}

#[test]
fn test_constexpr_out_of_bounds() {
    assert_compile_error!(
        "constexpr int f() {\n\
             int* p = new int[2];\n\
             int v = p[5];\n\
             delete[] p;\n\
             return v;\n\
         }\n\
         static_assert(f() == 0);\n\
         int main() { return 0; }",
        "outside the allocation",
    );
}

#[test]
fn test_constexpr_mismatched_delete() {
    assert_compile_error!(
        "constexpr int f() {\n\
             int* p = new int[2];\n\
             delete p;\n\
             return 0;\n\
         }\n\
         static_assert(f() == 0);\n\
         int main() { return 0; }",
        "delete of an array allocation",
    );
}

#[test]
fn test_constexpr_step_limit() {
    assert_compile_error!(
        "constexpr int spin() {\n\
             int i = 0;\n\
             while (true) { i = i + 1; }\n\
             return i;\n\
         }\n\
         static_assert(spin() == 0);\n\
         int main() { return 0; }",
        "step limit",
    );
}

#[test]
fn test_constexpr_recursion_limit() {
    assert_compile_error!(
        "constexpr int bottom(int n) { return bottom(n + 1); }\n\
         static_assert(bottom(0) == 0);\n\
         int main() { return 0; }",
        "recursion limit",
    );
}

#[test]
fn test_call_to_non_constexpr_function() {
    assert_compile_error!(
        "int runtime_only() { return 1; }\n\
         static_assert(runtime_only() == 1);\n\
         int main() { return 0; }",
        "call to non-constexpr function `runtime_only`",
    );
}

#[test]
fn test_constructor_bodies_are_not_evaluated() {
    assert_compile_error!(
        "struct S {\n\
             int n;\n\
             constexpr S(int k) : n(k) { n = n + 1; }\n\
         };\n\
         constexpr int f() { S s = S(1); return s.n; }\n\
         static_assert(f() == 2);\n\
         int main() { return 0; }",
        "constructor bodies are not evaluated",
    );
}

#[test]
fn test_capturing_lambda_is_rejected() {
    assert_compile_error!(
        "int main() { int x = 1; return [x]() { return x; }(); }",
        "capturing lambdas are not supported",
    );
}

#[test]
fn test_private_member_access_is_checked() {
    assert_compile_error!(
        "class Vault {\n\
             int secret;\n\
         public:\n\
             Vault() : secret(7) {}\n\
         };\n\
         int main() { Vault v; return v.secret; }",
        "`secret` is a private member",
    );
}

#[test]
fn test_access_control_can_be_disabled() {
    let options = Options {
        access_control: false,
        ..Options::default()
    };
    compile_to_object(
        "class Vault {\n\
             int secret;\n\
         public:\n\
             Vault() : secret(7) {}\n\
         };\n\
         int main() { Vault v; return v.secret; }"
            .into(),
        "test.cpp".into(),
        options,
    )
    .expect("compiles with -fno-access-control");
}

#[test]
fn test_template_deduction_conflict() {
    assert_compile_error!(
        "template<typename T> T pick(T a, T b) { return a; }\n\
         int main() { return pick(1, 2.0); }",
        "conflicting deductions",
    );
}

#[test]
fn test_wrong_template_argument_count() {
    assert_compile_error!(
        "template<typename T> struct box { T value; };\n\
         using bad = box<int, int>;\n\
         int main() { return 0; }",
        "too many template arguments",
    );
}
