//! Integration tests for compile-time evaluation: programs whose
//! `static_assert`s must all pass and that must compile to an object.

use cppc::{compile_to_object, Options};

/// Compiles the program with default options, expecting success.
macro_rules! assert_compiles {
    ($src:expr $(,)?) => {
        if let Err(error) = compile_to_object(
            $src.into(),
            "test.cpp".into(),
            Options::default(),
        ) {
            panic!("unexpected diagnostics:\n{:#}", error);
        }
    };
}

#[test]
fn test_constexpr_factorial_loop() {
    assert_compiles!(
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
fn test_constexpr_recursion() {
    assert_compiles!(
        "constexpr int fib(int n) {\n\
             if (n < 2) return n;\n\
             return fib(n - 1) + fib(n - 2);\n\
         }\n\
         static_assert(fib(10) == 55);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_constexpr_heap_roundtrip() {
    assert_compiles!(
        "constexpr int f() {\n\
             int* p = new int(7);\n\
             int v = *p;\n\
             delete p;\n\
             return v;\n\
         }\n\
         static_assert(f() == 7);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_constexpr_array_allocation() {
    assert_compiles!(
        "constexpr int sum3() {\n\
             int* p = new int[3];\n\
             p[0] = 1;\n\
             p[1] = 2;\n\
             p[2] = 3;\n\
             int total = p[0] + p[1] + p[2];\n\
             delete[] p;\n\
             return total;\n\
         }\n\
         static_assert(sum3() == 6);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_sizeof_and_alignof() {
    assert_compiles!(
        "static_assert(sizeof(char) == 1);\n\
         static_assert(sizeof(int) == 4);\n\
         static_assert(sizeof(long long) == 8);\n\
         static_assert(sizeof(int*) == 8);\n\
         static_assert(alignof(double) == 8);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_struct_sizeof_with_padding() {
    assert_compiles!(
        "struct Padded { char c; long long n; };\n\
         static_assert(sizeof(Padded) == 16);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_type_traits() {
    assert_compiles!(
        "struct Base { };\n\
         struct Derived : Base { };\n\
         enum Color { Red };\n\
         static_assert(__is_same(int, int));\n\
         static_assert(!__is_same(int, float));\n\
         static_assert(__is_pointer(int*));\n\
         static_assert(!__is_pointer(int));\n\
         static_assert(__is_integral(int));\n\
         static_assert(__is_floating_point(double));\n\
         static_assert(__is_class(Base));\n\
         static_assert(__is_enum(Color));\n\
         static_assert(__is_base_of(Base, Derived));\n\
         static_assert(!__is_base_of(Derived, Base));\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_is_polymorphic_trait() {
    assert_compiles!(
        "struct Plain { int x; };\n\
         struct Poly { virtual int f() { return 0; } };\n\
         static_assert(!__is_polymorphic(Plain));\n\
         static_assert(__is_polymorphic(Poly));\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_aggregate_construction() {
    assert_compiles!(
        "struct Point { int x; int y; };\n\
         constexpr int f() {\n\
             Point p = Point(3, 4);\n\
             return p.x + p.y;\n\
         }\n\
         static_assert(f() == 7);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_constructor_initializer_list() {
    assert_compiles!(
        "struct Value {\n\
             int n;\n\
             constexpr Value(int k) : n(k) {}\n\
         };\n\
         constexpr int f() {\n\
             Value v = Value(21);\n\
             return v.n + v.n;\n\
         }\n\
         static_assert(f() == 42);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_short_circuit_skips_poison() {
    // The right-hand side would be a division by zero; short-circuiting
    // must keep it unevaluated.
    assert_compiles!(
        "static_assert(true || (1 / 0 == 0));\n\
         static_assert(!(false && (1 / 0 == 0)));\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_conditional_operator() {
    assert_compiles!(
        "constexpr int pick(bool b) { return b ? 10 : 20; }\n\
         static_assert(pick(true) == 10);\n\
         static_assert(pick(false) == 20);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_spaceship_in_constant_expressions() {
    assert_compiles!(
        "static_assert((1 <=> 2) < 0);\n\
         static_assert((2 <=> 2) == 0);\n\
         static_assert((3 <=> 2) > 0);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_enum_arithmetic() {
    assert_compiles!(
        "enum Flags { A = 1, B = 2, C = 4 };\n\
         static_assert((A | B | C) == 7);\n\
         static_assert(B * 3 == 6);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_non_type_template_argument() {
    assert_compiles!(
        "template<int N> struct repeat { static const int value = N * 2; };\n\
         constexpr int f() { return 21; }\n\
         using both = repeat<f()>;\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_constexpr_variable_initializers() {
    assert_compiles!(
        "constexpr int base = 40;\n\
         constexpr int answer = base + 2;\n\
         static_assert(answer == 42);\n\
         int main() { return 0; }",
    );
}

#[test]
fn test_unsigned_wrapping() {
    assert_compiles!(
        "static_assert(0u - 1u == 4294967295u);\n\
         int main() { return 0; }",
    );
}
