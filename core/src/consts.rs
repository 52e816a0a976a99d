/// The maximum number of evaluation steps a single constant expression may
/// take before it is rejected. This is not a strategic restriction on
/// users, just a mechanism to keep compile-time evaluation from running
/// forever.
pub const MAX_CONSTEXPR_STEPS: usize = 1_000_000;

/// The maximum call depth inside constant-expression evaluation. Exceeding
/// it is a compile error, mirroring real implementations' default limits.
pub const MAX_CONSTEXPR_DEPTH: usize = 512;

/// Cap on collected diagnostics before a phase gives up; keeps cascades
/// from flooding the terminal.
pub const MAX_DIAGNOSTICS: usize = 20;
