//! Signed 32-bit sequence-space comparisons, per §4.6: `less_than(a, b) ≡
//! (int32)(a - b) < 0`. Grounded in the teacher's `tcb/modular_cmp.rs`
//! (`mod_le`/`mod_leq`/`mod_ge`/`mod_geq`), adapted to the four comparisons
//! §4.6 names directly.

/// `a` comes strictly before `b` in sequence space, accounting for 32-bit
/// wraparound.
pub fn less_than(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub fn less_or_equal(a: u32, b: u32) -> bool {
    a == b || less_than(a, b)
}

pub fn greater_than(a: u32, b: u32) -> bool {
    less_than(b, a)
}

pub fn greater_or_equal(a: u32, b: u32) -> bool {
    less_or_equal(b, a)
}
