/// Settings consulted while synthesizing code. `Default` gives the values
/// used in production.
#[derive(Clone, Debug)]
pub struct Flags {
    /// Emit a breakpoint in front of every deoptimization stub.
    pub trap_on_deoptimization: bool,
    pub optimization_counter_threshold: i64,
    pub reoptimization_counter_threshold: i64,
    /// Check named arguments on entry to every function, not just closures.
    pub strict_argument_checking: bool,
    /// Code of callees may be discarded, megamorphic targets may then have
    /// no code attached.
    pub collect_code: bool,
    pub eliminate_type_checks: bool,
    pub emit_edge_counters: bool,
    pub emit_code_comments: bool,
    pub max_polymorphic_checks: usize,
    pub megamorphic_initial_capacity: usize,
}

impl Default for Flags {
    fn default() -> Flags {
        Flags {
            trap_on_deoptimization: false,
            optimization_counter_threshold: 2000,
            reoptimization_counter_threshold: 2000,
            strict_argument_checking: false,
            collect_code: true,
            eliminate_type_checks: true,
            emit_edge_counters: true,
            emit_code_comments: false,
            max_polymorphic_checks: 4,
            megamorphic_initial_capacity: 16,
        }
    }
}

impl Flags {
    pub fn checked() -> Flags {
        Flags {
            strict_argument_checking: true,
            eliminate_type_checks: false,
            emit_code_comments: true,
            ..Flags::default()
        }
    }
}
