macro_rules! comment {
    (
        $compiler:expr,
        $out:expr
    ) => {{
        if $compiler.masm.comments_enabled() {
            $compiler.masm.emit_comment($out);
        }
    }};
}

pub use self::deopt::{CompilerDeoptInfo, DeoptInfoBuilder};
pub use self::flow_graph_compiler::FlowGraphCompiler;
pub use self::parallel_move::ParallelMoveResolver;
pub use self::parameters::bind_arguments;
pub use self::type_test::TypeTestPlan;

mod calls;
mod deopt;
mod flow_graph_compiler;
mod frame;
mod parallel_move;
mod parameters;
mod type_test;
