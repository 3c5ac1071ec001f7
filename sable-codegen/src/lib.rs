pub mod code;
pub mod compiler;
pub mod cpu;
pub mod error;
pub mod flags;
pub mod il;
pub mod location;
pub mod masm;
pub mod object_model;
pub mod runtime;

pub use code::CodeDescriptor;
pub use compiler::FlowGraphCompiler;
pub use error::CompileError;
pub use flags::Flags;
pub use il::FlowGraph;
pub use runtime::CompilationContext;
