use std::sync::Arc;

pub use self::args_descriptor::{
    ArgumentsDescriptor, ArgumentsDescriptorTable, NamedArgument, ARGS_DESC_COUNT_OFFSET,
    ARGS_DESC_FIRST_NAMED_OFFSET, ARGS_DESC_NAMED_ENTRY_SIZE, ARGS_DESC_NAME_OFFSET,
    ARGS_DESC_POSITIONAL_COUNT_OFFSET, ARGS_DESC_POSITION_OFFSET,
};
pub use self::deopt_table::{
    DeoptFrames, DeoptInfo, DeoptInfoId, DeoptInstr, DeoptReason, DeoptTable, FrameSlot,
    OptimizedFrame,
};
pub use self::ic_data::{ICCheck, ICData};
pub use self::megamorphic_cache::{
    MegamorphicCache, MegamorphicCacheTable, ProbeResult, MEGAMORPHIC_BUCKETS_OFFSET,
    MEGAMORPHIC_ENTRY_CLASS_ID_OFFSET, MEGAMORPHIC_ENTRY_TARGET_OFFSET, MEGAMORPHIC_MASK_OFFSET,
};
pub use self::stubs::{RuntimeEntry, StubKind};
pub use self::subtype_test_cache::{
    instance_of_slow, SubtypeTestCache, SubtypeTestKey, SubtypeTestKind,
};

mod args_descriptor;
mod deopt_table;
mod ic_data;
mod megamorphic_cache;
mod stubs;
mod subtype_test_cache;

use crate::flags::Flags;
use crate::il::Function;
use crate::object_model::ObjectModel;

/// Everything a compilation may touch outside of its own function: flags,
/// class metadata and the process-wide tables. Tests hand in fresh tables to
/// stay isolated from each other.
pub struct CompilationContext {
    pub flags: Flags,
    pub object_model: Arc<dyn ObjectModel + Send + Sync>,
    pub deopt_table: Arc<DeoptTable>,
    pub megamorphic_caches: Arc<MegamorphicCacheTable>,
    pub arguments_descriptors: Arc<ArgumentsDescriptorTable>,
}

impl CompilationContext {
    pub fn new(
        flags: Flags,
        object_model: Arc<dyn ObjectModel + Send + Sync>,
        megamorphic_miss_handler: Arc<Function>,
    ) -> CompilationContext {
        let capacity = flags.megamorphic_initial_capacity;

        CompilationContext {
            flags,
            object_model,
            deopt_table: Arc::new(DeoptTable::new()),
            megamorphic_caches: Arc::new(MegamorphicCacheTable::new(
                megamorphic_miss_handler,
                capacity,
            )),
            arguments_descriptors: Arc::new(ArgumentsDescriptorTable::new()),
        }
    }
}
