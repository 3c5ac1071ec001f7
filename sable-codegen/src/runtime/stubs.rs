use num_enum::{IntoPrimitive, TryFromPrimitive};

use sable_asm::{RuntimeId, StubId};

/// Shared code stubs emitted code jumps or calls into.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum StubKind {
    OptimizeFunction,
    FixCallersTarget,
    Deoptimize,
    DeoptimizeLazy,
    CallStaticFunction,
    CallClosureNoSuchMethod,
    ZeroArgsUnoptimizedStaticCall,
    TwoArgsUnoptimizedStaticCall,
    OneArgCheckInlineCache,
    TwoArgsCheckInlineCache,
    OneArgOptimizedCheckInlineCache,
    TwoArgsOptimizedCheckInlineCache,
    CompileFunction,
    Subtype1TestCache,
    Subtype2TestCache,
    Subtype3TestCache,
    UnoptimizedIdenticalWithNumberCheck,
    OptimizedIdenticalWithNumberCheck,
}

impl StubKind {
    pub fn id(self) -> StubId {
        StubId(self.into())
    }

    pub fn from_id(id: StubId) -> Option<StubKind> {
        StubKind::try_from(id.0).ok()
    }

    pub fn unoptimized_static_call(num_args_tested: usize) -> StubKind {
        match num_args_tested {
            0 => StubKind::ZeroArgsUnoptimizedStaticCall,
            2 => StubKind::TwoArgsUnoptimizedStaticCall,
            _ => panic!("unsupported number of tested arguments {}", num_args_tested),
        }
    }

    pub fn check_inline_cache(num_args_tested: usize, optimized: bool) -> StubKind {
        match (num_args_tested, optimized) {
            (1, false) => StubKind::OneArgCheckInlineCache,
            (2, false) => StubKind::TwoArgsCheckInlineCache,
            (1, true) => StubKind::OneArgOptimizedCheckInlineCache,
            (2, true) => StubKind::TwoArgsOptimizedCheckInlineCache,
            _ => panic!("unsupported number of tested arguments {}", num_args_tested),
        }
    }
}

/// Runtime functions reached through the call-to-runtime trampoline.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum RuntimeEntry {
    Instanceof,
    TypeCheck,
    BadTypeError,
    StackOverflow,
}

impl RuntimeEntry {
    pub fn id(self) -> RuntimeId {
        RuntimeId(self.into())
    }

    pub fn from_id(id: RuntimeId) -> Option<RuntimeEntry> {
        RuntimeEntry::try_from(id.0).ok()
    }

    pub fn argument_count(self) -> u32 {
        match self {
            // instance, type, instantiator, instantiator type args, cache
            RuntimeEntry::Instanceof => 5,
            // same plus destination name
            RuntimeEntry::TypeCheck => 6,
            // instance, type, destination name
            RuntimeEntry::BadTypeError => 3,
            RuntimeEntry::StackOverflow => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_ids_round_trip() {
        let id = StubKind::Subtype3TestCache.id();
        assert_eq!(StubKind::from_id(id), Some(StubKind::Subtype3TestCache));
        assert_eq!(StubKind::from_id(StubId(10_000)), None);
        assert_eq!(
            RuntimeEntry::from_id(RuntimeEntry::TypeCheck.id()),
            Some(RuntimeEntry::TypeCheck)
        );
    }

    #[test]
    fn test_inline_cache_stub_selection() {
        assert_eq!(
            StubKind::check_inline_cache(2, true),
            StubKind::TwoArgsOptimizedCheckInlineCache
        );
        assert_eq!(
            StubKind::unoptimized_static_call(0),
            StubKind::ZeroArgsUnoptimizedStaticCall
        );
    }

    #[test]
    #[should_panic]
    fn test_three_tested_args_unsupported() {
        StubKind::check_inline_cache(3, false);
    }
}
