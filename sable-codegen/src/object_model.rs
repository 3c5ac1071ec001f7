use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::il::Function;
use crate::runtime::{ArgumentsDescriptor, ICData, MegamorphicCache, SubtypeTestCache};

pub type Symbol = Arc<str>;

pub fn sym(name: &str) -> Symbol {
    Arc::from(name)
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cid{}", self.0)
    }
}

pub const ILLEGAL_CID: ClassId = ClassId(0);
pub const NULL_CID: ClassId = ClassId(1);
pub const DYNAMIC_CID: ClassId = ClassId(2);
pub const VOID_CID: ClassId = ClassId(3);
pub const OBJECT_CID: ClassId = ClassId(4);
pub const BOOL_CID: ClassId = ClassId(5);
pub const SMI_CID: ClassId = ClassId(6);
pub const MINT_CID: ClassId = ClassId(7);
pub const BIGINT_CID: ClassId = ClassId(8);
pub const DOUBLE_CID: ClassId = ClassId(9);
pub const INT_INTERFACE_CID: ClassId = ClassId(10);
pub const NUMBER_CID: ClassId = ClassId(11);
pub const DOUBLE_INTERFACE_CID: ClassId = ClassId(12);
pub const STRING_INTERFACE_CID: ClassId = ClassId(13);
pub const ONE_BYTE_STRING_CID: ClassId = ClassId(14);
pub const TWO_BYTE_STRING_CID: ClassId = ClassId(15);
pub const LIST_CID: ClassId = ClassId(16);
pub const ARRAY_CID: ClassId = ClassId(17);
pub const GROWABLE_ARRAY_CID: ClassId = ClassId(18);
pub const FUNCTION_CID: ClassId = ClassId(19);
pub const CLOSURE_CID: ClassId = ClassId(20);
pub const TYPE_ARGUMENTS_CID: ClassId = ClassId(21);
pub const TYPE_CID: ClassId = ClassId(22);
// runtime internal objects: caches, descriptors, code
pub const INTERNAL_CID: ClassId = ClassId(23);
pub const NUM_PREDEFINED_CIDS: u32 = 24;

pub const SMI_BITS: u32 = 62;
pub const SMI_MIN: i64 = -(1 << SMI_BITS);
pub const SMI_MAX: i64 = (1 << SMI_BITS) - 1;

pub fn is_smi_value(value: i64) -> bool {
    (SMI_MIN..=SMI_MAX).contains(&value)
}

pub fn is_integer_cid(cid: ClassId) -> bool {
    cid == SMI_CID || cid == MINT_CID || cid == BIGINT_CID
}

pub fn is_string_cid(cid: ClassId) -> bool {
    cid == ONE_BYTE_STRING_CID || cid == TWO_BYTE_STRING_CID
}

pub fn is_list_cid(cid: ClassId) -> bool {
    cid == ARRAY_CID || cid == GROWABLE_ARRAY_CID
}

// Field offsets of runtime objects read by emitted code, in bytes from the
// object start.
pub const FUNCTION_CODE_OFFSET: i32 = 8;
pub const FUNCTION_USAGE_COUNTER_OFFSET: i32 = 16;
pub const CODE_ENTRY_POINT_OFFSET: i32 = 8;
pub const CLASS_SUPERCLASS_ID_OFFSET: i32 = 16;
pub const TYPE_ARGUMENTS_TYPES_OFFSET: i32 = 16;
pub const ARRAY_DATA_OFFSET: i32 = 16;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeParameter {
    pub index: usize,
    pub name: Symbol,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Type {
    pub class_id: ClassId,
    pub arguments: Option<TypeArguments>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum AbstractType {
    Dynamic,
    Void,
    Class(Type),
    Parameter(TypeParameter),
    Malformed(Symbol),
}

impl AbstractType {
    pub fn class(cid: ClassId) -> AbstractType {
        AbstractType::Class(Type {
            class_id: cid,
            arguments: None,
        })
    }

    pub fn generic(cid: ClassId, arguments: Vec<AbstractType>) -> AbstractType {
        AbstractType::Class(Type {
            class_id: cid,
            arguments: Some(TypeArguments::new(arguments)),
        })
    }

    pub fn parameter(index: usize, name: &str) -> AbstractType {
        AbstractType::Parameter(TypeParameter {
            index,
            name: sym(name),
        })
    }

    pub fn object() -> AbstractType {
        AbstractType::class(OBJECT_CID)
    }

    pub fn int() -> AbstractType {
        AbstractType::class(INT_INTERFACE_CID)
    }

    pub fn number() -> AbstractType {
        AbstractType::class(NUMBER_CID)
    }

    pub fn double() -> AbstractType {
        AbstractType::class(DOUBLE_INTERFACE_CID)
    }

    pub fn string() -> AbstractType {
        AbstractType::class(STRING_INTERFACE_CID)
    }

    pub fn bool() -> AbstractType {
        AbstractType::class(BOOL_CID)
    }

    pub fn function() -> AbstractType {
        AbstractType::class(FUNCTION_CID)
    }

    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            AbstractType::Class(ty) => Some(ty.class_id),
            _ => None,
        }
    }

    pub fn arguments(&self) -> Option<&TypeArguments> {
        match self {
            AbstractType::Class(ty) => ty.arguments.as_ref(),
            _ => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, AbstractType::Dynamic)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, AbstractType::Void)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, AbstractType::Malformed(_))
    }

    pub fn is_type_parameter(&self) -> bool {
        matches!(self, AbstractType::Parameter(_))
    }

    fn is_class(&self, cid: ClassId) -> bool {
        self.class_id() == Some(cid)
    }

    pub fn is_object(&self) -> bool {
        self.is_class(OBJECT_CID)
    }

    pub fn is_null_type(&self) -> bool {
        self.is_class(NULL_CID)
    }

    pub fn is_int(&self) -> bool {
        self.is_class(INT_INTERFACE_CID)
    }

    pub fn is_number(&self) -> bool {
        self.is_class(NUMBER_CID)
    }

    pub fn is_double(&self) -> bool {
        self.is_class(DOUBLE_INTERFACE_CID)
    }

    pub fn is_string(&self) -> bool {
        self.is_class(STRING_INTERFACE_CID)
    }

    pub fn is_bool(&self) -> bool {
        self.is_class(BOOL_CID)
    }

    pub fn is_function(&self) -> bool {
        self.is_class(FUNCTION_CID)
    }

    /// Top types accept every instance including null.
    pub fn is_top(&self) -> bool {
        self.is_dynamic() || self.is_object()
    }

    pub fn is_instantiated(&self) -> bool {
        match self {
            AbstractType::Parameter(_) => false,
            AbstractType::Class(ty) => ty
                .arguments
                .as_ref()
                .map_or(true, |args| args.is_instantiated()),
            AbstractType::Dynamic | AbstractType::Void | AbstractType::Malformed(_) => true,
        }
    }

    /// No type arguments or only `dynamic` ones.
    pub fn is_raw(&self) -> bool {
        match self {
            AbstractType::Class(ty) => ty.arguments.as_ref().map_or(true, |args| args.is_raw()),
            _ => false,
        }
    }

    /// Replaces type parameters by the instantiator's arguments. A missing
    /// instantiator stands for an all-dynamic vector.
    pub fn instantiate_from(&self, instantiator: Option<&TypeArguments>) -> AbstractType {
        match self {
            AbstractType::Parameter(param) => instantiator
                .and_then(|args| args.get(param.index))
                .cloned()
                .unwrap_or(AbstractType::Dynamic),
            AbstractType::Class(ty) => AbstractType::Class(Type {
                class_id: ty.class_id,
                arguments: ty
                    .arguments
                    .as_ref()
                    .map(|args| args.instantiate_from(instantiator)),
            }),
            other => other.clone(),
        }
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AbstractType::Dynamic => write!(f, "dynamic"),
            AbstractType::Void => write!(f, "void"),
            AbstractType::Parameter(param) => write!(f, "{}", param.name),
            AbstractType::Malformed(msg) => write!(f, "<malformed: {}>", msg),
            AbstractType::Class(ty) => {
                write!(f, "{}", ty.class_id)?;
                if let Some(ref args) = ty.arguments {
                    write!(f, "<")?;
                    for (idx, arg) in args.types().iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeArguments(Arc<Vec<AbstractType>>);

impl TypeArguments {
    pub fn new(types: Vec<AbstractType>) -> TypeArguments {
        TypeArguments(Arc::new(types))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&AbstractType> {
        self.0.get(idx)
    }

    pub fn types(&self) -> &[AbstractType] {
        &self.0
    }

    pub fn is_instantiated(&self) -> bool {
        self.0.iter().all(|ty| ty.is_instantiated())
    }

    pub fn is_raw(&self) -> bool {
        self.0.iter().all(|ty| ty.is_dynamic())
    }

    pub fn instantiate_from(&self, instantiator: Option<&TypeArguments>) -> TypeArguments {
        TypeArguments::new(
            self.0
                .iter()
                .map(|ty| ty.instantiate_from(instantiator))
                .collect(),
        )
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class_id: ClassId,
    pub type_arguments: Option<TypeArguments>,
    pub fields: Vec<Object>,
}

/// Constants embedded in code and the values the runtime hands around.
/// Runtime-mutable objects are shared handles and compare by identity.
#[derive(Clone, Debug)]
pub enum Object {
    Null,
    Bool(bool),
    Smi(i64),
    Mint(i64),
    Double(u64),
    String(Symbol),
    Type(AbstractType),
    TypeArguments(TypeArguments),
    Function(Arc<Function>),
    Instance(Arc<Instance>),
    Array(Arc<Vec<Object>>),
    ArgumentsDescriptor(Arc<ArgumentsDescriptor>),
    ICData(Arc<ICData>),
    SubtypeTestCache(Arc<SubtypeTestCache>),
    MegamorphicCache(Arc<MegamorphicCache>),
    TransitionSentinel,
}

impl Object {
    pub fn int(value: i64) -> Object {
        if is_smi_value(value) {
            Object::Smi(value)
        } else {
            Object::Mint(value)
        }
    }

    pub fn double(value: f64) -> Object {
        Object::Double(value.to_bits())
    }

    pub fn string(value: &str) -> Object {
        Object::String(sym(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn is_smi(&self) -> bool {
        matches!(self, Object::Smi(_))
    }

    pub fn class_id(&self) -> ClassId {
        match self {
            Object::Null => NULL_CID,
            Object::Bool(_) => BOOL_CID,
            Object::Smi(_) => SMI_CID,
            Object::Mint(_) => MINT_CID,
            Object::Double(_) => DOUBLE_CID,
            Object::String(value) => {
                if value.is_ascii() {
                    ONE_BYTE_STRING_CID
                } else {
                    TWO_BYTE_STRING_CID
                }
            }
            Object::Type(_) => TYPE_CID,
            Object::TypeArguments(_) => TYPE_ARGUMENTS_CID,
            Object::Function(_) => CLOSURE_CID,
            Object::Instance(instance) => instance.class_id,
            Object::Array(_) => ARRAY_CID,
            Object::ArgumentsDescriptor(_)
            | Object::ICData(_)
            | Object::SubtypeTestCache(_)
            | Object::MegamorphicCache(_)
            | Object::TransitionSentinel => INTERNAL_CID,
        }
    }

    pub fn type_arguments(&self) -> Option<&TypeArguments> {
        match self {
            Object::Instance(instance) => instance.type_arguments.as_ref(),
            _ => None,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Null, Object::Null) => true,
            (Object::TransitionSentinel, Object::TransitionSentinel) => true,
            (Object::Bool(l), Object::Bool(r)) => l == r,
            (Object::Smi(l), Object::Smi(r)) => l == r,
            (Object::Mint(l), Object::Mint(r)) => l == r,
            (Object::Double(l), Object::Double(r)) => l == r,
            (Object::String(l), Object::String(r)) => l == r,
            (Object::Type(l), Object::Type(r)) => l == r,
            (Object::TypeArguments(l), Object::TypeArguments(r)) => l == r,
            (Object::Function(l), Object::Function(r)) => l.id == r.id,
            (Object::Instance(l), Object::Instance(r)) => Arc::ptr_eq(l, r),
            (Object::Array(l), Object::Array(r)) => Arc::ptr_eq(l, r),
            (Object::ArgumentsDescriptor(l), Object::ArgumentsDescriptor(r)) => Arc::ptr_eq(l, r),
            (Object::ICData(l), Object::ICData(r)) => Arc::ptr_eq(l, r),
            (Object::SubtypeTestCache(l), Object::SubtypeTestCache(r)) => Arc::ptr_eq(l, r),
            (Object::MegamorphicCache(l), Object::MegamorphicCache(r)) => Arc::ptr_eq(l, r),
            _ => false,
        }
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);

        match self {
            Object::Null | Object::TransitionSentinel => {}
            Object::Bool(value) => value.hash(state),
            Object::Smi(value) | Object::Mint(value) => value.hash(state),
            Object::Double(bits) => bits.hash(state),
            Object::String(value) => value.hash(state),
            Object::Type(ty) => ty.hash(state),
            Object::TypeArguments(args) => args.hash(state),
            Object::Function(function) => function.id.hash(state),
            Object::Instance(value) => (Arc::as_ptr(value) as usize).hash(state),
            Object::Array(value) => (Arc::as_ptr(value) as usize).hash(state),
            Object::ArgumentsDescriptor(value) => (Arc::as_ptr(value) as usize).hash(state),
            Object::ICData(value) => (Arc::as_ptr(value) as usize).hash(state),
            Object::SubtypeTestCache(value) => (Arc::as_ptr(value) as usize).hash(state),
            Object::MegamorphicCache(value) => (Arc::as_ptr(value) as usize).hash(state),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClassData {
    pub id: ClassId,
    pub name: Symbol,
    pub superclass: Option<AbstractType>,
    pub interfaces: Vec<AbstractType>,
    pub num_type_parameters: usize,
    pub is_signature_class: bool,
}

/// Class metadata as seen by the code generator.
pub trait ObjectModel {
    fn class(&self, cid: ClassId) -> Option<&ClassData>;

    /// Whether any other class extends or implements `cid`.
    fn has_subtypes(&self, cid: ClassId) -> bool;

    fn superclass(&self, cid: ClassId) -> Option<ClassId> {
        self.class(cid)
            .and_then(|cls| cls.superclass.as_ref())
            .and_then(|ty| ty.class_id())
    }

    fn num_type_arguments(&self, cid: ClassId) -> usize {
        self.class(cid).map_or(0, |cls| cls.num_type_parameters)
    }

    fn is_signature_class(&self, cid: ClassId) -> bool {
        self.class(cid).map_or(false, |cls| cls.is_signature_class)
    }

    fn is_leaf(&self, cid: ClassId) -> bool {
        !self.has_subtypes(cid)
    }

    /// Follows the superclass chain only.
    fn is_subclass_of(&self, cid: ClassId, other: ClassId) -> bool {
        let mut current = Some(cid);

        while let Some(cid) = current {
            if cid == other {
                return true;
            }
            current = self.superclass(cid);
        }

        false
    }

    fn is_subtype_of(&self, sub: &AbstractType, sup: &AbstractType) -> bool {
        match (sub, sup) {
            (_, AbstractType::Dynamic) | (AbstractType::Dynamic, _) => true,
            (AbstractType::Void, AbstractType::Void) => true,
            (AbstractType::Void, _) | (_, AbstractType::Void) => false,
            (AbstractType::Malformed(_), _) | (_, AbstractType::Malformed(_)) => false,
            (AbstractType::Parameter(l), AbstractType::Parameter(r)) => l == r,
            (AbstractType::Parameter(_), _) | (_, AbstractType::Parameter(_)) => false,
            (AbstractType::Class(sub_ty), AbstractType::Class(sup_ty)) => {
                if sup_ty.class_id == OBJECT_CID || sub_ty.class_id == NULL_CID {
                    return true;
                }

                if sub_ty.class_id == sup_ty.class_id {
                    let len = self.num_type_arguments(sub_ty.class_id);

                    return (0..len).all(|idx| {
                        let sub_arg = type_argument_at(sub_ty, idx);
                        let sup_arg = type_argument_at(sup_ty, idx);
                        self.is_subtype_of(&sub_arg, &sup_arg)
                    });
                }

                let cls = match self.class(sub_ty.class_id) {
                    Some(cls) => cls,
                    None => return false,
                };

                cls.superclass
                    .iter()
                    .chain(cls.interfaces.iter())
                    .any(|super_ty| {
                        let super_ty = super_ty.instantiate_from(sub_ty.arguments.as_ref());
                        self.is_subtype_of(&super_ty, sup)
                    })
            }
        }
    }

    /// Full `instance is ty` relation, used by the runtime slow path.
    fn instance_of(
        &self,
        instance: &Object,
        ty: &AbstractType,
        instantiator: Option<&TypeArguments>,
    ) -> bool {
        let ty = ty.instantiate_from(instantiator);

        if instance.is_null() {
            return ty.is_top() || ty.is_null_type();
        }

        let runtime_type = AbstractType::Class(Type {
            class_id: instance.class_id(),
            arguments: instance.type_arguments().cloned(),
        });

        self.is_subtype_of(&runtime_type, &ty)
    }
}

fn type_argument_at(ty: &Type, idx: usize) -> AbstractType {
    ty.arguments
        .as_ref()
        .and_then(|args| args.get(idx))
        .cloned()
        .unwrap_or(AbstractType::Dynamic)
}

pub struct ClassTable {
    classes: Vec<ClassData>,
}

impl ClassTable {
    pub fn new() -> ClassTable {
        let mut table = ClassTable {
            classes: Vec::new(),
        };

        let object = Some(AbstractType::object());
        let int = AbstractType::int();
        let number = AbstractType::number();
        let string = AbstractType::string();
        let list = AbstractType::generic(LIST_CID, vec![AbstractType::parameter(0, "E")]);

        table.register(ILLEGAL_CID, "<illegal>", None, vec![], 0);
        table.register(NULL_CID, "Null", object.clone(), vec![], 0);
        table.register(DYNAMIC_CID, "dynamic", None, vec![], 0);
        table.register(VOID_CID, "void", None, vec![], 0);
        table.register(OBJECT_CID, "Object", None, vec![], 0);
        table.register(BOOL_CID, "bool", object.clone(), vec![], 0);
        table.register(SMI_CID, "_Smi", object.clone(), vec![int.clone()], 0);
        table.register(MINT_CID, "_Mint", object.clone(), vec![int.clone()], 0);
        table.register(BIGINT_CID, "_Bigint", object.clone(), vec![int], 0);
        table.register(
            DOUBLE_CID,
            "_Double",
            object.clone(),
            vec![AbstractType::double()],
            0,
        );
        table.register(
            INT_INTERFACE_CID,
            "int",
            object.clone(),
            vec![number.clone()],
            0,
        );
        table.register(NUMBER_CID, "num", object.clone(), vec![], 0);
        table.register(DOUBLE_INTERFACE_CID, "double", object.clone(), vec![number], 0);
        table.register(STRING_INTERFACE_CID, "String", object.clone(), vec![], 0);
        table.register(
            ONE_BYTE_STRING_CID,
            "_OneByteString",
            object.clone(),
            vec![string.clone()],
            0,
        );
        table.register(
            TWO_BYTE_STRING_CID,
            "_TwoByteString",
            object.clone(),
            vec![string],
            0,
        );
        table.register(LIST_CID, "List", object.clone(), vec![], 1);
        table.register(ARRAY_CID, "_List", object.clone(), vec![list.clone()], 1);
        table.register(
            GROWABLE_ARRAY_CID,
            "_GrowableList",
            object.clone(),
            vec![list],
            1,
        );
        table.register(FUNCTION_CID, "Function", object.clone(), vec![], 0);
        table.register(
            CLOSURE_CID,
            "_Closure",
            object.clone(),
            vec![AbstractType::function()],
            0,
        );
        table.register(TYPE_ARGUMENTS_CID, "TypeArguments", object.clone(), vec![], 0);
        table.register(TYPE_CID, "Type", object.clone(), vec![], 0);
        table.register(INTERNAL_CID, "<internal>", object, vec![], 0);

        debug_assert_eq!(table.classes.len(), NUM_PREDEFINED_CIDS as usize);
        table
    }

    fn register(
        &mut self,
        cid: ClassId,
        name: &str,
        superclass: Option<AbstractType>,
        interfaces: Vec<AbstractType>,
        num_type_parameters: usize,
    ) {
        assert_eq!(cid.to_usize(), self.classes.len());
        self.classes.push(ClassData {
            id: cid,
            name: sym(name),
            superclass,
            interfaces,
            num_type_parameters,
            is_signature_class: false,
        });
    }

    /// Registers a user class. A missing superclass means `Object`.
    pub fn add_class(
        &mut self,
        name: &str,
        superclass: Option<AbstractType>,
        interfaces: Vec<AbstractType>,
        num_type_parameters: usize,
    ) -> ClassId {
        let cid = ClassId(self.classes.len() as u32);
        let superclass = superclass.or_else(|| Some(AbstractType::object()));
        self.register(cid, name, superclass, interfaces, num_type_parameters);
        cid
    }

    pub fn add_signature_class(&mut self, name: &str) -> ClassId {
        let cid = self.add_class(name, None, vec![AbstractType::function()], 0);
        self.classes[cid.to_usize()].is_signature_class = true;
        cid
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassTable {
    fn default() -> ClassTable {
        ClassTable::new()
    }
}

impl ObjectModel for ClassTable {
    fn class(&self, cid: ClassId) -> Option<&ClassData> {
        self.classes.get(cid.to_usize())
    }

    fn has_subtypes(&self, cid: ClassId) -> bool {
        self.classes.iter().any(|cls| {
            cls.id != cid
                && cls
                    .superclass
                    .iter()
                    .chain(cls.interfaces.iter())
                    .any(|ty| ty.class_id() == Some(cid))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_tower() {
        let table = ClassTable::new();

        assert!(table.instance_of(&Object::Smi(1), &AbstractType::int(), None));
        assert!(table.instance_of(&Object::Smi(1), &AbstractType::number(), None));
        assert!(table.instance_of(&Object::int(i64::MAX), &AbstractType::int(), None));
        assert!(!table.instance_of(&Object::Smi(1), &AbstractType::double(), None));
        assert!(table.instance_of(&Object::double(1.5), &AbstractType::number(), None));
        assert!(!table.instance_of(&Object::double(1.5), &AbstractType::string(), None));
    }

    #[test]
    fn test_null_instance_of() {
        let table = ClassTable::new();

        assert!(table.instance_of(&Object::Null, &AbstractType::object(), None));
        assert!(table.instance_of(&Object::Null, &AbstractType::Dynamic, None));
        assert!(!table.instance_of(&Object::Null, &AbstractType::int(), None));
    }

    #[test]
    fn test_generic_subtyping() {
        let mut table = ClassTable::new();
        let a = table.add_class("A", None, vec![], 0);
        let b = table.add_class("B", Some(AbstractType::class(a)), vec![], 0);
        let boxed = table.add_class("Box", None, vec![], 1);

        let box_of_b = Object::Instance(Arc::new(Instance {
            class_id: boxed,
            type_arguments: Some(TypeArguments::new(vec![AbstractType::class(b)])),
            fields: Vec::new(),
        }));

        let box_a = AbstractType::generic(boxed, vec![AbstractType::class(a)]);
        let box_int = AbstractType::generic(boxed, vec![AbstractType::int()]);
        assert!(table.instance_of(&box_of_b, &box_a, None));
        assert!(!table.instance_of(&box_of_b, &box_int, None));
        assert!(table.instance_of(&box_of_b, &AbstractType::class(boxed), None));
    }

    #[test]
    fn test_list_implementations() {
        let table = ClassTable::new();
        let array = Object::Instance(Arc::new(Instance {
            class_id: ARRAY_CID,
            type_arguments: Some(TypeArguments::new(vec![AbstractType::int()])),
            fields: Vec::new(),
        }));

        let list_num = AbstractType::generic(LIST_CID, vec![AbstractType::number()]);
        let list_string = AbstractType::generic(LIST_CID, vec![AbstractType::string()]);
        assert!(table.instance_of(&array, &list_num, None));
        assert!(!table.instance_of(&array, &list_string, None));
    }

    #[test]
    fn test_type_parameter_instantiation() {
        let table = ClassTable::new();
        let param = AbstractType::parameter(0, "T");
        let args = TypeArguments::new(vec![AbstractType::string()]);

        assert!(table.instance_of(&Object::string("x"), &param, Some(&args)));
        assert!(!table.instance_of(&Object::Smi(2), &param, Some(&args)));
        // without instantiator the parameter is dynamic
        assert!(table.instance_of(&Object::Smi(2), &param, None));
    }

    #[test]
    fn test_leaf_and_subclass() {
        let mut table = ClassTable::new();
        let a = table.add_class("A", None, vec![], 0);
        let b = table.add_class("B", Some(AbstractType::class(a)), vec![], 0);

        assert!(!table.is_leaf(a));
        assert!(table.is_leaf(b));
        assert!(table.is_subclass_of(b, a));
        assert!(!table.is_subclass_of(a, b));
        assert!(!table.is_leaf(INT_INTERFACE_CID));
    }

    #[test]
    fn test_raw_and_instantiated() {
        let raw = AbstractType::generic(LIST_CID, vec![AbstractType::Dynamic]);
        let list_t = AbstractType::generic(LIST_CID, vec![AbstractType::parameter(0, "T")]);

        assert!(raw.is_raw());
        assert!(raw.is_instantiated());
        assert!(!list_t.is_instantiated());
        assert!(!list_t.is_raw());
        assert!(AbstractType::class(OBJECT_CID).is_raw());
    }
}
