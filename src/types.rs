//! Host type model. Types are described once at registration time through
//! [`TypeBuilder`]; reflective access goes through the closures stored in the
//! member descriptors.
use crate::host::{
    GenericTypeGroup, HostArray, HostEntity, HostError, HostObject, HostResult, HostValue,
};
use crate::marshal::MarshalKind;
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    String,
    Pointer,
    /// Root of the hierarchy; accepts any value.
    Object,
    /// Raw scripting value passed through untouched.
    Script,
}

impl Primitive {
    const ALL: [Primitive; 17] = [
        Primitive::Void,
        Primitive::Bool,
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
        Primitive::Char,
        Primitive::String,
        Primitive::Pointer,
        Primitive::Object,
        Primitive::Script,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Void => "void",
            Primitive::Bool => "bool",
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Char => "char",
            Primitive::String => "string",
            Primitive::Pointer => "pointer",
            Primitive::Object => "object",
            Primitive::Script => "script",
        }
    }

    fn is_value_type(self) -> bool {
        !matches!(
            self,
            Primitive::String | Primitive::Object | Primitive::Script | Primitive::Void
        )
    }

    fn default_value(self) -> HostValue {
        match self {
            Primitive::Bool => HostValue::Bool(false),
            Primitive::I8 => HostValue::I8(0),
            Primitive::I16 => HostValue::I16(0),
            Primitive::I32 => HostValue::I32(0),
            Primitive::I64 => HostValue::I64(0),
            Primitive::U8 => HostValue::U8(0),
            Primitive::U16 => HostValue::U16(0),
            Primitive::U32 => HostValue::U32(0),
            Primitive::U64 => HostValue::U64(0),
            Primitive::F32 => HostValue::F32(0.0),
            Primitive::F64 => HostValue::F64(0.0),
            Primitive::Char => HostValue::Char('\0'),
            Primitive::Pointer => HostValue::Pointer(0),
            _ => HostValue::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Clone)]
pub enum TypeShape {
    Primitive(Primitive),
    Class,
    Struct { byref_like: bool },
    Enum { repr: Primitive },
    Nullable(TypeRef),
    Array { element: TypeRef, rank: usize },
}

#[derive(Clone)]
pub enum Constraint {
    ValueType,
    ReferenceType,
    DefaultConstructor,
    Subtype(TypeRef),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::ValueType => f.write_str("struct"),
            Constraint::ReferenceType => f.write_str("class"),
            Constraint::DefaultConstructor => f.write_str("new()"),
            Constraint::Subtype(ty) => f.write_str(&ty.full_name()),
        }
    }
}

#[derive(Clone)]
pub struct GenericParam {
    pub name: String,
    pub constraints: Vec<Constraint>,
}

impl GenericParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    fn check(&self, argument: &TypeRef) -> HostResult<()> {
        for constraint in &self.constraints {
            let satisfied = match constraint {
                Constraint::ValueType => {
                    argument.is_value_type() && argument.nullable_inner().is_none()
                }
                Constraint::ReferenceType => !argument.is_value_type(),
                Constraint::DefaultConstructor => {
                    argument.is_value_type()
                        || argument
                            .members()
                            .constructors
                            .iter()
                            .any(|ctor| {
                                ctor.params.is_empty() && ctor.visibility == Visibility::Public
                            })
                }
                Constraint::Subtype(base) => base.is_assignable_from(argument),
            };
            if !satisfied {
                return Err(HostError::ConstraintViolation {
                    parameter: self.name.clone(),
                    argument: argument.full_name(),
                    constraint: constraint.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn check_generic_arguments(
    name: &str,
    params: &[GenericParam],
    args: &[TypeRef],
) -> HostResult<()> {
    if params.len() != args.len() {
        return Err(HostError::GenericArity {
            name: name.to_string(),
            expected: params.len(),
            found: args.len(),
        });
    }
    params
        .iter()
        .zip(args)
        .try_for_each(|(param, arg)| param.check(arg))
}

/// Populates an instantiated generic type from its type arguments.
pub type GenericFactory = Rc<dyn Fn(&mut TypeBuilder, &[TypeRef])>;

#[derive(Clone)]
pub enum GenericShape {
    None,
    Definition {
        params: Vec<GenericParam>,
        factory: GenericFactory,
    },
    Instance {
        definition: TypeRef,
        args: Vec<TypeRef>,
    },
}

pub type Getter = Rc<dyn Fn(Option<&HostObject>) -> HostResult<HostValue>>;
pub type Setter = Rc<dyn Fn(Option<&HostObject>, HostValue) -> HostResult<()>>;
pub type Invoker = Rc<dyn Fn(Option<&HostObject>, Vec<HostValue>) -> HostResult<HostValue>>;
pub type IndexGetter = Rc<dyn Fn(&HostObject, Vec<HostValue>) -> HostResult<HostValue>>;
pub type IndexSetter = Rc<dyn Fn(&HostObject, Vec<HostValue>, HostValue) -> HostResult<()>>;

#[derive(Clone)]
pub enum FieldAccess {
    /// Compile-time constant.
    Literal(HostValue),
    ReadOnly(Getter),
    Mutable(Getter, Setter),
}

#[derive(Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
    pub visibility: Visibility,
    pub access: FieldAccess,
}

#[derive(Clone)]
pub struct Accessor<F> {
    pub visibility: Visibility,
    pub body: F,
}

impl<F> Accessor<F> {
    pub fn public(body: F) -> Self {
        Self {
            visibility: Visibility::Public,
            body,
        }
    }

    pub fn private(body: F) -> Self {
        Self {
            visibility: Visibility::Private,
            body,
        }
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

#[derive(Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
    /// Returns a reference into host storage rather than a value.
    pub by_ref: bool,
    pub getter: Option<Accessor<Getter>>,
    pub setter: Option<Accessor<Setter>>,
}

impl PropertyInfo {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            is_static: false,
            by_ref: false,
            getter: None,
            setter: None,
        }
    }

    pub fn get(
        mut self,
        body: impl Fn(Option<&HostObject>) -> HostResult<HostValue> + 'static,
    ) -> Self {
        self.getter = Some(Accessor::public(Rc::new(body)));
        self
    }

    pub fn set(
        mut self,
        body: impl Fn(Option<&HostObject>, HostValue) -> HostResult<()> + 'static,
    ) -> Self {
        self.setter = Some(Accessor::public(Rc::new(body)));
        self
    }

    pub fn private_set(
        mut self,
        body: impl Fn(Option<&HostObject>, HostValue) -> HostResult<()> + 'static,
    ) -> Self {
        self.setter = Some(Accessor::private(Rc::new(body)));
        self
    }

    pub fn private_get(
        mut self,
        body: impl Fn(Option<&HostObject>) -> HostResult<HostValue> + 'static,
    ) -> Self {
        self.getter = Some(Accessor::private(Rc::new(body)));
        self
    }

    pub fn by_ref(mut self) -> Self {
        self.by_ref = true;
        self
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }
}

#[derive(Clone)]
pub enum ParamKind {
    Required,
    Optional(HostValue),
    /// Trailing variadic parameter; `ty` is the element type.
    Params,
}

#[derive(Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeRef,
    pub kind: ParamKind,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            kind: ParamKind::Required,
        }
    }

    pub fn optional(mut self, default: HostValue) -> Self {
        self.kind = ParamKind::Optional(default);
        self
    }

    pub fn params(name: impl Into<String>, element: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty: element,
            kind: ParamKind::Params,
        }
    }

    pub fn is_params(&self) -> bool {
        matches!(self.kind, ParamKind::Params)
    }
}

pub type GenericMethodFactory = Rc<dyn Fn(&[TypeRef]) -> MethodInfo>;

#[derive(Clone)]
pub enum MethodBody {
    Native(Invoker),
    Generic {
        params: Vec<GenericParam>,
        instantiate: GenericMethodFactory,
    },
}

#[derive(Clone)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub ret: TypeRef,
    pub is_static: bool,
    pub visibility: Visibility,
    pub body: MethodBody,
}

impl MethodInfo {
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamInfo>,
        ret: TypeRef,
        body: impl Fn(Option<&HostObject>, Vec<HostValue>) -> HostResult<HostValue> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            is_static: false,
            visibility: Visibility::Public,
            body: MethodBody::Native(Rc::new(body)),
        }
    }

    /// Generic method definition; `instantiate` receives validated type
    /// arguments and returns the closed method.
    pub fn generic(
        name: impl Into<String>,
        generic_params: Vec<GenericParam>,
        instantiate: impl Fn(&[TypeRef]) -> MethodInfo + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret: TypeRef::primitive(Primitive::Void),
            is_static: false,
            visibility: Visibility::Public,
            body: MethodBody::Generic {
                params: generic_params,
                instantiate: Rc::new(instantiate),
            },
        }
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.body, MethodBody::Generic { .. })
    }

    pub fn generic_arity(&self) -> usize {
        match &self.body {
            MethodBody::Generic { params, .. } => params.len(),
            MethodBody::Native(_) => 0,
        }
    }

    /// Closes a generic method over `args`, enforcing arity and constraints.
    pub fn make_generic(&self, args: &[TypeRef]) -> HostResult<MethodInfo> {
        match &self.body {
            MethodBody::Generic {
                params,
                instantiate,
            } => {
                check_generic_arguments(&self.name, params, args)?;
                let mut method = instantiate(args);
                method.is_static = self.is_static;
                Ok(method)
            }
            MethodBody::Native(_) => Err(HostError::NotGeneric(self.name.clone())),
        }
    }
}

#[derive(Clone)]
pub struct IndexerInfo {
    pub params: Vec<ParamInfo>,
    pub ty: TypeRef,
    pub getter: Option<Accessor<IndexGetter>>,
    pub setter: Option<Accessor<IndexSetter>>,
}

impl IndexerInfo {
    pub fn new(params: Vec<ParamInfo>, ty: TypeRef) -> Self {
        Self {
            params,
            ty,
            getter: None,
            setter: None,
        }
    }

    pub fn get(
        mut self,
        body: impl Fn(&HostObject, Vec<HostValue>) -> HostResult<HostValue> + 'static,
    ) -> Self {
        self.getter = Some(Accessor::public(Rc::new(body)));
        self
    }

    pub fn set(
        mut self,
        body: impl Fn(&HostObject, Vec<HostValue>, HostValue) -> HostResult<()> + 'static,
    ) -> Self {
        self.setter = Some(Accessor::public(Rc::new(body)));
        self
    }
}

#[derive(Clone, Default)]
pub struct Members {
    pub base: Option<TypeRef>,
    pub fields: Vec<FieldInfo>,
    pub properties: Vec<PropertyInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<MethodInfo>,
    pub indexers: Vec<IndexerInfo>,
    pub nested: Vec<TypeRef>,
    pub default: Option<Rc<dyn Fn() -> HostValue>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Derived {
    Array(usize),
    Nullable,
}

pub struct TypeInfo {
    name: String,
    namespace: String,
    shape: TypeShape,
    generic: GenericShape,
    members: OnceCell<Members>,
    instantiations: RefCell<HashMap<Vec<TypeRef>, TypeRef>>,
    derived: RefCell<HashMap<Derived, TypeRef>>,
    marshal_kind: OnceCell<MarshalKind>,
}

/// Shared, identity-compared reference to a host type.
#[derive(Clone)]
pub struct TypeRef(Rc<TypeInfo>);

thread_local! {
    static PRIMITIVES: Vec<TypeRef> = Primitive::ALL
        .iter()
        .map(|&primitive| {
            let shape = TypeShape::Primitive(primitive);
            TypeRef::declare(primitive.name(), "", shape, GenericShape::None)
        })
        .collect();
}

impl TypeRef {
    fn declare(
        name: impl Into<String>,
        namespace: impl Into<String>,
        shape: TypeShape,
        generic: GenericShape,
    ) -> Self {
        TypeRef(Rc::new(TypeInfo {
            name: name.into(),
            namespace: namespace.into(),
            shape,
            generic,
            members: OnceCell::new(),
            instantiations: RefCell::new(HashMap::new()),
            derived: RefCell::new(HashMap::new()),
            marshal_kind: OnceCell::new(),
        }))
    }

    pub fn primitive(primitive: Primitive) -> TypeRef {
        let index = Primitive::ALL
            .iter()
            .position(|candidate| *candidate == primitive)
            .unwrap_or(0);
        PRIMITIVES.with(|table| table[index].clone())
    }

    pub fn ptr_eq(&self, other: &TypeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn full_name(&self) -> String {
        let mut full = if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        };
        if let GenericShape::Instance { args, .. } = &self.generic {
            let names: Vec<String> = args.iter().map(TypeRef::full_name).collect();
            full.push('[');
            full.push_str(&names.join(","));
            full.push(']');
        }
        full
    }

    /// Name without the generic arity suffix (``List`1`` → `List`).
    pub fn base_name(&self) -> &str {
        self.name.split('`').next().unwrap_or(&self.name)
    }

    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    pub fn generic(&self) -> &GenericShape {
        &self.generic
    }

    pub fn members(&self) -> &Members {
        self.members.get_or_init(Members::default)
    }

    pub fn base(&self) -> Option<&TypeRef> {
        self.members().base.as_ref()
    }

    pub(crate) fn marshal_kind_cell(&self) -> &OnceCell<MarshalKind> {
        &self.marshal_kind
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.shape {
            TypeShape::Primitive(primitive) => Some(primitive),
            _ => None,
        }
    }

    pub fn is_value_type(&self) -> bool {
        match &self.shape {
            TypeShape::Primitive(primitive) => primitive.is_value_type(),
            TypeShape::Struct { .. } | TypeShape::Enum { .. } | TypeShape::Nullable(_) => true,
            TypeShape::Class | TypeShape::Array { .. } => false,
        }
    }

    pub fn is_byref_like(&self) -> bool {
        matches!(self.shape, TypeShape::Struct { byref_like: true })
    }

    pub fn nullable_inner(&self) -> Option<&TypeRef> {
        match &self.shape {
            TypeShape::Nullable(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn array_shape(&self) -> Option<(&TypeRef, usize)> {
        match &self.shape {
            TypeShape::Array { element, rank } => Some((element, *rank)),
            _ => None,
        }
    }

    pub fn is_generic_definition(&self) -> bool {
        matches!(self.generic, GenericShape::Definition { .. })
    }

    pub fn generic_arity(&self) -> usize {
        match &self.generic {
            GenericShape::Definition { params, .. } => params.len(),
            GenericShape::Instance { args, .. } => args.len(),
            GenericShape::None => 0,
        }
    }

    pub fn generic_args(&self) -> &[TypeRef] {
        match &self.generic {
            GenericShape::Instance { args, .. } => args,
            _ => &[],
        }
    }

    /// `true` when a value of `source` can be stored in a slot of this type.
    pub fn is_assignable_from(&self, source: &TypeRef) -> bool {
        if self.as_primitive() == Some(Primitive::Object) {
            return true;
        }
        if let Some(inner) = self.nullable_inner() {
            if inner == source {
                return true;
            }
        }
        let mut current = Some(source.clone());
        while let Some(ty) = current {
            if &ty == self {
                return true;
            }
            current = ty.base().cloned();
        }
        false
    }

    pub fn default_value(&self) -> HostValue {
        match &self.shape {
            TypeShape::Primitive(primitive) => primitive.default_value(),
            TypeShape::Enum { .. } => HostValue::Enum {
                ty: self.clone(),
                value: 0,
            },
            TypeShape::Struct { .. } => self
                .members()
                .default
                .as_ref()
                .map(|make| make())
                .unwrap_or(HostValue::Null),
            _ => HostValue::Null,
        }
    }

    fn derived(&self, key: Derived, make: impl FnOnce() -> TypeRef) -> TypeRef {
        if let Some(existing) = self.derived.borrow().get(&key) {
            return existing.clone();
        }
        let created = make();
        self.derived.borrow_mut().insert(key, created.clone());
        created
    }

    /// The array type with this element type and `rank` dimensions.
    pub fn array_type(&self, rank: usize) -> TypeRef {
        self.derived(Derived::Array(rank), || {
            let suffix = if rank <= 1 {
                String::from("[]")
            } else {
                format!("[{}]", ",".repeat(rank - 1))
            };
            let shell = TypeRef::declare(
                format!("{}{}", self.name, suffix),
                self.namespace.clone(),
                TypeShape::Array {
                    element: self.clone(),
                    rank: rank.max(1),
                },
                GenericShape::None,
            );
            let i32_ty = TypeRef::primitive(Primitive::I32);
            TypeBuilder::from_shell(shell)
                .property(PropertyInfo::new("Length", i32_ty.clone()).get(|this| {
                    crate::host::receiver(this)?
                        .with(|array: &HostArray| HostValue::I32(array.len() as i32))
                }))
                .property(PropertyInfo::new("Rank", i32_ty).get(|this| {
                    crate::host::receiver(this)?
                        .with(|array: &HostArray| HostValue::I32(array.rank() as i32))
                }))
                .finish()
        })
    }

    pub fn nullable(&self) -> TypeRef {
        if self.nullable_inner().is_some() || !self.is_value_type() {
            return self.clone();
        }
        self.derived(Derived::Nullable, || {
            TypeRef::declare(
                format!("{}?", self.name),
                self.namespace.clone(),
                TypeShape::Nullable(self.clone()),
                GenericShape::None,
            )
        })
    }

    /// Closes this generic definition over `args`. Instantiations are cached,
    /// so equal argument lists yield the identical type.
    pub fn make_generic_type(&self, args: &[TypeRef]) -> HostResult<TypeRef> {
        let (params, factory) = match &self.generic {
            GenericShape::Definition { params, factory } => (params, factory.clone()),
            _ => return Err(HostError::NotGeneric(self.full_name())),
        };
        check_generic_arguments(&self.full_name(), params, args)?;
        if let Some(existing) = self.instantiations.borrow().get(args) {
            return Ok(existing.clone());
        }
        let instance = TypeRef::declare(
            self.name.clone(),
            self.namespace.clone(),
            self.shape.clone(),
            GenericShape::Instance {
                definition: self.clone(),
                args: args.to_vec(),
            },
        );
        let mut builder = TypeBuilder::from_shell(instance);
        factory(&mut builder, args);
        let instance = builder.finish();
        self.instantiations
            .borrow_mut()
            .insert(args.to_vec(), instance.clone());
        Ok(instance)
    }
}

impl Deref for TypeRef {
    type Target = TypeInfo;

    fn deref(&self) -> &TypeInfo {
        &self.0
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Declares a host type and its members.
pub struct TypeBuilder {
    ty: TypeRef,
    members: Members,
}

impl TypeBuilder {
    fn from_shell(ty: TypeRef) -> Self {
        Self {
            ty,
            members: Members::default(),
        }
    }

    pub fn class(namespace: &str, name: &str) -> Self {
        Self::from_shell(TypeRef::declare(name, namespace, TypeShape::Class, GenericShape::None))
    }

    pub fn structure(namespace: &str, name: &str) -> Self {
        Self::from_shell(TypeRef::declare(
            name,
            namespace,
            TypeShape::Struct { byref_like: false },
            GenericShape::None,
        ))
    }

    /// Stack-only value type that cannot be boxed.
    pub fn byref_like(namespace: &str, name: &str) -> Self {
        Self::from_shell(TypeRef::declare(
            name,
            namespace,
            TypeShape::Struct { byref_like: true },
            GenericShape::None,
        ))
    }

    /// Generic class definition; the arity suffix is appended to `name`.
    pub fn generic_class(
        namespace: &str,
        name: &str,
        params: Vec<GenericParam>,
        factory: impl Fn(&mut TypeBuilder, &[TypeRef]) + 'static,
    ) -> Self {
        let arity = params.len();
        Self::from_shell(TypeRef::declare(
            format!("{name}`{arity}"),
            namespace,
            TypeShape::Class,
            GenericShape::Definition {
                params,
                factory: Rc::new(factory),
            },
        ))
    }

    /// Enum whose variants become literal fields.
    pub fn enumeration(
        namespace: &str,
        name: &str,
        repr: Primitive,
        variants: &[(&str, i64)],
    ) -> TypeRef {
        let mut builder = Self::from_shell(TypeRef::declare(
            name,
            namespace,
            TypeShape::Enum { repr },
            GenericShape::None,
        ));
        let ty = builder.type_ref();
        for (variant, value) in variants {
            builder = builder.constant(
                variant,
                ty.clone(),
                HostValue::Enum {
                    ty: ty.clone(),
                    value: *value,
                },
            );
        }
        builder.finish()
    }

    pub fn type_ref(&self) -> TypeRef {
        self.ty.clone()
    }

    pub fn extends(mut self, base: &TypeRef) -> Self {
        self.members.base = Some(base.clone());
        self
    }

    pub fn constant(mut self, name: &str, ty: TypeRef, value: HostValue) -> Self {
        self.members.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            is_static: true,
            visibility: Visibility::Public,
            access: FieldAccess::Literal(value),
        });
        self
    }

    pub fn field(
        mut self,
        name: &str,
        ty: TypeRef,
        get: impl Fn(&HostObject) -> HostResult<HostValue> + 'static,
        set: impl Fn(&HostObject, HostValue) -> HostResult<()> + 'static,
    ) -> Self {
        let getter: Getter = Rc::new(move |this| get(crate::host::receiver(this)?));
        let setter: Setter = Rc::new(move |this, value| set(crate::host::receiver(this)?, value));
        self.members.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            visibility: Visibility::Public,
            access: FieldAccess::Mutable(getter, setter),
        });
        self
    }

    pub fn readonly_field(
        mut self,
        name: &str,
        ty: TypeRef,
        get: impl Fn(&HostObject) -> HostResult<HostValue> + 'static,
    ) -> Self {
        let getter: Getter = Rc::new(move |this| get(crate::host::receiver(this)?));
        self.members.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            visibility: Visibility::Public,
            access: FieldAccess::ReadOnly(getter),
        });
        self
    }

    pub fn static_field(
        mut self,
        name: &str,
        ty: TypeRef,
        get: impl Fn() -> HostResult<HostValue> + 'static,
        set: impl Fn(HostValue) -> HostResult<()> + 'static,
    ) -> Self {
        let getter: Getter = Rc::new(move |_| get());
        let setter: Setter = Rc::new(move |_, value| set(value));
        self.members.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            is_static: true,
            visibility: Visibility::Public,
            access: FieldAccess::Mutable(getter, setter),
        });
        self
    }

    pub fn property(mut self, property: PropertyInfo) -> Self {
        self.members.properties.push(property);
        self
    }

    pub fn method(mut self, method: MethodInfo) -> Self {
        self.members.methods.push(method);
        self
    }

    pub fn constructor(
        mut self,
        params: Vec<ParamInfo>,
        body: impl Fn(Vec<HostValue>) -> HostResult<HostValue> + 'static,
    ) -> Self {
        let ret = self.ty.clone();
        let ctor = MethodInfo::new(".ctor", params, ret, move |_, args| body(args)).static_();
        self.members.constructors.push(ctor);
        self
    }

    pub fn indexer(mut self, indexer: IndexerInfo) -> Self {
        self.members.indexers.push(indexer);
        self
    }

    pub fn nested(mut self, ty: &TypeRef) -> Self {
        self.members.nested.push(ty.clone());
        self
    }

    pub fn default_value(mut self, make: impl Fn() -> HostValue + 'static) -> Self {
        self.members.default = Some(Rc::new(make));
        self
    }

    pub fn add_field(&mut self, field: FieldInfo) {
        self.members.fields.push(field);
    }

    pub fn add_property(&mut self, property: PropertyInfo) {
        self.members.properties.push(property);
    }

    pub fn add_method(&mut self, method: MethodInfo) {
        self.members.methods.push(method);
    }

    pub fn add_constructor(&mut self, ctor: MethodInfo) {
        self.members.constructors.push(ctor);
    }

    pub fn add_indexer(&mut self, indexer: IndexerInfo) {
        self.members.indexers.push(indexer);
    }

    pub fn finish(self) -> TypeRef {
        let name = self.ty.full_name();
        if self.ty.members.set(self.members).is_err() {
            tracing::warn!(
                ty = %name,
                "members were already defined; keeping the first definition"
            );
        }
        self.ty
    }
}

/// Named host types visible to scripts.
#[derive(Default)]
pub struct TypeCatalog {
    types: IndexMap<String, Vec<TypeRef>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ty: &TypeRef) -> &mut Self {
        let key = if ty.namespace().is_empty() {
            ty.base_name().to_string()
        } else {
            format!("{}.{}", ty.namespace(), ty.base_name())
        };
        let entries = self.types.entry(key).or_default();
        if !entries.contains(ty) {
            entries.push(ty.clone());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolves a dotted name. Exact names with an arity suffix select a single
    /// definition; bare names with generic candidates yield a group.
    pub fn resolve(&self, name: &str) -> Option<HostEntity> {
        if let Some((base, _)) = name.split_once('`') {
            let exact = self
                .types
                .get(base)?
                .iter()
                .find(|ty| ty.full_name() == name)?;
            return Some(HostEntity::Type(exact.clone()));
        }
        let candidates = self.types.get(name)?;
        let plain = candidates
            .iter()
            .find(|ty| !ty.is_generic_definition())
            .cloned();
        let generic: Vec<&TypeRef> = candidates
            .iter()
            .filter(|ty| ty.is_generic_definition())
            .collect();
        if generic.is_empty() {
            return plain.map(HostEntity::Type);
        }
        let group = generic.into_iter().fold(
            GenericTypeGroup::new(name, plain),
            |group, definition| group.with_definition(definition.clone()),
        );
        Some(HostEntity::GenericGroup(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder_definition() -> TypeRef {
        TypeBuilder::generic_class(
            "Demo",
            "Holder",
            vec![GenericParam::new("T").with_constraint(Constraint::ValueType)],
            |builder, args| {
                let item = args[0].clone();
                let default = PropertyInfo::new("Default", item.clone())
                    .get(move |_| Ok(item.default_value()));
                builder.add_property(default);
            },
        )
        .finish()
    }

    #[test]
    fn primitives_are_shared() {
        assert_eq!(
            TypeRef::primitive(Primitive::I32),
            TypeRef::primitive(Primitive::I32)
        );
        assert_ne!(
            TypeRef::primitive(Primitive::I32),
            TypeRef::primitive(Primitive::I64)
        );
    }

    #[test]
    fn generic_instantiations_are_cached() {
        let definition = holder_definition();
        let i32_ty = TypeRef::primitive(Primitive::I32);
        let first = definition.make_generic_type(&[i32_ty.clone()]).unwrap();
        let second = definition.make_generic_type(&[i32_ty]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.full_name(), "Demo.Holder`1[i32]");
        assert_eq!(first.members().properties.len(), 1);
    }

    #[test]
    fn generic_constraints_are_enforced() {
        let definition = holder_definition();
        let err = definition
            .make_generic_type(&[TypeRef::primitive(Primitive::String)])
            .unwrap_err();
        assert!(matches!(err, HostError::ConstraintViolation { .. }));
        let err = definition.make_generic_type(&[]).unwrap_err();
        assert!(matches!(err, HostError::GenericArity { expected: 1, found: 0, .. }));
    }

    #[test]
    fn assignability_follows_base_chain() {
        let base = TypeBuilder::class("Demo", "Shape").finish();
        let derived = TypeBuilder::class("Demo", "Circle").extends(&base).finish();
        assert!(base.is_assignable_from(&derived));
        assert!(!derived.is_assignable_from(&base));
        assert!(TypeRef::primitive(Primitive::Object).is_assignable_from(&derived));
    }

    #[test]
    fn catalog_groups_generic_definitions() {
        let plain = TypeBuilder::class("Demo", "Holder").finish();
        let definition = holder_definition();
        let mut catalog = TypeCatalog::new();
        catalog.register(&plain).register(&definition);

        match catalog.resolve("Demo.Holder") {
            Some(HostEntity::GenericGroup(group)) => {
                assert_eq!(group.plain(), Some(&plain));
                assert_eq!(group.arities(), vec![1]);
            }
            other => panic!("expected a generic group, got {other:?}"),
        }
        assert_eq!(
            catalog.resolve("Demo.Holder`1"),
            Some(HostEntity::Type(definition))
        );
        assert!(catalog.resolve("Demo.Missing").is_none());
    }
}
