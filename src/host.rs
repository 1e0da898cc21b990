use crate::state::ScriptValue;
use crate::types::{Primitive, TypeRef};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

/// Failures raised by host code or by the host's own type checks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("{0}")]
    Exception(String),
    #[error("object reference not set to an instance of an object")]
    NullReference,
    #[error("index was outside the bounds of the array")]
    IndexOutOfRange,
    #[error("unable to cast object of type '{found}' to type '{expected}'")]
    InvalidCast { expected: String, found: String },
    #[error("object of type '{0}' is already borrowed")]
    Busy(String),
    #[error("'{0}' is not a generic definition")]
    NotGeneric(String),
    #[error("'{name}' takes {expected} type arguments but {found} were supplied")]
    GenericArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("type argument '{argument}' violates constraint '{constraint}' on '{parameter}'")]
    ConstraintViolation {
        parameter: String,
        argument: String,
        constraint: String,
    },
}

impl HostError {
    pub fn exception(message: impl Into<String>) -> Self {
        HostError::Exception(message.into())
    }
}

/// Address-based identity of a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// A reference-identity host instance: the boxed payload plus its runtime type.
#[derive(Clone)]
pub struct HostObject {
    ty: TypeRef,
    data: Rc<RefCell<dyn Any>>,
}

impl HostObject {
    pub fn new<T: Any>(ty: TypeRef, value: T) -> Self {
        let data: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(value));
        Self { ty, data }
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.ty
    }

    pub fn id(&self) -> ObjectId {
        ObjectId(Rc::as_ptr(&self.data) as *const () as usize)
    }

    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> HostResult<R> {
        let guard = self
            .data
            .try_borrow()
            .map_err(|_| HostError::Busy(self.ty.full_name()))?;
        let value = guard.downcast_ref::<T>().ok_or_else(|| self.cast_error::<T>())?;
        Ok(f(value))
    }

    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> HostResult<R> {
        let mut guard = self
            .data
            .try_borrow_mut()
            .map_err(|_| HostError::Busy(self.ty.full_name()))?;
        let value = guard.downcast_mut::<T>().ok_or_else(|| self.cast_error::<T>())?;
        Ok(f(value))
    }

    fn cast_error<T>(&self) -> HostError {
        HostError::InvalidCast {
            expected: std::any::type_name::<T>().to_string(),
            found: self.ty.full_name(),
        }
    }

    /// Builds a one-dimensional array of `element`.
    pub fn array(element: &TypeRef, items: Vec<HostValue>) -> Self {
        let dims = vec![items.len()];
        HostObject::new(element.array_type(1), HostArray { dims, items })
    }

    /// Builds a zero-initialised array with the given dimensions. Every
    /// element gets its own default, so struct elements never alias.
    pub fn array_with_dims(element: &TypeRef, dims: &[usize]) -> Self {
        let len: usize = dims.iter().product();
        let items = (0..len).map(|_| element.default_value()).collect();
        let array = HostArray {
            dims: dims.to_vec(),
            items,
        };
        HostObject::new(element.array_type(dims.len().max(1)), array)
    }
}

/// Resolves the receiver of an instance accessor.
pub fn receiver(this: Option<&HostObject>) -> HostResult<&HostObject> {
    this.ok_or(HostError::NullReference)
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.ty.full_name(), self.id().0)
    }
}

/// Row-major payload of an array object.
#[derive(Debug, Clone)]
pub struct HostArray {
    dims: Vec<usize>,
    items: Vec<HostValue>,
}

impl HostArray {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[HostValue] {
        &self.items
    }

    fn offset(&self, indices: &[i64]) -> HostResult<usize> {
        if indices.len() != self.dims.len() {
            return Err(HostError::IndexOutOfRange);
        }
        let mut offset = 0usize;
        for (&index, &dim) in indices.iter().zip(&self.dims) {
            if index < 0 || index as usize >= dim {
                return Err(HostError::IndexOutOfRange);
            }
            offset = offset * dim + index as usize;
        }
        Ok(offset)
    }

    pub fn get(&self, indices: &[i64]) -> HostResult<HostValue> {
        let offset = self.offset(indices)?;
        Ok(self.items[offset].clone())
    }

    pub fn set(&mut self, indices: &[i64], value: HostValue) -> HostResult<()> {
        let offset = self.offset(indices)?;
        self.items[offset] = value;
        Ok(())
    }
}

/// Boxed host value as seen by reflective invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Pointer(usize),
    Enum { ty: TypeRef, value: i64 },
    Object(HostObject),
    Type(TypeRef),
    Script(ScriptValue),
}

impl HostValue {
    pub fn string(value: impl Into<String>) -> Self {
        HostValue::String(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::I8(v) => Some(i64::from(*v)),
            HostValue::I16(v) => Some(i64::from(*v)),
            HostValue::I32(v) => Some(i64::from(*v)),
            HostValue::I64(v) => Some(*v),
            HostValue::U8(v) => Some(i64::from(*v)),
            HostValue::U16(v) => Some(i64::from(*v)),
            HostValue::U32(v) => Some(i64::from(*v)),
            HostValue::U64(v) => i64::try_from(*v).ok(),
            HostValue::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::F32(v) => Some(f64::from(*v)),
            HostValue::F64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Name of the runtime type, used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            HostValue::Null => String::from("null"),
            HostValue::Enum { ty, .. } => ty.full_name(),
            HostValue::Object(object) => object.type_ref().full_name(),
            HostValue::Type(_) => String::from("type"),
            HostValue::Script(value) => value.type_name().to_string(),
            other => other
                .primitive()
                .map(|primitive| primitive.name().to_string())
                .unwrap_or_default(),
        }
    }

    fn primitive(&self) -> Option<Primitive> {
        Some(match self {
            HostValue::Bool(_) => Primitive::Bool,
            HostValue::I8(_) => Primitive::I8,
            HostValue::I16(_) => Primitive::I16,
            HostValue::I32(_) => Primitive::I32,
            HostValue::I64(_) => Primitive::I64,
            HostValue::U8(_) => Primitive::U8,
            HostValue::U16(_) => Primitive::U16,
            HostValue::U32(_) => Primitive::U32,
            HostValue::U64(_) => Primitive::U64,
            HostValue::F32(_) => Primitive::F32,
            HostValue::F64(_) => Primitive::F64,
            HostValue::Char(_) => Primitive::Char,
            HostValue::String(_) => Primitive::String,
            HostValue::Pointer(_) => Primitive::Pointer,
            _ => return None,
        })
    }
}

/// Same-named generic definitions keyed by arity, optionally paired with the
/// non-generic type of that name.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericTypeGroup {
    name: String,
    definitions: BTreeMap<usize, TypeRef>,
    plain: Option<TypeRef>,
}

impl GenericTypeGroup {
    pub fn new(name: impl Into<String>, plain: Option<TypeRef>) -> Self {
        Self {
            name: name.into(),
            definitions: BTreeMap::new(),
            plain,
        }
    }

    pub fn with_definition(mut self, definition: TypeRef) -> Self {
        self.definitions
            .insert(definition.generic_arity(), definition);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plain(&self) -> Option<&TypeRef> {
        self.plain.as_ref()
    }

    pub fn definition(&self, arity: usize) -> Option<&TypeRef> {
        self.definitions.get(&arity)
    }

    pub fn arities(&self) -> Vec<usize> {
        self.definitions.keys().copied().collect()
    }

    /// Every member type: the plain type first, then definitions by arity.
    pub fn type_set(&self) -> Vec<TypeRef> {
        self.plain
            .iter()
            .chain(self.definitions.values())
            .cloned()
            .collect()
    }
}

/// What a handle stands for on the host side.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEntity {
    Object(HostObject),
    Type(TypeRef),
    GenericGroup(GenericTypeGroup),
}

impl HostEntity {
    pub fn describe(&self) -> String {
        match self {
            HostEntity::Object(object) => format!("{}: {:?}", object.type_ref().name(), object),
            HostEntity::Type(ty) => format!("type {}", ty.full_name()),
            HostEntity::GenericGroup(group) => format!("generic group {}", group.name()),
        }
    }

    pub fn into_value(self) -> HostValue {
        match self {
            HostEntity::Object(object) => HostValue::Object(object),
            HostEntity::Type(ty) => HostValue::Type(ty),
            HostEntity::GenericGroup(group) => match group.plain() {
                Some(plain) => HostValue::Type(plain.clone()),
                None => HostValue::Null,
            },
        }
    }
}
