//! Conversion between scripting values and boxed host values.
//!
//! Every generated routine reads arguments and writes results through this
//! module. Loading checks the dynamic type of the scripting value before any
//! conversion and refuses values that do not fit the target kind.
use crate::context::BridgeContext;
use crate::host::{HostEntity, HostObject, HostValue};
use crate::state::{Handle, ScriptState, ScriptValue};
use crate::types::{Primitive, TypeRef, TypeShape};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("expected {expected}, got {found}")]
    Mismatch { expected: String, found: String },
    #[error("{value} does not fit in {target}")]
    Overflow { value: String, target: &'static str },
    #[error("expected a single character, got {0:?}")]
    NotAChar(String),
    #[error("userdata {0} is not a host entity")]
    UnknownHandle(Handle),
}

fn mismatch(expected: impl Into<String>, found: &ScriptValue) -> MarshalError {
    MarshalError::Mismatch {
        expected: expected.into(),
        found: found.type_name().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntKind {
    pub fn name(self) -> &'static str {
        match self {
            IntKind::I8 => "i8",
            IntKind::I16 => "i16",
            IntKind::I32 => "i32",
            IntKind::I64 => "i64",
            IntKind::U8 => "u8",
            IntKind::U16 => "u16",
            IntKind::U32 => "u32",
            IntKind::U64 => "u64",
        }
    }

    fn from_primitive(primitive: Primitive) -> Option<Self> {
        Some(match primitive {
            Primitive::I8 => IntKind::I8,
            Primitive::I16 => IntKind::I16,
            Primitive::I32 => IntKind::I32,
            Primitive::I64 => IntKind::I64,
            Primitive::U8 => IntKind::U8,
            Primitive::U16 => IntKind::U16,
            Primitive::U32 => IntKind::U32,
            Primitive::U64 => IntKind::U64,
            _ => return None,
        })
    }

    /// Range-checked narrowing from the runtime's native integer.
    pub fn narrow(self, value: i64) -> Option<HostValue> {
        Some(match self {
            IntKind::I8 => HostValue::I8(i8::try_from(value).ok()?),
            IntKind::I16 => HostValue::I16(i16::try_from(value).ok()?),
            IntKind::I32 => HostValue::I32(i32::try_from(value).ok()?),
            IntKind::I64 => HostValue::I64(value),
            IntKind::U8 => HostValue::U8(u8::try_from(value).ok()?),
            IntKind::U16 => HostValue::U16(u16::try_from(value).ok()?),
            IntKind::U32 => HostValue::U32(u32::try_from(value).ok()?),
            IntKind::U64 => HostValue::U64(u64::try_from(value).ok()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

/// Fixed set of shapes a host type can take at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum MarshalKind {
    Void,
    Bool,
    Int(IntKind),
    Float(FloatKind),
    Char,
    String,
    Pointer,
    Enum { ty: TypeRef, repr: IntKind },
    Nullable(Box<MarshalKind>),
    Object(TypeRef),
    Type,
    Any,
    Script,
}

impl MarshalKind {
    pub fn describe(&self) -> String {
        match self {
            MarshalKind::Void => String::from("void"),
            MarshalKind::Bool => String::from("boolean"),
            MarshalKind::Int(kind) => kind.name().to_string(),
            MarshalKind::Float(FloatKind::F32) => String::from("f32"),
            MarshalKind::Float(FloatKind::F64) => String::from("f64"),
            MarshalKind::Char => String::from("char"),
            MarshalKind::String => String::from("string"),
            MarshalKind::Pointer => String::from("pointer"),
            MarshalKind::Enum { ty, .. } => ty.full_name(),
            MarshalKind::Nullable(inner) => format!("{}?", inner.describe()),
            MarshalKind::Object(ty) => ty.full_name(),
            MarshalKind::Type => String::from("type"),
            MarshalKind::Any => String::from("any"),
            MarshalKind::Script => String::from("script value"),
        }
    }
}

/// Classifies `ty`; the result is memoized on the type.
pub fn classify(ty: &TypeRef) -> MarshalKind {
    ty.marshal_kind_cell()
        .get_or_init(|| match ty.shape() {
            TypeShape::Primitive(primitive) => match primitive {
                Primitive::Void => MarshalKind::Void,
                Primitive::Bool => MarshalKind::Bool,
                Primitive::F32 => MarshalKind::Float(FloatKind::F32),
                Primitive::F64 => MarshalKind::Float(FloatKind::F64),
                Primitive::Char => MarshalKind::Char,
                Primitive::String => MarshalKind::String,
                Primitive::Pointer => MarshalKind::Pointer,
                Primitive::Object => MarshalKind::Any,
                Primitive::Script => MarshalKind::Script,
                other => IntKind::from_primitive(*other)
                    .map(MarshalKind::Int)
                    .unwrap_or(MarshalKind::Any),
            },
            TypeShape::Enum { repr } => MarshalKind::Enum {
                ty: ty.clone(),
                repr: IntKind::from_primitive(*repr).unwrap_or(IntKind::I32),
            },
            TypeShape::Nullable(inner) => MarshalKind::Nullable(Box::new(classify(inner))),
            TypeShape::Class | TypeShape::Struct { .. } | TypeShape::Array { .. } => {
                MarshalKind::Object(ty.clone())
            }
        })
        .clone()
}

fn script_integer(value: &ScriptValue, integral_floats: bool) -> Option<Result<i64, f64>> {
    match value {
        ScriptValue::Integer(number) => Some(Ok(*number)),
        ScriptValue::Number(number) if integral_floats => {
            // i64::MIN is exactly representable; i64::MAX rounds up to 2^63.
            let in_range =
                *number >= -9_223_372_036_854_775_808.0 && *number < 9_223_372_036_854_775_808.0;
            if number.fract() == 0.0 && in_range {
                Some(Ok(*number as i64))
            } else {
                Some(Err(*number))
            }
        }
        _ => None,
    }
}

fn load_int(
    value: &ScriptValue,
    kind: IntKind,
    integral_floats: bool,
) -> Result<HostValue, MarshalError> {
    match script_integer(value, integral_floats) {
        Some(Ok(number)) => kind.narrow(number).ok_or_else(|| MarshalError::Overflow {
            value: number.to_string(),
            target: kind.name(),
        }),
        Some(Err(number)) => Err(MarshalError::Overflow {
            value: number.to_string(),
            target: kind.name(),
        }),
        None => Err(mismatch(kind.name(), value)),
    }
}

fn load_float(value: &ScriptValue, kind: FloatKind) -> Result<HostValue, MarshalError> {
    let number = match value {
        ScriptValue::Integer(number) => *number as f64,
        ScriptValue::Number(number) => *number,
        other => return Err(mismatch("number", other)),
    };
    match kind {
        FloatKind::F64 => Ok(HostValue::F64(number)),
        FloatKind::F32 => {
            if number.is_finite() && number.abs() > f64::from(f32::MAX) {
                return Err(MarshalError::Overflow {
                    value: number.to_string(),
                    target: "f32",
                });
            }
            Ok(HostValue::F32(number as f32))
        }
    }
}

fn load_char(value: &ScriptValue) -> Result<HostValue, MarshalError> {
    let text = value.as_str().ok_or_else(|| mismatch("char", value))?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(HostValue::Char(ch)),
        _ => Err(MarshalError::NotAChar(text.to_string())),
    }
}

fn entity_for(ctx: &BridgeContext, handle: Handle) -> Result<HostEntity, MarshalError> {
    ctx.lookup_entity(handle)
        .ok_or(MarshalError::UnknownHandle(handle))
}

fn load_object(
    ctx: &BridgeContext,
    state: &ScriptState,
    value: &ScriptValue,
    ty: &TypeRef,
) -> Result<HostValue, MarshalError> {
    match value {
        ScriptValue::Nil if !ty.is_value_type() => Ok(HostValue::Null),
        ScriptValue::Userdata(handle) => match entity_for(ctx, *handle)? {
            HostEntity::Object(object) if ty.is_assignable_from(object.type_ref()) => {
                Ok(HostValue::Object(object))
            }
            HostEntity::Object(object) => Err(MarshalError::Mismatch {
                expected: ty.full_name(),
                found: object.type_ref().full_name(),
            }),
            _ => Err(MarshalError::Mismatch {
                expected: ty.full_name(),
                found: String::from("type"),
            }),
        },
        ScriptValue::Table(table) => match ty.array_shape() {
            Some((element, 1)) => {
                let kind = classify(element);
                let items = table
                    .to_vec()
                    .iter()
                    .map(|item| load_value(ctx, state, item, &kind))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(HostValue::Object(HostObject::array(element, items)))
            }
            _ => Err(mismatch(ty.full_name(), value)),
        },
        other => Err(mismatch(ty.full_name(), other)),
    }
}

/// Converts `value` to `kind`, failing instead of coercing.
pub fn load_value(
    ctx: &BridgeContext,
    state: &ScriptState,
    value: &ScriptValue,
    kind: &MarshalKind,
) -> Result<HostValue, MarshalError> {
    match kind {
        MarshalKind::Void => Ok(HostValue::Null),
        MarshalKind::Bool => match value {
            ScriptValue::Boolean(flag) => Ok(HostValue::Bool(*flag)),
            other => Err(mismatch("boolean", other)),
        },
        MarshalKind::Int(int_kind) => load_int(value, *int_kind, ctx.config().integral_floats),
        MarshalKind::Float(float_kind) => load_float(value, *float_kind),
        MarshalKind::Char => load_char(value),
        MarshalKind::String => match value {
            ScriptValue::String(text) => Ok(HostValue::String(text.to_string())),
            other => Err(mismatch("string", other)),
        },
        MarshalKind::Pointer => match value {
            ScriptValue::LightUserdata(address) => Ok(HostValue::Pointer(*address)),
            other => Err(mismatch("pointer", other)),
        },
        MarshalKind::Enum { ty, repr } => {
            let underlying = load_int(value, *repr, ctx.config().integral_floats)?;
            let number = underlying.as_i64().ok_or_else(|| mismatch(ty.full_name(), value))?;
            Ok(HostValue::Enum {
                ty: ty.clone(),
                value: number,
            })
        }
        MarshalKind::Nullable(inner) => match value {
            ScriptValue::Nil => Ok(HostValue::Null),
            other => load_value(ctx, state, other, inner),
        },
        MarshalKind::Object(ty) => load_object(ctx, state, value, ty),
        MarshalKind::Type => match value {
            ScriptValue::Userdata(handle) => match entity_for(ctx, *handle)? {
                HostEntity::Type(ty) => Ok(HostValue::Type(ty)),
                HostEntity::GenericGroup(group) => group
                    .plain()
                    .map(|plain| HostValue::Type(plain.clone()))
                    .ok_or_else(|| mismatch("type", value)),
                HostEntity::Object(_) => Err(mismatch("type", value)),
            },
            other => Err(mismatch("type", other)),
        },
        MarshalKind::Any => Ok(match value {
            ScriptValue::Nil => HostValue::Null,
            ScriptValue::Boolean(flag) => HostValue::Bool(*flag),
            ScriptValue::Integer(number) => HostValue::I64(*number),
            ScriptValue::Number(number) => HostValue::F64(*number),
            ScriptValue::String(text) => HostValue::String(text.to_string()),
            ScriptValue::LightUserdata(address) => HostValue::Pointer(*address),
            ScriptValue::Userdata(handle) => entity_for(ctx, *handle)?.into_value(),
            ScriptValue::Table(_) | ScriptValue::Function(_) => HostValue::Script(value.clone()),
        }),
        MarshalKind::Script => Ok(HostValue::Script(value.clone())),
    }
}

/// `load(stackSlot, targetKind)`
pub fn load(
    ctx: &BridgeContext,
    state: &ScriptState,
    idx: usize,
    kind: &MarshalKind,
) -> Result<HostValue, MarshalError> {
    load_value(ctx, state, &state.at(idx), kind)
}

/// Converts a host value into a scripting value, allocating handles for
/// objects and types.
pub fn to_script(
    ctx: &BridgeContext,
    state: &mut ScriptState,
    value: &HostValue,
) -> Result<ScriptValue, MarshalError> {
    match value {
        HostValue::Object(object) => Ok(ScriptValue::Userdata(
            ctx.push_entity(state, HostEntity::Object(object.clone())),
        )),
        HostValue::Type(ty) => Ok(ScriptValue::Userdata(
            ctx.push_entity(state, HostEntity::Type(ty.clone())),
        )),
        other => plain_to_script(state, other),
    }
}

/// Converts a value that needs no handle. Objects and types are refused.
pub fn plain_to_script(
    state: &mut ScriptState,
    value: &HostValue,
) -> Result<ScriptValue, MarshalError> {
    Ok(match value {
        HostValue::Null => ScriptValue::Nil,
        HostValue::Bool(flag) => ScriptValue::Boolean(*flag),
        HostValue::I8(v) => ScriptValue::Integer(i64::from(*v)),
        HostValue::I16(v) => ScriptValue::Integer(i64::from(*v)),
        HostValue::I32(v) => ScriptValue::Integer(i64::from(*v)),
        HostValue::I64(v) => ScriptValue::Integer(*v),
        HostValue::U8(v) => ScriptValue::Integer(i64::from(*v)),
        HostValue::U16(v) => ScriptValue::Integer(i64::from(*v)),
        HostValue::U32(v) => ScriptValue::Integer(i64::from(*v)),
        HostValue::U64(v) => {
            ScriptValue::Integer(i64::try_from(*v).map_err(|_| MarshalError::Overflow {
                value: v.to_string(),
                target: "native integer",
            })?)
        }
        HostValue::F32(v) => ScriptValue::Number(f64::from(*v)),
        HostValue::F64(v) => ScriptValue::Number(*v),
        HostValue::Char(ch) => state.string(ch.encode_utf8(&mut [0u8; 4])),
        HostValue::String(text) => state.string(text),
        HostValue::Pointer(address) => ScriptValue::LightUserdata(*address),
        HostValue::Enum { value, .. } => ScriptValue::Integer(*value),
        HostValue::Script(raw) => raw.clone(),
        HostValue::Object(_) | HostValue::Type(_) => {
            return Err(MarshalError::Mismatch {
                expected: String::from("plain value"),
                found: value.type_name(),
            })
        }
    })
}

/// `push(value)`: converts and pushes onto the current frame.
pub fn push(
    ctx: &BridgeContext,
    state: &mut ScriptState,
    value: &HostValue,
) -> Result<(), MarshalError> {
    let converted = to_script(ctx, state, value)?;
    state.push(converted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BridgeConfig;
    use crate::types::{TypeBuilder, TypeCatalog};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::rc::Rc;

    fn setup() -> (ScriptState, Rc<BridgeContext>) {
        let mut state = ScriptState::new();
        let ctx = BridgeContext::install(&mut state, TypeCatalog::new(), BridgeConfig::default());
        (state, ctx)
    }

    fn round_trip(
        ctx: &BridgeContext,
        state: &mut ScriptState,
        value: HostValue,
        kind: MarshalKind,
    ) {
        push(ctx, state, &value).expect("push should succeed");
        let slot = state.top() - 1;
        let loaded = load(ctx, state, slot, &kind).expect("load should succeed");
        state.pop();
        assert_eq!(loaded, value, "round trip through {}", kind.describe());
    }

    #[test]
    fn randomized_primitive_round_trips() {
        let (mut state, ctx) = setup();
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..64 {
            let cases = vec![
                (HostValue::Bool(rng.gen()), MarshalKind::Bool),
                (HostValue::I8(rng.gen()), MarshalKind::Int(IntKind::I8)),
                (HostValue::I16(rng.gen()), MarshalKind::Int(IntKind::I16)),
                (HostValue::I32(rng.gen()), MarshalKind::Int(IntKind::I32)),
                (HostValue::I64(rng.gen()), MarshalKind::Int(IntKind::I64)),
                (HostValue::U8(rng.gen()), MarshalKind::Int(IntKind::U8)),
                (HostValue::U16(rng.gen()), MarshalKind::Int(IntKind::U16)),
                (HostValue::U32(rng.gen()), MarshalKind::Int(IntKind::U32)),
                (
                    HostValue::U64(rng.gen_range(0..=i64::MAX as u64)),
                    MarshalKind::Int(IntKind::U64),
                ),
                (HostValue::F32(rng.gen_range(-1.0e6..1.0e6)), MarshalKind::Float(FloatKind::F32)),
                (HostValue::F64(rng.gen()), MarshalKind::Float(FloatKind::F64)),
                (HostValue::Char(rng.gen()), MarshalKind::Char),
                (HostValue::Pointer(rng.gen()), MarshalKind::Pointer),
            ];
            for (value, kind) in cases {
                round_trip(&ctx, &mut state, value, kind);
            }
        }
    }

    #[test]
    fn strings_enums_and_nullables_round_trip() {
        let (mut state, ctx) = setup();
        round_trip(&ctx, &mut state, HostValue::string("héllo"), MarshalKind::String);

        let variants: [(&str, i64); 2] = [("Red", 1), ("Blue", 2)];
        let color = TypeBuilder::enumeration("Demo", "Color", Primitive::U8, &variants);
        round_trip(
            &ctx,
            &mut state,
            HostValue::Enum { ty: color.clone(), value: 2 },
            classify(&color),
        );

        let nullable = classify(&TypeRef::primitive(Primitive::I32).nullable());
        round_trip(&ctx, &mut state, HostValue::Null, nullable.clone());
        round_trip(&ctx, &mut state, HostValue::I32(-4), nullable);
    }

    #[test]
    fn wide_values_do_not_wrap_into_narrow_kinds() {
        let (mut state, ctx) = setup();
        push(&ctx, &mut state, &HostValue::I64(i64::MAX)).unwrap();
        let err = load(&ctx, &state, 0, &MarshalKind::Int(IntKind::I32)).unwrap_err();
        assert!(matches!(err, MarshalError::Overflow { target: "i32", .. }));

        state.push(ScriptValue::Integer(-1));
        let err = load(&ctx, &state, 1, &MarshalKind::Int(IntKind::U64)).unwrap_err();
        assert!(matches!(err, MarshalError::Overflow { target: "u64", .. }));

        let err = push(&ctx, &mut state, &HostValue::U64(u64::MAX)).unwrap_err();
        assert!(matches!(err, MarshalError::Overflow { .. }));
    }

    #[test]
    fn dynamic_type_is_checked_before_conversion() {
        let (mut state, ctx) = setup();
        state.push_str("12");
        let err = load(&ctx, &state, 0, &MarshalKind::Int(IntKind::I32)).unwrap_err();
        assert_eq!(err.to_string(), "expected i32, got string");

        state.push(ScriptValue::Integer(1));
        assert!(load(&ctx, &state, 1, &MarshalKind::Bool).is_err());
        assert!(load(&ctx, &state, 1, &MarshalKind::String).is_err());
    }

    #[test]
    fn floats_load_as_integers_only_when_integral() {
        let (mut state, ctx) = setup();
        state.push(ScriptValue::Number(3.0));
        state.push(ScriptValue::Number(3.5));
        assert_eq!(
            load(&ctx, &state, 0, &MarshalKind::Int(IntKind::I16)),
            Ok(HostValue::I16(3))
        );
        assert!(load(&ctx, &state, 1, &MarshalKind::Int(IntKind::I16)).is_err());
    }

    #[test]
    fn char_requires_exactly_one_code_point() {
        let (mut state, ctx) = setup();
        state.push_str("ab");
        state.push_str("");
        assert_eq!(
            load(&ctx, &state, 0, &MarshalKind::Char),
            Err(MarshalError::NotAChar(String::from("ab")))
        );
        assert!(load(&ctx, &state, 1, &MarshalKind::Char).is_err());
    }

    #[test]
    fn f32_rejects_out_of_range_numbers() {
        let (mut state, ctx) = setup();
        state.push(ScriptValue::Number(1.0e300));
        assert!(load(&ctx, &state, 0, &MarshalKind::Float(FloatKind::F32)).is_err());
    }

    #[test]
    fn classification_covers_shapes() {
        let point = TypeBuilder::structure("Demo", "Point").finish();
        assert_eq!(classify(&point), MarshalKind::Object(point.clone()));
        assert_eq!(
            classify(&TypeRef::primitive(Primitive::Object)),
            MarshalKind::Any
        );
        assert_eq!(
            classify(&point.nullable()),
            MarshalKind::Nullable(Box::new(MarshalKind::Object(point)))
        );
    }
}
