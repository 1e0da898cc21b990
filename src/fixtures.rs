//! Sample host types shared by the unit tests.
use crate::context::{BridgeConfig, BridgeContext};
use crate::host::{receiver, HostError, HostObject, HostResult, HostValue};
use crate::state::{ScriptError, ScriptState, ScriptValue};
use crate::types::{
    Constraint, GenericParam, IndexerInfo, MethodInfo, ParamInfo, Primitive, PropertyInfo,
    TypeBuilder, TypeCatalog, TypeRef,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub id: i32,
    pub tag: String,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Point {
    pub x: i32,
}

#[derive(Debug, Default)]
pub struct Bag {
    pub items: HashMap<String, i32>,
    pub grid: [[i32; 3]; 3],
}

pub struct Holder {
    pub value: HostValue,
}

#[derive(Clone)]
pub struct Fixtures {
    pub vector: TypeRef,
    pub axis: TypeRef,
    pub entity: TypeRef,
    pub player: TypeRef,
    pub point: TypeRef,
    pub bag: TypeRef,
    pub span: TypeRef,
    pub holder: TypeRef,
    pub holder1: TypeRef,
    pub holder2: TypeRef,
    pub boxed: TypeRef,
}

thread_local! {
    static FIXTURES: Fixtures = build();
    static COUNT: Cell<i32> = Cell::new(0);
}

/// The fixture types of the current thread. Repeated calls return the same
/// type identities.
pub fn types() -> Fixtures {
    FIXTURES.with(Fixtures::clone)
}

pub fn catalog() -> TypeCatalog {
    let types = types();
    let mut catalog = TypeCatalog::new();
    for primitive in [
        Primitive::Bool,
        Primitive::I32,
        Primitive::I64,
        Primitive::F64,
        Primitive::String,
        Primitive::Object,
    ] {
        catalog.register(&TypeRef::primitive(primitive));
    }
    for ty in [
        &types.vector,
        &types.axis,
        &types.entity,
        &types.player,
        &types.point,
        &types.bag,
        &types.span,
        &types.holder,
        &types.holder1,
        &types.holder2,
        &types.boxed,
    ] {
        catalog.register(ty);
    }
    catalog
}

pub fn bridge() -> (ScriptState, Rc<BridgeContext>) {
    bridge_with(BridgeConfig::default())
}

pub fn bridge_with(config: BridgeConfig) -> (ScriptState, Rc<BridgeContext>) {
    let mut state = ScriptState::new();
    let ctx = BridgeContext::install(&mut state, catalog(), config);
    (state, ctx)
}

pub fn vector(x: f64, y: f64, z: f64) -> HostObject {
    HostObject::new(
        types().vector,
        Vec3 {
            x,
            y,
            z,
            id: 7,
            tag: String::from("origin"),
            ..Vec3::default()
        },
    )
}

pub fn player(name: &str) -> HostObject {
    HostObject::new(
        types().player,
        Named {
            name: name.to_string(),
        },
    )
}

pub fn bag() -> HostObject {
    HostObject::new(types().bag, Bag::default())
}

pub fn static_count() -> i32 {
    COUNT.with(Cell::get)
}

pub fn get(
    state: &mut ScriptState,
    target: &ScriptValue,
    name: &str,
) -> Result<ScriptValue, ScriptError> {
    let key = state.string(name);
    state.index(target, key)
}

pub fn set(
    state: &mut ScriptState,
    target: &ScriptValue,
    name: &str,
    value: ScriptValue,
) -> Result<(), ScriptError> {
    let key = state.string(name);
    state.new_index(target, key, value)
}

/// `target.name(args...)`, with the method value bound to `target`.
pub fn call(
    state: &mut ScriptState,
    target: &ScriptValue,
    name: &str,
    args: Vec<ScriptValue>,
) -> Result<Vec<ScriptValue>, ScriptError> {
    let method = get(state, target, name)?;
    state.call(&method, args)
}

fn prim(primitive: Primitive) -> TypeRef {
    TypeRef::primitive(primitive)
}

fn f64_of(value: &HostValue) -> HostResult<f64> {
    value.as_f64().ok_or_else(|| HostError::InvalidCast {
        expected: String::from("f64"),
        found: value.type_name(),
    })
}

fn i64_of(value: &HostValue) -> HostResult<i64> {
    value.as_i64().ok_or_else(|| HostError::InvalidCast {
        expected: String::from("i64"),
        found: value.type_name(),
    })
}

fn i32_of(value: &HostValue, what: &str) -> HostResult<i32> {
    i32::try_from(i64_of(value)?).map_err(|_| HostError::exception(format!("{what} out of range")))
}

fn with_vec<R>(this: Option<&HostObject>, f: impl FnOnce(&Vec3) -> R) -> HostResult<R> {
    receiver(this)?.with(f)
}

fn build() -> Fixtures {
    let axes: [(&str, i64); 3] = [("X", 0), ("Y", 1), ("Z", 2)];
    let axis = TypeBuilder::enumeration("Demo", "Axis", Primitive::I32, &axes);
    let span = TypeBuilder::byref_like("Demo", "Span").finish();
    let vector = build_vector(&axis, &span);
    let (entity, player) = build_entities();
    let point = build_point();
    let bag = build_bag();
    let (holder, holder1, holder2) = build_holders();
    let params = vec![GenericParam::new("T")];
    let boxed = TypeBuilder::generic_class("Demo", "Box", params, |builder, args| {
        let name = args[0].full_name();
        builder.add_property(
            PropertyInfo::new("Content", prim(Primitive::String))
                .get(move |_| Ok(HostValue::string(name.clone())))
                .static_(),
        );
    })
    .finish();
    Fixtures {
        vector,
        axis,
        entity,
        player,
        point,
        bag,
        span,
        holder,
        holder1,
        holder2,
        boxed,
    }
}

fn build_vector(axis: &TypeRef, span: &TypeRef) -> TypeRef {
    let builder = TypeBuilder::class("Demo", "Vector3");
    let ty = builder.type_ref();
    let f64_ty = prim(Primitive::F64);
    let i32_ty = prim(Primitive::I32);
    let string_ty = prim(Primitive::String);

    let make = {
        let ty = ty.clone();
        move |x: f64, y: f64, z: f64| {
            HostValue::Object(HostObject::new(
                ty.clone(),
                Vec3 {
                    x,
                    y,
                    z,
                    ..Vec3::default()
                },
            ))
        }
    };
    let zero = make.clone();
    let unit = make.clone();
    let from_parts = make;

    let pick_i32 = MethodInfo::new(
        "Pick",
        vec![ParamInfo::new("value", i32_ty.clone())],
        string_ty.clone(),
        |_, _| Ok(HostValue::string("i32")),
    );
    let pick_i64 = MethodInfo::new(
        "Pick",
        vec![ParamInfo::new("value", prim(Primitive::I64))],
        string_ty.clone(),
        |_, _| Ok(HostValue::string("i64")),
    );

    let as_generic = MethodInfo::generic(
        "As",
        vec![GenericParam::new("T").with_constraint(Constraint::ValueType)],
        |args| {
            let target = args[0].clone();
            MethodInfo::new("As", Vec::new(), target.clone(), move |_, _| {
                Ok(target.default_value())
            })
        },
    );
    let as_plain = MethodInfo::new("As", Vec::new(), string_ty.clone(), |_, _| {
        Ok(HostValue::string("vector"))
    });
    let identity = MethodInfo::generic("Identity", vec![GenericParam::new("T")], |args| {
        let item = args[0].clone();
        let params = vec![ParamInfo::new("value", item.clone())];
        MethodInfo::new("Identity", params, item, |_, mut values| {
            Ok(values.pop().unwrap_or(HostValue::Null))
        })
    })
    .static_();

    builder
        .constant("MaxLength", f64_ty.clone(), HostValue::F64(100.0))
        .field(
            "x",
            f64_ty.clone(),
            |this| this.with(|v: &Vec3| HostValue::F64(v.x)),
            |this, value| {
                let x = f64_of(&value)?;
                this.with_mut(|v: &mut Vec3| v.x = x)
            },
        )
        .field(
            "y",
            f64_ty.clone(),
            |this| this.with(|v: &Vec3| HostValue::F64(v.y)),
            |this, value| {
                let y = f64_of(&value)?;
                this.with_mut(|v: &mut Vec3| v.y = y)
            },
        )
        .field(
            "z",
            f64_ty.clone(),
            |this| this.with(|v: &Vec3| HostValue::F64(v.z)),
            |this, value| {
                let z = f64_of(&value)?;
                this.with_mut(|v: &mut Vec3| v.z = z)
            },
        )
        .readonly_field("Id", i32_ty.clone(), |this| this.with(|v: &Vec3| HostValue::I32(v.id)))
        .static_field(
            "Count",
            i32_ty.clone(),
            || Ok(HostValue::I32(COUNT.with(Cell::get))),
            |value| {
                let count = i32_of(&value, "count")?;
                COUNT.with(|cell| cell.set(count));
                Ok(())
            },
        )
        .property(
            PropertyInfo::new("Length", f64_ty.clone())
                .get(|this| {
                    with_vec(this, |v| {
                        HostValue::F64((v.x * v.x + v.y * v.y + v.z * v.z).sqrt())
                    })
                }),
        )
        .property(PropertyInfo::new("Secret", string_ty.clone()).set(|this, value| {
            let text = value.as_str().unwrap_or_default().to_string();
            receiver(this)?.with_mut(|v: &mut Vec3| v.secret = text)
        }))
        .property(
            PropertyInfo::new("Tag", string_ty.clone())
                .get(|this| with_vec(this, |v| HostValue::string(v.tag.clone())))
                .private_set(|this, value| {
                    let text = value.as_str().unwrap_or_default().to_string();
                    receiver(this)?.with_mut(|v: &mut Vec3| v.tag = text)
                }),
        )
        .property(
            PropertyInfo::new("Raw", f64_ty.clone())
                .get(|this| with_vec(this, |v| HostValue::F64(v.x)))
                .by_ref(),
        )
        .property(PropertyInfo::new("Scratch", span.clone()).get(|_| Ok(HostValue::Null)))
        .property(
            PropertyInfo::new("Unit", ty.clone())
                .get(move |_| Ok(unit(1.0, 1.0, 1.0)))
                .static_(),
        )
        .method(pick_i32)
        .method(pick_i64)
        .method(MethodInfo::new(
            "Sum",
            vec![ParamInfo::params("values", f64_ty.clone())],
            f64_ty.clone(),
            |this, args| {
                let base = with_vec(this, |v| v.x)?;
                let array = args
                    .first()
                    .and_then(HostValue::as_object)
                    .ok_or(HostError::NullReference)?;
                let total = array.with(|a: &crate::host::HostArray| {
                    a.items().iter().filter_map(HostValue::as_f64).sum::<f64>()
                })?;
                Ok(HostValue::F64(base + total))
            },
        ))
        .method(MethodInfo::new(
            "Scale",
            vec![
                ParamInfo::new("factor", f64_ty.clone()),
                ParamInfo::new("times", i32_ty.clone()).optional(HostValue::I32(1)),
            ],
            prim(Primitive::Void),
            |this, args| {
                let factor = f64_of(&args[0])?.powi(i64_of(&args[1])? as i32);
                receiver(this)?.with_mut(|v: &mut Vec3| {
                    v.x *= factor;
                    v.y *= factor;
                    v.z *= factor;
                })?;
                Ok(HostValue::Null)
            },
        ))
        .method(MethodInfo::new(
            "Dot",
            vec![ParamInfo::new("other", ty.clone())],
            f64_ty.clone(),
            |this, args| {
                let (ax, ay, az) = with_vec(this, |v| (v.x, v.y, v.z))?;
                let other = args[0].as_object().ok_or(HostError::NullReference)?;
                let dot = other.with(|b: &Vec3| ax * b.x + ay * b.y + az * b.z)?;
                Ok(HostValue::F64(dot))
            },
        ))
        .method(
            MethodInfo::new("Normalize", Vec::new(), prim(Primitive::Void), |_, _| {
                Ok(HostValue::Null)
            })
            .private(),
        )
        .method(MethodInfo::new(
            "Invoke",
            vec![ParamInfo::new("factor", f64_ty.clone())],
            f64_ty.clone(),
            |this, args| {
                let x = with_vec(this, |v| v.x)?;
                Ok(HostValue::F64(x * f64_of(&args[0])?))
            },
        ))
        .method(MethodInfo::new("Explode", Vec::new(), prim(Primitive::Void), |_, _| {
            panic!("vector exploded")
        }))
        .method(MethodInfo::new("Fail", Vec::new(), prim(Primitive::Void), |_, _| {
            Err(HostError::exception("vector failure"))
        }))
        .method(MethodInfo::new("Borrow", Vec::new(), span.clone(), |_, _| Ok(HostValue::Null)))
        .method(as_plain)
        .method(as_generic)
        .method(identity)
        .method(
            MethodInfo::new("Zero", Vec::new(), ty.clone(), move |_, _| Ok(zero(0.0, 0.0, 0.0)))
                .static_(),
        )
        .constructor(Vec::new(), {
            let make = from_parts.clone();
            move |_| Ok(make(0.0, 0.0, 0.0))
        })
        .constructor(
            vec![
                ParamInfo::new("x", f64_ty.clone()),
                ParamInfo::new("y", f64_ty.clone()),
                ParamInfo::new("z", f64_ty.clone()),
            ],
            move |args| Ok(from_parts(f64_of(&args[0])?, f64_of(&args[1])?, f64_of(&args[2])?)),
        )
        .indexer(
            IndexerInfo::new(vec![ParamInfo::new("axis", i32_ty)], f64_ty)
                .get(|this, args| {
                    let axis = i64_of(&args[0])?;
                    this.with(|v: &Vec3| match axis {
                        0 => Ok(HostValue::F64(v.x)),
                        1 => Ok(HostValue::F64(v.y)),
                        2 => Ok(HostValue::F64(v.z)),
                        _ => Err(HostError::IndexOutOfRange),
                    })?
                })
                .set(|this, args, value| {
                    let axis = i64_of(&args[0])?;
                    let component = f64_of(&value)?;
                    this.with_mut(|v: &mut Vec3| {
                        let slot = match axis {
                            0 => &mut v.x,
                            1 => &mut v.y,
                            2 => &mut v.z,
                            _ => return Err(HostError::IndexOutOfRange),
                        };
                        *slot = component;
                        Ok(())
                    })?
                }),
        )
        .nested(axis)
        .finish()
}

fn build_entities() -> (TypeRef, TypeRef) {
    let string_ty = prim(Primitive::String);
    let entity = TypeBuilder::class("Demo", "Entity")
        .property(
            PropertyInfo::new("Name", string_ty.clone())
                .get(|this| receiver(this)?.with(|n: &Named| HostValue::string(n.name.clone())))
                .set(|this, value| {
                    let text = value.as_str().unwrap_or_default().to_string();
                    receiver(this)?.with_mut(|n: &mut Named| n.name = text)
                }),
        )
        .method(MethodInfo::new("Describe", Vec::new(), string_ty.clone(), |_, _| {
            Ok(HostValue::string("entity"))
        }))
        .method(MethodInfo::new("Ping", Vec::new(), string_ty.clone(), |_, _| {
            Ok(HostValue::string("pong"))
        }))
        .finish();
    let player = TypeBuilder::class("Demo", "Player")
        .extends(&entity)
        .method(MethodInfo::new("Describe", Vec::new(), string_ty, |this, _| {
            let name = receiver(this)?.with(|n: &Named| n.name.clone())?;
            Ok(HostValue::string(format!("player {name}")))
        }))
        .finish();
    (entity, player)
}

fn build_point() -> TypeRef {
    let builder = TypeBuilder::structure("Demo", "Point");
    let ty = builder.type_ref();
    builder
        .field(
            "X",
            prim(Primitive::I32),
            |this| this.with(|p: &Point| HostValue::I32(p.x)),
            |this, value| {
                let x = i32_of(&value, "x")?;
                this.with_mut(|p: &mut Point| p.x = x)
            },
        )
        .default_value(move || HostValue::Object(HostObject::new(ty.clone(), Point::default())))
        .finish()
}

fn build_bag() -> TypeRef {
    let i32_ty = prim(Primitive::I32);
    TypeBuilder::class("Demo", "Bag")
        .indexer(
            IndexerInfo::new(vec![ParamInfo::new("key", prim(Primitive::String))], i32_ty.clone())
                .get(|this, args| {
                    let key = args[0].as_str().unwrap_or_default().to_string();
                    this.with(|bag: &Bag| bag.items.get(&key).copied())?
                        .map(HostValue::I32)
                        .ok_or_else(|| HostError::exception(format!("key '{key}' not found")))
                })
                .set(|this, args, value| {
                    let key = args[0].as_str().unwrap_or_default().to_string();
                    let item = i32_of(&value, "item")?;
                    this.with_mut(|bag: &mut Bag| {
                        bag.items.insert(key, item);
                    })
                }),
        )
        .indexer(
            IndexerInfo::new(
                vec![
                    ParamInfo::new("row", i32_ty.clone()),
                    ParamInfo::new("column", i32_ty.clone()),
                ],
                i32_ty.clone(),
            )
            .get(|this, args| {
                let (row, column) = (i64_of(&args[0])?, i64_of(&args[1])?);
                this.with(|bag: &Bag| {
                    bag.grid
                        .get(row as usize)
                        .and_then(|cells| cells.get(column as usize))
                        .copied()
                        .map(HostValue::I32)
                        .ok_or(HostError::IndexOutOfRange)
                })?
            })
            .set(|this, args, value| {
                let (row, column) = (i64_of(&args[0])?, i64_of(&args[1])?);
                let item = i32_of(&value, "item")?;
                this.with_mut(|bag: &mut Bag| {
                    bag.grid
                        .get_mut(row as usize)
                        .and_then(|cells| cells.get_mut(column as usize))
                        .map(|cell| *cell = item)
                        .ok_or(HostError::IndexOutOfRange)
                })?
            }),
        )
        .method(MethodInfo::new("Count", Vec::new(), i32_ty, |this, _| {
            receiver(this)?.with(|bag: &Bag| HostValue::I32(bag.items.len() as i32))
        }))
        .finish()
}

fn build_holders() -> (TypeRef, TypeRef, TypeRef) {
    let string_ty = prim(Primitive::String);
    let holder = TypeBuilder::class("Demo", "Holder")
        .method(
            MethodInfo::new("Describe", Vec::new(), string_ty.clone(), |_, _| {
                Ok(HostValue::string("plain holder"))
            })
            .static_(),
        )
        .finish();

    let holder1 = TypeBuilder::generic_class(
        "Demo",
        "Holder",
        vec![GenericParam::new("T").with_constraint(Constraint::ValueType)],
        |builder, args| {
            let item = args[0].clone();
            let self_ty = builder.type_ref();
            builder.add_property(
                PropertyInfo::new("Value", item.clone())
                    .get(|this| receiver(this)?.with(|h: &Holder| h.value.clone()))
                    .set(|this, value| receiver(this)?.with_mut(|h: &mut Holder| h.value = value)),
            );
            let ctor_ty = self_ty.clone();
            builder.add_constructor(
                MethodInfo::new(".ctor", Vec::new(), self_ty, move |_, _| {
                    Ok(HostValue::Object(HostObject::new(
                        ctor_ty.clone(),
                        Holder {
                            value: item.default_value(),
                        },
                    )))
                })
                .static_(),
            );
        },
    )
    .finish();

    let holder2 = TypeBuilder::generic_class(
        "Demo",
        "Holder",
        vec![GenericParam::new("K"), GenericParam::new("V")],
        |builder, args| {
            let names: Vec<String> = args.iter().map(TypeRef::full_name).collect();
            let summary = names.join(" -> ");
            builder.add_method(
                MethodInfo::new("Describe", Vec::new(), prim(Primitive::String), move |_, _| {
                    Ok(HostValue::string(summary.clone()))
                })
                .static_(),
            );
        },
    )
    .finish();

    (holder, holder1, holder2)
}
