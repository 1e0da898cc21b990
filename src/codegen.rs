//! Dispatch routine generation.
//!
//! Each handle kind (object of a type, type, generic group) gets one
//! metatable whose `index`, `new_index` and `call` hooks are specialised
//! closures over that kind's member table. Lookup order inside a hook is
//! fixed: named member, then indexing, then generic instantiation, and an
//! invalid-key error when none of them applies.
use crate::context::{
    self, generic_failure, join_arities, routine, AccessorRoutine, BridgeContext, BridgeError,
    MemberFault,
};
use crate::host::{
    receiver, GenericTypeGroup, HostArray, HostEntity, HostError, HostObject, HostValue,
};
use crate::marshal::{self, classify, MarshalError, MarshalKind};
use crate::members::{Member, MemberTable, MethodGroup, Scope};
use crate::overload;
use crate::state::{Metatable, NativeFn, ScriptState, ScriptValue};
use crate::types::{FieldAccess, Getter, MethodInfo, ParamInfo, Primitive, TypeRef, Visibility};
use std::rc::Rc;

/// Generated hooks shared by every handle of one cache key.
pub struct DispatchTable {
    metatable: Rc<Metatable>,
    members: usize,
}

impl DispatchTable {
    fn assemble(
        name: String,
        get: AccessorRoutine,
        set: AccessorRoutine,
        invoke: AccessorRoutine,
        members: usize,
    ) -> Self {
        let metatable = Metatable {
            name,
            index: Some(context::native(get)),
            new_index: Some(context::native(set)),
            call: Some(context::native(invoke)),
            gc: Some(context::native(routine(finalize))),
            tostring: Some(context::native(routine(describe))),
        };
        Self {
            metatable: Rc::new(metatable),
            members,
        }
    }

    pub fn metatable(&self) -> Rc<Metatable> {
        self.metatable.clone()
    }

    pub fn name(&self) -> &str {
        &self.metatable.name
    }

    pub fn member_count(&self) -> usize {
        self.members
    }
}

/// Builds the dispatch table for `entity`'s handle kind.
pub fn generate(state: &mut ScriptState, entity: &HostEntity) -> DispatchTable {
    match entity {
        HostEntity::Object(object) => object_table(state, object.type_ref()),
        HostEntity::Type(ty) => type_table(state, ty),
        HostEntity::GenericGroup(group) => group_table(state, group),
    }
}

fn frame_args(state: &ScriptState, from: usize) -> Vec<ScriptValue> {
    (from..state.top()).map(|idx| state.at(idx)).collect()
}

fn self_entity(ctx: &BridgeContext, state: &ScriptState) -> Result<HostEntity, BridgeError> {
    match state.at(0) {
        ScriptValue::Userdata(handle) => ctx.load_entity(handle),
        other => Err(MarshalError::Mismatch {
            expected: String::from("userdata"),
            found: other.type_name().to_string(),
        }
        .into()),
    }
}

fn self_object(ctx: &BridgeContext, state: &ScriptState) -> Result<HostObject, BridgeError> {
    match self_entity(ctx, state)? {
        HostEntity::Object(object) => Ok(object),
        other => Err(MarshalError::Mismatch {
            expected: String::from("object"),
            found: other.describe(),
        }
        .into()),
    }
}

fn push_entity(ctx: &BridgeContext, state: &mut ScriptState, entity: HostEntity) -> usize {
    let handle = ctx.push_entity(state, entity);
    state.push(ScriptValue::Userdata(handle));
    1
}

fn finalize(ctx: &BridgeContext, state: &mut ScriptState) -> Result<usize, BridgeError> {
    if let ScriptValue::Userdata(handle) = state.at(0) {
        ctx.finalize(handle);
    }
    Ok(0)
}

fn describe(ctx: &BridgeContext, state: &mut ScriptState) -> Result<usize, BridgeError> {
    let text = self_entity(ctx, state)?.describe();
    state.push_str(&text);
    Ok(1)
}

type MemberGet = Box<
    dyn Fn(&BridgeContext, &mut ScriptState, Option<&HostObject>) -> Result<usize, BridgeError>,
>;
type MemberSet = Box<
    dyn Fn(
        &BridgeContext,
        &mut ScriptState,
        Option<&HostObject>,
        &ScriptValue,
    ) -> Result<(), BridgeError>,
>;

fn member_get(
    body: impl Fn(
            &BridgeContext,
            &mut ScriptState,
            Option<&HostObject>,
        ) -> Result<usize, BridgeError>
        + 'static,
) -> MemberGet {
    Box::new(body)
}

fn member_set(
    body: impl Fn(
            &BridgeContext,
            &mut ScriptState,
            Option<&HostObject>,
            &ScriptValue,
        ) -> Result<(), BridgeError>
        + 'static,
) -> MemberSet {
    Box::new(body)
}

fn refuse_get(member: String, fault: MemberFault) -> MemberGet {
    member_get(move |_, _, _| Err(BridgeError::member(member.clone(), fault)))
}

fn refuse_set(member: String, fault: MemberFault) -> MemberSet {
    member_set(move |_, _, _, _| Err(BridgeError::member(member.clone(), fault)))
}

fn read_with(getter: Getter) -> MemberGet {
    member_get(move |ctx, state, target| {
        let value = getter(target)?;
        ctx.push_host_value(state, &value)?;
        Ok(1)
    })
}

fn write_with(member: String, ty: &TypeRef, setter: crate::types::Setter) -> MemberSet {
    let kind = classify(ty);
    member_set(move |ctx, state, target, value| {
        let loaded = marshal::load_value(ctx, state, value, &kind).map_err(|source| {
            BridgeError::InvalidValue {
                member: member.clone(),
                source,
            }
        })?;
        setter(target, loaded)?;
        Ok(())
    })
}

fn compile_get(state: &mut ScriptState, qualified: String, member: &Member) -> MemberGet {
    match member {
        Member::Constant(value) => {
            // Plain constants are converted once; entity constants need a
            // fresh handle per read.
            if let Ok(converted) = marshal::plain_to_script(state, value) {
                return member_get(move |_, state, _| {
                    state.push(converted.clone());
                    Ok(1)
                });
            }
            let value = value.clone();
            member_get(move |ctx, state, _| {
                ctx.push_host_value(state, &value)?;
                Ok(1)
            })
        }
        Member::Field(field) if field.ty.is_byref_like() => {
            refuse_get(qualified, MemberFault::ByRefLike)
        }
        Member::Field(field) => match &field.access {
            FieldAccess::Literal(value) => {
                compile_get(state, qualified, &Member::Constant(value.clone()))
            }
            FieldAccess::ReadOnly(getter) | FieldAccess::Mutable(getter, _) => {
                read_with(getter.clone())
            }
        },
        Member::Property(property) if property.by_ref || property.ty.is_byref_like() => {
            refuse_get(qualified, MemberFault::ByRefLike)
        }
        Member::Property(property) => match &property.getter {
            Some(getter) if getter.is_public() => read_with(getter.body.clone()),
            _ => refuse_get(qualified, MemberFault::NotReadable),
        },
        Member::Methods(group) if group.is_generic() => {
            let group = Rc::new(group.clone());
            let metatable = method_group_metatable(&qualified);
            member_get(move |_, state, target| {
                let bound = BoundGroup {
                    target: target.cloned(),
                    group: group.clone(),
                };
                let handle = state.new_userdata(metatable.clone(), Some(Rc::new(bound)));
                state.push(ScriptValue::Userdata(handle));
                Ok(1)
            })
        }
        Member::Methods(group) => {
            let group = Rc::new(group.clone());
            member_get(move |_, state, target| {
                state.push(ScriptValue::Function(bound_method(target.cloned(), group.clone())));
                Ok(1)
            })
        }
        Member::NestedType(ty) => {
            let ty = ty.clone();
            member_get(move |ctx, state, _| {
                Ok(push_entity(ctx, state, HostEntity::Type(ty.clone())))
            })
        }
    }
}

fn compile_set(qualified: String, member: &Member) -> MemberSet {
    match member {
        Member::Constant(_) => refuse_set(qualified, MemberFault::Constant),
        Member::Field(field) if field.ty.is_byref_like() => {
            refuse_set(qualified, MemberFault::ByRefLike)
        }
        Member::Field(field) => match &field.access {
            FieldAccess::Mutable(_, setter) => write_with(qualified, &field.ty, setter.clone()),
            _ => refuse_set(qualified, MemberFault::ReadOnly),
        },
        Member::Property(property) if property.by_ref || property.ty.is_byref_like() => {
            refuse_set(qualified, MemberFault::ByRefLike)
        }
        Member::Property(property) => match &property.setter {
            Some(setter) if setter.is_public() => {
                write_with(qualified, &property.ty, setter.body.clone())
            }
            _ => refuse_set(qualified, MemberFault::NotWritable),
        },
        Member::Methods(_) => refuse_set(qualified, MemberFault::Method),
        Member::NestedType(_) => refuse_set(qualified, MemberFault::NestedType),
    }
}

/// A member table with one compiled getter and setter per entry.
struct CompiledMembers {
    table: MemberTable,
    getters: Vec<MemberGet>,
    setters: Vec<MemberSet>,
}

impl CompiledMembers {
    fn build(state: &mut ScriptState, ty: &TypeRef, scope: Scope) -> Self {
        let table = MemberTable::build(state, ty, scope);
        let owner = ty.base_name().to_string();
        let mut getters = Vec::with_capacity(table.len());
        let mut setters = Vec::with_capacity(table.len());
        let entries: Vec<(String, Member)> = table
            .iter()
            .map(|(name, member)| (name.to_string(), member.clone()))
            .collect();
        for (name, member) in entries {
            let qualified = format!("{owner}.{name}");
            getters.push(compile_get(state, qualified.clone(), &member));
            setters.push(compile_set(qualified, &member));
        }
        Self {
            table,
            getters,
            setters,
        }
    }

    fn empty(ty: &TypeRef, scope: Scope) -> Self {
        Self {
            table: MemberTable::empty(ty, scope),
            getters: Vec::new(),
            setters: Vec::new(),
        }
    }

    /// `None` when `key` names no member.
    fn get(
        &self,
        ctx: &BridgeContext,
        state: &mut ScriptState,
        target: Option<&HostObject>,
        key: &ScriptValue,
    ) -> Option<Result<usize, BridgeError>> {
        let getter = self.getters.get(self.table.position(key)?)?;
        Some(getter(ctx, state, target))
    }

    fn set(
        &self,
        ctx: &BridgeContext,
        state: &mut ScriptState,
        target: Option<&HostObject>,
        key: &ScriptValue,
        value: &ScriptValue,
    ) -> Option<Result<(), BridgeError>> {
        let setter = self.setters.get(self.table.position(key)?)?;
        Some(setter(ctx, state, target, value))
    }

    fn methods(&self, name: &str) -> Option<&MethodGroup> {
        match self.table.get(name)? {
            Member::Methods(group) => Some(group),
            _ => None,
        }
    }
}

/// Callable for a non-generic method group, closed over its receiver.
fn bound_method(target: Option<HostObject>, group: Rc<MethodGroup>) -> NativeFn {
    context::native(routine(move |ctx, state| {
        let args = frame_args(state, 0);
        let (method, converted) =
            overload::resolve(ctx, state, &group.overloads, &args, &group.name)?;
        overload::invoke(ctx, state, method, target.as_ref(), converted)
    }))
}

/// Payload of a generic method group value.
struct BoundGroup {
    target: Option<HostObject>,
    group: Rc<MethodGroup>,
}

fn bound_group(state: &ScriptState) -> Result<Rc<BoundGroup>, BridgeError> {
    let value = state.at(0);
    let handle = value.as_handle().ok_or_else(|| MarshalError::Mismatch {
        expected: String::from("method group"),
        found: value.type_name().to_string(),
    })?;
    state
        .payload(handle)
        .and_then(|payload| payload.downcast::<BoundGroup>().ok())
        .ok_or(BridgeError::UnregisteredHandle(handle))
}

/// `group[T]` closes the generic overloads of matching arity over `T`.
fn instantiate_method(ctx: &BridgeContext, state: &mut ScriptState) -> Result<usize, BridgeError> {
    let bound = bound_group(state)?;
    let group = &bound.group;
    let key = state.at(1);
    let Some(args) = ctx.type_arguments(&key) else {
        return Err(BridgeError::invalid_key(format!("method group {}", group.name), &key));
    };
    let candidates: Vec<&MethodInfo> = group
        .generics
        .iter()
        .filter(|method| method.generic_arity() == args.len())
        .collect();
    if candidates.is_empty() {
        return Err(BridgeError::InvalidArity {
            name: group.name.clone(),
            expected: join_arities(&group.generic_arities()),
            found: args.len(),
        });
    }
    let mut failure = HostError::NotGeneric(group.name.clone());
    for candidate in candidates {
        match candidate.make_generic(&args) {
            Ok(closed) => {
                let group = Rc::new(MethodGroup::single(closed));
                let function = bound_method(bound.target.clone(), group);
                state.push(ScriptValue::Function(function));
                return Ok(1);
            }
            Err(err) => failure = err,
        }
    }
    Err(generic_failure(group.name.clone(), failure))
}

/// Calling the group directly uses its non-generic overloads.
fn call_group(ctx: &BridgeContext, state: &mut ScriptState) -> Result<usize, BridgeError> {
    let bound = bound_group(state)?;
    let group = &bound.group;
    if group.overloads.is_empty() {
        return Err(BridgeError::InvalidArity {
            name: group.name.clone(),
            expected: join_arities(&group.generic_arities()),
            found: 0,
        });
    }
    let args = frame_args(state, 1);
    let (method, converted) = overload::resolve(ctx, state, &group.overloads, &args, &group.name)?;
    overload::invoke(ctx, state, method, bound.target.as_ref(), converted)
}

fn method_group_metatable(qualified: &str) -> Rc<Metatable> {
    let label = format!("method group {qualified}");
    let text = label.clone();
    Rc::new(Metatable {
        name: label,
        index: Some(context::native(routine(instantiate_method))),
        call: Some(context::native(routine(call_group))),
        tostring: Some(NativeFn::new(move |state| {
            state.push_str(&text);
            Ok(1)
        })),
        ..Metatable::default()
    })
}

enum Indexing {
    Array {
        rank: usize,
        kind: MarshalKind,
        target: String,
    },
    Indexers {
        getters: Vec<MethodInfo>,
        setters: Vec<MethodInfo>,
        multi: bool,
        target: String,
    },
}

impl Indexing {
    fn build(ty: &TypeRef) -> Option<Self> {
        let target = format!("object {}", ty.full_name());
        if let Some((element, rank)) = ty.array_shape() {
            return Some(Indexing::Array {
                rank,
                kind: classify(element),
                target,
            });
        }

        let mut getters = Vec::new();
        let mut setters = Vec::new();
        let mut current = Some(ty.clone());
        while let Some(level) = current {
            for indexer in &level.members().indexers {
                let public = |visibility: Visibility| visibility == Visibility::Public;
                if let Some(getter) = indexer.getter.as_ref().filter(|g| public(g.visibility)) {
                    let body = getter.body.clone();
                    getters.push(MethodInfo::new(
                        "get_Item",
                        indexer.params.clone(),
                        indexer.ty.clone(),
                        move |this, args| body(receiver(this)?, args),
                    ));
                }
                if let Some(setter) = indexer.setter.as_ref().filter(|s| public(s.visibility)) {
                    let body = setter.body.clone();
                    let mut params = indexer.params.clone();
                    params.push(ParamInfo::new("value", indexer.ty.clone()));
                    setters.push(MethodInfo::new(
                        "set_Item",
                        params,
                        TypeRef::primitive(Primitive::Void),
                        move |this, mut args| {
                            let value = args.pop().unwrap_or(HostValue::Null);
                            body(receiver(this)?, args, value)?;
                            Ok(HostValue::Null)
                        },
                    ));
                }
            }
            current = level.base().cloned();
        }
        if getters.is_empty() && setters.is_empty() {
            return None;
        }
        let multi = getters.iter().any(|m| m.params.len() > 1)
            || setters.iter().any(|m| m.params.len() > 2);
        Some(Indexing::Indexers {
            getters,
            setters,
            multi,
            target,
        })
    }

    fn array_indices(
        ctx: &BridgeContext,
        key: &ScriptValue,
        rank: usize,
        target: &str,
    ) -> Result<Vec<i64>, BridgeError> {
        let integral_floats = ctx.config().integral_floats;
        let as_index = |value: &ScriptValue| match value {
            ScriptValue::Integer(index) => Some(*index),
            ScriptValue::Number(number) if integral_floats && number.fract() == 0.0 => {
                Some(*number as i64)
            }
            _ => None,
        };
        let indices = match key {
            ScriptValue::Table(table) => table
                .to_vec()
                .iter()
                .map(as_index)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| BridgeError::invalid_key(target, key))?,
            other => vec![as_index(other).ok_or_else(|| BridgeError::invalid_key(target, key))?],
        };
        if indices.len() != rank {
            return Err(BridgeError::IndexCount {
                target: target.to_string(),
                expected: rank,
            });
        }
        Ok(indices)
    }

    fn keys(multi: bool, key: &ScriptValue) -> Vec<ScriptValue> {
        match key {
            ScriptValue::Table(table) if multi => table.to_vec(),
            other => vec![other.clone()],
        }
    }

    fn get(
        &self,
        ctx: &BridgeContext,
        state: &mut ScriptState,
        this: &HostObject,
        key: &ScriptValue,
    ) -> Result<usize, BridgeError> {
        match self {
            Indexing::Array { rank, target, .. } => {
                let indices = Self::array_indices(ctx, key, *rank, target)?;
                let value = this.with(|array: &HostArray| array.get(&indices))??;
                ctx.push_host_value(state, &value)?;
                Ok(1)
            }
            Indexing::Indexers {
                getters,
                multi,
                target,
                ..
            } => {
                let args = Self::keys(*multi, key);
                let (method, converted) = overload::resolve(ctx, state, getters, &args, target)
                    .map_err(|_| BridgeError::invalid_key(target.as_str(), key))?;
                overload::invoke(ctx, state, method, Some(this), converted)
            }
        }
    }

    fn set(
        &self,
        ctx: &BridgeContext,
        state: &mut ScriptState,
        this: &HostObject,
        key: &ScriptValue,
        value: &ScriptValue,
    ) -> Result<(), BridgeError> {
        match self {
            Indexing::Array { rank, kind, target } => {
                let indices = Self::array_indices(ctx, key, *rank, target)?;
                let loaded = marshal::load_value(ctx, state, value, kind).map_err(|source| {
                    BridgeError::InvalidValue {
                        member: format!("{target}[{indices:?}]"),
                        source,
                    }
                })?;
                this.with_mut(|array: &mut HostArray| array.set(&indices, loaded))??;
                Ok(())
            }
            Indexing::Indexers {
                setters,
                multi,
                target,
                ..
            } => {
                let mut args = Self::keys(*multi, key);
                args.push(value.clone());
                let (method, converted) = overload::resolve(ctx, state, setters, &args, target)?;
                overload::invoke(ctx, state, method, Some(this), converted)?;
                Ok(())
            }
        }
    }
}

fn object_table(state: &mut ScriptState, ty: &TypeRef) -> DispatchTable {
    let members = Rc::new(CompiledMembers::build(state, ty, Scope::Instance));
    let indexing = Indexing::build(ty).map(Rc::new);
    let target = format!("object {}", ty.full_name());

    let get = {
        let members = members.clone();
        let indexing = indexing.clone();
        let target = target.clone();
        routine(move |ctx, state| {
            let this = self_object(ctx, state)?;
            let key = state.at(1);
            if let Some(result) = members.get(ctx, state, Some(&this), &key) {
                return result;
            }
            match &indexing {
                Some(indexing) => indexing.get(ctx, state, &this, &key),
                None => Err(BridgeError::invalid_key(target.as_str(), &key)),
            }
        })
    };

    let set = {
        let members = members.clone();
        let target = target.clone();
        routine(move |ctx, state| {
            let this = self_object(ctx, state)?;
            let key = state.at(1);
            let value = state.at(2);
            if let Some(result) = members.set(ctx, state, Some(&this), &key, &value) {
                return result.map(|()| 0);
            }
            match &indexing {
                Some(indexing) => indexing.set(ctx, state, &this, &key, &value).map(|()| 0),
                None => Err(BridgeError::invalid_key(target.as_str(), &key)),
            }
        })
    };

    // Objects exposing a public `Invoke` method can be called directly.
    let invoke = match members.methods("Invoke").filter(|group| !group.overloads.is_empty()) {
        Some(group) => {
            let group = Rc::new(group.clone());
            routine(move |ctx, state| {
                let this = self_object(ctx, state)?;
                let args = frame_args(state, 1);
                let (method, converted) =
                    overload::resolve(ctx, state, &group.overloads, &args, &group.name)?;
                overload::invoke(ctx, state, method, Some(&this), converted)
            })
        }
        None => {
            let target = target.clone();
            routine(move |_, _| Err(BridgeError::NotCallable(target.clone())))
        }
    };

    DispatchTable::assemble(target, get, set, invoke, members.table.len())
}

fn type_table(state: &mut ScriptState, ty: &TypeRef) -> DispatchTable {
    let members = CompiledMembers::build(state, ty, Scope::Static);
    let generics = ty
        .is_generic_definition()
        .then(|| GenericTypeGroup::new(ty.full_name(), None).with_definition(ty.clone()));
    statics_table(format!("type {}", ty.full_name()), members, generics, Some(ty.clone()))
}

fn group_table(state: &mut ScriptState, group: &GenericTypeGroup) -> DispatchTable {
    let members = match group.plain() {
        Some(plain) => CompiledMembers::build(state, plain, Scope::Static),
        None => {
            let owner = group
                .type_set()
                .into_iter()
                .next()
                .unwrap_or_else(|| TypeRef::primitive(Primitive::Object));
            CompiledMembers::empty(&owner, Scope::Static)
        }
    };
    statics_table(
        format!("generic group {}", group.name()),
        members,
        Some(group.clone()),
        group.plain().cloned(),
    )
}

/// Shared shape of type and generic-group handles: static members, then
/// generic instantiation by type arguments, and construction on call.
fn statics_table(
    target: String,
    members: CompiledMembers,
    generics: Option<GenericTypeGroup>,
    constructible: Option<TypeRef>,
) -> DispatchTable {
    let count = members.table.len();
    let members = Rc::new(members);

    let get = {
        let members = members.clone();
        let target = target.clone();
        routine(move |ctx, state| {
            let key = state.at(1);
            if let Some(result) = members.get(ctx, state, None, &key) {
                return result;
            }
            if let Some(group) = &generics {
                if let Some(args) = ctx.type_arguments(&key) {
                    let closed = ctx.construct_generic(group, &args)?;
                    return Ok(push_entity(ctx, state, HostEntity::Type(closed)));
                }
            }
            Err(BridgeError::invalid_key(target.as_str(), &key))
        })
    };

    let set = {
        let target = target.clone();
        routine(move |ctx, state| {
            let key = state.at(1);
            let value = state.at(2);
            match members.set(ctx, state, None, &key, &value) {
                Some(result) => result.map(|()| 0),
                None => Err(BridgeError::invalid_key(target.as_str(), &key)),
            }
        })
    };

    let invoke = constructor(target.clone(), constructible);
    DispatchTable::assemble(target, get, set, invoke, count)
}

fn constructor(target: String, ty: Option<TypeRef>) -> AccessorRoutine {
    let Some(ty) = ty.filter(|ty| !ty.is_generic_definition()) else {
        return routine(move |_, _| Err(BridgeError::NotConstructible(target.clone())));
    };
    let ctors: Vec<MethodInfo> = ty
        .members()
        .constructors
        .iter()
        .filter(|ctor| ctor.visibility == Visibility::Public)
        .cloned()
        .collect();
    let has_nullary = ctors.iter().any(|ctor| overload::arg_bounds(ctor).0 == 0);
    let name = format!("{}..ctor", ty.base_name());
    routine(move |ctx, state| {
        let args = frame_args(state, 1);
        // Value types always have a parameterless constructor.
        if args.is_empty() && ty.is_value_type() && !has_nullary {
            let value = ty.default_value();
            ctx.push_host_value(state, &value)?;
            return Ok(1);
        }
        if ctors.is_empty() {
            return Err(BridgeError::NotConstructible(target.clone()));
        }
        let (ctor, converted) = overload::resolve(ctx, state, &ctors, &args, &name)?;
        overload::invoke(ctx, state, ctor, None, converted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn object_and_type_tables_differ() {
        let (mut state, _ctx) = fixtures::bridge();
        let types = fixtures::types();
        let object = generate(&mut state, &HostEntity::Object(fixtures::vector(1.0, 2.0, 3.0)));
        let ty = generate(&mut state, &HostEntity::Type(types.vector.clone()));
        assert_eq!(object.name(), "object Demo.Vector3");
        assert_eq!(ty.name(), "type Demo.Vector3");
        assert!(object.member_count() > 0);
        assert!(ty.member_count() > 0);
    }

    #[test]
    fn open_generic_types_are_not_constructible() {
        let (mut state, ctx) = fixtures::bridge();
        let types = fixtures::types();
        let handle = ctx.push_entity(&mut state, HostEntity::Type(types.holder1.clone()));
        let err = state.call(&ScriptValue::Userdata(handle), vec![]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "type Demo.Holder`1 cannot be constructed"
        );
    }

    #[test]
    fn value_types_default_construct() {
        let (mut state, ctx) = fixtures::bridge();
        let types = fixtures::types();
        let handle = ctx.push_entity(&mut state, HostEntity::Type(types.point.clone()));
        let results = state
            .call(&ScriptValue::Userdata(handle), vec![])
            .expect("structs construct without arguments");
        let key = state.string("X");
        let x = state.index(&results[0], key).expect("X is readable");
        assert_eq!(x, ScriptValue::Integer(0));
    }
}
