//! Overload selection: candidates are filtered by argument count and then
//! tried in declaration order; the first whose parameters accept every
//! argument wins.
use crate::context::{BridgeContext, BridgeError, MemberFault};
use crate::host::{HostEntity, HostObject, HostValue};
use crate::marshal::{self, classify, MarshalError, MarshalKind};
use crate::state::{ScriptState, ScriptValue};
use crate::types::{MethodBody, MethodInfo, ParamKind, Primitive};

/// Smallest and largest argument count `method` accepts; `None` means any
/// number of trailing arguments.
pub fn arg_bounds(method: &MethodInfo) -> (usize, Option<usize>) {
    let mut min = 0;
    let mut max = Some(0usize);
    for param in &method.params {
        match param.kind {
            ParamKind::Required => {
                min += 1;
                max = max.map(|n| n + 1);
            }
            ParamKind::Optional(_) => max = max.map(|n| n + 1),
            ParamKind::Params => max = None,
        }
    }
    (min, max)
}

fn accepts_count(method: &MethodInfo, count: usize) -> bool {
    let (min, max) = arg_bounds(method);
    count >= min && max.map_or(true, |max| count <= max)
}

/// An argument that could not be converted, with its 1-based position.
#[derive(Debug)]
struct ArgFailure {
    position: usize,
    param: String,
    error: MarshalError,
}

fn load_arg(
    ctx: &BridgeContext,
    state: &ScriptState,
    args: &[ScriptValue],
    index: usize,
    kind: &MarshalKind,
    param: &str,
) -> Result<HostValue, ArgFailure> {
    marshal::load_value(ctx, state, &args[index], kind).map_err(|error| ArgFailure {
        position: index + 1,
        param: param.to_string(),
        error,
    })
}

/// The trailing arguments as a single array value. One argument that already
/// is an array of the element type is passed through unchanged.
fn params_array(
    ctx: &BridgeContext,
    state: &ScriptState,
    args: &[ScriptValue],
    start: usize,
    param: &crate::types::ParamInfo,
) -> Result<HostValue, ArgFailure> {
    let array_ty = param.ty.array_type(1);
    if args.len() == start + 1 {
        if let ScriptValue::Userdata(handle) = &args[start] {
            if let Some(HostEntity::Object(object)) = ctx.lookup_entity(*handle) {
                if object.type_ref() == &array_ty {
                    return Ok(HostValue::Object(object));
                }
            }
        }
    }
    let kind = classify(&param.ty);
    let items = (start..args.len())
        .map(|index| load_arg(ctx, state, args, index, &kind, &param.name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HostValue::Object(HostObject::array(&param.ty, items)))
}

fn convert_args(
    ctx: &BridgeContext,
    state: &ScriptState,
    method: &MethodInfo,
    args: &[ScriptValue],
) -> Result<Vec<HostValue>, ArgFailure> {
    let mut converted = Vec::with_capacity(method.params.len());
    for (index, param) in method.params.iter().enumerate() {
        let value = match &param.kind {
            ParamKind::Optional(default) if index >= args.len() => default.clone(),
            ParamKind::Required | ParamKind::Optional(_) => {
                load_arg(ctx, state, args, index, &classify(&param.ty), &param.name)?
            }
            ParamKind::Params => params_array(ctx, state, args, index, param)?,
        };
        converted.push(value);
    }
    Ok(converted)
}

/// Picks the first overload in `candidates` accepting `args` and returns it
/// together with the converted arguments.
pub fn resolve<'m>(
    ctx: &BridgeContext,
    state: &ScriptState,
    candidates: &'m [MethodInfo],
    args: &[ScriptValue],
    member: &str,
) -> Result<(&'m MethodInfo, Vec<HostValue>), BridgeError> {
    let mut first_failure = None;
    let mut counted = 0;
    for method in candidates.iter().filter(|m| accepts_count(m, args.len())) {
        counted += 1;
        match convert_args(ctx, state, method, args) {
            Ok(converted) => return Ok((method, converted)),
            Err(failure) => {
                first_failure.get_or_insert(failure);
            }
        }
    }

    let detail = match first_failure {
        Some(failure) if counted == 1 => format!(
            "argument #{} ('{}'): {}",
            failure.position, failure.param, failure.error
        ),
        Some(_) => {
            let found: Vec<&str> = args.iter().map(ScriptValue::type_name).collect();
            format!("no overload accepts ({})", found.join(", "))
        }
        None if candidates.is_empty() => String::from("no callable overloads"),
        None => format!("no overload takes {} arguments", args.len()),
    };
    Err(BridgeError::InvalidArgs {
        member: member.to_string(),
        detail,
    })
}

/// Calls `method` and pushes its result. Returns the number of results.
pub fn invoke(
    ctx: &BridgeContext,
    state: &mut ScriptState,
    method: &MethodInfo,
    target: Option<&HostObject>,
    args: Vec<HostValue>,
) -> Result<usize, BridgeError> {
    if method.ret.is_byref_like() {
        return Err(BridgeError::member(method.name.clone(), MemberFault::ByRefLike));
    }
    let MethodBody::Native(body) = &method.body else {
        return Err(BridgeError::InvalidArity {
            name: method.name.clone(),
            expected: method.generic_arity().to_string(),
            found: 0,
        });
    };
    let result = body(target, args)?;
    if method.ret.as_primitive() == Some(Primitive::Void) {
        return Ok(0);
    }
    ctx.push_host_value(state, &result)?;
    Ok(1)
}
