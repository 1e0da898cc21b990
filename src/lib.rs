pub mod cache;
pub mod codegen;
pub mod context;
pub mod host;
pub mod marshal;
pub mod matcher;
pub mod members;
pub mod overload;
pub mod registry;
pub mod state;
pub mod types;

#[cfg(test)]
mod fixtures;

use thiserror::Error;

pub use context::{BridgeConfig, BridgeContext, BridgeError};
pub use host::{HostEntity, HostError, HostObject, HostValue};
pub use marshal::{MarshalError, MarshalKind};
pub use state::{Handle, ScriptError, ScriptState, ScriptValue};
pub use types::{TypeBuilder, TypeCatalog, TypeRef};

#[derive(Debug, Error)]
pub enum InteropError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Attaches a bridge for `catalog` to `state` and returns the context that
/// owns its handles and generated tables.
pub fn install(
    state: &mut ScriptState,
    catalog: TypeCatalog,
    config: BridgeConfig,
) -> std::rc::Rc<BridgeContext> {
    BridgeContext::install(state, catalog, config)
}

/// Pushes `value` onto `state` through the installed bridge.
pub fn push_value(state: &mut ScriptState, value: &HostValue) -> Result<(), InteropError> {
    let ctx = BridgeContext::from_state(state)?;
    ctx.push_host_value(state, value)?;
    Ok(())
}

/// Loads the value at `idx` as `kind` through the installed bridge.
pub fn load_value(
    state: &ScriptState,
    idx: usize,
    kind: &MarshalKind,
) -> Result<HostValue, InteropError> {
    let ctx = BridgeContext::from_state(state)?;
    Ok(ctx.load_host_value(state, idx, kind)?)
}
