//! Per-state bridge context: owns the entity registry and the dispatch cache,
//! and is the only place where routine failures are turned into script
//! errors.
use crate::cache::{CacheKey, DispatchCache};
use crate::codegen;
use crate::host::{GenericTypeGroup, HostEntity, HostError, HostValue};
use crate::marshal::{self, MarshalError, MarshalKind};
use crate::registry::EntityRegistry;
use crate::state::{Handle, NativeFn, ScriptError, ScriptState, ScriptValue};
use crate::types::{TypeCatalog, TypeRef};
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;

/// Why a named member refused an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFault {
    ReadOnly,
    Constant,
    NotReadable,
    NotWritable,
    ByRefLike,
    Method,
    NestedType,
}

impl fmt::Display for MemberFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberFault::ReadOnly => "field is read-only",
            MemberFault::Constant => "constant cannot be assigned",
            MemberFault::NotReadable => "property has no public getter",
            MemberFault::NotWritable => "property has no public setter",
            MemberFault::ByRefLike => "by-ref-like values cannot cross into scripts",
            MemberFault::Method => "methods cannot be assigned",
            MemberFault::NestedType => "nested types cannot be assigned",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("invalid key '{key}' for {target}")]
    InvalidKey { target: String, key: String },
    #[error("'{member}': {fault}")]
    Member { member: String, fault: MemberFault },
    #[error("invalid value for '{member}': {source}")]
    InvalidValue { member: String, source: MarshalError },
    #[error("invalid arguments to '{member}': {detail}")]
    InvalidArgs { member: String, detail: String },
    #[error("invalid arity {found} for '{name}', expected {expected}")]
    InvalidArity { name: String, expected: String, found: usize },
    #[error("invalid constraints for '{name}': {detail}")]
    InvalidConstraints { name: String, detail: String },
    #[error("incorrect number of indices for {target}: expected {expected}")]
    IndexCount { target: String, expected: usize },
    #[error("{0} cannot be called")]
    NotCallable(String),
    #[error("{0} cannot be constructed")]
    NotConstructible(String),
    #[error("unknown host type '{0}'")]
    UnknownType(String),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("handle {0} is not registered with this bridge")]
    UnregisteredHandle(Handle),
    #[error("host code panicked: {0}")]
    Panic(String),
    #[error("no bridge is installed on this state")]
    NotInstalled,
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl BridgeError {
    pub fn member(member: impl Into<String>, fault: MemberFault) -> Self {
        BridgeError::Member {
            member: member.into(),
            fault,
        }
    }

    pub fn invalid_key(target: impl Into<String>, key: &ScriptValue) -> Self {
        BridgeError::InvalidKey {
            target: target.into(),
            key: describe_key(key),
        }
    }
}

fn describe_key(key: &ScriptValue) -> String {
    match key {
        ScriptValue::String(text) => text.to_string(),
        ScriptValue::Integer(number) => number.to_string(),
        ScriptValue::Number(number) => number.to_string(),
        ScriptValue::Boolean(flag) => flag.to_string(),
        other => other.type_name().to_string(),
    }
}

/// A generated accessor: reads its operands from the current frame and
/// returns how many results it pushed.
pub type AccessorRoutine =
    Rc<dyn Fn(&BridgeContext, &mut ScriptState) -> Result<usize, BridgeError>>;

pub fn routine(
    body: impl Fn(&BridgeContext, &mut ScriptState) -> Result<usize, BridgeError> + 'static,
) -> AccessorRoutine {
    Rc::new(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Convert panics in host code into script errors. When off, a panic
    /// propagates to whoever drives the state, which is left consistent.
    pub catch_panics: bool,
    /// Accept integral floating-point numbers where integers are expected.
    pub integral_floats: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            integral_floats: true,
        }
    }
}

impl BridgeConfig {
    pub fn with_catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    pub fn with_integral_floats(mut self, enabled: bool) -> Self {
        self.integral_floats = enabled;
        self
    }
}

pub struct BridgeContext {
    catalog: TypeCatalog,
    config: BridgeConfig,
    registry: RefCell<EntityRegistry>,
    cache: DispatchCache,
}

impl BridgeContext {
    pub fn new(catalog: TypeCatalog, config: BridgeConfig) -> Self {
        Self {
            catalog,
            config,
            registry: RefCell::new(EntityRegistry::new()),
            cache: DispatchCache::new(),
        }
    }

    /// Creates a context and attaches it to `state` as its application data.
    pub fn install(
        state: &mut ScriptState,
        catalog: TypeCatalog,
        config: BridgeConfig,
    ) -> Rc<Self> {
        let ctx = Rc::new(Self::new(catalog, config));
        state.set_app_data(ctx.clone());
        tracing::debug!(types = ctx.catalog.len(), ?config, "installed bridge context");
        ctx
    }

    pub fn from_state(state: &ScriptState) -> Result<Rc<Self>, BridgeError> {
        state.app_data::<BridgeContext>().ok_or(BridgeError::NotInstalled)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &DispatchCache {
        &self.cache
    }

    pub fn live_entities(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Reuses the live handle of an object already in flight, otherwise
    /// allocates a userdata whose metatable comes from the dispatch cache.
    pub fn push_entity(&self, state: &mut ScriptState, entity: HostEntity) -> Handle {
        let cached = self.registry.borrow().cached_handle(state, &entity);
        if let Some(handle) = cached {
            // The script may have released it; the new reference keeps it alive.
            state.retain(handle);
            return handle;
        }
        let key = CacheKey::for_entity(&entity);
        let table = self
            .cache
            .get_or_create(&key, || codegen::generate(state, &entity));
        let handle = state.new_userdata(table.metatable(), None);
        self.registry.borrow_mut().insert(handle, entity);
        handle
    }

    pub fn lookup_entity(&self, handle: Handle) -> Option<HostEntity> {
        self.registry.borrow().get(handle).cloned()
    }

    /// Entity behind a handle this bridge issued. A miss means the handle was
    /// forged or belongs to another bridge.
    pub fn load_entity(&self, handle: Handle) -> Result<HostEntity, BridgeError> {
        self.lookup_entity(handle)
            .ok_or(BridgeError::UnregisteredHandle(handle))
    }

    pub fn finalize(&self, handle: Handle) -> bool {
        self.registry.borrow_mut().finalize(handle)
    }

    pub fn push_host_value(
        &self,
        state: &mut ScriptState,
        value: &HostValue,
    ) -> Result<(), BridgeError> {
        marshal::push(self, state, value).map_err(BridgeError::from)
    }

    pub fn load_host_value(
        &self,
        state: &ScriptState,
        idx: usize,
        kind: &MarshalKind,
    ) -> Result<HostValue, BridgeError> {
        marshal::load(self, state, idx, kind).map_err(BridgeError::from)
    }

    /// Resolves `name` in the catalog and pushes a handle for it.
    pub fn push_type_by_name(
        &self,
        state: &mut ScriptState,
        name: &str,
    ) -> Result<Handle, BridgeError> {
        let entity = self
            .catalog
            .resolve(name)
            .ok_or_else(|| BridgeError::UnknownType(name.to_string()))?;
        let handle = self.push_entity(state, entity);
        state.push(ScriptValue::Userdata(handle));
        Ok(handle)
    }

    /// Reads `key` as a list of type arguments: a single type handle or a
    /// sequence table of them. Anything else is not a type-argument key.
    pub fn type_arguments(&self, key: &ScriptValue) -> Option<Vec<TypeRef>> {
        let as_type = |value: &ScriptValue| match value {
            ScriptValue::Userdata(handle) => match self.lookup_entity(*handle)? {
                HostEntity::Type(ty) => Some(ty),
                HostEntity::GenericGroup(group) => group.plain().cloned(),
                HostEntity::Object(_) => None,
            },
            _ => None,
        };
        match key {
            ScriptValue::Table(table) if !table.is_empty() => {
                table.to_vec().iter().map(as_type).collect()
            }
            other => as_type(other).map(|ty| vec![ty]),
        }
    }

    /// Instantiates the definition of matching arity from `candidates`.
    pub fn construct_generic(
        &self,
        candidates: &GenericTypeGroup,
        args: &[TypeRef],
    ) -> Result<TypeRef, BridgeError> {
        let definition = candidates
            .definition(args.len())
            .ok_or_else(|| BridgeError::InvalidArity {
                name: candidates.name().to_string(),
                expected: join_arities(&candidates.arities()),
                found: args.len(),
            })?;
        definition
            .make_generic_type(args)
            .map_err(|err| generic_failure(definition.full_name(), err))
    }

    /// Runs a routine for the runtime, containing host failures.
    pub fn run(
        &self,
        state: &mut ScriptState,
        routine: &AccessorRoutine,
    ) -> Result<usize, ScriptError> {
        let outcome = if self.config.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| routine(self, state)))
                .unwrap_or_else(|payload| {
                    Err(BridgeError::Panic(panic_message(payload.as_ref())))
                })
        } else {
            routine(self, state)
        };
        outcome.map_err(|err| match err {
            BridgeError::Script(inner) => inner,
            other => {
                tracing::debug!(error = %other, "routine failed");
                ScriptError::Runtime(other.to_string())
            }
        })
    }
}

/// Wraps a routine as a native function that looks the context up from the
/// state it is called on.
pub fn native(routine: AccessorRoutine) -> NativeFn {
    NativeFn::new(move |state| {
        let ctx = BridgeContext::from_state(state)
            .map_err(|err| ScriptError::Runtime(err.to_string()))?;
        ctx.run(state, &routine)
    })
}

pub(crate) fn join_arities(arities: &[usize]) -> String {
    arities
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

pub(crate) fn generic_failure(name: String, err: HostError) -> BridgeError {
    match err {
        HostError::ConstraintViolation { .. } => BridgeError::InvalidConstraints {
            name,
            detail: err.to_string(),
        },
        HostError::GenericArity { expected, found, .. } => BridgeError::InvalidArity {
            name,
            expected: expected.to_string(),
            found,
        },
        other => BridgeError::Host(other),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    String::from("unknown panic payload")
}
