//! Scripting-engine surface consumed by the bridge.
//!
//! This is not a language: it is the value stack, interned strings, userdata
//! heap and collector model that a host-facing bridge needs from an embedded
//! scripting runtime. Native functions see a frame whose slot `0` is the first
//! argument and report how many results they left on top of the stack.
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;

const MAX_CALL_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Runtime(String),
    #[error("attempt to {action} a {type_name} value")]
    Type {
        action: &'static str,
        type_name: &'static str,
    },
    #[error("userdata {0} is no longer live")]
    DeadHandle(Handle),
    #[error("stack overflow")]
    StackOverflow,
}

/// Interned scripting string. Two strings with equal contents created by the
/// same state share one allocation, so [`ScriptStr::identity`] is a valid
/// substitute for comparing characters.
#[derive(Clone)]
pub struct ScriptStr(Rc<str>);

impl ScriptStr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for ScriptStr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl fmt::Debug for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type NativeBody = dyn Fn(&mut ScriptState) -> Result<usize, ScriptError>;

/// Function implemented by the embedder.
#[derive(Clone)]
pub struct NativeFn(Rc<NativeBody>);

impl NativeFn {
    pub fn new(body: impl Fn(&mut ScriptState) -> Result<usize, ScriptError> + 'static) -> Self {
        NativeFn(Rc::new(body))
    }

    pub fn ptr_eq(&self, other: &NativeFn) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function: {:p}", Rc::as_ptr(&self.0) as *const u8)
    }
}

/// Sequence table (1-based, like the runtime's array part).
#[derive(Clone, Default)]
pub struct Table(Rc<RefCell<Vec<ScriptValue>>>);

impl Table {
    pub fn from_values(values: Vec<ScriptValue>) -> Self {
        Table(Rc::new(RefCell::new(values)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: i64) -> ScriptValue {
        if index < 1 {
            return ScriptValue::Nil;
        }
        self.0
            .borrow()
            .get(index as usize - 1)
            .cloned()
            .unwrap_or(ScriptValue::Nil)
    }

    /// Stores `value` at `index`; writing one past the end appends.
    pub fn set(&self, index: i64, value: ScriptValue) -> bool {
        let mut items = self.0.borrow_mut();
        if index < 1 || index as usize > items.len() + 1 {
            return false;
        }
        let slot = index as usize - 1;
        if slot == items.len() {
            items.push(value);
        } else {
            items[slot] = value;
        }
        true
    }

    pub fn to_vec(&self) -> Vec<ScriptValue> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

/// Opaque userdata token. A handle stays valid while its slot generation is
/// unchanged; once the collector sweeps it the slot moves to a new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}@{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
pub enum ScriptValue {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(ScriptStr),
    LightUserdata(usize),
    Userdata(Handle),
    Table(Table),
    Function(NativeFn),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::Integer(_) | ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::LightUserdata(_) | ScriptValue::Userdata(_) => "userdata",
            ScriptValue::Table(_) => "table",
            ScriptValue::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            ScriptValue::Userdata(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        use ScriptValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (Integer(a), Number(b)) | (Number(b), Integer(a)) => *a as f64 == *b,
            (String(a), String(b)) => a == b,
            (LightUserdata(a), LightUserdata(b)) => a == b,
            (Userdata(a), Userdata(b)) => a == b,
            (Table(a), Table(b)) => a.ptr_eq(b),
            (Function(a), Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Hooks the runtime calls for a userdata. Every hook receives the userdata
/// itself in slot `0`.
#[derive(Clone, Default)]
pub struct Metatable {
    pub name: String,
    pub index: Option<NativeFn>,
    pub new_index: Option<NativeFn>,
    pub call: Option<NativeFn>,
    pub gc: Option<NativeFn>,
    pub tostring: Option<NativeFn>,
}

impl fmt::Debug for Metatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metatable")
            .field("name", &self.name)
            .field("index", &self.index.is_some())
            .field("new_index", &self.new_index.is_some())
            .field("call", &self.call.is_some())
            .finish()
    }
}

struct UserdataCell {
    metatable: Rc<Metatable>,
    payload: Option<Rc<dyn Any>>,
    reachable: bool,
}

struct UserdataSlot {
    generation: u32,
    cell: Option<UserdataCell>,
}

struct PendingFinalizer {
    handle: Handle,
    metatable: Rc<Metatable>,
}

/// One scripting-engine instance.
#[derive(Default)]
pub struct ScriptState {
    stack: Vec<ScriptValue>,
    base: usize,
    depth: usize,
    strings: HashSet<Rc<str>>,
    slots: Vec<UserdataSlot>,
    free_slots: Vec<u32>,
    pending: VecDeque<PendingFinalizer>,
    app_data: Option<Rc<dyn Any>>,
}

impl ScriptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots in the current frame.
    pub fn top(&self) -> usize {
        self.stack.len() - self.base
    }

    pub fn push(&mut self, value: ScriptValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Option<ScriptValue> {
        if self.top() == 0 {
            return None;
        }
        self.stack.pop()
    }

    pub fn set_top(&mut self, top: usize) {
        self.stack.resize(self.base + top, ScriptValue::Nil);
    }

    pub fn slot(&self, idx: usize) -> Option<&ScriptValue> {
        self.stack.get(self.base + idx)
    }

    /// Value at `idx`, or nil when the frame is shorter.
    pub fn at(&self, idx: usize) -> ScriptValue {
        self.slot(idx).cloned().unwrap_or(ScriptValue::Nil)
    }

    pub fn intern(&mut self, text: &str) -> ScriptStr {
        if let Some(existing) = self.strings.get(text) {
            return ScriptStr(existing.clone());
        }
        let interned: Rc<str> = Rc::from(text);
        self.strings.insert(interned.clone());
        ScriptStr(interned)
    }

    pub fn push_str(&mut self, text: &str) {
        let interned = self.intern(text);
        self.push(ScriptValue::String(interned));
    }

    pub fn string(&mut self, text: &str) -> ScriptValue {
        ScriptValue::String(self.intern(text))
    }

    pub fn new_userdata(
        &mut self,
        metatable: Rc<Metatable>,
        payload: Option<Rc<dyn Any>>,
    ) -> Handle {
        let cell = UserdataCell {
            metatable,
            payload,
            reachable: true,
        };
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.cell = Some(cell);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(UserdataSlot {
            generation: 0,
            cell: Some(cell),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    fn cell(&self, handle: Handle) -> Option<&UserdataCell> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.cell.as_ref()
    }

    /// True while the handle has not been swept by the collector.
    pub fn is_live(&self, handle: Handle) -> bool {
        self.cell(handle).is_some()
    }

    pub fn metatable(&self, handle: Handle) -> Option<Rc<Metatable>> {
        self.cell(handle).map(|cell| cell.metatable.clone())
    }

    pub fn payload(&self, handle: Handle) -> Option<Rc<dyn Any>> {
        self.cell(handle).and_then(|cell| cell.payload.clone())
    }

    /// Drops the script-side reference to a userdata so the next sweep
    /// collects it.
    pub fn release(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation {
                if let Some(cell) = slot.cell.as_mut() {
                    cell.reachable = false;
                }
            }
        }
    }

    /// Marks a released but not yet swept userdata reachable again, as when
    /// the script receives it anew. Returns `false` for swept handles.
    pub fn retain(&mut self, handle: Handle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => match slot.cell.as_mut() {
                Some(cell) => {
                    cell.reachable = true;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Collects every released userdata and queues its finalizer without
    /// running it. Returns the number of collected handles.
    pub fn sweep(&mut self) -> usize {
        let mut collected = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let released = matches!(&slot.cell, Some(cell) if !cell.reachable);
            if !released {
                continue;
            }
            if let Some(cell) = slot.cell.take() {
                self.pending.push_back(PendingFinalizer {
                    handle: Handle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    metatable: cell.metatable,
                });
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(index as u32);
                collected += 1;
            }
        }
        collected
    }

    /// Runs queued `gc` hooks. Finalizer failures are logged and skipped.
    pub fn run_finalizers(&mut self) -> usize {
        let mut finalized = 0;
        while let Some(pending) = self.pending.pop_front() {
            if let Some(gc) = &pending.metatable.gc {
                let arg = ScriptValue::Userdata(pending.handle);
                if let Err(err) = self.invoke(gc, vec![arg]) {
                    tracing::warn!(handle = %pending.handle, "finalizer failed: {err}");
                }
            }
            finalized += 1;
        }
        finalized
    }

    pub fn collect_garbage(&mut self) -> usize {
        self.sweep();
        self.run_finalizers()
    }

    pub fn live_userdata(&self) -> usize {
        self.slots.iter().filter(|slot| slot.cell.is_some()).count()
    }

    pub fn set_app_data<T: Any>(&mut self, data: Rc<T>) {
        self.app_data = Some(data);
    }

    pub fn app_data<T: Any>(&self) -> Option<Rc<T>> {
        self.app_data.clone()?.downcast::<T>().ok()
    }

    fn invoke(
        &mut self,
        function: &NativeFn,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>, ScriptError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::StackOverflow);
        }
        let saved_base = self.base;
        let frame_start = self.stack.len();
        self.stack.extend(args);
        self.base = frame_start;
        self.depth += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (function.0)(self)));
        self.depth -= 1;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                // Unwind with the caller's frame restored.
                self.stack.truncate(frame_start);
                self.base = saved_base;
                panic::resume_unwind(payload)
            }
        };
        let results = outcome.map(|count| {
            let len = self.stack.len();
            let count = count.min(len.saturating_sub(frame_start));
            self.stack.split_off(len - count)
        });
        self.stack.truncate(frame_start);
        self.base = saved_base;
        results
    }

    /// Runs `body` and restores the stack and frame if it fails, leaving the
    /// state exactly as it was before the call.
    pub fn pcall<T>(
        &mut self,
        body: impl FnOnce(&mut ScriptState) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        let saved_len = self.stack.len();
        let saved_base = self.base;
        let saved_depth = self.depth;
        let result = body(self);
        if result.is_err() {
            self.stack.truncate(saved_len);
            self.base = saved_base;
            self.depth = saved_depth;
        }
        result
    }

    /// `target[key]`
    pub fn index(
        &mut self,
        target: &ScriptValue,
        key: ScriptValue,
    ) -> Result<ScriptValue, ScriptError> {
        match target {
            ScriptValue::Table(table) => match key {
                ScriptValue::Integer(index) => Ok(table.get(index)),
                _ => Ok(ScriptValue::Nil),
            },
            ScriptValue::Userdata(handle) => {
                let metatable = self
                    .metatable(*handle)
                    .ok_or(ScriptError::DeadHandle(*handle))?;
                let hook = metatable.index.as_ref().ok_or(ScriptError::Type {
                    action: "index",
                    type_name: "userdata",
                })?;
                let results = self.invoke(hook, vec![target.clone(), key])?;
                Ok(results.into_iter().next().unwrap_or(ScriptValue::Nil))
            }
            other => Err(ScriptError::Type {
                action: "index",
                type_name: other.type_name(),
            }),
        }
    }

    /// `target[key] = value`
    pub fn new_index(
        &mut self,
        target: &ScriptValue,
        key: ScriptValue,
        value: ScriptValue,
    ) -> Result<(), ScriptError> {
        match target {
            ScriptValue::Table(table) => match key {
                ScriptValue::Integer(index) if table.set(index, value) => Ok(()),
                _ => Err(ScriptError::Runtime(String::from(
                    "sequence tables only accept consecutive integer keys",
                ))),
            },
            ScriptValue::Userdata(handle) => {
                let metatable = self
                    .metatable(*handle)
                    .ok_or(ScriptError::DeadHandle(*handle))?;
                let hook = metatable.new_index.as_ref().ok_or(ScriptError::Type {
                    action: "assign into",
                    type_name: "userdata",
                })?;
                self.invoke(hook, vec![target.clone(), key, value])?;
                Ok(())
            }
            other => Err(ScriptError::Type {
                action: "index",
                type_name: other.type_name(),
            }),
        }
    }

    /// `callee(args...)`
    pub fn call(
        &mut self,
        callee: &ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>, ScriptError> {
        match callee {
            ScriptValue::Function(function) => self.invoke(function, args),
            ScriptValue::Userdata(handle) => {
                let metatable = self
                    .metatable(*handle)
                    .ok_or(ScriptError::DeadHandle(*handle))?;
                let hook = metatable.call.as_ref().ok_or(ScriptError::Type {
                    action: "call",
                    type_name: "userdata",
                })?;
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(callee.clone());
                full.extend(args);
                self.invoke(hook, full)
            }
            other => Err(ScriptError::Type {
                action: "call",
                type_name: other.type_name(),
            }),
        }
    }

    pub fn tostring(&mut self, value: &ScriptValue) -> Result<String, ScriptError> {
        match value {
            ScriptValue::Nil => Ok(String::from("nil")),
            ScriptValue::Boolean(flag) => Ok(flag.to_string()),
            ScriptValue::Integer(number) => Ok(number.to_string()),
            ScriptValue::Number(number) => Ok(number.to_string()),
            ScriptValue::String(text) => Ok(text.to_string()),
            ScriptValue::LightUserdata(address) => Ok(format!("userdata: 0x{address:x}")),
            ScriptValue::Table(table) => Ok(format!("table: {:p}", Rc::as_ptr(&table.0))),
            ScriptValue::Function(function) => Ok(format!("{function:?}")),
            ScriptValue::Userdata(handle) => {
                let hook = self.metatable(*handle).and_then(|meta| meta.tostring.clone());
                match hook {
                    Some(hook) => {
                        let results = self.invoke(&hook, vec![value.clone()])?;
                        match results.into_iter().next() {
                            Some(ScriptValue::String(text)) => Ok(text.to_string()),
                            _ => Err(ScriptError::Runtime(String::from(
                                "'tostring' hook must return a string",
                            ))),
                        }
                    }
                    None => Ok(format!("userdata: {handle}")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_metatable(counter: Rc<RefCell<Vec<Handle>>>) -> Rc<Metatable> {
        Rc::new(Metatable {
            name: String::from("probe"),
            gc: Some(NativeFn::new(move |state| {
                if let Some(handle) = state.at(0).as_handle() {
                    counter.borrow_mut().push(handle);
                }
                Ok(0)
            })),
            ..Metatable::default()
        })
    }

    #[test]
    fn interned_strings_share_identity() {
        let mut state = ScriptState::new();
        let a = state.intern("position");
        let b = state.intern("position");
        let c = state.intern("rotation");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn sweep_defers_finalizers_until_run() {
        let mut state = ScriptState::new();
        let finalized = Rc::new(RefCell::new(Vec::new()));
        let meta = counting_metatable(finalized.clone());
        let handle = state.new_userdata(meta, None);
        state.release(handle);

        assert_eq!(state.sweep(), 1);
        assert!(!state.is_live(handle));
        assert!(finalized.borrow().is_empty());

        assert_eq!(state.run_finalizers(), 1);
        assert_eq!(finalized.borrow().as_slice(), &[handle]);
    }

    #[test]
    fn retained_handles_survive_the_next_sweep() {
        let mut state = ScriptState::new();
        let handle = state.new_userdata(Rc::new(Metatable::default()), None);
        state.release(handle);
        assert!(state.retain(handle));
        assert_eq!(state.sweep(), 0);
        assert!(state.is_live(handle));

        state.release(handle);
        assert_eq!(state.sweep(), 1);
        assert!(!state.retain(handle));
    }

    #[test]
    fn panicking_natives_leave_the_frame_intact() {
        let mut state = ScriptState::new();
        state.push(ScriptValue::Integer(1));
        let boom = ScriptValue::Function(NativeFn::new(|state| {
            state.push(ScriptValue::Nil);
            panic!("native panic")
        }));
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| state.call(&boom, vec![ScriptValue::Nil])));
        assert!(outcome.is_err());
        assert_eq!(state.top(), 1);
        assert_eq!(state.base, 0);
        assert_eq!(state.depth, 0);
        assert_eq!(state.at(0), ScriptValue::Integer(1));
    }

    #[test]
    fn reused_slots_get_new_generation() {
        let mut state = ScriptState::new();
        let meta = Rc::new(Metatable::default());
        let first = state.new_userdata(meta.clone(), None);
        state.release(first);
        state.collect_garbage();
        let second = state.new_userdata(meta, None);
        assert_ne!(first, second);
        assert!(state.is_live(second));
        assert!(!state.is_live(first));
    }

    #[test]
    fn native_frames_see_only_their_arguments() {
        let mut state = ScriptState::new();
        state.push(ScriptValue::Integer(99));
        let add = ScriptValue::Function(NativeFn::new(|state| {
            assert_eq!(state.top(), 2);
            let sum = match (state.at(0), state.at(1)) {
                (ScriptValue::Integer(a), ScriptValue::Integer(b)) => a + b,
                _ => return Err(ScriptError::Runtime(String::from("bad args"))),
            };
            state.push(ScriptValue::Integer(sum));
            Ok(1)
        }));
        let results = state
            .call(&add, vec![ScriptValue::Integer(2), ScriptValue::Integer(3)])
            .expect("call should succeed");
        assert_eq!(results, vec![ScriptValue::Integer(5)]);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn pcall_restores_stack_on_error() {
        let mut state = ScriptState::new();
        let failing = ScriptValue::Function(NativeFn::new(|state| {
            state.push(ScriptValue::Boolean(true));
            Err(ScriptError::Runtime(String::from("boom")))
        }));
        let before = state.top();
        let err = state
            .pcall(|state| {
                state.push(ScriptValue::Nil);
                state.call(&failing, Vec::new())
            })
            .unwrap_err();
        assert_eq!(err, ScriptError::Runtime(String::from("boom")));
        assert_eq!(state.top(), before);
    }

    #[test]
    fn indexing_plain_values_is_a_type_error() {
        let mut state = ScriptState::new();
        let err = state
            .index(&ScriptValue::Integer(1), ScriptValue::Nil)
            .unwrap_err();
        assert_eq!(err.to_string(), "attempt to index a number value");
    }
}
