//! Direct execution of lowered modules.
//!
//! Coroutines run unsplit: `coro.suspend` snapshots the activation and
//! takes the switch default edge, `resume`/`destroy` restart the snapshot
//! with the suspend result set to `0`/`1`. A `coro.end` finishes a resume or
//! destroy activation; in the ramp and while unwinding it only marks the
//! frame, and when its operand comes from `coro.free` it tears the frame down.

use super::error::{RuntimeError, RuntimeResult};
use super::value::{ObjectId, Pointer, RtValue};
use crate::language::compiler::host_function;
use crate::language::ir::{
    BinaryOp, BlockId, CmpOp, CoroIntrinsic, Function, InstKind, Instruction, Module, Storage,
    Terminator, ValueId, SUSPEND_DESTROYED, SUSPEND_RESUMED, SUSPEND_SUSPENDED,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Where `coro.alloc` finds frame memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameStorage {
    /// No caller storage: every coroutine allocates its frame.
    #[default]
    Heap,
    /// Caller storage is always offered, so allocation is elided.
    Elided,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub storage: FrameStorage,
    pub step_limit: u64,
    /// Host functions that throw instead of returning.
    pub throwing: HashSet<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            storage: FrameStorage::Heap,
            step_limit: 1_000_000,
            throwing: HashSet::new(),
        }
    }
}

/// Observable effects, in execution order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Call { function: String },
    Alloc { object: ObjectId },
    /// `object` is `None` for `free(null)`.
    Free { object: Option<ObjectId> },
    FrameBegin { frame: ObjectId, heap: bool },
    Suspend { frame: ObjectId, is_final: bool },
    Resume { frame: ObjectId },
    Destroy { frame: ObjectId },
    Teardown { frame: ObjectId },
    Trace { value: i64 },
    Throw { value: i64 },
}

/// Handle to a coroutine frame created by calling a coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoroutineHandle {
    frame: ObjectId,
}

impl CoroutineHandle {
    pub fn frame(&self) -> ObjectId {
        self.frame
    }
}

const PROMISE_VALUE: u32 = 0;
const PROMISE_RESULT: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectKind {
    Stack,
    Frame,
    Heap,
    Caller,
}

#[derive(Debug)]
struct Object {
    kind: ObjectKind,
    slots: Vec<RtValue>,
    live: bool,
}

#[derive(Debug)]
struct Suspension {
    block: BlockId,
    prev_block: Option<BlockId>,
    resume_at: usize,
    result: ValueId,
    env: HashMap<ValueId, RtValue>,
    is_final: bool,
}

#[derive(Debug)]
enum FrameState {
    Running,
    Suspended(Box<Suspension>),
    TornDown,
}

#[derive(Debug)]
struct FrameRecord {
    function: usize,
    slots: Vec<ObjectId>,
    promise: Pointer,
    state: FrameState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActivationKind {
    Call,
    Resume,
    Destroy,
}

struct Activation {
    function: usize,
    kind: ActivationKind,
    env: HashMap<ValueId, RtValue>,
    block: BlockId,
    prev_block: Option<BlockId>,
    index: usize,
    frame: Option<ObjectId>,
    stack: Vec<ObjectId>,
    unadopted: Vec<ObjectId>,
    pending_final: bool,
    unwinding: bool,
    exception: Option<i64>,
}

enum Exit {
    Return(RtValue),
    /// Left through `coro.end`.
    Ended,
}

enum Interrupt {
    Throw(i64),
    Fault(RuntimeError),
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Interrupt::Fault(error)
    }
}

type Flow<T> = Result<T, Interrupt>;

struct FunctionInfo {
    function: Function,
    block_index: HashMap<BlockId, usize>,
    /// Values produced by `coro.free`; a `coro.end` of one is a teardown.
    freed_values: HashSet<ValueId>,
    frame_slots: u64,
}

pub struct Interpreter {
    functions: Vec<FunctionInfo>,
    by_name: HashMap<String, usize>,
    options: RunOptions,
    objects: Vec<Object>,
    frames: HashMap<ObjectId, FrameRecord>,
    events: Vec<Event>,
    steps: u64,
}

impl Interpreter {
    pub fn new(module: Module, options: RunOptions) -> Self {
        let mut functions = Vec::new();
        let mut by_name = HashMap::new();
        for function in module.functions {
            let block_index = function
                .blocks
                .iter()
                .enumerate()
                .map(|(index, block)| (block.id, index))
                .collect();
            let freed_values = function
                .intrinsic_calls(CoroIntrinsic::Free)
                .filter_map(|(_, inst)| inst.result)
                .collect();
            let frame_slots = function
                .instructions()
                .filter(|(_, inst)| {
                    matches!(
                        inst.kind,
                        InstKind::Alloca {
                            storage: Storage::Frame,
                            ..
                        }
                    )
                })
                .count() as u64;
            by_name.insert(function.name.clone(), functions.len());
            functions.push(FunctionInfo {
                function,
                block_index,
                freed_values,
                frame_slots,
            });
        }
        Self {
            functions,
            by_name,
            options,
            objects: Vec::new(),
            frames: HashMap::new(),
            events: Vec::new(),
            steps: 0,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Runs `main` and returns its result.
    pub fn run_main(&mut self) -> RuntimeResult<i64> {
        self.call("main", &[])?.as_int()
    }

    pub fn call(&mut self, name: &str, args: &[RtValue]) -> RuntimeResult<RtValue> {
        settle(self.call_function(name, args.to_vec()))
    }

    /// Calls a coroutine and returns the handle of its frame.
    pub fn start(&mut self, name: &str, args: &[RtValue]) -> RuntimeResult<CoroutineHandle> {
        let value = self.call(name, args)?;
        let frame = self.handle_of(value)?;
        Ok(CoroutineHandle { frame })
    }

    /// Resumes a suspended coroutine; `true` while it has not reached its
    /// final suspend point.
    pub fn resume(&mut self, handle: CoroutineHandle) -> RuntimeResult<bool> {
        settle(self.resume_frame(handle.frame))
    }

    pub fn destroy(&mut self, handle: CoroutineHandle) -> RuntimeResult<()> {
        settle(self.destroy_frame(handle.frame))
    }

    pub fn done(&self, handle: CoroutineHandle) -> RuntimeResult<bool> {
        self.frame_done(handle.frame)
    }

    pub fn is_torn_down(&self, handle: CoroutineHandle) -> bool {
        matches!(
            self.frames.get(&handle.frame).map(|record| &record.state),
            Some(FrameState::TornDown)
        )
    }

    /// Value most recently yielded by the coroutine.
    pub fn promise_value(&self, handle: CoroutineHandle) -> RuntimeResult<i64> {
        self.promise_field(handle.frame, PROMISE_VALUE)
    }

    /// Value passed to `co_return`.
    pub fn promise_result(&self, handle: CoroutineHandle) -> RuntimeResult<i64> {
        self.promise_field(handle.frame, PROMISE_RESULT)
    }

    fn call_function(&mut self, name: &str, args: Vec<RtValue>) -> Flow<RtValue> {
        let Some(&index) = self.by_name.get(name) else {
            return self.call_host(name, args);
        };
        let function = &self.functions[index].function;
        if function.params.len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                name: name.to_string(),
                expected: function.params.len(),
                received: args.len(),
            }
            .into());
        }
        let env = function
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| (param.value, arg))
            .collect();
        let entry = function.entry();
        self.events.push(Event::Call {
            function: name.to_string(),
        });
        trace!(function = name, "call");
        let mut activation = Activation {
            function: index,
            kind: ActivationKind::Call,
            env,
            block: entry,
            prev_block: None,
            index: 0,
            frame: None,
            stack: Vec::new(),
            unadopted: Vec::new(),
            pending_final: false,
            unwinding: false,
            exception: None,
        };
        match self.execute(&mut activation)? {
            Exit::Return(value) => Ok(value),
            Exit::Ended => Ok(RtValue::Unit),
        }
    }

    fn call_host(&mut self, name: &str, args: Vec<RtValue>) -> Flow<RtValue> {
        let Some(host) = host_function(name) else {
            return Err(RuntimeError::UnknownFunction {
                name: name.to_string(),
            }
            .into());
        };
        if host.params != args.len() {
            return Err(RuntimeError::ArityMismatch {
                name: name.to_string(),
                expected: host.params,
                received: args.len(),
            }
            .into());
        }
        if self.options.throwing.contains(name) {
            self.events.push(Event::Throw { value: -1 });
            return Err(Interrupt::Throw(-1));
        }
        let arg = args[0];
        match name {
            "malloc" => {
                let object = self.allocate(ObjectKind::Heap, 1);
                self.events.push(Event::Alloc { object });
                Ok(RtValue::Ptr(Pointer::to(object)))
            }
            "free" => {
                self.free(arg.as_ptr()?)?;
                Ok(RtValue::Unit)
            }
            "trace" => {
                let value = arg.as_int()?;
                self.events.push(Event::Trace { value });
                Ok(RtValue::Int(value))
            }
            "throw" => {
                let value = arg.as_int()?;
                self.events.push(Event::Throw { value });
                Err(Interrupt::Throw(value))
            }
            "resume" => {
                let frame = self.handle_of(arg)?;
                let running = self.resume_frame(frame)?;
                Ok(RtValue::Int(i64::from(running)))
            }
            "destroy" => {
                let frame = self.handle_of(arg)?;
                self.destroy_frame(frame)?;
                Ok(RtValue::Unit)
            }
            "done" => {
                let frame = self.handle_of(arg)?;
                Ok(RtValue::Int(i64::from(self.frame_done(frame)?)))
            }
            "promise" => {
                let frame = self.handle_of(arg)?;
                Ok(RtValue::Int(self.promise_field(frame, PROMISE_VALUE)?))
            }
            "result" => {
                let frame = self.handle_of(arg)?;
                Ok(RtValue::Int(self.promise_field(frame, PROMISE_RESULT)?))
            }
            _ => Err(RuntimeError::UnknownFunction {
                name: name.to_string(),
            }
            .into()),
        }
    }

    fn resume_frame(&mut self, frame: ObjectId) -> Flow<bool> {
        let suspension = self.take_suspension(frame, "resumed")?;
        if suspension.is_final {
            self.restore_suspension(frame, suspension);
            return Err(RuntimeError::ResumeAfterFinal { frame: frame.0 }.into());
        }
        self.events.push(Event::Resume { frame });
        debug!(frame = frame.0, "resume");
        self.continue_frame(frame, suspension, ActivationKind::Resume, SUSPEND_RESUMED)?;
        Ok(!self.frame_done(frame)?)
    }

    fn destroy_frame(&mut self, frame: ObjectId) -> Flow<()> {
        let suspension = self.take_suspension(frame, "destroyed")?;
        self.events.push(Event::Destroy { frame });
        debug!(frame = frame.0, "destroy");
        self.continue_frame(frame, suspension, ActivationKind::Destroy, SUSPEND_DESTROYED)
    }

    fn continue_frame(
        &mut self,
        frame: ObjectId,
        suspension: Suspension,
        kind: ActivationKind,
        outcome: i64,
    ) -> Flow<()> {
        let function = self.frame_record(frame)?.function;
        let mut env = suspension.env;
        env.insert(suspension.result, RtValue::Int(outcome));
        let mut activation = Activation {
            function,
            kind,
            env,
            block: suspension.block,
            prev_block: suspension.prev_block,
            index: suspension.resume_at,
            frame: Some(frame),
            stack: Vec::new(),
            unadopted: Vec::new(),
            pending_final: false,
            unwinding: false,
            exception: None,
        };
        self.execute(&mut activation)?;
        Ok(())
    }

    fn take_suspension(&mut self, frame: ObjectId, operation: &'static str) -> Flow<Suspension> {
        let record = self
            .frames
            .get_mut(&frame)
            .ok_or(RuntimeError::InvalidHandle)?;
        match std::mem::replace(&mut record.state, FrameState::Running) {
            FrameState::Suspended(suspension) => Ok(*suspension),
            FrameState::Running => Err(RuntimeError::FrameRunning {
                frame: frame.0,
                operation,
            }
            .into()),
            FrameState::TornDown => {
                record.state = FrameState::TornDown;
                Err(RuntimeError::FrameDestroyed { frame: frame.0 }.into())
            }
        }
    }

    fn restore_suspension(&mut self, frame: ObjectId, suspension: Suspension) {
        if let Some(record) = self.frames.get_mut(&frame) {
            record.state = FrameState::Suspended(Box::new(suspension));
        }
    }

    fn frame_done(&self, frame: ObjectId) -> RuntimeResult<bool> {
        match &self.frame_record(frame)?.state {
            FrameState::Suspended(suspension) => Ok(suspension.is_final),
            FrameState::Running => Ok(false),
            FrameState::TornDown => Ok(true),
        }
    }

    fn promise_field(&self, frame: ObjectId, field: u32) -> RuntimeResult<i64> {
        let promise = self.frame_record(frame)?.promise;
        self.read(offset(promise, field)?)?.as_int()
    }

    fn frame_record(&self, frame: ObjectId) -> RuntimeResult<&FrameRecord> {
        self.frames.get(&frame).ok_or(RuntimeError::InvalidHandle)
    }

    fn handle_of(&self, value: RtValue) -> RuntimeResult<ObjectId> {
        match value {
            RtValue::Ptr(Pointer::Object { object, offset: 0 }) if self.frames.contains_key(&object) => {
                Ok(object)
            }
            _ => Err(RuntimeError::InvalidHandle),
        }
    }

    fn execute(&mut self, activation: &mut Activation) -> Flow<Exit> {
        let result = self.run_activation(activation);
        for object in activation.stack.drain(..) {
            if let Some(object) = self.objects.get_mut(object.0 as usize) {
                object.live = false;
            }
        }
        result
    }

    fn run_activation(&mut self, act: &mut Activation) -> Flow<Exit> {
        loop {
            self.step()?;
            let info = &self.functions[act.function];
            let block_pos = *info.block_index.get(&act.block).ok_or_else(|| {
                RuntimeError::Unreachable {
                    function: info.function.name.clone(),
                }
            })?;
            let block = &info.function.blocks[block_pos];
            if let Some(inst) = block.insts.get(act.index) {
                let inst = inst.clone();
                act.index += 1;
                if let Some(exit) = self.execute_inst(act, &inst)? {
                    return Ok(exit);
                }
                continue;
            }
            let Some(term) = block.term.clone() else {
                return Err(RuntimeError::Unreachable {
                    function: info.function.name.clone(),
                }
                .into());
            };
            match term {
                Terminator::Br(target) => jump(act, target),
                Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let target = if self.value(act, cond)?.truthy()? {
                        then_block
                    } else {
                        else_block
                    };
                    jump(act, target);
                }
                Terminator::Switch {
                    value,
                    default,
                    cases,
                } => {
                    let value = self.value(act, value)?.as_int()?;
                    let target = cases
                        .iter()
                        .find(|(case, _)| *case == value)
                        .map_or(default, |(_, block)| *block);
                    jump(act, target);
                }
                Terminator::Invoke {
                    result,
                    callee,
                    args,
                    normal,
                    unwind,
                    ..
                } => {
                    let args = self.values(act, &args)?;
                    match self.call_function(&callee, args) {
                        Ok(value) => {
                            if let Some(result) = result {
                                act.env.insert(result, value);
                            }
                            jump(act, normal);
                        }
                        Err(Interrupt::Throw(value)) => {
                            trace!(callee = %callee, value, "unwinding");
                            act.unwinding = true;
                            act.exception = Some(value);
                            jump(act, unwind);
                        }
                        Err(fault) => return Err(fault),
                    }
                }
                Terminator::Ret(value) => {
                    let value = match value {
                        Some(value) => self.value(act, value)?,
                        None => RtValue::Unit,
                    };
                    return Ok(Exit::Return(value));
                }
                Terminator::Resume => {
                    return Err(Interrupt::Throw(act.exception.unwrap_or_default()));
                }
                Terminator::Unreachable => {
                    return Err(RuntimeError::Unreachable {
                        function: self.functions[act.function].function.name.clone(),
                    }
                    .into());
                }
            }
        }
    }

    fn execute_inst(&mut self, act: &mut Activation, inst: &Instruction) -> Flow<Option<Exit>> {
        let value = match &inst.kind {
            InstKind::Const { value } => RtValue::Int(*value),
            InstKind::Null => RtValue::Ptr(Pointer::Null),
            InstKind::Binary { op, lhs, rhs } => {
                let lhs = self.value(act, *lhs)?.as_int()?;
                let rhs = self.value(act, *rhs)?.as_int()?;
                RtValue::Int(binary(*op, lhs, rhs)?)
            }
            InstKind::Cmp { op, lhs, rhs } => {
                let lhs = self.value(act, *lhs)?;
                let rhs = self.value(act, *rhs)?;
                RtValue::Int(i64::from(compare(*op, lhs, rhs)?))
            }
            InstKind::Alloca { slots, storage, .. } => {
                let kind = match storage {
                    Storage::Stack => ObjectKind::Stack,
                    Storage::Frame => ObjectKind::Frame,
                };
                let object = self.allocate(kind, *slots);
                match kind {
                    ObjectKind::Stack => act.stack.push(object),
                    _ => act.unadopted.push(object),
                }
                RtValue::Ptr(Pointer::to(object))
            }
            InstKind::FieldAddr { base, index } => {
                let base = self.value(act, *base)?.as_ptr()?;
                RtValue::Ptr(offset(base, *index)?)
            }
            InstKind::Load { ptr } => {
                let ptr = self.value(act, *ptr)?.as_ptr()?;
                self.read(ptr)?
            }
            InstKind::Store { ptr, value } => {
                let ptr = self.value(act, *ptr)?.as_ptr()?;
                let value = self.value(act, *value)?;
                self.write(ptr, value)?;
                RtValue::Unit
            }
            InstKind::Call { callee, args } => {
                let args = self.values(act, args)?;
                self.call_function(callee, args)?
            }
            InstKind::Phi { incoming } => {
                let source = incoming
                    .iter()
                    .find(|(_, block)| Some(*block) == act.prev_block)
                    .map(|(value, _)| *value)
                    .ok_or_else(|| RuntimeError::TypeMismatch {
                        message: "phi has no edge for the incoming block".to_string(),
                    })?;
                self.value(act, source)?
            }
            InstKind::Coro { intrinsic, args } => {
                let args = self.values(act, args)?;
                match self.execute_coro(act, inst, *intrinsic, &args)? {
                    CoroStep::Value(value) => value,
                    CoroStep::Exit => return Ok(Some(Exit::Ended)),
                }
            }
            InstKind::Reserved => {
                return Err(RuntimeError::Unreachable {
                    function: self.functions[act.function].function.name.clone(),
                }
                .into());
            }
        };
        if let Some(result) = inst.result {
            act.env.insert(result, value);
        }
        Ok(None)
    }

    fn execute_coro(
        &mut self,
        act: &mut Activation,
        inst: &Instruction,
        intrinsic: CoroIntrinsic,
        args: &[RtValue],
    ) -> Flow<CoroStep> {
        if args.len() != intrinsic.arity() {
            return Err(RuntimeError::ArityMismatch {
                name: intrinsic.name().to_string(),
                expected: intrinsic.arity(),
                received: args.len(),
            }
            .into());
        }
        let value = match intrinsic {
            CoroIntrinsic::Alloc => match self.options.storage {
                FrameStorage::Heap => RtValue::Ptr(Pointer::Null),
                FrameStorage::Elided => {
                    RtValue::Ptr(Pointer::to(self.allocate(ObjectKind::Caller, 1)))
                }
            },
            CoroIntrinsic::Begin => {
                let Pointer::Object { object: frame, .. } = args[0].as_ptr()? else {
                    return Err(RuntimeError::NullDereference.into());
                };
                let heap = self.objects[frame.0 as usize].kind == ObjectKind::Heap;
                let promise = args[3].as_ptr()?;
                self.frames.insert(
                    frame,
                    FrameRecord {
                        function: act.function,
                        slots: std::mem::take(&mut act.unadopted),
                        promise,
                        state: FrameState::Running,
                    },
                );
                act.frame = Some(frame);
                self.events.push(Event::FrameBegin { frame, heap });
                debug!(frame = frame.0, heap, "frame begin");
                RtValue::Ptr(Pointer::to(frame))
            }
            CoroIntrinsic::Free => {
                let handle = self.handle_of(args[0])?;
                if self.objects[handle.0 as usize].kind == ObjectKind::Heap {
                    RtValue::Ptr(Pointer::to(handle))
                } else {
                    RtValue::Ptr(Pointer::Null)
                }
            }
            CoroIntrinsic::End => {
                let freed = &self.functions[act.function].freed_values;
                if inst.operands().first().is_some_and(|operand| freed.contains(operand)) {
                    let frame = act.frame.ok_or(RuntimeError::NoFrame {
                        name: intrinsic.name(),
                    })?;
                    self.teardown(frame)?;
                }
                if !act.unwinding && act.kind != ActivationKind::Call {
                    return Ok(CoroStep::Exit);
                }
                RtValue::Unit
            }
            CoroIntrinsic::Save => {
                act.pending_final = args[0].truthy()?;
                RtValue::Token
            }
            CoroIntrinsic::Suspend => {
                let frame = act.frame.ok_or(RuntimeError::NoFrame {
                    name: intrinsic.name(),
                })?;
                let result = inst.result.ok_or(RuntimeError::TypeMismatch {
                    message: "suspend without a result".to_string(),
                })?;
                let suspension = Suspension {
                    block: act.block,
                    prev_block: act.prev_block,
                    resume_at: act.index,
                    result,
                    env: act.env.clone(),
                    is_final: act.pending_final,
                };
                let record = self
                    .frames
                    .get_mut(&frame)
                    .ok_or(RuntimeError::InvalidHandle)?;
                record.state = FrameState::Suspended(Box::new(suspension));
                self.events.push(Event::Suspend {
                    frame,
                    is_final: act.pending_final,
                });
                debug!(frame = frame.0, is_final = act.pending_final, "suspend");
                RtValue::Int(SUSPEND_SUSPENDED)
            }
            CoroIntrinsic::Frame => {
                let frame = act.frame.ok_or(RuntimeError::NoFrame {
                    name: intrinsic.name(),
                })?;
                RtValue::Ptr(Pointer::to(frame))
            }
            CoroIntrinsic::Size => RtValue::Int(8 * self.functions[act.function].frame_slots as i64),
        };
        Ok(CoroStep::Value(value))
    }

    fn teardown(&mut self, frame: ObjectId) -> RuntimeResult<()> {
        let record = self
            .frames
            .get_mut(&frame)
            .ok_or(RuntimeError::InvalidHandle)?;
        if matches!(record.state, FrameState::TornDown) {
            return Err(RuntimeError::FrameDestroyed { frame: frame.0 });
        }
        record.state = FrameState::TornDown;
        let slots = std::mem::take(&mut record.slots);
        for slot in slots {
            if let Some(object) = self.objects.get_mut(slot.0 as usize) {
                object.live = false;
            }
        }
        self.events.push(Event::Teardown { frame });
        debug!(frame = frame.0, "teardown");
        Ok(())
    }

    fn allocate(&mut self, kind: ObjectKind, slots: u32) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(Object {
            kind,
            slots: vec![RtValue::Int(0); slots.max(1) as usize],
            live: true,
        });
        id
    }

    fn free(&mut self, ptr: Pointer) -> RuntimeResult<()> {
        let Pointer::Object { object: id, .. } = ptr else {
            self.events.push(Event::Free { object: None });
            return Ok(());
        };
        let object = &mut self.objects[id.0 as usize];
        if object.kind != ObjectKind::Heap {
            return Err(RuntimeError::InvalidFree { object: id.0 });
        }
        if !object.live {
            return Err(RuntimeError::DoubleFree { object: id.0 });
        }
        object.live = false;
        self.events.push(Event::Free { object: Some(id) });
        Ok(())
    }

    fn object(&self, ptr: Pointer) -> RuntimeResult<(&Object, usize)> {
        let Pointer::Object { object: id, offset } = ptr else {
            return Err(RuntimeError::NullDereference);
        };
        let object = self
            .objects
            .get(id.0 as usize)
            .ok_or(RuntimeError::NullDereference)?;
        if !object.live {
            return Err(match object.kind {
                ObjectKind::Stack => RuntimeError::DanglingStack { object: id.0 },
                ObjectKind::Frame => RuntimeError::UseAfterTeardown { object: id.0 },
                ObjectKind::Heap | ObjectKind::Caller => RuntimeError::UseAfterFree { object: id.0 },
            });
        }
        if offset as usize >= object.slots.len() {
            return Err(RuntimeError::OutOfBounds {
                index: offset,
                slots: object.slots.len() as u32,
            });
        }
        Ok((object, offset as usize))
    }

    fn read(&self, ptr: Pointer) -> RuntimeResult<RtValue> {
        let (object, index) = self.object(ptr)?;
        Ok(object.slots[index])
    }

    fn write(&mut self, ptr: Pointer, value: RtValue) -> RuntimeResult<()> {
        let (_, index) = self.object(ptr)?;
        if let Pointer::Object { object, .. } = ptr {
            self.objects[object.0 as usize].slots[index] = value;
        }
        Ok(())
    }

    fn value(&self, act: &Activation, value: ValueId) -> RuntimeResult<RtValue> {
        act.env
            .get(&value)
            .copied()
            .ok_or_else(|| RuntimeError::UndefinedValue {
                function: self.functions[act.function].function.name.clone(),
                value: value.0,
            })
    }

    fn values(&self, act: &Activation, values: &[ValueId]) -> RuntimeResult<Vec<RtValue>> {
        values.iter().map(|value| self.value(act, *value)).collect()
    }

    fn step(&mut self) -> RuntimeResult<()> {
        self.steps += 1;
        if self.steps > self.options.step_limit {
            return Err(RuntimeError::StepLimit {
                limit: self.options.step_limit,
            });
        }
        Ok(())
    }
}

enum CoroStep {
    Value(RtValue),
    Exit,
}

fn settle<T>(flow: Flow<T>) -> RuntimeResult<T> {
    flow.map_err(|interrupt| match interrupt {
        Interrupt::Throw(value) => RuntimeError::UncaughtException { value },
        Interrupt::Fault(error) => error,
    })
}

fn jump(act: &mut Activation, target: BlockId) {
    act.prev_block = Some(act.block);
    act.block = target;
    act.index = 0;
}

fn offset(ptr: Pointer, field: u32) -> RuntimeResult<Pointer> {
    match ptr {
        Pointer::Object { object, offset } => Ok(Pointer::Object {
            object,
            offset: offset + field,
        }),
        Pointer::Null => Err(RuntimeError::NullDereference),
    }
}

fn binary(op: BinaryOp, lhs: i64, rhs: i64) -> RuntimeResult<i64> {
    Ok(match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::Div => {
            if rhs == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            lhs.wrapping_div(rhs)
        }
        BinaryOp::Rem => {
            if rhs == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            lhs.wrapping_rem(rhs)
        }
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
    })
}

fn compare(op: CmpOp, lhs: RtValue, rhs: RtValue) -> RuntimeResult<bool> {
    match (lhs, rhs) {
        (RtValue::Int(lhs), RtValue::Int(rhs)) => Ok(match op {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }),
        (RtValue::Ptr(lhs), RtValue::Ptr(rhs)) => match op {
            CmpOp::Eq => Ok(lhs == rhs),
            CmpOp::Ne => Ok(lhs != rhs),
            _ => Err(RuntimeError::TypeMismatch {
                message: "ordered comparison of pointers".to_string(),
            }),
        },
        (lhs, rhs) => Err(RuntimeError::TypeMismatch {
            message: format!("cannot compare {} with {}", lhs.type_name(), rhs.type_name()),
        }),
    }
}
