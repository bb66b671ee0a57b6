use std::{
    fmt,
    io::{self, Write},
    sync::OnceLock,
    time::Instant,
};

use itertools::Itertools;
use tracing::{trace, warn};

use crate::{
    compile, Config, FrameInfo, GcRoots, Heap, InterpretError, Key, NativeFn, ObjBoundMethod,
    ObjClass, ObjClosure, ObjInstance, ObjNative, ObjRef, ObjUpvalue, Object, OpCode,
    RuntimeError, Table, Value,
};

/// Maximum depth of the call stack.
pub const FRAMES_MAX: usize = 64;

/// Maximum number of values on the stack, 256 slots per frame.
pub const STACK_MAX: usize = FRAMES_MAX * (u8::MAX as usize + 1);

#[derive(Debug)]
struct CallFrame {
    closure: ObjRef,
    /// The function of `closure`, cached to skip one lookup per instruction.
    function: ObjRef,
    ip: usize,
    slot: usize,
}

/// Everything the VM holds outside of the heap that can point into it.
struct Roots<'a> {
    stack: &'a [Value],
    frames: &'a [CallFrame],
    open_upvalues: &'a [ObjRef],
    globals: &'a Table,
}

impl GcRoots for Roots<'_> {
    fn mark_roots(&self, heap: &mut Heap) {
        for value in self.stack {
            heap.mark_value(*value);
        }
        for frame in self.frames {
            heap.mark_object(frame.closure);
        }
        for upvalue in self.open_upvalues {
            heap.mark_object(*upvalue);
        }
        heap.mark_table(self.globals);
    }
}

macro_rules! roots {
    ($vm:expr) => {
        Roots {
            stack: &$vm.stack,
            frames: &$vm.frames,
            open_upvalues: &$vm.open_upvalues,
            globals: &$vm.globals,
        }
    };
}

/// A bytecode virtual machine for the Lox programming language
///
/// Globals and heap objects persist across calls to [`Vm::interpret`], so a REPL can run
/// one line at a time on the same machine.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Upvalues still pointing into the stack, sorted by stack slot.
    open_upvalues: Vec<ObjRef>,
    heap: Heap,
    config: Config,
    stdout: Box<dyn Write>,
    stderr: Box<dyn Write>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("stack", &self.stack)
            .field("frames", &self.frames)
            .field("globals", &self.globals.len())
            .field("open_upvalues", &self.open_upvalues)
            .field("live_objects", &self.heap.live_objects())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Vm {
    /// Create a machine that prints to the process's standard output and error.
    pub fn new(config: Config) -> Self {
        // Start the clock no later than the first machine.
        start_time();
        let mut vm = Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::default(),
            open_upvalues: Vec::new(),
            heap: Heap::new(&config),
            config,
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        };
        vm.define_native("clock", 0, clock_native);
        vm
    }

    /// Send the output of `print` statements to `stdout` and error reports to `stderr`.
    pub fn with_output(mut self, stdout: impl Write + 'static, stderr: impl Write + 'static) -> Self {
        self.stdout = Box::new(stdout);
        self.stderr = Box::new(stderr);
        self
    }

    /// Compile and run the given source code.
    ///
    /// Errors are written to the error output before being returned. After a runtime
    /// error the stack is reset, but globals defined so far are kept.
    pub fn interpret(&mut self, src: &str) -> Result<(), InterpretError> {
        let roots = roots!(self);
        let function = match compile(src, &mut self.heap, &roots, self.config.print_code) {
            Ok(function) => function,
            Err(errors) => {
                for err in &errors {
                    self.report(err);
                }
                return Err(InterpretError::Compile(errors));
            }
        };

        let closure = self.alloc(ObjClosure::new(function, Vec::new()));
        let result = self
            .push(Value::Obj(closure))
            .and_then(|_| self.call(closure, 0))
            .and_then(|_| self.run());
        result.map_err(|error| self.runtime_error(error))
    }

    /// Run a full garbage collection now.
    pub fn collect_garbage(&mut self) {
        let roots = roots!(self);
        self.heap.collect_garbage(&roots);
    }

    /// The heap holding every object created by this machine.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.config.trace_execution {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let opcode =
                OpCode::try_from(byte).unwrap_or_else(|_| panic!("Invalid opcode {byte}."));
            match opcode {
                OpCode::Constant => {
                    let val = self.read_constant();
                    self.push(val)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.frame().slot + self.read_byte() as usize;
                    self.push(self.stack[slot])?;
                }
                OpCode::SetLocal => {
                    let slot = self.frame().slot + self.read_byte() as usize;
                    self.stack[slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(self.heap.key(name)) {
                        Some(val) => self.push(val)?,
                        None => return Err(self.undefined_variable(name)),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    self.set_global(self.heap.key(name), self.peek(0));
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let key = self.heap.key(name);
                    if self.set_global(key, self.peek(0)) {
                        // Assignment never creates a global.
                        self.globals.delete(key);
                        return Err(self.undefined_variable(name));
                    }
                }
                OpCode::GetUpvalue => {
                    let upvalue = self.frame_upvalue();
                    let val = match *self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack[slot],
                        ObjUpvalue::Closed(val) => val,
                    };
                    self.push(val)?;
                }
                OpCode::SetUpvalue => {
                    let upvalue = self.frame_upvalue();
                    let val = self.peek(0);
                    match self.heap.upvalue_mut(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack[*slot] = val,
                        ObjUpvalue::Closed(closed) => *closed = val,
                    }
                }
                OpCode::GetProperty => {
                    let instance = self
                        .as_instance(self.peek(0))
                        .ok_or(RuntimeError::PropertyOnNonInstance)?;
                    let name = self.read_string();
                    let field = self
                        .heap
                        .instance(instance)
                        .fields
                        .get(self.heap.key(name));
                    match field {
                        Some(val) => {
                            self.pop();
                            self.push(val)?;
                        }
                        None => {
                            let class = self.heap.instance(instance).class;
                            self.bind_method(class, name)?;
                        }
                    }
                }
                OpCode::SetProperty => {
                    let instance = self
                        .as_instance(self.peek(1))
                        .ok_or(RuntimeError::FieldOnNonInstance)?;
                    let name = self.read_string();
                    let key = self.heap.key(name);
                    let val = self.peek(0);
                    let roots = roots!(self);
                    self.heap.set_field(instance, key, val, &roots);
                    self.pop();
                    self.pop();
                    self.push(val)?;
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = self.pop_class();
                    self.bind_method(superclass, name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(a.gt(&b)?)?;
                }
                OpCode::Less => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(a.lt(&b)?)?;
                }
                OpCode::Add => match (self.as_string(self.peek(1)), self.as_string(self.peek(0))) {
                    (Some(a), Some(b)) => self.concatenate(a, b)?,
                    _ => {
                        let b = self.pop();
                        let a = self.pop();
                        self.push((a + b)?)?;
                    }
                },
                OpCode::Subtract => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push((a - b)?)?;
                }
                OpCode::Multiply => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push((a * b)?)?;
                }
                OpCode::Divide => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push((a / b)?)?;
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(!v)?;
                }
                OpCode::Negate => {
                    let v = self.pop();
                    self.push((-v)?)?;
                }
                OpCode::Print => {
                    let v = self.pop();
                    writeln!(self.stdout, "{}", v.display(&self.heap))?;
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    self.call_value(self.peek(argc as usize), argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    let superclass = self.pop_class();
                    self.invoke_from_class(superclass, name, argc)?;
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(function) => function,
                        _ => unreachable!("Closure operand must be a function."),
                    };
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            self.capture_upvalue(self.frame().slot + index)
                        } else {
                            self.enclosing_upvalue(index)
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = self.alloc(ObjClosure::new(function, upvalues));
                    self.push(Value::Obj(closure))?;
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self
                        .frames
                        .pop()
                        .expect("Should have exited when there's no frame left");
                    self.close_upvalues(frame.slot);
                    if self.frames.is_empty() {
                        self.stack.clear();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slot);
                    self.push(result)?;
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(ObjClass::new(name));
                    self.push(Value::Obj(class))?;
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Obj(o) if matches!(self.heap.get(o), Object::Class(_)) => o,
                        _ => return Err(RuntimeError::SuperclassNotClass),
                    };
                    let subclass = match self.peek(0) {
                        Value::Obj(class) => class,
                        _ => unreachable!("The compiler only emits classes here."),
                    };
                    // Methods are copied down so lookups never walk the class chain.
                    let roots = roots!(self);
                    self.heap.inherit(subclass, superclass, &roots);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let key = self.heap.key(name);
                    let method = self.peek(0);
                    let class = match self.peek(1) {
                        Value::Obj(class) => class,
                        _ => unreachable!("Methods are defined on the class below them."),
                    };
                    let roots = roots!(self);
                    self.heap.set_method(class, key, method, &roots);
                    self.pop();
                }
            }
        }
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        let callee = match callee {
            Value::Obj(o) => o,
            _ => return Err(RuntimeError::NotCallable),
        };
        let receiver_slot = self.stack.len() - argc as usize - 1;
        match self.heap.get(callee) {
            Object::BoundMethod(bound) => {
                let method = bound.method;
                self.stack[receiver_slot] = bound.receiver;
                self.call(method, argc)
            }
            Object::Class(_) => {
                let instance = self.alloc(ObjInstance::new(callee));
                self.stack[receiver_slot] = Value::Obj(instance);
                let init = self.heap.key(self.heap.init_string());
                match self.heap.class(callee).methods.get(init) {
                    Some(Value::Obj(initializer)) => self.call(initializer, argc),
                    _ if argc != 0 => Err(RuntimeError::BadArgumentsCount { arity: 0, argc }),
                    _ => Ok(()),
                }
            }
            Object::Closure(_) => self.call(callee, argc),
            Object::Native(native) => {
                if native.arity != argc {
                    return Err(RuntimeError::BadArgumentsCount {
                        arity: native.arity,
                        argc,
                    });
                }
                let result = (native.call)(&self.stack[receiver_slot + 1..]);
                self.stack.truncate(receiver_slot);
                self.push(result)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call(&mut self, closure: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).fun;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            return Err(RuntimeError::BadArgumentsCount { arity, argc });
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }

        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slot: self.stack.len() - argc as usize - 1,
        });
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc as usize);
        let instance = self
            .as_instance(receiver)
            .ok_or(RuntimeError::MethodOnNonInstance)?;

        // A field holding a callable shadows the method of the same name.
        let key = self.heap.key(name);
        if let Some(field) = self.heap.instance(instance).fields.get(key) {
            let receiver_slot = self.stack.len() - argc as usize - 1;
            self.stack[receiver_slot] = field;
            return self.call_value(field, argc);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = self.find_method(class, name)?;
        self.call(method, argc)
    }

    /// Replace the instance on top of the stack with its method `name` bound to it.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let method = self.find_method(class, name)?;
        let bound = self.alloc(ObjBoundMethod {
            receiver: self.peek(0),
            method,
        });
        self.pop();
        self.push(Value::Obj(bound))
    }

    fn find_method(&self, class: ObjRef, name: ObjRef) -> Result<ObjRef, RuntimeError> {
        match self.heap.class(class).methods.get(self.heap.key(name)) {
            Some(Value::Obj(method)) => Ok(method),
            _ => Err(RuntimeError::UndefinedProperty(
                self.heap.str(name).to_string(),
            )),
        }
    }

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let pos = self
            .open_upvalues
            .partition_point(|&upvalue| open_slot(&self.heap, upvalue) < slot);
        if let Some(&upvalue) = self.open_upvalues.get(pos) {
            if open_slot(&self.heap, upvalue) == slot {
                return upvalue;
            }
        }
        let upvalue = self.alloc(ObjUpvalue::Open(slot));
        self.open_upvalues.insert(pos, upvalue);
        upvalue
    }

    /// Close every open upvalue pointing at `last` or above.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let slot = open_slot(&self.heap, upvalue);
            if slot < last {
                break;
            }
            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(self.stack[slot]);
            self.open_upvalues.pop();
        }
    }

    fn concatenate(&mut self, a: ObjRef, b: ObjRef) -> Result<(), RuntimeError> {
        let mut chars = String::with_capacity(self.heap.str(a).len() + self.heap.str(b).len());
        chars.push_str(self.heap.str(a));
        chars.push_str(self.heap.str(b));
        // Both operands stay on the stack until the result is allocated.
        let roots = roots!(self);
        let result = self.heap.take_string(chars, &roots);
        self.pop();
        self.pop();
        self.push(Value::Obj(result))
    }

    fn define_native(&mut self, name: &str, arity: u8, call: NativeFn) {
        let roots = roots!(self);
        let name = self.heap.intern(name, &roots);
        let native = self.alloc(ObjNative { name, arity, call });
        self.set_global(self.heap.key(name), Value::Obj(native));
    }

    /// Store a global, charging the growth of the globals table to the heap.
    fn set_global(&mut self, key: Key, value: Value) -> bool {
        let old_size = self.globals.size();
        let is_new_key = self.globals.set(key, value);
        let new_size = self.globals.size();
        if new_size != old_size {
            let roots = roots!(self);
            self.heap.charge(old_size, new_size, &roots);
        }
        is_new_key
    }

    fn alloc(&mut self, object: impl Into<Object>) -> ObjRef {
        let roots = roots!(self);
        self.heap.alloc(object, &roots)
    }

    fn runtime_error(&mut self, error: RuntimeError) -> InterpretError {
        let trace: Vec<FrameInfo> = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.function(frame.function);
                FrameInfo {
                    line: function.chunk.line(frame.ip.saturating_sub(1)),
                    function: function.name.map(|name| self.heap.str(name).to_string()),
                }
            })
            .collect();

        self.report(&error);
        for frame in &trace {
            self.report(frame);
        }

        // Closures that escaped keep the last value of the variables they captured.
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
        InterpretError::Runtime { error, trace }
    }

    fn report(&mut self, message: &dyn fmt::Display) {
        if let Err(err) = writeln!(self.stderr, "{message}") {
            warn!(target: "loxvm::vm", "can't write error report: {err}");
        }
    }

    fn undefined_variable(&self, name: ObjRef) -> RuntimeError {
        RuntimeError::UndefinedVariable(self.heap.str(name).to_string())
    }

    fn trace_instruction(&self) {
        let frame = self.frame();
        let stack = self
            .stack
            .iter()
            .map(|v| format!("[ {} ]", v.display(&self.heap)))
            .join("");
        let mut instruction = String::new();
        self.heap
            .function(frame.function)
            .chunk
            .disassemble_instruction(frame.ip, &self.heap, &mut instruction)
            .expect("Writing to a String can't fail.");
        trace!(target: "loxvm::vm", "          {stack}");
        trace!(target: "loxvm::vm", "{}", instruction.trim_end());
    }

    fn as_instance(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(o) if matches!(self.heap.get(o), Object::Instance(_)) => Some(o),
            _ => None,
        }
    }

    fn as_string(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(o) if matches!(self.heap.get(o), Object::String(_)) => Some(o),
            _ => None,
        }
    }

    fn pop_class(&mut self) -> ObjRef {
        match self.pop() {
            Value::Obj(class) => class,
            _ => unreachable!("The compiler only emits classes here."),
        }
    }

    fn frame_upvalue(&mut self) -> ObjRef {
        let idx = self.read_byte() as usize;
        self.enclosing_upvalue(idx)
    }

    fn enclosing_upvalue(&self, idx: usize) -> ObjRef {
        self.heap
            .closure(self.frame().closure)
            .upvalues
            .get(idx)
            .copied()
            .unwrap_or_else(|| unreachable!("Upvalue {idx} is out of the closure's range."))
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self
            .frames
            .last_mut()
            .expect("There's always one callframe for the script.");
        let byte = self.heap.function(frame.function).chunk.code()[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        u16::from_be_bytes([self.read_byte(), self.read_byte()])
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        self.heap.function(self.frame().function).chunk.read_const(idx)
    }

    fn read_string(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(name) => name,
            _ => unreachable!("Constant for the name must have been added."),
        }
    }

    fn frame(&self) -> &CallFrame {
        self.frames
            .last()
            .expect("There's always one callframe for the script.")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames
            .last_mut()
            .expect("There's always one callframe for the script.")
    }

    fn peek(&self, steps: usize) -> Value {
        self.stack[self.stack.len() - 1 - steps]
    }

    fn push(&mut self, val: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(val);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("Invalid bytecodes")
    }
}

fn open_slot(heap: &Heap, upvalue: ObjRef) -> usize {
    match heap.upvalue(upvalue) {
        ObjUpvalue::Open(slot) => *slot,
        ObjUpvalue::Closed(_) => unreachable!("Upvalues in the open list are open."),
    }
}

fn start_time() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn clock_native(_args: &[Value]) -> Value {
    Value::Number(start_time().elapsed().as_secs_f64())
}
