//! This module deals with chunks of bytecodes.

use std::{
    fmt::{self, Write},
    mem,
};

use crate::{Heap, OpCode, Value};

/// Chunk is a sequence of instructions and data that will be written to by the compiler
/// and later run by the virtual-machine.
///
/// # Examples
///
/// ```
/// use loxvm::{Chunk, OpCode, Value};
///
/// let mut chunk = Chunk::default();
/// let const_id = chunk.add_const(Value::Number(1.0));
/// assert!(matches!(chunk.read_const(const_id as u8), Value::Number(n) if n == 1.0));
///
/// chunk.write_op(OpCode::Constant, 1);
/// chunk.write(const_id as u8, 1);
/// assert_eq!(chunk.code(), &[OpCode::Constant as u8, 0]);
/// assert_eq!(chunk.line(1), 1);
/// ```
#[derive(Default, Debug)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<usize>,
    constants: Vec<Value>,
}

impl Chunk {
    /// Add a byte to the chunk, recording the source line it came from.
    pub fn write(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Add an opcode to the chunk.
    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write(op.into(), line);
    }

    /// Overwrite a byte that was written before. Used to patch jump offsets.
    pub fn patch(&mut self, offset: usize, byte: u8) {
        self.code[offset] = byte;
    }

    /// Add a constant value to the chunk and return it position in the Vec. The caller
    /// decides whether the index fits in an operand.
    pub fn add_const(&mut self, val: Value) -> usize {
        self.constants.push(val);
        self.constants.len() - 1
    }

    /// Read the constant at the given index
    pub fn read_const(&self, idx: u8) -> Value {
        self.constants[idx as usize]
    }

    /// The bytecode of this chunk.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The constant pool of this chunk.
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// The source line of the byte at `offset`.
    pub fn line(&self, offset: usize) -> usize {
        self.lines[offset]
    }

    /// Bytes owned by the chunk.
    pub fn size(&self) -> usize {
        self.code.capacity()
            + self.lines.capacity() * mem::size_of::<usize>()
            + self.constants.capacity() * mem::size_of::<Value>()
    }

    /// Go through the instructions in the chunk and display them in human-readable format.
    pub fn disassemble(&self, name: &str, heap: &Heap) -> String {
        let mut out = format!("== {name} ==\n");
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self
                .disassemble_instruction(offset, heap, &mut out)
                .expect("Writing to a String can't fail.");
        }
        out
    }

    /// Display the instruction at `offset` in human readable format and return the offset
    /// of the next instruction.
    pub fn disassemble_instruction(
        &self,
        offset: usize,
        heap: &Heap,
        out: &mut impl Write,
    ) -> Result<usize, fmt::Error> {
        write!(out, "{offset:04} ")?;
        if offset > 0 && self.lines[offset] == self.lines[offset - 1] {
            write!(out, "   | ")?;
        } else {
            write!(out, "{:4} ", self.lines[offset])?;
        }

        let op = match OpCode::try_from(self.code[offset]) {
            Ok(op) => op,
            Err(_) => {
                writeln!(out, "Unknown opcode {}", self.code[offset])?;
                return Ok(offset + 1);
            }
        };
        let name = op_name(op);
        match op {
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Class
            | OpCode::Method => {
                let idx = self.code[offset + 1];
                let constant = self.read_const(idx).display(heap);
                writeln!(out, "{name:<16} {idx:4} '{constant}'")?;
                Ok(offset + 2)
            }
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Call => {
                let slot = self.code[offset + 1];
                writeln!(out, "{name:<16} {slot:4}")?;
                Ok(offset + 2)
            }
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
                let jump = u16::from_be_bytes([self.code[offset + 1], self.code[offset + 2]]);
                let target = if op == OpCode::Loop {
                    offset + 3 - jump as usize
                } else {
                    offset + 3 + jump as usize
                };
                writeln!(out, "{name:<16} {offset:4} -> {target}")?;
                Ok(offset + 3)
            }
            OpCode::Invoke | OpCode::SuperInvoke => {
                let idx = self.code[offset + 1];
                let argc = self.code[offset + 2];
                let constant = self.read_const(idx).display(heap);
                writeln!(out, "{name:<16} ({argc} args) {idx:4} '{constant}'")?;
                Ok(offset + 3)
            }
            OpCode::Closure => {
                let idx = self.code[offset + 1];
                let fun = self.read_const(idx);
                writeln!(out, "{name:<16} {idx:4} {}", fun.display(heap))?;
                let upvalue_count = fun
                    .as_obj()
                    .map(|o| heap.function(o).upvalue_count)
                    .unwrap_or_default();
                let mut offset = offset + 2;
                for _ in 0..upvalue_count {
                    let is_local = self.code[offset];
                    let index = self.code[offset + 1];
                    let kind = if is_local == 1 { "local" } else { "upvalue" };
                    writeln!(out, "{:04}      |                     {kind} {index}", offset)?;
                    offset += 2;
                }
                Ok(offset)
            }
            OpCode::Nil
            | OpCode::True
            | OpCode::False
            | OpCode::Pop
            | OpCode::Equal
            | OpCode::Greater
            | OpCode::Less
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Not
            | OpCode::Negate
            | OpCode::Print
            | OpCode::CloseUpvalue
            | OpCode::Return
            | OpCode::Inherit => {
                writeln!(out, "{name}")?;
                Ok(offset + 1)
            }
        }
    }
}

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "OP_CONSTANT",
        OpCode::Nil => "OP_NIL",
        OpCode::True => "OP_TRUE",
        OpCode::False => "OP_FALSE",
        OpCode::Pop => "OP_POP",
        OpCode::GetLocal => "OP_GET_LOCAL",
        OpCode::SetLocal => "OP_SET_LOCAL",
        OpCode::GetGlobal => "OP_GET_GLOBAL",
        OpCode::DefineGlobal => "OP_DEFINE_GLOBAL",
        OpCode::SetGlobal => "OP_SET_GLOBAL",
        OpCode::GetUpvalue => "OP_GET_UPVALUE",
        OpCode::SetUpvalue => "OP_SET_UPVALUE",
        OpCode::GetProperty => "OP_GET_PROPERTY",
        OpCode::SetProperty => "OP_SET_PROPERTY",
        OpCode::GetSuper => "OP_GET_SUPER",
        OpCode::Equal => "OP_EQUAL",
        OpCode::Greater => "OP_GREATER",
        OpCode::Less => "OP_LESS",
        OpCode::Add => "OP_ADD",
        OpCode::Subtract => "OP_SUBTRACT",
        OpCode::Multiply => "OP_MULTIPLY",
        OpCode::Divide => "OP_DIVIDE",
        OpCode::Not => "OP_NOT",
        OpCode::Negate => "OP_NEGATE",
        OpCode::Print => "OP_PRINT",
        OpCode::Jump => "OP_JUMP",
        OpCode::JumpIfFalse => "OP_JUMP_IF_FALSE",
        OpCode::Loop => "OP_LOOP",
        OpCode::Call => "OP_CALL",
        OpCode::Invoke => "OP_INVOKE",
        OpCode::SuperInvoke => "OP_SUPER_INVOKE",
        OpCode::Closure => "OP_CLOSURE",
        OpCode::CloseUpvalue => "OP_CLOSE_UPVALUE",
        OpCode::Return => "OP_RETURN",
        OpCode::Class => "OP_CLASS",
        OpCode::Inherit => "OP_INHERIT",
        OpCode::Method => "OP_METHOD",
    }
}
