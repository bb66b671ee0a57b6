use num_enum::{IntoPrimitive, TryFromPrimitive};

/// OpCode is a number that specifies the type of the instruction. Operands are
/// stored as the bytes following the opcode in the chunk, the comment on each
/// variant lists them.
///
/// # Notes
///
/// The discriminants are spelled out so that the encoding stays stable no matter how
/// the variants are ordered in source.
///
/// There is no opcode for `!=`, `<=` or `>=`. The compiler emits the opposite
/// comparison followed by [`OpCode::Not`], so `a <= b` runs as `!(a > b)`. Under
/// [IEEE 754] this differs from a real `<=` when an operand is `NaN`.
///
/// [IEEE 754]: https://en.wikipedia.org/wiki/IEEE_754
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    /// Load a constant. Operand: constant index.
    Constant = 0,
    /// Load a `nil` value
    Nil = 1,
    /// Load a `true` value
    True = 2,
    /// Load a `false` value
    False = 3,
    /// Pop the top of the stack
    Pop = 4,
    /// Push a local variable. Operand: frame-relative slot.
    GetLocal = 5,
    /// Store the top of the stack into a local variable. Operand: frame-relative slot.
    SetLocal = 6,
    /// Push a global variable. Operand: constant index of the name.
    GetGlobal = 7,
    /// Pop the top of the stack and define a variable initialized with that value.
    /// Operand: constant index of the name.
    DefineGlobal = 8,
    /// Store the top of the stack into an existing global variable.
    /// Operand: constant index of the name.
    SetGlobal = 9,
    /// Push a captured variable. Operand: upvalue index.
    GetUpvalue = 10,
    /// Store the top of the stack into a captured variable. Operand: upvalue index.
    SetUpvalue = 11,
    /// Read a field or bind a method of an instance. Operand: constant index of the name.
    GetProperty = 12,
    /// Write a field of an instance. Operand: constant index of the name.
    SetProperty = 13,
    /// Bind a method of the superclass to `this`. Operand: constant index of the name.
    GetSuper = 14,
    /// Check for equality between 2 operands.
    Equal = 15,
    /// Compare if the first operand is greater than the second
    Greater = 16,
    /// Compare if the first operand is less than the second
    Less = 17,
    /// Add two number operands or two string operands
    Add = 18,
    /// Subtract two number operands
    Subtract = 19,
    /// Multiply two number operands
    Multiply = 20,
    /// Divide two number operands
    Divide = 21,
    /// Apply logical `not` to a single operand
    Not = 22,
    /// Negate a single number operand
    Negate = 23,
    /// Print an expression in human readable format
    Print = 24,
    /// Jump forward. Operand: 16-bit offset.
    Jump = 25,
    /// Jump forward if the top of the stack is falsey. Operand: 16-bit offset.
    JumpIfFalse = 26,
    /// Jump backward. Operand: 16-bit offset.
    Loop = 27,
    /// Call the value below the arguments. Operand: argument count.
    Call = 28,
    /// Look up a method on the receiver and call it.
    /// Operands: constant index of the name, argument count.
    Invoke = 29,
    /// Look up a method on the superclass and call it with `this`.
    /// Operands: constant index of the name, argument count.
    SuperInvoke = 30,
    /// Create a closure. Operands: constant index of the function, then a pair of
    /// `(is_local, index)` bytes for each upvalue of the function.
    Closure = 31,
    /// Close the upvalue at the top of the stack and pop it.
    CloseUpvalue = 32,
    /// Return from the current function
    Return = 33,
    /// Create a class. Operand: constant index of the name.
    Class = 34,
    /// Copy the methods of the superclass into the subclass.
    Inherit = 35,
    /// Add the closure on top of the stack as a method of the class below it.
    /// Operand: constant index of the name.
    Method = 36,
}
