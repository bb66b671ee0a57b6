use std::{fmt, io};

use itertools::Itertools;

/// Virtual machine errors. Each of them aborts the running program.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Wrong arguments given to binary operators that only accept numbers
    #[error("Operands must be numbers.")]
    ExpectedNumbers,
    /// Wrong arguments given to unary operators that only accept a numbers
    #[error("Operand must be a number.")]
    ExpectedNumber,
    /// Wrong arguments given to binary add operators that only accept two numbers
    /// or two strings
    #[error("Operands must be two numbers or two strings.")]
    InvalidAddOperands,
    /// Accessing an undefined variable
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    /// Accessing a property that is neither a field nor a method
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    /// Reading a property of something that is not an instance
    #[error("Only instances have properties.")]
    PropertyOnNonInstance,
    /// Writing a field of something that is not an instance
    #[error("Only instances have fields.")]
    FieldOnNonInstance,
    /// Invoking a method on something that is not an instance
    #[error("Only instances have methods.")]
    MethodOnNonInstance,
    /// Calling a value that is not a function, a method or a class
    #[error("Can only call functions and classes.")]
    NotCallable,
    /// Called a function/method with incorrect number of arguments.
    #[error("Expected {arity} arguments but got {argc}.")]
    BadArgumentsCount {
        /// The arity of the function.
        arity: u8,
        /// The number of arguments given.
        argc: u8,
    },
    /// Too many nested calls or too many values on the stack
    #[error("Stack overflow.")]
    StackOverflow,
    /// Inheriting from something that is not a class
    #[error("Superclass must be a class.")]
    SuperclassNotClass,
    /// Can't write the output of the program
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where a compile error was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// At the given lexeme
    At(String),
    /// At the end of the source
    End,
    /// Inside a token that could not be scanned, the message says what went wrong
    Lexical,
}

/// Error while compiling Lox source code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct CompileError {
    /// Line on which the error was found
    pub line: usize,
    /// Token at which the error was found
    pub location: ErrorLocation,
    /// What went wrong
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            ErrorLocation::At(lexeme) => write!(f, " at '{lexeme}'")?,
            ErrorLocation::End => write!(f, " at end")?,
            ErrorLocation::Lexical => {}
        }
        write!(f, ": {}", self.message)
    }
}

/// One entry of the call stack printed along a runtime error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Line being executed in this frame
    pub line: usize,
    /// Name of the function, `None` for the top-level script
    pub function: Option<String>,
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            None => write!(f, "[line {}] in script", self.line),
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
        }
    }
}

/// Lox virtual machine errors
#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    /// The source did not compile, execution never started
    #[error("{}", .0.iter().join("\n"))]
    Compile(Vec<CompileError>),
    /// Execution was aborted
    #[error("{error}\n{}", .trace.iter().join("\n"))]
    Runtime {
        /// What went wrong
        error: RuntimeError,
        /// The call stack at the time of the error, innermost frame first
        trace: Vec<FrameInfo>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_format() {
        let at = CompileError {
            line: 3,
            location: ErrorLocation::At("=".to_string()),
            message: "Invalid assignment target.".to_string(),
        };
        assert_eq!(at.to_string(), "[line 3] Error at '=': Invalid assignment target.");

        let end = CompileError {
            line: 1,
            location: ErrorLocation::End,
            message: "Expect expression.".to_string(),
        };
        assert_eq!(end.to_string(), "[line 1] Error at end: Expect expression.");

        let lexical = CompileError {
            line: 2,
            location: ErrorLocation::Lexical,
            message: "Unexpected character.".to_string(),
        };
        assert_eq!(lexical.to_string(), "[line 2] Error: Unexpected character.");
    }

    #[test]
    fn runtime_error_format() {
        let err = InterpretError::Runtime {
            error: RuntimeError::BadArgumentsCount { arity: 1, argc: 2 },
            trace: vec![
                FrameInfo {
                    line: 2,
                    function: Some("f".to_string()),
                },
                FrameInfo {
                    line: 4,
                    function: None,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Expected 1 arguments but got 2.\n[line 2] in f()\n[line 4] in script"
        );
    }
}
