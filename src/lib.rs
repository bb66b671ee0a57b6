//! A bytecode virtual machine for the Lox programming language.
//!
//! Source code is compiled in a single pass into bytecode chunks, which are run by a
//! stack-based virtual machine. Objects live in a heap managed by a mark-sweep garbage
//! collector.
//!
//! ```
//! use std::io;
//!
//! let mut vm = loxvm::Vm::default().with_output(io::sink(), io::sink());
//! vm.interpret("var a = 1; print a + 2;").unwrap();
//! ```

#![warn(missing_debug_implementations)]
#![deny(missing_docs)]

mod chunk;
mod compile;
mod config;
mod error;
mod gc;
mod intern;
mod object;
mod opcode;
mod scan;
mod table;
mod token;
mod value;
mod vm;

pub use chunk::*;
pub use compile::*;
pub use config::*;
pub use error::*;
pub use gc::*;
pub use intern::*;
pub use object::*;
pub use opcode::*;
pub use scan::*;
pub use table::*;
pub use token::*;
pub use value::*;
pub use vm::*;
