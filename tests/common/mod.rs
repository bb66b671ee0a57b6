#![allow(dead_code)]

use std::{cell::RefCell, io, rc::Rc};

use loxvm::{Config, InterpretError, Vm};

/// An in-memory sink that can be read back after the machine wrote to it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.borrow_mut());
        String::from_utf8(bytes).expect("output is not UTF-8")
    }
}

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A machine whose output and error reports are captured.
#[derive(Debug)]
pub struct Session {
    pub vm: Vm,
    stdout: SharedBuf,
    stderr: SharedBuf,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let stdout = SharedBuf::default();
        let stderr = SharedBuf::default();
        let vm = Vm::new(config).with_output(stdout.clone(), stderr.clone());
        Self { vm, stdout, stderr }
    }

    pub fn run(&mut self, src: &str) -> Result<(), InterpretError> {
        self.vm.interpret(src)
    }

    /// Output printed since the last call.
    pub fn stdout(&self) -> String {
        self.stdout.take()
    }

    /// Errors reported since the last call.
    pub fn stderr(&self) -> String {
        self.stderr.take()
    }
}

/// Run a program that must succeed and return what it printed.
pub fn output(src: &str) -> String {
    output_with(Config::default(), src)
}

pub fn output_with(config: Config, src: &str) -> String {
    let mut session = Session::with_config(config);
    if let Err(err) = session.run(src) {
        panic!("program failed: {err}\nstderr: {}", session.stderr());
    }
    session.stdout()
}

/// Run a program that must fail and return the error along with the reports.
pub fn failure(src: &str) -> (InterpretError, String) {
    let mut session = Session::new();
    match session.run(src) {
        Ok(()) => panic!("program succeeded: {}", session.stdout()),
        Err(err) => (err, session.stderr()),
    }
}
