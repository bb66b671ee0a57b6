/// Knobs of the virtual machine and its garbage collector.
#[derive(Debug, Clone)]
pub struct Config {
    /// Run a full collection before every allocation.
    pub stress_gc: bool,
    /// After a collection, the next one happens when the number of allocated bytes reaches
    /// the number of bytes still alive times this factor.
    pub gc_grow_factor: usize,
    /// Number of allocated bytes that triggers the first collection.
    pub initial_gc_threshold: usize,
    /// Log the stack and each instruction before it is executed.
    pub trace_execution: bool,
    /// Log the disassembly of each function once it is compiled.
    pub print_code: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stress_gc: false,
            gc_grow_factor: 2,
            initial_gc_threshold: 1024 * 1024,
            trace_execution: false,
            print_code: false,
        }
    }
}
