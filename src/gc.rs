//! Heap of Lox objects managed by a mark-sweep garbage collector.
//!
//! Objects live in an arena and are addressed by [`ObjRef`] handles. The heap is the sole
//! owner of every object: nothing else frees an object, objects disappear only when a
//! collection finds them unreachable. A collection starts from the roots given by the
//! caller of an allocation (see [`GcRoots`]), marks reachable objects using a gray
//! worklist, drops unmarked strings from the intern table, then sweeps the arena.

use std::mem;

use tracing::{debug, trace};

use crate::{
    Config, Key, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjNative,
    ObjRef, ObjString, ObjUpvalue, Object, Table, Value,
};

/// Anything holding references to heap objects that must survive a collection.
pub trait GcRoots {
    /// Mark every object directly reachable from this root set.
    fn mark_roots(&self, heap: &mut Heap);
}

impl GcRoots for () {
    fn mark_roots(&self, _heap: &mut Heap) {}
}

impl GcRoots for Vec<Value> {
    fn mark_roots(&self, heap: &mut Heap) {
        for value in self {
            heap.mark_value(*value);
        }
    }
}

impl GcRoots for Table {
    fn mark_roots(&self, heap: &mut Heap) {
        heap.mark_table(self);
    }
}

#[derive(Debug)]
struct Slot {
    marked: bool,
    /// Bytes currently charged for this object.
    size: usize,
    object: Object,
}

/// The object heap.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    gray: Vec<ObjRef>,
    /// Reused buffer for the references of the object being blackened.
    scratch: Vec<ObjRef>,
    /// The intern set. This is a weak table, strings in it are not roots.
    pub(crate) strings: Table,
    init_string: ObjRef,
    bytes_allocated: usize,
    next_gc: usize,
    grow_factor: usize,
    stress: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

macro_rules! typed_access {
    ($variant:ident($typ:ty) => $get:ident) => {
        #[doc = concat!("Get the ", stringify!($variant), " object behind the handle.")]
        ///
        /// # Panics
        ///
        /// Panics if the handle points to an object of another kind.
        pub fn $get(&self, o: ObjRef) -> &$typ {
            match self.get(o) {
                Object::$variant(obj) => obj,
                other => panic!("Invalid cast from {} to {}.", other.kind(), stringify!($variant)),
            }
        }
    };
    ($variant:ident($typ:ty) => $get:ident, $get_mut:ident) => {
        typed_access!($variant($typ) => $get);

        #[doc = concat!("Get the ", stringify!($variant), " object behind the handle mutably.")]
        ///
        /// # Panics
        ///
        /// Panics if the handle points to an object of another kind.
        pub fn $get_mut(&mut self, o: ObjRef) -> &mut $typ {
            match self.get_mut(o) {
                Object::$variant(obj) => obj,
                other => panic!("Invalid cast from {} to {}.", other.kind(), stringify!($variant)),
            }
        }
    };
}

impl Heap {
    /// Create an empty heap tuned with the given configuration.
    pub fn new(config: &Config) -> Self {
        let mut heap = Self {
            slots: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            scratch: Vec::new(),
            strings: Table::default(),
            init_string: ObjRef::new(0),
            bytes_allocated: 0,
            next_gc: usize::MAX,
            grow_factor: config.gc_grow_factor,
            stress: false,
        };
        // No collection can run before the init string exists.
        heap.init_string = heap.intern("init", &());
        heap.next_gc = config.initial_gc_threshold;
        heap.stress = config.stress_gc;
        heap
    }

    /// Move an object into the heap. This may run a collection first, in which case every
    /// object that is not reachable from `roots` (or from the object being allocated) is freed.
    pub fn alloc(&mut self, object: impl Into<Object>, roots: &dyn GcRoots) -> ObjRef {
        let object = object.into();
        let size = object.size();
        self.bytes_allocated += size;
        if self.stress || self.bytes_allocated > self.next_gc {
            self.collect(roots, Some(&object));
        }

        trace!(target: "loxvm::gc", "allocate {} bytes for {}", size, object.kind());
        let slot = Slot {
            marked: false,
            size,
            object,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                ObjRef::new(idx)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef::new(self.slots.len() - 1)
            }
        }
    }

    /// Store a field on an instance. Growth of the field table is charged to the heap.
    pub fn set_field(&mut self, instance: ObjRef, key: Key, value: Value, roots: &dyn GcRoots) {
        self.instance_mut(instance).fields.set(key, value);
        self.recharge(instance, roots);
    }

    /// Add a method to a class. Growth of the method table is charged to the heap.
    pub fn set_method(&mut self, class: ObjRef, key: Key, method: Value, roots: &dyn GcRoots) {
        self.class_mut(class).methods.set(key, method);
        self.recharge(class, roots);
    }

    /// Copy every method of `superclass` into `subclass`. Methods already defined on
    /// `subclass` are overwritten.
    pub fn inherit(&mut self, subclass: ObjRef, superclass: ObjRef, roots: &dyn GcRoots) {
        let mut methods = mem::take(&mut self.class_mut(subclass).methods);
        self.class(superclass).methods.add_all(&mut methods);
        self.class_mut(subclass).methods = methods;
        self.recharge(subclass, roots);
    }

    /// Account for memory that grew or shrank outside of an object allocation, e.g. a
    /// table owned by the caller. Growth may run a collection.
    pub fn charge(&mut self, old_size: usize, new_size: usize, roots: &dyn GcRoots) {
        self.bytes_allocated = self.bytes_allocated - old_size + new_size;
        if new_size > old_size && (self.stress || self.bytes_allocated > self.next_gc) {
            self.collect(roots, None);
        }
    }

    /// Bring the charge of an object in line with what it owns now. The object must be
    /// reachable from `roots`.
    fn recharge(&mut self, o: ObjRef, roots: &dyn GcRoots) {
        let slot = self.slots[o.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("Use of freed object {o}."));
        let size = slot.object.size();
        let old_size = mem::replace(&mut slot.size, size);
        if size != old_size {
            trace!(
                target: "loxvm::gc",
                "{} resize {} from {} to {} bytes",
                o,
                slot.object.kind(),
                old_size,
                size
            );
            self.charge(old_size, size, roots);
        }
    }

    /// Run a full collection now.
    pub fn collect_garbage(&mut self, roots: &dyn GcRoots) {
        self.collect(roots, None);
    }

    /// Get the object behind the handle.
    ///
    /// # Panics
    ///
    /// Panics if the object was freed, which means a root was missed.
    pub fn get(&self, o: ObjRef) -> &Object {
        &self.slots[o.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("Use of freed object {o}."))
            .object
    }

    /// Get the object behind the handle mutably.
    ///
    /// # Panics
    ///
    /// Panics if the object was freed, which means a root was missed.
    pub fn get_mut(&mut self, o: ObjRef) -> &mut Object {
        &mut self.slots[o.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("Use of freed object {o}."))
            .object
    }

    typed_access!(String(ObjString) => string);
    typed_access!(Function(ObjFunction) => function);
    typed_access!(Closure(ObjClosure) => closure);
    typed_access!(Upvalue(ObjUpvalue) => upvalue, upvalue_mut);
    typed_access!(Class(ObjClass) => class, class_mut);
    typed_access!(Instance(ObjInstance) => instance, instance_mut);
    typed_access!(BoundMethod(ObjBoundMethod) => bound_method);
    typed_access!(Native(ObjNative) => native);

    /// Get the characters of a string object.
    pub fn str(&self, o: ObjRef) -> &str {
        &self.string(o).chars
    }

    /// Get the table key of a string object.
    pub fn key(&self, o: ObjRef) -> Key {
        Key {
            string: o,
            hash: self.string(o).hash,
        }
    }

    /// The interned `"init"` string, name of class initializers.
    pub fn init_string(&self) -> ObjRef {
        self.init_string
    }

    /// Number of objects currently alive in the heap.
    pub fn live_objects(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Number of bytes currently charged to live objects.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of allocated bytes that will trigger the next collection.
    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// Mark the object held by `value`, if any.
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(o) = value {
            self.mark_object(o);
        }
    }

    /// Mark an object as reachable and queue it for tracing.
    pub fn mark_object(&mut self, o: ObjRef) {
        let slot = self.slots[o.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("Marking freed object {o}."));
        if slot.marked {
            return;
        }
        trace!(target: "loxvm::gc", "{} mark {}", o, slot.object.kind());
        slot.marked = true;
        self.gray.push(o);
    }

    /// Mark every key and value of a table that lives outside of the heap.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key.string);
            self.mark_value(value);
        }
    }

    fn collect(&mut self, roots: &dyn GcRoots, pending: Option<&Object>) {
        let before = self.bytes_allocated;
        debug!(target: "loxvm::gc", "-- gc begin");

        roots.mark_roots(self);
        self.mark_object(self.init_string);
        if let Some(object) = pending {
            // The object being allocated is not in the arena yet, but what it points to
            // must survive.
            let mut refs = mem::take(&mut self.scratch);
            object.references(&mut refs);
            for o in refs.drain(..) {
                self.mark_object(o);
            }
            self.scratch = refs;
        }
        self.trace_references();
        self.remove_white_strings();
        self.sweep();
        self.next_gc = self.bytes_allocated * self.grow_factor;

        debug!(target: "loxvm::gc", "-- gc end");
        debug!(
            target: "loxvm::gc",
            "   collected {} bytes (from {} to {}) next at {}",
            before - self.bytes_allocated,
            before,
            self.bytes_allocated,
            self.next_gc
        );
    }

    fn trace_references(&mut self) {
        while let Some(o) = self.gray.pop() {
            self.blacken_object(o);
        }
    }

    fn blacken_object(&mut self, o: ObjRef) {
        let mut refs = mem::take(&mut self.scratch);
        let object = self.get(o);
        trace!(target: "loxvm::gc", "{} blacken {}", o, object.kind());
        object.references(&mut refs);
        for child in refs.drain(..) {
            self.mark_object(child);
        }
        self.scratch = refs;
    }

    fn remove_white_strings(&mut self) {
        let slots = &self.slots;
        self.strings.retain_keys(|key| {
            slots[key.string.index()]
                .as_ref()
                .map_or(false, |slot| slot.marked)
        });
    }

    fn sweep(&mut self) {
        for (idx, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(slot) if slot.marked => slot.marked = false,
                Some(slot) => {
                    trace!(target: "loxvm::gc", "#{} free {}", idx, slot.object.kind());
                    self.bytes_allocated -= slot.size;
                    *entry = None;
                    self.free.push(idx);
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::default()
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut heap = heap();
        let before = heap.live_objects();
        heap.intern("garbage", &());
        let class_name = heap.intern("Garbage", &());
        heap.alloc(ObjClass::new(class_name), &());
        assert_eq!(heap.live_objects(), before + 3);

        heap.collect_garbage(&());
        assert_eq!(heap.live_objects(), before);
    }

    #[test]
    fn reachable_objects_survive_repeated_collections() {
        let mut heap = heap();
        let name = heap.intern("f", &());
        let constant = heap.intern("constant", &());
        let mut fun = ObjFunction::new(Some(name));
        fun.chunk.add_const(Value::Obj(constant));
        let fun = heap.alloc(fun, &());
        let upvalue = heap.alloc(ObjUpvalue::Closed(Value::Obj(constant)), &());
        let closure = heap.alloc(ObjClosure::new(fun, vec![upvalue]), &());

        let roots = vec![Value::Obj(closure)];
        for _ in 0..3 {
            heap.collect_garbage(&roots);
        }
        assert_eq!(heap.str(heap.function(heap.closure(closure).fun).name.unwrap()), "f");
        assert_eq!(heap.str(constant), "constant");
        assert!(matches!(heap.upvalue(upvalue), ObjUpvalue::Closed(_)));
    }

    #[test]
    fn instances_keep_their_class_and_fields() {
        let mut heap = heap();
        let class_name = heap.intern("Point", &());
        let class = heap.alloc(ObjClass::new(class_name), &());
        let instance = heap.alloc(ObjInstance::new(class), &());
        let field = heap.intern("x", &());
        let value = heap.intern("field value", &());
        let key = heap.key(field);
        heap.instance_mut(instance).fields.set(key, Value::Obj(value));
        let bound = heap.alloc(
            ObjBoundMethod {
                receiver: Value::Obj(instance),
                method: class,
            },
            &(),
        );

        heap.collect_garbage(&vec![Value::Obj(bound)]);
        assert_eq!(heap.str(heap.class(heap.instance(instance).class).name), "Point");
        assert_eq!(heap.str(value), "field value");
    }

    #[test]
    fn intern_table_is_weak() {
        let mut heap = heap();
        let kept = heap.intern("kept", &());
        heap.intern("dropped", &());
        heap.collect_garbage(&vec![Value::Obj(kept)]);

        assert_eq!(heap.intern("kept", &()), kept);
        assert_eq!(heap.strings.len(), 2);
        assert_eq!(heap.str(heap.init_string()), "init");
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = heap();
        let garbage = heap.intern("garbage", &());
        heap.collect_garbage(&());
        let reused = heap.intern("fresh", &());
        assert_eq!(garbage, reused);
    }

    #[test]
    fn stress_mode_keeps_rooted_objects() {
        let config = Config {
            stress_gc: true,
            ..Config::default()
        };
        let mut heap = Heap::new(&config);
        let mut roots = Vec::new();
        for i in 0..20 {
            let s = heap.intern(&format!("string {i}"), &roots);
            roots.push(Value::Obj(s));
        }
        for (i, value) in roots.iter().enumerate() {
            let o = value.as_obj().unwrap();
            assert_eq!(heap.str(o), format!("string {i}"));
        }
    }

    #[test]
    fn growing_fields_are_charged() {
        let mut heap = heap();
        let class_name = heap.intern("Bag", &());
        let class = heap.alloc(ObjClass::new(class_name), &());
        let instance = heap.alloc(ObjInstance::new(class), &());
        let mut roots = vec![Value::Obj(instance)];
        let empty = heap.bytes_allocated();

        for i in 0..20 {
            let field = heap.intern(&format!("f{i}"), &roots);
            roots.push(Value::Obj(field));
            let key = heap.key(field);
            heap.set_field(instance, key, Value::Number(i as f64), &roots);
        }
        let table = heap.instance(instance).fields.size();
        assert!(table > 0);
        assert!(heap.bytes_allocated() >= empty + table);

        // Dropping the instance refunds the grown table along with it.
        let before_free = heap.bytes_allocated();
        roots.remove(0);
        heap.collect_garbage(&roots);
        assert!(before_free - heap.bytes_allocated() >= table);
    }

    #[test]
    fn growth_past_the_threshold_collects() {
        let config = Config {
            initial_gc_threshold: usize::MAX,
            ..Config::default()
        };
        let mut heap = Heap::new(&config);
        heap.intern("garbage", &());
        let live = heap.live_objects();
        heap.next_gc = heap.bytes_allocated();
        heap.charge(0, 64, &());
        assert_eq!(heap.live_objects(), live - 1);
    }

    #[test]
    fn threshold_grows_with_live_bytes() {
        let mut heap = heap();
        let kept = heap.intern("kept", &());
        heap.collect_garbage(&vec![Value::Obj(kept)]);
        assert_eq!(heap.next_gc(), heap.bytes_allocated() * 2);
    }
}
