//! Isolates
//!
//! An isolate owns one execution worker's entire mutable state: heap,
//! object store, handles, zone stack, frame stack, stack-limit words and
//! the cross-isolate message queue. Exactly one isolate is current on a
//! thread at a time; all access to an isolate's heap happens on its
//! worker.

use crate::handles::{Handle, Handles};
use crate::heap::Heap;
use crate::object::CodeIndexTable;
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;
use crate::zone::Zone;
use crate::VmResult;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default worker stack size.
const DEFAULT_STACK_SIZE: u64 = 1024 * 1024;

/// Headroom reserved below the stack limit for unwinding an overflow.
const STACK_SIZE_BUFFER: u64 = 128 * 1024;

/// Per-isolate behavior toggles.
#[derive(Debug, Clone)]
pub struct Flags {
    /// Whether type-argument bound checks run during finalization.
    pub enable_type_checks: bool,
    /// Whether instance-call sites are patched with inline-cache stubs.
    pub use_inline_caches: bool,
    /// Whether function-type assignability accepts either direction of
    /// subtyping on parameter types.
    pub bidirectional_parameter_checks: bool,
    /// Invocation count at which unoptimized code requests optimization.
    pub optimization_counter_threshold: i64,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            enable_type_checks: false,
            use_inline_caches: true,
            bidirectional_parameter_checks: true,
            optimization_counter_threshold: 5,
        }
    }
}

/// An immutable cross-isolate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination port id.
    pub port: i64,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

/// Monitor-protected message queue. The sender side holds an
/// [`Arc<MessageQueue>`]; the owning isolate drains it at safepoints.
pub struct MessageQueue {
    queue: Mutex<VecDeque<Message>>,
    available: Condvar,
}

impl MessageQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        MessageQueue {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Enqueue a message; wakes a waiting receiver.
    pub fn post(&self, message: Message) {
        self.queue.lock().push_back(message);
        self.available.notify_one();
    }

    /// Dequeue without blocking.
    pub fn try_dequeue(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    /// Dequeue, waiting up to `timeout` for a message.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Message> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.available.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        MessageQueue::new()
    }
}

/// One activation of compiled code, as seen by the runtime pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Current pc of the activation.
    pub pc: u64,
}

/// Callback run once for every new isolate, installed process-wide.
pub type InitCallback = fn(&mut Isolate) -> VmResult<()>;

static INIT_CALLBACK: OnceCell<InitCallback> = OnceCell::new();
static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_ISOLATE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// One independent execution worker.
pub struct Isolate {
    id: u64,
    /// The managed heap.
    pub heap: Heap,
    /// Distinguished heap references.
    pub store: ObjectStore,
    /// Handle arena.
    pub handles: Handles,
    /// Behavior toggles.
    pub flags: Flags,
    /// Frame stack of the worker, innermost last.
    pub frames: Vec<Frame>,
    /// Pc-range to code mapping.
    pub code_index: CodeIndexTable,
    /// Current context of executing code.
    pub top_context: ObjectRef,
    zones: Vec<Zone>,
    message_queue: Arc<MessageQueue>,
    active_ports: i64,
    stack_limit: u64,
    stack_limit_on_overflow: u64,
    no_handle_depth: u32,
}

impl Isolate {
    /// Create and bootstrap an isolate, running the process-wide init
    /// callback if one is installed.
    pub fn new() -> Isolate {
        let mut isolate = Isolate {
            id: NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed),
            heap: Heap::new(),
            store: ObjectStore::new_uninitialized(),
            handles: Handles::new(),
            flags: Flags::default(),
            frames: Vec::new(),
            code_index: CodeIndexTable::new(),
            top_context: ObjectRef::NULL,
            zones: Vec::new(),
            message_queue: Arc::new(MessageQueue::new()),
            active_ports: 0,
            stack_limit: 0,
            stack_limit_on_overflow: 0,
            no_handle_depth: 0,
        };
        crate::bootstrap::initialize(&mut isolate);
        if let Some(callback) = INIT_CALLBACK.get() {
            // A failing init callback leaves the isolate usable; the
            // error lands in the sticky-error slot.
            if let Err(e) = callback(&mut isolate) {
                let message = crate::object::Str::new(
                    &mut isolate.heap,
                    &isolate.store,
                    &e.to_string(),
                    crate::heap::Space::Old,
                );
                isolate.store.sticky_error = message;
            }
        }
        isolate
    }

    /// Install the process-wide init callback. Only the first call
    /// succeeds.
    pub fn set_init_callback(callback: InitCallback) -> Result<(), ()> {
        INIT_CALLBACK.set(callback).map_err(|_| ())
    }

    /// This isolate's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make this isolate current on the calling thread. Panics if some
    /// other isolate is already current.
    pub fn enter(&self) {
        CURRENT_ISOLATE.with(|current| {
            assert!(
                current.get().is_none(),
                "another isolate is current on this thread"
            );
            current.set(Some(self.id));
        });
    }

    /// Clear the current-isolate slot. Panics unless this isolate is
    /// the current one.
    pub fn exit(&self) {
        CURRENT_ISOLATE.with(|current| {
            assert_eq!(current.get(), Some(self.id), "isolate is not current");
            current.set(None);
        });
    }

    /// Id of the isolate current on this thread, if any.
    pub fn current_id() -> Option<u64> {
        CURRENT_ISOLATE.with(|current| current.get())
    }

    /// Whether this isolate is current on the calling thread.
    pub fn is_current(&self) -> bool {
        Isolate::current_id() == Some(self.id)
    }

    /// A sender handle to this isolate's message queue.
    pub fn message_queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.message_queue)
    }

    /// Number of open receive ports.
    pub fn active_ports(&self) -> i64 {
        self.active_ports
    }

    /// Record an opened port.
    pub fn increment_active_ports(&mut self) {
        self.active_ports += 1;
    }

    /// Record a closed port.
    pub fn decrement_active_ports(&mut self) {
        debug_assert!(self.active_ports > 0);
        self.active_ports -= 1;
    }

    /// Push a fresh zone; zone handles allocated from now on die when
    /// it is popped.
    pub fn push_zone(&mut self) {
        self.zones.push(Zone::new());
        self.handles.enter_zone();
    }

    /// Pop the innermost zone, releasing its memory and handles.
    pub fn pop_zone(&mut self) {
        self.handles.exit_zone();
        self.zones.pop().expect("no open zone");
    }

    /// The innermost zone.
    pub fn current_zone(&mut self) -> &mut Zone {
        self.zones.last_mut().expect("no open zone")
    }

    /// Number of open zones.
    pub fn zone_depth(&self) -> usize {
        self.zones.len()
    }

    /// Allocate a scoped handle, enforcing no-handle scopes.
    pub fn new_handle(&mut self, value: ObjectRef) -> Handle {
        assert_eq!(
            self.no_handle_depth, 0,
            "handle allocated inside a no-handle scope"
        );
        self.handles.new_handle(value)
    }

    /// Set the stack limit directly.
    pub fn set_stack_limit(&mut self, limit: u64) {
        self.stack_limit = limit;
        self.stack_limit_on_overflow = limit.saturating_sub(STACK_SIZE_BUFFER);
    }

    /// Derive the stack limit from the current top of stack.
    pub fn set_stack_limit_from_current_tos(&mut self, stack_top: u64) {
        self.set_stack_limit(stack_top.saturating_sub(DEFAULT_STACK_SIZE - STACK_SIZE_BUFFER));
    }

    /// The live stack-limit word checked on function entry.
    pub fn stack_limit(&self) -> u64 {
        self.stack_limit
    }

    /// Lower the limit to reserve headroom for unwinding an overflow.
    pub fn adjust_stack_limit_for_exception(&mut self) {
        self.stack_limit = self.stack_limit_on_overflow;
    }

    /// Restore the limit after the overflow exception is handled.
    pub fn reset_stack_limit_after_exception(&mut self) {
        self.stack_limit = self.stack_limit_on_overflow + STACK_SIZE_BUFFER;
    }

    /// Enter a span during which GC must not run; the heap rejects
    /// allocation until it is left.
    pub fn increment_no_gc_scope_depth(&mut self) {
        self.heap.increment_no_gc_scope_depth();
    }

    /// Leave a no-GC span.
    pub fn decrement_no_gc_scope_depth(&mut self) {
        self.heap.decrement_no_gc_scope_depth();
    }

    /// Whether a GC safepoint is currently permitted.
    pub fn gc_allowed(&self) -> bool {
        self.heap.gc_allowed()
    }

    /// Enter a span during which no handles may be allocated.
    pub fn increment_no_handle_scope_depth(&mut self) {
        self.no_handle_depth += 1;
    }

    /// Leave a no-handle span.
    pub fn decrement_no_handle_scope_depth(&mut self) {
        debug_assert!(self.no_handle_depth > 0);
        self.no_handle_depth -= 1;
    }

    /// The innermost frame, if any.
    pub fn top_frame(&self) -> Option<Frame> {
        self.frames.last().copied()
    }

    /// Record the sticky error message and return false, the finalizer
    /// failure convention.
    pub fn set_sticky_error(&mut self, message: &str) {
        let s = crate::object::Str::new(
            &mut self.heap,
            &self.store,
            message,
            crate::heap::Space::Old,
        );
        self.store.sticky_error = s;
    }

    /// The sticky error as a native string, if set.
    pub fn sticky_error_str(&self) -> Option<String> {
        if self.store.sticky_error.is_null() {
            None
        } else {
            Some(crate::object::Str(self.store.sticky_error).to_string(&self.heap))
        }
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Isolate::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_exit_current() {
        let isolate = Isolate::new();
        assert!(Isolate::current_id().is_none());
        isolate.enter();
        assert!(isolate.is_current());
        assert_eq!(Isolate::current_id(), Some(isolate.id()));
        isolate.exit();
        assert!(Isolate::current_id().is_none());
    }

    #[test]
    #[should_panic(expected = "another isolate is current")]
    fn test_double_enter_panics() {
        let a = Isolate::new();
        let b = Isolate::new();
        a.enter();
        // Entering b without exiting a is a protocol violation.
        b.enter();
    }

    #[test]
    fn test_message_queue_round_trip() {
        let isolate = Isolate::new();
        let sender = isolate.message_queue();
        assert!(sender.is_empty());
        sender.post(Message {
            port: 3,
            data: vec![1, 2, 3],
        });
        assert_eq!(sender.len(), 1);
        let got = isolate.message_queue().try_dequeue().unwrap();
        assert_eq!(got.port, 3);
        assert_eq!(got.data, vec![1, 2, 3]);
        assert!(isolate.message_queue().try_dequeue().is_none());
    }

    #[test]
    fn test_cross_thread_post() {
        let isolate = Isolate::new();
        let sender = isolate.message_queue();
        let worker = std::thread::spawn(move || {
            sender.post(Message {
                port: 1,
                data: b"ping".to_vec(),
            });
        });
        let message = isolate
            .message_queue()
            .dequeue_timeout(Duration::from_secs(5))
            .expect("message should arrive");
        assert_eq!(message.data, b"ping");
        worker.join().unwrap();
    }

    #[test]
    fn test_stack_limit_overflow_protocol() {
        let mut isolate = Isolate::new();
        isolate.set_stack_limit_from_current_tos(10 * 1024 * 1024);
        let normal = isolate.stack_limit();
        assert!(normal > 0);

        isolate.adjust_stack_limit_for_exception();
        let lowered = isolate.stack_limit();
        assert!(lowered < normal);
        assert_eq!(normal - lowered, STACK_SIZE_BUFFER);

        isolate.reset_stack_limit_after_exception();
        assert_eq!(isolate.stack_limit(), normal);
    }

    #[test]
    fn test_zone_stack() {
        let mut isolate = Isolate::new();
        assert_eq!(isolate.zone_depth(), 0);
        isolate.push_zone();
        isolate.current_zone().allocate(64);
        isolate.push_zone();
        assert_eq!(isolate.zone_depth(), 2);
        isolate.pop_zone();
        isolate.pop_zone();
        assert_eq!(isolate.zone_depth(), 0);
    }

    #[test]
    fn test_active_ports() {
        let mut isolate = Isolate::new();
        assert_eq!(isolate.active_ports(), 0);
        isolate.increment_active_ports();
        isolate.increment_active_ports();
        isolate.decrement_active_ports();
        assert_eq!(isolate.active_ports(), 1);
    }

    #[test]
    #[should_panic(expected = "no-handle scope")]
    fn test_no_handle_scope_enforced() {
        let mut isolate = Isolate::new();
        isolate.handles.enter_scope();
        isolate.increment_no_handle_scope_depth();
        isolate.new_handle(ObjectRef::smi(1));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "no-GC scope")]
    fn test_no_gc_scope_enforced() {
        let mut isolate = Isolate::new();
        isolate.increment_no_gc_scope_depth();
        assert!(!isolate.gc_allowed());
        isolate.set_sticky_error("allocates a string");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Isolate::new();
        let b = Isolate::new();
        assert_ne!(a.id(), b.id());
    }
}
