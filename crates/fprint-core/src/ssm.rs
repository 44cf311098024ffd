//! Sequential state machine engine (§4.3) — the library's one concurrency
//! primitive. Every driver protocol is expressed as a stack of these.
//!
//! The C original ties SSMs together with raw parent pointers and `void*`
//! user data; per the design notes this becomes arena ownership plus a
//! typed, generation-checked handle, so a child's completion can locate its
//! parent without anyone holding a borrowed or shared-owned reference to it.

/// Handle into an `SsmArena`. Carries a generation counter so that a handle
/// to a freed (and possibly reused) slot is detected rather than silently
/// operating on the wrong machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SsmHandle {
    index: usize,
    generation: u64,
}

pub type SsmHandler = Box<dyn FnMut(&mut SsmArena, SsmHandle)>;
type CompletionCb = Box<dyn FnOnce(&mut SsmArena, SsmHandle, u32)>;

struct SsmData {
    handler: Option<SsmHandler>,
    nr_states: usize,
    cur_state: usize,
    completed: bool,
    error: u32,
    completion_cb: Option<CompletionCb>,
    parent: Option<SsmHandle>,
}

struct Slot {
    generation: u64,
    data: Option<SsmData>,
}

/// Owns every SSM for one device. A device never needs more than one arena;
/// child machines live in the same arena as their parent and are freed
/// automatically once their parent has been advanced or failed.
#[derive(Default)]
pub struct SsmArena {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
}

impl SsmArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new machine. Per §3's invariant (a), a freshly created
    /// machine is `completed` — nothing runs until `start`.
    pub fn create(&mut self, nr_states: usize, handler: SsmHandler) -> SsmHandle {
        assert!(nr_states >= 1, "SSM must have at least one state");
        let data = SsmData {
            handler: Some(handler),
            nr_states,
            cur_state: 0,
            completed: true,
            error: 0,
            completion_cb: None,
            parent: None,
        };
        if let Some(idx) = self.free_list.pop() {
            let generation = self.slots[idx].generation;
            self.slots[idx].data = Some(data);
            SsmHandle { index: idx, generation }
        } else {
            self.slots.push(Slot {
                generation: 0,
                data: Some(data),
            });
            SsmHandle {
                index: self.slots.len() - 1,
                generation: 0,
            }
        }
    }

    fn get(&self, handle: SsmHandle) -> &SsmData {
        let slot = &self.slots[handle.index];
        assert_eq!(slot.generation, handle.generation, "stale SSM handle");
        slot.data.as_ref().expect("SSM handle used after free")
    }

    fn get_mut(&mut self, handle: SsmHandle) -> &mut SsmData {
        let slot = &mut self.slots[handle.index];
        assert_eq!(slot.generation, handle.generation, "stale SSM handle");
        slot.data.as_mut().expect("SSM handle used after free")
    }

    pub fn cur_state(&self, handle: SsmHandle) -> usize {
        self.get(handle).cur_state
    }

    pub fn nr_states(&self, handle: SsmHandle) -> usize {
        self.get(handle).nr_states
    }

    pub fn is_completed(&self, handle: SsmHandle) -> bool {
        self.get(handle).completed
    }

    pub fn error(&self, handle: SsmHandle) -> u32 {
        self.get(handle).error
    }

    /// The parent this machine was started as a child of, if any. Present
    /// mainly for debugging/introspection — the arena itself drives
    /// parent continuation through the `start_subsm` completion closure,
    /// not through this field.
    pub fn parent(&self, handle: SsmHandle) -> Option<SsmHandle> {
        self.get(handle).parent
    }

    /// Starts a freshly-created (or previously completed) machine. Invalid
    /// to call while already running (§4.3).
    pub fn start(&mut self, handle: SsmHandle, completion_cb: CompletionCb) {
        {
            let data = self.get_mut(handle);
            assert!(data.completed, "start() requires a completed SSM");
            data.cur_state = 0;
            data.completed = false;
            data.error = 0;
            data.completion_cb = Some(completion_cb);
        }
        self.dispatch(handle);
    }

    /// Advances to the next state, or completes successfully if that would
    /// run past the last state.
    pub fn next_state(&mut self, handle: SsmHandle) {
        let (next, nr_states) = {
            let data = self.get_mut(handle);
            assert!(!data.completed, "next_state() on a completed SSM");
            data.cur_state += 1;
            (data.cur_state, data.nr_states)
        };
        if next >= nr_states {
            self.mark_completed_internal(handle, 0);
        } else {
            self.dispatch(handle);
        }
    }

    /// Jumps directly to state `s`, re-invoking the handler there.
    pub fn jump_to_state(&mut self, handle: SsmHandle, s: usize) {
        {
            let data = self.get_mut(handle);
            assert!(!data.completed, "jump_to_state() on a completed SSM");
            assert!(s < data.nr_states, "jump target out of range");
            data.cur_state = s;
        }
        self.dispatch(handle);
    }

    /// Completes the machine successfully right now, with whatever error
    /// value (ordinarily 0) is already stored.
    pub fn mark_completed(&mut self, handle: SsmHandle) {
        assert!(!self.get(handle).completed, "already completed");
        let error = self.get(handle).error;
        self.mark_completed_internal(handle, error);
    }

    /// Fails the machine with a non-zero error code.
    pub fn mark_failed(&mut self, handle: SsmHandle, error: u32) {
        assert_ne!(error, 0, "mark_failed requires a non-zero error code");
        self.mark_completed_internal(handle, error);
    }

    fn mark_completed_internal(&mut self, handle: SsmHandle, error: u32) {
        let cb = {
            let data = self.get_mut(handle);
            data.completed = true;
            data.error = error;
            data.completion_cb.take()
        };
        if let Some(cb) = cb {
            cb(self, handle, error);
        }
    }

    /// Starts `child` as a sub-machine of `parent`. On completion the child
    /// is freed automatically; on success `parent` advances one state, on
    /// failure `parent` is failed with the same error code.
    pub fn start_subsm(&mut self, parent: SsmHandle, child: SsmHandle) {
        self.get_mut(child).parent = Some(parent);
        self.start(
            child,
            Box::new(move |arena, child_handle, error| {
                arena.free(child_handle);
                if error == 0 {
                    arena.next_state(parent);
                } else {
                    arena.mark_failed(parent, error);
                }
            }),
        );
    }

    /// Releases a machine's slot for reuse. Freeing an already-free handle
    /// (or one whose generation is stale) is a no-op — this happens
    /// routinely because `start_subsm`'s wrapper frees the child itself.
    pub fn free(&mut self, handle: SsmHandle) {
        let slot = &mut self.slots[handle.index];
        if slot.generation != handle.generation || slot.data.is_none() {
            return;
        }
        slot.data = None;
        slot.generation += 1;
        self.free_list.push(handle.index);
    }

    fn dispatch(&mut self, handle: SsmHandle) {
        let mut handler = match self.slots[handle.index].data.as_mut() {
            Some(data) => data.handler.take(),
            None => return,
        };
        if let Some(h) = handler.as_mut() {
            h(self, handle);
        }
        if let Some(slot) = self.slots.get_mut(handle.index) {
            if slot.generation == handle.generation {
                if let Some(data) = slot.data.as_mut() {
                    if !data.completed {
                        data.handler = handler;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Scenario 1 (§8): a 3-state SSM whose handler immediately advances;
    /// states 0, 1, 2 are visited in order and the machine completes with
    /// error 0.
    #[test]
    fn linear_run_visits_states_in_order() {
        let mut arena = SsmArena::new();
        let visited = Rc::new(RefCell::new(Vec::new()));
        let v = visited.clone();
        let handle = arena.create(
            3,
            Box::new(move |arena, h| {
                v.borrow_mut().push(arena.cur_state(h));
                arena.next_state(h);
            }),
        );
        let final_error = Rc::new(Cell::new(None));
        let f = final_error.clone();
        arena.start(
            handle,
            Box::new(move |_arena, _h, error| f.set(Some(error))),
        );

        assert_eq!(*visited.borrow(), vec![0, 1, 2]);
        assert_eq!(final_error.get(), Some(0));
        assert!(arena.is_completed(handle));
    }

    #[test]
    fn nr_states_one_completes_on_first_next_state() {
        let mut arena = SsmArena::new();
        let handle = arena.create(1, Box::new(|_arena, _h| {}));
        let done = Rc::new(Cell::new(false));
        let d = done.clone();
        arena.start(handle, Box::new(move |_, _, _| d.set(true)));
        assert!(!done.get());
        arena.next_state(handle);
        assert!(done.get());
    }

    /// Scenario 2 (§8): parent with 4 states starts a 2-state child at
    /// state 1; the child fails at its state 1 with error 42. The parent
    /// must complete with error 42 without ever visiting states 2 or 3.
    #[test]
    fn child_failure_propagates_to_parent_without_further_states() {
        let mut arena = SsmArena::new();
        let parent_visited = Rc::new(RefCell::new(Vec::new()));

        let pv = parent_visited.clone();
        let parent = arena.create(
            4,
            Box::new(move |arena, h| {
                let s = arena.cur_state(h);
                pv.borrow_mut().push(s);
                match s {
                    0 => arena.next_state(h),
                    1 => {
                        let child = arena.create(
                            2,
                            Box::new(|arena, ch| {
                                if arena.cur_state(ch) == 1 {
                                    arena.mark_failed(ch, 42);
                                } else {
                                    arena.next_state(ch);
                                }
                            }),
                        );
                        arena.start_subsm(h, child);
                    }
                    _ => arena.next_state(h),
                }
            }),
        );

        let final_error = Rc::new(Cell::new(None));
        let f = final_error.clone();
        arena.start(parent, Box::new(move |_, _, error| f.set(Some(error))));

        assert_eq!(*parent_visited.borrow(), vec![0, 1]);
        assert_eq!(final_error.get(), Some(42));
        assert!(arena.is_completed(parent));
    }

    #[test]
    #[should_panic(expected = "next_state() on a completed SSM")]
    fn next_state_after_completion_panics() {
        let mut arena = SsmArena::new();
        let handle = arena.create(1, Box::new(|_, _| {}));
        arena.start(handle, Box::new(|_, _, _| {}));
        arena.next_state(handle);
    }

    #[test]
    fn cancel_of_freed_handle_is_noop() {
        let mut arena = SsmArena::new();
        let handle = arena.create(1, Box::new(|arena, h| arena.next_state(h)));
        arena.start(handle, Box::new(|_, _, _| {}));
        arena.free(handle);
        arena.free(handle); // must not panic
    }
}
