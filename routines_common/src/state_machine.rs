use std::sync::{Mutex, MutexGuard, PoisonError};

/// A state cell whose transitions run atomically under a lock.
///
/// The console keeps one of these per session (in-flight request handle and
/// auto-scroll flag) so the input handler and the stream consumer never see a
/// half-updated state.
///
/// # Example
///
/// ```rust
/// use routines_common::state_machine::StateMachine;
///
/// enum Run {
///     Idle,
///     Streaming(u32),
/// }
///
/// let machine = StateMachine::new(Run::Idle);
///
/// let started = machine.transition(|state| match state {
///     Run::Idle => {
///         *state = Run::Streaming(1);
///         true
///     }
///     Run::Streaming(_) => false,
/// });
/// assert!(started);
/// ```
#[derive(Debug, Default)]
pub struct StateMachine<S> {
    state: Mutex<S>,
}

impl<S> StateMachine<S> {
    /// Creates a new `StateMachine` in the given initial state.
    pub fn new(initial_state: S) -> Self {
        Self {
            state: Mutex::new(initial_state),
        }
    }

    /// Locks the state for a direct read or a simple check.
    ///
    /// A poisoned lock is recovered: every transition leaves the state whole,
    /// so a panic elsewhere cannot leave it torn.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the state with the lock held and returns its result.
    pub fn transition<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.lock();
        f(&mut state)
    }

    /// Replaces the state, returning the previous one.
    pub fn replace(&self, next: S) -> S {
        self.transition(|state| std::mem::replace(state, next))
    }
}

impl<S: Clone> StateMachine<S> {
    /// Clones the current state out of the lock.
    pub fn snapshot(&self) -> S {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_transitions() {
        let machine = Arc::new(StateMachine::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let machine = machine.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    machine.transition(|state| {
                        *state += 1;
                    });
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*machine.lock(), 1000);
    }

    #[test]
    fn test_replace_returns_previous_state() {
        let machine = StateMachine::new(Some("first"));
        assert_eq!(machine.replace(Some("second")), Some("first"));
        assert_eq!(machine.replace(None), Some("second"));
        assert_eq!(machine.snapshot(), None);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let machine = Arc::new(StateMachine::new(7));
        let poisoner = machine.clone();
        let _ = thread::spawn(move || {
            poisoner.transition(|_| panic!("poison the lock"));
        })
        .join();

        assert_eq!(machine.snapshot(), 7);
        machine.transition(|state| *state = 8);
        assert_eq!(*machine.lock(), 8);
    }
}
