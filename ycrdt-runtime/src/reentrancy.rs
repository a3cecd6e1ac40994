use std::cell::Cell;

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as executing inside an observer callback for the
/// scope of this guard. `Integrated::transact_mut`/`Doc::transact_mut` check
/// this to turn a mutation attempted from inside a callback into
/// [`crate::error::Error::ReentrantMutation`] rather than the generic
/// `AnotherTx`/`ConcurrentTransaction` a caller could mistake for an
/// unrelated concurrent-access race.
pub(crate) struct CallbackGuard(bool);

impl CallbackGuard {
    pub(crate) fn enter() -> Self {
        let was_set = IN_CALLBACK.with(|c| c.replace(true));
        CallbackGuard(was_set)
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        IN_CALLBACK.with(|c| c.set(self.0));
    }
}

pub(crate) fn in_callback() -> bool {
    IN_CALLBACK.with(|c| c.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_prior_state_on_drop() {
        assert!(!in_callback());
        {
            let _outer = CallbackGuard::enter();
            assert!(in_callback());
            {
                let _inner = CallbackGuard::enter();
                assert!(in_callback());
            }
            assert!(in_callback());
        }
        assert!(!in_callback());
    }
}
