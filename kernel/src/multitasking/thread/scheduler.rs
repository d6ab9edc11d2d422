// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the round robin scheduler.
//!
//! Selection walks the slots starting just after the last-run slot,
//! wrapping around, and takes the first runnable one — a slot that is
//! neither disabled, suspended, nor sleeping. When no slot is runnable
//! the kernel idles with interrupts enabled until a timer tick makes
//! one runnable; if every slot has been disabled or suspended it idles
//! forever, as there is nothing left that could run.
//!
//! ## Entry points
//!
//! [`switch`] saves the calling context into its slot before running
//! the selection, and is what [`yield`-style](crate::suspend_self)
//! operations use. [`switch_no_save`] runs the same selection but
//! abandons the calling context; it is used when that context is
//! already dead — after the running slot disables itself or is handed
//! a fresh thread. Both restore the selected slot so that control
//! resumes at its last yield point, or in the bootstrap for a slot
//! that has never run.

use crate::{Masks, ThreadId, DELAYED, MASKS};
use bitmask::ThreadMask;
use memlayout::MAX_THREADS;

/// Schedules out the current thread and switches to the next runnable
/// thread.
///
/// Returns when the calling thread is next selected. If the calling
/// thread is the only runnable one, `switch` returns immediately.
///
pub fn switch() {
    let (from, to) = select_and_commit();
    if from == to {
        return;
    }

    unsafe { crate::switch::switch_stack(from, to) };
}

/// Switches to the next runnable thread without saving the calling
/// context. Never returns.
///
/// The caller must have made its own slot's saved state valid (a fresh
/// stack image) or unreachable (the slot is disabled) before calling.
///
pub(crate) fn switch_no_save() -> ! {
    let (_, to) = select_and_commit();
    unsafe { crate::switch::replace_stack(to) }
}

/// Runs the selection, idling until some slot is runnable, and commits
/// the winner as the current thread.
///
/// Returns the outgoing and incoming slot ids.
///
fn select_and_commit() -> (ThreadId, ThreadId) {
    loop {
        let picked = critical_section::with(|cs| {
            let cell = MASKS.borrow(cs);
            let mut m = cell.get();
            let runnable = runnable_mask(&m, DELAYED.borrow(cs).get());
            let next = pick_next(runnable, m.current)?;

            let from = m.current;
            m.current = next;
            m.current_mask = ThreadMask::bit(next.as_u8());
            cell.set(m);
            crate::kernel_assert!((m.disabled & m.current_mask).is_empty());

            Some((from, next))
        });

        match picked {
            Some((from, to)) => {
                #[cfg(feature = "stack-canary")]
                check_canary(to);

                return (from, to);
            }
            None => cpu::idle_wait(),
        }
    }
}

/// Returns the set of slots the scheduler may select.
///
fn runnable_mask(m: &Masks, delayed: ThreadMask) -> ThreadMask {
    !(m.disabled | m.suspended | delayed) & ThreadMask::below(MAX_THREADS as u8)
}

/// Returns the slot the scheduler selects for the given runnable set,
/// or None if the set is empty: the first runnable slot at or after
/// the one following `current`, wrapping modulo the thread count.
///
fn pick_next(runnable: ThreadMask, current: ThreadId) -> Option<ThreadId> {
    let start = (current.as_u8() + 1) % MAX_THREADS as u8;
    runnable.first_set_from(start).map(ThreadId::new)
}

/// Compares the selected slot's stack canary against the configured
/// value, reporting a mismatch to the user's overflow hook.
///
/// The scheduler carries on regardless of what the hook does; whether
/// continuing is survivable is the user's call.
///
#[cfg(feature = "stack-canary")]
fn check_canary(id: ThreadId) {
    let canary = unsafe { crate::stacks::canary_location(id).read_volatile() };
    if canary != memlayout::STACK_CANARY {
        crate::debug::stack_overflow(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn mask_of(ids: &[u8]) -> ThreadMask {
        let mut mask = ThreadMask::EMPTY;
        for id in ids {
            mask.set(*id);
        }
        mask
    }

    #[test]
    fn empty_set_selects_nothing() {
        for current in 0..MAX_THREADS as u8 {
            assert_eq!(pick_next(ThreadMask::EMPTY, ThreadId::new(current)), None);
        }
    }

    #[test]
    fn selection_starts_after_the_current_slot() {
        let runnable = mask_of(&[0, 1, 2]);
        assert_eq!(
            pick_next(runnable, ThreadId::THREAD0),
            Some(ThreadId::THREAD1)
        );
        assert_eq!(
            pick_next(runnable, ThreadId::THREAD2),
            Some(ThreadId::THREAD0)
        );

        // The current slot is chosen again only when nothing else runs.
        assert_eq!(
            pick_next(mask_of(&[4]), ThreadId::THREAD4),
            Some(ThreadId::THREAD4)
        );
    }

    #[test]
    fn selection_wraps_modulo_the_thread_count() {
        let runnable = mask_of(&[1]);
        assert_eq!(
            pick_next(runnable, ThreadId::new(MAX_THREADS as u8 - 1)),
            Some(ThreadId::THREAD1)
        );
    }

    #[test]
    fn selected_slots_are_always_runnable() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let runnable = ThreadMask::from_bits(rng.gen::<u8>())
                & ThreadMask::below(MAX_THREADS as u8);
            let current = ThreadId::new(rng.gen_range(0..MAX_THREADS as u8));

            match pick_next(runnable, current) {
                Some(next) => {
                    assert!(runnable.contains(next.as_u8()));

                    // Rotation order: nothing runnable sits strictly
                    // between current and the selected slot.
                    let mut i = (current.as_u8() + 1) % MAX_THREADS as u8;
                    while i != next.as_u8() {
                        assert!(!runnable.contains(i));
                        i = (i + 1) % MAX_THREADS as u8;
                    }
                }
                None => assert!(runnable.is_empty()),
            }
        }
    }

    #[test]
    fn two_runnable_slots_alternate() {
        // With slots i and j continuously runnable, selections
        // alternate strictly: between any two runs of i there is
        // exactly one run of j.
        for i in 0..MAX_THREADS as u8 {
            for j in (i + 1)..MAX_THREADS as u8 {
                let runnable = mask_of(&[i, j]);
                let mut current = ThreadId::new(i);
                let mut previous = None;
                for _ in 0..16 {
                    let next = pick_next(runnable, current).unwrap();
                    if let Some(previous) = previous {
                        assert_ne!(next, previous);
                    }
                    previous = Some(next);
                    current = next;
                }
            }
        }
    }
}
