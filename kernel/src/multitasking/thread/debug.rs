// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Contains the kernel's debugging aids: the user fault hooks and the
//! internal assertion macro.
//!
//! The kernel never aborts on its own. Detected faults are reported to
//! hooks the user registers at start-up:
//!
//! - The stack-overflow hook is called from scheduler context when a
//!   slot's canary byte has been clobbered. The hook may return, in
//!   which case the scheduler carries on with the selection — at the
//!   user's own risk, since some stack has already been corrupted.
//! - The assertion hook is called when a [`kernel_assert!`] check
//!   fails, and must not return. With no hook registered a failed
//!   assertion panics, which on the device lands in the user program's
//!   panic handler.
//!
//! [`kernel_assert!`] compiles to nothing unless the `kernel-assert`
//! feature is enabled; the condition is not even evaluated.

use crate::ThreadId;
use spin::Mutex;

/// The type of the user's stack-overflow hook.
///
/// The argument is the slot whose canary was found clobbered. That
/// slot is not necessarily the only casualty: by the time the check
/// runs, anything below the overflowed stack may have been corrupted.
///
pub type OverflowHook = fn(ThreadId);

/// The type of the user's assertion-failure hook: the failed
/// expression, the source file, and the line. Must not return.
///
pub type AssertionHook = fn(&'static str, &'static str, u32) -> !;

static OVERFLOW_HOOK: Mutex<Option<OverflowHook>> = Mutex::new(None);

static ASSERTION_HOOK: Mutex<Option<AssertionHook>> = Mutex::new(None);

/// Registers the hook invoked when the scheduler detects a stack
/// overflow.
///
pub fn set_stack_overflow_hook(hook: OverflowHook) {
    *OVERFLOW_HOOK.lock() = Some(hook);
}

/// Registers the hook invoked when a kernel assertion fails.
///
pub fn set_assertion_hook(hook: AssertionHook) {
    *ASSERTION_HOOK.lock() = Some(hook);
}

/// Reports a clobbered canary to the user's overflow hook, if one is
/// registered.
///
pub(crate) fn stack_overflow(id: ThreadId) {
    let hook = *OVERFLOW_HOOK.lock();
    if let Some(hook) = hook {
        hook(id);
    }
}

/// Reports a failed kernel assertion. Does not return.
///
#[doc(hidden)]
pub fn assertion_failure(expr: &'static str, file: &'static str, line: u32) -> ! {
    let hook = *ASSERTION_HOOK.lock();
    match hook {
        Some(hook) => hook(expr, file, line),
        None => panic!("kernel assertion failed: {}, {}:{}", expr, file, line),
    }
}

/// Checks an internal kernel invariant.
///
/// Active only with the `kernel-assert` feature; otherwise expands to
/// nothing and the condition is not evaluated.
///
#[cfg(feature = "kernel-assert")]
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::debug::assertion_failure(stringify!($cond), file!(), line!());
        }
    };
}

#[cfg(not(feature = "kernel-assert"))]
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {};
}
