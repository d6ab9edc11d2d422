// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Simulates the machine's context switching on a host.
//!
//! Each kernel slot that has been scheduled at least once is carried by
//! a host OS thread, all of which park on a shared baton. Exactly one
//! incarnation of one slot holds the baton at a time, which preserves
//! the kernel's single-core execution model: a "context switch" hands
//! the baton to the incoming slot and parks the outgoing one.
//!
//! A slot's incarnation is identified by a generation counter. Creating
//! a thread in a slot bumps the slot's generation, so an incarnation
//! that was parked when its slot was replaced or reinitialised can
//! never match the baton again and stays parked for the life of the
//! process. That is the host analogue of a stack image being
//! overwritten: the old context still exists in some sense, but no
//! control path can ever reach it.
//!
//! The host thread that calls [`reset`] adopts slot 0, mirroring the
//! device where the kernel hands `main` to the user program as thread 0.

use core::ffi::c_void;
use lazy_static::lazy_static;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;

/// The type of a thread entry point, as the bootstrap calls it: the
/// slot id and the opaque argument.
///
pub type Entry = extern "C" fn(u8, *mut c_void) -> !;

const SLOTS: usize = 8;

struct Machine {
    /// The slot and generation currently holding the baton.
    active: (usize, u64),

    /// The current generation of each slot.
    gen: [u64; SLOTS],

    /// Whether the current generation of each slot is backed by a
    /// host thread (or, for slot 0, by the adopting thread).
    spawned: [bool; SLOTS],

    /// Entry point and argument for generations that have been
    /// created but not yet scheduled for the first time.
    pending: [Option<(Entry, usize)>; SLOTS],
}

lazy_static! {
    static ref MACHINE: Mutex<Machine> = Mutex::new(Machine {
        active: (0, 0),
        gen: [0; SLOTS],
        spawned: [false; SLOTS],
        pending: [None; SLOTS],
    });
    static ref BATON: Condvar = Condvar::new();
}

fn lock() -> MutexGuard<'static, Machine> {
    MACHINE.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reinitialises the simulated machine and adopts the calling host
/// thread as slot 0.
///
/// Incarnations from before the reset can never run again.
///
pub fn reset() {
    let mut m = lock();
    for gen in m.gen.iter_mut() {
        *gen += 1;
    }

    m.spawned = [false; SLOTS];
    m.pending = [None; SLOTS];
    m.spawned[0] = true;
    m.active = (0, m.gen[0]);
    BATON.notify_all();
}

/// Records a new incarnation of `slot`, to be started the first time
/// the scheduler switches to it.
///
pub fn on_create(slot: usize, entry: Entry, arg: *mut c_void) {
    let mut m = lock();
    m.gen[slot] += 1;
    m.spawned[slot] = false;
    m.pending[slot] = Some((entry, arg as usize));
}

/// Hands the baton from `from` to `to` and parks until `from` is
/// scheduled again.
///
pub fn switch(from: usize, to: usize) {
    let mut m = lock();
    let my_gen = m.gen[from];
    activate(&mut m, to);
    while m.active != (from, my_gen) {
        m = BATON.wait(m).unwrap_or_else(|e| e.into_inner());
    }
}

/// Hands the baton to `to` without any way back: the calling
/// incarnation's context is dead and is parked forever.
///
pub fn replace(to: usize) -> ! {
    let mut m = lock();
    activate(&mut m, to);
    loop {
        m = BATON.wait(m).unwrap_or_else(|e| e.into_inner());
    }
}

fn activate(m: &mut Machine, to: usize) {
    if !m.spawned[to] {
        m.spawned[to] = true;
        if let Some((entry, arg)) = m.pending[to].take() {
            let gen = m.gen[to];
            thread::spawn(move || runner(to, gen, entry, arg));
        }
    }

    m.active = (to, m.gen[to]);
    BATON.notify_all();
}

fn runner(slot: usize, gen: u64, entry: Entry, arg: usize) -> ! {
    {
        let mut m = lock();
        while m.active != (slot, gen) {
            m = BATON.wait(m).unwrap_or_else(|e| e.into_inner());
        }
    }

    entry(slot as u8, arg as *mut c_void)
}
