// src/lib.rs

//! # Mode-Driven Flight Control and Control Allocation
//!
//! This crate provides the `no_std` control core of a research flight
//! computer. Every controller shares one run mode (`CtrlMode`) so that a
//! pilot can hand the aircraft between a baseline law and a research law
//! without a bump in the commands. Body-axis commands are then distributed
//! to the control effectors by a weighted pseudo-inverse allocator.
//!
//! * `pid`: scalar loops with anti-windup and bump-free initialization.
//! * `bank`: baseline and research banks of loops.
//! * `system`: block-diagram controllers on a shared signal bus.
//! * `allocation`: control allocation with effector saturation.
//! * `sequencer`: pilot switch debouncing and test-point selection.
//! * `frame`: one control frame end to end.
//!
//! Memory is allocated when components are built; running a frame does not
//! allocate.

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

pub mod allocation;
pub mod bank;
pub mod config;
pub mod error;
pub mod frame;
pub mod mode;
pub mod pid;
pub mod sequencer;
pub mod system;

#[doc(inline)]
pub use allocation::{AllocLog, AllocMethod, AllocationDef, Allocator};
#[doc(inline)]
pub use bank::{BankLog, ControllerBank, FrameClock};
#[doc(inline)]
pub use config::{CoreConfig, PidConfig};
#[doc(inline)]
pub use error::ConfigError;
#[doc(inline)]
pub use frame::{ControlCore, CoreLog, Measurements};
#[doc(inline)]
pub use mode::{CtrlMode, Number, Saturation};
#[doc(inline)]
pub use pid::{PidFunction, PidLog};
#[doc(inline)]
pub use sequencer::{ModeSequencer, SequencerLog, SequencerOut};
#[doc(inline)]
pub use system::{ControlSystem, ControllerKind, SignalBus, SignalId};

#[cfg(test)]
mod test_utils;
