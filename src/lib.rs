#![cfg_attr(not(test), no_std)]
//! Core of a USB Audio Class 2.0 composite device bridging host isochronous
//! audio streams to on-chip DAC/mic peripherals: the staging ring buffer
//! ("UM buffer") and the isochronous rate-control system (feedback
//! endpoint, congestion avoidance) that keep the host's USB SOF cadence
//! and the codec's MCLK-derived rate from drifting apart.
//!
//! The descriptor/control-request surface, peripheral register
//! programming, and codec bring-up are external collaborators bound
//! through the trait seams in [`buffer`], [`feedback`], and [`board`].

pub mod altsetting;
pub mod board;
pub mod buffer;
pub mod congestion;
pub mod error;
pub mod feedback;
pub mod listener;
pub mod node;
pub mod terminal;

pub use buffer::{BufferState, DropHalfPolicy, EnqueuePolicy, FeedbackPolicy, NonePolicy, UmBuffer};
pub use error::UmError;
pub use node::{Node, NodeState};
