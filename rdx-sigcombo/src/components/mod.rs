//! Contains the building blocks for recognizing timed combos.
//!
//! This module provides the signal window (what was observed), the action tree
//! (what to look for), combos (ordered steps emitting one signal), and the
//! input buffer that drives them tick after tick. The `ComboEngine` owns one
//! input buffer and feeds it from its clock and its handle.

pub mod action;
pub mod buffer;
pub mod combo;
pub mod window;
