//! Neural network layers.
//!
//! Each layer implements the forward and backward passes needed for training,
//! plus whatever recurrent state handling its kind requires.

pub mod lstm;
