//! kanna chat bot dispatch shell.
//!
//! This crate wires the session registry, the conversation store and a text
//! generation backend into a [`Dispatcher`], and drives it from a
//! newline-delimited JSON event stream.

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod event;

pub use dispatch::Dispatcher;
