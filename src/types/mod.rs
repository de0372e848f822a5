//! Common data types

pub mod pose;

pub use pose::*;
