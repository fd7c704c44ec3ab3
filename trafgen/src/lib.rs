#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![no_std]

//! Bit-exact synthesis of Ethernet test frames.
//!
//! A [`stream::StreamConfig`] describes one synthetic traffic stream as a
//! stack of per-layer descriptors; [`synth::synthesize`] compiles it into
//! the wire bytes of the `n`-th frame of the stream's transmission plan.

#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

pub mod checksum;

pub mod ether;
pub mod ipv4;
pub mod stream;
pub mod synth;
