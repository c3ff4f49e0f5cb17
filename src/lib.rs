mod cancel;
mod dc;
mod error;
mod jac;
mod lfnetwork;
mod network;
mod newton;
mod outer;
mod params;
mod pfsoln;
mod runpf;
mod sbus;
mod sensitivity;
mod slack;
mod topology;
mod traits;
mod ybus;

pub mod cases;
pub mod debug;
pub mod interfaces;

pub use cancel::*;
pub use error::*;
pub use network::*;
pub use params::*;
pub use runpf::*;
pub use topology::{build_topology, BusOrder, Topology};
pub use traits::*;

#[cfg(test)]
mod tests;
