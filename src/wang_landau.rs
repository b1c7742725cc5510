//! # Mock Wang-Landau sampling over alchemical states
//!
//! Configurational sampling is abstracted away: the only dynamics are
//! Markov-chain moves across a fixed, known free-energy profile, with ΔU
//! assumed to be 0 and kT set to 1.
mod helper;
mod walker;

pub use helper::*;
pub use walker::*;
