//! Turnstile: a PPE and identity access gate.
//!
//! A fixed-cadence worker pulls frames from a camera, runs the object
//! detector and (optionally) the face recognizer, and feeds the results to
//! a pure decision engine. The engine walks each person through face
//! matching and an equipment check, then grants or denies entry. Every
//! decision is written to an append-only audit log and every transition is
//! pushed to an optional status observer.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod settings;

pub mod gate;
pub mod sensors;

pub mod audit;
pub mod cadence;
pub mod publisher;
