//! Data models for SoigneMoi entities.
//!
//! - `Profile`: the logged-in staff member and their hospital service

pub mod profile;

pub use profile::{DoctorInfo, Profile, Service};
