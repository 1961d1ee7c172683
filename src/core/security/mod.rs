#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Identity and signing.

pub mod keystore;
