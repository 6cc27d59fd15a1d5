//! Host sign-in support.

pub mod password;
