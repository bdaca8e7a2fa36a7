//! MSM audio ION API
//!
//! host 与 aDSP 之间共享音频缓冲区的分配、SMMU 映射、内核映射、
//! 用户态映射和缓存维护。

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

pub mod dev;

pub use dev::ion::{AudioIon, IonError, IonResult};
