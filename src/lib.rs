//! MSM audio ION platform driver
//!
//! 负责 probe/remove 生命周期：读取 SMMU 配置，等待 aDSP 就绪，
//! 然后把 context bank 设备绑定到 audio ION 设备上。

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

mod config;
mod driver;

pub use config::AudioIonConfig;
pub use driver::{AudioIonDriver, MSM_AUDIO_ION_PROBED};
pub use msm_audio_api::dev::ion::*;
pub use msm_audio_core as platform;
