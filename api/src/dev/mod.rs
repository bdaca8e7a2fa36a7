//! 设备驱动

pub mod ion;
