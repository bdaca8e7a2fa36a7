//! Platform interfaces consumed by the MSM audio ION driver.
//!
//! 这里只定义 audio ION 核心需要的外部能力：dma-buf 提供者、IOMMU
//! 映射、内核页映射、用户态 VMA 以及 DSP 状态查询。具体实现由平台提供。

#![no_std]

extern crate alloc;

pub mod dma_buf;
pub mod dsp;
pub mod iommu;
pub mod mm;

pub use dma_buf::{
    AttachmentId, DmaAddr, DmaBufId, DmaBufOps, DmaDirection, IonFlags, IonHeapType, SgEntry,
    SgTable,
};
pub use dsp::{DspState, Q6State};
pub use iommu::{CbDevice, IommuMappingId, IommuOps};
pub use mm::{KmapOps, VmArea};
