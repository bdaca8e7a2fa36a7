//! MSM audio ION driver
//!
//! 管理 host 与 aDSP 之间交换音频数据的共享缓冲区。aDSP 位于 SMMU
//! 之后，拥有独立的地址空间。
//!
//! ## 流程
//!
//! - probe 时 [`AudioIon::bind`] 为 context bank 设备建立 IOVA 窗口
//! - [`AudioIon::allocate`] / [`AudioIon::import`] 取得 dma-buf，attach 并
//!   映射到 context bank，把 SID 折叠进总线地址高位，登记分配记录，
//!   再建立内核映射
//! - [`AudioIon::map_to_user`] 把缓冲区页映射到用户 VMA
//! - [`AudioIon::cache_maintain`] 对可缓存缓冲区执行缓存维护
//! - [`AudioIon::free`] 依次解除内核映射、设备映射并删除记录
//!
//! ## 使用示例
//!
//! ```ignore
//! let ion = AudioIon::new(dma_buf_ops, kmap_ops, iommu_ops);
//! ion.bind(cb_dev, sid_bits)?;
//!
//! let alloc = ion.allocate(4096)?;
//! // 把 alloc.paddr 交给 aDSP，CPU 通过 alloc.vaddr 访问
//! ion.free(alloc.buf)?;
//! ```

mod buffer;
mod cache;
mod device;
mod dma;
mod error;
mod guard;
mod kmap;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod mmap;
mod smmu;
mod types;

pub use buffer::AllocRegistry;
pub use device::AudioIon;
pub use error::{IonError, IonResult};
pub use smmu::{
    MSM_AUDIO_ION_VA_LEN, MSM_AUDIO_ION_VA_START, MSM_AUDIO_SMMU_SID_OFFSET, SmmuBinding,
    compose_bus_addr,
};
pub use types::{
    AllocRecord, CacheOp, DeviceMapping, IonAllocation, IonImport, MSM_AUDIO_ION_CLEAN_CACHES,
    MSM_AUDIO_ION_INV_CACHES,
};

/// 页大小
pub const PAGE_SIZE: usize = memory_addr::PAGE_SIZE_4K;
