//! dma-buf 提供者接口及其数据类型

use alloc::vec::Vec;

use axerrno::AxResult;
use bitflags::bitflags;
use memory_addr::PhysAddr;

use crate::iommu::CbDevice;

/// 设备可见的总线地址
///
/// 默认 64 位；启用 `dma-addr-32` 时与 32 位 `dma_addr_t` 平台一致，
/// 此时 SID 高位无法放进地址本身。
#[cfg(not(feature = "dma-addr-32"))]
pub type DmaAddr = u64;

/// 设备可见的总线地址
#[cfg(feature = "dma-addr-32")]
pub type DmaAddr = u32;

/// dma-buf 对象标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DmaBufId(pub u64);

impl DmaBufId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// dma-buf 与 context bank 设备之间的 attachment 句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AttachmentId(pub u64);

/// DMA 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    Bidirectional,
    ToDevice,
    FromDevice,
}

/// Ion 堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IonHeapType {
    /// 系统堆，使用普通的系统内存
    System = 0,
    /// DMA 堆，使用 DMA coherent 内存
    DmaCoherent = 1,
    /// Carveout 堆，预留的物理内存区域（没有 struct page）
    Carveout = 2,
}

impl TryFrom<u32> for IonHeapType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::System),
            1 => Ok(Self::DmaCoherent),
            2 => Ok(Self::Carveout),
            _ => Err(()),
        }
    }
}

bitflags! {
    /// Ion 缓冲区标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IonFlags: u64 {
        /// 缓存标志
        const CACHED = 1 << 0;
        /// 缓存需要同步
        const CACHED_NEEDS_SYNC = 1 << 1;
    }
}

impl IonFlags {
    pub fn is_cached(self) -> bool {
        self.contains(Self::CACHED)
    }
}

/// scatter-gather 表中的一段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    /// 该段起始页的物理地址；carveout 内存没有页，为 `None`
    pub page: Option<PhysAddr>,
    /// 段长度（字节）
    pub length: usize,
    /// IOMMU 翻译后的设备地址
    pub dma_address: DmaAddr,
}

/// 有序的 scatter-gather 表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SgTable {
    entries: Vec<SgEntry>,
}

impl SgTable {
    pub fn new(entries: Vec<SgEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SgEntry] {
        &self.entries
    }

    pub fn first(&self) -> Option<&SgEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有段长度之和
    pub fn total_length(&self) -> usize {
        self.entries.iter().map(|e| e.length).sum()
    }
}

/// dma-buf 提供者
///
/// 对应 ION 分配器和 dma-buf 框架。所有方法都可能阻塞。
pub trait DmaBufOps: Send + Sync {
    /// 从指定堆分配一个新的 dma-buf，返回时持有一个引用
    fn alloc(&self, size: usize, heap: IonHeapType, flags: IonFlags) -> AxResult<DmaBufId>;

    /// 通过文件描述符取得 dma-buf，并增加一个引用
    fn get(&self, fd: i32) -> AxResult<DmaBufId>;

    /// 释放一个引用
    fn put(&self, buf: DmaBufId);

    /// 缓冲区大小（字节）
    fn size(&self, buf: DmaBufId) -> AxResult<usize>;

    /// 缓冲区的 ION 标志
    fn flags(&self, buf: DmaBufId) -> AxResult<IonFlags>;

    fn attach(&self, buf: DmaBufId, dev: CbDevice) -> AxResult<AttachmentId>;

    fn detach(&self, buf: DmaBufId, attach: AttachmentId);

    fn map_attachment(&self, attach: AttachmentId, dir: DmaDirection) -> AxResult<SgTable>;

    fn unmap_attachment(&self, attach: AttachmentId, table: &SgTable, dir: DmaDirection);

    fn begin_cpu_access(&self, buf: DmaBufId, dir: DmaDirection) -> AxResult;

    fn end_cpu_access(&self, buf: DmaBufId, dir: DmaDirection) -> AxResult;
}
