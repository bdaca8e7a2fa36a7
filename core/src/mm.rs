//! 内核页映射与用户态 VMA 接口

use axerrno::AxResult;
use memory_addr::{VirtAddr, VirtAddrRange};

use crate::dma_buf::DmaBufId;

/// 内核页映射提供者（`dma_buf_kmap` / `dma_buf_kunmap`）
///
/// 第 0 页返回的地址作为整个缓冲区的内核基址，实现需保证从该地址起
/// 的 `ceil(size / PAGE_SIZE)` 页在全部映射后是连续可访问的。
pub trait KmapOps: Send + Sync {
    fn kmap(&self, buf: DmaBufId, page: usize) -> AxResult<VirtAddr>;

    /// 解除第 `page` 页的映射，`vaddr` 为映射基址
    fn kunmap(&self, buf: DmaBufId, page: usize, vaddr: VirtAddr);
}

/// 用户态虚拟内存区域
pub trait VmArea {
    /// 区域覆盖的虚拟地址范围
    fn range(&self) -> VirtAddrRange;

    /// 区域在缓冲区内的起始页偏移
    fn pgoff(&self) -> usize;

    /// 把页属性设为 write-combine（不缓存）
    fn set_write_combine(&mut self);

    /// 把从 `pfn` 开始、长度 `len` 字节的物理页映射到 `addr`
    fn remap_pfn_range(&mut self, addr: VirtAddr, pfn: usize, len: usize) -> AxResult;
}
