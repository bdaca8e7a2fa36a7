//! Audio ION 数据结构定义

use core::sync::atomic::{AtomicUsize, Ordering};

use memory_addr::{VirtAddr, align_up_4k};
use msm_audio_core::{AttachmentId, DmaAddr, DmaBufId, IonFlags, SgTable};

use super::PAGE_SIZE;

/// 缓存无效化
pub const MSM_AUDIO_ION_INV_CACHES: u32 = 0;
/// 缓存回写
pub const MSM_AUDIO_ION_CLEAN_CACHES: u32 = 1;

/// 缓存维护操作
///
/// 两种操作底层都是一次 begin/end CPU access，区别只在调用者意图。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CacheOp {
    Invalidate = MSM_AUDIO_ION_INV_CACHES,
    Clean = MSM_AUDIO_ION_CLEAN_CACHES,
}

impl TryFrom<u32> for CacheOp {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            MSM_AUDIO_ION_INV_CACHES => Ok(Self::Invalidate),
            MSM_AUDIO_ION_CLEAN_CACHES => Ok(Self::Clean),
            _ => Err(()),
        }
    }
}

/// 缓冲区在 context bank 上的设备映射
///
/// attachment 与 sg 表总是一起建立、一起拆除。
#[derive(Debug)]
pub struct DeviceMapping {
    pub attach: AttachmentId,
    pub table: SgTable,
}

/// 分配记录，每个活跃缓冲区一条
#[derive(Debug)]
pub struct AllocRecord {
    /// 缓冲区标识
    pub buf: DmaBufId,
    /// 缓冲区大小
    pub len: usize,
    /// 内核虚拟地址，0 表示未映射
    kernel_vaddr: AtomicUsize,
    /// 设备映射
    mapping: DeviceMapping,
}

impl AllocRecord {
    pub fn new(buf: DmaBufId, len: usize, mapping: DeviceMapping) -> Self {
        Self {
            buf,
            len,
            kernel_vaddr: AtomicUsize::new(0),
            mapping,
        }
    }

    pub fn kernel_vaddr(&self) -> Option<VirtAddr> {
        match self.kernel_vaddr.load(Ordering::SeqCst) {
            0 => None,
            addr => Some(VirtAddr::from(addr)),
        }
    }

    /// 仅当当前没有内核映射时写入，返回是否写入成功
    pub(super) fn set_kernel_vaddr(&self, vaddr: VirtAddr) -> bool {
        self.kernel_vaddr
            .compare_exchange(0, vaddr.as_usize(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(super) fn take_kernel_vaddr(&self) -> Option<VirtAddr> {
        match self.kernel_vaddr.swap(0, Ordering::SeqCst) {
            0 => None,
            addr => Some(VirtAddr::from(addr)),
        }
    }

    pub fn attachment(&self) -> AttachmentId {
        self.mapping.attach
    }

    pub fn table(&self) -> &SgTable {
        &self.mapping.table
    }

    /// 覆盖整个缓冲区所需的页数
    pub fn page_count(&self) -> usize {
        page_count(self.len)
    }
}

pub(super) fn page_count(len: usize) -> usize {
    align_up_4k(len) / PAGE_SIZE
}

/// `allocate` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IonAllocation {
    pub buf: DmaBufId,
    /// 带 SID 的总线地址
    pub paddr: DmaAddr,
    pub len: usize,
    pub vaddr: VirtAddr,
}

/// `import` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IonImport {
    pub buf: DmaBufId,
    pub flags: IonFlags,
    pub paddr: DmaAddr,
    pub len: usize,
    pub vaddr: VirtAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0), 0);
        assert_eq!(page_count(1), 1);
        assert_eq!(page_count(4096), 1);
        assert_eq!(page_count(4097), 2);
        assert_eq!(page_count(5 * 4096), 5);
    }

    #[test]
    fn cache_op_codes() {
        assert_eq!(CacheOp::try_from(0), Ok(CacheOp::Invalidate));
        assert_eq!(CacheOp::try_from(1), Ok(CacheOp::Clean));
        assert!(CacheOp::try_from(7).is_err());
    }

    #[test]
    fn kernel_vaddr_is_set_once() {
        let rec = AllocRecord::new(
            DmaBufId(1),
            4096,
            DeviceMapping {
                attach: AttachmentId(1),
                table: SgTable::default(),
            },
        );
        assert_eq!(rec.kernel_vaddr(), None);
        assert!(rec.set_kernel_vaddr(VirtAddr::from(0x1000)));
        assert!(!rec.set_kernel_vaddr(VirtAddr::from(0x2000)));
        assert_eq!(rec.kernel_vaddr(), Some(VirtAddr::from(0x1000)));
        assert_eq!(rec.take_kernel_vaddr(), Some(VirtAddr::from(0x1000)));
        assert_eq!(rec.kernel_vaddr(), None);
    }
}
