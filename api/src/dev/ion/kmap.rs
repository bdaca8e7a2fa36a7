//! 内核访问映射
//!
//! 在 CPU 访问区间内逐页 kmap 缓冲区，供 CPU 读写。映射要么全部
//! 建立，要么一页都不留。

use memory_addr::VirtAddr;
use msm_audio_core::{DmaBufId, DmaDirection};

use super::{
    AudioIon,
    error::{IonError, IonResult},
    guard::{CpuAccess, KernelPages},
};

impl AudioIon {
    /// 建立内核映射并记录到分配记录中，返回内核虚拟地址
    pub fn map_kernel(&self, buf: DmaBufId) -> IonResult<VirtAddr> {
        let record = self.registry.find(buf)?;
        if record.kernel_vaddr().is_some() {
            error!("dma_buf {:?} is already kernel mapped", buf);
            return Err(IonError::AlreadyMapped);
        }

        let access = CpuAccess::begin(self.dma_buf.as_ref(), buf, DmaDirection::Bidirectional)
            .map_err(|e| {
                error!("kmap dma_buf_begin_cpu_access fail: {:?}", e);
                IonError::CpuAccess(e)
            })?;

        let pg_cnt = record.page_count();
        if pg_cnt == 0 {
            error!("Page count is zero for dma_buf {:?}", buf);
            return Err(IonError::InvalidArg);
        }

        let mut pages = KernelPages::map_first(self.kmap.as_ref(), buf).map_err(|e| {
            error!("mapping kernel buffer failed for page 0: {:?}", e);
            IonError::MapFailed(e)
        })?;
        while pages.mapped() < pg_cnt {
            let page = pages.mapped();
            if let Err(e) = pages.map_next() {
                error!("mapping kernel buffer failed for page {}: {:?}", page, e);
                return Err(IonError::MapFailed(e));
            }
        }

        // 记录可能已被并发释放，此时放弃这次映射
        self.registry.set_kernel_vaddr(buf, pages.base())?;
        let vaddr = pages.commit();
        access.disarm();

        debug!("Kernel mapped dma_buf {:?} at {:?}, {} pages", buf, vaddr, pg_cnt);
        Ok(vaddr)
    }

    /// 解除内核映射并退出 CPU 访问区间
    ///
    /// 没有内核映射时返回 `NotMapped` 且不做任何操作。退出区间失败时
    /// 页已全部解除映射，错误仍会返回。
    pub fn unmap_kernel(&self, buf: DmaBufId) -> IonResult<()> {
        let record = self.registry.find(buf)?;
        let Some(vaddr) = record.take_kernel_vaddr() else {
            warn!("cannot find kernel mapping for dma_buf {:?}", buf);
            return Err(IonError::NotMapped);
        };

        for page in 0..record.page_count() {
            self.kmap.kunmap(buf, page, vaddr);
        }

        self.dma_buf
            .end_cpu_access(buf, DmaDirection::Bidirectional)
            .map_err(|e| {
                error!("kmap dma_buf_end_cpu_access fail: {:?}", e);
                IonError::CpuAccess(e)
            })
    }
}
