//! 用户态映射
//!
//! 按 sg 表逐段把缓冲区的物理页重映射到用户 VMA，支持页偏移和长度截断。

use memory_addr::VirtAddr;
use msm_audio_core::{DmaBufId, VmArea};

use super::{
    AudioIon, PAGE_SIZE,
    error::{IonError, IonResult},
};

impl AudioIon {
    /// 把缓冲区映射到用户态 `vma`
    ///
    /// VMA 的 `pgoff` 指定从缓冲区第几页开始，映射长度不超过 VMA 大小。
    pub fn map_to_user(&self, buf: DmaBufId, vma: &mut dyn VmArea) -> IonResult<()> {
        let record = self.registry.find(buf).inspect_err(|_| {
            error!("cannot find allocation, dma_buf {:?}", buf);
        })?;
        let table = record.table();

        // uncached
        vma.set_write_combine();

        // carveout 内存没有对应的页
        if table.first().and_then(|sg| sg.page).is_none() {
            debug!("dma_buf {:?} has no pages", buf);
            return Err(IonError::InvalidSource);
        }

        let range = vma.range();
        let end = range.end.as_usize();
        let mut addr = range.start.as_usize();
        if addr >= end {
            return Err(IonError::InvalidArg);
        }
        let Some(mut offset) = vma.pgoff().checked_mul(PAGE_SIZE) else {
            error!("page offset 0x{:x} out of range for dma_buf {:?}", vma.pgoff(), buf);
            return Err(IonError::InvalidArg);
        };

        for sg in table.entries() {
            let remainder = end - addr;
            let mut len = sg.length;
            let Some(page) = sg.page else {
                error!("dma_buf {:?} has a segment without pages", buf);
                return Err(IonError::InvalidSource);
            };
            let mut pfn = page.as_usize() / PAGE_SIZE;

            if offset >= len {
                offset -= len;
                continue;
            } else if offset > 0 {
                pfn += offset / PAGE_SIZE;
                len -= offset;
                offset = 0;
            }
            let len = len.min(remainder);

            debug!(
                "remap addr=0x{:x} pfn=0x{:x} len={} vm_start={:?} vm_end={:?}",
                addr, pfn, len, range.start, range.end
            );
            vma.remap_pfn_range(VirtAddr::from(addr), pfn, len)
                .map_err(|e| {
                    error!("remap_pfn_range failed for dma_buf {:?}: {:?}", buf, e);
                    IonError::MapFailed(e)
                })?;
            addr += len;
            if addr >= end {
                return Ok(());
            }
        }

        Ok(())
    }
}
