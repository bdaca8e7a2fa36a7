//! Audio ION 设备实现

use alloc::sync::Arc;

use msm_audio_core::{DmaBufId, DmaBufOps, IommuOps, IonFlags, IonHeapType, KmapOps};
use spin::RwLock;

use super::{
    buffer::AllocRegistry,
    error::{IonError, IonResult},
    guard::BufRef,
    smmu::SmmuBinding,
    types::{IonAllocation, IonImport},
};

/// Audio ION 设备
///
/// 管理 host 与 aDSP 之间共享的音频缓冲区：分配或导入 dma-buf，
/// 挂到 SMMU context bank 上得到带 SID 的总线地址，并按需建立内核
/// 映射和用户态映射。
///
/// 同一缓冲区上的操作需要调用者自行串行化；不同缓冲区之间可以并发。
pub struct AudioIon {
    pub(super) dma_buf: Arc<dyn DmaBufOps>,
    pub(super) kmap: Arc<dyn KmapOps>,
    pub(super) iommu: Arc<dyn IommuOps>,
    /// probe 时写入一次，之后只读
    pub(super) binding: RwLock<Option<SmmuBinding>>,
    pub(super) registry: AllocRegistry,
}

impl AudioIon {
    /// 创建未绑定的 Audio ION 设备
    pub fn new(
        dma_buf: Arc<dyn DmaBufOps>,
        kmap: Arc<dyn KmapOps>,
        iommu: Arc<dyn IommuOps>,
    ) -> Self {
        Self {
            dma_buf,
            kmap,
            iommu,
            binding: RwLock::new(None),
            registry: AllocRegistry::new(),
        }
    }

    fn ensure_ready(&self) -> IonResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            debug!("probe is not done, deferred");
            Err(IonError::NotReady)
        }
    }

    /// 从系统堆分配 `size` 字节的音频缓冲区
    ///
    /// 缓冲区会被映射到 context bank 和内核，并清零。
    pub fn allocate(&self, size: usize) -> IonResult<IonAllocation> {
        self.ensure_ready()?;
        if size == 0 {
            error!("Invalid params: size=0");
            return Err(IonError::InvalidArg);
        }

        let ops = self.dma_buf.as_ref();
        let buf = ops
            .alloc(size, IonHeapType::System, IonFlags::empty())
            .map_err(|e| {
                error!("ION alloc fail err={:?}", e);
                IonError::NoMemory
            })?;
        let buf_ref = BufRef::new(ops, buf);

        let (paddr, len) = self.acquire(buf)?;
        // 记录已登记，引用由 release 负责释放
        buf_ref.disarm();

        let vaddr = self.map_kernel(buf).inspect_err(|e| {
            error!("ION memory mapping for AUDIO failed: {:?}", e);
            self.release_quietly(buf);
        })?;

        // SAFETY: map_kernel 成功后 [vaddr, vaddr + len) 整段已映射且可写
        unsafe { core::ptr::write_bytes(vaddr.as_mut_ptr(), 0, len) };

        info!(
            "Allocated audio buffer {:?}: paddr=0x{:x}, len={}, vaddr={:?}",
            buf, paddr, len, vaddr
        );
        Ok(IonAllocation {
            buf,
            paddr,
            len,
            vaddr,
        })
    }

    /// 导入外部 dma-buf 文件描述符
    pub fn import(&self, fd: i32) -> IonResult<IonImport> {
        self.ensure_ready()?;

        let ops = self.dma_buf.as_ref();
        let buf = ops.get(fd).map_err(|e| {
            error!("dma_buf_get failed for fd={}: {:?}", fd, e);
            IonError::InvalidArg
        })?;
        let buf_ref = BufRef::new(ops, buf);

        let flags = ops.flags(buf).map_err(|e| {
            error!("could not get flags for dma_buf {:?}: {:?}", buf, e);
            IonError::InvalidBuffer
        })?;

        let (paddr, len) = self.acquire(buf)?;
        buf_ref.disarm();

        let vaddr = self.map_kernel(buf).inspect_err(|e| {
            error!("ION memory mapping for imported fd={} failed: {:?}", fd, e);
            self.release_quietly(buf);
        })?;

        info!(
            "Imported fd={} as {:?}: flags={:?}, paddr=0x{:x}, len={}",
            fd, buf, flags, paddr, len
        );
        Ok(IonImport {
            buf,
            flags,
            paddr,
            len,
            vaddr,
        })
    }

    /// 释放缓冲区
    ///
    /// 先解除内核映射（若有），再拆除设备映射并删除记录。
    pub fn free(&self, buf: DmaBufId) -> IonResult<()> {
        self.registry.find(buf).inspect_err(|_| {
            error!("cannot find allocation, dma_buf {:?}", buf);
        })?;

        match self.unmap_kernel(buf) {
            Ok(()) | Err(IonError::NotMapped) => {}
            Err(e) => warn!("Kernel unmap of {:?} reported {:?}", buf, e),
        }

        self.release(buf)?;
        info!("Freed audio buffer {:?}", buf);
        Ok(())
    }

    fn release_quietly(&self, buf: DmaBufId) {
        if let Err(e) = self.release(buf) {
            error!("Failed to unwind mapping of {:?}: {:?}", buf, e);
        }
    }

    /// 当前活跃的缓冲区数量
    pub fn buffer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &AllocRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use msm_audio_core::CbDevice;

    use super::*;
    use crate::dev::ion::mock::MockPlatform;

    #[test]
    fn allocate_before_bind_is_deferred() {
        let platform = MockPlatform::new();
        let ion = platform.audio_ion();
        assert_eq!(ion.allocate(4096).unwrap_err(), IonError::NotReady);
        assert_eq!(ion.import(3).unwrap_err(), IonError::NotReady);
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn allocate_zero_is_invalid() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        assert_eq!(ion.allocate(0).unwrap_err(), IonError::InvalidArg);
    }

    #[cfg(not(feature = "dma-addr-32"))]
    #[test]
    fn allocate_then_double_free() {
        let platform = MockPlatform::new();
        platform.set_dma_base(0x8000_0000);
        let ion = AudioIon::new(platform.clone(), platform.clone(), platform.clone());
        ion.bind(CbDevice(1), 0x5 << 32).unwrap();

        let alloc = ion.allocate(4096).unwrap();
        assert_eq!(alloc.paddr, 0x5_8000_0000);
        assert_eq!(alloc.len, 4096);
        assert_eq!(ion.registry().find(alloc.buf).unwrap().len, 4096);
        assert_eq!(
            ion.registry().find(alloc.buf).unwrap().kernel_vaddr(),
            Some(alloc.vaddr)
        );

        ion.free(alloc.buf).unwrap();
        assert_eq!(ion.free(alloc.buf).unwrap_err(), IonError::BufferNotFound);
        assert_eq!(ion.buffer_count(), 0);
        assert_eq!(platform.refs(alloc.buf), 0);
        assert!(!platform.is_attached(alloc.buf));
        assert_eq!(platform.kmapped_pages(alloc.buf), 0);
        assert_eq!(platform.cpu_access_depth(alloc.buf), 0);
    }

    #[test]
    fn allocate_zero_fills() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);

        let alloc = ion.allocate(3 * 4096 + 100).unwrap();
        assert_eq!(alloc.len, 3 * 4096 + 100);
        let contents = platform.contents(alloc.buf);
        assert!(contents[..alloc.len].iter().all(|&b| b == 0));
        assert_eq!(platform.kmapped_pages(alloc.buf), 4);
        ion.free(alloc.buf).unwrap();
    }

    #[test]
    fn allocation_failure_is_no_memory() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        platform.fail_alloc(true);
        assert_eq!(ion.allocate(4096).unwrap_err(), IonError::NoMemory);
    }

    #[test]
    fn attach_failure_drops_reference() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        platform.fail_attach(true);

        assert!(matches!(
            ion.allocate(4096),
            Err(IonError::AttachFailed(_))
        ));
        assert_eq!(ion.buffer_count(), 0);
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn kernel_map_failure_unwinds_everything() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        platform.fail_kmap_at(Some(1));

        assert!(matches!(
            ion.allocate(2 * 4096),
            Err(IonError::MapFailed(_))
        ));
        assert_eq!(ion.buffer_count(), 0);
        assert_eq!(platform.live_buffers(), 0);
        assert_eq!(platform.live_attachments(), 0);
    }

    #[test]
    fn import_reports_flags() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        let buf = platform.add_external(
            9,
            &[4096, 8192],
            IonFlags::CACHED,
            IonHeapType::System,
        );

        let import = ion.import(9).unwrap();
        assert_eq!(import.buf, buf);
        assert_eq!(import.flags, IonFlags::CACHED);
        assert_eq!(import.len, 3 * 4096);
        assert_eq!(platform.refs(buf), 2);

        ion.free(buf).unwrap();
        // 导出方仍持有自己的引用
        assert_eq!(platform.refs(buf), 1);
    }

    #[test]
    fn import_with_unreadable_flags_drops_reference() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        let buf = platform.add_external(9, &[4096], IonFlags::CACHED, IonHeapType::System);
        platform.fail_flags(true);

        assert_eq!(ion.import(9).unwrap_err(), IonError::InvalidBuffer);
        assert_eq!(platform.refs(buf), 1);
        assert!(!platform.is_attached(buf));
        assert_eq!(platform.live_attachments(), 0);
        assert_eq!(ion.buffer_count(), 0);
    }

    #[test]
    fn import_unknown_fd_is_invalid() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        assert_eq!(ion.import(42).unwrap_err(), IonError::InvalidArg);
    }

    #[test]
    fn free_tolerates_missing_kernel_mapping() {
        let platform = MockPlatform::new();
        let ion = platform.bound_audio_ion(0);
        let alloc = ion.allocate(4096).unwrap();

        ion.unmap_kernel(alloc.buf).unwrap();
        ion.free(alloc.buf).unwrap();
        assert_eq!(platform.refs(alloc.buf), 0);
    }

    #[test]
    fn concurrent_clients() {
        use std::{sync::Arc, thread, vec::Vec};

        let platform = MockPlatform::new();
        let ion = Arc::new(platform.bound_audio_ion(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let ion = ion.clone();
                thread::spawn(move || {
                    for i in 1..32 {
                        let alloc = ion.allocate(i * 512).unwrap();
                        assert_eq!(ion.registry().find(alloc.buf).unwrap().len, alloc.len);
                        ion.free(alloc.buf).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(ion.buffer_count(), 0);
        assert_eq!(platform.live_buffers(), 0);
    }
}
