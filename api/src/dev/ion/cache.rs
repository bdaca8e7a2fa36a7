//! 缓存维护
//!
//! 缓存的无效化与回写由平台在 begin/end CPU access 中完成，这里只负责
//! 检查缓冲区是否可缓存并触发一次访问区间。

use msm_audio_core::{DmaBufId, DmaDirection};

use super::{
    AudioIon,
    error::{IonError, IonResult},
    guard::CpuAccess,
    types::CacheOp,
};

impl AudioIon {
    /// 按操作码执行缓存维护，操作码见 [`CacheOp`]
    pub fn cache_maintain(&self, buf: DmaBufId, op: u32) -> IonResult<()> {
        self.check_cacheable(buf)?;
        let op = CacheOp::try_from(op).map_err(|_| {
            error!("Invalid cache operation {}", op);
            IonError::InvalidCacheOp(op)
        })?;
        self.sync_for_cpu(buf, op)
    }

    /// 对可缓存缓冲区执行 `op`
    pub fn maintain(&self, buf: DmaBufId, op: CacheOp) -> IonResult<()> {
        self.check_cacheable(buf)?;
        self.sync_for_cpu(buf, op)
    }

    fn check_cacheable(&self, buf: DmaBufId) -> IonResult<()> {
        self.registry.find(buf)?;
        let flags = self.dma_buf.flags(buf).map_err(|e| {
            error!("dma_buf_get_flags failed for {:?}: {:?}", buf, e);
            IonError::InvalidBuffer
        })?;
        if !flags.is_cached() {
            error!("Cache ops called on uncached buffer: {:?}", buf);
            return Err(IonError::NotCacheable);
        }
        Ok(())
    }

    fn sync_for_cpu(&self, buf: DmaBufId, op: CacheOp) -> IonResult<()> {
        debug!("{:?} caches of dma_buf {:?}", op, buf);
        CpuAccess::begin(self.dma_buf.as_ref(), buf, DmaDirection::Bidirectional)
            .and_then(CpuAccess::end)
            .map_err(IonError::CpuAccess)
    }
}
