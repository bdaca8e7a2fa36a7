//! 外部资源的作用域守卫
//!
//! 多步骤操作中每完成一步就持有一个守卫；中途出错时守卫在 drop 中
//! 撤销自己那一步，步骤提交后调用 `disarm` 放弃撤销。

use axerrno::AxResult;
use memory_addr::VirtAddr;
use msm_audio_core::{AttachmentId, DmaBufId, DmaBufOps, DmaDirection, KmapOps, SgTable};

/// dma-buf 引用，drop 时 `put`
pub(super) struct BufRef<'a> {
    ops: &'a dyn DmaBufOps,
    buf: DmaBufId,
    armed: bool,
}

impl<'a> BufRef<'a> {
    pub fn new(ops: &'a dyn DmaBufOps, buf: DmaBufId) -> Self {
        Self {
            ops,
            buf,
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BufRef<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Dropping reference on dma_buf {:?}", self.buf);
            self.ops.put(self.buf);
        }
    }
}

/// dma-buf attachment，drop 时 detach
pub(super) struct Attachment<'a> {
    ops: &'a dyn DmaBufOps,
    buf: DmaBufId,
    attach: AttachmentId,
    armed: bool,
}

impl<'a> Attachment<'a> {
    pub fn new(ops: &'a dyn DmaBufOps, buf: DmaBufId, attach: AttachmentId) -> Self {
        Self {
            ops,
            buf,
            attach,
            armed: true,
        }
    }

    pub fn id(&self) -> AttachmentId {
        self.attach
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Attachment<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Detaching dma_buf {:?}", self.buf);
            self.ops.detach(self.buf, self.attach);
        }
    }
}

/// attachment 的 sg 映射，drop 时 unmap
pub(super) struct SgMapping<'a> {
    ops: &'a dyn DmaBufOps,
    attach: AttachmentId,
    table: SgTable,
    dir: DmaDirection,
    armed: bool,
}

impl<'a> SgMapping<'a> {
    pub fn new(
        ops: &'a dyn DmaBufOps,
        attach: AttachmentId,
        table: SgTable,
        dir: DmaDirection,
    ) -> Self {
        Self {
            ops,
            attach,
            table,
            dir,
            armed: true,
        }
    }

    pub fn table(&self) -> &SgTable {
        &self.table
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SgMapping<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ops.unmap_attachment(self.attach, &self.table, self.dir);
        }
    }
}

/// CPU 访问区间，drop 时 end_cpu_access
pub(super) struct CpuAccess<'a> {
    ops: &'a dyn DmaBufOps,
    buf: DmaBufId,
    dir: DmaDirection,
    armed: bool,
}

impl<'a> CpuAccess<'a> {
    pub fn begin(ops: &'a dyn DmaBufOps, buf: DmaBufId, dir: DmaDirection) -> AxResult<Self> {
        ops.begin_cpu_access(buf, dir)?;
        Ok(Self {
            ops,
            buf,
            dir,
            armed: true,
        })
    }

    /// 立即退出区间并返回结果
    pub fn end(mut self) -> AxResult {
        self.armed = false;
        self.ops.end_cpu_access(self.buf, self.dir)
    }

    /// 保持区间，由之后的 unmap 退出
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CpuAccess<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.ops.end_cpu_access(self.buf, self.dir) {
                warn!("end_cpu_access failed for dma_buf {:?}: {:?}", self.buf, e);
            }
        }
    }
}

/// 正在建立的内核映射，drop 时按逆序解除已映射的页
pub(super) struct KernelPages<'a> {
    ops: &'a dyn KmapOps,
    buf: DmaBufId,
    base: VirtAddr,
    mapped: usize,
}

impl<'a> KernelPages<'a> {
    /// 映射第 0 页并以其地址作为基址
    pub fn map_first(ops: &'a dyn KmapOps, buf: DmaBufId) -> AxResult<Self> {
        let base = ops.kmap(buf, 0)?;
        Ok(Self {
            ops,
            buf,
            base,
            mapped: 1,
        })
    }

    pub fn map_next(&mut self) -> AxResult {
        self.ops.kmap(self.buf, self.mapped)?;
        self.mapped += 1;
        Ok(())
    }

    pub fn mapped(&self) -> usize {
        self.mapped
    }

    pub fn base(&self) -> VirtAddr {
        self.base
    }

    /// 提交映射，返回基址
    pub fn commit(mut self) -> VirtAddr {
        self.mapped = 0;
        self.base
    }
}

impl Drop for KernelPages<'_> {
    fn drop(&mut self) {
        for page in (0..self.mapped).rev() {
            self.ops.kunmap(self.buf, page, self.base);
        }
    }
}
