//! 映射协议：attach → map → 组合总线地址 → 登记，以及逆向拆除

use alloc::sync::Arc;

use msm_audio_core::{DmaAddr, DmaBufId, DmaDirection};

use super::{
    AudioIon,
    error::{IonError, IonResult},
    guard::{Attachment, SgMapping},
    smmu::compose_bus_addr,
    types::{AllocRecord, DeviceMapping},
};

/// 调用方不区分读写缓冲区，统一按双向映射
const DMA_DIR: DmaDirection = DmaDirection::Bidirectional;

impl AudioIon {
    /// 把缓冲区挂到 context bank 并映射，返回带 SID 的总线地址和长度
    ///
    /// 成功返回时缓冲区已 attach、已映射且可以按标识查到。任何一步失败
    /// 都会撤销已完成的步骤；缓冲区引用不在此处释放。
    pub fn acquire(&self, buf: DmaBufId) -> IonResult<(DmaAddr, usize)> {
        let binding = self.binding()?;
        let ops = self.dma_buf.as_ref();

        let len = ops.size(buf).map_err(|e| {
            error!("Fail to get size of dma_buf {:?}: {:?}", buf, e);
            IonError::InvalidBuffer
        })?;

        let attach = ops.attach(buf, binding.cb_dev).map_err(|e| {
            error!("Fail to attach dma_buf {:?} to CB, rc = {:?}", buf, e);
            IonError::AttachFailed(e)
        })?;
        let attach = Attachment::new(ops, buf, attach);

        let table = ops.map_attachment(attach.id(), DMA_DIR).map_err(|e| {
            error!("Fail to map attachment of dma_buf {:?}, rc = {:?}", buf, e);
            IonError::MapFailed(e)
        })?;
        let sg = SgMapping::new(ops, attach.id(), table, DMA_DIR);

        let Some(first) = sg.table().first() else {
            error!("Empty sg table for dma_buf {:?}", buf);
            return Err(IonError::InvalidBuffer);
        };
        let paddr = compose_bus_addr(first.dma_address, binding.sid_bits);

        let record = Arc::new(AllocRecord::new(
            buf,
            len,
            DeviceMapping {
                attach: attach.id(),
                table: sg.table().clone(),
            },
        ));
        self.registry.insert(record).inspect_err(|e| {
            error!("Registering dma_buf {:?} failed: {:?}", buf, e);
        })?;
        sg.disarm();
        attach.disarm();

        debug!("paddr=0x{:x}, len={} for dma_buf {:?}", paddr, len, buf);
        Ok((paddr, len))
    }

    /// 拆除设备映射，释放缓冲区引用并删除记录
    ///
    /// 记录在 unmap 和 detach 都完成之前一直留在登记表中。
    pub fn release(&self, buf: DmaBufId) -> IonResult<()> {
        let record = self.registry.find(buf).inspect_err(|_| {
            error!("cannot find allocation, dma_buf {:?}", buf);
        })?;
        let ops = self.dma_buf.as_ref();

        ops.unmap_attachment(record.attachment(), record.table(), DMA_DIR);
        ops.detach(buf, record.attachment());
        ops.put(buf);

        self.registry.remove(buf)?;
        debug!("Released dma_buf {:?}", buf);
        Ok(())
    }
}
