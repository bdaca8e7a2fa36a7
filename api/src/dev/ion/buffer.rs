//! 分配记录登记表

use alloc::{sync::Arc, vec::Vec};

use hashbrown::HashMap;
use memory_addr::VirtAddr;
use msm_audio_core::DmaBufId;
use spin::Mutex;

use super::error::{IonError, IonResult};
use super::types::AllocRecord;

/// 分配记录登记表
///
/// 锁只保护表本身，attach/map/kmap 等可能阻塞的操作都在锁外完成。
pub struct AllocRegistry {
    records: Mutex<HashMap<DmaBufId, Arc<AllocRecord>>>,
}

impl AllocRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// 登记记录，已存在同一缓冲区的记录时不覆盖
    pub fn insert(&self, record: Arc<AllocRecord>) -> IonResult<()> {
        let buf = record.buf;
        let mut records = self.records.lock();
        if records.contains_key(&buf) {
            return Err(IonError::BufferExists);
        }
        records.insert(buf, record);
        debug!("Registered allocation for dma_buf {:?}", buf);
        Ok(())
    }

    pub fn find(&self, buf: DmaBufId) -> IonResult<Arc<AllocRecord>> {
        self.records
            .lock()
            .get(&buf)
            .cloned()
            .ok_or(IonError::BufferNotFound)
    }

    pub fn remove(&self, buf: DmaBufId) -> IonResult<Arc<AllocRecord>> {
        let record = self
            .records
            .lock()
            .remove(&buf)
            .ok_or(IonError::BufferNotFound)?;
        debug!("Unregistered allocation for dma_buf {:?}", buf);
        Ok(record)
    }

    /// 在记录上写入内核地址
    ///
    /// 查表和写入在同一临界区内完成；记录不存在时返回 `BufferNotFound`，
    /// 已有内核映射时返回 `AlreadyMapped`。
    pub fn set_kernel_vaddr(&self, buf: DmaBufId, vaddr: VirtAddr) -> IonResult<()> {
        let records = self.records.lock();
        let record = records.get(&buf).ok_or(IonError::BufferNotFound)?;
        if record.set_kernel_vaddr(vaddr) {
            Ok(())
        } else {
            Err(IonError::AlreadyMapped)
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// 获取所有缓冲区标识（用于调试）
    pub fn handles(&self) -> Vec<DmaBufId> {
        self.records.lock().keys().copied().collect()
    }
}

impl Default for AllocRegistry {
    fn default() -> Self {
        Self::new()
    }
}
