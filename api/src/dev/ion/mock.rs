//! 内存中的模拟平台，用于测试
//!
//! 实现全部平台接口，记录调用情况，并可注入各类失败。

use alloc::{sync::Arc, vec, vec::Vec};

use axerrno::{AxError, AxResult};
use hashbrown::HashMap;
use memory_addr::{PhysAddr, VirtAddr, VirtAddrRange, align_up_4k};
use msm_audio_core::{
    AttachmentId, CbDevice, DmaAddr, DmaBufId, DmaBufOps, DmaDirection, DspState, IommuMappingId,
    IommuOps, IonFlags, IonHeapType, KmapOps, Q6State, SgEntry, SgTable, VmArea,
};
use spin::Mutex;

use super::{AudioIon, PAGE_SIZE};

/// 新缓冲区内容的填充值，用于检查清零
pub const POISON: u8 = 0xa5;

struct MockBuf {
    size: usize,
    flags: IonFlags,
    heap: IonHeapType,
    refs: usize,
    segments: Vec<usize>,
    phys_base: usize,
    backing: Vec<u8>,
    kmapped: Vec<bool>,
    kunmapped: Vec<usize>,
    cpu_access: isize,
    cpu_transitions: usize,
}

struct MockAttachment {
    buf: DmaBufId,
    dev: CbDevice,
    sg_mapped: bool,
}

#[derive(Default)]
struct Faults {
    alloc: bool,
    attach: bool,
    flags: bool,
    map: bool,
    iommu_attach: bool,
    begin_access: bool,
    end_access: bool,
    kmap_at: Option<usize>,
}

struct State {
    next_id: u64,
    next_phys: usize,
    next_dma: u64,
    bufs: HashMap<DmaBufId, MockBuf>,
    fds: HashMap<i32, DmaBufId>,
    attachments: HashMap<AttachmentId, MockAttachment>,
    window: Option<(IommuMappingId, usize, usize)>,
    live_windows: Vec<IommuMappingId>,
    attached_dev: Option<CbDevice>,
    faults: Faults,
}

/// 模拟平台
pub struct MockPlatform {
    state: Mutex<State>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_id: 1,
                next_phys: 0x4000_0000,
                next_dma: 0x1000_0000,
                bufs: HashMap::new(),
                fds: HashMap::new(),
                attachments: HashMap::new(),
                window: None,
                live_windows: Vec::new(),
                attached_dev: None,
                faults: Faults::default(),
            }),
        })
    }

    /// 创建使用本平台的未绑定设备
    pub fn audio_ion(self: &Arc<Self>) -> AudioIon {
        AudioIon::new(self.clone(), self.clone(), self.clone())
    }

    /// 创建已绑定到 `CbDevice(1)` 的设备
    pub fn bound_audio_ion(self: &Arc<Self>, sid_bits: u64) -> AudioIon {
        let ion = self.audio_ion();
        if let Err(e) = ion.bind(CbDevice(1), sid_bits) {
            panic!("mock bind failed: {e}");
        }
        ion
    }

    /// 下一次 sg 映射使用的设备地址
    pub fn set_dma_base(&self, base: u64) {
        self.state.lock().next_dma = base;
    }

    fn new_buf(
        state: &mut State,
        segments: &[usize],
        size: usize,
        flags: IonFlags,
        heap: IonHeapType,
    ) -> DmaBufId {
        let id = DmaBufId(state.next_id);
        state.next_id += 1;
        let total = segments.iter().sum::<usize>();
        let phys_base = state.next_phys;
        state.next_phys += align_up_4k(total) + PAGE_SIZE;
        let pages = align_up_4k(total) / PAGE_SIZE;
        state.bufs.insert(
            id,
            MockBuf {
                size,
                flags,
                heap,
                refs: 1,
                segments: segments.to_vec(),
                phys_base,
                backing: vec![POISON; pages * PAGE_SIZE],
                kmapped: vec![false; pages],
                kunmapped: Vec::new(),
                cpu_access: 0,
                cpu_transitions: 0,
            },
        );
        id
    }

    /// 登记一个由外部导出、可通过 `fd` 导入的缓冲区，导出方持有一个引用
    pub fn add_external(
        &self,
        fd: i32,
        segments: &[usize],
        flags: IonFlags,
        heap: IonHeapType,
    ) -> DmaBufId {
        let mut state = self.state.lock();
        let size = segments.iter().sum();
        let id = Self::new_buf(&mut state, segments, size, flags, heap);
        state.fds.insert(fd, id);
        id
    }

    /// 增加一个引用
    pub fn get_ref(&self, buf: DmaBufId) {
        if let Some(b) = self.state.lock().bufs.get_mut(&buf) {
            b.refs += 1;
        }
    }

    pub fn fail_alloc(&self, fail: bool) {
        self.state.lock().faults.alloc = fail;
    }

    pub fn fail_attach(&self, fail: bool) {
        self.state.lock().faults.attach = fail;
    }

    pub fn fail_flags(&self, fail: bool) {
        self.state.lock().faults.flags = fail;
    }

    pub fn fail_map(&self, fail: bool) {
        self.state.lock().faults.map = fail;
    }

    pub fn fail_iommu_attach(&self, fail: bool) {
        self.state.lock().faults.iommu_attach = fail;
    }

    pub fn fail_begin_access(&self, fail: bool) {
        self.state.lock().faults.begin_access = fail;
    }

    pub fn fail_end_access(&self, fail: bool) {
        self.state.lock().faults.end_access = fail;
    }

    /// 映射第 `page` 页时失败
    pub fn fail_kmap_at(&self, page: Option<usize>) {
        self.state.lock().faults.kmap_at = page;
    }

    pub fn refs(&self, buf: DmaBufId) -> usize {
        self.state.lock().bufs.get(&buf).map_or(0, |b| b.refs)
    }

    /// 引用计数不为零的缓冲区数量
    pub fn live_buffers(&self) -> usize {
        self.state.lock().bufs.values().filter(|b| b.refs > 0).count()
    }

    pub fn live_attachments(&self) -> usize {
        self.state.lock().attachments.len()
    }

    pub fn is_attached(&self, buf: DmaBufId) -> bool {
        self.state
            .lock()
            .attachments
            .values()
            .any(|a| a.buf == buf)
    }

    pub fn attached_device(&self, buf: DmaBufId) -> Option<CbDevice> {
        self.state
            .lock()
            .attachments
            .values()
            .find(|a| a.buf == buf)
            .map(|a| a.dev)
    }

    pub fn is_sg_mapped(&self, buf: DmaBufId) -> bool {
        self.state
            .lock()
            .attachments
            .values()
            .any(|a| a.buf == buf && a.sg_mapped)
    }

    pub fn kmapped_pages(&self, buf: DmaBufId) -> usize {
        self.state
            .lock()
            .bufs
            .get(&buf)
            .map_or(0, |b| b.kmapped.iter().filter(|&&m| m).count())
    }

    /// 按调用顺序记录的 kunmap 页号
    pub fn kunmapped(&self, buf: DmaBufId) -> Vec<usize> {
        self.state
            .lock()
            .bufs
            .get(&buf)
            .map_or_else(Vec::new, |b| b.kunmapped.clone())
    }

    /// 尚未退出的 CPU 访问区间数
    pub fn cpu_access_depth(&self, buf: DmaBufId) -> isize {
        self.state.lock().bufs.get(&buf).map_or(0, |b| b.cpu_access)
    }

    /// 完整的 begin/end 区间次数
    pub fn cpu_access_transitions(&self, buf: DmaBufId) -> usize {
        self.state.lock().bufs.get(&buf).map_or(0, |b| b.cpu_transitions)
    }

    /// 每段起始页的页帧号
    pub fn segment_pfns(&self, buf: DmaBufId) -> Vec<usize> {
        let state = self.state.lock();
        let Some(b) = state.bufs.get(&buf) else {
            return Vec::new();
        };
        let mut offset = 0;
        b.segments
            .iter()
            .map(|len| {
                let pfn = (b.phys_base + offset) / PAGE_SIZE;
                offset += align_up_4k(*len);
                pfn
            })
            .collect()
    }

    /// 缓冲区当前内容
    pub fn contents(&self, buf: DmaBufId) -> Vec<u8> {
        self.state
            .lock()
            .bufs
            .get(&buf)
            .map_or_else(Vec::new, |b| b.backing.clone())
    }

    pub fn iommu_attached(&self, dev: CbDevice) -> bool {
        self.state.lock().attached_dev == Some(dev)
    }

    /// 当前 IOVA 窗口 `(base, size)`
    pub fn iommu_window(&self) -> Option<(usize, usize)> {
        self.state.lock().window.map(|(_, base, size)| (base, size))
    }

    /// 已创建且尚未释放的 IOVA 窗口数
    pub fn window_count(&self) -> usize {
        self.state.lock().live_windows.len()
    }
}

impl DmaBufOps for MockPlatform {
    fn alloc(&self, size: usize, heap: IonHeapType, flags: IonFlags) -> AxResult<DmaBufId> {
        let mut state = self.state.lock();
        if state.faults.alloc {
            return Err(AxError::NoMemory);
        }
        Ok(Self::new_buf(&mut state, &[align_up_4k(size)], size, flags, heap))
    }

    fn get(&self, fd: i32) -> AxResult<DmaBufId> {
        let mut state = self.state.lock();
        let id = *state.fds.get(&fd).ok_or(AxError::NotFound)?;
        let buf = state.bufs.get_mut(&id).ok_or(AxError::NotFound)?;
        buf.refs += 1;
        Ok(id)
    }

    fn put(&self, buf: DmaBufId) {
        if let Some(b) = self.state.lock().bufs.get_mut(&buf) {
            assert!(b.refs > 0, "put on dead dma_buf {buf:?}");
            b.refs -= 1;
        }
    }

    fn size(&self, buf: DmaBufId) -> AxResult<usize> {
        self.state
            .lock()
            .bufs
            .get(&buf)
            .map(|b| b.size)
            .ok_or(AxError::NotFound)
    }

    fn flags(&self, buf: DmaBufId) -> AxResult<IonFlags> {
        let state = self.state.lock();
        if state.faults.flags {
            return Err(AxError::Unsupported);
        }
        state
            .bufs
            .get(&buf)
            .map(|b| b.flags)
            .ok_or(AxError::NotFound)
    }

    fn attach(&self, buf: DmaBufId, dev: CbDevice) -> AxResult<AttachmentId> {
        let mut state = self.state.lock();
        if state.faults.attach {
            return Err(AxError::NoMemory);
        }
        if !state.bufs.contains_key(&buf) {
            return Err(AxError::InvalidInput);
        }
        let id = AttachmentId(state.next_id);
        state.next_id += 1;
        state.attachments.insert(
            id,
            MockAttachment {
                buf,
                dev,
                sg_mapped: false,
            },
        );
        Ok(id)
    }

    fn detach(&self, buf: DmaBufId, attach: AttachmentId) {
        let removed = self.state.lock().attachments.remove(&attach);
        assert!(
            removed.is_some_and(|a| a.buf == buf && !a.sg_mapped),
            "bad detach of {attach:?}"
        );
    }

    fn map_attachment(&self, attach: AttachmentId, _dir: DmaDirection) -> AxResult<SgTable> {
        let mut state = self.state.lock();
        if state.faults.map {
            return Err(AxError::NoMemory);
        }
        let buf = state
            .attachments
            .get(&attach)
            .ok_or(AxError::InvalidInput)?
            .buf;
        let (segments, phys_base, heap) = {
            let b = state.bufs.get(&buf).ok_or(AxError::InvalidInput)?;
            (b.segments.clone(), b.phys_base, b.heap)
        };

        let mut dma = state.next_dma;
        let mut offset = 0;
        let mut entries = Vec::with_capacity(segments.len());
        for length in segments {
            let page = match heap {
                IonHeapType::Carveout => None,
                _ => Some(PhysAddr::from(phys_base + offset)),
            };
            entries.push(SgEntry {
                page,
                length,
                dma_address: dma as DmaAddr,
            });
            offset += align_up_4k(length);
            dma += align_up_4k(length) as u64;
        }
        state.next_dma = dma;
        if let Some(a) = state.attachments.get_mut(&attach) {
            a.sg_mapped = true;
        }
        Ok(SgTable::new(entries))
    }

    fn unmap_attachment(&self, attach: AttachmentId, _table: &SgTable, _dir: DmaDirection) {
        let mut state = self.state.lock();
        let a = state.attachments.get_mut(&attach);
        assert!(a.as_ref().is_some_and(|a| a.sg_mapped), "bad unmap of {attach:?}");
        if let Some(a) = a {
            a.sg_mapped = false;
        }
    }

    fn begin_cpu_access(&self, buf: DmaBufId, _dir: DmaDirection) -> AxResult {
        let mut state = self.state.lock();
        if state.faults.begin_access {
            return Err(AxError::Unsupported);
        }
        let b = state.bufs.get_mut(&buf).ok_or(AxError::NotFound)?;
        b.cpu_access += 1;
        Ok(())
    }

    fn end_cpu_access(&self, buf: DmaBufId, _dir: DmaDirection) -> AxResult {
        let mut state = self.state.lock();
        let fail = state.faults.end_access;
        let b = state.bufs.get_mut(&buf).ok_or(AxError::NotFound)?;
        b.cpu_access -= 1;
        if fail {
            return Err(AxError::Unsupported);
        }
        b.cpu_transitions += 1;
        Ok(())
    }
}

impl KmapOps for MockPlatform {
    fn kmap(&self, buf: DmaBufId, page: usize) -> AxResult<VirtAddr> {
        let mut state = self.state.lock();
        if state.faults.kmap_at == Some(page) {
            return Err(AxError::NoMemory);
        }
        let b = state.bufs.get_mut(&buf).ok_or(AxError::NotFound)?;
        let slot = b.kmapped.get_mut(page).ok_or(AxError::InvalidInput)?;
        *slot = true;
        Ok(VirtAddr::from(b.backing.as_mut_ptr() as usize))
    }

    fn kunmap(&self, buf: DmaBufId, page: usize, vaddr: VirtAddr) {
        let mut state = self.state.lock();
        let Some(b) = state.bufs.get_mut(&buf) else {
            panic!("kunmap of unknown {buf:?}");
        };
        assert_eq!(vaddr.as_usize(), b.backing.as_ptr() as usize);
        assert!(b.kmapped[page], "page {page} of {buf:?} not mapped");
        b.kmapped[page] = false;
        b.kunmapped.push(page);
    }
}

impl IommuOps for MockPlatform {
    fn create_mapping(&self, base: usize, size: usize) -> AxResult<IommuMappingId> {
        let mut state = self.state.lock();
        let id = IommuMappingId(state.next_id);
        state.next_id += 1;
        state.window = Some((id, base, size));
        state.live_windows.push(id);
        Ok(id)
    }

    fn attach_device(&self, dev: CbDevice, mapping: IommuMappingId) -> AxResult {
        let mut state = self.state.lock();
        if state.faults.iommu_attach {
            return Err(AxError::Unsupported);
        }
        if state.window.map(|w| w.0) != Some(mapping) {
            return Err(AxError::InvalidInput);
        }
        state.attached_dev = Some(dev);
        Ok(())
    }

    fn detach_device(&self, dev: CbDevice) {
        let mut state = self.state.lock();
        if state.attached_dev == Some(dev) {
            state.attached_dev = None;
        }
    }

    fn release_mapping(&self, mapping: IommuMappingId) {
        let mut state = self.state.lock();
        state.live_windows.retain(|&w| w != mapping);
        if state.window.map(|w| w.0) == Some(mapping) {
            state.window = None;
        }
    }
}

/// 模拟用户态 VMA
pub struct MockVma {
    range: VirtAddrRange,
    pgoff: usize,
    pub write_combine: bool,
    pub fail_remap: bool,
    /// `(addr, pfn, len)`
    pub remaps: Vec<(VirtAddr, usize, usize)>,
}

impl MockVma {
    pub fn new(start: usize, len: usize, pgoff: usize) -> Self {
        Self {
            range: VirtAddrRange::from_start_size(VirtAddr::from(start), len),
            pgoff,
            write_combine: false,
            fail_remap: false,
            remaps: Vec::new(),
        }
    }
}

impl VmArea for MockVma {
    fn range(&self) -> VirtAddrRange {
        self.range
    }

    fn pgoff(&self) -> usize {
        self.pgoff
    }

    fn set_write_combine(&mut self) {
        self.write_combine = true;
    }

    fn remap_pfn_range(&mut self, addr: VirtAddr, pfn: usize, len: usize) -> AxResult {
        if self.fail_remap {
            return Err(AxError::NoMemory);
        }
        self.remaps.push((addr, pfn, len));
        Ok(())
    }
}

/// 固定状态的 aDSP
pub struct MockDsp(pub Q6State);

impl DspState for MockDsp {
    fn q6_state(&self) -> Q6State {
        self.0
    }
}
