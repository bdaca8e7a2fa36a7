//! SMMU 地址空间绑定
//!
//! probe 时为 context bank 设备创建固定的 IOVA 窗口并把设备挂上去，
//! 同时记下折叠进总线地址高位的 SID。

use core::mem::size_of;

use msm_audio_core::{CbDevice, DmaAddr, IommuMappingId};

use super::{
    AudioIon,
    error::{IonError, IonResult},
};

/// IOVA 窗口起始地址
pub const MSM_AUDIO_ION_VA_START: usize = 0x1000_0000;
/// IOVA 窗口大小
pub const MSM_AUDIO_ION_VA_LEN: usize = 0x0FFF_FFFF;
/// SID 在总线地址中的偏移
pub const MSM_AUDIO_SMMU_SID_OFFSET: u32 = 32;

/// 已建立的 SMMU 绑定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmmuBinding {
    /// context bank 设备
    pub cb_dev: CbDevice,
    /// IOVA 窗口
    pub mapping: IommuMappingId,
    /// 已移位的 SID 位
    pub sid_bits: u64,
}

/// 把 SID 位折叠进设备地址
pub fn compose_bus_addr(dma_address: DmaAddr, sid_bits: u64) -> DmaAddr {
    dma_address | sid_bits as DmaAddr
}

fn upper_32_bits(value: u64) -> u32 {
    (value >> 32) as u32
}

impl AudioIon {
    /// 为 `cb_dev` 建立 IOVA 窗口并 attach
    ///
    /// attach 失败时释放刚创建的窗口，不留下任何状态。
    pub fn bind(&self, cb_dev: CbDevice, sid_bits: u64) -> IonResult<SmmuBinding> {
        // 整个绑定过程持有写锁，并发的 bind 不会各自创建窗口
        let mut slot = self.binding.write();
        if slot.is_some() {
            error!("SMMU already bound, refusing to rebind {:?}", cb_dev);
            return Err(IonError::InvalidArg);
        }

        let mapping = self
            .iommu
            .create_mapping(MSM_AUDIO_ION_VA_START, MSM_AUDIO_ION_VA_LEN)
            .map_err(|e| {
                error!("Failed to create IOMMU mapping: {:?}", e);
                IonError::AttachFailed(e)
            })?;

        if let Err(e) = self.iommu.attach_device(cb_dev, mapping) {
            error!("Attach of {:?} failed, err = {:?}", cb_dev, e);
            self.iommu.release_mapping(mapping);
            return Err(IonError::AttachFailed(e));
        }

        let binding = SmmuBinding {
            cb_dev,
            mapping,
            sid_bits,
        };
        *slot = Some(binding);
        info!(
            "Bound {:?} to IOVA window 0x{:x}+0x{:x}, sid_bits=0x{:x}",
            cb_dev, MSM_AUDIO_ION_VA_START, MSM_AUDIO_ION_VA_LEN, sid_bits
        );
        Ok(binding)
    }

    /// 解除绑定
    ///
    /// 只能在没有分配记录时调用，由调用者保证。
    pub fn unbind(&self) {
        let Some(binding) = self.binding.write().take() else {
            return;
        };
        self.iommu.detach_device(binding.cb_dev);
        self.iommu.release_mapping(binding.mapping);
        info!("Unbound {:?}", binding.cb_dev);
    }

    /// SMMU 是否已绑定
    pub fn is_ready(&self) -> bool {
        self.binding.read().is_some()
    }

    pub(super) fn binding(&self) -> IonResult<SmmuBinding> {
        (*self.binding.read()).ok_or(IonError::NotReady)
    }

    /// 总线地址的高 32 位
    ///
    /// 总线地址只有 32 位宽时，高位只能来自 SID。
    pub fn top_bits_of(&self, pa: DmaAddr) -> u32 {
        if size_of::<DmaAddr>() == size_of::<u32>() {
            let sid_bits = (*self.binding.read()).map_or(0, |b| b.sid_bits);
            upper_32_bits(sid_bits)
        } else {
            upper_32_bits(pa as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::ion::mock::MockPlatform;

    #[cfg(not(feature = "dma-addr-32"))]
    #[test]
    fn compose_with_zero_mask_is_identity() {
        assert_eq!(compose_bus_addr(0x8000_0000, 0), 0x8000_0000);
        assert_eq!(compose_bus_addr(0x8000_0000, 0x5 << 32), 0x5_8000_0000);
    }

    #[test]
    fn bind_and_unbind() {
        let platform = MockPlatform::new();
        let ion = platform.audio_ion();
        assert!(!ion.is_ready());

        let binding = ion.bind(CbDevice(3), 0x5 << 32).unwrap();
        assert!(ion.is_ready());
        assert_eq!(binding.cb_dev, CbDevice(3));
        assert!(platform.iommu_attached(CbDevice(3)));
        assert_eq!(
            platform.iommu_window(),
            Some((MSM_AUDIO_ION_VA_START, MSM_AUDIO_ION_VA_LEN))
        );

        assert_eq!(ion.bind(CbDevice(3), 0).unwrap_err(), IonError::InvalidArg);

        ion.unbind();
        assert!(!ion.is_ready());
        assert!(!platform.iommu_attached(CbDevice(3)));
        assert_eq!(platform.iommu_window(), None);
    }

    #[test]
    fn racing_binds_create_one_window() {
        use std::{thread, vec::Vec};

        let platform = MockPlatform::new();
        let ion = std::sync::Arc::new(platform.audio_ion());

        let workers: Vec<_> = (0..8u32)
            .map(|i| {
                let ion = ion.clone();
                thread::spawn(move || ion.bind(CbDevice(i), 0).is_ok())
            })
            .collect();
        let bound = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(bound, 1);
        assert_eq!(platform.window_count(), 1);
        assert!(ion.is_ready());
    }

    #[test]
    fn attach_failure_releases_window() {
        let platform = MockPlatform::new();
        platform.fail_iommu_attach(true);
        let ion = platform.audio_ion();

        assert!(matches!(
            ion.bind(CbDevice(1), 0),
            Err(IonError::AttachFailed(_))
        ));
        assert!(!ion.is_ready());
        assert_eq!(platform.iommu_window(), None);
    }

    #[cfg(not(feature = "dma-addr-32"))]
    #[test]
    fn top_bits_come_from_address() {
        let platform = MockPlatform::new();
        let ion = platform.audio_ion();
        ion.bind(CbDevice(1), 0x5 << 32).unwrap();

        assert_eq!(ion.top_bits_of(0x5_8000_0000), 0x5);
        assert_eq!(ion.top_bits_of(0x8000_0000), 0);
    }

    #[cfg(feature = "dma-addr-32")]
    #[test]
    fn top_bits_come_from_sid() {
        let platform = MockPlatform::new();
        let ion = platform.audio_ion();
        assert_eq!(ion.top_bits_of(0x8000_0000), 0);

        ion.bind(CbDevice(1), 0x5 << 32).unwrap();
        assert_eq!(ion.top_bits_of(0x8000_0000), 0x5);
    }
}
