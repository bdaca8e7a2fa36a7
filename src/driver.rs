//! audio ION 平台驱动

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};

use msm_audio_api::dev::ion::{AudioIon, IonError, IonResult};
use msm_audio_core::{CbDevice, DspState, Q6State};

use crate::config::AudioIonConfig;

/// probe 已完成
pub const MSM_AUDIO_ION_PROBED: u8 = 1 << 0;

/// audio ION 平台驱动
pub struct AudioIonDriver {
    ion: Arc<AudioIon>,
    device_status: AtomicU8,
}

impl AudioIonDriver {
    pub fn new(ion: Arc<AudioIon>) -> Self {
        Self {
            ion,
            device_status: AtomicU8::new(0),
        }
    }

    pub fn ion(&self) -> &Arc<AudioIon> {
        &self.ion
    }

    pub fn is_probed(&self) -> bool {
        self.device_status.load(Ordering::SeqCst) & MSM_AUDIO_ION_PROBED != 0
    }

    /// probe context bank 设备
    ///
    /// aDSP 尚未启动时返回 `NotReady`，调用者应稍后重试。
    pub fn probe(
        &self,
        cb_dev: CbDevice,
        config: &AudioIonConfig,
        dsp: &dyn DspState,
    ) -> IonResult<()> {
        config.validate()?;

        let q6_state = dsp.q6_state();
        if q6_state == Q6State::Down {
            debug!("deferring probe, adsp_state {:?}", q6_state);
            return Err(IonError::NotReady);
        }
        debug!("adsp is ready");

        let sid_bits = config.sid_bits();
        self.ion.bind(cb_dev, sid_bits).inspect_err(|e| {
            error!("smmu init failed, err = {:?}", e);
        })?;

        self.device_status
            .fetch_or(MSM_AUDIO_ION_PROBED, Ordering::SeqCst);
        info!("msm-audio-ion probed on {:?}", cb_dev);
        Ok(())
    }

    /// remove：解除 SMMU 绑定并清除状态
    pub fn remove(&self) {
        let live = self.ion.buffer_count();
        if live > 0 {
            warn!("Removing msm-audio-ion with {} live buffers", live);
        }
        self.ion.unbind();
        self.device_status.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use msm_audio_api::dev::ion::{
        MSM_AUDIO_ION_VA_LEN, MSM_AUDIO_ION_VA_START,
        mock::{MockDsp, MockPlatform},
    };

    use super::*;

    fn config() -> AudioIonConfig {
        AudioIonConfig {
            smmu_version: Some(2),
            smmu_sid_mask: Some(0xf),
            iommu_sid: Some(0x5),
        }
    }

    #[test]
    fn probe_defers_until_dsp_is_up() {
        let platform = MockPlatform::new();
        let driver = AudioIonDriver::new(Arc::new(platform.audio_ion()));

        assert_eq!(
            driver.probe(CbDevice(2), &config(), &MockDsp(Q6State::Down)),
            Err(IonError::NotReady)
        );
        assert!(!driver.is_probed());
        assert_eq!(driver.ion().allocate(4096).unwrap_err(), IonError::NotReady);

        driver
            .probe(CbDevice(2), &config(), &MockDsp(Q6State::Up))
            .unwrap();
        assert!(driver.is_probed());
        assert!(platform.iommu_attached(CbDevice(2)));
        assert_eq!(
            platform.iommu_window(),
            Some((MSM_AUDIO_ION_VA_START, MSM_AUDIO_ION_VA_LEN))
        );
    }

    #[test]
    fn bad_version_fails_probe() {
        let platform = MockPlatform::new();
        let driver = AudioIonDriver::new(Arc::new(platform.audio_ion()));
        let config = AudioIonConfig {
            smmu_version: Some(1),
            ..config()
        };

        assert_eq!(
            driver.probe(CbDevice(2), &config, &MockDsp(Q6State::Up)),
            Err(IonError::InvalidArg)
        );
        assert!(!driver.is_probed());
        assert_eq!(platform.iommu_window(), None);
    }

    #[cfg(not(feature = "dma-addr-32"))]
    #[test]
    fn probed_driver_serves_allocations() {
        let platform = MockPlatform::new();
        platform.set_dma_base(0x8000_0000);
        let driver = AudioIonDriver::new(Arc::new(platform.audio_ion()));
        driver
            .probe(CbDevice(2), &config(), &MockDsp(Q6State::Loaded))
            .unwrap();

        let alloc = driver.ion().allocate(4096).unwrap();
        assert_eq!(alloc.paddr, 0x5_8000_0000);
        assert_eq!(driver.ion().top_bits_of(alloc.paddr), 0x5);
        driver.ion().free(alloc.buf).unwrap();
    }

    #[test]
    fn remove_unbinds() {
        let platform = MockPlatform::new();
        let driver = AudioIonDriver::new(Arc::new(platform.audio_ion()));
        driver
            .probe(CbDevice(2), &config(), &MockDsp(Q6State::Up))
            .unwrap();

        driver.remove();
        assert!(!driver.is_probed());
        assert!(!driver.ion().is_ready());
        assert!(!platform.iommu_attached(CbDevice(2)));
        assert_eq!(platform.iommu_window(), None);
    }
}
