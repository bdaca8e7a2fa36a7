//! probe 配置
//!
//! 对应设备树节点 `qcom,msm-audio-ion` 中的属性。

use msm_audio_api::dev::ion::{IonError, IonResult, MSM_AUDIO_SMMU_SID_OFFSET};

/// 唯一支持的 SMMU 版本
pub const SUPPORTED_SMMU_VERSION: u32 = 2;

/// audio ION 的 probe 配置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioIonConfig {
    /// `qcom,smmu-version`
    pub smmu_version: Option<u32>,
    /// `qcom,smmu-sid-mask`，缺省为全 1
    pub smmu_sid_mask: Option<u64>,
    /// `iommus` 的第一个参数
    pub iommu_sid: Option<u64>,
}

impl AudioIonConfig {
    /// 检查 SMMU 版本
    pub fn validate(&self) -> IonResult<u32> {
        let Some(version) = self.smmu_version else {
            error!("qcom,smmu-version missing in DT node");
            return Err(IonError::InvalidArg);
        };
        debug!("SMMU version is ({})", version);
        if version != SUPPORTED_SMMU_VERSION {
            error!("smmu version invalid {}", version);
            return Err(IonError::InvalidArg);
        }
        Ok(version)
    }

    /// 折叠进总线地址的 SID 位
    pub fn sid_bits(&self) -> u64 {
        let mask = self.smmu_sid_mask.unwrap_or_else(|| {
            warn!("qcom,smmu-sid-mask missing in DT node, using default");
            u64::MAX
        });
        let sid = match self.iommu_sid {
            Some(sid) => sid & mask,
            None => {
                error!("could not get smmu SID");
                0
            }
        };
        sid << MSM_AUDIO_SMMU_SID_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_bits_are_masked_and_shifted() {
        let config = AudioIonConfig {
            smmu_version: Some(2),
            smmu_sid_mask: Some(0xf),
            iommu_sid: Some(0x35),
        };
        assert_eq!(config.sid_bits(), 0x5 << 32);
    }

    #[test]
    fn missing_mask_keeps_full_sid() {
        let config = AudioIonConfig {
            iommu_sid: Some(0x35),
            ..Default::default()
        };
        assert_eq!(config.sid_bits(), 0x35 << 32);
    }

    #[test]
    fn missing_sid_is_zero() {
        assert_eq!(AudioIonConfig::default().sid_bits(), 0);
    }

    #[test]
    fn only_version_two_is_supported() {
        let mut config = AudioIonConfig::default();
        assert_eq!(config.validate(), Err(IonError::InvalidArg));
        config.smmu_version = Some(1);
        assert_eq!(config.validate(), Err(IonError::InvalidArg));
        config.smmu_version = Some(2);
        assert_eq!(config.validate(), Ok(2));
    }
}
