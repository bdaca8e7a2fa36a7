//! IOMMU (SMMU) 地址翻译提供者接口

use axerrno::AxResult;

/// context bank 设备句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CbDevice(pub u32);

/// IOMMU 翻译窗口句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct IommuMappingId(pub u64);

/// 地址翻译提供者
pub trait IommuOps: Send + Sync {
    /// 在 `[base, base + size)` 创建翻译窗口
    fn create_mapping(&self, base: usize, size: usize) -> AxResult<IommuMappingId>;

    /// 把设备挂到翻译窗口上
    fn attach_device(&self, dev: CbDevice, mapping: IommuMappingId) -> AxResult;

    fn detach_device(&self, dev: CbDevice);

    fn release_mapping(&self, mapping: IommuMappingId);
}
