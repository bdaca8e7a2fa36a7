//! Audio ION 错误类型定义

use core::fmt;

use axerrno::AxError;

/// Audio ION 错误类型
///
/// 外部资源操作失败时携带平台返回的 [`AxError`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IonError {
    /// SMMU 尚未绑定（probe 未完成），稍后可重试
    NotReady,
    /// 无效参数
    InvalidArg,
    /// 内存不足
    NoMemory,
    /// 无法获取缓冲区属性
    InvalidBuffer,
    /// 缓冲区已登记
    BufferExists,
    /// 没有该缓冲区的分配记录
    BufferNotFound,
    /// 缓冲区没有内核映射
    NotMapped,
    /// 缓冲区已有内核映射
    AlreadyMapped,
    /// attach 失败
    AttachFailed(AxError),
    /// 映射失败
    MapFailed(AxError),
    /// 解除映射失败
    UnmapFailed(AxError),
    /// 进入/退出 CPU 访问区间失败
    CpuAccess(AxError),
    /// 对非缓存缓冲区执行缓存操作
    NotCacheable,
    /// 无效的缓存操作码
    InvalidCacheOp(u32),
    /// 缓冲区没有页（例如 carveout 内存），无法映射到用户态
    InvalidSource,
}

impl fmt::Display for IonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "SMMU binding not ready"),
            Self::InvalidArg => write!(f, "Invalid argument"),
            Self::NoMemory => write!(f, "Out of memory"),
            Self::InvalidBuffer => write!(f, "Invalid buffer"),
            Self::BufferExists => write!(f, "Buffer already exists"),
            Self::BufferNotFound => write!(f, "Buffer not found"),
            Self::NotMapped => write!(f, "Buffer has no kernel mapping"),
            Self::AlreadyMapped => write!(f, "Buffer is already kernel mapped"),
            Self::AttachFailed(e) => write!(f, "Attach failed: {e:?}"),
            Self::MapFailed(e) => write!(f, "Map failed: {e:?}"),
            Self::UnmapFailed(e) => write!(f, "Unmap failed: {e:?}"),
            Self::CpuAccess(e) => write!(f, "CPU access transition failed: {e:?}"),
            Self::NotCacheable => write!(f, "Cache operation on uncached buffer"),
            Self::InvalidCacheOp(op) => write!(f, "Invalid cache operation {op}"),
            Self::InvalidSource => write!(f, "Buffer has no backing pages"),
        }
    }
}

impl From<IonError> for AxError {
    fn from(err: IonError) -> Self {
        match err {
            IonError::NotReady => AxError::WouldBlock,
            IonError::InvalidArg
            | IonError::InvalidBuffer
            | IonError::NotMapped
            | IonError::AlreadyMapped
            | IonError::NotCacheable
            | IonError::InvalidCacheOp(_)
            | IonError::InvalidSource => AxError::InvalidInput,
            IonError::NoMemory => AxError::NoMemory,
            IonError::BufferNotFound => AxError::NotFound,
            IonError::BufferExists => AxError::AlreadyExists,
            IonError::AttachFailed(e)
            | IonError::MapFailed(e)
            | IonError::UnmapFailed(e)
            | IonError::CpuAccess(e) => e,
        }
    }
}

pub type IonResult<T> = Result<T, IonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_is_retryable() {
        assert_eq!(AxError::from(IonError::NotReady), AxError::WouldBlock);
    }

    #[test]
    fn platform_cause_is_propagated() {
        let err = IonError::MapFailed(AxError::NoMemory);
        assert_eq!(AxError::from(err), AxError::NoMemory);
        assert_eq!(AxError::from(IonError::BufferNotFound), AxError::NotFound);
    }
}
