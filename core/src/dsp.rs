//! aDSP 子系统状态

/// aDSP (Q6) 子系统状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Q6State {
    Down,
    Up,
    Loaded,
}

/// 查询 aDSP 是否就绪
pub trait DspState {
    fn q6_state(&self) -> Q6State;
}
