//! ember 的 GFX 层
//!
//! 在 [`backend::RhiBackend`] 之上提供按帧流水线的资源管理与命令录制：
//! 句柄与引用计数、每帧的线性分配器、延迟销毁、带脏标记的 command context，
//! 以及 render pass / framebuffer / pipeline 的缓存。
//! 所有状态归 [`device::Device`] 所有。
//!
//! 后端有两个：Vulkan 参考实现，以及用于测试的 headless 模拟。

pub mod backend;
pub mod cache;
pub mod commands;
pub mod config;
pub mod desc;
pub mod device;
pub mod error;
pub mod frame;
pub mod handles;
pub mod stats;
