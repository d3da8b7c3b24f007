//! 编排核心的领域模型：任务、处理器契约与监控事件

pub mod events;
pub mod handler;
pub mod ports;
pub mod task;

pub use events::{mask_secret, DomainEvent, EventBus, EventKind, MonitorEvent};
pub use handler::{handler_fn, FnHandler, TaskHandler};
pub use ports::{ProbeOutcome, ProxyProbe};
pub use task::{Priority, Schedule, Task, TaskId, TaskRequest};
