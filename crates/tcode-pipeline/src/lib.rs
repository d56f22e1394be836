//! # tcode-pipeline
//!
//! 流式转码管线: 帧读取端与写入端、外部工具适配、单任务执行.
//!
//! 一个任务内, 读取任务与处理循环通过容量为 1 的通道连接, 同一时刻最多
//! 只有一帧在途. 任务之间不共享可变状态.

pub mod external;
pub mod io;
pub mod pipeline;
pub mod worker;

pub use external::{ExternalToolAdapter, ToolSession};
pub use io::{
    ChunkedFileSource, FileSink, FrameSink, FrameSource, MemorySink, MemorySource,
    RiffChunkSource, open_sink, open_source,
};
pub use pipeline::{Pipeline, Summary};
pub use worker::{JobHandle, spawn_job};
