//! 流帧 (StreamFrame).
//!
//! 管线中流转的最小单位: 一段不透明的媒体数据和它的序号.
//! 帧的所有权依次从读取端转移给插件, 再转移给写入端, 不共享.

use bytes::Bytes;

/// 媒体流帧
///
/// 序号从 1 开始, 在同一条流中严格递增.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamFrame {
    /// 帧序号
    pub sequence: u64,
    /// 帧数据
    pub data: Bytes,
}

impl StreamFrame {
    /// 创建帧
    pub fn new(sequence: u64, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    /// 保留序号, 替换数据
    pub fn with_data(self, data: impl Into<Bytes>) -> Self {
        Self {
            sequence: self.sequence,
            data: data.into(),
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空帧
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
