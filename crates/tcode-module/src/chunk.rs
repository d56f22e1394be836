//! RIFF 风格分块.
//!
//! 布局: 4 字节标签 + 4 字节小端长度 + 负载, 负载长度为奇数时补一个 0 字节.
//! 与 AVI `movi` 列表中的 `00dc` (视频) / `01wb` (音频) 分块一致.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use tcode_core::{TcError, TcResult};

/// 分块头大小
pub const CHUNK_HEADER_SIZE: usize = 8;

/// 压缩视频分块标签
pub const VIDEO_CHUNK_TAG: [u8; 4] = *b"00dc";

/// 音频分块标签
pub const AUDIO_CHUNK_TAG: [u8; 4] = *b"01wb";

/// 分块头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// 分块标签
    pub tag: [u8; 4],
    /// 负载长度 (不含补齐字节)
    pub size: u32,
}

impl ChunkHeader {
    /// 解析分块头
    pub fn parse(buf: &[u8]) -> TcResult<Self> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(TcError::InvalidData(format!(
                "分块头不完整: {} 字节",
                buf.len()
            )));
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&buf[..4]);
        let size = LittleEndian::read_u32(&buf[4..8]);
        Ok(Self { tag, size })
    }

    /// 序列化分块头
    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out[..4].copy_from_slice(&self.tag);
        LittleEndian::write_u32(&mut out[4..8], self.size);
        out
    }

    /// 负载后的补齐字节数
    pub fn padding(&self) -> usize {
        (self.size & 1) as usize
    }

    /// 标签的可读形式
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

/// 将负载包装为分块 (含补齐)
pub fn wrap_chunk(tag: [u8; 4], payload: &[u8]) -> TcResult<Bytes> {
    let size = u32::try_from(payload.len()).map_err(|_| {
        TcError::InvalidData(format!("负载过大, 无法放入分块: {} 字节", payload.len()))
    })?;
    let header = ChunkHeader { tag, size };
    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + payload.len() + header.padding());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(payload);
    if header.padding() == 1 {
        buf.put_u8(0);
    }
    Ok(buf.freeze())
}

/// 取出分块负载
///
/// `data` 必须是一个完整分块 (补齐字节可有可无), 标签须与 `expected` 一致.
pub fn unwrap_chunk(data: &Bytes, expected: [u8; 4]) -> TcResult<Bytes> {
    let header = ChunkHeader::parse(data)?;
    if header.tag != expected {
        return Err(TcError::InvalidData(format!(
            "分块标签不匹配: 期望 {}, 实际 {}",
            String::from_utf8_lossy(&expected),
            header.tag_str()
        )));
    }
    let end = CHUNK_HEADER_SIZE + header.size as usize;
    let total = data.len();
    if total != end && total != end + header.padding() {
        return Err(TcError::InvalidData(format!(
            "分块长度不一致: 头部声明 {} 字节, 实际 {} 字节",
            header.size,
            total.saturating_sub(CHUNK_HEADER_SIZE)
        )));
    }
    Ok(data.slice(CHUNK_HEADER_SIZE..end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_奇数长度负载补齐() {
        let chunk = wrap_chunk(VIDEO_CHUNK_TAG, b"abc").unwrap();
        assert_eq!(chunk.len(), 8 + 3 + 1);
        assert_eq!(&chunk[..4], b"00dc");
        assert_eq!(&chunk[4..8], &[3, 0, 0, 0]);
        assert_eq!(chunk[11], 0);

        let chunk = wrap_chunk(VIDEO_CHUNK_TAG, b"ab").unwrap();
        assert_eq!(chunk.len(), 10);
    }

    #[test]
    fn test_取出负载() {
        let chunk = wrap_chunk(VIDEO_CHUNK_TAG, b"hello").unwrap();
        assert_eq!(&unwrap_chunk(&chunk, VIDEO_CHUNK_TAG).unwrap()[..], b"hello");
        // 不带补齐字节同样接受
        let trimmed = chunk.slice(..chunk.len() - 1);
        assert_eq!(&unwrap_chunk(&trimmed, VIDEO_CHUNK_TAG).unwrap()[..], b"hello");
    }

    #[test]
    fn test_标签或长度错误() {
        let chunk = wrap_chunk(AUDIO_CHUNK_TAG, b"data").unwrap();
        assert!(matches!(
            unwrap_chunk(&chunk, VIDEO_CHUNK_TAG),
            Err(TcError::InvalidData(_))
        ));

        let truncated = chunk.slice(..6);
        assert!(unwrap_chunk(&truncated, AUDIO_CHUNK_TAG).is_err());

        let short = chunk.slice(..10);
        assert!(unwrap_chunk(&short, AUDIO_CHUNK_TAG).is_err());
    }

    #[test]
    fn test_分块头序列化() {
        let header = ChunkHeader {
            tag: *b"01wb",
            size: 0x0102_0304,
        };
        let bytes = header.to_bytes();
        assert_eq!(ChunkHeader::parse(&bytes).unwrap(), header);
        assert_eq!(header.tag_str(), "01wb");
        assert_eq!(header.padding(), 0);
    }
}
