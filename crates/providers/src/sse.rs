//! SSE 行解码
//!
//! 上游分片可能在任意字节处截断（包括 UTF-8 字符中间），
//! 这里缓冲到完整行后才吐出 `data:` 负载。

/// SSE 数据行缓冲
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字节，返回本次凑齐的 `data:` 负载（不含前缀）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(payload) = parse_data_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// 流结束时处理最后一行（可能没有换行符）
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        parse_data_line(&line)
    }
}

fn parse_data_line(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(|c: char| c == '\r' || c == '\n');
    let payload = text.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.is_empty() {
        return None;
    }
    Some(payload.to_string())
}

/// 是否为流结束标记
pub fn is_done(payload: &str) -> bool {
    payload.trim() == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"a\":").is_empty());
        let payloads = buffer.push(b"1}\n\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
        assert!(is_done(&payloads[1]));
    }

    #[test]
    fn test_multibyte_char_split() {
        let line = "data: {\"c\":\"你好\"}\n".as_bytes();
        let (head, tail) = line.split_at(13);
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(head).is_empty());
        assert_eq!(buffer.push(tail), vec!["{\"c\":\"你好\"}".to_string()]);
    }

    #[test]
    fn test_ignores_comments_and_events() {
        let mut buffer = SseLineBuffer::new();
        let payloads = buffer.push(b": keep-alive\r\nevent: ping\r\ndata:{\"x\":2}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"x\":2}".to_string()]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: tail").is_empty());
        assert_eq!(buffer.finish(), Some("tail".to_string()));
        assert_eq!(buffer.finish(), None);
    }
}
