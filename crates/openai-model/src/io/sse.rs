use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Chunks(ChunksError),
    InvalidUtf8,
}

/// Reads the `data` payloads of server-sent events from a chunk stream.
///
/// Only the subset of the format used by chat completion streams is
/// understood: `data` fields (several of them are joined with a line feed),
/// comments, and blank-line terminated events. Other fields such as `event`
/// or `id` are ignored.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
    exhausted: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.chunks.next_chunk().await.map_err(Error::Chunks)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }

    /// Tries to take one complete event out of the buffer. Events without
    /// any `data` field are skipped.
    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            let Some((end, sep_len)) = find_event_end(&self.buf) else {
                return Ok(None);
            };
            // Bytes are only decoded once the event is complete, so that a
            // multi-byte character split across chunks is handled.
            let block = std::str::from_utf8(&self.buf[..end])
                .map_err(|_| Error::InvalidUtf8)?;

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => {
                        (field, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if field == "data" {
                    let data = data.get_or_insert_with(String::new);
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(value);
                }
            }

            self.buf.drain(..end + sep_len);
            if let Some(data) = data {
                return Ok(Some(data));
            }
        }
    }
}

/// Finds the end of the first event, returns its length and the length of
/// the blank-line separator that follows.
fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut idx = 0;
    while idx < buf.len() {
        for sep in [&b"\r\n\r\n"[..], b"\n\n", b"\r\r"] {
            if buf[idx..].starts_with(sep) {
                return Some((idx, sep.len()));
            }
        }
        idx += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_normal_events() {
        let chunks =
            Chunks::canned([&b"data: hello\n\n"[..], b"data: bye\n\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_across_chunks() {
        let chunks = Chunks::canned([
            &b"data:"[..],
            b" hel",
            b"lo\r\n",
            b"\r\ndata: \xe4\xbd",
            b"\xa0\xe5\xa5\xbd\n\n",
        ]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "你好");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_comments_and_other_fields() {
        let chunks = Chunks::canned([
            &b": keep-alive\n\n"[..],
            b"event: message\nid: 7\ndata: first\ndata: second\n\n",
            b"retry: 1000\n\n",
        ]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "first\nsecond");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incomplete_and_invalid_data() {
        let chunks = Chunks::canned([&b"data: hello\n"[..]]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let chunks = Chunks::canned([&b"data: \xff\xfe\n\n"[..]]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidUtf8);
    }
}
