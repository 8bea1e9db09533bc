//! Chunked framing, as defined in RFC 6242 section 4.2.
//!
//! A message is sent as one or more chunks, each a header giving the chunk size followed by that
//! many bytes of data, and then an end-of-chunks marker:
//!
//! ```text
//! \n#4\n
//! abcd
//! \n#2\n
//! ef
//! \n##\n
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::ensure;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{self, Error};
use crate::Result;

/// Largest chunk size the framing allows.
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// Default upper bound on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// "\n#" plus up to ten digits plus "\n".
const MAX_HEADER_LEN: usize = 13;

#[derive(Debug)]
pub struct ChunkedCodec {
    // Data from the chunks of the message being reassembled.
    message: BytesMut,
    max_message_size: usize,
}

impl ChunkedCodec {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            message: BytesMut::new(),
            max_message_size,
        }
    }
}

impl Default for ChunkedCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the digits of a chunk header.  The size has no leading zeros and is at least one.
fn parse_chunk_size(digits: &[u8]) -> Result<usize> {
    ensure!(
        !digits.is_empty() && digits.len() <= 10,
        error::FramingSnafu {
            msg: format!("chunk size has {} digits", digits.len()),
        }
    );
    ensure!(
        digits.iter().all(u8::is_ascii_digit),
        error::FramingSnafu {
            msg: "chunk size isn't a number",
        }
    );
    ensure!(
        digits[0] != b'0',
        error::FramingSnafu {
            msg: "chunk size can't start with zero",
        }
    );

    let size = digits
        .iter()
        .fold(0u64, |size, digit| size * 10 + u64::from(digit - b'0'));
    ensure!(
        size <= MAX_CHUNK_SIZE,
        error::FramingSnafu {
            msg: format!("chunk size {} is too large", size),
        }
    );
    usize::try_from(size).map_err(|_| Error::Framing {
        msg: format!("chunk size {} doesn't fit in memory", size),
    })
}

impl Decoder for ChunkedCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            // The shortest thing we can see is the end-of-chunks marker.
            if src.len() < 4 {
                return Ok(None);
            }
            ensure!(
                src[0] == b'\n' && src[1] == b'#',
                error::FramingSnafu {
                    msg: "expected chunk header",
                }
            );

            if src[2] == b'#' {
                ensure!(
                    src[3] == b'\n',
                    error::FramingSnafu {
                        msg: "malformed end-of-chunks marker",
                    }
                );
                src.advance(4);
                ensure!(
                    !self.message.is_empty(),
                    error::FramingSnafu {
                        msg: "end-of-chunks before any chunk",
                    }
                );
                return Ok(Some(self.message.split().freeze()));
            }

            let header_end = match src[2..].iter().position(|b| *b == b'\n') {
                Some(pos) => pos + 2,
                None => {
                    ensure!(
                        src.len() < MAX_HEADER_LEN,
                        error::FramingSnafu {
                            msg: "chunk header too long",
                        }
                    );
                    return Ok(None);
                }
            };
            let size = parse_chunk_size(&src[2..header_end])?;
            ensure!(
                self.message.len() + size <= self.max_message_size,
                error::MessageTooLargeSnafu {
                    size: self.message.len() + size,
                    max: self.max_message_size,
                }
            );

            let frame_len = header_end + 1 + size;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }
            src.advance(header_end + 1);
            let data = src.split_to(size);
            self.message.extend_from_slice(&data);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.message.is_empty() => Ok(None),
            None => error::FramingSnafu {
                msg: "stream ended inside a message",
            }
            .fail(),
        }
    }
}

impl Encoder<Bytes> for ChunkedCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        ensure!(
            !item.is_empty(),
            error::FramingSnafu {
                msg: "can't send an empty message",
            }
        );
        ensure!(
            item.len() <= self.max_message_size,
            error::MessageTooLargeSnafu {
                size: item.len(),
                max: self.max_message_size,
            }
        );

        // MAX_CHUNK_SIZE fits in a u32, so it fits in usize on anything we run on.
        let max_chunk = usize::try_from(MAX_CHUNK_SIZE).unwrap_or(usize::MAX);
        for chunk in item.chunks(max_chunk) {
            let header = format!("\n#{}\n", chunk.len());
            dst.reserve(header.len() + chunk.len());
            dst.put_slice(header.as_bytes());
            dst.put_slice(chunk);
        }
        dst.put_slice(b"\n##\n");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::ChunkedCodec;
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    fn decode_all(input: &[u8]) -> Vec<Bytes> {
        let mut codec = ChunkedCodec::new();
        let mut src = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn single_chunk() {
        let frames = decode_all(b"\n#5\nhello\n##\n");
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn multiple_chunks_and_messages() {
        let frames = decode_all(b"\n#4\nabcd\n#2\nef\n##\n\n#3\nxyz\n##\n");
        assert_eq!(
            frames,
            vec![Bytes::from_static(b"abcdef"), Bytes::from_static(b"xyz")]
        );
    }

    #[test]
    fn partial_input_waits() {
        let mut codec = ChunkedCodec::new();
        let mut src = BytesMut::from(&b"\n#10\nhello"[..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(b" band\n#");
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(b"#\n");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Bytes::from_static(b"hello band"))
        );
        assert!(src.is_empty());
    }

    #[test]
    fn bad_headers() {
        for input in &[
            &b"garbage\n##\n"[..],
            &b"\n#0\n\n##\n"[..],
            &b"\n#012\nabcdefghijkl\n##\n"[..],
            &b"\n#x\na\n##\n"[..],
            &b"\n#99999999999\n"[..],
            &b"\n#4294967296\n"[..],
            &b"\n##\n"[..],
            &b"\n##x"[..],
        ] {
            let mut codec = ChunkedCodec::new();
            let mut src = BytesMut::from(*input);
            assert!(codec.decode(&mut src).is_err(), "{:?}", input);
        }
    }

    #[test]
    fn message_size_limit() {
        let mut codec = ChunkedCodec::with_max_message_size(4);
        let mut src = BytesMut::from(&b"\n#3\nabc\n#3\ndef\n##\n"[..]);
        codec.decode(&mut src).unwrap_err();
    }

    #[test]
    fn eof_inside_message() {
        let mut codec = ChunkedCodec::new();
        let mut src = BytesMut::from(&b"\n#3\nabc"[..]);
        codec.decode_eof(&mut src).unwrap_err();

        let mut codec = ChunkedCodec::new();
        let mut empty = BytesMut::new();
        assert_eq!(codec.decode_eof(&mut empty).unwrap(), None);
    }

    #[test]
    fn encode() {
        let mut codec = ChunkedCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"{\"ok\":true}"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &b"\n#11\n{\"ok\":true}\n##\n"[..]);

        codec.encode(Bytes::new(), &mut dst).unwrap_err();
    }
}
