use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;

use crate::ByteStream;

/// Re-slice a byte stream into chunks of exactly `chunk_size` bytes.
///
/// Only the final chunk may be shorter. Input is buffered up to one chunk
/// at a time, never the whole payload. Callers feeding `append` use this to
/// coalesce small writes up to the provider's minimum part size.
pub fn rechunk<S>(stream: S, chunk_size: usize) -> ByteStream
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let mut input = Box::pin(stream);

    let output = async_stream::stream! {
        let mut buffer = BytesMut::with_capacity(chunk_size);
        while let Some(chunk) = input.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    while buffer.len() >= chunk_size {
                        yield Ok(buffer.split_to(chunk_size).freeze());
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if !buffer.is_empty() {
            yield Ok(buffer.freeze());
        }
    };
    Box::pin(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(
        pieces: &[&'static [u8]],
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let pieces: Vec<Result<Bytes, std::io::Error>> =
            pieces.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        futures_util::stream::iter(pieces)
    }

    #[tokio::test]
    async fn coalesces_and_splits_to_fixed_size() {
        let chunks: Vec<Bytes> = rechunk(source(&[b"ab", b"cdefg", b"h", b"ijk"]), 4)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec![Bytes::from("abcd"), Bytes::from("efgh"), Bytes::from("ijk")]);
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let chunks: Vec<_> = rechunk(source(&[]), 4).collect().await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn stops_after_an_error() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "cut")),
            Ok(Bytes::from_static(b"cd")),
        ];
        let out: Vec<_> = rechunk(futures_util::stream::iter(items), 4).collect().await;

        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());
    }
}
