use futures::{Stream, StreamExt};
use regex::Regex;
use tracing::debug;

use super::parse::extract_balance;

/// Scan a streamed HTML body for the balance label, stopping early.
///
/// Returns as soon as the pattern matches with at least one byte after the
/// match, so a number split across chunks is never cut short. The stream is
/// dropped on return, which aborts the rest of the transfer. A match that runs
/// to the very end of the body is accepted once the stream finishes.
pub async fn scan_balance_stream<S, B, E>(mut body: S, pattern: &Regex) -> Result<Option<u64>, E>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunks = 0usize;

    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(chunk?.as_ref());
        chunks += 1;

        let text = String::from_utf8_lossy(&buffer);
        if let Some(m) = pattern.find(&text) {
            if m.end() < text.len() {
                debug!("balance label found after {} chunks ({} bytes)", chunks, buffer.len());
                return Ok(extract_balance(&text, pattern));
            }
        }
    }

    let text = String::from_utf8_lossy(&buffer);
    Ok(extract_balance(&text, pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pattern() -> Regex {
        Regex::new(r"Balance:\s*(\d+)").unwrap()
    }

    #[tokio::test]
    async fn stops_reading_once_label_is_complete() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let chunks = vec!["<html><a>Bal", "ance: 12", "34</a>", "<p>tail</p>", "<p>more</p>"];
        let body = stream::iter(chunks).map(move |c| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(c.as_bytes().to_vec())
        });

        let balance = scan_balance_stream(Box::pin(body), &pattern()).await.unwrap();
        assert_eq!(balance, Some(1234));
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn match_at_end_of_body_is_accepted() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(b"Balance: 77".to_vec())]);
        assert_eq!(scan_balance_stream(body, &pattern()).await.unwrap(), Some(77));
    }

    #[tokio::test]
    async fn missing_label_is_none() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(b"<html>logged out</html>".to_vec())]);
        assert_eq!(scan_balance_stream(body, &pattern()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let body = stream::iter(vec![
            Ok(b"<html>".to_vec()),
            Err(std::io::Error::other("reset")),
        ]);
        assert!(scan_balance_stream(body, &pattern()).await.is_err());
    }
}
