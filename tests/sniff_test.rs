//! Content Sniffing Integration Tests

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mizuchi_s3_engine::sniff::{
        classify, sniff, DEFAULT_CONTENT_TYPE, PNG_SIGNATURE, SVG_CONTENT_TYPE,
    };
    use mizuchi_s3_engine::stream;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_png_signature() {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(b"\0\0\0\rIHDR");
        let (mime, body) = sniff(stream::from_bytes(data.clone())).await.unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(&stream::collect(body).await.unwrap()[..], &data[..]);
    }

    #[tokio::test]
    async fn test_svg_document() {
        let doc = br#"<?xml version="1.0"?>
<!-- drawn by hand -->
<!DOCTYPE svg [
  <!ENTITY logo "mizuchi">
]>
<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"/>"#;
        let (mime, _) = sniff(stream::from_bytes(&doc[..])).await.unwrap();
        assert_eq!(mime, SVG_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_svg_with_byte_order_mark() {
        for doc in [
            "\u{FEFF}<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>",
            "\u{FEFF}<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>",
        ] {
            let (mime, body) = sniff(stream::from_bytes(doc)).await.unwrap();
            assert_eq!(mime, SVG_CONTENT_TYPE);
            // The mark stays in the stored bytes
            assert_eq!(&stream::collect(body).await.unwrap()[..], doc.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_unknown_content_falls_back() {
        let (mime, _) = sniff(stream::from_bytes("just some words")).await.unwrap();
        assert_eq!(mime, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_empty_body() {
        let (mime, body) = sniff(stream::from_chunks(Vec::<Bytes>::new())).await.unwrap();
        assert_eq!(mime, DEFAULT_CONTENT_TYPE);
        assert!(stream::collect(body).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_first_chunk_is_inspected() {
        let chunks = vec![
            Bytes::from_static(b""),
            Bytes::from_static(b"plain prefix "),
            Bytes::copy_from_slice(PNG_SIGNATURE),
        ];
        let (mime, body) = sniff(stream::from_chunks(chunks)).await.unwrap();
        assert_eq!(mime, DEFAULT_CONTENT_TYPE);

        let mut expected = b"plain prefix ".to_vec();
        expected.extend_from_slice(PNG_SIGNATURE);
        assert_eq!(&stream::collect(body).await.unwrap()[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_exact() {
        let chunks: Vec<Bytes> = (0..64u8)
            .map(|i| Bytes::from(vec![i; 1000 + i as usize]))
            .collect();
        let expected: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();

        let (_, body) = sniff(stream::from_chunks(chunks)).await.unwrap();
        assert_eq!(&stream::collect(body).await.unwrap()[..], &expected[..]);
    }

    #[test]
    fn test_whitespace_run_after_doctype_is_fast() {
        let mut input = b"<!doctype svg".to_vec();
        input.extend(std::iter::repeat(b' ').take(50_000));

        let start = Instant::now();
        let mime = classify(&input);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(mime, DEFAULT_CONTENT_TYPE);
    }
}
