//! Property tests for chunk coverage and size bounds.

use policy_rag::Chunker;
use proptest::prelude::*;

/// Text built from words, sentence ends, line breaks and some multibyte chars.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            4 => "[a-z]{1,9}".prop_map(|w| format!("{w} ")),
            1 => Just(". ".to_string()),
            1 => Just("\n".to_string()),
            1 => Just("\n\n".to_string()),
            1 => Just("é€ ".to_string()),
        ],
        1..120,
    )
    .prop_map(|parts| parts.concat())
}

/// Drop each chunk's overlap with its predecessor and concatenate.
fn reconstruct(chunks: &[policy_rag::Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0;
    for chunk in chunks {
        let skip = covered - chunk.start_offset;
        out.extend(chunk.text.chars().skip(skip));
        covered = chunk.end_offset;
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunks_reconstruct_the_text_exactly(
        text in arb_text(),
        chunk_size in 5usize..120,
        overlap_ratio in 0.0f64..0.9,
    ) {
        let overlap = ((chunk_size as f64) * overlap_ratio) as usize;
        let chunker = Chunker::new(chunk_size, overlap).unwrap();
        let chunks = chunker.split(&text).unwrap();

        prop_assert_eq!(chunks[0].start_offset, 0);
        prop_assert_eq!(chunks.last().unwrap().end_offset, text.chars().count());
        prop_assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn chunks_are_bounded_ordered_and_overlap_at_most_configured(
        text in arb_text(),
        chunk_size in 5usize..120,
        overlap_ratio in 0.0f64..0.9,
    ) {
        let overlap = ((chunk_size as f64) * overlap_ratio) as usize;
        let chunks = Chunker::new(chunk_size, overlap).unwrap().split(&text).unwrap();

        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.id, i);
            prop_assert!(chunk.len() <= chunk_size);
            prop_assert!(!chunk.is_empty());
            prop_assert_eq!(chunk.text.chars().count(), chunk.len());
        }
        for pair in chunks.windows(2) {
            prop_assert!(pair[1].start_offset > pair[0].start_offset);
            prop_assert!(pair[1].start_offset <= pair[0].end_offset);
            prop_assert!(pair[0].end_offset - pair[1].start_offset <= overlap);
        }
    }

    #[test]
    fn fixed_chunker_is_deterministic(text in arb_text(), chunk_size in 5usize..60) {
        let chunker = Chunker::fixed(chunk_size, chunk_size / 5).unwrap();
        prop_assert_eq!(chunker.split(&text).unwrap(), chunker.split(&text).unwrap());
    }
}
