//! Delimiter splitting of a byte buffer into raw event spans.

use regex::bytes::Regex;

/// Result of splitting a buffer on an event delimiter.
#[derive(Debug, PartialEq, Eq)]
pub struct Split<'a> {
    /// Spans that were terminated by a delimiter match, in order. Delimiters
    /// are not included; two adjacent delimiters yield an empty span.
    pub events: Vec<&'a [u8]>,
    /// Bytes covered by `events` and their delimiters. Everything after this
    /// position is an unterminated remainder.
    pub consumed: usize,
}

impl<'a> Split<'a> {
    /// Trailing bytes not yet terminated by a delimiter.
    pub fn remainder(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.consumed..]
    }
}

/// Split `buf` on every non-empty match of `delimiter`.
///
/// Zero-length matches are ignored; configuration rejects delimiters that
/// match the empty string, so they can only come from look-around patterns.
pub fn split_events<'a>(delimiter: &Regex, buf: &'a [u8]) -> Split<'a> {
    let mut events = Vec::new();
    let mut start = 0;
    for m in delimiter.find_iter(buf) {
        if m.start() == m.end() {
            continue;
        }
        events.push(&buf[start..m.start()]);
        start = m.end();
    }
    Split {
        events,
        consumed: start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn newline() -> Regex {
        Regex::new("\n").unwrap()
    }

    #[test]
    fn splits_complete_lines() {
        let buf = b"first\nsecond\n";
        let split = split_events(&newline(), buf);
        assert_eq!(split.events, vec![&b"first"[..], &b"second"[..]]);
        assert_eq!(split.consumed, buf.len());
        assert!(split.remainder(buf).is_empty());
    }

    #[test]
    fn keeps_unterminated_tail_pending() {
        let buf = b"first\nsecond";
        let split = split_events(&newline(), buf);
        assert_eq!(split.events, vec![&b"first"[..]]);
        assert_eq!(split.remainder(buf), b"second");
    }

    #[test]
    fn no_delimiter_means_nothing_consumed() {
        let split = split_events(&newline(), b"partial");
        assert!(split.events.is_empty());
        assert_eq!(split.consumed, 0);
    }

    #[test]
    fn adjacent_delimiters_yield_empty_span() {
        let split = split_events(&newline(), b"a\n\nb\n");
        assert_eq!(split.events, vec![&b"a"[..], &b""[..], &b"b"[..]]);
    }

    #[test]
    fn multi_byte_and_pattern_delimiters() {
        let crlf = Regex::new("\r\n").unwrap();
        assert_eq!(
            split_events(&crlf, b"a\r\nb\nc\r\n").events,
            vec![&b"a"[..], &b"b\nc"[..]]
        );

        let stamped = Regex::new(r"\n(?:---\n)?").unwrap();
        assert_eq!(
            split_events(&stamped, b"one\n---\ntwo\n").events,
            vec![&b"one"[..], &b"two"[..]]
        );
    }

    proptest! {
        /// Re-joining the events with the delimiter and appending the
        /// remainder reproduces the input exactly.
        #[test]
        fn prop_split_round_trips(
            chunks in prop::collection::vec("[a-z =]{0,12}", 0..20),
            tail in "[a-z =]{0,12}",
        ) {
            let mut input = String::new();
            for chunk in &chunks {
                input.push_str(chunk);
                input.push('\n');
            }
            input.push_str(&tail);

            let buf = input.as_bytes();
            let split = split_events(&newline(), buf);

            let mut rebuilt = Vec::new();
            for event in &split.events {
                rebuilt.extend_from_slice(event);
                rebuilt.push(b'\n');
            }
            rebuilt.extend_from_slice(split.remainder(buf));

            prop_assert_eq!(rebuilt, buf.to_vec());
            prop_assert_eq!(split.events.len(), chunks.len());
            prop_assert_eq!(split.remainder(buf), tail.as_bytes());
        }

        /// Feeding the same bytes in arbitrary pieces, carrying the remainder
        /// forward, yields the same events as one pass over the whole input.
        #[test]
        fn prop_incremental_split_matches_whole(
            input in "[a-z\n]{0,64}",
            cuts in prop::collection::vec(0usize..64, 0..6),
        ) {
            let bytes = input.as_bytes();
            let whole: Vec<Vec<u8>> = split_events(&newline(), bytes)
                .events
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect();

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(bytes.len())).collect();
            cuts.push(bytes.len());
            cuts.sort_unstable();

            let mut pending = Vec::new();
            let mut incremental = Vec::new();
            let mut last = 0;
            for cut in cuts {
                pending.extend_from_slice(&bytes[last..cut]);
                last = cut;
                let split = split_events(&newline(), &pending);
                incremental.extend(split.events.iter().map(|e| e.to_vec()));
                let consumed = split.consumed;
                pending.drain(..consumed);
            }

            prop_assert_eq!(incremental, whole);
        }
    }
}
