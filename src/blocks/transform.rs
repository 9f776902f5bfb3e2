//! Rewrites selected test spans into line comments
//!
//! Every line of a span gets [`INERT_PREFIX`]; an empty line becomes the bare
//! [`INERT_MARKER`]. Newlines are never added or removed, so line numbers in
//! the output match the original.

use super::TestSpan;
use crate::error::TransformError;

/// Prefix for a non-empty neutralized line
pub const INERT_PREFIX: &str = "// ";

/// Replacement for an empty neutralized line
pub const INERT_MARKER: &str = "//";

/// Neutralize `spans` in `content`.
///
/// Spans are indices into the untouched original. Pieces are produced from
/// the highest offset down and joined once at the end, so no offset is ever
/// shifted by an earlier replacement. A span lying entirely inside another
/// one is already covered and is dropped.
pub fn neutralize(content: &str, spans: &[TestSpan]) -> Result<String, TransformError> {
    let ranges = normalized_ranges(content, spans)?;

    let mut pieces: Vec<String> = Vec::with_capacity(ranges.len() * 2 + 1);
    let mut tail_start = content.len();
    for &(start, end) in ranges.iter().rev() {
        pieces.push(content[end..tail_start].to_string());
        pieces.push(comment_out(&content[start..end]));
        tail_start = start;
    }
    pieces.push(content[..tail_start].to_string());

    Ok(pieces.into_iter().rev().collect())
}

fn normalized_ranges(content: &str, spans: &[TestSpan]) -> Result<Vec<(usize, usize)>, TransformError> {
    let mut ranges = Vec::with_capacity(spans.len());
    for span in spans {
        let in_bounds = span.start <= span.end
            && span.end <= content.len()
            && content.is_char_boundary(span.start)
            && content.is_char_boundary(span.end);
        if !in_bounds {
            return Err(TransformError::SpanOutOfBounds {
                start: span.start,
                end: span.end,
                len: content.len(),
            });
        }
        ranges.push((span.start, span.end));
    }

    // Outer spans first when two start together
    ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last() {
            Some(&(_, previous_end)) if end <= previous_end => continue,
            Some(&(_, previous_end)) if start < previous_end => {
                return Err(TransformError::OverlappingSpans {
                    start,
                    end,
                    previous_end,
                });
            }
            _ => merged.push((start, end)),
        }
    }
    Ok(merged)
}

fn comment_out(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let body = line.strip_suffix('\r').unwrap_or(line);
            if body.is_empty() {
                format!("{INERT_MARKER}{}", &line[body.len()..])
            } else {
                format!("{INERT_PREFIX}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn span(content: &str, needle: &str) -> TestSpan {
        let start = content.find(needle).unwrap();
        TestSpan {
            start,
            end: start + needle.len(),
            name: needle.to_string(),
        }
    }

    #[test]
    fn test_empty_lines_become_bare_marker() {
        let content = "before\nit('a', () => {\n\n  run();\n});\nafter\n";
        let target = "it('a', () => {\n\n  run();\n})";
        let out = neutralize(content, &[span(content, target)]).unwrap();
        assert_eq!(out, "before\n// it('a', () => {\n//\n//   run();\n// });\nafter\n");
    }

    #[test]
    fn test_spans_applied_in_any_input_order() {
        let content = "it('a', () => {});\nkeep();\nit('b', () => {\n  x();\n});\n";
        let a = span(content, "it('a', () => {})");
        let b = span(content, "it('b', () => {\n  x();\n})");

        let forward = neutralize(content, &[a.clone(), b.clone()]).unwrap();
        let backward = neutralize(content, &[b, a]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, "// it('a', () => {});\nkeep();\n// it('b', () => {\n//   x();\n// });\n");
    }

    #[test]
    fn test_nested_span_is_covered_by_outer() {
        let content = "it('outer', () => {\n  it('inner', () => {});\n});\n";
        let outer = span(content, "it('outer', () => {\n  it('inner', () => {});\n})");
        let inner = span(content, "it('inner', () => {})");
        let out = neutralize(content, &[inner, outer]).unwrap();
        assert_eq!(out, "// it('outer', () => {\n//   it('inner', () => {});\n// });\n");
    }

    #[test]
    fn test_partial_overlap_is_rejected() {
        let content = "abcdefgh";
        let first = TestSpan { start: 0, end: 4, name: "a".into() };
        let second = TestSpan { start: 2, end: 6, name: "b".into() };
        let err = neutralize(content, &[first, second]).unwrap_err();
        assert_eq!(
            err,
            TransformError::OverlappingSpans { start: 2, end: 6, previous_end: 4 }
        );
    }

    #[test]
    fn test_out_of_bounds_span_is_rejected() {
        let err = neutralize("short", &[TestSpan { start: 2, end: 40, name: "x".into() }]).unwrap_err();
        assert!(matches!(err, TransformError::SpanOutOfBounds { len: 5, .. }));

        // Splits the two-byte 'é'
        let err = neutralize("é", &[TestSpan { start: 1, end: 2, name: "x".into() }]).unwrap_err();
        assert!(matches!(err, TransformError::SpanOutOfBounds { .. }));
    }

    #[test]
    fn test_crlf_line_endings_are_kept() {
        let content = "it('a', () => {\r\n\r\n  run();\r\n});\r\n";
        let target = "it('a', () => {\r\n\r\n  run();\r\n})";
        let out = neutralize(content, &[span(content, target)]).unwrap();
        assert_eq!(out, "// it('a', () => {\r\n//\r\n//   run();\r\n// });\r\n");
    }

    #[test]
    fn test_no_spans_is_identity() {
        let content = "const x = 1;\n";
        assert_eq!(neutralize(content, &[]).unwrap(), content);
    }

    fn content_and_spans() -> impl Strategy<Value = (String, Vec<TestSpan>)> {
        "[a-z(){};\n ]{0,200}".prop_flat_map(|content| {
            let len = content.len();
            (Just(content), proptest::collection::vec((0..=len, 0..=len), 0..6))
        })
        .prop_map(|(content, cuts)| {
            // Turn arbitrary cut points into disjoint, sorted spans
            let mut points: Vec<usize> = cuts.into_iter().flat_map(|(a, b)| [a, b]).collect();
            points.sort_unstable();
            points.dedup();
            let spans = points
                .chunks_exact(2)
                .map(|pair| TestSpan {
                    start: pair[0],
                    end: pair[1],
                    name: String::new(),
                })
                .collect();
            (content, spans)
        })
    }

    proptest! {
        #[test]
        fn prop_line_count_is_preserved((content, spans) in content_and_spans()) {
            let out = neutralize(&content, &spans).unwrap();
            prop_assert_eq!(out.matches('\n').count(), content.matches('\n').count());
        }

        #[test]
        fn prop_text_outside_spans_is_untouched((content, spans) in content_and_spans()) {
            let out = neutralize(&content, &spans).unwrap();

            let mut expected = String::new();
            let mut cursor = 0;
            for s in &spans {
                expected.push_str(&content[cursor..s.start]);
                expected.push_str(&comment_out(&content[s.start..s.end]));
                cursor = s.end;
            }
            expected.push_str(&content[cursor..]);
            prop_assert_eq!(&out, &expected);

            for s in &spans {
                for line in comment_out(&content[s.start..s.end]).split('\n') {
                    prop_assert!(line.starts_with(INERT_MARKER));
                }
            }
        }
    }
}
