//! Result aggregation: reading order, line grouping and confidence filtering.

use super::types::{BoundingBox, ExtractionResult, FilterOptions, RecognizedSpan, TextLine};

/// Merge recognized spans into a structured result.
///
/// Low-confidence spans stay in `spans` with `below_threshold` set but never
/// reach line text, full text or the aggregate confidence. Timing and
/// diagnostics are left for the orchestrator to fill in.
pub fn aggregate(spans: Vec<RecognizedSpan>, filter: &FilterOptions) -> ExtractionResult {
    let mut spans: Vec<RecognizedSpan> = spans
        .into_iter()
        .filter_map(|mut span| {
            span.text = normalize_whitespace(&span.text);
            if span.text.is_empty() {
                return None;
            }
            span.confidence = sanitize_confidence(span.confidence);
            span.below_threshold = span.confidence < filter.min_confidence;
            Some(span)
        })
        .collect();

    // Stable sort keeps engine order for identical boxes.
    spans.sort_by_key(|s| (s.bbox.y, s.bbox.x));

    let mut bands: Vec<(BoundingBox, Vec<RecognizedSpan>)> = Vec::new();
    for span in spans {
        let joined = bands
            .iter_mut()
            .rev()
            .find(|(band, _)| same_line(band, &span.bbox));
        match joined {
            Some((band, members)) => {
                *band = band.union(&span.bbox);
                members.push(span);
            }
            None => bands.push((span.bbox, vec![span])),
        }
    }

    let mut ordered = Vec::new();
    let mut lines = Vec::with_capacity(bands.len());
    for (band, mut members) in bands {
        members.sort_by_key(|s| (s.bbox.x, s.bbox.y));

        let mut indices = Vec::with_capacity(members.len());
        for mut span in members {
            span.reading_order = ordered.len();
            indices.push(ordered.len());
            ordered.push(span);
        }

        let kept: Vec<&RecognizedSpan> = indices
            .iter()
            .map(|&i| &ordered[i])
            .filter(|s| !s.below_threshold)
            .collect();
        let text = kept
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        lines.push(TextLine {
            bbox: band,
            spans: indices,
            text,
            confidence: weighted_confidence(kept.iter().copied()),
        });
    }

    let full_text = lines
        .iter()
        .filter(|l| !l.text.is_empty())
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let confidence = weighted_confidence(ordered.iter().filter(|s| !s.below_threshold));

    ExtractionResult {
        spans: ordered,
        lines,
        full_text,
        confidence,
        duration_ms: 0,
        diagnostics: Default::default(),
    }
}

/// Trim and collapse internal whitespace runs to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sanitize_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// A box belongs to a line band when they share at least half of the smaller
/// of the two heights.
fn same_line(band: &BoundingBox, bbox: &BoundingBox) -> bool {
    let band = with_min_height(band);
    let bbox = with_min_height(bbox);
    let overlap = band.vertical_overlap(&bbox);
    let smaller = band.height.min(bbox.height);
    overlap > 0 && overlap * 2 >= smaller
}

fn with_min_height(bbox: &BoundingBox) -> BoundingBox {
    BoundingBox {
        height: bbox.height.max(1),
        ..*bbox
    }
}

/// Character-length weighted mean; 0 when nothing contributes.
fn weighted_confidence<'a>(spans: impl Iterator<Item = &'a RecognizedSpan>) -> f32 {
    let (weighted, total) = spans.fold((0.0f64, 0usize), |(sum, chars), span| {
        let len = span.text.chars().count();
        (sum + span.confidence as f64 * len as f64, chars + len)
    });
    if total == 0 {
        0.0
    } else {
        (weighted / total as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, confidence: f32, x: u32, y: u32, w: u32, h: u32) -> RecognizedSpan {
        RecognizedSpan {
            text: text.to_string(),
            confidence,
            bbox: BoundingBox::new(x, y, w, h),
            reading_order: 0,
            below_threshold: false,
        }
    }

    fn filter(min_confidence: f32) -> FilterOptions {
        FilterOptions { min_confidence }
    }

    #[test]
    fn test_reading_order_lines() {
        let spans = vec![
            span("world", 0.9, 120, 12, 80, 20),
            span("second", 0.9, 10, 60, 90, 20),
            span("Hello", 0.9, 10, 10, 90, 20),
            span("line", 0.9, 110, 58, 60, 22),
        ];
        let result = aggregate(spans, &filter(0.0));

        assert_eq!(result.full_text, "Hello world\nsecond line");
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.lines[0].spans, vec![0, 1]);
        let orders: Vec<usize> = result.spans.iter().map(|s| s.reading_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
        assert_eq!(result.spans[1].text, "world");
    }

    #[test]
    fn test_small_overlap_starts_new_line() {
        // 4 rows of overlap out of 20 is not the same line.
        let spans = vec![span("a", 0.9, 0, 0, 10, 20), span("b", 0.9, 50, 16, 10, 20)];
        let result = aggregate(spans, &filter(0.0));
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.full_text, "a\nb");
    }

    #[test]
    fn test_low_confidence_spans_flagged_not_dropped() {
        let spans = vec![
            span("keep", 0.8, 0, 0, 40, 10),
            span("noise", 0.1, 50, 0, 40, 10),
        ];
        let result = aggregate(spans, &filter(0.5));

        assert_eq!(result.spans.len(), 2);
        assert!(!result.spans[0].below_threshold);
        assert!(result.spans[1].below_threshold);
        assert_eq!(result.full_text, "keep");
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_above_all_spans() {
        let spans = vec![span("one", 0.6, 0, 0, 10, 10), span("two", 0.7, 0, 30, 10, 10)];
        let result = aggregate(spans, &filter(0.95));

        assert_eq!(result.full_text, "");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.spans.len(), 2);
        assert!(result.spans.iter().all(|s| s.below_threshold));
        assert!(result.lines.iter().all(|l| l.text.is_empty()));
    }

    #[test]
    fn test_empty_input() {
        let result = aggregate(Vec::new(), &FilterOptions::default());
        assert!(result.spans.is_empty());
        assert!(result.lines.is_empty());
        assert_eq!(result.full_text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_whitespace_normalized() {
        let spans = vec![
            span("  spaced\t out  ", 0.9, 0, 0, 10, 10),
            span(" \n ", 0.9, 20, 0, 10, 10),
        ];
        let result = aggregate(spans, &filter(0.0));
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.full_text, "spaced out");
        assert!(!result.full_text.ends_with(char::is_whitespace));
    }

    #[test]
    fn test_confidence_is_length_weighted() {
        let spans = vec![
            span("a", 0.2, 0, 0, 10, 10),
            span("bbbb", 1.0, 20, 0, 40, 10),
        ];
        let result = aggregate(spans, &filter(0.0));
        // (0.2 * 1 + 1.0 * 4) / 5
        assert!((result.confidence - 0.84).abs() < 1e-6);
    }

    #[test]
    fn test_line_bbox_covers_members() {
        let spans = vec![span("x", 0.9, 10, 10, 10, 10), span("y", 0.9, 40, 12, 10, 10)];
        let result = aggregate(spans, &filter(0.0));
        assert_eq!(result.lines[0].bbox, BoundingBox::new(10, 10, 40, 12));
    }

    #[test]
    fn test_out_of_range_confidence_clamped() {
        let spans = vec![span("x", 1.7, 0, 0, 10, 10), span("y", f32::NAN, 20, 0, 10, 10)];
        let result = aggregate(spans, &filter(0.5));
        assert_eq!(result.spans[0].confidence, 1.0);
        assert_eq!(result.spans[1].confidence, 0.0);
        assert!(result.spans[1].below_threshold);
    }
}
