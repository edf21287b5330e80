use crate::model::*;

// ── Interval arithmetic ───────────────────────────────────────────

/// Free sub-spans of `query` on this car: the query minus every reservation
/// that touches it. Windows are not consulted.
pub fn free_spans(car: &CarState, query: &Span) -> Vec<Span> {
    let booked: Vec<Span> = car
        .overlapping(query)
        .filter(|i| i.is_reservation())
        .map(|i| i.span)
        .collect();
    // `overlapping` yields in start order, and reservations never overlap
    // each other, so `booked` is already sorted and disjoint.
    subtract_intervals(&[*query], &booked)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted by start) from `base` (sorted, disjoint).
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
