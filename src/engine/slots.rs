use crate::model::{Ms, Span};

// ── Slot enumeration ─────────────────────────────────────────────
//
// The continuous form is primary: operating window minus bookings. The
// fixed-cell grid is derived from it by intersection, so both forms agree
// by construction. Results are recomputed from current booking state on
// every call, never cached.

/// Subtract `busy` (sorted by start) from each interval of `base` (sorted,
/// disjoint), emitting the maximal remaining sub-intervals in order.
pub fn subtract_spans(base: &[Span], busy: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < busy.len() && busy[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < busy.len() && busy[j].start < current_end {
            let r = &busy[j];
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

/// Maximal free sub-intervals of `window` once `busy` (sorted by start,
/// clamped or not) is removed.
pub fn free_spans(window: Span, busy: &[Span]) -> Vec<Span> {
    if busy.is_empty() {
        return vec![window];
    }
    subtract_spans(&[window], busy)
}

/// The discrete form: partition `window` into `cell_ms`-length cells and
/// keep the ones fully contained in a free span. A trailing remainder
/// shorter than a cell is not emitted.
pub fn grid_cells(window: Span, free: &[Span], cell_ms: Ms) -> Vec<Span> {
    debug_assert!(cell_ms > 0);
    let mut cells = Vec::new();
    let mut fi = 0;
    let mut start = window.start;

    while start + cell_ms <= window.end {
        let cell = Span::new(start, start + cell_ms);
        while fi < free.len() && free[fi].end < cell.end {
            fi += 1;
        }
        if fi < free.len() && free[fi].contains_span(&cell) {
            cells.push(cell);
        }
        start += cell_ms;
    }

    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn spans(pairs: &[(Ms, Ms)]) -> Vec<Span> {
        pairs.iter().map(|&(s, e)| Span::new(s, e)).collect()
    }

    // ── subtract_spans ────────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = spans(&[(100, 200), (300, 400)]);
        let busy = spans(&[(200, 300)]);
        assert_eq!(subtract_spans(&base, &busy), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = spans(&[(100, 200)]);
        let busy = spans(&[(50, 250)]);
        assert!(subtract_spans(&base, &busy).is_empty());
    }

    #[test]
    fn subtract_partial_left() {
        let base = spans(&[(100, 200)]);
        let busy = spans(&[(50, 150)]);
        assert_eq!(subtract_spans(&base, &busy), spans(&[(150, 200)]));
    }

    #[test]
    fn subtract_partial_right() {
        let base = spans(&[(100, 200)]);
        let busy = spans(&[(150, 250)]);
        assert_eq!(subtract_spans(&base, &busy), spans(&[(100, 150)]));
    }

    #[test]
    fn subtract_middle_punch() {
        let base = spans(&[(100, 300)]);
        let busy = spans(&[(150, 200)]);
        assert_eq!(
            subtract_spans(&base, &busy),
            spans(&[(100, 150), (200, 300)])
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = spans(&[(0, 1000)]);
        let busy = spans(&[(100, 200), (400, 500), (800, 900)]);
        assert_eq!(
            subtract_spans(&base, &busy),
            spans(&[(0, 100), (200, 400), (500, 800), (900, 1000)])
        );
    }

    // ── free_spans ────────────────────────────────────────

    #[test]
    fn free_spans_empty_room_is_whole_window() {
        let window = Span::new(9 * H, 19 * H);
        assert_eq!(free_spans(window, &[]), vec![window]);
    }

    #[test]
    fn free_spans_fragments_around_bookings() {
        // 09:00–19:00 with bookings 10:00–11:00 and 14:30–16:00.
        let window = Span::new(9 * H, 19 * H);
        let busy = spans(&[(10 * H, 11 * H), (14 * H + 30 * M, 16 * H)]);
        assert_eq!(
            free_spans(window, &busy),
            spans(&[
                (9 * H, 10 * H),
                (11 * H, 14 * H + 30 * M),
                (16 * H, 19 * H)
            ])
        );
    }

    #[test]
    fn free_spans_booking_at_window_edges() {
        let window = Span::new(9 * H, 19 * H);
        let busy = spans(&[(9 * H, 10 * H), (18 * H, 19 * H)]);
        assert_eq!(free_spans(window, &busy), spans(&[(10 * H, 18 * H)]));
    }

    #[test]
    fn free_spans_fully_booked_day_is_empty() {
        let window = Span::new(9 * H, 19 * H);
        let busy = spans(&[(9 * H, 19 * H)]);
        assert!(free_spans(window, &busy).is_empty());
    }

    /// Free spans are the exact complement of the bookings within the
    /// window: re-booking every free span leaves nothing free.
    #[test]
    fn free_spans_complement_property() {
        let window = Span::new(9 * H, 19 * H);
        let busy = spans(&[(10 * H, 11 * H), (13 * H, 14 * H), (17 * H, 18 * H)]);
        let free = free_spans(window, &busy);

        // Free and busy are disjoint and together cover the window.
        let mut all: Vec<Span> = busy.iter().chain(free.iter()).copied().collect();
        all.sort_by_key(|s| s.start);
        for pair in all.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]));
        }
        let covered: Ms = all.iter().map(Span::duration_ms).sum();
        assert_eq!(covered, window.duration_ms());

        // Booking all the free spans saturates the day.
        let mut rebooked = busy.clone();
        rebooked.extend(&free);
        rebooked.sort_by_key(|s| s.start);
        assert!(free_spans(window, &rebooked).is_empty());
    }

    // ── grid_cells ────────────────────────────────────────

    #[test]
    fn grid_empty_day_yields_every_cell() {
        let window = Span::new(9 * H, 19 * H);
        let cells = grid_cells(window, &[window], H);
        assert_eq!(cells.len(), 10);
        assert_eq!(cells[0], Span::new(9 * H, 10 * H));
        assert_eq!(cells[9], Span::new(18 * H, 19 * H));
    }

    #[test]
    fn grid_cell_touched_by_booking_is_occupied() {
        // Booking 10:30–11:30 knocks out both the 10–11 and 11–12 cells.
        let window = Span::new(9 * H, 19 * H);
        let free = free_spans(window, &spans(&[(10 * H + 30 * M, 11 * H + 30 * M)]));
        let cells = grid_cells(window, &free, H);
        assert_eq!(cells.len(), 8);
        assert!(!cells.contains(&Span::new(10 * H, 11 * H)));
        assert!(!cells.contains(&Span::new(11 * H, 12 * H)));
        assert!(cells.contains(&Span::new(9 * H, 10 * H)));
        assert!(cells.contains(&Span::new(12 * H, 13 * H)));
    }

    #[test]
    fn grid_exact_cell_booking_removes_only_that_cell() {
        let window = Span::new(9 * H, 19 * H);
        let free = free_spans(window, &spans(&[(10 * H, 11 * H)]));
        let cells = grid_cells(window, &free, H);
        assert_eq!(cells.len(), 9);
        assert!(!cells.contains(&Span::new(10 * H, 11 * H)));
    }

    #[test]
    fn grid_trailing_remainder_dropped() {
        // 09:00–18:30 with 60-minute cells: the half hour at the end is not
        // a bookable cell.
        let window = Span::new(9 * H, 18 * H + 30 * M);
        let cells = grid_cells(window, &[window], H);
        assert_eq!(cells.len(), 9);
        assert_eq!(cells.last().unwrap().end, 18 * H);
    }

    #[test]
    fn grid_half_hour_cells() {
        let window = Span::new(9 * H, 11 * H);
        let free = free_spans(window, &spans(&[(10 * H, 10 * H + 30 * M)]));
        let cells = grid_cells(window, &free, 30 * M);
        assert_eq!(
            cells,
            spans(&[
                (9 * H, 9 * H + 30 * M),
                (9 * H + 30 * M, 10 * H),
                (10 * H + 30 * M, 11 * H)
            ])
        );
    }
}
