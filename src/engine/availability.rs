use crate::model::{RoomState, Stay};

use ulid::Ulid;

// ── Availability math ─────────────────────────────────────────────

/// First active booking whose stay overlaps `stay`, if any. Pending and
/// cancelled bookings never block; a checkout on the requested check-in day
/// is not a conflict (half-open stays).
pub fn find_conflict(rs: &RoomState, stay: &Stay) -> Option<Ulid> {
    rs.overlapping(stay)
        .find(|b| b.blocks_availability())
        .map(|b| b.id)
}

/// Same check, ignoring one booking id — used when promoting a pending
/// booking, whose own stay must not count against itself.
pub fn find_conflict_excluding(rs: &RoomState, stay: &Stay, exclude: &Ulid) -> Option<Ulid> {
    rs.overlapping(stay)
        .find(|b| b.id != *exclude && b.blocks_availability())
        .map(|b| b.id)
}

/// Merge sorted overlapping/adjacent stays into disjoint ranges.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in <= last.check_out {
                last.check_out = last.check_out.max(stay.check_out);
                continue;
            }
        merged.push(stay);
    }
    merged
}

/// Subtract booked ranges from free ranges. Both inputs sorted by check-in;
/// the output is the free ranges with every booked night punched out.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.check_in;
        let current_end = b.check_out;

        while ri < to_remove.len() && to_remove[ri].check_out <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(Stay::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.check_out);
            j += 1;
        }

        if current_start < current_end {
            result.push(Stay::new(current_start, current_end));
        }
    }

    result
}

/// Free sub-ranges of `window` on a room: the window minus every active
/// booking's stay, clamped to the window.
pub fn free_ranges(rs: &RoomState, window: &Stay) -> Vec<Stay> {
    let mut taken: Vec<Stay> = rs
        .overlapping(window)
        .filter(|b| b.blocks_availability())
        .map(|b| Stay::new(
            b.stay.check_in.max(window.check_in),
            b.stay.check_out.min(window.check_out),
        ))
        .collect();
    taken.sort_by_key(|s| s.check_in);
    let taken = merge_overlapping(&taken);
    subtract_stays(std::slice::from_ref(window), &taken)
}
