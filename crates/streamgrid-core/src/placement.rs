//! Placement and collision engine.
//!
//! Never fails: malformed cells are clamped into the grid and anything the
//! compactor cannot place is left where it was with a warning.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LayoutConfig;
use crate::model::LayoutCell;

/// Rows the compactor will search before giving up on a cell.
pub const ROW_CAP: i32 = 10_000;

/// Size of a newly placed item, in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSize {
    pub w: i32,
    pub h: i32,
}

/// What happens when a committed layout contains overlapping cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Overlapping layouts are compacted before they reach the store.
    #[default]
    Prevent,
    /// Layouts are stored as given.
    Allow,
}

/// Slot pitch and row length used to tile new items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tiling {
    pub pitch: CellSize,
    pub per_row: u32,
}

impl Tiling {
    pub fn new(pitch: CellSize, per_row: u32) -> Self {
        Self { pitch, per_row }
    }

    /// Stream cells set the pitch, so chats and streams share one slot grid.
    pub fn from_config(cfg: &LayoutConfig) -> Self {
        Self::new(cfg.stream_cell, cfg.items_per_row)
    }
}

/// Round-robin tiling slot for the item at position `index`.
pub fn assign_initial_cell(
    item_id: impl Into<String>,
    index: usize,
    size: CellSize,
    tiling: Tiling,
) -> LayoutCell {
    let per_row = tiling.per_row.max(1) as usize;
    let col = (index % per_row) as i32;
    let row = (index / per_row) as i32;
    LayoutCell::new(
        item_id,
        col * tiling.pitch.w.max(1),
        row * tiling.pitch.h.max(1),
        size.w.max(1),
        size.h.max(1),
    )
}

/// Tiling slot for a new item appended after `existing`.
///
/// Starts at slot `existing.len()`. Under `Prevent`, slots that intersect an
/// existing cell are skipped, since removals leave holes the round-robin
/// index would otherwise land on.
pub fn place_new(
    item_id: &str,
    existing: &[LayoutCell],
    size: CellSize,
    tiling: Tiling,
    policy: CollisionPolicy,
) -> LayoutCell {
    let first = assign_initial_cell(item_id, existing.len(), size, tiling);
    if policy == CollisionPolicy::Allow {
        return first;
    }
    let mut index = existing.len();
    loop {
        let cell = assign_initial_cell(item_id, index, size, tiling);
        if cell.y >= ROW_CAP {
            warn!("no free slot for '{}', placing it over existing items", item_id);
            return first;
        }
        if !existing.iter().any(|c| c.intersects(&cell)) {
            return cell;
        }
        index += 1;
    }
}

/// True when any two cells intersect.
pub fn detect_overlap(cells: &[LayoutCell]) -> bool {
    cells
        .iter()
        .enumerate()
        .any(|(i, a)| cells[i + 1..].iter().any(|b| a.intersects(b)))
}

/// Item ids of every intersecting pair, in input order.
pub fn overlapping_pairs(cells: &[LayoutCell]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (i, a) in cells.iter().enumerate() {
        for b in &cells[i + 1..] {
            if a.intersects(b) {
                pairs.push((a.item_id.clone(), b.item_id.clone()));
            }
        }
    }
    pairs
}

/// Clamp a cell into a grid of `columns` columns and at most `ROW_CAP` rows
/// tall.
pub fn sanitize(cell: &LayoutCell, columns: u32) -> LayoutCell {
    let columns = columns.max(1) as i32;
    let w = cell.w.clamp(1, columns);
    let h = cell.h.clamp(1, ROW_CAP);
    let x = cell.x.clamp(0, columns - w);
    let y = cell.y.clamp(0, ROW_CAP);
    LayoutCell {
        item_id: cell.item_id.clone(),
        x,
        y,
        w,
        h,
        pinned: cell.pinned,
    }
}

// ── Occupancy bitmap ────────────────────────────────────────────────────────

struct Occupancy {
    columns: usize,
    rows: Vec<Vec<bool>>,
}

impl Occupancy {
    fn new(columns: u32) -> Self {
        Self {
            columns: columns.max(1) as usize,
            rows: Vec::new(),
        }
    }

    fn row_free(&self, y: i32, x: i32, w: i32) -> bool {
        match self.rows.get(y as usize) {
            Some(row) => row[x as usize..(x + w) as usize].iter().all(|c| !c),
            None => true,
        }
    }

    /// First occupied row under the span, if any.
    fn first_blocked(&self, x: i32, y: i32, w: i32, h: i32) -> Option<i32> {
        (y..y.saturating_add(h)).find(|&row| !self.row_free(row, x, w))
    }

    fn mark(&mut self, cell: &LayoutCell) {
        let bottom = cell.bottom() as usize;
        if self.rows.len() < bottom {
            self.rows.resize_with(bottom, || vec![false; self.columns]);
        }
        for row in &mut self.rows[cell.y as usize..bottom] {
            for c in &mut row[cell.x as usize..cell.right() as usize] {
                *c = true;
            }
        }
    }
}

/// Remove vertical gaps.
///
/// Cells are visited by (y, x, input position). A cell that collides with an
/// already placed cell first moves down to the nearest free row, then every
/// cell floats up while the row above its span is free. The result keeps the
/// input order and never overlaps unless a cell hit `ROW_CAP`.
pub fn compact(cells: &[LayoutCell], columns: u32) -> Vec<LayoutCell> {
    let mut out: Vec<LayoutCell> = cells.iter().map(|c| sanitize(c, columns)).collect();
    let mut order: Vec<usize> = (0..out.len()).collect();
    order.sort_by_key(|&i| (out[i].y, out[i].x, i));

    let mut occupancy = Occupancy::new(columns);
    for i in order {
        let cell = &mut out[i];
        let mut y = cell.y;
        while y < ROW_CAP {
            match occupancy.first_blocked(cell.x, y, cell.w, cell.h) {
                Some(row) => y = row + 1,
                None => break,
            }
        }
        if y >= ROW_CAP {
            warn!(
                "compact: no free rows for '{}' below row {}, leaving it in place",
                cell.item_id, ROW_CAP
            );
            continue;
        }
        while y > 0 && occupancy.row_free(y - 1, cell.x, cell.w) {
            y -= 1;
        }
        cell.y = y;
        occupancy.mark(cell);
    }
    out
}

/// Re-tile every cell into `items_per_row` equal columns, one stream cell tall,
/// in input order.
pub fn optimal_layout(cells: &[LayoutCell], cfg: &LayoutConfig) -> Vec<LayoutCell> {
    let columns = cfg.columns.max(1);
    let per_row = cfg.items_per_row.clamp(1, columns);
    let size = CellSize {
        w: (columns / per_row) as i32,
        h: cfg.stream_cell.h.max(1),
    };
    let tiling = Tiling::new(size, per_row);
    cells
        .iter()
        .enumerate()
        .map(|(index, cell)| {
            let mut placed = assign_initial_cell(cell.item_id.clone(), index, size, tiling);
            placed.pinned = cell.pinned;
            placed
        })
        .collect()
}

/// Clamp every cell, then apply the collision policy to a layout about to be
/// committed.
pub fn resolve(cells: Vec<LayoutCell>, policy: CollisionPolicy, columns: u32) -> Vec<LayoutCell> {
    let cells: Vec<LayoutCell> = cells.iter().map(|c| sanitize(c, columns)).collect();
    match policy {
        CollisionPolicy::Allow => cells,
        CollisionPolicy::Prevent if detect_overlap(&cells) => {
            let pairs = overlapping_pairs(&cells);
            warn!("layout has {} overlapping pair(s), compacting", pairs.len());
            compact(&cells, columns)
        }
        CollisionPolicy::Prevent => cells,
    }
}
