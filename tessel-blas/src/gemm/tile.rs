//! GEMM tile descriptors and the tuning catalog.
//!
//! A [`TileDescriptor`] fixes how the local-memory kernel carves up C: each
//! work-group owns a `(item_rows * group_rows) x (item_cols * group_cols)`
//! block, and each of its `group_rows x group_cols` work-items owns an
//! `item_rows x item_cols` sub-tile of that block. The k dimension is staged
//! through local memory one cache line of elements at a time.
//!
//! The catalog is an ordered rule list; the first rule whose device and shape
//! predicates both match wins. Adding a tuning entry means adding a rule.

use tessel_core::DeviceType;

/// Cache line size the k-step of the local-memory kernel is derived from.
pub const CACHE_LINE_BYTES: usize = 64;

/// Work-group size of the no-local-memory kernel.
pub const NO_LOCAL_MEM_WORKGROUP: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileDescriptor {
    /// Work-group size the catalog entry was tuned with. Also the group size
    /// of the no-local-memory fallback for this shape.
    pub workgroup_size: usize,
    /// Stage the next k-block while the current one is consumed.
    pub double_buffer: bool,
    pub item_rows: usize,
    pub item_cols: usize,
    pub group_rows: usize,
    pub group_cols: usize,
    /// Pad staged A columns by one element (bank-conflict avoidance).
    pub bank_pad_a: bool,
    /// Pad staged B rows by one element.
    pub bank_pad_b: bool,
    pub cache_line_bytes: usize,
}

impl TileDescriptor {
    pub const fn new(
        workgroup_size: usize,
        double_buffer: bool,
        item_rows: usize,
        item_cols: usize,
        group_rows: usize,
        group_cols: usize,
    ) -> Self {
        Self {
            workgroup_size,
            double_buffer,
            item_rows,
            item_cols,
            group_rows,
            group_cols,
            bank_pad_a: false,
            bank_pad_b: false,
            cache_line_bytes: CACHE_LINE_BYTES,
        }
    }

    pub const fn with_bank_padding(mut self, pad_a: bool, pad_b: bool) -> Self {
        self.bank_pad_a = pad_a;
        self.bank_pad_b = pad_b;
        self
    }

    /// Rows of C per work-group.
    pub fn block_rows(&self) -> usize {
        self.item_rows * self.group_rows
    }

    /// Columns of C per work-group.
    pub fn block_cols(&self) -> usize {
        self.item_cols * self.group_cols
    }

    /// Work-items per group of the local-memory kernel.
    pub fn items_per_group(&self) -> usize {
        self.group_rows * self.group_cols
    }

    /// Depth of one staged k-block: a cache line of `T`.
    pub fn block_k<T>(&self) -> usize {
        (self.cache_line_bytes / std::mem::size_of::<T>().max(1)).max(1)
    }

    /// Leading dimension of the staged A tile (`block_k` columns of it).
    pub fn staged_a_ld(&self) -> usize {
        self.block_rows() + usize::from(self.bank_pad_a)
    }

    /// Leading dimension of the staged B tile (`block_cols` columns of it).
    pub fn staged_b_ld<T>(&self) -> usize {
        self.block_k::<T>() + usize::from(self.bank_pad_b)
    }

    /// Elements of one stage: an A tile plus a B tile.
    pub fn stage_elements<T>(&self) -> usize {
        self.staged_a_ld() * self.block_k::<T>() + self.staged_b_ld::<T>() * self.block_cols()
    }

    /// Local memory a work-group of this shape needs for element type `T`.
    pub fn scratch_bytes<T>(&self) -> usize {
        let stages = if self.double_buffer { 2 } else { 1 };
        stages * self.stage_elements::<T>() * std::mem::size_of::<T>()
    }
}

/// Device predicate of a catalog rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMatch {
    Only(DeviceType),
    Any,
}

/// Shape predicate of a catalog rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMatch {
    Exact { m: usize, n: usize, k: usize },
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRule {
    pub device: DeviceMatch,
    pub shape: ShapeMatch,
    pub tile: TileDescriptor,
}

impl TileRule {
    pub fn matches(&self, device: DeviceType, m: usize, n: usize, k: usize) -> bool {
        let device_ok = match self.device {
            DeviceMatch::Only(d) => d == device,
            DeviceMatch::Any => true,
        };
        let shape_ok = match self.shape {
            ShapeMatch::Exact { m: rm, n: rn, k: rk } => (rm, rn, rk) == (m, n, k),
            ShapeMatch::Any => true,
        };
        device_ok && shape_ok
    }
}

const fn rule(device: DeviceMatch, shape: ShapeMatch, tile: TileDescriptor) -> TileRule {
    TileRule {
        device,
        shape,
        tile,
    }
}

const INTEL: DeviceMatch = DeviceMatch::Only(DeviceType::IntelGpu);

/// Tuned tile shapes, most specific first.
pub static CATALOG: &[TileRule] = &[
    rule(
        INTEL,
        ShapeMatch::Exact { m: 1024, n: 4096, k: 1024 },
        TileDescriptor::new(128, false, 4, 4, 16, 16),
    ),
    rule(
        INTEL,
        ShapeMatch::Exact { m: 10, n: 1024, k: 1024 },
        TileDescriptor::new(128, false, 2, 2, 8, 8),
    ),
    rule(INTEL, ShapeMatch::Any, TileDescriptor::new(128, false, 8, 8, 8, 8)),
    rule(
        DeviceMatch::Any,
        ShapeMatch::Exact { m: 10, n: 1024, k: 1024 },
        TileDescriptor::new(128, true, 1, 1, 16, 16),
    ),
    rule(
        DeviceMatch::Any,
        ShapeMatch::Any,
        TileDescriptor::new(128, false, 8, 8, 16, 16),
    ),
];

/// First matching descriptor of `rules`.
pub fn select_tile_from(
    rules: &[TileRule],
    device: DeviceType,
    m: usize,
    n: usize,
    k: usize,
) -> Option<TileDescriptor> {
    rules
        .iter()
        .find(|r| r.matches(device, m, n, k))
        .map(|r| r.tile)
}

/// Descriptor the catalog picks for `device` and problem shape `(m, n, k)`.
pub fn select_tile(device: DeviceType, m: usize, n: usize, k: usize) -> TileDescriptor {
    // The catalog ends in a catch-all; the fallback only guards edits to it.
    select_tile_from(CATALOG, device, m, n, k)
        .unwrap_or(TileDescriptor::new(NO_LOCAL_MEM_WORKGROUP, false, 8, 8, 16, 16))
}
