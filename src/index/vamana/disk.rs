//! On-disk index format and reader
//!
//! The graph file packs fixed-size vertex records into pages:
//!
//! ```text
//! graph.bin
//!   [Page 0..P-1], page_size = ceil(record_size / 4092) * 4096
//!     total vertex count: u32
//!     records: vector [f32; D], edges [u32; M], edge count u8,
//!              padded to 4-byte alignment
//! meta.bin
//!   magic "QVIX", version, geometry, medoid,
//!   page index -> byte offset table,
//!   vertex id -> external id bytes,
//!   crc32 over everything above
//! pq.bin
//!   magic "QVPQ", version, codebook geometry,
//!   centroids [f32; Q * k * sub_dim], codes [u8; N * Q],
//!   crc32 over everything above
//! ```
//!
//! The reader maps `graph.bin` read-only and serves greedy search: new
//! frontier vertices enter the candidate queue with cheap PQ distance
//! estimates, and an estimate is replaced by a precise distance (four at a
//! time) only when the vertex reaches the head of the queue, right before it
//! can influence expansion order.

use crate::distance::DistanceKind;
use crate::index::pq::ProductQuantizer;
use crate::index::vamana::graph::InMemoryGraph;
use crate::index::vamana::queue::CandidateQueue;
use crate::source::VectorSource;
use crate::{QuiverError, Result};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const GRAPH_FILE: &str = "graph.bin";
const META_FILE: &str = "meta.bin";
const PQ_FILE: &str = "pq.bin";

const META_MAGIC: &[u8; 4] = b"QVIX";
const PQ_MAGIC: &[u8; 4] = b"QVPQ";
const FORMAT_VERSION: u32 = 1;

const PAGE_SIZE_MULTIPLIER: usize = 4 * 1024;
const RECORD_ALIGNMENT: usize = 4;

/// Fixed-layout geometry shared by the writer and the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageLayout {
    pub dimensions: usize,
    pub max_degree: usize,
    pub record_size: usize,
    pub page_size: usize,
    pub vertices_per_page: usize,
}

impl PageLayout {
    pub fn new(dimensions: usize, max_degree: usize) -> Self {
        let raw = dimensions * 4 + max_degree * 4 + 1;
        let record_size = (raw + RECORD_ALIGNMENT - 1) / RECORD_ALIGNMENT * RECORD_ALIGNMENT;

        let usable = PAGE_SIZE_MULTIPLIER - 4;
        let page_size = (record_size + usable - 1) / usable * PAGE_SIZE_MULTIPLIER;
        let vertices_per_page = (page_size - 4) / record_size;

        Self {
            dimensions,
            max_degree,
            record_size,
            page_size,
            vertices_per_page,
        }
    }

    #[inline]
    pub fn pages_for(&self, vertex_count: usize) -> usize {
        (vertex_count + self.vertices_per_page - 1) / self.vertices_per_page
    }

    #[inline]
    fn edges_offset(&self) -> usize {
        self.dimensions * 4
    }

    #[inline]
    fn edge_count_offset(&self) -> usize {
        self.dimensions * 4 + self.max_degree * 4
    }
}

/// Serialize a pruned graph plus its quantizer into `dir`.
pub fn write_index(
    dir: &Path,
    graph: &InMemoryGraph,
    quantizer: &ProductQuantizer,
    medoid: u32,
    source: &dyn VectorSource,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let size = graph.size();
    let layout = PageLayout::new(graph.dimensions(), graph.max_degree());
    let pages = layout.pages_for(size);

    let mut page_offsets: Vec<u64> = Vec::with_capacity(pages);

    let mut writer = BufWriter::new(File::create(dir.join(GRAPH_FILE))?);
    let mut page = vec![0u8; layout.page_size];
    let mut neighbours: Vec<u32> = Vec::with_capacity(graph.max_degree());

    let mut written = 0usize;
    let mut page_offset = 0u64;
    while written < size {
        page.fill(0);
        page[..4].copy_from_slice(&(size as u32).to_le_bytes());

        let in_this_page = layout.vertices_per_page.min(size - written);
        for slot in 0..in_this_page {
            let vertex = (written + slot) as u32;
            let record = 4 + slot * layout.record_size;

            let vector = graph.vector(vertex);
            for (d, &item) in vector.iter().enumerate() {
                let at = record + d * 4;
                page[at..at + 4].copy_from_slice(&item.to_le_bytes());
            }

            graph.fetch_neighbours(vertex, &mut neighbours);
            debug_assert!(neighbours.len() <= graph.max_degree());
            for (slot_index, &neighbour) in neighbours.iter().enumerate() {
                let at = record + layout.edges_offset() + slot_index * 4;
                page[at..at + 4].copy_from_slice(&neighbour.to_le_bytes());
            }
            page[record + layout.edge_count_offset()] = neighbours.len() as u8;
        }

        writer.write_all(&page)?;
        page_offsets.push(page_offset);
        page_offset += layout.page_size as u64;
        written += in_this_page;
    }
    writer.flush()?;

    write_meta(dir, graph, medoid, &layout, &page_offsets, source)?;
    write_pq(dir, quantizer)?;
    Ok(())
}

fn write_meta(
    dir: &Path,
    graph: &InMemoryGraph,
    medoid: u32,
    layout: &PageLayout,
    page_offsets: &[u64],
    source: &dyn VectorSource,
) -> Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    buf.extend_from_slice(META_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(layout.dimensions as u32).to_le_bytes());
    buf.extend_from_slice(&(layout.max_degree as u32).to_le_bytes());
    buf.extend_from_slice(&(graph.distance_kind().code() as u32).to_le_bytes());
    buf.extend_from_slice(&(graph.size() as u64).to_le_bytes());
    buf.extend_from_slice(&medoid.to_le_bytes());

    buf.extend_from_slice(&(page_offsets.len() as u32).to_le_bytes());
    for &offset in page_offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }

    for vertex in 0..graph.size() {
        let id = source.id(vertex);
        if id.len() > u16::MAX as usize {
            return Err(QuiverError::InvalidData(format!(
                "external id of vector {vertex} exceeds {} bytes",
                u16::MAX
            )));
        }
        buf.extend_from_slice(&(id.len() as u16).to_le_bytes());
        buf.extend_from_slice(id);
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    std::fs::write(dir.join(META_FILE), &buf)?;
    Ok(())
}

fn write_pq(dir: &Path, quantizer: &ProductQuantizer) -> Result<()> {
    let mut buf: Vec<u8> = Vec::with_capacity(
        quantizer.centroids_raw().len() * 4 + quantizer.codes().len() + 64,
    );
    buf.extend_from_slice(PQ_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(quantizer.quantizer_count() as u32).to_le_bytes());
    buf.extend_from_slice(&(quantizer.sub_dim() as u32).to_le_bytes());
    buf.extend_from_slice(&(quantizer.codebook_len() as u32).to_le_bytes());
    buf.extend_from_slice(&(quantizer.codes().len() as u64).to_le_bytes());

    for &item in quantizer.centroids_raw() {
        buf.extend_from_slice(&item.to_le_bytes());
    }
    buf.extend_from_slice(quantizer.codes());

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    std::fs::write(dir.join(PQ_FILE), &buf)?;
    Ok(())
}

/// Cursor over a little-endian metadata buffer.
struct MetaCursor<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> MetaCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.at + len > self.buf.len() {
            return Err(QuiverError::Corruption(
                "metadata file truncated".to_string(),
            ));
        }
        let out = &self.buf[self.at..self.at + len];
        self.at += len;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}

/// Accumulated PQ re-ranking error statistics.
#[derive(Debug, Default, Clone, Copy)]
struct PqErrorStats {
    recalculated: u64,
    total_error: f64,
}

/// Per-search scratch buffers, threaded through explicitly so concurrent
/// searches never share hidden state.
pub struct SearchScratch {
    visited: HashSet<u32>,
    candidates: CandidateQueue,
    lookup_table: Vec<f32>,
    lookup_ready: bool,
    pending: Vec<usize>,
    quartet: Vec<u32>,
}

impl SearchScratch {
    pub fn new(reader: &IndexReader) -> Self {
        Self {
            visited: HashSet::with_capacity(8 * 1024),
            candidates: CandidateQueue::new(reader.search_list_size),
            lookup_table: vec![0.0; reader.quantizer.lookup_table_len()],
            lookup_ready: false,
            pending: Vec::with_capacity(4),
            quartet: Vec::with_capacity(4),
        }
    }

    fn reset(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.lookup_ready = false;
        self.pending.clear();
        self.quartet.clear();
    }
}

/// Read-only view over a serialized index.
pub struct IndexReader {
    layout: PageLayout,
    kind: DistanceKind,
    vertex_count: usize,
    medoid: u32,
    search_list_size: usize,
    page_offsets: Vec<u64>,
    external_ids: Vec<Vec<u8>>,
    quantizer: ProductQuantizer,
    mmap: Mmap,
    pq_stats: Mutex<PqErrorStats>,
}

impl IndexReader {
    /// Open an index directory written by the builder. `search_list_size`
    /// bounds the candidate queue; larger values trade latency for recall.
    pub fn open(dir: &Path, search_list_size: usize) -> Result<Self> {
        if search_list_size == 0 {
            return Err(QuiverError::Config(
                "search_list_size must be positive".to_string(),
            ));
        }

        let meta = std::fs::read(dir.join(META_FILE))?;
        let body = verify_checksum(&meta, META_FILE)?;

        let mut cursor = MetaCursor::new(body);
        if cursor.bytes(4)? != META_MAGIC {
            return Err(QuiverError::Corruption(format!(
                "{META_FILE}: bad magic"
            )));
        }
        let version = cursor.u32()?;
        if version != FORMAT_VERSION {
            return Err(QuiverError::Corruption(format!(
                "{META_FILE}: unsupported format version {version}"
            )));
        }

        let dimensions = cursor.u32()? as usize;
        let max_degree = cursor.u32()? as usize;
        let kind = DistanceKind::from_code(cursor.u32()? as u8)?;
        let vertex_count = cursor.u64()? as usize;
        let medoid = cursor.u32()?;
        if vertex_count > 0 && medoid as usize >= vertex_count {
            return Err(QuiverError::Corruption(format!(
                "{META_FILE}: medoid {medoid} is outside the {vertex_count} stored vertices"
            )));
        }

        let layout = PageLayout::new(dimensions, max_degree);

        let page_count = cursor.u32()? as usize;
        if page_count != layout.pages_for(vertex_count) {
            return Err(QuiverError::Corruption(format!(
                "{META_FILE}: page table holds {page_count} pages, expected {}",
                layout.pages_for(vertex_count)
            )));
        }
        let mut page_offsets = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            page_offsets.push(cursor.u64()?);
        }

        let mut external_ids = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            let len = cursor.u16()? as usize;
            external_ids.push(cursor.bytes(len)?.to_vec());
        }

        let quantizer = read_pq(dir, dimensions, kind)?;
        if quantizer.encoded_count() != vertex_count {
            return Err(QuiverError::Corruption(format!(
                "{PQ_FILE}: {} encoded vectors, index holds {vertex_count}",
                quantizer.encoded_count()
            )));
        }

        let file = File::open(dir.join(GRAPH_FILE))?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < page_count * layout.page_size {
            return Err(QuiverError::Corruption(format!(
                "{GRAPH_FILE}: {} bytes, expected at least {}",
                mmap.len(),
                page_count * layout.page_size
            )));
        }

        Ok(Self {
            layout,
            kind,
            vertex_count,
            medoid,
            search_list_size,
            page_offsets,
            external_ids,
            quantizer,
            mmap,
            pq_stats: Mutex::new(PqErrorStats::default()),
        })
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.layout.dimensions
    }

    #[inline]
    pub fn medoid(&self) -> u32 {
        self.medoid
    }

    #[inline]
    pub fn distance_kind(&self) -> DistanceKind {
        self.kind
    }

    /// External identifier bytes recorded for a vertex at build time.
    pub fn external_id(&self, vertex: u32) -> &[u8] {
        &self.external_ids[vertex as usize]
    }

    /// Mean relative error (percent) between PQ estimates and the precise
    /// distances that replaced them.
    pub fn pq_error_avg(&self) -> f64 {
        let stats = self.pq_stats.lock();
        if stats.recalculated == 0 {
            0.0
        } else {
            stats.total_error / stats.recalculated as f64
        }
    }

    pub fn reset_pq_error_stat(&self) {
        *self.pq_stats.lock() = PqErrorStats::default();
    }

    /// The `k` approximate nearest vertices to `query`, nearest first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<u32>> {
        let mut scratch = SearchScratch::new(self);
        self.nearest_with_scratch(&mut scratch, query, k)
    }

    /// As [`nearest`](Self::nearest), reusing caller-owned scratch buffers.
    pub fn nearest_with_scratch(
        &self,
        scratch: &mut SearchScratch,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<u32>> {
        if query.len() != self.layout.dimensions {
            return Err(QuiverError::InvalidData(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.layout.dimensions
            )));
        }
        if self.vertex_count == 0 {
            return Ok(Vec::new());
        }

        scratch.reset();
        let mut stats = PqErrorStats::default();

        let start = self.medoid;
        scratch
            .candidates
            .add(start, self.kind.distance(self.vector_at(start), query), false);
        scratch.visited.insert(start);

        loop {
            let mut current: Option<u32> = None;

            // Serve precise entries; recompute PQ estimates in quartets until
            // a precise entry reaches the head of the queue.
            'recalculation: loop {
                scratch.pending.clear();

                while scratch.pending.len() < 4 {
                    match scratch.candidates.next_not_checked() {
                        None => {
                            if scratch.pending.is_empty() {
                                break 'recalculation;
                            }
                            self.recalculate_distances(query, scratch, &mut stats);
                            continue;
                        }
                        Some(pos) => {
                            if scratch.candidates.is_pq_distance(pos) {
                                scratch.pending.push(pos);
                            } else {
                                if !scratch.pending.is_empty() {
                                    self.recalculate_distances(query, scratch, &mut stats);
                                    continue;
                                }
                                current = Some(scratch.candidates.vertex_index(pos));
                                break 'recalculation;
                            }
                        }
                    }
                }

                self.recalculate_distances(query, scratch, &mut stats);
            }

            let Some(current) = current else { break };

            let record = self.record_offset(current);
            let edge_count = self.mmap[record + self.layout.edge_count_offset()] as usize;
            let edges_at = record + self.layout.edges_offset();

            for slot in 0..edge_count {
                let at = edges_at + slot * 4;
                let neighbour =
                    u32::from_le_bytes(self.mmap[at..at + 4].try_into().unwrap());
                if neighbour as usize >= self.vertex_count {
                    return Err(QuiverError::Corruption(format!(
                        "{GRAPH_FILE}: vertex {current} links to {neighbour}, outside the {} stored vertices",
                        self.vertex_count
                    )));
                }

                if scratch.visited.insert(neighbour) {
                    if !scratch.lookup_ready {
                        self.quantizer
                            .build_lookup_table(query, &mut scratch.lookup_table);
                        scratch.lookup_ready = true;
                    }

                    scratch.quartet.push(neighbour);
                    if scratch.quartet.len() == 4 {
                        self.compute_pq_distances(scratch);
                    }
                }
            }

            if !scratch.quartet.is_empty() {
                self.compute_pq_distances(scratch);
            }
        }

        {
            let mut shared = self.pq_stats.lock();
            shared.recalculated += stats.recalculated;
            shared.total_error += stats.total_error;
        }

        let mut result = vec![0u32; k.min(scratch.candidates.len())];
        let written = scratch.candidates.vertex_indices(&mut result);
        result.truncate(written);
        Ok(result)
    }

    /// Queue the PQ distances of the deferred quartet (or its tail).
    fn compute_pq_distances(&self, scratch: &mut SearchScratch) {
        let mut distances = [0.0f32; 4];

        if scratch.quartet.len() == 4 {
            let indexes = [
                scratch.quartet[0],
                scratch.quartet[1],
                scratch.quartet[2],
                scratch.quartet[3],
            ];
            self.quantizer
                .pq_distance_batch4(&scratch.lookup_table, indexes, &mut distances);
            for lane in 0..4 {
                self.add_pq_distance(scratch, indexes[lane], distances[lane]);
            }
        } else {
            for slot in 0..scratch.quartet.len() {
                let vertex = scratch.quartet[slot];
                let distance = self.quantizer.pq_distance(&scratch.lookup_table, vertex);
                self.add_pq_distance(scratch, vertex, distance);
            }
        }

        scratch.quartet.clear();
    }

    fn add_pq_distance(&self, scratch: &mut SearchScratch, vertex: u32, distance: f32) {
        if scratch.candidates.len() < self.search_list_size
            || scratch.candidates.max_distance() >= distance
        {
            scratch.candidates.add(vertex, distance, true);
        }
    }

    /// Replace the PQ estimates at the pending queue positions with precise
    /// distances. Each resort can shift the later pending positions by at
    /// most one; the bitwise fixup `idx - ((idx - new_pos - 1) >> 31)`
    /// adjusts them without a branch.
    fn recalculate_distances(
        &self,
        query: &[f32],
        scratch: &mut SearchScratch,
        stats: &mut PqErrorStats,
    ) {
        let queue = &mut scratch.candidates;
        let pending = &mut scratch.pending;

        if pending.len() < 4 {
            for i in 0..pending.len() {
                let pos = pending[i];
                let vertex = queue.vertex_index(pos);
                let pq_distance = queue.vertex_distance(pos);
                let precise = self.kind.distance(self.vector_at(vertex), query);
                let new_pos = queue.resort_vertex(pos, precise);

                for later in pending.iter_mut().skip(i + 1) {
                    *later = fixup_position(*later, new_pos);
                }

                record_error(stats, precise, pq_distance);
            }
        } else {
            let p1 = pending[0];
            let mut p2 = pending[1];
            let mut p3 = pending[2];
            let mut p4 = pending[3];
            debug_assert!(p1 < p2 && p2 < p3 && p3 < p4);

            let v1 = queue.vertex_index(p1);
            let v2 = queue.vertex_index(p2);
            let v3 = queue.vertex_index(p3);
            let v4 = queue.vertex_index(p4);

            let pq1 = queue.vertex_distance(p1);
            let pq2 = queue.vertex_distance(p2);
            let pq3 = queue.vertex_distance(p3);
            let pq4 = queue.vertex_distance(p4);

            let mut distances = [0.0f32; 4];
            self.kind.distance_batch4(
                query,
                self.vector_at(v1),
                self.vector_at(v2),
                self.vector_at(v3),
                self.vector_at(v4),
                &mut distances,
            );

            let new1 = queue.resort_vertex(p1, distances[0]);
            p2 = fixup_position(p2, new1);
            p3 = fixup_position(p3, new1);
            p4 = fixup_position(p4, new1);
            debug_assert_eq!(queue.vertex_index(p2), v2);

            let new2 = queue.resort_vertex(p2, distances[1]);
            p3 = fixup_position(p3, new2);
            p4 = fixup_position(p4, new2);
            debug_assert_eq!(queue.vertex_index(p3), v3);

            let new3 = queue.resort_vertex(p3, distances[2]);
            p4 = fixup_position(p4, new3);
            debug_assert_eq!(queue.vertex_index(p4), v4);

            queue.resort_vertex(p4, distances[3]);

            record_error(stats, distances[0], pq1);
            record_error(stats, distances[1], pq2);
            record_error(stats, distances[2], pq3);
            record_error(stats, distances[3], pq4);
        }

        pending.clear();
    }

    /// Byte offset of a vertex record. Vertex ids are validated against the
    /// stored count before they enter the search state.
    #[inline]
    fn record_offset(&self, vertex: u32) -> usize {
        debug_assert!((vertex as usize) < self.vertex_count);
        let page = vertex as usize / self.layout.vertices_per_page;
        let in_page = vertex as usize % self.layout.vertices_per_page;
        self.page_offsets[page] as usize + in_page * self.layout.record_size + 4
    }

    /// Borrow the vector payload of a record straight from the mapping.
    /// Record offsets are 4-byte aligned by construction.
    #[inline]
    fn vector_at(&self, vertex: u32) -> &[f32] {
        let offset = self.record_offset(vertex);
        let bytes = &self.mmap[offset..offset + self.layout.dimensions * 4];
        let (prefix, floats, _) = unsafe { bytes.align_to::<f32>() };
        debug_assert!(prefix.is_empty());
        &floats[..self.layout.dimensions]
    }
}

#[inline]
fn record_error(stats: &mut PqErrorStats, precise: f32, pq_distance: f32) {
    if precise != 0.0 {
        stats.recalculated += 1;
        stats.total_error += 100.0 * ((precise - pq_distance).abs() / precise.abs()) as f64;
    }
}

/// If `idx <= new_pos`, the resorted entry passed over `idx`, which therefore
/// slid down one slot.
#[inline]
fn fixup_position(idx: usize, new_pos: usize) -> usize {
    let idx = idx as u32;
    let new_pos = new_pos as u32;
    (idx - (idx.wrapping_sub(new_pos).wrapping_sub(1) >> 31)) as usize
}

fn verify_checksum<'a>(buf: &'a [u8], what: &str) -> Result<&'a [u8]> {
    if buf.len() < 4 {
        return Err(QuiverError::Corruption(format!("{what}: file truncated")));
    }
    let (body, tail) = buf.split_at(buf.len() - 4);
    let stored = u32::from_le_bytes(tail.try_into().unwrap());
    if crc32fast::hash(body) != stored {
        return Err(QuiverError::Corruption(format!(
            "{what}: checksum mismatch"
        )));
    }
    Ok(body)
}

fn read_pq(dir: &Path, dimensions: usize, kind: DistanceKind) -> Result<ProductQuantizer> {
    let buf = std::fs::read(dir.join(PQ_FILE))?;
    let body = verify_checksum(&buf, PQ_FILE)?;

    let mut cursor = MetaCursor::new(body);
    if cursor.bytes(4)? != PQ_MAGIC {
        return Err(QuiverError::Corruption(format!("{PQ_FILE}: bad magic")));
    }
    let version = cursor.u32()?;
    if version != FORMAT_VERSION {
        return Err(QuiverError::Corruption(format!(
            "{PQ_FILE}: unsupported format version {version}"
        )));
    }

    let quantizer_count = cursor.u32()? as usize;
    let sub_dim = cursor.u32()? as usize;
    let k = cursor.u32()? as usize;
    let code_len = cursor.u64()? as usize;

    if quantizer_count == 0 || sub_dim * quantizer_count != dimensions {
        return Err(QuiverError::Corruption(format!(
            "{PQ_FILE}: {quantizer_count} subvectors of width {sub_dim} do not cover dimension {dimensions}"
        )));
    }

    let centroid_len = quantizer_count * k * sub_dim;
    let centroid_bytes = cursor.bytes(centroid_len * 4)?;
    let mut centroids = Vec::with_capacity(centroid_len);
    for chunk in centroid_bytes.chunks_exact(4) {
        centroids.push(f32::from_le_bytes(chunk.try_into().unwrap()));
    }

    let codes = cursor.bytes(code_len)?.to_vec();

    ProductQuantizer::from_parts(dimensions, quantizer_count, k, kind, centroids, codes)
}
