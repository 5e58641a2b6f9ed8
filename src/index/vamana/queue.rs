//! Bounded candidate queue for greedy graph search
//!
//! A fixed-capacity list of `(vertex, distance)` entries kept sorted by
//! ascending distance, ties broken by insertion order. Each entry carries two
//! flags: whether its distance is still a PQ estimate, and whether the search
//! has already taken it ("checked"). A cursor tracks the first position that
//! may still hold an unchecked entry; inserts and resorts below the cursor
//! pull it back, so an entry whose distance tightens past already-consumed
//! positions becomes eligible again.

const FLAG_PQ_DISTANCE: u8 = 1;
const FLAG_CHECKED: u8 = 1 << 1;

pub struct CandidateQueue {
    capacity: usize,
    vertices: Vec<u32>,
    distances: Vec<f32>,
    flags: Vec<u8>,
    /// Every entry below this position is checked.
    cursor: usize,
}

impl CandidateQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            vertices: Vec::with_capacity(capacity),
            distances: Vec::with_capacity(capacity),
            flags: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.distances.clear();
        self.flags.clear();
        self.cursor = 0;
    }

    /// Insert a candidate. When the queue is full, a candidate no nearer than
    /// the current worst entry is dropped; otherwise the worst entry is
    /// evicted to make room.
    pub fn add(&mut self, vertex: u32, distance: f32, is_pq_distance: bool) {
        let pos = self.insertion_point(distance);

        if self.vertices.len() == self.capacity {
            if pos == self.capacity {
                return;
            }
            self.vertices.pop();
            self.distances.pop();
            self.flags.pop();
            self.cursor = self.cursor.min(self.vertices.len());
        }

        self.vertices.insert(pos, vertex);
        self.distances.insert(pos, distance);
        self.flags
            .insert(pos, if is_pq_distance { FLAG_PQ_DISTANCE } else { 0 });

        if pos < self.cursor {
            self.cursor = pos;
        }
    }

    /// Distance of the current worst retained entry.
    #[inline]
    pub fn max_distance(&self) -> f32 {
        self.distances.last().copied().unwrap_or(f32::MAX)
    }

    #[inline]
    pub fn vertex_index(&self, pos: usize) -> u32 {
        self.vertices[pos]
    }

    #[inline]
    pub fn vertex_distance(&self, pos: usize) -> f32 {
        self.distances[pos]
    }

    #[inline]
    pub fn is_pq_distance(&self, pos: usize) -> bool {
        self.flags[pos] & FLAG_PQ_DISTANCE != 0
    }

    /// Position of the nearest entry the search has not consumed yet, or
    /// `None` when every retained entry is checked. The returned entry is
    /// marked checked.
    pub fn next_not_checked(&mut self) -> Option<usize> {
        let mut pos = self.cursor;
        while pos < self.flags.len() && self.flags[pos] & FLAG_CHECKED != 0 {
            pos += 1;
        }

        if pos == self.flags.len() {
            self.cursor = pos;
            return None;
        }

        self.flags[pos] |= FLAG_CHECKED;
        self.cursor = pos + 1;
        Some(pos)
    }

    /// Replace the distance of the entry at `pos` (typically a PQ estimate
    /// tightened to a precise value) and move it to its new sorted position,
    /// which is returned. The PQ flag is cleared; the checked flag survives.
    pub fn resort_vertex(&mut self, pos: usize, new_distance: f32) -> usize {
        let vertex = self.vertices.remove(pos);
        let flags = self.flags.remove(pos) & !FLAG_PQ_DISTANCE;
        self.distances.remove(pos);

        let new_pos = self.insertion_point(new_distance);
        self.vertices.insert(new_pos, vertex);
        self.distances.insert(new_pos, new_distance);
        self.flags.insert(new_pos, flags);

        self.cursor = self.cursor.min(pos.min(new_pos));
        new_pos
    }

    /// Copy the nearest entries into `out`, nearest first. Returns how many
    /// were written.
    pub fn vertex_indices(&self, out: &mut [u32]) -> usize {
        let count = out.len().min(self.vertices.len());
        out[..count].copy_from_slice(&self.vertices[..count]);
        count
    }

    /// First index whose distance is strictly greater than `distance`; equal
    /// distances sort before the new entry, preserving insertion order.
    #[inline]
    fn insertion_point(&self, distance: f32) -> usize {
        self.distances.partition_point(|&d| d <= distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_sorted_by_distance() {
        let mut queue = CandidateQueue::new(8);
        queue.add(1, 3.0, false);
        queue.add(2, 1.0, false);
        queue.add(3, 2.0, false);

        assert_eq!(queue.vertex_index(0), 2);
        assert_eq!(queue.vertex_index(1), 3);
        assert_eq!(queue.vertex_index(2), 1);
        assert_eq!(queue.max_distance(), 3.0);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut queue = CandidateQueue::new(8);
        queue.add(10, 1.0, false);
        queue.add(11, 1.0, false);
        queue.add(12, 1.0, false);

        assert_eq!(queue.vertex_index(0), 10);
        assert_eq!(queue.vertex_index(1), 11);
        assert_eq!(queue.vertex_index(2), 12);
    }

    #[test]
    fn test_capacity_evicts_worst() {
        let mut queue = CandidateQueue::new(2);
        queue.add(1, 5.0, false);
        queue.add(2, 3.0, false);
        queue.add(3, 4.0, false);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.vertex_index(0), 2);
        assert_eq!(queue.vertex_index(1), 3);

        // No better than the worst retained entry: dropped.
        queue.add(4, 4.0, false);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.vertex_index(1), 3);
    }

    #[test]
    fn test_next_not_checked_walks_in_distance_order() {
        let mut queue = CandidateQueue::new(8);
        queue.add(1, 3.0, false);
        queue.add(2, 1.0, false);
        queue.add(3, 2.0, false);

        let mut seen = Vec::new();
        while let Some(pos) = queue.next_not_checked() {
            seen.push(queue.vertex_index(pos));
        }
        assert_eq!(seen, vec![2, 3, 1]);
        assert_eq!(queue.next_not_checked(), None);
    }

    #[test]
    fn test_insert_below_cursor_becomes_eligible() {
        let mut queue = CandidateQueue::new(8);
        queue.add(1, 10.0, false);
        queue.add(2, 20.0, false);
        assert_eq!(queue.next_not_checked(), Some(0));
        assert_eq!(queue.next_not_checked(), Some(1));
        assert_eq!(queue.next_not_checked(), None);

        // A nearer insert pulls the cursor back.
        queue.add(3, 5.0, false);
        let pos = queue.next_not_checked().expect("new entry must be eligible");
        assert_eq!(queue.vertex_index(pos), 3);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_resort_clears_pq_flag_and_repositions() {
        let mut queue = CandidateQueue::new(8);
        queue.add(1, 1.0, false);
        queue.add(2, 2.0, true);
        queue.add(3, 3.0, false);

        assert!(queue.is_pq_distance(1));
        let new_pos = queue.resort_vertex(1, 4.0);
        assert_eq!(new_pos, 2);
        assert_eq!(queue.vertex_index(2), 2);
        assert!(!queue.is_pq_distance(2));
        assert_eq!(queue.vertex_distance(2), 4.0);
    }

    #[test]
    fn test_resort_below_cursor_reactivates_shifted_entries() {
        let mut queue = CandidateQueue::new(8);
        queue.add(1, 1.0, true);
        queue.add(2, 2.0, false);

        // Consume vertex 1, then tighten it past vertex 2.
        let pos = queue.next_not_checked().unwrap();
        assert_eq!(queue.vertex_index(pos), 1);
        queue.resort_vertex(pos, 3.0);

        // Vertex 2 slid into position 0 and must still be served.
        let pos = queue.next_not_checked().unwrap();
        assert_eq!(queue.vertex_index(pos), 2);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_vertex_indices_nearest_first() {
        let mut queue = CandidateQueue::new(8);
        for (vertex, distance) in [(5u32, 5.0f32), (4, 4.0), (9, 9.0), (1, 1.0)] {
            queue.add(vertex, distance, false);
        }

        let mut out = [0u32; 3];
        let written = queue.vertex_indices(&mut out);
        assert_eq!(written, 3);
        assert_eq!(out, [1, 4, 5]);

        let mut wide = [0u32; 16];
        assert_eq!(queue.vertex_indices(&mut wide), 4);
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut queue = CandidateQueue::new(4);
        queue.add(1, 1.0, false);
        queue.next_not_checked();
        queue.clear();

        assert!(queue.is_empty());
        queue.add(2, 2.0, false);
        assert_eq!(queue.next_not_checked(), Some(0));
    }
}
