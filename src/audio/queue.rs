use crate::api::models::Track;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub tracks: Vec<Track>,
    pub current_index: Option<usize>,
    pub shuffle: bool,
    pub shuffle_order: Vec<usize>,
    pub repeat_mode: RepeatMode,
}

/// Ordered track list with a current position, shuffle permutation and
/// repeat policy.
///
/// `current_index` is `None` exactly when the queue is empty. While shuffle
/// is on, `shuffle_order` is a full permutation of the track indices.
pub struct PlaybackQueue {
    tracks: Vec<Track>,
    current_index: Option<usize>,
    shuffle: bool,
    shuffle_order: Vec<usize>,
    repeat_mode: RepeatMode,
    rng: StdRng,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic shuffles, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current_index: None,
            shuffle: false,
            shuffle_order: Vec::new(),
            repeat_mode: RepeatMode::None,
            rng,
        }
    }

    pub fn set_queue(&mut self, tracks: Vec<Track>, start_index: usize) {
        self.tracks = tracks;
        self.current_index = if self.tracks.is_empty() {
            None
        } else {
            Some(start_index.min(self.tracks.len() - 1))
        };
        if self.shuffle {
            self.regenerate_order(true);
        }
    }

    pub fn append(&mut self, track: Track) {
        self.tracks.push(track);
        if self.current_index.is_none() {
            self.current_index = Some(0);
        }
        if self.shuffle {
            self.regenerate_order(true);
        }
    }

    pub fn remove_at(&mut self, index: usize) {
        if index >= self.tracks.len() {
            return;
        }

        self.tracks.remove(index);

        if let Some(current) = self.current_index {
            if index < current {
                self.current_index = Some(current - 1);
            } else if index == current && current >= self.tracks.len() {
                self.current_index = if self.tracks.is_empty() {
                    None
                } else {
                    Some(self.tracks.len() - 1)
                };
            }
        }

        if self.shuffle {
            self.regenerate_order(true);
        }
    }

    pub fn enable_shuffle(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        self.shuffle = true;
        self.regenerate_order(true);
    }

    pub fn disable_shuffle(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        self.shuffle = false;
        self.shuffle_order.clear();
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled {
            self.enable_shuffle();
        } else {
            self.disable_shuffle();
        }
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat_mode = match self.repeat_mode {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        };
        self.repeat_mode
    }

    /// Fisher-Yates over all indices. With `pin_current`, the current index
    /// is moved to the front so a walk from it covers every other track.
    fn regenerate_order(&mut self, pin_current: bool) {
        let mut order: Vec<usize> = (0..self.tracks.len()).collect();
        order.shuffle(&mut self.rng);
        if pin_current {
            if let Some(current) = self.current_index {
                if let Some(pos) = order.iter().position(|&i| i == current) {
                    order.swap(0, pos);
                }
            }
        }
        self.shuffle_order = order;
    }

    fn shuffle_position(&self, index: usize) -> Option<usize> {
        self.shuffle_order.iter().position(|&i| i == index)
    }

    /// Index to play after the current one, or `None` at the end of the queue.
    ///
    /// Wrapping under `RepeatMode::All` with shuffle on draws a fresh permutation.
    pub fn next_index(&mut self) -> Option<usize> {
        let current = self.current_index?;

        if self.repeat_mode == RepeatMode::One {
            return Some(current);
        }

        if self.shuffle {
            let next_pos = self.shuffle_position(current).map(|p| p + 1).unwrap_or(0);
            if let Some(&index) = self.shuffle_order.get(next_pos) {
                return Some(index);
            }
            if self.repeat_mode == RepeatMode::All {
                self.regenerate_order(false);
                return self.shuffle_order.first().copied();
            }
            return None;
        }

        if current + 1 < self.tracks.len() {
            Some(current + 1)
        } else if self.repeat_mode == RepeatMode::All {
            Some(0)
        } else {
            None
        }
    }

    /// Index to play before the current one. Always wraps.
    pub fn previous_index(&self) -> Option<usize> {
        let current = self.current_index?;
        let len = self.tracks.len();

        if self.shuffle {
            return match self.shuffle_position(current) {
                Some(pos) if pos > 0 => self.shuffle_order.get(pos - 1).copied(),
                _ => self.shuffle_order.last().copied(),
            };
        }

        Some(if current > 0 { current - 1 } else { len - 1 })
    }

    pub fn set_current(&mut self, index: usize) -> Option<&Track> {
        if index < self.tracks.len() {
            self.current_index = Some(index);
        }
        self.current_track()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn track_at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Fill in a duration the original listing did not know.
    pub fn enrich_duration(&mut self, track_id: &str, seconds: u64) {
        if seconds == 0 {
            return;
        }
        for track in self.tracks.iter_mut().filter(|t| t.id == track_id) {
            if track.duration_seconds == 0 {
                track.duration_seconds = seconds;
            }
        }
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.shuffle_order.clear();
        self.current_index = None;
    }

    pub fn state(&self) -> QueueState {
        QueueState {
            tracks: self.tracks.clone(),
            current_index: self.current_index,
            shuffle: self.shuffle,
            shuffle_order: self.shuffle_order.clone(),
            repeat_mode: self.repeat_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::new(*id, *id)).collect()
    }

    fn abc() -> PlaybackQueue {
        let mut queue = PlaybackQueue::with_seed(7);
        queue.set_queue(tracks(&["A", "B", "C"]), 0);
        queue
    }

    /// Advance the way the session does: ask, then move.
    fn walk(queue: &mut PlaybackQueue, steps: usize) -> Vec<Option<usize>> {
        (0..steps)
            .map(|_| {
                let next = queue.next_index();
                if let Some(i) = next {
                    queue.set_current(i);
                }
                next
            })
            .collect()
    }

    #[test]
    fn linear_no_repeat_ends() {
        let mut queue = abc();
        assert_eq!(walk(&mut queue, 3), vec![Some(1), Some(2), None]);
    }

    #[test]
    fn linear_repeat_all_cycles() {
        let mut queue = abc();
        queue.set_repeat(RepeatMode::All);
        assert_eq!(
            walk(&mut queue, 5),
            vec![Some(1), Some(2), Some(0), Some(1), Some(2)]
        );
    }

    #[test]
    fn repeat_one_stays() {
        let mut queue = abc();
        queue.set_current(1);
        queue.set_repeat(RepeatMode::One);
        assert_eq!(walk(&mut queue, 3), vec![Some(1), Some(1), Some(1)]);
    }

    #[test]
    fn shuffle_order_is_permutation_and_walk_covers_all() {
        for n in 1..12 {
            let ids: Vec<String> = (0..n).map(|i| format!("t{}", i)).collect();
            let mut queue = PlaybackQueue::with_seed(n as u64);
            queue.set_queue(ids.iter().map(|id| Track::new(id.as_str(), "x")).collect(), n / 2);
            queue.enable_shuffle();

            let mut order = queue.state().shuffle_order;
            order.sort_unstable();
            assert_eq!(order, (0..n).collect::<Vec<_>>());

            let start = queue.current_index().unwrap();
            let mut seen: Vec<usize> = walk(&mut queue, n - 1).into_iter().flatten().collect();
            assert_eq!(seen.len(), n - 1);
            seen.push(start);
            seen.sort_unstable();
            assert_eq!(seen, (0..n).collect::<Vec<_>>());
            assert_eq!(queue.next_index(), None);
        }
    }

    #[test]
    fn shuffle_repeat_all_regenerates_at_end() {
        let mut queue = abc();
        queue.enable_shuffle();
        queue.set_repeat(RepeatMode::All);
        walk(&mut queue, 2);
        let wrapped = queue.next_index();
        assert!(wrapped.is_some());
        assert_eq!(wrapped, queue.state().shuffle_order.first().copied());
    }

    #[test]
    fn previous_always_wraps() {
        let mut queue = abc();
        assert_eq!(queue.previous_index(), Some(2));
        queue.set_current(2);
        assert_eq!(queue.previous_index(), Some(1));

        queue.set_repeat(RepeatMode::One);
        assert_eq!(queue.previous_index(), Some(1));

        queue.enable_shuffle();
        let order = queue.state().shuffle_order;
        assert_eq!(order[0], 2);
        assert_eq!(queue.previous_index(), order.last().copied());
    }

    #[test]
    fn remove_before_current_shifts_index() {
        let mut queue = abc();
        queue.set_current(2);
        queue.remove_at(0);
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(queue.current_track().unwrap().id, "C");
    }

    #[test]
    fn remove_current_last_clamps() {
        let mut queue = abc();
        queue.set_current(2);
        queue.remove_at(2);
        assert_eq!(queue.current_index(), Some(1));

        queue.remove_at(1);
        queue.remove_at(0);
        assert_eq!(queue.current_index(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn mutation_regenerates_shuffle() {
        let mut queue = abc();
        queue.enable_shuffle();
        queue.append(Track::new("D", "D"));
        let mut order = queue.state().shuffle_order;
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3]);

        queue.remove_at(1);
        assert_eq!(queue.state().shuffle_order.len(), 3);
    }

    #[test]
    fn set_queue_clamps_start() {
        let mut queue = PlaybackQueue::with_seed(1);
        queue.set_queue(tracks(&["A", "B"]), 9);
        assert_eq!(queue.current_index(), Some(1));
        queue.set_queue(Vec::new(), 0);
        assert_eq!(queue.current_index(), None);
    }

    #[test]
    fn empty_queue_answers_none() {
        let mut queue = PlaybackQueue::with_seed(1);
        assert_eq!(queue.next_index(), None);
        assert_eq!(queue.previous_index(), None);
        queue.enable_shuffle();
        assert!(!queue.is_shuffled());
        queue.remove_at(0);
        assert!(queue.is_empty());
    }

    #[test]
    fn append_to_empty_sets_current() {
        let mut queue = PlaybackQueue::with_seed(1);
        queue.append(Track::new("A", "A"));
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn enrich_only_fills_unknown_duration() {
        let mut queue = abc();
        queue.enrich_duration("A", 180);
        assert_eq!(queue.track_at(0).unwrap().duration_seconds, 180);
        queue.enrich_duration("A", 999);
        assert_eq!(queue.track_at(0).unwrap().duration_seconds, 180);
    }
}
