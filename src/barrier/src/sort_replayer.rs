// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Records the permutation a stable sort applies so it can later be
/// reversed, without requiring `T: Clone`.
///
/// `CountedBarrierController` uses this to sort arrived inputs before
/// handing them to an aggregate action, then restore the pre-sort
/// (registration) order of the *outputs* so each arrival gets the result
/// aligned with its own position.
pub struct SortReplayer {
    /// `permutation[i]` is the original index of the item now at sorted
    /// position `i`, i.e. `sorted[i] == original[permutation[i]]`.
    permutation: Vec<usize>,
}

impl SortReplayer {
    /// Stably sorts `items` by their natural order, returning the sorted
    /// items alongside a replayer that can restore the original order of a
    /// same-length, sorted result list via [`SortReplayer::unsort`]. Does
    /// not require `T: Clone`.
    pub fn sort<T: Ord>(items: Vec<T>) -> (Vec<T>, Self) {
        Self::sort_by_key(items, |a, b| a.cmp(b))
    }

    /// Stably sorts `items` using a custom comparator, returning the sorted
    /// items alongside a replayer that can restore the original order of a
    /// same-length, sorted result list via [`SortReplayer::unsort`].
    pub fn sort_by_key<T, F>(items: Vec<T>, mut cmp: F) -> (Vec<T>, Self)
    where
        F: FnMut(&T, &T) -> std::cmp::Ordering,
    {
        let mut indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
        indexed.sort_by(|(_, a), (_, b)| cmp(a, b));
        let (permutation, sorted): (Vec<usize>, Vec<T>) = indexed.into_iter().unzip();
        (sorted, Self { permutation })
    }

    /// Reverses the recorded permutation: given a list of outputs positioned
    /// as the sorted inputs were, returns the outputs reordered back to the
    /// original (pre-sort) positions. Panics if `outputs.len()` differs from
    /// the recorded permutation's length — callers must check sizes first
    /// (this is exactly what `BadAggregatorOutput` guards against upstream).
    pub fn unsort<T>(&self, outputs: Vec<T>) -> Vec<T> {
        assert_eq!(
            outputs.len(),
            self.permutation.len(),
            "unsort called with a mismatched-length output list"
        );
        let mut slots: Vec<Option<T>> = (0..outputs.len()).map(|_| None).collect();
        for (sorted_pos, output) in outputs.into_iter().enumerate() {
            let original_pos = self.permutation[sorted_pos];
            slots[original_pos] = Some(output);
        }
        slots.into_iter().map(|slot| slot.expect("every original position is filled exactly once")).collect()
    }

    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }
}
