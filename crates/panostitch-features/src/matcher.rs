use kiddo::immutable::float::kdtree::ImmutableKdTree;
use rayon::prelude::*;

/// Pair budget below which exhaustive search is faster than tree lookups.
const EXHAUSTIVE_PAIR_BUDGET: usize = 250_000;

/// Precision above which the approximate tree search is not trusted.
const EXACT_PRECISION: f32 = 0.99;

/// A correspondence between one descriptor of each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescriptorMatch {
    /// Index into the first frame's keypoint list.
    pub query_idx: usize,
    /// Index into the second frame's keypoint list.
    pub train_idx: usize,
    /// Distance between the two descriptors, smaller is better.
    pub distance: f32,
}

/// Counters describing one matching run.
#[derive(Clone, Copy, Debug, Default)]
pub struct MatchStats {
    /// Keypoints detected in the first frame.
    pub keypoints_a: usize,
    /// Keypoints detected in the second frame.
    pub keypoints_b: usize,
    /// Correspondences before distance filtering.
    pub raw_matches: usize,
    /// Correspondences surviving the tolerance band.
    pub kept_matches: usize,
}

/// How descriptor correspondences are searched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatcherStrategy {
    /// Compare every descriptor pair. Exact, quadratic cost.
    Exhaustive,
    /// Approximate search over a forest of kd-trees.
    KdTrees {
        /// Number of trees the train set is split across.
        trees: usize,
    },
    /// Pick between the two based on the workload and the precision asked of
    /// the result.
    Auto {
        /// Fraction of true nearest neighbours the caller needs, in `[0, 1]`.
        target_precision: f32,
    },
}

impl Default for MatcherStrategy {
    fn default() -> Self {
        Self::Auto {
            target_precision: 0.9,
        }
    }
}

/// Find the nearest train descriptor for every query descriptor.
///
/// `Auto` falls back to the exhaustive search for small workloads or when
/// near-exact results are requested, and to a four-tree forest otherwise.
/// Either side empty yields no matches.
pub fn match_features(
    query: &[[u8; 32]],
    train: &[[u8; 32]],
    strategy: &MatcherStrategy,
) -> Vec<DescriptorMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    match *strategy {
        MatcherStrategy::Exhaustive => match_exhaustive(query, train),
        MatcherStrategy::KdTrees { trees } => match_kd_forest(query, train, trees.max(1)),
        MatcherStrategy::Auto { target_precision } => {
            if query.len() * train.len() <= EXHAUSTIVE_PAIR_BUDGET
                || target_precision >= EXACT_PRECISION
            {
                match_exhaustive(query, train)
            } else {
                match_kd_forest(query, train, 4)
            }
        }
    }
}

/// Keep the matches whose distance lies in a band around the mean.
///
/// The band half-width is `tolerance` times the larger one-sided spread of
/// the distance distribution, so a tolerance of one or more keeps every
/// match and zero keeps only matches at exactly the mean distance.
///
/// # Returns
///
/// `None` when there are no matches to filter.
pub fn filter_matches_by_tolerance(
    matches: &[DescriptorMatch],
    tolerance: f32,
) -> Option<Vec<DescriptorMatch>> {
    if matches.is_empty() {
        return None;
    }

    let mean = matches.iter().map(|m| m.distance).sum::<f32>() / matches.len() as f32;
    let min = matches.iter().map(|m| m.distance).fold(f32::INFINITY, f32::min);
    let max = matches
        .iter()
        .map(|m| m.distance)
        .fold(f32::NEG_INFINITY, f32::max);

    let swing = tolerance * (mean - min).max(max - mean);
    let kept = matches
        .iter()
        .filter(|m| (m.distance - mean).abs() <= swing)
        .copied()
        .collect();

    Some(kept)
}

fn hamming_distance(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

fn match_exhaustive(query: &[[u8; 32]], train: &[[u8; 32]]) -> Vec<DescriptorMatch> {
    query
        .par_iter()
        .enumerate()
        .map(|(query_idx, q)| {
            let mut best_idx = 0usize;
            let mut best_dist = u32::MAX;
            for (train_idx, t) in train.iter().enumerate() {
                let dist = hamming_distance(q, t);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = train_idx;
                }
            }
            DescriptorMatch {
                query_idx,
                train_idx: best_idx,
                distance: best_dist as f32,
            }
        })
        .collect()
}

/// Descriptor bytes lifted to the float coordinates the trees index.
fn lift_descriptor(descriptor: &[u8; 32]) -> [f64; 32] {
    std::array::from_fn(|i| descriptor[i] as f64)
}

/// Approximate search over `trees` kd-trees, each indexing a round-robin
/// slice of the train set. Every tree is queried and the globally closest
/// hit wins.
fn match_kd_forest(query: &[[u8; 32]], train: &[[u8; 32]], trees: usize) -> Vec<DescriptorMatch> {
    let trees = trees.min(train.len());

    let mut subsets: Vec<Vec<[f64; 32]>> = vec![Vec::new(); trees];
    let mut subset_indices: Vec<Vec<usize>> = vec![Vec::new(); trees];
    for (train_idx, descriptor) in train.iter().enumerate() {
        subsets[train_idx % trees].push(lift_descriptor(descriptor));
        subset_indices[train_idx % trees].push(train_idx);
    }

    let forest: Vec<ImmutableKdTree<f64, u32, 32, 32>> = subsets
        .iter()
        .map(|subset| ImmutableKdTree::new_from_slice(subset))
        .collect();

    query
        .par_iter()
        .enumerate()
        .map(|(query_idx, q)| {
            let point = lift_descriptor(q);
            let mut best_idx = 0usize;
            let mut best_dist = f64::INFINITY;
            for (tree, indices) in forest.iter().zip(subset_indices.iter()) {
                let nn = tree.nearest_one::<kiddo::SquaredEuclidean>(&point);
                if nn.distance < best_dist {
                    best_dist = nn.distance;
                    best_idx = indices[nn.item as usize];
                }
            }
            DescriptorMatch {
                query_idx,
                train_idx: best_idx,
                distance: best_dist.sqrt() as f32,
            }
        })
        .collect()
}
