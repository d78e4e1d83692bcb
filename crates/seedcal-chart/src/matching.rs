use crate::Descriptor;

/// A query→train descriptor correspondence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Two nearest train descriptors (by Hamming distance) of every query descriptor.
///
/// Queries get fewer than two entries only when `train` is that short.
pub fn knn2_match(query: &[Descriptor], train: &[Descriptor]) -> Vec<Vec<DescriptorMatch>> {
    query
        .iter()
        .enumerate()
        .map(|(qi, q)| {
            let mut best: Option<DescriptorMatch> = None;
            let mut second: Option<DescriptorMatch> = None;
            for (ti, t) in train.iter().enumerate() {
                let m = DescriptorMatch {
                    query: qi,
                    train: ti,
                    distance: q.hamming(t),
                };
                match best {
                    Some(b) if m.distance >= b.distance => {
                        if second.map_or(true, |s| m.distance < s.distance) {
                            second = Some(m);
                        }
                    }
                    _ => {
                        second = best;
                        best = Some(m);
                    }
                }
            }
            best.into_iter().chain(second).collect()
        })
        .collect()
}

/// Keep the nearest match of each query when it beats the runner-up by `ratio`.
///
/// A match survives when `d1 <= ratio · d2`; queries without a runner-up are dropped.
pub fn ratio_test_matches(
    query: &[Descriptor],
    train: &[Descriptor],
    ratio: f32,
) -> Vec<DescriptorMatch> {
    knn2_match(query, train)
        .into_iter()
        .filter_map(|pair| match pair.as_slice() {
            [m1, m2] if m1.distance as f32 <= m2.distance as f32 * ratio => Some(*m1),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(bits: u64) -> Descriptor {
        Descriptor([bits, 0, 0, 0])
    }

    #[test]
    fn knn_orders_by_distance() {
        let train = [d(0b1111), d(0b0001), d(0b0011)];
        let pairs = knn2_match(&[d(0)], &train);
        assert_eq!(pairs[0].len(), 2);
        assert_eq!(pairs[0][0].train, 1);
        assert_eq!(pairs[0][0].distance, 1);
        assert_eq!(pairs[0][1].train, 2);
        assert_eq!(pairs[0][1].distance, 2);
    }

    #[test]
    fn ratio_test_drops_ambiguous_matches() {
        let train = [d(0b1), d(0b10), d(u64::MAX)];
        // equidistant to two train entries -> ambiguous
        let ambiguous = ratio_test_matches(&[d(0)], &train, 0.75);
        assert!(ambiguous.is_empty());

        let query = [d(u64::MAX - 1)];
        let clear = ratio_test_matches(&query, &train, 0.75);
        assert_eq!(clear.len(), 1);
        assert_eq!(clear[0].train, 2);
    }

    #[test]
    fn single_train_descriptor_never_passes() {
        assert!(ratio_test_matches(&[d(0)], &[d(0)], 0.9).is_empty());
    }
}
