use crate::tile;

/// Pairs of cluster keys, one from each sorted list, whose tiles are equal
/// or nested.
///
/// Both lists must be sorted. Keys of one list are expected not to nest in
/// one another, as for the clusters of a single dataset. The outliers key
/// only pairs with itself.
///
/// ```
/// use geocluster::join::match_cluster_keys;
///
/// let pairs = match_cluster_keys(&["0", "12", "3"], &["01", "02", "1", "3"]);
/// assert_eq!(pairs, [("0", "01"), ("0", "02"), ("12", "1"), ("3", "3")]);
/// ```
pub fn match_cluster_keys<'a, L, R>(left: &'a [L], right: &'a [R]) -> Vec<(&'a str, &'a str)>
where
    L: AsRef<str>,
    R: AsRef<str>,
{
    let mut pairs = Vec::new();
    let (mut li, mut ri) = (0, 0);
    while let (Some(l), Some(r)) = (left.get(li), right.get(ri)) {
        let (l, r) = (l.as_ref(), r.as_ref());
        if l == r {
            pairs.push((l, r));
            li += 1;
            ri += 1;
        } else if r.starts_with(l) && tile::tiles_overlap(l, r) {
            pairs.push((l, r));
            ri += 1;
        } else if l.starts_with(r) && tile::tiles_overlap(l, r) {
            pairs.push((l, r));
            li += 1;
        } else if l < r {
            li += 1;
        } else {
            ri += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force<'a>(left: &[&'a str], right: &[&'a str]) -> Vec<(&'a str, &'a str)> {
        let mut pairs = Vec::new();
        for &l in left {
            for &r in right {
                let overlap = match (tile::bounds_of(l), tile::bounds_of(r)) {
                    (Ok(lb), Ok(rb)) => lb.overlaps_interior(&rb),
                    _ => l == r,
                };
                if overlap {
                    pairs.push((l, r));
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn test_matches_brute_force() {
        let left = ["00", "01", "020", "021", "022", "023", "03", "1", "2", "30", "outliers"];
        let right = ["0", "10", "11", "13", "2", "300", "301", "31", "32", "33", "outliers"];

        let mut pairs = match_cluster_keys(&left, &right);
        pairs.sort_unstable();
        assert_eq!(pairs, brute_force(&left, &right));
    }

    #[test]
    fn test_root_key_does_not_match_outliers() {
        let pairs = match_cluster_keys(&["", "outliers"], &["outliers"]);
        assert_eq!(pairs, [("outliers", "outliers")]);
    }

    #[test]
    fn test_disjoint_keys() {
        let pairs = match_cluster_keys(&["00", "01"], &["10", "2"]);
        assert!(pairs.is_empty());
    }
}
