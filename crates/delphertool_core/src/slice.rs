use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::error::ConfigError;

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*[-:]\s*(\d+)\s*$").expect("range pattern compiles")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SliceMode {
    #[default]
    All,
    /// First `n` records.
    Head(usize),
    /// 1-based, inclusive.
    Range(usize, usize),
}

impl SliceMode {
    pub fn from_parts(head: Option<usize>, range: Option<(usize, usize)>) -> Result<Self, ConfigError> {
        match (head, range) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingSliceMode),
            (Some(count), None) => Ok(Self::Head(count)),
            (None, Some((start, end))) => Ok(Self::Range(start, end)),
            (None, None) => Ok(Self::All),
        }
    }
}

/// Parse `N-M` (or `N:M`).
pub fn parse_range(value: &str) -> Result<(usize, usize), ConfigError> {
    let malformed = || ConfigError::MalformedRange(value.to_string());
    let captures = RANGE_RE.captures(value).ok_or_else(malformed)?;
    let start = captures[1].parse::<usize>().map_err(|_| malformed())?;
    let end = captures[2].parse::<usize>().map_err(|_| malformed())?;
    Ok((start, end))
}

/// Restrict the worklist. Bounds are never clamped: anything outside the list is a
/// configuration error.
pub fn slice_records<T: Clone>(records: &[T], mode: SliceMode) -> Result<Vec<T>, ConfigError> {
    let total = records.len();
    match mode {
        SliceMode::All => {
            info!(total, "no head/range set; processing all records");
            Ok(records.to_vec())
        }
        SliceMode::Head(count) => {
            if count < 1 || count > total {
                return Err(ConfigError::SliceOutOfRange {
                    total,
                    detail: format!("head must be between 1 and {total}, got {count}"),
                });
            }
            info!(head = count, total, "using head slice");
            Ok(records[..count].to_vec())
        }
        SliceMode::Range(start, end) => {
            if start < 1 || end < start || end > total {
                return Err(ConfigError::SliceOutOfRange {
                    total,
                    detail: format!("range {start}-{end} must satisfy 1 <= start <= end <= {total}"),
                });
            }
            info!(start, end, total, "using inclusive range slice");
            Ok(records[start - 1..end].to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: usize) -> Vec<usize> {
        (1..=count).collect()
    }

    #[test]
    fn all_passes_through() {
        assert_eq!(slice_records(&ids(3), SliceMode::All).expect("slice"), vec![1, 2, 3]);
        assert!(slice_records::<usize>(&[], SliceMode::All).expect("slice").is_empty());
    }

    #[test]
    fn head_takes_first_records() {
        assert_eq!(slice_records(&ids(5), SliceMode::Head(2)).expect("slice"), vec![1, 2]);
        assert_eq!(slice_records(&ids(5), SliceMode::Head(5)).expect("slice"), ids(5));
    }

    #[test]
    fn head_out_of_bounds_is_rejected() {
        assert!(matches!(
            slice_records(&ids(5), SliceMode::Head(0)),
            Err(ConfigError::SliceOutOfRange { total: 5, .. })
        ));
        assert!(matches!(
            slice_records(&ids(5), SliceMode::Head(6)),
            Err(ConfigError::SliceOutOfRange { .. })
        ));
    }

    #[test]
    fn range_is_one_based_and_inclusive() {
        assert_eq!(
            slice_records(&ids(10), SliceMode::Range(3, 5)).expect("slice"),
            vec![3, 4, 5]
        );
        assert_eq!(slice_records(&ids(10), SliceMode::Range(10, 10)).expect("slice"), vec![10]);
    }

    #[test]
    fn range_out_of_bounds_is_rejected() {
        for mode in [
            SliceMode::Range(0, 2),
            SliceMode::Range(4, 3),
            SliceMode::Range(9, 11),
        ] {
            assert!(
                matches!(slice_records(&ids(10), mode), Err(ConfigError::SliceOutOfRange { .. })),
                "{mode:?} should be rejected"
            );
        }
    }

    #[test]
    fn head_and_range_conflict() {
        assert_eq!(
            SliceMode::from_parts(Some(3), Some((1, 2))),
            Err(ConfigError::ConflictingSliceMode)
        );
        assert_eq!(SliceMode::from_parts(None, None), Ok(SliceMode::All));
        assert_eq!(SliceMode::from_parts(Some(0), None), Ok(SliceMode::Head(0)));
    }

    #[test]
    fn parse_range_accepts_dash_or_colon() {
        assert_eq!(parse_range("51-200"), Ok((51, 200)));
        assert_eq!(parse_range(" 3 : 7 "), Ok((3, 7)));
        assert_eq!(
            parse_range("3..7"),
            Err(ConfigError::MalformedRange("3..7".to_string()))
        );
        assert!(parse_range("-5").is_err());
    }
}
