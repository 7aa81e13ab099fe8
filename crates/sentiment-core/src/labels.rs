use serde::{Deserialize, Serialize};

use crate::error::{Result, SentimentError};

/// Raw dataset scores are 1-based review scores in 1..=6.
pub const RAW_SCORE_MIN: i64 = 1;
pub const RAW_SCORE_MAX: i64 = 6;

const SIX_CLASS_NAMES: [&str; 6] = [
    "Horrible",
    "Really Negative",
    "Negative",
    "Neutral",
    "Positive",
    "Really Positive",
];

const THREE_CLASS_NAMES: [&str; 3] = ["Negative", "Neutral", "Positive"];

/// A fixed bijective mapping between class indices and human-readable
/// sentiment names. Chosen once per trained artifact: the checkpoint metadata
/// records it and serving validates it at load time, so a model trained under
/// one space can never be served under the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSpace {
    /// Merged space: Negative / Neutral / Positive.
    ThreeClass,
    /// Full six-point space, Horrible through Really Positive.
    SixClass,
}

impl LabelSpace {
    pub fn n_classes(&self) -> i64 {
        match self {
            LabelSpace::ThreeClass => 3,
            LabelSpace::SixClass => 6,
        }
    }

    pub fn names(&self) -> &'static [&'static str] {
        match self {
            LabelSpace::ThreeClass => &THREE_CLASS_NAMES,
            LabelSpace::SixClass => &SIX_CLASS_NAMES,
        }
    }

    pub fn name_of(&self, index: i64) -> Option<&'static str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names().get(i).copied())
    }

    /// Maps a raw 1-based dataset score onto a class index.
    ///
    /// SixClass keeps all six points (score s -> index s-1). ThreeClass
    /// merges them: {1,2} -> Negative, {3} -> Neutral, {4,5,6} -> Positive.
    pub fn index_of_raw(&self, raw: i64) -> Result<i64> {
        if !(RAW_SCORE_MIN..=RAW_SCORE_MAX).contains(&raw) {
            return Err(SentimentError::InvalidLabel {
                value: raw,
                allowed: format!("{}..={}", RAW_SCORE_MIN, RAW_SCORE_MAX),
            });
        }
        Ok(match self {
            LabelSpace::SixClass => raw - 1,
            LabelSpace::ThreeClass => match raw {
                1 | 2 => 0,
                3 => 1,
                _ => 2,
            },
        })
    }
}

impl std::fmt::Display for LabelSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelSpace::ThreeClass => write!(f, "three_class"),
            LabelSpace::SixClass => write!(f, "six_class"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_class_is_a_shift() {
        for raw in 1..=6 {
            assert_eq!(LabelSpace::SixClass.index_of_raw(raw).unwrap(), raw - 1);
        }
    }

    #[test]
    fn three_class_merges_the_tails() {
        let space = LabelSpace::ThreeClass;
        assert_eq!(space.index_of_raw(1).unwrap(), 0);
        assert_eq!(space.index_of_raw(2).unwrap(), 0);
        assert_eq!(space.index_of_raw(3).unwrap(), 1);
        assert_eq!(space.index_of_raw(4).unwrap(), 2);
        assert_eq!(space.index_of_raw(6).unwrap(), 2);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        for space in [LabelSpace::ThreeClass, LabelSpace::SixClass] {
            assert!(matches!(
                space.index_of_raw(0),
                Err(SentimentError::InvalidLabel { value: 0, .. })
            ));
            assert!(space.index_of_raw(7).is_err());
        }
    }

    #[test]
    fn every_index_has_a_name() {
        for space in [LabelSpace::ThreeClass, LabelSpace::SixClass] {
            for i in 0..space.n_classes() {
                assert!(space.name_of(i).is_some());
            }
            assert!(space.name_of(space.n_classes()).is_none());
            assert!(space.name_of(-1).is_none());
        }
    }

    #[test]
    fn serde_round_trip_uses_snake_case() {
        let json = serde_json::to_string(&LabelSpace::SixClass).unwrap();
        assert_eq!(json, "\"six_class\"");
        let back: LabelSpace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LabelSpace::SixClass);
    }
}
