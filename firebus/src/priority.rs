//! Handler priorities.
//!
//! [`PostOrder`] controls the order in which handlers for the same event type
//! are submitted to the executor. Lower ranks are submitted first. Because
//! handlers run as independent tasks, this orders scheduling only; it does not
//! order completion.

use std::fmt;
use std::str::FromStr;

/// Submission priority of a handler.
///
/// The set is closed and totally ordered:
/// `First < Early < Normal < Late < Last`.
///
/// # Examples
///
/// ```rust
/// use firebus::PostOrder;
///
/// assert!(PostOrder::First < PostOrder::Normal);
/// assert_eq!(PostOrder::default(), PostOrder::Normal);
/// assert_eq!("late".parse::<PostOrder>().unwrap(), PostOrder::Late);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PostOrder {
    /// Submitted before every other priority.
    First,

    /// Submitted after `First`.
    Early,

    /// Default priority.
    #[default]
    Normal,

    /// Submitted after `Normal`.
    Late,

    /// Submitted after every other priority.
    Last,
}

impl PostOrder {
    /// All priorities in submission order.
    pub const ALL: [PostOrder; 5] = [
        PostOrder::First,
        PostOrder::Early,
        PostOrder::Normal,
        PostOrder::Late,
        PostOrder::Last,
    ];

    /// Returns the rank of this priority; lower ranks are submitted first.
    pub const fn ordinal(self) -> u8 {
        match self {
            PostOrder::First => 0,
            PostOrder::Early => 1,
            PostOrder::Normal => 2,
            PostOrder::Late => 3,
            PostOrder::Last => 4,
        }
    }

    /// Returns the lowercase name of this priority.
    pub const fn name(self) -> &'static str {
        match self {
            PostOrder::First => "first",
            PostOrder::Early => "early",
            PostOrder::Normal => "normal",
            PostOrder::Late => "late",
            PostOrder::Last => "last",
        }
    }
}

impl fmt::Display for PostOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown priority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown priority: {0}")]
pub struct ParsePostOrderError(String);

impl FromStr for PostOrder {
    type Err = ParsePostOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PostOrder::ALL
            .into_iter()
            .find(|order| order.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParsePostOrderError(s.to_string()))
    }
}
