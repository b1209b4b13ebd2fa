//! Key ranges over an index's ordered keys.
//!
//! Bounds are expressions: constant bounds can be compared and merged
//! exactly, while non-constant bounds (join correlation values) are carried as
//! written and make any merge involving them inexact.
use std::cmp::Ordering;
use std::ops::Bound;

use smallvec::SmallVec;

use crate::expr::Expr;
use crate::plan::{PlanRange, PlanSpan, PlanSpans};
use crate::value::Value;

/// Inclusive/exclusive range over a single index key.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRange {
    /// Lower bound; `Unbounded` is minus infinity.
    pub low: Bound<Expr>,
    /// Upper bound; `Unbounded` is plus infinity.
    pub high: Bound<Expr>,
}

/// Result of intersecting two ranges.
#[derive(Clone, Debug, PartialEq)]
pub enum RangeMerge {
    /// Exact intersection.
    Exact(KeyRange),
    /// The ranges are disjoint.
    Empty,
    /// Bounds could not be compared; the range is a superset of the intersection.
    Inexact(KeyRange),
}

impl KeyRange {
    /// Range with the given bounds.
    pub fn new(low: Bound<Expr>, high: Bound<Expr>) -> Self {
        Self { low, high }
    }

    /// Single value.
    pub fn point(value: Expr) -> Self {
        Self {
            low: Bound::Included(value.clone()),
            high: Bound::Included(value),
        }
    }

    /// Everything.
    pub fn full() -> Self {
        Self {
            low: Bound::Unbounded,
            high: Bound::Unbounded,
        }
    }

    /// Matches nothing; used for contradictions.
    pub fn empty() -> Self {
        Self {
            low: Bound::Excluded(Expr::Constant(Value::Null)),
            high: Bound::Excluded(Expr::Constant(Value::Null)),
        }
    }

    /// Whether the range selects exactly one key value.
    pub fn is_point(&self) -> bool {
        matches!((&self.low, &self.high), (Bound::Included(l), Bound::Included(h)) if l.equivalent_to(h))
    }

    /// Whether every bound is a literal or unbounded.
    pub fn is_constant(&self) -> bool {
        bound_value(&self.low).is_some() && bound_value(&self.high).is_some()
    }

    /// Whether the constant bounds select nothing.
    pub fn is_empty(&self) -> bool {
        let (Some(low), Some(high)) = (bound_value(&self.low), bound_value(&self.high)) else {
            return false;
        };
        match (low, high) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(l), Bound::Included(h)) => l.collate(h) == Ordering::Greater,
            (Bound::Included(l) | Bound::Excluded(l), Bound::Included(h) | Bound::Excluded(h)) => {
                l.collate(h) != Ordering::Less
            }
        }
    }

    /// Intersects two ranges.
    pub fn intersect(&self, other: &KeyRange) -> RangeMerge {
        if !self.is_constant() || !other.is_constant() {
            if self == other {
                return RangeMerge::Exact(self.clone());
            }
            return RangeMerge::Inexact(self.clone());
        }
        let low = tighter(&self.low, &other.low, Ordering::Greater);
        let high = tighter(&self.high, &other.high, Ordering::Less);
        let merged = KeyRange::new(low.clone(), high.clone());
        if merged.is_empty() {
            RangeMerge::Empty
        } else {
            RangeMerge::Exact(merged)
        }
    }

    /// Conservative overlap test; non-constant ranges are assumed to overlap.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        !matches!(self.intersect(other), RangeMerge::Empty)
    }

    fn to_plan(&self) -> PlanRange {
        let mut inclusion = 0;
        let low = match &self.low {
            Bound::Included(e) => {
                inclusion |= PlanRange::LOW;
                Some(e.to_string())
            }
            Bound::Excluded(e) => Some(e.to_string()),
            Bound::Unbounded => None,
        };
        let high = match &self.high {
            Bound::Included(e) => {
                inclusion |= PlanRange::HIGH;
                Some(e.to_string())
            }
            Bound::Excluded(e) => Some(e.to_string()),
            Bound::Unbounded => None,
        };
        PlanRange {
            low,
            high,
            inclusion,
        }
    }
}

// Literal view of a bound: `None` when the bound is a non-constant expression.
fn bound_value(bound: &Bound<Expr>) -> Option<Bound<&Value>> {
    match bound {
        Bound::Unbounded => Some(Bound::Unbounded),
        Bound::Included(e) => e.value().map(Bound::Included),
        Bound::Excluded(e) => e.value().map(Bound::Excluded),
    }
}

// Picks the more restrictive of two constant bounds: `want` is `Greater` for
// low bounds and `Less` for high bounds.
fn tighter<'a>(a: &'a Bound<Expr>, b: &'a Bound<Expr>, want: Ordering) -> &'a Bound<Expr> {
    match (a, b) {
        (Bound::Unbounded, _) => b,
        (_, Bound::Unbounded) => a,
        (
            Bound::Included(x) | Bound::Excluded(x),
            Bound::Included(y) | Bound::Excluded(y),
        ) => {
            let (Some(xv), Some(yv)) = (x.value(), y.value()) else {
                return a;
            };
            match xv.collate(yv) {
                Ordering::Equal => {
                    if matches!(a, Bound::Excluded(_)) {
                        a
                    } else {
                        b
                    }
                }
                ord if ord == want => a,
                _ => b,
            }
        }
    }
}

/// Composite span: one range per leading sarg key.
#[derive(Clone, Debug, PartialEq)]
pub struct Span {
    /// Ranges for keys `0..ranges.len()`.
    pub ranges: SmallVec<[KeyRange; 4]>,
    /// The scan may return the same document more than once.
    pub duplicates: bool,
}

impl Span {
    /// Span over the given ranges.
    pub fn new(ranges: SmallVec<[KeyRange; 4]>) -> Self {
        Self {
            ranges,
            duplicates: false,
        }
    }

    /// Span that returns nothing.
    pub fn empty() -> Self {
        let mut ranges = SmallVec::new();
        ranges.push(KeyRange::empty());
        Self::new(ranges)
    }

    /// Whether some key range selects nothing.
    pub fn is_empty(&self) -> bool {
        self.ranges.iter().any(KeyRange::is_empty)
    }

    fn overlaps(&self, other: &Span) -> bool {
        self.ranges
            .iter()
            .zip(other.ranges.iter())
            .all(|(a, b)| a.overlaps(b))
    }
}

/// Span algebra result for one index.
#[derive(Clone, Debug, PartialEq)]
pub enum SargSpans {
    /// Plain list of spans scanned one after the other.
    Term(Vec<Span>),
    /// Union of independently computed span sets.
    Union(Vec<SargSpans>),
    /// Intersection: every child must contain the document.
    Intersect(Vec<SargSpans>),
}

impl SargSpans {
    /// Number of spans; zero means sarging produced nothing.
    pub fn size(&self) -> usize {
        match self {
            SargSpans::Term(spans) => spans.len(),
            SargSpans::Union(children) | SargSpans::Intersect(children) => {
                children.iter().map(SargSpans::size).sum()
            }
        }
    }

    /// Whether the spans are exact when the index only honours the leading key.
    pub fn exact_span1(&self, nkeys: usize) -> bool {
        match self {
            SargSpans::Term(spans) => nkeys <= 1 || spans.iter().all(|s| s.ranges.len() <= 1),
            SargSpans::Union(children) | SargSpans::Intersect(children) => {
                children.iter().all(|c| c.exact_span1(nkeys))
            }
        }
    }

    /// Whether the scan can produce a document more than once.
    pub fn can_have_duplicates(&self, array_index: bool, may_overlap: bool) -> bool {
        if array_index {
            return true;
        }
        match self {
            SargSpans::Term(spans) => {
                if spans.iter().any(|s| s.duplicates) {
                    return true;
                }
                may_overlap
                    && spans
                        .iter()
                        .enumerate()
                        .any(|(i, a)| spans[i + 1..].iter().any(|b| a.overlaps(b)))
            }
            SargSpans::Union(_) => true,
            SargSpans::Intersect(children) => children
                .iter()
                .any(|c| c.can_have_duplicates(array_index, may_overlap)),
        }
    }

    /// Whether every span is the empty span.
    pub fn is_empty_scan(&self) -> bool {
        match self {
            SargSpans::Term(spans) => spans.iter().all(Span::is_empty),
            SargSpans::Union(children) => children.iter().all(SargSpans::is_empty_scan),
            SargSpans::Intersect(children) => children.iter().any(SargSpans::is_empty_scan),
        }
    }

    /// Whether key `pos` is pinned to one value by every span, so index order
    /// on later keys is preserved.
    pub fn equality_key(&self, pos: usize) -> bool {
        let SargSpans::Term(spans) = self else {
            return false;
        };
        let Some(first) = spans.first().and_then(|s| s.ranges.get(pos)) else {
            return false;
        };
        first.is_point() && spans.iter().all(|s| s.ranges.get(pos) == Some(first))
    }

    /// Whether spans are returned in index key order.
    pub fn is_ordered(&self) -> bool {
        match self {
            SargSpans::Term(spans) => spans.windows(2).all(|w| span_before(&w[0], &w[1])),
            SargSpans::Union(_) | SargSpans::Intersect(_) => false,
        }
    }

    /// Serializable form embedded in plan operators.
    pub fn to_plan(&self) -> PlanSpans {
        match self {
            SargSpans::Term(spans) => PlanSpans::Spans(
                spans
                    .iter()
                    .map(|s| PlanSpan {
                        range: s.ranges.iter().map(KeyRange::to_plan).collect(),
                    })
                    .collect(),
            ),
            SargSpans::Union(children) => {
                PlanSpans::Union(children.iter().map(SargSpans::to_plan).collect())
            }
            SargSpans::Intersect(children) => {
                PlanSpans::Intersect(children.iter().map(SargSpans::to_plan).collect())
            }
        }
    }
}

// True when every key of `a` lies entirely before `b` on its first key.
fn span_before(a: &Span, b: &Span) -> bool {
    let (Some(ra), Some(rb)) = (a.ranges.first(), b.ranges.first()) else {
        return false;
    };
    let (Some(high), Some(low)) = (bound_value(&ra.high), bound_value(&rb.low)) else {
        return false;
    };
    match (high, low) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(h), Bound::Included(l)) => h.collate(l) == Ordering::Less,
        (Bound::Included(h) | Bound::Excluded(h), Bound::Included(l) | Bound::Excluded(l)) => {
            h.collate(l) != Ordering::Greater
        }
    }
}

/// Smallest string greater than every string starting with `prefix`, if any.
pub fn next_prefix(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(c) = chars.pop() {
        let mut next = c as u32 + 1;
        if next == 0xD800 {
            next = 0xE000;
        }
        if let Some(next) = char::from_u32(next) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
