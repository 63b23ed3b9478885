use std::cmp::Ordering;
use std::fmt::{Debug, Error, Formatter};

/// A total order over keys of type `K`.
///
/// Both skip lists are parameterized over a comparator so that keys can be
/// ordered by something other than their [`Ord`] implementation. The order
/// must be consistent for the lifetime of the list.
pub trait Comparator<K: ?Sized> {
    /// Three-way comparison of `a` against `b`.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation. This is the default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Orders keys with a closure.
///
/// ```
/// use skiptower::{OrderBy, SkipList, SkipListOptions};
///
/// // Largest key first.
/// let mut list = SkipList::with_comparator(
///     SkipListOptions::default(),
///     OrderBy(|a: &u32, b: &u32| b.cmp(a)),
/// )
/// .unwrap();
/// list.insert(1, "one").unwrap();
/// list.insert(2, "two").unwrap();
/// assert_eq!(list.get_next(&2), Some(&"one"));
/// ```
#[derive(Clone, Copy)]
pub struct OrderBy<F>(pub F);

impl<K: ?Sized, F> Comparator<K> for OrderBy<F>
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (self.0)(a, b)
    }
}

impl<F> Debug for OrderBy<F> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(f, "OrderBy(..)")
    }
}
