//! Message filters and the per-handler filter chain
//!
//! The chain is a singly linked list, newest installation at the head.
//! Links are shared (`Rc`) so a dispatch in progress can keep walking while
//! filter code installs or removes filters on the same handler:
//!
//! - removal tombstones the link (its filter slot becomes empty) and splices
//!   it out of the list; a cursor parked on it still follows its `next`
//! - cursors skip tombstones, so a removed filter is never invoked again
//! - installs prepend, so they are invisible to cursors already past the head

use crate::error::HandlerResult;
use crate::handler::HandlerRef;
use crate::message::Message;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared reference to a filter, as installed on a handler
pub type FilterRef = Rc<dyn MessageFilter>;

/// Interceptor that may veto delivery of a message to a handler
pub trait MessageFilter {
    /// Return `true` to suppress delivery of `message` to `handler`
    fn filter_message(&self, handler: &HandlerRef, message: &Message) -> HandlerResult<bool>;
}

impl<F> MessageFilter for F
where
    F: Fn(&HandlerRef, &Message) -> HandlerResult<bool>,
{
    fn filter_message(&self, handler: &HandlerRef, message: &Message) -> HandlerResult<bool> {
        self(handler, message)
    }
}

/// Address used as filter identity
pub(crate) fn filter_addr(filter: &dyn MessageFilter) -> *const () {
    filter as *const dyn MessageFilter as *const ()
}

struct FilterLink {
    /// `None` once removed
    filter: RefCell<Option<FilterRef>>,
    next: RefCell<Option<Rc<FilterLink>>>,
}

impl FilterLink {
    fn matches(&self, target: *const ()) -> bool {
        self.filter
            .borrow()
            .as_ref()
            .is_some_and(|f| Rc::as_ptr(f) as *const () == target)
    }

    fn tombstone(&self) {
        self.filter.borrow_mut().take();
    }

    fn next(&self) -> Option<Rc<FilterLink>> {
        self.next.borrow().clone()
    }
}

/// Filters installed on one handler, most recent first
#[derive(Default)]
pub struct FilterChain {
    head: Option<Rc<FilterLink>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a new installation of `filter`
    pub fn install(&mut self, filter: FilterRef) {
        let link = Rc::new(FilterLink {
            filter: RefCell::new(Some(filter)),
            next: RefCell::new(self.head.take()),
        });
        self.head = Some(link);
    }

    /// Remove every installation of `filter`, returning how many were removed
    pub fn remove_all(&mut self, filter: &dyn MessageFilter) -> usize {
        let target = filter_addr(filter);
        let mut removed = 0;

        while let Some(head) = self.head.clone() {
            if !head.matches(target) {
                break;
            }
            head.tombstone();
            self.head = head.next();
            removed += 1;
        }

        let Some(mut prev) = self.head.clone() else {
            return removed;
        };
        while let Some(link) = prev.next() {
            if link.matches(target) {
                link.tombstone();
                *prev.next.borrow_mut() = link.next();
                removed += 1;
            } else {
                prev = link;
            }
        }
        removed
    }

    /// Tombstone every link and start over with an empty chain
    pub fn clear(&mut self) {
        let mut current = self.head.take();
        while let Some(link) = current {
            link.tombstone();
            current = link.next.borrow_mut().take();
        }
    }

    /// Number of live installations
    pub fn len(&self) -> usize {
        self.cursor().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Walk the chain from the newest installation
    ///
    /// The cursor owns its position, so no borrow of the chain is held while
    /// filters run.
    pub fn cursor(&self) -> FilterCursor {
        FilterCursor {
            next: self.head.clone(),
        }
    }
}

impl Drop for FilterChain {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("len", &self.len())
            .finish()
    }
}

/// Iterator over the live filters of a chain
pub struct FilterCursor {
    next: Option<Rc<FilterLink>>,
}

impl Iterator for FilterCursor {
    type Item = FilterRef;

    fn next(&mut self) -> Option<FilterRef> {
        while let Some(link) = self.next.take() {
            self.next = link.next();
            if let Some(filter) = link.filter.borrow().clone() {
                return Some(filter);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MessageHandler;
    use std::cell::RefCell;

    struct Noop;

    impl MessageHandler for Noop {
        fn process_message(&self, _message: &Message) -> HandlerResult {
            Ok(())
        }
    }

    struct Named(&'static str);

    impl MessageFilter for Named {
        fn filter_message(&self, _handler: &HandlerRef, _message: &Message) -> HandlerResult<bool> {
            Ok(false)
        }
    }

    fn names(chain: &FilterChain, all: &[(&'static str, FilterRef)]) -> Vec<&'static str> {
        chain
            .cursor()
            .map(|f| {
                all.iter()
                    .find(|(_, candidate)| Rc::ptr_eq(candidate, &f))
                    .map(|(name, _)| *name)
                    .unwrap_or("?")
            })
            .collect()
    }

    #[test]
    fn test_newest_first() {
        let a: FilterRef = Rc::new(Named("a"));
        let b: FilterRef = Rc::new(Named("b"));
        let all = [("a", a.clone()), ("b", b.clone())];

        let mut chain = FilterChain::new();
        assert!(chain.is_empty());
        chain.install(a.clone());
        chain.install(b.clone());
        chain.install(a.clone());

        assert_eq!(names(&chain, &all), vec!["a", "b", "a"]);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_remove_all_occurrences() {
        let a: FilterRef = Rc::new(Named("a"));
        let b: FilterRef = Rc::new(Named("b"));
        let c: FilterRef = Rc::new(Named("c"));
        let all = [("a", a.clone()), ("b", b.clone()), ("c", c.clone())];

        let mut chain = FilterChain::new();
        for f in [&a, &b, &a, &c, &a] {
            chain.install(Rc::clone(f));
        }

        assert_eq!(chain.remove_all(&*a), 3);
        assert_eq!(names(&chain, &all), vec!["c", "b"]);

        // not installed: no-op
        assert_eq!(chain.remove_all(&*a), 0);
        assert_eq!(names(&chain, &all), vec!["c", "b"]);

        chain.install(a.clone());
        assert_eq!(names(&chain, &all), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_cursor_survives_removal_of_current_and_next() {
        let a: FilterRef = Rc::new(Named("a"));
        let b: FilterRef = Rc::new(Named("b"));
        let c: FilterRef = Rc::new(Named("c"));
        let all = [("a", a.clone()), ("b", b.clone()), ("c", c.clone())];

        let mut chain = FilterChain::new();
        chain.install(c.clone());
        chain.install(b.clone());
        chain.install(a.clone());

        let mut cursor = chain.cursor();
        let first = cursor.next().map(|f| Rc::ptr_eq(&f, &a));
        assert_eq!(first, Some(true));

        // remove the link the cursor just visited, and the one after it
        chain.remove_all(&*a);
        chain.remove_all(&*b);

        let rest: Vec<_> = cursor.collect();
        assert_eq!(rest.len(), 1);
        assert!(Rc::ptr_eq(&rest[0], &c));
        assert_eq!(names(&chain, &all), vec!["c"]);
    }

    #[test]
    fn test_clear_tombstones_in_flight_cursor() {
        let a: FilterRef = Rc::new(Named("a"));
        let b: FilterRef = Rc::new(Named("b"));

        let mut chain = FilterChain::new();
        chain.install(b.clone());
        chain.install(a.clone());

        let mut cursor = chain.cursor();
        assert!(cursor.next().is_some());
        chain.clear();
        assert!(cursor.next().is_none());
        assert!(chain.is_empty());

        chain.install(b.clone());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_closure_filter() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let filter: FilterRef = Rc::new(move |_: &HandlerRef, msg: &Message| -> HandlerResult<bool> {
            log.borrow_mut().push(msg.msg_type().to_string());
            Ok(msg.is_type("blocked"))
        });

        let handler: HandlerRef = Rc::new(Noop);
        assert!(filter.filter_message(&handler, &Message::new("blocked")).unwrap());
        assert!(!filter.filter_message(&handler, &Message::new("open")).unwrap());
        assert_eq!(*seen.borrow(), vec!["blocked", "open"]);
    }
}
