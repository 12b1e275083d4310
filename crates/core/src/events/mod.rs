//! Change-notification elements.
//!
//! Elements are produced by the backing store's change feed at commit time of
//! the underlying mutation, are immutable once published and are discarded
//! once a dispatcher has consumed them.

mod change_element;

pub use change_element::*;
