use std::fmt;
use std::sync::Arc;

/// Reference-counted immutable string, the only string type that crosses the
/// boundary. Null is distinct from empty: a null `SharedStr` carries no buffer
/// at all. Cloning shares the buffer; dropping the last owner frees it. The
/// count is atomic, so values produced on the engine's home thread can be
/// consumed on any host thread and vice versa.
#[derive(Clone, Default)]
pub struct SharedStr(Option<Arc<str>>);

impl SharedStr {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn new(text: impl AsRef<str>) -> Self {
        Self(Some(Arc::from(text.as_ref())))
    }

    pub fn from_option(text: Option<String>) -> Self {
        Self(text.map(Arc::from))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Byte length; 0 for both null and empty.
    pub fn len(&self) -> usize {
        self.0.as_deref().map_or(0, str::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the text. Returns `None` for a null string, `Some("")` for an
    /// empty one.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Number of live owners of the underlying buffer; 0 for a null string.
    pub fn ref_count(&self) -> usize {
        self.0.as_ref().map_or(0, Arc::strong_count)
    }
}

impl From<&str> for SharedStr {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SharedStr {
    fn from(text: String) -> Self {
        Self(Some(Arc::from(text)))
    }
}

impl PartialEq for SharedStr {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_deref() == other.0.as_deref()
    }
}

impl Eq for SharedStr {}

impl fmt::Debug for SharedStr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_deref() {
            Some(text) => write!(formatter, "{:?}", text),
            None => write!(formatter, "<null>"),
        }
    }
}

impl fmt::Display for SharedStr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.0.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_from_empty() {
        let null = SharedStr::null();
        let empty = SharedStr::new("");
        assert!(null.is_null());
        assert!(!empty.is_null());
        assert_eq!(null.len(), 0);
        assert_eq!(empty.len(), 0);
        assert!(null != empty);
        assert_eq!(null.as_str(), None);
        assert_eq!(empty.as_str(), Some(""));
    }

    #[test]
    fn clone_shares_one_buffer_and_drop_frees_it_once() {
        let original = SharedStr::new("narrative");
        assert_eq!(original.ref_count(), 1);

        let copies = (0..5).map(|_| original.clone()).collect::<Vec<_>>();
        assert_eq!(original.ref_count(), 6);
        for copy in &copies {
            assert_eq!(copy.as_str(), Some("narrative"));
        }

        drop(copies);
        assert_eq!(original.ref_count(), 1);
    }

    #[test]
    fn clones_survive_cross_thread_handoff() {
        let original = SharedStr::new("crossing");
        let moved = original.clone();
        let returned = std::thread::spawn(move || {
            assert_eq!(moved.as_str(), Some("crossing"));
            moved
        })
        .join()
        .expect("thread should complete");
        assert_eq!(original.ref_count(), 2);
        drop(returned);
        assert_eq!(original.ref_count(), 1);
    }

    #[test]
    fn null_ref_count_is_zero() {
        assert_eq!(SharedStr::null().ref_count(), 0);
        assert_eq!(SharedStr::from_option(None).ref_count(), 0);
    }
}
