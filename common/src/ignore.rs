//! Exact-match exclusion of source paths.
//!
//! An [`IgnoreList`] holds source-side paths exactly as the copy engine will produce them
//! (see [`crate::path::join`]). There are no glob, prefix or suffix semantics: `/src/build` does
//! not exclude `/src/build/out` nor `/src/build2`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    paths: Vec<String>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>) {
        self.paths.push(path.into());
    }

    pub fn is_ignored(&self, candidate: &str) -> bool {
        self.paths.iter().any(|path| path == candidate)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl<S: Into<String>> FromIterator<S> for IgnoreList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}
