use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

#[derive(Debug)]
struct PathNode {
    segment: PathSegment,
    parent: ResponsePath,
}

/// Position of a value in the response tree.
///
/// Paths are immutable and share their ancestors, so extending a path is
/// cheap and never affects the parent.
#[derive(Clone, Debug, Default)]
pub struct ResponsePath(Option<Arc<PathNode>>);

impl ResponsePath {
    pub fn root() -> Self {
        ResponsePath(None)
    }

    pub fn with_key(&self, key: impl Into<String>) -> Self {
        self.with_segment(PathSegment::Key(key.into()))
    }

    pub fn with_index(&self, index: usize) -> Self {
        self.with_segment(PathSegment::Index(index))
    }

    fn with_segment(&self, segment: PathSegment) -> Self {
        ResponsePath(Some(Arc::new(PathNode {
            segment,
            parent: self.clone(),
        })))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_none()
    }

    pub fn parent(&self) -> Option<&ResponsePath> {
        self.0.as_ref().map(|node| &node.parent)
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.as_ref().map(|node| &node.segment)
    }

    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut current = self;
        while let Some(node) = &current.0 {
            len += 1;
            current = &node.parent;
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Segments ordered from the root down to this path.
    pub fn segments(&self) -> Vec<PathSegment> {
        let mut segments = Vec::with_capacity(self.len());
        let mut current = self;
        while let Some(node) = &current.0 {
            segments.push(node.segment.clone());
            current = &node.parent;
        }
        segments.reverse();
        segments
    }

    /// The path as a JSON array, as used in the `path` of GraphQL errors.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.segments()
                .into_iter()
                .map(|segment| match segment {
                    PathSegment::Key(key) => Value::String(key),
                    PathSegment::Index(index) => Value::from(index),
                })
                .collect(),
        )
    }
}

impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
