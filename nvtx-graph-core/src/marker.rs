//! Marker payloads carried by graph host nodes.

use std::fmt;
use std::sync::Arc;

use crate::RangeBackend;

/// Which side of a range a marker closes or opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Begin,
    End,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("begin"),
            Self::End => f.write_str("end"),
        }
    }
}

/// A range marker that fires through a backend when its graph node executes.
///
/// Inserted into a capture by [`crate::GraphCapture::insert_marker_node`].
/// Executing it has no effect on device memory; it only pushes or pops a
/// profiler range on whichever host thread runs the node.
#[derive(Clone)]
pub struct HostMarker {
    kind: MarkerKind,
    name: Arc<str>,
    backend: Arc<dyn RangeBackend>,
}

impl HostMarker {
    pub fn begin(name: Arc<str>, backend: Arc<dyn RangeBackend>) -> Self {
        Self {
            kind: MarkerKind::Begin,
            name,
            backend,
        }
    }

    pub fn end(name: Arc<str>, backend: Arc<dyn RangeBackend>) -> Self {
        Self {
            kind: MarkerKind::End,
            name,
            backend,
        }
    }

    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit the marker. Called once per graph execution.
    #[inline]
    pub fn fire(&self) {
        match self.kind {
            MarkerKind::Begin => self.backend.push_range(&self.name),
            MarkerKind::End => self.backend.pop_range(),
        }
    }
}

impl fmt::Debug for HostMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMarker")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RangeEvent, RecordingBackend};

    #[test]
    fn test_fire_routes_by_kind() {
        let recorder = Arc::new(RecordingBackend::new());
        let name: Arc<str> = Arc::from("layer");

        let begin = HostMarker::begin(name.clone(), recorder.clone());
        let end = HostMarker::end(name, recorder.clone());
        begin.fire();
        end.fire();
        begin.fire();
        end.fire();

        assert_eq!(
            recorder.events(),
            vec![
                RangeEvent::Push("layer".to_string()),
                RangeEvent::Pop,
                RangeEvent::Push("layer".to_string()),
                RangeEvent::Pop,
            ]
        );
    }
}
