//! Scoped output capture.
//!
//! Output written while a capture is open lands in that capture instead of
//! its parent. Captures nest; closing one hands back exactly the bytes written
//! into it.

use bytes::{Bytes, BytesMut};

/// Proof of an open capture. Not `Clone`: one owner closes it exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureHandle {
    depth: usize,
}

/// Root output plus a stack of open captures.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    root: BytesMut,
    captures: Vec<BytesMut>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the innermost open capture, or to the root.
    pub fn write(&mut self, bytes: &[u8]) {
        self.current().extend_from_slice(bytes);
    }

    pub fn begin_capture(&mut self) -> CaptureHandle {
        self.captures.push(BytesMut::new());
        CaptureHandle {
            depth: self.captures.len(),
        }
    }

    /// Close `handle` and return everything written into it.
    ///
    /// Captures opened after `handle` and still open are folded into it in
    /// order, so no written byte is lost.
    pub fn end_capture(&mut self, handle: CaptureHandle) -> Bytes {
        let mut captured = BytesMut::new();
        if handle.depth == 0 || handle.depth > self.captures.len() {
            return captured.freeze();
        }
        for inner in self.captures.drain(handle.depth - 1..) {
            captured.extend_from_slice(&inner);
        }
        captured.freeze()
    }

    /// Number of open captures.
    pub fn depth(&self) -> usize {
        self.captures.len()
    }

    /// What has reached the root so far.
    pub fn root(&self) -> &[u8] {
        &self.root
    }

    /// Consume the buffer. Open captures are flushed to the root in order.
    pub fn into_bytes(mut self) -> Bytes {
        for capture in self.captures.drain(..) {
            self.root.extend_from_slice(&capture);
        }
        self.root.freeze()
    }

    fn current(&mut self) -> &mut BytesMut {
        self.captures.last_mut().unwrap_or(&mut self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_without_capture_reach_root() {
        let mut out = OutputBuffer::new();
        out.write(b"hello");
        assert_eq!(out.root(), b"hello");
    }

    #[test]
    fn capture_collects_and_detaches_output() {
        let mut out = OutputBuffer::new();
        out.write(b"a");
        let handle = out.begin_capture();
        out.write(b"b");
        assert_eq!(out.root(), b"a");

        let captured = out.end_capture(handle);
        assert_eq!(captured, Bytes::from_static(b"b"));
        assert_eq!(out.depth(), 0);
        assert_eq!(out.root(), b"a");
    }

    #[test]
    fn nested_captures_close_inner_first() {
        let mut out = OutputBuffer::new();
        let outer = out.begin_capture();
        out.write(b"<outer>");
        let inner = out.begin_capture();
        out.write(b"<inner/>");

        let inner_bytes = out.end_capture(inner);
        assert_eq!(inner_bytes, Bytes::from_static(b"<inner/>"));

        out.write(&inner_bytes);
        out.write(b"</outer>");
        let outer_bytes = out.end_capture(outer);
        assert_eq!(outer_bytes, Bytes::from_static(b"<outer><inner/></outer>"));
    }

    #[test]
    fn closing_outer_folds_open_inner_captures() {
        let mut out = OutputBuffer::new();
        let outer = out.begin_capture();
        out.write(b"1");
        let _inner = out.begin_capture();
        out.write(b"2");

        assert_eq!(out.end_capture(outer), Bytes::from_static(b"12"));
        assert_eq!(out.depth(), 0);
    }

    #[test]
    fn into_bytes_flushes_open_captures() {
        let mut out = OutputBuffer::new();
        out.write(b"a");
        let _open = out.begin_capture();
        out.write(b"b");
        assert_eq!(out.into_bytes(), Bytes::from_static(b"ab"));
    }
}
