//! Server-Side-Include tag substitution.
//!
//! Response bytes of `.shtml`/`.shtm`/`.ssi` files run through a
//! byte-at-a-time state machine looking for `<!--#name-->` tags. Everything
//! outside a tag is forwarded untouched. A recognised tag is swallowed and
//! replaced by whatever the application writes from its tag callback; a
//! candidate that turns out malformed (wrong start sequence, oversized
//! name, broken end marker) is flushed verbatim from the tag buffer and the
//! offending byte is reprocessed as ordinary content.
//!
//! All emission respects the connection's transmit credit: when credit runs
//! out mid-flush the remaining tag-buffer bytes are remembered and resumed
//! on the next pump.

/// Opening marker of an SSI tag.
pub const SSI_TAG_START: &[u8] = b"<!--#";
/// Closing marker of an SSI tag.
pub const SSI_TAG_END: &[u8] = b"-->";
/// Longest accepted tag name.
pub const SSI_TAG_MAX_LEN: usize = 32;

const TAG_BUF_LEN: usize = SSI_TAG_START.len() + SSI_TAG_MAX_LEN + SSI_TAG_END.len();

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SsiPhase {
    /// Forwarding plain bytes, watching for the first start-marker byte
    WaitBegin,
    /// Matching the remainder of the start marker
    Begin,
    /// Accumulating the tag name
    Tag,
    /// Matching the remainder of the end marker
    End,
}

/// What the engine decided about a single input byte.
pub(crate) enum SsiStep {
    /// Byte consumed into the tag buffer
    Consumed,
    /// Complete tag name collected, invoke the application callback
    TagComplete,
    /// Not a tag after all: flush `flush_len` buffered bytes verbatim, then
    /// re-process the current byte as plain content
    Reset { flush_len: usize },
}

pub(crate) struct SsiEngine {
    phase: SsiPhase,
    tag_buf: [u8; TAG_BUF_LEN],
    /// Valid bytes in `tag_buf`
    tag_ptr: usize,
    /// Length of the tag name inside the buffer
    tag_len: usize,
    /// Prefix of `tag_buf` already flushed to the connection
    pub(crate) tag_written: usize,
}

impl SsiEngine {
    pub(crate) const fn new() -> Self {
        Self {
            phase: SsiPhase::WaitBegin,
            tag_buf: [0; TAG_BUF_LEN],
            tag_ptr: 0,
            tag_len: 0,
            tag_written: 0,
        }
    }

    /// Bytes buffered but not yet flushed after a reset.
    pub(crate) fn pending_flush(&self) -> usize {
        self.tag_ptr.saturating_sub(self.tag_written)
    }

    pub(crate) fn buffered(&self) -> &[u8] {
        &self.tag_buf[..self.tag_ptr]
    }

    /// Records that `n` buffered bytes were flushed to the connection.
    pub(crate) fn note_flushed(&mut self, n: usize) {
        self.tag_written += n;
        if self.tag_written >= self.tag_ptr {
            self.tag_ptr = 0;
            self.tag_written = 0;
        }
    }

    /// The collected tag name, valid after [`SsiStep::TagComplete`].
    pub(crate) fn tag_name(&self) -> &[u8] {
        &self.tag_buf[SSI_TAG_START.len()..SSI_TAG_START.len() + self.tag_len]
    }

    /// Clears all tag state after the replacement was produced, so nothing
    /// of the tag itself reaches the connection.
    pub(crate) fn tag_done(&mut self) {
        self.phase = SsiPhase::WaitBegin;
        self.tag_ptr = 0;
        self.tag_len = 0;
        self.tag_written = 0;
    }

    /// Leaves tag matching after a mismatch; the buffered bytes stay until
    /// flushed via [`SsiEngine::note_flushed`].
    pub(crate) fn reset_phase(&mut self) {
        self.phase = SsiPhase::WaitBegin;
    }

    /// Advances the state machine by one response byte.
    pub(crate) fn step(&mut self, ch: u8) -> SsiStep {
        match self.phase {
            SsiPhase::WaitBegin => {
                if ch == SSI_TAG_START[0] {
                    self.tag_buf[0] = ch;
                    self.tag_ptr = 1;
                    self.tag_written = 0;
                    self.phase = SsiPhase::Begin;
                    SsiStep::Consumed
                } else {
                    SsiStep::Reset { flush_len: 0 }
                }
            }
            SsiPhase::Begin => {
                if self.tag_ptr < SSI_TAG_START.len() && ch == SSI_TAG_START[self.tag_ptr] {
                    self.tag_buf[self.tag_ptr] = ch;
                    self.tag_ptr += 1;
                    if self.tag_ptr == SSI_TAG_START.len() {
                        self.phase = SsiPhase::Tag;
                        self.tag_len = 0;
                    }
                    SsiStep::Consumed
                } else {
                    self.fail()
                }
            }
            SsiPhase::Tag => {
                if ch == SSI_TAG_END[0] {
                    self.tag_buf[self.tag_ptr] = ch;
                    self.tag_ptr += 1;
                    self.phase = SsiPhase::End;
                    SsiStep::Consumed
                } else if self.tag_len < SSI_TAG_MAX_LEN {
                    self.tag_buf[self.tag_ptr] = ch;
                    self.tag_ptr += 1;
                    self.tag_len += 1;
                    SsiStep::Consumed
                } else {
                    self.fail()
                }
            }
            SsiPhase::End => {
                let end_pos = self.tag_ptr - SSI_TAG_START.len() - self.tag_len;
                if end_pos < SSI_TAG_END.len() && ch == SSI_TAG_END[end_pos] {
                    self.tag_buf[self.tag_ptr] = ch;
                    self.tag_ptr += 1;
                    if self.tag_ptr == SSI_TAG_START.len() + self.tag_len + SSI_TAG_END.len() {
                        SsiStep::TagComplete
                    } else {
                        SsiStep::Consumed
                    }
                } else {
                    self.fail()
                }
            }
        }
    }

    fn fail(&mut self) -> SsiStep {
        let flush_len = self.tag_ptr;
        SsiStep::Reset { flush_len }
    }
}
