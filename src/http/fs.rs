//! File provider contract for the HTTP server.
//!
//! The server resolves URIs to files through a [`FileProvider`]. Files come
//! in two flavours: static files expose their whole content as a slice of
//! read-only memory (typically flash) which the server borrows and never
//! frees; dynamic files are read chunk-wise through [`FileProvider::read`]
//! into server-owned buffers.

/// An open response file.
#[derive(Debug)]
pub struct HttpFile {
    /// Provider cookie identifying the open file, unused for static files
    pub handle: u32,
    /// Total file size in bytes
    pub size: usize,
    pub(crate) static_data: Option<&'static [u8]>,
    pub(crate) pos: usize,
}

impl HttpFile {
    /// File backed by read-only memory.
    pub fn new_static(data: &'static [u8]) -> Self {
        Self {
            handle: 0,
            size: data.len(),
            static_data: Some(data),
            pos: 0,
        }
    }

    /// File read on demand through the provider.
    pub fn new_dynamic(handle: u32, size: usize) -> Self {
        Self {
            handle,
            size,
            static_data: None,
            pos: 0,
        }
    }

    pub fn is_static(&self) -> bool {
        self.static_data.is_some()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.size.saturating_sub(self.pos)
    }
}

/// Resolves paths to files and reads dynamic file content.
pub trait FileProvider {
    /// Opens `path`, returning `None` when it does not exist.
    fn open(&mut self, path: &str) -> Option<HttpFile>;

    /// Reads the next chunk of a dynamic file into `buf`, returning the
    /// number of bytes produced. Static files are never read through here.
    fn read(&mut self, file: &mut HttpFile, buf: &mut [u8]) -> usize;

    /// Releases an open file. The default does nothing, which fits
    /// providers without per-file state.
    fn close(&mut self, file: HttpFile) {
        let _ = file;
    }
}

/// Provider serving a fixed table of in-memory files.
pub struct StaticFiles {
    entries: &'static [(&'static str, &'static [u8])],
}

impl StaticFiles {
    pub const fn new(entries: &'static [(&'static str, &'static [u8])]) -> Self {
        Self { entries }
    }
}

impl FileProvider for StaticFiles {
    fn open(&mut self, path: &str) -> Option<HttpFile> {
        self.entries
            .iter()
            .find(|(name, _)| *name == path)
            .map(|(_, data)| HttpFile::new_static(data))
    }

    fn read(&mut self, _file: &mut HttpFile, _buf: &mut [u8]) -> usize {
        0
    }
}
